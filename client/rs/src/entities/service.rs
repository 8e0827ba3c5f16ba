use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use typeshare::typeshare;

use crate::entities::{I64, history::ServiceStatus};

/// Static description of one installable service,
/// as loaded from the catalog.
#[typeshare]
#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
  /// Unique service name, eg `noona-redis`.
  pub name: String,
  /// Human friendly name shown by the setup wizard.
  /// Falls back to `name` when empty.
  #[serde(default)]
  pub display_name: String,
  #[serde(default)]
  pub category: ServiceCategory,
  /// Container image reference.
  pub image: String,
  /// Port published on the host, if any.
  #[serde(default)]
  pub port: Option<u16>,
  /// Explicit URL override for reaching the service
  /// from the host. Takes priority over `HOST_SERVICE_URL`.
  #[serde(default)]
  pub host_service_url: Option<String>,
  /// HTTP endpoint polled until 2xx to decide the service is up.
  #[serde(default)]
  pub health_url: Option<String>,
  /// Default container environment as `KEY=VALUE` lines.
  #[serde(default)]
  pub env: Vec<String>,
  /// Documented environment fields, rendered as a form
  /// by the setup wizard.
  #[serde(default)]
  pub env_config: Vec<EnvFieldConfig>,
  /// Services which must be running before this one starts.
  #[serde(default)]
  pub dependencies: Vec<String>,
  /// Bind mounts as `host:container` specs.
  #[serde(default)]
  pub volumes: Vec<String>,
  /// Probe running containers for a Kavita `/data` mount
  /// before building the run spec, and inject the binding
  /// when one is found.
  #[serde(default)]
  pub kavita_mount_detection: bool,
}

impl ServiceDescriptor {
  pub fn display_name(&self) -> &str {
    if self.display_name.is_empty() {
      &self.name
    } else {
      &self.display_name
    }
  }
}

#[typeshare]
#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceCategory {
  #[default]
  Core,
  Addon,
}

/// One documented environment variable on a service.
#[typeshare]
#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct EnvFieldConfig {
  pub key: String,
  #[serde(default)]
  pub label: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub default: String,
  #[serde(default)]
  pub required: bool,
  #[serde(default)]
  pub read_only: bool,
  #[serde(default)]
  pub warning: Option<String>,
}

/// Catalog listing entry returned by `GET /api/services`.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceListItem {
  pub name: String,
  pub display_name: String,
  pub category: ServiceCategory,
  pub image: String,
  #[serde(default)]
  pub port: Option<u16>,
  #[serde(default)]
  pub health_url: Option<String>,
  #[serde(default)]
  pub env_config: Vec<EnvFieldConfig>,
  #[serde(default)]
  pub dependencies: Vec<String>,
  /// Whether a container for this service is already running.
  pub installed: bool,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListServicesQuery {
  /// Keep services whose containers are already running
  /// in the listing. Default: `true`.
  #[serde(default)]
  pub include_installed: Option<bool>,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListServicesResponse {
  pub services: Vec<ServiceListItem>,
}

/// `POST /api/services/{name}/test` response.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TestServiceResponse {
  pub success: bool,
  pub status: ServiceStatus,
  #[serde(default)]
  pub status_code: Option<u16>,
  #[serde(default)]
  pub body: Option<String>,
  pub url: String,
  #[serde(default)]
  pub error: Option<String>,
}

/// `GET /api/services/{name}/health` response, derived
/// from recorded history rather than an active probe.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealthResponse {
  pub status: ServiceStatus,
  pub message: String,
  pub checked_at: I64,
  pub success: bool,
  #[serde(default)]
  pub detail: Option<String>,
}

#[typeshare]
#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct MountDetection {
  /// Host path of the detected Kavita data mount,
  /// or None when no matching container was found.
  pub mount_path: Option<String>,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DetectMountResponse {
  pub detection: MountDetection,
}
