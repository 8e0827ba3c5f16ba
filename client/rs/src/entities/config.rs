use std::{collections::HashMap, path::PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::entities::logger::{
  LogConfig, LogLevel, StdioLogMode,
};

/// Full configuration of the Warden control plane.
/// Loaded from an optional TOML file, overridden by
/// `WARDEN_*` environment variables, then CLI args.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
  /// Port the control plane API listens on.
  /// Env: `WARDEN_API_PORT`. Default: 4001
  #[serde(default = "default_port")]
  pub port: u16,

  /// IP to bind the API server to. Default: 0.0.0.0
  #[serde(default = "default_bind_ip")]
  pub bind_ip: String,

  /// Candidate container runtime endpoints, probed in
  /// order before the platform defaults.
  #[serde(default)]
  pub docker_endpoints: Vec<String>,

  /// `DOCKER_HOST` style endpoint, probed after the
  /// platform default socket.
  #[serde(default)]
  pub docker_host: Option<String>,

  /// Docker network joining all managed containers.
  /// Default: `noona-network`
  #[serde(default = "default_stack_network")]
  pub stack_network: String,

  /// Name of Warden's own container, attached to the
  /// stack network at first boot. Default: `noona-warden`
  #[serde(default = "default_container_name")]
  pub container_name: String,

  /// Base URL used to reach published service ports from
  /// the host, eg `http://192.168.1.10`.
  /// Env: `HOST_SERVICE_URL`.
  #[serde(default)]
  pub host_service_url: String,

  /// Seconds before a service health wait fails.
  /// Default: 90
  #[serde(default = "default_health_timeout_secs")]
  pub health_timeout_secs: u64,

  /// Seconds allowed for each outbound HTTP request.
  /// Default: 10
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,

  /// Per service history buffer capacity. Default: 500
  #[serde(default = "default_history_capacity")]
  pub history_capacity: usize,

  /// Per step wizard timeline cap. Default: 100
  #[serde(default = "default_timeline_limit")]
  pub timeline_limit: usize,

  /// Candidate endpoint URLs for the key value store
  /// backing wizard state, tried in order. Each entry is
  /// the full storage endpoint.
  #[serde(default = "default_store_urls")]
  pub store_urls: Vec<String>,

  /// Bearer token for the key value store.
  #[serde(default)]
  pub store_token: String,

  /// Key the wizard document is stored under.
  /// Default: `wizard:state`
  #[serde(default = "default_wizard_state_key")]
  pub wizard_state_key: String,

  /// Container side path Raven mounts Kavita data at.
  /// Default: `/kavita-data`
  #[serde(default = "default_kavita_mount_path")]
  pub kavita_mount_path: String,

  /// Optional TOML file replacing the built in service
  /// catalog.
  #[serde(default)]
  pub catalog_path: Option<PathBuf>,

  /// Feature flags surfaced by the wizard metadata
  /// endpoint.
  #[serde(default = "default_features")]
  pub features: HashMap<String, bool>,

  /// `*_VAULT_TOKEN` environment variables collected at
  /// startup and stamped onto started containers.
  #[serde(default)]
  pub vault_tokens: HashMap<String, String>,

  #[serde(default)]
  pub logging: LogConfig,

  /// Pretty print the startup config debug line.
  #[serde(default)]
  pub pretty_startup_config: bool,
}

fn default_port() -> u16 {
  4001
}

fn default_bind_ip() -> String {
  String::from("0.0.0.0")
}

fn default_stack_network() -> String {
  String::from("noona-network")
}

fn default_container_name() -> String {
  String::from("noona-warden")
}

fn default_health_timeout_secs() -> u64 {
  90
}

fn default_request_timeout_secs() -> u64 {
  10
}

fn default_history_capacity() -> usize {
  500
}

fn default_timeline_limit() -> usize {
  100
}

fn default_store_urls() -> Vec<String> {
  vec![String::from("http://noona-vault:3005/v2/storage")]
}

fn default_wizard_state_key() -> String {
  String::from("wizard:state")
}

fn default_kavita_mount_path() -> String {
  String::from("/kavita-data")
}

fn default_features() -> HashMap<String, bool> {
  HashMap::from([
    (String::from("raven_detection"), true),
    (String::from("portal_proxy"), true),
  ])
}

impl Default for WardenConfig {
  fn default() -> Self {
    WardenConfig {
      port: default_port(),
      bind_ip: default_bind_ip(),
      docker_endpoints: Default::default(),
      docker_host: Default::default(),
      stack_network: default_stack_network(),
      container_name: default_container_name(),
      host_service_url: Default::default(),
      health_timeout_secs: default_health_timeout_secs(),
      request_timeout_secs: default_request_timeout_secs(),
      history_capacity: default_history_capacity(),
      timeline_limit: default_timeline_limit(),
      store_urls: default_store_urls(),
      store_token: Default::default(),
      wizard_state_key: default_wizard_state_key(),
      kavita_mount_path: default_kavita_mount_path(),
      catalog_path: Default::default(),
      features: default_features(),
      vault_tokens: Default::default(),
      logging: Default::default(),
      pretty_startup_config: Default::default(),
    }
  }
}

impl WardenConfig {
  /// Copy safe to print at startup.
  pub fn sanitized(&self) -> WardenConfig {
    let mut config = self.clone();
    if !config.store_token.is_empty() {
      config.store_token = String::from("##############");
    }
    for token in config.vault_tokens.values_mut() {
      *token = String::from("##############");
    }
    config
  }
}

/// The original debug switch. `super` turns on debug
/// level logging.
#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
#[serde(rename_all = "lowercase")]
pub enum DebugMode {
  #[default]
  Minimal,
  Super,
}

/// Environment overrides, parsed with envy.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Env {
  /// Path to a TOML config file.
  #[serde(default)]
  pub warden_config_path: Option<PathBuf>,
  /// `minimal` | `super`
  #[serde(default)]
  pub debug: Option<DebugMode>,
  /// Override `port`
  pub warden_api_port: Option<u16>,
  /// Override `bind_ip`
  pub warden_bind_ip: Option<String>,
  /// Override `docker_endpoints` (comma separated)
  pub warden_docker_endpoints: Option<Vec<String>>,
  /// Probed after the platform default socket.
  pub docker_host: Option<String>,
  /// Override `stack_network`
  pub warden_stack_network: Option<String>,
  /// Override `container_name`
  pub warden_container_name: Option<String>,
  /// Override `host_service_url`
  pub host_service_url: Option<String>,
  /// Override `health_timeout_secs`
  pub warden_health_timeout_secs: Option<u64>,
  /// Override `request_timeout_secs`
  pub warden_request_timeout_secs: Option<u64>,
  /// Override `history_capacity`
  pub warden_history_capacity: Option<usize>,
  /// Override `timeline_limit`
  pub warden_timeline_limit: Option<usize>,
  /// Override `store_urls` (comma separated)
  pub warden_store_urls: Option<Vec<String>>,
  /// Override `store_token`
  pub warden_store_token: Option<String>,
  /// Override `wizard_state_key`
  pub warden_wizard_state_key: Option<String>,
  /// Override `kavita_mount_path`
  pub warden_kavita_mount_path: Option<String>,
  /// Override `catalog_path`
  pub warden_catalog_path: Option<PathBuf>,
  /// Override `logging.level`
  pub warden_logging_level: Option<LogLevel>,
  /// Override `logging.stdio`
  pub warden_logging_stdio: Option<StdioLogMode>,
  /// Override `logging.pretty`
  pub warden_logging_pretty: Option<bool>,
  /// Override `logging.otlp_endpoint`
  pub warden_logging_otlp_endpoint: Option<String>,
  /// Override `logging.opentelemetry_service_name`
  pub warden_logging_opentelemetry_service_name: Option<String>,
  /// Override `pretty_startup_config`
  pub warden_pretty_startup_config: Option<bool>,
}

/// Warden command line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "warden", version, about)]
pub struct CliArgs {
  /// Path to a TOML config file.
  #[arg(long)]
  pub config_path: Option<PathBuf>,
  /// Log more or less. Overrides the config log level.
  #[arg(long)]
  pub log_level: Option<tracing::Level>,
}
