use derive_variants::EnumVariants;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use typeshare::typeshare;

use crate::entities::I64;

/// One record in a service's bounded event log.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
  pub timestamp: I64,
  #[serde(flatten)]
  pub event: HistoryEvent,
}

#[typeshare]
#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, EnumVariants,
)]
#[variant_derive(Debug, Clone, Copy, Display)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HistoryEvent {
  /// A lifecycle transition.
  Status {
    status: ServiceStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    message: String,
  },
  /// An image pull layer event.
  Progress {
    #[serde(flatten)]
    progress: PullProgress,
  },
  /// A raw container output line.
  Log { stream: LogStream, message: String },
  /// An active health probe result.
  Test {
    url: String,
    success: bool,
    #[serde(default)]
    status_code: Option<u16>,
  },
}

/// Image pull layer event, normalized from the runtime's
/// streamed pull progress.
#[typeshare]
#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct PullProgress {
  /// Layer id, or `image` for image level events.
  pub layer_id: String,
  /// Runtime phase, eg `Downloading` / `Extracting`.
  pub phase: String,
  #[serde(default)]
  pub current: Option<I64>,
  #[serde(default)]
  pub total: Option<I64>,
  /// Progress bar text as reported by the runtime.
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub detail: String,
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
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogStream {
  #[default]
  Stdout,
  Stderr,
}

/// Lifecycle status of one service.
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
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceStatus {
  #[default]
  Queued,
  Pulling,
  Starting,
  Running,
  Ready,
  Tested,
  Error,
  Detecting,
  NotFound,
  Detected,
}

/// Derived latest-state view over a service's history.
#[typeshare]
#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
  pub status: ServiceStatus,
  /// Latest pull progress percent, when a pull is underway.
  #[serde(default)]
  pub percent: Option<f64>,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub detail: String,
  pub updated_at: I64,
}

/// `GET /api/services/{name}/logs` response. The pseudo
/// service `installation` carries the whole-run mirror.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHistoryResponse {
  pub service: String,
  pub entries: Vec<HistoryEntry>,
  pub summary: HistorySummary,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct HistoryQuery {
  /// Most recent entries to return. Default: buffer capacity.
  #[serde(default)]
  pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn history_entry_wire_shape() {
    let entry = HistoryEntry {
      timestamp: 1700000000000,
      event: HistoryEvent::Progress {
        progress: PullProgress {
          layer_id: "f1a2b3".to_string(),
          phase: "Downloading".to_string(),
          current: Some(512),
          total: Some(2048),
          detail: "[==> ]".to_string(),
        },
      },
    };
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["type"], "progress");
    assert_eq!(json["layerId"], "f1a2b3");
    assert_eq!(json["total"], 2048);

    let back: HistoryEntry = serde_json::from_value(json).unwrap();
    assert_eq!(back, entry);
  }

  #[test]
  fn status_serializes_kebab_case() {
    assert_eq!(
      serde_json::to_string(&ServiceStatus::NotFound).unwrap(),
      "\"not-found\""
    );
    assert_eq!(ServiceStatus::NotFound.to_string(), "not-found");
  }
}
