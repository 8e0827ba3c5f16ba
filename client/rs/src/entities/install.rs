use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use typeshare::typeshare;

/// `POST /api/services/install` body.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InstallServicesBody {
  #[serde(default)]
  pub services: Vec<InstallServiceRequest>,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstallServiceRequest {
  pub name: String,
  /// Environment overrides applied over the descriptor
  /// defaults. Override wins on key collision.
  #[serde(default)]
  pub env: Option<HashMap<String, String>>,
}

/// Outcome of one service within an install run.
#[typeshare]
#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InstallStatus {
  #[default]
  Pending,
  Installing,
  Installed,
  Error,
}

/// Overall state of the current install run.
#[typeshare]
#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InstallRunStatus {
  #[default]
  Idle,
  Installing,
  Complete,
  Failed,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
  pub name: String,
  pub status: InstallStatus,
  #[serde(default)]
  pub error: Option<String>,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InstallServicesResponse {
  /// Per service outcomes in install order.
  pub results: Vec<InstallResult>,
}

/// `GET /api/services/install/progress` response.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InstallProgress {
  pub status: InstallRunStatus,
  /// `100 * installed / |order|`, truncated.
  pub percent: u32,
  /// Items in install order.
  pub items: Vec<InstallResult>,
}
