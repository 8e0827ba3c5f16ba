use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use typeshare::typeshare;
use uuid::Uuid;

use crate::{
  deserializers::{
    double_option, forgiving_optional_step_status,
    forgiving_step_status,
  },
  entities::{I64, JsonObject, JsonValue},
};

/// Current schema version stamped on fresh wizard documents.
/// Version 1 payloads are still accepted on read.
pub const WIZARD_STATE_VERSION: i64 = 2;

/// Default cap on per step timeline length.
pub const DEFAULT_TIMELINE_LIMIT: usize = 100;

/// The four ordered steps of the setup wizard.
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
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WizardStepId {
  Foundation,
  Portal,
  Raven,
  Verification,
}

impl WizardStepId {
  pub const ALL: [WizardStepId; 4] = [
    WizardStepId::Foundation,
    WizardStepId::Portal,
    WizardStepId::Raven,
    WizardStepId::Verification,
  ];
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
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepStatus {
  #[default]
  Pending,
  InProgress,
  Complete,
  Error,
  Skipped,
}

/// Who performed a wizard action.
#[typeshare]
#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
  pub id: String,
  #[serde(rename = "type", default)]
  pub actor_type: String,
  #[serde(default)]
  pub label: String,
  #[serde(default)]
  pub avatar_url: Option<String>,
  #[serde(default)]
  pub metadata: Option<JsonObject>,
}

/// A single audit record attached to a wizard step.
#[typeshare]
#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
  pub id: String,
  pub timestamp: I64,
  #[serde(
    default,
    deserialize_with = "forgiving_optional_step_status"
  )]
  pub status: Option<StepStatus>,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub detail: Option<String>,
  #[serde(default)]
  pub code: Option<String>,
  #[serde(default)]
  pub actor: Option<Actor>,
  #[serde(default)]
  pub context: Option<JsonValue>,
}

impl TimelineEvent {
  pub fn new(
    message: impl Into<String>,
    timestamp: i64,
  ) -> TimelineEvent {
    TimelineEvent {
      id: Uuid::new_v4().to_string(),
      timestamp,
      message: message.into(),
      ..Default::default()
    }
  }
}

/// State of one wizard step.
#[typeshare]
#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
  #[serde(default, deserialize_with = "forgiving_step_status")]
  pub status: StepStatus,
  #[serde(default)]
  pub detail: Option<String>,
  #[serde(default)]
  pub error: Option<String>,
  #[serde(default)]
  pub updated_at: Option<I64>,
  #[serde(default)]
  pub completed_at: Option<I64>,
  #[serde(default)]
  pub actor: Option<Actor>,
  /// Caller supplied retry count. Never auto incremented.
  #[serde(default)]
  pub retries: I64,
  #[serde(default)]
  pub timeline: Vec<TimelineEvent>,
}

impl StepState {
  /// Merge one partial update. Only fields present on the
  /// update are touched; explicit nulls clear. Returns
  /// whether anything changed.
  pub fn apply(&mut self, update: &StepUpdate, now: i64) -> bool {
    let mut changed = false;
    if let Some(status) = update.status
      && self.status != status
    {
      if self.status == StepStatus::Complete
        && update.completed_at.is_none()
      {
        self.completed_at = None;
      }
      if status == StepStatus::Complete
        && update.completed_at.is_none()
        && self.completed_at.is_none()
      {
        self.completed_at = Some(now);
      }
      self.status = status;
      changed = true;
    }
    if let Some(detail) = &update.detail
      && self.detail != *detail
    {
      self.detail = detail.clone();
      changed = true;
    }
    if let Some(error) = &update.error
      && self.error != *error
    {
      self.error = error.clone();
      changed = true;
    }
    if let Some(completed_at) = update.completed_at
      && self.completed_at != completed_at
    {
      self.completed_at = completed_at;
      changed = true;
    }
    if let Some(actor) = &update.actor
      && self.actor != *actor
    {
      self.actor = actor.clone();
      changed = true;
    }
    if let Some(retries) = update.retries
      && self.retries != retries
    {
      self.retries = retries;
      changed = true;
    }
    if let Some(timeline) = &update.timeline {
      self.timeline = timeline.clone();
      changed = true;
    }
    if changed {
      self.updated_at = Some(update.updated_at.unwrap_or(now));
    }
    changed
  }

  /// Append one timeline event, trimming the oldest
  /// entries over `limit`.
  pub fn push_event(&mut self, event: TimelineEvent, limit: usize) {
    self.timeline.push(event);
    if self.timeline.len() > limit {
      let excess = self.timeline.len() - limit;
      self.timeline.drain(..excess);
    }
  }
}

/// The persistent, versioned wizard document.
#[typeshare]
#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct WizardState {
  #[serde(default = "default_version")]
  pub version: I64,
  #[serde(default)]
  pub updated_at: Option<I64>,
  #[serde(default)]
  pub completed: bool,
  #[serde(default)]
  pub foundation: StepState,
  #[serde(default)]
  pub portal: StepState,
  #[serde(default)]
  pub raven: StepState,
  #[serde(default)]
  pub verification: StepState,
}

fn default_version() -> i64 {
  WIZARD_STATE_VERSION
}

impl WizardState {
  /// A fresh document with every step pending.
  pub fn fresh(now: i64) -> WizardState {
    WizardState {
      version: WIZARD_STATE_VERSION,
      updated_at: Some(now),
      ..Default::default()
    }
  }

  pub fn step(&self, id: WizardStepId) -> &StepState {
    match id {
      WizardStepId::Foundation => &self.foundation,
      WizardStepId::Portal => &self.portal,
      WizardStepId::Raven => &self.raven,
      WizardStepId::Verification => &self.verification,
    }
  }

  pub fn step_mut(&mut self, id: WizardStepId) -> &mut StepState {
    match id {
      WizardStepId::Foundation => &mut self.foundation,
      WizardStepId::Portal => &mut self.portal,
      WizardStepId::Raven => &mut self.raven,
      WizardStepId::Verification => &mut self.verification,
    }
  }

  /// Enforce document invariants before a write:
  /// version at least 1, completed steps carry a
  /// completion timestamp, timelines within the cap,
  /// top level `completed` derived from the steps.
  pub fn normalize(&mut self, now: i64, timeline_limit: usize) {
    if self.version < 1 {
      self.version = 1;
    }
    for id in WizardStepId::ALL {
      let step = self.step_mut(id);
      if step.status == StepStatus::Complete
        && step.completed_at.is_none()
      {
        step.completed_at = Some(step.updated_at.unwrap_or(now));
      }
      if step.timeline.len() > timeline_limit {
        let excess = step.timeline.len() - timeline_limit;
        step.timeline.drain(..excess);
      }
    }
    self.completed = WizardStepId::ALL.iter().all(|id| {
      matches!(
        self.step(*id).status,
        StepStatus::Complete | StepStatus::Skipped
      )
    });
  }
}

/// Partial update to one step, applied by
/// `PUT /api/setup/wizard/state` with `{updates: [...]}`.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepUpdate {
  pub step: WizardStepId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<StepStatus>,
  #[serde(
    default,
    deserialize_with = "double_option",
    skip_serializing_if = "Option::is_none"
  )]
  pub detail: Option<Option<String>>,
  #[serde(
    default,
    deserialize_with = "double_option",
    skip_serializing_if = "Option::is_none"
  )]
  pub error: Option<Option<String>>,
  #[serde(
    default,
    deserialize_with = "double_option",
    skip_serializing_if = "Option::is_none"
  )]
  pub completed_at: Option<Option<I64>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<I64>,
  #[serde(
    default,
    deserialize_with = "double_option",
    skip_serializing_if = "Option::is_none"
  )]
  pub actor: Option<Option<Actor>>,
  /// Set absolutely when provided, never auto incremented.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retries: Option<I64>,
  /// Replaces the whole timeline. Use the broadcast
  /// endpoint to append instead.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeline: Option<Vec<TimelineEvent>>,
}

impl Default for WizardStepId {
  fn default() -> Self {
    WizardStepId::Foundation
  }
}

/// `PUT /api/setup/wizard/state` body: either a full
/// replacement document or a batch of partial updates.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WizardStatePayload {
  #[serde(default)]
  pub state: Option<WizardState>,
  #[serde(default)]
  pub updates: Option<Vec<StepUpdate>>,
}

#[derive(Debug, Clone)]
pub enum WizardWriteOperation {
  Replace { state: Box<WizardState> },
  Update { updates: Vec<StepUpdate> },
}

impl WizardStatePayload {
  /// Decide whether a PUT body is a full replace or a
  /// batch of partial updates.
  pub fn resolve(self) -> anyhow::Result<WizardWriteOperation> {
    match (self.state, self.updates) {
      (Some(state), _) => Ok(WizardWriteOperation::Replace {
        state: state.into(),
      }),
      (None, Some(updates)) => {
        Ok(WizardWriteOperation::Update { updates })
      }
      (None, None) => Err(anyhow!(
        "payload must provide either `state` or `updates`"
      )),
    }
  }
}

/// `POST /api/setup/wizard/steps/{step}/broadcast` body.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct WizardBroadcastRequest {
  pub message: String,
  #[serde(default)]
  pub detail: Option<String>,
  /// New step status written in the same transaction.
  #[serde(default)]
  pub status: Option<StepStatus>,
  /// Status recorded on the event itself. Falls back
  /// to `status`.
  #[serde(default)]
  pub event_status: Option<StepStatus>,
  #[serde(default)]
  pub code: Option<String>,
  #[serde(default)]
  pub actor: Option<Actor>,
  /// Timeline cap for this append. Default: 100.
  #[serde(default)]
  pub limit: Option<u32>,
  #[serde(default)]
  pub context: Option<JsonValue>,
}

/// `POST /api/setup/wizard/steps/{step}/reset` body.
#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct WizardResetPayload {
  #[serde(default)]
  pub actor: Option<Actor>,
  #[serde(default)]
  pub detail: Option<String>,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub limit: Option<u32>,
  #[serde(default)]
  pub context: Option<JsonValue>,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WizardResponse {
  pub wizard: WizardState,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WizardBroadcastResponse {
  pub wizard: WizardState,
  pub event: TimelineEvent,
  pub step: WizardStepId,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WizardStepHistoryResponse {
  pub step: WizardStepId,
  pub events: Vec<TimelineEvent>,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WizardStepMetadata {
  pub id: WizardStepId,
  pub title: String,
  pub description: String,
  pub optional: bool,
  pub icon: String,
  pub capabilities: Vec<String>,
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WizardMetadataResponse {
  pub steps: Vec<WizardStepMetadata>,
  pub features: std::collections::HashMap<String, bool>,
}

/// Fixed step metadata surfaced by
/// `GET /api/setup/wizard/metadata`.
pub fn wizard_step_metadata() -> Vec<WizardStepMetadata> {
  vec![
    WizardStepMetadata {
      id: WizardStepId::Foundation,
      title: "Foundation".to_string(),
      description: "Install the core Noona services".to_string(),
      optional: false,
      icon: "server".to_string(),
      capabilities: vec![
        "install".to_string(),
        "logs".to_string(),
      ],
    },
    WizardStepMetadata {
      id: WizardStepId::Portal,
      title: "Portal".to_string(),
      description: "Connect the community portal".to_string(),
      optional: true,
      icon: "message-circle".to_string(),
      capabilities: vec![
        "install".to_string(),
        "proxy".to_string(),
      ],
    },
    WizardStepMetadata {
      id: WizardStepId::Raven,
      title: "Raven".to_string(),
      description: "Set up the Raven downloader".to_string(),
      optional: true,
      icon: "download".to_string(),
      capabilities: vec![
        "install".to_string(),
        "detect".to_string(),
      ],
    },
    WizardStepMetadata {
      id: WizardStepId::Verification,
      title: "Verification".to_string(),
      description: "Verify the installation".to_string(),
      optional: false,
      icon: "check-circle".to_string(),
      capabilities: vec!["finalize".to_string()],
    },
  ]
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn partial_update_touches_only_present_fields() {
    let mut state = WizardState::fresh(1000);
    let update: StepUpdate = serde_json::from_value(json!({
      "step": "portal",
      "status": "in-progress",
      "detail": "validating",
    }))
    .unwrap();
    let changed = state.portal.apply(&update, 2000);
    assert!(changed);
    assert_eq!(state.portal.status, StepStatus::InProgress);
    assert_eq!(state.portal.detail.as_deref(), Some("validating"));
    assert_eq!(state.portal.completed_at, None);
    assert_eq!(state.portal.updated_at, Some(2000));
    assert_eq!(state.foundation, StepState::default());
  }

  #[test]
  fn explicit_null_clears_detail() {
    let mut step = StepState {
      detail: Some("old".to_string()),
      ..Default::default()
    };
    let update: StepUpdate = serde_json::from_value(json!({
      "step": "raven",
      "detail": null,
    }))
    .unwrap();
    assert!(step.apply(&update, 10));
    assert_eq!(step.detail, None);

    // Absent field leaves the value alone.
    let update: StepUpdate = serde_json::from_value(json!({
      "step": "raven",
      "status": "error",
    }))
    .unwrap();
    step.detail = Some("kept".to_string());
    step.apply(&update, 20);
    assert_eq!(step.detail.as_deref(), Some("kept"));
  }

  #[test]
  fn completing_stamps_completed_at() {
    let mut step = StepState::default();
    let update = StepUpdate {
      step: WizardStepId::Foundation,
      status: Some(StepStatus::Complete),
      ..Default::default()
    };
    step.apply(&update, 500);
    assert_eq!(step.completed_at, Some(500));

    // Leaving complete clears it again.
    let update = StepUpdate {
      step: WizardStepId::Foundation,
      status: Some(StepStatus::Pending),
      ..Default::default()
    };
    step.apply(&update, 600);
    assert_eq!(step.completed_at, None);
  }

  #[test]
  fn retries_are_set_absolutely() {
    let mut step = StepState {
      retries: 4,
      ..Default::default()
    };
    let update = StepUpdate {
      step: WizardStepId::Raven,
      retries: Some(2),
      ..Default::default()
    };
    step.apply(&update, 10);
    assert_eq!(step.retries, 2);
  }

  #[test]
  fn timeline_trims_oldest() {
    let mut step = StepState::default();
    for i in 0..101i64 {
      step.push_event(
        TimelineEvent::new(format!("broadcast {}", i + 1), i),
        DEFAULT_TIMELINE_LIMIT,
      );
    }
    assert_eq!(step.timeline.len(), DEFAULT_TIMELINE_LIMIT);
    assert_eq!(step.timeline[0].message, "broadcast 2");
    assert_eq!(
      step.timeline.last().unwrap().message,
      "broadcast 101"
    );
  }

  #[test]
  fn normalize_derives_completed() {
    let mut state = WizardState::fresh(0);
    for id in WizardStepId::ALL {
      state.step_mut(id).status = StepStatus::Complete;
    }
    state.raven.status = StepStatus::Skipped;
    state.normalize(100, DEFAULT_TIMELINE_LIMIT);
    assert!(state.completed);
    // Completion timestamps were stamped.
    assert!(state.foundation.completed_at.is_some());

    state.portal.status = StepStatus::Error;
    state.normalize(200, DEFAULT_TIMELINE_LIMIT);
    assert!(!state.completed);
  }

  #[test]
  fn normalize_clamps_version() {
    let mut state = WizardState::fresh(0);
    state.version = 0;
    state.normalize(0, DEFAULT_TIMELINE_LIMIT);
    assert_eq!(state.version, 1);
  }

  #[test]
  fn malformed_persisted_status_falls_back() {
    let state: WizardState = serde_json::from_value(json!({
      "version": 1,
      "portal": { "status": "definitely-not-a-status" },
    }))
    .unwrap();
    assert_eq!(state.portal.status, StepStatus::Pending);
    assert_eq!(state.version, 1);
  }

  #[test]
  fn resolves_replace_and_update_payloads() {
    let payload: WizardStatePayload =
      serde_json::from_value(json!({
        "state": WizardState::fresh(1),
      }))
      .unwrap();
    assert!(matches!(
      payload.resolve().unwrap(),
      WizardWriteOperation::Replace { .. }
    ));

    let payload: WizardStatePayload =
      serde_json::from_value(json!({
        "updates": [{ "step": "raven", "status": "complete" }],
      }))
      .unwrap();
    assert!(matches!(
      payload.resolve().unwrap(),
      WizardWriteOperation::Update { .. }
    ));

    let payload: WizardStatePayload =
      serde_json::from_value(json!({})).unwrap();
    assert!(payload.resolve().is_err());
  }
}
