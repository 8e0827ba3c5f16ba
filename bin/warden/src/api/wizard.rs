use std::str::FromStr;

use anyhow::anyhow;
use axum::{
  Router,
  extract::{Path, Query},
  http::StatusCode,
  routing::{get, post},
};
use serror::{AddStatusCode, AddStatusCodeError};
use warden_client::entities::{
  history::HistoryQuery,
  wizard::{
    StepStatus, StepUpdate, WizardBroadcastRequest,
    WizardBroadcastResponse, WizardMetadataResponse,
    WizardResetPayload, WizardResponse, WizardState,
    WizardStatePayload, WizardStepHistoryResponse, WizardStepId,
    WizardWriteOperation, wizard_step_metadata,
  },
};

use crate::{config::warden_config, state};

pub fn router() -> Router {
  Router::new()
    .route("/metadata", get(metadata))
    .route("/state", get(get_state).put(put_state))
    .route("/steps/{step}/history", get(step_history))
    .route("/steps/{step}/reset", post(reset_step))
    .route("/steps/{step}/broadcast", post(broadcast))
    .route("/complete", post(complete))
}

fn parse_step(step: &str) -> Result<WizardStepId, serror::Error> {
  WizardStepId::from_str(step).map_err(|_| {
    anyhow!("unknown wizard step: {step}")
      .status_code(StatusCode::NOT_FOUND)
  })
}

async fn metadata() -> axum::Json<WizardMetadataResponse> {
  axum::Json(WizardMetadataResponse {
    steps: wizard_step_metadata(),
    features: warden_config().features.clone(),
  })
}

#[instrument(name = "GetWizardState", skip_all)]
async fn get_state() -> serror::Result<axum::Json<WizardState>>
{
  let state = state::wizard()
    .load_state()
    .await
    .status_code(StatusCode::BAD_GATEWAY)?;
  Ok(axum::Json(state))
}

#[instrument(name = "UpdateWizardState", skip_all)]
async fn put_state(
  serror::Json(payload): serror::Json<WizardStatePayload>,
) -> serror::Result<axum::Json<WizardState>> {
  let operation = payload
    .resolve()
    .status_code(StatusCode::BAD_REQUEST)?;
  let state = match operation {
    WizardWriteOperation::Replace { state } => {
      state::wizard().replace_state(*state).await
    }
    WizardWriteOperation::Update { updates } => {
      state::wizard().apply_updates(updates).await
    }
  }
  .status_code(StatusCode::BAD_GATEWAY)?;
  Ok(axum::Json(state))
}

#[instrument(name = "WizardStepHistory", skip(limit))]
async fn step_history(
  Path(step): Path<String>,
  Query(HistoryQuery { limit }): Query<HistoryQuery>,
) -> serror::Result<axum::Json<WizardStepHistoryResponse>> {
  let step = parse_step(&step)?;
  let state = state::wizard()
    .load_state()
    .await
    .status_code(StatusCode::BAD_GATEWAY)?;
  let timeline = &state.step(step).timeline;
  let limit =
    limit.map(|limit| limit as usize).unwrap_or(timeline.len());
  let skip = timeline.len().saturating_sub(limit);
  Ok(axum::Json(WizardStepHistoryResponse {
    step,
    events: timeline[skip..].to_vec(),
  }))
}

#[instrument(name = "ResetWizardStep", skip(payload))]
async fn reset_step(
  Path(step): Path<String>,
  serror::Json(payload): serror::Json<WizardResetPayload>,
) -> serror::Result<axum::Json<WizardResponse>> {
  let step = parse_step(&step)?;
  let wizard = state::wizard()
    .reset_step(step, payload)
    .await
    .status_code(StatusCode::BAD_GATEWAY)?;
  Ok(axum::Json(WizardResponse { wizard }))
}

#[instrument(name = "BroadcastWizardEvent", skip(request))]
async fn broadcast(
  Path(step): Path<String>,
  serror::Json(request): serror::Json<WizardBroadcastRequest>,
) -> serror::Result<axum::Json<WizardBroadcastResponse>> {
  let step = parse_step(&step)?;
  if request.message.trim().is_empty() {
    return Err(
      anyhow!("broadcast message cannot be empty")
        .status_code(StatusCode::BAD_REQUEST),
    );
  }
  let (wizard, event) = state::wizard()
    .record_broadcast(step, request)
    .await
    .status_code(StatusCode::BAD_GATEWAY)?;
  Ok(axum::Json(WizardBroadcastResponse {
    wizard,
    event,
    step,
  }))
}

/// Finalize the wizard: verification completes when every
/// prior step landed clean, and carries the failure
/// otherwise.
#[instrument(name = "CompleteWizard", skip_all)]
async fn complete() -> serror::Result<axum::Json<WizardResponse>>
{
  let current = state::wizard()
    .load_state()
    .await
    .status_code(StatusCode::BAD_GATEWAY)?;
  let all_passed = [
    WizardStepId::Foundation,
    WizardStepId::Portal,
    WizardStepId::Raven,
  ]
  .iter()
  .all(|step| {
    matches!(
      current.step(*step).status,
      StepStatus::Complete | StepStatus::Skipped
    )
  });
  let error = (!all_passed).then(|| {
    String::from(
      "verification failed: one or more steps did not complete",
    )
  });
  let update = StepUpdate {
    step: WizardStepId::Verification,
    status: Some(if all_passed {
      StepStatus::Complete
    } else {
      StepStatus::Error
    }),
    error: Some(error),
    ..Default::default()
  };
  let wizard = state::wizard()
    .apply_updates(vec![update])
    .await
    .status_code(StatusCode::BAD_GATEWAY)?;
  Ok(axum::Json(WizardResponse { wizard }))
}
