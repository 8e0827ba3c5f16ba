use anyhow::Context;
use tokio::sync::Mutex;
use warden_client::entities::{
  warden_timestamp,
  wizard::{
    StepState, StepStatus, StepUpdate, TimelineEvent,
    WizardBroadcastRequest, WizardResetPayload, WizardState,
    WizardStepId,
  },
};

mod store;

pub use store::StoreClient;

/// The wizard state machine, persisted as one versioned
/// document in the external key value store. All writes are
/// serialized behind one lock; reads go straight through.
pub struct WizardService {
  store: StoreClient,
  write_lock: Mutex<()>,
  timeline_limit: usize,
}

impl WizardService {
  pub fn new(
    store: StoreClient,
    timeline_limit: usize,
  ) -> WizardService {
    WizardService {
      store,
      write_lock: Mutex::new(()),
      timeline_limit,
    }
  }

  /// Fetch the current document, synthesizing a fresh one
  /// when the store has none. A malformed stored document
  /// also reads as fresh rather than failing.
  pub async fn load_state(&self) -> anyhow::Result<WizardState> {
    let Some(raw) = self.store.get().await? else {
      return Ok(WizardState::fresh(warden_timestamp()));
    };
    match serde_json::from_str::<WizardState>(&raw) {
      Ok(state) => Ok(state),
      Err(e) => {
        warn!(
          "stored wizard state is malformed, starting fresh | {e}"
        );
        Ok(WizardState::fresh(warden_timestamp()))
      }
    }
  }

  async fn write(
    &self,
    state: &mut WizardState,
    timeline_limit: usize,
  ) -> anyhow::Result<()> {
    let now = warden_timestamp();
    state.normalize(now, timeline_limit);
    state.updated_at = Some(now);
    let raw = serde_json::to_string(state)
      .context("failed to serialize wizard state")?;
    self.store.set(&raw).await
  }

  /// Replace the whole document.
  pub async fn replace_state(
    &self,
    mut state: WizardState,
  ) -> anyhow::Result<WizardState> {
    let _lock = self.write_lock.lock().await;
    self.write(&mut state, self.timeline_limit).await?;
    Ok(state)
  }

  /// Read-merge-write a batch of partial updates. Writes
  /// only when something actually changed.
  pub async fn apply_updates(
    &self,
    updates: Vec<StepUpdate>,
  ) -> anyhow::Result<WizardState> {
    let _lock = self.write_lock.lock().await;
    let mut state = self.load_state().await?;
    let now = warden_timestamp();
    let mut changed = false;
    for update in &updates {
      changed |= state.step_mut(update.step).apply(update, now);
    }
    if changed {
      self.write(&mut state, self.timeline_limit).await?;
    }
    Ok(state)
  }

  /// Append one timeline event to a step, optionally
  /// updating the step status in the same transaction.
  pub async fn record_broadcast(
    &self,
    step: WizardStepId,
    request: WizardBroadcastRequest,
  ) -> anyhow::Result<(WizardState, TimelineEvent)> {
    let _lock = self.write_lock.lock().await;
    let mut state = self.load_state().await?;
    let now = warden_timestamp();
    let limit = request
      .limit
      .map(|limit| limit as usize)
      .unwrap_or(self.timeline_limit);

    let mut event = TimelineEvent::new(request.message, now);
    event.status = request.event_status.or(request.status);
    event.detail = request.detail;
    event.code = request.code;
    event.actor = request.actor.clone();
    event.context = request.context;

    let step_state = state.step_mut(step);
    step_state.push_event(event.clone(), limit);
    if let Some(status) = request.status {
      step_state.apply(
        &StepUpdate {
          step,
          status: Some(status),
          actor: request.actor.map(Some),
          ..Default::default()
        },
        now,
      );
    }
    step_state.updated_at = Some(now);

    self.write(&mut state, limit).await?;
    Ok((state, event))
  }

  /// Put a step back to pending, clear its error and
  /// completion, and append a reset event to its timeline.
  pub async fn reset_step(
    &self,
    step: WizardStepId,
    payload: WizardResetPayload,
  ) -> anyhow::Result<WizardState> {
    let _lock = self.write_lock.lock().await;
    let mut state = self.load_state().await?;
    let now = warden_timestamp();
    let limit = payload
      .limit
      .map(|limit| limit as usize)
      .unwrap_or(self.timeline_limit);

    let mut event = TimelineEvent::new(
      payload
        .message
        .unwrap_or_else(|| String::from("step reset")),
      now,
    );
    event.status = Some(StepStatus::Pending);
    event.detail = payload.detail;
    event.actor = payload.actor.clone();
    event.context = payload.context;

    let step_state = state.step_mut(step);
    *step_state = StepState {
      status: StepStatus::Pending,
      detail: None,
      error: None,
      updated_at: Some(now),
      completed_at: None,
      actor: payload.actor,
      retries: step_state.retries,
      timeline: std::mem::take(&mut step_state.timeline),
    };
    step_state.push_event(event, limit);

    self.write(&mut state, limit).await?;
    Ok(state)
  }

  /// Install integration: push aggregated step statuses.
  /// Wizard write failures never fail the install.
  pub async fn publish_updates(&self, updates: Vec<StepUpdate>) {
    if let Err(e) = self.apply_updates(updates).await {
      warn!("failed to publish wizard state | {e:#}");
    }
  }

  /// Finalize an install run: verification lands complete
  /// or carries the failure.
  pub async fn complete_install(&self, has_errors: bool) {
    let error = has_errors.then(|| {
      String::from("one or more services failed to install")
    });
    let update = StepUpdate {
      step: WizardStepId::Verification,
      status: Some(if has_errors {
        StepStatus::Error
      } else {
        StepStatus::Complete
      }),
      error: Some(error),
      ..Default::default()
    };
    if let Err(e) = self.apply_updates(vec![update]).await {
      warn!(
        "failed to record install completion on wizard | {e:#}"
      );
    }
  }
}
