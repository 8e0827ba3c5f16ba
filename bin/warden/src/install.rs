use std::collections::HashMap;

use anyhow::anyhow;
use warden_client::entities::{
  history::{HistoryEvent, ServiceStatus},
  install::{
    InstallProgress, InstallResult, InstallRunStatus,
    InstallServiceRequest, InstallStatus,
  },
  wizard::{StepStatus, StepUpdate, WizardStepId},
};

use crate::{engine, state};

/// Mutable state of the current install run. Survives
/// until the next run supersedes it.
#[derive(Debug, Clone, Default)]
pub struct InstallRun {
  pub order: Vec<String>,
  pub statuses: HashMap<String, InstallStatus>,
  pub errors: HashMap<String, String>,
  pub overall: InstallRunStatus,
}

/// Fixed mapping from service names onto wizard steps.
/// Verification is synthetic and never mapped.
pub fn wizard_step_for(service: &str) -> Option<WizardStepId> {
  match service {
    "noona-redis" | "noona-mongo" | "noona-vault"
    | "noona-moon" | "noona-sage" | "noona-warden" => {
      Some(WizardStepId::Foundation)
    }
    "noona-portal" => Some(WizardStepId::Portal),
    "noona-raven" => Some(WizardStepId::Raven),
    _ => None,
  }
}

/// Whether a service's events mirror into the
/// `installation` buffer right now.
pub fn mirrors_to_installation(service: &str) -> bool {
  let run = state::install_run().read().unwrap();
  run.overall == InstallRunStatus::Installing
    && run.statuses.contains_key(service)
}

pub fn progress() -> InstallProgress {
  progress_of(&state::install_run().read().unwrap())
}

fn progress_of(run: &InstallRun) -> InstallProgress {
  let installed = run
    .order
    .iter()
    .filter(|name| {
      run.statuses.get(*name)
        == Some(&InstallStatus::Installed)
    })
    .count();
  let percent = if run.order.is_empty() {
    0
  } else {
    (100 * installed / run.order.len()) as u32
  };
  InstallProgress {
    status: run.overall,
    percent,
    items: results_of(run),
  }
}

fn results_of(run: &InstallRun) -> Vec<InstallResult> {
  run
    .order
    .iter()
    .map(|name| InstallResult {
      name: name.clone(),
      status: run
        .statuses
        .get(name)
        .copied()
        .unwrap_or_default(),
      error: run.errors.get(name).cloned(),
    })
    .collect()
}

/// Drive one install run to completion. The caller holds
/// the process wide install lock for the duration, and a
/// disconnected client never aborts the run.
pub async fn run_install(
  requests: Vec<InstallServiceRequest>,
) -> anyhow::Result<Vec<InstallResult>> {
  // Empty request: no results, no wizard changes.
  if requests.is_empty() {
    return Ok(Vec::new());
  }
  let catalog = state::catalog();

  let mut names: Vec<String> = Vec::new();
  let mut env_overrides: HashMap<
    String,
    HashMap<String, String>,
  > = HashMap::new();
  let mut unknown = Vec::new();
  for request in &requests {
    if request.name.trim().is_empty() {
      return Err(anyhow!(
        "every install request needs a service name"
      ));
    }
    if catalog.get(&request.name).is_err() {
      unknown.push(request.name.clone());
      continue;
    }
    if !names.contains(&request.name) {
      names.push(request.name.clone());
    }
    if let Some(env) = &request.env {
      env_overrides
        .entry(request.name.clone())
        .or_default()
        .extend(env.clone());
    }
  }

  // Unknown services abort before any lifecycle or wizard
  // side effects.
  if !unknown.is_empty() {
    return Ok(
      requests
        .iter()
        .map(|request| {
          let error = if unknown.contains(&request.name) {
            format!("unknown service: {}", request.name)
          } else {
            String::from(
              "not installed: request contained unknown services",
            )
          };
          InstallResult {
            name: request.name.clone(),
            status: InstallStatus::Error,
            error: Some(error),
          }
        })
        .collect(),
    );
  }

  let order = catalog.closure(&names)?;
  info!("installing {} service(s): {order:?}", order.len());

  {
    let mut run = state::install_run().write().unwrap();
    *run = InstallRun {
      order: order.clone(),
      statuses: order
        .iter()
        .map(|name| (name.clone(), InstallStatus::Pending))
        .collect(),
      errors: HashMap::new(),
      overall: InstallRunStatus::Installing,
    };
  }

  for name in &order {
    state::history().append(
      name,
      HistoryEvent::Status {
        status: ServiceStatus::Queued,
        message: String::new(),
      },
    );
  }
  publish_wizard_state().await;

  for name in order {
    set_status(&name, InstallStatus::Installing, None);
    publish_wizard_state().await;

    // A failed dependency fails its dependents without
    // touching the runtime.
    if let Some(failed) = failed_dependency(&name) {
      let message = format!("dependency failed: {failed}");
      state::history().append(
        &name,
        HistoryEvent::Status {
          status: ServiceStatus::Error,
          message: message.clone(),
        },
      );
      set_status(&name, InstallStatus::Error, Some(message));
      publish_wizard_state().await;
      continue;
    }

    match engine::deploy_service(
      &name,
      env_overrides.get(&name),
    )
    .await
    {
      Ok(()) => {
        set_status(&name, InstallStatus::Installed, None)
      }
      Err(e) => {
        let message = format!("{e:#}");
        warn!("failed to install {name} | {message}");
        state::history().append(
          &name,
          HistoryEvent::Status {
            status: ServiceStatus::Error,
            message: message.clone(),
          },
        );
        set_status(&name, InstallStatus::Error, Some(message));
      }
    }
    publish_wizard_state().await;
  }

  let results =
    results_of(&state::install_run().read().unwrap());
  let has_errors = results
    .iter()
    .any(|result| result.status == InstallStatus::Error);
  {
    let mut run = state::install_run().write().unwrap();
    run.overall = if has_errors {
      InstallRunStatus::Failed
    } else {
      InstallRunStatus::Complete
    };
  }
  state::wizard().complete_install(has_errors).await;

  Ok(results)
}

fn set_status(
  name: &str,
  status: InstallStatus,
  error: Option<String>,
) {
  let mut run = state::install_run().write().unwrap();
  run.statuses.insert(name.to_string(), status);
  if let Some(error) = error {
    run.errors.insert(name.to_string(), error);
  }
}

fn failed_dependency(name: &str) -> Option<String> {
  let dependencies =
    state::catalog().get(name).ok()?.dependencies.clone();
  let run = state::install_run().read().unwrap();
  dependencies.into_iter().find(|dependency| {
    run.statuses.get(dependency) == Some(&InstallStatus::Error)
  })
}

/// Aggregate run state onto the wizard steps:
/// error > complete > in-progress > pending. Steps with no
/// participating services are skipped, and the first
/// pending step whose predecessors all landed moves to
/// in-progress.
fn aggregate_step_statuses(
  run: &InstallRun,
) -> Vec<(WizardStepId, StepStatus, Option<String>)> {
  let mut aggregated = Vec::new();
  for step in [
    WizardStepId::Foundation,
    WizardStepId::Portal,
    WizardStepId::Raven,
  ] {
    let members = run
      .order
      .iter()
      .filter(|name| wizard_step_for(name) == Some(step))
      .collect::<Vec<_>>();
    if members.is_empty() {
      aggregated.push((step, StepStatus::Skipped, None));
      continue;
    }
    let statuses = members
      .iter()
      .map(|name| {
        run.statuses.get(*name).copied().unwrap_or_default()
      })
      .collect::<Vec<_>>();
    let status = if statuses.contains(&InstallStatus::Error) {
      StepStatus::Error
    } else if statuses
      .iter()
      .all(|status| *status == InstallStatus::Installed)
    {
      StepStatus::Complete
    } else if statuses.contains(&InstallStatus::Installing) {
      StepStatus::InProgress
    } else {
      StepStatus::Pending
    };
    let error = (status == StepStatus::Error)
      .then(|| {
        members.iter().find_map(|name| {
          run.errors.get(*name).cloned()
        })
      })
      .flatten();
    aggregated.push((step, status, error));
  }

  let mut prior_landed = true;
  for (_, status, _) in aggregated.iter_mut() {
    if *status == StepStatus::Pending && prior_landed {
      *status = StepStatus::InProgress;
    }
    prior_landed = prior_landed
      && matches!(
        status,
        StepStatus::Complete | StepStatus::Skipped
      );
  }
  aggregated
}

async fn publish_wizard_state() {
  let updates = {
    let run = state::install_run().read().unwrap();
    aggregate_step_statuses(&run)
      .into_iter()
      .map(|(step, status, error)| StepUpdate {
        step,
        status: Some(status),
        error: Some(error),
        ..Default::default()
      })
      .collect::<Vec<_>>()
  };
  state::wizard().publish_updates(updates).await;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn run(
    entries: &[(&str, InstallStatus)],
  ) -> InstallRun {
    InstallRun {
      order: entries
        .iter()
        .map(|(name, _)| name.to_string())
        .collect(),
      statuses: entries
        .iter()
        .map(|(name, status)| (name.to_string(), *status))
        .collect(),
      errors: Default::default(),
      overall: InstallRunStatus::Installing,
    }
  }

  fn status_of(
    aggregated: &[(WizardStepId, StepStatus, Option<String>)],
    step: WizardStepId,
  ) -> StepStatus {
    aggregated
      .iter()
      .find(|(id, _, _)| *id == step)
      .map(|(_, status, _)| *status)
      .unwrap()
  }

  #[test]
  fn one_error_fails_the_whole_step() {
    let mut run = run(&[
      ("noona-redis", InstallStatus::Error),
      ("noona-vault", InstallStatus::Installing),
    ]);
    run
      .errors
      .insert("noona-redis".into(), "pull failed".into());
    let aggregated = aggregate_step_statuses(&run);
    assert_eq!(
      status_of(&aggregated, WizardStepId::Foundation),
      StepStatus::Error
    );
    let error = aggregated
      .iter()
      .find(|(id, _, _)| *id == WizardStepId::Foundation)
      .and_then(|(_, _, error)| error.clone());
    assert_eq!(error.as_deref(), Some("pull failed"));
  }

  #[test]
  fn absent_steps_are_skipped() {
    let run = run(&[
      ("noona-redis", InstallStatus::Installing),
      ("noona-vault", InstallStatus::Pending),
    ]);
    let aggregated = aggregate_step_statuses(&run);
    assert_eq!(
      status_of(&aggregated, WizardStepId::Foundation),
      StepStatus::InProgress
    );
    assert_eq!(
      status_of(&aggregated, WizardStepId::Portal),
      StepStatus::Skipped
    );
    assert_eq!(
      status_of(&aggregated, WizardStepId::Raven),
      StepStatus::Skipped
    );
  }

  #[test]
  fn next_pending_step_is_promoted_after_complete() {
    let run = run(&[
      ("noona-redis", InstallStatus::Installed),
      ("noona-vault", InstallStatus::Installed),
      ("noona-portal", InstallStatus::Pending),
      ("noona-raven", InstallStatus::Pending),
    ]);
    let aggregated = aggregate_step_statuses(&run);
    assert_eq!(
      status_of(&aggregated, WizardStepId::Foundation),
      StepStatus::Complete
    );
    // Portal is next: promoted. Raven stays pending.
    assert_eq!(
      status_of(&aggregated, WizardStepId::Portal),
      StepStatus::InProgress
    );
    assert_eq!(
      status_of(&aggregated, WizardStepId::Raven),
      StepStatus::Pending
    );
  }

  #[test]
  fn progress_percent_counts_installed_services() {
    let state = run(&[
      ("noona-redis", InstallStatus::Installed),
      ("noona-vault", InstallStatus::Installed),
      ("noona-sage", InstallStatus::Installing),
      ("noona-moon", InstallStatus::Pending),
    ]);
    let progress = progress_of(&state);
    assert_eq!(progress.percent, 50);
    assert_eq!(progress.items.len(), 4);
    assert_eq!(progress.items[0].name, "noona-redis");
  }

  #[test]
  fn empty_run_reports_zero_percent() {
    let progress = progress_of(&InstallRun::default());
    assert_eq!(progress.percent, 0);
    assert_eq!(
      progress.status,
      InstallRunStatus::Idle
    );
    assert!(progress.items.is_empty());
  }
}
