use std::{
  collections::HashMap,
  sync::{
    Mutex, OnceLock,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use anyhow::anyhow;
use indexmap::IndexMap;
use strum::Display;
use tokio_util::sync::CancellationToken;
use warden_client::entities::{
  history::{HistoryEvent, ServiceStatus},
  parse_env_line,
  service::ServiceDescriptor,
};

use crate::{
  config::warden_config,
  docker::{
    ContainerState, RunSpec, docker_client, spawn_log_reader,
  },
  state,
};

pub mod detect;

/// Stage a service start failed in. Callers may retry,
/// the engine itself never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DeployStage {
  Pull,
  Run,
  Health,
}

fn start_failed(
  service: &str,
  stage: DeployStage,
  cause: anyhow::Error,
) -> anyhow::Error {
  cause
    .context(format!("{service} failed during {stage} stage"))
}

struct TrackedContainer {
  cancel: CancellationToken,
}

/// Containers owned by this process, stopped on shutdown.
fn tracked_containers()
-> &'static Mutex<HashMap<String, TrackedContainer>> {
  static TRACKED: OnceLock<
    Mutex<HashMap<String, TrackedContainer>>,
  > = OnceLock::new();
  TRACKED.get_or_init(Default::default)
}

fn status(status: ServiceStatus, message: impl Into<String>) -> HistoryEvent {
  HistoryEvent::Status {
    status,
    message: message.into(),
  }
}

/// Start one service: pull, network, run spec, create and
/// start, attach the log reader, then wait healthy.
/// Idempotent when the container already exists.
#[instrument(skip(env_overrides))]
pub async fn deploy_service(
  name: &str,
  env_overrides: Option<&HashMap<String, String>>,
) -> anyhow::Result<()> {
  let descriptor = state::catalog().get(name)?.clone();
  let docker = docker_client();
  let config = warden_config();
  let history = state::history();

  match docker.get_container(name).await? {
    Some(container)
      if container.state == ContainerState::Running =>
    {
      history.append(
        name,
        status(
          ServiceStatus::Running,
          "container already running",
        ),
      );
      return Ok(());
    }
    // A stopped leftover would collide on the name.
    Some(container) => {
      info!(
        "removing leftover {name} container in {} state",
        container.state
      );
      docker
        .remove_container(name)
        .await
        .map_err(|e| start_failed(name, DeployStage::Run, e))?;
    }
    None => {}
  }

  history.append(
    name,
    status(
      ServiceStatus::Pulling,
      format!("pulling {}", descriptor.image),
    ),
  );
  docker
    .pull_image(&descriptor.image, |progress| {
      history.append(name, HistoryEvent::Progress { progress });
    })
    .await
    .map_err(|e| start_failed(name, DeployStage::Pull, e))?;

  docker
    .ensure_network(&config.stack_network)
    .await
    .map_err(|e| start_failed(name, DeployStage::Run, e))?;
  ensure_self_attached().await;

  let mut binds = descriptor.volumes.clone();
  let mut detected_env = Vec::new();
  if descriptor.kavita_mount_detection {
    history.append(
      name,
      status(
        ServiceStatus::Detecting,
        "searching for a kavita data mount",
      ),
    );
    match detect::detect_kavita_mount().await {
      Ok(Some(source)) => {
        history.append(
          name,
          status(
            ServiceStatus::Detected,
            format!("found kavita data at {source}"),
          ),
        );
        binds.push(format!(
          "{source}:{}",
          config.kavita_mount_path
        ));
        detected_env.push((
          String::from("APPDATA"),
          config.kavita_mount_path.clone(),
        ));
        detected_env.push((
          String::from("KAVITA_DATA_MOUNT"),
          config.kavita_mount_path.clone(),
        ));
      }
      Ok(None) => {
        history.append(
          name,
          status(
            ServiceStatus::NotFound,
            "no kavita container found, continuing without the mount",
          ),
        );
      }
      Err(e) => {
        warn!("kavita mount detection failed | {e:#}");
        history.append(
          name,
          status(
            ServiceStatus::NotFound,
            format!("mount detection failed: {e:#}"),
          ),
        );
      }
    }
  }

  let spec = build_run_spec(
    &descriptor,
    env_overrides,
    binds,
    detected_env,
    &config.stack_network,
    &config.vault_tokens,
  );
  history.append(
    name,
    status(ServiceStatus::Starting, "creating container"),
  );
  let container_id = docker
    .run_container(&spec)
    .await
    .map_err(|e| start_failed(name, DeployStage::Run, e))?;

  let cancel = CancellationToken::new();
  tracked_containers().lock().unwrap().insert(
    name.to_string(),
    TrackedContainer {
      cancel: cancel.clone(),
    },
  );
  history.append(
    name,
    status(ServiceStatus::Running, "container started"),
  );
  spawn_log_reader(name.to_string(), container_id, cancel);

  if let Some(health_url) = &descriptor.health_url {
    wait_healthy(name, health_url)
      .await
      .map_err(|e| start_failed(name, DeployStage::Health, e))?;
  }

  Ok(())
}

/// Descriptor defaults, then caller overrides, then
/// detection results and vault tokens. Later wins.
fn build_run_spec(
  descriptor: &ServiceDescriptor,
  env_overrides: Option<&HashMap<String, String>>,
  binds: Vec<String>,
  detected_env: Vec<(String, String)>,
  network: &str,
  vault_tokens: &HashMap<String, String>,
) -> RunSpec {
  let mut env: IndexMap<String, String> = descriptor
    .env
    .iter()
    .filter_map(|line| parse_env_line(line))
    .collect();
  if let Some(overrides) = env_overrides {
    for (key, value) in overrides {
      env.insert(key.clone(), value.clone());
    }
  }
  for (key, value) in detected_env {
    env.insert(key, value);
  }
  for (key, value) in
    vault_token_env(&descriptor.name, vault_tokens)
  {
    env.insert(key, value);
  }
  RunSpec {
    name: descriptor.name.clone(),
    image: descriptor.image.clone(),
    env: env
      .into_iter()
      .map(|(key, value)| format!("{key}={value}"))
      .collect(),
    binds,
    ports: descriptor
      .port
      .map(|port| vec![(port, port)])
      .unwrap_or_default(),
    network: network.to_string(),
    labels: HashMap::from([(
      String::from("managed-by"),
      String::from("noona-warden"),
    )]),
  }
}

/// `NOONA_RAVEN_VAULT_TOKEN` (or the `NOONA_` stripped
/// `RAVEN_VAULT_TOKEN`) is stamped onto noona-raven as
/// `VAULT_TOKEN`.
fn vault_token_env(
  service: &str,
  vault_tokens: &HashMap<String, String>,
) -> Option<(String, String)> {
  let prefix = service.to_uppercase().replace('-', "_");
  let short = prefix
    .strip_prefix("NOONA_")
    .unwrap_or(&prefix)
    .to_string();
  vault_tokens
    .iter()
    .find(|(key, _)| {
      **key == format!("{prefix}_VAULT_TOKEN")
        || **key == format!("{short}_VAULT_TOKEN")
    })
    .map(|(_, value)| {
      (String::from("VAULT_TOKEN"), value.clone())
    })
}

/// Attach warden's own container to the stack network at
/// first boot. Best effort: fails quietly when warden runs
/// outside a container.
async fn ensure_self_attached() {
  static ATTACHED: AtomicBool = AtomicBool::new(false);
  if ATTACHED.swap(true, Ordering::SeqCst) {
    return;
  }
  let config = warden_config();
  if let Err(e) = docker_client()
    .connect_to_network(
      &config.stack_network,
      &config.container_name,
    )
    .await
  {
    debug!(
      "could not attach {} to {} | {e:#}",
      config.container_name, config.stack_network
    );
  }
}

/// Poll the health url until 2xx, once per second, up to
/// the configured timeout.
async fn wait_healthy(
  name: &str,
  health_url: &str,
) -> anyhow::Result<()> {
  let config = warden_config();
  let deadline = Instant::now()
    + Duration::from_secs(config.health_timeout_secs);
  let history = state::history();
  loop {
    match state::http_client().get(health_url).send().await {
      Ok(res) if res.status().is_success() => {
        history.append(
          name,
          status(ServiceStatus::Ready, "health check passed"),
        );
        return Ok(());
      }
      Ok(res) => {
        debug!(
          "{name} health probe returned {}",
          res.status()
        );
      }
      Err(e) => debug!("{name} health probe failed | {e}"),
    }
    if Instant::now() >= deadline {
      history.append(
        name,
        status(
          ServiceStatus::Error,
          format!(
            "health check timed out after {}s",
            config.health_timeout_secs
          ),
        ),
      );
      return Err(anyhow!(
        "health check at {health_url} did not pass within {}s",
        config.health_timeout_secs
      ));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
  }
}

/// Cancel log readers, stop every tracked container and
/// clear the set. Called once on process shutdown.
pub async fn shutdown_all() {
  let tracked = std::mem::take(
    &mut *tracked_containers().lock().unwrap(),
  );
  if tracked.is_empty() {
    return;
  }
  info!(
    "shutting down {} tracked container(s)",
    tracked.len()
  );
  let docker = docker_client();
  for (name, container) in tracked {
    container.cancel.cancel();
    match docker.stop_container(&name).await {
      Ok(()) => info!("stopped {name}"),
      Err(e) => warn!("failed to stop {name} | {e:#}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn run_spec_env_overrides_win() {
    let descriptor = ServiceDescriptor {
      name: String::from("noona-vault"),
      image: String::from("captainpax/noona-vault:latest"),
      env: vec![
        String::from("VAULT_PORT=3005"),
        String::from("REDIS_HOST=noona-redis"),
      ],
      port: Some(3005),
      ..Default::default()
    };
    let overrides = HashMap::from([(
      String::from("REDIS_HOST"),
      String::from("other-redis"),
    )]);
    let spec = build_run_spec(
      &descriptor,
      Some(&overrides),
      Vec::new(),
      Vec::new(),
      "noona-network",
      &HashMap::new(),
    );
    assert!(
      spec.env.contains(&String::from("VAULT_PORT=3005"))
    );
    assert!(
      spec
        .env
        .contains(&String::from("REDIS_HOST=other-redis"))
    );
    assert!(
      !spec
        .env
        .contains(&String::from("REDIS_HOST=noona-redis"))
    );
    assert_eq!(spec.ports, vec![(3005, 3005)]);
  }

  #[test]
  fn detected_mount_feeds_binds_and_env() {
    let descriptor = ServiceDescriptor {
      name: String::from("noona-raven"),
      image: String::from("captainpax/noona-raven:latest"),
      ..Default::default()
    };
    let spec = build_run_spec(
      &descriptor,
      None,
      vec![String::from("/host/k:/kavita-data")],
      vec![(
        String::from("KAVITA_DATA_MOUNT"),
        String::from("/kavita-data"),
      )],
      "noona-network",
      &HashMap::from([(
        String::from("RAVEN_VAULT_TOKEN"),
        String::from("token"),
      )]),
    );
    assert!(
      spec
        .binds
        .contains(&String::from("/host/k:/kavita-data"))
    );
    assert!(spec.env.contains(&String::from(
      "KAVITA_DATA_MOUNT=/kavita-data"
    )));
    assert!(
      spec.env.contains(&String::from("VAULT_TOKEN=token"))
    );
  }
}
