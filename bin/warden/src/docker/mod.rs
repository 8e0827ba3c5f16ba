use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::OnceLock,
  time::Duration,
};

use anyhow::{Context, anyhow};
use bollard::{
  API_DEFAULT_VERSION, Docker,
  container::LogOutput,
  query_parameters::{
    CreateContainerOptions, CreateImageOptions,
    InspectNetworkOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
  },
  secret::{
    HostConfig, NetworkConnectRequest, NetworkCreateRequest,
    PortBinding, RestartPolicy, RestartPolicyNameEnum,
  },
};
use futures::{Stream, StreamExt};
use indexmap::IndexSet;
use warden_client::entities::history::PullProgress;

use crate::config::warden_config;

mod containers;
mod logs;

pub use containers::{
  ContainerListItem, ContainerMount, ContainerState,
  InspectedContainer,
};
pub use logs::spawn_log_reader;

/// Seconds allowed for each candidate ping probe.
const PROBE_TIMEOUT_SECS: u64 = 5;
/// Client side timeout for runtime API calls. Image pulls
/// stream well beyond this, bollard only applies it to the
/// connect phase.
const CLIENT_TIMEOUT_SECS: u64 = 120;

static DOCKER_CLIENT: OnceLock<DockerClient> = OnceLock::new();

pub fn docker_client() -> &'static DockerClient {
  DOCKER_CLIENT
    .get()
    .expect("docker client accessed before initialization")
}

/// Probe the candidate endpoints and cache the first one
/// that answers a ping.
pub async fn init_docker_client() -> anyhow::Result<()> {
  let client = resolve_client().await?;
  info!("container runtime connected on {}", client.endpoint());
  DOCKER_CLIENT
    .set(client)
    .map_err(|_| anyhow!("docker client initialized twice"))
}

/// A normalized candidate address for the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEndpoint {
  /// Filesystem socket, scheme stripped.
  Socket(PathBuf),
  /// Windows named pipe. Never stat'd.
  Pipe(String),
  /// Plain http(s) address.
  Tcp(String),
}

impl std::fmt::Display for RuntimeEndpoint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RuntimeEndpoint::Socket(path) => {
        write!(f, "unix://{}", path.display())
      }
      RuntimeEndpoint::Pipe(pipe) => write!(f, "npipe://{pipe}"),
      RuntimeEndpoint::Tcp(address) => f.write_str(address),
    }
  }
}

/// Candidate endpoints in resolution priority order:
/// configured endpoints, the platform default socket,
/// `DOCKER_HOST`, then platform alternatives.
pub fn candidate_endpoints() -> Vec<String> {
  let config = warden_config();
  let mut candidates: IndexSet<String> =
    IndexSet::from_iter(config.docker_endpoints.iter().cloned());
  candidates.insert(String::from("unix:///var/run/docker.sock"));
  if let Some(host) = &config.docker_host {
    candidates.insert(host.clone());
  }
  #[cfg(windows)]
  candidates
    .insert(String::from("npipe:////./pipe/docker_engine"));
  if let Ok(home) = std::env::var("HOME") {
    candidates
      .insert(format!("unix://{home}/.docker/run/docker.sock"));
  }
  candidates.insert(String::from("unix:///run/podman/podman.sock"));
  candidates.into_iter().collect()
}

/// Check a raw candidate and classify it. Socket paths
/// must exist and actually be sockets. Named pipes are
/// accepted without a stat. Tcp addresses pass through.
pub fn normalize_endpoint(
  candidate: &str,
) -> anyhow::Result<RuntimeEndpoint> {
  if let Some(pipe) = candidate.strip_prefix("npipe://") {
    return Ok(RuntimeEndpoint::Pipe(pipe.to_string()));
  }
  if candidate.starts_with("tcp://")
    || candidate.starts_with("http://")
    || candidate.starts_with("https://")
  {
    return Ok(RuntimeEndpoint::Tcp(candidate.to_string()));
  }
  let path = Path::new(
    candidate.strip_prefix("unix://").unwrap_or(candidate),
  );
  let metadata = std::fs::metadata(path)
    .with_context(|| format!("no socket at {}", path.display()))?;
  #[cfg(unix)]
  {
    use std::os::unix::fs::FileTypeExt;
    if !metadata.file_type().is_socket() {
      return Err(anyhow!(
        "{} exists but is not a socket",
        path.display()
      ));
    }
  }
  #[cfg(not(unix))]
  let _ = metadata;
  Ok(RuntimeEndpoint::Socket(path.to_path_buf()))
}

/// Connect to one endpoint and confirm it answers a ping.
pub async fn connect_endpoint(
  endpoint: &RuntimeEndpoint,
) -> anyhow::Result<DockerClient> {
  let docker = match endpoint {
    RuntimeEndpoint::Socket(path) => Docker::connect_with_unix(
      &path.to_string_lossy(),
      CLIENT_TIMEOUT_SECS,
      API_DEFAULT_VERSION,
    )
    .context("failed to create unix socket client")?,
    #[cfg(windows)]
    RuntimeEndpoint::Pipe(pipe) => Docker::connect_with_named_pipe(
      pipe,
      CLIENT_TIMEOUT_SECS,
      API_DEFAULT_VERSION,
    )
    .context("failed to create named pipe client")?,
    #[cfg(not(windows))]
    RuntimeEndpoint::Pipe(pipe) => {
      return Err(anyhow!(
        "named pipe {pipe} is only supported on windows"
      ));
    }
    RuntimeEndpoint::Tcp(address) => Docker::connect_with_http(
      address,
      CLIENT_TIMEOUT_SECS,
      API_DEFAULT_VERSION,
    )
    .context("failed to create http client")?,
  };
  tokio::time::timeout(
    Duration::from_secs(PROBE_TIMEOUT_SECS),
    docker.ping(),
  )
  .await
  .context("ping timed out")?
  .context("ping failed")?;
  Ok(DockerClient {
    docker,
    endpoint: endpoint.clone(),
  })
}

async fn resolve_client() -> anyhow::Result<DockerClient> {
  let mut failures: Vec<(String, anyhow::Error)> = Vec::new();
  for candidate in candidate_endpoints() {
    let endpoint = match normalize_endpoint(&candidate) {
      Ok(endpoint) => endpoint,
      Err(e) => {
        debug!("skipping runtime candidate {candidate} | {e:#}");
        failures.push((candidate, e));
        continue;
      }
    };
    match connect_endpoint(&endpoint).await {
      Ok(client) => return Ok(client),
      Err(e) => {
        warn!(
          "container runtime candidate {candidate} failed | {e:#}"
        );
        failures.push((candidate, e));
      }
    }
  }
  let mut e = anyhow!("no candidate endpoints responded");
  for (candidate, err) in failures.into_iter().rev() {
    e = e.context(format!("{candidate} | {err:#}"));
  }
  Err(e.context("container runtime unavailable"))
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
  pub name: String,
  pub image: String,
  /// `KEY=VALUE` lines.
  pub env: Vec<String>,
  /// `host:container` binds.
  pub binds: Vec<String>,
  /// `(host, container)` tcp port publications.
  pub ports: Vec<(u16, u16)>,
  pub network: String,
  pub labels: HashMap<String, String>,
}

pub struct DockerClient {
  docker: Docker,
  endpoint: RuntimeEndpoint,
}

impl DockerClient {
  pub fn endpoint(&self) -> &RuntimeEndpoint {
    &self.endpoint
  }

  pub async fn ping(&self) -> anyhow::Result<()> {
    self
      .docker
      .ping()
      .await
      .context("container runtime did not answer ping")?;
    Ok(())
  }

  /// Pull an image, forwarding each streamed layer event
  /// to the callback.
  pub async fn pull_image(
    &self,
    image: &str,
    mut on_progress: impl FnMut(PullProgress),
  ) -> anyhow::Result<()> {
    let options = CreateImageOptions {
      from_image: Some(image.to_string()),
      ..Default::default()
    };
    let mut stream =
      self.docker.create_image(Some(options), None, None);
    while let Some(info) = stream.next().await {
      let info = info
        .with_context(|| format!("failed to pull {image}"))?;
      if let Some(error) = info.error {
        let detail = info
          .error_detail
          .and_then(|detail| detail.message)
          .unwrap_or_default();
        return Err(
          anyhow!("{error} {detail}")
            .context(format!("failed to pull {image}")),
        );
      }
      on_progress(PullProgress {
        layer_id: info
          .id
          .unwrap_or_else(|| String::from("image")),
        phase: info.status.unwrap_or_default(),
        current: info
          .progress_detail
          .as_ref()
          .and_then(|detail| detail.current),
        total: info
          .progress_detail
          .as_ref()
          .and_then(|detail| detail.total),
        detail: info.progress.unwrap_or_default(),
      });
    }
    Ok(())
  }

  /// Create the stack network if it does not exist yet.
  pub async fn ensure_network(
    &self,
    name: &str,
  ) -> anyhow::Result<()> {
    match self
      .docker
      .inspect_network(name, Option::<InspectNetworkOptions>::None)
      .await
    {
      Ok(_) => Ok(()),
      Err(bollard::errors::Error::DockerResponseServerError {
        status_code: 404,
        ..
      }) => {
        self
          .docker
          .create_network(NetworkCreateRequest {
            name: name.to_string(),
            ..Default::default()
          })
          .await
          .with_context(|| {
            format!("failed to create network {name}")
          })?;
        info!("created network {name}");
        Ok(())
      }
      Err(e) => Err(e)
        .with_context(|| format!("failed to inspect network {name}")),
    }
  }

  pub async fn connect_to_network(
    &self,
    network: &str,
    container: &str,
  ) -> anyhow::Result<()> {
    match self
      .docker
      .connect_network(
        network,
        NetworkConnectRequest {
          container: Some(container.to_string()),
          endpoint_config: None,
        },
      )
      .await
    {
      Ok(()) => Ok(()),
      // Already attached comes back as 403 / 409.
      Err(bollard::errors::Error::DockerResponseServerError {
        status_code: 403 | 409,
        ..
      }) => Ok(()),
      Err(e) => Err(e).with_context(|| {
        format!("failed to connect {container} to {network}")
      }),
    }
  }

  /// Create and start one container, returning its id.
  pub async fn run_container(
    &self,
    spec: &RunSpec,
  ) -> anyhow::Result<String> {
    let port_bindings = spec
      .ports
      .iter()
      .map(|(host, container)| {
        (
          format!("{container}/tcp"),
          Some(vec![PortBinding {
            host_ip: Some(String::from("0.0.0.0")),
            host_port: Some(host.to_string()),
          }]),
        )
      })
      .collect::<HashMap<_, _>>();
    let body = bollard::secret::ContainerCreateBody {
      image: Some(spec.image.clone()),
      env: Some(spec.env.clone()),
      labels: Some(spec.labels.clone()),
      host_config: Some(HostConfig {
        binds: (!spec.binds.is_empty())
          .then(|| spec.binds.clone()),
        port_bindings: (!port_bindings.is_empty())
          .then_some(port_bindings),
        network_mode: Some(spec.network.clone()),
        restart_policy: Some(RestartPolicy {
          name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
          maximum_retry_count: None,
        }),
        ..Default::default()
      }),
      ..Default::default()
    };
    let options = CreateContainerOptions {
      name: Some(spec.name.clone()),
      ..Default::default()
    };
    let res = self
      .docker
      .create_container(Some(options), body)
      .await
      .with_context(|| {
        format!("failed to create container {}", spec.name)
      })?;
    self
      .docker
      .start_container(&spec.name, None::<StartContainerOptions>)
      .await
      .with_context(|| {
        format!("failed to start container {}", spec.name)
      })?;
    Ok(res.id)
  }

  pub async fn stop_container(
    &self,
    name: &str,
  ) -> anyhow::Result<()> {
    self
      .docker
      .stop_container(name, None::<StopContainerOptions>)
      .await
      .with_context(|| format!("failed to stop container {name}"))
  }

  pub async fn remove_container(
    &self,
    name: &str,
  ) -> anyhow::Result<()> {
    let options = RemoveContainerOptions {
      force: true,
      ..Default::default()
    };
    self
      .docker
      .remove_container(name, Some(options))
      .await
      .with_context(|| {
        format!("failed to remove container {name}")
      })
  }

  /// Follow-mode output stream for a running container.
  pub fn logs_stream(
    &self,
    container: &str,
  ) -> impl Stream<Item = Result<LogOutput, bollard::errors::Error>>
  {
    let options = LogsOptions {
      follow: true,
      stdout: true,
      stderr: true,
      ..Default::default()
    };
    self.docker.logs(container, Some(options))
  }
}
