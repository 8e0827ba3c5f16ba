use std::collections::HashSet;

use anyhow::{Context, anyhow};
use axum::{
  Router,
  extract::{Path, Query},
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{get, post},
};
use serror::{AddStatusCode, AddStatusCodeError};
use uuid::Uuid;
use warden_client::entities::{
  history::{
    HistoryEvent, HistoryQuery, ServiceHistoryResponse,
    ServiceStatus,
  },
  install::{
    InstallServicesBody, InstallServicesResponse, InstallStatus,
  },
  service::{
    DetectMountResponse, ListServicesQuery,
    ListServicesResponse, MountDetection, ServiceDescriptor,
    ServiceHealthResponse, ServiceListItem, TestServiceResponse,
  },
};

use crate::{
  config::warden_config,
  docker::{ContainerState, docker_client},
  engine,
  history::{INSTALLATION, summary_detail},
  install, state,
};

pub fn router() -> Router {
  Router::new()
    .route("/", get(list_services))
    .route("/install", post(install_services))
    .route("/install/progress", get(install_progress))
    .route("/{name}/logs", get(service_logs))
    .route("/{name}/test", post(test_service))
    .route("/{name}/health", get(service_health))
    .route("/{name}/detect", post(detect_mount))
}

#[instrument(name = "ListServices", skip_all)]
async fn list_services(
  Query(ListServicesQuery { include_installed }): Query<
    ListServicesQuery,
  >,
) -> serror::Result<axum::Json<ListServicesResponse>> {
  let include_installed = include_installed.unwrap_or(true);
  let containers = docker_client()
    .list_containers()
    .await
    .status_code(StatusCode::BAD_GATEWAY)?;
  let running = containers
    .iter()
    .filter(|container| {
      container.state == ContainerState::Running
    })
    .map(|container| container.name.as_str())
    .collect::<HashSet<_>>();
  let mut services = state::catalog()
    .list()
    .map(|descriptor| ServiceListItem {
      name: descriptor.name.clone(),
      display_name: descriptor.display_name().to_string(),
      category: descriptor.category,
      image: descriptor.image.clone(),
      port: descriptor.port,
      health_url: descriptor.health_url.clone(),
      env_config: descriptor.env_config.clone(),
      dependencies: descriptor.dependencies.clone(),
      installed: running.contains(descriptor.name.as_str()),
    })
    .filter(|item| include_installed || !item.installed)
    .collect::<Vec<_>>();
  services
    .sort_by(|a, b| a.display_name.cmp(&b.display_name));
  Ok(axum::Json(ListServicesResponse { services }))
}

#[instrument(name = "InstallServices", skip_all)]
async fn install_services(
  serror::Json(InstallServicesBody { services }): serror::Json<
    InstallServicesBody,
  >,
) -> serror::Result<Response> {
  // Single installation invariant: a second caller gets an
  // immediate conflict instead of queueing behind the run.
  let guard = state::install_lock().try_lock().map_err(|_| {
    anyhow!("an installation is already in progress")
      .status_code(StatusCode::CONFLICT)
  })?;

  // Runtime unreachable at install start aborts the run.
  docker_client()
    .ping()
    .await
    .status_code(StatusCode::BAD_GATEWAY)?;

  let req_id = Uuid::new_v4();
  info!(
    "/api/services/install {req_id} | {} request(s)",
    services.len()
  );

  // The run owns the guard, so a disconnected client never
  // aborts an install in flight.
  let res = tokio::spawn(async move {
    let _guard = guard;
    install::run_install(services).await
  })
  .await
  .context("failure in spawned install task")?;
  let results = res.status_code(StatusCode::BAD_REQUEST)?;

  let has_errors = results
    .iter()
    .any(|result| result.status == InstallStatus::Error);
  let mut response =
    axum::Json(InstallServicesResponse { results })
      .into_response();
  if has_errors {
    *response.status_mut() = StatusCode::MULTI_STATUS;
  }
  Ok(response)
}

#[instrument(name = "InstallProgress", skip_all)]
async fn install_progress() -> axum::Json<
  warden_client::entities::install::InstallProgress,
> {
  axum::Json(install::progress())
}

#[instrument(name = "ServiceLogs", skip(limit))]
async fn service_logs(
  Path(name): Path<String>,
  Query(HistoryQuery { limit }): Query<HistoryQuery>,
) -> serror::Result<axum::Json<ServiceHistoryResponse>> {
  if name != INSTALLATION {
    state::catalog()
      .get(&name)
      .status_code(StatusCode::NOT_FOUND)?;
  }
  let (entries, summary) = state::history()
    .get(&name, limit.map(|limit| limit as usize));
  Ok(axum::Json(ServiceHistoryResponse {
    service: name,
    entries,
    summary,
  }))
}

#[instrument(name = "TestService")]
async fn test_service(
  Path(name): Path<String>,
) -> serror::Result<axum::Json<TestServiceResponse>> {
  let descriptor = state::catalog()
    .get(&name)
    .status_code(StatusCode::NOT_FOUND)?;
  let Some(url) = test_url(descriptor) else {
    return Err(
      anyhow!(
        "service {name} does not define a testable endpoint"
      )
      .status_code(StatusCode::BAD_REQUEST),
    );
  };
  match state::http_client().get(&url).send().await {
    Ok(res) => {
      let status_code = res.status().as_u16();
      let success = res.status().is_success();
      let body = res
        .text()
        .await
        .ok()
        .map(|body| truncate(body, 2048))
        .filter(|body| !body.is_empty());
      state::history().append(
        &name,
        HistoryEvent::Test {
          url: url.clone(),
          success,
          status_code: Some(status_code),
        },
      );
      Ok(axum::Json(TestServiceResponse {
        success,
        status: if success {
          ServiceStatus::Tested
        } else {
          ServiceStatus::Error
        },
        status_code: Some(status_code),
        body,
        url,
        error: None,
      }))
    }
    Err(e) => {
      state::history().append(
        &name,
        HistoryEvent::Test {
          url: url.clone(),
          success: false,
          status_code: None,
        },
      );
      Ok(axum::Json(TestServiceResponse {
        success: false,
        status: ServiceStatus::Error,
        status_code: None,
        body: None,
        url,
        error: Some(e.to_string()),
      }))
    }
  }
}

/// Health url first, then the explicit host url override,
/// then the host base plus the published port.
fn test_url(descriptor: &ServiceDescriptor) -> Option<String> {
  if let Some(health_url) = &descriptor.health_url {
    return Some(health_url.clone());
  }
  if let Some(host_url) = &descriptor.host_service_url {
    return Some(host_url.clone());
  }
  let port = descriptor.port?;
  let config = warden_config();
  let base = if config.host_service_url.is_empty() {
    "http://localhost"
  } else {
    &config.host_service_url
  };
  Some(format!("{base}:{port}"))
}

fn truncate(body: String, max: usize) -> String {
  if body.len() <= max {
    body
  } else {
    body.chars().take(max).collect()
  }
}

#[instrument(name = "ServiceHealth")]
async fn service_health(
  Path(name): Path<String>,
) -> serror::Result<axum::Json<ServiceHealthResponse>> {
  state::catalog()
    .get(&name)
    .status_code(StatusCode::NOT_FOUND)?;
  let summary = state::history().summary(&name);
  let success = matches!(
    summary.status,
    ServiceStatus::Running
      | ServiceStatus::Ready
      | ServiceStatus::Tested
  );
  Ok(axum::Json(ServiceHealthResponse {
    status: summary.status,
    message: format!("{name} is {}", summary.status),
    checked_at: summary.updated_at,
    success,
    detail: summary_detail(&summary),
  }))
}

#[instrument(name = "DetectMount")]
async fn detect_mount(
  Path(name): Path<String>,
) -> serror::Result<axum::Json<DetectMountResponse>> {
  let descriptor = state::catalog()
    .get(&name)
    .status_code(StatusCode::NOT_FOUND)?;
  if !descriptor.kavita_mount_detection {
    return Err(
      anyhow!("service {name} does not support mount detection")
        .status_code(StatusCode::BAD_REQUEST),
    );
  }
  state::history().append(
    &name,
    HistoryEvent::Status {
      status: ServiceStatus::Detecting,
      message: String::from("searching for a kavita data mount"),
    },
  );
  let mount_path = engine::detect::detect_kavita_mount()
    .await
    .status_code(StatusCode::BAD_GATEWAY)?;
  let (status, message) = match &mount_path {
    Some(path) => (
      ServiceStatus::Detected,
      format!("found kavita data at {path}"),
    ),
    None => (
      ServiceStatus::NotFound,
      String::from("no kavita container found"),
    ),
  };
  state::history().append(
    &name,
    HistoryEvent::Status { status, message },
  );
  Ok(axum::Json(DetectMountResponse {
    detection: MountDetection { mount_path },
  }))
}
