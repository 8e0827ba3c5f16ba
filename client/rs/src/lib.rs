//! # Warden Client
//!
//! Typed client for the Warden control plane API.
//! Warden bootstraps the Noona services on a local
//! container runtime; the setup wizard drives it through
//! the endpoints wrapped here.
//!
//! ```ignore
//! let warden = WardenClient::new("http://localhost:4001");
//! let services = warden
//!   .list_services(Default::default())
//!   .await?;
//! ```

use anyhow::{Context, anyhow};
use serde::{Serialize, de::DeserializeOwned};

use crate::entities::{
  GetVersionResponse,
  history::ServiceHistoryResponse,
  install::{
    InstallProgress, InstallServicesBody, InstallServicesResponse,
  },
  service::{
    DetectMountResponse, ListServicesQuery, ListServicesResponse,
    ServiceHealthResponse, TestServiceResponse,
  },
  wizard::{
    WizardBroadcastRequest, WizardBroadcastResponse,
    WizardMetadataResponse, WizardResetPayload, WizardResponse,
    WizardState, WizardStatePayload, WizardStepHistoryResponse,
    WizardStepId,
  },
};

pub mod deserializers;
pub mod entities;

#[derive(Clone, Debug)]
pub struct WardenClient {
  address: String,
  client: reqwest::Client,
}

impl WardenClient {
  pub fn new(address: impl Into<String>) -> WardenClient {
    let address: String = address.into();
    WardenClient {
      address: address.trim_end_matches('/').to_string(),
      client: Default::default(),
    }
  }

  pub async fn health(&self) -> anyhow::Result<()> {
    let res = self
      .client
      .get(format!("{}/health", self.address))
      .send()
      .await
      .context("failed to reach warden health endpoint")?;
    if res.status().is_success() {
      Ok(())
    } else {
      Err(anyhow!("warden unhealthy | status: {}", res.status()))
    }
  }

  pub async fn version(
    &self,
  ) -> anyhow::Result<GetVersionResponse> {
    self.get("/api/version", Option::<&()>::None).await
  }

  pub async fn list_services(
    &self,
    query: ListServicesQuery,
  ) -> anyhow::Result<ListServicesResponse> {
    self.get("/api/services", Some(&query)).await
  }

  pub async fn install_services(
    &self,
    body: InstallServicesBody,
  ) -> anyhow::Result<InstallServicesResponse> {
    self.post("/api/services/install", &body).await
  }

  pub async fn install_progress(
    &self,
  ) -> anyhow::Result<InstallProgress> {
    self
      .get("/api/services/install/progress", Option::<&()>::None)
      .await
  }

  pub async fn service_logs(
    &self,
    service: &str,
    limit: Option<u32>,
  ) -> anyhow::Result<ServiceHistoryResponse> {
    self
      .get(
        &format!("/api/services/{service}/logs"),
        Some(&entities::history::HistoryQuery { limit }),
      )
      .await
  }

  /// Whole-run history, mirrored from every service in the
  /// active install.
  pub async fn installation_logs(
    &self,
    limit: Option<u32>,
  ) -> anyhow::Result<ServiceHistoryResponse> {
    self.service_logs("installation", limit).await
  }

  pub async fn test_service(
    &self,
    service: &str,
  ) -> anyhow::Result<TestServiceResponse> {
    self
      .post(&format!("/api/services/{service}/test"), &())
      .await
  }

  pub async fn service_health(
    &self,
    service: &str,
  ) -> anyhow::Result<ServiceHealthResponse> {
    self
      .get(
        &format!("/api/services/{service}/health"),
        Option::<&()>::None,
      )
      .await
  }

  /// Run Kavita mount discovery for the Raven downloader.
  pub async fn detect_raven_mount(
    &self,
  ) -> anyhow::Result<DetectMountResponse> {
    self.post("/api/services/noona-raven/detect", &()).await
  }

  pub async fn wizard_metadata(
    &self,
  ) -> anyhow::Result<WizardMetadataResponse> {
    self
      .get("/api/setup/wizard/metadata", Option::<&()>::None)
      .await
  }

  pub async fn wizard_state(&self) -> anyhow::Result<WizardState> {
    self
      .get("/api/setup/wizard/state", Option::<&()>::None)
      .await
  }

  /// Either `{updates: [...]}` or `{state: {...}}`.
  pub async fn update_wizard_state(
    &self,
    payload: WizardStatePayload,
  ) -> anyhow::Result<WizardState> {
    self.put("/api/setup/wizard/state", &payload).await
  }

  pub async fn wizard_step_history(
    &self,
    step: WizardStepId,
    limit: Option<u32>,
  ) -> anyhow::Result<WizardStepHistoryResponse> {
    self
      .get(
        &format!("/api/setup/wizard/steps/{step}/history"),
        Some(&entities::history::HistoryQuery { limit }),
      )
      .await
  }

  pub async fn reset_wizard_step(
    &self,
    step: WizardStepId,
    payload: WizardResetPayload,
  ) -> anyhow::Result<WizardResponse> {
    self
      .post(
        &format!("/api/setup/wizard/steps/{step}/reset"),
        &payload,
      )
      .await
  }

  pub async fn broadcast_wizard_event(
    &self,
    step: WizardStepId,
    body: WizardBroadcastRequest,
  ) -> anyhow::Result<WizardBroadcastResponse> {
    self
      .post(
        &format!("/api/setup/wizard/steps/{step}/broadcast"),
        &body,
      )
      .await
  }

  pub async fn complete_wizard(
    &self,
  ) -> anyhow::Result<WizardResponse> {
    self.post("/api/setup/wizard/complete", &()).await
  }

  async fn get<R: DeserializeOwned>(
    &self,
    path: &str,
    query: Option<&impl Serialize>,
  ) -> anyhow::Result<R> {
    let url = match query {
      Some(query) => {
        let query = serde_qs::to_string(query)
          .context("failed to serialize query")?;
        format!("{}{path}?{query}", self.address)
      }
      None => format!("{}{path}", self.address),
    };
    let res = self
      .client
      .get(&url)
      .send()
      .await
      .with_context(|| format!("failed at request to {path}"))?;
    Self::handle_response(path, res).await
  }

  async fn post<B: Serialize, R: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> anyhow::Result<R> {
    let res = self
      .client
      .post(format!("{}{path}", self.address))
      .json(body)
      .send()
      .await
      .with_context(|| format!("failed at request to {path}"))?;
    Self::handle_response(path, res).await
  }

  async fn put<B: Serialize, R: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> anyhow::Result<R> {
    let res = self
      .client
      .put(format!("{}{path}", self.address))
      .json(body)
      .send()
      .await
      .with_context(|| format!("failed at request to {path}"))?;
    Self::handle_response(path, res).await
  }

  async fn handle_response<R: DeserializeOwned>(
    path: &str,
    res: reqwest::Response,
  ) -> anyhow::Result<R> {
    let status = res.status();
    if status.is_success() {
      res.json().await.with_context(|| {
        format!("failed to parse response from {path}")
      })
    } else {
      let body = res.text().await.unwrap_or_default();
      Err(anyhow!("{body}").context(format!(
        "request to {path} failed | status: {status}"
      )))
    }
  }
}
