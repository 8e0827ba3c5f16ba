use std::{
  sync::atomic::{AtomicUsize, Ordering},
  time::Duration,
};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

/// Handle to the external key value store backing wizard
/// state. One POST endpoint dispatching named operations,
/// bearer token auth, candidate base URLs tried in the
/// same failover pattern as the runtime resolver.
pub struct StoreClient {
  urls: Vec<String>,
  token: String,
  key: String,
  /// Index of the last base URL that answered.
  preferred: AtomicUsize,
  client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoreRequest<'a> {
  storage_type: &'a str,
  operation: &'a str,
  payload: StorePayload<'a>,
}

#[derive(Serialize)]
struct StorePayload<'a> {
  key: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  value: Option<&'a str>,
}

#[derive(Deserialize, Default)]
struct StoreResponse {
  #[serde(default)]
  data: Option<serde_json::Value>,
  #[serde(default)]
  error: Option<String>,
}

impl StoreClient {
  pub fn new(
    urls: Vec<String>,
    token: String,
    key: String,
    request_timeout: Duration,
  ) -> StoreClient {
    StoreClient {
      urls,
      token,
      key,
      preferred: AtomicUsize::new(0),
      client: reqwest::Client::builder()
        .timeout(request_timeout)
        .build()
        .expect("failed to build store http client"),
    }
  }

  /// Read the stored document, None when unset.
  pub async fn get(&self) -> anyhow::Result<Option<String>> {
    let res = self.request("get", None).await?;
    match res.data {
      None | Some(serde_json::Value::Null) => Ok(None),
      Some(serde_json::Value::String(value)) => Ok(Some(value)),
      // Some backends hand the document back already parsed.
      Some(other) => Ok(Some(other.to_string())),
    }
  }

  pub async fn set(&self, value: &str) -> anyhow::Result<()> {
    self.request("set", Some(value)).await?;
    Ok(())
  }

  async fn request(
    &self,
    operation: &str,
    value: Option<&str>,
  ) -> anyhow::Result<StoreResponse> {
    if self.urls.is_empty() {
      return Err(anyhow!("no key value store urls configured"));
    }
    let preferred = self.preferred.load(Ordering::Relaxed);
    let mut failures: Vec<(String, anyhow::Error)> = Vec::new();
    for offset in 0..self.urls.len() {
      let index = (preferred + offset) % self.urls.len();
      let url = &self.urls[index];
      match self.request_url(url, operation, value).await {
        Ok(res) => {
          // The store answered. A store level error is not
          // a reason to fail over.
          if let Some(error) = res.error {
            return Err(anyhow!("store error: {error}"));
          }
          self.preferred.store(index, Ordering::Relaxed);
          return Ok(res);
        }
        Err(e) => {
          warn!(
            "key value store candidate {url} failed | {e:#}"
          );
          failures.push((url.clone(), e));
        }
      }
    }
    let mut e = anyhow!("no store candidates responded");
    for (url, err) in failures.into_iter().rev() {
      e = e.context(format!("{url} | {err:#}"));
    }
    Err(e.context("key value store unavailable"))
  }

  async fn request_url(
    &self,
    url: &str,
    operation: &str,
    value: Option<&str>,
  ) -> anyhow::Result<StoreResponse> {
    let res = self
      .client
      .post(url)
      .bearer_auth(&self.token)
      .json(&StoreRequest {
        storage_type: "redis",
        operation,
        payload: StorePayload {
          key: &self.key,
          value,
        },
      })
      .send()
      .await
      .context("request failed")?;
    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      return Err(anyhow!(
        "store returned {status} | {body}"
      ));
    }
    res
      .json::<StoreResponse>()
      .await
      .context("failed to parse store response")
  }
}
