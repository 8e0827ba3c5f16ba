use anyhow::{Context, anyhow};
use axum::{
  extract::Path,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serror::{AddStatusCode, AddStatusCodeError};

use crate::{config::warden_config, state};

/// Forward a setup request to the community portal and
/// relay its response. The integration itself stays opaque
/// to warden.
#[instrument(name = "PortalProxy", skip(body))]
pub async fn proxy(
  Path(operation): Path<String>,
  serror::Json(body): serror::Json<serde_json::Value>,
) -> serror::Result<Response> {
  let config = warden_config();
  if !config
    .features
    .get("portal_proxy")
    .copied()
    .unwrap_or(true)
  {
    return Err(
      anyhow!("the portal proxy is disabled")
        .status_code(StatusCode::BAD_REQUEST),
    );
  }
  let descriptor = state::catalog()
    .get("noona-portal")
    .status_code(StatusCode::NOT_FOUND)?;
  let base = descriptor
    .host_service_url
    .clone()
    .or_else(|| {
      descriptor
        .port
        .map(|port| format!("http://{}:{port}", descriptor.name))
    })
    .context("portal service has no reachable url")
    .status_code(StatusCode::BAD_REQUEST)?;
  let url = format!("{base}/api/{operation}");

  let res = state::http_client()
    .post(&url)
    .json(&body)
    .send()
    .await
    .with_context(|| format!("portal unreachable at {url}"))
    .status_code(StatusCode::BAD_GATEWAY)?;
  let status = StatusCode::from_u16(res.status().as_u16())
    .unwrap_or(StatusCode::BAD_GATEWAY);
  let payload = res
    .json::<serde_json::Value>()
    .await
    .unwrap_or(serde_json::Value::Null);
  let mut response = axum::Json(payload).into_response();
  *response.status_mut() = status;
  Ok(response)
}
