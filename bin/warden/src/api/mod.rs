use axum::{
  Json, Router,
  routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use warden_client::entities::GetVersionResponse;

mod portal;
mod services;
mod wizard;

pub fn router() -> Router {
  Router::new()
    .route("/health", get(health))
    .nest("/api", api_router())
    .layer(
      CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any),
    )
}

async fn health() -> &'static str {
  "OK"
}

fn api_router() -> Router {
  Router::new()
    .route("/version", get(version))
    .nest("/services", services::router())
    .nest("/setup/wizard", wizard::router())
    .route("/setup/portal/{operation}", post(portal::proxy))
}

async fn version() -> Json<GetVersionResponse> {
  Json(GetVersionResponse {
    version: env!("CARGO_PKG_VERSION").to_string(),
  })
}
