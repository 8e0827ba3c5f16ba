#[macro_use]
extern crate tracing;

use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;

use crate::config::warden_config;

mod api;
mod catalog;
mod config;
mod docker;
mod engine;
mod history;
mod install;
mod state;
mod wizard;

async fn app() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let config = warden_config();
  logger::init(&config.logging)?;

  info!("Warden version: v{}", env!("CARGO_PKG_VERSION"));
  if config.pretty_startup_config {
    info!("{:#?}", config.sanitized());
  } else {
    info!("{:?}", config.sanitized());
  }

  state::init().await?;

  let app = api::router().into_make_service();
  let addr = format!("{}:{}", config.bind_ip, config.port);
  let socket_addr = SocketAddr::from_str(&addr)
    .context("failed to parse listen address")?;
  info!("Warden starting on http://{socket_addr}");
  axum_server::bind(socket_addr)
    .serve(app)
    .await
    .context("failed to start http server")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let mut term_signal = tokio::signal::unix::signal(
    tokio::signal::unix::SignalKind::terminate(),
  )?;
  let app = tokio::spawn(app());
  tokio::select! {
    res = app => return res?,
    _ = term_signal.recv() => {}
  }
  // Cancel log readers and stop every tracked container
  // before the process exits.
  state::shutdown_all().await;
  Ok(())
}
