use std::{
  sync::{OnceLock, RwLock},
  time::Duration,
};

use anyhow::anyhow;
use tokio::sync::Mutex;

use crate::{
  catalog::Catalog, config::warden_config, docker, engine,
  history::HistoryStore, install::InstallRun,
  wizard::{StoreClient, WizardService},
};

static CATALOG: OnceLock<Catalog> = OnceLock::new();

pub fn catalog() -> &'static Catalog {
  CATALOG
    .get()
    .expect("catalog accessed before initialization")
}

pub fn history() -> &'static HistoryStore {
  static HISTORY: OnceLock<HistoryStore> = OnceLock::new();
  HISTORY.get_or_init(|| {
    HistoryStore::new(warden_config().history_capacity)
  })
}

/// Serializes install runs. Held for a whole run, so a
/// second installer gets an immediate conflict.
pub fn install_lock() -> &'static Mutex<()> {
  static INSTALL_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
  INSTALL_LOCK.get_or_init(Default::default)
}

pub fn install_run() -> &'static RwLock<InstallRun> {
  static INSTALL_RUN: OnceLock<RwLock<InstallRun>> =
    OnceLock::new();
  INSTALL_RUN.get_or_init(Default::default)
}

pub fn wizard() -> &'static WizardService {
  static WIZARD: OnceLock<WizardService> = OnceLock::new();
  WIZARD.get_or_init(|| {
    let config = warden_config();
    WizardService::new(
      StoreClient::new(
        config.store_urls.clone(),
        config.store_token.clone(),
        config.wizard_state_key.clone(),
        Duration::from_secs(config.request_timeout_secs),
      ),
      config.timeline_limit,
    )
  })
}

/// Shared client for health probes and the portal proxy.
pub fn http_client() -> &'static reqwest::Client {
  static HTTP_CLIENT: OnceLock<reqwest::Client> =
    OnceLock::new();
  HTTP_CLIENT.get_or_init(|| {
    reqwest::Client::builder()
      .timeout(Duration::from_secs(
        warden_config().request_timeout_secs,
      ))
      .build()
      .expect("failed to build http client")
  })
}

/// Resolve the container runtime and load the catalog.
/// Fails fast on either.
pub async fn init() -> anyhow::Result<()> {
  docker::init_docker_client().await?;
  let catalog = Catalog::load()?;
  info!(
    "catalog loaded with {} service(s)",
    catalog.list().count()
  );
  CATALOG
    .set(catalog)
    .map_err(|_| anyhow!("catalog initialized twice"))?;
  Ok(())
}

pub async fn shutdown_all() {
  engine::shutdown_all().await;
}
