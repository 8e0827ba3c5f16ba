use std::sync::OnceLock;

use clap::Parser;
use colored::Colorize;
use warden_client::entities::{
  config::{CliArgs, DebugMode, Env, WardenConfig},
  logger::{LogConfig, LogLevel},
};

pub fn warden_config() -> &'static WardenConfig {
  static WARDEN_CONFIG: OnceLock<WardenConfig> = OnceLock::new();
  WARDEN_CONFIG.get_or_init(|| {
    let env: Env = envy::from_env()
      .expect("failed to parse warden environment");
    let args = CliArgs::parse();
    let config_path =
      args.config_path.or(env.warden_config_path.clone());

    let config = match &config_path {
      Some(path) => {
        let contents = std::fs::read_to_string(path)
          .unwrap_or_else(|e| {
            panic!("failed to read config file at {path:?} | {e:?}")
          });
        toml::from_str::<WardenConfig>(&contents)
          .expect("failed to parse warden config file")
      }
      None => {
        println!(
          "{}: No config path found, using default config",
          "INFO".green(),
        );
        WardenConfig::default()
      }
    };

    // The original DEBUG switch: `super` turns on debug logs.
    let debug_level = match env.debug {
      Some(DebugMode::Super) => Some(LogLevel::Debug),
      _ => None,
    };

    let vault_tokens = std::env::vars()
      .filter(|(key, _)| key.ends_with("_VAULT_TOKEN"))
      .collect();

    WardenConfig {
      port: env.warden_api_port.unwrap_or(config.port),
      bind_ip: env.warden_bind_ip.unwrap_or(config.bind_ip),
      docker_endpoints: env
        .warden_docker_endpoints
        .unwrap_or(config.docker_endpoints),
      docker_host: env.docker_host.or(config.docker_host),
      stack_network: env
        .warden_stack_network
        .unwrap_or(config.stack_network),
      container_name: env
        .warden_container_name
        .unwrap_or(config.container_name),
      host_service_url: env
        .host_service_url
        .unwrap_or(config.host_service_url),
      health_timeout_secs: env
        .warden_health_timeout_secs
        .unwrap_or(config.health_timeout_secs),
      request_timeout_secs: env
        .warden_request_timeout_secs
        .unwrap_or(config.request_timeout_secs),
      history_capacity: env
        .warden_history_capacity
        .unwrap_or(config.history_capacity),
      timeline_limit: env
        .warden_timeline_limit
        .unwrap_or(config.timeline_limit),
      store_urls: env.warden_store_urls.unwrap_or(config.store_urls),
      store_token: env
        .warden_store_token
        .unwrap_or(config.store_token),
      wizard_state_key: env
        .warden_wizard_state_key
        .unwrap_or(config.wizard_state_key),
      kavita_mount_path: env
        .warden_kavita_mount_path
        .unwrap_or(config.kavita_mount_path),
      catalog_path: env.warden_catalog_path.or(config.catalog_path),
      features: config.features,
      vault_tokens,
      logging: LogConfig {
        level: args
          .log_level
          .map(LogLevel::from)
          .or(env.warden_logging_level)
          .or(debug_level)
          .unwrap_or(config.logging.level),
        stdio: env
          .warden_logging_stdio
          .unwrap_or(config.logging.stdio),
        pretty: env
          .warden_logging_pretty
          .unwrap_or(config.logging.pretty),
        otlp_endpoint: env
          .warden_logging_otlp_endpoint
          .unwrap_or(config.logging.otlp_endpoint),
        opentelemetry_service_name: env
          .warden_logging_opentelemetry_service_name
          .unwrap_or(config.logging.opentelemetry_service_name),
      },
      pretty_startup_config: env
        .warden_pretty_startup_config
        .unwrap_or(config.pretty_startup_config),
    }
  })
}
