use async_timing_util::unix_timestamp_ms;
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// [WardenConfig][config::WardenConfig] and its env overrides.
pub mod config;
/// Per service event log entries and summaries.
pub mod history;
/// Install run requests, results and progress reporting.
pub mod install;
/// Subtypes of [LogConfig][logger::LogConfig].
pub mod logger;
/// Static catalog descriptors and service endpoints.
pub mod service;
/// The persistent setup wizard state machine.
pub mod wizard;

#[typeshare(serialized_as = "number")]
pub type I64 = i64;
#[typeshare(serialized_as = "any")]
pub type JsonValue = serde_json::Value;
#[typeshare(serialized_as = "any")]
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Unix timestamp in milliseconds as i64
pub fn warden_timestamp() -> i64 {
  unix_timestamp_ms() as i64
}

pub fn optional_string(string: impl Into<String>) -> Option<String> {
  let string = string.into();
  if string.is_empty() { None } else { Some(string) }
}

/// Split a `KEY=VALUE` line into its parts.
/// Lines without a `=` or with an empty key are discarded.
pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let (key, value) = line.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  Some((key.to_string(), value.trim().to_string()))
}

#[typeshare]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetVersionResponse {
  pub version: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_env_lines() {
    assert_eq!(
      parse_env_line("REDIS_HOST=noona-redis"),
      Some(("REDIS_HOST".to_string(), "noona-redis".to_string()))
    );
    assert_eq!(
      parse_env_line("EMPTY="),
      Some(("EMPTY".to_string(), String::new()))
    );
    assert_eq!(parse_env_line("=value"), None);
    assert_eq!(parse_env_line("no-delimiter"), None);
  }
}
