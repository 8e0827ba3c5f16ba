//! Custom deserializers for wire payloads which must either
//! distinguish an absent field from an explicit null, or
//! never fail on malformed persisted values.

use serde::{Deserialize, Deserializer, de::IntoDeserializer};

use crate::entities::wizard::StepStatus;

/// Pair with `#[serde(default)]`:
/// absent => `None`, null => `Some(None)`,
/// value => `Some(Some(v))`.
pub fn double_option<'de, T, D>(
  deserializer: D,
) -> Result<Option<Option<T>>, D::Error>
where
  T: Deserialize<'de>,
  D: Deserializer<'de>,
{
  Deserialize::deserialize(deserializer).map(Some)
}

/// Step status parsing for persisted wizard documents.
/// Malformed values fall back to the default rather than
/// failing the whole document.
pub fn forgiving_step_status<'de, D>(
  deserializer: D,
) -> Result<StepStatus, D::Error>
where
  D: Deserializer<'de>,
{
  let value = serde_json::Value::deserialize(deserializer)?;
  Ok(
    StepStatus::deserialize(value.into_deserializer())
      .unwrap_or_default(),
  )
}

/// Same as [forgiving_step_status], for optional statuses
/// on timeline events.
pub fn forgiving_optional_step_status<'de, D>(
  deserializer: D,
) -> Result<Option<StepStatus>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = serde_json::Value::deserialize(deserializer)?;
  if value.is_null() {
    return Ok(None);
  }
  Ok(StepStatus::deserialize(value.into_deserializer()).ok())
}
