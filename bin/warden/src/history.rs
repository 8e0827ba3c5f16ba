use std::collections::VecDeque;

use dashmap::DashMap;
use derive_variants::ExtractVariant;
use warden_client::entities::{
  history::{
    HistoryEntry, HistoryEvent, HistorySummary, ServiceStatus,
  },
  optional_string, warden_timestamp,
};

/// Pseudo service mirroring every event of the active
/// install for a whole-run view.
pub const INSTALLATION: &str = "installation";

/// Bounded per service event logs with derived summaries.
/// Mutation goes through dashmap's per shard locking,
/// reads hand out snapshots.
pub struct HistoryStore {
  capacity: usize,
  buffers: DashMap<String, ServiceHistory>,
}

#[derive(Default)]
struct ServiceHistory {
  entries: VecDeque<HistoryEntry>,
  summary: HistorySummary,
}

impl HistoryStore {
  pub fn new(capacity: usize) -> HistoryStore {
    HistoryStore {
      capacity,
      buffers: Default::default(),
    }
  }

  /// Stamp and append one event. Events of services in the
  /// active install are mirrored into the `installation`
  /// buffer with the same timestamp.
  pub fn append(&self, service: &str, event: HistoryEvent) {
    trace!(
      "history append | {service} | {}",
      event.extract_variant()
    );
    let entry = HistoryEntry {
      timestamp: warden_timestamp(),
      event,
    };
    let mirror = service != INSTALLATION
      && crate::install::mirrors_to_installation(service);
    self.push(service, entry.clone());
    if mirror {
      self.push(INSTALLATION, entry);
    }
  }

  fn push(&self, service: &str, mut entry: HistoryEntry) {
    let mut buffer = self
      .buffers
      .entry(service.to_string())
      .or_default();
    // Buffer timestamps stay non decreasing even if the
    // clock steps backwards.
    if let Some(last) = buffer.entries.back()
      && entry.timestamp < last.timestamp
    {
      entry.timestamp = last.timestamp;
    }
    update_summary(&mut buffer.summary, &entry);
    buffer.entries.push_back(entry);
    while buffer.entries.len() > self.capacity {
      buffer.entries.pop_front();
    }
  }

  /// Snapshot of the most recent `limit` entries plus the
  /// current summary. Unknown services read as empty.
  pub fn get(
    &self,
    service: &str,
    limit: Option<usize>,
  ) -> (Vec<HistoryEntry>, HistorySummary) {
    let Some(buffer) = self.buffers.get(service) else {
      return (Vec::new(), HistorySummary::default());
    };
    let limit = limit.unwrap_or(self.capacity);
    let skip = buffer.entries.len().saturating_sub(limit);
    let entries =
      buffer.entries.iter().skip(skip).cloned().collect();
    (entries, buffer.summary.clone())
  }

  pub fn summary(&self, service: &str) -> HistorySummary {
    self
      .buffers
      .get(service)
      .map(|buffer| buffer.summary.clone())
      .unwrap_or_default()
  }
}

fn update_summary(
  summary: &mut HistorySummary,
  entry: &HistoryEntry,
) {
  summary.updated_at = entry.timestamp;
  match &entry.event {
    HistoryEvent::Status { status, message } => {
      summary.status = *status;
      if !message.is_empty() {
        summary.detail = message.clone();
      }
      if !matches!(status, ServiceStatus::Pulling) {
        summary.percent = None;
      }
    }
    HistoryEvent::Progress { progress } => {
      if let (Some(current), Some(total)) =
        (progress.current, progress.total)
        && total > 0
      {
        summary.percent =
          Some(100.0 * current as f64 / total as f64);
      }
      if !progress.detail.is_empty() {
        summary.detail = progress.detail.clone();
      }
    }
    HistoryEvent::Test { success, .. } => {
      summary.status = if *success {
        ServiceStatus::Tested
      } else {
        ServiceStatus::Error
      };
    }
    HistoryEvent::Log { .. } => {}
  }
}

/// Non empty detail of a summary, for health reporting.
pub fn summary_detail(
  summary: &HistorySummary,
) -> Option<String> {
  optional_string(summary.detail.clone())
}

#[cfg(test)]
mod tests {
  use warden_client::entities::history::{
    LogStream, PullProgress,
  };

  use super::*;

  fn status(status: ServiceStatus) -> HistoryEvent {
    HistoryEvent::Status {
      status,
      message: String::new(),
    }
  }

  #[test]
  fn evicts_oldest_beyond_capacity() {
    let store = HistoryStore::new(3);
    for i in 0..5 {
      store.append(
        "svc",
        HistoryEvent::Log {
          stream: LogStream::Stdout,
          message: format!("line {i}"),
        },
      );
    }
    let (entries, _) = store.get("svc", None);
    assert_eq!(entries.len(), 3);
    let first = match &entries[0].event {
      HistoryEvent::Log { message, .. } => message.clone(),
      _ => panic!("expected log entry"),
    };
    assert_eq!(first, "line 2");
  }

  #[test]
  fn timestamps_are_non_decreasing() {
    let store = HistoryStore::new(10);
    for _ in 0..5 {
      store.append("svc", status(ServiceStatus::Running));
    }
    let (entries, _) = store.get("svc", None);
    for pair in entries.windows(2) {
      assert!(pair[0].timestamp <= pair[1].timestamp);
    }
  }

  #[test]
  fn summary_tracks_latest_status_and_percent() {
    let store = HistoryStore::new(10);
    store.append("svc", status(ServiceStatus::Pulling));
    store.append(
      "svc",
      HistoryEvent::Progress {
        progress: PullProgress {
          layer_id: "aa".to_string(),
          phase: "Downloading".to_string(),
          current: Some(50),
          total: Some(200),
          detail: "[=> ]".to_string(),
        },
      },
    );
    let summary = store.summary("svc");
    assert_eq!(summary.status, ServiceStatus::Pulling);
    assert_eq!(summary.percent, Some(25.0));
    assert_eq!(summary.detail, "[=> ]");

    store.append("svc", status(ServiceStatus::Running));
    let summary = store.summary("svc");
    assert_eq!(summary.status, ServiceStatus::Running);
    assert_eq!(summary.percent, None);
  }

  #[test]
  fn limited_reads_return_most_recent() {
    let store = HistoryStore::new(10);
    for status_value in [
      ServiceStatus::Queued,
      ServiceStatus::Pulling,
      ServiceStatus::Running,
    ] {
      store.append("svc", status(status_value));
    }
    let (entries, _) = store.get("svc", Some(1));
    assert_eq!(entries.len(), 1);
    assert!(matches!(
      entries[0].event,
      HistoryEvent::Status {
        status: ServiceStatus::Running,
        ..
      }
    ));
  }
}
