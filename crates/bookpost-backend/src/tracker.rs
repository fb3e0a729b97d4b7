//! Bookkeeping of downloads requested by clients.
//!
//! Fetch and delivery commands arrive independently and in no guaranteed
//! order, so the delivery side looks up the download here instead of
//! waiting on the fetch directly.

use std::collections::HashMap;
use std::path::PathBuf;

use bookpost_bridge::CorrelationId;
use chrono::{DateTime, TimeDelta, Utc};

/// Entries older than this are dropped on the next registration.
pub const RETENTION: TimeDelta = TimeDelta::hours(24);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Started,
    Completed { path: PathBuf },
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct DownloadInfo {
    pub resource_identifier: String,
    pub status: DownloadStatus,
    pub started_at: DateTime<Utc>,
}

/// Key shared by the fetch and delivery commands of one request. Commands
/// without a correlation id fall back to the resource identifier.
pub fn tracking_key(resource_identifier: &str, correlation_id: Option<CorrelationId>) -> String {
    match correlation_id {
        Some(id) => id.to_string(),
        None => resource_identifier.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct DownloadTracker {
    downloads: HashMap<String, DownloadInfo>,
}

impl DownloadTracker {
    /// Registers a new download under `key`, replacing any earlier entry.
    pub fn start(&mut self, key: &str, resource_identifier: &str) {
        log::debug!("Tracking download {key} of {resource_identifier:?}");
        self.downloads.insert(
            key.to_string(),
            DownloadInfo {
                resource_identifier: resource_identifier.to_string(),
                status: DownloadStatus::Started,
                started_at: Utc::now(),
            },
        );
    }

    pub fn complete(&mut self, key: &str, path: PathBuf) {
        self.finish(key, DownloadStatus::Completed { path });
    }

    pub fn fail(&mut self, key: &str, error: impl Into<String>) {
        self.finish(
            key,
            DownloadStatus::Failed {
                error: error.into(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&DownloadInfo> {
        self.downloads.get(key)
    }

    /// Forgets downloads that started more than `age` ago.
    pub fn prune_older_than(&mut self, age: TimeDelta) {
        let cutoff = Utc::now() - age;
        self.downloads.retain(|_, info| info.started_at >= cutoff);
    }

    fn finish(&mut self, key: &str, status: DownloadStatus) {
        match self.downloads.get_mut(key) {
            Some(info) => {
                log::debug!(
                    "Download {key} of {:?} finished after {}s: {status:?}",
                    info.resource_identifier,
                    (Utc::now() - info.started_at).num_seconds()
                );
                info.status = status;
            }
            None => log::warn!("Finished download {key} was never tracked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_download_to_completion() {
        let mut tracker = DownloadTracker::default();
        tracker.start("k", "dune.epub");
        assert_eq!(tracker.get("k").unwrap().status, DownloadStatus::Started);

        tracker.complete("k", PathBuf::from("/tmp/dune.epub"));
        let info = tracker.get("k").unwrap();
        assert_eq!(
            info.status,
            DownloadStatus::Completed {
                path: PathBuf::from("/tmp/dune.epub")
            }
        );
    }

    #[test]
    fn failing_unknown_download_is_ignored() {
        let mut tracker = DownloadTracker::default();
        tracker.fail("missing", "boom");
        assert!(tracker.downloads.is_empty());
    }

    #[test]
    fn prunes_old_entries() {
        let mut tracker = DownloadTracker::default();
        tracker.start("old", "a");
        tracker.start("new", "b");
        tracker.downloads.get_mut("old").unwrap().started_at = Utc::now() - TimeDelta::hours(25);

        tracker.prune_older_than(RETENTION);
        assert!(tracker.get("old").is_none());
        assert!(tracker.get("new").is_some());
        assert_eq!(tracker.downloads.len(), 1);
    }

    #[test]
    fn correlation_id_takes_precedence_in_key() {
        let id = CorrelationId::new();
        assert_eq!(tracking_key("dune.epub", Some(id)), id.to_string());
        assert_eq!(tracking_key("dune.epub", None), "dune.epub");
    }
}
