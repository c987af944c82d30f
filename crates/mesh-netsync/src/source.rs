//! File-backed settings feed.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::settings::NetworkSettings;

/// Polls a JSON settings file and pushes a snapshot whenever it changes.
#[derive(Debug, Clone)]
pub struct FileSettingsSource {
    path: PathBuf,
    interval: Duration,
}

impl FileSettingsSource {
    /// Creates a source polling `path` every `interval`.
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    /// Reads the file once.
    async fn read(&self) -> Option<NetworkSettings> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read network settings");
                return None;
            }
        };
        match NetworkSettings::from_json(&content) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot parse network settings");
                None
            }
        }
    }

    /// Starts polling. The task ends when the receiving side is dropped.
    pub fn spawn(self, tx: mpsc::Sender<NetworkSettings>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            let mut last: Option<NetworkSettings> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = tx.closed() => {
                        debug!("settings receiver dropped, stopping source");
                        break;
                    }
                }

                let Some(settings) = self.read().await else {
                    continue;
                };
                if last.as_ref() == Some(&settings) {
                    continue;
                }

                debug!(path = %self.path.display(), "network settings changed");
                if tx.send(settings.clone()).await.is_err() {
                    debug!("settings receiver dropped, stopping source");
                    break;
                }
                last = Some(settings);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_settings(path: &std::path::Path, extra: &[&str]) {
        let settings = NetworkSettings {
            pod_cidr: "10.244.0.0/16".to_string(),
            service_cidr: "10.96.0.0/12".to_string(),
            reserved_subnets: extra.iter().map(|s| (*s).to_string()).collect(),
        };
        std::fs::write(path, serde_json::to_string(&settings).expect("serialize")).expect("write");
    }

    #[tokio::test]
    async fn test_source_pushes_initial_and_changed_snapshots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        write_settings(&path, &[]);

        let (tx, mut rx) = mpsc::channel(4);
        let handle = FileSettingsSource::new(&path, Duration::from_millis(10)).spawn(tx);

        let first = rx.recv().await.expect("first snapshot");
        assert!(first.reserved_subnets.is_empty());

        write_settings(&path, &["192.168.10.0/24"]);
        let second = rx.recv().await.expect("changed snapshot");
        assert_eq!(second.reserved_subnets, vec!["192.168.10.0/24".to_string()]);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("source stops once the receiver is gone")
            .expect("source task");
    }

    #[tokio::test]
    async fn test_source_stops_when_receiver_dropped_on_unchanged_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        write_settings(&path, &[]);

        let (tx, mut rx) = mpsc::channel(4);
        let handle = FileSettingsSource::new(&path, Duration::from_secs(3600)).spawn(tx);

        rx.recv().await.expect("first snapshot");
        drop(rx);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("idle source notices the closed channel")
            .expect("source task");
    }

    #[tokio::test]
    async fn test_source_skips_unreadable_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").expect("write");

        let (tx, mut rx) = mpsc::channel(4);
        let handle = FileSettingsSource::new(&path, Duration::from_millis(10)).spawn(tx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        write_settings(&path, &[]);
        let snapshot = rx.recv().await.expect("snapshot after fix");
        assert_eq!(snapshot.pod_cidr, "10.244.0.0/16");

        handle.abort();
    }
}
