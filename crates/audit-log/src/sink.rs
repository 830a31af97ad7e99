use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::AuditEntry;
use crate::writer::{AuditWriteError, AuditWriter};

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Flush the writer at most every this many seconds when the channel is idle.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// A cheap, cloneable handle used to submit [`AuditEntry`] values into the
/// background audit-log writer.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditSink {
    /// Spawn the background writer task and return a `(sink, join_handle)` pair.
    ///
    /// The task writes each entry as a JSON line, flushes after about a second
    /// of inactivity, and flushes once more and exits when the last
    /// `AuditSink` clone is dropped. Await the handle after dropping the sinks
    /// to be sure everything reached disk.
    ///
    /// The background task never panics: I/O errors are logged via
    /// `tracing::error!` and the entry is skipped.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let (tx, rx) = mpsc::channel::<AuditEntry>(CHANNEL_BUFFER);

        let mut writer = AuditWriter::new(path).await?;

        let handle = tokio::spawn(async move {
            run_writer_loop(&mut writer, rx).await;
        });

        Ok((Self { tx }, handle))
    }

    /// Send an audit entry to the background writer, waiting for channel
    /// capacity. Entries sent after the writer exited are dropped with a
    /// warning.
    pub async fn log(&self, entry: AuditEntry) {
        if let Err(err) = self.tx.send(entry).await {
            tracing::warn!(
                event_type = ?err.0.event_type,
                "audit sink channel closed; entry dropped"
            );
        }
    }
}

async fn run_writer_loop(writer: &mut AuditWriter, mut rx: mpsc::Receiver<AuditEntry>) {
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
    let mut dirty = false;

    loop {
        match tokio::time::timeout(flush_interval, rx.recv()).await {
            Ok(Some(entry)) => {
                if let Err(err) = writer.write(&entry).await {
                    tracing::error!(%err, "failed to write audit entry");
                } else {
                    dirty = true;
                }
            }
            // Channel closed
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush audit log on shutdown");
                    }
                }
                tracing::debug!("audit writer background task shutting down");
                return;
            }
            // Idle
            Err(_) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "periodic audit log flush failed");
                    } else {
                        dirty = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditEventType, AuditSource};
    use serde_json::json;

    #[tokio::test]
    async fn entries_from_clones_are_flushed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let (sink, handle) = AuditSink::start(&path).await.unwrap();

        let other = sink.clone();
        sink.log(AuditEntry::new(
            AuditEventType::AccessAllowed,
            AuditSource::new("test").with_subject("C1"),
            json!({}),
        ))
        .await;
        other
            .log(AuditEntry::new(
                AuditEventType::AccessDenied,
                AuditSource::new("test").with_subject("C2"),
                json!({}),
            ))
            .await;

        drop(sink);
        drop(other);
        handle.await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let kinds: Vec<AuditEventType> = text
            .lines()
            .map(|line| serde_json::from_str::<AuditEntry>(line).unwrap().event_type)
            .collect();
        assert_eq!(
            kinds,
            vec![AuditEventType::AccessAllowed, AuditEventType::AccessDenied]
        );
    }

    #[tokio::test]
    async fn idle_flush_makes_entries_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let (sink, handle) = AuditSink::start(&path).await.unwrap();

        sink.log(AuditEntry::new(
            AuditEventType::BundleLoaded,
            AuditSource::new("test"),
            json!({"policies": 1}),
        ))
        .await;
        tokio::time::sleep(tokio::time::Duration::from_millis(FLUSH_INTERVAL_SECS * 2500)).await;

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text.lines().count(), 1);

        drop(sink);
        handle.await.unwrap();
    }
}
