use bytes::Bytes;
use kestrel_core::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { bytes: u64 },
    /// Same length as the last successful upload.
    Unchanged,
    /// The local log does not exist yet.
    NoLog,
}

#[derive(Default)]
struct StreamState {
    container_ready: bool,
    uploaded: Option<u64>,
}

/// Mirrors the local execution log to `<container>/<key>`.
///
/// Each upload is the whole file, so the remote copy only ever grows.
#[derive(Clone)]
pub struct LogStreamer<S> {
    store: S,
    log_path: PathBuf,
    container: String,
    key: String,
    state: Arc<Mutex<StreamState>>,
}

impl<S: ObjectStore> LogStreamer<S> {
    pub fn new(
        store: S,
        log_path: impl Into<PathBuf>,
        container: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            log_path: log_path.into(),
            container: container.into(),
            key: key.into(),
            state: Arc::default(),
        }
    }

    /// Starts the background loop. Uploads every `interval` until the handle is finished.
    pub fn spawn(
        store: S,
        log_path: impl Into<PathBuf>,
        container: impl Into<String>,
        key: impl Into<String>,
        interval: Duration,
    ) -> LogStreamHandle<S> {
        Self::new(store, log_path, container, key).start(interval)
    }

    pub fn start(self, interval: Duration) -> LogStreamHandle<S> {
        let token = CancellationToken::new();
        let streamer = self.clone();
        let cancelled = token.clone();

        info!(
            container = %self.container,
            key = %self.key,
            interval_secs = interval.as_secs(),
            "Log streaming started"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = streamer.upload_once().await {
                            warn!(key = %streamer.key, "Log upload failed, retrying next tick: {e}");
                        }
                    }
                }
            }
        });

        LogStreamHandle {
            streamer: self,
            token,
            task,
        }
    }

    /// Uploads the log if it grew since the last successful upload.
    pub async fn upload_once(&self) -> Result<UploadOutcome, StorageError> {
        let mut state = self.state.lock().await;

        let data = match tokio::fs::read(&self.log_path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(UploadOutcome::NoLog),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let len = data.len() as u64;
        if state.uploaded == Some(len) {
            return Ok(UploadOutcome::Unchanged);
        }

        if !state.container_ready {
            self.store.ensure_container(&self.container).await?;
            state.container_ready = true;
        }

        self.store
            .put(&self.container, &self.key, data, "text/plain; charset=utf-8")
            .await?;
        state.uploaded = Some(len);

        debug!(key = %self.key, bytes = len, "Log uploaded");
        Ok(UploadOutcome::Uploaded { bytes: len })
    }

}

/// Owns the background upload loop.
pub struct LogStreamHandle<S> {
    streamer: LogStreamer<S>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl<S: ObjectStore> LogStreamHandle<S> {
    /// Stops the loop and makes one last upload. The whole call is bounded by
    /// `grace`, even when an upload in flight never completes.
    pub async fn finish(self, grace: Duration) -> Result<UploadOutcome, StorageError> {
        let LogStreamHandle {
            streamer,
            token,
            task,
        } = self;

        // An aborted tick releases the state lock. The final upload covers its bytes.
        token.cancel();
        task.abort();

        let flush = async {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Log streaming task panicked: {e}");
                }
            }
            streamer.upload_once().await
        };

        match tokio::time::timeout(grace, flush).await {
            Ok(result) => {
                if result.is_ok() {
                    info!(key = %streamer.key, "Final log upload complete");
                }
                result
            }
            Err(_) => Err(StorageError::System(format!(
                "final log upload did not finish within {}ms",
                grace.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_mock::MemoryStore;

    #[tokio::test]
    async fn creates_container_once_and_skips_unchanged_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("kestrel.log");
        std::fs::write(&log, "line 1\n").unwrap();

        let store = MemoryStore::new();
        let streamer = LogStreamer::new(store.clone(), &log, "logs", "ai-executor-1.log");

        assert_eq!(
            streamer.upload_once().await.unwrap(),
            UploadOutcome::Uploaded { bytes: 7 }
        );
        assert_eq!(streamer.upload_once().await.unwrap(), UploadOutcome::Unchanged);

        std::fs::write(&log, "line 1\nline 2\n").unwrap();
        assert_eq!(
            streamer.upload_once().await.unwrap(),
            UploadOutcome::Uploaded { bytes: 14 }
        );

        assert_eq!(store.ensure_calls(), 1);
        assert_eq!(store.history("logs", "ai-executor-1.log").len(), 2);
    }

    #[tokio::test]
    async fn missing_log_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let streamer = LogStreamer::new(
            MemoryStore::new(),
            dir.path().join("absent.log"),
            "logs",
            "a.log",
        );
        assert_eq!(streamer.upload_once().await.unwrap(), UploadOutcome::NoLog);
    }

    #[tokio::test]
    async fn failed_upload_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("kestrel.log");
        std::fs::write(&log, "boot\n").unwrap();

        let store = MemoryStore::new().failing_put("a.log", 1);
        let streamer = LogStreamer::new(store.clone(), &log, "logs", "a.log");

        assert!(streamer.upload_once().await.is_err());
        assert!(matches!(
            streamer.upload_once().await.unwrap(),
            UploadOutcome::Uploaded { .. }
        ));
        assert_eq!(store.object("logs", "a.log").unwrap(), "boot\n");
    }

    #[tokio::test]
    async fn finish_flushes_lines_written_after_the_last_tick() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("kestrel.log");
        std::fs::write(&log, "start\n").unwrap();

        let store = MemoryStore::new();
        let handle = LogStreamer::spawn(
            store.clone(),
            &log,
            "logs",
            "a.log",
            Duration::from_secs(3600),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&log, "start\nend\n").unwrap();

        handle.finish(Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.object("logs", "a.log").unwrap(), "start\nend\n");
    }

    #[tokio::test]
    async fn finish_is_bounded_when_uploads_stall() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("kestrel.log");
        std::fs::write(&log, "boot\n").unwrap();

        let store = MemoryStore::new().stalling_put("a.log", 1);
        let handle = LogStreamer::spawn(
            store.clone(),
            &log,
            "logs",
            "a.log",
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&log, "boot\nstill running\n").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            handle.finish(Duration::from_millis(200)),
        )
        .await
        .expect("finish must return within its grace period");

        assert!(matches!(result, Err(StorageError::System(_))));
        assert_eq!(store.object("logs", "a.log").unwrap(), "boot\n");
    }
}
