use kestrel_core::prelude::*;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Fire-and-forget status notifications.
///
/// Events are queued and delivered in order by one background sender, so
/// emitting never waits on the sink. [`drain`](Self::drain) waits (bounded)
/// for the queue to empty.
#[derive(Clone)]
pub struct Notifications<N> {
    notifier: N,
    queue: Arc<Mutex<Option<mpsc::UnboundedSender<StatusEvent>>>>,
    tracker: TaskTracker,
    instance: Arc<OnceLock<String>>,
    timeout: Duration,
}

impl<N: Notifier> Notifications<N> {
    /// Must be called inside a Tokio runtime.
    pub fn new(notifier: N, timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StatusEvent>();
        let tracker = TaskTracker::new();

        let sender = notifier.clone();
        tracker.spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(&sender, event, timeout).await;
            }
        });

        Self {
            notifier,
            queue: Arc::new(Mutex::new(Some(tx))),
            tracker,
            instance: Arc::default(),
            timeout,
        }
    }

    /// Adds `instance=<name>` to every later event.
    pub fn set_instance(&self, name: &str) {
        let _ = self.instance.set(name.to_string());
    }

    fn stamp(&self, event: StatusEvent) -> StatusEvent {
        match self.instance.get() {
            Some(name) if event.field("instance").is_none() => event.with("instance", name),
            _ => event,
        }
    }

    /// Queues an event. Never blocks and never fails.
    pub fn emit(&self, event: StatusEvent) {
        let event = self.stamp(event);
        let status = event.status;
        let queued = match self.queue.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        };
        if !queued {
            debug!(%status, "Notification queue closed, dropping event");
        }
    }

    /// Delivers an event right away, bypassing the queue. Bounded by the
    /// notification timeout.
    pub async fn send_now(&self, event: StatusEvent) {
        deliver(&self.notifier, self.stamp(event), self.timeout).await;
    }

    /// Closes the queue and waits up to `bound` for queued events to go out.
    /// Returns `false` if the bound was hit.
    pub async fn drain(&self, bound: Duration) -> bool {
        self.queue.lock().unwrap_or_else(|p| p.into_inner()).take();
        self.tracker.close();

        let drained = tokio::time::timeout(bound, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            debug!(bound_ms = bound.as_millis() as u64, "Notification drain timed out");
        }
        drained
    }
}

async fn deliver<N: Notifier>(notifier: &N, event: StatusEvent, timeout: Duration) {
    let status = event.status;
    match tokio::time::timeout(timeout, notifier.notify(event)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(%status, "Notification failed: {e}"),
        Err(_) => debug!(%status, "Notification timed out"),
    }
}
