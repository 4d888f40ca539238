use crate::notify::Notifications;
use kestrel_core::prelude::*;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::error;

/// Powers the host off after `max_lifetime`, whatever the lifecycle is doing.
///
/// Aborted when dropped.
pub struct Watchdog {
    task: JoinHandle<()>,
}

impl Watchdog {
    pub fn spawn<N: Notifier, H: HostControl>(
        max_lifetime: Duration,
        notifications: Notifications<N>,
        host: H,
    ) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(max_lifetime).await;

            error!(
                max_lifetime_secs = max_lifetime.as_secs(),
                "Maximum instance lifetime reached, shutting down"
            );
            notifications
                .send_now(
                    StatusEvent::new(Status::WatchdogExpired)
                        .with("max_lifetime_secs", max_lifetime.as_secs()),
                )
                .await;

            if let Err(e) = host.request_shutdown().await {
                error!("Watchdog shutdown request failed: {e}");
            }
        });

        Self { task }
    }

    pub fn disarm(self) {}

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}
