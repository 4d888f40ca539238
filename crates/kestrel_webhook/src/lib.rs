//! # Kestrel Webhook
//!
//! A [`Notifier`] that posts each [`StatusEvent`] as an
//! `application/x-www-form-urlencoded` body to a configured URL.
//!
//! Without a URL the notifier accepts every event and sends nothing.
//!
//! ## Usage
//!
//! ```no_run
//! # use kestrel_webhook::WebhookNotifier;
//! # use kestrel_core::prelude::*;
//! # use std::time::Duration;
//! # async fn run() -> Result<(), NotifyError> {
//! let notifier = WebhookNotifier::new(
//!     Some("https://hooks.example.com/executor".into()),
//!     Duration::from_secs(5),
//! )?;
//! notifier.notify(StatusEvent::new(Status::Booting)).await?;
//! # Ok(())
//! # }
//! ```

use kestrel_core::prelude::*;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: Client,
    url: Option<String>,
}

impl WebhookNotifier {
    /// `timeout` bounds each request end to end.
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url: url.filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }
}

impl Notifier for WebhookNotifier {
    async fn notify(&self, event: StatusEvent) -> Result<(), NotifyError> {
        let Some(url) = &self.url else {
            return Ok(());
        };

        let res = self
            .client
            .post(url)
            .form(&event.form())
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }

        debug!(status = %event.status, "Notification delivered");
        Ok(())
    }
}
