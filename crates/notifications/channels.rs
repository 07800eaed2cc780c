use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::info;
use url::Url;

use super::dispatcher::StatusChangeEvent;

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, event: &StatusChangeEvent) -> Result<()>;
    fn channel_name(&self) -> &'static str;
}

/// Posts status changes to the relay that fans out to push and email.
pub struct WebhookRelayChannel {
    relay_url: Url,
    client: Client,
}

impl WebhookRelayChannel {
    pub fn new(relay_url: Url) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(3)).build()?;

        Ok(Self { relay_url, client })
    }
}

#[async_trait]
impl NotificationChannel for WebhookRelayChannel {
    async fn send(&self, event: &StatusChangeEvent) -> Result<()> {
        let body = json!({
            "type": "booking.status_changed",
            "user_id": event.user_id,
            "booking_id": event.booking_id,
            "status": event.status,
            "occurred_at": event.occurred_at,
        });

        let resp = self
            .client
            .post(self.relay_url.clone())
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow!("notification relay returned {}", resp.status()));
        }

        Ok(())
    }

    fn channel_name(&self) -> &'static str {
        "webhook_relay"
    }
}

/// Writes status changes to the log; always on, so every change leaves a trace.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, event: &StatusChangeEvent) -> Result<()> {
        info!(
            user_id = %event.user_id,
            booking_id = %event.booking_id,
            status = %event.status,
            "notifications: booking status changed"
        );
        Ok(())
    }

    fn channel_name(&self) -> &'static str {
        "log"
    }
}
