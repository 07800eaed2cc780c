use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

#[automock]
#[async_trait]
pub trait WebhookEventRepository {
    /// Records the event id. Returns false if it was already claimed by an earlier delivery.
    async fn try_claim(&self, event_id: String, event_type: String) -> Result<bool>;

    /// Forgets a claimed event so the gateway's retry can process it again.
    async fn release(&self, event_id: String) -> Result<()>;
}
