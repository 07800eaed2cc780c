use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::value_objects::enums::payment_statuses::PaymentStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub booking_id: Uuid,
    pub customer_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedIntent {
    pub intent_id: String,
    pub client_secret: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub token: String,
    pub booking_id: Uuid,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeResult {
    pub transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub transaction_id: String,
    pub amount_minor: i64,
    pub reason: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundStatus {
    Succeeded,
    /// Accepted by the gateway, settles asynchronously.
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundResult {
    pub refund_id: Option<String>,
    pub status: RefundStatus,
    pub error_message: Option<String>,
}

impl RefundResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, RefundStatus::Succeeded | RefundStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEventKind {
    PaymentSucceeded,
    PaymentFailed,
    ChargeRefunded,
    Other(String),
}

/// A signature-verified gateway event, reduced to what settlement needs.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub id: String,
    pub event_type: String,
    pub kind: GatewayEventKind,
    pub transaction_id: Option<String>,
    pub amount_refunded_minor: Option<i64>,
    pub failure_message: Option<String>,
}

#[automock]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, request: CreateIntentRequest) -> Result<CreatedIntent>;

    /// `Err` means the call itself failed; a declined card is `Ok` with status Failed.
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResult>;

    async fn get_status(&self, transaction_id: String) -> Result<String>;

    async fn refund(&self, request: RefundRequest) -> Result<RefundResult>;

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<GatewayEvent>;
}

/// Maps a gateway payment status onto ours. Anything unknown stays Pending so an
/// unexpected value can never mark money as captured.
pub fn map_gateway_status(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Completed,
        "processing" => PaymentStatus::Processing,
        "canceled" | "failed" => PaymentStatus::Failed,
        "refunded" => PaymentStatus::Refunded,
        "partially_refunded" => PaymentStatus::PartiallyRefunded,
        _ => PaymentStatus::Pending,
    }
}

pub fn map_refund_status(status: &str) -> RefundStatus {
    match status {
        "succeeded" => RefundStatus::Succeeded,
        "pending" | "requires_action" => RefundStatus::Pending,
        _ => RefundStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_gateway_statuses_default_to_pending() {
        assert_eq!(map_gateway_status("succeeded"), PaymentStatus::Completed);
        assert_eq!(map_gateway_status("processing"), PaymentStatus::Processing);
        assert_eq!(map_gateway_status("canceled"), PaymentStatus::Failed);
        assert_eq!(map_gateway_status("requires_payment_method"), PaymentStatus::Pending);
        assert_eq!(map_gateway_status("requires_action"), PaymentStatus::Pending);
        assert_eq!(map_gateway_status("SUCCEEDED"), PaymentStatus::Pending);
        assert_eq!(map_gateway_status(""), PaymentStatus::Pending);
    }

    #[test]
    fn refund_statuses_map_conservatively() {
        assert_eq!(map_refund_status("succeeded"), RefundStatus::Succeeded);
        assert_eq!(map_refund_status("pending"), RefundStatus::Pending);
        assert_eq!(map_refund_status("canceled"), RefundStatus::Failed);
        assert_eq!(map_refund_status("something_new"), RefundStatus::Failed);
    }
}
