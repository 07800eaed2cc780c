use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    entities::payments::{PaymentEntity, PaymentRefundChangeset},
    value_objects::{
        enums::{payment_methods::PaymentMethod, payment_statuses::PaymentStatus},
        money::from_minor,
    },
};

/// A refund applied with compare-and-swap on the previous status and refunded total.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRefundUpdate {
    pub payment_id: Uuid,
    pub expected_status: PaymentStatus,
    pub expected_refund_minor: i64,
    pub status: PaymentStatus,
    pub refund_amount_minor: i64,
    pub refunded_at: DateTime<Utc>,
    pub refund_reason: String,
    pub gateway_response: Option<String>,
}

impl PaymentRefundUpdate {
    pub fn to_changeset(&self) -> PaymentRefundChangeset {
        PaymentRefundChangeset {
            status: self.status.to_string(),
            refund_amount_minor: self.refund_amount_minor,
            refunded_at: Some(self.refunded_at),
            refund_reason: Some(self.refund_reason.clone()),
            gateway_response: self.gateway_response.clone(),
            updated_at: self.refunded_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentIntentModel {
    pub booking_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessPaymentModel {
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundPaymentModel {
    pub amount: Option<Decimal>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentIntentDto {
    pub payment_id: Uuid,
    pub intent_id: String,
    pub client_secret: String,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentDto {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub refund_amount: Decimal,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentEntity> for PaymentDto {
    fn from(entity: PaymentEntity) -> Self {
        Self {
            id: entity.id,
            booking_id: entity.booking_id,
            amount: from_minor(entity.amount_minor),
            currency: entity.currency,
            payment_method: entity.payment_method,
            status: entity.status,
            transaction_id: entity.transaction_id,
            refund_amount: from_minor(entity.refund_amount_minor),
            refunded_at: entity.refunded_at,
            refund_reason: entity.refund_reason,
            created_at: entity.created_at,
        }
    }
}

/// `gateway_response` of a row whose capture arrived after another payment had
/// already settled the booking. The captured amount is refunded through the gateway.
pub const DUPLICATE_CAPTURE_NOTE: &str = "duplicate capture: booking already paid";

/// Result of a conditional payment status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvancePaymentOutcome {
    Advanced,
    /// The row had already left the expected statuses; nothing was written.
    Stale,
    /// The row would have become a second settled payment for its booking. It was
    /// marked Failed with [`DUPLICATE_CAPTURE_NOTE`] instead.
    DuplicateCapture,
}

/// Result of persisting a charge attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPaymentOutcome {
    Recorded {
        payment: PaymentEntity,
        booking_confirmed: bool,
    },
    /// Another settled payment already exists for the booking; nothing was written.
    DuplicateSettled,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    /// The payment already holds a higher-priority status.
    Stale,
    Ignored,
}
