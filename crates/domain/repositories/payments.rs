use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::payments::{InsertPaymentEntity, PaymentEntity},
    value_objects::{
        bookings::BookingTransition,
        enums::payment_statuses::PaymentStatus,
        payments::{AdvancePaymentOutcome, PaymentRefundUpdate, RecordPaymentOutcome},
    },
};

#[automock]
#[async_trait]
pub trait PaymentRepository {
    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<PaymentEntity>>;

    async fn find_by_transaction_id(&self, transaction_id: String)
    -> Result<Option<PaymentEntity>>;

    /// The captured (Completed or PartiallyRefunded) payment of a booking, if any.
    async fn find_settled_by_booking(&self, booking_id: Uuid) -> Result<Option<PaymentEntity>>;

    /// Inserts a charge attempt and, when given, confirms the booking in the same
    /// transaction. Settled attempts are refused if the booking already has one.
    async fn record_attempt(
        &self,
        payment: InsertPaymentEntity,
        confirm_booking: Option<BookingTransition>,
    ) -> Result<RecordPaymentOutcome>;

    /// Moves a payment to `next` only while it is still in one of `expected`. A move
    /// to a settled status is refused when the booking already has another settled
    /// payment; the row is then closed as a duplicate capture.
    async fn advance_status(
        &self,
        payment_id: Uuid,
        expected: Vec<PaymentStatus>,
        next: PaymentStatus,
        gateway_response: Option<String>,
        confirm_booking: Option<BookingTransition>,
    ) -> Result<AdvancePaymentOutcome>;

    async fn apply_refund(&self, refund: PaymentRefundUpdate) -> Result<bool>;
}
