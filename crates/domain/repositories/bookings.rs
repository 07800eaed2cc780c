use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::bookings::{BookingEntity, InsertBookingEntity},
    value_objects::{bookings::BookingTransition, payments::PaymentRefundUpdate},
};

#[automock]
#[async_trait]
pub trait BookingRepository {
    async fn create(&self, booking: InsertBookingEntity) -> Result<BookingEntity>;

    async fn find_by_id(&self, booking_id: Uuid) -> Result<Option<BookingEntity>>;

    /// Applies `transition` only if the row is still in `transition.from`, together with
    /// the optional refund bookkeeping, in one transaction. Returns the updated row, or
    /// `None` when another request changed the status first.
    async fn apply_transition(
        &self,
        transition: BookingTransition,
        refund: Option<PaymentRefundUpdate>,
    ) -> Result<Option<BookingEntity>>;
}
