use anyhow::Result;
use async_trait::async_trait;
use diesel::{PgConnection, insert_into, prelude::*, update};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::{
        postgres::{postgres_connection::PgPoolSquad, schema::bookings},
        repositories::payments::apply_refund_row,
    },
};
use domain::{
    entities::bookings::{BookingEntity, InsertBookingEntity},
    repositories::bookings::BookingRepository,
    value_objects::{bookings::BookingTransition, payments::PaymentRefundUpdate},
};

pub struct BookingPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl BookingPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

/// Compare-and-swap on the booking status. `None` means the row was no longer in
/// `transition.from`.
pub(crate) fn apply_transition_row(
    conn: &mut PgConnection,
    transition: &BookingTransition,
) -> QueryResult<Option<BookingEntity>> {
    update(bookings::table)
        .filter(bookings::id.eq(transition.booking_id))
        .filter(bookings::status.eq(transition.from.to_string()))
        .set(transition.to_changeset())
        .returning(BookingEntity::as_returning())
        .get_result::<BookingEntity>(conn)
        .optional()
}

#[async_trait]
impl BookingRepository for BookingPostgres {
    async fn create(&self, booking: InsertBookingEntity) -> Result<BookingEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let created = insert_into(bookings::table)
            .values(&booking)
            .returning(BookingEntity::as_returning())
            .get_result::<BookingEntity>(&mut conn)?;

        Ok(created)
    }

    async fn find_by_id(&self, booking_id: Uuid) -> Result<Option<BookingEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let booking = bookings::table
            .filter(bookings::id.eq(booking_id))
            .select(BookingEntity::as_select())
            .first::<BookingEntity>(&mut conn)
            .optional()?;

        Ok(booking)
    }

    async fn apply_transition(
        &self,
        transition: BookingTransition,
        refund: Option<PaymentRefundUpdate>,
    ) -> Result<Option<BookingEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = conn.transaction::<_, anyhow::Error, _>(|conn| {
            let Some(updated) = apply_transition_row(conn, &transition)? else {
                return Ok(None);
            };

            if let Some(refund) = refund.as_ref() {
                // A webhook may have recorded the same refund already; the booking
                // change still stands.
                if !apply_refund_row(conn, refund)? {
                    warn!(
                        booking_id = %transition.booking_id,
                        payment_id = %refund.payment_id,
                        "bookings: refund row changed concurrently; keeping existing refund state"
                    );
                }
            }

            Ok(Some(updated))
        })?;

        Ok(updated)
    }
}
