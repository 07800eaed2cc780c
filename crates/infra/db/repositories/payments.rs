use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::{PgConnection, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::{
        postgres::{
            postgres_connection::PgPoolSquad,
            schema::{bookings, payments},
        },
        repositories::bookings::apply_transition_row,
    },
};
use domain::{
    entities::payments::{InsertPaymentEntity, PaymentEntity},
    repositories::payments::PaymentRepository,
    value_objects::{
        bookings::BookingTransition,
        enums::payment_statuses::PaymentStatus,
        payments::{
            AdvancePaymentOutcome, DUPLICATE_CAPTURE_NOTE, PaymentRefundUpdate,
            RecordPaymentOutcome,
        },
    },
};

pub struct PaymentPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

fn status_strings(statuses: &[PaymentStatus]) -> Vec<String> {
    statuses.iter().map(|status| status.to_string()).collect()
}

/// Compare-and-swap on both the status and the refunded total, so two refunds
/// computed from the same snapshot cannot both land.
pub(crate) fn apply_refund_row(
    conn: &mut PgConnection,
    refund: &PaymentRefundUpdate,
) -> QueryResult<bool> {
    let updated = update(payments::table)
        .filter(payments::id.eq(refund.payment_id))
        .filter(payments::status.eq(refund.expected_status.to_string()))
        .filter(payments::refund_amount_minor.eq(refund.expected_refund_minor))
        .filter(payments::amount_minor.ge(refund.refund_amount_minor))
        .set(refund.to_changeset())
        .execute(conn)?;

    Ok(updated == 1)
}

/// Serialises concurrent settlements of the same booking behind the settled check.
fn lock_booking(conn: &mut PgConnection, booking_id: Uuid) -> QueryResult<()> {
    bookings::table
        .filter(bookings::id.eq(booking_id))
        .select(bookings::id)
        .for_update()
        .get_result::<Uuid>(conn)?;
    Ok(())
}

fn find_settled_row(conn: &mut PgConnection, booking_id: Uuid) -> QueryResult<Option<PaymentEntity>> {
    payments::table
        .filter(payments::booking_id.eq(booking_id))
        .filter(payments::status.eq_any(status_strings(&PaymentStatus::settled_statuses())))
        .select(PaymentEntity::as_select())
        .first::<PaymentEntity>(conn)
        .optional()
}

#[async_trait]
impl PaymentRepository for PaymentPostgres {
    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payment = payments::table
            .filter(payments::id.eq(payment_id))
            .select(PaymentEntity::as_select())
            .first::<PaymentEntity>(&mut conn)
            .optional()?;

        Ok(payment)
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: String,
    ) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payment = payments::table
            .filter(payments::transaction_id.eq(transaction_id))
            .order(payments::created_at.desc())
            .select(PaymentEntity::as_select())
            .first::<PaymentEntity>(&mut conn)
            .optional()?;

        Ok(payment)
    }

    async fn find_settled_by_booking(&self, booking_id: Uuid) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        Ok(find_settled_row(&mut conn, booking_id)?)
    }

    async fn record_attempt(
        &self,
        payment: InsertPaymentEntity,
        confirm_booking: Option<BookingTransition>,
    ) -> Result<RecordPaymentOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let settles = PaymentStatus::from_str(&payment.status).is_some_and(|s| s.is_settled());

        let outcome = conn.transaction::<_, anyhow::Error, _>(|conn| {
            lock_booking(conn, payment.booking_id)?;

            if settles && find_settled_row(conn, payment.booking_id)?.is_some() {
                return Ok(RecordPaymentOutcome::DuplicateSettled);
            }

            let recorded = insert_into(payments::table)
                .values(&payment)
                .returning(PaymentEntity::as_returning())
                .get_result::<PaymentEntity>(conn)?;

            let booking_confirmed = match confirm_booking.as_ref() {
                Some(transition) => apply_transition_row(conn, transition)?.is_some(),
                None => false,
            };

            Ok(RecordPaymentOutcome::Recorded {
                payment: recorded,
                booking_confirmed,
            })
        })?;

        Ok(outcome)
    }

    async fn advance_status(
        &self,
        payment_id: Uuid,
        expected: Vec<PaymentStatus>,
        next: PaymentStatus,
        gateway_response: Option<String>,
        confirm_booking: Option<BookingTransition>,
    ) -> Result<AdvancePaymentOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let expected = status_strings(&expected);

        let outcome = conn.transaction::<_, anyhow::Error, _>(|conn| {
            if next.is_settled() {
                let Some(booking_id) = payments::table
                    .filter(payments::id.eq(payment_id))
                    .select(payments::booking_id)
                    .first::<Uuid>(conn)
                    .optional()?
                else {
                    return Ok(AdvancePaymentOutcome::Stale);
                };

                lock_booking(conn, booking_id)?;
                let already_settled = find_settled_row(conn, booking_id)?
                    .is_some_and(|settled| settled.id != payment_id);
                if already_settled {
                    let closed = update(payments::table)
                        .filter(payments::id.eq(payment_id))
                        .filter(payments::status.eq_any(expected.clone()))
                        .set((
                            payments::status.eq(PaymentStatus::Failed.to_string()),
                            payments::gateway_response.eq(DUPLICATE_CAPTURE_NOTE),
                            payments::updated_at.eq(Utc::now()),
                        ))
                        .execute(conn)?;

                    return Ok(if closed == 0 {
                        AdvancePaymentOutcome::Stale
                    } else {
                        AdvancePaymentOutcome::DuplicateCapture
                    });
                }
            }

            let updated = update(payments::table)
                .filter(payments::id.eq(payment_id))
                .filter(payments::status.eq_any(expected.clone()))
                .set((
                    payments::status.eq(next.to_string()),
                    payments::gateway_response.eq(gateway_response.clone()),
                    payments::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

            if updated == 0 {
                return Ok(AdvancePaymentOutcome::Stale);
            }

            if let Some(transition) = confirm_booking.as_ref() {
                apply_transition_row(conn, transition)?;
            }

            Ok(AdvancePaymentOutcome::Advanced)
        })?;

        Ok(outcome)
    }

    async fn apply_refund(&self, refund: PaymentRefundUpdate) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        Ok(apply_refund_row(&mut conn, &refund)?)
    }
}
