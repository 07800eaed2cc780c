use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    entities::bookings::{BookingEntity, BookingTransitionChangeset},
    services::settlement_calculator::EarningsBreakdown,
    value_objects::{
        enums::booking_statuses::BookingStatus,
        money::{basis_points_to_percentage, from_minor},
    },
};

const BOOKING_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const BOOKING_NUMBER_SUFFIX_LEN: usize = 6;

/// Human-readable reference, e.g. `BK-20261018-7QX2MA`. Uniqueness is enforced by
/// the database.
pub fn generate_booking_number(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..BOOKING_NUMBER_SUFFIX_LEN)
        .map(|_| BOOKING_NUMBER_ALPHABET[rng.gen_range(0..BOOKING_NUMBER_ALPHABET.len())] as char)
        .collect();

    format!("BK-{}-{suffix}", now.format("%Y%m%d"))
}

/// A validated status change, applied with compare-and-swap on `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingTransition {
    pub booking_id: Uuid,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub provider_id: Option<Uuid>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub provider_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub completion_photo_urls: Option<Vec<String>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BookingTransition {
    pub fn new(booking_id: Uuid, from: BookingStatus, to: BookingStatus, now: DateTime<Utc>) -> Self {
        Self {
            booking_id,
            from,
            to,
            provider_id: None,
            estimated_arrival: None,
            provider_notes: None,
            cancellation_reason: None,
            completion_photo_urls: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: now,
        }
    }

    pub fn to_changeset(&self) -> BookingTransitionChangeset {
        BookingTransitionChangeset {
            status: self.to.to_string(),
            provider_id: self.provider_id,
            estimated_arrival: self.estimated_arrival,
            provider_notes: self.provider_notes.clone(),
            cancellation_reason: self.cancellation_reason.clone(),
            completion_photo_urls: self.completion_photo_urls.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Customer,
    Provider,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingModel {
    pub service_id: Uuid,
    pub address_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub service_price: Decimal,
    pub vat_percentage: Decimal,
    pub currency: String,
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcceptBookingModel {
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeclineBookingModel {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelBookingModel {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateBookingStatusModel {
    pub status: String,
    pub notes: Option<String>,
    pub photo_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingDto {
    pub id: Uuid,
    pub booking_number: String,
    pub customer_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub service_id: Uuid,
    pub address_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub service_price: Decimal,
    pub vat_percentage: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub status: String,
    pub special_instructions: Option<String>,
    pub provider_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub completion_photo_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<EarningsBreakdown>,
}

impl BookingDto {
    pub fn from_entity(entity: BookingEntity, settlement: Option<EarningsBreakdown>) -> Self {
        Self {
            id: entity.id,
            booking_number: entity.booking_number,
            customer_id: entity.customer_id,
            provider_id: entity.provider_id,
            service_id: entity.service_id,
            address_id: entity.address_id,
            scheduled_at: entity.scheduled_at,
            service_price: from_minor(entity.service_price_minor),
            vat_percentage: basis_points_to_percentage(entity.vat_percentage_bp),
            vat_amount: from_minor(entity.vat_amount_minor),
            total_amount: from_minor(entity.total_amount_minor),
            currency: entity.currency,
            status: entity.status,
            special_instructions: entity.special_instructions,
            provider_notes: entity.provider_notes,
            cancellation_reason: entity.cancellation_reason,
            estimated_arrival: entity.estimated_arrival,
            completion_photo_urls: entity.completion_photo_urls,
            created_at: entity.created_at,
            started_at: entity.started_at,
            completed_at: entity.completed_at,
            cancelled_at: entity.cancelled_at,
            settlement,
        }
    }
}

/// What happened to the money when a booking was cancelled.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundOutcome {
    /// No captured payment, or the notice period forfeits the refund.
    NotApplicable,
    Refunded,
    PartiallyRefunded,
    /// The gateway refused or was unreachable; the booking is cancelled anyway.
    Failed,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CancellationDto {
    pub booking: BookingDto,
    pub cancelled_by: CancelledBy,
    pub refund_percentage: u8,
    pub refund_amount: Decimal,
    pub refund_outcome: RefundOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn booking_number_carries_date_and_random_suffix() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap();

        let number = generate_booking_number(now);

        assert!(number.starts_with("BK-20261018-"));
        let suffix = &number["BK-20261018-".len()..];
        assert_eq!(suffix.len(), 6);
        assert!(suffix.bytes().all(|b| BOOKING_NUMBER_ALPHABET.contains(&b)));
    }

    #[test]
    fn transition_changeset_only_carries_set_columns() {
        let now = Utc::now();
        let mut transition = BookingTransition::new(
            Uuid::new_v4(),
            BookingStatus::Pending,
            BookingStatus::Cancelled,
            now,
        );
        transition.cancelled_at = Some(now);

        let changeset = transition.to_changeset();

        assert_eq!(changeset.status, "cancelled");
        assert_eq!(changeset.cancelled_at, Some(now));
        assert!(changeset.provider_id.is_none());
        assert!(changeset.completion_photo_urls.is_none());
    }
}
