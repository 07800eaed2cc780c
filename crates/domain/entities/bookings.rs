use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::bookings;

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = bookings)]
pub struct BookingEntity {
    pub id: Uuid,
    pub booking_number: String,
    pub customer_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub service_id: Uuid,
    pub address_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub service_price_minor: i64,
    pub vat_amount_minor: i64,
    pub vat_percentage_bp: i32,
    pub total_amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub special_instructions: Option<String>,
    pub provider_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub completion_photo_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = bookings)]
pub struct InsertBookingEntity {
    pub booking_number: String,
    pub customer_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub service_id: Uuid,
    pub address_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub service_price_minor: i64,
    pub vat_amount_minor: i64,
    pub vat_percentage_bp: i32,
    pub total_amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub special_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Columns touched by a lifecycle transition. `None` leaves the column as it is.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = bookings)]
pub struct BookingTransitionChangeset {
    pub status: String,
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
