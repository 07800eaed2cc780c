use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::infra::db::postgres::schema::webhook_events;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = webhook_events)]
pub struct InsertWebhookEventEntity {
    pub event_id: String,
    pub event_type: String,
    pub received_at: DateTime<Utc>,
}
