use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::{delete, insert_into, prelude::*};
use std::sync::Arc;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::webhook_events},
};
use domain::{
    entities::webhook_events::InsertWebhookEventEntity,
    repositories::webhook_events::WebhookEventRepository,
};

pub struct WebhookEventPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl WebhookEventPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl WebhookEventRepository for WebhookEventPostgres {
    async fn try_claim(&self, event_id: String, event_type: String) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let inserted = insert_into(webhook_events::table)
            .values(&InsertWebhookEventEntity {
                event_id,
                event_type,
                received_at: Utc::now(),
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)?;

        Ok(inserted == 1)
    }

    async fn release(&self, event_id: String) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        delete(webhook_events::table.filter(webhook_events::event_id.eq(event_id)))
            .execute(&mut conn)?;

        Ok(())
    }
}
