use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{NotificationDispatcher, channels::NotificationChannel};
use crate::domain::value_objects::enums::booking_statuses::BookingStatus;

const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusChangeEvent {
    pub user_id: Uuid,
    pub booking_id: Uuid,
    pub status: BookingStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Queues status changes and delivers them from a background task, so a slow or
/// failing channel never holds up the request that caused the change.
#[derive(Clone)]
pub struct BookingNotifier {
    tx: mpsc::Sender<StatusChangeEvent>,
}

impl BookingNotifier {
    /// Must be called inside a tokio runtime.
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<StatusChangeEvent>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for channel in &channels {
                    if let Err(error) = channel.send(&event).await {
                        warn!(
                            channel = channel.channel_name(),
                            user_id = %event.user_id,
                            booking_id = %event.booking_id,
                            status = %event.status,
                            error = %error,
                            "notifications: delivery failed"
                        );
                    }
                }
            }
            debug!("notifications: queue closed");
        });

        Self { tx }
    }
}

impl NotificationDispatcher for BookingNotifier {
    fn notify_status_change(&self, user_id: Uuid, booking_id: Uuid, status: BookingStatus) {
        let event = StatusChangeEvent {
            user_id,
            booking_id,
            status,
            occurred_at: Utc::now(),
        };

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    booking_id = %event.booking_id,
                    "notifications: queue full; dropping status change"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(
                    booking_id = %event.booking_id,
                    "notifications: queue closed; dropping status change"
                );
            }
        }
    }
}
