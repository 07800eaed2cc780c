mod channels;
mod dispatcher;

pub use channels::{LogChannel, NotificationChannel, WebhookRelayChannel};
pub use dispatcher::{BookingNotifier, StatusChangeEvent};

use mockall::automock;
use uuid::Uuid;

use crate::domain::value_objects::enums::booking_statuses::BookingStatus;

/// Outbound side channel, invoked after a settlement transaction commits.
/// Implementations must not block and must swallow their own failures.
#[automock]
pub trait NotificationDispatcher: Send + Sync {
    fn notify_status_change(&self, user_id: Uuid, booking_id: Uuid, status: BookingStatus);
}
