pub mod bookings;
pub mod payments;
pub mod webhook_events;
