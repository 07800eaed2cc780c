pub mod booking_statuses;
pub mod payment_methods;
pub mod payment_statuses;
pub mod status_aliases;
