pub mod bookings;
pub mod payments;
pub mod settlement_error;
