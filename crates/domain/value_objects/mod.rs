pub mod bookings;
pub mod enums;
pub mod iam;
pub mod money;
pub mod payments;
