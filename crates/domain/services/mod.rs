pub mod booking_state_machine;
pub mod settlement_calculator;
