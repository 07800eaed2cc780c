use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crates::domain::{
    services::{booking_state_machine::TransitionError, settlement_calculator::CalculationError},
    value_objects::enums::booking_statuses::BookingStatus,
};
use thiserror::Error;

use crate::axum_http::error_responses::ApiResponse;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("not allowed: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Calculation(#[from] CalculationError),
    #[error("booking is already in status {0}")]
    AlreadyInStatus(BookingStatus),
    #[error("booking was modified by another request; reload and retry")]
    ConcurrentModification,
    #[error("booking has already been paid")]
    AlreadyPaid,
    #[error("payment declined: {0}")]
    PaymentDeclined(String),
    #[error("refund rejected by the payment gateway: {0}")]
    RefundRejected(String),
    #[error("{0}")]
    Validation(String),
    #[error("invalid webhook: {0}")]
    InvalidWebhook(String),
    #[error("payment gateway unavailable")]
    Gateway(#[source] anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SettlementError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SettlementError::NotFound(_) => StatusCode::NOT_FOUND,
            SettlementError::Forbidden(_) => StatusCode::FORBIDDEN,
            SettlementError::Transition(err) => match err {
                TransitionError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                TransitionError::AlreadyInStatus(_) => StatusCode::CONFLICT,
                TransitionError::InvalidTransition { .. }
                | TransitionError::NotCancellable(_)
                | TransitionError::MissingField(_) => StatusCode::BAD_REQUEST,
                TransitionError::UnknownStatus(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            SettlementError::Calculation(_) => StatusCode::BAD_REQUEST,
            SettlementError::AlreadyInStatus(_)
            | SettlementError::ConcurrentModification
            | SettlementError::AlreadyPaid => StatusCode::CONFLICT,
            SettlementError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            SettlementError::Validation(_) | SettlementError::InvalidWebhook(_) => {
                StatusCode::BAD_REQUEST
            }
            SettlementError::RefundRejected(_) | SettlementError::Gateway(_) => {
                StatusCode::BAD_GATEWAY
            }
            SettlementError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SettlementError>;

impl IntoResponse for SettlementError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Don't leak internal error detail to client
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        ApiResponse::failure(message).into_response_with(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_http_statuses() {
        assert_eq!(
            SettlementError::NotFound("booking").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SettlementError::from(TransitionError::Unauthorized { action: "accept" }).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            SettlementError::from(TransitionError::AlreadyInStatus(BookingStatus::Confirmed))
                .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            SettlementError::from(TransitionError::NotCancellable(BookingStatus::InProgress))
                .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(SettlementError::AlreadyPaid.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            SettlementError::PaymentDeclined("card_declined".into()).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            SettlementError::Gateway(anyhow::anyhow!("timeout")).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let response =
            SettlementError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3")).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
