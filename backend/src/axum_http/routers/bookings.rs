use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use crates::{
    domain::{
        repositories::{bookings::BookingRepository, payments::PaymentRepository},
        services::settlement_calculator::SettlementCalculator,
        value_objects::bookings::{
            AcceptBookingModel, CancelBookingModel, CreateBookingModel, DeclineBookingModel,
            RefundOutcome, UpdateBookingStatusModel,
        },
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{bookings::BookingPostgres, payments::PaymentPostgres},
    },
    notifications::NotificationDispatcher,
    payments::gateway::PaymentGateway,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    axum_http::error_responses::ApiResponse,
    usecases::bookings::{BookingUseCase, REFUND_FAILED_MESSAGE},
};

pub fn routes<G, N>(
    db_pool: Arc<PgPoolSquad>,
    gateway: Arc<G>,
    notifier: Arc<N>,
    calculator: SettlementCalculator,
) -> Router
where
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let booking_repository = BookingPostgres::new(Arc::clone(&db_pool));
    let payment_repository = PaymentPostgres::new(Arc::clone(&db_pool));
    let booking_usecase = BookingUseCase::new(
        Arc::new(booking_repository),
        Arc::new(payment_repository),
        gateway,
        notifier,
        calculator,
    );

    Router::new()
        .route("/", post(create))
        .route("/:booking_id", get(get_booking))
        .route("/:booking_id/accept", post(accept))
        .route("/:booking_id/decline", post(decline))
        .route("/:booking_id/cancel", post(cancel))
        .route("/:booking_id/status", post(update_status))
        .with_state(Arc::new(booking_usecase))
}

pub async fn create<B, P, G, N>(
    State(booking_usecase): State<Arc<BookingUseCase<B, P, G, N>>>,
    auth: AuthUser,
    Json(create_booking_model): Json<CreateBookingModel>,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    match booking_usecase
        .create_booking(auth.user_id, create_booking_model)
        .await
    {
        Ok(booking) => ApiResponse::success(booking).into_response_with(StatusCode::CREATED),
        Err(err) => err.into_response(),
    }
}

pub async fn get_booking<B, P, G, N>(
    State(booking_usecase): State<Arc<BookingUseCase<B, P, G, N>>>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    match booking_usecase.get_booking(auth.actor(), booking_id).await {
        Ok(booking) => ApiResponse::success(booking).into_response_with(StatusCode::OK),
        Err(err) => err.into_response(),
    }
}

pub async fn accept<B, P, G, N>(
    State(booking_usecase): State<Arc<BookingUseCase<B, P, G, N>>>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
    accept_booking_model: Option<Json<AcceptBookingModel>>,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let model = accept_booking_model.map(|Json(model)| model).unwrap_or_default();

    match booking_usecase.accept(auth.user_id, booking_id, model).await {
        Ok(booking) => ApiResponse::success(booking).into_response_with(StatusCode::OK),
        Err(err) => err.into_response(),
    }
}

pub async fn decline<B, P, G, N>(
    State(booking_usecase): State<Arc<BookingUseCase<B, P, G, N>>>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
    Json(decline_booking_model): Json<DeclineBookingModel>,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    match booking_usecase
        .decline(auth.user_id, booking_id, decline_booking_model.reason)
        .await
    {
        Ok(booking) => ApiResponse::success(booking).into_response_with(StatusCode::OK),
        Err(err) => err.into_response(),
    }
}

pub async fn cancel<B, P, G, N>(
    State(booking_usecase): State<Arc<BookingUseCase<B, P, G, N>>>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
    Json(cancel_booking_model): Json<CancelBookingModel>,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    match booking_usecase
        .cancel(auth.user_id, booking_id, cancel_booking_model.reason)
        .await
    {
        Ok(cancellation) => {
            let refund_failed = cancellation.refund_outcome == RefundOutcome::Failed;
            let response = ApiResponse::success(cancellation);
            if refund_failed {
                response
                    .with_message(REFUND_FAILED_MESSAGE)
                    .into_response_with(StatusCode::OK)
            } else {
                response.into_response_with(StatusCode::OK)
            }
        }
        Err(err) => err.into_response(),
    }
}

pub async fn update_status<B, P, G, N>(
    State(booking_usecase): State<Arc<BookingUseCase<B, P, G, N>>>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
    Json(update_status_model): Json<UpdateBookingStatusModel>,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    match booking_usecase
        .update_status(auth.user_id, booking_id, update_status_model)
        .await
    {
        Ok(booking) => ApiResponse::success(booking).into_response_with(StatusCode::OK),
        Err(err) => err.into_response(),
    }
}
