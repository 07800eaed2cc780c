use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use crates::{
    domain::{
        repositories::{
            bookings::BookingRepository, payments::PaymentRepository,
            webhook_events::WebhookEventRepository,
        },
        value_objects::payments::{
            CreatePaymentIntentModel, ProcessPaymentModel, RefundPaymentModel,
        },
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            bookings::BookingPostgres, payments::PaymentPostgres,
            webhook_events::WebhookEventPostgres,
        },
    },
    notifications::NotificationDispatcher,
    payments::gateway::PaymentGateway,
};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::AuthUser, axum_http::error_responses::ApiResponse, usecases::payments::PaymentUseCase,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn routes<G, N>(db_pool: Arc<PgPoolSquad>, gateway: Arc<G>, notifier: Arc<N>) -> Router
where
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let payment_usecase = PaymentUseCase::new(
        Arc::new(BookingPostgres::new(Arc::clone(&db_pool))),
        Arc::new(PaymentPostgres::new(Arc::clone(&db_pool))),
        Arc::new(WebhookEventPostgres::new(Arc::clone(&db_pool))),
        gateway,
        notifier,
    );

    Router::new()
        .route("/", post(process_payment))
        .route("/intents", post(create_payment_intent))
        .route("/webhook", post(webhook))
        .route("/:payment_id/verify", post(verify_payment))
        .route("/:payment_id/refund", post(refund_payment))
        .with_state(Arc::new(payment_usecase))
}

pub async fn create_payment_intent<B, P, W, G, N>(
    State(payment_usecase): State<Arc<PaymentUseCase<B, P, W, G, N>>>,
    auth: AuthUser,
    Json(create_intent_model): Json<CreatePaymentIntentModel>,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    W: WebhookEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    match payment_usecase
        .create_payment_intent(auth.actor(), create_intent_model)
        .await
    {
        Ok(intent) => ApiResponse::success(intent).into_response_with(StatusCode::CREATED),
        Err(err) => err.into_response(),
    }
}

pub async fn process_payment<B, P, W, G, N>(
    State(payment_usecase): State<Arc<PaymentUseCase<B, P, W, G, N>>>,
    auth: AuthUser,
    Json(process_payment_model): Json<ProcessPaymentModel>,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    W: WebhookEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    match payment_usecase
        .process_payment(auth.actor(), process_payment_model)
        .await
    {
        Ok(payment) => ApiResponse::success(payment).into_response_with(StatusCode::CREATED),
        Err(err) => err.into_response(),
    }
}

pub async fn verify_payment<B, P, W, G, N>(
    State(payment_usecase): State<Arc<PaymentUseCase<B, P, W, G, N>>>,
    auth: AuthUser,
    Path(payment_id): Path<Uuid>,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    W: WebhookEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    match payment_usecase.verify_payment(auth.actor(), payment_id).await {
        Ok(payment) => ApiResponse::success(payment).into_response_with(StatusCode::OK),
        Err(err) => err.into_response(),
    }
}

pub async fn refund_payment<B, P, W, G, N>(
    State(payment_usecase): State<Arc<PaymentUseCase<B, P, W, G, N>>>,
    auth: AuthUser,
    Path(payment_id): Path<Uuid>,
    Json(refund_model): Json<RefundPaymentModel>,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    W: WebhookEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    match payment_usecase
        .refund_payment(auth.actor(), payment_id, refund_model)
        .await
    {
        Ok(payment) => ApiResponse::success(payment).into_response_with(StatusCode::OK),
        Err(err) => err.into_response(),
    }
}

/// Anonymous; trust comes from the signature over the raw body.
pub async fn webhook<B, P, W, G, N>(
    State(payment_usecase): State<Arc<PaymentUseCase<B, P, W, G, N>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    W: WebhookEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("payments router: webhook without signature header");
        return ApiResponse::failure("missing signature header")
            .into_response_with(StatusCode::BAD_REQUEST);
    };

    match payment_usecase.handle_webhook(&body, signature).await {
        Ok(outcome) => {
            ApiResponse::success(json!({ "outcome": outcome })).into_response_with(StatusCode::OK)
        }
        Err(err) => err.into_response(),
    }
}
