use crate::{
    axum_http::{default_routers, routers},
    config::config_model::DotEnvyConfig,
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use crates::{
    domain::services::settlement_calculator::SettlementCalculator,
    infra::db::postgres::postgres_connection::PgPoolSquad,
    notifications::{BookingNotifier, LogChannel, NotificationChannel, WebhookRelayChannel},
    payments::stripe_client::StripeClient,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let calculator = SettlementCalculator::new(config.settlement.commission_rate)
        .context("invalid commission rate")?;

    let gateway = Arc::new(StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
        config.stripe.api_base.clone(),
        config.stripe.webhook_tolerance_secs,
    ));

    let mut channels: Vec<Arc<dyn NotificationChannel>> = vec![Arc::new(LogChannel)];
    match config.notifications.webhook_url.clone() {
        Some(url) => channels.push(Arc::new(WebhookRelayChannel::new(url)?)),
        None => warn!("NOTIFICATION_WEBHOOK_URL not set; status changes are only logged"),
    }
    let notifier = Arc::new(BookingNotifier::new(channels));

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/bookings",
            routers::bookings::routes(
                Arc::clone(&db_pool),
                Arc::clone(&gateway),
                Arc::clone(&notifier),
                calculator,
            ),
        )
        .nest(
            "/api/v1/payments",
            routers::payments::routes(
                Arc::clone(&db_pool),
                Arc::clone(&gateway),
                Arc::clone(&notifier),
            ),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(Extension(Arc::new(config.auth.clone())))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any), // TODO restrict to the web app origin once it has a fixed domain
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!(
        port = config.backend_server.port,
        commission_rate = %calculator.commission_rate(),
        "Server is running"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
