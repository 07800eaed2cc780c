mod config;

use anyhow::Result;
use config::ObservabilityConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global tracing subscriber. Call once, before anything logs.
pub fn init_observability(component: &str) -> Result<()> {
    let config = ObservabilityConfig::from_env(component);

    let env_filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    // Local time so `TZ=...` shows the offset in logs.
    let fmt_layer = tracing_subscriber::fmt::layer().with_timer(ChronoLocal::rfc_3339());

    if config.json {
        tracing_subscriber::registry()
            .with(fmt_layer.json())
            .with(env_filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(env_filter)
            .try_init()?;
    }

    info!(
        service = %config.service_context.service_name,
        environment = %config.service_context.environment,
        component = %config.service_context.component,
        "observability: tracing initialised"
    );

    Ok(())
}
