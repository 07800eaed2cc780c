use anyhow::{Context, Result, bail};
use crates::payments::stripe_client::DEFAULT_API_BASE;
use rust_decimal::Decimal;
use std::{env, str::FromStr};
use url::Url;

use super::config_model::{
    BackendServer, Database, DotEnvyConfig, Notifications, Settlement, Stripe, UserSecret,
};

const DEFAULT_COMMISSION_RATE: &str = "0.18";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let backend_server = BackendServer {
        port: parsed("SERVER_PORT_BACKEND")?,
        body_limit: parsed("SERVER_BODY_LIMIT")?,
        timeout: parsed("SERVER_TIMEOUT")?,
    };

    let database = Database {
        url: required("DATABASE_URL")?,
        max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
    };

    let auth = UserSecret {
        secret: required("JWT_USER_SECRET")?,
    };

    let stripe = Stripe {
        secret_key: required("STRIPE_SECRET_KEY")?,
        webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
        api_base: optional("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        webhook_tolerance_secs: parsed_or(
            "STRIPE_WEBHOOK_TOLERANCE_SECS",
            DEFAULT_WEBHOOK_TOLERANCE_SECS,
        )?,
    };

    let settlement = Settlement {
        commission_rate: commission_rate(optional("COMMISSION_RATE").as_deref())?,
    };

    let notifications = Notifications {
        webhook_url: optional("NOTIFICATION_WEBHOOK_URL")
            .map(|raw| Url::parse(&raw))
            .transpose()
            .context("NOTIFICATION_WEBHOOK_URL is invalid")?,
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        auth,
        stripe,
        settlement,
        notifications,
    })
}

pub(crate) fn commission_rate(raw: Option<&str>) -> Result<Decimal> {
    let raw = raw.unwrap_or(DEFAULT_COMMISSION_RATE);
    let rate = Decimal::from_str(raw.trim())
        .with_context(|| format!("COMMISSION_RATE is invalid: {raw}"))?;

    if rate < Decimal::ZERO || rate > Decimal::ONE {
        bail!("COMMISSION_RATE must be between 0 and 1, got {rate}");
    }

    Ok(rate)
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(key: &str) -> Result<String> {
    optional(key).with_context(|| format!("{key} is missing"))
}

fn parsed<T>(key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    required(key)?
        .parse()
        .with_context(|| format!("{key} is invalid"))
}

fn parsed_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw.parse().with_context(|| format!("{key} is invalid")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn commission_rate_defaults_to_eighteen_percent() {
        assert_eq!(commission_rate(None).unwrap(), dec!(0.18));
        assert_eq!(commission_rate(Some(" 0.15 ")).unwrap(), dec!(0.15));
    }

    #[test]
    fn commission_rate_outside_unit_interval_is_rejected() {
        assert!(commission_rate(Some("1.2")).is_err());
        assert!(commission_rate(Some("-0.1")).is_err());
        assert!(commission_rate(Some("eighteen")).is_err());
    }
}
