use rust_decimal::Decimal;
use url::Url;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub auth: UserSecret,
    pub stripe: Stripe,
    pub settlement: Settlement,
    pub notifications: Notifications,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    /// MiB
    pub body_limit: u64,
    /// seconds
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct UserSecret {
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub webhook_tolerance_secs: i64,
}

#[derive(Debug, Clone)]
pub struct Settlement {
    pub commission_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct Notifications {
    pub webhook_url: Option<Url>,
}
