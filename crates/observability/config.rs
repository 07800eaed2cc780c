use std::env;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ServiceContext {
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ObservabilityConfig {
    pub(crate) service_context: ServiceContext,
    /// `RUST_LOG` directive, falling back to `info`.
    pub(crate) filter: String,
    pub(crate) json: bool,
}

impl ObservabilityConfig {
    pub(crate) fn from_env(component: &str) -> Self {
        Self::from_lookup(component, |key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(component: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let component = component.trim().to_string();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let service_name = non_empty("SERVICE_NAME").unwrap_or_else(|| component.clone());
        let environment = non_empty("STAGE").unwrap_or_else(|| "unknown".to_string());
        let filter = non_empty("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let json = non_empty("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json"));

        Self {
            service_context: ServiceContext {
                service_name,
                environment,
                component,
            },
            filter,
            json,
        }
    }
}
