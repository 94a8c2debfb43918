use once_cell::sync::Lazy;

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// key: billing-config -> production hardening toggle
///
/// When `APP_ENV=production`, configuration errors (unknown metric or SKU)
/// degrade to a deny instead of surfacing as loud internal errors.
pub static PRODUCTION_MODE: Lazy<bool> = Lazy::new(|| {
    std::env::var("APP_ENV")
        .map(|value| value.trim().eq_ignore_ascii_case("production"))
        .unwrap_or(false)
});

/// key: billing-config -> plan assigned on first touch of a tenant
pub static DEFAULT_PLAN: Lazy<String> =
    Lazy::new(|| std::env::var("BILLING_DEFAULT_PLAN").unwrap_or_else(|_| "free".to_string()));

/// key: billing-config -> payment gateway base URL; unset means sandbox mode
pub static PAYMENT_GATEWAY_URL: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("PAYMENT_GATEWAY_URL"));

/// key: billing-config -> upper bound on a gateway capture round trip
///
/// A capture that exceeds this bound is treated as "not yet settled", never
/// as a failure, so settlement stays safe to retry.
pub static PAYMENT_GATEWAY_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PAYMENT_GATEWAY_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(10)
});

/// key: billing-config -> shared secret for payment webhook signatures
pub static PAYMENT_WEBHOOK_SECRET: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("PAYMENT_WEBHOOK_SECRET"));

fn read_optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
