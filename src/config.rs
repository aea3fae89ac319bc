use once_cell::sync::Lazy;

/// Secret used for JWT verification. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

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

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// key: metering-config -> fixed rate limit window, seconds
pub static RATE_LIMIT_WINDOW_SECS: Lazy<i64> = Lazy::new(|| {
    std::env::var("RATE_LIMIT_WINDOW_SECS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(900)
});

/// key: metering-config -> requests allowed per window and identity
pub static RATE_LIMIT_MAX_REQUESTS: Lazy<u32> = Lazy::new(|| {
    std::env::var("RATE_LIMIT_MAX_REQUESTS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(100)
});

/// key: metering-config -> usage snapshot read deadline
pub static USAGE_READ_TIMEOUT_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("USAGE_READ_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(5000)
});

/// key: metering-config -> plan code that marks an unbilled account
pub static BASELINE_PLAN_CODE: Lazy<String> =
    Lazy::new(|| read_optional_env("BASELINE_PLAN_CODE").unwrap_or_else(|| "free".to_string()));

/// Comma-separated CORS allow-list. Empty means wildcard, which is the
/// development default; production deployments set an explicit list.
pub static CORS_ALLOWED_ORIGINS: Lazy<Vec<String>> = Lazy::new(|| {
    std::env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .map(|value| {
            value
                .split(',')
                .filter_map(|raw| {
                    let trimmed = raw.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
