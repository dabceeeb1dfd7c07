use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Reconnect backoff: `initial * multiplier^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl BackoffConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// GraphQL endpoint for queries and mutations.
    pub http_url: String,
    /// WebSocket endpoint for subscriptions.
    pub ws_url: String,
    /// Messages per history page.
    pub page_size: u32,
    pub request_timeout: Duration,
    /// Time allowed for the socket upgrade plus `connection_ack`.
    pub handshake_timeout: Duration,
    /// `None` disables the keep-alive watchdog.
    pub keepalive_timeout: Option<Duration>,
    pub backoff: BackoffConfig,
    /// Where `FileCredentialStore` keeps the token between sessions.
    pub credential_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_url: "http://localhost:8000/graphql".into(),
            ws_url: "ws://localhost:8000/subscriptions".into(),
            page_size: 20,
            request_timeout: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(10),
            keepalive_timeout: Some(Duration::from_secs(30)),
            backoff: BackoffConfig::default(),
            credential_path: PathBuf::from("parlor-credential"),
        }
    }
}

impl ClientConfig {
    /// Read `PARLOR_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable source, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let keepalive_secs: u64 = parse_var(&lookup, "PARLOR_KEEPALIVE_TIMEOUT_SECS", 30)?;
        let page_size: u32 = parse_var(&lookup, "PARLOR_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 {
            return Err(ConfigError::Invalid {
                var: "PARLOR_PAGE_SIZE",
                value: "0".into(),
            });
        }

        Ok(Self {
            http_url: lookup("PARLOR_HTTP_URL").unwrap_or(defaults.http_url),
            ws_url: lookup("PARLOR_WS_URL").unwrap_or(defaults.ws_url),
            page_size,
            request_timeout: Duration::from_secs(parse_var(&lookup, "PARLOR_REQUEST_TIMEOUT_SECS", 15)?),
            handshake_timeout: Duration::from_secs(parse_var(&lookup, "PARLOR_HANDSHAKE_TIMEOUT_SECS", 10)?),
            keepalive_timeout: (keepalive_secs > 0).then(|| Duration::from_secs(keepalive_secs)),
            backoff: BackoffConfig {
                initial: Duration::from_millis(parse_var(&lookup, "PARLOR_BACKOFF_INITIAL_MS", 500)?),
                max: Duration::from_millis(parse_var(&lookup, "PARLOR_BACKOFF_MAX_MS", 30_000)?),
                multiplier: defaults.backoff.multiplier,
            },
            credential_path: lookup("PARLOR_CREDENTIAL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.credential_path),
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}
