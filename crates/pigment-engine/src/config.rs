use std::env;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8188/ws";
pub const DEFAULT_SUBMIT_URL: &str = "http://127.0.0.1:8080/generate";
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 300;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Streaming channel URI (`ws://` or `wss://`).
    pub endpoint: String,
    /// Generation forwarder URL.
    pub submit_url: String,
    pub handshake_timeout: Duration,
    pub session_timeout: Duration,
    pub quiet_period: Duration,
    pub max_reconnect_attempts: u32,
    pub poll_interval: Duration,
    pub submit_timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            submit_url: DEFAULT_SUBMIT_URL.to_string(),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            session_timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
            quiet_period: Duration::from_millis(DEFAULT_QUIET_PERIOD_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            submit_timeout: Duration::from_millis(DEFAULT_SUBMIT_TIMEOUT_MS),
        }
    }
}

impl GeneratorConfig {
    /// Defaults overlaid with `PIGMENT_*` environment knobs.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, fallback: String| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .unwrap_or(fallback)
        };
        let millis = |key: &str, min: u64, max: u64, fallback: Duration| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(|value| Duration::from_millis(value.clamp(min, max)))
                .unwrap_or(fallback)
        };

        Self {
            endpoint: text("PIGMENT_WS_URL", defaults.endpoint),
            submit_url: text("PIGMENT_SUBMIT_URL", defaults.submit_url),
            handshake_timeout: millis(
                "PIGMENT_HANDSHAKE_TIMEOUT_MS",
                100,
                60_000,
                defaults.handshake_timeout,
            ),
            session_timeout: millis(
                "PIGMENT_SESSION_TIMEOUT_MS",
                1_000,
                600_000,
                defaults.session_timeout,
            ),
            quiet_period: millis(
                "PIGMENT_QUIET_PERIOD_MS",
                10,
                10_000,
                defaults.quiet_period,
            ),
            max_reconnect_attempts: lookup("PIGMENT_MAX_RECONNECTS")
                .and_then(|raw| raw.trim().parse::<u32>().ok())
                .map(|value| value.clamp(1, 10))
                .unwrap_or(defaults.max_reconnect_attempts),
            poll_interval: millis(
                "PIGMENT_POLL_INTERVAL_MS",
                10,
                1_000,
                defaults.poll_interval,
            ),
            submit_timeout: millis(
                "PIGMENT_SUBMIT_TIMEOUT_MS",
                1_000,
                300_000,
                defaults.submit_timeout,
            ),
        }
    }
}
