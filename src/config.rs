//! Server configuration, read from the environment (and `.env`, loaded in main).

use crate::broadcast::DEFAULT_QUEUE_CAPACITY;
use crate::ratelimit::RateLimiter;
use crate::state::history::RetryPolicy;
use crate::state::session::PollLimits;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// JSON-lines history file (None = keep history in memory only)
    pub history_file: Option<PathBuf>,
    /// Per-connection outbound queue length
    pub outbound_queue: usize,
    pub max_poll_seconds: u32,
    pub max_options: usize,
    pub max_text_chars: usize,
    pub history_retries: u32,
    pub history_backoff: Duration,
    /// Chat messages per window per identity (0 = unlimited)
    pub chat_rate_max: u32,
    pub chat_rate_window: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            history_file: None,
            outbound_queue: DEFAULT_QUEUE_CAPACITY,
            max_poll_seconds: 600,
            max_options: 10,
            max_text_chars: 500,
            history_retries: 3,
            history_backoff: Duration::from_millis(200),
            chat_rate_max: 10,
            chat_rate_window: Duration::from_secs(10),
        }
    }
}

/// Read and parse an env var, falling back to `default` when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Invalid value, using default");
                default
            }
        },
        _ => default,
    }
}

impl AppConfig {
    /// Load config from `POLLROOM_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let history_file = std::env::var("POLLROOM_HISTORY_FILE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let config = Self {
            bind_addr: env_or("POLLROOM_BIND", defaults.bind_addr),
            history_file,
            outbound_queue: env_or("POLLROOM_OUTBOUND_QUEUE", defaults.outbound_queue).max(1),
            max_poll_seconds: env_or("POLLROOM_MAX_POLL_SECONDS", defaults.max_poll_seconds)
                .max(1),
            max_options: env_or("POLLROOM_MAX_OPTIONS", defaults.max_options).max(2),
            max_text_chars: env_or("POLLROOM_MAX_TEXT_CHARS", defaults.max_text_chars).max(1),
            history_retries: env_or("POLLROOM_HISTORY_RETRIES", defaults.history_retries).max(1),
            history_backoff: Duration::from_millis(env_or(
                "POLLROOM_HISTORY_BACKOFF_MS",
                defaults.history_backoff.as_millis() as u64,
            )),
            chat_rate_max: env_or("POLLROOM_CHAT_RATE_MAX", defaults.chat_rate_max),
            chat_rate_window: Duration::from_secs(env_or(
                "POLLROOM_CHAT_RATE_WINDOW",
                defaults.chat_rate_window.as_secs(),
            )),
        };

        tracing::info!(
            bind = %config.bind_addr,
            history_file = ?config.history_file,
            outbound_queue = config.outbound_queue,
            max_poll_seconds = config.max_poll_seconds,
            chat_rate_max = config.chat_rate_max,
            "Configuration loaded"
        );

        config
    }

    pub fn poll_limits(&self) -> PollLimits {
        PollLimits {
            max_options: self.max_options,
            max_text_chars: self.max_text_chars,
            max_duration_seconds: self.max_poll_seconds,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.history_retries,
            backoff: self.history_backoff,
        }
    }

    pub fn chat_limiter(&self) -> Option<RateLimiter> {
        if self.chat_rate_max == 0 || self.chat_rate_window.is_zero() {
            None
        } else {
            Some(RateLimiter::new(self.chat_rate_max, self.chat_rate_window))
        }
    }
}
