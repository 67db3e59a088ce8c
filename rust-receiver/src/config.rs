//! Configuration module for environment variable parsing.
//!
//! Everything is read once at startup and never mutated afterwards.

use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tracing::warn;

use crate::tasks::ThinkTime;

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Secret used to verify webhook signatures. Never logged.
    pub signing_secret: Option<String>,

    /// Address for the web server to bind to
    pub host: IpAddr,

    /// Port for the web server to listen on
    pub port: u16,

    /// Tracing filter used when `RUST_LOG` is not set
    pub log_level: String,

    /// Accepted distance between a request's timestamp and now, in seconds
    pub replay_window_secs: u64,

    /// Number of think-time steps before a reply is sent
    pub think_steps: u32,

    /// Length of one think-time step in milliseconds
    pub think_interval_ms: u64,

    /// Timeout for the outbound callback request in milliseconds
    pub callback_timeout_ms: u64,

    /// How long shutdown waits for in-flight replies, in seconds
    pub drain_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            signing_secret: env::var("SIGNING_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),

            host: parse_or("HOST", IpAddr::V4(Ipv4Addr::LOCALHOST)),

            port: parse_or("PORT", 8000),

            log_level: log_level(),

            replay_window_secs: parse_or("REPLAY_WINDOW_SECS", 60),

            think_steps: parse_or("THINK_STEPS", 5),

            think_interval_ms: parse_or("THINK_INTERVAL_MS", 1000),

            callback_timeout_ms: parse_or("CALLBACK_TIMEOUT_MS", 10_000),

            drain_timeout_secs: parse_or("DRAIN_TIMEOUT_SECS", 30),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn think_time(&self) -> ThinkTime {
        ThinkTime {
            steps: self.think_steps,
            interval: Duration::from_millis(self.think_interval_ms),
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "signing_secret",
                &self.signing_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("replay_window_secs", &self.replay_window_secs)
            .field("think_steps", &self.think_steps)
            .field("think_interval_ms", &self.think_interval_ms)
            .field("callback_timeout_ms", &self.callback_timeout_ms)
            .field("drain_timeout_secs", &self.drain_timeout_secs)
            .finish()
    }
}

/// Log level from `LOG_LEVEL`, defaulting to `info`.
///
/// Read separately so logging can start before the rest of the config.
pub fn log_level() -> String {
    env::var("LOG_LEVEL")
        .ok()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Parse an environment variable, falling back to `default` if it is unset
/// or malformed.
fn parse_or<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + fmt::Display,
{
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, default = %default, "Invalid value, using default");
            default
        }
    }
}
