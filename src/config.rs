//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).
//!
//! | Variable                | Default        |
//! |-------------------------|----------------|
//! | `LISTEN_ADDR`           | `0.0.0.0:8000` |
//! | `MAILBOX_CAPACITY`      | `256`          |
//! | `DISCONNECT_TIMEOUT_MS` | `5000`         |
//! | `LOG_LEVEL`             | `info`         |
//! | `LOG_FORMAT`            | `text`         |

use std::net::SocketAddr;
use std::time::Duration;

/// Default per-connection mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default bound on waiting for a delivery loop to stop.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// In-process tuning handed to [`crate::service::Relay::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Capacity C of each connection's mailbox. Minimum 1.
    pub mailbox_capacity: usize,
    /// How long `disconnect` waits for a delivery loop before aborting it.
    pub disconnect_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
        }
    }
}

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8000`).
    pub listen_addr: SocketAddr,

    /// Relay tuning.
    pub relay: RelayOptions,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Tracing output format.
    pub log_format: LogFormat,
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set or is
    /// malformed. Calls `dotenvy::dotenv().ok()` to optionally load a
    /// `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
            .parse()?;

        let mailbox_capacity = parse_env("MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY).max(1);
        let disconnect_timeout = Duration::from_millis(parse_env(
            "DISCONNECT_TIMEOUT_MS",
            u64::try_from(DEFAULT_DISCONNECT_TIMEOUT.as_millis()).unwrap_or(5_000),
        ));

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = std::env::var("LOG_FORMAT")
            .map(|raw| LogFormat::parse(&raw))
            .unwrap_or_default();

        Ok(Self {
            listen_addr,
            relay: RelayOptions {
                mailbox_capacity,
                disconnect_timeout,
            },
            log_level,
            log_format,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
