use std::time::Duration;

/// Server configuration
///
/// All values can be overridden through environment variables:
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | DATABASE_URL | postgres://localhost/kds | System-of-record connection string |
/// | BUS_LISTEN_ADDR | 0.0.0.0:8081 | Push transport TCP listen address |
/// | BUS_CHANNEL_CAPACITY | 1024 | Registry command channel capacity |
/// | CONN_OUTBOUND_CAPACITY | 64 | Per-connection outbound queue depth |
/// | RELAY_RECONNECT_SECS | 5 | Delay after a lost listener connection |
/// | RELAY_INITIAL_RETRY_SECS | 10 | Delay after an initial connect failure |
/// | ENVIRONMENT | development | Runtime environment label |
#[derive(Debug, Clone)]
pub struct Config {
    /// System-of-record connection string
    pub database_url: String,
    /// Push transport TCP listen address
    pub bus_listen_addr: String,
    /// Registry command channel capacity
    pub channel_capacity: usize,
    /// Per-connection outbound queue depth; a full queue drops the frame
    /// and relies on the client's snapshot refresh to self-heal
    pub outbound_capacity: usize,
    /// Reconnect delay after the change listener loses its connection
    pub relay_reconnect_delay: Duration,
    /// Retry delay after the change listener fails to connect at startup —
    /// longer than the lost-connection delay, an initial failure implies a
    /// structural problem rather than a transient blip
    pub relay_initial_retry_delay: Duration,
    /// development | staging | production
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/kds".into()),
            bus_listen_addr: std::env::var("BUS_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8081".into()),
            channel_capacity: std::env::var("BUS_CHANNEL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024),
            outbound_capacity: std::env::var("CONN_OUTBOUND_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64),
            relay_reconnect_delay: Duration::from_secs(
                std::env::var("RELAY_RECONNECT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
            relay_initial_retry_delay: Duration::from_secs(
                std::env::var("RELAY_INITIAL_RETRY_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        }
    }

    /// Override the addresses that matter in tests
    pub fn with_overrides(
        database_url: impl Into<String>,
        bus_listen_addr: impl Into<String>,
    ) -> Self {
        let mut config = Self::from_env();
        config.database_url = database_url.into();
        config.bus_listen_addr = bus_listen_addr.into();
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
