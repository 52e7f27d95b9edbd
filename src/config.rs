//! Room configuration
//!
//! Timeouts, reconnect policy and buffer sizes for one `Room`.

use std::time::Duration;

/// Default server port (plain TCP, no TLS)
pub const DEFAULT_PORT: u16 = 443;

/// Domain appended to the shard host prefix
pub const DEFAULT_SERVICE_DOMAIN: &str = "chatango.com";

/// Bound on opening the socket
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on each handshake wait (join, auth, presence sync)
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the graceful close before the connection is aborted
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Fixed delay before each reconnect attempt (no backoff)
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Outbound silence after which an empty keepalive frame is sent
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Published messages kept for lookup and deletion
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Capacity of the event channel handed to the caller
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for a `Room`
///
/// # Example
/// ```
/// use std::time::Duration;
/// use chatango_client::RoomConfig;
///
/// let config = RoomConfig::default()
///     .with_reconnect_delay(Duration::from_secs(2))
///     .with_auto_reconnect(false);
/// assert!(!config.auto_reconnect);
/// ```
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub port: u16,
    pub service_domain: String,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Reconnect after a transport close or handshake timeout
    pub auto_reconnect: bool,
    pub keepalive_interval: Duration,
    pub cache_capacity: usize,
    /// Values below 1 are clamped to 1
    pub event_channel_capacity: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            service_domain: DEFAULT_SERVICE_DOMAIN.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            auto_reconnect: true,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl RoomConfig {
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_service_domain(mut self, domain: impl Into<String>) -> Self {
        self.service_domain = domain.into();
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Clamped to at least 1
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}
