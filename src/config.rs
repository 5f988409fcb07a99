use std::net::SocketAddr;
use std::time::Duration;

/// Default listen address for the server's rebindable endpoint.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:4242";
/// Default port announced in `migrate` messages.
pub const DEFAULT_ANNOUNCE_PORT: u16 = 5243;
/// Default control-stream keep-alive period, applied by the caller to its
/// QUIC configuration.
pub const DEFAULT_KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(2);
/// Default window a migrate announcement waits for its acknowledgement.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(800);
/// Default address of the client's out-of-band commit listener.
pub const DEFAULT_COMMIT_LISTEN_ADDR: &str = "127.0.0.1:7360";

/// Server-side shim settings.
///
/// # Examples
///
/// ```rust
/// use quicshim::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::new()
///     .with_announce("10.0.0.2", 5243)
///     .with_ack_timeout(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the rebindable endpoint binds to.
    pub listen_addr: SocketAddr,
    /// Host pushed to clients in `migrate` announcements.
    pub announce_addr: String,
    /// Port pushed to clients in `migrate` announcements.
    pub announce_port: u16,
    /// Keep-alive period for the caller's QUIC configuration, so the control
    /// stream stays warm through NATs during the blackout window.
    pub keep_alive_period: Duration,
    /// How long a migrate broadcast waits for each acknowledgement.
    pub ack_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: parse_listen_addr(DEFAULT_LISTEN_ADDR)
                .unwrap_or(SocketAddr::from(([0, 0, 0, 0], 4242))),
            announce_addr: "127.0.0.1".to_string(),
            announce_port: DEFAULT_ANNOUNCE_PORT,
            keep_alive_period: DEFAULT_KEEP_ALIVE_PERIOD,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `LISTEN_ADDR`, `MIGRATE_ADDR`, `MIGRATE_PORT` and
    /// `ACK_TIMEOUT_MS`, falling back to the defaults for anything unset or
    /// unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(addr) = env_var("LISTEN_ADDR").and_then(|v| parse_listen_addr(&v)) {
            config.listen_addr = addr;
        }
        if let Some(addr) = env_var("MIGRATE_ADDR") {
            config.announce_addr = addr;
        }
        if let Some(port) = env_var("MIGRATE_PORT").and_then(|v| v.parse().ok()) {
            config.announce_port = port;
        }
        if let Some(ms) = env_var("ACK_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.ack_timeout = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_announce(mut self, addr: impl Into<String>, port: u16) -> Self {
        self.announce_addr = addr.into();
        self.announce_port = port;
        self
    }

    pub fn with_keep_alive_period(mut self, period: Duration) -> Self {
        self.keep_alive_period = period;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }
}

/// Client-side shim settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identifier sent in the control stream's `hello`.
    pub client_id: String,
    /// Local address of the out-of-band commit listener.
    pub commit_listen_addr: SocketAddr,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "client".to_string(),
            commit_listen_addr: parse_listen_addr(DEFAULT_COMMIT_LISTEN_ADDR)
                .unwrap_or(SocketAddr::from(([127, 0, 0, 1], 7360))),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `CLIENT_ID` and `COMMIT_LISTEN_ADDR`, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(id) = env_var("CLIENT_ID") {
            config.client_id = id;
        }
        if let Some(addr) = env_var("COMMIT_LISTEN_ADDR").and_then(|v| parse_listen_addr(&v)) {
            config.commit_listen_addr = addr;
        }
        config
    }

    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    pub fn with_commit_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.commit_listen_addr = addr;
        self
    }
}

fn env_var(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        }
        Err(_) => None,
    }
}

/// Parses a listen address, additionally accepting the bare `:port` form
/// operators tend to write, which binds all IPv4 interfaces.
fn parse_listen_addr(s: &str) -> Option<SocketAddr> {
    let s = s.trim();
    if let Some(port) = s.strip_prefix(':') {
        return format!("0.0.0.0:{port}").parse().ok();
    }
    s.parse().ok()
}
