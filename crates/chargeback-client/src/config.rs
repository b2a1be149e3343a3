use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";
pub const DEFAULT_SOCKET_PATH: &str = "socket.io";
pub const DEFAULT_CHUNK_BYTES: usize = 1024 * 1024;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Client configuration shared by the HTTP bootstrap calls and the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Endpoint root for both HTTP and the socket.io handshake.
    pub base_url: String,
    /// Path segment the socket.io server is mounted on.
    pub socket_path: String,
    /// `None` waits for the connect acknowledgement indefinitely.
    pub handshake_timeout: Option<Duration>,
    /// Upload slice size in bytes.
    pub chunk_bytes: usize,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let base_url =
            env::var("CHARGEBACK_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let socket_path =
            env::var("CHARGEBACK_SOCKET_PATH").unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_string());
        let handshake_timeout = match env::var("CHARGEBACK_HANDSHAKE_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_HANDSHAKE_TIMEOUT),
        };
        let chunk_bytes = env::var("CHARGEBACK_CHUNK_BYTES")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .filter(|bytes| *bytes > 0)
            .unwrap_or(DEFAULT_CHUNK_BYTES);

        Self {
            base_url,
            socket_path,
            handshake_timeout,
            chunk_bytes,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes;
        self
    }

    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Base URL without a trailing slash, ready for `format!("{}/...")`.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // env vars are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 4] = [
        "CHARGEBACK_BASE_URL",
        "CHARGEBACK_SOCKET_PATH",
        "CHARGEBACK_HANDSHAKE_TIMEOUT_SECS",
        "CHARGEBACK_CHUNK_BYTES",
    ];

    fn clear_vars() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_match_the_service_layout() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:5000");
        assert_eq!(config.socket_path, "socket.io");
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(20)));
        assert_eq!(config.chunk_bytes, 1024 * 1024);
    }

    #[test]
    fn from_env_reads_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        env::set_var("CHARGEBACK_BASE_URL", "http://claims.internal:5001/");
        env::set_var("CHARGEBACK_HANDSHAKE_TIMEOUT_SECS", "3");
        env::set_var("CHARGEBACK_CHUNK_BYTES", "4096");

        let config = ClientConfig::from_env();
        assert_eq!(config.base_url(), "http://claims.internal:5001");
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.chunk_bytes, 4096);
        clear_vars();
    }

    #[test]
    fn zero_timeout_means_unbounded_and_zero_chunk_is_ignored() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        env::set_var("CHARGEBACK_HANDSHAKE_TIMEOUT_SECS", "0");
        env::set_var("CHARGEBACK_CHUNK_BYTES", "0");

        let config = ClientConfig::from_env();
        assert_eq!(config.handshake_timeout, None);
        assert_eq!(config.chunk_bytes, DEFAULT_CHUNK_BYTES);
        clear_vars();
    }
}
