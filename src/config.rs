//! Client configuration.
//!
//! Configuration comes from the environment:
//!
//! | Variable                   | Meaning                                 | Default   |
//! |----------------------------|-----------------------------------------|-----------|
//! | `BEATRIX_WS_URL`           | Server base URL (`http(s)` or `ws(s)`)  | required  |
//! | `BEATRIX_RPC_PATH`         | Path appended to the base URL           | `/api/ws` |
//! | `BEATRIX_RETRY_DELAY_MS`   | Pause between reconnect attempts        | `0`       |

use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const ENV_WS_URL: &str = "BEATRIX_WS_URL";
pub const ENV_RPC_PATH: &str = "BEATRIX_RPC_PATH";
pub const ENV_RETRY_DELAY_MS: &str = "BEATRIX_RETRY_DELAY_MS";

/// Path of the RPC endpoint on the server.
pub const DEFAULT_RPC_PATH: &str = "/api/ws";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme '{0}' (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
}

/// Settings for connecting to the RPC server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server base URL; `http(s)` is rewritten to `ws(s)`.
    pub base_url: String,
    /// Path of the RPC endpoint, appended to the base URL path.
    pub rpc_path: String,
    /// Pause between reconnect attempts. Zero retries immediately.
    pub retry_delay: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_rpc_path(mut self, rpc_path: impl Into<String>) -> Self {
        self.rpc_path = rpc_path.into();
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_WS_URL)
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_WS_URL))?;
        let mut config = Self::new(base_url.trim());

        if let Some(path) = lookup(ENV_RPC_PATH) {
            config.rpc_path = path;
        }
        if let Some(raw) = lookup(ENV_RETRY_DELAY_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                var: ENV_RETRY_DELAY_MS,
                reason: e.to_string(),
            })?;
            config.retry_delay = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// The WebSocket URL to connect to.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        endpoint_url(&self.base_url, &self.rpc_path)
    }
}

/// Derive the WebSocket endpoint from a server base URL.
///
/// `http` becomes `ws` and `https` becomes `wss`; the RPC path is appended
/// to the base path.
///
/// # Example
///
/// ```ignore
/// let url = endpoint_url("https://beatrix.local", "/api/ws")?;
/// assert_eq!(url.as_str(), "wss://beatrix.local/api/ws");
/// ```
pub fn endpoint_url(base: &str, rpc_path: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(base).map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", base, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;

    let path = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        rpc_path.trim_start_matches('/')
    );
    url.set_path(&path);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_endpoint_scheme_rewrite() {
        let cases = [
            ("http://localhost:8080", "ws://localhost:8080/api/ws"),
            ("https://beatrix.example.com", "wss://beatrix.example.com/api/ws"),
            ("HTTPS://beatrix.example.com/", "wss://beatrix.example.com/api/ws"),
            ("http://host/prefix", "ws://host/prefix/api/ws"),
            ("ws://host:1", "ws://host:1/api/ws"),
        ];
        for (base, expected) in cases {
            assert_eq!(endpoint_url(base, DEFAULT_RPC_PATH).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn test_endpoint_rejects_other_schemes() {
        assert_eq!(
            endpoint_url("ftp://host", DEFAULT_RPC_PATH),
            Err(ConfigError::UnsupportedScheme("ftp".into()))
        );
        assert!(matches!(
            endpoint_url("not a url", DEFAULT_RPC_PATH),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config =
            ClientConfig::from_lookup(lookup(&[(ENV_WS_URL, "http://localhost:8123")])).unwrap();
        assert_eq!(config, ClientConfig::new("http://localhost:8123"));
        assert_eq!(config.retry_delay, Duration::ZERO);
        assert_eq!(config.rpc_path, "/api/ws");
    }

    #[test]
    fn test_from_lookup_missing_url() {
        assert_eq!(
            ClientConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing(ENV_WS_URL))
        );
        assert_eq!(
            ClientConfig::from_lookup(lookup(&[(ENV_WS_URL, "  ")])),
            Err(ConfigError::Missing(ENV_WS_URL))
        );
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_WS_URL, "https://h"),
            (ENV_RPC_PATH, "/rpc"),
            (ENV_RETRY_DELAY_MS, "250"),
        ]))
        .unwrap();
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.endpoint().unwrap().as_str(), "wss://h/rpc");
    }

    #[test]
    fn test_from_lookup_invalid_retry_delay() {
        let err = ClientConfig::from_lookup(lookup(&[
            (ENV_WS_URL, "http://h"),
            (ENV_RETRY_DELAY_MS, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: ENV_RETRY_DELAY_MS, .. }));

        let err = ClientConfig::from_lookup(lookup(&[
            (ENV_WS_URL, "http://h"),
            (ENV_RETRY_DELAY_MS, "-5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: ENV_RETRY_DELAY_MS, .. }));
    }
}
