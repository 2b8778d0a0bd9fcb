//! Client configuration: endpoint addresses and protocol timings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default HTTP origin of the dashboard backend.
pub const DEFAULT_API_ORIGIN: &str = "http://localhost:8000";
/// Default console endpoint path.
pub const DEFAULT_CONSOLE_PATH: &str = "/ws/console/";
/// Default notification endpoint path.
pub const DEFAULT_NOTIFICATIONS_PATH: &str = "/ws/notifications/";

/// Query parameter naming the target container on the console endpoint.
const CONTAINER_PARAM: &str = "container";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid origin {origin:?}: {source}")]
    InvalidOrigin {
        origin: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Unsupported origin scheme: {0}")]
    UnsupportedScheme(String),
}

/// Protocol timings, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Delay between connecting and the first computed resize.
    pub settle_delay_ms: u64,
    /// Trailing retry after a window resize.
    pub resize_debounce_ms: u64,
    /// Delay between an unsolicited close and the next notification connect.
    pub reconnect_delay_ms: u64,
    /// Consecutive reconnect attempts before the notification client gives up.
    pub max_reconnect_attempts: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 250,
            resize_debounce_ms: 100,
            reconnect_delay_ms: 3000,
            max_reconnect_attempts: 10,
        }
    }
}

impl Timings {
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    #[must_use]
    pub const fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Where the clients connect and how they pace themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP(S) origin of the backend; the WebSocket origin is derived from it.
    pub api_origin: String,
    /// Path of the console endpoint.
    pub console_path: String,
    /// Path of the notification endpoint.
    pub notifications_path: String,
    /// Protocol timings.
    pub timings: Timings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_origin: DEFAULT_API_ORIGIN.to_string(),
            console_path: DEFAULT_CONSOLE_PATH.to_string(),
            notifications_path: DEFAULT_NOTIFICATIONS_PATH.to_string(),
            timings: Timings::default(),
        }
    }
}

impl ClientConfig {
    /// Build from `DEVBOX_*` environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    ///
    /// Recognised keys: `DEVBOX_API_ORIGIN`, `DEVBOX_CONSOLE_PATH`,
    /// `DEVBOX_NOTIFICATIONS_PATH`. Empty values count as unset.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            api_origin: get("DEVBOX_API_ORIGIN")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_origin),
            console_path: get("DEVBOX_CONSOLE_PATH").unwrap_or(defaults.console_path),
            notifications_path: get("DEVBOX_NOTIFICATIONS_PATH")
                .unwrap_or(defaults.notifications_path),
            timings: defaults.timings,
        }
    }

    /// WebSocket origin derived from the HTTP origin (`http→ws`, `https→wss`).
    ///
    /// A path prefix on the origin is kept, without its trailing slash.
    ///
    /// # Errors
    /// Returns error if the origin does not parse or has an unsupported scheme.
    pub fn ws_origin(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.api_origin).map_err(|source| ConfigError::InvalidOrigin {
            origin: self.api_origin.clone(),
            source,
        })?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&prefix);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    /// Console endpoint for one container.
    ///
    /// The container id is the only query parameter; credentials never
    /// appear in the address.
    ///
    /// # Errors
    /// Returns error if the origin is invalid.
    pub fn console_url(&self, container_id: &str) -> Result<Url, ConfigError> {
        let mut url = self.endpoint(&self.console_path)?;
        url.query_pairs_mut()
            .append_pair(CONTAINER_PARAM, container_id);
        Ok(url)
    }

    /// Notification endpoint.
    ///
    /// # Errors
    /// Returns error if the origin is invalid.
    pub fn notifications_url(&self) -> Result<Url, ConfigError> {
        self.endpoint(&self.notifications_path)
    }

    /// `path` appended to the origin's path prefix.
    fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        let mut url = self.ws_origin()?;
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_timings() {
        let timings = Timings::default();
        assert_eq!(timings.settle_delay(), Duration::from_millis(250));
        assert_eq!(timings.resize_debounce(), Duration::from_millis(100));
        assert_eq!(timings.reconnect_delay(), Duration::from_millis(3000));
        assert_eq!(timings.max_reconnect_attempts, 10);
    }

    #[test]
    fn test_console_url_carries_only_container() {
        let config = ClientConfig::default();
        let url = config.console_url("c1").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/console/?container=c1");
        assert_eq!(url.query_pairs().count(), 1);
    }

    #[test]
    fn test_console_url_encodes_container() {
        let config = ClientConfig::default();
        let url = config.console_url("a b&c").unwrap();
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "container");
        assert_eq!(pairs[0].1, "a b&c");
    }

    #[test]
    fn test_https_origin_becomes_wss() {
        let config = ClientConfig {
            api_origin: "https://dash.example.com".to_string(),
            ..ClientConfig::default()
        };
        let url = config.notifications_url().unwrap();
        assert_eq!(url.as_str(), "wss://dash.example.com/ws/notifications/");
        assert!(url.query().is_none());
    }

    #[test]
    fn test_origin_path_prefix_is_kept() {
        let config = ClientConfig {
            api_origin: "https://dash.example.com/devbox".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.console_url("c1").unwrap().as_str(),
            "wss://dash.example.com/devbox/ws/console/?container=c1"
        );
        assert_eq!(
            config.notifications_url().unwrap().as_str(),
            "wss://dash.example.com/devbox/ws/notifications/"
        );

        let nested = ClientConfig {
            api_origin: "http://10.0.0.2:8000/a/b/".to_string(),
            console_path: "ws/console/".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(
            nested.console_url("x").unwrap().as_str(),
            "ws://10.0.0.2:8000/a/b/ws/console/?container=x"
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let config = ClientConfig {
            api_origin: "ftp://example.com".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.ws_origin(),
            Err(ConfigError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn test_invalid_origin() {
        let config = ClientConfig {
            api_origin: "not a url".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.ws_origin(),
            Err(ConfigError::InvalidOrigin { .. })
        ));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DEVBOX_API_ORIGIN", "https://box.internal:9443/"),
            ("DEVBOX_CONSOLE_PATH", ""),
        ]);
        let config = ClientConfig::from_lookup(|k| vars.get(k).map(ToString::to_string));

        assert_eq!(config.api_origin, "https://box.internal:9443");
        assert_eq!(config.console_path, DEFAULT_CONSOLE_PATH);
        assert_eq!(
            config.console_url("x").unwrap().as_str(),
            "wss://box.internal:9443/ws/console/?container=x"
        );
    }

    #[test]
    fn test_partial_json_config() {
        let json = r#"{"api_origin":"http://10.0.0.2:8000","timings":{"reconnect_delay_ms":500}}"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.notifications_path, DEFAULT_NOTIFICATIONS_PATH);
        assert_eq!(config.timings.reconnect_delay_ms, 500);
        assert_eq!(config.timings.settle_delay_ms, 250);
    }
}
