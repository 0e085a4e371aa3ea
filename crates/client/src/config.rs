//! Client configuration from environment variables.

use std::time::Duration;

use url::Url;

use crate::error::ClientError;

const DEFAULT_URL: &str = "http://localhost:5240/MAAS/";
const DEFAULT_RETRY_MS: u64 = 5000;

/// Where and how to reach the websocket endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the page the client is served from.
    pub base_url: Url,
    /// Overrides the port of `base_url` when set.
    pub port: Option<u16>,
    /// CSRF token passed as the `csrftoken` query parameter.
    pub csrf_token: Option<String>,
    /// Fixed delay between a close and the next connection attempt.
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_URL).expect("default url is valid"),
            port: None,
            csrf_token: None,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_MS),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("invalid base url {}: {}", base_url, e)))?;
        Ok(Self {
            base_url,
            ..Self::default()
        })
    }

    /// Read the configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LIVESYNC_URL`: page base URL (default: "http://localhost:5240/MAAS/")
    /// - `LIVESYNC_PORT`: port override
    /// - `LIVESYNC_CSRF_TOKEN`: CSRF token for the websocket handshake
    /// - `LIVESYNC_RETRY_MS`: reconnect delay in milliseconds (default: 5000)
    pub fn from_env() -> Result<Self, ClientError> {
        let url = std::env::var("LIVESYNC_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let mut config = Self::new(&url)?;

        if let Ok(port) = std::env::var("LIVESYNC_PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|_| ClientError::Config(format!("invalid LIVESYNC_PORT {:?}", port)))?;
            config.port = Some(port);
        }

        config.csrf_token = std::env::var("LIVESYNC_CSRF_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        if let Ok(retry) = std::env::var("LIVESYNC_RETRY_MS") {
            let ms = retry.parse::<u64>().map_err(|_| {
                ClientError::Config(format!("invalid LIVESYNC_RETRY_MS {:?}", retry))
            })?;
            config.retry_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Derive the websocket URL: same host and path as the page with `ws`
    /// appended, `http` switched to `ws` (`https` to `wss`), the optional
    /// port override applied and the CSRF token in the query string.
    pub fn websocket_url(&self) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ClientError::Config(format!(
                    "unsupported url scheme {:?}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Config(format!("cannot use scheme {}", scheme)))?;

        if let Some(port) = self.port {
            url.set_port(Some(port))
                .map_err(|_| ClientError::Config(format!("cannot set port {}", port)))?;
        }

        let path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/ws", path));
        url.set_fragment(None);
        url.set_query(None);
        if let Some(token) = &self.csrf_token {
            url.query_pairs_mut().append_pair("csrftoken", token);
        }

        Ok(url)
    }
}
