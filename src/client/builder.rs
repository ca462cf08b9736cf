//! Builder pattern for client configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wschannel::{Client, ReconnectOptions};
//!
//! # async fn example() -> wschannel::Result<()> {
//! let client = Client::builder()
//!     .url("ws://127.0.0.1:8080/services")
//!     .reconnect(ReconnectOptions::new().with_max_retries(5))
//!     .build()?;
//!
//! let channel = client.open("/echo/42", Duration::from_secs(5)).await?;
//! channel.send("ping")?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::mux::{MessagingObserver, NoopObserver};
use crate::router::Router;

use super::core::Client;
use super::options::{ClientOptions, ReconnectOptions};

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for a [`Client`].
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Default)]
pub struct ClientBuilder {
    url: Option<String>,
    options: ClientOptions,
    router: Option<Arc<Router>>,
    observer: Option<Arc<dyn MessagingObserver>>,
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server URL (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Replaces all options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the reconnection policy.
    #[inline]
    #[must_use]
    pub fn reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.options.reconnect = reconnect;
        self
    }

    /// Disables reconnection.
    #[inline]
    #[must_use]
    pub fn without_reconnect(mut self) -> Self {
        self.options.reconnect.enabled = false;
        self
    }

    /// Enables client side keep-alive pings.
    #[inline]
    #[must_use]
    pub fn check_alive_interval(mut self, interval: Duration) -> Self {
        self.options.check_alive_interval = Some(interval);
        self
    }

    /// Sets the router for channels the server opens towards this client.
    #[inline]
    #[must_use]
    pub fn router(mut self, router: Arc<Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Attaches an observer to every transport of the client.
    #[inline]
    #[must_use]
    pub fn observer(mut self, observer: impl MessagingObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Validates the configuration and starts connecting in the background.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is missing, malformed or not a
    /// WebSocket URL, or if the options are invalid.
    pub fn build(self) -> Result<Client> {
        self.options.validate()?;

        let raw = self.url.ok_or_else(|| {
            Error::config(
                "URL is required. Use .url() to set it.\n\
                 Example: Client::builder().url(\"ws://127.0.0.1:8080/services\")",
            )
        })?;
        let url = parse_ws_url(&raw)?;
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(NoopObserver) as Arc<dyn MessagingObserver>);

        Ok(Client::spawn(url, self.options, self.router, observer))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_ws_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::config(format!("Invalid URL '{raw}': {e}")))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(Error::config(format!(
            "Unsupported URL scheme '{scheme}', expected ws or wss"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ws_url() {
        assert!(parse_ws_url("ws://127.0.0.1:8080/services").is_ok());
        assert!(parse_ws_url("wss://example.com/services").is_ok());
        assert!(matches!(
            parse_ws_url("http://example.com"),
            Err(Error::Config { .. })
        ));
        assert!(matches!(parse_ws_url("not a url"), Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_build_requires_url() {
        let result = ClientBuilder::new().build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_build_validates_options() {
        let result = ClientBuilder::new()
            .url("ws://127.0.0.1:1/services")
            .reconnect(ReconnectOptions::new().with_grow_factor(0.0))
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_setters() {
        let builder = ClientBuilder::new()
            .url("ws://localhost/services")
            .without_reconnect()
            .check_alive_interval(Duration::from_secs(5));
        assert_eq!(builder.url.as_deref(), Some("ws://localhost/services"));
        assert!(!builder.options.reconnect.enabled);
        assert_eq!(
            builder.options.check_alive_interval,
            Some(Duration::from_secs(5))
        );
    }
}
