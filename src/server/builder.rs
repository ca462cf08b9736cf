//! Builder pattern for server configuration.
//!
//! # Example
//!
//! ```ignore
//! use wschannel::{Router, Server};
//!
//! # async fn example() -> wschannel::Result<()> {
//! let router = Router::builder()
//!     .route("/echo/:id", |_, channel| {
//!         channel.on_message(|channel, msg| {
//!             let _ = channel.send(msg);
//!         });
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let server = Server::builder().port(8080).router(router).build().await?;
//! println!("listening on {}", server.ws_url());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mux::{MessagingObserver, NoopObserver};
use crate::identifiers::ConnectionId;
use crate::router::{Router, RouterBuilder};

use super::core::{ConnectionRouterFactory, Server};
use super::options::ServerOptions;

// ============================================================================
// ServerBuilder
// ============================================================================

/// Builder for a [`Server`].
///
/// Use [`Server::builder()`] to create a new builder.
#[derive(Default)]
pub struct ServerBuilder {
    options: ServerOptions,
    router: Option<Arc<Router>>,
    connection_router: Option<ConnectionRouterFactory>,
    observer: Option<Arc<dyn MessagingObserver>>,
}

// ============================================================================
// ServerBuilder Implementation
// ============================================================================

impl ServerBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.options.bind_ip = ip;
        self
    }

    /// Sets the port, 0 for a random free port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Sets the WebSocket upgrade path.
    #[inline]
    #[must_use]
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.options.ws_path = path.into();
        self
    }

    /// Sets the keep-alive interval.
    #[inline]
    #[must_use]
    pub fn check_alive_interval(mut self, interval: Duration) -> Self {
        self.options.check_alive_interval = Some(interval);
        self
    }

    /// Sets the router for channels opened by clients.
    #[inline]
    #[must_use]
    pub fn router(mut self, router: Arc<Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Adds routes scoped to each accepted transport.
    ///
    /// The factory runs once per transport. Its routes are tried before the
    /// server router, which becomes their parent.
    #[must_use]
    pub fn connection_router<F>(mut self, factory: F) -> Self
    where
        F: Fn(ConnectionId) -> RouterBuilder + Send + Sync + 'static,
    {
        self.connection_router = Some(Arc::new(factory));
        self
    }

    /// Attaches an observer to every accepted transport.
    #[inline]
    #[must_use]
    pub fn observer(mut self, observer: impl MessagingObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Validates the configuration, binds and starts accepting.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no router is set or the options are invalid
    /// - [`Error::Io`] if binding fails
    pub async fn build(self) -> Result<Arc<Server>> {
        self.options.validate()?;

        let router = self.router.ok_or_else(|| {
            Error::config(
                "Router is required. Use .router() to set it.\n\
                 Example: Server::builder().router(Router::builder().build()?)",
            )
        })?;
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(NoopObserver) as Arc<dyn MessagingObserver>);

        Server::bind(self.options, router, self.connection_router, observer).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_requires_router() {
        let result = ServerBuilder::new().build().await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_build_validates_options() {
        let router = Router::builder().build().expect("router");
        let result = ServerBuilder::new()
            .router(router)
            .ws_path("no-slash")
            .build()
            .await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_setters() {
        let builder = ServerBuilder::new()
            .port(1234)
            .ws_path("/mux")
            .check_alive_interval(Duration::from_secs(5));
        assert_eq!(builder.options.port, 1234);
        assert!(builder.connection_router.is_none());
        assert_eq!(builder.options.ws_path, "/mux");
        assert_eq!(
            builder.options.check_alive_interval,
            Some(Duration::from_secs(5))
        );
    }
}
