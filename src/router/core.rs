//! Route table and dispatch of newly opened channels.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::channel::Channel;
use crate::error::{Result, catch_handler_panic};

use super::{PathParams, RoutePattern};

// ============================================================================
// Types
// ============================================================================

/// Services a channel whose path matched a route.
///
/// The handler usually registers listeners and may call
/// [`Channel::ready`] itself; if it does not, the multiplexer does once
/// the handler returns `Ok`.
pub type ChannelHandler = Arc<dyn Fn(&PathParams, &Channel) -> Result<()> + Send + Sync>;

/// Opaque token for a registered route, scoped to its router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(usize);

struct Route {
    pattern: RoutePattern,
    handler: ChannelHandler,
}

// ============================================================================
// Router
// ============================================================================

/// Ordered route table with optional parent delegation.
///
/// Routes are tried in registration order and the first successful
/// handler wins, regardless of how specific later patterns are.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    parent: Option<Arc<Router>>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field(
                "routes",
                &self.routes.iter().map(|r| r.pattern.as_str()).collect::<Vec<_>>(),
            )
            .field("parent", &self.parent)
            .finish()
    }
}

impl Router {
    /// Creates an empty router.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty router that delegates unmatched paths to `parent`.
    #[inline]
    #[must_use]
    pub fn with_parent(parent: Arc<Router>) -> Self {
        Self {
            routes: Vec::new(),
            parent: Some(parent),
        }
    }

    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Registers a route.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRoute`](crate::Error::InvalidRoute) if the
    /// pattern does not compile.
    pub fn register<F>(&mut self, pattern: &str, handler: F) -> Result<RouteId>
    where
        F: Fn(&PathParams, &Channel) -> Result<()> + Send + Sync + 'static,
    {
        self.register_handler(pattern, Arc::new(handler))
    }

    fn register_handler(&mut self, pattern: &str, handler: ChannelHandler) -> Result<RouteId> {
        let pattern = RoutePattern::parse(pattern)?;
        let id = RouteId(self.routes.len());
        trace!(pattern = %pattern, "Route registered");
        self.routes.push(Route { pattern, handler });
        Ok(id)
    }

    /// Returns the number of local routes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if there are no local routes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Returns the first local route matching `path`, with its parameters.
    ///
    /// Parents are not consulted; their route ids are not comparable.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<(RouteId, PathParams)> {
        self.routes
            .iter()
            .enumerate()
            .find_map(|(i, route)| route.pattern.matches(path).map(|p| (RouteId(i), p)))
    }

    /// Builds the concrete path of a local route for a set of parameters.
    #[must_use]
    pub fn reverse(&self, route: RouteId, params: &PathParams) -> Option<String> {
        self.routes.get(route.0)?.pattern.reverse(params)
    }

    /// Hands a newly opened channel to the first route that accepts it.
    ///
    /// Local routes are tried in order, then the parent. A handler that
    /// fails or panics is logged and the next candidate is tried.
    ///
    /// Returns the concrete path the winning route resolved to.
    pub fn route(&self, path: &str, channel: &Channel) -> Option<String> {
        for route in &self.routes {
            let Some(params) = route.pattern.matches(path) else {
                continue;
            };

            match catch_handler_panic(|| (route.handler)(&params, channel)) {
                Ok(Ok(())) => {
                    let resolved = route
                        .pattern
                        .reverse(&params)
                        .unwrap_or_else(|| path.to_string());
                    debug!(
                        channel_id = %channel.id(),
                        pattern = %route.pattern,
                        path = %resolved,
                        "Channel routed"
                    );
                    return Some(resolved);
                }
                Ok(Err(e)) | Err(e) => {
                    error!(
                        channel_id = %channel.id(),
                        pattern = %route.pattern,
                        error = %e,
                        "Channel handler failed"
                    );
                }
            }
        }

        self.parent.as_ref().and_then(|parent| parent.route(path, channel))
    }
}

// ============================================================================
// RouterBuilder
// ============================================================================

/// Assembles an immutable [`Router`].
///
/// # Example
///
/// ```ignore
/// let router = Router::builder()
///     .route("/echo/:id", |_params, channel| {
///         channel.on_message(|channel, msg| {
///             let _ = channel.send(msg);
///         });
///         Ok(())
///     })
///     .build()?;
/// ```
#[derive(Default)]
pub struct RouterBuilder {
    routes: Vec<(String, ChannelHandler)>,
    parent: Option<Arc<Router>>,
}

impl RouterBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route. Order of calls is match order.
    #[must_use]
    pub fn route<F>(mut self, pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&PathParams, &Channel) -> Result<()> + Send + Sync + 'static,
    {
        self.routes.push((pattern.into(), Arc::new(handler)));
        self
    }

    /// Delegates unmatched paths to `parent`.
    #[must_use]
    pub fn parent(mut self, parent: Arc<Router>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Compiles every pattern.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::InvalidRoute`](crate::Error::InvalidRoute).
    pub fn build(self) -> Result<Arc<Router>> {
        let mut router = Router {
            routes: Vec::with_capacity(self.routes.len()),
            parent: self.parent,
        };
        for (pattern, handler) in self.routes {
            router.register_handler(&pattern, handler)?;
        }
        Ok(Arc::new(router))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::error::Error;
    use crate::identifiers::ChannelId;
    use crate::transport::Outbound;

    fn channel() -> Channel {
        let (outbound, _rx) = Outbound::unobserved();
        Channel::new(ChannelId::new(1), outbound)
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> ChannelHandler {
        let log = Arc::clone(log);
        Arc::new(move |_: &PathParams, _: &Channel| {
            log.lock().push(name.to_string());
            Ok(())
        })
    }

    #[test]
    fn test_first_match_wins_regardless_of_specificity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        router
            .register_handler("/a/:x", recorder(&log, "param"))
            .expect("route");
        router
            .register_handler("/a/fixed", recorder(&log, "fixed"))
            .expect("route");

        let resolved = router.route("/a/fixed", &channel());

        assert_eq!(resolved.as_deref(), Some("/a/fixed"));
        assert_eq!(*log.lock(), vec!["param"]);
        assert_eq!(router.matches("/a/fixed").map(|(id, _)| id), Some(RouteId(0)));
    }

    #[test]
    fn test_handler_receives_params() {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let router = Router::builder()
            .route("/echo/:id", move |params, _| {
                *slot.lock() = params.get("id").map(str::to_string);
                Ok(())
            })
            .build()
            .expect("router");

        assert_eq!(router.route("/echo/42", &channel()).as_deref(), Some("/echo/42"));
        assert_eq!(seen.lock().as_deref(), Some("42"));
    }

    #[test]
    fn test_failing_handler_falls_through() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fallback = recorder(&log, "fallback");
        let router = Router::builder()
            .route("/svc/:name", |_, _| Err(Error::handler("refused")))
            .route("/svc/:other", move |p, c| fallback(p, c))
            .build()
            .expect("router");

        assert!(router.route("/svc/x", &channel()).is_some());
        assert_eq!(*log.lock(), vec!["fallback"]);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let router = Router::builder()
            .route("/boom", |_, _| panic!("handler bug"))
            .build()
            .expect("router");

        assert!(router.route("/boom", &channel()).is_none());
    }

    #[test]
    fn test_parent_delegation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parent_handler = recorder(&log, "parent");
        let child_handler = recorder(&log, "child");

        let parent = Router::builder()
            .route("/shared", move |p, c| parent_handler(p, c))
            .route("/base/:id", |_, _| Ok(()))
            .build()
            .expect("parent");
        let child = Router::builder()
            .route("/shared", move |p, c| child_handler(p, c))
            .parent(parent)
            .build()
            .expect("child");

        assert!(child.route("/shared", &channel()).is_some());
        assert_eq!(child.route("/base/7", &channel()).as_deref(), Some("/base/7"));
        assert!(child.route("/nowhere", &channel()).is_none());
        assert_eq!(*log.lock(), vec!["child"]);
    }

    #[test]
    fn test_invalid_pattern_fails_build() {
        let result = Router::builder().route("no-slash", |_, _| Ok(())).build();
        assert!(matches!(result, Err(Error::InvalidRoute { .. })));
    }

    #[test]
    fn test_reverse_by_route_id() {
        let mut router = Router::new();
        let id = router.register("/users/:id", |_, _| Ok(())).expect("route");
        let params: PathParams = [("id", "9")].into_iter().collect();

        assert_eq!(router.reverse(id, &params).as_deref(), Some("/users/9"));
        assert_eq!(router.len(), 1);
    }
}
