//! Accepting side: one multiplexer per accepted WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                 Server                   │
//! │  accept loop ──► upgrade on ws_path      │
//! │                                          │
//! │  ConnectionId=a → Multiplexer + session  │
//! │  ConnectionId=b → Multiplexer + session  │
//! │  router per transport: connection routes │
//! │  first, then the shared server Router    │
//! └──────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::error::{Error, Result, catch_handler_panic};
use crate::identifiers::ConnectionId;
use crate::mux::{MessagingObserver, Multiplexer, Side};
use crate::protocol::CLOSE_GOING_AWAY;
use crate::router::{Router, RouterBuilder};
use crate::transport::{KeepAlive, Outbound, SessionCommand, run_session};

use super::builder::ServerBuilder;
use super::options::ServerOptions;

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Types
// ============================================================================

/// Builds the routes scoped to one accepted transport.
///
/// The server makes its own router the parent of the result, so
/// connection routes are tried first.
pub type ConnectionRouterFactory = Arc<dyn Fn(ConnectionId) -> RouterBuilder + Send + Sync>;

// ============================================================================
// ConnectionHandle
// ============================================================================

struct ConnectionHandle {
    mux: Arc<Multiplexer>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    addr: SocketAddr,
}

// ============================================================================
// Server
// ============================================================================

/// Accepts WebSocket transports and routes the channels clients open.
///
/// # Thread Safety
///
/// `Server` is `Send + Sync`; every accepted transport runs on its own
/// task and they share only the router.
pub struct Server {
    local_addr: SocketAddr,
    options: ServerOptions,
    router: Arc<Router>,
    connection_router: Option<ConnectionRouterFactory>,
    observer: Arc<dyn MessagingObserver>,
    connections: RwLock<FxHashMap<ConnectionId, ConnectionHandle>>,
    shutdown: AtomicBool,
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds the listener and spawns the accept loop.
    pub(crate) async fn bind(
        options: ServerOptions,
        router: Arc<Router>,
        connection_router: Option<ConnectionRouterFactory>,
        observer: Arc<dyn MessagingObserver>,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(SocketAddr::new(options.bind_ip, options.port)).await?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new(Self {
            local_addr,
            options,
            router,
            connection_router,
            observer,
            connections: RwLock::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        });

        let accepting = Arc::clone(&server);
        tokio::spawn(async move {
            accepting.accept_loop(listener).await;
        });

        info!(addr = %local_addr, path = %server.options.ws_path, "Server started");
        Ok(server)
    }
}

// ============================================================================
// Server - Public API
// ============================================================================

impl Server {
    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the URL clients connect to.
    ///
    /// Format: `ws://{ip}:{port}{ws_path}`
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.options.ws_path)
    }

    /// Returns the number of live transports.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns the ids of live transports.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.read().keys().copied().collect()
    }

    /// Returns the multiplexer of a live transport.
    #[must_use]
    pub fn multiplexer(&self, connection_id: ConnectionId) -> Option<Arc<Multiplexer>> {
        self.connections
            .read()
            .get(&connection_id)
            .map(|handle| Arc::clone(&handle.mux))
    }

    /// Opens a channel towards a connected client.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the transport is unknown
    /// - [`Error::ConnectionClosed`] if it is closing
    pub fn open_channel<F>(&self, connection_id: ConnectionId, path: &str, on_open: F) -> Result<Channel>
    where
        F: FnOnce(&Channel) + Send + 'static,
    {
        let mux = self
            .multiplexer(connection_id)
            .ok_or_else(|| Error::connection(format!("Unknown connection: {connection_id}")))?;
        mux.open_channel(path, on_open)
    }

    /// Closes one transport with a close frame.
    ///
    /// Returns `false` if the transport is unknown.
    pub fn close_connection(&self, connection_id: ConnectionId, code: u16, reason: &str) -> bool {
        let connections = self.connections.read();
        let Some(handle) = connections.get(&connection_id) else {
            return false;
        };
        let _ = handle.commands.send(SessionCommand::Shutdown {
            code,
            reason: reason.to_string(),
        });
        debug!(%connection_id, addr = %handle.addr, code, "Connection close requested");
        true
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stops accepting and closes every transport with code 1001.
    pub async fn shutdown(&self) {
        info!(addr = %self.local_addr, "Server shutting down");

        self.shutdown.store(true, Ordering::SeqCst);

        let connections: Vec<_> = self.connections.write().drain().collect();
        for (connection_id, handle) in connections {
            let _ = handle.commands.send(SessionCommand::Shutdown {
                code: CLOSE_GOING_AWAY,
                reason: "server shutting down".to_string(),
            });
            debug!(%connection_id, "Connection closed during shutdown");
        }

        info!("Server shutdown complete");
    }
}

// ============================================================================
// Server - Accept Loop
// ============================================================================

impl Server {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.is_shutdown() {
                debug!("Accept loop shutting down");
                break;
            }

            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    if self.is_shutdown() {
                        debug!(%addr, "Dropping connection accepted during shutdown");
                        break;
                    }
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            warn!(error = %e, %addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(%addr, "New TCP connection");

        let connection_id = ConnectionId::generate();
        let router = self.router_for(connection_id)?;

        let ws_path = self.options.ws_path.clone();
        let check_path = move |request: &Request, response: Response| -> StdResult<Response, ErrorResponse> {
            let path = request.uri().path();
            if path == ws_path {
                return Ok(response);
            }
            warn!(%addr, path = %path, "Cannot find a ws handler for the path");
            let mut rejection =
                ErrorResponse::new(Some(format!("Cannot find a ws handler for the path: {path}")));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        };

        let mut ws_stream = accept_hdr_async(stream, check_path)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let (outbound, frames_rx) = Outbound::channel(Arc::clone(&self.observer));
        let mux = Arc::new(Multiplexer::with_connection_id(
            connection_id,
            Side::Server,
            outbound,
            Some(router),
        ));
        let (commands, mut commands_rx) = mpsc::unbounded_channel();

        let handle = ConnectionHandle {
            mux: Arc::clone(&mux),
            commands,
            addr,
        };
        if !self.register(connection_id, handle) {
            debug!(%connection_id, %addr, "Refusing connection accepted during shutdown");
            let close = CloseFrame {
                code: CloseCode::from(CLOSE_GOING_AWAY),
                reason: "server shutting down".into(),
            };
            let _ = ws_stream.close(Some(close)).await;
            return Ok(());
        }

        info!(%connection_id, %addr, "WebSocket connection established");

        let keepalive = self.options.check_alive_interval.map(KeepAlive::new);
        let end = run_session(ws_stream, &mux, frames_rx, &mut commands_rx, keepalive).await;

        self.connections.write().remove(&connection_id);

        info!(
            %connection_id,
            code = end.code,
            reason = %end.reason,
            "WebSocket connection closed"
        );
        Ok(())
    }

    /// Returns the router of a new transport.
    ///
    /// With a connection router factory this is a child router whose parent
    /// is the server router.
    fn router_for(&self, connection_id: ConnectionId) -> Result<Arc<Router>> {
        let Some(factory) = &self.connection_router else {
            return Ok(Arc::clone(&self.router));
        };

        catch_handler_panic(|| factory(connection_id))?
            .parent(Arc::clone(&self.router))
            .build()
            .inspect_err(|e| error!(%connection_id, error = %e, "Connection router failed"))
    }

    /// Adds a transport to the table unless the server is shutting down.
    ///
    /// The shutdown flag is checked under the table lock, so a transport is
    /// either drained by [`shutdown`](Self::shutdown) or refused here.
    fn register(&self, connection_id: ConnectionId, handle: ConnectionHandle) -> bool {
        let mut connections = self.connections.write();
        if self.is_shutdown() {
            return false;
        }
        connections.insert(connection_id, handle);
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
