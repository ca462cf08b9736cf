//! Connecting side with automatic reconnection.
//!
//! A [`Client`] is a cheap handle to a supervisor task that owns the
//! transport:
//!
//! ```text
//! Connecting ──► Connected ──(drop)──► Reconnecting ──► Connected ...
//!      │                                    │
//!      └──────────(shutdown / give up)──────┴──► Closed
//! ```
//!
//! Channel opens requested while no transport is up are queued and sent,
//! in request order, as soon as the next transport connects. Every
//! transport gets a fresh [`Multiplexer`]; channels never survive a
//! reconnect.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::mux::{MessagingObserver, Multiplexer, Side};
use crate::protocol::CLOSE_NORMAL;
use crate::router::Router;
use crate::transport::{
    KeepAlive, OpenCallback, OpenRequest, Outbound, SessionCommand, SessionEnd, run_session,
};

use super::builder::ClientBuilder;
use super::options::{ClientOptions, ReconnectOptions};

// ============================================================================
// Types
// ============================================================================

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// First connection attempt in progress.
    Connecting,
    /// A transport is up.
    Connected,
    /// The transport dropped and the client is retrying.
    Reconnecting,
    /// Shut down or gave up; terminal.
    Closed,
}

// ============================================================================
// Client
// ============================================================================

/// Handle to a reconnecting multiplexed WebSocket client.
///
/// Clones share the same transport. The transport is closed when
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped.
#[derive(Clone)]
pub struct Client {
    url: Url,
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Constructor
// ============================================================================

impl Client {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Spawns the supervisor task.
    pub(crate) fn spawn(
        url: Url,
        options: ClientOptions,
        router: Option<Arc<Router>>,
        observer: Arc<dyn MessagingObserver>,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let supervisor = Supervisor {
            url: url.clone(),
            options,
            router,
            observer,
            commands: commands_rx,
            state: state_tx,
            pending: VecDeque::new(),
        };
        tokio::spawn(supervisor.run());

        Self {
            url,
            commands,
            state: state_rx,
        }
    }
}

// ============================================================================
// Client - Public API
// ============================================================================

impl Client {
    /// Returns the server URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the current transport state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns `true` while a transport is up.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Waits until a transport is up.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if `limit` elapses first
    /// - [`Error::ConnectionClosed`] if the client closes first
    pub async fn wait_connected(&self, limit: Duration) -> Result<()> {
        let mut state = self.state.clone();
        let reached = timeout(
            limit,
            state.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed)),
        )
        .await
        .map_err(|_| Error::connection_timeout(millis(limit)))?
        .map(|s| *s);

        match reached {
            Ok(ConnectionState::Connected) => Ok(()),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Requests a channel to the service at `path`.
    ///
    /// The open is sent on the current transport, or queued until the
    /// next one connects. `on_open` fires once the peer accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the client is closed.
    pub fn open_channel<F>(&self, path: impl Into<String>, on_open: F) -> Result<()>
    where
        F: FnOnce(&Channel) + Send + 'static,
    {
        let request = OpenRequest::new(path.into(), Box::new(on_open), None);
        self.commands
            .send(SessionCommand::Open(request))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Opens a channel and waits until the peer accepted it.
    ///
    /// A channel that is not accepted within `limit` is closed, including
    /// one whose open is still queued.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelOpenTimeout`] if `limit` elapses first
    /// - [`Error::ConnectionClosed`] if the client or the transport closes first
    pub async fn open(&self, path: &str, limit: Duration) -> Result<Channel> {
        let (ready_tx, ready_rx) = oneshot::channel::<Channel>();
        let (reply_tx, reply_rx) = oneshot::channel();

        let on_open: OpenCallback = Box::new(move |channel: &Channel| {
            if let Err(channel) = ready_tx.send(channel.clone()) {
                channel.close(CLOSE_NORMAL, "open abandoned");
            }
        });
        self.commands
            .send(SessionCommand::Open(OpenRequest::new(
                path.to_string(),
                on_open,
                Some(reply_tx),
            )))
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(limit, ready_rx).await {
            Ok(Ok(channel)) => Ok(channel),

            // The ready listener was dropped: the request was abandoned or
            // the channel closed before the peer accepted it.
            Ok(Err(_)) => match reply_rx.await {
                Ok(Err(e)) => Err(e),
                _ => Err(Error::ConnectionClosed),
            },

            Err(_) => {
                let mut reply_rx = reply_rx;
                if let Ok(Ok(channel)) = reply_rx.try_recv() {
                    channel.close(CLOSE_NORMAL, "open timed out");
                }
                warn!(path, timeout_ms = millis(limit), "Channel open timed out");
                Err(Error::channel_open_timeout(path, millis(limit)))
            }
        }
    }

    /// Closes the transport with code 1000 and stops reconnecting.
    ///
    /// Queued opens fail with [`Error::ConnectionClosed`]. Returns once the
    /// client is [`Closed`](ConnectionState::Closed).
    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown {
            code: CLOSE_NORMAL,
            reason: "client shutdown".to_string(),
        });

        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Owns the transport of one client across reconnects.
struct Supervisor {
    url: Url,
    options: ClientOptions,
    router: Option<Arc<Router>>,
    observer: Arc<dyn MessagingObserver>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    state: watch::Sender<ConnectionState>,
    /// Opens waiting for the next transport, in request order.
    pending: VecDeque<OpenRequest>,
}

impl Supervisor {
    async fn run(mut self) {
        let reconnect = self.options.reconnect;
        let mut failures: u32 = 0;

        loop {
            match self.connect().await {
                ControlFlow::Break(()) => break,

                ControlFlow::Continue(Ok(ws)) => {
                    failures = 0;
                    let end = self.serve(ws).await;
                    if end.shutdown {
                        break;
                    }
                    if !reconnect.enabled {
                        debug!(url = %self.url, "Reconnect disabled");
                        break;
                    }
                }

                ControlFlow::Continue(Err(e)) => {
                    failures = failures.saturating_add(1);
                    warn!(url = %self.url, error = %e, failures, "Connection attempt failed");

                    if !reconnect.enabled {
                        break;
                    }
                    if reconnect.max_retries.is_some_and(|max| failures > max) {
                        warn!(url = %self.url, failures, "Giving up reconnecting");
                        break;
                    }
                }
            }

            self.state.send_replace(ConnectionState::Reconnecting);
            let delay = retry_delay(&reconnect, failures);
            debug!(url = %self.url, delay_ms = millis(delay), "Reconnecting");

            if self.wait(delay).await.is_break() {
                break;
            }
        }

        self.finish();
    }

    /// Makes one connection attempt while queueing commands.
    async fn connect(&mut self) -> ControlFlow<(), Result<ClientStream>> {
        let limit = self.options.reconnect.connection_timeout;
        let attempt = timeout(limit, connect_async(self.url.to_string()));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return ControlFlow::Continue(match result {
                        Ok(Ok((ws, _response))) => Ok(ws),
                        Ok(Err(e)) => Err(Error::from(e)),
                        Err(_) => Err(Error::connection_timeout(millis(limit))),
                    });
                }

                command = self.commands.recv() => {
                    if self.enqueue(command).is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
    }

    /// Sleeps for `delay` while queueing commands.
    async fn wait(&mut self, delay: Duration) -> ControlFlow<()> {
        let delay = sleep(delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                () = &mut delay => return ControlFlow::Continue(()),

                command = self.commands.recv() => {
                    if self.enqueue(command).is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
    }

    /// Runs one transport until it closes.
    async fn serve(&mut self, ws: ClientStream) -> SessionEnd {
        let (outbound, frames_rx) = Outbound::channel(Arc::clone(&self.observer));
        let mux = Multiplexer::new(Side::Client, outbound, self.router.clone());
        let connection_id = mux.connection_id();

        self.state.send_replace(ConnectionState::Connected);
        info!(%connection_id, url = %self.url, "Connected");

        if !self.pending.is_empty() {
            debug!(%connection_id, queued = self.pending.len(), "Sending queued channel opens");
        }
        for request in self.pending.drain(..) {
            request.dispatch(&mux);
        }

        let keepalive = self.options.check_alive_interval.map(KeepAlive::new);
        let end = run_session(ws, &mux, frames_rx, &mut self.commands, keepalive).await;

        info!(
            %connection_id,
            code = end.code,
            reason = %end.reason,
            "Disconnected"
        );
        end
    }

    fn enqueue(&mut self, command: Option<SessionCommand>) -> ControlFlow<()> {
        match command {
            Some(SessionCommand::Open(request)) => {
                self.pending.push_back(request);
                ControlFlow::Continue(())
            }
            Some(SessionCommand::Shutdown { .. }) | None => ControlFlow::Break(()),
        }
    }

    fn finish(mut self) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let SessionCommand::Open(request) = command {
                self.pending.push_back(request);
            }
        }
        for request in self.pending.drain(..) {
            request.fail(Error::ConnectionClosed);
        }

        self.state.send_replace(ConnectionState::Closed);
        info!(url = %self.url, "Client closed");
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Delay before the next attempt after `failures` consecutive failed ones.
///
/// The first retry waits `min_delay` whether the transport dropped or the
/// first attempt failed.
fn retry_delay(reconnect: &ReconnectOptions, failures: u32) -> Duration {
    reconnect.delay_for_attempt(failures.saturating_sub(1))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use tokio::net::TcpListener;
    use tracing_subscriber::EnvFilter;

    use crate::protocol::CLOSE_GOING_AWAY;
    use crate::server::Server;

    #[derive(Clone)]
    struct Accepted {
        path: String,
        param: Option<String>,
        channel: Channel,
    }

    type Log = Arc<Mutex<Vec<Accepted>>>;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn router(log: &Log) -> Arc<Router> {
        let echo_log = Arc::clone(log);
        let svc_log = Arc::clone(log);

        Router::builder()
            .route("/echo/:id", move |params, channel| {
                echo_log.lock().push(Accepted {
                    path: channel.path().unwrap_or_default(),
                    param: params.get("id").map(str::to_string),
                    channel: channel.clone(),
                });
                channel.on_message(|channel, content| {
                    let reply = if content == "ping" { "pong" } else { content };
                    let _ = channel.send(reply);
                });
                Ok(())
            })
            .route("/svc/:n", move |params, channel| {
                svc_log.lock().push(Accepted {
                    path: channel.path().unwrap_or_default(),
                    param: params.get("n").map(str::to_string),
                    channel: channel.clone(),
                });
                Ok(())
            })
            .build()
            .expect("router")
    }

    async fn start_server(port: u16, log: &Log) -> Arc<Server> {
        for _ in 0..50 {
            match Server::builder().port(port).router(router(log)).build().await {
                Ok(server) => return server,
                Err(_) => sleep(Duration::from_millis(20)).await,
            }
        }
        panic!("could not bind port {port}");
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr").port()
    }

    fn fast_reconnect() -> ReconnectOptions {
        ReconnectOptions::new()
            .with_min_delay(Duration::from_millis(20))
            .with_max_delay(Duration::from_millis(100))
            .with_connection_timeout(Duration::from_millis(500))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..250 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_first_retry_waits_min_delay() {
        let reconnect = ReconnectOptions::new();
        assert_eq!(retry_delay(&reconnect, 0), Duration::from_millis(1000));
        assert_eq!(retry_delay(&reconnect, 1), Duration::from_millis(1000));
        assert_eq!(retry_delay(&reconnect, 2).as_millis(), 1300);
        assert_eq!(retry_delay(&reconnect, 3).as_millis(), 1690);
    }

    #[tokio::test]
    async fn test_open_and_exchange_messages() {
        init_tracing();
        let log = Log::default();
        let server = start_server(0, &log).await;
        let client = Client::builder().url(server.ws_url()).build().expect("client");

        let channel = client
            .open("/echo/42", Duration::from_secs(2))
            .await
            .expect("open");
        assert!(channel.is_open());

        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.on_message(move |_, content| {
            let _ = tx.send(content.to_string());
        });
        channel.send("ping").expect("send");

        let reply = timeout(Duration::from_secs(2), rx.recv()).await.expect("reply");
        assert_eq!(reply.as_deref(), Some("pong"));

        let accepted = log.lock().clone();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].path, "/echo/42");
        assert_eq!(accepted[0].param.as_deref(), Some("42"));
        assert!(accepted[0].channel.is_open());

        client.shutdown().await;
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(channel.is_closed());
        assert_eq!(channel.close_event().map(|e| e.code), Some(CLOSE_NORMAL));

        wait_until(|| accepted[0].channel.is_closed()).await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_replays_queued_opens_in_order() {
        init_tracing();
        let log = Log::default();
        let first = start_server(0, &log).await;
        let port = first.port();

        let client = Client::builder()
            .url(first.ws_url())
            .reconnect(fast_reconnect())
            .build()
            .expect("client");
        client
            .wait_connected(Duration::from_secs(2))
            .await
            .expect("connected");

        first.shutdown().await;
        wait_until(|| !client.is_connected()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        for n in 1..=3 {
            let tx = tx.clone();
            client
                .open_channel(format!("/svc/{n}"), move |channel| {
                    let _ = tx.send(channel.path());
                })
                .expect("queued");
        }

        let second = start_server(port, &log).await;

        for expected in ["/svc/1", "/svc/2", "/svc/3"] {
            let opened = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("on_open fired");
            assert_eq!(opened, Some(Some(expected.to_string())));
        }

        let paths: Vec<_> = log.lock().iter().map(|a| a.path.clone()).collect();
        assert_eq!(paths, ["/svc/1", "/svc/2", "/svc/3"]);
        assert!(client.is_connected());

        client.shutdown().await;
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_transport_drop_closes_channels() {
        init_tracing();
        let log = Log::default();
        let server = start_server(0, &log).await;
        let client = Client::builder()
            .url(server.ws_url())
            .without_reconnect()
            .build()
            .expect("client");

        let events = Arc::new(Mutex::new(Vec::new()));
        for id in 1..=3 {
            let channel = client
                .open(&format!("/echo/{id}"), Duration::from_secs(2))
                .await
                .expect("open");
            let events = Arc::clone(&events);
            channel.on_close(move |event| events.lock().push(event.clone()));
        }

        server.shutdown().await;
        wait_until(|| events.lock().len() == 3).await;

        for event in events.lock().iter() {
            assert_eq!(event.code, CLOSE_GOING_AWAY);
            assert_eq!(event.reason, "server shutting down");
        }
        wait_until(|| client.state() == ConnectionState::Closed).await;
    }

    #[tokio::test]
    async fn test_open_times_out_when_unrouted() {
        init_tracing();
        let log = Log::default();
        let server = start_server(0, &log).await;
        let client = Client::builder().url(server.ws_url()).build().expect("client");

        let result = client.open("/missing", Duration::from_millis(200)).await;
        assert!(matches!(
            result,
            Err(Error::ChannelOpenTimeout { timeout_ms: 200, .. })
        ));
        assert!(log.lock().is_empty());

        client.shutdown().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_fails_queued_opens() {
        init_tracing();
        let port = unused_port().await;
        let client = Client::builder()
            .url(format!("ws://127.0.0.1:{port}/services"))
            .reconnect(fast_reconnect())
            .build()
            .expect("client");

        let opener = client.clone();
        let pending =
            tokio::spawn(async move { opener.open("/echo/1", Duration::from_secs(10)).await });
        sleep(Duration::from_millis(100)).await;

        client.shutdown().await;

        let result = timeout(Duration::from_secs(2), pending)
            .await
            .expect("open resolved")
            .expect("join");
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert!(client.open_channel("/echo/2", |_| {}).is_err());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        init_tracing();
        let port = unused_port().await;
        let client = Client::builder()
            .url(format!("ws://127.0.0.1:{port}/services"))
            .reconnect(fast_reconnect().with_max_retries(2))
            .build()
            .expect("client");

        let result = client.wait_connected(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
