//! Per-transport event loop.
//!
//! One task owns the socket of a transport and runs [`run_session`]:
//!
//! - Incoming text messages go to the [`Multiplexer`]
//! - Frames queued through [`Outbound`](super::Outbound) are written in order
//! - The optional keep-alive ticker pings the peer or terminates it
//! - Commands from the owning client or server open channels or shut down
//!
//! When the loop ends, every channel of the transport is closed with the
//! transport's close code and reason.

// ============================================================================
// Imports
// ============================================================================

use std::future;
use std::str;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, trace, warn};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::mux::Multiplexer;
use crate::protocol::{CLOSE_ABNORMAL, CLOSE_NORMAL, Frame};

use super::{KeepAlive, Liveness, TransportState};

// ============================================================================
// Types
// ============================================================================

/// Fired once the peer acknowledged a channel opened through a command.
pub type OpenCallback = Box<dyn FnOnce(&Channel) + Send>;

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

// ============================================================================
// OpenRequest
// ============================================================================

/// A channel open waiting for a transport.
pub(crate) struct OpenRequest {
    path: String,
    on_open: OpenCallback,
    /// Receives the created channel, or why it could not be created.
    reply: Option<oneshot::Sender<Result<Channel>>>,
}

impl OpenRequest {
    pub(crate) fn new(
        path: String,
        on_open: OpenCallback,
        reply: Option<oneshot::Sender<Result<Channel>>>,
    ) -> Self {
        Self {
            path,
            on_open,
            reply,
        }
    }

    /// Opens the channel on `mux` and reports the result.
    pub(crate) fn dispatch(self, mux: &Multiplexer) {
        let result = mux.open_channel(&self.path, self.on_open);
        if let Err(e) = &result {
            warn!(path = %self.path, error = %e, "Channel open failed");
        }
        if let Some(reply) = self.reply {
            let _ = reply.send(result);
        }
    }

    /// Reports that the request will never be dispatched.
    pub(crate) fn fail(self, error: Error) {
        debug!(path = %self.path, error = %error, "Channel open abandoned");
        if let Some(reply) = self.reply {
            let _ = reply.send(Err(error));
        }
    }
}

// ============================================================================
// SessionCommand
// ============================================================================

/// Commands accepted by a running session.
pub(crate) enum SessionCommand {
    /// Open a channel on the current transport.
    Open(OpenRequest),
    /// Close the transport with a close frame.
    Shutdown {
        code: u16,
        reason: String,
    },
}

// ============================================================================
// SessionEnd
// ============================================================================

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnd {
    /// Close code delivered to every channel.
    pub code: u16,
    /// Close reason delivered to every channel.
    pub reason: String,
    /// `true` if the session was shut down locally on request.
    pub shutdown: bool,
}

impl SessionEnd {
    fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            reason: reason.into(),
            shutdown: false,
        }
    }
}

/// What to do with the socket once the loop exits.
enum Teardown {
    /// Complete the close handshake.
    Close,
    /// Drop the socket without a handshake.
    Abort,
}

// ============================================================================
// Event Loop
// ============================================================================

/// Runs the event loop of one transport until it closes.
///
/// `commands` outlives the session so a reconnecting client can keep
/// queueing into it.
pub(crate) async fn run_session<S>(
    ws_stream: WebSocketStream<S>,
    mux: &Multiplexer,
    mut frames_rx: mpsc::UnboundedReceiver<Frame>,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    mut keepalive: Option<KeepAlive>,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connection_id = mux.connection_id();
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut ticker = keepalive.as_ref().map(|k| ping_interval(k.interval()));

    debug!(%connection_id, "Session started");

    let (end, teardown) = loop {
        tokio::select! {
            message = ws_read.next() => match message {
                Some(Ok(Message::Text(text))) => mux.handle_incoming_frame(text.as_str()),

                Some(Ok(Message::Binary(bytes))) => match str::from_utf8(&bytes) {
                    Ok(text) => mux.handle_incoming_frame(text),
                    Err(e) => warn!(%connection_id, error = %e, "Dropping non UTF-8 message"),
                },

                Some(Ok(Message::Pong(_))) => {
                    if let Some(keepalive) = keepalive.as_mut() {
                        keepalive.acknowledge();
                    }
                }

                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (CLOSE_NORMAL, String::new()),
                        |f| (u16::from(f.code), f.reason.to_string()),
                    );
                    debug!(%connection_id, code, reason = %reason, "WebSocket closed by remote");
                    break (SessionEnd { code, reason, shutdown: false }, Teardown::Close);
                }

                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => {}

                Some(Err(e)) => {
                    let e = Error::from(e);
                    error!(%connection_id, error = %e, "WebSocket error");
                    mux.transport_error(&e);
                    break (SessionEnd::abnormal(e.to_string()), Teardown::Abort);
                }

                None => {
                    debug!(%connection_id, "WebSocket stream ended");
                    break (SessionEnd::abnormal("stream ended"), Teardown::Abort);
                }
            },

            Some(frame) = frames_rx.recv() => {
                if let Err(e) = write_frame(&mut ws_write, &frame).await {
                    error!(%connection_id, error = %e, "Failed to write frame");
                    mux.transport_error(&e);
                    break (SessionEnd::abnormal(e.to_string()), Teardown::Abort);
                }
            }

            () = tick(ticker.as_mut()) => {
                if keepalive.as_mut().map(KeepAlive::check) == Some(Liveness::Terminate) {
                    warn!(%connection_id, "Peer missed keep-alive, terminating transport");
                    break (SessionEnd::abnormal("keep-alive timeout"), Teardown::Abort);
                }
                if let Err(e) = ws_write.send(Message::Ping(Default::default())).await {
                    let e = Error::from(e);
                    error!(%connection_id, error = %e, "Failed to send ping");
                    mux.transport_error(&e);
                    break (SessionEnd::abnormal(e.to_string()), Teardown::Abort);
                }
                trace!(%connection_id, "Ping sent");
            }

            command = commands.recv() => match command {
                Some(SessionCommand::Open(request)) => request.dispatch(mux),

                Some(SessionCommand::Shutdown { code, reason }) => {
                    debug!(%connection_id, code, reason = %reason, "Shutdown command received");
                    shutdown(mux, &mut ws_write, &mut frames_rx, code, &reason).await;
                    break (SessionEnd { code, reason, shutdown: true }, Teardown::Close);
                }

                None => {
                    debug!(%connection_id, "Command channel closed");
                    let reason = String::from("handle dropped");
                    shutdown(mux, &mut ws_write, &mut frames_rx, CLOSE_NORMAL, &reason).await;
                    break (SessionEnd { code: CLOSE_NORMAL, reason, shutdown: true }, Teardown::Close);
                }
            },
        }
    };

    mux.outbound().set_state(TransportState::Closed);

    if let Teardown::Close = teardown {
        let _ = ws_write.close().await;
    }

    mux.transport_closed(end.code, &end.reason);

    debug!(%connection_id, code = end.code, "Session terminated");
    end
}

// ============================================================================
// Helpers
// ============================================================================

fn ping_interval(period: std::time::Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}

/// Writes one frame. Only socket failures are returned.
async fn write_frame<S>(ws_write: &mut WsSink<S>, frame: &Frame) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let json = match frame.encode() {
        Ok(json) => json,
        Err(e) => {
            warn!(channel_id = %frame.id(), error = %e, "Failed to encode frame");
            return Ok(());
        }
    };

    ws_write.send(Message::Text(json.into())).await?;
    trace!(channel_id = %frame.id(), kind = %frame.kind(), "Frame written");
    Ok(())
}

/// Flushes already queued frames, then sends the close frame.
async fn shutdown<S>(
    mux: &Multiplexer,
    ws_write: &mut WsSink<S>,
    frames_rx: &mut mpsc::UnboundedReceiver<Frame>,
    code: u16,
    reason: &str,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    mux.outbound().set_state(TransportState::Closing);

    while let Ok(frame) = frames_rx.try_recv() {
        if write_frame(ws_write, &frame).await.is_err() {
            return;
        }
    }

    let close = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    if let Err(e) = ws_write.send(Message::Close(Some(close))).await {
        debug!(error = %e, "Failed to send close frame");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::identifiers::ChannelId;
    use crate::mux::Side;
    use crate::router::Router;
    use crate::transport::Outbound;

    type Peer = WebSocketStream<DuplexStream>;

    struct Running {
        mux: Arc<Multiplexer>,
        commands: mpsc::UnboundedSender<SessionCommand>,
        task: JoinHandle<SessionEnd>,
    }

    async fn pair() -> (Peer, Peer) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        tokio::join!(
            WebSocketStream::from_raw_socket(a, Role::Server, None),
            WebSocketStream::from_raw_socket(b, Role::Client, None),
        )
    }

    fn spawn_session(ws: Peer, side: Side, keepalive: Option<KeepAlive>) -> Running {
        let router = Router::builder()
            .route("/echo/:id", |_, channel| {
                channel.on_message(|channel, content| {
                    let _ = channel.send(content);
                });
                Ok(())
            })
            .build()
            .expect("router");

        let (outbound, frames_rx) = Outbound::unobserved();
        let mux = Arc::new(Multiplexer::new(side, outbound, Some(router)));
        let (commands, mut commands_rx) = mpsc::unbounded_channel();

        let session_mux = Arc::clone(&mux);
        let task = tokio::spawn(async move {
            run_session(ws, &session_mux, frames_rx, &mut commands_rx, keepalive).await
        });

        Running {
            mux,
            commands,
            task,
        }
    }

    fn text(frame: Frame) -> Message {
        Message::Text(frame.encode().expect("encode").into())
    }

    async fn next_frame(peer: &mut Peer) -> Frame {
        loop {
            match peer.next().await.expect("stream open").expect("message") {
                Message::Text(text) => return Frame::decode(text.as_str()).expect("frame"),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_session_routes_and_echoes() {
        let (server_ws, mut peer) = pair().await;
        let running = spawn_session(server_ws, Side::Server, None);
        let id = ChannelId::new(200);

        peer.send(text(Frame::open(id, "/echo/1"))).await.expect("send");
        assert_eq!(next_frame(&mut peer).await, Frame::ready(id));

        peer.send(text(Frame::data(id, "ping"))).await.expect("send");
        assert_eq!(next_frame(&mut peer).await, Frame::data(id, "ping"));

        running
            .commands
            .send(SessionCommand::Shutdown {
                code: CLOSE_NORMAL,
                reason: "bye".into(),
            })
            .map_err(|_| "session gone")
            .expect("command");

        let end = running.task.await.expect("join");
        assert_eq!(end.code, CLOSE_NORMAL);
        assert!(end.shutdown);
        assert_eq!(running.mux.channel_count(), 0);

        match peer.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), CLOSE_NORMAL);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_peer_close_propagates_to_channels() {
        let (server_ws, mut peer) = pair().await;
        let running = spawn_session(server_ws, Side::Server, None);
        let id = ChannelId::new(200);

        peer.send(text(Frame::open(id, "/echo/1"))).await.expect("send");
        assert_eq!(next_frame(&mut peer).await, Frame::ready(id));

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        running
            .mux
            .channel(id)
            .expect("registered")
            .on_close(move |event| *slot.lock() = Some(event.clone()));

        peer.close(Some(CloseFrame {
            code: CloseCode::from(4001),
            reason: "peer gone".into(),
        }))
        .await
        .expect("close");

        let end = timeout(Duration::from_secs(2), running.task)
            .await
            .expect("session ends")
            .expect("join");

        assert_eq!(end.code, 4001);
        assert_eq!(end.reason, "peer gone");
        assert!(!end.shutdown);
        let event = seen.lock().clone().expect("close fired");
        assert_eq!(event.code, 4001);
        assert_eq!(event.reason, "peer gone");
    }

    #[tokio::test]
    async fn test_silent_peer_is_terminated() {
        let (server_ws, _peer) = pair().await;
        let running = spawn_session(
            server_ws,
            Side::Server,
            Some(KeepAlive::new(Duration::from_millis(50))),
        );

        let end = timeout(Duration::from_secs(2), running.task)
            .await
            .expect("session ends")
            .expect("join");

        assert_eq!(end.code, CLOSE_ABNORMAL);
        assert_eq!(end.reason, "keep-alive timeout");
    }

    #[tokio::test]
    async fn test_responsive_peer_stays_connected() {
        let (server_ws, mut peer) = pair().await;
        let running = spawn_session(
            server_ws,
            Side::Server,
            Some(KeepAlive::new(Duration::from_millis(30))),
        );

        let reader = tokio::spawn(async move { while let Some(Ok(_)) = peer.next().await {} });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!running.task.is_finished());

        let _ = running.commands.send(SessionCommand::Shutdown {
            code: CLOSE_NORMAL,
            reason: String::new(),
        });
        let end = running.task.await.expect("join");
        assert!(end.shutdown);
        reader.abort();
    }

    #[tokio::test]
    async fn test_open_command_sends_open_frame() {
        let (client_ws, mut peer) = pair().await;
        let running = spawn_session(client_ws, Side::Client, None);

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = OpenRequest::new("/echo/7".into(), Box::new(|_: &Channel| {}), Some(reply_tx));
        let _ = running.commands.send(SessionCommand::Open(request));

        let channel = reply_rx.await.expect("reply").expect("channel");
        assert_eq!(
            next_frame(&mut peer).await,
            Frame::open(channel.id(), "/echo/7")
        );

        drop(running.commands);
        let end = running.task.await.expect("join");
        assert_eq!(end.reason, "handle dropped");
        assert!(channel.is_closed());
    }
}
