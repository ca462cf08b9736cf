//! wschannel - Multiplexed channels over a single WebSocket.
//!
//! Many independent, bidirectional, message-oriented channels share one
//! WebSocket. Each channel is addressed by a path (`/echo/42`) that the
//! accepting side routes to a handler through URL-like patterns
//! (`/echo/:id`).
//!
//! # Architecture
//!
//! - **Server**: accepts transports on one HTTP path and runs a
//!   [`Multiplexer`] per transport, all sharing one [`Router`]
//! - **Client**: keeps one transport up, reconnecting with exponential
//!   backoff and replaying channel opens queued while disconnected
//! - **Channel**: lifecycle `Initial → Opening → Open → Closing → Closed`
//!
//! Either side may open channels; the other side routes them.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use wschannel::{Client, Result, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let router = Router::builder()
//!         .route("/echo/:id", |_, channel| {
//!             channel.on_message(|channel, content| {
//!                 let _ = channel.send(content);
//!             });
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     let server = Server::builder().router(router).build().await?;
//!     let client = Client::builder().url(server.ws_url()).build()?;
//!
//!     let channel = client.open("/echo/42", Duration::from_secs(5)).await?;
//!     channel.on_message(|_, content| println!("received {content}"));
//!     channel.send("ping")?;
//!
//!     client.shutdown().await;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channel`] | [`Channel`] state machine and listeners |
//! | [`client`] | Reconnecting [`Client`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Channel and connection ids |
//! | [`mux`] | Per-transport [`Multiplexer`] |
//! | [`protocol`] | Frame format |
//! | [`router`] | Path patterns and [`Router`] |
//! | [`server`] | Accepting [`Server`] |
//! | [`transport`] | Event loop and keep-alive |

// ============================================================================
// Modules
// ============================================================================

/// Channel state machine.
pub mod channel;

/// Reconnecting client.
///
/// Use [`Client::builder()`] to create a client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for channels and transports.
pub mod identifiers;

/// Channel registry and frame dispatch for one transport.
pub mod mux;

/// Frame format shared by both ends.
pub mod protocol;

/// Path patterns and routing.
pub mod router;

/// Accepting server.
///
/// Use [`Server::builder()`] to create a server.
pub mod server;

/// WebSocket event loop and keep-alive.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channel::{Channel, ChannelState, CloseEvent};

// Client types
pub use client::{Client, ClientBuilder, ClientOptions, ConnectionState, ReconnectOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ChannelId, ConnectionId};

// Multiplexer types
pub use mux::{MessagingObserver, Multiplexer, NoopObserver, Side, TracingObserver};

// Protocol types
pub use protocol::{Frame, FrameKind};

// Router types
pub use router::{PathParams, RoutePattern, Router, RouterBuilder};

// Server types
pub use server::{Server, ServerBuilder, ServerOptions};

// Transport types
pub use transport::{KeepAlive, TransportState};
