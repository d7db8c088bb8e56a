//! Network capability used by the engine.
//!
//! The engine does not dial, frame, or multiplex; it hands fully assembled
//! messages to whatever implements [`Network`] and reports failures without
//! retrying. Incoming traffic flows the other way, into
//! [`Engine::message_received`](crate::Engine::message_received), and
//! connection lifecycle is signalled through the facade's
//! `peer_connected` / `peer_disconnected` hooks.

use crate::message::Message;
use crate::peer_id::PeerId;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from a message send.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Transport-level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection to the peer is gone.
    #[error("connection closed")]
    Closed,

    /// The send did not complete in time.
    #[error("send timed out")]
    Timeout,

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound message transport.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Serializes and transmits `message` to `to`.
    ///
    /// A returned error means the message was not delivered; the engine
    /// logs it and moves on — the remote's own wantlist drives any retry.
    async fn send_message(&self, to: PeerId, message: Message) -> Result<(), NetworkError>;
}
