use crate::blockstore::StoreError;
use crate::network::NetworkError;
use thiserror::Error;

/// Errors surfaced by the engine.
///
/// The engine is a best-effort sender: nothing propagates out of
/// `message_received` or `received_blocks`. These variants appear on the
/// event stream and from lifecycle misuse.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A lifecycle call was made before `start`.
    #[error("engine not started")]
    NotStarted,

    /// A block store read failed; the task was dropped, never retried.
    #[error("block store error: {0}")]
    BlockStore(#[from] StoreError),

    /// An outbound send failed; the batch was consumed anyway.
    #[error("network send error: {0}")]
    NetworkSend(#[from] NetworkError),

    /// A malformed incoming message or entry was dropped.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
