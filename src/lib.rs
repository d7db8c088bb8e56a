//! rswap - A Bitswap decision engine
//!
//! This library implements the server half of a Bitswap peer: given a
//! content-addressed block store and a network, it tracks what each remote
//! peer wants, schedules responses fairly across peers, and assembles
//! size-capped outbound messages.
//!
//! # Modules
//!
//! - [`block`] - Content identifiers and blocks
//! - [`message`] - Bitswap 1.2.0-style wire messages and codec
//! - [`blockstore`] - Block store capability trait and in-memory store
//! - [`network`] - Outbound network capability trait
//! - [`engine`] - The decision engine: ledgers, request queue, processor
//!
//! # Overview
//!
//! ```no_run
//! use rswap::{Engine, EngineConfig, MemoryBlockStore, Message, PeerId};
//! use std::sync::Arc;
//!
//! # struct NoopNetwork;
//! # #[async_trait::async_trait]
//! # impl rswap::Network for NoopNetwork {
//! #     async fn send_message(
//! #         &self,
//! #         _to: PeerId,
//! #         _message: Message,
//! #     ) -> Result<(), rswap::NetworkError> {
//! #         Ok(())
//! #     }
//! # }
//! # async fn example() {
//! let store = Arc::new(MemoryBlockStore::new());
//! let network = Arc::new(NoopNetwork);
//! let engine = Engine::new(store, network, EngineConfig::default());
//! engine.start();
//!
//! // Feed it traffic from the transport layer:
//! let peer = PeerId::generate();
//! engine.message_received(peer, &Message::new()).await;
//! # }
//! ```

pub mod block;
pub mod blockstore;
pub mod engine;
pub mod message;
pub mod network;
pub mod peer_id;

pub use block::{Block, Cid};
pub use blockstore::{BlockStore, MemoryBlockStore, StoreError};
pub use engine::{Engine, EngineConfig, EngineError, EngineEvent, LedgerSummary, Want};
pub use message::{
    BlockPresence, BlockPresenceType, Entry, Message, MessageError, WantType, MAX_MESSAGE_SIZE,
};
pub use network::{Network, NetworkError};
pub use peer_id::PeerId;
