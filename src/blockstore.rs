//! Block storage abstraction.
//!
//! The engine only ever reads from the store; writes come from the wrapping
//! agent, which stores arriving blocks before notifying the engine through
//! [`Engine::received_blocks`](crate::Engine::received_blocks).

use crate::block::{Block, Cid};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;

/// Errors from the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure in the backing store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("store error: {0}")]
    Backend(String),
}

/// Read access to the content-addressed block store.
///
/// `has` and `get_size` exist so presence queries never have to load block
/// bytes; implementations backed by real storage should override
/// `get_size` with something cheaper than a full read.
#[async_trait]
pub trait BlockStore: Send + Sync + 'static {
    /// Fetches the payload for `cid`, or `None` when absent.
    async fn get(&self, cid: &Cid) -> Result<Option<Bytes>, StoreError>;

    /// Returns whether the store holds `cid`.
    async fn has(&self, cid: &Cid) -> Result<bool, StoreError>;

    /// Returns the payload size without necessarily loading it.
    async fn get_size(&self, cid: &Cid) -> Result<Option<usize>, StoreError> {
        Ok(self.get(cid).await?.map(|data| data.len()))
    }

    /// Stores a batch of blocks.
    async fn put_many(&self, blocks: Vec<Block>) -> Result<(), StoreError>;
}

/// In-memory block store keyed by canonical cid bytes.
///
/// Suitable for tests and small caches; sharded internally so readers do
/// not contend with writers.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<Cid, Bytes>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn get(&self, cid: &Cid) -> Result<Option<Bytes>, StoreError> {
        Ok(self.blocks.get(cid).map(|entry| entry.value().clone()))
    }

    async fn has(&self, cid: &Cid) -> Result<bool, StoreError> {
        Ok(self.blocks.contains_key(cid))
    }

    async fn get_size(&self, cid: &Cid) -> Result<Option<usize>, StoreError> {
        Ok(self.blocks.get(cid).map(|entry| entry.value().len()))
    }

    async fn put_many(&self, blocks: Vec<Block>) -> Result<(), StoreError> {
        for block in blocks {
            self.blocks.insert(block.cid, block.data);
        }
        Ok(())
    }
}
