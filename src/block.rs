//! Content identifiers and blocks.
//!
//! A [`Cid`] names a block by the hash of its contents. The engine keys
//! every internal map by the canonical byte form; string forms only appear
//! at log and API boundaries.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt;

/// Multihash code for SHA2-256.
const MH_SHA2_256: u8 = 0x12;
/// Digest length for SHA2-256.
const MH_LEN_SHA2_256: u8 = 32;

/// A content identifier: the canonical byte encoding of a block's hash.
///
/// Internally this is the multihash framing `0x12 0x20 || sha256(data)`,
/// but the engine treats any byte string as opaque — ids received from
/// remote peers are carried through unchanged.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(Bytes);

impl Cid {
    /// Derives the identifier for a payload by hashing it.
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest: [u8; 32] = hasher.finalize().into();

        let mut bytes = Vec::with_capacity(2 + digest.len());
        bytes.push(MH_SHA2_256);
        bytes.push(MH_LEN_SHA2_256);
        bytes.extend_from_slice(&digest);
        Self(Bytes::from(bytes))
    }

    /// Wraps an already-encoded identifier received from elsewhere.
    ///
    /// Returns `None` for an empty byte string, which is never a valid id.
    pub fn from_bytes(bytes: Bytes) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        Some(Self(bytes))
    }

    /// The canonical byte form, used as the on-wire representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex of the canonical bytes, for logs and display.
    pub fn to_hex(&self) -> String {
        self.0
            .iter()
            .fold(String::with_capacity(self.0.len() * 2), |mut s, b| {
                use std::fmt::Write;
                let _ = write!(s, "{:02x}", b);
                s
            })
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.to_hex())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A block: a payload together with the identifier that names it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub cid: Cid,
    pub data: Bytes,
}

impl Block {
    pub fn new(cid: Cid, data: Bytes) -> Self {
        Self { cid, data }
    }

    /// Builds a block by hashing the payload.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let cid = Cid::from_data(&data);
        Self { cid, data }
    }

    /// Checks that the payload matches the identifier.
    pub fn verify(&self) -> bool {
        Cid::from_data(&self.data) == self.cid
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
