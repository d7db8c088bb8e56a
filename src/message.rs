//! Bitswap wire messages.
//!
//! A message bundles wantlist entries, delivered blocks, block presences,
//! and a pending-bytes hint into one length-prefixed frame. Fields are
//! tag-framed (`tag | len | payload`) so decoders skip tags they do not
//! recognize, which keeps old peers compatible with newer senders.

use crate::block::{Block, Cid};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Upper bound on a single decoded frame.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const TAG_FULL: u8 = 1;
const TAG_ENTRY: u8 = 2;
const TAG_BLOCK: u8 = 3;
const TAG_PRESENCE: u8 = 4;
const TAG_PENDING_BYTES: u8 = 5;

/// Per-field framing overhead: tag byte plus 4-byte length.
const FIELD_HEADER_LEN: usize = 5;

const ENTRY_FLAG_CANCEL: u8 = 0x01;
const ENTRY_FLAG_SEND_DONT_HAVE: u8 = 0x02;
const ENTRY_FLAG_WANT_HAVE: u8 = 0x04;

/// Errors from encoding or decoding a wire message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The frame ended before a complete field.
    #[error("truncated message")]
    Truncated,

    /// The length prefix exceeds the frame cap.
    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    /// A field carried an empty or malformed content identifier.
    #[error("invalid cid in {0} field")]
    InvalidCid(&'static str),

    /// A block presence carried an unknown type code.
    #[error("invalid presence type: {0}")]
    InvalidPresenceType(u8),
}

/// What a want entry asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WantType {
    /// The full block bytes.
    Block,
    /// Only whether the peer holds the block.
    Have,
}

/// Explicit presence answer for a single block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPresenceType {
    Have,
    DontHave,
}

/// A presence answer paired with the block it is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPresence {
    pub cid: Cid,
    pub presence: BlockPresenceType,
}

/// One wantlist entry.
///
/// Higher priorities are served first. `cancel` rescinds a prior want for
/// the same cid; `send_dont_have` opts in to an explicit negative answer
/// when the block is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub cid: Cid,
    pub priority: i32,
    pub want_type: WantType,
    pub cancel: bool,
    pub send_dont_have: bool,
}

impl Entry {
    /// Creates a want entry.
    pub fn want(cid: Cid, priority: i32, want_type: WantType, send_dont_have: bool) -> Self {
        Self {
            cid,
            priority,
            want_type,
            cancel: false,
            send_dont_have,
        }
    }

    /// Creates a cancel entry for a prior want.
    pub fn cancel(cid: Cid) -> Self {
        Self {
            cid,
            priority: 0,
            want_type: WantType::Block,
            cancel: true,
            send_dont_have: false,
        }
    }
}

/// A decoded (or under-construction) Bitswap message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// When set, this wantlist replaces everything the sender asked before.
    pub full: bool,
    pub wantlist: Vec<Entry>,
    pub blocks: Vec<Block>,
    pub block_presences: Vec<BlockPresence>,
    /// Bytes of wanted data the sender still has queued for the recipient.
    pub pending_bytes: i32,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a message whose wantlist replaces the prior one.
    pub fn full_wantlist() -> Self {
        Self {
            full: true,
            ..Self::default()
        }
    }

    pub fn add_entry(&mut self, entry: Entry) -> &mut Self {
        self.wantlist.push(entry);
        self
    }

    pub fn add_block(&mut self, block: Block) -> &mut Self {
        self.blocks.push(block);
        self
    }

    pub fn add_presence(&mut self, cid: Cid, presence: BlockPresenceType) -> &mut Self {
        self.block_presences.push(BlockPresence { cid, presence });
        self
    }

    /// True when the message carries nothing worth transmitting.
    pub fn is_empty(&self) -> bool {
        self.wantlist.is_empty() && self.blocks.is_empty() && self.block_presences.is_empty()
    }

    /// Encoded size of a presence field for the given cid.
    pub fn presence_len(cid: &Cid) -> usize {
        FIELD_HEADER_LEN + 1 + cid.len()
    }

    /// Encoded size of a block field.
    pub fn block_len(block: &Block) -> usize {
        FIELD_HEADER_LEN + 2 + block.cid.len() + block.data.len()
    }

    /// Encoded size of a wantlist entry field.
    pub fn entry_len(entry: &Entry) -> usize {
        FIELD_HEADER_LEN + 5 + entry.cid.len()
    }

    /// Total encoded size, including the 4-byte length prefix.
    pub fn encoded_len(&self) -> usize {
        let mut len = 4;
        if self.full {
            len += FIELD_HEADER_LEN + 1;
        }
        for entry in &self.wantlist {
            len += Self::entry_len(entry);
        }
        for block in &self.blocks {
            len += Self::block_len(block);
        }
        for presence in &self.block_presences {
            len += Self::presence_len(&presence.cid);
        }
        if self.pending_bytes != 0 {
            len += FIELD_HEADER_LEN + 4;
        }
        len
    }

    /// Encodes the message, including the length prefix.
    pub fn encode(&self) -> Bytes {
        let total = self.encoded_len();
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32((total - 4) as u32);

        if self.full {
            buf.put_u8(TAG_FULL);
            buf.put_u32(1);
            buf.put_u8(1);
        }

        for entry in &self.wantlist {
            buf.put_u8(TAG_ENTRY);
            buf.put_u32((5 + entry.cid.len()) as u32);
            let mut flags = 0u8;
            if entry.cancel {
                flags |= ENTRY_FLAG_CANCEL;
            }
            if entry.send_dont_have {
                flags |= ENTRY_FLAG_SEND_DONT_HAVE;
            }
            if entry.want_type == WantType::Have {
                flags |= ENTRY_FLAG_WANT_HAVE;
            }
            buf.put_u8(flags);
            buf.put_i32(entry.priority);
            buf.put_slice(entry.cid.as_bytes());
        }

        for block in &self.blocks {
            buf.put_u8(TAG_BLOCK);
            buf.put_u32((2 + block.cid.len() + block.data.len()) as u32);
            buf.put_u16(block.cid.len() as u16);
            buf.put_slice(block.cid.as_bytes());
            buf.put_slice(&block.data);
        }

        for presence in &self.block_presences {
            buf.put_u8(TAG_PRESENCE);
            buf.put_u32((1 + presence.cid.len()) as u32);
            buf.put_u8(match presence.presence {
                BlockPresenceType::Have => 0,
                BlockPresenceType::DontHave => 1,
            });
            buf.put_slice(presence.cid.as_bytes());
        }

        if self.pending_bytes != 0 {
            buf.put_u8(TAG_PENDING_BYTES);
            buf.put_u32(4);
            buf.put_i32(self.pending_bytes);
        }

        buf.freeze()
    }

    /// Decodes a length-prefixed frame.
    pub fn decode(mut data: Bytes) -> Result<Self, MessageError> {
        if data.len() < 4 {
            return Err(MessageError::Truncated);
        }
        let length = data.get_u32() as usize;
        if length > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge(length));
        }
        if data.remaining() < length {
            return Err(MessageError::Truncated);
        }
        let mut payload = data.split_to(length);

        let mut message = Message::new();
        while payload.remaining() > 0 {
            if payload.remaining() < FIELD_HEADER_LEN {
                return Err(MessageError::Truncated);
            }
            let tag = payload.get_u8();
            let field_len = payload.get_u32() as usize;
            if payload.remaining() < field_len {
                return Err(MessageError::Truncated);
            }
            let mut field = payload.split_to(field_len);

            match tag {
                TAG_FULL => {
                    if field.remaining() < 1 {
                        return Err(MessageError::Truncated);
                    }
                    message.full = field.get_u8() != 0;
                }
                TAG_ENTRY => {
                    if field.remaining() < 6 {
                        return Err(MessageError::Truncated);
                    }
                    let flags = field.get_u8();
                    let priority = field.get_i32();
                    let cid = Cid::from_bytes(field.copy_to_bytes(field.remaining()))
                        .ok_or(MessageError::InvalidCid("entry"))?;
                    message.wantlist.push(Entry {
                        cid,
                        priority,
                        want_type: if flags & ENTRY_FLAG_WANT_HAVE != 0 {
                            WantType::Have
                        } else {
                            WantType::Block
                        },
                        cancel: flags & ENTRY_FLAG_CANCEL != 0,
                        send_dont_have: flags & ENTRY_FLAG_SEND_DONT_HAVE != 0,
                    });
                }
                TAG_BLOCK => {
                    if field.remaining() < 2 {
                        return Err(MessageError::Truncated);
                    }
                    let cid_len = field.get_u16() as usize;
                    if field.remaining() < cid_len {
                        return Err(MessageError::Truncated);
                    }
                    let cid = Cid::from_bytes(field.copy_to_bytes(cid_len))
                        .ok_or(MessageError::InvalidCid("block"))?;
                    let data = field.copy_to_bytes(field.remaining());
                    message.blocks.push(Block::new(cid, data));
                }
                TAG_PRESENCE => {
                    if field.remaining() < 2 {
                        return Err(MessageError::Truncated);
                    }
                    let presence = match field.get_u8() {
                        0 => BlockPresenceType::Have,
                        1 => BlockPresenceType::DontHave,
                        other => return Err(MessageError::InvalidPresenceType(other)),
                    };
                    let cid = Cid::from_bytes(field.copy_to_bytes(field.remaining()))
                        .ok_or(MessageError::InvalidCid("presence"))?;
                    message.block_presences.push(BlockPresence { cid, presence });
                }
                TAG_PENDING_BYTES => {
                    if field.remaining() < 4 {
                        return Err(MessageError::Truncated);
                    }
                    message.pending_bytes = field.get_i32();
                }
                // Unknown field: skip.
                _ => {}
            }
        }

        Ok(message)
    }
}
