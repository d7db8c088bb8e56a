//! Per-peer bookkeeping: transfer accounting and the live wantlist.

use crate::block::Cid;
use crate::message::WantType;
use crate::peer_id::PeerId;
use std::collections::HashMap;

/// One outstanding want, as recorded in a peer's ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Want {
    pub cid: Cid,
    pub priority: i32,
    pub want_type: WantType,
    pub send_dont_have: bool,
}

/// Snapshot of a peer's accounting, for stats surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSummary {
    pub peer: PeerId,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub blocks_sent: u64,
    pub blocks_received: u64,
    pub exchange_count: u64,
    pub wantlist_len: usize,
}

impl LedgerSummary {
    /// Ratio of data sent to data received; above 1.0 means the peer owes us.
    pub fn debt_ratio(&self) -> f64 {
        self.bytes_sent as f64 / (self.bytes_received as f64 + 1.0)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct WantDetail {
    pub priority: i32,
    pub want_type: WantType,
    pub send_dont_have: bool,
}

/// Ledger for one remote peer.
///
/// Counters are monotonic. A cid appears at most once in the wantlist; a
/// repeated want overwrites the prior entry and any queued-task conflict is
/// resolved by the task merger, not here.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    bytes_sent: u64,
    bytes_received: u64,
    blocks_sent: u64,
    blocks_received: u64,
    exchange_count: u64,
    wantlist: HashMap<Cid, WantDetail>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records or updates a want.
    pub fn wants(&mut self, cid: Cid, priority: i32, want_type: WantType, send_dont_have: bool) {
        self.wantlist.insert(
            cid,
            WantDetail {
                priority,
                want_type,
                send_dont_have,
            },
        );
    }

    /// Removes a want. Idempotent; returns whether an entry was present.
    pub fn cancel_want(&mut self, cid: &Cid) -> bool {
        self.wantlist.remove(cid).is_some()
    }

    pub fn clear_wantlist(&mut self) {
        self.wantlist.clear();
    }

    pub fn peer_wants(&self, cid: &Cid) -> Option<&WantDetail> {
        self.wantlist.get(cid)
    }

    pub fn account_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.exchange_count += 1;
    }

    pub fn account_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.exchange_count += 1;
    }

    pub fn add_blocks_sent(&mut self, count: usize) {
        self.blocks_sent += count as u64;
    }

    pub fn add_blocks_received(&mut self, count: usize) {
        self.blocks_received += count as u64;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Snapshot of the live wantlist.
    pub fn wantlist(&self) -> Vec<Want> {
        self.wantlist
            .iter()
            .map(|(cid, detail)| Want {
                cid: cid.clone(),
                priority: detail.priority,
                want_type: detail.want_type,
                send_dont_have: detail.send_dont_have,
            })
            .collect()
    }

    pub fn summary(&self, peer: PeerId) -> LedgerSummary {
        LedgerSummary {
            peer,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            blocks_sent: self.blocks_sent,
            blocks_received: self.blocks_received,
            exchange_count: self.exchange_count,
            wantlist_len: self.wantlist.len(),
        }
    }
}
