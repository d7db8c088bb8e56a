//! The request queue: round-robin across peers, priority order within one.
//!
//! Every task lives in exactly one of a peer's `pending` or `active` sets.
//! The pending set is kept as an ordered rank view plus a cid index in
//! lockstep, so pops are cheap and merge lookups are O(1).

use crate::block::Cid;
use crate::message::WantType;
use crate::peer_id::PeerId;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap, VecDeque};

use super::merge::{MergeDecision, TaskMerger};

/// One pending response for one cid to one peer.
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub cid: Cid,
    pub priority: i32,
    pub want_type: WantType,
    pub send_dont_have: bool,
    /// A have-want whose block fits the promotion threshold: ships the
    /// block bytes plus a Have presence.
    pub promoted: bool,
    /// Byte cost this task will consume in an outbound message.
    pub size_hint: usize,
    pub(super) seq: u64,
}

impl Task {
    pub fn new(
        cid: Cid,
        priority: i32,
        want_type: WantType,
        send_dont_have: bool,
        size_hint: usize,
    ) -> Self {
        Self {
            cid,
            priority,
            want_type,
            send_dont_have,
            promoted: false,
            size_hint,
            seq: 0,
        }
    }

    /// Whether this task ships block bytes when served.
    pub fn sends_block(&self) -> bool {
        self.want_type == WantType::Block || self.promoted
    }
}

#[derive(Debug, Clone)]
struct TaskRank {
    priority: i32,
    seq: u64,
    cid: Cid,
}

impl TaskRank {
    fn of(task: &Task) -> Self {
        Self {
            priority: task.priority,
            seq: task.seq,
            cid: task.cid.clone(),
        }
    }
}

impl PartialEq for TaskRank {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for TaskRank {}

impl PartialOrd for TaskRank {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskRank {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority first, then insertion order.
        other
            .priority
            .cmp(&self.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Default)]
struct PeerQueue {
    order: BTreeSet<TaskRank>,
    pending: HashMap<Cid, Task>,
    active: HashMap<Cid, Task>,
}

impl PeerQueue {
    fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }
}

/// Two-level task scheduler.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    peers: HashMap<PeerId, PeerQueue>,
    rotation: VecDeque<PeerId>,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts tasks for a peer, resolving conflicts through the merger.
    pub fn push_tasks(&mut self, peer: PeerId, tasks: Vec<Task>) {
        let queue = self.peers.entry(peer).or_default();

        for mut task in tasks {
            // Anything already being processed is left alone; the want is
            // reconsidered after completion if still outstanding.
            if queue.active.contains_key(&task.cid) {
                continue;
            }

            if let Some(existing) = queue.pending.get(&task.cid) {
                match TaskMerger::resolve(existing, &task) {
                    MergeDecision::Ignore => continue,
                    MergeDecision::Upgrade => {
                        let merged = TaskMerger::merged(existing, &task);
                        queue.order.remove(&TaskRank::of(existing));
                        queue.order.insert(TaskRank::of(&merged));
                        queue.pending.insert(merged.cid.clone(), merged);
                    }
                }
            } else {
                task.seq = self.next_seq;
                self.next_seq += 1;
                queue.order.insert(TaskRank::of(&task));
                queue.pending.insert(task.cid.clone(), task);
            }
        }

        if !queue.is_empty() && !self.rotation.contains(&peer) {
            self.rotation.push_back(peer);
        }
    }

    /// Pops the next batch: the first peer in rotation with pending work,
    /// tasks in rank order until `max_bytes` is spent (always at least
    /// one). The served peer rotates to the tail; skipped peers keep their
    /// position. Popped tasks move to `active`.
    pub fn pop_tasks(&mut self, max_bytes: usize) -> Option<(PeerId, Vec<Task>)> {
        for i in 0..self.rotation.len() {
            let peer = self.rotation[i];
            let Some(queue) = self.peers.get_mut(&peer) else {
                continue;
            };

            let mut batch = Vec::new();
            let mut total = 0usize;
            while let Some(rank) = queue.order.first().cloned() {
                let Some(task) = queue.pending.get(&rank.cid) else {
                    queue.order.remove(&rank);
                    continue;
                };
                if !batch.is_empty() && total + task.size_hint > max_bytes {
                    break;
                }
                queue.order.remove(&rank);
                if let Some(task) = queue.pending.remove(&rank.cid) {
                    total += task.size_hint;
                    queue.active.insert(task.cid.clone(), task.clone());
                    batch.push(task);
                }
            }
            if batch.is_empty() {
                continue;
            }

            self.rotation.remove(i);
            self.rotation.push_back(peer);
            return Some((peer, batch));
        }
        None
    }

    /// Marks active tasks complete. Drops the peer's row once both sets
    /// are empty.
    pub fn tasks_done(&mut self, peer: PeerId, tasks: &[Task]) {
        if let Some(queue) = self.peers.get_mut(&peer) {
            for task in tasks {
                queue.active.remove(&task.cid);
            }
            if queue.is_empty() {
                self.peers.remove(&peer);
                self.rotation.retain(|p| p != &peer);
            }
        }
    }

    /// Drops all tasks for a peer. Used on disconnect.
    pub fn remove(&mut self, peer: &PeerId) {
        self.peers.remove(peer);
        self.rotation.retain(|p| p != peer);
    }

    /// Purges a peer's pending tasks; active tasks run to completion.
    pub fn clear_pending(&mut self, peer: &PeerId) {
        if let Some(queue) = self.peers.get_mut(peer) {
            queue.order.clear();
            queue.pending.clear();
            if queue.is_empty() {
                self.peers.remove(peer);
                self.rotation.retain(|p| p != peer);
            }
        }
    }

    /// Removes a single pending task, for cancellations. Active tasks are
    /// untouched. Returns whether a task was removed.
    pub fn cancel_pending(&mut self, peer: &PeerId, cid: &Cid) -> bool {
        let Some(queue) = self.peers.get_mut(peer) else {
            return false;
        };
        let Some(task) = queue.pending.remove(cid) else {
            return false;
        };
        queue.order.remove(&TaskRank::of(&task));
        if queue.is_empty() {
            self.peers.remove(peer);
            self.rotation.retain(|p| p != peer);
        }
        true
    }

    /// Sum of size hints over a peer's pending tasks, for the
    /// pending-bytes hint.
    pub fn pending_bytes(&self, peer: &PeerId) -> usize {
        self.peers
            .get(peer)
            .map(|queue| queue.pending.values().map(|task| task.size_hint).sum())
            .unwrap_or(0)
    }

    /// Whether any peer has pending work.
    pub fn has_pending(&self) -> bool {
        self.peers.values().any(|queue| !queue.pending.is_empty())
    }

    pub fn pending_len(&self, peer: &PeerId) -> usize {
        self.peers.get(peer).map(|q| q.pending.len()).unwrap_or(0)
    }

    pub fn active_len(&self, peer: &PeerId) -> usize {
        self.peers.get(peer).map(|q| q.active.len()).unwrap_or(0)
    }

    /// Drops everything. Used on engine stop.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.rotation.clear();
    }
}
