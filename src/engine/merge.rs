//! Conflict policy for duplicate wants.
//!
//! When a task arrives for a cid that already has a pending task on the
//! same peer, the merger decides whether the newcomer is dropped or the
//! pending task is upgraded in place. Without deduplication a peer could
//! balloon the queue by resending its wantlist; without the upgrade a
//! want-block arriving behind an earlier want-have would be answered with
//! a presence instead of the block.

use crate::message::WantType;

use super::queue::Task;

/// Outcome of offering a new task against an existing pending one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeDecision {
    /// Drop the incoming task.
    Ignore,
    /// Replace the pending task with the merged form.
    Upgrade,
}

pub(crate) struct TaskMerger;

impl TaskMerger {
    /// Resolves a conflict between a pending task and a newcomer.
    ///
    /// Block-level tasks absorb everything (a Have can never downgrade
    /// them); a pending Have is upgraded only by an incoming block-level
    /// task.
    pub fn resolve(existing: &Task, incoming: &Task) -> MergeDecision {
        if existing.sends_block() {
            MergeDecision::Ignore
        } else if incoming.sends_block() {
            MergeDecision::Upgrade
        } else {
            MergeDecision::Ignore
        }
    }

    /// Builds the upgraded task.
    ///
    /// The merged task keeps the pending task's queue position (its
    /// insertion seq), takes the higher priority, ORs the dont-have
    /// opt-in, and adopts the incoming block-sized cost.
    pub fn merged(existing: &Task, incoming: &Task) -> Task {
        Task {
            cid: existing.cid.clone(),
            priority: existing.priority.max(incoming.priority),
            want_type: WantType::Block,
            send_dont_have: existing.send_dont_have || incoming.send_dont_have,
            promoted: incoming.promoted,
            size_hint: incoming.size_hint,
            seq: existing.seq,
        }
    }
}
