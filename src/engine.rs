//! The decision engine: deciding which local blocks to send to which peer.
//!
//! The engine keeps a ledger per remote peer and a two-level request queue
//! (round-robin across peers, priority within one). Incoming wantlist
//! messages and block arrivals enqueue tasks; a
//! background processor drains them into size-capped outbound messages.
//!
//! All facade methods are best-effort and return nothing: failures show up
//! on the [`EngineEvent`] stream and in logs, never as errors to the
//! caller. Only lifecycle misuse reports an [`EngineError`] directly.

mod error;
mod ledger;
mod merge;
mod processor;
mod queue;


pub use error::EngineError;
pub use ledger::{LedgerSummary, Want};

use crate::block::{Block, Cid};
use crate::blockstore::BlockStore;
use crate::message::{Message, WantType};
use crate::network::Network;
use crate::peer_id::PeerId;
use ledger::Ledger;
use parking_lot::Mutex;
use queue::{RequestQueue, Task};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on one outbound message.
    pub max_message_size: usize,
    /// Soft per-batch byte target; `0` falls back to `max_message_size`.
    pub target_message_size: usize,
    /// A have-want whose block is at most this large is answered with the
    /// block itself (plus the Have). `0` disables the promotion.
    pub max_size_replace_has_with_block: usize,
    /// Debounce window for coalescing bursts of enqueues.
    pub task_coalesce_delay: Duration,
    /// Per-send deadline; a timed-out send counts as failed.
    pub send_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_message_size: 512 * 1024,
            target_message_size: 16 * 1024,
            max_size_replace_has_with_block: 1024,
            task_coalesce_delay: Duration::from_millis(10),
            send_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    fn pop_budget(&self) -> usize {
        if self.target_message_size > 0 {
            self.target_message_size.min(self.max_message_size)
        } else {
            self.max_message_size
        }
    }
}

/// Telemetry events, delivered best-effort through
/// [`Engine::event_stream`].
#[derive(Debug)]
pub enum EngineEvent {
    /// A wantlist message was ingested.
    MessageReceived { from: PeerId },
    /// An outbound message hit the network successfully.
    MessageSent {
        to: PeerId,
        blocks: usize,
        bytes: usize,
    },
    /// Something went wrong; the engine carried on.
    Error { peer: PeerId, error: EngineError },
}

pub(crate) struct State {
    pub(crate) ledgers: HashMap<PeerId, Ledger>,
    pub(crate) queue: RequestQueue,
}

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn BlockStore>,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) state: Mutex<State>,
    pub(crate) work: Notify,
    pub(crate) running: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
}

impl Shared {
    pub(crate) fn emit(&self, event: EngineEvent) {
        let mut guard = self.events.lock();
        if let Some(tx) = guard.as_ref() {
            if tx.send(event).is_err() {
                *guard = None;
            }
        }
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The decision engine facade.
///
/// Construct with a block store and a network, call [`start`](Self::start),
/// then feed it [`message_received`](Self::message_received) and
/// [`received_blocks`](Self::received_blocks); it sends responses through
/// the network on its own schedule.
pub struct Engine {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn BlockStore>,
        network: Arc<dyn Network>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                network,
                state: Mutex::new(State {
                    ledgers: HashMap::new(),
                    queue: RequestQueue::new(),
                }),
                work: Notify::new(),
                running: AtomicBool::new(false),
                events: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Installs a telemetry subscriber, replacing any prior one.
    pub fn event_stream(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.events.lock() = Some(tx);
        rx
    }

    /// Spawns the processor. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shared.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(processor::run(self.shared.clone(), shutdown_rx));
        *worker = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stops the processor, aborting any in-flight send, then discards all
    /// queued tasks and ledgers.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return Err(EngineError::NotStarted);
        };
        self.shared.running.store(false, Ordering::SeqCst);
        let _ = worker.shutdown.send(true);
        self.shared.work.notify_one();
        let _ = worker.handle.await;

        let mut state = self.shared.state.lock();
        state.queue.clear();
        state.ledgers.clear();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Ingests a wantlist message from a peer.
    ///
    /// Returns once the ledger reflects the message; it never waits for an
    /// outbound send. Blocks that fail verification are dropped from the
    /// accounting and reported on the event stream.
    pub async fn message_received(&self, from: PeerId, message: &Message) {
        if !self.is_running() {
            trace!(peer = %from, "message before start; ignored");
            return;
        }

        let forged = message.blocks.iter().filter(|b| !b.verify()).count();
        let mut pending_entries = Vec::new();
        {
            let mut state = self.shared.state.lock();
            let State { ledgers, queue } = &mut *state;
            let ledger = ledgers.entry(from).or_insert_with(Ledger::new);

            ledger.account_received(message.encoded_len());
            ledger.add_blocks_received(message.blocks.len() - forged);

            if message.full {
                ledger.clear_wantlist();
                queue.clear_pending(&from);
            }

            for entry in &message.wantlist {
                if entry.cancel {
                    ledger.cancel_want(&entry.cid);
                    queue.cancel_pending(&from, &entry.cid);
                } else {
                    ledger.wants(
                        entry.cid.clone(),
                        entry.priority,
                        entry.want_type,
                        entry.send_dont_have,
                    );
                    pending_entries.push(entry.clone());
                }
            }
        }

        if forged > 0 {
            warn!(peer = %from, forged, "message carried blocks failing verification");
            self.shared.emit(EngineEvent::Error {
                peer: from,
                error: EngineError::InvalidMessage(format!(
                    "{forged} block(s) failed verification"
                )),
            });
        }
        self.shared.emit(EngineEvent::MessageReceived { from });

        if pending_entries.is_empty() {
            return;
        }

        // Size lookups happen outside the state lock; the ledger is
        // re-checked afterwards in case a cancel raced the lookups.
        let mut sized = Vec::with_capacity(pending_entries.len());
        for entry in pending_entries {
            match self.shared.store.get_size(&entry.cid).await {
                Ok(size) => sized.push((entry, size)),
                Err(err) => {
                    warn!(cid = %entry.cid, error = %err, "dropping want: block store size lookup failed");
                    self.shared.emit(EngineEvent::Error {
                        peer: from,
                        error: EngineError::BlockStore(err),
                    });
                }
            }
        }

        let mut pushed = false;
        {
            let mut state = self.shared.state.lock();
            let State { ledgers, queue } = &mut *state;
            let Some(ledger) = ledgers.get(&from) else {
                return;
            };

            let mut tasks = Vec::new();
            for (entry, size) in sized {
                if ledger.peer_wants(&entry.cid).is_none() {
                    continue;
                }
                let presence = Message::presence_len(&entry.cid);
                let task = match (entry.want_type, size) {
                    (WantType::Block, Some(size)) => Task::new(
                        entry.cid,
                        entry.priority,
                        WantType::Block,
                        entry.send_dont_have,
                        size,
                    ),
                    (WantType::Have, Some(_)) => Task::new(
                        entry.cid,
                        entry.priority,
                        WantType::Have,
                        entry.send_dont_have,
                        presence,
                    ),
                    // Absent blocks only get a response when the peer asked
                    // for the negative.
                    (_, None) if entry.send_dont_have => Task::new(
                        entry.cid,
                        entry.priority,
                        entry.want_type,
                        true,
                        presence,
                    ),
                    (_, None) => continue,
                };
                tasks.push(task);
            }
            if !tasks.is_empty() {
                queue.push_tasks(from, tasks);
                pushed = true;
            }
        }

        if pushed {
            self.shared.work.notify_one();
        }
    }

    /// Notifies the engine that blocks were stored locally.
    ///
    /// Every peer ledger is scanned for outstanding wants on the arrived
    /// cids; matching wants become tasks. A have-want whose block fits the
    /// promotion threshold is upgraded to ship the block itself.
    pub fn received_blocks(&self, blocks: &[Block]) {
        if !self.is_running() {
            trace!("blocks before start; ignored");
            return;
        }

        let threshold = self.shared.config.max_size_replace_has_with_block;
        let mut pushed = false;
        {
            let mut state = self.shared.state.lock();
            let State { ledgers, queue } = &mut *state;
            for block in blocks {
                for (peer, ledger) in ledgers.iter() {
                    let Some(want) = ledger.peer_wants(&block.cid) else {
                        continue;
                    };
                    let presence = Message::presence_len(&block.cid);
                    let task = match want.want_type {
                        WantType::Block => Task::new(
                            block.cid.clone(),
                            want.priority,
                            WantType::Block,
                            want.send_dont_have,
                            block.len(),
                        ),
                        WantType::Have if threshold > 0 && block.len() <= threshold => {
                            let mut task = Task::new(
                                block.cid.clone(),
                                want.priority,
                                WantType::Have,
                                want.send_dont_have,
                                block.len() + presence,
                            );
                            task.promoted = true;
                            task
                        }
                        WantType::Have => Task::new(
                            block.cid.clone(),
                            want.priority,
                            WantType::Have,
                            want.send_dont_have,
                            presence,
                        ),
                    };
                    queue.push_tasks(*peer, vec![task]);
                    pushed = true;
                }
            }
        }

        if pushed {
            self.shared.work.notify_one();
        }
    }

    /// Records a network-confirmed send of one block to a peer.
    ///
    /// This is the hook for wrappers whose transport delivers blocks
    /// outside the processor (the processor accounts its own sends; do not
    /// wire both for the same message or bytes will be counted twice).
    pub fn message_sent(&self, peer: PeerId, cid: &Cid, bytes: usize) {
        if !self.is_running() {
            return;
        }
        let mut state = self.shared.state.lock();
        let ledger = state.ledgers.entry(peer).or_insert_with(Ledger::new);
        ledger.account_sent(bytes);
        ledger.add_blocks_sent(1);
        ledger.cancel_want(cid);
    }

    /// Creates the peer's ledger row.
    pub fn peer_connected(&self, peer: PeerId) {
        if !self.is_running() {
            return;
        }
        let mut state = self.shared.state.lock();
        state.ledgers.entry(peer).or_insert_with(Ledger::new);
    }

    /// Drops the peer's ledger and all of its queued tasks.
    pub fn peer_disconnected(&self, peer: PeerId) {
        if !self.is_running() {
            return;
        }
        let mut state = self.shared.state.lock();
        state.ledgers.remove(&peer);
        state.queue.remove(&peer);
    }

    /// Peers currently known to the engine.
    pub fn peers(&self) -> Vec<PeerId> {
        self.shared.state.lock().ledgers.keys().copied().collect()
    }

    pub fn num_bytes_sent_to(&self, peer: &PeerId) -> u64 {
        self.shared
            .state
            .lock()
            .ledgers
            .get(peer)
            .map(|ledger| ledger.bytes_sent())
            .unwrap_or(0)
    }

    pub fn num_bytes_received_from(&self, peer: &PeerId) -> u64 {
        self.shared
            .state
            .lock()
            .ledgers
            .get(peer)
            .map(|ledger| ledger.bytes_received())
            .unwrap_or(0)
    }

    /// Snapshot of a peer's outstanding wants.
    pub fn wantlist_for(&self, peer: &PeerId) -> Vec<Want> {
        self.shared
            .state
            .lock()
            .ledgers
            .get(peer)
            .map(|ledger| ledger.wantlist())
            .unwrap_or_default()
    }

    /// Accounting snapshot for a peer, or `None` when unknown.
    pub fn ledger_summary(&self, peer: &PeerId) -> Option<LedgerSummary> {
        self.shared
            .state
            .lock()
            .ledgers
            .get(peer)
            .map(|ledger| ledger.summary(*peer))
    }

    #[cfg(test)]
    pub(crate) fn queue_sizes(&self, peer: &PeerId) -> (usize, usize) {
        let state = self.shared.state.lock();
        (
            state.queue.pending_len(peer),
            state.queue.active_len(peer),
        )
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.shutdown.send(true);
            worker.handle.abort();
        }
    }
}
