//! The consumer loop: pops task batches, renders them against the block
//! store, and hands assembled messages to the network.
//!
//! The loop suspends in exactly two places — block store reads and the
//! network send — and never while holding the state lock. A failed send
//! still marks its batch done; nothing is ever stranded in `active`.

use crate::block::{Block, Cid};
use crate::message::{BlockPresenceType, Message, WantType};
use crate::network::NetworkError;
use crate::peer_id::PeerId;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::ledger::Ledger;
use super::queue::Task;
use super::{EngineError, EngineEvent, Shared};

pub(super) async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shared.work.notified() => {}
            _ = shutdown.changed() => return,
        }

        // Coalesce bursts of enqueues into one assembly pass.
        let delay = shared.config.task_coalesce_delay;
        if !delay.is_zero() {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }

        loop {
            if *shutdown.borrow() {
                return;
            }
            let budget = shared.config.pop_budget();
            let popped = shared.state.lock().queue.pop_tasks(budget);
            let Some((peer, tasks)) = popped else {
                break;
            };
            serve_batch(&shared, &mut shutdown, peer, tasks).await;
        }
    }
}

/// Renders one batch into a message and sends it.
async fn serve_batch(
    shared: &Arc<Shared>,
    shutdown: &mut watch::Receiver<bool>,
    peer: PeerId,
    tasks: Vec<Task>,
) {
    let mut message = Message::new();
    // Block-level wants completed by this batch; their ledger entries are
    // consumed so arriving blocks do not re-trigger them.
    let mut consumed: Vec<Cid> = Vec::new();

    for task in &tasks {
        if task.sends_block() {
            match shared.store.get(&task.cid).await {
                Ok(Some(data)) => {
                    if task.promoted {
                        message.add_presence(task.cid.clone(), BlockPresenceType::Have);
                    }
                    message.add_block(Block::new(task.cid.clone(), data));
                    consumed.push(task.cid.clone());
                }
                Ok(None) => {
                    if task.send_dont_have {
                        message.add_presence(task.cid.clone(), BlockPresenceType::DontHave);
                    }
                    if task.want_type == WantType::Block {
                        consumed.push(task.cid.clone());
                    }
                }
                Err(err) => {
                    warn!(cid = %task.cid, error = %err, "dropping task: block store read failed");
                    if task.want_type == WantType::Block {
                        consumed.push(task.cid.clone());
                    }
                    shared.emit(EngineEvent::Error {
                        peer,
                        error: EngineError::BlockStore(err),
                    });
                }
            }
        } else {
            match shared.store.has(&task.cid).await {
                Ok(true) => {
                    message.add_presence(task.cid.clone(), BlockPresenceType::Have);
                }
                Ok(false) => {
                    if task.send_dont_have {
                        message.add_presence(task.cid.clone(), BlockPresenceType::DontHave);
                    }
                }
                Err(err) => {
                    warn!(cid = %task.cid, error = %err, "dropping task: block store read failed");
                    shared.emit(EngineEvent::Error {
                        peer,
                        error: EngineError::BlockStore(err),
                    });
                }
            }
        }
    }

    // The hint covers what is still queued for this peer beyond the batch.
    message.pending_bytes = shared.state.lock().queue.pending_bytes(&peer) as i32;

    if message.is_empty() {
        let mut state = shared.state.lock();
        state.queue.tasks_done(peer, &tasks);
        if let Some(ledger) = state.ledgers.get_mut(&peer) {
            for cid in &consumed {
                ledger.cancel_want(cid);
            }
        }
        return;
    }

    let bytes = message.encoded_len();
    let blocks = message.blocks.len();

    let result = tokio::select! {
        _ = shutdown.changed() => Err(NetworkError::Closed),
        sent = timeout(shared.config.send_timeout, shared.network.send_message(peer, message)) => {
            match sent {
                Ok(inner) => inner,
                Err(_) => Err(NetworkError::Timeout),
            }
        }
    };

    {
        let mut state = shared.state.lock();
        state.queue.tasks_done(peer, &tasks);
        if result.is_ok() {
            let ledger = state.ledgers.entry(peer).or_insert_with(Ledger::new);
            ledger.account_sent(bytes);
            ledger.add_blocks_sent(blocks);
            for cid in &consumed {
                ledger.cancel_want(cid);
            }
        }
    }

    match result {
        Ok(()) => {
            debug!(peer = %peer, blocks, bytes, "sent message");
            shared.emit(EngineEvent::MessageSent { to: peer, blocks, bytes });
        }
        Err(err) => {
            warn!(peer = %peer, error = %err, "send failed; batch consumed, remote will re-ask");
            shared.emit(EngineEvent::Error {
                peer,
                error: EngineError::NetworkSend(err),
            });
        }
    }
}
