//! Best-effort push delivery to connected clients
//!
//! Every joined tank owns an outbound channel drained by its websocket
//! writer task. A closed channel is the only signal that a peer went away:
//! the id is handed to the reaper instead of blocking the sender.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::TankId;
use crate::ws::protocol::ServerMsg;

/// Outbound queue depth per client
pub const CLIENT_QUEUE_DEPTH: usize = 256;

pub struct Notifier {
    clients: DashMap<TankId, mpsc::Sender<ServerMsg>>,
    gone_tx: mpsc::UnboundedSender<TankId>,
    closed: AtomicBool,
}

impl Notifier {
    /// Returns the notifier and the stream of peers found to be gone
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TankId>) {
        let (gone_tx, gone_rx) = mpsc::unbounded_channel();
        let notifier = Self {
            clients: DashMap::new(),
            gone_tx,
            closed: AtomicBool::new(false),
        };
        (notifier, gone_rx)
    }

    pub fn register(&self, id: TankId, tx: mpsc::Sender<ServerMsg>) {
        self.clients.insert(id, tx);
    }

    pub fn unregister(&self, id: TankId) -> bool {
        self.clients.remove(&id).is_some()
    }

    pub fn is_registered(&self, id: TankId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Deliver to one client. Returns false if the message was not queued.
    pub fn send(&self, id: TankId, msg: ServerMsg) -> bool {
        let Some(tx) = self.clients.get(&id).map(|entry| entry.value().clone()) else {
            return false;
        };
        self.deliver(id, &tx, msg)
    }

    pub fn broadcast(&self, msg: ServerMsg) {
        self.broadcast_filtered(|_| true, msg);
    }

    /// Deliver to everyone but `except`
    pub fn broadcast_except(&self, except: TankId, msg: ServerMsg) {
        self.broadcast_filtered(|id| id != except, msg);
    }

    fn broadcast_filtered(&self, include: impl Fn(TankId) -> bool, msg: ServerMsg) {
        // Snapshot the senders so no shard lock is held while delivering
        let targets: Vec<(TankId, mpsc::Sender<ServerMsg>)> = self
            .clients
            .iter()
            .filter(|entry| include(*entry.key()))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (id, tx) in targets {
            self.deliver(id, &tx, msg.clone());
        }
    }

    fn deliver(&self, id: TankId, tx: &mpsc::Sender<ServerMsg>, msg: ServerMsg) -> bool {
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(tank_id = id, "Client queue full, dropping notification");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(tank_id = id, "Client channel closed during notification");
                self.report_gone(id);
                false
            }
        }
    }

    /// Report a peer as gone without sending anything
    pub fn report_gone(&self, id: TankId) {
        self.clients.remove(&id);
        let _ = self.gone_tx.send(id);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Mark the transport as shut down; the frame loop stops when it sees this
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
