//! Client clock synchronization
//!
//! Each tank gets a background task that pings the client a few times,
//! storing the measured clock offset after every sample and the average
//! latency at the end. A client that stops answering is reported gone.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

use super::{Tank, TankId};
use crate::notify::Notifier;
use crate::util::time::unix_millis;
use crate::ws::protocol::ServerMsg;

pub const SYNC_SAMPLES: u32 = 6;
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
/// Tanks are re-synced when their last sync is older than this
pub const RESYNC_INTERVAL_MS: u64 = 60_000;

/// A client's answer to one request
#[derive(Debug, Clone, Copy)]
struct Reply {
    client_time: i64,
    received_at: u64,
    arrived: Instant,
}

struct Waiting {
    seq: u32,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
pub struct ClockSync {
    tasks: DashMap<TankId, JoinHandle<()>>,
    waiting: Arc<DashMap<TankId, Waiting>>,
    seq: Arc<AtomicU32>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) synchronizing `tank`
    pub fn start(&self, tank: Arc<Tank>, notifier: Arc<Notifier>) {
        let id = tank.id();
        self.stop(id);

        let waiting = self.waiting.clone();
        let seq = self.seq.clone();
        let handle = tokio::spawn(async move {
            if synchronize(&tank, &notifier, &waiting, &seq).await.is_err() {
                info!(tank_id = id, name = tank.name(), "Clock sync failed, removing player");
                waiting.remove(&id);
                notifier.report_gone(id);
            }
        });
        self.tasks.insert(id, handle);
    }

    /// Cancel any sync in progress for `id`
    pub fn stop(&self, id: TankId) {
        if let Some((_, handle)) = self.tasks.remove(&id) {
            handle.abort();
        }
        self.waiting.remove(&id);
    }

    pub fn is_running(&self, id: TankId) -> bool {
        self.tasks
            .get(&id)
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Deliver a client's reply. Stale or unexpected replies are ignored.
    pub fn reply(&self, id: TankId, seq: u32, client_time: i64) -> bool {
        let Some((_, waiting)) = self.waiting.remove_if(&id, |_, w| w.seq == seq) else {
            debug!(tank_id = id, seq, "Unexpected clock sync reply");
            return false;
        };
        waiting
            .reply
            .send(Reply {
                client_time,
                received_at: unix_millis(),
                arrived: Instant::now(),
            })
            .is_ok()
    }
}

/// Client did not answer in time
struct SyncFailed;

async fn synchronize(
    tank: &Tank,
    notifier: &Notifier,
    waiting: &DashMap<TankId, Waiting>,
    seq: &AtomicU32,
) -> Result<(), SyncFailed> {
    let id = tank.id();
    tank.set_last_sync(unix_millis());

    let mut latency_sum = 0u64;
    for _ in 0..SYNC_SAMPLES {
        sleep(SAMPLE_INTERVAL).await;

        let (tx, rx) = oneshot::channel();
        let seq = seq.fetch_add(1, Ordering::Relaxed);
        waiting.insert(id, Waiting { seq, reply: tx });

        let sent = Instant::now();
        if !notifier.send(id, ServerMsg::ClockSyncRequest { seq }) {
            return Err(SyncFailed);
        }

        let reply = match timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            _ => return Err(SyncFailed),
        };

        tank.touch(reply.received_at);
        latency_sum += reply.arrived.duration_since(sent).as_millis() as u64 / 2;
        tank.set_offset(reply.client_time - reply.received_at as i64);
    }

    let latency = latency_sum / u64::from(SYNC_SAMPLES);
    tank.set_latency(latency);
    debug!(tank_id = id, latency, offset = tank.offset(), "Clock synchronized");
    Ok(())
}
