//! Per-device actor — a background reader filling a bounded FIFO.
//!
//! Born lazily on the first `latest` call for a device; terminates itself
//! and purges the per-device state when no poll has arrived for
//! [`IDLE_SHUTDOWN_MS`]. That self-cleanup is what keeps disconnected
//! clients from leaking readers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::fifo::{FrameFifo, FrameRecord};

/// Reader dies after this long without a consumer poll.
pub const IDLE_SHUTDOWN_MS: i64 = 10_000;
/// Blocking read window per XREAD.
const READ_BLOCK_MS: usize = 50;
const READ_COUNT: usize = 60;

pub type DeviceMap = Arc<DashMap<String, Arc<DeviceActor>>>;

pub struct DeviceActor {
    pub fifo: Mutex<FrameFifo>,
    pub notify: Notify,
    last_poll_ms: AtomicI64,
    /// Most recently served frame, returned when no fresh one arrives.
    pub last_served: Mutex<Option<FrameRecord>>,
    cancel: CancellationToken,
}

impl DeviceActor {
    fn new() -> Self {
        DeviceActor {
            fifo: Mutex::new(FrameFifo::new()),
            notify: Notify::new(),
            last_poll_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            last_served: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn touch(&self) {
        self.last_poll_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.last_poll_ms.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Get or lazily create the actor for `device`, spawning its reader.
pub fn actor_for(devices: &DeviceMap, conn: ConnectionManager, device: &str) -> Arc<DeviceActor> {
    use dashmap::mapref::entry::Entry;

    match devices.entry(device.to_string()) {
        Entry::Occupied(entry) => {
            let actor = entry.get().clone();
            actor.touch();
            actor
        }
        Entry::Vacant(entry) => {
            let actor = Arc::new(DeviceActor::new());
            entry.insert(actor.clone());
            tokio::spawn(reader_loop(
                devices.clone(),
                conn,
                device.to_string(),
                actor.clone(),
            ));
            actor
        }
    }
}

/// Background reader: XREAD into the FIFO until idle shutdown.
async fn reader_loop(
    devices: DeviceMap,
    mut conn: ConnectionManager,
    device: String,
    actor: Arc<DeviceActor>,
) {
    debug!(device, "frame reader started");
    // Start at the stream tail: only frames decoded from now on matter.
    let mut cursor = "$".to_string();

    loop {
        if actor.cancel.is_cancelled() {
            break;
        }
        if actor.idle_for_ms() >= IDLE_SHUTDOWN_MS {
            debug!(device, "frame reader idle, shutting down");
            break;
        }

        let options = StreamReadOptions::default()
            .block(READ_BLOCK_MS)
            .count(READ_COUNT);
        let reply: Result<StreamReadReply, _> = conn
            .xread_options(&[device.as_str()], &[cursor.as_str()], &options)
            .await;

        match reply {
            Ok(reply) => {
                let mut pushed = false;
                for key in reply.keys {
                    for entry in key.ids {
                        let payload = entry
                            .map
                            .get("data")
                            .and_then(|v| redis::from_redis_value::<Vec<u8>>(v).ok())
                            .unwrap_or_default();
                        cursor = entry.id.clone();
                        actor.fifo.lock().push(FrameRecord {
                            id: entry.id,
                            payload: payload.into(),
                        });
                        pushed = true;
                    }
                }
                if pushed {
                    actor.notify.notify_waiters();
                }
            }
            Err(e) => {
                warn!(device, error = %e, "frame stream read failed");
                tokio::time::sleep(std::time::Duration::from_millis(READ_BLOCK_MS as u64)).await;
            }
        }
    }

    devices.remove(&device);
    debug!(device, "frame reader stopped, state purged");
}
