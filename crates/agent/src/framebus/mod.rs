//! Frame bus — per-device bounded streams of decoded frames with a
//! fan-in cache serving `latest` reads, buffered range reads and probes.

pub mod device;
pub mod fifo;
pub mod keys;

use std::time::Duration;

use base64::Engine;
use redis::aio::ConnectionManager;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

pub use device::{DeviceMap, IDLE_SHUTDOWN_MS};
pub use fifo::{FrameRecord, FIFO_CAPACITY};

/// Upper bound on one `latest` call.
pub const LATEST_CALL_CAP: Duration = Duration::from_millis(100);
/// `buffered` gives up after this long without progress.
pub const BUFFERED_STALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Envelope published on the decode control channel for range reads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DecodeRequest {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "fromTimestamp")]
    pub from_timestamp: i64,
    #[serde(rename = "toTimestamp")]
    pub to_timestamp: i64,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl DecodeRequest {
    pub fn encode(&self) -> serde_json::Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }
}

/// Probe result: codec sidecar plus buffer extent.
#[derive(Serialize, Debug, Clone, Default)]
pub struct BufferProbe {
    pub codec: Option<String>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ms: i64,
    pub frame_count: u64,
    pub fps: f64,
}

#[derive(Clone)]
pub struct FrameBus {
    conn: ConnectionManager,
    devices: DeviceMap,
}

impl FrameBus {
    pub fn new(conn: ConnectionManager) -> Self {
        FrameBus {
            conn,
            devices: DeviceMap::default(),
        }
    }

    /// Number of live per-device readers (used by shutdown and tests).
    pub fn active_devices(&self) -> usize {
        self.devices.len()
    }

    /// Next unread frame for `device`, waiting up to ~100 ms; falls back
    /// to the previously served frame. Every call records the consumer
    /// poll and the keyframe-only flag.
    pub async fn latest(&self, device: &str, key_frame_only: bool) -> Result<Option<FrameRecord>> {
        if let Err(e) = keys::touch_last_access(self.conn.clone(), device).await {
            warn!(device, error = %e, "failed to record consumer poll");
        }
        if let Err(e) = keys::set_keyframe_only(self.conn.clone(), device, key_frame_only).await {
            warn!(device, error = %e, "failed to record keyframe flag");
        }

        let actor = device::actor_for(&self.devices, self.conn.clone(), device);
        actor.touch();

        if let Some(record) = actor.fifo.lock().pop() {
            *actor.last_served.lock() = Some(record.clone());
            return Ok(Some(record));
        }

        // No unread frame yet: wait for the reader, bounded by the call cap.
        let _ = tokio::time::timeout(LATEST_CALL_CAP, actor.notify.notified()).await;

        let fresh = actor.fifo.lock().pop();
        match fresh {
            Some(record) => {
                *actor.last_served.lock() = Some(record.clone());
                Ok(Some(record))
            }
            None => Ok(actor.last_served.lock().clone()),
        }
    }

    /// First/last stream ids → duration, count and approximate fps, with
    /// the codec sidecar attached.
    pub async fn probe(&self, device: &str) -> Result<BufferProbe> {
        let mut conn = self.conn.clone();

        let first: StreamRangeReply = conn.xrange_count(device, "-", "+", 1).await?;
        let last: StreamRangeReply = conn.xrevrange_count(device, "+", "-", 1).await?;
        let count: u64 = conn.xlen(device).await?;

        let start_ms = first
            .ids
            .first()
            .and_then(|entry| entry.id.split('-').next()?.parse().ok())
            .unwrap_or(0);
        let end_ms = last
            .ids
            .first()
            .and_then(|entry| entry.id.split('-').next()?.parse().ok())
            .unwrap_or(0);
        let duration_ms = (end_ms - start_ms).max(0);
        let fps = if duration_ms > 0 {
            count as f64 / (duration_ms as f64 / 1000.0)
        } else {
            0.0
        };

        Ok(BufferProbe {
            codec: keys::codec_info(self.conn.clone(), device).await?,
            start_ms,
            end_ms,
            duration_ms,
            frame_count: count,
            fps,
        })
    }

    /// Request a buffered range decode and stream the frames back.
    ///
    /// The per-request stream is deleted on every exit path: end-of-stream
    /// sentinel, stall timeout, and caller cancellation (detected as the
    /// receiver side dropping).
    pub async fn buffered(
        &self,
        device: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<ReceiverStream<FrameRecord>> {
        let request = DecodeRequest {
            device_id: device.to_string(),
            from_timestamp: from_ms,
            to_timestamp: to_ms,
            request_id: Uuid::new_v4().to_string(),
        };
        let encoded = request.encode()?;

        let mut conn = self.conn.clone();
        let _: i64 = conn
            .publish(keys::DECODE_REQUEST_CHANNEL, encoded)
            .await?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(forward_request_stream(
            self.conn.clone(),
            request.request_id.clone(),
            tx,
        ));

        Ok(ReceiverStream::new(rx))
    }
}

/// Forward decoded frames from the per-request stream, deleting consumed
/// ids, until the empty-payload sentinel, a stall, or a dropped receiver.
async fn forward_request_stream(
    mut conn: ConnectionManager,
    request_id: String,
    tx: mpsc::Sender<FrameRecord>,
) {
    let mut cursor = "0".to_string();
    let mut last_progress = tokio::time::Instant::now();

    'outer: loop {
        if last_progress.elapsed() >= BUFFERED_STALL_TIMEOUT {
            warn!(request_id, "buffered read stalled, giving up");
            break;
        }

        let options = StreamReadOptions::default().block(1000).count(100);
        let reply: std::result::Result<StreamReadReply, _> = conn
            .xread_options(&[request_id.as_str()], &[cursor.as_str()], &options)
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(request_id, error = %e, "buffered stream read failed");
                tokio::time::sleep(Duration::from_millis(250)).await;
                continue;
            }
        };

        for key in reply.keys {
            for entry in key.ids {
                let payload = entry
                    .map
                    .get("data")
                    .and_then(|v| redis::from_redis_value::<Vec<u8>>(v).ok())
                    .unwrap_or_default();
                cursor = entry.id.clone();
                last_progress = tokio::time::Instant::now();

                if payload.is_empty() {
                    debug!(request_id, "buffered end-of-stream sentinel");
                    break 'outer;
                }

                let record = FrameRecord {
                    id: entry.id.clone(),
                    payload: payload.into(),
                };
                if tx.send(record).await.is_err() {
                    debug!(request_id, "buffered caller went away");
                    break 'outer;
                }
                let _: std::result::Result<i64, _> =
                    conn.xdel(request_id.as_str(), &[entry.id.as_str()]).await;
            }
        }
    }

    let _: std::result::Result<i64, _> = conn.del(request_id.as_str()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_request_wire_keys() {
        let request = DecodeRequest {
            device_id: "cam1".to_string(),
            from_timestamp: 100,
            to_timestamp: 200,
            request_id: "req-1".to_string(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["deviceId"], "cam1");
        assert_eq!(value["fromTimestamp"], 100);
        assert_eq!(value["toTimestamp"], 200);
        assert_eq!(value["requestId"], "req-1");
    }

    #[test]
    fn decode_request_base64_roundtrip() {
        let request = DecodeRequest {
            device_id: "cam1".to_string(),
            from_timestamp: 1,
            to_timestamp: 2,
            request_id: "r".to_string(),
        };
        let encoded = request.encode().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let back: DecodeRequest = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn probe_fps_math() {
        // 300 frames over 10 s ≈ 30 fps; computed inline as in probe().
        let count = 300u64;
        let duration_ms = 10_000i64;
        let fps = count as f64 / (duration_ms as f64 / 1000.0);
        assert!((fps - 30.0).abs() < f64::EPSILON);
    }
}
