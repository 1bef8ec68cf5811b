//! Local event bus — a single redis pub/sub channel carrying telemetry
//! envelopes between the adapters, the process controller and the cloud
//! bridge. Commands from the cloud and from local REST handlers traverse
//! the same channel so both execute identical controller code paths.

use std::pin::Pin;

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::cloud::telemetry::TelemetryEnvelope;
use crate::error::Result;

/// Channel name for process lifecycle events.
pub const LOCAL_EVENT_CHANNEL: &str = "edge:local:events";

/// Event publishing seam so domain managers can emit lifecycle events
/// without holding a redis connection (tests use an in-memory sink).
pub trait EventSink: Send + Sync {
    fn publish_event(
        &self,
        envelope: TelemetryEnvelope,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>>;
}

impl EventSink for LocalEventBus {
    fn publish_event(
        &self,
        envelope: TelemetryEnvelope,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.publish(&envelope).await })
    }
}

/// Sink that drops every event; for components running before redis is up
/// and for tests that don't assert on events.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish_event(
        &self,
        _envelope: TelemetryEnvelope,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Clone)]
pub struct LocalEventBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl LocalEventBus {
    pub fn new(client: redis::Client, conn: ConnectionManager) -> Self {
        LocalEventBus { client, conn }
    }

    /// Publish an envelope. Failures are transient; callers log and move on.
    pub async fn publish(&self, envelope: &TelemetryEnvelope) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(LOCAL_EVENT_CHANNEL, payload).await?;
        Ok(())
    }

    /// Subscribe to the channel. Undecodable payloads are logged and
    /// skipped; the stream ends when the connection drops.
    pub async fn subscribe(
        &self,
    ) -> Result<UnboundedReceiverStream<TelemetryEnvelope>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(crate::error::AgentError::from)?;
        pubsub.subscribe(LOCAL_EVENT_CHANNEL).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to read local bus payload");
                        continue;
                    }
                };
                match serde_json::from_slice::<TelemetryEnvelope>(&payload) {
                    Ok(envelope) => {
                        if tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to decode local bus envelope");
                    }
                }
            }
        });

        Ok(UnboundedReceiverStream::new(rx))
    }
}
