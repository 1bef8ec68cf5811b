//! Annotation batch consumer — coalesces queued events into signed HTTP
//! batches and drives the 5 s rejected-requeue loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::annotate::model::{AnnotationEvent, AnnotationList};
use crate::annotate::queue::{Delivery, DurableQueue};
use crate::cloud::api::call_api_with_body;
use crate::error::Result;
use crate::settings::SettingsManager;

/// Queue name shared with the gRPC `annotate` producer.
pub const ANNOTATION_QUEUE: &str = "annotations";

/// Rejected batches are re-queued on this interval.
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(5);

pub struct AnnotationBatcher {
    queue: DurableQueue,
    settings: Arc<SettingsManager>,
    http: reqwest::Client,
    endpoint: String,
    max_batch: usize,
    poll: Duration,
}

impl AnnotationBatcher {
    pub fn new(
        queue: DurableQueue,
        settings: Arc<SettingsManager>,
        endpoint: String,
        max_batch: usize,
        poll: Duration,
    ) -> Self {
        AnnotationBatcher {
            queue,
            settings,
            http: reqwest::Client::new(),
            endpoint,
            max_batch,
            poll,
        }
    }

    /// Validate and enqueue one event. Validation failures surface to the
    /// caller; enqueued events are delivered at least once.
    pub async fn annotate(&self, event: &AnnotationEvent) -> Result<()> {
        event.validate()?;
        let payload = serde_json::to_vec(event)?;
        self.queue.enqueue(&payload).await
    }

    /// Batch consumer loop: pull, ship, ack on 2xx, reject otherwise.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("annotation consumer stopped");
                    return;
                }
                batch = self.queue.consume_batch(self.max_batch, self.poll.as_secs_f64()) => {
                    match batch {
                        Ok(batch) if batch.is_empty() => {}
                        Ok(batch) => self.process_batch(batch).await,
                        Err(e) => {
                            warn!(error = %e, "annotation queue read failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    /// 5 s loop re-queuing previously rejected batches.
    pub async fn requeue_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(REQUEUE_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    match self.queue.return_all_rejected().await {
                        Ok(0) => {}
                        Ok(moved) => info!(moved, "re-queued previously rejected annotations"),
                        Err(e) => warn!(error = %e, "rejected requeue failed"),
                    }
                }
            }
        }
    }

    async fn process_batch(&self, batch: Vec<Delivery>) {
        if self.endpoint.is_empty() {
            error!("annotation endpoint not configured, rejecting batch");
            self.reject(&batch).await;
            return;
        }

        let (key, secret) = match self.settings.current_edge_credentials() {
            Ok(creds) => creds,
            Err(e) => {
                error!(error = %e, "missing edge credentials, rejecting batch");
                self.reject(&batch).await;
                return;
            }
        };

        let (events, dropped) = decode_batch(&batch);
        // Undecodable payloads are dropped for good: ack them so they never
        // come back.
        if !dropped.is_empty() {
            self.ack(&dropped).await;
        }
        if events.is_empty() {
            return;
        }

        let kept: Vec<Delivery> = batch
            .into_iter()
            .filter(|d| !dropped.contains(d))
            .collect();
        let body = AnnotationList { data: events };

        match call_api_with_body(
            &self.http,
            reqwest::Method::POST,
            &self.endpoint,
            &body,
            &key,
            &secret,
        )
        .await
        {
            Ok(_) => self.ack(&kept).await,
            Err(e) => {
                warn!(error = %e, count = kept.len(), "annotation batch rejected");
                self.reject(&kept).await;
            }
        }
    }

    async fn ack(&self, deliveries: &[Delivery]) {
        if let Err(e) = self.queue.ack(deliveries).await {
            error!(error = %e, "failed to ack annotation batch");
        }
    }

    async fn reject(&self, deliveries: &[Delivery]) {
        if let Err(e) = self.queue.reject(deliveries).await {
            error!(error = %e, "failed to reject annotation batch");
        }
    }
}

/// Split a batch into decoded events and undecodable deliveries.
fn decode_batch(batch: &[Delivery]) -> (Vec<AnnotationEvent>, Vec<Delivery>) {
    let mut events = Vec::with_capacity(batch.len());
    let mut dropped = Vec::new();
    for delivery in batch {
        match serde_json::from_slice::<AnnotationEvent>(&delivery.payload) {
            Ok(event) => events.push(event),
            Err(e) => {
                error!(error = %e, "dropping undecodable annotation payload");
                dropped.push(delivery.clone());
            }
        }
    }
    (events, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery_of(event: &AnnotationEvent) -> Delivery {
        Delivery {
            payload: serde_json::to_vec(event).unwrap(),
        }
    }

    #[test]
    fn decode_batch_splits_garbage() {
        let good = AnnotationEvent {
            device_name: "cam1".to_string(),
            event_type: "moving".to_string(),
            start_timestamp: 1,
            ..Default::default()
        };
        let batch = vec![
            delivery_of(&good),
            Delivery {
                payload: b"not json".to_vec(),
            },
            delivery_of(&good),
        ];
        let (events, dropped) = decode_batch(&batch);
        assert_eq!(events.len(), 2);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].payload, b"not json".to_vec());
    }

    #[test]
    fn decode_batch_preserves_order() {
        let mut batch = Vec::new();
        for i in 0..5 {
            batch.push(delivery_of(&AnnotationEvent {
                device_name: format!("cam{}", i),
                event_type: "moving".to_string(),
                start_timestamp: i,
                ..Default::default()
            }));
        }
        let (events, dropped) = decode_batch(&batch);
        assert!(dropped.is_empty());
        let names: Vec<_> = events.iter().map(|e| e.device_name.as_str()).collect();
        assert_eq!(names, vec!["cam0", "cam1", "cam2", "cam3", "cam4"]);
    }
}
