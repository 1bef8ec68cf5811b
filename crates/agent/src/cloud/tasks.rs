//! Background tasks of the cloud bridge: check-in, stats, and the
//! container-event debouncer.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cloud::bridge::TelemetryPublisher;
use crate::cloud::telemetry::{ProcessOperation, ProcessType, TelemetryEnvelope};
use crate::process::model::ProcessStatus;
use crate::process::{AppManager, ProcessManager};
use crate::settings::SettingsManager;

pub const CHECKIN_INTERVAL: Duration = Duration::from_secs(60);
pub const STATS_INTERVAL: Duration = Duration::from_secs(300);
/// Burst window before a container event is compared and reported.
pub const EVENT_SETTLE_DELAY: Duration = Duration::from_secs(5);
const EVENT_HISTORY_CAP: usize = 10;

/// 128-bit signature of a runtime event, for burst deduplication.
pub fn event_signature(status: &str, actor_id: &str) -> String {
    format!("{:x}", md5::compute(format!("{}{}", status, actor_id)))
}

/// 128-bit digest of the fields that matter for `state` telemetry.
#[allow(clippy::too_many_arguments)]
pub fn process_digest(
    status: &str,
    container_id: &str,
    created_ms: i64,
    image_tag: &str,
    name: &str,
    egress_endpoint: &str,
    pull_endpoint: &str,
) -> String {
    let payload = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        status, container_id, created_ms, image_tag, name, egress_endpoint, pull_endpoint
    );
    format!("{:x}", md5::compute(payload))
}

/// Map a runtime event action to a reportable status.
pub fn action_to_status(action: &str) -> String {
    match action {
        "die" => ProcessStatus::Restarting.as_str().to_string(),
        "start" => ProcessStatus::Running.as_str().to_string(),
        other => other.to_string(),
    }
}

/// 60 s check-in: gateway state payload plus per-process digest diffing.
pub async fn checkin_loop(
    publisher: Arc<dyn TelemetryPublisher>,
    processes: Arc<ProcessManager>,
    apps: Arc<AppManager>,
    cancel: CancellationToken,
) {
    let digests: DashMap<String, String> = DashMap::new();
    let mut ticker = tokio::time::interval(CHECKIN_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        publisher
            .publish_gateway_state(chrono::Utc::now().timestamp().to_string())
            .await;
        publisher
            .publish(TelemetryEnvelope::new(
                ProcessOperation::CheckIn,
                ProcessType::Unknown,
            ))
            .await;

        match processes.list().await {
            Ok(devices) => {
                for device in devices {
                    let digest = process_digest(
                        device.status.as_str(),
                        device.container_id.as_deref().unwrap_or(""),
                        device.created,
                        &device.image_tag,
                        &device.name,
                        device.rtmp_endpoint.as_deref().unwrap_or(""),
                        &device.rtsp_endpoint,
                    );
                    let changed = digests
                        .insert(device.name.clone(), digest.clone())
                        .map_or(true, |previous| previous != digest);
                    if changed {
                        let mut envelope =
                            TelemetryEnvelope::new(ProcessOperation::State, ProcessType::Camera)
                                .with_device(&device.name)
                                .with_state(device.status.as_str());
                        envelope.image_tag = device.image_tag.clone();
                        envelope.rtsp_connection = Some(device.rtsp_endpoint.clone());
                        envelope.rtmp_endpoint = device.rtmp_endpoint.clone();
                        publisher.publish(envelope).await;
                    }
                }
            }
            Err(e) => warn!(error = %e, "check-in list failed"),
        }

        match apps.list().await {
            Ok(applications) => {
                for app in applications {
                    let digest = process_digest(
                        app.status.as_str(),
                        app.container_id.as_deref().unwrap_or(""),
                        app.created,
                        &app.image_tag(),
                        &app.name,
                        "",
                        "",
                    );
                    let changed = digests
                        .insert(app.name.clone(), digest.clone())
                        .map_or(true, |previous| previous != digest);
                    if changed {
                        let mut envelope = TelemetryEnvelope::new(
                            ProcessOperation::State,
                            ProcessType::Application,
                        )
                        .with_device(&app.name)
                        .with_state(app.status.as_str());
                        envelope.image_tag = app.image_tag();
                        publisher.publish(envelope).await;
                    }
                }
            }
            Err(e) => warn!(error = %e, "check-in app list failed"),
        }
    }
}

/// 5 min stats report.
pub async fn stats_loop(
    publisher: Arc<dyn TelemetryPublisher>,
    processes: Arc<ProcessManager>,
    settings: Arc<SettingsManager>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let gateway_id = settings
            .get()
            .map(|s| s.gateway_id)
            .unwrap_or_default();
        match processes.stats_all(&gateway_id).await {
            Ok(report) => {
                let mut envelope =
                    TelemetryEnvelope::new(ProcessOperation::Stats, ProcessType::Stats);
                match serde_json::to_value(&report) {
                    Ok(payload) => envelope.payload = Some(payload),
                    Err(e) => {
                        warn!(error = %e, "failed to encode stats payload");
                        continue;
                    }
                }
                publisher.publish(envelope).await;
            }
            Err(e) => warn!(error = %e, "stats collection failed"),
        }
    }
}

/// Per-device history of recent runtime events plus the last reported
/// signature. Debounces container restart bursts.
#[derive(Default)]
pub struct EventDebouncer {
    history: DashMap<String, Vec<bollard::models::EventMessage>>,
    notified: DashMap<String, String>,
}

impl EventDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event under its container name; history keeps the most
    /// recent [`EVENT_HISTORY_CAP`] entries.
    pub fn record(&self, event: bollard::models::EventMessage) -> Option<String> {
        let device = event
            .actor
            .as_ref()
            .and_then(|actor| actor.attributes.as_ref())
            .and_then(|attrs| attrs.get("name"))
            .cloned()?;

        let mut history = self.history.entry(device.clone()).or_default();
        if history.len() >= EVENT_HISTORY_CAP {
            let drop = history.len() + 1 - EVENT_HISTORY_CAP;
            history.drain(..drop);
        }
        history.push(event);
        Some(device)
    }

    /// The latest event for `device` when its signature differs from the
    /// last reported one. Call [`mark_notified`] after publishing.
    pub fn should_notify(&self, device: &str) -> Option<bollard::models::EventMessage> {
        let history = self.history.get(device)?;
        let latest = history.last()?.clone();
        let signature = Self::signature_of(&latest);
        match self.notified.get(device) {
            Some(previous) if *previous == signature => None,
            _ => Some(latest),
        }
    }

    pub fn mark_notified(&self, device: &str, event: &bollard::models::EventMessage) {
        self.notified
            .insert(device.to_string(), Self::signature_of(event));
    }

    fn signature_of(event: &bollard::models::EventMessage) -> String {
        let status = event.action.clone().unwrap_or_default();
        let actor_id = event
            .actor
            .as_ref()
            .and_then(|actor| actor.id.clone())
            .unwrap_or_default();
        event_signature(&status, &actor_id)
    }
}

/// Container-event listener: record, settle for 5 s, then report true
/// state changes as telemetry.
pub async fn event_listener(
    docker: Arc<dyn crate::client::ContainerOps>,
    processes: Arc<ProcessManager>,
    apps: Arc<AppManager>,
    publisher: Arc<dyn TelemetryPublisher>,
    cancel: CancellationToken,
) {
    use futures_util::StreamExt;

    let debouncer = Arc::new(EventDebouncer::new());
    let mut events = docker.stream_events(vec!["container".to_string()]);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.next() => event,
        };
        let Some(event) = event else {
            info!("runtime event stream ended");
            return;
        };
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "runtime event stream error");
                continue;
            }
        };

        let Some(device) = debouncer.record(event) else {
            continue;
        };

        let debouncer = debouncer.clone();
        let processes = processes.clone();
        let apps = apps.clone();
        let publisher = publisher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(EVENT_SETTLE_DELAY) => {}
            }
            let Some(latest) = debouncer.should_notify(&device) else {
                return;
            };
            let status = action_to_status(latest.action.as_deref().unwrap_or(""));
            report_state_change(&processes, &apps, &publisher, &device, &status).await;
            debouncer.mark_notified(&device, &latest);
        });
    }
}

/// State telemetry for one device; events for containers the agent does
/// not manage are ignored.
async fn report_state_change(
    processes: &Arc<ProcessManager>,
    apps: &Arc<AppManager>,
    publisher: &Arc<dyn TelemetryPublisher>,
    device: &str,
    status: &str,
) {
    let mut envelope = TelemetryEnvelope::new(ProcessOperation::State, ProcessType::Unknown)
        .with_device(device)
        .with_state(status);

    match processes.info(device).await {
        Ok(camera) => {
            envelope.process_type = ProcessType::Camera;
            envelope.image_tag = camera.image_tag;
            envelope.rtsp_connection = Some(camera.rtsp_endpoint);
            envelope.rtmp_endpoint = camera.rtmp_endpoint;
        }
        Err(_) => match apps.info(device).await {
            Ok(app) => {
                envelope.process_type = ProcessType::Application;
                envelope.image_tag = app.image_tag();
            }
            Err(_) => return,
        },
    }

    publisher.publish(envelope).await;
    info!(device, status, "device state change reported");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{EventActor, EventMessage};
    use std::collections::HashMap;

    fn event(name: &str, action: &str, id: &str) -> EventMessage {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), name.to_string());
        EventMessage {
            action: Some(action.to_string()),
            actor: Some(EventActor {
                id: Some(id.to_string()),
                attributes: Some(attributes),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn signature_changes_with_status_and_actor() {
        let a = event_signature("die", "c1");
        let b = event_signature("start", "c1");
        let c = event_signature("die", "c2");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, event_signature("die", "c1"));
    }

    #[test]
    fn digest_sensitive_to_every_field() {
        let base = process_digest("running", "c1", 1, "repo:1.0.0", "cam1", "rtmp", "rtsp");
        assert_ne!(
            base,
            process_digest("exited", "c1", 1, "repo:1.0.0", "cam1", "rtmp", "rtsp")
        );
        assert_ne!(
            base,
            process_digest("running", "c2", 1, "repo:1.0.0", "cam1", "rtmp", "rtsp")
        );
        assert_ne!(
            base,
            process_digest("running", "c1", 2, "repo:1.0.0", "cam1", "rtmp", "rtsp")
        );
    }

    #[test]
    fn action_mapping() {
        assert_eq!(action_to_status("die"), "restarting");
        assert_eq!(action_to_status("start"), "running");
        assert_eq!(action_to_status("oom"), "oom");
    }

    #[test]
    fn debouncer_caps_history_at_ten() {
        let debouncer = EventDebouncer::new();
        for i in 0..30 {
            debouncer.record(event("cam1", "die", &format!("c{}", i)));
        }
        assert!(debouncer.history.get("cam1").unwrap().len() <= 10);
    }

    #[test]
    fn debouncer_first_event_notifies() {
        let debouncer = EventDebouncer::new();
        debouncer.record(event("cam1", "die", "c1"));
        assert!(debouncer.should_notify("cam1").is_some());
    }

    #[test]
    fn debouncer_suppresses_identical_signature() {
        let debouncer = EventDebouncer::new();
        debouncer.record(event("cam1", "die", "c1"));
        let latest = debouncer.should_notify("cam1").unwrap();
        debouncer.mark_notified("cam1", &latest);

        debouncer.record(event("cam1", "die", "c1"));
        assert!(debouncer.should_notify("cam1").is_none());

        debouncer.record(event("cam1", "start", "c1"));
        assert!(debouncer.should_notify("cam1").is_some());
    }

    #[test]
    fn debouncer_ignores_events_without_name() {
        let debouncer = EventDebouncer::new();
        let anonymous = EventMessage::default();
        assert!(debouncer.record(anonymous).is_none());
    }
}
