//! Cloud bridge — the authenticated, reconnecting MQTT channel to the
//! control plane.
//!
//! One supervisor loop owns the client lifetime: mint a JWT, connect,
//! subscribe, run the background tasks, and tear the session down when
//! the token nears expiry or the agent shuts down.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::LocalEventBus;
use crate::client::ContainerOps;
use crate::cloud::commands::{CommandDispatcher, CommandEnvelope};
use crate::cloud::jwt::{create_jwt, token_expiry_ms};
use crate::cloud::tasks;
use crate::cloud::telemetry::{ProcessOperation, ProcessType, TelemetryEnvelope};
use crate::config::MqttConfig;
use crate::images::ImageResolver;
use crate::process::{AppManager, ProcessManager};
use crate::settings::{Settings, SettingsManager};

/// Broker username is a fixed sentinel; the JWT carries the identity.
const MQTT_USERNAME: &str = "unused";
/// Poll settings at this interval until the cloud identity is complete.
const SETTINGS_WAIT: Duration = Duration::from_secs(15);
/// Re-mint the JWT when it expires within this window.
const TOKEN_REFRESH_WINDOW_MS: i64 = 60_000;
/// Check token expiry at this interval.
const TOKEN_CHECK_INTERVAL: Duration = Duration::from_secs(15);
/// Maximum reconnect backoff.
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(15);
/// Minted token lifetime.
const TOKEN_TTL_HOURS: i64 = 1;

/// Outbound telemetry seam; the dispatcher and periodic tasks publish
/// through this so tests can collect envelopes.
pub trait TelemetryPublisher: Send + Sync {
    /// Telemetry envelope to `/devices/{gateway}/events`, QoS 1, retained.
    fn publish(
        &self,
        envelope: TelemetryEnvelope,
    ) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>>;

    /// Raw check-in payload to `/devices/{gateway}/state`, retained.
    fn publish_gateway_state(
        &self,
        payload: String,
    ) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>>;
}

/// Live publisher over one MQTT session.
pub struct MqttPublisher {
    client: AsyncClient,
    gateway_id: String,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, gateway_id: String) -> Self {
        MqttPublisher { client, gateway_id }
    }
}

impl TelemetryPublisher for MqttPublisher {
    fn publish(
        &self,
        envelope: TelemetryEnvelope,
    ) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let topic = format!("/devices/{}/events", self.gateway_id);
            let payload = match envelope.to_bytes_capped() {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "failed to encode telemetry envelope");
                    return;
                }
            };
            if let Err(e) = self
                .client
                .publish(topic, QoS::AtLeastOnce, true, payload)
                .await
            {
                warn!(error = %e, "telemetry publish failed");
            }
        })
    }

    fn publish_gateway_state(
        &self,
        payload: String,
    ) -> Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let topic = format!("/devices/{}/state", self.gateway_id);
            if let Err(e) = self
                .client
                .publish(topic, QoS::AtLeastOnce, true, payload)
                .await
            {
                warn!(error = %e, "gateway state publish failed");
            }
        })
    }
}

pub struct CloudBridge {
    settings: Arc<SettingsManager>,
    processes: Arc<ProcessManager>,
    apps: Arc<AppManager>,
    resolver: Arc<ImageResolver>,
    bus: LocalEventBus,
    docker: Arc<dyn ContainerOps>,
    mqtt: MqttConfig,
}

impl CloudBridge {
    pub fn new(
        settings: Arc<SettingsManager>,
        processes: Arc<ProcessManager>,
        apps: Arc<AppManager>,
        resolver: Arc<ImageResolver>,
        bus: LocalEventBus,
        docker: Arc<dyn ContainerOps>,
        mqtt: MqttConfig,
    ) -> Self {
        CloudBridge {
            settings,
            processes,
            apps,
            resolver,
            bus,
            docker,
            mqtt,
        }
    }

    /// Wait for a complete cloud identity, then run the gateway until
    /// cancellation. Missing settings are a wait state, not an error.
    pub async fn start_gateway_listener(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            match self.settings.get() {
                Ok(settings) if settings.has_cloud_identity() => {
                    info!(gateway = %settings.gateway_id, "cloud identity present, starting gateway");
                    self.run_gateway(cancel.clone()).await;
                    return;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to read settings"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(SETTINGS_WAIT) => {}
            }
        }
    }

    /// Session supervisor: one iteration per JWT lifetime.
    async fn run_gateway(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let settings = match self.settings.get() {
                Ok(settings) if settings.has_cloud_identity() => settings,
                _ => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(SETTINGS_WAIT) => continue,
                    }
                }
            };

            let key = settings
                .private_rsa_key
                .clone()
                .unwrap_or_default();
            let jwt = match create_jwt(
                &settings.project_id,
                &key,
                chrono::Duration::hours(TOKEN_TTL_HOURS),
            ) {
                Ok(jwt) => jwt,
                Err(e) => {
                    error!(error = %e, "failed to mint broker token");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(SETTINGS_WAIT) => continue,
                    }
                }
            };

            if let Err(e) = self.run_session(&settings, &jwt, &cancel).await {
                error!(error = %e, "gateway session failed");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(MAX_RECONNECT_BACKOFF) => {}
                }
            }
        }
    }

    /// One connected session: lives until the token needs rotation or the
    /// agent stops. Tears down every session task on exit.
    async fn run_session(
        &self,
        settings: &Settings,
        jwt: &str,
        cancel: &CancellationToken,
    ) -> crate::error::Result<()> {
        let client_id = format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            settings.project_id, settings.region, settings.registry_id, settings.gateway_id
        );

        let mut options =
            MqttOptions::new(client_id, self.mqtt.broker_host.clone(), self.mqtt.broker_port);
        options.set_credentials(MQTT_USERNAME, jwt);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(false);
        options.set_transport(Transport::tls_with_default_config());

        let (client, eventloop) = AsyncClient::new(options, 64);
        let publisher: Arc<dyn TelemetryPublisher> = Arc::new(MqttPublisher::new(
            client.clone(),
            settings.gateway_id.clone(),
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            self.processes.clone(),
            self.apps.clone(),
            self.resolver.clone(),
            publisher.clone(),
        ));

        let session = cancel.child_token();

        tokio::spawn(poll_connection(
            eventloop,
            client.clone(),
            self.bus.clone(),
            settings.gateway_id.clone(),
            session.clone(),
        ));

        // Local bus consumer: both cloud commands and local lifecycle
        // events land here.
        match self.bus.subscribe().await {
            Ok(mut events) => {
                let dispatcher = dispatcher.clone();
                let consumer_session = session.clone();
                tokio::spawn(async move {
                    loop {
                        let envelope = tokio::select! {
                            _ = consumer_session.cancelled() => return,
                            envelope = events.next() => envelope,
                        };
                        match envelope {
                            Some(envelope) => dispatcher.dispatch(envelope).await,
                            None => return,
                        }
                    }
                });
            }
            Err(e) => {
                session.cancel();
                return Err(e);
            }
        }

        tokio::spawn(tasks::checkin_loop(
            publisher.clone(),
            self.processes.clone(),
            self.apps.clone(),
            session.clone(),
        ));
        tokio::spawn(tasks::stats_loop(
            publisher.clone(),
            self.processes.clone(),
            self.settings.clone(),
            session.clone(),
        ));
        tokio::spawn(tasks::event_listener(
            self.docker.clone(),
            self.processes.clone(),
            self.apps.clone(),
            publisher.clone(),
            session.clone(),
        ));

        self.bind_all_devices(&publisher).await;

        // Token monitor: disconnect-reconnect exactly once per token.
        let expiry_ms = token_expiry_ms(jwt)?;
        let mut ticker = tokio::time::interval(TOKEN_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let remaining = expiry_ms - chrono::Utc::now().timestamp_millis();
            if remaining <= TOKEN_REFRESH_WINDOW_MS {
                info!(remaining_ms = remaining, "broker token near expiry, rotating");
                break;
            }
        }

        session.cancel();
        if let Err(e) = client.disconnect().await {
            warn!(error = %e, "broker disconnect failed");
        }
        Ok(())
    }

    /// Attach telemetry for every managed process on connect.
    async fn bind_all_devices(&self, publisher: &Arc<dyn TelemetryPublisher>) {
        match self.processes.list().await {
            Ok(devices) => {
                for device in devices {
                    let mut envelope =
                        TelemetryEnvelope::new(ProcessOperation::Add, ProcessType::Camera)
                            .with_device(&device.name)
                            .with_state(device.status.as_str());
                    envelope.image_tag = device.image_tag.clone();
                    envelope.created = device.created;
                    envelope.rtsp_connection = Some(device.rtsp_endpoint.clone());
                    envelope.rtmp_endpoint = device.rtmp_endpoint.clone();
                    publisher.publish(envelope).await;
                }
            }
            Err(e) => warn!(error = %e, "failed to bind devices on connect"),
        }
    }
}

/// Drive the MQTT event loop: subscribe on ConnAck, forward command
/// publishes onto the local bus, back off on connection errors.
async fn poll_connection(
    mut eventloop: rumqttc::EventLoop,
    client: AsyncClient,
    bus: LocalEventBus,
    gateway_id: String,
    cancel: CancellationToken,
) {
    let config_topic = format!("/devices/{}/config", gateway_id);
    let commands_filter = format!("/devices/{}/commands/#", gateway_id);
    let mut backoff = Duration::from_secs(1);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("broker connected");
                backoff = Duration::from_secs(1);
                for topic in [config_topic.clone(), commands_filter.clone()] {
                    if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                        error!(topic, error = %e, "subscribe failed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_inbound(&bus, &publish.topic, &publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "broker connection error, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
            }
        }
    }
}

/// Decode a broker message and republish it on the local bus so the
/// dispatcher handles it exactly like a locally initiated command.
async fn handle_inbound(bus: &LocalEventBus, topic: &str, payload: &[u8]) {
    let command: CommandEnvelope = match serde_json::from_slice(payload) {
        Ok(command) => command,
        Err(e) => {
            error!(topic, error = %e, "undecodable command payload");
            return;
        }
    };

    match command.into_bus_envelope() {
        Ok(envelope) => {
            if let Err(e) = bus.publish(&envelope).await {
                error!(error = %e, "failed to republish cloud command locally");
            }
        }
        Err(e) => error!(topic, error = %e, "rejected cloud command"),
    }
}
