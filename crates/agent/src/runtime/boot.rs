//! Boot — logging init, dependency init, state creation, background
//! task spawn.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::annotate::{AnnotationBatcher, DurableQueue, ANNOTATION_QUEUE};
use crate::bus::LocalEventBus;
use crate::client::ContainerOps;
use crate::cloud::CloudBridge;
use crate::config::AgentConfig;
use crate::docker::client::DockerClient;
use crate::framebus::FrameBus;
use crate::images::ImageResolver;
use crate::process::{AppManager, ProcessManager};
use crate::settings::SettingsManager;
use crate::state::{AgentState, SharedState};
use crate::store::DurableMap;

/// Initialise the tracing / logging subsystem.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Open every dependency, build shared state and spawn the long-lived
/// background tasks. A failed datastore or stream-store init is fatal.
pub async fn boot(
    config: AgentConfig,
    cancel: CancellationToken,
) -> Result<SharedState, Box<dyn std::error::Error>> {
    info!(data_dir = %config.data_dir.display(), "opening datastore");
    let store = DurableMap::open(&config.data_dir).map_err(|e| {
        error!(error = %e, "failed to open datastore");
        e
    })?;

    info!(redis = %config.redis.connection, "connecting to stream store");
    let redis_client = redis::Client::open(config.redis_url())?;
    let redis_conn = redis_client.get_connection_manager().await.map_err(|e| {
        error!(error = %e, "failed to connect to stream store");
        e
    })?;

    info!(
        socket = %if config.docker_socket.is_empty() { "default" } else { &config.docker_socket },
        "connecting to container runtime"
    );
    let docker_client = DockerClient::new(&config.docker_socket).map_err(|e| {
        error!(error = %e, "failed to connect to container runtime");
        e
    })?;
    let docker: Arc<dyn ContainerOps> = Arc::new(docker_client);

    let bus = LocalEventBus::new(redis_client.clone(), redis_conn.clone());
    let settings = Arc::new(SettingsManager::new(
        store.clone(),
        docker.clone(),
        config.api.endpoint.clone(),
    ));
    let resolver = Arc::new(ImageResolver::new(docker.clone(), store.clone()));

    let locks = Arc::new(DashMap::new());
    let processes = Arc::new(ProcessManager::new(
        docker.clone(),
        store.clone(),
        resolver.clone(),
        Arc::new(bus.clone()),
        config.clone(),
        Some(redis_conn.clone()),
        locks.clone(),
    ));
    let apps = Arc::new(AppManager::new(
        docker.clone(),
        store.clone(),
        Arc::new(bus.clone()),
        locks,
    ));

    let framebus = FrameBus::new(redis_conn.clone());

    let queue = DurableQueue::new(redis_conn.clone(), ANNOTATION_QUEUE);
    let batcher = Arc::new(AnnotationBatcher::new(
        queue,
        settings.clone(),
        config.annotation.endpoint.clone(),
        config.annotation.max_batch,
        Duration::from_millis(config.annotation.poll_ms),
    ));

    // Background tasks: annotation shipping plus the cloud bridge.
    {
        let batcher = batcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { batcher.run(cancel).await });
    }
    {
        let batcher = batcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { batcher.requeue_loop(cancel).await });
    }

    let bridge = Arc::new(CloudBridge::new(
        settings.clone(),
        processes.clone(),
        apps.clone(),
        resolver.clone(),
        bus.clone(),
        docker.clone(),
        config.mqtt.clone(),
    ));
    tokio::spawn(bridge.start_gateway_listener(cancel.clone()));

    if config.buffer.on_disk {
        match crate::janitor::start(&config).await {
            Ok(scheduler) => {
                // Keep the scheduler alive until shutdown.
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let _scheduler = scheduler;
                    cancel.cancelled().await;
                });
            }
            Err(e) => error!(error = %e, "failed to start disk janitor"),
        }
    }

    let state = Arc::new(AgentState {
        config,
        docker,
        store,
        settings,
        resolver,
        processes,
        apps,
        framebus,
        batcher,
        bus,
        redis: redis_conn,
        http: reqwest::Client::new(),
    });

    info!("agent state initialised");
    Ok(state)
}
