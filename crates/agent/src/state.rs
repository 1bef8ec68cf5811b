//! Shared application state handed to the adapters.

use std::sync::Arc;

use redis::aio::ConnectionManager;

use crate::annotate::AnnotationBatcher;
use crate::bus::LocalEventBus;
use crate::client::ContainerOps;
use crate::config::AgentConfig;
use crate::framebus::FrameBus;
use crate::images::ImageResolver;
use crate::process::{AppManager, ProcessManager};
use crate::settings::SettingsManager;
use crate::store::DurableMap;

pub struct AgentState {
    pub config: AgentConfig,
    pub docker: Arc<dyn ContainerOps>,
    pub store: DurableMap,
    pub settings: Arc<SettingsManager>,
    pub resolver: Arc<ImageResolver>,
    pub processes: Arc<ProcessManager>,
    pub apps: Arc<AppManager>,
    pub framebus: FrameBus,
    pub batcher: Arc<AnnotationBatcher>,
    pub bus: LocalEventBus,
    pub redis: ConnectionManager,
    pub http: reqwest::Client,
}

pub type SharedState = Arc<AgentState>;
