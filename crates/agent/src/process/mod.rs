//! Process lifecycle controller — managed camera and application
//! containers.

pub mod apps;
pub mod manager;
pub mod model;
pub mod stats;
pub mod upgrade;

pub use apps::AppManager;
pub use manager::{NameLocks, ProcessManager};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dashmap::DashMap;

    use crate::bus::NullSink;
    use crate::client::fake::FakeDocker;
    use crate::config::AgentConfig;
    use crate::error::AgentError;
    use crate::images::ImageResolver;
    use crate::process::model::{
        AppProcess, CameraProcess, ProcessKind, ProcessStatus, PREFIX_APP_PROCESS,
        PREFIX_RTSP_PROCESS,
    };
    use crate::process::{AppManager, ProcessManager};
    use crate::store::DurableMap;

    const CAMERA_IMAGE: &str = "chryscloud/chrysedgeproxy:1.0.0";

    struct Fixture {
        docker: Arc<FakeDocker>,
        store: DurableMap,
        manager: ProcessManager,
        apps: AppManager,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableMap::open(dir.path()).unwrap();
        let docker = Arc::new(FakeDocker::new());
        let ops: Arc<dyn crate::client::ContainerOps> = docker.clone();
        let resolver = Arc::new(ImageResolver::new(ops.clone(), store.clone()));
        let locks = Arc::new(DashMap::new());
        let manager = ProcessManager::new(
            ops.clone(),
            store.clone(),
            resolver,
            Arc::new(NullSink),
            AgentConfig::default(),
            None,
            locks.clone(),
        );
        let apps = AppManager::new(ops, store.clone(), Arc::new(NullSink), locks);
        Fixture {
            docker,
            store,
            manager,
            apps,
            _dir: dir,
        }
    }

    fn camera(name: &str) -> CameraProcess {
        CameraProcess {
            name: name.to_string(),
            rtsp_endpoint: "rtsp://upstream/stream".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_creates_running_container_with_row() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;

        let started = fx.manager.start(camera("cam1")).await.unwrap();
        assert_eq!(started.status, ProcessStatus::Running);
        assert!(started.container_id.as_deref().is_some_and(|id| !id.is_empty()));

        let seen = fx.docker.container("cam1").await.unwrap();
        assert!(seen.running);
        assert!(seen.env.contains(&"device_id=cam1".to_string()));
        assert!(seen
            .env
            .contains(&"rtsp_endpoint=rtsp://upstream/stream".to_string()));

        assert!(fx.store.get(PREFIX_RTSP_PROCESS, "cam1").is_ok());
    }

    #[tokio::test]
    async fn second_start_is_conflict() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;

        fx.manager.start(camera("cam1")).await.unwrap();
        let err = fx.manager.start(camera("cam1")).await.unwrap_err();
        assert!(matches!(err, AgentError::Conflict(_)));
    }

    #[tokio::test]
    async fn start_validation_errors_are_not_conflicts() {
        let fx = fixture();
        let err = fx
            .manager
            .start(CameraProcess {
                name: "cam1".to_string(),
                rtsp_endpoint: String::new(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[tokio::test]
    async fn start_failure_rolls_back_container() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;
        fx.docker.fail_start_of("cam1").await;

        let err = fx.manager.start(camera("cam1")).await.unwrap_err();
        assert!(matches!(err, AgentError::Docker(_)));
        assert_eq!(fx.docker.container_count().await, 0);
        assert!(fx.store.get(PREFIX_RTSP_PROCESS, "cam1").is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;
        fx.manager.start(camera("cam1")).await.unwrap();

        fx.manager.stop("cam1", ProcessKind::Camera).await.unwrap();
        fx.manager.stop("cam1", ProcessKind::Camera).await.unwrap();
        assert!(fx.store.get(PREFIX_RTSP_PROCESS, "cam1").is_err());
        assert_eq!(fx.docker.container_count().await, 0);
    }

    #[tokio::test]
    async fn start_stop_start_ends_running() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;

        fx.manager.start(camera("cam1")).await.unwrap();
        fx.manager.stop("cam1", ProcessKind::Camera).await.unwrap();
        let restarted = fx.manager.start(camera("cam1")).await.unwrap();
        assert_eq!(restarted.status, ProcessStatus::Running);
        assert!(restarted.container_id.is_some());
    }

    #[tokio::test]
    async fn info_distinguishes_missing_container_from_missing_row() {
        let fx = fixture();

        let err = fx.manager.info("ghost").await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));

        fx.docker.add_container("orphan", CAMERA_IMAGE, vec![]).await;
        let err = fx.manager.info("orphan").await.unwrap_err();
        assert!(matches!(err, AgentError::NotFoundStored(_)));
    }

    #[tokio::test]
    async fn info_merges_runtime_state() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;
        fx.manager.start(camera("cam1")).await.unwrap();

        let info = fx.manager.info("cam1").await.unwrap();
        assert_eq!(info.status, ProcessStatus::Running);
        assert!(info.state.as_ref().is_some_and(|s| s.running));
        assert!(info.logs.is_some());
        assert!(info.modified > 0);
    }

    #[tokio::test]
    async fn list_drops_rows_whose_container_vanished() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;
        fx.manager.start(camera("cam1")).await.unwrap();

        // Row with no container behind it.
        let ghost = camera("ghost");
        fx.store
            .put(
                PREFIX_RTSP_PROCESS,
                "ghost",
                &serde_json::to_vec(&ghost).unwrap(),
            )
            .unwrap();

        let listed = fx.manager.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "cam1");
        assert!(fx.store.get(PREFIX_RTSP_PROCESS, "ghost").is_err());
    }

    #[tokio::test]
    async fn list_stream_honors_cancellation() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;
        fx.manager.start(camera("cam1")).await.unwrap();
        fx.manager.start(camera("cam2")).await.unwrap();

        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();
        let mut seen = 0;
        fx.manager
            .list_stream(&cancel, |_| {
                seen += 1;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(seen, 0);
    }

    #[tokio::test]
    async fn running_rows_always_carry_container_id() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;
        fx.manager.start(camera("cam1")).await.unwrap();

        for process in fx.manager.list().await.unwrap() {
            if process.status == ProcessStatus::Running {
                assert!(process.container_id.as_deref().is_some_and(|id| !id.is_empty()));
            }
        }
    }

    // ── upgrades ────────────────────────────────────────────────

    #[tokio::test]
    async fn find_upgrades_marks_newer_versions() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;
        fx.manager.start(camera("cam1")).await.unwrap();

        let record = crate::images::ImageUpgrade {
            has_image: true,
            current_version: "1.1.0".to_string(),
            name: crate::images::CAMERA_REPO.to_string(),
            camera_type: crate::images::KIND_RTSP.to_string(),
            ..Default::default()
        };
        let upgrades = fx.manager.find_upgrades(&record).await.unwrap();
        let cam = upgrades.iter().find(|p| p.name == "cam1").unwrap();
        assert!(cam.upgrade_available);
        assert_eq!(cam.newer_version.as_deref(), Some("1.1.0"));
    }

    #[tokio::test]
    async fn find_upgrades_equal_version_is_no_upgrade() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;
        fx.manager.start(camera("cam1")).await.unwrap();

        let record = crate::images::ImageUpgrade {
            has_image: true,
            current_version: "1.0.0".to_string(),
            name: crate::images::CAMERA_REPO.to_string(),
            camera_type: crate::images::KIND_RTSP.to_string(),
            ..Default::default()
        };
        let upgrades = fx.manager.find_upgrades(&record).await.unwrap();
        let cam = upgrades.iter().find(|p| p.name == "cam1").unwrap();
        assert!(!cam.upgrade_available);
    }

    #[tokio::test]
    async fn upgrade_replaces_container_and_rewrites_row() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;
        let started = fx.manager.start(camera("cam1")).await.unwrap();
        let old_id = started.container_id.clone().unwrap();

        fx.docker.add_image("chryscloud/chrysedgeproxy:1.1.0").await;
        let upgraded = fx
            .manager
            .upgrade("cam1", "chryscloud/chrysedgeproxy:1.1.0")
            .await
            .unwrap();
        assert_eq!(upgraded.image_tag, "chryscloud/chrysedgeproxy:1.1.0");
        assert_ne!(upgraded.container_id.as_deref(), Some(old_id.as_str()));

        let seen = fx.docker.container("cam1").await.unwrap();
        assert!(seen.running);
        assert_eq!(seen.image, "chryscloud/chrysedgeproxy:1.1.0");
    }

    #[tokio::test]
    async fn upgrade_requires_local_image() {
        let fx = fixture();
        fx.docker.add_image(CAMERA_IMAGE).await;
        fx.manager.start(camera("cam1")).await.unwrap();

        let err = fx
            .manager
            .upgrade("cam1", "chryscloud/chrysedgeproxy:9.9.9")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    // ── applications ────────────────────────────────────────────

    fn app(name: &str) -> AppProcess {
        AppProcess {
            name: name.to_string(),
            docker_hub_user: "acme".to_string(),
            docker_hub_repository: "detector".to_string(),
            docker_hub_version: "2.0.0".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn install_pulls_missing_image_and_persists() {
        let fx = fixture();
        fx.docker.add_pullable("acme/detector:2.0.0").await;

        let installed = fx.apps.install(app("detector")).await.unwrap();
        assert_eq!(installed.status, ProcessStatus::Running);
        assert!(fx.store.get(PREFIX_APP_PROCESS, "detector").is_ok());
    }

    #[tokio::test]
    async fn install_then_stop_leaves_no_row() {
        let fx = fixture();
        fx.docker.add_image("acme/detector:2.0.0").await;

        fx.apps.install(app("detector")).await.unwrap();
        fx.manager
            .stop("detector", ProcessKind::Application)
            .await
            .unwrap();
        assert!(fx.store.get(PREFIX_APP_PROCESS, "detector").is_err());
    }

    #[tokio::test]
    async fn install_env_and_gpu_runtime() {
        let fx = fixture();
        fx.docker.add_image("acme/detector:2.0.0").await;

        let mut spec = app("detector");
        spec.env_vars = vec![crate::process::model::VarPair {
            name: "MODE".to_string(),
            value: "fast".to_string(),
        }];
        spec.runtime = Some("nvidia".to_string());
        fx.apps.install(spec).await.unwrap();

        let seen = fx.docker.container("detector").await.unwrap();
        assert!(seen.env.contains(&"MODE=fast".to_string()));
    }

    #[tokio::test]
    async fn install_conflict_on_existing_name() {
        let fx = fixture();
        fx.docker.add_image("acme/detector:2.0.0").await;

        fx.apps.install(app("detector")).await.unwrap();
        let err = fx.apps.install(app("detector")).await.unwrap_err();
        assert!(matches!(err, AgentError::Conflict(_)));
    }
}
