//! On-disk segment janitor — cron-driven retention sweep over the
//! buffer folder. Only runs when disk buffering is enabled.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::AgentConfig;

/// Schedule the retention sweep; returns the running scheduler handle.
pub async fn start(config: &AgentConfig) -> Result<JobScheduler, Box<dyn std::error::Error>> {
    let folder = config.buffer.on_disk_folder.clone();
    let retention = config.retention()?;
    let schedule = config.buffer.on_disk_schedule.clone();

    let scheduler = JobScheduler::new().await?;
    scheduler
        .add(Job::new_async(schedule.as_str(), move |_id, _lock| {
            let folder = folder.clone();
            Box::pin(async move {
                let removed = sweep(Path::new(&folder), retention);
                if removed > 0 {
                    info!(removed, folder = %folder, "removed expired segments");
                }
            })
        })?)
        .await?;
    scheduler.start().await?;

    info!(schedule = %config.buffer.on_disk_schedule, "disk janitor scheduled");
    Ok(scheduler)
}

/// Delete `.mp4` files whose mtime + retention is in the past. Errors on
/// a single file are logged and skipped; returns the number removed.
pub fn sweep(folder: &Path, retention: Duration) -> usize {
    let mut removed = 0;
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(folder = %folder.display(), error = %e, "failed to read buffer folder");
            return 0;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "failed to read dir entry");
                continue;
            }
        };
        let path = entry.path();

        if path.is_dir() {
            removed += sweep(&path, retention);
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
            continue;
        }

        let expired = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .map(|mtime| mtime + retention < SystemTime::now())
            .unwrap_or(false);
        if !expired {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove segment"),
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_removes_only_expired_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let old_segment = dir.path().join("a.mp4");
        let sidecar = dir.path().join("a.json");
        std::fs::write(&old_segment, b"segment").unwrap();
        std::fs::write(&sidecar, b"meta").unwrap();

        std::thread::sleep(Duration::from_millis(20));

        let removed = sweep(dir.path(), Duration::from_secs(0));
        assert_eq!(removed, 1);
        assert!(!old_segment.exists());
        assert!(sidecar.exists());
    }

    #[test]
    fn sweep_keeps_fresh_segments() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh.mp4");
        std::fs::write(&fresh, b"segment").unwrap();

        let removed = sweep(dir.path(), Duration::from_secs(3600));
        assert_eq!(removed, 0);
        assert!(fresh.exists());
    }

    #[test]
    fn sweep_recurses_into_subfolders() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("cam1");
        std::fs::create_dir(&sub).unwrap();
        let segment = sub.join("old.mp4");
        std::fs::write(&segment, b"segment").unwrap();

        std::thread::sleep(Duration::from_millis(20));

        let removed = sweep(dir.path(), Duration::from_secs(0));
        assert_eq!(removed, 1);
        assert!(!segment.exists());
    }

    #[test]
    fn sweep_missing_folder_is_zero() {
        assert_eq!(
            sweep(Path::new("/nonexistent/buffer"), Duration::from_secs(0)),
            0
        );
    }
}
