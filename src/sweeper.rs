//! Background retention sweep over `UPLOAD_DIR`/`OUTPUT_DIR`: deletes regular
//! files older than `FILE_RETENTION_HOURS` every `CLEANUP_INTERVAL_MINUTES`
//! (`spec.md` §4.5). The job registry itself is never pruned here — only
//! files are swept; job records simply live for the life of the process
//! (`spec.md` §9: "non-durable registry is a conscious choice").

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;

/// Spawns the periodic sweep as a background task, gated by `shutdown` for
/// graceful cancellation. Returns the task's `JoinHandle`.
pub fn spawn(config: AppConfig, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(config.cleanup_interval_minutes * 60);
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup doesn't race
        // a sweep against files that were just created.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_once(&config).await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("retention sweeper shutting down");
                    break;
                }
            }
        }
    })
}

/// One sweep pass over both directories. Errors on individual files are
/// logged and do not stop the sweep.
pub async fn run_once(config: &AppConfig) {
    let max_age = chrono::Duration::hours(config.file_retention_hours);
    let mut deleted = 0u64;
    let mut bytes_freed = 0u64;
    let mut errors = 0u64;

    for dir in [&config.upload_dir, &config.output_dir] {
        let (d, b, e) = sweep_dir(dir, max_age).await;
        deleted += d;
        bytes_freed += b;
        errors += e;
    }

    metrics::counter!("cleanup_runs_total").increment(1);
    metrics::counter!("cleanup_files_deleted_total").increment(deleted);
    metrics::counter!("cleanup_bytes_freed_total").increment(bytes_freed);
    if errors > 0 {
        metrics::counter!("cleanup_errors_total").increment(errors);
    }

    tracing::info!(deleted, bytes_freed, errors, "retention sweep completed");
}

async fn sweep_dir(dir: &Path, max_age: chrono::Duration) -> (u64, u64, u64) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cleanup: could not read directory");
            return (0, 0, 1);
        }
    };

    let mut deleted = 0u64;
    let mut bytes_freed = 0u64;
    let mut errors = 0u64;
    let now = Utc::now();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cleanup: error walking directory");
                errors += 1;
                break;
            }
        };

        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "cleanup: could not stat file");
                errors += 1;
                continue;
            }
        };

        if !metadata.is_file() {
            continue;
        }

        let modified: chrono::DateTime<Utc> = match metadata.modified() {
            Ok(t) => t.into(),
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "cleanup: no mtime available");
                errors += 1;
                continue;
            }
        };

        if now - modified < max_age {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                deleted += 1;
                bytes_freed += metadata.len();
            }
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "cleanup: failed to delete file");
                errors += 1;
            }
        }
    }

    (deleted, bytes_freed, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::{SystemTime, Duration as StdDuration};

    fn config_for(upload_dir: PathBuf, output_dir: PathBuf, retention_hours: i64) -> AppConfig {
        AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            upload_dir,
            output_dir,
            max_upload_size: 1024,
            allowed_extensions: HashSet::new(),
            processing_timeout: Duration::from_secs(1),
            max_concurrent_jobs: 1,
            file_retention_hours: retention_hours,
            cleanup_interval_minutes: 60,
            log_level: "info".into(),
            json_logs: false,
            cors_origins: vec!["*".into()],
            api_auth_enabled: false,
            api_key_header: "X-API-Key".into(),
            api_keys: HashMap::new(),
            default_start_at_layer: 3,
            default_extrusion_multiplier: 1.05,
            min_extrusion_multiplier: 1.0,
            max_extrusion_multiplier: 1.2,
        }
    }

    fn set_mtime(path: &Path, age: StdDuration) {
        let past = SystemTime::now() - age;
        let file = std::fs::File::open(path).unwrap();
        file.set_modified(past).unwrap();
    }

    #[tokio::test]
    async fn sweep_deletes_only_files_older_than_retention() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let outputs = dir.path().join("outputs");
        tokio::fs::create_dir_all(&uploads).await.unwrap();
        tokio::fs::create_dir_all(&outputs).await.unwrap();

        let old = uploads.join("old.gcode");
        let fresh = uploads.join("fresh.gcode");
        tokio::fs::write(&old, b"stale").await.unwrap();
        tokio::fs::write(&fresh, b"new").await.unwrap();
        set_mtime(&old, StdDuration::from_secs(3 * 3600));

        let config = config_for(uploads.clone(), outputs, 1);
        run_once(&config).await;

        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn sweep_tolerates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let config = config_for(missing.clone(), dir.path().join("also-missing"), 1);
        run_once(&config).await;
    }

    #[tokio::test]
    async fn sweep_ignores_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let nested = uploads.join("nested");
        tokio::fs::create_dir_all(&nested).await.unwrap();

        let config = config_for(uploads, dir.path().join("outputs"), 0);
        run_once(&config).await;

        assert!(nested.exists());
    }
}
