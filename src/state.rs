use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::AppConfig;
use crate::registry::JobRegistry;
use crate::store::FileStore;
use crate::worker::WorkerPool;

/// Shared application state handed to every route (`spec.md` §4).
pub struct AppState {
    pub config: AppConfig,
    pub registry: JobRegistry,
    pub file_store: FileStore,
    pub worker_pool: WorkerPool,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn new(config: AppConfig, metrics_handle: PrometheusHandle) -> Self {
        let registry = JobRegistry::new();
        let file_store = FileStore::new(
            config.upload_dir.clone(),
            config.output_dir.clone(),
            config.allowed_extensions.clone(),
            config.max_upload_size,
        );
        let worker_pool = WorkerPool::new(
            registry.clone(),
            file_store.clone(),
            config.max_concurrent_jobs,
            config.processing_timeout,
        );

        Self { config, registry, file_store, worker_pool, metrics_handle }
    }
}
