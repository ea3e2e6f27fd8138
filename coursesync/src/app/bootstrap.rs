//! Application bootstrap.
//!
//! Wires the store, the transfer pipeline, the sync selector and the bulk
//! manager in dependency order, and owns the session event loop.

use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::{AppConfig, StoreLocation};
use super::error::AppError;
use crate::api::HttpApiClient;
use crate::bulk::BulkStateChangeManager;
use crate::store::{JsonFilePersistence, SharedStore, Store};
use crate::sync::{SyncPlan, SyncPlanner, SyncSelectorInteractor};
use crate::transfer::{
    HttpTransferRuntime, ObserverCache, SessionProvider, StoreObserverFactory, TransferRuntime,
    UploadManager,
};

/// The running engine.
///
/// # Example
///
/// ```ignore
/// use coursesync::app::{AppConfig, CourseSyncApp};
///
/// let app = CourseSyncApp::start(AppConfig::from_config_file(&file)).await?;
/// app.selector().get_entries().await?;
/// let plan = app.sync_selected(&destination).await?;
/// app.shutdown().await;
/// ```
pub struct CourseSyncApp {
    config: AppConfig,
    store: SharedStore,
    api: Arc<HttpApiClient>,
    uploads: UploadManager,
    selector: SyncSelectorInteractor,
    planner: SyncPlanner,
    bulk: BulkStateChangeManager,
    event_loop: Option<JoinHandle<()>>,
}

impl CourseSyncApp {
    /// Start with the HTTP transfer runtime.
    ///
    /// Must be called from within a Tokio runtime; the session event loop is
    /// spawned on it.
    pub async fn start(config: AppConfig) -> Result<Self, AppError> {
        let runtime = HttpTransferRuntime::new()
            .with_timeout(config.transfer_timeout)
            .with_user_agent(config.api.user_agent.clone());
        Self::start_with_runtime(config, Arc::new(runtime)).await
    }

    /// Start with a caller-supplied transfer runtime.
    pub async fn start_with_runtime(
        config: AppConfig,
        runtime: Arc<dyn TransferRuntime>,
    ) -> Result<Self, AppError> {
        let store: SharedStore = Arc::new(match &config.store {
            StoreLocation::Memory => Store::in_memory(),
            StoreLocation::File(path) => {
                debug!(path = %path.display(), "Opening store");
                Store::open(Arc::new(JsonFilePersistence::new(path.clone())))?
            }
        });

        let factory = StoreObserverFactory::new(Arc::clone(&store))
            .with_terminal_write_attempts(config.terminal_write_attempts);
        let cache = Arc::new(ObserverCache::new(Arc::clone(&store), Arc::new(factory)));
        let sessions = Arc::new(SessionProvider::new(
            runtime,
            config.session.clone(),
            cache,
        ));
        sessions.set_completion_handler(|| debug!("Transfer session drained"));
        let event_loop = sessions.spawn_event_loop();

        let api = Arc::new(HttpApiClient::new(config.api.clone()));
        let uploads = UploadManager::new(Arc::clone(&store), sessions, api.clone());
        let selector = SyncSelectorInteractor::new(api.clone(), Arc::clone(&store));
        let planner = SyncPlanner::new(Arc::clone(&store));
        let bulk = BulkStateChangeManager::new(api.clone(), api.clone(), config.bulk.clone());

        info!(
            base_url = %config.api.base_url,
            session = %config.session.identifier,
            "CourseSync started"
        );

        Ok(Self {
            config,
            store,
            api,
            uploads,
            selector,
            planner,
            bulk,
            event_loop,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn api(&self) -> &Arc<HttpApiClient> {
        &self.api
    }

    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    pub fn selector(&self) -> &SyncSelectorInteractor {
        &self.selector
    }

    pub fn planner(&self) -> &SyncPlanner {
        &self.planner
    }

    pub fn bulk(&self) -> &BulkStateChangeManager {
        &self.bulk
    }

    /// Plan a download batch for the current selection and start it.
    ///
    /// Returns `None` without touching the store when no file is selected.
    pub async fn sync_selected(
        &self,
        destination_root: &Path,
    ) -> Result<Option<SyncPlan>, AppError> {
        let entries = self.selector.selected_entries().await;
        let Some(plan) = self.planner.plan(&entries, destination_root)? else {
            info!("Nothing selected to sync");
            return Ok(None);
        };

        let report = self.uploads.upload(&plan.batch_id).await?;
        info!(
            batch_id = %plan.batch_id,
            started = report.started,
            failed_to_start = report.failed_to_start,
            "Sync batch started"
        );
        Ok(Some(plan))
    }

    /// Stop the session event loop.
    ///
    /// Every committed change is already persisted by the store.
    pub async fn shutdown(mut self) {
        info!("Shutting down CourseSync");
        self.uploads.sessions().shutdown();
        if let Some(handle) = self.event_loop.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Session event loop ended abnormally");
            }
        }
        info!("CourseSync shutdown complete");
    }
}

/// Build the multi-threaded runtime used by the command line.
pub fn build_runtime() -> Result<Runtime, AppError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("coursesync")
        .build()
        .map_err(|e| AppError::RuntimeCreation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TransferDirection;
    use crate::sync::{EntrySelection, SelectionState};
    use crate::transfer::{BatchOutcome, MemoryTransferRuntime};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn catalog_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sync/catalog"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": "1",
                    "name": "Biology",
                    "files": [
                        {"id": "9", "display_name": "cell.pdf", "size": 10, "url": "https://files.test/9"},
                        {"id": "10", "display_name": "dna.pdf", "size": 20, "url": "https://files.test/10"}
                    ]
                }
            ])))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_app_start_and_shutdown() {
        let app = CourseSyncApp::start(AppConfig::new("http://127.0.0.1:9/api"))
            .await
            .unwrap();
        assert_eq!(app.bulk().active_jobs(), 0);
        assert!(!app.uploads().is_uploading());
        app.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_selected_downloads_selected_files() {
        let server = catalog_server().await;
        let runtime = Arc::new(MemoryTransferRuntime::new());
        let dir = TempDir::new().unwrap();
        let app = CourseSyncApp::start_with_runtime(
            AppConfig::new(server.uri()).with_batch_poll_interval(Duration::from_millis(10)),
            runtime.clone(),
        )
        .await
        .unwrap();

        app.selector().get_entries().await.unwrap();
        app.selector()
            .set_selected(&EntrySelection::file("1", "9"), SelectionState::Selected)
            .await
            .unwrap();

        let plan = app.sync_selected(dir.path()).await.unwrap().unwrap();
        assert_eq!(plan.item_ids.len(), 1);
        assert_eq!(plan.bytes_total, 10);

        let requests = runtime.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].direction, TransferDirection::Download);
        assert_eq!(requests[0].url, "https://files.test/9");

        let session = runtime.latest_session().unwrap();
        session.complete(&requests[0].tag, None);
        let outcome = app
            .uploads()
            .wait_until_finished(&plan.batch_id, Duration::from_millis(10), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::FinishedOk);

        app.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_without_selection_plans_nothing() {
        let server = catalog_server().await;
        let dir = TempDir::new().unwrap();
        let app = CourseSyncApp::start_with_runtime(
            AppConfig::new(server.uri()),
            Arc::new(MemoryTransferRuntime::new()),
        )
        .await
        .unwrap();

        app.selector().get_entries().await.unwrap();

        assert!(app.sync_selected(dir.path()).await.unwrap().is_none());
        assert!(app.store().read(|snapshot| snapshot.batches.is_empty()));
        app.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_store_survives_restart() {
        let server = catalog_server().await;
        let dir = TempDir::new().unwrap();
        let config = AppConfig::new(server.uri())
            .with_store(StoreLocation::File(dir.path().join("store.json")));

        let app = CourseSyncApp::start_with_runtime(
            config.clone(),
            Arc::new(MemoryTransferRuntime::new()),
        )
        .await
        .unwrap();
        app.selector().get_entries().await.unwrap();
        app.selector()
            .set_selected(&EntrySelection::course("1"), SelectionState::Selected)
            .await
            .unwrap();
        app.shutdown().await;

        let app = CourseSyncApp::start_with_runtime(config, Arc::new(MemoryTransferRuntime::new()))
            .await
            .unwrap();
        let entries = app.selector().get_entries().await.unwrap();
        assert_eq!(entries[0].selection(), SelectionState::Selected);
        app.shutdown().await;
    }
}
