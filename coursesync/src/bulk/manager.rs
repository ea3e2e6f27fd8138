//! Bulk state-change manager.
//!
//! Starts a server-side bulk job and polls it until it ends:
//!
//! ```text
//! NotStarted ──start accepted──► Running(f) ──done──► refresh ──► Completed
//!     │                            │  ▲
//!     │ rejected                   │  │ poll ok: f = max(f, progress)
//!     ▼                            ▼  │ poll failed: retry after interval
//!   Failed ◄──── retries exhausted / job failed / cancelled
//! ```
//!
//! Each job runs in its own Tokio task and publishes a [`BulkJobProgress`]
//! through a watch channel. Jobs are tracked by `(ids, action)` so they can
//! be cancelled later; identical concurrent jobs are not deduplicated.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::action::{BulkAction, BulkJobProgress, BulkState, JobProgress, JobWorkflowState};
use super::config::BulkConfig;
use super::error::BulkError;
use crate::api::{ApiResult, BoxFuture};

/// Server endpoints of a bulk job.
pub trait BulkApi: Send + Sync {
    /// Start a job. Returns the job identifier.
    fn start_job<'a>(
        &'a self,
        ids: &'a [String],
        action: BulkAction,
    ) -> BoxFuture<'a, ApiResult<String>>;

    fn job_progress<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, ApiResult<JobProgress>>;

    fn cancel_job<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, ApiResult<()>>;
}

/// Re-fetches local copies of the entities a job touched.
pub trait LocalStateRefresher: Send + Sync {
    fn refresh<'a>(&'a self, ids: &'a [String], action: BulkAction)
        -> BoxFuture<'a, ApiResult<()>>;
}

struct TrackedJob {
    key: u64,
    ids: Vec<String>,
    action: BulkAction,
    job_id: Arc<Mutex<Option<String>>>,
    token: CancellationToken,
}

struct Shared {
    api: Arc<dyn BulkApi>,
    refresher: Arc<dyn LocalStateRefresher>,
    config: BulkConfig,
    jobs: Mutex<Vec<TrackedJob>>,
    updating: watch::Sender<BTreeSet<String>>,
    next_key: AtomicU64,
}

impl Shared {
    fn publish_updating(&self) {
        let ids: BTreeSet<String> = self
            .jobs
            .lock()
            .iter()
            .flat_map(|job| job.ids.iter().cloned())
            .collect();
        self.updating.send_replace(ids);
    }

    fn untrack(&self, key: u64) {
        self.jobs.lock().retain(|job| job.key != key);
        self.publish_updating();
    }

    async fn refresh(&self, ids: &[String], action: BulkAction) {
        match self.refresher.refresh(ids, action).await {
            Ok(()) => debug!(ids = ids.len(), %action, "Local state refreshed"),
            Err(err) => warn!(error = %err, %action, "Local state refresh failed"),
        }
    }
}

/// Runs bulk state-change jobs and tracks the ones in flight.
pub struct BulkStateChangeManager {
    shared: Arc<Shared>,
}

impl BulkStateChangeManager {
    pub fn new(
        api: Arc<dyn BulkApi>,
        refresher: Arc<dyn LocalStateRefresher>,
        config: BulkConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                refresher,
                config,
                jobs: Mutex::new(Vec::new()),
                updating: watch::channel(BTreeSet::new()).0,
                next_key: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &BulkConfig {
        &self.shared.config
    }

    /// Start a job and return its progress stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, ids: Vec<String>, action: BulkAction) -> watch::Receiver<BulkJobProgress> {
        let (tx, rx) = watch::channel(BulkJobProgress::default());
        let key = self.shared.next_key.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let job_id = Arc::new(Mutex::new(None));

        self.shared.jobs.lock().push(TrackedJob {
            key,
            ids: ids.clone(),
            action,
            job_id: Arc::clone(&job_id),
            token: token.clone(),
        });
        self.shared.publish_updating();
        info!(ids = ids.len(), %action, "Bulk job requested");

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let result = drive(&shared, &ids, action, &tx, &token, &job_id).await;
            shared.untrack(key);
            match result {
                Ok(()) => {
                    info!(%action, "Bulk job completed");
                    tx.send_modify(|progress| {
                        progress.state = BulkState::Completed;
                        progress.consecutive_failures = 0;
                    });
                }
                Err(err) => {
                    warn!(%action, error = %err, "Bulk job failed");
                    tx.send_modify(|progress| progress.state = BulkState::Failed(err.to_string()));
                }
            }
        });

        rx
    }

    /// Cancel the first in-flight job matching `(ids, action)`.
    ///
    /// The poll loop stops, the server is asked to cancel if it assigned a
    /// job id, and the local state is refreshed whatever the outcome.
    /// Returns whether a matching job was found.
    pub async fn cancel(&self, ids: &[String], action: BulkAction) -> bool {
        let job = {
            let mut jobs = self.shared.jobs.lock();
            jobs.iter()
                .position(|job| job.ids == ids && job.action == action)
                .map(|index| jobs.remove(index))
        };
        self.shared.publish_updating();

        let found = job.is_some();
        if let Some(job) = job {
            job.token.cancel();
            let job_id = job.job_id.lock().clone();
            if let Some(job_id) = job_id {
                match self.shared.api.cancel_job(&job_id).await {
                    Ok(()) => info!(job_id = %job_id, "Bulk job cancelled"),
                    Err(err) => warn!(job_id = %job_id, error = %err, "Bulk cancel request failed"),
                }
            }
        } else {
            debug!(%action, "No matching bulk job to cancel");
        }

        self.shared.refresh(ids, action).await;
        found
    }

    /// Ids touched by a job that has not ended yet.
    pub fn updating_ids(&self) -> BTreeSet<String> {
        self.shared.updating.borrow().clone()
    }

    pub fn observe_updating_ids(&self) -> watch::Receiver<BTreeSet<String>> {
        self.shared.updating.subscribe()
    }

    pub fn is_updating(&self, id: &str) -> bool {
        self.shared.updating.borrow().contains(id)
    }

    pub fn active_jobs(&self) -> usize {
        self.shared.jobs.lock().len()
    }
}

async fn drive(
    shared: &Shared,
    ids: &[String],
    action: BulkAction,
    tx: &watch::Sender<BulkJobProgress>,
    token: &CancellationToken,
    job_slot: &Mutex<Option<String>>,
) -> Result<(), BulkError> {
    let job_id = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(BulkError::Cancelled),
        started = shared.api.start_job(ids, action) => started.map_err(BulkError::Rejected)?,
    };
    *job_slot.lock() = Some(job_id.clone());
    tx.send_modify(|progress| {
        progress.job_id = Some(job_id.clone());
        progress.state = BulkState::Running(0.0);
    });
    info!(job_id = %job_id, "Bulk job running");

    let interval = shared.config.poll_interval;
    let mut fraction = 0.0_f64;
    let mut failures = 0u32;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(BulkError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }

        let polled = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(BulkError::Cancelled),
            polled = shared.api.job_progress(&job_id) => polled,
        };

        match polled {
            Err(err) if err.is_transient() => {
                failures += 1;
                if failures > shared.config.max_retries {
                    return Err(BulkError::PollExhausted {
                        attempts: failures,
                        last: err,
                    });
                }
                debug!(job_id = %job_id, failures, error = %err, "Progress poll failed, retrying");
                tx.send_modify(|progress| {
                    progress.consecutive_failures = failures;
                    progress.total_retries += 1;
                });
            }
            Err(err) => return Err(BulkError::Poll(err)),
            Ok(status) => {
                failures = 0;
                if status.workflow_state == JobWorkflowState::Failed {
                    return Err(BulkError::JobFailed(
                        status
                            .message
                            .unwrap_or_else(|| "server reported failure".to_string()),
                    ));
                }
                fraction = fraction.max(status.fraction());

                if status.is_done() {
                    if token.is_cancelled() {
                        return Err(BulkError::Cancelled);
                    }
                    tx.send_modify(|progress| {
                        progress.consecutive_failures = 0;
                        progress.state = BulkState::Running(1.0);
                    });
                    shared.refresh(ids, action).await;
                    if token.is_cancelled() {
                        return Err(BulkError::Cancelled);
                    }
                    return Ok(());
                }

                tx.send_modify(|progress| {
                    progress.consecutive_failures = 0;
                    progress.state = BulkState::Running(fraction);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::bulk::action::PublishSubject;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const ACTION: BulkAction = BulkAction::Publish(PublishSubject::ModulesAndItems);

    #[derive(Default)]
    struct ScriptedApi {
        reject: Mutex<Option<ApiError>>,
        polls: Mutex<VecDeque<ApiResult<JobProgress>>>,
        poll_count: AtomicUsize,
        cancel_count: AtomicUsize,
    }

    impl ScriptedApi {
        fn with_polls(polls: Vec<ApiResult<JobProgress>>) -> Arc<Self> {
            Arc::new(Self {
                polls: Mutex::new(polls.into()),
                ..Self::default()
            })
        }

        fn polls(&self) -> usize {
            self.poll_count.load(Ordering::SeqCst)
        }
    }

    impl BulkApi for ScriptedApi {
        fn start_job<'a>(
            &'a self,
            _ids: &'a [String],
            _action: BulkAction,
        ) -> BoxFuture<'a, ApiResult<String>> {
            let rejected = self.reject.lock().take();
            Box::pin(async move {
                match rejected {
                    Some(err) => Err(err),
                    None => Ok("job-1".to_string()),
                }
            })
        }

        fn job_progress<'a>(&'a self, _job_id: &'a str) -> BoxFuture<'a, ApiResult<JobProgress>> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            let next = self
                .polls
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(running(10.0)));
            Box::pin(async move { next })
        }

        fn cancel_job<'a>(&'a self, _job_id: &'a str) -> BoxFuture<'a, ApiResult<()>> {
            self.cancel_count.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct CountingRefresher {
        count: AtomicUsize,
    }

    impl LocalStateRefresher for CountingRefresher {
        fn refresh<'a>(
            &'a self,
            _ids: &'a [String],
            _action: BulkAction,
        ) -> BoxFuture<'a, ApiResult<()>> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn running(completion: f64) -> JobProgress {
        JobProgress {
            completion,
            workflow_state: JobWorkflowState::Running,
            message: None,
        }
    }

    fn done() -> JobProgress {
        JobProgress {
            completion: 100.0,
            workflow_state: JobWorkflowState::Completed,
            message: None,
        }
    }

    fn offline() -> ApiResult<JobProgress> {
        Err(ApiError::Network("connection reset".to_string()))
    }

    fn ids() -> Vec<String> {
        vec!["m1".to_string(), "m2".to_string()]
    }

    fn manager(api: Arc<ScriptedApi>, refresher: Arc<CountingRefresher>) -> BulkStateChangeManager {
        BulkStateChangeManager::new(api, refresher, BulkConfig::default())
    }

    async fn wait_terminal(rx: &mut watch::Receiver<BulkJobProgress>) -> BulkJobProgress {
        loop {
            if rx.borrow_and_update().state.is_terminal() {
                return rx.borrow().clone();
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_until_completion() {
        let api = ScriptedApi::with_polls(vec![
            offline(),
            offline(),
            Ok(running(50.0)),
            Ok(done()),
        ]);
        let refresher = Arc::new(CountingRefresher::default());
        let manager = manager(Arc::clone(&api), Arc::clone(&refresher));

        let mut rx = manager.start(ids(), ACTION);
        let last = wait_terminal(&mut rx).await;

        assert_eq!(last.state, BulkState::Completed);
        assert_eq!(last.total_retries, 2);
        assert_eq!(last.consecutive_failures, 0);
        assert_eq!(last.job_id.as_deref(), Some("job-1"));
        assert_eq!(api.polls(), 4);
        assert_eq!(refresher.count.load(Ordering::SeqCst), 1);
        assert!(manager.updating_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_without_more_polls() {
        let api = ScriptedApi::with_polls((0..5).map(|_| offline()).collect());
        let refresher = Arc::new(CountingRefresher::default());
        let manager = manager(Arc::clone(&api), Arc::clone(&refresher));

        let mut rx = manager.start(ids(), ACTION);
        let last = wait_terminal(&mut rx).await;

        assert!(matches!(last.state, BulkState::Failed(ref msg) if msg.contains("5 times")));
        assert_eq!(api.polls(), 5);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.polls(), 5);
        assert_eq!(refresher.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_start_never_polls() {
        let api = Arc::new(ScriptedApi {
            reject: Mutex::new(Some(ApiError::Rejected("not allowed".to_string()))),
            ..ScriptedApi::default()
        });
        let refresher = Arc::new(CountingRefresher::default());
        let manager = manager(Arc::clone(&api), refresher);

        let mut rx = manager.start(ids(), ACTION);
        let last = wait_terminal(&mut rx).await;

        assert!(matches!(last.state, BulkState::Failed(ref msg) if msg.contains("not allowed")));
        assert_eq!(last.job_id, None);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_never_decreases() {
        let api = ScriptedApi::with_polls(vec![Ok(running(60.0)), Ok(running(30.0))]);
        let manager = manager(Arc::clone(&api), Arc::new(CountingRefresher::default()));

        let rx = manager.start(ids(), ACTION);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(rx.borrow().state, BulkState::Running(0.6));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(api.polls(), 2);
        assert_eq!(rx.borrow().state, BulkState::Running(0.6));
        assert!(manager.is_updating("m1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_failure_ends_job() {
        let api = ScriptedApi::with_polls(vec![Ok(JobProgress {
            completion: 20.0,
            workflow_state: JobWorkflowState::Failed,
            message: Some("module locked".to_string()),
        })]);
        let manager = manager(Arc::clone(&api), Arc::new(CountingRefresher::default()));

        let mut rx = manager.start(ids(), ACTION);
        let last = wait_terminal(&mut rx).await;

        assert_eq!(
            last.state,
            BulkState::Failed("bulk job failed: module locked".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling_and_refreshes() {
        let api = ScriptedApi::with_polls(Vec::new());
        let refresher = Arc::new(CountingRefresher::default());
        let manager = manager(Arc::clone(&api), Arc::clone(&refresher));

        let mut rx = manager.start(ids(), ACTION);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(manager.active_jobs(), 1);

        assert!(manager.cancel(&ids(), ACTION).await);
        let last = wait_terminal(&mut rx).await;
        let polls = api.polls();

        assert_eq!(last.state, BulkState::Failed("cancelled".to_string()));
        assert_eq!(api.cancel_count.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.count.load(Ordering::SeqCst), 1);
        assert!(manager.updating_ids().is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.polls(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_without_job_still_refreshes() {
        let api = ScriptedApi::with_polls(Vec::new());
        let refresher = Arc::new(CountingRefresher::default());
        let manager = manager(Arc::clone(&api), Arc::clone(&refresher));

        assert!(!manager.cancel(&ids(), ACTION).await);
        assert_eq!(api.cancel_count.load(Ordering::SeqCst), 0);
        assert_eq!(refresher.count.load(Ordering::SeqCst), 1);
    }
}
