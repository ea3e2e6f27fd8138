//! In-process transfer runtime.
//!
//! Tasks never touch the network. Each started request is recorded and stays
//! running until the caller reports its outcome through the session, which
//! makes the whole pipeline drivable step by step from tests and dry runs.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::{TransferError, TransferResult};
use super::runtime::{
    SessionConfig, SessionEvent, SessionEventSender, TaskEvent, TransferRequest,
    TransferRuntime, TransferSession, CANCELLED,
};

/// Runtime whose sessions are driven by hand.
#[derive(Default)]
pub struct MemoryTransferRuntime {
    sessions: Mutex<Vec<Arc<MemorySession>>>,
    fail_create: AtomicBool,
}

impl MemoryTransferRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent session creation fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.lock().len()
    }

    /// The most recently created session.
    pub fn latest_session(&self) -> Option<Arc<MemorySession>> {
        self.sessions.lock().last().cloned()
    }

    /// Every request started on any session, in start order.
    pub fn requests(&self) -> Vec<TransferRequest> {
        self.sessions
            .lock()
            .iter()
            .flat_map(|session| session.requests())
            .collect()
    }
}

impl TransferRuntime for MemoryTransferRuntime {
    fn create_session(
        &self,
        config: &SessionConfig,
        events: SessionEventSender,
    ) -> TransferResult<Arc<dyn TransferSession>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransferError::Session(
                "runtime refused to create a session".to_string(),
            ));
        }
        let session = Arc::new(MemorySession::new(config.identifier.clone(), events));
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// Session of a [`MemoryTransferRuntime`].
pub struct MemorySession {
    identifier: String,
    events: SessionEventSender,
    requests: Mutex<Vec<TransferRequest>>,
    running: Mutex<BTreeSet<String>>,
    issuing_finished: AtomicBool,
    invalidated: AtomicBool,
    finished_reports: AtomicUsize,
}

impl MemorySession {
    fn new(identifier: String, events: SessionEventSender) -> Self {
        Self {
            identifier,
            events,
            requests: Mutex::new(Vec::new()),
            running: Mutex::new(BTreeSet::new()),
            issuing_finished: AtomicBool::new(false),
            invalidated: AtomicBool::new(false),
            finished_reports: AtomicUsize::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().clone()
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    pub fn is_issuing_finished(&self) -> bool {
        self.issuing_finished.load(Ordering::SeqCst)
    }

    /// Report upload progress for a task.
    pub fn report_sent(&self, tag: &str, total_sent: u64, total_expected: u64) {
        self.events.send_task(TaskEvent::Sent {
            tag: tag.to_string(),
            total_sent,
            total_expected,
        });
    }

    /// Report download progress for a task.
    pub fn report_received(&self, tag: &str, total_received: u64, total_expected: u64) {
        self.events.send_task(TaskEvent::Received {
            tag: tag.to_string(),
            total_received,
            total_expected,
        });
    }

    /// Deliver a response body for a task.
    pub fn report_data(&self, tag: &str, data: &[u8]) {
        self.events.send_task(TaskEvent::Data {
            tag: tag.to_string(),
            data: data.to_vec(),
        });
    }

    /// Complete a task.
    pub fn complete(&self, tag: &str, error: Option<String>) {
        let now_idle = {
            let mut running = self.running.lock();
            if !running.remove(tag) {
                return;
            }
            running.is_empty()
        };
        self.events.send_task(TaskEvent::Completed {
            tag: tag.to_string(),
            error,
        });
        if now_idle {
            self.report_finished_if_idle();
        }
    }

    /// Fail the whole session.
    pub fn invalidate(&self, error: Option<String>) {
        self.invalidated.store(true, Ordering::SeqCst);
        self.events.send(SessionEvent::Invalidated { error });
    }

    fn report_finished_if_idle(&self) {
        if self.is_issuing_finished()
            && self.running.lock().is_empty()
            && self.finished_reports.fetch_add(1, Ordering::SeqCst) == 0
        {
            self.events.send(SessionEvent::FinishedEvents);
        }
    }
}

impl TransferSession for MemorySession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn start_task(&self, request: TransferRequest) -> TransferResult<()> {
        if self.is_invalidated() {
            return Err(TransferError::Task("session is invalidated".to_string()));
        }
        self.running.lock().insert(request.tag.clone());
        self.requests.lock().push(request);
        Ok(())
    }

    fn running_tags(&self) -> Vec<String> {
        self.running.lock().iter().cloned().collect()
    }

    fn cancel_task(&self, tag: &str) {
        self.complete(tag, Some(CANCELLED.to_string()));
    }

    fn finish_issuing(&self) {
        self.issuing_finished.store(true, Ordering::SeqCst);
        self.report_finished_if_idle();
    }

    fn finish_and_invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    fn invalidate_and_cancel(&self) {
        for tag in self.running_tags() {
            self.cancel_task(&tag);
        }
        self.invalidate(None);
    }
}
