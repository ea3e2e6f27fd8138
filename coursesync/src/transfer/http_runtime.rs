//! HTTP transfer runtime.
//!
//! Each task runs on its own worker thread with a blocking `reqwest`
//! client. Uploads are sent as a multipart form: the server-provided
//! parameters first, then the file. Downloads stream into the destination
//! in 64KB chunks.
//!
//! Progress callbacks are throttled so a fast link does not turn into a
//! store write per chunk.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::blocking::{multipart, Client};
use tracing::{debug, warn};

use super::error::{TransferError, TransferResult};
use super::runtime::{
    SessionConfig, SessionEvent, SessionEventSender, TaskEvent, TransferRequest,
    TransferRuntime, TransferSession, CANCELLED,
};
use crate::store::TransferDirection;

/// Default timeout for a whole transfer request (30 minutes).
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Buffer size for streaming downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Minimum spacing between progress callbacks of one task.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Runtime that performs transfers over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransferRuntime {
    timeout: Duration,
    user_agent: String,
}

impl Default for HttpTransferRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransferRuntime {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TRANSFER_TIMEOUT,
            user_agent: format!("coursesync/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

impl TransferRuntime for HttpTransferRuntime {
    fn create_session(
        &self,
        config: &SessionConfig,
        events: SessionEventSender,
    ) -> TransferResult<Arc<dyn TransferSession>> {
        if let Some(container) = &config.shared_container {
            fs::create_dir_all(container).map_err(|e| {
                TransferError::Session(format!(
                    "cannot create shared container {}: {}",
                    container.display(),
                    e
                ))
            })?;
        }

        Ok(Arc::new(HttpSession {
            identifier: config.identifier.clone(),
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
            shared: Arc::new(SessionShared {
                events,
                running: Mutex::new(HashMap::new()),
                issuing_finished: AtomicBool::new(false),
                invalidated: AtomicBool::new(false),
                finished_reported: AtomicBool::new(false),
            }),
        }))
    }
}

/// State shared between a session and its worker threads.
struct SessionShared {
    events: SessionEventSender,
    /// Cancellation flag of every running task, by tag.
    running: Mutex<HashMap<String, Arc<AtomicBool>>>,
    issuing_finished: AtomicBool,
    invalidated: AtomicBool,
    finished_reported: AtomicBool,
}

impl SessionShared {
    fn task_finished(&self, tag: &str, error: Option<String>) {
        let idle = {
            let mut running = self.running.lock();
            running.remove(tag);
            running.is_empty()
        };
        self.events.send_task(TaskEvent::Completed {
            tag: tag.to_string(),
            error,
        });
        if idle {
            self.report_finished_if_idle();
        }
    }

    fn report_finished_if_idle(&self) {
        if self.issuing_finished.load(Ordering::SeqCst)
            && self.running.lock().is_empty()
            && !self.finished_reported.swap(true, Ordering::SeqCst)
        {
            self.events.send(SessionEvent::FinishedEvents);
        }
    }
}

/// Session of an [`HttpTransferRuntime`].
pub struct HttpSession {
    identifier: String,
    timeout: Duration,
    user_agent: String,
    shared: Arc<SessionShared>,
}

impl TransferSession for HttpSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn start_task(&self, request: TransferRequest) -> TransferResult<()> {
        if self.shared.invalidated.load(Ordering::SeqCst) {
            return Err(TransferError::Task("session is invalidated".to_string()));
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        self.shared
            .running
            .lock()
            .insert(request.tag.clone(), Arc::clone(&cancelled));

        let worker = TaskWorker {
            request,
            cancelled,
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
            shared: Arc::clone(&self.shared),
        };
        let tag = worker.request.tag.clone();
        let spawned = thread::Builder::new()
            .name("transfer-task".to_string())
            .spawn(move || worker.run());

        if let Err(e) = spawned {
            self.shared.running.lock().remove(&tag);
            return Err(TransferError::Task(format!("cannot spawn worker: {}", e)));
        }
        Ok(())
    }

    fn running_tags(&self) -> Vec<String> {
        self.shared.running.lock().keys().cloned().collect()
    }

    fn cancel_task(&self, tag: &str) {
        if let Some(flag) = self.shared.running.lock().get(tag) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn finish_issuing(&self) {
        self.shared.issuing_finished.store(true, Ordering::SeqCst);
        self.shared.report_finished_if_idle();
    }

    fn finish_and_invalidate(&self) {
        self.shared.invalidated.store(true, Ordering::SeqCst);
    }

    fn invalidate_and_cancel(&self) {
        self.shared.invalidated.store(true, Ordering::SeqCst);
        for flag in self.shared.running.lock().values() {
            flag.store(true, Ordering::SeqCst);
        }
        self.shared
            .events
            .send(SessionEvent::Invalidated { error: None });
    }
}

// =============================================================================
// Worker
// =============================================================================

struct TaskWorker {
    request: TransferRequest,
    cancelled: Arc<AtomicBool>,
    timeout: Duration,
    user_agent: String,
    shared: Arc<SessionShared>,
}

impl TaskWorker {
    fn run(self) {
        let tag = self.request.tag.clone();
        let result = match self.request.direction {
            TransferDirection::Upload => self.upload(),
            TransferDirection::Download => self.download(),
        };

        let error = match result {
            _ if self.cancelled.load(Ordering::SeqCst) => Some(CANCELLED.to_string()),
            Ok(()) => None,
            Err(e) => Some(e),
        };
        if let Some(e) = &error {
            warn!(tag = %tag, error = %e, "Transfer task failed");
        } else {
            debug!(tag = %tag, "Transfer task completed");
        }
        self.shared.task_finished(&tag, error);
    }

    fn client(&self) -> Result<Client, String> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| format!("cannot create HTTP client: {}", e))
    }

    fn upload(&self) -> Result<(), String> {
        let request = &self.request;
        let file = File::open(&request.local_path)
            .map_err(|e| format!("cannot open {}: {}", request.local_path.display(), e))?;
        let file_name = request
            .local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let reader = ProgressReader {
            inner: file,
            sent: 0,
            total: request.bytes_total,
            last_report: None,
            tag: request.tag.clone(),
            cancelled: Arc::clone(&self.cancelled),
            shared: Arc::clone(&self.shared),
        };

        let mut form = multipart::Form::new();
        for (key, value) in &request.params {
            form = form.text(key.clone(), value.clone());
        }
        form = form.part(
            "file",
            multipart::Part::reader_with_length(reader, request.bytes_total).file_name(file_name),
        );

        let response = self
            .client()?
            .post(&request.url)
            .multipart(form)
            .send()
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let body = response.bytes().map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(format!("upload failed with status {}", status));
        }

        self.shared.events.send_task(TaskEvent::Data {
            tag: request.tag.clone(),
            data: body.to_vec(),
        });
        Ok(())
    }

    fn download(&self) -> Result<(), String> {
        let request = &self.request;
        let dest = &request.local_path;

        let mut response = self
            .client()?
            .get(&request.url)
            .send()
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("download failed with status {}", status));
        }
        let total = response.content_length().unwrap_or(request.bytes_total);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }
        let file = File::create(dest)
            .map_err(|e| format!("cannot create {}: {}", dest.display(), e))?;
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut received = 0u64;
        let mut last_report: Option<Instant> = None;

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(CANCELLED.to_string());
            }
            let read = response
                .read(&mut buffer)
                .map_err(|e| format!("read error: {}", e))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .map_err(|e| format!("write error: {}", e))?;
            received += read as u64;

            if last_report.map_or(true, |at| at.elapsed() >= PROGRESS_INTERVAL) {
                last_report = Some(Instant::now());
                self.shared.events.send_task(TaskEvent::Received {
                    tag: request.tag.clone(),
                    total_received: received,
                    total_expected: total,
                });
            }
        }

        writer
            .flush()
            .map_err(|e| format!("write error: {}", e))?;
        self.shared.events.send_task(TaskEvent::Received {
            tag: request.tag.clone(),
            total_received: received,
            total_expected: total.max(received),
        });
        Ok(())
    }
}

/// Reader reporting upload progress as the body is consumed.
struct ProgressReader<R> {
    inner: R,
    sent: u64,
    total: u64,
    last_report: Option<Instant>,
    tag: String,
    cancelled: Arc<AtomicBool>,
    shared: Arc<SessionShared>,
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, CANCELLED));
        }
        let read = self.inner.read(buf)?;
        self.sent += read as u64;

        let done = read == 0 || self.sent >= self.total;
        if done || self
            .last_report
            .map_or(true, |at| at.elapsed() >= PROGRESS_INTERVAL)
        {
            self.last_report = Some(Instant::now());
            self.shared.events.send_task(TaskEvent::Sent {
                tag: self.tag.clone(),
                total_sent: self.sent,
                total_expected: self.total,
            });
        }
        Ok(read)
    }
}
