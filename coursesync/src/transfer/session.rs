//! Owner of the long-lived transfer session.
//!
//! The provider is the only component allowed to create or invalidate the
//! session. It memoizes the session on first use and drops the memo when the
//! session goes away, so the next access builds a fresh one.
//!
//! # Lifecycle
//!
//! ```text
//!            session()
//!   None ───────────────► Some(gen N)
//!    ▲                        │
//!    │  Invalidated (gen N)   │
//!    ├────────────────────────┤
//!    │  FinishedEvents (gen N)│ finish_and_invalidate + completion handler
//!    └────────────────────────┘
//! ```
//!
//! Events from an older generation still reach their observers but never
//! touch the current memo.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::ObserverCache;
use super::error::TransferResult;
use super::runtime::{
    SessionConfig, SessionEnvelope, SessionEvent, SessionEventSender, TransferRuntime,
    TransferSession,
};

/// Called once the runtime has delivered every pending event.
pub type CompletionHandler = Box<dyn FnOnce() + Send>;

struct CurrentSession {
    generation: u64,
    session: Arc<dyn TransferSession>,
}

/// Lazily creates, memoizes and tears down the transfer session.
pub struct SessionProvider {
    runtime: Arc<dyn TransferRuntime>,
    config: SessionConfig,
    cache: Arc<ObserverCache>,
    current: Mutex<Option<CurrentSession>>,
    next_generation: Mutex<u64>,
    events_tx: mpsc::UnboundedSender<SessionEnvelope>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEnvelope>>>,
    completion_handler: Mutex<Option<CompletionHandler>>,
    shutdown: CancellationToken,
}

impl SessionProvider {
    pub fn new(
        runtime: Arc<dyn TransferRuntime>,
        config: SessionConfig,
        cache: Arc<ObserverCache>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            config,
            cache,
            current: Mutex::new(None),
            next_generation: Mutex::new(1),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            completion_handler: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ObserverCache> {
        &self.cache
    }

    /// The current session, created on first access.
    pub fn session(&self) -> TransferResult<Arc<dyn TransferSession>> {
        let mut current = self.current.lock();
        if let Some(current) = current.as_ref() {
            return Ok(Arc::clone(&current.session));
        }

        let generation = {
            let mut next = self.next_generation.lock();
            let generation = *next;
            *next += 1;
            generation
        };
        let sender = SessionEventSender::new(generation, self.events_tx.clone());
        let session = self.runtime.create_session(&self.config, sender)?;
        info!(
            identifier = %self.config.identifier,
            generation,
            "Transfer session created"
        );

        *current = Some(CurrentSession {
            generation,
            session: Arc::clone(&session),
        });
        Ok(session)
    }

    /// Whether a session is currently memoized.
    pub fn has_session(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Register the handler fired after the runtime finishes delivering events.
    ///
    /// Replaces any handler that has not fired yet.
    pub fn set_completion_handler<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.completion_handler.lock() = Some(Box::new(handler));
    }

    /// Tell the current session no more tasks are coming for now.
    pub fn finish_issuing(&self) {
        if let Some(current) = self.current.lock().as_ref() {
            current.session.finish_issuing();
        }
    }

    /// Whether the current session still has running tasks.
    pub fn is_transferring(&self) -> bool {
        !self.running_tags().is_empty()
    }

    /// Tags of the tasks running in the current session.
    pub fn running_tags(&self) -> Vec<String> {
        self.current
            .lock()
            .as_ref()
            .map(|current| current.session.running_tags())
            .unwrap_or_default()
    }

    /// Cancel the running tasks with the given tags.
    ///
    /// Cancelled tasks still report a completion, which their observers
    /// record as a failure.
    pub fn cancel_tasks(&self, tags: &[String]) -> usize {
        let session = match self.current.lock().as_ref() {
            Some(current) => Arc::clone(&current.session),
            None => return 0,
        };

        let running = session.running_tags();
        let mut cancelled = 0;
        for tag in tags.iter().filter(|tag| running.contains(tag)) {
            session.cancel_task(tag);
            cancelled += 1;
        }
        debug!(cancelled, "Cancelled transfer tasks");
        cancelled
    }

    /// Process one session event.
    pub fn handle(&self, envelope: SessionEnvelope) {
        let SessionEnvelope { generation, event } = envelope;
        match event {
            SessionEvent::Task(task_event) => {
                if !self.cache.dispatch(task_event) {
                    debug!(generation, "Dropped callback for unknown task");
                }
            }
            SessionEvent::Invalidated { error } => {
                match &error {
                    Some(error) => warn!(generation, error = %error, "Transfer session invalidated"),
                    None => info!(generation, "Transfer session invalidated"),
                }
                self.drop_if_current(generation);
            }
            SessionEvent::FinishedEvents => {
                if let Some(session) = self.drop_if_current(generation) {
                    session.finish_and_invalidate();
                }
                info!(generation, "Transfer session finished delivering events");
                let handler = self.completion_handler.lock().take();
                if let Some(handler) = handler {
                    handler();
                }
            }
        }
    }

    /// Take the receiving end of the event channel. Succeeds once.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<SessionEnvelope>> {
        self.events_rx.lock().take()
    }

    /// Drive events until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<SessionEnvelope>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                envelope = events.recv() => match envelope {
                    Some(envelope) => self.handle(envelope),
                    None => break,
                },
            }
        }
        debug!("Session event loop stopped");
    }

    /// Stop the event loop. Events still queued are dropped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Spawn the event loop on the current runtime.
    ///
    /// Returns `None` if the loop was already started.
    pub fn spawn_event_loop(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let events = self.take_event_receiver()?;
        let provider = Arc::clone(self);
        Some(tokio::spawn(async move { provider.run(events).await }))
    }

    fn drop_if_current(&self, generation: u64) -> Option<Arc<dyn TransferSession>> {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(c) if c.generation == generation => current.take().map(|c| c.session),
            _ => None,
        }
    }
}

impl std::fmt::Debug for SessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProvider")
            .field("identifier", &self.config.identifier)
            .field("has_session", &self.has_session())
            .finish()
    }
}
