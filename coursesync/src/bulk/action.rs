//! Bulk actions and job state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a publish action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishSubject {
    /// Only the modules themselves.
    OnlyModules,
    /// The modules and every item in them.
    ModulesAndItems,
}

/// State change requested for a set of remote entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "event", content = "subject", rename_all = "snake_case")]
pub enum BulkAction {
    Publish(PublishSubject),
    Unpublish(PublishSubject),
}

impl BulkAction {
    pub fn is_publish(&self) -> bool {
        matches!(self, Self::Publish(_))
    }

    pub fn subject(&self) -> PublishSubject {
        match self {
            Self::Publish(subject) | Self::Unpublish(subject) => *subject,
        }
    }

    /// Event name sent to the server.
    pub fn event(&self) -> &'static str {
        if self.is_publish() {
            "publish"
        } else {
            "unpublish"
        }
    }

    /// Whether module items are left untouched.
    pub fn skip_content_tags(&self) -> bool {
        self.subject() == PublishSubject::OnlyModules
    }

    /// Status line announced when a job ends.
    pub fn status_text(&self, succeeded: bool, many: bool) -> String {
        let verb = if self.is_publish() {
            "published"
        } else {
            "unpublished"
        };
        if !succeeded {
            return if self.is_publish() {
                "Error with publishing".to_string()
            } else {
                "Error with unpublishing".to_string()
            };
        }
        match (self.subject(), many) {
            (PublishSubject::OnlyModules, true) => format!("Only Modules {}", verb),
            (PublishSubject::OnlyModules, false) => format!("Only Module {}", verb),
            (PublishSubject::ModulesAndItems, true) => {
                format!("All Modules and all Items {}", verb)
            }
            (PublishSubject::ModulesAndItems, false) => format!("Module and all Items {}", verb),
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subject() {
            PublishSubject::ModulesAndItems => write!(f, "{}", self.event()),
            PublishSubject::OnlyModules => write!(f, "{}-modules", self.event()),
        }
    }
}

impl FromStr for BulkAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publish" => Ok(Self::Publish(PublishSubject::ModulesAndItems)),
            "publish-modules" => Ok(Self::Publish(PublishSubject::OnlyModules)),
            "unpublish" => Ok(Self::Unpublish(PublishSubject::ModulesAndItems)),
            "unpublish-modules" => Ok(Self::Unpublish(PublishSubject::OnlyModules)),
            other => Err(format!(
                "unknown action '{}' (expected publish, publish-modules, unpublish or unpublish-modules)",
                other
            )),
        }
    }
}

/// Lifecycle of a bulk job as seen by the client.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BulkState {
    #[default]
    NotStarted,
    /// Fraction done, 0.0 to 1.0, never decreasing.
    Running(f64),
    Completed,
    Failed(String),
}

impl BulkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Snapshot published for one job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkJobProgress {
    /// Server job identifier, once the start request was accepted.
    pub job_id: Option<String>,
    pub state: BulkState,
    /// Consecutive failed polls; reset by every successful poll.
    pub consecutive_failures: u32,
    /// Failed polls that were retried over the job's lifetime.
    pub total_retries: u32,
}

/// Server-side state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobWorkflowState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// One progress poll result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Percentage, 0 to 100.
    pub completion: f64,
    pub workflow_state: JobWorkflowState,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobProgress {
    pub fn is_done(&self) -> bool {
        self.workflow_state == JobWorkflowState::Completed
    }

    pub fn fraction(&self) -> f64 {
        (self.completion / 100.0).clamp(0.0, 1.0)
    }
}
