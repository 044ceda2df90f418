use crate::task::Task;
use crate::upstream::UpstreamError;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The API answered with a non-success status.
    Upstream,
    /// No response was received.
    Transport,
    /// Anything else: undecodable payloads, panicked tasks.
    Internal,
}

impl FailureKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Upstream => "upstream",
            FailureKind::Transport => "transport",
            FailureKind::Internal => "internal",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    pub status: Option<u16>,
    pub detail: Option<JsonValue>,
}

impl TaskFailure {
    pub fn internal(message: impl Into<String>) -> Self {
        TaskFailure {
            kind: FailureKind::Internal,
            message: message.into(),
            status: None,
            detail: None,
        }
    }

    /// `{message, kind, status?, detail?}`, used in reports and the pull log.
    pub fn to_json(&self) -> JsonValue {
        let mut error = Map::new();
        error.insert("message".into(), self.message.clone().into());
        error.insert("kind".into(), self.kind.as_str().into());
        if let Some(status) = self.status {
            error.insert("status".into(), status.into());
        }
        if let Some(detail) = &self.detail {
            error.insert("detail".into(), detail.clone());
        }
        JsonValue::Object(error)
    }
}

impl From<UpstreamError> for TaskFailure {
    fn from(error: UpstreamError) -> Self {
        let message = error.to_string();
        match error {
            UpstreamError::Upstream { status, detail } => TaskFailure {
                kind: FailureKind::Upstream,
                message,
                status: Some(status),
                detail: Some(detail),
            },
            UpstreamError::Transport(_) => TaskFailure {
                kind: FailureKind::Transport,
                message,
                status: None,
                detail: None,
            },
            UpstreamError::Decode(_) => TaskFailure::internal(message),
        }
    }
}

/// Terminal state of one task.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Success { task: Task, payload: JsonValue },
    Failure { task: Task, failure: TaskFailure },
}

impl Outcome {
    pub fn from_result(task: Task, result: Result<JsonValue, UpstreamError>) -> Self {
        match result {
            Ok(payload) => Outcome::Success { task, payload },
            Err(error) => Outcome::Failure {
                task,
                failure: error.into(),
            },
        }
    }

    pub fn task(&self) -> &Task {
        match self {
            Outcome::Success { task, .. } | Outcome::Failure { task, .. } => task,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub const fn status(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "fulfilled",
            Outcome::Failure { .. } => "rejected",
        }
    }
}
