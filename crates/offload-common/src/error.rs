use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::protocol::TaskId;

#[derive(Error, Debug)]
pub enum OffloadError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Function already registered: {0}")]
    DuplicateName(String),

    #[error("Invalid body for function '{name}': {reason}")]
    InvalidFunction { name: String, reason: String },

    #[error("Failed to load dependency {url}: {reason}")]
    DependencyLoad { url: String, reason: String },

    #[error("Task execution error: {0}")]
    TaskExecution(String),

    #[error("Task {0} was cancelled")]
    Cancelled(TaskId),

    #[error("Task {task_id} timed out after {timeout_ms}ms")]
    Timeout { task_id: TaskId, timeout_ms: u64 },

    #[error("Worker fault: {0}")]
    WorkerFault(String),

    #[error("Worker pool is shut down")]
    Shutdown,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`OffloadError`], stable across releases.
///
/// Serializes to the same name [`ErrorKind::as_str`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "UnknownFunctionError")]
    UnknownFunction,
    #[serde(rename = "DuplicateNameError")]
    DuplicateName,
    #[serde(rename = "InvalidFunctionError")]
    InvalidFunction,
    #[serde(rename = "DependencyLoadError")]
    DependencyLoad,
    #[serde(rename = "TaskExecutionError")]
    TaskExecution,
    #[serde(rename = "CancelledError")]
    Cancelled,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "WorkerFaultError")]
    WorkerFault,
    #[serde(rename = "ShutdownError")]
    Shutdown,
    #[serde(rename = "InvalidConfigError")]
    InvalidConfig,
    #[serde(rename = "SerializationError")]
    Serialization,
    #[serde(rename = "IoError")]
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownFunction => "UnknownFunctionError",
            ErrorKind::DuplicateName => "DuplicateNameError",
            ErrorKind::InvalidFunction => "InvalidFunctionError",
            ErrorKind::DependencyLoad => "DependencyLoadError",
            ErrorKind::TaskExecution => "TaskExecutionError",
            ErrorKind::Cancelled => "CancelledError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::WorkerFault => "WorkerFaultError",
            ErrorKind::Shutdown => "ShutdownError",
            ErrorKind::InvalidConfig => "InvalidConfigError",
            ErrorKind::Serialization => "SerializationError",
            ErrorKind::Io => "IoError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured `{kind, message}` error as delivered to task callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl OffloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OffloadError::UnknownFunction(_) => ErrorKind::UnknownFunction,
            OffloadError::DuplicateName(_) => ErrorKind::DuplicateName,
            OffloadError::InvalidFunction { .. } => ErrorKind::InvalidFunction,
            OffloadError::DependencyLoad { .. } => ErrorKind::DependencyLoad,
            OffloadError::TaskExecution(_) => ErrorKind::TaskExecution,
            OffloadError::Cancelled(_) => ErrorKind::Cancelled,
            OffloadError::Timeout { .. } => ErrorKind::Timeout,
            OffloadError::WorkerFault(_) => ErrorKind::WorkerFault,
            OffloadError::Shutdown => ErrorKind::Shutdown,
            OffloadError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            OffloadError::Json(_) => ErrorKind::Serialization,
            OffloadError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.kind(), self.to_string())
    }

    /// Whether this error takes the worker instance down with it.
    ///
    /// Function-level failures (a throw inside the registered function) leave
    /// the worker healthy; load failures and crashes do not.
    pub fn is_worker_fatal(&self) -> bool {
        matches!(
            self,
            OffloadError::DependencyLoad { .. } | OffloadError::WorkerFault(_)
        )
    }
}

pub type Result<T, E = OffloadError> = std::result::Result<T, E>;
