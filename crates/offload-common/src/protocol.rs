//! Offload Task Messages
//!
//! The only messages that cross the boundary between the pool manager and a
//! worker: a dispatch request and its reply. Both carry owned JSON values, so
//! nothing is shared between the manager and the worker's engine.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ErrorPayload};

pub type TaskId = u64;
pub type FunctionName = String;
pub type TaskArgs = Vec<serde_json::Value>;

/// A dispatch request sent from the manager to a worker.
///
/// Serializes as `{"taskId", "functionName", "arguments"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub task_id: TaskId,
    pub function_name: FunctionName,
    pub arguments: TaskArgs,
}

impl TaskMessage {
    pub fn new(task_id: TaskId, function_name: impl Into<String>, arguments: TaskArgs) -> Self {
        Self {
            task_id,
            function_name: function_name.into(),
            arguments,
        }
    }
}

/// A worker's reply to a [`TaskMessage`].
///
/// Exactly one of `result` / `error` is present: `{"taskId", "result"}` on
/// success, `{"taskId", "error"}` on failure.
///
/// # Example
///
/// ```
/// use offload_common::protocol::TaskReply;
/// use serde_json::json;
///
/// let ok = TaskReply::success(1, json!(42));
/// assert!(ok.is_success());
///
/// let failed = TaskReply::failure(2, "x is not defined");
/// assert!(!failed.is_success());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskReply {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl TaskReply {
    pub fn success(task_id: TaskId, result: serde_json::Value) -> Self {
        Self {
            task_id,
            result: Some(result),
            error: None,
        }
    }

    /// A function-level failure: the registered function threw or rejected.
    pub fn failure(task_id: TaskId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            result: None,
            error: Some(ErrorPayload::new(ErrorKind::TaskExecution, message)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Splits the reply into the value or the failure payload.
    pub fn into_outcome(self) -> Result<serde_json::Value, ErrorPayload> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}
