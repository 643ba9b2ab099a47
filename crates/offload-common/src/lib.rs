//! Offload Common Types
//!
//! Shared definitions used by every offload crate:
//!
//! - [`error`] - the error taxonomy (`OffloadError`, `ErrorKind`, `ErrorPayload`)
//! - [`protocol`] - the dispatch message and reply exchanged with workers
//! - [`config`] - pool configuration and manifest types
//!
//! # Example
//!
//! ```
//! use offload_common::{PoolConfig, TaskMessage, TaskReply};
//! use serde_json::json;
//!
//! let config = PoolConfig::default().with_max_workers(2);
//! assert!(config.validate().is_ok());
//!
//! let msg = TaskMessage::new(1, "double", vec![json!(21)]);
//! let reply = TaskReply::success(msg.task_id, json!(42));
//! assert!(reply.is_success());
//! ```

pub mod config;
pub mod error;
pub mod protocol;

pub use config::{
    DuplicatePolicy, FunctionDefinition, PoolConfig, QueueDiscipline, RemoteDependency,
};
pub use error::{ErrorKind, ErrorPayload, OffloadError, Result};
pub use protocol::{FunctionName, TaskArgs, TaskId, TaskMessage, TaskReply};
