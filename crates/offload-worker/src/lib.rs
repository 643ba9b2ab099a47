//! Offload Worker Runtime
//!
//! Everything that runs on a worker thread, plus the pieces that describe
//! what a worker runs:
//!
//! - [`alias`] - deriving global names from dependency URLs and the alias
//!   statements that copy library globals into the `deps` environment record
//! - [`program`] - [`WorkerProgram`], the declarative dependency list, alias
//!   table and dispatch table a worker is bootstrapped from
//! - [`loader`] - fetching dependency source (`http(s)://`, `file://`, memory)
//! - [`WorkerContext`] - a Boa context bootstrapped from a program
//! - [`worker`] - the worker thread and its command/event channels
//!
//! # Example
//!
//! ```
//! use offload_common::{FunctionDefinition, TaskMessage};
//! use offload_worker::{StaticLoader, WorkerContext, WorkerProgram};
//! use serde_json::json;
//! use std::collections::BTreeMap;
//!
//! let functions = vec![FunctionDefinition {
//!     name: "double".into(),
//!     body: "x => x * 2".into(),
//!     dependencies: vec![],
//! }];
//! let program = WorkerProgram::build(1, &[], &BTreeMap::new(), &functions);
//!
//! let mut ctx = WorkerContext::bootstrap(&program, &StaticLoader::new()).unwrap();
//! let reply = ctx.dispatch(TaskMessage::new(1, "double", vec![json!(21)]));
//! assert_eq!(reply.into_outcome(), Ok(json!(42)));
//! ```

pub mod alias;
mod bindings;
mod context;
pub mod conversions;
pub mod loader;
pub mod program;
pub mod worker;

pub use alias::{build_alias_statement, derive_alias_name, resolve_alias, AliasStatement};
pub use context::{validate_function_source, WorkerContext};
pub use loader::{DefaultLoader, FileLoader, HttpLoader, ScriptLoader, StaticLoader};
pub use program::WorkerProgram;
pub use worker::{spawn_worker, WorkerCommand, WorkerEvent, WorkerHandle, WorkerId};
