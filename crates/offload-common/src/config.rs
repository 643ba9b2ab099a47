//! Pool configuration.
//!
//! All keys are camelCase when read from JSON, matching the manifest format
//! accepted by the CLI:
//!
//! ```json
//! {
//!   "maxWorkers": 4,
//!   "remoteDependencies": ["https://cdn.jsdelivr.net/npm/dayjs@1/dayjs.min.js"],
//!   "remoteDependencyNames": { "https://cdn.example.com/a8f3c9e1.js": "chroma" },
//!   "taskTimeoutMs": 5000
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{OffloadError, Result};

/// A remote script loaded into every worker that needs it.
///
/// Deserializes from either a bare URL string or `{"url", "aliasName"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "DependencySpec", rename_all = "camelCase")]
pub struct RemoteDependency {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_name: Option<String>,
}

impl RemoteDependency {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            alias_name: None,
        }
    }

    pub fn with_alias(mut self, alias_name: impl Into<String>) -> Self {
        self.alias_name = Some(alias_name.into());
        self
    }
}

impl From<&str> for RemoteDependency {
    fn from(url: &str) -> Self {
        RemoteDependency::new(url)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependencySpec {
    Url(String),
    #[serde(rename_all = "camelCase")]
    Full {
        url: String,
        #[serde(default)]
        alias_name: Option<String>,
    },
}

impl From<DependencySpec> for RemoteDependency {
    fn from(spec: DependencySpec) -> Self {
        match spec {
            DependencySpec::Url(url) => RemoteDependency::new(url),
            DependencySpec::Full { url, alias_name } => RemoteDependency { url, alias_name },
        }
    }
}

/// A function definition as written in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub name: String,
    /// JavaScript source of a function expression, e.g. `x => x * 2`.
    pub body: String,
    #[serde(default)]
    pub dependencies: Vec<RemoteDependency>,
}

/// What `register` does when the name is already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail with `DuplicateName`.
    #[default]
    Reject,
    /// Replace the existing definition. Running workers keep the old one.
    Overwrite,
}

/// Order in which queued tasks are handed to idle workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDiscipline {
    #[default]
    Fifo,
    /// Highest priority first; FIFO among equal priorities.
    Priority,
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Upper bound on concurrently live worker slots.
    pub max_workers: usize,
    /// Scripts loaded, in order, into every worker before any task runs.
    pub remote_dependencies: Vec<RemoteDependency>,
    /// URL -> global name, overriding automatic alias derivation.
    pub remote_dependency_names: BTreeMap<String, String>,
    pub duplicate_policy: DuplicatePolicy,
    pub queue_discipline: QueueDiscipline,
    /// Per-task timeout measured from dispatch. `None` disables it.
    pub task_timeout_ms: Option<u64>,
    /// Replace the worker when a task times out instead of letting it finish.
    pub terminate_on_timeout: bool,
    /// Delay before replacing a faulted worker; doubles per consecutive fault.
    pub respawn_backoff_ms: u64,
    /// Workers spawned eagerly at construction. The rest spawn on demand.
    pub prewarm_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            remote_dependencies: Vec::new(),
            remote_dependency_names: BTreeMap::new(),
            duplicate_policy: DuplicatePolicy::default(),
            queue_discipline: QueueDiscipline::default(),
            task_timeout_ms: None,
            terminate_on_timeout: false,
            respawn_backoff_ms: 50,
            prewarm_workers: 0,
        }
    }
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<RemoteDependency>) -> Self {
        self.remote_dependencies.push(dependency.into());
        self
    }

    pub fn with_dependency_name(mut self, url: impl Into<String>, name: impl Into<String>) -> Self {
        self.remote_dependency_names.insert(url.into(), name.into());
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_queue_discipline(mut self, discipline: QueueDiscipline) -> Self {
        self.queue_discipline = discipline;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_terminate_on_timeout(mut self, terminate: bool) -> Self {
        self.terminate_on_timeout = terminate;
        self
    }

    pub fn with_respawn_backoff(mut self, backoff: Duration) -> Self {
        self.respawn_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_prewarm_workers(mut self, count: usize) -> Self {
        self.prewarm_workers = count;
        self
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    pub fn respawn_backoff(&self) -> Duration {
        Duration::from_millis(self.respawn_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(OffloadError::InvalidConfig(
                "maxWorkers must be at least 1".into(),
            ));
        }
        if self.prewarm_workers > self.max_workers {
            return Err(OffloadError::InvalidConfig(format!(
                "prewarmWorkers ({}) exceeds maxWorkers ({})",
                self.prewarm_workers, self.max_workers
            )));
        }
        if self.task_timeout_ms == Some(0) {
            return Err(OffloadError::InvalidConfig(
                "taskTimeoutMs must be positive when set".into(),
            ));
        }
        for dep in &self.remote_dependencies {
            if dep.url.trim().is_empty() {
                return Err(OffloadError::InvalidConfig(
                    "remote dependency URL must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}
