//! Manifest files.
//!
//! ```json
//! {
//!   "maxWorkers": 2,
//!   "remoteDependencies": ["https://cdn.jsdelivr.net/npm/dayjs@1/dayjs.min.js"],
//!   "functions": [
//!     { "name": "double", "body": "x => x * 2" },
//!     { "name": "year", "body": "(iso) => this.dayjs(iso).year()" }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use offload_common::{FunctionDefinition, PoolConfig, Result};
use offload_pool::WorkerPool;
use offload_worker::{DefaultLoader, ScriptLoader};
use serde::{Deserialize, Serialize};

/// Pool configuration plus the functions registered at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(flatten)]
    pub config: PoolConfig,
    #[serde(default)]
    pub functions: Vec<FunctionDefinition>,
}

impl Manifest {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(text)?;
        manifest.config.validate()?;
        Ok(manifest)
    }

    /// Builds a pool with every manifest function registered before any
    /// worker starts. Must be called inside a tokio runtime.
    pub fn into_pool(self) -> Result<WorkerPool> {
        self.into_pool_with_loader(Arc::new(DefaultLoader::default()))
    }

    pub fn into_pool_with_loader(self, loader: Arc<dyn ScriptLoader>) -> Result<WorkerPool> {
        WorkerPool::with_functions(self.config, loader, self.functions)
    }
}
