//! Function registry.
//!
//! Holds every registered function in registration order. Entries are
//! immutable once stored and shared as `Arc`s; overwriting a name swaps the
//! `Arc` in place so the dispatch table keeps its order.

use std::collections::HashMap;
use std::sync::Arc;

use offload_common::{
    DuplicatePolicy, FunctionDefinition, OffloadError, RemoteDependency, Result,
};
use offload_worker::validate_function_source;

/// A registered function.
pub type FunctionEntry = FunctionDefinition;

#[derive(Debug)]
pub struct FunctionRegistry {
    entries: Vec<Arc<FunctionEntry>>,
    index: HashMap<String, usize>,
    policy: DuplicatePolicy,
    version: u64,
}

impl FunctionRegistry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            policy,
            version: 0,
        }
    }

    /// Registers `name`, returning the new registry version.
    ///
    /// The body is parsed but not executed. Fails with `InvalidFunction` if it
    /// does not parse as an expression, and with `DuplicateName` if the name is
    /// taken and the policy is [`DuplicatePolicy::Reject`].
    pub fn register(
        &mut self,
        name: &str,
        body: &str,
        dependencies: Vec<RemoteDependency>,
    ) -> Result<u64> {
        if name.trim().is_empty() {
            return Err(OffloadError::InvalidFunction {
                name: name.to_string(),
                reason: "name must not be empty".into(),
            });
        }

        let existing = self.index.get(name).copied();
        if existing.is_some() && self.policy == DuplicatePolicy::Reject {
            return Err(OffloadError::DuplicateName(name.to_string()));
        }

        validate_function_source(body).map_err(|reason| OffloadError::InvalidFunction {
            name: name.to_string(),
            reason,
        })?;

        let entry = Arc::new(FunctionEntry {
            name: name.to_string(),
            body: body.to_string(),
            dependencies,
        });

        match existing {
            Some(position) => self.entries[position] = entry,
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push(entry);
            }
        }

        self.version += 1;
        Ok(self.version)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<FunctionEntry>> {
        self.index
            .get(name)
            .map(|&position| self.entries[position].clone())
            .ok_or_else(|| OffloadError::UnknownFunction(name.to_string()))
    }

    /// Bumped on every successful registration.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &FunctionEntry> {
        self.entries.iter().map(|entry| entry.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }
}
