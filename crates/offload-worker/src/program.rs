//! Worker program builder.
//!
//! A [`WorkerProgram`] is the complete, immutable description of what a worker
//! runs: the dependencies to load, the aliases to install and the functions it
//! can dispatch to. Workers interpret it through a fixed bootstrap routine
//! ([`WorkerContext::bootstrap`](crate::WorkerContext::bootstrap)), so no
//! source text is stitched together on the execution path. [`render`] exists
//! only to show the equivalent JavaScript.
//!
//! [`render`]: WorkerProgram::render

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use offload_common::{FunctionDefinition, RemoteDependency};
use tracing::warn;

use crate::alias::{build_alias_statement, quote, resolve_alias, AliasStatement};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerProgram {
    version: u64,
    dependencies: Vec<RemoteDependency>,
    aliases: Vec<AliasStatement>,
    functions: Vec<FunctionDefinition>,
}

impl WorkerProgram {
    /// Builds the program for registry `version`.
    ///
    /// `functions` must be in registration order: dependency order follows it.
    pub fn build<'a>(
        version: u64,
        pool_dependencies: &[RemoteDependency],
        alias_overrides: &BTreeMap<String, String>,
        functions: impl IntoIterator<Item = &'a FunctionDefinition>,
    ) -> Self {
        let functions: Vec<FunctionDefinition> = functions.into_iter().cloned().collect();

        let mut seen = HashSet::new();
        let dependencies: Vec<RemoteDependency> = pool_dependencies
            .iter()
            .chain(functions.iter().flat_map(|f| f.dependencies.iter()))
            .filter(|dep| seen.insert(dep.url.clone()))
            .cloned()
            .collect();

        let mut aliases = Vec::with_capacity(dependencies.len());
        for dep in &dependencies {
            match resolve_alias(dep, alias_overrides) {
                Some(name) => aliases.push(build_alias_statement(&name, &dep.url)),
                None => warn!(
                    url = %dep.url,
                    "No global name could be derived for dependency; it is loaded but not aliased"
                ),
            }
        }

        Self {
            version,
            dependencies,
            aliases,
            functions,
        }
    }

    /// A program with no dependencies and no functions.
    pub fn empty() -> Self {
        Self {
            version: 0,
            dependencies: Vec::new(),
            aliases: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Dependencies in load order, deduplicated by URL.
    pub fn dependencies(&self) -> &[RemoteDependency] {
        &self.dependencies
    }

    pub fn aliases(&self) -> &[AliasStatement] {
        &self.aliases
    }

    /// Dispatch table in registration order.
    pub fn functions(&self) -> &[FunctionDefinition] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Equivalent JavaScript bootstrap text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing to a String never fails
        let _ = self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "// offload worker program v{}", self.version)?;
        writeln!(out, "var deps = {{}};")?;

        if !self.dependencies.is_empty() {
            writeln!(out)?;
            writeln!(out, "// dependencies")?;
            for dep in &self.dependencies {
                writeln!(out, "importScripts({});", quote(&dep.url))?;
            }
        }

        if !self.aliases.is_empty() {
            writeln!(out)?;
            writeln!(out, "// aliases")?;
            for alias in &self.aliases {
                writeln!(out, "{}", alias.render())?;
            }
        }

        writeln!(out)?;
        writeln!(out, "var functions = {{")?;
        for function in &self.functions {
            writeln!(out, "  {}: (\n{}\n),", quote(&function.name), function.body)?;
        }
        writeln!(out, "}};")?;

        writeln!(out)?;
        out.push_str(DISPATCH_LOOP);
        Ok(())
    }
}

const DISPATCH_LOOP: &str = r#"self.onmessage = async function (event) {
  var msg = event.data;
  try {
    var fn = functions[msg.functionName];
    if (typeof fn !== "function") throw new Error("function '" + msg.functionName + "' is not defined in this worker");
    var result = await fn.apply(deps, msg.arguments);
    self.postMessage({ taskId: msg.taskId, result: result });
  } catch (e) {
    self.postMessage({ taskId: msg.taskId, error: String(e && e.message || e) });
  }
};
"#;

#[cfg(test)]
mod tests {
    use super::*;

    const NO_FUNCTIONS: &[FunctionDefinition] = &[];

    fn def(name: &str, body: &str, deps: &[&str]) -> FunctionDefinition {
        FunctionDefinition {
            name: name.into(),
            body: body.into(),
            dependencies: deps.iter().map(|u| RemoteDependency::from(*u)).collect(),
        }
    }

    #[test]
    fn test_dependency_order_and_dedup() {
        let pool = vec![RemoteDependency::new("https://cdn/dayjs.min.js")];
        let functions = vec![
            def("a", "x => x", &["https://cdn/lodash.min.js", "https://cdn/dayjs.min.js"]),
            def("b", "x => x", &["https://cdn/chroma.js", "https://cdn/lodash.min.js"]),
        ];

        let program = WorkerProgram::build(3, &pool, &BTreeMap::new(), &functions);
        let urls: Vec<&str> = program.dependencies().iter().map(|d| d.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn/dayjs.min.js",
                "https://cdn/lodash.min.js",
                "https://cdn/chroma.js"
            ]
        );
        assert_eq!(program.version(), 3);
    }

    #[test]
    fn test_first_declaration_wins() {
        let pool = vec![RemoteDependency::new("https://cdn/x.js").with_alias("first")];
        let functions = vec![FunctionDefinition {
            name: "f".into(),
            body: "() => 1".into(),
            dependencies: vec![RemoteDependency::new("https://cdn/x.js").with_alias("second")],
        }];

        let program = WorkerProgram::build(1, &pool, &BTreeMap::new(), &functions);
        assert_eq!(program.dependencies().len(), 1);
        assert_eq!(program.aliases()[0].global_name, "first");
    }

    #[test]
    fn test_unresolvable_alias_is_skipped() {
        let pool = vec![
            RemoteDependency::new("https://cdn/a8f3c9e1.js"),
            RemoteDependency::new("https://cdn/dayjs.min.js"),
        ];
        let program = WorkerProgram::build(1, &pool, &BTreeMap::new(), NO_FUNCTIONS);
        assert_eq!(program.dependencies().len(), 2);
        let names: Vec<&str> = program.aliases().iter().map(|a| a.global_name.as_str()).collect();
        assert_eq!(names, vec!["dayjs"]);
    }

    #[test]
    fn test_override_applies() {
        let pool = vec![RemoteDependency::new("https://cdn/a8f3c9e1.js")];
        let mut overrides = BTreeMap::new();
        overrides.insert("https://cdn/a8f3c9e1.js".to_string(), "chroma".to_string());
        let program = WorkerProgram::build(1, &pool, &overrides, NO_FUNCTIONS);
        assert_eq!(program.aliases()[0].global_name, "chroma");
        assert_eq!(program.aliases()[0].source_url, "https://cdn/a8f3c9e1.js");
    }

    #[test]
    fn test_function_lookup() {
        let functions = vec![def("double", "x => x * 2", &[])];
        let program = WorkerProgram::build(1, &[], &BTreeMap::new(), &functions);
        assert!(program.function("double").is_some());
        assert!(program.function("missing").is_none());
        assert!(WorkerProgram::empty().functions().is_empty());
    }

    #[test]
    fn test_render_contains_every_section() {
        let pool = vec![RemoteDependency::new("https://cdn/dayjs.min.js")];
        let functions = vec![def("double", "x => x * 2", &[])];
        let text = WorkerProgram::build(7, &pool, &BTreeMap::new(), &functions).render();

        assert!(text.starts_with("// offload worker program v7\n"));
        assert!(text.contains("importScripts(\"https://cdn/dayjs.min.js\");"));
        assert!(text.contains("deps[\"dayjs\"] = self[\"dayjs\"];"));
        assert!(text.contains("\"double\": (\nx => x * 2\n),"));
        assert!(text.contains("fn.apply(deps, msg.arguments)"));
    }
}
