use std::collections::HashMap;

use boa_engine::{
    builtins::promise::PromiseState, js_string, object::builtins::JsPromise, Context, JsError,
    JsObject, JsValue, Script, Source,
};
use offload_common::{OffloadError, Result, TaskMessage, TaskReply};
use serde_json::Value as JsonValue;
use tracing::{debug, trace, warn};

use crate::{
    bindings,
    conversions::{js_value_to_json, json_to_js_value},
    loader::ScriptLoader,
    program::WorkerProgram,
};

/// A function body after evaluation.
enum Entry {
    Callable(JsObject),
    /// The body threw or produced a non-callable value; tasks calling it fail
    /// with this message.
    Broken(String),
}

/// A Boa context bootstrapped from a [`WorkerProgram`].
///
/// `Context` is `!Send`, so a `WorkerContext` is created on the worker thread
/// and never leaves it.
pub struct WorkerContext {
    ctx: Context,
    deps: JsObject,
    functions: HashMap<String, Entry>,
}

impl WorkerContext {
    /// Runs the fixed bootstrap routine:
    ///
    /// 1. install host bindings (`self`, `console`, `deps`)
    /// 2. load and evaluate each dependency in order
    /// 3. apply the alias table
    /// 4. evaluate each function body into a callable
    ///
    /// A dependency that fails to load or evaluate aborts the bootstrap with
    /// `DependencyLoad`. A bad function body only poisons that function.
    pub fn bootstrap(program: &WorkerProgram, loader: &dyn ScriptLoader) -> Result<Self> {
        let mut ctx = Context::default();

        let deps = bindings::install_worker_bindings(&mut ctx)
            .map_err(|e| OffloadError::WorkerFault(format!("Failed to install bindings: {}", e)))?;

        for dep in program.dependencies() {
            debug!(url = %dep.url, "Loading dependency");
            let source = loader.load(&dep.url)?;
            let evaluated = ctx
                .eval(Source::from_bytes(&source))
                .and_then(|_| ctx.run_jobs());
            if let Err(e) = evaluated {
                return Err(OffloadError::DependencyLoad {
                    url: dep.url.clone(),
                    reason: format!("evaluation failed: {}", describe_error(e, &mut ctx)),
                });
            }
        }

        for alias in program.aliases() {
            match alias.apply(&deps, &mut ctx) {
                Ok(true) => trace!(name = %alias.global_name, "Alias installed"),
                Ok(false) => debug!(
                    name = %alias.global_name,
                    url = %alias.source_url,
                    "Alias not installed: global missing or already bound"
                ),
                Err(e) => warn!(name = %alias.global_name, error = %e, "Failed to apply alias"),
            }
        }

        let mut functions = HashMap::with_capacity(program.functions().len());
        for function in program.functions() {
            let entry = compile(&mut ctx, &function.name, &function.body);
            if let Entry::Broken(reason) = &entry {
                warn!(function = %function.name, %reason, "Function body did not evaluate to a callable");
            }
            functions.insert(function.name.clone(), entry);
        }

        Ok(Self {
            ctx,
            deps,
            functions,
        })
    }

    /// Runs one task. Every failure inside the function becomes an error reply.
    pub fn dispatch(&mut self, message: TaskMessage) -> TaskReply {
        let TaskMessage {
            task_id,
            function_name,
            arguments,
        } = message;

        match self.invoke(&function_name, &arguments) {
            Ok(result) => TaskReply::success(task_id, result),
            Err(reason) => {
                debug!(task_id, function = %function_name, %reason, "Task failed");
                TaskReply::failure(task_id, reason)
            }
        }
    }

    fn invoke(&mut self, name: &str, arguments: &[JsonValue]) -> std::result::Result<JsonValue, String> {
        let function = match self.functions.get(name) {
            Some(Entry::Callable(function)) => function.clone(),
            Some(Entry::Broken(reason)) => return Err(reason.clone()),
            None => return Err(format!("function '{}' is not defined in this worker", name)),
        };

        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments {
            args.push(json_to_js_value(argument, &mut self.ctx)?);
        }

        let this = JsValue::from(self.deps.clone());
        let returned = function
            .call(&this, &args, &mut self.ctx)
            .map_err(|e| describe_error(e, &mut self.ctx))?;

        let settled = self.settle(returned)?;
        js_value_to_json(&settled, &mut self.ctx)
    }

    /// Drains the job queue and unwraps a returned promise.
    fn settle(&mut self, value: JsValue) -> std::result::Result<JsValue, String> {
        self.ctx
            .run_jobs()
            .map_err(|e| describe_error(e, &mut self.ctx))?;

        let Some(object) = value.as_object().map(|o| o.clone()) else {
            return Ok(value);
        };
        let Ok(promise) = JsPromise::from_object(object) else {
            return Ok(value);
        };

        match promise.state() {
            PromiseState::Fulfilled(result) => Ok(result),
            PromiseState::Rejected(reason) => Err(describe_value(&reason, &mut self.ctx)),
            PromiseState::Pending => {
                Err("promise did not settle once the job queue drained".to_string())
            }
        }
    }
}

fn compile(ctx: &mut Context, name: &str, body: &str) -> Entry {
    let source = format!("(\n{}\n)", body);
    match ctx.eval(Source::from_bytes(&source)) {
        Ok(value) => match value.as_object().map(|o| o.clone()) {
            Some(object) if object.is_callable() => Entry::Callable(object),
            _ => Entry::Broken(format!("'{}' is not a function", name)),
        },
        Err(e) => Entry::Broken(format!(
            "'{}' failed to evaluate: {}",
            name,
            describe_error(e, ctx)
        )),
    }
}

fn describe_error(error: JsError, ctx: &mut Context) -> String {
    let value = error.to_opaque(ctx);
    describe_value(&value, ctx)
}

/// `Error` objects become `"<name>: <message>"`, strings stay raw, anything
/// else uses the engine's display form.
fn describe_value(value: &JsValue, ctx: &mut Context) -> String {
    if let Some(s) = value.as_string() {
        return s.to_std_string_escaped();
    }

    if let Some(object) = value.as_object().map(|o| o.clone()) {
        let message = object.get(js_string!("message"), ctx).ok();
        if let Some(message) = message.filter(|m| !m.is_undefined()) {
            let name = object
                .get(js_string!("name"), ctx)
                .ok()
                .and_then(|n| n.as_string().map(|s| s.to_std_string_escaped()))
                .unwrap_or_else(|| "Error".to_string());
            let message = message
                .as_string()
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_else(|| message.display().to_string());
            return if message.is_empty() {
                name
            } else {
                format!("{}: {}", name, message)
            };
        }
    }

    value.display().to_string()
}

/// Checks that `body` parses as a single expression, without running it.
pub fn validate_function_source(body: &str) -> std::result::Result<(), String> {
    let mut ctx = Context::default();
    let source = format!("(\n{}\n)", body);
    Script::parse(Source::from_bytes(&source), None, &mut ctx)
        .map(|_| ())
        .map_err(|e| e.to_string())
}
