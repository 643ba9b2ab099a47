//! Host bindings installed into every worker's global scope.
//!
//! # JavaScript API
//!
//! - `self` - the global object, as in a browser worker (UMD bundles attach
//!   their export to it)
//! - `console.log/info/warn/error/debug` - forwarded to `tracing` under the
//!   `offload::console` target
//! - `deps` - the environment record holding dependency aliases; read-only
//!   and non-deletable as a binding, though its properties are writable

use boa_engine::{
    js_string, object::ObjectInitializer, property::Attribute, Context, JsObject, JsResult,
    JsValue, NativeFunction,
};
use tracing::{debug, error, info, warn};

pub(crate) const CONSOLE_TARGET: &str = "offload::console";

/// Installs `self`, `console` and `deps`, returning the `deps` object.
pub(crate) fn install_worker_bindings(ctx: &mut Context) -> JsResult<JsObject> {
    let global = ctx.global_object();
    ctx.register_global_property(js_string!("self"), global, Attribute::all())?;

    let console = ObjectInitializer::new(ctx)
        .function(NativeFunction::from_fn_ptr(console_log), js_string!("log"), 0)
        .function(NativeFunction::from_fn_ptr(console_info), js_string!("info"), 0)
        .function(NativeFunction::from_fn_ptr(console_warn), js_string!("warn"), 0)
        .function(NativeFunction::from_fn_ptr(console_error), js_string!("error"), 0)
        .function(NativeFunction::from_fn_ptr(console_debug), js_string!("debug"), 0)
        .build();
    ctx.register_global_property(
        js_string!("console"),
        console,
        Attribute::WRITABLE | Attribute::CONFIGURABLE,
    )?;

    let deps = JsObject::with_object_proto(ctx.intrinsics());
    ctx.register_global_property(
        js_string!("deps"),
        deps.clone(),
        Attribute::READONLY | Attribute::NON_ENUMERABLE | Attribute::PERMANENT,
    )?;

    Ok(deps)
}

fn join_args(args: &[JsValue]) -> String {
    args.iter()
        .map(|arg| match arg.as_string() {
            Some(s) => s.to_std_string_escaped(),
            None => arg.display().to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn console_log(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    info!(target: CONSOLE_TARGET, "{}", join_args(args));
    Ok(JsValue::undefined())
}

fn console_info(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    info!(target: CONSOLE_TARGET, "{}", join_args(args));
    Ok(JsValue::undefined())
}

fn console_warn(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    warn!(target: CONSOLE_TARGET, "{}", join_args(args));
    Ok(JsValue::undefined())
}

fn console_error(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    error!(target: CONSOLE_TARGET, "{}", join_args(args));
    Ok(JsValue::undefined())
}

fn console_debug(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    debug!(target: CONSOLE_TARGET, "{}", join_args(args));
    Ok(JsValue::undefined())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;

    #[test]
    fn test_self_is_global() {
        let mut ctx = Context::default();
        install_worker_bindings(&mut ctx).unwrap();
        let same = ctx.eval(Source::from_bytes("self === globalThis")).unwrap();
        assert_eq!(same.as_boolean(), Some(true));
    }

    #[test]
    fn test_console_is_callable() {
        let mut ctx = Context::default();
        install_worker_bindings(&mut ctx).unwrap();
        let result = ctx
            .eval(Source::from_bytes(
                "console.log('a', 1, {b: 2}); console.warn('w'); console.error('e'); typeof console.debug",
            ))
            .unwrap();
        assert_eq!(result.as_string().map(|s| s.to_std_string_escaped()).as_deref(), Some("function"));
    }

    #[test]
    fn test_deps_binding_cannot_be_replaced() {
        let mut ctx = Context::default();
        let deps = install_worker_bindings(&mut ctx).unwrap();
        ctx.eval(Source::from_bytes("deps = 5; deps.answer = 42;")).unwrap();

        let answer = deps.get(js_string!("answer"), &mut ctx).unwrap();
        assert_eq!(answer.as_number(), Some(42.0));
        let kind = ctx.eval(Source::from_bytes("typeof deps")).unwrap();
        assert_eq!(kind.as_string().map(|s| s.to_std_string_escaped()).as_deref(), Some("object"));
    }

    #[test]
    fn test_join_args() {
        assert_eq!(join_args(&[]), "");
        assert_eq!(
            join_args(&[JsValue::new(js_string!("x")), JsValue::new(3)]),
            "x 3"
        );
    }
}
