//! JSON <-> JavaScript Value Conversions
//!
//! Task arguments arrive as `serde_json::Value`s and results leave the same
//! way, so nothing owned by a worker's engine ever crosses a thread boundary.
//!
//! # Type Mapping
//!
//! | JSON Type | JavaScript Type |
//! |-----------|-----------------|
//! | null | null |
//! | boolean | Boolean |
//! | number | Number |
//! | string | String |
//! | array | Array |
//! | object | Object |
//!
//! Going back to JSON follows `JSON.stringify` where it matters: `undefined`,
//! functions, symbols and non-finite numbers become `null`, symbol keys are
//! skipped, and integral numbers come back as JSON integers.

use boa_engine::{
    object::builtins::JsArray, property::PropertyKey, Context, JsObject, JsString, JsValue,
};
use serde_json::Value as JsonValue;

/// Nesting limit for conversions; also guards against cyclic objects.
const MAX_DEPTH: usize = 128;

/// Largest integer a JS number holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub type ConversionResult<T> = Result<T, String>;

/// Convert serde_json::Value to Boa JsValue.
pub fn json_to_js_value(json: &JsonValue, ctx: &mut Context) -> ConversionResult<JsValue> {
    to_js(json, ctx, 0)
}

fn to_js(json: &JsonValue, ctx: &mut Context, depth: usize) -> ConversionResult<JsValue> {
    if depth > MAX_DEPTH {
        return Err("argument nesting too deep".into());
    }

    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(*b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(JsValue::new)
            .ok_or_else(|| format!("number out of range: {}", n)),
        JsonValue::String(s) => Ok(JsValue::new(JsString::from(s.as_str()))),
        JsonValue::Array(arr) => {
            let js_array = JsArray::new(ctx);
            for (i, v) in arr.iter().enumerate() {
                let js_value = to_js(v, ctx, depth + 1)?;
                js_array
                    .push(js_value, ctx)
                    .map_err(|e| format!("failed to push array element {}: {}", i, e))?;
            }
            Ok(js_array.into())
        }
        JsonValue::Object(obj) => {
            let js_obj = JsObject::with_object_proto(ctx.intrinsics());
            for (key, value) in obj {
                let js_value = to_js(value, ctx, depth + 1)?;
                js_obj
                    .create_data_property_or_throw(JsString::from(key.as_str()), js_value, ctx)
                    .map_err(|e| format!("failed to set property '{}': {}", key, e))?;
            }
            Ok(js_obj.into())
        }
    }
}

/// Convert Boa JsValue to serde_json::Value.
pub fn js_value_to_json(value: &JsValue, ctx: &mut Context) -> ConversionResult<JsonValue> {
    to_json(value, ctx, 0)
}

fn to_json(value: &JsValue, ctx: &mut Context, depth: usize) -> ConversionResult<JsonValue> {
    if depth > MAX_DEPTH {
        return Err("result nesting too deep (cyclic object?)".into());
    }

    if value.is_undefined() || value.is_null() {
        return Ok(JsonValue::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(JsonValue::Bool(b));
    }

    if let Some(n) = value.as_number() {
        return Ok(number_to_json(n));
    }

    if let Some(s) = value.as_string() {
        return Ok(JsonValue::String(s.to_std_string_escaped()));
    }

    if let Some(obj) = value.as_object().map(|o| o.clone()) {
        if obj.is_callable() {
            return Ok(JsonValue::Null);
        }

        if obj.is_array() {
            let array = JsArray::from_object(obj.clone())
                .map_err(|e| format!("object is not a valid array: {}", e))?;
            let length = array
                .length(ctx)
                .map_err(|e| format!("failed to get array length: {}", e))?;

            let mut result = Vec::with_capacity(length as usize);
            for i in 0..length {
                let elem = array
                    .get(i, ctx)
                    .map_err(|e| format!("failed to get array element {}: {}", i, e))?;
                result.push(to_json(&elem, ctx, depth + 1)?);
            }
            return Ok(JsonValue::Array(result));
        }

        let keys = obj
            .own_property_keys(ctx)
            .map_err(|e| format!("failed to get object keys: {}", e))?;

        let mut result = serde_json::Map::new();
        for key in keys {
            let key_str = match &key {
                PropertyKey::String(s) => s.to_std_string_escaped(),
                PropertyKey::Index(i) => i.get().to_string(),
                PropertyKey::Symbol(_) => continue,
            };

            let prop_value = obj
                .get(key.clone(), ctx)
                .map_err(|e| format!("failed to get property '{}': {}", key_str, e))?;
            if prop_value.is_undefined() || prop_value.is_callable() {
                continue;
            }
            result.insert(key_str, to_json(&prop_value, ctx, depth + 1)?);
        }

        return Ok(JsonValue::Object(result));
    }

    // Symbols and BigInts have no JSON form
    Ok(JsonValue::Null)
}

fn number_to_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        // -0.0 also lands here and becomes 0
        return JsonValue::Number((n as i64).into());
    }
    serde_json::Number::from_f64(n)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;
    use serde_json::json;

    fn eval_to_json(src: &str) -> JsonValue {
        let mut ctx = Context::default();
        let value = ctx.eval(Source::from_bytes(src)).unwrap();
        js_value_to_json(&value, &mut ctx).unwrap()
    }

    #[test]
    fn test_json_round_trip_through_engine() {
        let mut ctx = Context::default();
        let input = json!({"name": "offload", "sizes": [1, 2.5, -3], "nested": {"ok": true, "none": null}});
        let js = json_to_js_value(&input, &mut ctx).unwrap();
        assert_eq!(js_value_to_json(&js, &mut ctx).unwrap(), input);
    }

    #[test]
    fn test_integral_numbers_stay_integers() {
        assert_eq!(eval_to_json("21 * 2"), json!(42));
        assert_eq!(eval_to_json("0.5 + 0.25"), json!(0.75));
        assert_eq!(eval_to_json("-0"), json!(0));
    }

    #[test]
    fn test_stringify_like_edge_cases() {
        assert_eq!(eval_to_json("undefined"), JsonValue::Null);
        assert_eq!(eval_to_json("NaN"), JsonValue::Null);
        assert_eq!(eval_to_json("(function () {})"), JsonValue::Null);
        assert_eq!(eval_to_json("({a: 1, b: undefined, f() {}})"), json!({"a": 1}));
        assert_eq!(eval_to_json("[1, 'two', [3]]"), json!([1, "two", [3]]));
    }

    #[test]
    fn test_cyclic_object_is_an_error() {
        let mut ctx = Context::default();
        let value = ctx
            .eval(Source::from_bytes("var o = {}; o.self = o; o"))
            .unwrap();
        assert!(js_value_to_json(&value, &mut ctx).is_err());
    }
}
