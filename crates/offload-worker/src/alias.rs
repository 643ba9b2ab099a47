//! Dependency alias resolution.
//!
//! Third-party scripts usually publish themselves as a global (`dayjs`,
//! `_`, `chroma`). Minifiers rename local identifiers in the calling code, so
//! a registered function cannot rely on reaching that global by its bare name.
//! Every worker therefore keeps an explicit environment record, the `deps`
//! object, and copies each library global into it under a stable name. Calls
//! written as `deps.dayjs(...)` or `this.dayjs(...)` survive renaming.
//!
//! This module decides *which* name each dependency gets and describes the
//! copy as an [`AliasStatement`]; the worker context applies it.

use std::collections::BTreeMap;

use boa_engine::{Context, JsObject, JsResult, JsString};
use offload_common::RemoteDependency;

const SCRIPT_EXTENSIONS: &[&str] = &[".js", ".mjs", ".cjs"];
const BUILD_MARKERS: &[&str] = &[
    ".min",
    ".umd",
    ".prod",
    ".production",
    ".development",
    ".bundle",
];

/// Infers a global name from a dependency URL.
///
/// Takes the final path segment, then strips the script extension, build
/// markers and a version suffix:
///
/// ```
/// use offload_worker::alias::derive_alias_name;
///
/// assert_eq!(
///     derive_alias_name("https://cdn.jsdelivr.net/npm/dayjs@1/dayjs.min.js").as_deref(),
///     Some("dayjs")
/// );
/// assert_eq!(derive_alias_name("https://unpkg.com/jquery-3.7.1.min.js").as_deref(), Some("jquery"));
/// assert_eq!(derive_alias_name("https://cdn.example.com/a8f3c9e1.js"), None);
/// ```
///
/// Returns `None` when what remains is not a plausible JavaScript identifier.
pub fn derive_alias_name(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let segment = path.trim_end_matches('/').rsplit('/').next()?;

    let mut name = segment;
    if let Some(stripped) = strip_suffix_ci(name, SCRIPT_EXTENSIONS) {
        name = stripped;
    }

    // Markers and versions can interleave (`lib-2.0.umd.min`), strip until stable
    loop {
        let before = name;
        if let Some(stripped) = strip_suffix_ci(name, BUILD_MARKERS) {
            name = stripped;
        }
        if let Some(stripped) = strip_version(name) {
            name = stripped;
        }
        if name == before {
            break;
        }
    }

    if is_identifier(name) && !looks_like_hash(name) {
        Some(name.to_string())
    } else {
        None
    }
}

/// Picks the global name for a dependency.
///
/// An explicit override keyed by URL wins over the dependency's own
/// `alias_name`, which wins over the name derived from the URL.
pub fn resolve_alias(
    dependency: &RemoteDependency,
    overrides: &BTreeMap<String, String>,
) -> Option<String> {
    overrides
        .get(&dependency.url)
        .cloned()
        .or_else(|| dependency.alias_name.clone())
        .or_else(|| derive_alias_name(&dependency.url))
}

/// "If the global scope has `global_name` and `deps` has no own binding of
/// that name, bind `deps[global_name]` to the global's value."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasStatement {
    pub global_name: String,
    pub source_url: String,
}

impl AliasStatement {
    /// Installs the alias into `deps`.
    ///
    /// Returns `true` when a binding was added. Never overwrites an existing
    /// own property, so applying the same statement twice is a no-op.
    pub fn apply(&self, deps: &JsObject, ctx: &mut Context) -> JsResult<bool> {
        let key = JsString::from(self.global_name.as_str());
        if deps.has_own_property(key.clone(), ctx)? {
            return Ok(false);
        }

        let value = ctx.global_object().get(key.clone(), ctx)?;
        if value.is_undefined() {
            return Ok(false);
        }

        deps.create_data_property_or_throw(key, value, ctx)?;
        Ok(true)
    }

    /// Equivalent JavaScript, for inspection.
    pub fn render(&self) -> String {
        let name = quote(&self.global_name);
        format!(
            "if (typeof self[{name}] !== \"undefined\" && !Object.prototype.hasOwnProperty.call(deps, {name})) {{ deps[{name}] = self[{name}]; }}"
        )
    }
}

/// Builds the alias statement for `global_name`.
pub fn build_alias_statement(global_name: &str, source_url: &str) -> AliasStatement {
    AliasStatement {
        global_name: global_name.to_string(),
        source_url: source_url.to_string(),
    }
}

/// JSON string quoting is valid JavaScript string quoting.
pub(crate) fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

fn strip_suffix_ci<'a>(name: &'a str, suffixes: &[&str]) -> Option<&'a str> {
    suffixes.iter().find_map(|suffix| {
        let split = name.len().checked_sub(suffix.len())?;
        let (head, tail) = (name.get(..split)?, name.get(split..)?);
        (tail.eq_ignore_ascii_case(suffix) && !head.is_empty()).then_some(head)
    })
}

/// Strips `@<anything>`, or `-1.2.3` / `.1.2.3` / `-v2` style suffixes.
fn strip_version(name: &str) -> Option<&str> {
    if let Some((head, _)) = name.split_once('@') {
        if !head.is_empty() {
            return Some(head);
        }
    }

    for sep in ['-', '.'] {
        // The version may itself contain dots, so try the earliest split that
        // leaves a version-shaped tail
        for (idx, _) in name.match_indices(sep) {
            let (head, tail) = (&name[..idx], &name[idx + 1..]);
            if !head.is_empty() && is_version(tail) {
                return Some(head);
            }
        }
    }
    None
}

fn is_version(s: &str) -> bool {
    let s = s.strip_prefix(['v', 'V']).unwrap_or(s);
    !s.is_empty()
        && s.split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Content-hashed bundle names such as `a8f3c9e1` or `4f2b9d0c7e1a`.
fn looks_like_hash(s: &str) -> bool {
    s.len() >= 8
        && s.bytes().all(|b| b.is_ascii_hexdigit())
        && s.bytes().any(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_common_cdn_urls() {
        let cases = [
            ("https://cdn.jsdelivr.net/npm/dayjs@1/dayjs.min.js", Some("dayjs")),
            ("https://cdn.jsdelivr.net/npm/dayjs@1", Some("dayjs")),
            ("https://unpkg.com/lodash@4.17.21/lodash.min.js", Some("lodash")),
            ("https://code.jquery.com/jquery-3.7.1.min.js", Some("jquery")),
            ("https://unpkg.com/react@18/umd/react.production.min.js", Some("react")),
            ("https://cdn.example.com/chroma.umd.js?v=3#top", Some("chroma")),
            ("https://cdn.example.com/mathlib-v2.bundle.mjs", Some("mathlib")),
            ("https://cdn.example.com/util.1.2.3.js", Some("util")),
            ("file:///tmp/helpers.cjs", Some("helpers")),
        ];
        for (url, expected) in cases {
            assert_eq!(derive_alias_name(url).as_deref(), expected, "url: {}", url);
        }
    }

    #[test]
    fn test_derive_rejects_implausible_names() {
        assert_eq!(derive_alias_name("https://cdn.example.com/a8f3c9e1.js"), None);
        assert_eq!(derive_alias_name("https://cdn.example.com/3d-engine.js"), None);
        assert_eq!(derive_alias_name("https://cdn.example.com/lodash-es.js"), None);
        assert_eq!(derive_alias_name("https://cdn.example.com/"), None);
        assert_eq!(derive_alias_name(""), None);
    }

    #[test]
    fn test_derive_is_idempotent() {
        for url in [
            "https://cdn.jsdelivr.net/npm/dayjs@1/dayjs.min.js",
            "https://code.jquery.com/jquery-3.7.1.min.js",
            "https://cdn.example.com/chroma.umd.js",
        ] {
            let once = derive_alias_name(url).unwrap();
            assert_eq!(derive_alias_name(&once), Some(once.clone()));
        }
    }

    #[test]
    fn test_resolve_alias_precedence() {
        let url = "https://cdn.example.com/a8f3c9e1.js";
        let mut overrides = BTreeMap::new();

        let bare = RemoteDependency::new(url);
        assert_eq!(resolve_alias(&bare, &overrides), None);

        let named = RemoteDependency::new(url).with_alias("chroma");
        assert_eq!(resolve_alias(&named, &overrides).as_deref(), Some("chroma"));

        overrides.insert(url.to_string(), "colors".to_string());
        assert_eq!(resolve_alias(&named, &overrides).as_deref(), Some("colors"));

        let derived = RemoteDependency::new("https://cdn.example.com/dayjs.min.js");
        assert_eq!(resolve_alias(&derived, &overrides).as_deref(), Some("dayjs"));
    }

    #[test]
    fn test_render_statement() {
        let stmt = build_alias_statement("dayjs", "https://cdn/dayjs.min.js");
        assert_eq!(
            stmt.render(),
            "if (typeof self[\"dayjs\"] !== \"undefined\" && !Object.prototype.hasOwnProperty.call(deps, \"dayjs\")) { deps[\"dayjs\"] = self[\"dayjs\"]; }"
        );
    }

    #[test]
    fn test_apply_twice_never_overwrites() {
        use boa_engine::{js_string, Source};

        let mut ctx = Context::default();
        ctx.eval(Source::from_bytes("var dayjs = function () { return 1; };"))
            .unwrap();
        let deps = JsObject::with_object_proto(ctx.intrinsics());
        let stmt = build_alias_statement("dayjs", "https://cdn/dayjs.min.js");

        assert!(stmt.apply(&deps, &mut ctx).unwrap());
        let first = deps.get(js_string!("dayjs"), &mut ctx).unwrap();

        // Replace the global; the alias must keep pointing at the original
        ctx.eval(Source::from_bytes("dayjs = 42;")).unwrap();
        assert!(!stmt.apply(&deps, &mut ctx).unwrap());
        let second = deps.get(js_string!("dayjs"), &mut ctx).unwrap();
        assert!(first.is_callable());
        assert!(second.is_callable());
    }

    #[test]
    fn test_apply_missing_global_is_noop() {
        let mut ctx = Context::default();
        let deps = JsObject::with_object_proto(ctx.intrinsics());
        let stmt = build_alias_statement("nothere", "https://cdn/nothere.js");
        assert!(!stmt.apply(&deps, &mut ctx).unwrap());
    }
}
