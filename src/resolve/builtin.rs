//! Built-in resolvers: `enum`, `int`, `double`, `string`/`regex`.

use regex::Regex;
use serde_json::json;

use crate::error::ArgError;
use crate::resolve::{ResolveContext, Resolution, TypeResolver};

/* ===================== enum ===================== */

/// `|`-separated option list in the `body` constraint, matched
/// case-insensitively. Binds the canonical declared casing.
pub struct EnumResolver;

impl EnumResolver {
    fn options<'a>(ctx: &'a ResolveContext<'_>) -> impl Iterator<Item = &'a str> {
        ctx.constraint("body")
            .unwrap_or("")
            .split('|')
            .filter(|o| !o.is_empty())
    }
}

impl TypeResolver for EnumResolver {
    fn supports(&self, type_id: &str) -> bool {
        type_id == "enum"
    }

    fn parse(&self, ctx: &ResolveContext<'_>, token: &str) -> Resolution {
        match Self::options(ctx).find(|o| o.eq_ignore_ascii_case(token)) {
            Some(option) => Resolution::Value(json!(option)),
            None => Resolution::Fail(ArgError::EnumNotFound {
                token: token.to_string(),
                options: ctx.constraint("body").unwrap_or("").to_string(),
            }),
        }
    }

    fn complete(&self, ctx: &ResolveContext<'_>, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_lowercase();
        Self::options(ctx)
            .filter(|o| o.to_lowercase().starts_with(&prefix))
            .map(str::to_string)
            .collect()
    }
}

/* ===================== int / double ===================== */

/// Signed integer with optional inclusive `min`/`max` constraints.
pub struct IntResolver;

impl TypeResolver for IntResolver {
    fn supports(&self, type_id: &str) -> bool {
        type_id == "int"
    }

    fn parse(&self, ctx: &ResolveContext<'_>, token: &str) -> Resolution {
        let range_err = || {
            Resolution::Fail(ArgError::Range {
                token: token.to_string(),
            })
        };

        let Ok(value) = token.parse::<i64>() else {
            return range_err();
        };
        let min = ctx.constraint("min").and_then(|m| m.parse::<i64>().ok());
        let max = ctx.constraint("max").and_then(|m| m.parse::<i64>().ok());
        if min.is_some_and(|m| value < m) || max.is_some_and(|m| value > m) {
            return range_err();
        }
        Resolution::Value(json!(value))
    }
}

/// Floating-point number with optional inclusive `min`/`max` constraints.
pub struct DoubleResolver;

impl TypeResolver for DoubleResolver {
    fn supports(&self, type_id: &str) -> bool {
        type_id == "double"
    }

    fn parse(&self, ctx: &ResolveContext<'_>, token: &str) -> Resolution {
        let range_err = || {
            Resolution::Fail(ArgError::Range {
                token: token.to_string(),
            })
        };

        let Ok(value) = token.parse::<f64>() else {
            return range_err();
        };
        if !value.is_finite() {
            return range_err();
        }
        let min = ctx.constraint("min").and_then(|m| m.parse::<f64>().ok());
        let max = ctx.constraint("max").and_then(|m| m.parse::<f64>().ok());
        if min.is_some_and(|m| value < m) || max.is_some_and(|m| value > m) {
            return range_err();
        }
        Resolution::Value(json!(value))
    }
}

/* ===================== string / regex ===================== */

/// Free text, optionally constrained by a regex in the `body` constraint.
/// The pattern must match the whole token; an empty body accepts
/// anything.
pub struct StringResolver;

impl TypeResolver for StringResolver {
    fn supports(&self, type_id: &str) -> bool {
        type_id == "string" || type_id == "regex"
    }

    fn parse(&self, ctx: &ResolveContext<'_>, token: &str) -> Resolution {
        let body = ctx.constraint("body").unwrap_or("");
        if body.is_empty() {
            return Resolution::Value(json!(token));
        }
        let mismatch = || {
            Resolution::Fail(ArgError::PatternMismatch {
                token: token.to_string(),
            })
        };
        match Regex::new(&format!("^(?:{body})$")) {
            Ok(re) if re.is_match(token) => Resolution::Value(json!(token)),
            // An uncompilable body can never match anything.
            _ => mismatch(),
        }
    }
}
