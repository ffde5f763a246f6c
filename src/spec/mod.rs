//! Parser for the command specification DSL.
//!
//! A specification is a single line of literal words and bracketed
//! parameters, e.g.
//!
//! ```text
//! region flag <name:string@Flag name> [value:int{0..10}] `force`
//! ```
//!
//! Tokenization is handled by a pest grammar (`command.pest`);
//! classification and parameter parsing happen here. The first unescaped
//! bracketed token switches the spec permanently into parameter phase:
//! plain words before it are literals, plain words after it are rejected,
//! and backtick-escaped tokens are literals in either phase.

use pest::Parser;
use pest_derive::Parser;

use crate::error::SpecError;
use crate::node::{Param, TypeSpec};


#[derive(Parser)]
#[grammar = "spec/command.pest"]
struct SpecParser;

impl From<pest::error::Error<Rule>> for SpecError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        SpecError::Malformed(err.to_string())
    }
}

/// Parsed form of a specification string: the literal path plus the
/// ordered parameter list. Action binding and locale maps are layered on
/// top by the registration builder.
#[derive(Debug, Clone)]
pub struct ParsedSpec {
    pub literals: Vec<String>,
    pub params: Vec<Param>,
}

/// Parse one specification string.
pub fn parse_spec(source: &str) -> Result<ParsedSpec, SpecError> {
    let mut pairs = SpecParser::parse(Rule::spec, source)?;
    let spec = pairs.next().expect("grammar yields one spec pair");

    let mut literals: Vec<String> = Vec::new();
    let mut params: Vec<Param> = Vec::new();
    let mut param_phase = false;

    for token in spec.into_inner() {
        if token.as_rule() == Rule::EOI {
            continue;
        }
        let inner = token
            .into_inner()
            .next()
            .expect("token pair wraps one alternative");
        let text = inner.as_str();

        match inner.as_rule() {
            Rule::escaped => {
                // Always a literal, in either phase.
                literals.push(text[1..text.len() - 1].to_string());
            }
            Rule::word => {
                if param_phase {
                    return Err(SpecError::LiteralAfterParam(text.to_string()));
                }
                literals.push(text.to_string());
            }
            Rule::required => {
                param_phase = true;
                params.push(parse_param(&text[1..text.len() - 1], false)?);
            }
            Rule::optional => {
                param_phase = true;
                params.push(parse_param(&text[1..text.len() - 1], true)?);
            }
            rule => unreachable!("unexpected token rule {:?}", rule),
        }
    }

    if literals.is_empty() {
        return Err(SpecError::NoRootLiteral);
    }

    Ok(ParsedSpec { literals, params })
}

/* ===================== Parameter bodies ===================== */

/// Parse a parameter body (the text between the brackets).
///
/// Layout: `name[:type][@descriptor]`. The descriptor `i18n`
/// (case-insensitive) marks the display label as externally resolved and
/// carries no inline description.
fn parse_param(body: &str, optional: bool) -> Result<Param, SpecError> {
    let (declaration, descriptor) = match body.split_once('@') {
        Some((d, desc)) => (d, Some(desc)),
        None => (body, None),
    };

    let (name, type_text) = match declaration.split_once(':') {
        Some((n, t)) => (n.trim(), Some(t.trim())),
        None => (declaration.trim(), None),
    };
    if name.is_empty() {
        return Err(SpecError::EmptyParamName(body.to_string()));
    }

    let i18n_label = descriptor.is_some_and(|d| d.eq_ignore_ascii_case("i18n"));
    let description = match descriptor {
        Some(d) if !i18n_label && !d.is_empty() => Some(d.to_string()),
        _ => None,
    };

    let type_spec = match type_text {
        Some(t) if !t.is_empty() => parse_type(t)?,
        // No declared type: unconstrained string.
        _ => TypeSpec::string(),
    };

    Ok(Param {
        name: name.to_string(),
        optional,
        default: None,
        description,
        i18n_label,
        types: vec![type_spec],
    })
}

/// Parse the type text after `:`.
///
/// Forms: a bare id (`int`), or an id with a braced body (`enum{A|B}`,
/// `string{[a-z]+}`). For `int`/`double`, a `lo..hi` body populates
/// `min`/`max` metadata (either bound may be omitted); any other body is
/// stored under `body` for the resolver to interpret.
///
/// A union of several types per parameter is supported by the data model
/// but not by this syntax; unions are declared through the registration
/// builder instead.
fn parse_type(text: &str) -> Result<TypeSpec, SpecError> {
    let Some(brace) = text.find('{') else {
        return Ok(TypeSpec::new(text));
    };
    if !text.ends_with('}') {
        return Err(SpecError::Malformed(format!(
            "unterminated type body in `{text}`"
        )));
    }

    let id = &text[..brace];
    let body = &text[brace + 1..text.len() - 1];
    if id.is_empty() {
        return Err(SpecError::Malformed(format!("type body without id: `{text}`")));
    }

    let mut spec = TypeSpec::new(id);
    if matches!(id, "int" | "double") {
        if let Some((lo, hi)) = body.split_once("..") {
            if !lo.is_empty() {
                spec = spec.with("min", lo);
            }
            if !hi.is_empty() {
                spec = spec.with("max", hi);
            }
            return Ok(spec);
        }
    }
    Ok(spec.with("body", body))
}
