//! Data model for registered commands.
//!
//! A [`Node`] is one registered command definition: its literal path, its
//! ordered parameters, and the action bound to it. Nodes are built once
//! at registration time and never mutated afterwards; the registry hands
//! them out as `Arc<Node>` so a suspended dispatch can keep a reference
//! without cloning the whole definition.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dispatch::ActionContext;

/* ===================== Target ===================== */

/// What kind of invoking context a node's action may run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Only an in-world player context.
    Player,
    /// Only the console context.
    Console,
    /// Any invoking context.
    #[default]
    All,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Player => "player",
            Target::Console => "console",
            Target::All => "all",
        }
    }
}

/* ===================== TypeSpec ===================== */

/// One concrete type alternative for a parameter.
///
/// The metadata map carries constraint strings the resolver for this type
/// understands: `body` (enum options or regex), `min`/`max` (numeric
/// range).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub type_id: String,
    pub meta: HashMap<String, String>,
}

impl TypeSpec {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            meta: HashMap::new(),
        }
    }

    /// Add one metadata entry (builder style).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Unconstrained string (accepts any token).
    pub fn string() -> Self {
        Self::new("string")
    }

    /// String constrained by a regex body.
    pub fn pattern(body: impl Into<String>) -> Self {
        Self::new("string").with("body", body)
    }

    /// Enum over a `|`-separated option list.
    pub fn options(body: impl Into<String>) -> Self {
        Self::new("enum").with("body", body)
    }

    pub fn int() -> Self {
        Self::new("int")
    }

    pub fn double() -> Self {
        Self::new("double")
    }

    /// Inclusive lower bound for `int`/`double`.
    pub fn min(self, min: impl ToString) -> Self {
        self.with("min", min.to_string())
    }

    /// Inclusive upper bound for `int`/`double`.
    pub fn max(self, max: impl ToString) -> Self {
        self.with("max", max.to_string())
    }
}

/* ===================== Param ===================== */

/// One positional argument slot of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Declared with `[...]` instead of `<...>`.
    pub optional: bool,
    /// Default value in string form, substituted when an optional
    /// parameter has no token left to consume.
    pub default: Option<String>,
    /// Inline description from the `@descriptor` part of the spec.
    pub description: Option<String>,
    /// The display label must be resolved externally by locale.
    pub i18n_label: bool,
    /// Type alternatives, tried in declared order; the first that parses
    /// wins. Never empty.
    pub types: Vec<TypeSpec>,
}

impl Param {
    /// Whether a trailing occurrence of this parameter greedily consumes
    /// all remaining tokens as one space-joined value.
    pub fn is_string_like(&self) -> bool {
        self.types
            .iter()
            .any(|t| t.type_id == "string" || t.type_id == "regex")
    }
}

/* ===================== Exec ===================== */

/// Action callback signature. Runs behind the dispatcher's internal-error
/// boundary; a returned error is reported, never propagated.
pub type Action = dyn Fn(&ActionContext<'_>) -> anyhow::Result<()> + Send + Sync;

/// The action binding of a node.
pub struct Exec {
    pub action: Arc<Action>,
    pub permission: Option<String>,
    pub target: Target,
}

impl fmt::Debug for Exec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exec")
            .field("permission", &self.permission)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/* ===================== Node ===================== */

/// One registered command definition.
#[derive(Debug)]
pub struct Node {
    /// Literal words of the command path. Never empty; the first literal
    /// is the command root.
    pub literals: Vec<String>,
    pub params: Vec<Param>,
    pub exec: Exec,
    /// Usage string derived at registration, stable across calls.
    pub usage: String,
    /// Locale -> description text.
    pub descriptions: HashMap<String, String>,
    /// Locale -> (param name -> display label), consumed for params
    /// carrying the i18n flag.
    pub param_labels: HashMap<String, HashMap<String, String>>,
}

impl Node {
    /// The command root word.
    pub fn root(&self) -> &str {
        &self.literals[0]
    }

    /// Description for a locale, falling back to `en`, then to any
    /// registered locale.
    pub fn description_for(&self, locale: &str) -> Option<&str> {
        self.descriptions
            .get(locale)
            .or_else(|| self.descriptions.get("en"))
            .or_else(|| self.descriptions.values().next())
            .map(String::as_str)
    }

    /// Usage string with i18n-tagged parameter names replaced by the
    /// labels registered for `locale`.
    pub fn usage_for(&self, locale: &str) -> String {
        let labels = self.param_labels.get(locale);
        render_usage(&self.literals, &self.params, |p| {
            if p.i18n_label {
                labels
                    .and_then(|m| m.get(&p.name))
                    .map(String::as_str)
                    .unwrap_or(&p.name)
            } else {
                &p.name
            }
        })
    }
}

/// Render a usage string: literals joined, `<name>` for required
/// parameters, `[name]` for optional ones.
pub fn render_usage<'a>(
    literals: &'a [String],
    params: &'a [Param],
    label: impl Fn(&'a Param) -> &'a str,
) -> String {
    let mut out = literals.join(" ");
    for param in params {
        let (open, close) = if param.optional { ('[', ']') } else { ('<', '>') };
        out.push(' ');
        out.push(open);
        out.push_str(label(param));
        out.push(close);
    }
    out
}
