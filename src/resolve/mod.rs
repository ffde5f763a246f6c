//! Type resolvers and the argument engine.
//!
//! A resolver turns one raw token into a typed value for the type ids it
//! supports, and offers completion candidates. Resolution of one token
//! has three outcomes, not two:
//!
//! 1. **Value**: the token parsed
//! 2. **Fail**: the token did not parse (local to the candidate node)
//! 3. **NeedConfirmation**: the value depends on an asynchronous external
//!    confirmation; the dispatcher turns this into a [`crate::Suspend`]
//!
//! Resolver order is priority order: externally registered resolvers are
//! consulted before the built-ins, and the first resolver that reports
//! support for a type id is used with no further fallback.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::dispatch::Sender;
use crate::error::ArgError;
use crate::node::TypeSpec;

pub mod builtin;

/* ===================== Resolution ===================== */

/// Request for an external confirmation before a value can be produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    /// Identifier of the confirmation mechanism the host should use.
    pub kind: String,
    /// Symbolic key of the prompt to present.
    pub prompt_key: String,
    /// How long the confirmation should stay valid. Informational: the
    /// core holds no clock, enforcement is the caller's responsibility.
    pub ttl: Duration,
}

/// Outcome of resolving one token against one type alternative.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Value(JsonValue),
    Fail(ArgError),
    NeedConfirmation(Confirmation),
}

/* ===================== Context ===================== */

/// Read-only view a resolver gets while parsing or completing.
pub struct ResolveContext<'a> {
    /// Variables already bound earlier in the parameter loop.
    pub vars: &'a HashMap<String, JsonValue>,
    /// Constraint metadata of the type alternative being tried.
    pub meta: &'a HashMap<String, String>,
    /// Opaque host-platform handle supplied at registry construction.
    pub host: &'a (dyn Any + Send + Sync),
    /// The invoking sender.
    pub sender: &'a dyn Sender,
}

impl<'a> ResolveContext<'a> {
    /// Constraint string by key (`body`, `min`, `max`, ...).
    pub fn constraint(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }
}

/* ===================== Resolver contract ===================== */

/// A pluggable token parser for one or more type ids.
pub trait TypeResolver: Send + Sync {
    /// Whether this resolver handles the given type id.
    fn supports(&self, type_id: &str) -> bool;

    /// Parse one token into a value, fail, or request confirmation.
    fn parse(&self, ctx: &ResolveContext<'_>, token: &str) -> Resolution;

    /// Completion candidates for a partial token. Default: none.
    fn complete(&self, _ctx: &ResolveContext<'_>, _prefix: &str) -> Vec<String> {
        Vec::new()
    }
}

/* ===================== Engine ===================== */

/// Ordered resolver list: external resolvers first (in registration
/// order), then the built-ins. Append-only during the registration
/// phase, read-only during dispatch.
pub struct ResolverRegistry {
    external: Vec<Arc<dyn TypeResolver>>,
    builtin: Vec<Arc<dyn TypeResolver>>,
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self {
            external: Vec::new(),
            builtin: vec![
                Arc::new(builtin::EnumResolver),
                Arc::new(builtin::IntResolver),
                Arc::new(builtin::DoubleResolver),
                Arc::new(builtin::StringResolver),
            ],
        }
    }

    /// Register an external resolver. Consulted before the built-ins and
    /// before any resolver registered after it.
    pub fn register(&mut self, resolver: Arc<dyn TypeResolver>) {
        self.external.push(resolver);
    }

    fn find(&self, type_id: &str) -> Option<&Arc<dyn TypeResolver>> {
        self.external
            .iter()
            .chain(self.builtin.iter())
            .find(|r| r.supports(type_id))
    }

    /// Resolve one token against one type alternative.
    pub fn parse_one(
        &self,
        ctx: &ResolveContext<'_>,
        spec: &TypeSpec,
        token: &str,
    ) -> Resolution {
        match self.find(&spec.type_id) {
            Some(resolver) => resolver.parse(ctx, token),
            None => Resolution::Fail(ArgError::NoResolver(spec.type_id.clone())),
        }
    }

    /// Completion candidates for one type alternative. Unsupported type
    /// ids yield an empty list rather than an error.
    pub fn complete_one(
        &self,
        ctx: &ResolveContext<'_>,
        spec: &TypeSpec,
        prefix: &str,
    ) -> Vec<String> {
        match self.find(&spec.type_id) {
            Some(resolver) => resolver.complete(ctx, prefix),
            None => Vec::new(),
        }
    }
}
