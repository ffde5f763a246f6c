//! Host-facing traits and the action execution context.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::node::{Node, Target};

/* ===================== Sender ===================== */

/// The invoking context of a dispatch (a player, the console, ...).
///
/// The core never inspects the sender beyond this trait; hosts downcast
/// through [`Sender::as_any`] to reach their own type.
pub trait Sender: Send + Sync {
    fn name(&self) -> &str;

    /// Locale used for descriptions and i18n parameter labels.
    fn locale(&self) -> &str {
        "en"
    }

    fn as_any(&self) -> &dyn Any;
}

/* ===================== Frontend bridge ===================== */

/// Bridge to the host front-end. The core only ever emits symbolic
/// message keys (`error.bad-arg`, `help.header`, ...); mapping keys to
/// display text is the host's job.
pub trait Frontend: Send + Sync {
    /// Deliver a message identified by `key`, with positional arguments
    /// (usage strings, token text) for interpolation.
    fn message(&self, sender: &dyn Sender, key: &str, args: &[&str]);

    fn has_permission(&self, sender: &dyn Sender, permission: &str) -> bool;

    /// Whether `sender` is an acceptable invoking context for `target`.
    fn check_target(&self, sender: &dyn Sender, target: Target) -> bool;
}

/* ===================== ActionContext ===================== */

/// Everything an action callback can see: the sender, the variables the
/// parameter loop bound, and the locale.
pub struct ActionContext<'a> {
    pub(crate) sender: &'a dyn Sender,
    pub(crate) node: &'a Arc<Node>,
    pub(crate) vars: &'a HashMap<String, JsonValue>,
}

impl<'a> ActionContext<'a> {
    pub fn sender(&self) -> &dyn Sender {
        self.sender
    }

    pub fn locale(&self) -> &str {
        self.sender.locale()
    }

    /// The node being executed (usage string, descriptions).
    pub fn node(&self) -> &Node {
        self.node
    }

    /// Bound variable by parameter name.
    pub fn var(&self, name: &str) -> Option<&JsonValue> {
        self.vars.get(name)
    }

    /// Bound variable, or `default` when the parameter was optional and
    /// absent.
    pub fn var_or<'v>(&'v self, name: &str, default: &'v JsonValue) -> &'v JsonValue {
        self.vars.get(name).unwrap_or(default)
    }

    pub fn str_var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(JsonValue::as_str)
    }

    pub fn int_var(&self, name: &str) -> Option<i64> {
        self.vars.get(name).and_then(JsonValue::as_i64)
    }

    pub fn f64_var(&self, name: &str) -> Option<f64> {
        self.vars.get(name).and_then(JsonValue::as_f64)
    }
}
