//! Suspended dispatch state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::node::Node;

/// A dispatch frozen at the parameter whose resolver requested an
/// external confirmation.
///
/// The dispatcher constructs this at exactly the point of the
/// confirmation signal and returns it instead of succeeding or failing;
/// it performs no waiting and keeps no reference to the value afterwards.
/// The caller owns the suspend until it either feeds a confirmed value
/// back through [`crate::CommandRegistry::resume`] or drops it
/// (abandonment *is* cancellation; there is no pending-suspension table
/// to clean up).
///
/// `ttl` is informational. The core holds no clock: a caller resuming
/// after the ttl has elapsed must treat the suspend as expired and fail
/// it instead of resuming with stale state.
#[derive(Debug, Clone)]
pub struct Suspend {
    /// Identifier of the confirmation mechanism the host should use.
    pub kind: String,
    /// Symbolic key of the prompt to present to the sender.
    pub prompt_key: String,
    /// How long the confirmation stays valid, enforced by the caller.
    pub ttl: Duration,
    /// The node whose parameter loop was interrupted.
    pub node: Arc<Node>,
    /// Index of the next unparsed parameter. The confirmed value binds
    /// the parameter at `next_index - 1`.
    pub next_index: usize,
    /// Snapshot of the variables bound before the interruption. Always a
    /// defensive copy: two in-flight suspends never alias state.
    pub vars: HashMap<String, JsonValue>,
    /// Raw tokens not yet consumed. The token that triggered the
    /// confirmation is discarded, not included.
    pub remaining: Vec<String>,
}
