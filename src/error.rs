//! Error taxonomy for the dispatch core.
//!
//! Three layers, matching where each failure can occur:
//! - `SpecError`: malformed specification string, raised at registration
//!   time and fatal to that one registration only
//! - `ArgError`: a single token failed to resolve; always local to the
//!   candidate node being tried
//! - `DispatchError`: the final outcome of a dispatch after every
//!   candidate has been exhausted
//!
//! Suspension is deliberately *not* part of this taxonomy: callers must
//! distinguish success, failure, and suspension as three outcomes, so
//! "needs confirmation" lives in [`crate::resolve::Resolution`] instead.

use thiserror::Error;

use crate::node::Target;

/// Structural error in a command specification string.
///
/// Raised while registering a node. The registry is left untouched, so a
/// bad registration can never corrupt previously-registered nodes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    /// The pest grammar rejected the spec string (mismatched or dangling
    /// brackets, unterminated backtick escape, empty input).
    #[error("malformed command spec: {0}")]
    Malformed(String),

    /// A parameter token had no name before its `:` or `@`.
    #[error("parameter has no name: `{0}`")]
    EmptyParamName(String),

    /// A bare literal word appeared after the first parameter. Escape it
    /// with backticks to make it a literal.
    #[error("unescaped literal `{0}` after a parameter")]
    LiteralAfterParam(String),

    /// The spec declared no literals at all.
    #[error("command spec has no root literal")]
    NoRootLiteral,

    /// The builder was registered without an action callback.
    #[error("command `{0}` has no action bound")]
    NoAction(String),

    /// A builder override referenced a parameter the spec never declared.
    #[error("unknown parameter `{0}` in builder override")]
    UnknownParam(String),
}

/// Failure to resolve one token against one parameter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArgError {
    /// No registered resolver supports the requested type id.
    #[error("no resolver for type `{0}`")]
    NoResolver(String),

    /// Token is not one of the declared enum options.
    #[error("`{token}` is not one of: {options}")]
    EnumNotFound { token: String, options: String },

    /// Numeric token parsed but fell outside the inclusive min/max range,
    /// or did not parse as a number at all.
    #[error("`{token}` is not a valid number in range")]
    Range { token: String },

    /// Token did not match the parameter's regex constraint.
    #[error("`{token}` does not match the expected pattern")]
    PatternMismatch { token: String },

    /// A required parameter had no token left to consume.
    #[error("missing required parameter `{0}`")]
    MissingRequired(String),

    /// Tokens were left over after the last parameter was bound.
    #[error("too many arguments")]
    TooManyArguments,

    /// Domain-specific failure from an externally supplied resolver.
    #[error("{0}")]
    Domain(String),
}

impl ArgError {
    /// Symbolic message key for the front-end lookup collaborator.
    pub fn message_key(&self) -> &'static str {
        match self {
            ArgError::NoResolver(_) => "error.no-resolver",
            ArgError::EnumNotFound { .. } => "error.enum.notfound",
            ArgError::Range { .. } => "error.range",
            ArgError::PatternMismatch { .. } => "error.pattern",
            ArgError::MissingRequired(_) => "error.missing-param",
            ArgError::TooManyArguments => "error.too-many-args",
            ArgError::Domain(_) => "error.domain",
        }
    }
}

/// Final outcome of a failed dispatch, reported only after every
/// candidate node has been tried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// No registered node matched the label and literal path.
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    /// A node matched but the sender lacks its permission.
    #[error("missing permission `{0}`")]
    PermissionDenied(String),

    /// A node matched but the sender is the wrong kind of invoking
    /// context for it.
    #[error("command not available to this sender (requires {0:?})")]
    TargetDenied(Target),

    /// Every matching node rejected the arguments. Carries the rendered
    /// usage of the best-attempted node for the error report.
    #[error("bad argument: {source} (usage: {usage})")]
    BadArgument {
        usage: String,
        #[source]
        source: ArgError,
    },

    /// An action callback returned an error. Caught at the outermost
    /// execution boundary; never propagates past the dispatcher.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Symbolic message key for the front-end lookup collaborator.
    pub fn message_key(&self) -> &'static str {
        match self {
            DispatchError::UnknownCommand(_) => "error.unknown-command",
            DispatchError::PermissionDenied(_) => "error.no-perm",
            DispatchError::TargetDenied(_) => "error.bad-target",
            DispatchError::BadArgument { .. } => "error.bad-arg",
            DispatchError::Internal(_) => "error.internal",
        }
    }
}
