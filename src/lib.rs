pub mod dispatch;
pub mod error;
pub mod node;
pub mod resolve;
pub mod spec;
pub mod suspend;

// Re-export main types
pub use dispatch::{command, ActionContext, CommandRegistry, Dispatch, Frontend, Sender};
pub use error::{ArgError, DispatchError, SpecError};
pub use node::{Node, Param, Target, TypeSpec};
pub use resolve::{Confirmation, ResolveContext, Resolution, TypeResolver};
pub use suspend::Suspend;
