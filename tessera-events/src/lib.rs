//! Event primitives for Tessera.
//!
//! This crate holds the plumbing the entity model is built on, with no
//! knowledge of entities or properties:
//! - [`EventChannel`]: publish/subscribe with once-only and filtered handlers
//! - [`Signal`]: countdown gate that sequences dependent loading steps
//! - [`ScopeContext`] / [`Scope`]: nested transaction scopes that batch
//!   deferred work and bound cascades
//!
//! Everything here is single-threaded (`Rc`/`RefCell`). "Asynchronous" means
//! deferred until a scope exits or a signal settles, never another thread.

mod channel;
mod scope;
mod signal;

pub use channel::{EventChannel, HandlerId};
pub use scope::{DEFAULT_MAX_NESTING, NestingExceeded, Scope, ScopeContext};
pub use signal::{PendingCallback, Signal};
