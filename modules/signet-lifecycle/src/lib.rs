//! Entity lifecycle event dispatcher, the reactive backbone of the identity
//! platform.
//!
//! Storage-layer mutations and successful logins flow through one
//! [`LifecycleDispatcher`], which runs registered reaction rules in
//! registration order. Pre-write rules guard storage invariants and abort the
//! write on failure; post-write, post-delete, and login rules are best-effort
//! side effects whose failures are logged and contained.

pub mod context;
pub mod dispatcher;
pub mod memory;
pub mod policy;
pub mod rules;
pub mod traits;

pub use context::RuleDeps;
pub use dispatcher::{CapabilityKind, EntityFilter, LifecycleDispatcher};
pub use memory::{MemoryGroupDirectory, MemorySessionStore};
pub use rules::register_core_rules;
pub use traits::{
    GroupDirectory, LoginFailedRule, LoginRule, PasswordChangedRule, PostDeleteRule,
    PostWriteRule, PreWriteRule, RuleError, SessionStore,
};
