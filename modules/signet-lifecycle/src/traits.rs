//! Rule traits and the storage boundary the rules consume.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use signet_model::{AuthenticatedSession, Entity, Group, RequestContext, SessionKey, User};

use crate::context::RuleDeps;

/// Classified rule failure. The dispatcher owns all catch-and-log handling;
/// rules never log their own failures.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A storage invariant would be violated. Fatal to the triggering write.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// A best-effort side effect failed. The triggering operation proceeds.
    #[error(transparent)]
    SideEffect(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Rule traits, one per event kind
// ---------------------------------------------------------------------------

/// Runs inside the transactional scope of the write it guards; may mutate the
/// in-flight entity. Failure aborts the write.
#[async_trait]
pub trait PreWriteRule: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, entity: &mut dyn Entity) -> Result<(), RuleError>;
}

/// Runs after a mutation is durable. `created` distinguishes insert from
/// update. Failures are isolated per rule.
#[async_trait]
pub trait PostWriteRule: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(
        &self,
        entity: &dyn Entity,
        created: bool,
        deps: &RuleDeps,
    ) -> Result<(), RuleError>;
}

/// Runs after an entity is durably removed. Failures are isolated per rule.
#[async_trait]
pub trait PostDeleteRule: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, entity: &dyn Entity, deps: &RuleDeps) -> Result<(), RuleError>;
}

/// Runs after an authentication flow completes successfully. Failures are
/// isolated per rule and never affect the login itself.
#[async_trait]
pub trait LoginRule: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(
        &self,
        user: &User,
        request: &RequestContext,
        deps: &RuleDeps,
    ) -> Result<(), RuleError>;
}

/// Extension point: a user's password was changed. No core rules register
/// here.
#[async_trait]
pub trait PasswordChangedRule: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, user: &User, deps: &RuleDeps) -> Result<(), RuleError>;
}

/// Extension point: an authentication attempt failed. No core rules register
/// here.
#[async_trait]
pub trait LoginFailedRule: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(
        &self,
        username: &str,
        request: &RequestContext,
        deps: &RuleDeps,
    ) -> Result<(), RuleError>;
}

// ---------------------------------------------------------------------------
// Storage boundary consumed by rules
// ---------------------------------------------------------------------------

/// Group lookup and membership writes.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Group>>;

    async fn is_member(&self, user_id: Uuid, group_id: Uuid) -> Result<bool>;

    /// Add a membership. Atomic with respect to a concurrent identical add;
    /// adding an existing membership is a no-op, never a duplicate.
    async fn add_member(&self, user_id: Uuid, group_id: Uuid) -> Result<()>;
}

/// Session persistence consumed by the login and cascade rules.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist an authenticated session. Implementations run the pre-write
    /// phase first, so expiry defaults hold on this path too.
    async fn save_authenticated(&self, session: &mut AuthenticatedSession) -> Result<()>;

    /// Delete the storage-layer session with this key. Returns the number of
    /// sessions removed.
    async fn delete_session(&self, key: &SessionKey) -> Result<u64>;
}
