//! The dispatcher: ordered rule registries and the dispatch loop.

use std::sync::Arc;

use tracing::error;

use signet_model::{Entity, EntityKind, RequestContext, User};

use crate::context::RuleDeps;
use crate::traits::{
    LoginFailedRule, LoginRule, PasswordChangedRule, PostDeleteRule, PostWriteRule, PreWriteRule,
    RuleError,
};

/// Capabilities a filter can select on. Matching is interface satisfaction:
/// an entity matches when it exposes the capability accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Expiring,
    Backchannel,
}

/// Which entities a registered rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityFilter {
    Any,
    Kind(EntityKind),
    Capability(CapabilityKind),
}

impl EntityFilter {
    pub fn matches(&self, entity: &dyn Entity) -> bool {
        match self {
            EntityFilter::Any => true,
            EntityFilter::Kind(kind) => entity.kind() == *kind,
            EntityFilter::Capability(CapabilityKind::Expiring) => entity.as_expiring().is_some(),
            EntityFilter::Capability(CapabilityKind::Backchannel) => {
                entity.as_backchannel().is_some()
            }
        }
    }
}

/// Ordered rule registries, one per event kind. Constructed once at startup:
/// register rules with `&mut self`, then share behind `Arc` and dispatch with
/// `&self`. Rules for one dispatch run sequentially on the calling task, in
/// registration order.
#[derive(Default)]
pub struct LifecycleDispatcher {
    pre_write: Vec<(EntityFilter, Arc<dyn PreWriteRule>)>,
    post_write: Vec<(EntityFilter, Arc<dyn PostWriteRule>)>,
    post_delete: Vec<(EntityFilter, Arc<dyn PostDeleteRule>)>,
    login: Vec<Arc<dyn LoginRule>>,
    password_changed: Vec<Arc<dyn PasswordChangedRule>>,
    login_failed: Vec<Arc<dyn LoginFailedRule>>,
}

impl LifecycleDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    // -- registration ------------------------------------------------------

    pub fn register_pre_write(&mut self, filter: EntityFilter, rule: Arc<dyn PreWriteRule>) {
        self.pre_write.push((filter, rule));
    }

    pub fn register_post_write(&mut self, filter: EntityFilter, rule: Arc<dyn PostWriteRule>) {
        self.post_write.push((filter, rule));
    }

    pub fn register_post_delete(&mut self, filter: EntityFilter, rule: Arc<dyn PostDeleteRule>) {
        self.post_delete.push((filter, rule));
    }

    pub fn register_login(&mut self, rule: Arc<dyn LoginRule>) {
        self.login.push(rule);
    }

    pub fn register_password_changed(&mut self, rule: Arc<dyn PasswordChangedRule>) {
        self.password_changed.push(rule);
    }

    pub fn register_login_failed(&mut self, rule: Arc<dyn LoginFailedRule>) {
        self.login_failed.push(rule);
    }

    // -- dispatch ----------------------------------------------------------

    /// Run pre-write rules against an in-flight entity. The first failure
    /// aborts: the caller must not persist the entity.
    pub async fn pre_write(&self, entity: &mut dyn Entity) -> Result<(), RuleError> {
        for (filter, rule) in &self.pre_write {
            if !filter.matches(&*entity) {
                continue;
            }
            if let Err(e) = rule.apply(&mut *entity).await {
                error!(
                    rule = rule.name(),
                    entity = %entity.entity_id(),
                    kind = %entity.kind(),
                    error = %e,
                    "Pre-write rule failed, aborting write"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Run post-write rules after a durable mutation. Each failure is logged
    /// and swallowed; the remaining rules still run.
    pub async fn post_write(&self, entity: &dyn Entity, created: bool, deps: &RuleDeps) {
        for (filter, rule) in &self.post_write {
            if !filter.matches(entity) {
                continue;
            }
            if let Err(e) = rule.apply(entity, created, deps).await {
                error!(
                    rule = rule.name(),
                    entity = %entity.entity_id(),
                    kind = %entity.kind(),
                    error = %e,
                    "Post-write rule failed"
                );
            }
        }
    }

    /// Run post-delete rules after a durable removal. Same isolation as
    /// post-write.
    pub async fn post_delete(&self, entity: &dyn Entity, deps: &RuleDeps) {
        for (filter, rule) in &self.post_delete {
            if !filter.matches(entity) {
                continue;
            }
            if let Err(e) = rule.apply(entity, deps).await {
                error!(
                    rule = rule.name(),
                    entity = %entity.entity_id(),
                    kind = %entity.kind(),
                    error = %e,
                    "Post-delete rule failed"
                );
            }
        }
    }

    /// Run login rules after a successful authentication. A rule failure
    /// never affects the login or the other rules.
    pub async fn login_succeeded(&self, user: &User, request: &RequestContext, deps: &RuleDeps) {
        for rule in &self.login {
            if let Err(e) = rule.apply(user, request, deps).await {
                error!(
                    rule = rule.name(),
                    user = %user.username,
                    error = %e,
                    "Login rule failed"
                );
            }
        }
    }

    /// Extension point dispatch; empty unless consumers register rules.
    pub async fn password_changed(&self, user: &User, deps: &RuleDeps) {
        for rule in &self.password_changed {
            if let Err(e) = rule.apply(user, deps).await {
                error!(
                    rule = rule.name(),
                    user = %user.username,
                    error = %e,
                    "Password-changed rule failed"
                );
            }
        }
    }

    /// Extension point dispatch; empty unless consumers register rules.
    pub async fn login_failed(&self, username: &str, request: &RequestContext, deps: &RuleDeps) {
        for rule in &self.login_failed {
            if let Err(e) = rule.apply(username, request, deps).await {
                error!(
                    rule = rule.name(),
                    username,
                    error = %e,
                    "Login-failed rule failed"
                );
            }
        }
    }
}
