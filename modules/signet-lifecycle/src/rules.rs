//! The core reaction rules and their registration order.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use signet_cache::{invalidate_prefix, APP_LISTING_PREFIX};
use signet_model::{
    default_expiry, AuthenticatedSession, Entity, EntityKind, RequestContext, User, DEVICE_COOKIE,
};
use signet_realtime::{device_group, ChannelMessage};

use crate::context::RuleDeps;
use crate::dispatcher::{CapabilityKind, EntityFilter, LifecycleDispatcher};
use crate::policy::resolve_partner_group;
use crate::traits::{LoginRule, PostDeleteRule, PostWriteRule, PreWriteRule, RuleError};

/// Register the core rules in their canonical order. Order is load-bearing:
/// dispatch runs rules in registration order.
pub fn register_core_rules(dispatcher: &mut LifecycleDispatcher) {
    dispatcher.register_post_write(
        EntityFilter::Kind(EntityKind::Application),
        Arc::new(InvalidateApplicationListings),
    );
    dispatcher.register_login(Arc::new(CreateSessionOnLogin));
    dispatcher.register_post_delete(
        EntityFilter::Kind(EntityKind::AuthenticatedSession),
        Arc::new(CascadeSessionDelete),
    );
    dispatcher.register_pre_write(
        EntityFilter::Capability(CapabilityKind::Backchannel),
        Arc::new(ForceBackchannel),
    );
    dispatcher.register_pre_write(
        EntityFilter::Capability(CapabilityKind::Expiring),
        Arc::new(DefaultExpiry),
    );
    dispatcher.register_post_write(
        EntityFilter::Kind(EntityKind::User),
        Arc::new(AssignPartnerGroup),
    );
}

// ---------------------------------------------------------------------------
// InvalidateApplicationListings
// ---------------------------------------------------------------------------

/// Creating an application drops every cached per-viewer listing so the next
/// read recomputes visibility.
pub struct InvalidateApplicationListings;

#[async_trait]
impl PostWriteRule for InvalidateApplicationListings {
    fn name(&self) -> &'static str {
        "invalidate_application_listings"
    }

    async fn apply(
        &self,
        _entity: &dyn Entity,
        created: bool,
        deps: &RuleDeps,
    ) -> Result<(), RuleError> {
        if !created {
            return Ok(());
        }
        invalidate_prefix(deps.cache.as_ref(), APP_LISTING_PREFIX)
            .await
            .context("invalidating application listing cache")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CreateSessionOnLogin
// ---------------------------------------------------------------------------

/// Record the authenticated session and, when the refresh-flows flag is on,
/// nudge other live flows on the same device.
pub struct CreateSessionOnLogin;

#[async_trait]
impl LoginRule for CreateSessionOnLogin {
    fn name(&self) -> &'static str {
        "create_session_on_login"
    }

    async fn apply(
        &self,
        user: &User,
        request: &RequestContext,
        deps: &RuleDeps,
    ) -> Result<(), RuleError> {
        if let Some(mut session) = AuthenticatedSession::from_login(user, request) {
            deps.sessions
                .save_authenticated(&mut session)
                .await
                .context("saving authenticated session")?;
        }

        if !deps.flags.refresh_flows_after_auth {
            return Ok(());
        }
        let Some(device_id) = request.cookie(DEVICE_COOKIE) else {
            return Ok(());
        };
        deps.channels
            .group_send(&device_group(device_id), ChannelMessage::SessionAuthenticated)
            .await
            .context("notifying device group")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CascadeSessionDelete
// ---------------------------------------------------------------------------

/// Deleting an authenticated session removes the storage session with the
/// matching key. One-way only: deleting a storage session directly triggers
/// nothing here.
pub struct CascadeSessionDelete;

#[async_trait]
impl PostDeleteRule for CascadeSessionDelete {
    fn name(&self) -> &'static str {
        "cascade_session_delete"
    }

    async fn apply(&self, entity: &dyn Entity, deps: &RuleDeps) -> Result<(), RuleError> {
        let Some(session) = entity.as_authenticated_session() else {
            return Ok(());
        };
        let removed = deps
            .sessions
            .delete_session(&session.session_key)
            .await
            .context("deleting storage session")?;
        debug!(session = %session.session_key, removed, "Cascaded authenticated session delete");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ForceBackchannel
// ---------------------------------------------------------------------------

/// Backchannel providers are persisted with `is_backchannel = true` no matter
/// what the caller supplied.
pub struct ForceBackchannel;

#[async_trait]
impl PreWriteRule for ForceBackchannel {
    fn name(&self) -> &'static str {
        "force_backchannel"
    }

    async fn apply(&self, entity: &mut dyn Entity) -> Result<(), RuleError> {
        if let Some(provider) = entity.as_backchannel_mut() {
            provider.set_backchannel(true);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DefaultExpiry
// ---------------------------------------------------------------------------

/// An expiring record never reaches storage without a concrete expiry.
pub struct DefaultExpiry;

#[async_trait]
impl PreWriteRule for DefaultExpiry {
    fn name(&self) -> &'static str {
        "default_expiry"
    }

    async fn apply(&self, entity: &mut dyn Entity) -> Result<(), RuleError> {
        if let Some(record) = entity.as_expiring_mut() {
            if record.is_expiring() && record.expires().is_none() {
                record.set_expires(default_expiry());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AssignPartnerGroup
// ---------------------------------------------------------------------------

/// Assign newly created users to a partner group based on their attributes.
///
/// Missing target groups and unknown tenant types are configuration gaps, not
/// failures. Re-running on an unchanged user performs no write. Any storage
/// error is a best-effort failure: user creation never fails because group
/// assignment did.
pub struct AssignPartnerGroup;

#[async_trait]
impl PostWriteRule for AssignPartnerGroup {
    fn name(&self) -> &'static str {
        "assign_partner_group"
    }

    async fn apply(
        &self,
        entity: &dyn Entity,
        created: bool,
        deps: &RuleDeps,
    ) -> Result<(), RuleError> {
        if !created {
            return Ok(());
        }
        let Some(user) = entity.as_user() else {
            return Ok(());
        };
        let Some(tenant_type) = user.attributes.get_str("tenant_type") else {
            return Ok(());
        };
        let Some(group_name) = resolve_partner_group(&user.attributes) else {
            debug!(tenant_type, "Unknown tenant_type, skipping group assignment");
            return Ok(());
        };

        let group = deps
            .groups
            .find_by_name(group_name)
            .await
            .with_context(|| format!("looking up partner group {group_name}"))?;
        let Some(group) = group else {
            warn!(
                group = group_name,
                user = %user.username,
                "Partner group not found, skipping assignment"
            );
            return Ok(());
        };

        if deps
            .groups
            .is_member(user.id, group.id)
            .await
            .context("checking partner group membership")?
        {
            debug!(user = %user.username, group = group_name, "User already in group");
            return Ok(());
        }

        deps.groups
            .add_member(user.id, group.id)
            .await
            .with_context(|| format!("adding user to partner group {group_name}"))?;

        info!(
            user = %user.username,
            group = group_name,
            tenant_type,
            is_isv = user.attributes.get_bool("isISV", false),
            "Assigned user to partner group"
        );
        Ok(())
    }
}
