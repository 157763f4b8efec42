//! Core-rule behavior against the in-memory storage boundary, covering the
//! observable properties of each registered rule.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;

use signet_cache::{app_listing_key, KeyValueCache, MemoryCache};
use signet_lifecycle::policy::{GROUP_ISVS, GROUP_MERCHANTS, GROUP_PAYMENT_INSTITUTIONS};
use signet_lifecycle::{
    register_core_rules, GroupDirectory, LifecycleDispatcher, MemoryGroupDirectory,
    MemorySessionStore, RuleDeps, SessionStore,
};
use signet_model::{
    Application, Attributes, AuthenticatedSession, FeatureFlags, Group, Provider, RequestContext,
    Session, SessionKey, User, DEVICE_COOKIE,
};
use signet_realtime::{device_group, ChannelLayer, ChannelMessage, InProcessChannelLayer};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Harness: dispatcher with core rules + memory collaborators
// ---------------------------------------------------------------------------

struct Harness {
    dispatcher: Arc<LifecycleDispatcher>,
    cache: Arc<MemoryCache>,
    groups: Arc<MemoryGroupDirectory>,
    sessions: Arc<MemorySessionStore>,
    channels: Arc<InProcessChannelLayer>,
    deps: RuleDeps,
}

fn harness(flags: FeatureFlags) -> Harness {
    let mut dispatcher = LifecycleDispatcher::new();
    register_core_rules(&mut dispatcher);
    let dispatcher = Arc::new(dispatcher);

    let cache = Arc::new(MemoryCache::new());
    let groups = Arc::new(MemoryGroupDirectory::new());
    let sessions = Arc::new(MemorySessionStore::new(Arc::clone(&dispatcher)));
    let channels = Arc::new(InProcessChannelLayer::new());

    let deps = RuleDeps {
        cache: Arc::clone(&cache) as Arc<dyn KeyValueCache>,
        groups: Arc::clone(&groups) as Arc<dyn GroupDirectory>,
        sessions: Arc::clone(&sessions) as Arc<dyn SessionStore>,
        channels: Arc::clone(&channels) as Arc<dyn ChannelLayer>,
        flags,
    };

    Harness {
        dispatcher,
        cache,
        groups,
        sessions,
        channels,
        deps,
    }
}

fn user_with(attributes: serde_json::Value) -> User {
    User::new("alice").with_attributes(Attributes::from_value(attributes))
}

// =========================================================================
// Pre-write invariants
// =========================================================================

#[tokio::test]
async fn backchannel_provider_is_always_persisted_true() {
    let h = harness(FeatureFlags::default());

    let mut provider = Provider::new("directory-sync");
    provider.is_backchannel = false;
    h.dispatcher.pre_write(&mut provider).await.unwrap();
    assert!(provider.is_backchannel);

    // Explicit true stays true.
    h.dispatcher.pre_write(&mut provider).await.unwrap();
    assert!(provider.is_backchannel);
}

#[tokio::test]
async fn expiring_session_gets_default_expiry() {
    let h = harness(FeatureFlags::default());

    let mut session = Session::new(SessionKey::new("sess-1"));
    assert!(session.expires.is_none());
    h.dispatcher.pre_write(&mut session).await.unwrap();
    assert!(session.expires.is_some());
}

#[tokio::test]
async fn non_expiring_session_is_untouched() {
    let h = harness(FeatureFlags::default());

    let mut session = Session::new(SessionKey::new("sess-1"));
    session.expiring = false;
    h.dispatcher.pre_write(&mut session).await.unwrap();
    assert!(session.expires.is_none());
}

#[tokio::test]
async fn preset_expiry_is_preserved() {
    let h = harness(FeatureFlags::default());

    let explicit = chrono::Utc::now() + chrono::Duration::days(7);
    let mut session = Session::new(SessionKey::new("sess-1"));
    session.expires = Some(explicit);
    h.dispatcher.pre_write(&mut session).await.unwrap();
    assert_eq!(session.expires, Some(explicit));
}

// =========================================================================
// Application listing invalidation
// =========================================================================

#[tokio::test]
async fn application_create_drops_every_cached_listing() {
    let h = harness(FeatureFlags::default());
    h.cache
        .set(&app_listing_key("alice"), json!(["grafana"]))
        .await
        .unwrap();
    h.cache
        .set(&app_listing_key("bob"), json!(["wiki"]))
        .await
        .unwrap();
    h.cache.set("core/unrelated", json!(1)).await.unwrap();

    let app = Application::new("Grafana", "grafana");
    h.dispatcher.post_write(&app, true, &h.deps).await;

    assert!(h.cache.get(&app_listing_key("alice")).await.unwrap().is_none());
    assert!(h.cache.get(&app_listing_key("bob")).await.unwrap().is_none());
    assert!(h.cache.get("core/unrelated").await.unwrap().is_some());
}

#[tokio::test]
async fn application_update_keeps_cached_listings() {
    let h = harness(FeatureFlags::default());
    h.cache
        .set(&app_listing_key("alice"), json!(["grafana"]))
        .await
        .unwrap();

    let app = Application::new("Grafana", "grafana");
    h.dispatcher.post_write(&app, false, &h.deps).await;

    assert!(h.cache.get(&app_listing_key("alice")).await.unwrap().is_some());
}

// =========================================================================
// Session cascade
// =========================================================================

#[tokio::test]
async fn deleting_authenticated_session_deletes_matching_session() {
    let h = harness(FeatureFlags::default());
    let key = SessionKey::new("sess-1");
    h.sessions.insert_session(Session::new(key.clone()));
    h.sessions
        .insert_session(Session::new(SessionKey::new("sess-other")));

    let user = User::new("alice");
    let request = RequestContext::new().with_session_key(key.clone());
    let auth = AuthenticatedSession::from_login(&user, &request).unwrap();

    h.dispatcher.post_delete(&auth, &h.deps).await;

    assert!(h.sessions.session(&key).is_none());
    assert!(h.sessions.session(&SessionKey::new("sess-other")).is_some());
}

#[tokio::test]
async fn deleting_session_directly_leaves_authenticated_sessions_alone() {
    let h = harness(FeatureFlags::default());
    let key = SessionKey::new("sess-1");
    h.sessions.insert_session(Session::new(key.clone()));

    let user = User::new("alice");
    let request = RequestContext::new().with_session_key(key.clone());
    let mut auth = AuthenticatedSession::from_login(&user, &request).unwrap();
    h.sessions.save_authenticated(&mut auth).await.unwrap();

    // A direct storage-session delete dispatches post-delete for the Session
    // entity; no rule matches it.
    let session = h.sessions.session(&key).unwrap();
    h.sessions.delete_session(&key).await.unwrap();
    h.dispatcher.post_delete(&session, &h.deps).await;

    assert!(h.sessions.authenticated(&key).is_some());
}

// =========================================================================
// Partner group assignment
// =========================================================================

#[tokio::test]
async fn merchant_isv_joins_isv_group() {
    let h = harness(FeatureFlags::default());
    let group = Group::new(GROUP_ISVS);
    h.groups.insert_group(group.clone());

    let user = user_with(json!({"tenant_type": "MERCHANT", "isISV": true}));
    h.dispatcher.post_write(&user, true, &h.deps).await;

    assert_eq!(h.groups.memberships_for(user.id), vec![group.id]);
}

#[tokio::test]
async fn merchant_without_isv_flag_joins_merchant_group() {
    let h = harness(FeatureFlags::default());
    let group = Group::new(GROUP_MERCHANTS);
    h.groups.insert_group(group.clone());
    h.groups.insert_group(Group::new(GROUP_ISVS));

    let user = user_with(json!({"tenant_type": "MERCHANT"}));
    h.dispatcher.post_write(&user, true, &h.deps).await;

    assert_eq!(h.groups.memberships_for(user.id), vec![group.id]);
}

#[tokio::test]
async fn bank_joins_payment_institution_group() {
    let h = harness(FeatureFlags::default());
    let group = Group::new(GROUP_PAYMENT_INSTITUTIONS);
    h.groups.insert_group(group.clone());

    let user = user_with(json!({"tenant_type": "BANK"}));
    h.dispatcher.post_write(&user, true, &h.deps).await;

    assert_eq!(h.groups.memberships_for(user.id), vec![group.id]);
}

#[tokio::test]
async fn missing_target_group_is_a_quiet_noop() {
    let h = harness(FeatureFlags::default());

    let user = user_with(json!({"tenant_type": "BANK"}));
    h.dispatcher.post_write(&user, true, &h.deps).await;

    assert!(h.groups.memberships_for(user.id).is_empty());
}

#[tokio::test]
async fn unknown_tenant_type_assigns_nothing() {
    let h = harness(FeatureFlags::default());
    h.groups.insert_group(Group::new(GROUP_MERCHANTS));

    let user = user_with(json!({"tenant_type": "REGULATOR"}));
    h.dispatcher.post_write(&user, true, &h.deps).await;

    assert!(h.groups.memberships_for(user.id).is_empty());
}

#[tokio::test]
async fn user_without_attributes_assigns_nothing() {
    let h = harness(FeatureFlags::default());
    h.groups.insert_group(Group::new(GROUP_MERCHANTS));

    let user = User::new("alice");
    h.dispatcher.post_write(&user, true, &h.deps).await;

    assert!(h.groups.memberships_for(user.id).is_empty());
}

#[tokio::test]
async fn group_assignment_is_idempotent() {
    let h = harness(FeatureFlags::default());
    let group = Group::new(GROUP_ISVS);
    h.groups.insert_group(group.clone());

    let user = user_with(json!({"tenant_type": "MERCHANT", "isISV": true}));
    h.dispatcher.post_write(&user, true, &h.deps).await;
    h.dispatcher.post_write(&user, true, &h.deps).await;

    assert_eq!(h.groups.memberships_for(user.id), vec![group.id]);
}

#[tokio::test]
async fn user_update_does_not_assign_groups() {
    let h = harness(FeatureFlags::default());
    h.groups.insert_group(Group::new(GROUP_MERCHANTS));

    let user = user_with(json!({"tenant_type": "MERCHANT"}));
    h.dispatcher.post_write(&user, false, &h.deps).await;

    assert!(h.groups.memberships_for(user.id).is_empty());
}

/// Directory that fails every call, standing in for a broken storage backend.
struct BrokenDirectory;

#[async_trait]
impl GroupDirectory for BrokenDirectory {
    async fn find_by_name(&self, _name: &str) -> Result<Option<Group>> {
        Err(anyhow!("directory offline"))
    }

    async fn is_member(&self, _user_id: Uuid, _group_id: Uuid) -> Result<bool> {
        Err(anyhow!("directory offline"))
    }

    async fn add_member(&self, _user_id: Uuid, _group_id: Uuid) -> Result<()> {
        Err(anyhow!("directory offline"))
    }
}

#[tokio::test]
async fn directory_failure_never_escapes_the_dispatch() {
    let h = harness(FeatureFlags::default());
    let deps = RuleDeps {
        groups: Arc::new(BrokenDirectory),
        ..h.deps.clone()
    };

    let user = user_with(json!({"tenant_type": "BANK"}));
    // Completes without panicking or propagating; the failure is logged.
    h.dispatcher.post_write(&user, true, &deps).await;
}

// =========================================================================
// Login
// =========================================================================

fn login_request(session_key: Option<&str>, device: Option<&str>) -> RequestContext {
    let mut request = RequestContext::new();
    if let Some(key) = session_key {
        request = request.with_session_key(SessionKey::new(key));
    }
    if let Some(device_id) = device {
        request = request.with_cookie(DEVICE_COOKIE, device_id);
    }
    request
}

#[tokio::test]
async fn login_creates_authenticated_session_with_expiry() {
    let h = harness(FeatureFlags::default());
    let user = User::new("alice");
    let request = login_request(Some("sess-1"), None);

    h.dispatcher.login_succeeded(&user, &request, &h.deps).await;

    let auth = h.sessions.authenticated(&SessionKey::new("sess-1")).unwrap();
    assert_eq!(auth.user_id, user.id);
    // Saved through the pre-write phase: expiry default applied.
    assert!(auth.expires.is_some());
}

#[tokio::test]
async fn login_with_device_and_flag_publishes_exactly_once() {
    let h = harness(FeatureFlags {
        refresh_flows_after_auth: true,
    });
    let mut rx = h.channels.subscribe(&device_group("dev-42"));

    let user = User::new("alice");
    let request = login_request(Some("sess-1"), Some("dev-42"));
    h.dispatcher.login_succeeded(&user, &request, &h.deps).await;

    assert_eq!(rx.try_recv().unwrap(), ChannelMessage::SessionAuthenticated);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn login_without_device_cookie_publishes_nothing() {
    let h = harness(FeatureFlags {
        refresh_flows_after_auth: true,
    });
    let mut rx = h.channels.subscribe(&device_group("dev-42"));

    let user = User::new("alice");
    let request = login_request(Some("sess-1"), None);
    h.dispatcher.login_succeeded(&user, &request, &h.deps).await;

    assert!(rx.try_recv().is_err());
    assert_eq!(h.sessions.authenticated_count(), 1);
}

#[tokio::test]
async fn login_with_flag_disabled_publishes_nothing() {
    let h = harness(FeatureFlags::default());
    let mut rx = h.channels.subscribe(&device_group("dev-42"));

    let user = User::new("alice");
    let request = login_request(Some("sess-1"), Some("dev-42"));
    h.dispatcher.login_succeeded(&user, &request, &h.deps).await;

    assert!(rx.try_recv().is_err());
    assert_eq!(h.sessions.authenticated_count(), 1);
}

#[tokio::test]
async fn login_without_session_key_still_notifies_device() {
    let h = harness(FeatureFlags {
        refresh_flows_after_auth: true,
    });
    let mut rx = h.channels.subscribe(&device_group("dev-42"));

    let user = User::new("alice");
    let request = login_request(None, Some("dev-42"));
    h.dispatcher.login_succeeded(&user, &request, &h.deps).await;

    assert_eq!(h.sessions.authenticated_count(), 0);
    assert_eq!(rx.try_recv().unwrap(), ChannelMessage::SessionAuthenticated);
}

/// Channel layer that always fails, standing in for a dead transport.
struct BrokenChannels;

#[async_trait]
impl ChannelLayer for BrokenChannels {
    async fn group_send(&self, _group: &str, _message: ChannelMessage) -> Result<()> {
        Err(anyhow!("transport down"))
    }
}

#[tokio::test]
async fn notification_failure_never_blocks_session_creation() {
    let h = harness(FeatureFlags {
        refresh_flows_after_auth: true,
    });
    let deps = RuleDeps {
        channels: Arc::new(BrokenChannels),
        ..h.deps.clone()
    };

    let user = User::new("alice");
    let request = login_request(Some("sess-1"), Some("dev-42"));
    h.dispatcher.login_succeeded(&user, &request, &deps).await;

    assert!(h.sessions.authenticated(&SessionKey::new("sess-1")).is_some());
}
