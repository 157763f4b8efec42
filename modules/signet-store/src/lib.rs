//! Postgres-backed identity store.
//!
//! Every entity write flows through the lifecycle dispatcher: pre-write rules
//! run inside the write path and can abort it, post-write and post-delete
//! rules run after the durability point and never affect the outcome.

use std::sync::Arc;

use sqlx::PgPool;

use signet_cache::MemoryCache;
use signet_lifecycle::{register_core_rules, LifecycleDispatcher, RuleDeps};
use signet_model::{Config, FeatureFlags};
use signet_realtime::InProcessChannelLayer;

pub mod schema;
pub mod store;

pub use store::{IdentityStore, PgGroupDirectory, PgSessionStore};

/// Build a fully wired store: dispatcher with the core rules, production
/// boundary implementations, in-process cache and channel layer.
pub fn wire(pool: PgPool, config: &Config) -> IdentityStore {
    let mut dispatcher = LifecycleDispatcher::new();
    register_core_rules(&mut dispatcher);
    let dispatcher = Arc::new(dispatcher);

    let deps = RuleDeps {
        cache: Arc::new(MemoryCache::new()),
        groups: Arc::new(PgGroupDirectory::new(pool.clone())),
        sessions: Arc::new(PgSessionStore::new(pool.clone(), Arc::clone(&dispatcher))),
        channels: Arc::new(InProcessChannelLayer::new()),
        flags: FeatureFlags::from(config),
    };

    IdentityStore::new(pool, dispatcher, deps)
}
