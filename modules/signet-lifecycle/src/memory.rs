//! In-memory implementations of the storage boundary. Used by tests and
//! single-process wiring; no database required.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use signet_model::{AuthenticatedSession, Group, Session, SessionKey};

use crate::dispatcher::LifecycleDispatcher;
use crate::traits::{GroupDirectory, SessionStore};

// ---------------------------------------------------------------------------
// MemoryGroupDirectory
// ---------------------------------------------------------------------------

/// Group directory backed by a set. Membership set semantics give the
/// no-duplicate invariant for free.
#[derive(Default)]
pub struct MemoryGroupDirectory {
    groups: Mutex<Vec<Group>>,
    memberships: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl MemoryGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_group(&self, group: Group) {
        self.groups.lock().unwrap().push(group);
    }

    /// Group ids the user is a member of (for test assertions).
    pub fn memberships_for(&self, user_id: Uuid) -> Vec<Uuid> {
        self.memberships
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, g)| *g)
            .collect()
    }
}

#[async_trait]
impl GroupDirectory for MemoryGroupDirectory {
    async fn find_by_name(&self, name: &str) -> Result<Option<Group>> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn is_member(&self, user_id: Uuid, group_id: Uuid) -> Result<bool> {
        Ok(self
            .memberships
            .lock()
            .unwrap()
            .contains(&(user_id, group_id)))
    }

    async fn add_member(&self, user_id: Uuid, group_id: Uuid) -> Result<()> {
        self.memberships.lock().unwrap().insert((user_id, group_id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

/// Session store over two maps. Holds the dispatcher so authenticated-session
/// saves run the pre-write phase, matching the production store.
pub struct MemorySessionStore {
    dispatcher: Arc<LifecycleDispatcher>,
    sessions: Mutex<HashMap<SessionKey, Session>>,
    authenticated: Mutex<HashMap<SessionKey, AuthenticatedSession>>,
}

impl MemorySessionStore {
    pub fn new(dispatcher: Arc<LifecycleDispatcher>) -> Self {
        Self {
            dispatcher,
            sessions: Mutex::new(HashMap::new()),
            authenticated: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a storage-layer session (the session middleware's job in
    /// production).
    pub fn insert_session(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.key.clone(), session);
    }

    pub fn session(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.lock().unwrap().get(key).cloned()
    }

    pub fn authenticated(&self, key: &SessionKey) -> Option<AuthenticatedSession> {
        self.authenticated.lock().unwrap().get(key).cloned()
    }

    pub fn authenticated_count(&self) -> usize {
        self.authenticated.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save_authenticated(&self, session: &mut AuthenticatedSession) -> Result<()> {
        self.dispatcher.pre_write(session).await?;
        self.authenticated
            .lock()
            .unwrap()
            .insert(session.session_key.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<u64> {
        Ok(u64::from(
            self.sessions.lock().unwrap().remove(key).is_some(),
        ))
    }
}
