//! The persisted identity entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attributes::Attributes;
use crate::capability::{BackchannelProvider, ExpiringModel};
use crate::entity::{Entity, EntityKind};
use crate::request::{RequestContext, DEVICE_COOKIE};

/// Opaque storage-layer session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub attributes: Attributes,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl Entity for User {
    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn kind(&self) -> EntityKind {
        EntityKind::User
    }

    fn as_user(&self) -> Option<&User> {
        Some(self)
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// Identity is immutable once created; `name` is the lookup key policy rules
/// use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

impl Entity for Group {
    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Group
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

impl Application {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            slug: slug.into(),
        }
    }
}

impl Entity for Application {
    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Application
    }

    fn as_application(&self) -> Option<&Application> {
        Some(self)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Storage-layer session, keyed by an opaque session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub expiring: bool,
    pub expires: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            expiring: true,
            expires: None,
        }
    }
}

impl ExpiringModel for Session {
    fn is_expiring(&self) -> bool {
        self.expiring
    }

    fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }

    fn set_expires(&mut self, expires: DateTime<Utc>) {
        self.expires = Some(expires);
    }
}

impl Entity for Session {
    fn entity_id(&self) -> String {
        self.key.to_string()
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Session
    }

    fn as_expiring(&self) -> Option<&dyn ExpiringModel> {
        Some(self)
    }

    fn as_expiring_mut(&mut self) -> Option<&mut dyn ExpiringModel> {
        Some(self)
    }
}

// ---------------------------------------------------------------------------
// AuthenticatedSession
// ---------------------------------------------------------------------------

/// Links a storage session to the user it authenticated, plus the request
/// metadata captured at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedSession {
    pub session_key: SessionKey,
    pub user_id: Uuid,
    pub device_id: Option<String>,
    pub last_ip: Option<String>,
    pub last_user_agent: Option<String>,
    pub expiring: bool,
    pub expires: Option<DateTime<Utc>>,
}

impl AuthenticatedSession {
    /// Build from a successful login. Returns None when the request carries
    /// no storage session key; there is nothing to link.
    pub fn from_login(user: &User, request: &RequestContext) -> Option<Self> {
        let session_key = request.session_key.clone()?;
        Some(Self {
            session_key,
            user_id: user.id,
            device_id: request.cookie(DEVICE_COOKIE).map(str::to_owned),
            last_ip: request.ip.clone(),
            last_user_agent: request.user_agent.clone(),
            expiring: true,
            expires: None,
        })
    }
}

impl ExpiringModel for AuthenticatedSession {
    fn is_expiring(&self) -> bool {
        self.expiring
    }

    fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }

    fn set_expires(&mut self, expires: DateTime<Utc>) {
        self.expires = Some(expires);
    }
}

impl Entity for AuthenticatedSession {
    fn entity_id(&self) -> String {
        self.session_key.to_string()
    }

    fn kind(&self) -> EntityKind {
        EntityKind::AuthenticatedSession
    }

    fn as_expiring(&self) -> Option<&dyn ExpiringModel> {
        Some(self)
    }

    fn as_expiring_mut(&mut self) -> Option<&mut dyn ExpiringModel> {
        Some(self)
    }

    fn as_authenticated_session(&self) -> Option<&AuthenticatedSession> {
        Some(self)
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// A backchannel provider. `is_backchannel` is a stored column forced true at
/// write time, so the invariant is observable rather than assumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub is_backchannel: bool,
}

impl Provider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            is_backchannel: false,
        }
    }
}

impl BackchannelProvider for Provider {
    fn is_backchannel(&self) -> bool {
        self.is_backchannel
    }

    fn set_backchannel(&mut self, value: bool) {
        self.is_backchannel = value;
    }
}

impl Entity for Provider {
    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Provider
    }

    fn as_backchannel(&self) -> Option<&dyn BackchannelProvider> {
        Some(self)
    }

    fn as_backchannel_mut(&mut self) -> Option<&mut dyn BackchannelProvider> {
        Some(self)
    }
}
