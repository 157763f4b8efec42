//! Object-safe interface the dispatcher sees for every persisted entity.

use crate::capability::{BackchannelProvider, ExpiringModel};
use crate::entities::{Application, AuthenticatedSession, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Group,
    Application,
    Session,
    AuthenticatedSession,
    Provider,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::User => write!(f, "User"),
            EntityKind::Group => write!(f, "Group"),
            EntityKind::Application => write!(f, "Application"),
            EntityKind::Session => write!(f, "Session"),
            EntityKind::AuthenticatedSession => write!(f, "AuthenticatedSession"),
            EntityKind::Provider => write!(f, "Provider"),
        }
    }
}

/// What the lifecycle layer needs from any entity: a stable identifier for
/// logs, the kind for type filters, and capability/concrete accessors for
/// rules. Accessors default to None; entity types override the ones they
/// support.
pub trait Entity: Send + Sync {
    fn entity_id(&self) -> String;
    fn kind(&self) -> EntityKind;

    fn as_expiring(&self) -> Option<&dyn ExpiringModel> {
        None
    }

    fn as_expiring_mut(&mut self) -> Option<&mut dyn ExpiringModel> {
        None
    }

    fn as_backchannel(&self) -> Option<&dyn BackchannelProvider> {
        None
    }

    fn as_backchannel_mut(&mut self) -> Option<&mut dyn BackchannelProvider> {
        None
    }

    fn as_user(&self) -> Option<&User> {
        None
    }

    fn as_application(&self) -> Option<&Application> {
        None
    }

    fn as_authenticated_session(&self) -> Option<&AuthenticatedSession> {
        None
    }
}
