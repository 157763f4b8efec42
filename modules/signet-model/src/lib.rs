//! Core identity entities and the capability interfaces the lifecycle
//! dispatcher filters on.
//!
//! This crate is passive: data definitions, invariant accessors, config, and
//! errors. All reaction logic lives in `signet-lifecycle`.

pub mod attributes;
pub mod capability;
pub mod config;
pub mod entities;
pub mod entity;
pub mod error;
pub mod request;

pub use attributes::Attributes;
pub use capability::{default_expiry, BackchannelProvider, ExpiringModel, DEFAULT_EXPIRY_MINUTES};
pub use config::{Config, FeatureFlags};
pub use entities::{
    Application, AuthenticatedSession, Group, Provider, Session, SessionKey, User,
};
pub use entity::{Entity, EntityKind};
pub use error::SignetError;
pub use request::{RequestContext, DEVICE_COOKIE};
