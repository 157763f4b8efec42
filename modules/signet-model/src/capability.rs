//! Behavioral capabilities entity types can opt into.
//!
//! The dispatcher filters on these via interface satisfaction (an entity
//! exposes the capability or it does not), never by inspecting concrete types.

use chrono::{DateTime, Duration, Utc};

/// Default lifetime assigned to expiring records written without an explicit
/// expiry.
pub const DEFAULT_EXPIRY_MINUTES: i64 = 30;

/// The expiry assigned at write time when an expiring record has none.
pub fn default_expiry() -> DateTime<Utc> {
    Utc::now() + Duration::minutes(DEFAULT_EXPIRY_MINUTES)
}

/// Records that may expire. Invariant: when `is_expiring()` is true, a
/// persisted record always has a concrete `expires` timestamp.
pub trait ExpiringModel {
    fn is_expiring(&self) -> bool;
    fn expires(&self) -> Option<DateTime<Utc>>;
    fn set_expires(&mut self, expires: DateTime<Utc>);
}

/// Provider records that only ever talk to the platform over a backchannel.
/// Invariant: persisted with `is_backchannel = true` regardless of input.
pub trait BackchannelProvider {
    fn is_backchannel(&self) -> bool;
    fn set_backchannel(&mut self, value: bool);
}
