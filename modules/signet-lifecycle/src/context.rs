//! Collaborator handles passed to every post-write, post-delete, and login
//! dispatch.

use std::sync::Arc;

use signet_cache::KeyValueCache;
use signet_model::FeatureFlags;
use signet_realtime::ChannelLayer;

use crate::traits::{GroupDirectory, SessionStore};

/// Everything a reaction rule may touch beyond the entity itself. Cheap to
/// clone; construct once at wiring time.
#[derive(Clone)]
pub struct RuleDeps {
    pub cache: Arc<dyn KeyValueCache>,
    pub groups: Arc<dyn GroupDirectory>,
    pub sessions: Arc<dyn SessionStore>,
    pub channels: Arc<dyn ChannelLayer>,
    pub flags: FeatureFlags,
}
