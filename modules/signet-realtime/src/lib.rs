//! Pub/sub channel boundary for realtime client notification.
//!
//! Messages are fire-and-forget nudges, not a delivery guarantee. A send to a
//! group nobody subscribes to succeeds and does nothing.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const GROUP_CAPACITY: usize = 16;

/// Pub/sub group addressing all live connections of one client device.
pub fn device_group(device_id: &str) -> String {
    format!("device-events-{device_id}")
}

/// Messages published to channel groups. The `type` tag is the wire event
/// name clients switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelMessage {
    #[serde(rename = "event.session.authenticated")]
    SessionAuthenticated,
}

/// Message transport boundary. Implementations must return quickly; callers
/// treat `group_send` as a single bounded call with no cancellation hook.
#[async_trait]
pub trait ChannelLayer: Send + Sync {
    async fn group_send(&self, group: &str, message: ChannelMessage) -> Result<()>;
}

// ---------------------------------------------------------------------------
// InProcessChannelLayer
// ---------------------------------------------------------------------------

/// Broadcast-based channel layer for single-process deployments. Group
/// senders are created lazily on first subscribe; sending never blocks.
#[derive(Default)]
pub struct InProcessChannelLayer {
    groups: Mutex<HashMap<String, broadcast::Sender<ChannelMessage>>>,
}

impl InProcessChannelLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a group, creating it if needed. Dropping the receiver is
    /// the unsubscribe.
    pub fn subscribe(&self, group: &str) -> broadcast::Receiver<ChannelMessage> {
        let mut groups = self.groups.lock().unwrap();
        groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(GROUP_CAPACITY).0)
            .subscribe()
    }
}

#[async_trait]
impl ChannelLayer for InProcessChannelLayer {
    async fn group_send(&self, group: &str, message: ChannelMessage) -> Result<()> {
        let sender = self.groups.lock().unwrap().get(group).cloned();
        match sender {
            Some(tx) => {
                if tx.send(message).is_err() {
                    debug!(group, "No live subscribers for group, message dropped");
                }
            }
            None => debug!(group, "Unknown group, message dropped"),
        }
        Ok(())
    }
}
