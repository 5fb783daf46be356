//! In-process realtime hub.
//!
//! ```text
//! callsign service ──publish_change──┐
//!                                    ▼
//! RealtimeHub ── channels: name → Channel
//!                  ├── presence: connection id → (key, meta)
//!                  └── tx: broadcast::Sender<RealtimeEvent>
//!                                    │
//!                                    ▼
//!                 Connection (subscribe → skip own events → SSE)
//! ```
//!
//! A [`Connection`] untracks its presence when dropped, so a closed SSE
//! stream always produces the matching leave.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Channel carrying presence toasts and row changes.
pub const GLOBAL_CHANNEL: &str = "global_presence";
/// Channel used only to count who is online.
pub const ONLINE_CHANNEL: &str = "online-users";

const BROADCAST_CAPACITY: usize = 256;

/// What a tracked client shares with the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceMeta {
    pub user_id: UserId,
    pub callsign: String,
    pub online_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row change on the callsign table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub callsign: String,
    pub name: String,
    /// Owner of the changed record.
    pub user_id: Option<UserId>,
}

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Join { key: String, meta: PresenceMeta },
    Leave { key: String, meta: PresenceMeta },
    Change(ChangeEvent),
}

impl RealtimeEvent {
    /// Identity the event belongs to, used to hide a client's own events.
    fn origin(&self) -> Option<&UserId> {
        match self {
            Self::Join { meta, .. } | Self::Leave { meta, .. } => Some(&meta.user_id),
            Self::Change(change) => change.user_id.as_ref(),
        }
    }
}

/// Toast shown for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: String,
    pub message: String,
}

impl From<&RealtimeEvent> for Notification {
    fn from(event: &RealtimeEvent) -> Self {
        let display = |callsign: &str| {
            if callsign.trim().is_empty() {
                "A member".to_string()
            } else {
                callsign.to_string()
            }
        };
        match event {
            RealtimeEvent::Join { meta, .. } => Self {
                kind: "login",
                title: format!("{} is online", display(&meta.callsign)),
                message: "Just logged in".to_string(),
            },
            RealtimeEvent::Leave { meta, .. } => Self {
                kind: "logout",
                title: format!("{} went offline", display(&meta.callsign)),
                message: "Logged out".to_string(),
            },
            RealtimeEvent::Change(change) => match change.kind {
                ChangeKind::Insert => Self {
                    kind: "insert",
                    title: format!("New Operator: {}", change.callsign),
                    message: format!("{} just joined the directory!", change.name),
                },
                ChangeKind::Update => Self {
                    kind: "update",
                    title: format!("{} updated", change.callsign),
                    message: "Profile information was just updated.".to_string(),
                },
                ChangeKind::Delete => Self {
                    kind: "delete",
                    title: format!("{} removed", change.callsign),
                    message: "Operator removed from directory.".to_string(),
                },
            },
        }
    }
}

struct Channel {
    presence: DashMap<u64, (String, PresenceMeta)>,
    tx: broadcast::Sender<RealtimeEvent>,
}

impl Channel {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            presence: DashMap::new(),
            tx,
        }
    }
}

/// Named broadcast channels and their presence tables.
#[derive(Clone, Default)]
pub struct RealtimeHub {
    channels: Arc<DashMap<String, Arc<Channel>>>,
    next_id: Arc<AtomicU64>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str) -> Arc<Channel> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Channel::new()))
            .clone()
    }

    /// Open a connection to `channel` under a presence key. `identity` is
    /// the authenticated user whose own events are filtered out.
    pub fn connect(&self, channel: &str, key: impl Into<String>, identity: Option<UserId>) -> Connection {
        Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            key: key.into(),
            identity,
            channel: self.channel(channel),
            rx: None,
            tracking: false,
        }
    }

    /// Publish a callsign row change on the global channel.
    pub fn publish_change(&self, change: ChangeEvent) {
        let channel = self.channel(GLOBAL_CHANNEL);
        // no subscribers is fine
        let _ = channel.tx.send(RealtimeEvent::Change(change));
    }

    /// Tracked presences on a channel, one per connection.
    #[allow(dead_code)]
    pub fn presence(&self, channel: &str) -> Vec<(String, PresenceMeta)> {
        self.channels
            .get(channel)
            .map(|c| c.presence.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    /// Distinct presence keys on a channel.
    pub fn online_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |c| {
            c.presence
                .iter()
                .map(|e| e.value().0.clone())
                .collect::<HashSet<_>>()
                .len()
        })
    }
}

/// One client attached to a channel.
///
/// Receives nothing until [`Connection::subscribe`]. Dropping it leaves the
/// presence set.
pub struct Connection {
    id: u64,
    key: String,
    identity: Option<UserId>,
    channel: Arc<Channel>,
    rx: Option<broadcast::Receiver<RealtimeEvent>>,
    tracking: bool,
}

impl Connection {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Start receiving events published from now on.
    pub fn subscribe(&mut self) {
        if self.rx.is_none() {
            self.rx = Some(self.channel.tx.subscribe());
        }
    }

    /// Announce presence, replacing any earlier metadata of this connection.
    pub fn track(&mut self, meta: PresenceMeta) {
        self.channel
            .presence
            .insert(self.id, (self.key.clone(), meta.clone()));
        self.tracking = true;
        let _ = self.channel.tx.send(RealtimeEvent::Join {
            key: self.key.clone(),
            meta,
        });
    }

    /// Leave the presence set, announcing a leave if tracked.
    pub fn untrack(&mut self) {
        if !self.tracking {
            return;
        }
        self.tracking = false;
        if let Some((_, (key, meta))) = self.channel.presence.remove(&self.id) {
            let _ = self.channel.tx.send(RealtimeEvent::Leave { key, meta });
        }
    }

    /// Next event not originating from this connection's identity. `None`
    /// when not subscribed or the channel is gone.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if self.identity.is_some() && event.origin() == self.identity.as_ref() {
                        continue;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, key = %self.key, "Realtime subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Leave the channel: untrack and stop receiving.
    pub fn unsubscribe(mut self) {
        self.untrack();
        self.rx = None;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.untrack();
    }
}
