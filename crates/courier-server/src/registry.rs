//! The three-level connection registry.
//!
//! Three coordinated maps move together under one mutex:
//!
//! 1. `by_user_platform : user → platform → set<uuid>`
//! 2. `by_uuid : uuid → ConnectionRecord`
//! 3. `senders : uuid → write half of the socket`
//!
//! The lock is a short synchronous critical section and is never held across
//! an await point. Readers take snapshots (uuid + sender clones) so fan-out
//! runs without the registry lock; the per-socket write mutex inside
//! [`ConnectionSender`] serializes writers on each socket.
//!
//! Invariants:
//! - a uuid appears under `by_user_platform[u][p]` iff its record says
//!   `(u, p)`;
//! - a uuid has a record iff it has a sender;
//! - empty platform sets and empty user maps are pruned on removal;
//! - per-`(user, platform)` membership is a set, so duplicates are
//!   impossible while multiple identical `(user, platform)` connections
//!   remain allowed (distinct uuids).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message};
use courier_core::{ConnectMeta, ConnectionId, CourierError, UserId};
use futures::{Sink, SinkExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

/// Boxed error produced by a type-erased sink.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased write half of a socket.
pub type BoxSink = Box<dyn Sink<Message, Error = BoxError> + Send + Unpin>;

/// Write capability for one socket.
///
/// Cloning shares the same underlying sink; the inner async mutex guarantees
/// a single writer at a time. A successful send means the frame was flushed.
#[derive(Clone)]
pub struct ConnectionSender {
    sink: Arc<AsyncMutex<BoxSink>>,
}

impl ConnectionSender {
    #[must_use]
    pub fn new(sink: BoxSink) -> Self {
        Self {
            sink: Arc::new(AsyncMutex::new(sink)),
        }
    }

    /// Write one text frame, flushing it to the OS.
    pub async fn send_text(&self, text: &str) -> Result<(), CourierError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| CourierError::transport(e.to_string()))
    }

    /// Send a close frame with the given code.
    pub async fn send_close(&self, code: u16, reason: &str) -> Result<(), CourierError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_owned().into(),
        })))
        .await
        .map_err(|e| CourierError::transport(e.to_string()))
    }
}

/// Immutable description of one live connection.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub uuid: ConnectionId,
    pub user_id: UserId,
    pub platform: String,
    pub api_key: String,
    pub remote_addr: Option<String>,
    pub established_at: Instant,
    /// Handshake metadata, handed back to lifecycle callbacks.
    pub meta: ConnectMeta,
}

impl ConnectionRecord {
    #[must_use]
    pub fn new(uuid: ConnectionId, user_id: UserId, meta: ConnectMeta) -> Self {
        Self {
            uuid,
            user_id,
            platform: meta.platform.clone(),
            api_key: meta.api_key.clone(),
            remote_addr: meta.remote_addr.clone(),
            established_at: Instant::now(),
            meta,
        }
    }
}

/// A snapshot entry: everything a sender needs to deliver one frame.
#[derive(Clone)]
pub struct RouteTarget {
    pub uuid: ConnectionId,
    pub sender: ConnectionSender,
}

/// Registry-level stats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub users: usize,
    pub connections: usize,
}

#[derive(Default)]
struct Inner {
    by_user_platform: HashMap<UserId, HashMap<String, HashSet<ConnectionId>>>,
    by_uuid: HashMap<ConnectionId, Arc<ConnectionRecord>>,
    senders: HashMap<ConnectionId, ConnectionSender>,
}

/// The server's connection index. All mutations are serialized; reads
/// produce snapshots.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection into all three maps in one critical section.
    pub fn register(&self, record: Arc<ConnectionRecord>, sender: ConnectionSender) {
        let mut inner = self.inner.lock();
        let _ = inner
            .by_user_platform
            .entry(record.user_id.clone())
            .or_default()
            .entry(record.platform.clone())
            .or_default()
            .insert(record.uuid.clone());
        let _ = inner.senders.insert(record.uuid.clone(), sender);
        let _ = inner.by_uuid.insert(record.uuid.clone(), record);
    }

    /// Remove a connection from all three maps, pruning empty levels.
    ///
    /// Idempotent: the read loop and a failed concurrent sender may both
    /// reach here. Returns the record on first removal.
    pub fn unregister(&self, uuid: &ConnectionId) -> Option<Arc<ConnectionRecord>> {
        let mut inner = self.inner.lock();
        let record = inner.by_uuid.remove(uuid)?;
        let _ = inner.senders.remove(uuid);

        if let Some(platforms) = inner.by_user_platform.get_mut(&record.user_id) {
            if let Some(set) = platforms.get_mut(&record.platform) {
                let _ = set.remove(uuid);
                if set.is_empty() {
                    let _ = platforms.remove(&record.platform);
                }
            }
            if platforms.is_empty() {
                let _ = inner.by_user_platform.remove(&record.user_id);
            }
        }
        Some(record)
    }

    /// Snapshot of the connections registered under `(user, platform)`.
    #[must_use]
    pub fn lookup(&self, user_id: &UserId, platform: &str) -> Vec<RouteTarget> {
        let inner = self.inner.lock();
        let Some(uuids) = inner
            .by_user_platform
            .get(user_id)
            .and_then(|platforms| platforms.get(platform))
        else {
            return Vec::new();
        };
        collect_targets(&inner, uuids.iter())
    }

    /// Snapshot of every connection of one user, across platforms.
    #[must_use]
    pub fn user_snapshot(&self, user_id: &UserId) -> Vec<RouteTarget> {
        let inner = self.inner.lock();
        let Some(platforms) = inner.by_user_platform.get(user_id) else {
            return Vec::new();
        };
        let uuids: Vec<&ConnectionId> = platforms.values().flatten().collect();
        collect_targets(&inner, uuids.into_iter())
    }

    /// Snapshot of every connection on one platform, across users.
    #[must_use]
    pub fn platform_snapshot(&self, platform: &str) -> Vec<RouteTarget> {
        let inner = self.inner.lock();
        let uuids: Vec<&ConnectionId> = inner
            .by_uuid
            .values()
            .filter(|record| record.platform == platform)
            .map(|record| &record.uuid)
            .collect();
        collect_targets(&inner, uuids.into_iter())
    }

    /// Snapshot of every live connection.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<RouteTarget> {
        let inner = self.inner.lock();
        let uuids: Vec<&ConnectionId> = inner.by_uuid.keys().collect();
        collect_targets(&inner, uuids.into_iter())
    }

    /// `(user, platform, uuid)` coordinates of every live connection.
    #[must_use]
    pub fn coordinates(&self) -> Vec<(UserId, String, ConnectionId)> {
        let inner = self.inner.lock();
        inner
            .by_uuid
            .values()
            .map(|record| {
                (
                    record.user_id.clone(),
                    record.platform.clone(),
                    record.uuid.clone(),
                )
            })
            .collect()
    }

    /// The record for a connection, if it is still registered.
    #[must_use]
    pub fn record(&self, uuid: &ConnectionId) -> Option<Arc<ConnectionRecord>> {
        self.inner.lock().by_uuid.get(uuid).cloned()
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        RegistryStats {
            users: inner.by_user_platform.len(),
            connections: inner.by_uuid.len(),
        }
    }

    /// Internal consistency check, used by tests.
    #[cfg(test)]
    fn check_invariants(&self) {
        let inner = self.inner.lock();
        // A record exists iff its sender does.
        assert_eq!(inner.by_uuid.len(), inner.senders.len());
        for uuid in inner.by_uuid.keys() {
            assert!(inner.senders.contains_key(uuid), "sender missing for {uuid}");
        }
        // The index agrees with the records; sets rule out duplicates.
        let mut indexed = 0usize;
        for (user, platforms) in &inner.by_user_platform {
            // No empty levels survive a removal.
            assert!(!platforms.is_empty(), "empty user entry for {user}");
            for (platform, uuids) in platforms {
                assert!(!uuids.is_empty(), "empty platform set for {user}/{platform}");
                for uuid in uuids {
                    let record = inner.by_uuid.get(uuid).expect("dangling index entry");
                    assert_eq!(&record.user_id, user);
                    assert_eq!(&record.platform, platform);
                    indexed += 1;
                }
            }
        }
        assert_eq!(indexed, inner.by_uuid.len());
    }
}

fn collect_targets<'a>(
    inner: &Inner,
    uuids: impl Iterator<Item = &'a ConnectionId>,
) -> Vec<RouteTarget> {
    uuids
        .filter_map(|uuid| {
            inner.senders.get(uuid).map(|sender| RouteTarget {
                uuid: uuid.clone(),
                sender: sender.clone(),
            })
        })
        .collect()
}
