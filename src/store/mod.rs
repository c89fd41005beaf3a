//! Remote-data capability boundary.
//!
//! The sync layer talks to the remote service through the [`RemoteStore`]
//! trait: owner-scoped query/insert/update/delete over named collections,
//! plus a server-pushed change feed per collection and owner.
//!
//! Two implementations are provided: [`HttpStore`] for the Platelog sync
//! service (HTTP for data, WebSocket for the feed) and [`MemoryStore`], an
//! in-process store used by tests and local demos.

mod error;
mod feed;
mod http;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub use error::StoreError;
pub use feed::FeedMessage;
pub use http::{check_server, HttpStore};
pub use memory::MemoryStore;
#[cfg(test)]
pub(crate) use memory::FailOp;

/// Kind of row change reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single change-feed notification.
///
/// The payload is deliberately thin: delete events carry too little to
/// reconstruct a domain object, so consumers re-fetch on any event rather
/// than patching incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Row id when the feed knows it; absent for some delete events.
    pub id: Option<String>,
}

/// A live change-feed subscription.
///
/// Dropping the subscription releases the underlying channel; store
/// implementations detach their feed promptly once the receiver is gone.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
}

impl Subscription {
    pub(crate) fn new(events: mpsc::Receiver<ChangeEvent>) -> Self {
        Self { events }
    }

    /// Waits for the next notification. Returns `None` once the feed ends.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

/// Capability boundary to the remote data service.
///
/// Every operation is scoped to an owner; implementations must never return
/// or mutate rows belonging to a different owner.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Owner-scoped query, ordered by creation time descending (most recent
    /// first), ties broken by storage-native insertion order.
    async fn query(&self, collection: &str, owner: &str) -> Result<Vec<Value>, StoreError>;

    /// Inserts a row. The store assigns `id` and `created_at`; the payload
    /// must carry `user_id`.
    async fn insert(&self, collection: &str, row: Value) -> Result<(), StoreError>;

    /// Applies a patch to the row matching both id and owner. Returns the
    /// number of rows changed; zero when nothing matched.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        owner: &str,
        patch: Value,
    ) -> Result<u64, StoreError>;

    /// Deletes the row matching both id and owner. Returns the number of
    /// rows removed; zero when nothing matched.
    async fn delete(&self, collection: &str, id: &str, owner: &str) -> Result<u64, StoreError>;

    /// Subscribes to insert/update/delete notifications for the owner's rows
    /// in the collection.
    async fn subscribe(&self, collection: &str, owner: &str) -> Result<Subscription, StoreError>;
}
