//! In-memory remote store.
//!
//! Backs the crate's tests and local demos with the same contract the real
//! service provides: owner-scoped rows per collection, store-assigned ids
//! and creation timestamps, and a broadcast change hub keyed by
//! (collection, owner).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use async_trait::async_trait;

use super::{ChangeEvent, ChangeKind, RemoteStore, StoreError, Subscription};

/// Broadcast channels per collection+owner.
struct ChangeHub {
    channels: RwLock<HashMap<(String, String), broadcast::Sender<ChangeEvent>>>,
}

impl ChangeHub {
    fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes to changes for a collection+owner.
    async fn subscribe(&self, collection: &str, owner: &str) -> broadcast::Receiver<ChangeEvent> {
        let key = (collection.to_string(), owner.to_string());

        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(&key) {
            sender.subscribe()
        } else {
            let (sender, receiver) = broadcast::channel(16);
            channels.insert(key, sender);
            receiver
        }
    }

    /// Broadcasts a change to all subscribers for a collection+owner.
    async fn broadcast(&self, collection: &str, owner: &str, event: ChangeEvent) {
        let key = (collection.to_string(), owner.to_string());

        let channels = self.channels.read().await;

        if let Some(sender) = channels.get(&key) {
            // Ignore send errors (no subscribers)
            let _ = sender.send(event);
        }
    }
}

/// In-memory [`RemoteStore`] implementation.
///
/// Rows live in insertion order per collection; queries filter by owner and
/// sort by `created_at` descending, so ties keep insertion order (stable
/// sort). Mutations feed the change hub exactly like the real service does.
pub struct MemoryStore {
    rows: RwLock<HashMap<String, Vec<Value>>>,
    hub: ChangeHub,
    #[cfg(test)]
    fail_next: std::sync::Mutex<std::collections::HashSet<FailOp>>,
    #[cfg(test)]
    query_delay: std::sync::Mutex<Option<std::time::Duration>>,
}

/// Store operation selector for test failure injection.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOp {
    Query,
    Insert,
    Update,
    Delete,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            hub: ChangeHub::new(),
            #[cfg(test)]
            fail_next: std::sync::Mutex::new(std::collections::HashSet::new()),
            #[cfg(test)]
            query_delay: std::sync::Mutex::new(None),
        }
    }

    /// Makes the next call of the given operation fail with a connection
    /// error, once.
    #[cfg(test)]
    pub fn fail_next(&self, op: FailOp) {
        self.fail_next.lock().unwrap().insert(op);
    }

    /// Delays the next query between reading rows and returning them, so a
    /// stale snapshot completes after fresher fetches.
    #[cfg(test)]
    pub fn delay_next_query(&self, delay: std::time::Duration) {
        *self.query_delay.lock().unwrap() = Some(delay);
    }

    /// Number of live feed subscribers for a collection+owner.
    #[cfg(test)]
    pub async fn subscriber_count(&self, collection: &str, owner: &str) -> usize {
        let channels = self.hub.channels.read().await;
        channels
            .get(&(collection.to_string(), owner.to_string()))
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn take_failure(&self, op: FailOp) -> bool {
        self.fail_next.lock().unwrap().remove(&op)
    }

    fn created_at_of(row: &Value) -> DateTime<Utc> {
        row.get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn owner_of(row: &Value) -> Option<&str> {
        row.get("user_id").and_then(Value::as_str)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn query(&self, collection: &str, owner: &str) -> Result<Vec<Value>, StoreError> {
        #[cfg(test)]
        if self.take_failure(FailOp::Query) {
            return Err(StoreError::Connection("injected query failure".to_string()));
        }

        let mut matched: Vec<Value> = {
            let rows = self.rows.read().await;
            rows.get(collection)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| Self::owner_of(row) == Some(owner))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        // Stable sort: equal timestamps keep insertion order.
        matched.sort_by(|a, b| Self::created_at_of(b).cmp(&Self::created_at_of(a)));

        #[cfg(test)]
        {
            let delay = self.query_delay.lock().unwrap().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(matched)
    }

    async fn insert(&self, collection: &str, mut row: Value) -> Result<(), StoreError> {
        #[cfg(test)]
        if self.take_failure(FailOp::Insert) {
            return Err(StoreError::Connection(
                "injected insert failure".to_string(),
            ));
        }

        let owner = Self::owner_of(&row)
            .ok_or_else(|| StoreError::Decode("insert payload missing user_id".to_string()))?
            .to_string();

        let id = Uuid::new_v4().to_string();
        let object = row
            .as_object_mut()
            .ok_or_else(|| StoreError::Decode("insert payload is not an object".to_string()))?;
        object.insert("id".to_string(), Value::String(id.clone()));
        object.insert(
            "created_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        self.rows
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(row);

        self.hub
            .broadcast(
                collection,
                &owner,
                ChangeEvent {
                    kind: ChangeKind::Insert,
                    id: Some(id),
                },
            )
            .await;

        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        owner: &str,
        patch: Value,
    ) -> Result<u64, StoreError> {
        #[cfg(test)]
        if self.take_failure(FailOp::Update) {
            return Err(StoreError::Connection(
                "injected update failure".to_string(),
            ));
        }

        let fields = patch
            .as_object()
            .ok_or_else(|| StoreError::Decode("update patch is not an object".to_string()))?
            .clone();

        let affected = {
            let mut rows = self.rows.write().await;
            let Some(rows) = rows.get_mut(collection) else {
                return Ok(0);
            };

            let mut affected = 0u64;
            for row in rows.iter_mut() {
                let matches = row.get("id").and_then(Value::as_str) == Some(id)
                    && Self::owner_of(row) == Some(owner);
                if !matches {
                    continue;
                }
                if let Some(object) = row.as_object_mut() {
                    for (key, value) in &fields {
                        object.insert(key.clone(), value.clone());
                    }
                    affected += 1;
                }
            }
            affected
        };

        if affected > 0 {
            self.hub
                .broadcast(
                    collection,
                    owner,
                    ChangeEvent {
                        kind: ChangeKind::Update,
                        id: Some(id.to_string()),
                    },
                )
                .await;
        }

        Ok(affected)
    }

    async fn delete(&self, collection: &str, id: &str, owner: &str) -> Result<u64, StoreError> {
        #[cfg(test)]
        if self.take_failure(FailOp::Delete) {
            return Err(StoreError::Connection(
                "injected delete failure".to_string(),
            ));
        }

        let affected = {
            let mut rows = self.rows.write().await;
            let Some(rows) = rows.get_mut(collection) else {
                return Ok(0);
            };

            let before = rows.len();
            rows.retain(|row| {
                !(row.get("id").and_then(Value::as_str) == Some(id)
                    && Self::owner_of(row) == Some(owner))
            });
            (before - rows.len()) as u64
        };

        if affected > 0 {
            self.hub
                .broadcast(
                    collection,
                    owner,
                    ChangeEvent {
                        kind: ChangeKind::Delete,
                        id: Some(id.to_string()),
                    },
                )
                .await;
        }

        Ok(affected)
    }

    async fn subscribe(&self, collection: &str, owner: &str) -> Result<Subscription, StoreError> {
        let mut feed = self.hub.subscribe(collection, owner).await;
        let (tx, rx) = mpsc::channel(16);

        // Forward broadcast events into the subscription channel. Ends as
        // soon as the subscription is dropped, releasing the hub receiver.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = feed.recv() => match event {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tx.closed() => break,
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
