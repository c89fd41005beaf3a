//! The per-owner synchronization unit.
//!
//! One [`CollectionSync`] keeps a single owner's view of one collection
//! converged with the store: an initial fetch, a re-fetch after every local
//! mutation, and a re-fetch on every change-feed notification. The local
//! collection is always a materialized view of what a fresh query would
//! return; it is never patched incrementally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;

use super::collection::Collection;
use crate::store::{RemoteStore, StoreError};

/// Observable state of one synchronized collection.
#[derive(Debug, Clone)]
pub struct CollectionState<T> {
    /// Most recent fetch result, most recently created first.
    pub entries: Vec<T>,
    /// Whether a fetch is in flight.
    pub loading: bool,
    /// Human-readable message from the last failed operation, cleared when
    /// the next operation starts.
    pub error: Option<String>,
}

impl<T> CollectionState<T> {
    /// Signed-out state: empty by definition, not loading.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            loading: false,
            error: None,
        }
    }

    fn pending() -> Self {
        Self {
            entries: Vec::new(),
            loading: true,
            error: None,
        }
    }
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Synchronization unit for one collection and one owner.
///
/// Mutations never touch the in-memory collection directly; every visible
/// change is the product of a follow-up fetch. Racing fetches converge to
/// the most recently *completed* one: each fetch takes a sequence number and
/// results from superseded requests are discarded.
pub struct CollectionSync<C: Collection, S: RemoteStore> {
    store: Arc<S>,
    owner: String,
    state: watch::Sender<CollectionState<C::Entity>>,
    next_seq: AtomicU64,
    applied_seq: Mutex<u64>,
}

impl<C: Collection, S: RemoteStore> CollectionSync<C, S> {
    /// Creates a unit for the given owner. The initial state is loading
    /// until the first [`refresh`](Self::refresh) completes.
    pub fn new(store: Arc<S>, owner: impl Into<String>) -> Arc<Self> {
        let (state, _) = watch::channel(CollectionState::pending());
        Arc::new(Self {
            store,
            owner: owner.into(),
            state,
            next_seq: AtomicU64::new(0),
            applied_seq: Mutex::new(0),
        })
    }

    /// The owner this unit is scoped to.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> CollectionState<C::Entity> {
        self.state.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn watch_state(&self) -> watch::Receiver<CollectionState<C::Entity>> {
        self.state.subscribe()
    }

    /// Fetches the collection and replaces the local view wholesale.
    ///
    /// A success clears the error slot; a failure empties the collection and
    /// records one message. Only the newest fetch generation is applied:
    /// a stale fetch completing after a newer one is discarded.
    pub async fn refresh(&self) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;

        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let outcome = self.fetch().await;

        let mut applied = self.applied_seq.lock().unwrap();
        if seq <= *applied {
            tracing::debug!(
                collection = C::NAME,
                seq,
                "discarding superseded fetch result"
            );
            return;
        }
        *applied = seq;

        match outcome {
            Ok(entries) => {
                self.state.send_modify(|s| {
                    s.entries = entries;
                    s.loading = false;
                    s.error = None;
                });
            }
            Err(e) => {
                tracing::warn!(collection = C::NAME, "fetch failed: {}", e);
                self.state.send_modify(|s| {
                    s.entries = Vec::new();
                    s.loading = false;
                    s.error = Some(e.to_string());
                });
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<C::Entity>, StoreError> {
        let rows = self.store.query(C::NAME, &self.owner).await?;
        rows.into_iter().map(decode_row::<C>).collect()
    }

    /// Inserts a new row for this owner, then fetches to bring the
    /// store-assigned id and timestamp into view.
    pub async fn create(&self, draft: &C::Draft) {
        self.state.send_modify(|s| s.error = None);

        let payload = C::insert_payload(&self.owner, draft);
        match self.store.insert(C::NAME, payload).await {
            Ok(()) => self.refresh().await,
            Err(e) => self.record_error(e),
        }
    }

    /// Updates the row matching both id and this owner.
    ///
    /// A row that does not exist and a row owned by someone else are
    /// indistinguishable at the store; both surface as "no matching entry".
    pub async fn update(&self, id: &str, draft: &C::Draft) {
        self.state.send_modify(|s| s.error = None);

        let patch = C::update_patch(draft);
        match self.store.update(C::NAME, id, &self.owner, patch).await {
            Ok(0) => self.record_not_found(id),
            Ok(_) => self.refresh().await,
            Err(e) => self.record_error(e),
        }
    }

    /// Deletes the row matching both id and this owner. Failures surface
    /// through the error slot exactly like create and update failures.
    pub async fn delete(&self, id: &str) {
        self.state.send_modify(|s| s.error = None);

        match self.store.delete(C::NAME, id, &self.owner).await {
            Ok(0) => self.record_not_found(id),
            Ok(_) => self.refresh().await,
            Err(e) => self.record_error(e),
        }
    }

    /// Change-feed loop: subscribe, fetch once, then re-fetch on every
    /// notification.
    ///
    /// The subscription is established before the initial fetch so a change
    /// landing between the two still triggers a re-fetch. The feed payload
    /// is too thin to patch incrementally (deletes carry at most an id), so
    /// any event kind triggers the same full re-fetch. Runs until the
    /// subscription ends or the owning task is aborted; dropping the
    /// subscription releases the channel.
    pub async fn run(self: Arc<Self>) {
        let mut subscription = match self.store.subscribe(C::NAME, &self.owner).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(collection = C::NAME, "subscribe failed: {}", e);
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.error = Some(e.to_string());
                });
                return;
            }
        };

        self.refresh().await;

        while let Some(event) = subscription.next().await {
            tracing::debug!(
                collection = C::NAME,
                kind = ?event.kind,
                "change notification, re-fetching"
            );
            self.refresh().await;
        }
    }

    fn record_error(&self, e: StoreError) {
        tracing::warn!(collection = C::NAME, "mutation failed: {}", e);
        self.state.send_modify(|s| s.error = Some(e.to_string()));
    }

    fn record_not_found(&self, id: &str) {
        self.state
            .send_modify(|s| s.error = Some(format!("No matching entry for id {}", id)));
    }
}

fn decode_row<C: Collection>(row: Value) -> Result<C::Entity, StoreError> {
    let row: C::Row =
        serde_json::from_value(row).map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(C::entity(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EatLaterDraft, RestaurantLogDraft};
    use crate::store::{FailOp, MemoryStore};
    use crate::sync::{EatLater, RestaurantLogs};
    use chrono::NaiveDate;
    use std::time::Duration;
    use tokio::time::timeout;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    async fn wait_for<C, S, F>(unit: &CollectionSync<C, S>, predicate: F)
    where
        C: Collection,
        S: RemoteStore,
        F: Fn(&CollectionState<C::Entity>) -> bool,
    {
        let mut rx = unit.watch_state();
        timeout(Duration::from_secs(2), async {
            loop {
                if predicate(&rx.borrow_and_update()) {
                    return;
                }
                if rx.changed().await.is_err() {
                    panic!("state channel closed");
                }
            }
        })
        .await
        .expect("timed out waiting for state");
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let store = store();
        let unit = CollectionSync::<RestaurantLogs, _>::new(store, "u1");

        let date = NaiveDate::from_ymd_opt(2025, 6, 14).unwrap();
        let draft = RestaurantLogDraft::new("Noma", 4.5, date)
            .with_location("Copenhagen")
            .with_tags(vec!["omakase".to_string()]);
        unit.create(&draft).await;

        let state = unit.state();
        assert_eq!(state.entries.len(), 1);
        assert!(state.error.is_none());
        assert!(!state.loading);

        let log = &state.entries[0];
        assert_eq!(log.name, "Noma");
        assert_eq!(log.location, Some("Copenhagen".to_string()));
        assert_eq!(log.tags, vec!["omakase"]);
        assert!(!log.id.is_empty());
    }

    #[tokio::test]
    async fn test_delete_then_list_empty() {
        let store = store();
        let unit = CollectionSync::<EatLater, _>::new(store, "u1");

        unit.create(&EatLaterDraft::new("St. John")).await;
        let id = unit.state().entries[0].id.clone();

        unit.delete(&id).await;

        let state = unit.state();
        assert!(state.entries.is_empty());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_update_edits_in_place() {
        let store = store();
        let unit = CollectionSync::<EatLater, _>::new(store, "u1");

        unit.create(&EatLaterDraft::new("Old name")).await;
        let id = unit.state().entries[0].id.clone();

        unit.update(&id, &EatLaterDraft::new("New name").with_notes("go soon"))
            .await;

        let state = unit.state();
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[0].name, "New name");
        assert_eq!(state.entries[0].notes, Some("go soon".to_string()));
        assert_eq!(state.entries[0].id, id);
    }

    #[tokio::test]
    async fn test_update_unknown_id_surfaces_not_found() {
        let store = store();
        let unit = CollectionSync::<EatLater, _>::new(store, "u1");

        unit.create(&EatLaterDraft::new("Mine")).await;
        unit.update("no-such-id", &EatLaterDraft::new("Nope")).await;

        let state = unit.state();
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[0].name, "Mine");
        assert!(state.error.as_deref().unwrap().contains("No matching entry"));
    }

    #[tokio::test]
    async fn test_owner_isolation() {
        let store = store();
        let unit_a = CollectionSync::<EatLater, _>::new(store.clone(), "u1");
        let unit_b = CollectionSync::<EatLater, _>::new(store, "u2");

        unit_a.create(&EatLaterDraft::new("A's place")).await;
        unit_b.create(&EatLaterDraft::new("B's place")).await;

        assert_eq!(unit_a.state().entries[0].name, "A's place");
        assert_eq!(unit_b.state().entries[0].name, "B's place");
        assert_eq!(unit_a.state().entries.len(), 1);
        assert_eq!(unit_b.state().entries.len(), 1);
    }

    #[tokio::test]
    async fn test_cross_owner_update_is_a_no_op() {
        let store = store();
        let unit_a = CollectionSync::<EatLater, _>::new(store.clone(), "u1");
        let unit_b = CollectionSync::<EatLater, _>::new(store, "u2");

        unit_a.create(&EatLaterDraft::new("A's place")).await;
        let id = unit_a.state().entries[0].id.clone();

        // B attempts to update A's row: zero rows affected.
        unit_b.update(&id, &EatLaterDraft::new("Hijacked")).await;

        unit_a.refresh().await;
        assert_eq!(unit_a.state().entries[0].name, "A's place");
        assert!(unit_b.state().error.is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_empties_collection() {
        let store = store();
        let unit = CollectionSync::<EatLater, _>::new(store.clone(), "u1");

        unit.create(&EatLaterDraft::new("Visible")).await;
        assert_eq!(unit.state().entries.len(), 1);

        store.fail_next(FailOp::Query);
        unit.refresh().await;

        let state = unit.state();
        assert!(state.entries.is_empty());
        assert!(!state.loading);
        assert!(state.error.is_some());

        // The next successful fetch clears the error.
        unit.refresh().await;
        let state = unit.state();
        assert_eq!(state.entries.len(), 1);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_mutation_failure_leaves_collection_untouched() {
        let store = store();
        let unit = CollectionSync::<EatLater, _>::new(store.clone(), "u1");

        unit.create(&EatLaterDraft::new("Existing")).await;

        store.fail_next(FailOp::Insert);
        unit.create(&EatLaterDraft::new("Doomed")).await;

        let state = unit.state();
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[0].name, "Existing");
        assert!(state.error.is_some());

        store.fail_next(FailOp::Delete);
        let id = state.entries[0].id.clone();
        unit.delete(&id).await;

        let state = unit.state();
        assert_eq!(state.entries.len(), 1);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_stale_fetch_does_not_clobber_fresh_data() {
        let store = store();
        let unit = CollectionSync::<EatLater, _>::new(store.clone(), "u1");

        // First fetch reads an empty snapshot, then stalls before returning.
        store.delay_next_query(Duration::from_millis(100));
        let stale = {
            let unit = unit.clone();
            tokio::spawn(async move { unit.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A newer fetch sees the inserted row and completes first.
        unit.create(&EatLaterDraft::new("Fresh")).await;
        assert_eq!(unit.state().entries.len(), 1);

        stale.await.unwrap();

        // The stale empty snapshot must have been discarded.
        let state = unit.state();
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[0].name, "Fresh");
    }

    #[tokio::test]
    async fn test_feed_notification_triggers_refetch() {
        let store = store();
        let unit = CollectionSync::<EatLater, _>::new(store.clone(), "u1");
        let feed = tokio::spawn(unit.clone().run());

        wait_for(&unit, |s| !s.loading).await;

        // A change from another session: written directly to the store.
        store
            .insert(
                "eat_later",
                serde_json::json!({ "user_id": "u1", "name": "Remote add", "tags": [] }),
            )
            .await
            .unwrap();

        wait_for(&unit, |s| s.entries.len() == 1).await;
        assert_eq!(unit.state().entries[0].name, "Remote add");

        feed.abort();
    }

    #[tokio::test]
    async fn test_concurrent_feed_and_mutation_converge() {
        let store = store();
        let unit = CollectionSync::<EatLater, _>::new(store.clone(), "u1");
        let feed = tokio::spawn(unit.clone().run());

        wait_for(&unit, |s| !s.loading).await;

        // A local create and a remote insert race; both trigger fetches.
        store
            .insert(
                "eat_later",
                serde_json::json!({ "user_id": "u1", "name": "Remote", "tags": [] }),
            )
            .await
            .unwrap();
        unit.create(&EatLaterDraft::new("Local")).await;

        wait_for(&unit, |s| s.entries.len() == 2).await;

        // Final state equals one fresh query's result.
        let fresh = store.query("eat_later", "u1").await.unwrap();
        assert_eq!(unit.state().entries.len(), fresh.len());

        feed.abort();
    }

    #[tokio::test]
    async fn test_malformed_row_surfaces_decode_error() {
        let store = store();
        store
            .insert(
                "eat_later",
                serde_json::json!({ "user_id": "u1", "tags": [] }),
            )
            .await
            .unwrap();

        let unit = CollectionSync::<EatLater, _>::new(store, "u1");
        unit.refresh().await;

        let state = unit.state();
        assert!(state.entries.is_empty());
        assert!(state.error.as_deref().unwrap().contains("decode"));
    }
}
