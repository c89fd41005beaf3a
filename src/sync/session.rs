//! Binds the authenticated session to a live collection view.
//!
//! A [`SessionSync`] listens to the owner-identity feed from the auth
//! collaborator and re-derives its whole state from the current identity
//! value. Signing out clears the view immediately (signed-out is empty by
//! definition, not loading); switching owners tears the previous scope down
//! before the new one is established, so no pending fetch or feed callback
//! for the previous owner can write into the new owner's view.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::collection::Collection;
use super::engine::{CollectionState, CollectionSync};
use crate::store::RemoteStore;

/// Creates an owner-identity channel for driving [`SessionSync`].
///
/// The auth collaborator holds the sender and publishes `Some(owner_id)` on
/// sign-in, `None` on sign-out.
pub fn owner_channel(
    initial: Option<String>,
) -> (
    watch::Sender<Option<String>>,
    watch::Receiver<Option<String>>,
) {
    watch::channel(initial)
}

/// Everything scoped to one bound owner. Dropping it aborts the unit's
/// tasks, which in turn releases the feed subscription.
struct ActiveScope<C: Collection, S: RemoteStore> {
    unit: Arc<CollectionSync<C, S>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: Collection, S: RemoteStore> Drop for ActiveScope<C, S> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Live, owner-bound view of one collection.
///
/// The outward state survives identity changes: consumers keep one
/// [`watch::Receiver`] and observe the collection being cleared and reloaded
/// as the session changes hands. Mutator operations are silent no-ops while
/// no owner is bound.
pub struct SessionSync<C: Collection, S: RemoteStore> {
    state: watch::Receiver<CollectionState<C::Entity>>,
    active: Arc<Mutex<Option<ActiveScope<C, S>>>>,
    control: JoinHandle<()>,
}

impl<C: Collection, S: RemoteStore> SessionSync<C, S> {
    /// Starts the binder on the given identity feed.
    pub fn new(store: Arc<S>, mut owner_rx: watch::Receiver<Option<String>>) -> Self {
        let (out_tx, out_rx) = watch::channel(CollectionState::empty());
        let active: Arc<Mutex<Option<ActiveScope<C, S>>>> = Arc::new(Mutex::new(None));

        let control = tokio::spawn({
            let active = active.clone();
            async move {
                loop {
                    let owner = owner_rx.borrow_and_update().clone();
                    bind(&store, &active, &out_tx, owner);
                    if owner_rx.changed().await.is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            state: out_rx,
            active,
            control,
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> CollectionState<C::Entity> {
        self.state.borrow().clone()
    }

    /// Subscribes to state changes across identity transitions.
    pub fn watch_state(&self) -> watch::Receiver<CollectionState<C::Entity>> {
        self.state.clone()
    }

    /// Creates an entry for the bound owner. No-op when signed out.
    pub async fn create(&self, draft: &C::Draft) {
        if let Some(unit) = self.unit() {
            unit.create(draft).await;
        }
    }

    /// Updates an entry of the bound owner. No-op when signed out.
    pub async fn update(&self, id: &str, draft: &C::Draft) {
        if let Some(unit) = self.unit() {
            unit.update(id, draft).await;
        }
    }

    /// Deletes an entry of the bound owner. No-op when signed out.
    pub async fn delete(&self, id: &str) {
        if let Some(unit) = self.unit() {
            unit.delete(id).await;
        }
    }

    fn unit(&self) -> Option<Arc<CollectionSync<C, S>>> {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|scope| scope.unit.clone())
    }
}

impl<C: Collection, S: RemoteStore> Drop for SessionSync<C, S> {
    fn drop(&mut self) {
        self.control.abort();
        if let Ok(mut scope) = self.active.lock() {
            // Aborts the scope's tasks and releases the feed subscription.
            *scope = None;
        }
    }
}

/// (Re)binds the session to an owner. The previous scope is torn down first
/// so its tasks can never write into the new scope's view.
fn bind<C: Collection, S: RemoteStore>(
    store: &Arc<S>,
    active: &Arc<Mutex<Option<ActiveScope<C, S>>>>,
    out_tx: &watch::Sender<CollectionState<C::Entity>>,
    owner: Option<String>,
) {
    let mut slot = active.lock().unwrap();
    *slot = None;

    let Some(owner) = owner else {
        tracing::debug!(collection = C::NAME, "signed out, clearing view");
        let _ = out_tx.send(CollectionState::empty());
        return;
    };

    tracing::debug!(collection = C::NAME, owner = %owner, "binding owner");
    let unit = CollectionSync::<C, S>::new(store.clone(), owner);

    // Publish the fresh loading state before any fetch lands.
    let _ = out_tx.send(unit.state());

    let forward = tokio::spawn(forward_state(unit.watch_state(), out_tx.clone()));
    let feed = tokio::spawn(unit.clone().run());

    *slot = Some(ActiveScope {
        unit,
        tasks: vec![forward, feed],
    });
}

/// Forwards a unit's state into the binder's outward channel. Aborted at
/// teardown, which is what keeps a stale scope from leaking into the next.
async fn forward_state<T: Clone + Send + Sync + 'static>(
    mut rx: watch::Receiver<CollectionState<T>>,
    tx: watch::Sender<CollectionState<T>>,
) {
    loop {
        if rx.changed().await.is_err() {
            break;
        }
        let snapshot = rx.borrow_and_update().clone();
        let _ = tx.send(snapshot);
    }
}
