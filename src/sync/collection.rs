//! Collection bindings for the synchronization engine.
//!
//! The two diary collections are structurally parallel; implementing
//! [`Collection`] is what lets one engine drive both. No data flows between
//! the two instantiations.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{
    EatLaterDraft, EatLaterEntry, EatLaterRow, RestaurantLog, RestaurantLogDraft, RestaurantLogRow,
};

/// Binds a remote collection name to its wire row and domain types.
pub trait Collection: Send + Sync + 'static {
    /// Collection name as persisted in the store.
    const NAME: &'static str;

    /// Raw row shape read from the store.
    type Row: DeserializeOwned + Send;
    /// Application-facing record shape.
    type Entity: Clone + Send + Sync + 'static;
    /// Fields submitted on create and update.
    type Draft: Clone + Send + Sync + 'static;

    /// Maps a decoded wire row into the domain shape.
    fn entity(row: Self::Row) -> Self::Entity;

    /// Builds the owner-scoped wire payload for an insert.
    fn insert_payload(owner: &str, draft: &Self::Draft) -> Value;

    /// Builds the wire patch for an update. Never carries ownership.
    fn update_patch(draft: &Self::Draft) -> Value;
}

/// The visited-restaurant collection.
pub struct RestaurantLogs;

impl Collection for RestaurantLogs {
    const NAME: &'static str = "restaurant_logs";

    type Row = RestaurantLogRow;
    type Entity = RestaurantLog;
    type Draft = RestaurantLogDraft;

    fn entity(row: Self::Row) -> Self::Entity {
        row.into()
    }

    fn insert_payload(owner: &str, draft: &Self::Draft) -> Value {
        draft.insert_payload(owner)
    }

    fn update_patch(draft: &Self::Draft) -> Value {
        draft.update_patch()
    }
}

/// The want-to-try collection.
pub struct EatLater;

impl Collection for EatLater {
    const NAME: &'static str = "eat_later";

    type Row = EatLaterRow;
    type Entity = EatLaterEntry;
    type Draft = EatLaterDraft;

    fn entity(row: Self::Row) -> Self::Entity {
        row.into()
    }

    fn insert_payload(owner: &str, draft: &Self::Draft) -> Value {
        draft.insert_payload(owner)
    }

    fn update_patch(draft: &Self::Draft) -> Value {
        draft.update_patch()
    }
}
