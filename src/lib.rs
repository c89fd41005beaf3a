//! Platelog Core Library
//!
//! Client-side synchronization core for Platelog, a personal restaurant
//! visit diary. Keeps two owner-scoped collections - visited logs and
//! want-to-try entries - converged with a remote store via fetch, a
//! server-pushed change feed, and re-fetch-after-mutation.

pub mod config;
pub mod models;
pub mod store;
pub mod sync;

pub use config::{Config, ConfigError};
pub use models::{
    EatLaterDraft, EatLaterEntry, EatLaterRow, RestaurantLog, RestaurantLogDraft, RestaurantLogRow,
};
pub use store::{
    check_server, ChangeEvent, ChangeKind, HttpStore, MemoryStore, RemoteStore, StoreError,
    Subscription,
};
pub use sync::{
    owner_channel, Collection, CollectionState, CollectionSync, EatLater, RestaurantLogs,
    SessionSync,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
