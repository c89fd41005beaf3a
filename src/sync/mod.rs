//! Owner-scoped collection synchronization.
//!
//! Two structurally identical units keep the diary collections converged
//! with the store, one per collection:
//!
//! - [`CollectionSync`] is the per-owner engine: owner-scoped fetch,
//!   change-feed listener, and optimistic-free create/update/delete. The
//!   local collection is always replaced wholesale by a fresh fetch, never
//!   patched incrementally; racing fetches resolve to the newest completed
//!   one.
//! - [`SessionSync`] binds an engine to the authenticated identity,
//!   re-deriving all state whenever the owner changes and tearing the old
//!   scope down so nothing stale leaks across identities.
//!
//! The [`Collection`] trait carries the per-collection differences (name,
//! wire row, domain types, mappers); [`RestaurantLogs`] and [`EatLater`] are
//! its two instantiations.

mod collection;
mod engine;
mod session;

pub use collection::{Collection, EatLater, RestaurantLogs};
pub use engine::{CollectionState, CollectionSync};
pub use session::{owner_channel, SessionSync};
