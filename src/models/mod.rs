mod eat_later;
mod restaurant_log;

pub use eat_later::{EatLaterDraft, EatLaterEntry, EatLaterRow};
pub use restaurant_log::{RestaurantLog, RestaurantLogDraft, RestaurantLogRow};
