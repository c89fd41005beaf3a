use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// A restaurant visit that was logged (vs `EatLaterEntry` which is only planned).
///
/// `id` and `created_at` are assigned by the store and immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantLog {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    /// 0-5, half-star granularity by convention. Not enforced at this layer.
    pub rating: f32,
    pub date_visited: NaiveDate,
    pub review: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields submitted when creating or editing a log.
///
/// Callers must reject blank trimmed names before submitting; this layer
/// does not re-validate.
#[derive(Debug, Clone, PartialEq)]
pub struct RestaurantLogDraft {
    pub name: String,
    pub location: Option<String>,
    pub rating: f32,
    pub date_visited: NaiveDate,
    pub review: Option<String>,
    pub tags: Vec<String>,
}

impl RestaurantLogDraft {
    pub fn new(name: impl Into<String>, rating: f32, date_visited: NaiveDate) -> Self {
        Self {
            name: name.into(),
            location: None,
            rating,
            date_visited,
            review: None,
            tags: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_review(mut self, review: impl Into<String>) -> Self {
        self.review = Some(review.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Wire payload for inserts. The store assigns `id` and `created_at`.
    pub fn insert_payload(&self, owner: &str) -> Value {
        json!({
            "user_id": owner,
            "name": self.name,
            "location": self.location,
            "rating": self.rating,
            "date_visited": self.date_visited,
            "review": self.review,
            "tags": self.tags,
        })
    }

    /// Wire payload for updates. Ownership never changes through an update,
    /// so `user_id` is not part of the patch.
    pub fn update_patch(&self) -> Value {
        json!({
            "name": self.name,
            "location": self.location,
            "rating": self.rating,
            "date_visited": self.date_visited,
            "review": self.review,
            "tags": self.tags,
        })
    }
}

/// Raw row shape as persisted in the `restaurant_logs` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantLogRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub location: Option<String>,
    #[serde(deserialize_with = "deserialize_rating")]
    pub rating: f32,
    pub date_visited: NaiveDate,
    pub review: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl From<RestaurantLogRow> for RestaurantLog {
    fn from(row: RestaurantLogRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            location: row.location,
            rating: row.rating,
            date_visited: row.date_visited,
            review: row.review,
            tags: row.tags.unwrap_or_default(),
            created_at: row.created_at,
        }
    }
}

/// Accepts a number or a numeric string; numeric columns can come back as
/// text depending on the store's driver. Rejects anything that does not
/// parse to a finite number.
pub(crate) fn deserialize_rating<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawRating {
        Number(f64),
        Text(String),
    }

    let value = match RawRating::deserialize(deserializer)? {
        RawRating::Number(n) => n,
        RawRating::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid rating: {:?}", s)))?,
    };

    if !value.is_finite() {
        return Err(serde::de::Error::custom("rating is not a finite number"));
    }

    Ok(value as f32)
}

impl fmt::Display for RestaurantLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/5)", self.name, self.rating)?;
        if let Some(location) = &self.location {
            write!(f, " - {}", location)?;
        }
        write!(f, " on {}", self.date_visited)
    }
}
