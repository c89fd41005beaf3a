use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A place the user intends to try. Structurally parallel to
/// `RestaurantLog` but the two collections share no identity: a name or tag
/// collision between them means nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EatLaterEntry {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields submitted when creating or editing an entry.
///
/// Same caller contract as `RestaurantLogDraft`: blank trimmed names are
/// rejected above this layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EatLaterDraft {
    pub name: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub tags: Vec<String>,
}

impl EatLaterDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
            notes: None,
            tags: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
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
            "notes": self.notes,
            "tags": self.tags,
        })
    }

    /// Wire payload for updates; `user_id` is never part of the patch.
    pub fn update_patch(&self) -> Value {
        json!({
            "name": self.name,
            "location": self.location,
            "notes": self.notes,
            "tags": self.tags,
        })
    }
}

/// Raw row shape as persisted in the `eat_later` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EatLaterRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl From<EatLaterRow> for EatLaterEntry {
    fn from(row: EatLaterRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            location: row.location,
            notes: row.notes,
            tags: row.tags.unwrap_or_default(),
            created_at: row.created_at,
        }
    }
}
