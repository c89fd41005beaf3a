//! Wire protocol for the change-feed WebSocket.
//!
//! Messages are JSON text frames. The client opens the socket, sends
//! `subscribe` per collection, and waits for the matching `subscribed`
//! acknowledgement before treating the feed as live. The server then pushes
//! `change` frames for every insert/update/delete on the owner's rows.

use serde::{Deserialize, Serialize};

use super::ChangeKind;

/// Message types for the change-feed protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedMessage {
    /// Sent by the client to open an owner-scoped feed for a collection.
    Subscribe { collection: String, owner: String },
    /// Server acknowledgement that the feed is live.
    Subscribed { collection: String },
    /// A row changed in the subscribed collection.
    Change {
        collection: String,
        event: ChangeKind,
        /// Row id when known; delete events may omit it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Error from the server.
    Error { message: String },
    /// Sent by the client before disconnecting.
    Leave { collection: String },
}

impl FeedMessage {
    /// Encode message as a JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode message from a JSON text frame.
    pub fn decode(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}
