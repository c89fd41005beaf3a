//! HTTP + WebSocket client for the Platelog sync service.
//!
//! Data operations go over HTTP with Bearer authentication; the change feed
//! is a WebSocket subscription per collection and owner (JSON frames, see
//! [`FeedMessage`]).

use std::sync::Mutex;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use async_trait::async_trait;

use super::feed::FeedMessage;
use super::{ChangeEvent, RemoteStore, StoreError, Subscription};
use crate::config::Config;

/// Timeout for the subscribe acknowledgement.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for the reachability probe.
const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Response from the /me endpoint.
#[derive(Debug, Clone, Deserialize)]
struct MeResponse {
    user_id: String,
}

/// Acknowledgement for update/delete calls.
#[derive(Debug, Clone, Deserialize)]
struct MutationAck {
    affected: u64,
}

/// Remote store backed by the Platelog sync service.
///
/// One instance is shared by both synchronization units; every call carries
/// the owner scope explicitly.
#[derive(Debug)]
pub struct HttpStore {
    server_url: String,
    api_key: String,
    http: reqwest::Client,
    /// Cached identity from the /me endpoint
    identity: Mutex<Option<String>>,
}

impl HttpStore {
    /// Creates a new store client with explicit parameters.
    pub fn new(server_url: String, api_key: String) -> Self {
        Self {
            server_url,
            api_key,
            http: reqwest::Client::new(),
            identity: Mutex::new(None),
        }
    }

    /// Creates a store client from configuration.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        match (&config.server_url, &config.api_key) {
            (Some(url), Some(key)) => Ok(Self::new(url.clone(), key.clone())),
            _ => Err(StoreError::NotConfigured),
        }
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Fetches the authenticated owner id from the /me endpoint.
    ///
    /// Results are cached for subsequent calls.
    pub async fn fetch_identity(&self) -> Result<String, StoreError> {
        if let Some(user_id) = self.identity.lock().unwrap().clone() {
            return Ok(user_id);
        }

        let url = self.build_http_url("/me");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;
        let response = check_status(response)?;

        let me: MeResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        *self.identity.lock().unwrap() = Some(me.user_id.clone());
        Ok(me.user_id)
    }

    /// Builds the WebSocket URL for the change-feed endpoint.
    fn build_ws_url(&self) -> String {
        // Convert http(s) to ws(s) if needed
        let base_url = if self.server_url.starts_with("http://") {
            self.server_url.replace("http://", "ws://")
        } else if self.server_url.starts_with("https://") {
            self.server_url.replace("https://", "wss://")
        } else if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            format!("ws://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!("{}/feed?key={}", base_url.trim_end_matches('/'), self.api_key)
    }

    /// Builds an HTTP URL for a given path.
    fn build_http_url(&self, path: &str) -> String {
        // Convert ws(s) to http(s) if needed
        let base_url = if self.server_url.starts_with("ws://") {
            self.server_url.replace("ws://", "http://")
        } else if self.server_url.starts_with("wss://") {
            self.server_url.replace("wss://", "https://")
        } else if !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            format!("http://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    fn collection_url(&self, collection: &str) -> String {
        self.build_http_url(&format!("/db/{}", collection))
    }

    fn row_url(&self, collection: &str, id: &str) -> String {
        self.build_http_url(&format!("/db/{}/{}", collection, id))
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    if !response.status().is_success() {
        return Err(StoreError::Http(format!(
            "server returned status {}",
            response.status()
        )));
    }
    Ok(response)
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn query(&self, collection: &str, owner: &str) -> Result<Vec<Value>, StoreError> {
        let response = self
            .http
            .get(self.collection_url(collection))
            .query(&[("owner", owner), ("order", "created_at.desc")])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;
        let response = check_status(response)?;

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn insert(&self, collection: &str, row: Value) -> Result<(), StoreError> {
        let response = self
            .http
            .post(self.collection_url(collection))
            .bearer_auth(&self.api_key)
            .json(&row)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;
        check_status(response)?;
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        owner: &str,
        patch: Value,
    ) -> Result<u64, StoreError> {
        let response = self
            .http
            .patch(self.row_url(collection, id))
            .query(&[("owner", owner)])
            .bearer_auth(&self.api_key)
            .json(&patch)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;
        let response = check_status(response)?;

        let ack: MutationAck = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(ack.affected)
    }

    async fn delete(&self, collection: &str, id: &str, owner: &str) -> Result<u64, StoreError> {
        let response = self
            .http
            .delete(self.row_url(collection, id))
            .query(&[("owner", owner)])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;
        let response = check_status(response)?;

        let ack: MutationAck = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(ack.affected)
    }

    async fn subscribe(&self, collection: &str, owner: &str) -> Result<Subscription, StoreError> {
        let ws_url = self.build_ws_url();
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let (mut sender, mut receiver) = ws_stream.split();

        let subscribe_msg = FeedMessage::Subscribe {
            collection: collection.to_string(),
            owner: owner.to_string(),
        };
        let encoded = subscribe_msg
            .encode()
            .map_err(|e| StoreError::Subscribe(e.to_string()))?;
        sender
            .send(Message::Text(encoded.into()))
            .await
            .map_err(|e| StoreError::WebSocket(e.to_string()))?;

        // Wait for the subscribed acknowledgement with a timeout.
        let ack = timeout(SUBSCRIBE_TIMEOUT, async {
            while let Some(msg_result) = receiver.next().await {
                match msg_result {
                    Ok(Message::Text(data)) => {
                        let msg = FeedMessage::decode(data.as_str())
                            .map_err(|e| StoreError::Subscribe(e.to_string()))?;

                        match msg {
                            FeedMessage::Subscribed { collection: c } if c == collection => {
                                return Ok(());
                            }
                            FeedMessage::Error { message } => {
                                return Err(StoreError::Subscribe(message));
                            }
                            // Changes cannot arrive before the ack; skip
                            // anything else.
                            _ => {}
                        }
                    }
                    Ok(Message::Close(_)) => {
                        return Err(StoreError::Subscribe(
                            "server closed connection during subscribe".to_string(),
                        ));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(StoreError::WebSocket(e.to_string()));
                    }
                }
            }
            Err(StoreError::Subscribe(
                "connection closed before subscribe completed".to_string(),
            ))
        })
        .await;

        match ack {
            Ok(result) => result?,
            Err(_) => return Err(StoreError::SubscribeTimeout),
        }

        let (tx, rx) = mpsc::channel::<ChangeEvent>(16);
        let collection_name = collection.to_string();

        // Feed loop: forward change frames until the subscription is dropped
        // or the server goes away.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = receiver.next() => match msg {
                        Some(Ok(Message::Text(data))) => {
                            let msg = match FeedMessage::decode(data.as_str()) {
                                Ok(msg) => msg,
                                Err(e) => {
                                    tracing::warn!("undecodable feed frame: {}", e);
                                    continue;
                                }
                            };

                            match msg {
                                FeedMessage::Change { collection, event, id }
                                    if collection == collection_name =>
                                {
                                    if tx.send(ChangeEvent { kind: event, id }).await.is_err() {
                                        break;
                                    }
                                }
                                FeedMessage::Error { message } => {
                                    tracing::warn!(
                                        collection = %collection_name,
                                        "feed error from server: {}",
                                        message
                                    );
                                    break;
                                }
                                _ => {}
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sender.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(
                                collection = %collection_name,
                                "feed connection error: {}",
                                e
                            );
                            break;
                        }
                    },
                    _ = tx.closed() => {
                        // Subscription dropped; leave the channel gracefully.
                        let leave = FeedMessage::Leave {
                            collection: collection_name.clone(),
                        };
                        if let Ok(encoded) = leave.encode() {
                            let _ = sender.send(Message::Text(encoded.into())).await;
                        }
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}

/// Checks whether the sync service is reachable.
pub async fn check_server(server_url: &str) -> bool {
    let url = format!("{}/health", server_url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    match client.get(&url).timeout(CHECK_TIMEOUT).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ws_url() {
        let store = HttpStore::new("ws://localhost:8080".to_string(), "test-key".to_string());
        assert_eq!(store.build_ws_url(), "ws://localhost:8080/feed?key=test-key");

        let store = HttpStore::new("http://localhost:8080".to_string(), "test-key".to_string());
        assert_eq!(store.build_ws_url(), "ws://localhost:8080/feed?key=test-key");

        let store = HttpStore::new("https://sync.example.com".to_string(), "test-key".to_string());
        assert_eq!(
            store.build_ws_url(),
            "wss://sync.example.com/feed?key=test-key"
        );

        let store = HttpStore::new("localhost:8080".to_string(), "test-key".to_string());
        assert_eq!(store.build_ws_url(), "ws://localhost:8080/feed?key=test-key");
    }

    #[test]
    fn test_build_http_url() {
        let store = HttpStore::new("http://localhost:8080".to_string(), "test-key".to_string());
        assert_eq!(store.build_http_url("/me"), "http://localhost:8080/me");

        let store = HttpStore::new("ws://localhost:8080".to_string(), "test-key".to_string());
        assert_eq!(store.build_http_url("/me"), "http://localhost:8080/me");

        let store = HttpStore::new("wss://sync.example.com".to_string(), "test-key".to_string());
        assert_eq!(store.build_http_url("/me"), "https://sync.example.com/me");
    }

    #[test]
    fn test_collection_urls() {
        let store = HttpStore::new("http://localhost:8080".to_string(), "k".to_string());
        assert_eq!(
            store.collection_url("restaurant_logs"),
            "http://localhost:8080/db/restaurant_logs"
        );
        assert_eq!(
            store.row_url("eat_later", "e1"),
            "http://localhost:8080/db/eat_later/e1"
        );
    }

    #[test]
    fn test_from_config_requires_url_and_key() {
        let config = Config::default();
        assert!(matches!(
            HttpStore::from_config(&config),
            Err(StoreError::NotConfigured)
        ));

        let config = Config {
            server_url: Some("http://localhost:8080".to_string()),
            api_key: Some("k".to_string()),
        };
        assert!(HttpStore::from_config(&config).is_ok());
    }
}
