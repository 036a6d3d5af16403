//! Nostr client wrapper

use crate::error::{FrontierError, Result};
use crate::protocol::UnsignedEnvelope;
use nostr_sdk::prelude::*;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Nostr client for world operations
pub struct NostrClient {
    client: Client,
    relays: Vec<String>,
    connected: Arc<RwLock<bool>>,
    public_key: String,
}

impl NostrClient {
    /// Create a new NostrClient with generated keys
    pub async fn new(relays: Vec<String>) -> Result<Self> {
        let keys = Keys::generate();
        let public_key = keys.public_key().to_hex();
        let client = Client::new(keys);

        Ok(Self {
            client,
            relays,
            connected: Arc::new(RwLock::new(false)),
            public_key,
        })
    }

    /// Create a new NostrClient with provided secret key
    pub async fn with_secret_key(secret_key: &str, relays: Vec<String>) -> Result<Self> {
        let keys = Keys::parse(secret_key).map_err(|e| FrontierError::Nostr(e.to_string()))?;
        let public_key = keys.public_key().to_hex();
        let client = Client::new(keys);

        Ok(Self {
            client,
            relays,
            connected: Arc::new(RwLock::new(false)),
            public_key,
        })
    }

    /// Get the public key
    pub fn public_key(&self) -> String {
        self.public_key.clone()
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Connect to relays
    pub async fn connect(&self) -> Result<()> {
        for relay in &self.relays {
            if let Err(e) = self.client.add_relay(relay).await {
                warn!("Failed to add relay {}: {}", relay, e);
            }
        }

        self.client.connect().await;
        *self.connected.write().await = true;
        debug!("Connected to relays");
        Ok(())
    }

    /// Disconnect from relays
    pub async fn disconnect(&self) -> Result<()> {
        let _ = self.client.disconnect().await;
        *self.connected.write().await = false;
        debug!("Disconnected from relays");
        Ok(())
    }

    /// Get relay connection status
    pub async fn relay_status(&self) -> Vec<(String, bool)> {
        let mut status = Vec::new();
        for relay in self.client.relays().await.values() {
            status.push((relay.url().to_string(), relay.is_connected()));
        }
        status
    }

    /// Check if at least one relay is connected
    pub async fn has_connected_relay(&self) -> bool {
        for relay in self.client.relays().await.values() {
            if relay.is_connected() {
                return true;
            }
        }
        false
    }

    /// Sign and publish an encoded envelope. Failures surface as
    /// [`FrontierError::Publish`]; this layer never retries.
    pub async fn publish(&self, envelope: UnsignedEnvelope) -> Result<EventId> {
        let builder =
            EventBuilder::new(Kind::Custom(envelope.kind), envelope.content).tags(envelope.tags);

        let output = self
            .client
            .send_event_builder(builder)
            .await
            .map_err(|e| FrontierError::Publish(e.to_string()))?;

        debug!("Published kind {} event: {}", envelope.kind, output.id());
        Ok(*output.id())
    }

    /// Fetch stored events matching the filters (backfill).
    pub async fn fetch_stored(
        &self,
        filters: Vec<Filter>,
        timeout: std::time::Duration,
    ) -> Result<Vec<Event>> {
        let events = self
            .client
            .fetch_events(filters, timeout)
            .await
            .map_err(|e| FrontierError::Nostr(e.to_string()))?;

        Ok(events.into_iter().collect())
    }

    /// Subscribe with the given filters, invoking `on_event` for every
    /// delivered event and `on_end_of_stored` once per relay when the
    /// stored backlog has been replayed.
    pub async fn subscribe<F, E>(
        &self,
        filters: Vec<Filter>,
        on_event: F,
        on_end_of_stored: E,
    ) -> Result<SubscriptionId>
    where
        F: Fn(Event) + Send + Sync + 'static,
        E: Fn() + Send + Sync + 'static,
    {
        let output = self
            .client
            .subscribe(filters, None)
            .await
            .map_err(|e| FrontierError::Nostr(e.to_string()))?;

        let sub_id = output.id().clone();

        // Handle notifications in background
        let client = self.client.clone();
        let on_event = Arc::new(on_event);
        let on_end_of_stored = Arc::new(on_end_of_stored);

        tokio::spawn(async move {
            let mut notifications = client.notifications();
            while let Ok(notification) = notifications.recv().await {
                match notification {
                    RelayPoolNotification::Event { event, .. } => {
                        on_event(*event);
                    }
                    RelayPoolNotification::Message { message, .. } => {
                        if let RelayMessage::EndOfStoredEvents(_) = message {
                            on_end_of_stored();
                        }
                    }
                    _ => {}
                }
            }
        });

        debug!("Subscribed: {}", sub_id);
        Ok(sub_id)
    }

    /// Replace the filters of an existing subscription. Used when the
    /// visible-region set changes.
    pub async fn resubscribe(&self, sub_id: &SubscriptionId, filters: Vec<Filter>) -> Result<()> {
        self.client
            .subscribe_with_id(sub_id.clone(), filters, None)
            .await
            .map_err(|e| FrontierError::Nostr(e.to_string()))?;
        debug!("Updated subscription: {}", sub_id);
        Ok(())
    }

    /// Unsubscribe from a subscription
    pub async fn unsubscribe(&self, sub_id: SubscriptionId) -> Result<()> {
        self.client.unsubscribe(sub_id).await;
        Ok(())
    }
}
