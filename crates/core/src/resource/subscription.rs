use crate::types::SubscriptionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Change notification for a subscribed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    pub subscription_id: SubscriptionId,
    pub uri: String,
    #[serde(default)]
    pub payload: Value,
}

pub type UpdateCallback = Arc<dyn Fn(ResourceUpdate) + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    server_id: String,
    resource_uri: String,
    callback: UpdateCallback,
}

/// Callbacks for resource subscriptions.
///
/// Delivering to an unknown or already removed subscription is a silent
/// no-op; updates can race an unsubscribe and that is not an error.
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(
        &self,
        subscription_id: SubscriptionId,
        server_id: impl Into<String>,
        resource_uri: impl Into<String>,
        callback: UpdateCallback,
    ) {
        let subscription = Subscription {
            server_id: server_id.into(),
            resource_uri: resource_uri.into(),
            callback,
        };
        tracing::debug!(
            subscription_id = %subscription_id,
            server_id = %subscription.server_id,
            uri = %subscription.resource_uri,
            "Subscribed to resource"
        );
        self.subscriptions
            .write()
            .await
            .insert(subscription_id, subscription);
    }

    /// Remove a subscription, returning its (server_id, uri)
    pub async fn remove(&self, subscription_id: &SubscriptionId) -> Option<(String, String)> {
        self.subscriptions
            .write()
            .await
            .remove(subscription_id)
            .map(|s| (s.server_id, s.resource_uri))
    }

    /// Deliver `payload` to the subscription's callback; `false` when nothing was listening
    pub async fn dispatch(&self, subscription_id: &SubscriptionId, payload: Value) -> bool {
        let subscription = self.subscriptions.read().await.get(subscription_id).cloned();
        let Some(subscription) = subscription else {
            tracing::debug!(subscription_id = %subscription_id, "Ignoring update for unknown subscription");
            return false;
        };

        (subscription.callback)(ResourceUpdate {
            subscription_id: subscription_id.clone(),
            uri: subscription.resource_uri,
            payload,
        });
        true
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.subscriptions.write().await.clear();
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
