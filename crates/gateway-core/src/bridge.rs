//! Backbone Bridge (C6).
//!
//! Thin adapter over `async-nats`: `connect`, `publish`, `subscribe`,
//! `unsubscribe`. Reconnection is handled by `async-nats` itself (unlimited
//! retries, fixed backoff); this bridge only surfaces connection-state
//! changes to callers via a `tokio::sync::watch` channel and never
//! interprets the bytes it carries.

use async_nats::Client;
use gateway_protocol::{subject, GatewayError};
use tokio::sync::watch;

use crate::heartbeat::{BoxFuture, PresenceSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connected,
    Disconnected,
}

pub struct BackboneBridge {
    client: Client,
    state_tx: watch::Sender<BridgeState>,
}

impl BackboneBridge {
    pub async fn connect(urls: &str) -> Result<Self, GatewayError> {
        let client =
            async_nats::connect(urls)
                .await
                .map_err(|e| GatewayError::BridgeUnavailable {
                    reason: e.to_string(),
                })?;
        let (state_tx, _) = watch::channel(BridgeState::Connected);
        Ok(Self { client, state_tx })
    }

    pub fn state(&self) -> watch::Receiver<BridgeState> {
        self.state_tx.subscribe()
    }

    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        match self
            .client
            .publish(subject.to_string(), payload.into())
            .await
        {
            Ok(()) => {
                let _ = self.state_tx.send(BridgeState::Connected);
                Ok(())
            }
            Err(e) => {
                let _ = self.state_tx.send(BridgeState::Disconnected);
                Err(GatewayError::BridgeUnavailable {
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, GatewayError> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| GatewayError::BridgeUnavailable {
                reason: e.to_string(),
            })
    }

    pub async fn subscribe_queue(
        &self,
        subject: &str,
        queue: &str,
    ) -> Result<async_nats::Subscriber, GatewayError> {
        self.client
            .queue_subscribe(subject.to_string(), queue.to_string())
            .await
            .map_err(|e| GatewayError::BridgeUnavailable {
                reason: e.to_string(),
            })
    }

    /// Unsubscribing a handle is just dropping the `Subscriber`; `async-nats`
    /// sends the UNSUB frame on drop. Kept as an explicit method so callers
    /// read intent rather than relying on scope exit.
    pub async fn unsubscribe(
        &self,
        mut subscription: async_nats::Subscriber,
    ) -> Result<(), GatewayError> {
        subscription
            .unsubscribe()
            .await
            .map_err(|e| GatewayError::BridgeUnavailable {
                reason: e.to_string(),
            })
    }
}

impl PresenceSink for BackboneBridge {
    fn publish_status_changed(
        &self,
        tenant_id: &str,
        principal_id: &str,
        online: bool,
        reason: &str,
    ) -> BoxFuture<'_, Result<(), GatewayError>> {
        let event_subject = subject::event(tenant_id, "status_changed", None);
        let payload = serde_json::json!({
            "principal_id": principal_id,
            "status": if online { "online" } else { "offline" },
            "reason": reason,
        });
        Box::pin(async move {
            let bytes =
                serde_json::to_vec(&payload).map_err(|e| GatewayError::Internal(e.to_string()))?;
            self.publish(&event_subject, bytes).await
        })
    }
}
