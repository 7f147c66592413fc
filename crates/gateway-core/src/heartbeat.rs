//! Heartbeat Monitor (C5).
//!
//! A single periodic task, safe to run on every node since its operations
//! are idempotent. Each sweep evicts connections whose `last_heartbeat` has
//! fallen behind the cutoff; the registry write always happens before the
//! `status_changed` event is published, so a crash between the two can only
//! under-publish, never announce an eviction that didn't happen.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use gateway_protocol::GatewayError;
use gateway_registry::ConnectionRegistry;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sink for the `agents.<tenant>.event.status_changed` notification; kept
/// separate from `BackboneBridge` so the monitor can be unit tested without
/// a real NATS connection.
pub trait PresenceSink: Send + Sync {
    fn publish_status_changed(
        &self,
        tenant_id: &str,
        principal_id: &str,
        online: bool,
        reason: &str,
    ) -> BoxFuture<'_, Result<(), GatewayError>>;
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time before epoch")
        .as_secs() as i64
}

pub struct HeartbeatMonitor {
    registry: Arc<dyn ConnectionRegistry>,
    presence: Arc<dyn PresenceSink>,
    node_id: String,
    cleanup_interval: Duration,
    heartbeat_timeout_secs: i64,
    registry_deadline: Duration,
    online: DashMap<String, bool>,
}

impl HeartbeatMonitor {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        presence: Arc<dyn PresenceSink>,
        node_id: String,
        cleanup_interval: Duration,
        heartbeat_timeout_secs: u64,
        registry_deadline: Duration,
    ) -> Self {
        Self {
            registry,
            presence,
            node_id,
            cleanup_interval,
            heartbeat_timeout_secs: heartbeat_timeout_secs as i64,
            registry_deadline,
            online: DashMap::new(),
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cleanup_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                tracing::warn!(error = %e, "heartbeat sweep failed");
            }
        }
    }

    pub async fn sweep(&self) -> Result<(), GatewayError> {
        let cutoff = now_epoch() - self.heartbeat_timeout_secs;
        let connections = gateway_registry::with_deadline(
            self.registry.query_node(&self.node_id),
            self.registry_deadline,
        )
        .await?;
        for conn in connections {
            if conn.last_heartbeat < cutoff {
                gateway_registry::with_deadline(
                    self.registry.unregister(&conn.principal_id),
                    self.registry_deadline,
                )
                .await?;
                if conn.principal_type == gateway_registry::PrincipalType::Agent {
                    self.online.insert(conn.principal_id.clone(), false);
                    self.presence
                        .publish_status_changed(
                            &conn.tenant_id,
                            &conn.principal_id,
                            false,
                            "heartbeat_timeout",
                        )
                        .await?;
                }
                gateway_telemetry::metrics::HEARTBEAT_EVICTIONS_TOTAL.inc();
                tracing::info!(principal_id = %conn.principal_id, tenant_id = %conn.tenant_id, "evicted stale connection");
            }
        }
        Ok(())
    }

    /// Marks `principal_id` online without emitting an event; called once on
    /// admission, before any heartbeat has been observed.
    pub fn mark_online(&self, principal_id: &str) {
        self.online.insert(principal_id.to_string(), true);
    }

    /// Records an inbound heartbeat frame. Returns whether the registry row
    /// still existed; if the principal had been marked offline, emits the
    /// symmetric online transition before returning.
    pub async fn record_heartbeat(
        &self,
        principal_id: &str,
        tenant_id: &str,
    ) -> Result<bool, GatewayError> {
        let existed = gateway_registry::with_deadline(
            self.registry.heartbeat(principal_id),
            self.registry_deadline,
        )
        .await?;
        if existed {
            let was_online = self
                .online
                .insert(principal_id.to_string(), true)
                .unwrap_or(false);
            if !was_online {
                self.presence
                    .publish_status_changed(tenant_id, principal_id, true, "heartbeat_received")
                    .await?;
            }
        }
        Ok(existed)
    }

    /// Marks `principal_id` offline and emits the event directly; used by
    /// the connection manager on an orderly socket close, where the
    /// registry row has already been removed by the caller.
    pub async fn mark_offline(
        &self,
        tenant_id: &str,
        principal_id: &str,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.online.insert(principal_id.to_string(), false);
        self.presence
            .publish_status_changed(tenant_id, principal_id, false, reason)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_registry::{InMemoryRegistry, PrincipalType};

    struct RecordingSink {
        events: DashMap<String, Vec<(bool, String)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                events: DashMap::new(),
            }
        }
    }

    impl PresenceSink for RecordingSink {
        fn publish_status_changed(
            &self,
            _tenant_id: &str,
            principal_id: &str,
            online: bool,
            reason: &str,
        ) -> BoxFuture<'_, Result<(), GatewayError>> {
            self.events
                .entry(principal_id.to_string())
                .or_default()
                .push((online, reason.to_string()));
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn sweep_evicts_stale_connections_and_emits_offline_once() {
        let registry = Arc::new(InMemoryRegistry::new(3600));
        registry.freeze_clock_at(0);
        registry
            .register("A1", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();

        let presence = Arc::new(RecordingSink::new());
        let monitor = HeartbeatMonitor::new(
            registry.clone(),
            presence.clone(),
            "N1".into(),
            Duration::from_secs(60),
            90,
            Duration::from_secs(10),
        );
        monitor.mark_online("A1");

        registry.freeze_clock_at(1_000_000);
        monitor.sweep().await.unwrap();

        assert!(registry.lookup("A1").await.unwrap().is_none());
        let events = presence.events.get("A1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], (false, "heartbeat_timeout".to_string()));
    }

    #[tokio::test]
    async fn fresh_connections_are_not_evicted() {
        let registry = Arc::new(InMemoryRegistry::new(3600));
        registry
            .register("A1", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();

        let presence = Arc::new(RecordingSink::new());
        let monitor = HeartbeatMonitor::new(
            registry.clone(),
            presence,
            "N1".into(),
            Duration::from_secs(60),
            90,
            Duration::from_secs(10),
        );
        monitor.sweep().await.unwrap();

        assert!(registry.lookup("A1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn heartbeat_after_eviction_emits_online_transition() {
        let registry = Arc::new(InMemoryRegistry::new(3600));
        registry.freeze_clock_at(0);
        registry
            .register("A1", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        let presence = Arc::new(RecordingSink::new());
        let monitor = HeartbeatMonitor::new(
            registry.clone(),
            presence.clone(),
            "N1".into(),
            Duration::from_secs(60),
            90,
            Duration::from_secs(10),
        );
        monitor.mark_online("A1");

        registry.freeze_clock_at(1_000_000);
        monitor.sweep().await.unwrap();

        // Principal reconnects and is re-registered by the connection manager...
        registry
            .register("A1", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        // ...and its first heartbeat observes the prior offline mark.
        monitor.record_heartbeat("A1", "T1").await.unwrap();

        let events = presence.events.get("A1").unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[1].0);
    }
}
