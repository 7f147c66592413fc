//! Cross-module scenarios exercising the registry, router, quota oracle and
//! heartbeat monitor together, the way a single WebSocket connection's
//! lifecycle would drive them. None of these talk to a real NATS or Redis
//! backend.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use gateway_core::heartbeat::{BoxFuture, HeartbeatMonitor, PresenceSink};
use gateway_core::quota::{AdmitKind, QuotaOracle};
use gateway_core::router::SubscriptionRouter;
use gateway_core::tenant::{
    Tenant, TenantDirectory, TenantError, TenantLimits, TenantStatus, TenantTier,
};
use gateway_protocol::{subject, GatewayError, ServerFrame};
use gateway_registry::{ConnectionRegistry, InMemoryRegistry, PrincipalType};
use tokio::sync::mpsc;

struct FixedDirectory(Tenant);

impl TenantDirectory for FixedDirectory {
    fn lookup(
        &self,
        tenant_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Tenant, TenantError>> + Send + '_>> {
        let tenant = self.0.clone();
        let tenant_id = tenant_id.to_string();
        Box::pin(async move {
            if tenant.id == tenant_id {
                Ok(tenant)
            } else {
                Err(TenantError::NotFound(tenant_id))
            }
        })
    }
}

struct NullPresence;

impl PresenceSink for NullPresence {
    fn publish_status_changed(
        &self,
        _tenant_id: &str,
        _principal_id: &str,
        _online: bool,
        _reason: &str,
    ) -> BoxFuture<'_, Result<(), GatewayError>> {
        Box::pin(async { Ok(()) })
    }
}

fn active_tenant(limits: TenantLimits) -> Tenant {
    Tenant {
        id: "T1".into(),
        name: "Acme".into(),
        tier: TenantTier::Free,
        status: TenantStatus::Active,
        limits,
    }
}

/// Agent handshake: admission, registry row, an initial subscription, and a
/// published message reaching the local fan-out.
#[tokio::test]
async fn agent_handshake_then_subscribe_then_publish_fans_out_locally() {
    let registry = Arc::new(InMemoryRegistry::new(3600));
    let router = SubscriptionRouter::new();
    let quota = QuotaOracle::new(Arc::new(FixedDirectory(active_tenant(
        TenantLimits::for_tier(TenantTier::Free),
    ))));

    quota
        .admit("T1", AdmitKind::Connection, Some(0))
        .await
        .expect("connection admitted");
    registry
        .register("A1", PrincipalType::Agent, "T1", "N1")
        .await
        .unwrap();

    let chat = subject::channel("T1", "lobby");
    let (tx, mut rx) = mpsc::channel(8);
    assert!(router.add_local(&chat, "A1", tx));
    registry.add_sub("A1", &chat, "N1").await.unwrap();

    quota
        .admit("T1", AdmitKind::Message, None)
        .await
        .expect("message admitted");
    quota.account("T1", AdmitKind::Message, 1);

    let frame = ServerFrame::Message {
        subject: chat.clone(),
        data: serde_json::json!({"text": "hello"}),
        timestamp: "2026-07-31T00:00:00Z".into(),
    };
    router.fan_out(&chat, &frame);

    assert_eq!(rx.recv().await.unwrap(), frame);
    assert_eq!(registry.subscriptions_for("A1").await.unwrap().len(), 1);
}

/// A tenant's message quota is exhausted mid-session: the next publish must
/// be denied even though the connection itself is still admitted.
#[tokio::test]
async fn quota_exceeded_denies_publish_after_limit_reached() {
    let mut limits = TenantLimits::for_tier(TenantTier::Free);
    limits.max_messages_per_day = 1;
    let quota = QuotaOracle::new(Arc::new(FixedDirectory(active_tenant(limits))));

    quota
        .admit("T1", AdmitKind::Message, None)
        .await
        .expect("first message admitted");
    quota.account("T1", AdmitKind::Message, 1);

    let result = quota.admit("T1", AdmitKind::Message, None).await;
    assert!(
        result.is_err(),
        "second message should exceed the daily limit"
    );
}

/// A subject outside the caller's tenant must never reach the router or the
/// quota oracle; subject validation is the first gate in `handle_frame`.
#[test]
fn cross_tenant_publish_is_rejected_before_reaching_router() {
    let attempted = subject::channel("T2", "lobby");
    assert!(subject::validate(&attempted, "T1").is_err());
}

/// Heartbeat timeout eviction: a connection that stops sending heartbeats
/// is dropped from the registry and its last local subscription is closed.
#[tokio::test]
async fn heartbeat_timeout_evicts_connection_and_closes_its_last_subscription() {
    let registry = Arc::new(InMemoryRegistry::new(3600));
    registry.freeze_clock_at(0);
    registry
        .register("A1", PrincipalType::Agent, "T1", "N1")
        .await
        .unwrap();

    let router = SubscriptionRouter::new();
    let (tx, _rx) = mpsc::channel(8);
    let command = subject::command("T1", "A1");
    router.add_local(&command, "A1", tx);

    let monitor = HeartbeatMonitor::new(
        registry.clone(),
        Arc::new(NullPresence),
        "N1".into(),
        std::time::Duration::from_secs(60),
        90,
        std::time::Duration::from_secs(10),
    );
    monitor.mark_online("A1");

    registry.freeze_clock_at(1_000_000);
    monitor.sweep().await.unwrap();

    assert!(registry.lookup("A1").await.unwrap().is_none());
    let closed = router.remove_all_for_principal("A1");
    assert_eq!(closed, vec![command]);
}
