//! `InMemoryRegistry` — single-node connection registry.
//!
//! `dashmap`/`parking_lot`-backed for lock-free reads under concurrent
//! access. Used in unit tests and single-node deployments where a Redis
//! backend would be overkill.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::{DashMap, DashSet};

use crate::error::RegistryResult;
use crate::registry::ConnectionRegistry;
use crate::types::{ConnectionRecord, PrincipalType, SubscriptionRecord};

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time before epoch")
        .as_secs() as i64
}

pub struct InMemoryRegistry {
    connection_ttl_secs: i64,
    connections: DashMap<String, ConnectionRecord>,
    by_tenant: DashMap<String, DashSet<String>>,
    /// subject -> principal_id -> record
    subscriptions: DashMap<String, DashMap<String, SubscriptionRecord>>,
    /// principal_id -> subjects, the reverse index `unregister` cascades over.
    subjects_by_principal: DashMap<String, DashSet<String>>,
    /// monotonic clock stub for tests that need to freeze time; `None` uses
    /// wall-clock `now_epoch`.
    clock_override: AtomicI64,
    use_clock_override: std::sync::atomic::AtomicBool,
}

impl InMemoryRegistry {
    pub fn new(connection_ttl_secs: u64) -> Self {
        Self {
            connection_ttl_secs: connection_ttl_secs as i64,
            connections: DashMap::new(),
            by_tenant: DashMap::new(),
            subscriptions: DashMap::new(),
            subjects_by_principal: DashMap::new(),
            clock_override: AtomicI64::new(0),
            use_clock_override: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn now(&self) -> i64 {
        if self.use_clock_override.load(Ordering::Relaxed) {
            self.clock_override.load(Ordering::Relaxed)
        } else {
            now_epoch()
        }
    }

    /// Test-only: pin the registry's clock so heartbeat/TTL tests are
    /// deterministic instead of racing the wall clock. Not `cfg(test)`-gated
    /// since callers in other crates' test builds need it too.
    pub fn freeze_clock_at(&self, epoch: i64) {
        self.clock_override.store(epoch, Ordering::Relaxed);
        self.use_clock_override.store(true, Ordering::Relaxed);
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new(gateway_protocol::constants::DEFAULT_CONNECTION_TTL_SECS)
    }
}

impl ConnectionRegistry for InMemoryRegistry {
    fn register<'a>(
        &'a self,
        principal_id: &str,
        principal_type: PrincipalType,
        tenant_id: &str,
        node_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = RegistryResult<()>> + Send + 'a>> {
        let principal_id = principal_id.to_string();
        let tenant_id = tenant_id.to_string();
        let node_id = node_id.to_string();
        Box::pin(async move {
            let now = self.now();
            let record = ConnectionRecord {
                principal_id: principal_id.clone(),
                principal_type,
                tenant_id: tenant_id.clone(),
                node_id,
                connected_at: now,
                last_heartbeat: now,
                ttl_epoch: now + self.connection_ttl_secs,
            };
            self.connections.insert(principal_id.clone(), record);
            self.by_tenant
                .entry(tenant_id)
                .or_default()
                .insert(principal_id);
            Ok(())
        })
    }

    fn heartbeat<'a>(
        &'a self,
        principal_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = RegistryResult<bool>> + Send + 'a>>
    {
        let principal_id = principal_id.to_string();
        Box::pin(async move {
            let now = self.now();
            // Conditional: only extend TTL if the row still exists, so a
            // heartbeat can never resurrect an already-unregistered key.
            match self.connections.get_mut(&principal_id) {
                Some(mut entry) => {
                    entry.last_heartbeat = now;
                    entry.ttl_epoch = now + self.connection_ttl_secs;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn unregister<'a>(
        &'a self,
        principal_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = RegistryResult<()>> + Send + 'a>> {
        let principal_id = principal_id.to_string();
        Box::pin(async move {
            if let Some((_, record)) = self.connections.remove(&principal_id) {
                if let Some(set) = self.by_tenant.get(&record.tenant_id) {
                    set.remove(&principal_id);
                }
            }
            if let Some((_, subjects)) = self.subjects_by_principal.remove(&principal_id) {
                for subject in subjects.iter() {
                    if let Some(subs) = self.subscriptions.get(subject.key()) {
                        subs.remove(&principal_id);
                    }
                }
            }
            Ok(())
        })
    }

    fn add_sub<'a>(
        &'a self,
        principal_id: &str,
        subject: &str,
        node_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = RegistryResult<()>> + Send + 'a>> {
        let principal_id = principal_id.to_string();
        let subject = subject.to_string();
        let node_id = node_id.to_string();
        Box::pin(async move {
            let now = self.now();
            let record = SubscriptionRecord {
                subject: subject.clone(),
                principal_id: principal_id.clone(),
                node_id,
                subscribed_at: now,
                ttl_epoch: now + self.connection_ttl_secs,
            };
            self.subscriptions
                .entry(subject.clone())
                .or_default()
                .insert(principal_id.clone(), record);
            self.subjects_by_principal
                .entry(principal_id)
                .or_default()
                .insert(subject);
            Ok(())
        })
    }

    fn remove_sub<'a>(
        &'a self,
        principal_id: &str,
        subject: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = RegistryResult<()>> + Send + 'a>> {
        let principal_id = principal_id.to_string();
        let subject = subject.to_string();
        Box::pin(async move {
            if let Some(subs) = self.subscriptions.get(&subject) {
                subs.remove(&principal_id);
            }
            if let Some(subjects) = self.subjects_by_principal.get(&principal_id) {
                subjects.remove(&subject);
            }
            Ok(())
        })
    }

    fn lookup<'a>(
        &'a self,
        principal_id: &str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = RegistryResult<Option<ConnectionRecord>>> + Send + 'a>,
    > {
        let principal_id = principal_id.to_string();
        Box::pin(async move { Ok(self.connections.get(&principal_id).map(|r| r.clone())) })
    }

    fn query_tenant<'a>(
        &'a self,
        tenant_id: &str,
        principal_type: Option<PrincipalType>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = RegistryResult<Vec<ConnectionRecord>>> + Send + 'a>,
    > {
        let tenant_id = tenant_id.to_string();
        Box::pin(async move {
            let Some(ids) = self.by_tenant.get(&tenant_id) else {
                return Ok(vec![]);
            };
            let records = ids
                .iter()
                .filter_map(|id| self.connections.get(id.key()).map(|r| r.clone()))
                .filter(|r| {
                    principal_type
                        .map(|t| t == r.principal_type)
                        .unwrap_or(true)
                })
                .collect();
            Ok(records)
        })
    }

    fn query_subject<'a>(
        &'a self,
        subject: &str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = RegistryResult<Vec<SubscriptionRecord>>> + Send + 'a>,
    > {
        let subject = subject.to_string();
        Box::pin(async move {
            let Some(subs) = self.subscriptions.get(&subject) else {
                return Ok(vec![]);
            };
            Ok(subs.iter().map(|e| e.value().clone()).collect())
        })
    }

    fn query_node<'a>(
        &'a self,
        node_id: &str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = RegistryResult<Vec<ConnectionRecord>>> + Send + 'a>,
    > {
        let node_id = node_id.to_string();
        Box::pin(async move {
            Ok(self
                .connections
                .iter()
                .filter(|e| e.node_id == node_id)
                .map(|e| e.value().clone())
                .collect())
        })
    }

    fn subscriptions_for<'a>(
        &'a self,
        principal_id: &str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = RegistryResult<Vec<SubscriptionRecord>>> + Send + 'a>,
    > {
        let principal_id = principal_id.to_string();
        Box::pin(async move {
            let Some(subjects) = self.subjects_by_principal.get(&principal_id) else {
                return Ok(vec![]);
            };
            let records = subjects
                .iter()
                .filter_map(|subject| {
                    self.subscriptions
                        .get(subject.key())
                        .and_then(|m| m.get(&principal_id).map(|r| r.clone()))
                })
                .collect();
            Ok(records)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_lookup_round_trips() {
        let registry = InMemoryRegistry::new(3600);
        registry
            .register("A1", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        let record = registry.lookup("A1").await.unwrap().unwrap();
        assert_eq!(record.node_id, "N1");
        assert_eq!(record.tenant_id, "T1");
    }

    #[tokio::test]
    async fn heartbeat_does_not_resurrect_unregistered_key() {
        let registry = InMemoryRegistry::new(3600);
        let existed = registry.heartbeat("ghost").await.unwrap();
        assert!(!existed);
        assert!(registry.lookup("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn heartbeat_extends_ttl_for_existing_row() {
        let registry = InMemoryRegistry::new(3600);
        registry.freeze_clock_at(1_000_000);
        registry
            .register("A1", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        let before = registry.lookup("A1").await.unwrap().unwrap();
        registry.freeze_clock_at(1_000_100);
        let existed = registry.heartbeat("A1").await.unwrap();
        assert!(existed);
        let after = registry.lookup("A1").await.unwrap().unwrap();
        assert!(after.last_heartbeat > before.last_heartbeat);
        assert!(after.ttl_epoch > before.ttl_epoch);
    }

    #[tokio::test]
    async fn unregister_cascades_subscriptions() {
        let registry = InMemoryRegistry::new(3600);
        registry
            .register("A1", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        registry
            .add_sub("A1", "tenant.T1.channel.chat", "N1")
            .await
            .unwrap();
        registry.unregister("A1").await.unwrap();
        assert!(registry.lookup("A1").await.unwrap().is_none());
        assert!(registry
            .query_subject("tenant.T1.channel.chat")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn query_tenant_filters_by_principal_type() {
        let registry = InMemoryRegistry::new(3600);
        registry
            .register("A1", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        registry
            .register("D1", PrincipalType::Dashboard, "T1", "N1")
            .await
            .unwrap();
        let agents = registry
            .query_tenant("T1", Some(PrincipalType::Agent))
            .await
            .unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].principal_id, "A1");
    }

    #[tokio::test]
    async fn subscriptions_for_supports_resubscribe_preseeding() {
        let registry = InMemoryRegistry::new(3600);
        registry
            .register("A1", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        registry
            .add_sub("A1", "tenant.T1.channel.chat", "N1")
            .await
            .unwrap();
        registry
            .add_sub("A1", "agents.T1.heartbeat", "N1")
            .await
            .unwrap();
        let subs = registry.subscriptions_for("A1").await.unwrap();
        assert_eq!(subs.len(), 2);
    }

    #[tokio::test]
    async fn query_subject_reflects_fan_out_membership() {
        let registry = InMemoryRegistry::new(3600);
        registry
            .register("A1", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        registry
            .register("A2", PrincipalType::Agent, "T1", "N2")
            .await
            .unwrap();
        registry
            .add_sub("A1", "tenant.T1.channel.chat", "N1")
            .await
            .unwrap();
        registry
            .add_sub("A2", "tenant.T1.channel.chat", "N2")
            .await
            .unwrap();
        let subs = registry
            .query_subject("tenant.T1.channel.chat")
            .await
            .unwrap();
        assert_eq!(subs.len(), 2);
    }
}
