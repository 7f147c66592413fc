//! `RedisRegistry` — cross-node connection registry.
//!
//! Grounded in `websocket_connection_service.py`'s `pk`/`sk` key design
//! (`CONN#<id>` / `TENANT#<tenant>` / `SUB#<topic>` rows), adapted from
//! DynamoDB items with a `ttl` attribute to Redis hashes and sets with
//! `PEXPIRE`-driven TTLs. Redis was already present in the example pack's
//! own dependency stack (used for queues/caches by other services in the
//! corpus), so it is the cross-node store here rather than re-deriving a
//! DynamoDB client from scratch.

use std::collections::HashMap;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{RegistryError, RegistryResult};
use crate::registry::ConnectionRegistry;
use crate::types::{ConnectionRecord, PrincipalType, SubscriptionRecord};

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time before epoch")
        .as_secs() as i64
}

fn conn_key(principal_id: &str) -> String {
    format!("conn:{principal_id}")
}

fn tenant_key(tenant_id: &str) -> String {
    format!("tenant:{tenant_id}:conns")
}

fn node_key(node_id: &str) -> String {
    format!("node:{node_id}:conns")
}

fn sub_key(subject: &str) -> String {
    format!("sub:{subject}")
}

fn principal_subs_key(principal_id: &str) -> String {
    format!("principal:{principal_id}:subs")
}

/// `sub:<subject>` hashes store one field per subscribed principal; the
/// field value packs `node_id`, `subscribed_at` and `ttl_epoch` together so
/// a read back doesn't have to fabricate the latter two from "now".
fn encode_sub_value(node_id: &str, subscribed_at: i64, ttl_epoch: i64) -> String {
    format!("{node_id}|{subscribed_at}|{ttl_epoch}")
}

fn decode_sub_value(value: &str) -> Option<(String, i64, i64)> {
    let mut parts = value.splitn(3, '|');
    let node_id = parts.next()?.to_string();
    let subscribed_at = parts.next()?.parse().ok()?;
    let ttl_epoch = parts.next()?.parse().ok()?;
    Some((node_id, subscribed_at, ttl_epoch))
}

pub struct RedisRegistry {
    manager: ConnectionManager,
    connection_ttl_secs: u64,
}

impl RedisRegistry {
    pub async fn connect(url: &str, connection_ttl_secs: u64) -> RegistryResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        Ok(Self {
            manager,
            connection_ttl_secs,
        })
    }

    fn record_from_hash(
        principal_id: &str,
        fields: HashMap<String, String>,
    ) -> Option<ConnectionRecord> {
        let principal_type = match fields.get("principal_type")?.as_str() {
            "agent" => PrincipalType::Agent,
            "dashboard" => PrincipalType::Dashboard,
            _ => return None,
        };
        Some(ConnectionRecord {
            principal_id: principal_id.to_string(),
            principal_type,
            tenant_id: fields.get("tenant_id")?.clone(),
            node_id: fields.get("node_id")?.clone(),
            connected_at: fields.get("connected_at")?.parse().ok()?,
            last_heartbeat: fields.get("last_heartbeat")?.parse().ok()?,
            ttl_epoch: fields.get("ttl_epoch")?.parse().ok()?,
        })
    }
}

impl ConnectionRegistry for RedisRegistry {
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
        let type_str = match principal_type {
            PrincipalType::Agent => "agent",
            PrincipalType::Dashboard => "dashboard",
        };
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let now = now_epoch();
            let ttl_epoch = now + self.connection_ttl_secs as i64;
            let key = conn_key(&principal_id);

            let () = redis::pipe()
                .hset(&key, "principal_type", type_str)
                .ignore()
                .hset(&key, "tenant_id", &tenant_id)
                .ignore()
                .hset(&key, "node_id", &node_id)
                .ignore()
                .hset(&key, "connected_at", now)
                .ignore()
                .hset(&key, "last_heartbeat", now)
                .ignore()
                .hset(&key, "ttl_epoch", ttl_epoch)
                .ignore()
                .expire(&key, self.connection_ttl_secs as i64)
                .ignore()
                .sadd(tenant_key(&tenant_id), &principal_id)
                .ignore()
                .expire(tenant_key(&tenant_id), self.connection_ttl_secs as i64)
                .ignore()
                .sadd(node_key(&node_id), &principal_id)
                .ignore()
                .expire(node_key(&node_id), self.connection_ttl_secs as i64)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
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
            let mut conn = self.manager.clone();
            let key = conn_key(&principal_id);
            let fields: HashMap<String, String> = conn
                .hgetall(&key)
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
            let Some(record) = Self::record_from_hash(&principal_id, fields) else {
                return Ok(false);
            };
            let now = now_epoch();
            let ttl_epoch = now + self.connection_ttl_secs as i64;
            let () = redis::pipe()
                .hset(&key, "last_heartbeat", now)
                .ignore()
                .hset(&key, "ttl_epoch", ttl_epoch)
                .ignore()
                .expire(&key, self.connection_ttl_secs as i64)
                .ignore()
                .expire(
                    tenant_key(&record.tenant_id),
                    self.connection_ttl_secs as i64,
                )
                .ignore()
                .expire(node_key(&record.node_id), self.connection_ttl_secs as i64)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
            Ok(true)
        })
    }

    fn unregister<'a>(
        &'a self,
        principal_id: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = RegistryResult<()>> + Send + 'a>> {
        let principal_id = principal_id.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let key = conn_key(&principal_id);
            let fields: HashMap<String, String> = conn
                .hgetall(&key)
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

            if let Some(record) = Self::record_from_hash(&principal_id, fields) {
                let subjects: Vec<String> = conn
                    .smembers(principal_subs_key(&principal_id))
                    .await
                    .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

                let mut pipe = redis::pipe();
                pipe.del(&key)
                    .ignore()
                    .srem(tenant_key(&record.tenant_id), &principal_id)
                    .ignore()
                    .srem(node_key(&record.node_id), &principal_id)
                    .ignore()
                    .del(principal_subs_key(&principal_id))
                    .ignore();
                for subject in &subjects {
                    pipe.hdel(sub_key(subject), &principal_id).ignore();
                }
                let () = pipe
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
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
            let mut conn = self.manager.clone();
            let now = now_epoch();
            let ttl_epoch = now + self.connection_ttl_secs as i64;
            let value = encode_sub_value(&node_id, now, ttl_epoch);
            let () = redis::pipe()
                .hset(sub_key(&subject), &principal_id, &value)
                .ignore()
                .expire(sub_key(&subject), self.connection_ttl_secs as i64)
                .ignore()
                .sadd(principal_subs_key(&principal_id), &subject)
                .ignore()
                .expire(
                    principal_subs_key(&principal_id),
                    self.connection_ttl_secs as i64,
                )
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
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
            let mut conn = self.manager.clone();
            let () = redis::pipe()
                .hdel(sub_key(&subject), &principal_id)
                .ignore()
                .srem(principal_subs_key(&principal_id), &subject)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
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
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let fields: HashMap<String, String> = conn
                .hgetall(conn_key(&principal_id))
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
            Ok(Self::record_from_hash(&principal_id, fields))
        })
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
            let mut conn = self.manager.clone();
            let ids: Vec<String> = conn
                .smembers(tenant_key(&tenant_id))
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                let fields: HashMap<String, String> = conn
                    .hgetall(conn_key(&id))
                    .await
                    .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
                if let Some(record) = Self::record_from_hash(&id, fields) {
                    if principal_type
                        .map(|t| t == record.principal_type)
                        .unwrap_or(true)
                    {
                        records.push(record);
                    }
                }
            }
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
            let mut conn = self.manager.clone();
            let entries: HashMap<String, String> = conn
                .hgetall(sub_key(&subject))
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
            Ok(entries
                .into_iter()
                .filter_map(|(principal_id, value)| {
                    let (node_id, subscribed_at, ttl_epoch) = decode_sub_value(&value)?;
                    Some(SubscriptionRecord {
                        subject: subject.clone(),
                        principal_id,
                        node_id,
                        subscribed_at,
                        ttl_epoch,
                    })
                })
                .collect())
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
            let mut conn = self.manager.clone();
            let ids: Vec<String> = conn
                .smembers(node_key(&node_id))
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                let fields: HashMap<String, String> = conn
                    .hgetall(conn_key(&id))
                    .await
                    .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
                if let Some(record) = Self::record_from_hash(&id, fields) {
                    records.push(record);
                }
            }
            Ok(records)
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
            let mut conn = self.manager.clone();
            let subjects: Vec<String> = conn
                .smembers(principal_subs_key(&principal_id))
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
            let mut records = Vec::with_capacity(subjects.len());
            for subject in subjects {
                let value: Option<String> = conn
                    .hget(sub_key(&subject), &principal_id)
                    .await
                    .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
                if let Some((node_id, subscribed_at, ttl_epoch)) =
                    value.as_deref().and_then(decode_sub_value)
                {
                    records.push(SubscriptionRecord {
                        subject,
                        principal_id: principal_id.clone(),
                        node_id,
                        subscribed_at,
                        ttl_epoch,
                    });
                }
            }
            Ok(records)
        })
    }
}

/// Timeout wrapper applied by callers at the registry-write deadline,
/// e.g. `with_deadline(registry.heartbeat(id), deadline).await`.
pub async fn with_deadline<T>(
    fut: impl std::future::Future<Output = RegistryResult<T>>,
    deadline: Duration,
) -> RegistryResult<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RegistryError::Timeout(deadline.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn real_registry() -> RedisRegistry {
        let url = std::env::var("GATEWAY_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        RedisRegistry::connect(&url, 3600)
            .await
            .expect("redis reachable")
    }

    #[tokio::test]
    #[ignore = "requires a real Redis instance at GATEWAY_TEST_REDIS_URL"]
    async fn register_then_lookup_round_trips_against_real_redis() {
        let registry = real_registry().await;
        registry
            .register("A1-redis-test", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        let record = registry.lookup("A1-redis-test").await.unwrap().unwrap();
        assert_eq!(record.node_id, "N1");
        registry.unregister("A1-redis-test").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a real Redis instance at GATEWAY_TEST_REDIS_URL"]
    async fn unregister_cascades_subscriptions_against_real_redis() {
        let registry = real_registry().await;
        registry
            .register("A2-redis-test", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        registry
            .add_sub("A2-redis-test", "tenant.T1.channel.chat", "N1")
            .await
            .unwrap();
        registry.unregister("A2-redis-test").await.unwrap();
        let subs = registry
            .query_subject("tenant.T1.channel.chat")
            .await
            .unwrap();
        assert!(subs.iter().all(|s| s.principal_id != "A2-redis-test"));
    }

    #[tokio::test]
    #[ignore = "requires a real Redis instance at GATEWAY_TEST_REDIS_URL"]
    async fn add_sub_persists_real_subscribed_at_and_ttl_epoch() {
        let registry = real_registry().await;
        registry
            .register("A3-redis-test", PrincipalType::Agent, "T1", "N1")
            .await
            .unwrap();
        let before = now_epoch();
        registry
            .add_sub("A3-redis-test", "tenant.T1.channel.chat", "N1")
            .await
            .unwrap();
        let after = now_epoch();

        let via_subject = registry
            .query_subject("tenant.T1.channel.chat")
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.principal_id == "A3-redis-test")
            .unwrap();
        let via_principal = registry
            .subscriptions_for("A3-redis-test")
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.subject == "tenant.T1.channel.chat")
            .unwrap();

        for record in [&via_subject, &via_principal] {
            assert!(record.subscribed_at >= before && record.subscribed_at <= after);
            assert_eq!(record.ttl_epoch, record.subscribed_at + 3600);
        }

        registry.unregister("A3-redis-test").await.unwrap();
    }

    #[test]
    fn sub_value_round_trips_through_encode_and_decode() {
        let encoded = encode_sub_value("N1", 1_000, 4_600);
        let (node_id, subscribed_at, ttl_epoch) = decode_sub_value(&encoded).unwrap();
        assert_eq!(node_id, "N1");
        assert_eq!(subscribed_at, 1_000);
        assert_eq!(ttl_epoch, 4_600);
    }

    #[test]
    fn sub_value_decode_rejects_malformed_input() {
        assert!(decode_sub_value("just-a-node-id").is_none());
    }
}
