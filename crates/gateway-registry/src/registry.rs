//! `ConnectionRegistry` — the Connection Registry's (C4) narrow API.
//!
//! Trait-behind-impl: callers depend on this trait, never on a concrete
//! backend, so the in-memory and Redis implementations are interchangeable
//! in tests and in single- vs multi-node deployments.

use std::future::Future;
use std::pin::Pin;

use crate::error::RegistryResult;
use crate::types::{ConnectionRecord, PrincipalType, SubscriptionRecord};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ConnectionRegistry: Send + Sync {
    /// Upsert with `ttl = now + connection_ttl`; also writes the
    /// `by_tenant` mirror row.
    fn register(
        &self,
        principal_id: &str,
        principal_type: PrincipalType,
        tenant_id: &str,
        node_id: &str,
    ) -> BoxFuture<'_, RegistryResult<()>>;

    /// Updates `last_heartbeat` and extends TTL. Conditional on the row
    /// still existing — must not resurrect a previously unregistered key.
    /// Returns whether the row existed.
    fn heartbeat(&self, principal_id: &str) -> BoxFuture<'_, RegistryResult<bool>>;

    /// Deletes the connection row, its `by_tenant` mirror, and every
    /// `subscriptions` row for this principal.
    fn unregister(&self, principal_id: &str) -> BoxFuture<'_, RegistryResult<()>>;

    fn add_sub(
        &self,
        principal_id: &str,
        subject: &str,
        node_id: &str,
    ) -> BoxFuture<'_, RegistryResult<()>>;

    fn remove_sub(&self, principal_id: &str, subject: &str) -> BoxFuture<'_, RegistryResult<()>>;

    /// Single-row lookup; callers rely on this agreeing with the live
    /// socket set on every node.
    fn lookup(&self, principal_id: &str)
        -> BoxFuture<'_, RegistryResult<Option<ConnectionRecord>>>;

    fn query_tenant(
        &self,
        tenant_id: &str,
        principal_type: Option<PrincipalType>,
    ) -> BoxFuture<'_, RegistryResult<Vec<ConnectionRecord>>>;

    fn query_subject(
        &self,
        subject: &str,
    ) -> BoxFuture<'_, RegistryResult<Vec<SubscriptionRecord>>>;

    fn query_node(&self, node_id: &str) -> BoxFuture<'_, RegistryResult<Vec<ConnectionRecord>>>;

    /// Every subscription a principal held, used to pre-seed subscriptions
    /// on reconnect.
    fn subscriptions_for(
        &self,
        principal_id: &str,
    ) -> BoxFuture<'_, RegistryResult<Vec<SubscriptionRecord>>>;
}
