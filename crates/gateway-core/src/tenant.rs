//! Tenant model and the external tenant-and-quota lookup contract.
//!
//! The core never writes tenants; they are created and owned by the
//! out-of-scope HTTP CRUD plane. `TenantDirectory` is the narrow read
//! interface the core consumes from that plane, a trait-behind-impl shape
//! so the HTTP-backed implementation and a test double are interchangeable.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantTier {
    Free,
    Pro,
    Enterprise,
}

/// Tenant lifecycle status. Only `Active` may be admitted (§3 invariant:
/// `status=active ∧ not expired` is required for any admit decision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Expired,
}

/// Concrete per-tenant limits, set by plan tier but overridable per tenant
/// by the owning CRUD plane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TenantLimits {
    pub max_agents: u64,
    pub max_channels: u64,
    pub max_concurrent_connections: u64,
    pub max_messages_per_day: u64,
    pub max_api_calls_per_minute: u64,
    pub max_storage_bytes: u64,
}

impl TenantLimits {
    pub fn for_tier(tier: TenantTier) -> Self {
        match tier {
            TenantTier::Free => Self {
                max_agents: 3,
                max_channels: 5,
                max_concurrent_connections: 10,
                max_messages_per_day: 1_000,
                max_api_calls_per_minute: 60,
                max_storage_bytes: 1024 * 1024 * 1024,
            },
            TenantTier::Pro => Self {
                max_agents: 50,
                max_channels: 100,
                max_concurrent_connections: 500,
                max_messages_per_day: 100_000,
                max_api_calls_per_minute: 600,
                max_storage_bytes: 50 * 1024 * 1024 * 1024,
            },
            TenantTier::Enterprise => Self {
                max_agents: 5_000,
                max_channels: 10_000,
                max_concurrent_connections: 50_000,
                max_messages_per_day: 10_000_000,
                max_api_calls_per_minute: 6_000,
                max_storage_bytes: 1024 * 1024 * 1024 * 1024,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub tier: TenantTier,
    pub status: TenantStatus,
    pub limits: TenantLimits,
}

impl Tenant {
    /// `status=active ∧ not expired` — the sole admission precondition.
    pub fn is_admittable(&self) -> bool {
        matches!(self.status, TenantStatus::Active)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TenantError {
    #[error("tenant not found: {0}")]
    NotFound(String),
    #[error("tenant directory unreachable: {0}")]
    Unavailable(String),
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The external tenant-and-quota lookup contract.
pub trait TenantDirectory: Send + Sync {
    fn lookup(&self, tenant_id: &str) -> BoxFuture<'_, Result<Tenant, TenantError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enterprise_limits_exceed_free_limits() {
        let free = TenantLimits::for_tier(TenantTier::Free);
        let ent = TenantLimits::for_tier(TenantTier::Enterprise);
        assert!(ent.max_agents > free.max_agents);
        assert!(ent.max_messages_per_day > free.max_messages_per_day);
    }

    #[test]
    fn only_active_tenants_are_admittable() {
        let mut tenant = Tenant {
            id: "T1".into(),
            name: "Acme".into(),
            tier: TenantTier::Free,
            status: TenantStatus::Active,
            limits: TenantLimits::for_tier(TenantTier::Free),
        };
        assert!(tenant.is_admittable());
        tenant.status = TenantStatus::Suspended;
        assert!(!tenant.is_admittable());
        tenant.status = TenantStatus::Expired;
        assert!(!tenant.is_admittable());
    }

    #[test]
    fn tenant_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TenantStatus::Active).unwrap(),
            "\"active\""
        );
    }
}
