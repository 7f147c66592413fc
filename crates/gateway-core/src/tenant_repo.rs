//! HTTP-backed `TenantDirectory` — the concrete client for the external
//! tenant-and-quota lookup contract the out-of-scope CRUD plane exposes.
//!
//! Owns a pooled HTTP client and does its own JSON parsing rather than
//! holding a database connection, since the tenant plane lives in a
//! separate service entirely.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::tenant::{Tenant, TenantDirectory, TenantError};

pub struct HttpTenantDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTenantDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl TenantDirectory for HttpTenantDirectory {
    fn lookup(
        &self,
        tenant_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Tenant, TenantError>> + Send + '_>> {
        let tenant_id = tenant_id.to_string();
        Box::pin(async move {
            let url = format!("{}/tenants/{}", self.base_url, tenant_id);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| TenantError::Unavailable(e.to_string()))?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(TenantError::NotFound(tenant_id));
            }
            if !response.status().is_success() {
                return Err(TenantError::Unavailable(format!(
                    "tenant directory returned {}",
                    response.status()
                )));
            }

            response
                .json::<Tenant>()
                .await
                .map_err(|e| TenantError::Unavailable(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::{TenantLimits, TenantStatus, TenantTier};

    /// In-memory double for unit tests that do not need a real HTTP server.
    pub struct StaticTenantDirectory(pub Tenant);

    impl TenantDirectory for StaticTenantDirectory {
        fn lookup(
            &self,
            tenant_id: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Tenant, TenantError>> + Send + '_>> {
            let tenant_id = tenant_id.to_string();
            let tenant = self.0.clone();
            Box::pin(async move {
                if tenant.id == tenant_id {
                    Ok(tenant)
                } else {
                    Err(TenantError::NotFound(tenant_id))
                }
            })
        }
    }

    #[tokio::test]
    async fn static_directory_resolves_known_tenant() {
        let directory = StaticTenantDirectory(Tenant {
            id: "T1".into(),
            name: "Acme".into(),
            tier: TenantTier::Pro,
            status: TenantStatus::Active,
            limits: TenantLimits::for_tier(TenantTier::Pro),
        });
        let tenant = directory.lookup("T1").await.unwrap();
        assert_eq!(tenant.name, "Acme");
    }

    #[tokio::test]
    async fn static_directory_reports_not_found() {
        let directory = StaticTenantDirectory(Tenant {
            id: "T1".into(),
            name: "Acme".into(),
            tier: TenantTier::Pro,
            status: TenantStatus::Active,
            limits: TenantLimits::for_tier(TenantTier::Pro),
        });
        assert!(matches!(
            directory.lookup("T2").await,
            Err(TenantError::NotFound(_))
        ));
    }
}
