//! Tenant/Quota Oracle (C3).
//!
//! Read-through cache over the injected `TenantDirectory`, `dashmap`-backed
//! for lock-free per-tenant counters. Per-minute and per-day usage
//! windows reset on wall-clock boundaries; connection-count admission
//! reads a live gauge supplied by the caller (the Connection Registry),
//! never its own counter, since C4 is the sole owner of that number.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use gateway_protocol::GatewayError;

use crate::tenant::{Tenant, TenantDirectory, TenantError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitKind {
    Connection,
    Channel,
    ApiCall,
    Message,
    Storage,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QuotaError {
    #[error("tenant error: {0}")]
    Tenant(#[from] TenantError),
    #[error(
        "quota exceeded: kind={kind:?} current={current} limit={limit} reset_in_s={reset_in_s}"
    )]
    Exceeded {
        kind: AdmitKind,
        current: u64,
        limit: u64,
        reset_in_s: u64,
    },
    #[error("tenant {0} is not active")]
    TenantInactive(String),
}

impl From<QuotaError> for GatewayError {
    fn from(e: QuotaError) -> Self {
        match e {
            QuotaError::Tenant(t) => GatewayError::TenantInactive {
                tenant_id: "unknown".into(),
                reason: t.to_string(),
            },
            QuotaError::Exceeded {
                kind,
                current,
                limit,
                reset_in_s,
            } => GatewayError::QuotaExceeded {
                kind: format!("{kind:?}").to_lowercase(),
                current,
                limit,
                reset_in_s,
            },
            QuotaError::TenantInactive(tenant_id) => GatewayError::TenantInactive {
                tenant_id,
                reason: "not active".into(),
            },
        }
    }
}

struct UsageWindow {
    api_calls_this_minute: AtomicU64,
    minute_started_at: AtomicU64,
    messages_today: AtomicU64,
    day_started_at: AtomicU64,
}

impl UsageWindow {
    fn new(now: u64) -> Self {
        Self {
            api_calls_this_minute: AtomicU64::new(0),
            minute_started_at: AtomicU64::new(minute_boundary(now)),
            messages_today: AtomicU64::new(0),
            day_started_at: AtomicU64::new(day_boundary(now)),
        }
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time before epoch")
        .as_secs()
}

fn minute_boundary(now: u64) -> u64 {
    now - (now % 60)
}

fn day_boundary(now: u64) -> u64 {
    now - (now % 86_400)
}

pub struct QuotaOracle {
    directory: std::sync::Arc<dyn TenantDirectory>,
    usage: DashMap<String, UsageWindow>,
}

impl QuotaOracle {
    pub fn new(directory: std::sync::Arc<dyn TenantDirectory>) -> Self {
        Self {
            directory,
            usage: DashMap::new(),
        }
    }

    pub async fn lookup(&self, tenant_id: &str) -> Result<Tenant, TenantError> {
        self.directory.lookup(tenant_id).await
    }

    /// `current_usage` supplies the live count for kinds the oracle does not
    /// track itself (`Connection`, from C4's gauge); ignored otherwise.
    pub async fn admit(
        &self,
        tenant_id: &str,
        kind: AdmitKind,
        current_usage: Option<u64>,
    ) -> Result<(), QuotaError> {
        let tenant = self.directory.lookup(tenant_id).await?;
        if !tenant.is_admittable() {
            return Err(QuotaError::TenantInactive(tenant_id.to_string()));
        }

        let now = now_epoch();
        let window = self
            .usage
            .entry(tenant_id.to_string())
            .or_insert_with(|| UsageWindow::new(now));
        self.roll_windows(&window, now);

        match kind {
            AdmitKind::Connection => {
                let current = current_usage.unwrap_or(0);
                let limit = tenant.limits.max_concurrent_connections;
                if current >= limit {
                    gateway_telemetry::metrics::QUOTA_REJECTIONS_TOTAL.inc();
                    return Err(QuotaError::Exceeded {
                        kind,
                        current,
                        limit,
                        reset_in_s: 0,
                    });
                }
            }
            AdmitKind::Channel => {
                let current = current_usage.unwrap_or(0);
                let limit = tenant.limits.max_channels;
                if current >= limit {
                    gateway_telemetry::metrics::QUOTA_REJECTIONS_TOTAL.inc();
                    return Err(QuotaError::Exceeded {
                        kind,
                        current,
                        limit,
                        reset_in_s: 0,
                    });
                }
            }
            AdmitKind::ApiCall => {
                let current = window.api_calls_this_minute.load(Ordering::Relaxed);
                let limit = tenant.limits.max_api_calls_per_minute;
                if current >= limit {
                    let reset_in_s = 60 - (now - window.minute_started_at.load(Ordering::Relaxed));
                    gateway_telemetry::metrics::QUOTA_REJECTIONS_TOTAL.inc();
                    return Err(QuotaError::Exceeded {
                        kind,
                        current,
                        limit,
                        reset_in_s,
                    });
                }
            }
            AdmitKind::Message => {
                let current = window.messages_today.load(Ordering::Relaxed);
                let limit = tenant.limits.max_messages_per_day;
                if current >= limit {
                    let reset_in_s = 86_400 - (now - window.day_started_at.load(Ordering::Relaxed));
                    gateway_telemetry::metrics::QUOTA_REJECTIONS_TOTAL.inc();
                    return Err(QuotaError::Exceeded {
                        kind,
                        current,
                        limit,
                        reset_in_s,
                    });
                }
            }
            AdmitKind::Storage => {
                // No live byte counter exists in this core; storage accounting
                // is owned entirely by the out-of-scope CRUD plane.
            }
        }
        Ok(())
    }

    /// Best-effort asynchronous counter update, called after a message or
    /// API call has already been admitted and delivered.
    pub fn account(&self, tenant_id: &str, kind: AdmitKind, delta: u64) {
        let now = now_epoch();
        let window = self
            .usage
            .entry(tenant_id.to_string())
            .or_insert_with(|| UsageWindow::new(now));
        self.roll_windows(&window, now);
        match kind {
            AdmitKind::ApiCall => {
                window
                    .api_calls_this_minute
                    .fetch_add(delta, Ordering::Relaxed);
            }
            AdmitKind::Message => {
                window.messages_today.fetch_add(delta, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn roll_windows(&self, window: &UsageWindow, now: u64) {
        let minute_start = minute_boundary(now);
        if window
            .minute_started_at
            .swap(minute_start, Ordering::Relaxed)
            != minute_start
        {
            window.api_calls_this_minute.store(0, Ordering::Relaxed);
        }
        let day_start = day_boundary(now);
        if window.day_started_at.swap(day_start, Ordering::Relaxed) != day_start {
            window.messages_today.store(0, Ordering::Relaxed);
        }
    }
}
