//! Record types owned by the Connection Registry.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalType {
    Agent,
    Dashboard,
}

/// Key: `principal_id`. One row per live (or pending-TTL-sweep) connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub principal_id: String,
    pub principal_type: PrincipalType,
    pub tenant_id: String,
    pub node_id: String,
    pub connected_at: i64,
    pub last_heartbeat: i64,
    pub ttl_epoch: i64,
}

/// Key: `(subject, principal_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub subject: String,
    pub principal_id: String,
    pub node_id: String,
    pub subscribed_at: i64,
    pub ttl_epoch: i64,
}
