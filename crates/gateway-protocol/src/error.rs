//! Unified error taxonomy for the gateway.
//!
//! Every fallible boundary in the workspace returns `GatewayError`. Each
//! variant carries a stable string code via `.code()`, and a `.close_code()`
//! mapping onto the WebSocket close codes of the connection manager's
//! policy.

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Bad signature, bad token, expired credential.
    #[error("AUTH-001 AuthFailure: {reason}")]
    AuthFailure { reason: String },

    /// Tenant missing, suspended or expired.
    #[error("TENANT-001 TenantInactive: {tenant_id} ({reason})")]
    TenantInactive { tenant_id: String, reason: String },

    /// A quota admission check failed.
    #[error("QUOTA-001 QuotaExceeded: {kind} {current}/{limit}, resets in {reset_in_s}s")]
    QuotaExceeded {
        kind: String,
        current: u64,
        limit: u64,
        reset_in_s: u64,
    },

    /// Cross-tenant or malformed subject.
    #[error("SUBJECT-001 ForbiddenSubject: {subject}")]
    ForbiddenSubject { subject: String },

    /// Backbone disconnected or a publish/subscribe call timed out.
    #[error("BRIDGE-001 BridgeUnavailable: {reason}")]
    BridgeUnavailable { reason: String },

    /// The connection registry is unreachable.
    #[error("REGISTRY-001 RegistryUnavailable: {reason}")]
    RegistryUnavailable { reason: String },

    /// Malformed JSON, missing `type`, or an unrecognized frame shape.
    #[error("PROTO-001 ProtocolError: {reason}")]
    ProtocolError { reason: String },

    /// Any uncaught condition.
    #[error("INT-001 Internal: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable string code, independent of the `Display` message.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AuthFailure { .. } => "AUTH-001",
            GatewayError::TenantInactive { .. } => "TENANT-001",
            GatewayError::QuotaExceeded { .. } => "QUOTA-001",
            GatewayError::ForbiddenSubject { .. } => "SUBJECT-001",
            GatewayError::BridgeUnavailable { .. } => "BRIDGE-001",
            GatewayError::RegistryUnavailable { .. } => "REGISTRY-001",
            GatewayError::ProtocolError { .. } => "PROTO-001",
            GatewayError::Internal(_) => "INT-001",
        }
    }

    /// The `code` field sent in a `{type:"error"}` frame.
    pub fn frame_code(&self) -> &'static str {
        match self {
            GatewayError::AuthFailure { .. } => "auth_failure",
            GatewayError::TenantInactive { .. } => "tenant_inactive",
            GatewayError::QuotaExceeded { .. } => "quota_exceeded",
            GatewayError::ForbiddenSubject { .. } => "forbidden_subject",
            GatewayError::BridgeUnavailable { .. } => "bridge_unavailable",
            GatewayError::RegistryUnavailable { .. } => "registry_unavailable",
            GatewayError::ProtocolError { .. } => "protocol_error",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Whether this error is fatal to the connection, and if so with which
    /// WebSocket close code: 1008 for policy violations, 1011 for internal
    /// failures.
    ///
    /// `QuotaExceeded` is fatal only when it denies a `connection` kind
    /// admission; per-message quota rejections stay open and are
    /// represented by the caller sending an `error` frame instead of
    /// calling this path.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            GatewayError::AuthFailure { .. } => Some(1008),
            GatewayError::TenantInactive { .. } => Some(1008),
            GatewayError::RegistryUnavailable { .. } => Some(1011),
            GatewayError::Internal(_) => Some(1011),
            GatewayError::ForbiddenSubject { .. } => None,
            GatewayError::BridgeUnavailable { .. } => None,
            GatewayError::ProtocolError { .. } => None,
            GatewayError::QuotaExceeded { kind, .. } if kind == "connection" => Some(1008),
            GatewayError::QuotaExceeded { .. } => None,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::ProtocolError {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_tenant_errors_close_with_policy_violation() {
        assert_eq!(
            GatewayError::AuthFailure { reason: "x".into() }.close_code(),
            Some(1008)
        );
        assert_eq!(
            GatewayError::TenantInactive {
                tenant_id: "t".into(),
                reason: "suspended".into()
            }
            .close_code(),
            Some(1008)
        );
    }

    #[test]
    fn registry_unavailable_is_internal_close() {
        assert_eq!(
            GatewayError::RegistryUnavailable { reason: "x".into() }.close_code(),
            Some(1011)
        );
    }

    #[test]
    fn connection_kind_quota_exceeded_closes_with_policy_violation() {
        assert_eq!(
            GatewayError::QuotaExceeded {
                kind: "connection".into(),
                current: 11,
                limit: 10,
                reset_in_s: 0
            }
            .close_code(),
            Some(1008)
        );
    }

    #[test]
    fn non_fatal_errors_have_no_close_code() {
        assert_eq!(
            GatewayError::ForbiddenSubject {
                subject: "x".into()
            }
            .close_code(),
            None
        );
        assert_eq!(
            GatewayError::QuotaExceeded {
                kind: "message".into(),
                current: 1001,
                limit: 1000,
                reset_in_s: 3600
            }
            .close_code(),
            None
        );
    }

    #[test]
    fn frame_code_matches_wire_vocabulary() {
        assert_eq!(
            GatewayError::ForbiddenSubject {
                subject: "x".into()
            }
            .frame_code(),
            "forbidden_subject"
        );
        assert_eq!(
            GatewayError::QuotaExceeded {
                kind: "message".into(),
                current: 1,
                limit: 1,
                reset_in_s: 1
            }
            .frame_code(),
            "quota_exceeded"
        );
    }
}
