//! Registry-local error type; converts into `gateway_protocol::GatewayError`
//! at the call sites that surface it to a WebSocket client.

use gateway_protocol::GatewayError;
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error, Clone)]
pub enum RegistryError {
    #[error("registry backend unreachable: {0}")]
    Unavailable(String),

    #[error("registry write timed out after {0}s")]
    Timeout(u64),
}

impl From<RegistryError> for GatewayError {
    fn from(e: RegistryError) -> Self {
        GatewayError::RegistryUnavailable {
            reason: e.to_string(),
        }
    }
}
