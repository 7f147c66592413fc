//! Connection Registry
//!
//! Tracks which node holds each live agent/dashboard connection and which
//! subjects each principal is subscribed to, so that a publish landing on
//! any node can find every subscriber regardless of which node accepted
//! their socket. `InMemoryRegistry` backs single-node deployments and
//! tests; `RedisRegistry` backs multi-node deployments.

pub mod error;
pub mod in_memory;
pub mod redis_backend;
pub mod registry;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use in_memory::InMemoryRegistry;
pub use redis_backend::{with_deadline, RedisRegistry};
pub use registry::ConnectionRegistry;
pub use types::{ConnectionRecord, PrincipalType, SubscriptionRecord};
