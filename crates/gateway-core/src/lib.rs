//! Connection-and-routing plane for the multi-tenant pub/sub gateway.
//!
//! Fronts a NATS-class subject bus with a WebSocket endpoint for two
//! client kinds: key-authenticated agents and token-authenticated
//! dashboards. Credential verification, tenant/quota admission, the
//! connection registry's local view, the heartbeat sweep, the backbone
//! bridge, and the subscription router are each a narrow module behind
//! a trait; the connection manager (`ws`) wires them together per socket.

pub mod bridge;
pub mod credentials;
pub mod heartbeat;
pub mod quota;
pub mod router;
pub mod server;
pub mod tenant;
pub mod tenant_repo;
pub mod ws;
