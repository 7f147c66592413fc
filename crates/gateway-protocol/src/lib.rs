//! Gateway Protocol
//!
//! Shared contract between every crate in the workspace: the Subject Namer
//! (C1), the WebSocket wire frame vocabulary, the unified error taxonomy,
//! and the protocol-level defaults that the rest of the gateway reads from
//! config rather than hardcoding.

pub mod constants;
pub mod error;
pub mod frame;
pub mod subject;

pub use error::{GatewayError, GatewayResult};
pub use frame::{ClientFrame, ServerFrame};
