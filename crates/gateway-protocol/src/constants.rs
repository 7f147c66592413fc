//! Protocol-level defaults shared across the registry, heartbeat monitor
//! and connection manager.

/// Default connection record TTL (`register`'s `ttl = now + connection_ttl`).
pub const DEFAULT_CONNECTION_TTL_SECS: u64 = 24 * 60 * 60;

/// Default Heartbeat Monitor sweep interval.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Default staleness cutoff: `now - heartbeat_timeout`.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 90;

/// Maximum lifetime of an agent login challenge.
pub const MAX_CHALLENGE_TTL_SECS: u64 = 5 * 60;

/// Default deadline for a backbone publish before it is surfaced as an error.
pub const DEFAULT_PUBLISH_DEADLINE_SECS: u64 = 5;

/// Default deadline for a registry write before it is surfaced as an error.
pub const DEFAULT_REGISTRY_DEADLINE_SECS: u64 = 10;

/// How long a fetched JWKS document is cached before being refetched.
pub const JWKS_CACHE_TTL_SECS: u64 = 60 * 60;

/// Fixed backoff the backbone bridge waits between reconnect attempts.
pub const BACKBONE_RECONNECT_BACKOFF_SECS: u64 = 2;
