//! Subject Namer
//!
//! Deterministic construction and validation of tenant-scoped backbone
//! subjects. Pure, synchronous, no I/O — every externally visible subject
//! shape is enumerated here and nowhere else.

use crate::error::GatewayError;

/// The three subject roots a tenant-scoped subject may begin with.
const ROOTS: [&str; 3] = ["tenant", "agents", "_presence"];

/// Validates that `subject` is scoped to `tenant_id`.
///
/// Ok iff the subject begins with `tenant.<tenant_id>.`, `agents.<tenant_id>.`
/// or `_presence.<tenant_id>.`. Every publish and subscribe operation must
/// pass this check before reaching the backbone.
pub fn validate(subject: &str, tenant_id: &str) -> Result<(), GatewayError> {
    for root in ROOTS {
        let prefix = format!("{root}.{tenant_id}.");
        if let Some(rest) = subject.strip_prefix(&prefix) {
            if !rest.is_empty() {
                return Ok(());
            }
        }
    }
    Err(GatewayError::ForbiddenSubject {
        subject: subject.to_string(),
    })
}

/// `tenant.<tenant_id>.channel.<channel_id>`
pub fn channel(tenant_id: &str, channel_id: &str) -> String {
    format!("tenant.{tenant_id}.channel.{channel_id}")
}

/// `tenant.<tenant_id>.agent.<agent_id>`
pub fn tenant_agent(tenant_id: &str, agent_id: &str) -> String {
    format!("tenant.{tenant_id}.agent.{agent_id}")
}

/// `agents.<tenant_id>.task.<capability>.<specificity>`
pub fn task(tenant_id: &str, capability: &str, specificity: &str) -> String {
    format!("agents.{tenant_id}.task.{capability}.{specificity}")
}

/// `agents.<tenant_id>.task.<capability>.>` — wildcard subscription a
/// dashboard or agent uses to cover every specificity under a capability.
pub fn task_wildcard(tenant_id: &str, capability: &str) -> String {
    format!("agents.{tenant_id}.task.{capability}.>")
}

/// `agents.<tenant_id>.result.<agent_id>.<task_type>`
pub fn result(tenant_id: &str, agent_id: &str, task_type: &str) -> String {
    format!("agents.{tenant_id}.result.{agent_id}.{task_type}")
}

/// `agents.<tenant_id>.event.<event_type>[.<specificity>]`
pub fn event(tenant_id: &str, event_type: &str, specificity: Option<&str>) -> String {
    match specificity {
        Some(s) => format!("agents.{tenant_id}.event.{event_type}.{s}"),
        None => format!("agents.{tenant_id}.event.{event_type}"),
    }
}

/// `agents.<tenant_id>.command.<agent_id>`
pub fn command(tenant_id: &str, agent_id: &str) -> String {
    format!("agents.{tenant_id}.command.{agent_id}")
}

/// `agents.<tenant_id>.command.broadcast`
pub fn command_broadcast(tenant_id: &str) -> String {
    format!("agents.{tenant_id}.command.broadcast")
}

/// `agents.<tenant_id>.heartbeat`
pub fn heartbeat(tenant_id: &str) -> String {
    format!("agents.{tenant_id}.heartbeat")
}

/// `agents.<tenant_id>.discovery.requests`
pub fn discovery_requests(tenant_id: &str) -> String {
    format!("agents.{tenant_id}.discovery.requests")
}

/// `agents.<tenant_id>.discovery.responses.<id>`
pub fn discovery_responses(tenant_id: &str, id: &str) -> String {
    format!("agents.{tenant_id}.discovery.responses.{id}")
}

/// `_presence.<tenant_id>.<principal_id>`
pub fn presence(tenant_id: &str, principal_id: &str) -> String {
    format!("_presence.{tenant_id}.{principal_id}")
}

/// `_heartbeat.<tenant_id>.<agent_id>` — presence-plane heartbeat subjects
/// agents may publish directly to the backbone, bypassing the WebSocket.
pub fn presence_heartbeat(tenant_id: &str, agent_id: &str) -> String {
    format!("_heartbeat.{tenant_id}.{agent_id}")
}

/// `agents.<tenant_id>.>` — everything under the agents root for a tenant,
/// used for the dashboard's default subscription.
pub fn agents_wildcard(tenant_id: &str) -> String {
    format!("agents.{tenant_id}.>")
}

/// `tenant.<tenant_id>.channel.>` — every channel for a tenant.
pub fn channel_wildcard(tenant_id: &str) -> String {
    format!("tenant.{tenant_id}.channel.>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_documented_shape() {
        let t = "t1";
        for subject in [
            channel(t, "chat"),
            tenant_agent(t, "a1"),
            task(t, "vision", "gpu"),
            result(t, "a1", "classify"),
            event(t, "status_changed", None),
            event(t, "status_changed", Some("a1")),
            command(t, "a1"),
            command_broadcast(t),
            heartbeat(t),
            discovery_requests(t),
            discovery_responses(t, "req1"),
            presence(t, "a1"),
        ] {
            assert!(validate(&subject, t).is_ok(), "expected ok for {subject}");
        }
    }

    #[test]
    fn rejects_cross_tenant_subjects() {
        assert!(validate("tenant.T2.channel.x", "T1").is_err());
        assert!(validate("agents.T2.heartbeat", "T1").is_err());
        assert!(validate("_presence.T2.a1", "T1").is_err());
    }

    #[test]
    fn rejects_malformed_and_bare_root_subjects() {
        assert!(validate("tenant.T1.", "T1").is_err());
        assert!(validate("not-a-namespaced-subject", "T1").is_err());
        assert!(validate("", "T1").is_err());
    }

    #[test]
    fn rejects_prefix_collision_with_longer_tenant_id() {
        // "T1x" must not validate under tenant "T1" via naive prefix matching.
        assert!(validate("tenant.T1x.channel.c", "T1").is_err());
    }
}
