//! Connection Manager (C8).
//!
//! The WebSocket endpoint. Agent and dashboard sockets share one state
//! machine, parameterized by role: `NEW -> AUTHENTICATING -> ADMITTED ->
//! RUNNING -> CLOSING -> CLOSED`, with a `REJECTED -> CLOSED` branch taken
//! whenever authentication or admission fails.
//!
//! Each accepted socket runs two tasks: one reading client frames and
//! dispatching each against C2/C3/C5/C6/C7 inline, and one draining the
//! local fan-out channel and writing to the socket. The two tasks never
//! touch each other's state directly; they communicate only through the
//! bounded `mpsc` channel the router holds for this principal.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use gateway_protocol::{subject, ClientFrame, GatewayError, ServerFrame};

use crate::credentials::{Credentials, Role};
use crate::quota::AdmitKind;
use crate::server::GatewayState;

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Deserialize)]
pub struct AgentQuery {
    pub tenant_id: String,
    pub challenge: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub token: String,
}

pub async fn agent_ws(
    ws: WebSocketUpgrade,
    Path(agent_id): Path<String>,
    Query(query): Query<AgentQuery>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let credentials = Credentials::AgentChallenge {
        tenant_id: &query.tenant_id,
        principal_id: &agent_id,
        challenge: &query.challenge,
        signature_b64: &query.signature,
    };
    match state.agent_verifier.verify(credentials).await {
        Ok(principal) => ws
            .on_upgrade(move |socket| run_connection(socket, state, principal))
            .into_response(),
        Err(e) => reject(e).into_response(),
    }
}

pub async fn dashboard_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<DashboardQuery>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let credentials = Credentials::DashboardToken {
        token: &query.token,
    };
    match state.dashboard_verifier.verify(credentials).await {
        Ok(principal) => ws
            .on_upgrade(move |socket| run_connection(socket, state, principal))
            .into_response(),
        Err(e) => reject(e).into_response(),
    }
}

fn reject(err: GatewayError) -> axum::http::StatusCode {
    tracing::warn!(error = %err, "rejected websocket handshake");
    axum::http::StatusCode::UNAUTHORIZED
}

/// Sends a close frame explaining why admission failed, then drops the
/// socket. Used for errors raised after the WebSocket upgrade already
/// succeeded, where a rejection can no longer be a plain HTTP status.
async fn close_and_drop(mut socket: WebSocket, err: &GatewayError) {
    let code = err.close_code().unwrap_or(1011);
    let _ = socket
        .send(crate::server::close_message(code, &err.to_string()))
        .await;
}

/// Wraps a backbone publish with the configured publish deadline, surfacing
/// a timeout the same way any other bridge failure is surfaced.
async fn publish_with_deadline(
    state: &GatewayState,
    subject: &str,
    bytes: Vec<u8>,
) -> Result<(), GatewayError> {
    match tokio::time::timeout(state.publish_deadline, state.bridge.publish(subject, bytes)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::BridgeUnavailable {
            reason: format!(
                "publish timed out after {}s",
                state.publish_deadline.as_secs()
            ),
        }),
    }
}

async fn run_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    principal: crate::credentials::VerifiedPrincipal,
) {
    let principal_id = principal.principal_id.clone();
    let tenant_id = principal.tenant_id.clone();

    let current_connections = state
        .registry
        .query_tenant(&tenant_id, None)
        .await
        .map(|conns| conns.len() as u64)
        .unwrap_or(0);
    if let Err(e) = state
        .quota
        .admit(&tenant_id, AdmitKind::Connection, Some(current_connections))
        .await
    {
        tracing::warn!(principal_id = %principal_id, error = %e, "connection admission denied");
        close_and_drop(socket, &GatewayError::from(e)).await;
        return;
    }

    let principal_type = match principal.role {
        Role::Agent => gateway_registry::PrincipalType::Agent,
        Role::Dashboard => gateway_registry::PrincipalType::Dashboard,
    };
    if let Err(e) = state
        .registry
        .register(&principal_id, principal_type, &tenant_id, &state.node_id)
        .await
    {
        tracing::warn!(principal_id = %principal_id, error = %e, "registry write failed on admission");
        close_and_drop(socket, &GatewayError::from(e)).await;
        return;
    }
    gateway_telemetry::metrics::CONNECTIONS_TOTAL.inc();
    if principal.role == Role::Agent {
        state.heartbeat.mark_online(&principal_id);
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CHANNEL_CAPACITY);

    let resumed_subjects = state
        .registry
        .subscriptions_for(&principal_id)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.subject)
        .collect::<Vec<_>>();

    let (mut sender, mut receiver) = socket.split();

    let welcome = ServerFrame::Welcome {
        principal_id: principal_id.clone(),
        node_id: state.node_id.clone(),
        server_time: now_rfc3339(),
        subscribed_subjects: if resumed_subjects.is_empty() {
            None
        } else {
            Some(resumed_subjects.clone())
        },
    };
    if sender
        .send(Message::Text(
            serde_json::to_string(&welcome).unwrap_or_default(),
        ))
        .await
        .is_err()
    {
        cleanup(&state, &principal_id, &tenant_id, principal.role).await;
        return;
    }

    for subject in &resumed_subjects {
        state
            .router
            .add_local(subject, &principal_id, outbound_tx.clone());
    }
    establish_default_subscriptions(&state, &principal, &outbound_tx).await;

    let write_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let read_state = state.clone();
    let read_principal = principal.clone();
    let read_tx = outbound_tx.clone();
    let read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(&read_state, &read_principal, &text, &read_tx).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = write_task => {},
        _ = read_task => {},
    }

    cleanup(&state, &principal_id, &tenant_id, principal.role).await;
}

async fn establish_default_subscriptions(
    state: &Arc<GatewayState>,
    principal: &crate::credentials::VerifiedPrincipal,
    outbound_tx: &mpsc::Sender<ServerFrame>,
) {
    let mut subjects = Vec::new();
    match principal.role {
        Role::Agent => {
            subjects.push(subject::command(
                &principal.tenant_id,
                &principal.principal_id,
            ));
            subjects.push(subject::command_broadcast(&principal.tenant_id));
            for capability in &principal.capabilities {
                subjects.push(subject::task_wildcard(&principal.tenant_id, capability));
            }
        }
        Role::Dashboard => {
            subjects.push(subject::agents_wildcard(&principal.tenant_id));
            subjects.push(subject::channel_wildcard(&principal.tenant_id));
        }
    }

    for s in subjects {
        if state
            .router
            .add_local(&s, &principal.principal_id, outbound_tx.clone())
        {
            state.ensure_subscribed(s.clone()).await;
        }
        let _ = state
            .registry
            .add_sub(&principal.principal_id, &s, &state.node_id)
            .await;
    }
}

async fn handle_frame(
    state: &Arc<GatewayState>,
    principal: &crate::credentials::VerifiedPrincipal,
    text: &str,
    outbound_tx: &mpsc::Sender<ServerFrame>,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(_) => {
            let _ = outbound_tx.send(ServerFrame::unknown_type()).await;
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe { subject: subj } => {
            if let Err(e) = subject::validate(&subj, &principal.tenant_id) {
                let _ = outbound_tx.send(ServerFrame::error(&e)).await;
                return;
            }
            if state
                .router
                .add_local(&subj, &principal.principal_id, outbound_tx.clone())
            {
                state.ensure_subscribed(subj.clone()).await;
            }
            let _ = state
                .registry
                .add_sub(&principal.principal_id, &subj, &state.node_id)
                .await;
            let _ = outbound_tx
                .send(ServerFrame::Subscribed { subject: subj })
                .await;
        }
        ClientFrame::Unsubscribe { subject: subj } => {
            if state.router.remove_local(&subj, &principal.principal_id) {
                state.maybe_unsubscribe(&subj).await;
            }
            let _ = state
                .registry
                .remove_sub(&principal.principal_id, &subj)
                .await;
            let _ = outbound_tx
                .send(ServerFrame::Unsubscribed { subject: subj })
                .await;
        }
        ClientFrame::Publish {
            subject: subj,
            data,
        } => {
            if let Err(e) = subject::validate(&subj, &principal.tenant_id) {
                let _ = outbound_tx.send(ServerFrame::error(&e)).await;
                return;
            }
            if let Err(e) = state
                .quota
                .admit(&principal.tenant_id, AdmitKind::Message, None)
                .await
            {
                let _ = outbound_tx.send(ServerFrame::error(&e.into())).await;
                return;
            }
            let payload = if subj.starts_with(&format!("tenant.{}.channel.", principal.tenant_id)) {
                data
            } else {
                serde_json::json!({
                    "principal_id": principal.principal_id,
                    "timestamp": now_rfc3339(),
                    "data": data,
                })
            };
            let bytes = match serde_json::to_vec(&payload) {
                Ok(b) => b,
                Err(_) => return,
            };
            if let Err(e) = publish_with_deadline(state, &subj, bytes).await {
                let _ = outbound_tx.send(ServerFrame::error(&e)).await;
                return;
            }
            state
                .quota
                .account(&principal.tenant_id, AdmitKind::Message, 1);
            gateway_telemetry::metrics::MESSAGES_PUBLISHED_TOTAL.inc();
            let _ = outbound_tx
                .send(ServerFrame::Published { subject: subj })
                .await;
        }
        ClientFrame::Heartbeat { .. } => {
            if principal.role == Role::Agent {
                if let Err(e) = state
                    .heartbeat
                    .record_heartbeat(&principal.principal_id, &principal.tenant_id)
                    .await
                {
                    let _ = outbound_tx.send(ServerFrame::error(&e)).await;
                    return;
                }
            }
            let _ = outbound_tx
                .send(ServerFrame::HeartbeatAck {
                    timestamp: now_rfc3339(),
                })
                .await;
        }
        ClientFrame::Ping {} => {
            let _ = outbound_tx.send(ServerFrame::Pong {}).await;
        }
    }
}

async fn cleanup(state: &Arc<GatewayState>, principal_id: &str, tenant_id: &str, role: Role) {
    let closed_subjects = state.router.remove_all_for_principal(principal_id);
    for subj in closed_subjects {
        state.maybe_unsubscribe(&subj).await;
    }
    let _ = state.registry.unregister(principal_id).await;
    gateway_telemetry::metrics::CONNECTIONS_TOTAL.dec();
    if role == Role::Agent {
        if let Err(e) = state
            .heartbeat
            .mark_offline(tenant_id, principal_id, "socket_closed")
            .await
        {
            tracing::warn!(principal_id = %principal_id, error = %e, "status_changed publish failed on close");
        }
    }
}
