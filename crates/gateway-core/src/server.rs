//! Gateway server builder: wires the eight components together and exposes
//! the axum `Router` the connection manager's handlers attach to.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use futures_util::StreamExt;
use gateway_config::GatewayConfig;
use gateway_protocol::{GatewayError, ServerFrame};
use gateway_registry::{ConnectionRegistry, InMemoryRegistry, RedisRegistry};
use tokio::task::JoinHandle;

use crate::bridge::BackboneBridge;
use crate::credentials::{
    AgentChallengeVerifier, CredentialVerifier, DashboardTokenConfig, DashboardTokenVerifier,
    HttpPrincipalDirectory,
};
use crate::heartbeat::HeartbeatMonitor;
use crate::quota::QuotaOracle;
use crate::router::SubscriptionRouter;
use crate::tenant_repo::HttpTenantDirectory;
use crate::ws::{agent_ws, dashboard_ws};

/// Shared state every connection handler reads from; one instance per
/// process, held behind an `Arc`.
pub struct GatewayState {
    pub node_id: String,
    pub agent_verifier: Arc<dyn CredentialVerifier>,
    pub dashboard_verifier: Arc<dyn CredentialVerifier>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub quota: QuotaOracle,
    pub heartbeat: Arc<HeartbeatMonitor>,
    pub bridge: Arc<BackboneBridge>,
    pub router: Arc<SubscriptionRouter>,
    /// Deadline for a single backbone publish (spec default 5s).
    pub publish_deadline: Duration,
    /// Deadline for a single registry write (spec default 10s).
    pub registry_deadline: Duration,
    subject_tasks: DashMap<String, JoinHandle<()>>,
}

impl GatewayState {
    /// Subscribes to `subject` on the backbone and spawns the task that
    /// forwards every delivered message into the local router's fan-out,
    /// unless a subscription (and its forwarding task) already exists.
    pub async fn ensure_subscribed(&self, subject: String) {
        if self.subject_tasks.contains_key(&subject) {
            return;
        }
        let mut subscriber = match self.bridge.subscribe(&subject).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "backbone subscribe failed");
                return;
            }
        };
        let router = self.router.clone();
        let forwarded_subject = subject.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let data: serde_json::Value =
                    serde_json::from_slice(&message.payload).unwrap_or(serde_json::Value::Null);
                let frame = ServerFrame::Message {
                    subject: forwarded_subject.clone(),
                    data,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                };
                router.fan_out(&forwarded_subject, &frame);
            }
        });
        self.subject_tasks.insert(subject, handle);
    }

    /// Stops forwarding `subject`, dropping the backbone subscription.
    pub async fn maybe_unsubscribe(&self, subject: &str) {
        if let Some((_, handle)) = self.subject_tasks.remove(subject) {
            handle.abort();
        }
    }

    pub async fn healthy(&self) -> bool {
        matches!(
            *self.bridge.state().borrow(),
            crate::bridge::BridgeState::Connected
        )
    }

    /// Subscribes to the presence-plane subjects (`_heartbeat.*.*` and
    /// `_presence.*.*`) agents may publish directly to the backbone,
    /// bypassing the WebSocket entirely, and treats every message there as
    /// an in-band heartbeat frame for that tenant/principal pair.
    pub async fn run_presence_listener(self: Arc<Self>) {
        for wildcard in ["_heartbeat.*.*", "_presence.*.*"] {
            let mut subscriber = match self.bridge.subscribe(wildcard).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(subject = wildcard, error = %e, "presence-plane subscribe failed");
                    continue;
                }
            };
            let state = self.clone();
            tokio::spawn(async move {
                while let Some(message) = subscriber.next().await {
                    let mut parts = message.subject.split('.');
                    let (Some(_root), Some(tenant_id), Some(principal_id)) =
                        (parts.next(), parts.next(), parts.next())
                    else {
                        continue;
                    };
                    if let Err(e) = state
                        .heartbeat
                        .record_heartbeat(principal_id, tenant_id)
                        .await
                    {
                        tracing::warn!(principal_id, tenant_id, error = %e, "presence-plane heartbeat rejected");
                    }
                }
            });
        }
    }
}

pub struct GatewayServer {
    state: Arc<GatewayState>,
    config: GatewayConfig,
}

impl GatewayServer {
    pub async fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        let backbone_urls = config.backbone.urls.join(",");
        let bridge = Arc::new(BackboneBridge::connect(&backbone_urls).await?);

        let registry: Arc<dyn ConnectionRegistry> = match &config.registry.redis_url {
            Some(url) => Arc::new(
                RedisRegistry::connect(url, config.registry.connection_ttl_secs)
                    .await
                    .map_err(|e| GatewayError::RegistryUnavailable {
                        reason: e.to_string(),
                    })?,
            ),
            None => Arc::new(InMemoryRegistry::new(config.registry.connection_ttl_secs)),
        };

        let tenant_directory: Arc<dyn crate::tenant::TenantDirectory> = Arc::new(
            HttpTenantDirectory::new(config.external.tenant_directory_url.clone()),
        );
        let principal_directory =
            HttpPrincipalDirectory::new(config.external.principal_directory_url.clone());

        let agent_verifier: Arc<dyn CredentialVerifier> =
            Arc::new(AgentChallengeVerifier::new(principal_directory));

        let allowed_algorithms = config
            .security
            .allowed_algorithms
            .iter()
            .filter_map(|a| match a.as_str() {
                "HS256" => Some(jsonwebtoken::Algorithm::HS256),
                "RS256" => Some(jsonwebtoken::Algorithm::RS256),
                "ES256" => Some(jsonwebtoken::Algorithm::ES256),
                _ => None,
            })
            .collect();
        let dashboard_verifier: Arc<dyn CredentialVerifier> =
            Arc::new(DashboardTokenVerifier::new(DashboardTokenConfig {
                hmac_secret: config.security.jwt_hmac_secret.clone(),
                jwks_url: config.security.jwks_url.clone(),
                allowed_algorithms,
                issuer: config.security.issuer.clone(),
                audience: config.security.audience.clone(),
            }));

        let registry_deadline = Duration::from_secs(config.registry.write_deadline_secs);
        let publish_deadline = Duration::from_secs(config.backbone.publish_deadline_secs);

        let quota = QuotaOracle::new(tenant_directory);
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            registry.clone(),
            bridge.clone(),
            config.node_id.clone(),
            Duration::from_secs(config.registry.cleanup_interval_secs),
            config.registry.heartbeat_timeout_secs,
            registry_deadline,
        ));
        let router = Arc::new(SubscriptionRouter::new());

        let state = Arc::new(GatewayState {
            node_id: config.node_id.clone(),
            agent_verifier,
            dashboard_verifier,
            registry,
            quota,
            heartbeat,
            bridge,
            router,
            publish_deadline,
            registry_deadline,
            subject_tasks: DashMap::new(),
        });

        Ok(Self { state, config })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/agent/:agent_id", get(agent_ws))
            .route("/ws/dashboard", get(dashboard_ws))
            .route("/healthz", get(healthz))
            .route("/metrics", get(metrics))
            .with_state(self.state.clone())
    }

    pub async fn run(self) -> Result<(), GatewayError> {
        let monitor = self.state.heartbeat.clone();
        tokio::spawn(async move { monitor.run().await });
        self.state.clone().run_presence_listener().await;

        let addr = std::net::SocketAddr::from((
            self.config
                .api
                .host
                .parse::<std::net::IpAddr>()
                .unwrap_or([0, 0, 0, 0].into()),
            self.config.api.port,
        ));
        tracing::info!(node_id = %self.config.node_id, %addr, "gateway listening");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        axum::serve(listener, self.router())
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))
    }
}

async fn healthz(
    axum::extract::State(state): axum::extract::State<Arc<GatewayState>>,
) -> impl axum::response::IntoResponse {
    if state.healthy().await {
        (axum::http::StatusCode::OK, "ok")
    } else {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "backbone disconnected",
        )
    }
}

async fn metrics() -> impl axum::response::IntoResponse {
    gateway_telemetry::metrics::encode_metrics()
}

/// Builds a WebSocket close frame carrying an explicit code and reason, for
/// connections rejected after the handshake (admission denied, quota
/// exceeded) rather than at the `WebSocketUpgrade` rejection itself.
pub(crate) fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_message_carries_requested_code() {
        if let Message::Close(Some(frame)) = close_message(1008, "policy violation") {
            assert_eq!(frame.code, 1008);
        } else {
            panic!("expected close message");
        }
    }
}
