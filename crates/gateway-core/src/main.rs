//! Entry point for the connection-and-routing plane.

use gateway_config::GatewayConfig;
use gateway_core::server::GatewayServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env()?;

    let pretty = matches!(config.logging.format, gateway_config::LogFormat::Pretty);
    gateway_telemetry::init_with(config.logging.level.into(), pretty);

    tracing::info!(node_id = %config.node_id, mode = ?config.mode, "starting gateway");

    let server = GatewayServer::from_config(config).await?;
    server.run().await?;
    Ok(())
}
