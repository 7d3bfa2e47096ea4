//! Entry point for the `fleet-gateway` HTTP server.

use std::sync::Arc;

use fleet_executor::{FleetConfig, VmLifecycleController};
use fleet_gateway::routes::create_router;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = std::env::var("FLEET_LISTEN_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3457".to_owned());

    let controller = match FleetConfig::from_env().and_then(VmLifecycleController::from_config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    let app = create_router(Arc::new(controller));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %addr, "fleet-gateway listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
