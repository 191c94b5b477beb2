//! Service lifecycle: Modbus listener plus optional REST gateway

use std::sync::Arc;

use anyhow::Context;
use modbus_core::ModbusServer;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{create_router, AppState};
use crate::config::Config;

/// Run until `shutdown` is cancelled, then stop both listeners
///
/// The Modbus server waits for every open connection to close before this
/// returns.
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let data = Arc::new(config.build_data()?);

    // Must be bound before the Modbus server starts
    let rest_listener = if config.rest.enabled {
        let listener = TcpListener::bind((config.rest.host.as_str(), config.rest.port))
            .await
            .with_context(|| {
                format!(
                    "Failed to bind REST gateway on {}:{}",
                    config.rest.host, config.rest.port
                )
            })?;
        Some(listener)
    } else {
        info!("REST gateway disabled");
        None
    };

    let mut server = ModbusServer::new(config.server_config(), Arc::clone(&data));
    server
        .start()
        .await
        .with_context(|| format!("Failed to start Modbus server on port {}", config.modbus.port))?;

    let rest = match rest_listener {
        Some(listener) => {
            match listener.local_addr() {
                Ok(addr) => info!("REST gateway listening on {}", addr),
                Err(e) => error!("REST gateway address unavailable: {}", e),
            }
            let app = create_router(AppState::new(data, server.stats()));
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
            }))
        },
        None => None,
    };

    shutdown.cancelled().await;
    info!("Shutting down");

    server.stop().await;
    if let Some(handle) = rest {
        match handle.await {
            Ok(Ok(())) => info!("REST gateway stopped"),
            Ok(Err(e)) => error!("REST gateway error: {}", e),
            Err(e) => error!("REST gateway task failed: {}", e),
        }
    }

    Ok(())
}
