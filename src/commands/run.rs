use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use super::{build_scheduler, load_config};
use crate::server;

pub async fn run(config_path: &Path, listen: Option<SocketAddr>) -> Result<()> {
    let config = load_config(config_path)?;
    let scheduler = Arc::new(build_scheduler(config, config_path).await?);

    if let Some(addr) = listen {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        tracing::info!("control API listening on http://{}", addr);

        let app = server::router(scheduler.clone());
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!(error = %err, "control API stopped");
            }
        });
    }

    scheduler
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await;

    Ok(())
}
