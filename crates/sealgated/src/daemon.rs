//! Daemon lifecycle: startup checks, metrics endpoint, graceful shutdown

use anyhow::Result;
use sealgate_core::config::SealgateConfig;
use tracing::{error, info, warn};

use crate::bootstrap::Gateway;
use crate::metrics::HealthState;

pub async fn run(config: SealgateConfig, gateway: Gateway) -> Result<()> {
    info!("daemon starting");

    match gateway.objects.check_health(&gateway.bucket).await {
        Ok(()) => info!(bucket = %gateway.bucket, endpoint = %config.storage.endpoint, "storage: connected"),
        Err(e) => warn!(bucket = %gateway.bucket, "storage: {e:#}"),
    }

    match gateway.pipeline.admins().load().await {
        Ok(count) => info!(admins = count, "admin cache loaded"),
        Err(e) => warn!("admin cache load failed: {e} (will retry on first admin call)"),
    }

    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: gateway.registry.clone(),
            objects: gateway.objects.clone(),
            bucket: gateway.bucket.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    notify_ready();
    info!(
        async_persistence = config.pipeline.async_persistence,
        kms = config.kms.enabled,
        "gateway ready"
    );

    shutdown_signal().await;
    info!("shutdown requested");
    gateway.pipeline.drain().await;
    info!("deferred commits drained, exiting");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn notify_ready() {
    // sd_notify(READY=1); no-op outside systemd
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        #[cfg(unix)]
        {
            use std::os::unix::net::UnixDatagram;
            if let Ok(sock) = UnixDatagram::unbound() {
                let _ = sock.send_to(b"READY=1\n", &socket);
                tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
            }
        }
    }
}
