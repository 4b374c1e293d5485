use crate::camera::Camera;
use crate::config::Config;
use crate::server::HttpServer;
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};
use tomato_prediction::{OrtModelService, Pipeline};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to initialize model service: {:?}", e);
            return Err(e);
        }
    };
    let pipeline = Arc::new(Pipeline::new(model_service, &config.detection));

    // Opened lazily by the first stream or status probe.
    let camera = Arc::new(Camera::new(&config.camera));

    let metrics = match Metrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => {
            tracing::error!("Failed to initialize metrics: {:?}", e);
            return Err(e);
        }
    };

    let server = HttpServer::new(pipeline, camera.clone(), metrics, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Server exited with error: {:?}", e),
        Err(e) => tracing::error!("Server task failed: {:?}", e),
    }

    let device_index = camera.device_index();
    match tokio::task::spawn_blocking(move || camera.close()).await {
        Ok(()) => tracing::info!("Camera {} released", device_index),
        Err(e) => tracing::error!("Failed to release camera {}: {:?}", device_index, e),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
