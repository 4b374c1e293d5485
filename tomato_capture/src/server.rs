use crate::{
    camera::Camera,
    config::{CameraConfig, Config},
    routes::api_routes,
    stream::{RetryPolicy, VideoStream},
    telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tomato_prediction::{ModelService, Pipeline};

pub struct SharedState<M: ModelService> {
    pub pipeline: Arc<Pipeline<M>>,
    pub camera: Arc<Camera>,
    pub camera_config: CameraConfig,
    pub metrics: Arc<Metrics>,
}

// Derived Clone would require `M: Clone`.
impl<M: ModelService> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            camera: self.camera.clone(),
            camera_config: self.camera_config.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<M: ModelService> SharedState<M> {
    pub fn video_stream(&self) -> VideoStream<M> {
        VideoStream {
            camera: self.camera.clone(),
            pipeline: self.pipeline.clone(),
            metrics: self.metrics.clone(),
            video_stream_delay: self.camera_config.get_stream_delay_ms(),
            retry_policy: RetryPolicy::from(&self.camera_config.retry),
        }
    }
}

pub fn build_router<M: ModelService>(state: SharedState<M>, max_upload_bytes: usize) -> Router {
    api_routes::<M>()
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        pipeline: Arc<Pipeline<M>>,
        camera: Arc<Camera>,
        metrics: Arc<Metrics>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState {
            pipeline,
            camera,
            camera_config: config.camera.clone(),
            metrics,
        };

        let router =
            build_router(app_state, config.server.max_upload_bytes).layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}
