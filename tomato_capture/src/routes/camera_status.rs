use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::Serialize;
use tomato_prediction::ModelService;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct CameraStatus {
    pub available: bool,
}

#[instrument(skip(state))]
pub async fn camera_status<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> Json<CameraStatus> {
    state.metrics.record_request("/camera_status");

    let camera = state.camera.clone();
    let available = tokio::task::spawn_blocking(move || camera.probe())
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Camera probe task failed: {:?}", e);
            false
        });

    Json(CameraStatus { available })
}
