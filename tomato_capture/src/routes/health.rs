use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::Serialize;
use tomato_prediction::ModelService;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    camera_open: bool,
}

/// Liveness only; does not touch the camera device.
pub async fn healthcheck<M: ModelService>(State(state): State<SharedState<M>>) -> Json<Health> {
    Json(Health {
        status: "Available",
        camera_open: state.camera.is_open(),
    })
}
