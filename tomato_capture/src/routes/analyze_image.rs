use crate::{
    cv_utils::{CvUtilsError, ImageConverter},
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use thiserror::Error;
use tomato_prediction::{Detection, ModelService, PipelineError};
use tracing::instrument;

const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum AnalyzeImageError {
    #[error("No image provided")]
    MissingImage,
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),
    #[error("Invalid image")]
    InvalidImage(CvUtilsError),
    #[error("Inference failed: {0}")]
    Inference(#[from] PipelineError),
    #[error("Failed to encode processed image: {0}")]
    Encode(CvUtilsError),
    #[error("Analysis task failed: {0}")]
    Task(String),
}

impl AnalyzeImageError {
    pub fn status(&self) -> StatusCode {
        match self {
            AnalyzeImageError::MissingImage
            | AnalyzeImageError::MalformedUpload(_)
            | AnalyzeImageError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            AnalyzeImageError::Inference(_)
            | AnalyzeImageError::Encode(_)
            | AnalyzeImageError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AnalyzeImageError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Image analysis failed: {:?}", self);
        } else {
            tracing::debug!("Rejected upload: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub detections: Vec<Detection>,
    pub processed_image: String,
}

async fn read_image_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Bytes, AnalyzeImageError> {
    let mut multipart =
        multipart.map_err(|e| AnalyzeImageError::MalformedUpload(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AnalyzeImageError::MalformedUpload(e.body_text()))?
    {
        if field.name() == Some(IMAGE_FIELD) {
            return field
                .bytes()
                .await
                .map_err(|e| AnalyzeImageError::MalformedUpload(e.body_text()));
        }
    }

    Err(AnalyzeImageError::MissingImage)
}

#[instrument(skip(state, multipart))]
pub async fn analyze_image<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, AnalyzeImageError> {
    state.metrics.record_request("/analyze_image");
    let image_data = read_image_field(multipart).await?;

    let started = Instant::now();
    let pipeline = state.pipeline.clone();
    let (detections, processed_image) = tokio::task::spawn_blocking(move || {
        let frame =
            ImageConverter::bytes_to_mat(&image_data).map_err(AnalyzeImageError::InvalidImage)?;
        let (annotated, detections) = pipeline.process(frame)?;
        let processed_image = ImageConverter::encode_mat_to_base64_jpg(&annotated)
            .map_err(AnalyzeImageError::Encode)?;
        Ok::<_, AnalyzeImageError>((detections, processed_image))
    })
    .await
    .map_err(|e| AnalyzeImageError::Task(e.to_string()))??;

    state
        .metrics
        .record_analysis_duration(started.elapsed().as_millis() as u64, "/analyze_image");
    state.metrics.record_detections(&detections);
    tracing::info!("Analyzed upload with {} detections", detections.len());

    Ok(Json(AnalyzeResponse {
        success: true,
        detections,
        processed_image,
    }))
}
