mod analyze_image;
mod camera_status;
mod health;
mod index;
mod metrics;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use tomato_prediction::ModelService;

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(index::index))
        .route("/health", get(health::healthcheck::<M>))
        .route("/metrics", get(metrics::metrics_handler::<M>))
        .route("/video_feed", get(video_feed::video_feed::<M>))
        .route("/analyze_image", post(analyze_image::analyze_image::<M>))
        .route("/camera_status", get(camera_status::camera_status::<M>))
}

#[cfg(test)]
mod tests {
    use crate::{
        camera::Camera,
        config::{CameraConfig, RetryConfig},
        cv_utils::ImageConverter,
        server::{build_router, SharedState},
        telemetry::Metrics,
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use opencv::{
        core::{Mat, Rect, Scalar, Vector, CV_8UC3},
        imgcodecs, imgproc,
        prelude::*,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tomato_prediction::{
        config::DetectionConfig, ClassifierError, FreshnessLabel, ModelService, Pipeline,
        Prediction,
    };
    use tower::ServiceExt;

    const BOUNDARY: &str = "tomato-test-boundary";

    struct MockModelService;

    impl ModelService for MockModelService {
        fn predict(&self, _crop: &Mat) -> Result<Prediction, ClassifierError> {
            Ok(Prediction {
                label: FreshnessLabel::Unripe,
                confidence: 0.81,
            })
        }
    }

    fn test_router() -> Router {
        let camera_config = CameraConfig {
            device_index: 97,
            stream_fps: 30,
            retry: RetryConfig::default(),
        };
        let state = SharedState {
            pipeline: Arc::new(Pipeline::new(MockModelService, &DetectionConfig::default())),
            camera: Arc::new(Camera::new(&camera_config)),
            camera_config,
            metrics: Arc::new(Metrics::new().unwrap()),
        };
        build_router(state, 16 * 1024 * 1024)
    }

    fn png_bytes(frame: &Mat) -> Vec<u8> {
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode(".png", frame, &mut buf, &Vector::new()).unwrap();
        buf.into()
    }

    fn gray_png() -> Vec<u8> {
        let frame =
            Mat::new_rows_cols_with_default(300, 300, CV_8UC3, Scalar::all(128.0)).unwrap();
        png_bytes(&frame)
    }

    fn multipart_request(field: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload.png\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/analyze_image")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = test_router().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_gray_upload_has_no_detections() {
        let (status, json) = send(multipart_request("image", &gray_png())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], Value::Bool(true));
        assert_eq!(json["detections"], serde_json::json!([]));

        let processed = json["processed_image"].as_str().unwrap();
        let decoded = ImageConverter::base64_jpg_to_mat(processed).unwrap();
        assert_eq!(decoded.rows(), 300);
        assert_eq!(decoded.cols(), 300);
    }

    #[tokio::test]
    async fn test_upload_with_tomato_returns_detection() {
        let mut frame =
            Mat::new_rows_cols_with_default(300, 300, CV_8UC3, Scalar::all(128.0)).unwrap();
        imgproc::rectangle(
            &mut frame,
            Rect::new(100, 120, 60, 60),
            Scalar::new(0.0, 0.0, 255.0, 0.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .unwrap();

        let (status, json) = send(multipart_request("image", &png_bytes(&frame))).await;

        assert_eq!(status, StatusCode::OK);
        let detections = json["detections"].as_array().unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0]["label"], "Unripe");
        assert_eq!(detections[0]["bbox"], serde_json::json!([98, 118, 64, 64]));
        let confidence = detections[0]["confidence"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&confidence));
    }

    #[tokio::test]
    async fn test_non_image_upload_is_rejected() {
        let (status, json) = send(multipart_request("image", b"this is not an image")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, serde_json::json!({"error": "Invalid image"}));
    }

    #[tokio::test]
    async fn test_missing_image_field_is_rejected() {
        let (status, json) = send(multipart_request("file", &gray_png())).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, serde_json::json!({"error": "No image provided"}));
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/analyze_image")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let (status, json) = send(request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().starts_with("Malformed upload"));
    }

    #[tokio::test]
    async fn test_camera_status_without_device() {
        let request = Request::builder()
            .uri("/camera_status")
            .body(Body::empty())
            .unwrap();

        let (status, json) = send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"available": false}));
    }

    #[tokio::test]
    async fn test_video_feed_is_multipart_stream() {
        let request = Request::builder()
            .uri("/video_feed")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let (status, json) = send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "Available");
        assert_eq!(json["camera_open"], false);
    }
}
