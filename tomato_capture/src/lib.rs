mod camera;
mod cv_utils;
mod routes;
mod server;
mod stream;
mod telemetry;

pub mod app;
pub mod config;

pub use app::start_app;
pub use camera::{Camera, CameraError, CameraLease};
pub use cv_utils::{CvUtilsError, ImageConverter};
pub use server::{build_router, HttpServer, SharedState};
pub use stream::{multipart_part, RetryPolicy, VideoStream, VideoStreamError};
pub use telemetry::Metrics;
