use crate::{
    camera::{Camera, CameraError, CameraLease},
    config::RetryConfig,
    cv_utils::{CvUtilsError, ImageConverter},
    telemetry::Metrics,
};
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use opencv::core::Mat;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::time::sleep;
use tomato_prediction::{ModelService, Pipeline, PipelineError};
use tracing::instrument;

pub const FRAME_BOUNDARY: &str = "frame";

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Camera failed {failures} times in a row: {source}")]
    CameraRetriesExhausted {
        failures: u32,
        #[source]
        source: CameraError,
    },
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Frame encoding error: {0}")]
    Encode(#[from] CvUtilsError),
    #[error("Frame task failed: {0}")]
    Task(String),
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
}

#[derive(Error, Debug)]
enum FrameError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Stream(#[from] VideoStreamError),
}

/// Exponential backoff for camera read failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_consecutive_failures: u32,
    pub initial_delay: Duration,
    pub backoff_factor: u32,
    pub max_delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor.max(1),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following the `failures`-th consecutive failure,
    /// with +/-10% jitter.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(self.backoff_factor.saturating_pow(exponent))
            .min(self.max_delay);
        let jitter = rand::random::<f32>() * 0.2 + 0.9;
        base.mul_f32(jitter)
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_consecutive_failures
    }
}

/// Wraps one JPEG frame as a `multipart/x-mixed-replace` part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let part_header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FRAME_BOUNDARY,
        jpeg.len()
    );
    let mut body = part_header.into_bytes();
    body.extend_from_slice(jpeg);
    body.extend_from_slice(b"\r\n");
    Bytes::from(body)
}

/// Source of raw frames for one stream.
pub(crate) trait FrameReader: Send + Sync + 'static {
    fn read_frame(&self) -> Result<Mat, CameraError>;
}

impl FrameReader for CameraLease {
    fn read_frame(&self) -> Result<Mat, CameraError> {
        CameraLease::read_frame(self)
    }
}

pub struct VideoStream<M: ModelService> {
    pub camera: Arc<Camera>,
    pub pipeline: Arc<Pipeline<M>>,
    pub metrics: Arc<Metrics>,
    pub video_stream_delay: u64,
    pub retry_policy: RetryPolicy,
}

struct StreamState<M: ModelService, R: FrameReader> {
    reader: Arc<R>,
    pipeline: Arc<Pipeline<M>>,
    metrics: Arc<Metrics>,
    frame_delay: Duration,
    retry_policy: RetryPolicy,
    failures: u32,
    last_frame: Option<Instant>,
    finished: bool,
}

impl<M: ModelService, R: FrameReader> Drop for StreamState<M, R> {
    fn drop(&mut self) {
        // The last reference may release the camera, which blocks.
        let reader = self.reader.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(reader));
            }
            Err(_) => drop(reader),
        }
    }
}

fn capture_and_process<M: ModelService, R: FrameReader>(
    reader: &R,
    pipeline: &Pipeline<M>,
) -> Result<Bytes, FrameError> {
    let frame = reader.read_frame()?;
    let (annotated, _) = pipeline
        .process(frame)
        .map_err(VideoStreamError::Pipeline)?;
    let jpeg = ImageConverter::encode_mat_to_jpg(&annotated).map_err(VideoStreamError::Encode)?;
    Ok(multipart_part(&jpeg))
}

/// Annotated frames from `reader` until the client goes away, reads keep
/// failing past the retry policy, or the pipeline fails.
fn frames<M: ModelService, R: FrameReader>(
    reader: R,
    pipeline: Arc<Pipeline<M>>,
    metrics: Arc<Metrics>,
    frame_delay: Duration,
    retry_policy: RetryPolicy,
) -> impl Stream<Item = Result<Bytes, VideoStreamError>> {
    let state = StreamState {
        reader: Arc::new(reader),
        pipeline,
        metrics,
        frame_delay,
        retry_policy,
        failures: 0,
        last_frame: None,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            sleep(state.frame_delay).await;

            let reader = state.reader.clone();
            let pipeline = state.pipeline.clone();
            let result =
                tokio::task::spawn_blocking(move || capture_and_process(&*reader, &pipeline))
                    .await
                    .unwrap_or_else(|e| {
                        Err(FrameError::Stream(VideoStreamError::Task(e.to_string())))
                    });

            match result {
                Ok(part) => {
                    state.failures = 0;
                    let now = Instant::now();
                    if let Some(previous) = state.last_frame.replace(now) {
                        let elapsed = now.duration_since(previous).as_secs_f64();
                        if elapsed > 0.0 {
                            state.metrics.record_stream_fps(1.0 / elapsed);
                        }
                    }
                    return Some((Ok(part), state));
                }
                Err(FrameError::Camera(e)) => {
                    state.failures += 1;
                    if state.retry_policy.exhausted(state.failures) {
                        tracing::error!(
                            "Camera failed {} consecutive times, ending stream: {}",
                            state.failures,
                            e
                        );
                        state.finished = true;
                        let err = VideoStreamError::CameraRetriesExhausted {
                            failures: state.failures,
                            source: e,
                        };
                        return Some((Err(err), state));
                    }

                    let delay = state.retry_policy.delay_for(state.failures);
                    tracing::warn!(
                        "Camera read failed (attempt {}/{}), retrying in {:?}: {}",
                        state.failures,
                        state.retry_policy.max_consecutive_failures,
                        delay,
                        e
                    );
                    sleep(delay).await;
                }
                Err(FrameError::Stream(e)) => {
                    tracing::error!("Error producing frame, ending stream: {:?}", e);
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
}

impl<M: ModelService> VideoStream<M> {
    #[instrument(skip(self))]
    pub fn generate_stream(self) -> impl Stream<Item = Result<Bytes, VideoStreamError>> {
        let VideoStream {
            camera,
            pipeline,
            metrics,
            video_stream_delay,
            retry_policy,
        } = self;
        let frame_delay = Duration::from_millis(video_stream_delay);

        // Taking a lease locks the camera, which another reader may hold
        // for the length of a frame read.
        let lease = tokio::task::spawn_blocking(move || camera.acquire());

        stream::once(lease).flat_map(move |lease| match lease {
            Ok(lease) => frames(
                lease,
                pipeline.clone(),
                metrics.clone(),
                frame_delay,
                retry_policy.clone(),
            )
            .left_stream(),
            Err(e) => stream::iter([Err(VideoStreamError::Task(e.to_string()))]).right_stream(),
        })
    }
}
