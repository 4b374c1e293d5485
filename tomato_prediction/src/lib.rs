mod annotator;
mod model_service;
mod ort_service;
mod pipeline;
mod segmenter;

pub mod config;
pub mod detection;

pub use annotator::annotate;
pub use detection::{Detection, FreshnessLabel, Region};
pub use model_service::{ClassifierError, ModelService, Prediction};
pub use ort_service::OrtModelService;
pub use pipeline::{Pipeline, PipelineError};
pub use segmenter::Segmenter;
