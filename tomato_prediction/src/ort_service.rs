use crate::{
    config::{ModelConfig, Validatable},
    model_service::{ClassifierError, ModelService, Prediction},
};
use ndarray::{Array, Ix4};
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

pub(crate) const INPUT_SIZE: i32 = 224;

/// Resizes a crop to the model resolution and lays it out as a
/// `[1, 224, 224, 3]` tensor with values in `[0, 1]`.
pub(crate) fn transform_crop(crop: &Mat, rgb_input: bool) -> Result<Array<f32, Ix4>, ClassifierError> {
    let mut resized = Mat::default();
    imgproc::resize(
        crop,
        &mut resized,
        Size::new(INPUT_SIZE, INPUT_SIZE),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    if rgb_input {
        let mut swapped = Mat::default();
        imgproc::cvt_color_def(&resized, &mut swapped, imgproc::COLOR_BGR2RGB)?;
        resized = swapped;
    }

    let pixels: Vec<f32> = resized
        .data_bytes()?
        .iter()
        .map(|&value| value as f32 / 255.0)
        .collect();

    let side = INPUT_SIZE as usize;
    Array::from_shape_vec((1, side, side, 3), pixels).map_err(|e| {
        ClassifierError::Inference(format!("crop does not fit the input shape: {}", e))
    })
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    rgb_input: bool,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        model_config.validate()?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            rgb_input: model_config.rgb_input,
        })
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ClassifierError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ClassifierError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling crop with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("failed to extract tensor: {}", e)))?;

        Ok(scores.to_vec())
    }
}

impl ModelService for OrtModelService {
    fn predict(&self, crop: &Mat) -> Result<Prediction, ClassifierError> {
        let input = transform_crop(crop, self.rgb_input)?;
        let scores = self.run_inference(&input)?;
        let prediction = Prediction::from_scores(&scores)?;

        tracing::debug!(
            "Predicted {} with confidence {:.3}",
            prediction.label,
            prediction.confidence
        );

        Ok(prediction)
    }
}
