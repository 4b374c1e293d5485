use crate::{
    annotator::annotate,
    config::DetectionConfig,
    detection::{Detection, Region},
    model_service::{ClassifierError, ModelService},
    segmenter::Segmenter,
};
use opencv::{core::Mat, prelude::*};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Segmentation failed: {0}")]
    Segmentation(opencv::Error),
    #[error("Failed to crop region {0:?}: {1}")]
    Crop(Region, opencv::Error),
    #[error("Classification failed: {0}")]
    Classification(#[from] ClassifierError),
    #[error("Annotation failed: {0}")]
    Annotation(opencv::Error),
}

/// Segment, classify and annotate a single frame.
pub struct Pipeline<M: ModelService> {
    model_service: M,
    segmenter: Segmenter,
}

impl<M: ModelService> Pipeline<M> {
    pub fn new(model_service: M, detection_config: &DetectionConfig) -> Self {
        Self {
            model_service,
            segmenter: Segmenter::new(detection_config),
        }
    }

    #[instrument(skip(self, frame))]
    pub fn process(&self, mut frame: Mat) -> Result<(Mat, Vec<Detection>), PipelineError> {
        let regions = self
            .segmenter
            .segment(&frame)
            .map_err(PipelineError::Segmentation)?;

        let (width, height) = (frame.cols(), frame.rows());
        let mut detections = Vec::with_capacity(regions.len());

        for region in regions {
            let bbox = region.clamp_to(width, height);
            let crop =
                Mat::roi(&frame, bbox.to_rect()).map_err(|e| PipelineError::Crop(region, e))?;
            let prediction = self.model_service.predict(&crop)?;

            detections.push(Detection {
                label: prediction.label,
                confidence: prediction.confidence,
                bbox,
            });
        }

        annotate(&mut frame, &detections).map_err(PipelineError::Annotation)?;

        tracing::debug!("Processed frame with {} detections", detections.len());

        Ok((frame, detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::FreshnessLabel;
    use crate::model_service::Prediction;
    use opencv::core::{Rect, Scalar, CV_8UC3};
    use opencv::imgproc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockModelService {
        calls: AtomicUsize,
    }

    impl MockModelService {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ModelService for MockModelService {
        fn predict(&self, crop: &Mat) -> Result<Prediction, ClassifierError> {
            assert!(crop.cols() >= 30 && crop.rows() >= 30);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Prediction {
                label: FreshnessLabel::Ripe,
                confidence: 0.93,
            })
        }
    }

    struct FailingModelService;

    impl ModelService for FailingModelService {
        fn predict(&self, _crop: &Mat) -> Result<Prediction, ClassifierError> {
            Err(ClassifierError::Inference("session unavailable".to_string()))
        }
    }

    fn frame_with_blobs(blobs: &[Rect]) -> Mat {
        let mut frame =
            Mat::new_rows_cols_with_default(300, 300, CV_8UC3, Scalar::all(128.0)).unwrap();
        for blob in blobs {
            imgproc::rectangle(
                &mut frame,
                *blob,
                Scalar::new(0.0, 0.0, 255.0, 0.0),
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )
            .unwrap();
        }
        frame
    }

    #[test]
    fn test_one_detection_per_region() {
        let frame = frame_with_blobs(&[
            Rect::new(20, 60, 50, 50),
            Rect::new(150, 60, 70, 40),
            Rect::new(120, 220, 8, 8),
        ]);
        let segmenter = Segmenter::new(&DetectionConfig::default());
        let regions = segmenter.segment(&frame).unwrap();

        let pipeline = Pipeline::new(MockModelService::new(), &DetectionConfig::default());
        let (annotated, detections) = pipeline.process(frame).unwrap();

        assert_eq!(regions.len(), 2);
        assert_eq!(detections.len(), regions.len());
        assert_eq!(pipeline.model_service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(annotated.rows(), 300);
        assert_eq!(annotated.cols(), 300);
        for detection in &detections {
            assert_eq!(detection.label, FreshnessLabel::Ripe);
            assert!(regions.contains(&detection.bbox));
        }
    }

    #[test]
    fn test_empty_frame_yields_no_detections() {
        let pipeline = Pipeline::new(MockModelService::new(), &DetectionConfig::default());
        let (_, detections) = pipeline.process(frame_with_blobs(&[])).unwrap();

        assert!(detections.is_empty());
        assert_eq!(pipeline.model_service.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_classifier_failure_fails_the_frame() {
        let pipeline = Pipeline::new(FailingModelService, &DetectionConfig::default());
        let result = pipeline.process(frame_with_blobs(&[Rect::new(20, 20, 60, 60)]));

        assert!(matches!(result, Err(PipelineError::Classification(_))));
    }
}
