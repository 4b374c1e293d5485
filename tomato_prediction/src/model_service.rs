use crate::detection::FreshnessLabel;
use opencv::core::Mat;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Failed to prepare model input: {0}")]
    Preprocessing(#[from] opencv::Error),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Expected {expected} class scores, model returned {actual}")]
    UnexpectedOutput { expected: usize, actual: usize },
    #[error("Model returned a non-finite score for class {index}")]
    NonFiniteScore { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: FreshnessLabel,
    pub confidence: f32,
}

impl Prediction {
    /// Picks the arg-max class. Raw logits are squashed with softmax so the
    /// confidence is always a probability.
    pub fn from_scores(scores: &[f32]) -> Result<Self, ClassifierError> {
        if scores.len() != FreshnessLabel::ALL.len() {
            return Err(ClassifierError::UnexpectedOutput {
                expected: FreshnessLabel::ALL.len(),
                actual: scores.len(),
            });
        }

        if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
            return Err(ClassifierError::NonFiniteScore { index });
        }

        let probabilities = if is_distribution(scores) {
            scores.to_vec()
        } else {
            softmax(scores)
        };

        let (index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
            .ok_or(ClassifierError::UnexpectedOutput {
                expected: FreshnessLabel::ALL.len(),
                actual: 0,
            })?;

        let label = FreshnessLabel::from_index(index).ok_or(ClassifierError::UnexpectedOutput {
            expected: FreshnessLabel::ALL.len(),
            actual: scores.len(),
        })?;

        Ok(Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

fn is_distribution(scores: &[f32]) -> bool {
    let sum: f32 = scores.iter().sum();
    scores.iter().all(|s| (0.0..=1.0).contains(s)) && (sum - 1.0).abs() <= 1e-3
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Classifies one cropped candidate region. The crop is in the source color
/// order and at the source resolution; implementations own their resizing.
pub trait ModelService: Send + Sync + 'static {
    fn predict(&self, crop: &Mat) -> Result<Prediction, ClassifierError>;
}
