//! The crack classifier: a loaded model plus its vocabulary.
//!
//! Built once at startup and shared read-only by every request. Confidence
//! is always the probability of the positive ("crack present") class, even
//! when another class wins the argmax.

use image::DynamicImage;
use ndarray::Array4;
use std::path::Path;
use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::error::ServiceError;
use crate::model::artifact::{self, ArtifactMetadata};
use crate::model::loader::OnnxClassifier;
use crate::preprocessing::image::{to_tensor, Normalization};

/// Index used for the positive class when the vocabulary lacks it and the
/// fallback is enabled.
pub const FALLBACK_POSITIVE_INDEX: usize = 1;

/// Forward pass over a preprocessed `[1, 3, H, W]` batch, returning one raw
/// score per vocabulary entry.
pub trait Classifier: Send + Sync {
    fn scores(&self, input: Array4<f32>) -> Result<Vec<f32>, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Crack,
    NoCrack,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Crack => "Crack",
            Verdict::NoCrack => "No Crack",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub verdict: Verdict,
    /// Probability of the positive class, in `[0, 1]`.
    pub p_crack: f32,
}

pub struct InferenceService {
    classifier: Box<dyn Classifier>,
    vocab: Vec<String>,
    positive_idx: usize,
    normalization: Normalization,
    apply_softmax: bool,
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("vocab", &self.vocab)
            .field("positive_idx", &self.positive_idx)
            .field("normalization", &self.normalization)
            .field("apply_softmax", &self.apply_softmax)
            .finish_non_exhaustive()
    }
}

impl InferenceService {
    /// Reads the artifact bundle at `path` and builds an ONNX Runtime session
    /// from it.
    pub fn load(path: impl AsRef<Path>, config: &ModelConfig) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let bundle = artifact::read_bundle(path)?;
        let classifier = OnnxClassifier::from_bytes(&bundle.model, config.intra_threads)?;

        info!(
            path = %path.display(),
            arch = bundle.metadata.arch.as_deref().unwrap_or("unknown"),
            export_path = ?bundle.metadata.export_path,
            vocab = ?bundle.metadata.vocab,
            "Loaded model"
        );

        Self::new(Box::new(classifier), &bundle.metadata, config)
    }

    pub fn new(
        classifier: Box<dyn Classifier>,
        metadata: &ArtifactMetadata,
        config: &ModelConfig,
    ) -> Result<Self, ServiceError> {
        let positive_idx = resolve_positive_index(
            &metadata.vocab,
            &config.positive_class,
            config.positive_fallback,
        )?;

        Ok(Self {
            classifier,
            vocab: metadata.vocab.clone(),
            positive_idx,
            normalization: Normalization::from(metadata),
            apply_softmax: metadata.apply_softmax,
        })
    }

    pub fn vocab(&self) -> &[String] {
        &self.vocab
    }

    pub fn positive_index(&self) -> usize {
        self.positive_idx
    }

    /// Scores a decoded image.
    pub fn predict(&self, img: &DynamicImage) -> Result<Prediction, ServiceError> {
        let input = to_tensor(img, &self.normalization)?;
        let scores = self.classifier.scores(input)?;

        if scores.len() != self.vocab.len() {
            return Err(ServiceError::Inference(format!(
                "model produced {} scores for a vocabulary of {} classes",
                scores.len(),
                self.vocab.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ServiceError::Inference(format!(
                "model produced non-finite scores {:?}",
                scores
            )));
        }

        let probs = if self.apply_softmax {
            softmax(&scores)
        } else {
            scores
        };

        let winner = argmax(&probs);
        let verdict = if winner == self.positive_idx {
            Verdict::Crack
        } else {
            Verdict::NoCrack
        };

        Ok(Prediction {
            verdict,
            p_crack: probs[self.positive_idx].clamp(0.0, 1.0),
        })
    }
}

fn resolve_positive_index(
    vocab: &[String],
    positive_class: &str,
    fallback: bool,
) -> Result<usize, ServiceError> {
    if let Some(idx) = vocab.iter().position(|class| class == positive_class) {
        return Ok(idx);
    }

    if fallback && vocab.len() > FALLBACK_POSITIVE_INDEX {
        warn!(
            positive_class,
            vocab = ?vocab,
            index = FALLBACK_POSITIVE_INDEX,
            "positive class missing from vocabulary, falling back to fixed index"
        );
        return Ok(FALLBACK_POSITIVE_INDEX);
    }

    Err(ServiceError::Artifact(format!(
        "positive class {:?} not in vocabulary {:?}",
        positive_class, vocab
    )))
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// First index holding the maximum; ties go to the lower index.
fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_val), (i, &v)| {
            if v > best_val {
                (i, v)
            } else {
                (best, best_val)
            }
        })
        .0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::RgbImage;

    /// Returns the same scores for every input.
    pub(crate) struct FixedScores(pub Vec<f32>);

    impl Classifier for FixedScores {
        fn scores(&self, input: Array4<f32>) -> Result<Vec<f32>, ServiceError> {
            assert_eq!(input.shape()[0], 1);
            Ok(self.0.clone())
        }
    }

    pub(crate) fn metadata(vocab: &[&str], apply_softmax: bool) -> ArtifactMetadata {
        let json = serde_json::json!({
            "vocab": vocab,
            "input_size": [32, 32],
            "apply_softmax": apply_softmax,
        });
        ArtifactMetadata::from_json(json.to_string().as_bytes()).unwrap()
    }

    /// Service over `["Negative", "Positive"]` whose model outputs `probs`.
    pub(crate) fn service_with_probs(probs: Vec<f32>) -> InferenceService {
        InferenceService::new(
            Box::new(FixedScores(probs)),
            &metadata(&["Negative", "Positive"], false),
            &ModelConfig::default(),
        )
        .unwrap()
    }

    fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, image::Rgb([90, 90, 90])))
    }

    #[test]
    fn test_positive_winner_is_crack() {
        let service = service_with_probs(vec![0.127, 0.873]);
        let prediction = service.predict(&sample_image()).unwrap();
        assert_eq!(prediction.verdict, Verdict::Crack);
        assert!((prediction.p_crack - 0.873).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_is_positive_mass_not_winner() {
        let service = service_with_probs(vec![0.7, 0.3]);
        let prediction = service.predict(&sample_image()).unwrap();
        assert_eq!(prediction.verdict, Verdict::NoCrack);
        assert!((prediction.p_crack - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_positive_class_found_by_name() {
        let service = InferenceService::new(
            Box::new(FixedScores(vec![0.25, 0.75])),
            &metadata(&["Positive", "Negative"], false),
            &ModelConfig::default(),
        )
        .unwrap();
        assert_eq!(service.positive_index(), 0);

        let prediction = service.predict(&sample_image()).unwrap();
        assert_eq!(prediction.verdict, Verdict::NoCrack);
        assert!((prediction.p_crack - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_missing_positive_class_is_startup_error() {
        let result = InferenceService::new(
            Box::new(FixedScores(vec![0.5, 0.5])),
            &metadata(&["intact", "cracked"], false),
            &ModelConfig::default(),
        );
        assert!(matches!(result, Err(ServiceError::Artifact(_))));
    }

    #[test]
    fn test_fallback_index_when_enabled() {
        let config = ModelConfig {
            positive_fallback: true,
            ..ModelConfig::default()
        };
        let service = InferenceService::new(
            Box::new(FixedScores(vec![0.1, 0.9])),
            &metadata(&["intact", "cracked"], false),
            &config,
        )
        .unwrap();
        assert_eq!(service.positive_index(), FALLBACK_POSITIVE_INDEX);

        let prediction = service.predict(&sample_image()).unwrap();
        assert_eq!(prediction.verdict, Verdict::Crack);
        assert!((prediction.p_crack - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_custom_positive_class_name() {
        let config = ModelConfig {
            positive_class: "cracked".to_string(),
            ..ModelConfig::default()
        };
        let service = InferenceService::new(
            Box::new(FixedScores(vec![0.6, 0.4])),
            &metadata(&["cracked", "intact"], false),
            &config,
        )
        .unwrap();
        assert_eq!(service.positive_index(), 0);
    }

    #[test]
    fn test_softmax_applied_to_logits() {
        let service = InferenceService::new(
            Box::new(FixedScores(vec![0.0, 2.0])),
            &metadata(&["Negative", "Positive"], true),
            &ModelConfig::default(),
        )
        .unwrap();
        let prediction = service.predict(&sample_image()).unwrap();

        let expected = 2.0f32.exp() / (1.0 + 2.0f32.exp());
        assert_eq!(prediction.verdict, Verdict::Crack);
        assert!((prediction.p_crack - expected).abs() < 1e-5);
    }

    #[test]
    fn test_confidence_always_in_unit_interval() {
        for logits in [vec![-50.0, 50.0], vec![50.0, -50.0], vec![0.0, 0.0], vec![3.5, -1.25]] {
            let service = InferenceService::new(
                Box::new(FixedScores(logits)),
                &metadata(&["Negative", "Positive"], true),
                &ModelConfig::default(),
            )
            .unwrap();
            let prediction = service.predict(&sample_image()).unwrap();
            assert!((0.0..=1.0).contains(&prediction.p_crack));
            assert!(matches!(prediction.verdict, Verdict::Crack | Verdict::NoCrack));
        }
    }

    #[test]
    fn test_score_count_mismatch_is_inference_error() {
        let service = service_with_probs(vec![0.2, 0.3, 0.5]);
        match service.predict(&sample_image()) {
            Err(ServiceError::Inference(msg)) => assert!(msg.contains("3 scores")),
            other => panic!("Expected Inference error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_scores_are_rejected() {
        let service = service_with_probs(vec![f32::NAN, 0.5]);
        assert!(matches!(
            service.predict(&sample_image()),
            Err(ServiceError::Inference(_))
        ));
    }

    #[test]
    fn test_argmax_ties_prefer_lower_index() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.2, 0.7]), 2);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Crack.to_string(), "Crack");
        assert_eq!(Verdict::NoCrack.to_string(), "No Crack");
    }

    /// Packs the channel-mean ONNX graph with a plain `[0, 1]` normalization,
    /// so the two scores are the image's mean red and mean green.
    fn channel_mean_bundle(dir: &Path, vocab: &[&str]) -> std::path::PathBuf {
        let path = dir.join("channel_mean.tar.gz");
        let metadata = serde_json::json!({
            "vocab": vocab,
            "input_size": [16, 16],
            "mean": [0.0, 0.0, 0.0],
            "std": [1.0, 1.0, 1.0],
            "apply_softmax": true,
            "arch": "channel-mean",
        });
        artifact::write_bundle(
            &path,
            metadata.to_string().as_bytes(),
            crate::model::loader::tests::CHANNEL_MEAN_ONNX,
        )
        .unwrap();
        path
    }

    fn solid(rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(48, 36, image::Rgb(rgb)))
    }

    fn single_thread() -> ModelConfig {
        ModelConfig {
            intra_threads: 1,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_onnx_bundle_green_image_is_crack() {
        let dir = tempfile::tempdir().unwrap();
        let path = channel_mean_bundle(dir.path(), &["Negative", "Positive"]);
        let service = InferenceService::load(&path, &single_thread()).unwrap();

        // Logits [0.2, 0.8] -> softmax puts 1 / (1 + e^-0.6) on Positive
        let prediction = service.predict(&solid([51, 204, 0])).unwrap();
        assert_eq!(prediction.verdict, Verdict::Crack);
        assert!((prediction.p_crack - 0.645_656).abs() < 1e-4);
    }

    #[test]
    fn test_onnx_bundle_red_image_is_no_crack() {
        let dir = tempfile::tempdir().unwrap();
        let path = channel_mean_bundle(dir.path(), &["Negative", "Positive"]);
        let service = InferenceService::load(&path, &single_thread()).unwrap();

        let prediction = service.predict(&solid([204, 51, 0])).unwrap();
        assert_eq!(prediction.verdict, Verdict::NoCrack);
        assert!((prediction.p_crack - 0.354_344).abs() < 1e-4);
    }

    #[test]
    fn test_onnx_bundle_positive_class_not_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = channel_mean_bundle(dir.path(), &["Positive", "Negative"]);
        let service = InferenceService::load(&path, &single_thread()).unwrap();

        // Red now drives the Positive score
        let prediction = service.predict(&solid([204, 51, 0])).unwrap();
        assert_eq!(prediction.verdict, Verdict::Crack);
        assert!(prediction.p_crack > 0.5);
    }

    #[test]
    fn test_onnx_bundle_vocab_larger_than_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = channel_mean_bundle(dir.path(), &["Negative", "Positive", "Spalling"]);
        let service = InferenceService::load(&path, &single_thread()).unwrap();

        match service.predict(&solid([51, 204, 0])) {
            Err(ServiceError::Inference(msg)) => assert!(msg.contains("2 scores")),
            other => panic!("Expected Inference error, got {:?}", other),
        }
    }
}
