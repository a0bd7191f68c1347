//! Mapping raw similarity to calibrated confidence.
//!
//! Every calibration is a fixed, monotonic non-decreasing function of the
//! similarity score. Nothing is learned at query time: the only corpus input
//! is the similarity profile sampled once when the index was built.

use medrag_vector_store::SimilarityProfile;
use serde::{Deserialize, Serialize};

/// How similarity is turned into confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Calibration {
    /// `1 / (1 + e^(-steepness * (similarity - midpoint)))`.
    Sigmoid { midpoint: f32, steepness: f32 },

    /// Min-max normalization against the corpus similarity profile, clamped
    /// to [0, 1].
    CorpusMinMax,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration::Sigmoid {
            midpoint: 0.5,
            steepness: 10.0,
        }
    }
}

/// A calibration bound to the profile of a specific index.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceModel {
    calibration: Calibration,
    profile: SimilarityProfile,
}

impl ConfidenceModel {
    pub fn new(calibration: Calibration, profile: SimilarityProfile) -> Self {
        Self {
            calibration,
            profile,
        }
    }

    /// Confidence in [0, 1] for a similarity score.
    pub fn confidence(&self, similarity: f32) -> f32 {
        let value = match self.calibration {
            Calibration::Sigmoid {
                midpoint,
                steepness,
            } => 1.0 / (1.0 + (-steepness * (similarity - midpoint)).exp()),
            Calibration::CorpusMinMax => {
                let span = self.profile.max - self.profile.min;
                if span <= f32::EPSILON {
                    if similarity >= self.profile.max { 1.0 } else { 0.0 }
                } else {
                    (similarity - self.profile.min) / span
                }
            }
        };
        value.clamp(0.0, 1.0)
    }
}

/// Coarse confidence label shown alongside results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Low,
    Moderate,
    High,
}

/// Thresholds separating the confidence bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceBands {
    /// Confidence below this is `Low`.
    pub low_below: f32,

    /// Confidence at or above this is `High`.
    pub high_at_or_above: f32,
}

impl Default for ConfidenceBands {
    fn default() -> Self {
        Self {
            low_below: 0.7,
            high_at_or_above: 0.85,
        }
    }
}

impl ConfidenceBands {
    pub fn classify(&self, confidence: f32) -> ConfidenceBand {
        if confidence < self.low_below {
            ConfidenceBand::Low
        } else if confidence >= self.high_at_or_above {
            ConfidenceBand::High
        } else {
            ConfidenceBand::Moderate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn profile() -> SimilarityProfile {
        SimilarityProfile {
            min: -0.2,
            max: 0.8,
            mean: 0.3,
        }
    }

    #[test]
    fn test_confidence_is_monotonic_for_sampled_pairs() {
        let mut rng = StdRng::seed_from_u64(3);
        let models = [
            ConfidenceModel::new(Calibration::default(), profile()),
            ConfidenceModel::new(Calibration::CorpusMinMax, profile()),
            ConfidenceModel::new(
                Calibration::Sigmoid {
                    midpoint: 0.0,
                    steepness: 3.0,
                },
                profile(),
            ),
        ];

        for model in &models {
            for _ in 0..1000 {
                let a = rng.random_range(-1.0f32..=1.0);
                let b = rng.random_range(-1.0f32..=1.0);
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                let (c_lo, c_hi) = (model.confidence(lo), model.confidence(hi));
                assert!(c_lo <= c_hi, "{model:?}: f({lo}) = {c_lo} > f({hi}) = {c_hi}");
                assert!((0.0..=1.0).contains(&c_lo) && (0.0..=1.0).contains(&c_hi));
            }
        }
    }

    #[test]
    fn test_min_max_uses_profile_bounds() {
        let model = ConfidenceModel::new(Calibration::CorpusMinMax, profile());
        assert_eq!(model.confidence(-0.2), 0.0);
        assert_eq!(model.confidence(-0.9), 0.0);
        assert_eq!(model.confidence(0.8), 1.0);
        assert!((model.confidence(0.3) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid_is_centred_on_midpoint() {
        let model = ConfidenceModel::new(Calibration::default(), profile());
        assert!((model.confidence(0.5) - 0.5).abs() < 1e-6);
        assert!(model.confidence(1.0) < 1.0);
    }

    #[test]
    fn test_bands() {
        let bands = ConfidenceBands::default();
        assert_eq!(bands.classify(0.5), ConfidenceBand::Low);
        assert_eq!(bands.classify(0.7), ConfidenceBand::Moderate);
        assert_eq!(bands.classify(0.85), ConfidenceBand::High);
    }
}
