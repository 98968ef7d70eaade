use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, SearchDirection};

/// A single token produced by the recognition backend, with its box and a
/// confidence score on a 0–100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub origin: PassOrigin,
}

impl RecognizedWord {
    pub fn new(text: impl Into<String>, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            text: text.into(),
            bbox,
            confidence: confidence.clamp(0.0, 100.0),
            origin: PassOrigin::Primary,
        }
    }

    pub fn with_origin(mut self, origin: PassOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Which recognition pass produced a word. Duplicate tokens across passes
/// are expected and are not deduplicated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOrigin {
    Primary,
    Secondary,
}

/// Declarative keyword-to-value association policy: where to look relative
/// to a matched keyword, how far, and optionally what shape the value must
/// have. Configuration data, read-only at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialRule {
    /// Regex matched against individual word tokens to locate the keyword.
    pub keyword_pattern: String,
    pub direction: SearchDirection,
    /// Maximum center-to-center distance in pixels.
    pub max_distance: f32,
    /// Optional regex the candidate value must match.
    #[serde(default)]
    pub value_pattern: Option<String>,
}

/// Which extraction strategy produced a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Pattern,
    Spatial,
}

/// A fully extracted and normalized field — the terminal artifact of the
/// pipeline. Fields whose raw value fails normalization are dropped before
/// this struct is ever built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub name: String,
    pub raw: String,
    pub normalized: String,
    pub confidence: f32,
    pub provenance: Provenance,
}

/// Best-effort classification of the input image. Downstream stages only
/// use this to pick parameter sets; misclassification degrades quality,
/// never correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    MobileScreenshot,
    ScannedDocument,
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageType::MobileScreenshot => write!(f, "mobile_screenshot"),
            ImageType::ScannedDocument => write!(f, "scanned_document"),
        }
    }
}

/// Reporting category derived from the weighted quality score. Never used
/// to block processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityCategory {
    Excellent,
    Good,
    Regular,
    Deficient,
}

impl QualityCategory {
    pub fn from_score(score: f32) -> Self {
        if score >= 80.0 {
            QualityCategory::Excellent
        } else if score >= 60.0 {
            QualityCategory::Good
        } else if score >= 40.0 {
            QualityCategory::Regular
        } else {
            QualityCategory::Deficient
        }
    }
}

/// Outcome of a whole pipeline run. `Partial` means the run reached the end
/// but some recoverable stage reported problems; callers inspect
/// `error_messages` for details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Completed,
    Partial,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_confidence_is_clamped() {
        let b = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(RecognizedWord::new("x", b, 150.0).confidence, 100.0);
        assert_eq!(RecognizedWord::new("x", b, -5.0).confidence, 0.0);
    }

    #[test]
    fn quality_category_boundaries() {
        assert_eq!(QualityCategory::from_score(80.0), QualityCategory::Excellent);
        assert_eq!(QualityCategory::from_score(79.9), QualityCategory::Good);
        assert_eq!(QualityCategory::from_score(40.0), QualityCategory::Regular);
        assert_eq!(QualityCategory::from_score(12.0), QualityCategory::Deficient);
    }

    #[test]
    fn spatial_rule_deserializes_from_toml() {
        let rule: SpatialRule = toml::from_str(
            r#"
            keyword_pattern = "(?i)^monto"
            direction = "horizontal_right"
            max_distance = 200.0
            "#,
        )
        .unwrap();
        assert_eq!(rule.direction, SearchDirection::HorizontalRight);
        assert!(rule.value_pattern.is_none());
    }
}
