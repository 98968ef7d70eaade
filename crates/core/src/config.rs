//! Centralized tuning knobs for every heuristic in the pipeline.
//!
//! The thresholds here were discovered empirically against a corpus of
//! messaging-app payment receipts; they are deliberately plain data so a
//! deployment can override any of them from a TOML file instead of
//! patching control flow.

use serde::{Deserialize, Serialize};

/// Named processing profile selecting how aggressive the enhancer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Minimum processing, maximum speed.
    Minimal,
    /// Balance between speed and quality.
    Fast,
    /// Full corrective sequence.
    Normal,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown profile '{0}', expected minimal, fast or normal")]
pub struct ParseProfileError(String);

impl std::str::FromStr for Profile {
    type Err = ParseProfileError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(Profile::Minimal),
            "fast" => Ok(Profile::Fast),
            "normal" => Ok(Profile::Normal),
            other => Err(ParseProfileError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Profile::Minimal => write!(f, "minimal"),
            Profile::Fast => write!(f, "fast"),
            Profile::Normal => write!(f, "normal"),
        }
    }
}

/// Which corrective techniques a profile makes eligible. A technique still
/// needs its measured precondition to hold before it is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSettings {
    pub gaussian_kernel: u32,
    pub bilateral_filter: bool,
    pub morphology: bool,
    pub adaptive_threshold: bool,
    pub deskew: bool,
    pub noise_removal_iterations: u32,
    pub sharpening: bool,
}

impl ProfileSettings {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Minimal => ProfileSettings {
                gaussian_kernel: 3,
                bilateral_filter: false,
                morphology: false,
                adaptive_threshold: false,
                deskew: false,
                noise_removal_iterations: 1,
                sharpening: false,
            },
            Profile::Fast => ProfileSettings {
                gaussian_kernel: 3,
                bilateral_filter: true,
                morphology: true,
                adaptive_threshold: true,
                deskew: true,
                noise_removal_iterations: 2,
                sharpening: false,
            },
            Profile::Normal => ProfileSettings {
                gaussian_kernel: 5,
                bilateral_filter: true,
                morphology: true,
                adaptive_threshold: true,
                deskew: true,
                noise_removal_iterations: 3,
                sharpening: true,
            },
        }
    }
}

/// Thresholds for the diagnostic stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub canny_low: f32,
    pub canny_high: f32,
    pub hough_vote_threshold: u32,
    pub hough_max_lines: usize,
    /// Text-region candidate filters.
    pub text_region_min_area: u32,
    pub text_region_min_width: u32,
    pub text_region_min_height: u32,
    /// A candidate taller than this fraction of the page is not text.
    pub text_region_max_height_frac: f32,
    /// Height in pixels of the top/bottom bands inspected for UI chrome.
    pub border_band_px: u32,
    /// A band with stddev below this is considered a uniform UI bar.
    pub border_uniformity_std: f32,
    /// Dark-pixel mass fraction above which inversion is recommended.
    pub inversion_dark_mass: f32,
    /// Portrait aspect ratio below which a UI-bearing image is a screenshot.
    pub screenshot_aspect_max: f32,
    pub screenshot_narrow_width: u32,
    pub screenshot_tall_height: u32,
    /// |skew| in degrees above which deskew is recommended.
    pub deskew_threshold_deg: f32,
    /// Histogram peaks must carry at least this mass fraction to count.
    pub histogram_peak_min_mass: f32,
    /// Weights of the overall quality score: quality / text / noise / geometry.
    pub quality_weights: [f32; 4],
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        DiagnosticsConfig {
            canny_low: 50.0,
            canny_high: 150.0,
            hough_vote_threshold: 100,
            hough_max_lines: 50,
            text_region_min_area: 100,
            text_region_min_width: 10,
            text_region_min_height: 5,
            text_region_max_height_frac: 0.3,
            border_band_px: 50,
            border_uniformity_std: 10.0,
            inversion_dark_mass: 0.7,
            screenshot_aspect_max: 0.8,
            screenshot_narrow_width: 500,
            screenshot_tall_height: 800,
            deskew_threshold_deg: 2.0,
            histogram_peak_min_mass: 0.01,
            quality_weights: [0.4, 0.3, 0.2, 0.1],
        }
    }
}

/// Preconditions for the enhancer's corrective transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    /// Images larger than this on either axis are downscaled first.
    pub resize_max_dimension: u32,
    /// Global inversion only below this mean brightness.
    pub inversion_brightness_max: f32,
    /// Below this contrast (brightness stddev) use adaptive equalization.
    pub low_contrast_threshold: f32,
    /// Sharpen when Laplacian variance falls below this.
    pub sharpen_blur_threshold: f32,
    /// Noise level required before edge-preserving smoothing runs.
    pub noise_threshold_screenshot: f32,
    pub noise_threshold_scan: f32,
    /// Extreme skew is corrected even on screenshots.
    pub extreme_skew_deg: f32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        EnhanceConfig {
            resize_max_dimension: 2000,
            inversion_brightness_max: 80.0,
            low_contrast_threshold: 40.0,
            sharpen_blur_threshold: 300.0,
            noise_threshold_screenshot: 15.0,
            noise_threshold_scan: 10.0,
            extreme_skew_deg: 5.0,
        }
    }
}

/// Flat-background secondary-zone detection for the second recognition
/// pass. The two overlapping bands are OR-ed together; treat them as a
/// tunable heuristic rather than a correctness requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionDetectConfig {
    pub primary_band: (u8, u8),
    pub secondary_band: (u8, u8),
    /// Morphological radii (LInf norm): close to fill holes, open to drop
    /// speckle, then dilate to capture region borders.
    pub close_radius: u8,
    pub open_radius: u8,
    pub dilate_radius: u8,
    /// Regions below this bounding-box area (px²) are discarded.
    pub min_area: u32,
    /// Padding added around each surviving region before cropping.
    pub padding: u32,
}

impl Default for RegionDetectConfig {
    fn default() -> Self {
        RegionDetectConfig {
            primary_band: (100, 220),
            secondary_band: (120, 170),
            close_radius: 7,
            open_radius: 2,
            dilate_radius: 2,
            min_area: 500,
            padding: 10,
        }
    }
}

/// Tolerances for spatial reasoning over word boxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Words within this many pixels of a line's reference y share the line.
    pub y_tolerance: f32,
    /// Default search radius when a rule does not set its own.
    pub default_search_radius: f32,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        GeometryConfig {
            y_tolerance: 15.0,
            default_search_radius: 200.0,
        }
    }
}

/// Field-extraction scoring knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Confidence assigned to pattern-sourced fields (spatially sourced
    /// fields inherit the matched word's recognition confidence).
    pub pattern_confidence: f32,
    /// Fields counted by the completeness score.
    pub critical_fields: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            pattern_confidence: 72.0,
            critical_fields: vec!["monto".to_string(), "fecha".to_string()],
        }
    }
}

/// Aggregate configuration handed to the pipeline at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub diagnostics: DiagnosticsConfig,
    pub enhance: EnhanceConfig,
    pub regions: RegionDetectConfig,
    pub geometry: GeometryConfig,
    pub extractor: ExtractorConfig,
}

impl PipelineConfig {
    /// Parse a TOML override bundle. Missing sections and fields keep
    /// their defaults.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_round_trip() {
        use std::str::FromStr;
        for p in [Profile::Minimal, Profile::Fast, Profile::Normal] {
            assert_eq!(Profile::from_str(&p.to_string()).unwrap(), p);
        }
        assert!(Profile::from_str("turbo").is_err());
    }

    #[test]
    fn minimal_profile_disables_destructive_transforms() {
        let s = ProfileSettings::for_profile(Profile::Minimal);
        assert!(!s.adaptive_threshold);
        assert!(!s.deskew);
        assert!(!s.bilateral_filter);
    }

    #[test]
    fn toml_override_keeps_defaults_elsewhere() {
        let cfg = PipelineConfig::from_toml(
            r#"
            [geometry]
            y_tolerance = 20.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.geometry.y_tolerance, 20.0);
        assert_eq!(cfg.regions.min_area, RegionDetectConfig::default().min_area);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        assert_eq!(PipelineConfig::from_toml("").unwrap(), PipelineConfig::default());
    }
}
