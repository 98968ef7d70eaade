//! Adaptive enhancement: a fixed sequence of corrective transforms, each
//! gated by the profile and by the measurements from the diagnostic pass.
//! Every step is recorded whether it ran or not, with the parameters it
//! used or the reason it was skipped, so a run can be audited after the
//! fact.

use image::imageops;
use image::{GrayImage, Luma};
use imageproc::contrast::{adaptive_threshold, equalize_histogram};
use imageproc::distance_transform::Norm;
use imageproc::filter::{bilateral_filter, gaussian_blur_f32};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::morphology::open;
use serde::Serialize;
use thiserror::Error;

use recibo_core::{EnhanceConfig, ImageType, ProfileSettings};

use crate::diagnostics::ImageDiagnostics;
use crate::filters;

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("image too small to enhance: {width}x{height}")]
    TooSmall { width: u32, height: u32 },
}

/// One entry in the enhancement audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct EnhancementStep {
    pub name: &'static str,
    pub applied: bool,
    /// Parameters used, or the reason the step was skipped.
    pub detail: String,
}

/// Ordered record of every step the enhancer considered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnhancementReport {
    pub steps: Vec<EnhancementStep>,
}

impl EnhancementReport {
    fn applied(&mut self, name: &'static str, detail: impl Into<String>) {
        self.steps.push(EnhancementStep { name, applied: true, detail: detail.into() });
    }

    fn skipped(&mut self, name: &'static str, reason: impl Into<String>) {
        self.steps.push(EnhancementStep { name, applied: false, detail: reason.into() });
    }

    pub fn was_applied(&self, name: &str) -> bool {
        self.steps.iter().any(|s| s.name == name && s.applied)
    }
}

/// Enhanced pixels plus the audit trail that produced them.
#[derive(Debug)]
pub struct Enhanced {
    pub image: GrayImage,
    pub report: EnhancementReport,
}

/// Run the corrective sequence. The input image is never mutated.
pub fn enhance(
    img: &GrayImage,
    diag: &ImageDiagnostics,
    settings: &ProfileSettings,
    cfg: &EnhanceConfig,
) -> Result<Enhanced, EnhanceError> {
    enhance_observed(img, diag, settings, cfg, |_, _| {})
}

/// Same as [`enhance`] but calls `observe` with the intermediate image
/// after each applied step, for snapshot debugging.
pub fn enhance_observed(
    img: &GrayImage,
    diag: &ImageDiagnostics,
    settings: &ProfileSettings,
    cfg: &EnhanceConfig,
    mut observe: impl FnMut(&'static str, &GrayImage),
) -> Result<Enhanced, EnhanceError> {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return Err(EnhanceError::TooSmall { width, height });
    }

    let mut report = EnhancementReport::default();
    let mut work = img.clone();
    let screenshot = diag.image_type == ImageType::MobileScreenshot;

    // 1. Downscale oversized inputs. Recognition gains nothing past ~2000px
    //    and everything after this runs on fewer pixels.
    let max_dim = work.width().max(work.height());
    if max_dim > cfg.resize_max_dimension {
        let scale = cfg.resize_max_dimension as f32 / max_dim as f32;
        let nw = ((work.width() as f32 * scale) as u32).max(1);
        let nh = ((work.height() as f32 * scale) as u32).max(1);
        work = imageops::resize(&work, nw, nh, imageops::FilterType::Lanczos3);
        report.applied("resize", format!("{}x{} -> {nw}x{nh}", img.width(), img.height()));
        observe("resize", &work);
    } else {
        report.skipped("resize", format!("max dimension {max_dim} within limit"));
    }

    // 2. Photometric inversion for white-on-black screenshots.
    if diag.inversion_recommended && diag.brightness_mean < cfg.inversion_brightness_max {
        work = filters::invert(&work);
        report.applied("invert", format!("mean brightness {:.1}", diag.brightness_mean));
        observe("invert", &work);
    } else {
        report.skipped("invert", "image is predominantly light");
    }

    // 3. Deskew. Screenshots are pixel-aligned by construction, so mild
    //    skew there is a measurement artifact; only extreme angles are
    //    corrected on them.
    let skew = diag.skew_angle;
    let wants_deskew = (diag.deskew_recommended && !screenshot) || skew.abs() > cfg.extreme_skew_deg;
    if settings.deskew && wants_deskew {
        let theta = -skew.to_radians();
        work = rotate_about_center(&work, theta, Interpolation::Bilinear, Luma([255]));
        report.applied("deskew", format!("rotated {:.2} deg", -skew));
        observe("deskew", &work);
    } else if !settings.deskew {
        report.skipped("deskew", "disabled by profile");
    } else if screenshot && diag.deskew_recommended {
        report.skipped("deskew", format!("screenshot with mild skew {skew:.2} deg"));
    } else {
        report.skipped("deskew", format!("skew {skew:.2} deg below threshold"));
    }

    // 4. Noise removal: edge-preserving when the profile allows it, a
    //    plain Gaussian pass otherwise. Screenshots get at most one
    //    iteration; their "noise" is mostly anti-aliased UI text.
    let noise_threshold = if screenshot {
        cfg.noise_threshold_screenshot
    } else {
        cfg.noise_threshold_scan
    };
    if diag.noise_level > noise_threshold {
        let iterations = if screenshot { 1 } else { settings.noise_removal_iterations };
        if settings.bilateral_filter {
            for _ in 0..iterations {
                work = bilateral_filter(&work, 4, 25.0, 25.0);
            }
            report.applied(
                "denoise",
                format!("bilateral x{iterations}, noise {:.1} > {:.1}", diag.noise_level, noise_threshold),
            );
        } else {
            let sigma = settings.gaussian_kernel as f32 / 3.0;
            for _ in 0..iterations {
                work = gaussian_blur_f32(&work, sigma);
            }
            report.applied(
                "denoise",
                format!("gaussian sigma {sigma:.2} x{iterations}, noise {:.1}", diag.noise_level),
            );
        }
        observe("denoise", &work);
    } else {
        report.skipped(
            "denoise",
            format!("noise {:.1} within tolerance {:.1}", diag.noise_level, noise_threshold),
        );
    }

    // 5. Contrast. Genuinely flat images get histogram equalization; the
    //    rest only a linear stretch, which never amplifies noise.
    if diag.contrast < cfg.low_contrast_threshold {
        work = equalize_histogram(&work);
        report.applied("contrast", format!("equalized, contrast {:.1}", diag.contrast));
    } else {
        work = filters::stretch_contrast(&work);
        report.applied("contrast", format!("stretched, contrast {:.1}", diag.contrast));
    }
    observe("contrast", &work);

    // 6. Sharpening, before binarization so the threshold sees crisp
    //    strokes. Screenshots take the stronger kernel; their strokes are
    //    thin and anti-aliased.
    if settings.sharpening && (diag.blur_variance < cfg.sharpen_blur_threshold || screenshot) {
        let kernel = if screenshot {
            [-1, -1, -1, -1, 9, -1, -1, -1, -1]
        } else {
            [0, -1, 0, -1, 5, -1, 0, -1, 0]
        };
        work = filters::convolve3x3_clamped(&work, kernel);
        report.applied("sharpen", format!("blur variance {:.1}", diag.blur_variance));
        observe("sharpen", &work);
    } else if !settings.sharpening {
        report.skipped("sharpen", "disabled by profile");
    } else {
        report.skipped("sharpen", format!("blur variance {:.1} is sharp enough", diag.blur_variance));
    }

    // 7. Adaptive binarization, block size chosen by overall brightness.
    if settings.adaptive_threshold {
        let block_radius = if diag.brightness_mean < 80.0 {
            7
        } else if diag.brightness_mean > 180.0 {
            4
        } else {
            5
        };
        work = adaptive_threshold(&work, block_radius);
        report.applied("binarize", format!("adaptive, block radius {block_radius}"));
        observe("binarize", &work);
    } else {
        report.skipped("binarize", "disabled by profile");
    }

    // 8. Morphological opening to drop residual speckle from the binary
    //    image.
    if settings.morphology && settings.adaptive_threshold {
        work = open(&work, Norm::LInf, 1);
        report.applied("morphology", "open, radius 1");
        observe("morphology", &work);
    } else {
        report.skipped("morphology", "disabled by profile or no binary input");
    }

    Ok(Enhanced { image: work, report })
}
