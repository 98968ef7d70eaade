//! Measurement stage: every number the enhancer and the orchestrator base
//! their decisions on is computed here, in one pass, and reported back to
//! the caller unchanged.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::edges::canny;
use imageproc::filter::median_filter;
use imageproc::hough::{detect_lines, LineDetectionOptions};
use serde::Serialize;

use recibo_core::{DiagnosticsConfig, ImageType, Profile, QualityCategory};

use crate::filters;

/// Everything the diagnostic pass measured about one image. Purely
/// descriptive: nothing here mutates pixels.
#[derive(Debug, Clone, Serialize)]
pub struct ImageDiagnostics {
    pub width: u32,
    pub height: u32,
    /// Variance of the Laplacian response; low values mean blur.
    pub blur_variance: f32,
    pub brightness_mean: f32,
    /// Standard deviation of intensity, used as the contrast measure.
    pub contrast: f32,
    /// Fraction of pixels the edge detector marked.
    pub edge_density: f32,
    /// Estimated rotation of the text baselines, degrees. Positive is
    /// counter-clockwise.
    pub skew_angle: f32,
    /// Mean absolute deviation from a median-filtered copy.
    pub noise_level: f32,
    /// Connected dark regions that pass the text-shape filters.
    pub text_region_count: usize,
    /// Intensity histogram peaks carrying meaningful mass.
    pub histogram_peaks: usize,
    pub bimodal: bool,
    pub image_type: ImageType,
    /// Weighted evidence (UI chrome, dark scheme, portrait geometry,
    /// phone-sized frame) that this is a mobile screenshot.
    pub screenshot_confidence: f32,
    pub inversion_recommended: bool,
    pub deskew_recommended: bool,
    pub quality_score: f32,
    pub quality_category: QualityCategory,
    /// The lightest profile this image can afford.
    pub suggested_profile: Profile,
}

/// Measure an image. Never fails: a degenerate input simply scores badly.
pub fn diagnose(img: &GrayImage, cfg: &DiagnosticsConfig) -> ImageDiagnostics {
    let (width, height) = img.dimensions();
    let total = (width as f32 * height as f32).max(1.0);

    let blur_variance = filters::laplacian_variance(img);
    let (brightness_mean, contrast) = filters::mean_std(img);

    let edge_map = canny(img, cfg.canny_low, cfg.canny_high);
    let edge_density = edge_map.pixels().filter(|p| p[0] > 0).count() as f32 / total;

    let skew_angle = estimate_skew(&edge_map, cfg);

    let denoised = median_filter(img, 1, 1);
    let noise_level = img
        .pixels()
        .zip(denoised.pixels())
        .map(|(a, b)| (a[0] as f32 - b[0] as f32).abs())
        .sum::<f32>()
        / total;

    let text_region_count = count_text_regions(img, cfg);

    let (histogram_peaks, dark_fraction) = histogram_features(img, cfg);
    let bimodal = histogram_peaks >= 2;

    let (image_type, screenshot_confidence) = classify(img, dark_fraction, cfg);
    let inversion_recommended = dark_fraction > cfg.inversion_dark_mass;
    let deskew_recommended = skew_angle.abs() > cfg.deskew_threshold_deg;

    let quality_score = score(
        blur_variance,
        contrast,
        brightness_mean,
        text_region_count,
        noise_level,
        skew_angle,
        cfg,
    );

    // A clean image can afford the light profiles; a poor one needs the
    // full corrective sequence.
    let suggested_profile = match QualityCategory::from_score(quality_score) {
        QualityCategory::Excellent => Profile::Minimal,
        QualityCategory::Good => Profile::Fast,
        QualityCategory::Regular | QualityCategory::Deficient => Profile::Normal,
    };

    ImageDiagnostics {
        width,
        height,
        blur_variance,
        brightness_mean,
        contrast,
        edge_density,
        skew_angle,
        noise_level,
        text_region_count,
        histogram_peaks,
        bimodal,
        image_type,
        screenshot_confidence,
        inversion_recommended,
        deskew_recommended,
        quality_score,
        quality_category: QualityCategory::from_score(quality_score),
        suggested_profile,
    }
}

/// Median deviation of near-horizontal Hough lines from the horizontal.
fn estimate_skew(edge_map: &GrayImage, cfg: &DiagnosticsConfig) -> f32 {
    let options = LineDetectionOptions {
        vote_threshold: cfg.hough_vote_threshold,
        suppression_radius: 8,
    };
    let lines = detect_lines(edge_map, options);

    // A horizontal baseline has a vertical normal, i.e. a polar angle of
    // 90°. Only lines within ±45° of that are plausible baselines.
    let mut deviations: Vec<f32> = lines
        .iter()
        .take(cfg.hough_max_lines)
        .map(|l| l.angle_in_degrees as f32 - 90.0)
        .filter(|d| d.abs() <= 45.0)
        .collect();
    if deviations.is_empty() {
        return 0.0;
    }
    deviations.sort_by(f32::total_cmp);
    deviations[deviations.len() / 2]
}

/// Count dark connected components shaped like words or text lines.
fn count_text_regions(img: &GrayImage, cfg: &DiagnosticsConfig) -> usize {
    let mask: GrayImage = ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        Luma([if img.get_pixel(x, y)[0] < 128 { 255u8 } else { 0 }])
    });
    let max_region_height = img.height() as f32 * cfg.text_region_max_height_frac;

    find_contours::<i32>(&mask)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .filter(|c| {
            let (min_x, max_x) = match c.points.iter().map(|p| p.x).fold(None, min_max_fold) {
                Some(r) => r,
                None => return false,
            };
            let (min_y, max_y) = match c.points.iter().map(|p| p.y).fold(None, min_max_fold) {
                Some(r) => r,
                None => return false,
            };
            let w = (max_x - min_x + 1) as f32;
            let h = (max_y - min_y + 1) as f32;
            let aspect = w / h.max(1.0);
            w * h > cfg.text_region_min_area as f32
                && w > cfg.text_region_min_width as f32
                && h > cfg.text_region_min_height as f32
                && h < max_region_height
                && (0.1..=10.0).contains(&aspect)
        })
        .count()
}

fn min_max_fold(acc: Option<(i32, i32)>, v: i32) -> Option<(i32, i32)> {
    Some(match acc {
        None => (v, v),
        Some((mn, mx)) => (mn.min(v), mx.max(v)),
    })
}

/// Histogram peak count (local maxima carrying at least the configured
/// mass) and the dark-pixel fraction.
fn histogram_features(img: &GrayImage, cfg: &DiagnosticsConfig) -> (usize, f32) {
    let mut hist = [0u32; 256];
    for p in img.pixels() {
        hist[p[0] as usize] += 1;
    }
    let total = (img.width() * img.height()).max(1) as f32;
    let min_mass = cfg.histogram_peak_min_mass * total;

    let mut peaks = 0;
    for i in 0..256 {
        let left = if i > 0 { hist[i - 1] } else { 0 };
        let right = if i < 255 { hist[i + 1] } else { 0 };
        if hist[i] as f32 >= min_mass && hist[i] >= left && hist[i] > right {
            peaks += 1;
        }
    }

    let dark: u32 = hist[..128].iter().sum();
    (peaks, dark as f32 / total)
}

/// Screenshot vs. scan, with a weighted confidence. Screenshots show
/// uniform UI chrome bands at the top or bottom, dark color schemes, or
/// the narrow portrait geometry of a phone.
fn classify(img: &GrayImage, dark_fraction: f32, cfg: &DiagnosticsConfig) -> (ImageType, f32) {
    let (w, h) = img.dimensions();
    let band = cfg.border_band_px.min(h / 2).max(1);

    let uniform_band = |rows: std::ops::Range<u32>| {
        let view = image::imageops::crop_imm(img, 0, rows.start, w, rows.end - rows.start);
        let (_, std) = filters::mean_std(&view.to_image());
        std < cfg.border_uniformity_std
    };
    let chrome = uniform_band(0..band) || uniform_band(h - band..h);
    let dark_scheme = dark_fraction > cfg.inversion_dark_mass;
    let aspect = w as f32 / h as f32;
    let portrait = aspect < cfg.screenshot_aspect_max;
    let phone_frame = w < cfg.screenshot_narrow_width && h > cfg.screenshot_tall_height;

    let weight = |flag: bool, w: f32| if flag { w } else { 0.0 };
    let confidence = weight(chrome, 0.4)
        + weight(dark_scheme, 0.3)
        + weight(portrait, 0.2)
        + weight(phone_frame, 0.1);
    let kind = if confidence >= 0.2 {
        ImageType::MobileScreenshot
    } else {
        ImageType::ScannedDocument
    };
    (kind, confidence)
}

fn score(
    blur: f32,
    contrast: f32,
    brightness: f32,
    regions: usize,
    noise: f32,
    skew: f32,
    cfg: &DiagnosticsConfig,
) -> f32 {
    let clarity = (blur / 300.0 * 100.0).clamp(0.0, 100.0);
    let contrast_score = (contrast / 60.0 * 100.0).clamp(0.0, 100.0);
    let brightness_score = 100.0 - ((brightness - 127.5).abs() / 127.5 * 100.0);
    let quality = 0.5 * clarity + 0.3 * contrast_score + 0.2 * brightness_score;

    let text = (regions as f32 * 4.0).clamp(0.0, 100.0);
    let noise_score = (100.0 - noise * 5.0).clamp(0.0, 100.0);
    let geometry = (100.0 - skew.abs() * 10.0).clamp(0.0, 100.0);

    let [wq, wt, wn, wg] = cfg.quality_weights;
    (wq * quality + wt * text + wn * noise_score + wg * geometry).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, v: u8) -> GrayImage {
        ImageBuffer::from_fn(w, h, |_, _| Luma([v]))
    }

    fn cfg() -> DiagnosticsConfig {
        DiagnosticsConfig::default()
    }

    #[test]
    fn uniform_image_measures_flat() {
        let d = diagnose(&solid(64, 64, 128), &cfg());
        assert_eq!(d.blur_variance, 0.0);
        assert_eq!(d.edge_density, 0.0);
        assert_eq!(d.skew_angle, 0.0);
        assert_eq!(d.noise_level, 0.0);
        assert_eq!(d.histogram_peaks, 1);
        assert!(!d.bimodal);
        assert!(!d.inversion_recommended);
    }

    #[test]
    fn split_image_is_bimodal() {
        let img: GrayImage =
            ImageBuffer::from_fn(64, 64, |x, _| Luma([if x < 32 { 20 } else { 230 }]));
        let d = diagnose(&img, &cfg());
        assert!(d.bimodal);
        assert!(d.edge_density > 0.0);
    }

    #[test]
    fn mostly_dark_image_recommends_inversion() {
        let img: GrayImage =
            ImageBuffer::from_fn(64, 64, |_, y| Luma([if y < 56 { 10 } else { 250 }]));
        let d = diagnose(&img, &cfg());
        assert!(d.inversion_recommended);
    }

    #[test]
    fn text_like_rectangles_are_counted() {
        let mut img = solid(200, 200, 255);
        for (rx, ry) in [(20u32, 40u32), (20, 80), (20, 120)] {
            for y in ry..ry + 10 {
                for x in rx..rx + 30 {
                    img.put_pixel(x, y, Luma([0]));
                }
            }
        }
        let d = diagnose(&img, &cfg());
        assert_eq!(d.text_region_count, 3);
    }

    #[test]
    fn narrow_tall_image_classifies_as_screenshot() {
        // Noisy interior so the band test alone cannot decide.
        let img: GrayImage =
            ImageBuffer::from_fn(400, 900, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]));
        let d = diagnose(&img, &cfg());
        assert_eq!(d.image_type, ImageType::MobileScreenshot);
        // Portrait aspect plus phone-sized frame, no chrome or dark scheme.
        assert!((d.screenshot_confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn squarish_textured_image_classifies_as_scan() {
        let img: GrayImage =
            ImageBuffer::from_fn(700, 700, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]));
        let d = diagnose(&img, &cfg());
        assert_eq!(d.image_type, ImageType::ScannedDocument);
        assert_eq!(d.screenshot_confidence, 0.0);
    }

    #[test]
    fn poor_image_suggests_the_full_profile() {
        let d = diagnose(&solid(64, 64, 128), &cfg());
        // Blur-free of content, zero text regions: deficient quality.
        assert_eq!(d.suggested_profile, Profile::Normal);
    }

    #[test]
    fn quality_category_tracks_score() {
        let d = diagnose(&solid(64, 64, 128), &cfg());
        assert_eq!(d.quality_category, QualityCategory::from_score(d.quality_score));
    }
}
