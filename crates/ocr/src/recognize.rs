//! Recognition engine: backend abstraction, the dual-pass strategy, and
//! the text cleanup applied to raw recognizer output.
//!
//! The primary pass runs over the whole enhanced image. A second pass
//! then re-reads flat mid-gray regions (buttons, highlighted rows) that
//! binarization tends to wash out; its words are appended, never merged,
//! and carry their own origin tag.

use std::collections::VecDeque;
use std::sync::Mutex;

use image::imageops;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, dilate, open};
use thiserror::Error;

use recibo_core::{
    BoundingBox, GeometryConfig, PassOrigin, RecognizedWord, RegionDetectConfig,
};

use crate::re;
use crate::spatial;

/// Marker inserted between primary and secondary text in the flat output.
pub const SECONDARY_SEPARATOR: &str = "--- TEXTO DE ZONAS SECUNDARIAS ---";

#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error("recognition backend error: {0}")]
    Backend(String),
}

/// Per-run options forwarded to the backend on every pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizeOptions {
    /// Language code handed to the backend (a Tesseract traineddata name
    /// for the real engine).
    pub language: String,
}

impl Default for RecognizeOptions {
    fn default() -> Self {
        RecognizeOptions { language: "spa".to_string() }
    }
}

/// Abstraction over a word-level OCR backend. Implementations return
/// recognized words with boxes in the coordinate space of the image they
/// were given.
pub trait RecognitionBackend: Send + Sync {
    fn recognize(
        &self,
        image: &GrayImage,
        options: &RecognizeOptions,
    ) -> Result<Vec<RecognizedWord>, RecognizeError>;
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns pre-scripted word sets, one per call — useful for exercising
/// the dual-pass engine and the extraction stages without a real OCR
/// engine. Once the script runs out, further calls return no words.
pub struct MockRecognizer {
    pages: Mutex<VecDeque<Vec<RecognizedWord>>>,
}

impl MockRecognizer {
    pub fn new(words: Vec<RecognizedWord>) -> Self {
        Self::scripted(vec![words])
    }

    pub fn scripted(pages: Vec<Vec<RecognizedWord>>) -> Self {
        Self { pages: Mutex::new(pages.into()) }
    }

    /// Lay plain text out as synthetic word boxes: one line per input
    /// line, words left to right.
    pub fn from_text(text: &str) -> Self {
        let mut words = Vec::new();
        for (row, line) in text.lines().enumerate() {
            let y = row as f32 * 40.0;
            for (col, token) in line.split_whitespace().enumerate() {
                let x = col as f32 * 80.0;
                words.push(RecognizedWord::new(
                    token,
                    BoundingBox::new(x, y, x + 70.0, y + 20.0),
                    90.0,
                ));
            }
        }
        Self::new(words)
    }
}

impl RecognitionBackend for MockRecognizer {
    fn recognize(
        &self,
        _image: &GrayImage,
        _options: &RecognizeOptions,
    ) -> Result<Vec<RecognizedWord>, RecognizeError> {
        let mut pages = self.pages.lock().expect("mock script lock poisoned");
        Ok(pages.pop_front().unwrap_or_default())
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{RecognitionBackend, RecognizeError, RecognizeOptions};
    use image::GrayImage;
    use leptess::LepTess;
    use recibo_core::{BoundingBox, RecognizedWord};
    use std::sync::Mutex;

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        /// The engine together with the language it was initialized for;
        /// a run requesting a different language re-initializes it.
        inner: Mutex<(LepTess, String)>,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<&str>, lang: &str) -> Result<Self, RecognizeError> {
            let lt = LepTess::new(data_path, lang)
                .map_err(|e| RecognizeError::Backend(e.to_string()))?;
            Ok(Self {
                data_path: data_path.map(str::to_string),
                inner: Mutex::new((lt, lang.to_string())),
            })
        }
    }

    impl RecognitionBackend for TesseractRecognizer {
        fn recognize(
            &self,
            image: &GrayImage,
            options: &RecognizeOptions,
        ) -> Result<Vec<RecognizedWord>, RecognizeError> {
            let mut png = Vec::new();
            image::DynamicImage::ImageLuma8(image.clone())
                .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
                .map_err(|e| RecognizeError::Backend(e.to_string()))?;

            let mut guard = self.inner.lock().expect("tesseract lock poisoned");
            if guard.1 != options.language {
                guard.0 = LepTess::new(self.data_path.as_deref(), &options.language)
                    .map_err(|e| RecognizeError::Backend(e.to_string()))?;
                guard.1 = options.language.clone();
            }
            guard
                .0
                .set_image_from_mem(&png)
                .map_err(|e| RecognizeError::Backend(e.to_string()))?;
            let tsv = guard
                .0
                .get_tsv_text(0)
                .map_err(|e| RecognizeError::Backend(e.to_string()))?;
            Ok(parse_tsv(&tsv))
        }
    }

    /// Tesseract TSV: level page block par line word left top width height conf text.
    fn parse_tsv(tsv: &str) -> Vec<RecognizedWord> {
        let mut words = Vec::new();
        for line in tsv.lines() {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                continue;
            }
            let (Ok(left), Ok(top), Ok(w), Ok(h), Ok(conf)) = (
                cols[6].parse::<f32>(),
                cols[7].parse::<f32>(),
                cols[8].parse::<f32>(),
                cols[9].parse::<f32>(),
                cols[10].parse::<f32>(),
            ) else {
                continue;
            };
            let text = cols[11].trim();
            if text.is_empty() || conf < 0.0 {
                continue;
            }
            words.push(RecognizedWord::new(
                text,
                BoundingBox::new(left, top, left + w, top + h),
                conf,
            ));
        }
        words
    }
}

// ── Text cleanup ───────────────────────────────────────────────────────────────

re!(re_digit_run, r"(\d{4,})");
re!(re_date_like, r"(\d{1,2}/\d{1,2}/\s?\d{2,4})");
re!(re_mask_run, r"\s*(\*{2,})\s*");
re!(re_symbol_then_letter, r"([*/:;])([A-Za-zÁÉÍÓÚÑáéíóúñ])");
re!(re_spaces, r"[ \t]{2,}");

/// Re-space raw recognizer output so downstream patterns see clean token
/// boundaries. Rules run in a fixed order; spacing long digit runs before
/// dates means a year inside a date can end up as "20/06/ 2025", which the
/// date normalizer tolerates.
pub fn clean_text(text: &str) -> String {
    let t = re_digit_run().replace_all(text, " $1 ");
    let t = re_date_like().replace_all(&t, " $1 ");
    let t = re_mask_run().replace_all(&t, " $1 ");
    let t = re_symbol_then_letter().replace_all(&t, "$1 $2");
    let t = re_spaces().replace_all(&t, " ");
    t.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Secondary-zone detection ───────────────────────────────────────────────────

/// Find flat mid-gray regions worth a second recognition pass. Two
/// intensity bands are OR-ed into a mask, cleaned up morphologically, and
/// the surviving connected components become padded crop boxes.
pub fn detect_secondary_regions(img: &GrayImage, cfg: &RegionDetectConfig) -> Vec<BoundingBox> {
    let in_band = |v: u8, (lo, hi): (u8, u8)| v >= lo && v <= hi;
    let mask: GrayImage = ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let v = img.get_pixel(x, y)[0];
        Luma([if in_band(v, cfg.primary_band) || in_band(v, cfg.secondary_band) {
            255u8
        } else {
            0
        }])
    });

    let mask = close(&mask, Norm::LInf, cfg.close_radius);
    let mask = open(&mask, Norm::LInf, cfg.open_radius);
    let mask = dilate(&mask, Norm::LInf, cfg.dilate_radius);

    let (w, h) = (img.width() as f32, img.height() as f32);
    let pad = cfg.padding as f32;
    let mut regions = Vec::new();
    for contour in find_contours::<i32>(&mask) {
        if contour.border_type != BorderType::Outer || contour.points.is_empty() {
            continue;
        }
        let min_x = contour.points.iter().map(|p| p.x).min().unwrap_or(0) as f32;
        let max_x = contour.points.iter().map(|p| p.x).max().unwrap_or(0) as f32;
        let min_y = contour.points.iter().map(|p| p.y).min().unwrap_or(0) as f32;
        let max_y = contour.points.iter().map(|p| p.y).max().unwrap_or(0) as f32;
        let bbox = BoundingBox::new(
            (min_x - pad).max(0.0),
            (min_y - pad).max(0.0),
            (max_x + pad).min(w),
            (max_y + pad).min(h),
        );
        if bbox.area() >= cfg.min_area as f32 {
            regions.push(bbox);
        }
    }
    regions
}

// ── Dual-pass engine ───────────────────────────────────────────────────────────

/// Output of one dual-pass run: merged words (primary first), the flat
/// text before and after cleanup, and any recoverable trouble along the
/// way.
#[derive(Debug)]
pub struct RecognitionOutput {
    pub words: Vec<RecognizedWord>,
    /// Reading-order concatenation as the backend produced it.
    pub raw_text: String,
    /// Same concatenation after the re-spacing cleanup pass.
    pub text: String,
    pub secondary_region_count: usize,
    pub warnings: Vec<String>,
}

pub struct RecognitionEngine<B: RecognitionBackend> {
    backend: B,
    regions: RegionDetectConfig,
    geometry: GeometryConfig,
}

impl<B: RecognitionBackend> RecognitionEngine<B> {
    pub fn new(backend: B, regions: RegionDetectConfig, geometry: GeometryConfig) -> Self {
        Self { backend, regions, geometry }
    }

    /// Run the primary pass and, where secondary zones exist, the second
    /// pass. A primary failure is fatal; a failure inside a single zone
    /// only costs that zone.
    pub fn recognize_dual_pass(
        &self,
        img: &GrayImage,
        options: &RecognizeOptions,
    ) -> Result<RecognitionOutput, RecognizeError> {
        let primary = self.backend.recognize(img, options)?;
        tracing::debug!(words = primary.len(), "primary recognition pass done");

        let zones = detect_secondary_regions(img, &self.regions);
        let mut secondary: Vec<RecognizedWord> = Vec::new();
        let mut warnings = Vec::new();
        for (i, zone) in zones.iter().enumerate() {
            let crop = imageops::crop_imm(
                img,
                zone.x1 as u32,
                zone.y1 as u32,
                zone.width().max(1.0) as u32,
                zone.height().max(1.0) as u32,
            )
            .to_image();
            match self.backend.recognize(&crop, options) {
                Ok(words) => {
                    secondary.extend(words.into_iter().map(|word| {
                        let bbox = word.bbox.offset(zone.x1, zone.y1);
                        RecognizedWord { bbox, ..word }.with_origin(PassOrigin::Secondary)
                    }));
                }
                Err(e) => {
                    tracing::warn!(zone = i, error = %e, "secondary zone pass failed");
                    warnings.push(format!("secondary zone {i}: {e}"));
                }
            }
        }

        let y_tol = self.geometry.y_tolerance;
        let mut raw_text = spatial::reading_order_text(&primary, y_tol);
        if !secondary.is_empty() {
            let secondary_raw = spatial::reading_order_text(&secondary, y_tol);
            raw_text = format!("{raw_text}\n{SECONDARY_SEPARATOR}\n{secondary_raw}");
        }
        let text = clean_text(&raw_text);

        let mut words = primary;
        words.extend(secondary);
        Ok(RecognitionOutput {
            words,
            raw_text,
            text,
            secondary_region_count: zones.len(),
            warnings,
        })
    }
}
