//! Orchestration: decode → diagnose → enhance → recognize → extract.
//!
//! `process_bytes` always hands back a `StructuredResult`. A fatal problem
//! (undecodable image, primary recognition failure) produces a `Failed`
//! result that still carries whatever stages completed; recoverable
//! trouble is collected in `error_messages` and downgrades the run to
//! `Partial`. An enhancement failure falls back to the unenhanced
//! grayscale and the run continues.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use recibo_core::{
    ExtractedField, PipelineConfig, ProcessingStatus, Profile, ProfileSettings, Provenance,
    RecognizedWord,
};

use crate::diagnostics::{diagnose, ImageDiagnostics};
use crate::enhance::{enhance, EnhancementReport};
use crate::extract::{classify_document, DocumentType, Extractor};
use crate::recognize::{RecognitionBackend, RecognitionEngine, RecognizeOptions};
use crate::rules::RuleSet;

/// Per-run knobs of the public entry point: which language the backend
/// recognizes in and whether the financial extraction stage runs at all.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub language: String,
    /// When false the run stops after recognition; the result carries the
    /// text output but no extracted fields.
    pub extract_financial: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        ProcessOptions {
            language: "spa".to_string(),
            extract_financial: true,
        }
    }
}

/// Run-level bookkeeping carried alongside the extracted data.
#[derive(Debug, Serialize)]
pub struct ProcessingMetadata {
    pub processing_status: ProcessingStatus,
    /// Words that arrived with a usable bounding box.
    pub coordinates_available: usize,
    /// True exactly when coordinates existed and at least one field was
    /// resolved spatially.
    pub spatial_logic_applied: bool,
    /// Fraction of the configured critical fields that were extracted.
    pub completeness: f32,
    pub document_type: DocumentType,
    pub error_messages: Vec<String>,
}

/// Terminal artifact of one pipeline run.
#[derive(Debug, Serialize)]
pub struct StructuredResult {
    /// Reading-order text exactly as the recognizer produced it.
    pub original_text: String,
    /// Post dual-pass, post cleanup concatenation the extractor saw.
    pub structured_text: String,
    pub words: Vec<RecognizedWord>,
    pub extracted_fields: BTreeMap<String, ExtractedField>,
    pub processing_metadata: ProcessingMetadata,
    pub diagnostic: Option<ImageDiagnostics>,
    pub enhancement: Option<EnhancementReport>,
}

impl StructuredResult {
    fn failed(message: String) -> Self {
        StructuredResult {
            original_text: String::new(),
            structured_text: String::new(),
            words: Vec::new(),
            extracted_fields: BTreeMap::new(),
            processing_metadata: ProcessingMetadata {
                processing_status: ProcessingStatus::Failed,
                coordinates_available: 0,
                spatial_logic_applied: false,
                completeness: 0.0,
                document_type: DocumentType::Desconocido,
                error_messages: vec![message],
            },
            diagnostic: None,
            enhancement: None,
        }
    }

    pub fn status(&self) -> ProcessingStatus {
        self.processing_metadata.processing_status
    }

    pub fn field(&self, name: &str) -> Option<&ExtractedField> {
        self.extracted_fields.get(name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// End-to-end receipt processor over a pluggable recognition backend.
pub struct ReceiptPipeline<B: RecognitionBackend> {
    engine: RecognitionEngine<B>,
    extractor: Extractor,
    config: PipelineConfig,
    settings: ProfileSettings,
}

impl<B: RecognitionBackend> ReceiptPipeline<B> {
    pub fn new(backend: B, config: PipelineConfig, profile: Profile) -> Self {
        let rules = RuleSet::default_rules(&config.geometry);
        Self::with_rules(backend, config, profile, rules)
    }

    pub fn with_rules(
        backend: B,
        config: PipelineConfig,
        profile: Profile,
        rules: RuleSet,
    ) -> Self {
        let engine =
            RecognitionEngine::new(backend, config.regions.clone(), config.geometry.clone());
        let extractor =
            Extractor::new(config.extractor.clone(), config.geometry.clone(), rules);
        let settings = ProfileSettings::for_profile(profile);
        Self { engine, extractor, config, settings }
    }

    pub fn process_path(&self, path: &Path) -> StructuredResult {
        self.process_path_with(path, &ProcessOptions::default())
    }

    pub fn process_path_with(&self, path: &Path, options: &ProcessOptions) -> StructuredResult {
        match std::fs::read(path) {
            Ok(data) => self.process_bytes_with(&data, options),
            Err(e) => StructuredResult::failed(format!("reading {}: {e}", path.display())),
        }
    }

    pub fn process_bytes(&self, data: &[u8]) -> StructuredResult {
        self.process_bytes_with(data, &ProcessOptions::default())
    }

    pub fn process_bytes_with(&self, data: &[u8], options: &ProcessOptions) -> StructuredResult {
        let gray = match image::load_from_memory(data) {
            Ok(img) => img.to_luma8(),
            Err(e) => return StructuredResult::failed(format!("invalid image: {e}")),
        };

        let diag = diagnose(&gray, &self.config.diagnostics);
        tracing::debug!(
            quality = diag.quality_score,
            kind = %diag.image_type,
            "diagnostics complete"
        );

        let mut error_messages = Vec::new();
        let (enhanced_image, enhancement) =
            match enhance(&gray, &diag, &self.settings, &self.config.enhance) {
                Ok(enhanced) => (enhanced.image, Some(enhanced.report)),
                Err(e) => {
                    tracing::warn!(error = %e, "enhancement failed, using raw grayscale");
                    error_messages.push(format!("enhancement: {e}"));
                    (gray, None)
                }
            };

        let recognize_options = RecognizeOptions {
            language: options.language.clone(),
        };
        let output = match self.engine.recognize_dual_pass(&enhanced_image, &recognize_options) {
            Ok(output) => output,
            Err(e) => {
                let mut result = StructuredResult::failed(format!("recognition: {e}"));
                result.diagnostic = Some(diag);
                result.enhancement = enhancement;
                result
                    .processing_metadata
                    .error_messages
                    .splice(0..0, error_messages);
                return result;
            }
        };
        error_messages.extend(output.warnings);

        let fields = if options.extract_financial {
            self.extractor.extract(&output.words, &output.text)
        } else {
            Vec::new()
        };
        let completeness = if options.extract_financial {
            self.extractor.completeness(&fields)
        } else {
            0.0
        };
        let document_type = classify_document(&output.text);

        let coordinates_available =
            output.words.iter().filter(|w| w.bbox.area() > 0.0).count();
        let spatial_logic_applied = coordinates_available > 0
            && fields.iter().any(|f| f.provenance == Provenance::Spatial);

        let processing_status = if error_messages.is_empty() {
            ProcessingStatus::Completed
        } else {
            ProcessingStatus::Partial
        };
        tracing::info!(
            ?processing_status,
            fields = fields.len(),
            completeness,
            spatial = spatial_logic_applied,
            "pipeline run finished"
        );

        StructuredResult {
            original_text: output.raw_text,
            structured_text: output.text,
            words: output.words,
            extracted_fields: fields.into_iter().map(|f| (f.name.clone(), f)).collect(),
            processing_metadata: ProcessingMetadata {
                processing_status,
                coordinates_available,
                spatial_logic_applied,
                completeness,
                document_type,
                error_messages,
            },
            diagnostic: Some(diag),
            enhancement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::{MockRecognizer, RecognizeError, SECONDARY_SEPARATOR};
    use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
    use recibo_core::BoundingBox;
    use std::io::Cursor;

    fn word(text: &str, x1: f32, y1: f32) -> RecognizedWord {
        RecognizedWord::new(text, BoundingBox::new(x1, y1, x1 + 60.0, y1 + 20.0), 90.0)
    }

    fn page_png() -> Vec<u8> {
        let img: GrayImage = ImageBuffer::from_fn(300, 300, |x, y| {
            Luma([if (50..150).contains(&x) && (50..100).contains(&y) { 150 } else { 255 }])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn receipt_words() -> Vec<RecognizedWord> {
        vec![
            word("Monto:", 10.0, 10.0),
            word("210,00", 120.0, 10.0),
            word("Fecha:", 10.0, 50.0),
            word("20/06/2025", 120.0, 50.0),
        ]
    }

    #[test]
    fn happy_path_completes_with_spatial_fields() {
        let pipeline = ReceiptPipeline::new(
            MockRecognizer::new(receipt_words()),
            PipelineConfig::default(),
            Profile::Minimal,
        );
        let result = pipeline.process_bytes(&page_png());

        assert_eq!(result.status(), ProcessingStatus::Completed);
        assert_eq!(result.processing_metadata.coordinates_available, 4);
        assert!(result.processing_metadata.spatial_logic_applied);
        assert_eq!(result.field("monto").unwrap().normalized, "210.00");
        assert_eq!(result.field("fecha").unwrap().normalized, "20/06/2025");
        assert_eq!(result.processing_metadata.completeness, 1.0);
        assert!(result.diagnostic.is_some());
        assert!(result.enhancement.is_some());
        // Raw text keeps the recognizer's spacing; structured text is the
        // cleaned variant the extractor consumed.
        assert!(result.original_text.contains("20/06/2025"));
        assert!(result.structured_text.contains("20/06/ 2025"));
    }

    #[test]
    fn invalid_bytes_fail_without_partials() {
        let pipeline = ReceiptPipeline::new(
            MockRecognizer::new(vec![]),
            PipelineConfig::default(),
            Profile::Minimal,
        );
        let result = pipeline.process_bytes(b"definitely not an image");
        assert_eq!(result.status(), ProcessingStatus::Failed);
        assert!(result.diagnostic.is_none());
        assert!(!result.processing_metadata.error_messages.is_empty());
        assert!(result.extracted_fields.is_empty());
    }

    #[test]
    fn primary_recognition_failure_keeps_earlier_stages() {
        struct Failing;
        impl RecognitionBackend for Failing {
            fn recognize(
                &self,
                _: &GrayImage,
                _: &RecognizeOptions,
            ) -> Result<Vec<RecognizedWord>, RecognizeError> {
                Err(RecognizeError::Backend("engine crashed".into()))
            }
        }
        let pipeline =
            ReceiptPipeline::new(Failing, PipelineConfig::default(), Profile::Minimal);
        let result = pipeline.process_bytes(&page_png());
        assert_eq!(result.status(), ProcessingStatus::Failed);
        assert!(result.diagnostic.is_some());
        assert!(result.enhancement.is_some());
        let messages = &result.processing_metadata.error_messages;
        assert!(messages.iter().any(|m| m.contains("recognition")));
    }

    #[test]
    fn words_without_coordinates_disable_spatial_logic() {
        let degenerate: Vec<RecognizedWord> = ["Monto:", "210,00", "Fecha:", "20/06/2025"]
            .iter()
            .map(|t| RecognizedWord::new(*t, BoundingBox::new(0.0, 0.0, 0.0, 0.0), 90.0))
            .collect();
        let pipeline = ReceiptPipeline::new(
            MockRecognizer::new(degenerate),
            PipelineConfig::default(),
            Profile::Minimal,
        );
        let result = pipeline.process_bytes(&page_png());

        assert_eq!(result.processing_metadata.coordinates_available, 0);
        assert!(!result.processing_metadata.spatial_logic_applied);
        // Pattern pass still recovers the fields from the flat text.
        let monto = result.field("monto").unwrap();
        assert_eq!(monto.normalized, "210.00");
        assert_eq!(monto.provenance, Provenance::Pattern);
    }

    #[test]
    fn document_type_lands_in_metadata() {
        let pipeline = ReceiptPipeline::new(
            MockRecognizer::new(vec![
                word("Pago", 10.0, 10.0),
                word("Movil", 80.0, 10.0),
                word("210,00", 10.0, 50.0),
            ]),
            PipelineConfig::default(),
            Profile::Minimal,
        );
        let result = pipeline.process_bytes(&page_png());
        assert_eq!(result.processing_metadata.document_type, DocumentType::PagoMovil);
    }

    #[test]
    fn extraction_can_be_toggled_off() {
        let pipeline = ReceiptPipeline::new(
            MockRecognizer::new(receipt_words()),
            PipelineConfig::default(),
            Profile::Minimal,
        );
        let options = ProcessOptions { extract_financial: false, ..ProcessOptions::default() };
        let result = pipeline.process_bytes_with(&page_png(), &options);

        assert_eq!(result.status(), ProcessingStatus::Completed);
        assert!(result.extracted_fields.is_empty());
        assert!(!result.processing_metadata.spatial_logic_applied);
        // Recognition still ran: the text output is intact.
        assert!(result.structured_text.contains("210,00"));
    }

    #[test]
    fn language_option_reaches_the_backend() {
        use std::sync::{Arc, Mutex};

        struct Capture(Arc<Mutex<Vec<String>>>);
        impl RecognitionBackend for Capture {
            fn recognize(
                &self,
                _: &GrayImage,
                options: &crate::recognize::RecognizeOptions,
            ) -> Result<Vec<RecognizedWord>, RecognizeError> {
                self.0.lock().unwrap().push(options.language.clone());
                Ok(Vec::new())
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ReceiptPipeline::new(
            Capture(seen.clone()),
            PipelineConfig::default(),
            Profile::Minimal,
        );
        let options = ProcessOptions { language: "eng".to_string(), ..ProcessOptions::default() };
        let _ = pipeline.process_bytes_with(&page_png(), &options);
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|l| l == "eng"));
    }

    #[test]
    fn missing_file_reports_failed() {
        let pipeline = ReceiptPipeline::new(
            MockRecognizer::new(vec![]),
            PipelineConfig::default(),
            Profile::Minimal,
        );
        let dir = tempfile::tempdir().unwrap();
        let result = pipeline.process_path(&dir.path().join("nope.png"));
        assert_eq!(result.status(), ProcessingStatus::Failed);
    }

    #[test]
    fn result_serializes_with_snake_case_status() {
        let pipeline = ReceiptPipeline::new(
            MockRecognizer::new(receipt_words()),
            PipelineConfig::default(),
            Profile::Minimal,
        );
        let result = pipeline.process_bytes(&page_png());
        let json: serde_json::Value =
            serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["processing_metadata"]["processing_status"], "completed");
        assert_eq!(
            json["extracted_fields"]["monto"]["normalized"],
            "210.00"
        );
        // No secondary zones were recognized on this page.
        assert!(!result.structured_text.contains(SECONDARY_SEPARATOR));
    }
}
