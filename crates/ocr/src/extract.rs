//! Structured field extraction from recognized receipt content.
//!
//! Two passes run in order. The spatial pass walks the rule set against
//! word boxes and wins whenever coordinates exist; the pattern pass then
//! fills remaining fields from the flat text. Every raw value goes through
//! a field-specific normalizer, and values that fail normalization are
//! dropped rather than emitted half-formed.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use recibo_core::{
    ExtractedField, ExtractorConfig, GeometryConfig, Provenance, RecognizedWord,
};

use crate::re;
use crate::rules::{canonical_institution, RuleSet};
use crate::spatial;

re!(re_amount, r"\b\d{1,3}(?:[.,]\d{3})*[.,]\d{2}\b");
re!(re_date, r"\b\d{1,2}/\d{1,2}/\s?\d{2,4}\b");
re!(re_time, r"(?i)\b\d{1,2}:\d{2}(?::\d{2})?\s*(?:[ap]\.?\s*m\.?)?");
re!(re_reference,
    r"(?i)\b(?:referencia|operaci[oó]n|ref\.?|comprobante|nro\.?)\D{0,10}(\d{6,20})");
re!(re_account,
    r"(?i)\b(?:cuenta|cta\.?)\D{0,10}?([\d*]{10,20})");
re!(re_phone, r"0(?:412|414|416|424|426)[\d\s*]{3,15}");
re!(re_cedula, r"(?i)\b[VE]-?\d{1,2}\.?\d{3}\.?\d{3}\b");
re!(re_rif, r"(?i)\b[JGVEP]-?\d{8,9}-?\d\b");

/// Best-effort classification of what kind of financial document the text
/// describes, by keyword frequency. Ties resolve in declaration order,
/// mobile payments first since they dominate the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    PagoMovil,
    Transferencia,
    Factura,
    EstadoCuenta,
    Desconocido,
}

const DOCUMENT_KEYWORDS: &[(DocumentType, &[&str])] = &[
    (DocumentType::PagoMovil, &["pago movil", "pago móvil", "pagomovil", "p2p", "p2c"]),
    (DocumentType::Transferencia, &["transferencia", "transferido", "transferir"]),
    (DocumentType::Factura, &["factura", "iva", "subtotal"]),
    (DocumentType::EstadoCuenta, &["estado de cuenta", "saldo disponible", "movimientos"]),
];

/// Classify a document by counting keyword hits per category.
pub fn classify_document(text: &str) -> DocumentType {
    let lower = text.to_lowercase();
    let mut best = DocumentType::Desconocido;
    let mut best_hits = 0usize;
    for (kind, keywords) in DOCUMENT_KEYWORDS {
        let hits: usize = keywords.iter().map(|k| lower.matches(k).count()).sum();
        if hits > best_hits {
            best = *kind;
            best_hits = hits;
        }
    }
    best
}

/// Runs the spatial and pattern extraction passes over one document.
pub struct Extractor {
    config: ExtractorConfig,
    geometry: GeometryConfig,
    rules: RuleSet,
}

impl Extractor {
    pub fn new(config: ExtractorConfig, geometry: GeometryConfig, rules: RuleSet) -> Self {
        Self { config, geometry, rules }
    }

    pub fn with_defaults() -> Self {
        let geometry = GeometryConfig::default();
        let rules = RuleSet::default_rules(&geometry);
        Self::new(ExtractorConfig::default(), geometry, rules)
    }

    /// Extract every field the rules and patterns can find. Spatial results
    /// take precedence; the pattern pass only fills fields still missing.
    pub fn extract(&self, words: &[RecognizedWord], full_text: &str) -> Vec<ExtractedField> {
        let mut fields: Vec<ExtractedField> = Vec::new();

        for rule in self.rules.iter() {
            if fields.iter().any(|f| f.name == rule.field) {
                continue;
            }
            let Some(m) = spatial::find_value(
                words,
                &rule.keyword,
                rule.direction,
                rule.max_distance,
                rule.value.as_ref(),
                self.geometry.y_tolerance,
            ) else {
                continue;
            };
            if let Some(normalized) = normalize_for(&rule.field, &m.value.text) {
                fields.push(ExtractedField {
                    name: rule.field.clone(),
                    raw: m.value.text.clone(),
                    normalized,
                    confidence: m.value.confidence,
                    provenance: Provenance::Spatial,
                });
            }
        }

        self.pattern_pass(full_text, &mut fields);
        fields
    }

    fn pattern_pass(&self, text: &str, fields: &mut Vec<ExtractedField>) {
        let mut push = |name: &str, raw: &str, fields: &mut Vec<ExtractedField>| {
            if fields.iter().any(|f| f.name == name) {
                return;
            }
            if let Some(normalized) = normalize_for(name, raw) {
                fields.push(ExtractedField {
                    name: name.to_string(),
                    raw: raw.to_string(),
                    normalized,
                    confidence: self.config.pattern_confidence,
                    provenance: Provenance::Pattern,
                });
            }
        };

        if let Some(m) = re_amount().find(text) {
            push("monto", m.as_str(), fields);
        }
        if let Some(m) = re_date().find(text) {
            push("fecha", m.as_str(), fields);
        }
        if let Some(m) = re_time().find(text) {
            push("hora", m.as_str(), fields);
        }
        if let Some(c) = re_reference().captures(text).and_then(|c| c.get(1)) {
            push("referencia", c.as_str(), fields);
        }
        if let Some(c) = re_account().captures(text).and_then(|c| c.get(1)) {
            push("cuenta", c.as_str(), fields);
        }
        if let Some(m) = re_phone().find(text) {
            push("telefono", m.as_str(), fields);
        }
        if let Some(m) = re_cedula().find(text) {
            push("cedula", m.as_str(), fields);
        }
        if let Some(m) = re_rif().find(text) {
            push("rif", m.as_str(), fields);
        }
        if let Some(name) = canonical_institution(text) {
            push("banco_destino", name, fields);
        }
    }

    /// Fraction of the configured critical fields that were extracted.
    pub fn completeness(&self, fields: &[ExtractedField]) -> f32 {
        if self.config.critical_fields.is_empty() {
            return 1.0;
        }
        let found = self
            .config
            .critical_fields
            .iter()
            .filter(|name| fields.iter().any(|f| &f.name == *name))
            .count();
        found as f32 / self.config.critical_fields.len() as f32
    }
}

fn normalize_for(field: &str, raw: &str) -> Option<String> {
    match field {
        "monto" => normalize_amount(raw),
        "fecha" => normalize_date(raw),
        "hora" => normalize_time(raw),
        "telefono" => normalize_phone(raw),
        "referencia" => normalize_reference(raw),
        "cuenta" => normalize_account(raw),
        "cedula" | "rif" => normalize_id(raw),
        "banco_destino" | "banco_origen" => canonical_institution(raw).map(str::to_string),
        _ => {
            let t = raw.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
    }
}

/// Canonicalize a monetary string to `1234.56` form. Handles both the
/// comma-decimal convention of local receipts and dot-decimal input, and
/// is idempotent on already-normalized values.
pub fn normalize_amount(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let decimal_sep = match (last_dot, last_comma) {
        (Some(d), Some(c)) => Some(if d > c { '.' } else { ',' }),
        (Some(d), None) => two_digit_tail(&cleaned, d).then_some('.'),
        (None, Some(c)) => two_digit_tail(&cleaned, c).then_some(','),
        (None, None) => None,
    };

    let mut integer = String::new();
    let mut fraction = String::new();
    let mut in_fraction = false;
    for (i, ch) in cleaned.char_indices() {
        match ch {
            '0'..='9' => {
                if in_fraction {
                    fraction.push(ch);
                } else {
                    integer.push(ch);
                }
            }
            _ => {
                if Some(ch) == decimal_sep && Some(i) == last_dot.max(last_comma) {
                    in_fraction = true;
                }
                // Any other separator is a thousands mark, dropped.
            }
        }
    }
    if integer.is_empty() {
        return None;
    }

    let joined = if fraction.is_empty() {
        integer
    } else {
        format!("{integer}.{fraction}")
    };
    let value = Decimal::from_str(&joined).ok()?;
    Some(format!("{:.2}", value.round_dp(2)))
}

fn two_digit_tail(s: &str, sep_index: usize) -> bool {
    s.len() - sep_index == 3
}

/// Normalize a `dd/mm/yyyy` date, tolerating stray spaces the text cleanup
/// stage introduces inside the year. Rejects impossible calendar dates.
pub fn normalize_date(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parts = compact.split('/');
    let day: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let year_raw: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let year = if year_raw < 100 { 2000 + year_raw } else { year_raw };
    NaiveDate::from_ymd_opt(year, month, day)?;
    Some(format!("{day:02}/{month:02}/{year:04}"))
}

/// Normalize a clock time to 24-hour `HH:MM` (seconds preserved when
/// present).
pub fn normalize_time(raw: &str) -> Option<String> {
    let lower = raw.to_lowercase();
    let pm = lower.contains("pm") || lower.contains("p.m") || lower.contains("p. m");
    let am = lower.contains("am") || lower.contains("a.m") || lower.contains("a. m");
    let digits: String = lower.chars().filter(|c| c.is_ascii_digit() || *c == ':').collect();
    let mut parts = digits.trim_matches(':').split(':');
    let mut hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = parts.next()?.parse().ok()?;
    let second: Option<u32> = parts.next().map(|s| s.parse().ok()).flatten();
    if hour > 23 || minute > 59 || second.map_or(false, |s| s > 59) {
        return None;
    }
    if pm && hour < 12 {
        hour += 12;
    }
    if am && hour == 12 {
        hour = 0;
    }
    Some(match second {
        Some(s) => format!("{hour:02}:{minute:02}:{s:02}"),
        None => format!("{hour:02}:{minute:02}"),
    })
}

/// Collapse a masked local mobile number: digits and mask asterisks only,
/// valid operator prefix required.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '*')
        .collect();
    let valid_prefix = ["0412", "0414", "0416", "0424", "0426"]
        .iter()
        .any(|p| compact.starts_with(p));
    (valid_prefix && compact.len() >= 7 && compact.len() <= 11).then_some(compact)
}

pub fn normalize_reference(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits.len() >= 6 && digits.len() <= 20).then_some(digits)
}

/// Account numbers keep mask asterisks; everything else is stripped.
pub fn normalize_account(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '*')
        .collect();
    (compact.len() >= 10 && compact.len() <= 20).then_some(compact)
}

/// Identity documents: uppercase, dots and spaces removed, dashes kept.
pub fn normalize_id(raw: &str) -> Option<String> {
    let compact: String = raw
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    (compact.chars().filter(|c| c.is_ascii_digit()).count() >= 6).then_some(compact)
}
