//! Declarative extraction rules: which keyword anchors each field, where
//! its value sits, and how canonical institution names are resolved.
//!
//! The built-in set targets Venezuelan mobile-payment receipts; deployments
//! can replace it entirely from a TOML file.

use std::collections::BTreeMap;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use recibo_core::{GeometryConfig, SearchDirection, SpatialRule};

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("invalid regex for field '{field}': {source}")]
    BadRegex {
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to parse rules file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A spatial rule with its regexes compiled, ready to run against word
/// boxes.
#[derive(Debug)]
pub struct CompiledRule {
    pub field: String,
    pub keyword: Regex,
    pub direction: SearchDirection,
    pub max_distance: f32,
    pub value: Option<Regex>,
}

/// Ordered collection of compiled rules. Order matters: earlier rules win
/// when two rules target the same field.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(rename = "rule")]
    rules: BTreeMap<String, SpatialRule>,
}

impl RuleSet {
    pub fn compile(
        declared: impl IntoIterator<Item = (String, SpatialRule)>,
        geometry: &GeometryConfig,
    ) -> Result<Self, RulesError> {
        let mut rules = Vec::new();
        for (field, rule) in declared {
            let keyword = Regex::new(&rule.keyword_pattern).map_err(|source| {
                RulesError::BadRegex { field: field.clone(), source }
            })?;
            let value = rule
                .value_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| RulesError::BadRegex { field: field.clone(), source })?;
            let max_distance = if rule.max_distance > 0.0 {
                rule.max_distance
            } else {
                geometry.default_search_radius
            };
            rules.push(CompiledRule {
                field,
                keyword,
                direction: rule.direction,
                max_distance,
                value,
            });
        }
        Ok(RuleSet { rules })
    }

    /// Load a rule set from a TOML document of `[rule.<field>]` tables.
    pub fn from_toml(s: &str, geometry: &GeometryConfig) -> Result<Self, RulesError> {
        let file: RulesFile = toml::from_str(s)?;
        Self::compile(file.rules, geometry)
    }

    /// The built-in rules for payment receipts.
    pub fn default_rules(geometry: &GeometryConfig) -> Self {
        let declared = [
            rule("monto", r"(?i)\b(monto|total|importe|bs)\b", SearchDirection::HorizontalRight,
                 200.0, Some(r"\d+[.,]\d{2}")),
            rule("fecha", r"(?i)\bfecha\b", SearchDirection::HorizontalRight,
                 250.0, Some(r"\d{1,2}/\d{1,2}/\s?\d{2,4}")),
            rule("referencia", r"(?i)\b(referencia|operaci[oó]n|ref)\b",
                 SearchDirection::HorizontalRight, 300.0, Some(r"\d{6,}")),
            rule("telefono", r"(?i)\b(tel[eé]fono|celular|destino)\b",
                 SearchDirection::HorizontalRight, 250.0,
                 Some(r"0(?:412|414|416|424|426)[\d*]*")),
            rule("cedula", r"(?i)\b(c[eé]dula|identificaci[oó]n|c\.?i\.?)\b",
                 SearchDirection::HorizontalRight, 250.0, Some(r"[VEve]?-?[\d.]{6,12}")),
            rule("cuenta", r"(?i)\b(cuenta|cta)\b", SearchDirection::HorizontalRight,
                 300.0, Some(r"[\d*]{10,20}")),
        ];
        // Built-in patterns are known-good; compile cannot fail here.
        Self::compile(declared, geometry).expect("built-in rules must compile")
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn rule(
    field: &str,
    keyword: &str,
    direction: SearchDirection,
    max_distance: f32,
    value: Option<&str>,
) -> (String, SpatialRule) {
    (
        field.to_string(),
        SpatialRule {
            keyword_pattern: keyword.to_string(),
            direction,
            max_distance,
            value_pattern: value.map(str::to_string),
        },
    )
}

// ── Institution canonicalization ──────────────────────────────────────────────

/// Alias table for Venezuelan banks. Longest aliases first so that a more
/// specific name wins over a substring of it.
const INSTITUTIONS: &[(&str, &str)] = &[
    ("BANCO NACIONAL DE CREDITO", "BANCO NACIONAL DE CREDITO"),
    ("BANCO BICENTENARIO", "BANCO BICENTENARIO"),
    ("BANCO DE VENEZUELA", "BANCO DE VENEZUELA"),
    ("BBVA PROVINCIAL", "BBVA PROVINCIAL"),
    ("BANCO DEL TESORO", "BANCO DEL TESORO"),
    ("BANCO EXTERIOR", "BANCO EXTERIOR"),
    ("BANCO MERCANTIL", "BANCO MERCANTIL"),
    ("PROVINCIAL", "BBVA PROVINCIAL"),
    ("BANCARIBE", "BANCARIBE"),
    ("BANCAMIGA", "BANCAMIGA"),
    ("MERCANTIL", "BANCO MERCANTIL"),
    ("BANESCO", "BANESCO"),
    ("TESORO", "BANCO DEL TESORO"),
    ("BNC", "BANCO NACIONAL DE CREDITO"),
    ("BDV", "BANCO DE VENEZUELA"),
    ("0102", "BANCO DE VENEZUELA"),
    ("0105", "BANCO MERCANTIL"),
    ("0108", "BBVA PROVINCIAL"),
    ("0114", "BANCARIBE"),
    ("0115", "BANCO EXTERIOR"),
    ("0134", "BANESCO"),
    ("0163", "BANCO DEL TESORO"),
    ("0172", "BANCAMIGA"),
    ("0175", "BANCO BICENTENARIO"),
    ("0191", "BANCO NACIONAL DE CREDITO"),
];

/// Resolve free-form receipt text to a canonical institution name.
/// Matching is case-insensitive substring search over the alias table.
pub fn canonical_institution(text: &str) -> Option<&'static str> {
    let upper = text.to_uppercase();
    INSTITUTIONS
        .iter()
        .find(|(alias, _)| upper.contains(alias))
        .map(|(_, canonical)| *canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_compile_and_cover_core_fields() {
        let rules = RuleSet::default_rules(&GeometryConfig::default());
        let fields: Vec<&str> = rules.iter().map(|r| r.field.as_str()).collect();
        for f in ["monto", "fecha", "referencia", "telefono"] {
            assert!(fields.contains(&f), "missing rule for {f}");
        }
    }

    #[test]
    fn rules_load_from_toml_with_defaulted_radius() {
        let geometry = GeometryConfig::default();
        let rules = RuleSet::from_toml(
            r#"
            [rule.monto]
            keyword_pattern = "(?i)monto"
            direction = "horizontal_right"
            max_distance = 0.0
            "#,
            &geometry,
        )
        .unwrap();
        let r = rules.iter().next().unwrap();
        assert_eq!(r.max_distance, geometry.default_search_radius);
    }

    #[test]
    fn bad_regex_reports_field_name() {
        let err = RuleSet::from_toml(
            r#"
            [rule.monto]
            keyword_pattern = "(unclosed"
            direction = "horizontal_right"
            max_distance = 100.0
            "#,
            &GeometryConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("monto"));
    }

    #[test]
    fn institution_aliases_resolve_to_canonical_names() {
        assert_eq!(
            canonical_institution("Banco Mercantil, C . A . S . A . C . A, Banco Universal"),
            Some("BANCO MERCANTIL"),
        );
        assert_eq!(canonical_institution("pago movil bdv"), Some("BANCO DE VENEZUELA"));
        assert_eq!(canonical_institution("0105 - cuenta destino"), Some("BANCO MERCANTIL"));
        assert_eq!(canonical_institution("sin banco aqui"), None);
    }

    #[test]
    fn longer_alias_wins_over_substring() {
        assert_eq!(
            canonical_institution("BANCO NACIONAL DE CREDITO BNC"),
            Some("BANCO NACIONAL DE CREDITO"),
        );
    }
}
