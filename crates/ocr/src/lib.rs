pub mod diagnostics;
pub mod enhance;
pub mod extract;
mod filters;
pub mod pipeline;
pub mod recognize;
pub mod rules;
pub mod spatial;

pub use diagnostics::{diagnose, ImageDiagnostics};
pub use enhance::{enhance, enhance_observed, Enhanced, EnhanceError, EnhancementReport, EnhancementStep};
pub use extract::{DocumentType, Extractor};
pub use pipeline::{ProcessingMetadata, ProcessOptions, ReceiptPipeline, StructuredResult};
pub use recognize::{
    MockRecognizer, RecognitionBackend, RecognitionEngine, RecognitionOutput, RecognizeError,
    RecognizeOptions,
};
pub use rules::{CompiledRule, RuleSet, RulesError};
pub use spatial::SpatialMatch;

/// Lazily-compiled, cached regex. Patterns are literals so a failure to
/// compile is a programming error.
macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static regex::Regex {
            static R: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
            R.get_or_init(|| regex::Regex::new($pat).expect("invalid regex"))
        }
    };
}
pub(crate) use re;
