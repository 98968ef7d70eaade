use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use recibo_core::{PipelineConfig, ProcessingStatus, Profile};
use recibo_ocr::{ProcessOptions, ReceiptPipeline, RuleSet};

#[derive(Parser)]
#[command(
    name = "recibo",
    version,
    about = "Extract structured payment data from receipt images"
)]
struct Cli {
    /// Receipt image (PNG / JPEG / WEBP)
    image: PathBuf,

    /// Processing profile: minimal, fast or normal
    #[arg(long, default_value = "normal")]
    profile: Profile,

    /// Recognition language handed to the backend
    #[arg(long, default_value = "spa")]
    language: String,

    /// Skip the financial extraction stage and emit text output only
    #[arg(long)]
    text_only: bool,

    /// TOML file overriding pipeline thresholds
    #[arg(long)]
    config: Option<PathBuf>,

    /// TOML file replacing the built-in extraction rules
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Emit compact JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            PipelineConfig::from_toml(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    let rules = match &cli.rules {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading rules {}", path.display()))?;
            RuleSet::from_toml(&raw, &config.geometry)
                .with_context(|| format!("parsing rules {}", path.display()))?
        }
        None => RuleSet::default_rules(&config.geometry),
    };

    #[cfg(feature = "tesseract")]
    let backend =
        recibo_ocr::recognize::tesseract_backend::TesseractRecognizer::new(None, &cli.language)
            .map_err(|e| anyhow::anyhow!("initializing tesseract: {e}"))?;
    // TODO(backend): wire a tessdata path flag once the tesseract feature is
    // exercised in CI; until then the default build recognizes nothing.
    #[cfg(not(feature = "tesseract"))]
    let backend = recibo_ocr::MockRecognizer::new(Vec::new());

    let pipeline = ReceiptPipeline::with_rules(backend, config, cli.profile, rules);
    let options = ProcessOptions {
        language: cli.language.clone(),
        extract_financial: !cli.text_only,
    };
    let result = pipeline.process_path_with(&cli.image, &options);

    let json = if cli.compact {
        serde_json::to_string(&result)?
    } else {
        result.to_json()?
    };
    println!("{json}");

    if result.status() == ProcessingStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
