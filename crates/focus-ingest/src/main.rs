//! FOCUS Ingest - billing normalization CLI

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use focus_common::logging::{init_logging, LogConfig, LogLevel};
use focus_ingest::config::{PipelineConfig, ProviderConfig, ProviderKind, SourceConfig};
use focus_ingest::extract::{rest::openai_usage_sources, ExtractorFactory};
use focus_ingest::pricing::{CostCalculator, UsageShape};
use focus_ingest::transform::{parse_raw_items, TransformBatchResult, TransformStage, TransformStatus};
use rust_decimal::Decimal;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "focus-ingest")]
#[command(author, version, about = "Normalize cloud and AI billing data into FOCUS records")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Map a local export file to FOCUS records
    Transform {
        /// Provider the input came from
        #[arg(short, long)]
        provider: ProviderKind,

        /// JSON array, single object or JSON Lines file
        #[arg(short, long)]
        input: PathBuf,

        /// JSON Lines output file
        #[arg(short, long)]
        output: PathBuf,

        /// Fail records with validation errors instead of emitting them
        #[arg(long)]
        strict: bool,

        /// Records per cancellation checkpoint
        #[arg(long)]
        batch_size: Option<usize>,

        /// Provider configuration JSON file
        #[arg(long)]
        provider_config: Option<PathBuf>,
    },

    /// Extract a source over a date window, then transform it
    Extract {
        #[arg(short, long)]
        provider: ProviderKind,

        /// Source configuration JSON file (OpenAI defaults to the usage API)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Window start date (inclusive), YYYY-MM-DD
        #[arg(long)]
        start: NaiveDate,

        /// Window end date (exclusive), YYYY-MM-DD
        #[arg(long)]
        end: NaiveDate,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        provider_config: Option<PathBuf>,
    },

    /// Price model usage with the built-in tables
    Price {
        #[arg(short, long)]
        model: String,

        #[arg(long)]
        input_tokens: Option<i64>,

        #[arg(long)]
        output_tokens: Option<i64>,

        #[arg(long)]
        images: Option<i64>,

        #[arg(long)]
        characters: Option<i64>,

        /// Audio seconds
        #[arg(long)]
        seconds: Option<Decimal>,

        /// Code interpreter containers
        #[arg(long)]
        containers: Option<i64>,

        /// Vector store storage in GB-days
        #[arg(long)]
        gb_days: Option<Decimal>,

        /// Tool calls (file or web search)
        #[arg(long)]
        calls: Option<i64>,

        #[arg(long)]
        requests: Option<i64>,

        /// Use flex processing prices where available
        #[arg(long)]
        flex: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(LogLevel::from_verbose(cli.verbose))
        .log_file_prefix("focus-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Transform {
            provider,
            input,
            output,
            strict,
            batch_size,
            provider_config,
        } => {
            let provider = resolve_provider(provider, provider_config.as_deref())?;
            let mut config = PipelineConfig::load().context("Failed to load pipeline configuration")?;
            config.transform.strict_validation |= strict;
            if let Some(size) = batch_size {
                config.transform.batch_size = size;
            }
            config.validate()?;

            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let raw = parse_raw_items(&text)
                .with_context(|| format!("Failed to parse {}", input.display()))?;
            info!(provider = %provider.provider_type, records = raw.len(), "Transforming input file");

            let stage = TransformStage::from_provider(&provider, config.transform);
            let result = run_transform(stage, raw).await?;
            finish(&result, &output)?;
        }

        Command::Extract {
            provider,
            source,
            start,
            end,
            output,
            provider_config,
        } => {
            let provider = resolve_provider(provider, provider_config.as_deref())?;
            let config = PipelineConfig::load().context("Failed to load pipeline configuration")?;
            config.validate()?;

            let sources = match source {
                Some(path) => vec![SourceConfig::load(&path)
                    .with_context(|| format!("Failed to load source {}", path.display()))?],
                None if provider.provider_type == ProviderKind::OpenAi => openai_usage_sources(),
                None => bail!("--source is required for provider {}", provider.provider_type),
            };

            let start = day_start(start);
            let end = day_start(end);
            let factory = ExtractorFactory::new();
            let mut raw = Vec::new();
            for source in &sources {
                let records = factory
                    .extract(source, &provider, &config.extract, start, end)
                    .await
                    .with_context(|| format!("Extraction of '{}' failed", source.name))?;
                info!(source = %source.name, records = records.len(), "Source extracted");
                raw.extend(records.into_iter().map(Value::Object));
            }

            let stage = TransformStage::from_provider(&provider, config.transform);
            let result = run_transform(stage, raw).await?;
            finish(&result, &output)?;
        }

        Command::Price {
            model,
            input_tokens,
            output_tokens,
            images,
            characters,
            seconds,
            containers,
            gb_days,
            calls,
            requests,
            flex,
        } => {
            let shape = if let Some(count) = images {
                UsageShape::Images { count }
            } else if let Some(seconds) = seconds {
                UsageShape::Audio { seconds }
            } else if let Some(count) = characters {
                UsageShape::Characters { count }
            } else if input_tokens.is_some() || output_tokens.is_some() {
                UsageShape::Tokens {
                    input: input_tokens.unwrap_or(0),
                    output: output_tokens.unwrap_or(0),
                }
            } else if let Some(count) = containers {
                UsageShape::Containers { count }
            } else if let Some(gb_days) = gb_days {
                UsageShape::StorageGbDays { gb_days }
            } else if let Some(count) = calls {
                UsageShape::Calls { count }
            } else if let Some(count) = requests {
                UsageShape::Requests { count }
            } else {
                bail!("Provide a usage quantity: tokens, --images, --characters, --seconds, --containers, --gb-days, --calls or --requests");
            };

            let breakdown = CostCalculator::default().with_flex(flex).calculate(&model, &shape);
            println!("{}", serde_json::to_string_pretty(&breakdown)?);
        }
    }

    Ok(())
}

fn resolve_provider(kind: ProviderKind, path: Option<&Path>) -> Result<ProviderConfig> {
    let Some(path) = path else {
        return Ok(ProviderConfig::new(kind));
    };
    let provider = ProviderConfig::load(path)
        .with_context(|| format!("Failed to load provider config {}", path.display()))?;
    if provider.provider_type != kind {
        bail!(
            "Provider config {} is for {}, not {}",
            path.display(),
            provider.provider_type,
            kind
        );
    }
    Ok(provider)
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Run the batch off the async runtime; Ctrl-C stops it at the next chunk
async fn run_transform(stage: TransformStage, raw: Vec<Value>) -> Result<TransformBatchResult> {
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            signal_token.cancel();
        }
    });

    let result = tokio::task::spawn_blocking(move || stage.transform_with_cancel(&raw, &cancel))
        .await
        .context("Transform task panicked")?;
    signal.abort();
    Ok(result)
}

fn finish(result: &TransformBatchResult, output: &Path) -> Result<()> {
    serde_jsonlines::write_json_lines(output, result.transformed_records())
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("{}", serde_json::to_string_pretty(result)?);

    info!(
        status = ?result.status,
        transformed = result.summary.transformed,
        failed = result.summary.failed,
        output = %output.display(),
        "Transform complete"
    );
    if result.status == TransformStatus::Failure {
        bail!("No records could be transformed");
    }
    Ok(())
}
