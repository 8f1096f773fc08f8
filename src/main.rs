use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use trend_radar::audio::SoundMetadata;
use trend_radar::config::EngineConfig;
use trend_radar::normalize::{parse_timestamp, RawTimestamp};
use trend_radar::ranking::RankMetric;
use trend_radar::{format_float, format_number, RawBatch, TrendEngine};

#[derive(Parser)]
#[command(
    name = "trend-radar",
    about = "Trend scoring and cross-platform sound matching for short-form video"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score and rank a batch of content records.
    Rank(RankArgs),
    /// Cluster sound records into canonical sounds.
    Sounds(SoundsArgs),
    /// Write the default configuration file.
    InitConfig(InitConfigArgs),
}

#[derive(Args, Debug, Clone)]
struct RankArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "trend-score")]
    metric: String,
    #[arg(long, default_value_t = 20)]
    limit: i64,
    /// Evaluation time; defaults to the current time.
    #[arg(long)]
    now: Option<String>,
    /// Rank only items that clear the `[quality]` thresholds.
    #[arg(long)]
    min_quality: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct SoundsArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct InitConfigArgs {
    #[arg(long, default_value = "config/engine.toml")]
    path: PathBuf,
    #[arg(long)]
    force: bool,
}

fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Rank(args) => run_rank(args),
        Command::Sounds(args) => run_sounds(args),
        Command::InitConfig(args) => run_init_config(args),
    }
}

fn run_rank(args: RankArgs) -> Result<()> {
    let metric = RankMetric::from_str(&args.metric)
        .ok_or_else(|| anyhow!("unknown metric: {}", args.metric))?;
    let now = match args.now.as_deref() {
        Some(value) => parse_timestamp("now", &RawTimestamp::Text(value.to_string()))?,
        None => Utc::now(),
    };
    let batch: RawBatch = read_json(&args.input)?;
    let mut engine = load_engine(args.config)?.with_quality_filter(args.min_quality);
    let report = engine.run(&batch, metric, args.limit, now)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Ranked {} of {} items by {} at {}",
        report.ranked.len(),
        report.scores.len(),
        metric.label(),
        format_time(report.generated_at)
    );
    for entry in &report.ranked {
        println!(
            "{:>3}. {} {} {} | trend {}{} | sound {}",
            entry.rank,
            entry.content_id,
            metric.label(),
            format_metric(metric, entry.metric_value),
            format_float(entry.trend_score, 3),
            if entry.insufficient_data { " (no velocity yet)" } else { "" },
            entry.canonical_sound.as_deref().unwrap_or("-")
        );
    }
    if !report.below_quality.is_empty() {
        println!(
            "Below quality thresholds: {}",
            report.below_quality.join(", ")
        );
    }

    let trending: Vec<_> = report
        .sound_usage
        .iter()
        .filter(|usage| usage.is_trending)
        .collect();
    if !trending.is_empty() {
        println!("\nTrending sounds:");
        for usage in trending {
            println!(
                "- {} ({} videos, velocity {}, avg engagement {}%)",
                usage.canonical_id,
                usage.usage_count,
                format_float(usage.aggregate_velocity, 2),
                format_float(usage.avg_engagement_rate, 2)
            );
        }
    }

    print_errors("item", &report.item_errors);
    print_errors("sound", &report.sound_errors);
    Ok(())
}

fn run_sounds(args: SoundsArgs) -> Result<()> {
    let records: Vec<SoundMetadata> = read_json(&args.input)?;
    let mut engine = load_engine(args.config)?;
    let (stats, errors) = engine.ingest_sounds(&records);
    let sounds = engine.sounds();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sounds)?);
        return Ok(());
    }

    println!(
        "{} canonical sounds from {} fingerprints ({} duplicates merged)",
        sounds.len(),
        stats.added,
        stats.duplicates
    );
    for sound in &sounds {
        let platforms: Vec<&str> = sound.platforms.iter().map(|platform| platform.label()).collect();
        println!(
            "- {} | {} members | {}s | {}",
            sound.canonical_id,
            sound.members.len(),
            format_float(sound.representative_duration_ms as f64 / 1000.0, 1),
            platforms.join(", ")
        );
    }
    print_errors("sound", &errors);
    Ok(())
}

fn run_init_config(args: InitConfigArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        return Err(anyhow!(
            "{} already exists; pass --force to overwrite",
            args.path.display()
        ));
    }
    EngineConfig::default().write(&args.path)?;
    println!("Wrote default configuration to {}", args.path.display());
    Ok(())
}

fn load_engine(path: Option<PathBuf>) -> Result<TrendEngine> {
    let (config, config_path) = EngineConfig::load(path)?;
    if let Some(path) = config_path.as_ref().filter(|path| path.exists()) {
        tracing::debug!(path = %path.display(), "loaded configuration");
    }
    Ok(TrendEngine::new(config)?)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed parsing {}", path.display()))
}

fn print_errors(kind: &str, errors: &[trend_radar::error::ItemError]) {
    if errors.is_empty() {
        return;
    }
    println!("\nRejected {} records:", kind);
    for error in errors {
        println!(
            "- #{} {}: {}",
            error.index,
            error.content_id.as_deref().unwrap_or("?"),
            error.error
        );
    }
}

fn format_metric(metric: RankMetric, value: f64) -> String {
    match metric {
        RankMetric::Views | RankMetric::Comments | RankMetric::Shares => format_number(value),
        RankMetric::EngagementRate => format!("{}%", format_float(value, 2)),
        RankMetric::Engagement | RankMetric::TrendScore => format_float(value, 3),
    }
}

fn format_time(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn load_dotenv() {
    let _ = dotenvy::dotenv();
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let manifest_path = Path::new(manifest_dir).join(".env");
    let _ = dotenvy::from_path(manifest_path);
}
