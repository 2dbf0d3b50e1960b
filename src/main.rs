use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use regime_overlay::config::{load_settings, RegimeSettings, SettingsManager};
use regime_overlay::engine::RegimeWorker;
use regime_overlay::ml::{train_regime_model, extract_features, ObservationSet};
use regime_overlay::regime::{sweep, RegimeBase, RegimeContext, RegimeOverlay};
use regime_overlay::types::{DayLabel, SeriesInput};

#[derive(Parser)]
#[command(name = "regime-overlay")]
#[command(version = "0.1.0")]
#[command(about = "Market-regime overlay for backtest charts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file path (TOML)
    #[arg(short, long, default_value = "regime.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Label every day of a series at one slider position
    Classify {
        /// Series JSON file
        #[arg(short, long)]
        input: PathBuf,
        /// Sensitivity slider 0-10 (default from settings)
        #[arg(short, long)]
        slider: Option<f64>,
        /// Report the summary only, without shading segments
        #[arg(long)]
        collapsed: bool,
        /// Print the overlay as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the sensitivity calibration of a series
    Calibrate {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Train the HMM and print its parameters
    Train {
        #[arg(short, long)]
        input: PathBuf,
        /// Write the model JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Classify at every integer slider and print coverage against target
    Sweep {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Print the effective settings as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = load_settings(Some(cli.config.as_path()))
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

    match cli.command {
        Commands::Classify { input, slider, collapsed, json } => {
            let slider = slider.unwrap_or(settings.worker.default_slider);
            run_classify(&input, slider, collapsed, json, settings).await?;
        }
        Commands::Calibrate { input } => {
            run_calibrate(&input, &settings)?;
        }
        Commands::Train { input, output } => {
            run_train(&input, output.as_deref(), &settings)?;
        }
        Commands::Sweep { input } => {
            run_sweep(&input, &settings)?;
        }
        Commands::PrintConfig => {
            println!("{}", toml::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

fn read_series(path: &Path) -> Result<SeriesInput> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read series file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse series JSON {}", path.display()))
}

async fn run_classify(input: &Path, slider: f64, collapsed: bool, json: bool, settings: RegimeSettings) -> Result<()> {
    let series = read_series(input)?;
    let manager = SettingsManager::new(settings);
    let settings = manager.get_settings().await;
    let context = Arc::new(RegimeContext::new(settings.clone()));
    context.load(&series)?;

    let worker = RegimeWorker::spawn(Arc::clone(&context), &settings.worker);
    let follower = worker.follow_settings(&manager);
    let mut results = worker.subscribe();
    worker
        .request(slider)
        .ok_or_else(|| anyhow!("Regime worker is not running"))?;

    let result = tokio::time::timeout(Duration::from_secs(300), results.recv())
        .await
        .context("Timed out waiting for the regime pass")??;
    worker.shutdown().await;
    drop(manager);
    follower.await?;

    let overlay = RegimeOverlay::clone(&result.overlay).with_collapsed(collapsed);

    if json {
        println!("{}", serde_json::to_string_pretty(&overlay)?);
    } else {
        print_overlay(&overlay);
    }
    Ok(())
}

fn print_overlay(overlay: &RegimeOverlay) {
    let Some(summary) = &overlay.summary else {
        warn!("No regime base available");
        return;
    };

    info!("━━━ Regime summary (slider {:.1}) ━━━", summary.slider);
    info!(
        "  {} days, {} segments, trend coverage {:.1}% (target {:.1}%)",
        summary.days, summary.segments, summary.trend_coverage_pct, summary.target_trend_coverage_pct
    );
    for stats in &summary.labels {
        info!(
            "  {:14} {:5} days ({:5.1}%)  {:3} segments  price {:+7.2}%  strategy {:+7.2}%",
            stats.label.as_str(),
            stats.days,
            stats.coverage_pct,
            stats.segments,
            stats.price_return_pct,
            stats.strategy_return_pct
        );
    }
    match summary.average_confidence {
        Some(c) => info!("  Average confidence: {:.3}", c),
        None => info!("  Average confidence: n/a (heuristic labels)"),
    }
    if let Some(hmm) = &summary.hmm {
        info!(
            "  HMM: {} observations, {} iterations, log-likelihood {:.2}, converged={}",
            hmm.observations, hmm.iterations, hmm.log_likelihood, hmm.converged
        );
    }

    for segment in overlay.shading() {
        let marker = match segment.label {
            DayLabel::BullHighVol => "▲",
            DayLabel::RangeBound => "■",
            DayLabel::BearHighVol => "▼",
        };
        println!(
            "{} {} .. {}  {:>4} days  {}",
            marker,
            segment.start_date,
            segment.end_date,
            segment.len(),
            segment.label
        );
    }
}

fn run_calibrate(input: &Path, settings: &RegimeSettings) -> Result<()> {
    let series = read_series(input)?;
    let base = RegimeBase::from_input(&series, settings)?;
    let c = &base.calibration;

    info!("━━━ Calibration ━━━");
    info!("  Candidates: {}", c.steps);
    info!("  Best slider: {:.3} (score {:.4})", c.best_slider, c.best_score);
    info!("  Effective sensitivity at best: {:.1}", c.best_effective_sensitivity);
    info!(
        "  Anchor {:.1} -> normalized target {:.3} (margin {:.3})",
        c.anchor_value, c.target_normalized, c.normalized_margin
    );
    if base.model.is_none() {
        warn!("No HMM was trained; every candidate scored 0");
    }
    println!("{}", serde_json::to_string_pretty(c)?);
    Ok(())
}

fn run_train(input: &Path, output: Option<&Path>, settings: &RegimeSettings) -> Result<()> {
    let series = read_series(input)?;
    let (series, report) = series.ingest()?;
    info!("Ingested {} bars ({} incomplete)", report.bars, report.bars_missing_fields);

    let features = extract_features(&series, &settings.features);
    let observations = ObservationSet::normalize(&features);
    info!("✓ {} usable observations", observations.len());

    let model = train_regime_model(&observations, &settings.hmm)?;
    for (state, count) in model.diagnostics.state_counts.iter().enumerate() {
        let label = model
            .label_map
            .label_for(state)
            .map(|l| format!("{:?}", l))
            .unwrap_or_else(|| "?".to_string());
        info!(
            "  State {} ({:11}): {:6} days ({:5.1}%)",
            state,
            label,
            count,
            *count as f64 / observations.len() as f64 * 100.0
        );
    }

    let json = serde_json::to_string_pretty(&model.to_json())?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("✓ Model saved to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_sweep(input: &Path, settings: &RegimeSettings) -> Result<()> {
    let series = read_series(input)?;
    let base = RegimeBase::from_input(&series, settings)?;

    println!("slider  coverage  target  segments  confidence");
    for point in sweep(&base) {
        println!(
            "{:6.1}  {:7.1}%  {:5.1}%  {:8}  {}",
            point.slider,
            point.trend_coverage_pct,
            point.target_trend_coverage_pct,
            point.segments,
            point
                .average_confidence
                .map(|c| format!("{:.3}", c))
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
    Ok(())
}
