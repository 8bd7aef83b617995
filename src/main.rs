//! Ouroboros - Feedback-Loop Closure for Quality-Prediction Models
//!
//! CLI entry point for the batch pipeline: link outcomes to predictions,
//! report feedback health, consolidate training datasets, and gate
//! retraining on data sufficiency.

use clap::{Parser, Subcommand};
use ouroboros_core::{
    config::OuroborosConfig,
    dataset::DatasetConsolidator,
    error::{OuroborosError, Result},
    jobs,
    linker::FeedbackLinker,
    monitor::FeedbackRateMonitor,
    storage::PredictionFilter,
    training::{
        search_grid, AutoOutcome, GateDecision, Hyperparameters, SubprocessTrainer, TrainingGate,
        TrainingMetrics, TrainingState, CANDIDATE_GRID,
    },
    ConnectionMode, LibsqlStore, PredictionStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ouroboros")]
#[command(about = "Feedback-loop closure for deployed quality-prediction models", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Configuration file (TOML); defaults are used when absent
    #[arg(short, long, env = "OUROBOROS_CONFIG")]
    config: Option<PathBuf>,

    /// Prediction store path (overrides the configured one)
    #[arg(long, env = "OUROBOROS_DB_PATH")]
    db_path: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the prediction store
    Init {
        /// Store path
        #[arg(short, long)]
        database: Option<String>,
    },

    /// Feedback linking and health reporting
    Feedback {
        #[command(subcommand)]
        command: FeedbackCommand,
    },

    /// Training dataset consolidation
    Dataset {
        #[command(subcommand)]
        command: DatasetCommand,
    },

    /// Training gate and trainer invocation
    Training {
        #[command(subcommand)]
        command: TrainingCommand,
    },

    /// Show store status
    Status,
}

#[derive(Subcommand)]
enum FeedbackCommand {
    /// Link unresolved predictions to outcomes from other services
    Link {
        /// Page limit override for this run
        #[arg(long)]
        limit: Option<usize>,

        /// Matching window override, in minutes
        #[arg(long)]
        window_mins: Option<u64>,
    },

    /// Report feedback collection health
    Report,
}

#[derive(Subcommand)]
enum DatasetCommand {
    /// Consolidate the live store and snapshots into a training dataset
    Build {
        /// Exclude synthetic and unknown-provenance examples
        #[arg(long)]
        real_only: bool,

        /// Output path override
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum TrainingCommand {
    /// Evaluate the training gate without side effects
    Check,

    /// Train now, unconditionally
    Train {
        /// Search the fixed hyperparameter grid by held-out R²
        #[arg(long)]
        tune: bool,
    },

    /// Train only if the gate is open
    Auto,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::new(format!(
        "ouroboros={level},ouroboros_core={level}",
        level = level.as_str().to_lowercase()
    ));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Logs to stderr, summaries to stdout
        .init();

    debug!("Ouroboros v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration; missing/invalid thresholds are fatal here,
    // before any job runs
    let mut config = match &cli.config {
        Some(path) => OuroborosConfig::from_file(path)?,
        None => OuroborosConfig::default(),
    };
    if let Some(db_path) = &cli.db_path {
        config.store.database_path = PathBuf::from(db_path);
    }

    match cli.command {
        Commands::Init { database } => {
            let path = database.unwrap_or_else(|| config.store.database_path.display().to_string());
            let _store =
                LibsqlStore::new_with_validation(ConnectionMode::Local(path.clone()), true).await?;
            println!("✓ Prediction store initialized: {}", path);
            Ok(())
        }

        Commands::Feedback { command } => match command {
            FeedbackCommand::Link { limit, window_mins } => {
                if let Some(limit) = limit {
                    config.linker.page_limit = limit;
                }
                if let Some(mins) = window_mins {
                    config.linker.window = std::time::Duration::from_secs(mins * 60);
                }
                config.validate().map_err(OuroborosError::from)?;

                let store = open_store(&config).await?;
                let linker = FeedbackLinker::new(store, config.linker.clone());
                let report = jobs::run_bounded(
                    "feedback-link",
                    config.linker.max_duration,
                    linker.run(),
                )
                .await?;

                println!("✓ Link pass complete in {:?}", report.duration);
                println!("  Targets:  {}", report.targets);
                println!("  Outcomes: {}", report.outcomes);
                println!("  Linked:   {}", report.linked);
                println!("  Recorded: {}", report.recorded);
                println!("  Skipped:  {}", report.skipped);
                println!("  Failed:   {}", report.failed);
                for error in &report.errors {
                    println!("  ! {}", error);
                }

                // Per-item failures only force a non-zero exit when the
                // failure is total
                if report.failed > 0 && report.linked == 0 {
                    eprintln!("✗ Every link attempt failed");
                    std::process::exit(1);
                }
                Ok(())
            }

            FeedbackCommand::Report => {
                let store = open_store(&config).await?;
                let monitor = FeedbackRateMonitor::new(store, config.monitor.clone());
                let health = jobs::run_bounded(
                    "feedback-report",
                    config.monitor.max_duration,
                    monitor.check_health(),
                )
                .await?;
                let stats = &health.stats;

                println!(
                    "Feedback over the last {} days: {}/{} predictions with outcomes ({:.2}%)",
                    stats.window_days,
                    stats.with_actual,
                    stats.total_predictions,
                    stats.feedback_rate * 100.0
                );
                println!("  Rate health:   {}", health.rate);
                println!("  Volume health: {}", health.volume);
                if let Some(avg) = stats.average_confidence {
                    println!("  Avg confidence: {:.3}", avg);
                }

                if !stats.by_service.is_empty() {
                    println!();
                    println!("  By service:");
                    for (service, s) in &stats.by_service {
                        println!(
                            "    {:<24} {:>5}/{:<5} ({:.2}%)",
                            service,
                            s.with_actual,
                            s.total,
                            s.feedback_rate * 100.0
                        );
                    }
                }

                if !stats.by_day.is_empty() {
                    println!();
                    println!("  By day (UTC):");
                    for (day, s) in &stats.by_day {
                        println!(
                            "    {} {:>5}/{:<5} ({:.2}%)",
                            day,
                            s.with_actual,
                            s.total,
                            s.feedback_rate * 100.0
                        );
                    }
                }

                if health.alerts.is_empty() {
                    println!();
                    println!("✓ No services need attention");
                } else {
                    println!();
                    for alert in &health.alerts {
                        println!(
                            "⚠ {} below {:.0}% feedback rate: {:.2}% of {} predictions",
                            alert.service,
                            config.monitor.alert_rate * 100.0,
                            alert.feedback_rate * 100.0,
                            alert.total
                        );
                    }
                }
                Ok(())
            }
        },

        Commands::Dataset { command } => match command {
            DatasetCommand::Build { real_only, output } => {
                let store = open_store(&config).await?;
                let consolidator = DatasetConsolidator::new(store, config.dataset.clone());
                let dataset = jobs::run_bounded(
                    "dataset-build",
                    config.dataset.max_duration,
                    consolidator.build(real_only),
                )
                .await?;

                let output_path = output.unwrap_or_else(|| config.dataset.output_path.clone());
                dataset.write_to(&output_path)?;

                let report = &dataset.report;
                let split = dataset.split();
                println!("✓ Dataset written: {}", output_path.display());
                println!(
                    "  Sources: {} store predictions, {} snapshots",
                    report.store_scanned, report.snapshots_loaded
                );
                println!(
                    "  Examples: {} total ({} train / {} validation / {} test)",
                    report.total_examples,
                    split.train.len(),
                    split.validation.len(),
                    split.test.len()
                );
                println!("  Duplicates dropped: {}", report.duplicates_dropped);
                if real_only {
                    println!(
                        "  Excluded: {} synthetic, {} unknown provenance",
                        report.synthetic_excluded, report.unknown_excluded
                    );
                }
                println!("  Invalid skipped: {}", report.invalid_skipped);
                for skipped in &report.snapshots_skipped {
                    println!("  ! snapshot skipped: {}", skipped);
                }
                println!(
                    "  Real: {} examples, {:.2}% feedback rate",
                    report.real_examples,
                    report.real_feedback_rate * 100.0
                );
                Ok(())
            }
        },

        Commands::Training { command } => {
            let store = open_store(&config).await?;
            let consolidator = DatasetConsolidator::new(store, config.dataset.clone());
            let gate = TrainingGate::new(config.training.clone());

            // Decision numbers always come from the synthetic-filtered
            // consolidated view
            let dataset = jobs::run_bounded(
                "dataset-build",
                config.dataset.max_duration,
                consolidator.build(true),
            )
            .await?;
            let report = &dataset.report;

            match command {
                TrainingCommand::Check => {
                    print_decision(&gate.evaluate(report));
                    if let Some(state) = TrainingState::load(&config.training.state_path)? {
                        println!(
                            "  Last trained: {} (run #{}, R² test {:.4})",
                            state.last_trained_at.to_rfc3339(),
                            state.runs,
                            state.metrics.r2_test
                        );
                    }
                    Ok(())
                }

                TrainingCommand::Train { tune } => {
                    let dataset_path = config.dataset.output_path.clone();
                    dataset.write_to(&dataset_path)?;
                    let trainer = SubprocessTrainer::new(config.training.clone());

                    let metrics = if tune {
                        let (winner, _) = jobs::run_bounded(
                            "training-tune",
                            config.training.max_duration,
                            search_grid(&trainer, &dataset_path, CANDIDATE_GRID),
                        )
                        .await?;
                        println!(
                            "✓ Grid winner: max_depth={} lr={} estimators={}",
                            winner.max_depth, winner.learning_rate, winner.n_estimators
                        );
                        // Final fit with the selected candidate
                        gate.run_train(&dataset_path, &trainer, &winner, report.real_examples)
                            .await?
                    } else {
                        jobs::run_bounded(
                            "training-train",
                            config.training.max_duration,
                            gate.run_train(
                                &dataset_path,
                                &trainer,
                                &Hyperparameters::default(),
                                report.real_examples,
                            ),
                        )
                        .await?
                    };

                    print_metrics(&metrics);
                    Ok(())
                }

                TrainingCommand::Auto => {
                    let dataset_path = config.dataset.output_path.clone();
                    dataset.write_to(&dataset_path)?;
                    let trainer = SubprocessTrainer::new(config.training.clone());

                    let outcome = jobs::run_bounded(
                        "training-auto",
                        config.training.max_duration,
                        gate.run_auto(report, &dataset_path, &trainer),
                    )
                    .await?;

                    match outcome {
                        AutoOutcome::Trained(metrics) => {
                            println!("✓ Gate open, trainer invoked");
                            print_metrics(&metrics);
                        }
                        AutoOutcome::Skipped(decision) => print_decision(&decision),
                    }
                    Ok(())
                }
            }
        }

        Commands::Status => {
            let store = open_store(&config).await?;
            let total = store.count_predictions(&PredictionFilter::default()).await?;
            let resolved = store
                .count_predictions(&PredictionFilter {
                    resolved: Some(true),
                    ..Default::default()
                })
                .await?;
            let feedback = store.count_feedback().await?;

            println!("Prediction store: {}", config.store.database_path.display());
            println!("  Predictions: {} total, {} resolved", total, resolved);
            println!("  Feedback events: {}", feedback);
            Ok(())
        }
    }
}

/// Open the configured store; a missing database is an unrecoverable
/// connectivity error (run `ouroboros init` first)
async fn open_store(config: &OuroborosConfig) -> Result<Arc<dyn PredictionStore>> {
    let store = LibsqlStore::new(ConnectionMode::Local(
        config.store.database_path.display().to_string(),
    ))
    .await?;
    Ok(Arc::new(store))
}

fn print_decision(decision: &GateDecision) {
    match decision {
        GateDecision::Ready {
            real_examples,
            feedback_rate,
        } => {
            println!(
                "✓ Ready to train: {} real examples, {:.2}% feedback rate",
                real_examples,
                feedback_rate * 100.0
            );
        }
        GateDecision::NotReady { conditions } => {
            println!("✗ Not ready to train:");
            for condition in conditions {
                println!("  - {}", condition);
            }
        }
    }
}

fn print_metrics(metrics: &TrainingMetrics) {
    println!("  R² train: {:.4}", metrics.r2_train);
    println!("  R² test:  {:.4}", metrics.r2_test);
    println!("  MAE:      {:.4}", metrics.mae);
    println!("  RMSE:     {:.4}", metrics.rmse);
}
