//! Command-line interface for the allocation engine.

use taa::analytics::ResultFormatter;
use taa::config::AllocationFileConfig;
use taa::data::{load_returns_csv, DataConfig};
use taa::engine::{AllocationEngine, AllocationResult, RunMode};
use taa::error::{AllocError, Result};
use taa::schedule::{RebalanceSchedule, RebalanceUnit};
use taa::types::ReturnMatrix;
use taa::weighting::WeightingPolicy;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// taa - momentum allocation backtester with canary crash protection.
#[derive(Parser)]
#[command(name = "taa")]
#[command(version)]
#[command(about = "Backtest momentum-ranked, risk-weighted asset allocation strategies")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a full allocation backtest from a configuration file
    Run {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Compute the weight history only, without simulating returns
    Weights {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show the rebalance dates derived from a return file
    Schedule {
        /// Path to return CSV file
        #[arg(short, long)]
        returns: PathBuf,

        /// Rebalance period
        #[arg(short, long, value_enum, default_value = "months")]
        unit: UnitArg,

        /// Row offset applied to every period end
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        offset: i64,

        /// Periods per data window (defaults to one year of periods)
        #[arg(short, long)]
        window_periods: Option<usize>,
    },

    /// Generate an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "taa.toml")]
        output: PathBuf,
    },

    /// List the available weighting policies
    Policies,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum UnitArg {
    Months,
    Quarters,
    Years,
}

impl From<UnitArg> for RebalanceUnit {
    fn from(unit: UnitArg) -> Self {
        match unit {
            UnitArg::Months => RebalanceUnit::Months,
            UnitArg::Quarters => RebalanceUnit::Quarters,
            UnitArg::Years => RebalanceUnit::Years,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to set tracing subscriber: {}", e);
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run { config } => run_from_config(config, RunMode::Full, cli.output),
        Commands::Weights { config } => run_from_config(config, RunMode::WeightsOnly, cli.output),
        Commands::Schedule {
            returns,
            unit,
            offset,
            window_periods,
        } => show_schedule(returns, (*unit).into(), *offset, *window_periods, cli.output),
        Commands::Init { output } => init_config(output),
        Commands::Policies => {
            print_policies();
            Ok(())
        }
    }
}

/// Print an error with its remediation hints.
pub fn report_error(err: &AllocError) {
    eprintln!("{} {}", "Error:".red().bold(), err);
    if let Some(help) = err.help() {
        eprintln!();
        eprintln!("{}", "Common causes:".yellow());
        for cause in &help.common_causes {
            eprintln!("  - {}", cause);
        }
        eprintln!("{}", "Quick fixes:".green());
        for fix in &help.quick_fixes {
            eprintln!("  - {}", fix);
        }
    }
}

fn load_inputs(file_config: &AllocationFileConfig) -> Result<(ReturnMatrix, Option<ReturnMatrix>)> {
    let data_config = DataConfig {
        date_format: file_config.data.date_format.clone(),
        prices: file_config.data.prices,
        skip_invalid: file_config.data.skip_invalid,
        ..Default::default()
    };

    let returns_path = file_config.data.returns.as_ref().ok_or_else(|| {
        AllocError::ConfigError("No returns file specified in [data]".to_string())
    })?;
    let returns = load_returns_csv(returns_path, &data_config)?;

    let canary = match &file_config.data.canary {
        Some(path) => Some(load_returns_csv(path, &data_config)?),
        None => None,
    };

    Ok((returns, canary))
}

fn run_from_config(config_path: &Path, mode: RunMode, output: OutputFormat) -> Result<()> {
    let file_config = AllocationFileConfig::load(config_path)?;
    let engine = AllocationEngine::new(file_config.to_allocation_config()?)?;
    let (returns, canary) = load_inputs(&file_config)?;

    let result = engine.run(&returns, canary.as_ref(), mode)?;
    info!("Computed {} rebalances", result.weights.len());

    match (output, mode) {
        (OutputFormat::Json, RunMode::Full) => {
            println!("{}", serde_json::to_string_pretty(&result)?)
        }
        (OutputFormat::Json, RunMode::WeightsOnly) => {
            println!("{}", serde_json::to_string_pretty(&result.weights.to_rows())?)
        }
        (OutputFormat::Text, RunMode::Full) => ResultFormatter::print_report(&result),
        (OutputFormat::Text, RunMode::WeightsOnly) => print_weights(&result),
    }

    Ok(())
}

fn print_weights(result: &AllocationResult) {
    println!("{}", "Weight History".bold().underline());
    for row in result.weights.to_rows() {
        let holdings: Vec<String> = row
            .weights
            .iter()
            .map(|(asset, w)| format!("{} {:.1}%", asset, w * 100.0))
            .collect();
        let holdings = if holdings.is_empty() {
            "cash".dimmed().to_string()
        } else {
            holdings.join(", ")
        };
        println!("  {}  {}", row.timestamp.format("%Y-%m-%d"), holdings);
    }
    println!();
    println!(
        "  Avg Turnover:    {:>8.2}%",
        result.average_turnover * 100.0
    );
}

fn show_schedule(
    returns_path: &Path,
    unit: RebalanceUnit,
    offset: i64,
    window_periods: Option<usize>,
    output: OutputFormat,
) -> Result<()> {
    let returns = load_returns_csv(returns_path, &DataConfig::default())?;
    let window = window_periods.unwrap_or_else(|| unit.periods_per_year());
    let schedule = RebalanceSchedule::generate(returns.timestamps(), unit, offset, window)?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&schedule)?),
        OutputFormat::Text => {
            println!(
                "{}",
                format!("Rebalance Schedule ({}, offset {})", unit, offset)
                    .bold()
                    .underline()
            );
            for (i, (index, date)) in schedule
                .indices()
                .iter()
                .zip(schedule.dates(returns.timestamps()))
                .enumerate()
            {
                let marker = if i < window {
                    "(warm-up)".dimmed().to_string()
                } else {
                    String::new()
                };
                println!("  {:>6}  {}  {}", index, date.format("%Y-%m-%d"), marker);
            }
        }
    }

    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    fs::write(output, AllocationFileConfig::example())?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to point at your return data, then run:");
    println!("  taa run -c {}", output.display());
    Ok(())
}

fn print_policies() {
    println!("{}", "Weighting Policies".bold().underline());
    for policy in WeightingPolicy::ALL {
        println!("  {:<8} {}", policy.name().green(), policy.description());
    }
}
