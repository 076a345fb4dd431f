//! Sector Stat-Arb - Main Entry Point
//!
//! Backtests the strategy on daily bars and checks configuration.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sector_stat_arb::backtest::{BacktestConfig, BacktestEngine, CsvDataLoader, DataLoader};
use sector_stat_arb::config::Config;
use sector_stat_arb::market::{Commission, Slippage};
use sector_stat_arb::utils::decimal::from_f64;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Sector Stat-Arb CLI
#[derive(Parser)]
#[command(name = "sector-stat-arb")]
#[command(version, about = "Sector-neutral statistical arbitrage with trailing stops")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest simulation on historical daily bars
    Backtest {
        /// Path to CSV data file (date,symbol,sector,open,close[,eligible])
        #[arg(short, long)]
        data: String,

        /// Start date (YYYY-MM-DD), defaults to the first day in the data
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), defaults to the last day in the data
        #[arg(short, long)]
        end: Option<String>,

        /// Initial balance for simulation
        #[arg(short = 'b', long, default_value = "1000000")]
        initial_balance: f64,

        /// Charge $0.001 per share with a $5 minimum per order
        #[arg(long)]
        commission: bool,

        /// Cap fills at 2.5% of bar volume with quadratic price impact
        #[arg(long)]
        slippage: bool,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Load and validate configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_logging()?;

    // Contradictory bounds are fatal before anything runs
    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;
    log_config(&config);

    match cli.command {
        Commands::Backtest {
            data,
            start,
            end,
            initial_balance,
            commission,
            slippage,
            output,
        } => {
            run_backtest(
                config,
                &data,
                start.as_deref(),
                end.as_deref(),
                initial_balance,
                commission,
                slippage,
                output.as_deref(),
            )
            .await
        }
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            info!("✅ Configuration is valid");
            Ok(())
        }
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "sector-stat-arb.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sector_stat_arb=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Lookback: {} days", config.strategy.lookback_days);
    info!("   Sector Refresh: every {} days", config.strategy.rebalance_days);
    info!(
        "   Explained Variance: {:.0}%",
        config.factor_model.variance_threshold * 100.0
    );
    info!("   Min Group Size: {}", config.factor_model.min_group_size);
    info!(
        "   Factor Band: [{}, {}]",
        config.optimizer.factor_exposure_min, config.optimizer.factor_exposure_max
    );
    info!("   Gross Cap: {}x", config.optimizer.max_gross_exposure);
    info!(
        "   Stops: {} (init {:.1}%, trail {:.1}%)",
        if config.strategy.use_stop_loss { "on" } else { "off" },
        config.stop_loss.pct_init * dec!(100),
        config.stop_loss.pct_trail * dec!(100)
    );
    info!(
        "   Flatten End of Day: {}",
        config.strategy.flatten_end_of_day
    );
}

fn parse_date(value: &str, what: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid {what} date '{value}'"))
}

/// Run a backtest.
#[allow(clippy::too_many_arguments)]
async fn run_backtest(
    config: Config,
    data_path: &str,
    start: Option<&str>,
    end: Option<&str>,
    initial_balance: f64,
    commission: bool,
    slippage: bool,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    info!("📊 Loading data from: {}", data_path);
    let data_loader = CsvDataLoader::new(data_path)?;

    let (data_start, data_end) = data_loader
        .available_range()
        .context("Data file has no trading days")?;
    info!("   Data range: {} to {}", data_start, data_end);
    info!("   Symbols: {}", data_loader.available_symbols().len());
    info!("   Days: {}", data_loader.len());

    let start = start
        .map(|s| parse_date(s, "start"))
        .transpose()?
        .unwrap_or(data_start);
    let end = end
        .map(|s| parse_date(s, "end"))
        .transpose()?
        .unwrap_or(data_end);
    anyhow::ensure!(start <= end, "Start date {start} is after end date {end}");

    let initial_balance = from_f64(initial_balance)
        .filter(|b| *b > Decimal::ZERO)
        .context("Initial balance must be a positive number")?;

    let backtest_config = BacktestConfig {
        initial_balance,
        commission: if commission {
            Commission {
                per_share: dec!(0.001),
                min_per_order: dec!(5),
            }
        } else {
            Commission::FREE
        },
        slippage: if slippage {
            Slippage::VOLUME_SHARE
        } else {
            Slippage::NONE
        },
        record_equity_curve: true,
    };

    info!("💰 Initial balance: ${:.2}", initial_balance);
    info!("📅 Period: {} to {}", start, end);

    let mut engine = BacktestEngine::new(data_loader, config, backtest_config);
    let result = engine.run(start, end).await?;

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;

        let equity_path = format!("{}/equity_curve.csv", dir);
        result.equity_to_csv(&equity_path)?;
        info!("📁 Equity curve saved to: {}", equity_path);

        let summary_path = format!("{}/result.json", dir);
        std::fs::write(&summary_path, serde_json::to_string_pretty(&result)?)?;
        info!("📁 Result saved to: {}", summary_path);
    }

    Ok(())
}
