//! Backtesting module for replaying the strategy over daily bars.
//!
//! This module provides:
//! - CSV day-bar loading (`date,symbol,sector,open,close[,eligible]`)
//! - Day-by-day simulation against the paper broker
//! - Performance metrics calculation
//!
//! # Example
//!
//! ```rust,ignore
//! use sector_stat_arb::backtest::{BacktestEngine, CsvDataLoader, BacktestConfig};
//!
//! let loader = CsvDataLoader::new("data/daily_bars.csv")?;
//! let mut engine = BacktestEngine::new(loader, Config::default(), BacktestConfig::default());
//!
//! let result = engine.run(start, end).await?;
//! println!("Return: {:.2}%", result.metrics.total_return_pct);
//! ```

mod data;
mod engine;
mod metrics;

pub use data::{CsvDataLoader, DataLoader, DayBar, TradingDay};
pub use engine::{BacktestEngine, BacktestResult};
pub use metrics::{BacktestMetrics, EquityPoint};

use crate::market::{Commission, Slippage};
use rust_decimal::Decimal;

/// Configuration for a backtest run.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Initial capital for the backtest
    pub initial_balance: Decimal,

    /// Commission charged by the paper broker on every fill
    pub commission: Commission,

    /// Volume-share slippage applied to fills; needs bar volumes
    pub slippage: Slippage,

    /// Whether to record one equity point per day
    pub record_equity_curve: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::new(1_000_000, 0), // $1,000,000
            commission: Commission::FREE,
            slippage: Slippage::NONE,
            record_equity_curve: true,
        }
    }
}
