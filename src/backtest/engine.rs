//! Backtesting simulation engine.
//!
//! Replays trading days through a [`StrategySession`] wired to a
//! [`PaperBroker`]. Each day:
//! 1. screen, volumes and open prices are published (resting stops may trigger)
//! 2. `before_trading_start`
//! 3. `rebalance`, once `lookback_days` of closes exist
//! 4. stop reconciliation on days without a rebalance, when enabled
//! 5. close prices are published (resting stops may trigger)
//! 6. `end_of_day` flatten, when enabled
//! 7. closes are appended to the history and equity is recorded

use crate::backtest::data::{DataLoader, TradingDay};
use crate::backtest::metrics::{BacktestMetrics, EquityPoint};
use crate::backtest::BacktestConfig;
use crate::config::Config;
use crate::market::{Broker, InMemoryHistory, Instrument, PaperBroker, StaticUniverse};
use crate::solver::ClarabelOptimizer;
use crate::strategy::{RebalanceOutcome, StrategySession};
use crate::utils::decimal::to_f64;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub days: usize,
    pub rebalances: usize,
    pub skipped_cycles: usize,
    pub orders: usize,
    pub initial_balance: Decimal,
    pub final_equity: Decimal,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestResult {
    pub fn return_pct(&self) -> Decimal {
        self.metrics.total_return_pct
    }

    /// Export equity curve to CSV.
    pub fn equity_to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {path}"))?;
        writeln!(file, "date,equity,leverage,longs,shorts,drawdown")?;

        for point in &self.equity_curve {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                point.date, point.equity, point.leverage, point.longs, point.shorts, point.drawdown,
            )?;
        }

        Ok(())
    }

    pub fn summary(&self) -> String {
        let period = match (self.start, self.end) {
            (Some(start), Some(end)) => format!("{start} to {end}"),
            _ => "no data".to_string(),
        };
        format!(
            "{}\n\nBacktest Period: {}\nDays: {}\nRebalances: {} (skipped {})\nOrders: {}\nFinal Equity: ${:.2}",
            self.metrics.summary(),
            period,
            self.days,
            self.rebalances,
            self.skipped_cycles,
            self.orders,
            self.final_equity,
        )
    }
}

/// The backtesting simulation engine.
pub struct BacktestEngine<D: DataLoader> {
    data_loader: D,
    config: Config,
    backtest_config: BacktestConfig,
    broker: Arc<PaperBroker>,
    history: Arc<InMemoryHistory>,
    universe: Arc<StaticUniverse>,
    session: StrategySession,

    equity_curve: Vec<EquityPoint>,
    peak_equity: Decimal,
    rebalances: usize,
    skipped_cycles: usize,
    orders: usize,
}

impl<D: DataLoader> BacktestEngine<D> {
    pub fn new(data_loader: D, config: Config, backtest_config: BacktestConfig) -> Self {
        let initial_balance = backtest_config.initial_balance;
        let broker = Arc::new(
            PaperBroker::new(initial_balance)
                .with_commission(backtest_config.commission)
                .with_slippage(backtest_config.slippage),
        );
        let history = Arc::new(InMemoryHistory::new());
        let universe = Arc::new(StaticUniverse::default());

        let session = StrategySession::new(
            config.clone(),
            broker.clone(),
            history.clone(),
            universe.clone(),
            Arc::new(ClarabelOptimizer::default()),
        );

        Self {
            data_loader,
            config,
            backtest_config,
            broker,
            history,
            universe,
            session,
            equity_curve: Vec::new(),
            peak_equity: initial_balance,
            rebalances: 0,
            skipped_cycles: 0,
            orders: 0,
        }
    }

    /// Run the backtest over every trading day in `[start, end]`.
    pub async fn run(&mut self, start: NaiveDate, end: NaiveDate) -> Result<BacktestResult> {
        info!(%start, %end, "Starting backtest");

        let days = self
            .data_loader
            .load_days(start, end)
            .context("Failed to load trading days")?;
        info!("Loaded {} trading days", days.len());

        for day in &days {
            self.step(day)
                .await
                .with_context(|| format!("Backtest failed on {}", day.date))?;
        }

        let initial_balance = self.backtest_config.initial_balance;
        let final_equity = self.broker.portfolio_value().await?;
        let metrics = BacktestMetrics::calculate(
            &self.equity_curve,
            initial_balance,
            self.broker.total_commission().await,
        );

        info!(
            %final_equity,
            return_pct = %metrics.total_return_pct.round_dp(2),
            rebalances = self.rebalances,
            skipped = self.skipped_cycles,
            orders = self.orders,
            "Backtest complete"
        );

        Ok(BacktestResult {
            start: days.first().map(|d| d.date),
            end: days.last().map(|d| d.date),
            days: days.len(),
            rebalances: self.rebalances,
            skipped_cycles: self.skipped_cycles,
            orders: self.orders,
            initial_balance,
            final_equity,
            metrics,
            equity_curve: self.equity_curve.clone(),
        })
    }

    /// Run one trading day.
    async fn step(&mut self, day: &TradingDay) -> Result<()> {
        self.universe.replace(day.screen()).await;
        self.broker.set_volumes(day.volumes()).await;
        let stopped_at_open = self.broker.set_prices(day.opens()).await;

        self.session.before_trading_start().await?;

        let mut stops_done = false;
        if self.history.len().await >= self.config.strategy.lookback_days {
            match self.session.rebalance().await? {
                RebalanceOutcome::Submitted(report) => {
                    self.rebalances += 1;
                    self.orders += report.execution.submitted.len();
                    if let Some(stops) = &report.stops {
                        self.orders += stops.placed.len();
                        stops_done = true;
                    }
                }
                RebalanceOutcome::Skipped(reason) => {
                    debug!(date = %day.date, ?reason, "Rebalance skipped");
                    self.skipped_cycles += 1;
                }
            }
        }

        if self.config.strategy.use_stop_loss && !stops_done {
            let stops = self.session.manage_stops().await?;
            self.orders += stops.placed.len();
        }

        let stopped_at_close = self.broker.set_prices(day.closes()).await;

        if let Some(flatten) = self.session.end_of_day().await? {
            self.orders += flatten.submitted.len();
        }

        let closes: HashMap<Instrument, f64> = day
            .bars
            .iter()
            .map(|b| (b.instrument.clone(), to_f64(b.close)))
            .collect();
        self.history.push_day(closes).await;

        let exposure = self.session.record_exposure().await?;
        let equity = exposure.portfolio_value;
        self.peak_equity = self.peak_equity.max(equity);
        if self.backtest_config.record_equity_curve {
            self.equity_curve.push(EquityPoint::new(
                day.date,
                equity,
                exposure.leverage,
                exposure.longs,
                exposure.shorts,
                self.peak_equity,
            ));
        }

        debug!(
            date = %day.date,
            %equity,
            stops_triggered = stopped_at_open.len() + stopped_at_close.len(),
            "Day complete"
        );

        Ok(())
    }
}
