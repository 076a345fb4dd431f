//! Per-day strategy entry points and the state carried between them.
//!
//! A scheduler (the backtest engine, or a live loop) calls, once per
//! trading day and never concurrently:
//! 1. [`StrategySession::before_trading_start`]
//! 2. [`StrategySession::rebalance`] (which runs the stop reconciler after its
//!    orders when stops are enabled)
//! 3. [`StrategySession::manage_stops`] as often as desired
//! 4. [`StrategySession::end_of_day`] and [`StrategySession::record_exposure`]

use super::executor::{ExecutionReport, OrderExecutor};
use super::optimizer::OptimizerAdapter;
use crate::config::Config;
use crate::error::SolverError;
use crate::market::{Broker, GroupId, HistoryProvider, Instrument, UniverseProvider};
use crate::model::{FactorFit, FactorModelFitter, PortfolioAssembler};
use crate::risk::{ExposureSnapshot, StopLossManager, StopReport};
use crate::solver::{ConstrainedOptimizer, TargetWeights};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sector membership fixed between refreshes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniverseSnapshot {
    /// Instruments per group, both in sorted order
    pub groups: BTreeMap<GroupId, Vec<Instrument>>,
    /// Trading day the snapshot was built on
    pub built_on: u64,
}

impl UniverseSnapshot {
    pub fn instrument_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// State carried from one scheduler call to the next.
#[derive(Debug, Clone, Default)]
pub struct CycleContext {
    /// Trading days seen by `before_trading_start`, starting at 1
    pub day: u64,
    pub snapshot: Option<UniverseSnapshot>,
    /// Instruments eligible today
    pub eligible: HashSet<Instrument>,
}

/// Why a rebalance placed no orders.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// `before_trading_start` has not produced a universe yet
    NoUniverse,
    /// Every group failed to fit
    NoFits,
    /// The optimizer could not produce an allocation
    Solver(SolverError),
}

#[derive(Debug)]
pub struct RebalanceReport {
    pub groups_fitted: Vec<GroupId>,
    pub groups_skipped: Vec<(GroupId, String)>,
    pub weights: TargetWeights,
    pub execution: ExecutionReport,
    pub stops: Option<StopReport>,
}

#[derive(Debug)]
pub enum RebalanceOutcome {
    Submitted(RebalanceReport),
    Skipped(SkipReason),
}

impl RebalanceOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, RebalanceOutcome::Submitted(_))
    }
}

/// One strategy instance wired to its collaborators.
pub struct StrategySession {
    config: Config,
    broker: Arc<dyn Broker>,
    history: Arc<dyn HistoryProvider>,
    universe: Arc<dyn UniverseProvider>,
    optimizer: Arc<dyn ConstrainedOptimizer>,
    fitter: FactorModelFitter,
    adapter: OptimizerAdapter,
    executor: OrderExecutor,
    stops: StopLossManager,
    context: CycleContext,
}

impl StrategySession {
    pub fn new(
        config: Config,
        broker: Arc<dyn Broker>,
        history: Arc<dyn HistoryProvider>,
        universe: Arc<dyn UniverseProvider>,
        optimizer: Arc<dyn ConstrainedOptimizer>,
    ) -> Self {
        Self {
            fitter: FactorModelFitter::new(config.factor_model.clone()),
            adapter: OptimizerAdapter::new(config.optimizer.clone()),
            executor: OrderExecutor::new(config.execution.clone()),
            stops: StopLossManager::new(config.stop_loss.clone()),
            config,
            broker,
            history,
            universe,
            optimizer,
            context: CycleContext::default(),
        }
    }

    pub fn context(&self) -> &CycleContext {
        &self.context
    }

    pub fn stops(&self) -> &StopLossManager {
        &self.stops
    }

    /// Refresh eligibility, and sector membership every `rebalance_days`.
    ///
    /// Returns whether membership was rebuilt.
    pub async fn before_trading_start(&mut self) -> Result<bool> {
        self.context.day += 1;
        let day = self.context.day;

        let screened = self
            .universe
            .screen()
            .await
            .context("Failed to screen universe")?;

        self.context.eligible = screened
            .iter()
            .filter(|row| row.eligible)
            .map(|row| row.instrument.clone())
            .collect();

        let due = match &self.context.snapshot {
            None => true,
            Some(snapshot) => {
                day - snapshot.built_on >= u64::from(self.config.strategy.rebalance_days)
            }
        };

        if due {
            let mut groups: BTreeMap<GroupId, Vec<Instrument>> = BTreeMap::new();
            for row in screened {
                groups.entry(row.group).or_default().push(row.instrument);
            }
            for members in groups.values_mut() {
                members.sort();
                members.dedup();
            }

            let snapshot = UniverseSnapshot {
                groups,
                built_on: day,
            };
            info!(
                day,
                groups = snapshot.groups.len(),
                instruments = snapshot.instrument_count(),
                eligible = self.context.eligible.len(),
                "Sector membership rebuilt"
            );
            self.context.snapshot = Some(snapshot);
        } else {
            debug!(day, eligible = self.context.eligible.len(), "Eligibility refreshed");
        }

        Ok(due)
    }

    /// Fit every group, optimize, and send the orders.
    ///
    /// Group fit failures and optimizer failures are recovered here; only
    /// broker account queries failing make this return an error.
    pub async fn rebalance(&mut self) -> Result<RebalanceOutcome> {
        let Some(snapshot) = self.context.snapshot.clone() else {
            warn!("Rebalance before universe refresh, skipping");
            return Ok(RebalanceOutcome::Skipped(SkipReason::NoUniverse));
        };

        let mut fits: Vec<(GroupId, FactorFit)> = Vec::with_capacity(snapshot.groups.len());
        let mut groups_skipped = Vec::new();

        for (group, members) in &snapshot.groups {
            let history = match self
                .history
                .history(members, self.config.strategy.lookback_days)
                .await
            {
                Ok(history) => history,
                Err(e) => {
                    warn!(%group, error = %e, "History unavailable, skipping group");
                    groups_skipped.push((group.clone(), e.to_string()));
                    continue;
                }
            };

            match self.fitter.fit(&history, &self.context.eligible) {
                Ok(fit) => fits.push((group.clone(), fit)),
                Err(e) => {
                    warn!(%group, error = %e, "Factor fit failed, skipping group");
                    groups_skipped.push((group.clone(), e.to_string()));
                }
            }
        }

        if fits.is_empty() {
            warn!(skipped = groups_skipped.len(), "No group produced a fit");
            return Ok(RebalanceOutcome::Skipped(SkipReason::NoFits));
        }

        let input = PortfolioAssembler::assemble(&fits);
        let weights = match self.adapter.allocate(&input, self.optimizer.as_ref()) {
            Ok(weights) => weights,
            Err(e) => {
                warn!(error = %e, "Rebalance skipped, no orders submitted");
                return Ok(RebalanceOutcome::Skipped(SkipReason::Solver(e)));
            }
        };

        let execution = self
            .executor
            .rebalance_to_weights(self.broker.as_ref(), &weights)
            .await
            .context("Failed to submit rebalance orders")?;

        let stops = if self.config.strategy.use_stop_loss {
            Some(self.manage_stops().await?)
        } else {
            None
        };

        let groups_fitted: Vec<GroupId> = fits.into_iter().map(|(group, _)| group).collect();
        info!(
            fitted = groups_fitted.len(),
            skipped = groups_skipped.len(),
            orders = execution.submitted.len(),
            "Rebalance complete"
        );

        Ok(RebalanceOutcome::Submitted(RebalanceReport {
            groups_fitted,
            groups_skipped,
            weights,
            execution,
            stops,
        }))
    }

    /// Reconcile and replace trailing stops.
    pub async fn manage_stops(&mut self) -> Result<StopReport> {
        self.stops
            .manage_orders(self.broker.as_ref())
            .await
            .context("Failed to reconcile stop orders")
    }

    /// Flatten the book when configured to hold nothing overnight.
    pub async fn end_of_day(&mut self) -> Result<Option<ExecutionReport>> {
        if !self.config.strategy.flatten_end_of_day {
            return Ok(None);
        }
        let report = self
            .executor
            .flatten(self.broker.as_ref())
            .await
            .context("Failed to flatten portfolio")?;
        Ok(Some(report))
    }

    pub async fn record_exposure(&self) -> Result<ExposureSnapshot> {
        ExposureSnapshot::capture(self.broker.as_ref())
            .await
            .context("Failed to capture exposure")
    }
}
