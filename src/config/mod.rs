//! Configuration management for the sector stat-arb strategy.
//!
//! Loads settings from an optional `config` file and `SSA__`-prefixed
//! environment variables. Unknown keys are rejected at load time.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Scheduling and universe settings
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Per-group factor model settings
    #[serde(default)]
    pub factor_model: FactorModelConfig,
    /// Portfolio construction bounds
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Trailing stop parameters
    #[serde(default)]
    pub stop_loss: StopLossConfig,
    /// Order submission parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    /// Daily closes requested per fit
    #[serde(default = "default_lookback_days")]
    pub lookback_days: usize,
    /// Trading days between sector membership rebuilds
    #[serde(default = "default_rebalance_days")]
    pub rebalance_days: u32,
    /// Run the trailing stop manager after each rebalance
    #[serde(default)]
    pub use_stop_loss: bool,
    /// Cancel all orders and close all positions before the close
    #[serde(default = "default_flatten_end_of_day")]
    pub flatten_end_of_day: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactorModelConfig {
    /// Cumulative explained-variance ratio the latent factors must reach (0.0-1.0]
    #[serde(default = "default_variance_threshold")]
    pub variance_threshold: f64,
    /// Lower bound on the number of latent factors
    #[serde(default = "default_min_components")]
    pub min_components: usize,
    /// Upper bound on the number of latent factors (unbounded when absent)
    #[serde(default)]
    pub max_components: Option<usize>,
    /// Groups with fewer surviving instruments are not fitted
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Lower bound of net exposure to each latent factor
    #[serde(default = "default_factor_exposure_min")]
    pub factor_exposure_min: f64,
    /// Upper bound of net exposure to each latent factor
    #[serde(default = "default_factor_exposure_max")]
    pub factor_exposure_max: f64,
    /// Per-instrument bound is +/- position_leverage / M
    #[serde(default = "default_position_leverage")]
    pub position_leverage: f64,
    /// Ceiling on the sum of absolute weights
    #[serde(default = "default_max_gross_exposure")]
    pub max_gross_exposure: f64,
    /// Symmetric band on net (long - short) weight
    #[serde(default = "default_dollar_neutral_tolerance")]
    pub dollar_neutral_tolerance: f64,
    /// Lower bound of net weight per group
    #[serde(default = "default_group_neutral_min")]
    pub group_neutral_min: f64,
    /// Upper bound of net weight per group
    #[serde(default = "default_group_neutral_max")]
    pub group_neutral_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopLossConfig {
    /// Offset of the first stop from the current price (0.0-1.0)
    #[serde(default = "default_pct_init")]
    pub pct_init: Decimal,
    /// Offset of the trailing candidate from the current price (0.0-1.0)
    #[serde(default = "default_pct_trail")]
    pub pct_trail: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Order deltas smaller than this many shares are not sent
    #[serde(default = "default_min_trade_shares")]
    pub min_trade_shares: Decimal,
}

// Default value functions
fn default_lookback_days() -> usize {
    90
}

fn default_rebalance_days() -> u32 {
    45
}

fn default_flatten_end_of_day() -> bool {
    true
}

fn default_variance_threshold() -> f64 {
    0.90
}

fn default_min_components() -> usize {
    1
}

fn default_min_group_size() -> usize {
    3
}

fn default_factor_exposure_min() -> f64 {
    -0.01
}

fn default_factor_exposure_max() -> f64 {
    0.01
}

fn default_position_leverage() -> f64 {
    10.0
}

fn default_max_gross_exposure() -> f64 {
    1.0
}

fn default_dollar_neutral_tolerance() -> f64 {
    0.0001
}

fn default_group_neutral_min() -> f64 {
    -0.0001
}

fn default_group_neutral_max() -> f64 {
    0.0001
}

fn default_pct_init() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_pct_trail() -> Decimal {
    Decimal::new(3, 2) // 0.03
}

fn default_min_trade_shares() -> Decimal {
    Decimal::ONE
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("SSA"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    ///
    /// Any failure here is fatal at startup; contradictory bounds never reach the solver.
    pub fn validate(&self) -> Result<()> {
        self.strategy.validate()?;
        self.factor_model.validate()?;
        self.optimizer.validate()?;
        self.stop_loss.validate()?;

        anyhow::ensure!(
            self.execution.min_trade_shares >= Decimal::ZERO,
            "min_trade_shares must not be negative"
        );

        Ok(())
    }
}

impl StrategyConfig {
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.lookback_days >= 3, "lookback_days must be at least 3");
        anyhow::ensure!(self.rebalance_days >= 1, "rebalance_days must be at least 1");
        Ok(())
    }
}

impl FactorModelConfig {
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.variance_threshold > 0.0 && self.variance_threshold <= 1.0,
            "variance_threshold must be in (0, 1]"
        );
        anyhow::ensure!(self.min_components >= 1, "min_components must be at least 1");
        if let Some(max) = self.max_components {
            anyhow::ensure!(
                max >= self.min_components,
                "max_components must be >= min_components"
            );
        }
        anyhow::ensure!(self.min_group_size >= 2, "min_group_size must be at least 2");
        Ok(())
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.factor_exposure_min <= self.factor_exposure_max,
            "factor_exposure_min ({}) exceeds factor_exposure_max ({})",
            self.factor_exposure_min,
            self.factor_exposure_max
        );
        anyhow::ensure!(
            self.group_neutral_min <= self.group_neutral_max,
            "group_neutral_min ({}) exceeds group_neutral_max ({})",
            self.group_neutral_min,
            self.group_neutral_max
        );
        anyhow::ensure!(
            self.dollar_neutral_tolerance >= 0.0,
            "dollar_neutral_tolerance must not be negative"
        );
        anyhow::ensure!(self.position_leverage > 0.0, "position_leverage must be positive");
        anyhow::ensure!(self.max_gross_exposure > 0.0, "max_gross_exposure must be positive");
        Ok(())
    }
}

impl StopLossConfig {
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.pct_init > Decimal::ZERO && self.pct_init < Decimal::ONE,
            "pct_init must be between 0 and 1"
        );
        anyhow::ensure!(
            self.pct_trail > Decimal::ZERO && self.pct_trail < Decimal::ONE,
            "pct_trail must be between 0 and 1"
        );
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            factor_model: FactorModelConfig::default(),
            optimizer: OptimizerConfig::default(),
            stop_loss: StopLossConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            rebalance_days: default_rebalance_days(),
            use_stop_loss: false,
            flatten_end_of_day: default_flatten_end_of_day(),
        }
    }
}

impl Default for FactorModelConfig {
    fn default() -> Self {
        Self {
            variance_threshold: default_variance_threshold(),
            min_components: default_min_components(),
            max_components: None,
            min_group_size: default_min_group_size(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            factor_exposure_min: default_factor_exposure_min(),
            factor_exposure_max: default_factor_exposure_max(),
            position_leverage: default_position_leverage(),
            max_gross_exposure: default_max_gross_exposure(),
            dollar_neutral_tolerance: default_dollar_neutral_tolerance(),
            group_neutral_min: default_group_neutral_min(),
            group_neutral_max: default_group_neutral_max(),
        }
    }
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            pct_init: default_pct_init(),
            pct_trail: default_pct_trail(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_trade_shares: default_min_trade_shares(),
        }
    }
}
