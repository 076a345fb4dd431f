//! # Sector Stat-Arb
//!
//! Sector-neutral statistical arbitrage: per-sector PCA factor models produce
//! residual alphas and factor exposures, a constrained optimizer turns them
//! into a market-, sector- and factor-neutral target book, and a trailing
//! stop manager protects the resulting positions.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Typed fit, solver and broker errors
//! - `market`: Domain types, collaborator traits, paper broker
//! - `model`: Per-group factor model and block-diagonal assembly
//! - `solver`: Portfolio problem description and LP optimizer
//! - `strategy`: Optimizer adapter, order execution, per-day session
//! - `risk`: Trailing stop reconciliation and exposure records
//! - `backtest`: Daily-bar replay against the paper broker
//! - `utils`: Linear algebra, statistics and decimal helpers

pub mod backtest;
pub mod config;
pub mod error;
pub mod market;
pub mod model;
pub mod risk;
pub mod solver;
pub mod strategy;
pub mod utils;

pub use config::Config;
