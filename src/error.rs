//! Error types for fitting, solving and broker interaction.
//!
//! Each variant is recoverable per cycle: a `FitError` skips one group, a
//! `SolverError` skips one rebalance, a `BrokerError` is surfaced to the caller.

use crate::market::{Instrument, OrderHandle};
use thiserror::Error;

/// Degenerate or insufficient data for a single group's factor fit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("too few instruments: found {found}, need at least {required}")]
    TooFewInstruments { found: usize, required: usize },

    #[error("too few return observations: found {found}, need at least {required}")]
    TooFewObservations { found: usize, required: usize },

    #[error("instrument {instrument} has zero return variance")]
    ZeroVariance { instrument: Instrument },

    #[error("singular system while solving {0}")]
    Singular(&'static str),

    #[error("residuals have zero variance; cannot z-score")]
    DegenerateResiduals,

    #[error("non-finite values produced during {0}")]
    NonFinite(&'static str),
}

/// Failure reported by a constrained optimizer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("constraints are infeasible: {0}")]
    Infeasible(String),

    #[error("objective is unbounded")]
    Unbounded,

    #[error("iteration limit of {0} reached")]
    IterationLimit(usize),

    #[error("solver failed: {0}")]
    Numerical(String),

    #[error("dimension mismatch in {what}: expected {expected}, got {actual}")]
    Dimension {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Order submission or cancellation failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("order for {instrument} rejected: {reason}")]
    Rejected { instrument: Instrument, reason: String },

    #[error("unknown order {0}")]
    UnknownOrder(OrderHandle),

    #[error("no price available for {0}")]
    NoPrice(Instrument),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}
