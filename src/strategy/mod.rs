//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Turning assembled alpha and exposures into a constrained portfolio problem
//! - Order execution toward target weights and end-of-day flatten
//! - The per-day session driving fit, optimize, execute and stops

mod executor;
mod optimizer;
mod session;

pub use executor::{ExecutionReport, OrderExecutor, SubmittedOrder};
pub use optimizer::OptimizerAdapter;
pub use session::{
    CycleContext, RebalanceOutcome, RebalanceReport, SkipReason, StrategySession,
    UniverseSnapshot,
};
