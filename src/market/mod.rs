//! Market-facing types and collaborator interfaces.
//!
//! ## Collaborators
//! - `Broker`: open orders, positions, order submission/cancellation, prices
//! - `HistoryProvider`: daily close history with gaps
//! - `UniverseProvider`: screened universe with sector labels and eligibility
//!
//! ## Simulation
//! `PaperBroker`, `InMemoryHistory` and `StaticUniverse` implement the
//! collaborators in memory for backtests and tests.

mod history;
pub mod paper;
mod traits;
mod types;

pub use history::{InMemoryHistory, PriceHistory};
pub use paper::{Commission, OrderEvent, PaperBroker, Slippage, StaticUniverse};
pub use traits::{Broker, HistoryProvider, UniverseProvider};
#[cfg(test)]
pub use traits::MockBroker;
pub use types::*;
