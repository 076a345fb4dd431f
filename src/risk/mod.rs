//! Risk management for open positions.
//!
//! - Trailing stop orders reconciled against live broker state
//! - Daily exposure record (leverage, long and short counts)

mod exposure;
mod stop_loss;

pub use exposure::ExposureSnapshot;
pub use stop_loss::{next_stop_price, StopLossManager, StopReport, StopState};
