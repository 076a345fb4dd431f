//! Collaborator interfaces the strategy core depends on.
//!
//! The strategy never talks to a venue directly; it goes through these
//! traits so a paper broker, a replay, or a live adapter can be swapped in.

use super::history::PriceHistory;
use super::types::{Instrument, OpenOrder, OrderHandle, OrderStyle, Position, ScreenedInstrument};
use crate::error::BrokerError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Order book, positions and prices of the trading account.
///
/// The broker is the source of truth for amounts; callers must not assume a
/// submit or cancel succeeded unless it returns `Ok`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// All unfilled orders, grouped by instrument.
    async fn open_orders(&self) -> Result<HashMap<Instrument, Vec<OpenOrder>>, BrokerError>;

    /// All nonzero positions.
    async fn positions(&self) -> Result<HashMap<Instrument, Position>, BrokerError>;

    /// Submit an order for a signed share amount.
    async fn submit_order(
        &self,
        instrument: &Instrument,
        amount: Decimal,
        style: OrderStyle,
    ) -> Result<OrderHandle, BrokerError>;

    async fn cancel_order(&self, handle: OrderHandle) -> Result<(), BrokerError>;

    async fn current_price(&self, instrument: &Instrument) -> Result<Decimal, BrokerError>;

    /// Cash plus marked-to-market positions.
    async fn portfolio_value(&self) -> Result<Decimal, BrokerError>;
}

/// Source of daily close history.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// The last `length` daily closes for `instruments`, gaps as `NaN`.
    async fn history(&self, instruments: &[Instrument], length: usize)
        -> anyhow::Result<PriceHistory>;
}

/// Upstream screener and sector classifier.
#[async_trait]
pub trait UniverseProvider: Send + Sync {
    /// Today's tradable universe with group labels and eligibility.
    ///
    /// Price and liquidity floors are already applied.
    async fn screen(&self) -> anyhow::Result<Vec<ScreenedInstrument>>;
}
