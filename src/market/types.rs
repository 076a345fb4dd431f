//! Domain types shared by the strategy and its collaborators.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a tradable security.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Instrument {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

/// Sector label assigned upstream by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// Broker-assigned order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderHandle(pub u64);

impl fmt::Display for OrderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an order executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStyle {
    /// Fill at the current price
    Market,
    /// Rest until the price reaches the limit
    Limit(Decimal),
    /// Rest until the price crosses the trigger, then fill at market
    Stop(Decimal),
}

impl OrderStyle {
    pub fn is_stop(&self) -> bool {
        matches!(self, OrderStyle::Stop(_))
    }
}

/// An unfilled order resting at the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub handle: OrderHandle,
    pub instrument: Instrument,
    /// Signed share amount (positive = buy)
    pub amount: Decimal,
    pub style: OrderStyle,
}

impl OpenOrder {
    pub fn is_stop(&self) -> bool {
        self.style.is_stop()
    }
}

/// A held position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    /// Signed share amount (negative = short)
    pub amount: Decimal,
    /// Average fill price of the current position
    pub cost_basis: Decimal,
}

/// One row of the upstream screener output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedInstrument {
    pub instrument: Instrument,
    pub group: GroupId,
    /// Whether the instrument may be traded this cycle
    pub eligible: bool,
}

impl ScreenedInstrument {
    pub fn new(instrument: impl Into<String>, group: impl Into<String>, eligible: bool) -> Self {
        Self {
            instrument: Instrument::new(instrument),
            group: GroupId::new(group),
            eligible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_identifiers_display() {
        assert_eq!(Instrument::from("AAPL").to_string(), "AAPL");
        assert_eq!(GroupId::from("TECH").as_str(), "TECH");
        assert_eq!(OrderHandle(7).to_string(), "#7");
    }

    #[test]
    fn test_stop_detection() {
        let order = OpenOrder {
            handle: OrderHandle(1),
            instrument: Instrument::from("XOM"),
            amount: dec!(-100),
            style: OrderStyle::Stop(dec!(49.5)),
        };
        assert!(order.is_stop());
        assert!(!OrderStyle::Limit(dec!(10)).is_stop());
        assert!(!OrderStyle::Market.is_stop());
    }
}
