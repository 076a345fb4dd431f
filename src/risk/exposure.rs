//! Daily exposure record: account leverage and long/short counts.

use crate::error::BrokerError;
use crate::market::Broker;
use crate::utils::decimal::safe_div;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

/// Point-in-time exposure of the account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExposureSnapshot {
    /// Gross position value over portfolio value
    pub leverage: Decimal,
    /// Positions with a positive amount
    pub longs: usize,
    /// Positions with a negative amount
    pub shorts: usize,
    pub gross_value: Decimal,
    pub portfolio_value: Decimal,
}

impl ExposureSnapshot {
    /// Read positions and prices from the broker and log the record.
    ///
    /// Positions without a current price are marked at cost basis.
    pub async fn capture(broker: &dyn Broker) -> Result<Self, BrokerError> {
        let positions = broker.positions().await?;
        let portfolio_value = broker.portfolio_value().await?;

        let mut gross_value = Decimal::ZERO;
        let (mut longs, mut shorts) = (0, 0);
        for position in positions.values() {
            if position.amount > Decimal::ZERO {
                longs += 1;
            } else if position.amount < Decimal::ZERO {
                shorts += 1;
            } else {
                continue;
            }

            let price = match broker.current_price(&position.instrument).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(instrument = %position.instrument, error = %e, "Marking at cost basis");
                    position.cost_basis
                }
            };
            gross_value += (position.amount * price).abs();
        }

        let snapshot = Self {
            leverage: safe_div(gross_value, portfolio_value),
            longs,
            shorts,
            gross_value,
            portfolio_value,
        };

        info!(
            leverage = %snapshot.leverage.round_dp(4),
            longs,
            shorts,
            gross = %gross_value,
            value = %portfolio_value,
            "Exposure recorded"
        );

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Instrument, OrderStyle, PaperBroker};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_capture_counts_and_leverage() {
        let broker = PaperBroker::new(dec!(10000));
        broker
            .set_prices(
                [
                    (Instrument::from("XOM"), dec!(50)),
                    (Instrument::from("CVX"), dec!(100)),
                    (Instrument::from("COP"), dec!(20)),
                ]
                .into(),
            )
            .await;
        broker
            .submit_order(&"XOM".into(), dec!(40), OrderStyle::Market)
            .await
            .unwrap();
        broker
            .submit_order(&"CVX".into(), dec!(-10), OrderStyle::Market)
            .await
            .unwrap();
        broker
            .submit_order(&"COP".into(), dec!(-50), OrderStyle::Market)
            .await
            .unwrap();

        let snapshot = ExposureSnapshot::capture(&broker).await.unwrap();
        assert_eq!(snapshot.longs, 1);
        assert_eq!(snapshot.shorts, 2);
        // 2000 + 1000 + 1000 over an unchanged 10000
        assert_eq!(snapshot.gross_value, dec!(4000));
        assert_eq!(snapshot.leverage, dec!(0.4));
    }

    #[tokio::test]
    async fn test_empty_account() {
        let broker = PaperBroker::new(dec!(10000));
        let snapshot = tokio_test::assert_ok!(ExposureSnapshot::capture(&broker).await);
        assert_eq!(snapshot.leverage, Decimal::ZERO);
        assert_eq!((snapshot.longs, snapshot.shorts), (0, 0));
    }
}
