//! Order execution: target weights to share orders, and end-of-day flatten.

use crate::config::ExecutionConfig;
use crate::error::BrokerError;
use crate::market::{Broker, Instrument, OrderHandle, OrderStyle};
use crate::solver::TargetWeights;
use crate::utils::decimal::{from_f64, truncate_to_lot};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, info, warn};

/// An order accepted by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedOrder {
    pub handle: OrderHandle,
    pub instrument: Instrument,
    pub amount: Decimal,
}

/// Outcome of one batch of order activity.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub submitted: Vec<SubmittedOrder>,
    pub cancelled: Vec<OrderHandle>,
    pub failed: Vec<(Instrument, BrokerError)>,
}

impl ExecutionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Turns target weights into market orders against a [`Broker`].
pub struct OrderExecutor {
    config: ExecutionConfig,
}

impl OrderExecutor {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    /// Move every instrument toward `weights`.
    ///
    /// Target shares are `trunc(weight * portfolio_value / price)`. The order
    /// sent is the difference between the target and the current position plus
    /// resting non-stop orders, so repeated calls do not stack. Held
    /// instruments absent from `weights` are closed.
    ///
    /// Account queries failing abort the batch; a failure on one instrument is
    /// recorded and the rest are still sent.
    pub async fn rebalance_to_weights(
        &self,
        broker: &dyn Broker,
        weights: &TargetWeights,
    ) -> Result<ExecutionReport, BrokerError> {
        let portfolio_value = broker.portfolio_value().await?;
        let positions = broker.positions().await?;
        let open_orders = broker.open_orders().await?;

        let mut pending: HashMap<Instrument, Decimal> = HashMap::new();
        for (instrument, position) in &positions {
            *pending.entry(instrument.clone()).or_default() += position.amount;
        }
        for (instrument, orders) in &open_orders {
            let unfilled: Decimal = orders
                .iter()
                .filter(|o| !o.is_stop())
                .map(|o| o.amount)
                .sum();
            *pending.entry(instrument.clone()).or_default() += unfilled;
        }

        let instruments: BTreeSet<&Instrument> = weights
            .weights
            .keys()
            .chain(pending.iter().filter(|(_, a)| !a.is_zero()).map(|(i, _)| i))
            .collect();

        info!(
            %portfolio_value,
            targets = weights.weights.len(),
            instruments = instruments.len(),
            "Rebalancing to target weights"
        );

        let mut report = ExecutionReport::default();
        for instrument in instruments {
            let current = pending.get(instrument).copied().unwrap_or_default();
            let target = match self
                .target_shares(broker, instrument, weights.get(instrument), portfolio_value)
                .await
            {
                Ok(target) => target,
                Err(e) => {
                    warn!(%instrument, error = %e, "Cannot size target position");
                    report.failed.push((instrument.clone(), e));
                    continue;
                }
            };

            let delta = target - current;
            if delta.is_zero() || delta.abs() < self.config.min_trade_shares {
                debug!(%instrument, %target, %current, "Order delta below minimum, skipping");
                continue;
            }

            match broker
                .submit_order(instrument, delta, OrderStyle::Market)
                .await
            {
                Ok(handle) => {
                    debug!(%instrument, %handle, %delta, %target, "Rebalance order submitted");
                    report.submitted.push(SubmittedOrder {
                        handle,
                        instrument: instrument.clone(),
                        amount: delta,
                    });
                }
                Err(e) => {
                    error!(%instrument, %delta, error = %e, "Rebalance order failed");
                    report.failed.push((instrument.clone(), e));
                }
            }
        }

        info!(
            submitted = report.submitted.len(),
            failed = report.failed.len(),
            "Rebalance orders sent"
        );

        Ok(report)
    }

    async fn target_shares(
        &self,
        broker: &dyn Broker,
        instrument: &Instrument,
        weight: f64,
        portfolio_value: Decimal,
    ) -> Result<Decimal, BrokerError> {
        if weight == 0.0 {
            return Ok(Decimal::ZERO);
        }

        let price = broker.current_price(instrument).await?;
        if price <= Decimal::ZERO {
            return Err(BrokerError::NoPrice(instrument.clone()));
        }
        let weight = from_f64(weight).ok_or_else(|| BrokerError::Rejected {
            instrument: instrument.clone(),
            reason: format!("weight {weight} is not representable"),
        })?;

        Ok(truncate_to_lot(weight * portfolio_value / price, dec!(1)))
    }

    /// Cancel every open order, stops included, then close every position.
    pub async fn flatten(&self, broker: &dyn Broker) -> Result<ExecutionReport, BrokerError> {
        let open_orders = broker.open_orders().await?;
        let mut report = ExecutionReport::default();

        for (instrument, orders) in &open_orders {
            for order in orders {
                match broker.cancel_order(order.handle).await {
                    Ok(()) => report.cancelled.push(order.handle),
                    // Filled or cancelled since the snapshot.
                    Err(BrokerError::UnknownOrder(_)) => {}
                    Err(e) => {
                        error!(%instrument, handle = %order.handle, error = %e, "Cancel failed during flatten");
                        report.failed.push((instrument.clone(), e));
                    }
                }
            }
        }

        let positions = broker.positions().await?;
        let mut held: Vec<_> = positions
            .values()
            .filter(|p| !p.amount.is_zero())
            .collect();
        held.sort_by(|a, b| a.instrument.cmp(&b.instrument));

        for position in held {
            let amount = -position.amount;
            match broker
                .submit_order(&position.instrument, amount, OrderStyle::Market)
                .await
            {
                Ok(handle) => report.submitted.push(SubmittedOrder {
                    handle,
                    instrument: position.instrument.clone(),
                    amount,
                }),
                Err(e) => {
                    error!(instrument = %position.instrument, error = %e, "Close order failed during flatten");
                    report.failed.push((position.instrument.clone(), e));
                }
            }
        }

        info!(
            cancelled = report.cancelled.len(),
            closed = report.submitted.len(),
            failed = report.failed.len(),
            "Portfolio flattened"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MockBroker, PaperBroker};

    async fn broker_with_prices(prices: &[(&str, Decimal)]) -> PaperBroker {
        let broker = PaperBroker::new(dec!(100000));
        broker
            .set_prices(
                prices
                    .iter()
                    .map(|(s, p)| (Instrument::from(*s), *p))
                    .collect(),
            )
            .await;
        broker
    }

    fn weights(pairs: &[(&str, f64)]) -> TargetWeights {
        TargetWeights {
            weights: pairs
                .iter()
                .map(|(s, w)| (Instrument::from(*s), *w))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_weights_to_truncated_shares() {
        let broker = broker_with_prices(&[("XOM", dec!(30)), ("CVX", dec!(70))]).await;
        let executor = OrderExecutor::new(ExecutionConfig::default());

        let report = executor
            .rebalance_to_weights(&broker, &weights(&[("XOM", 0.25), ("CVX", -0.25)]))
            .await
            .unwrap();

        assert!(report.is_clean());
        let positions = broker.positions().await.unwrap();
        // 25000 / 30 = 833.33 -> 833; -25000 / 70 = -357.14 -> -357
        assert_eq!(positions[&Instrument::from("XOM")].amount, dec!(833));
        assert_eq!(positions[&Instrument::from("CVX")].amount, dec!(-357));
    }

    #[tokio::test]
    async fn test_repeat_rebalance_sends_nothing() {
        let broker = broker_with_prices(&[("XOM", dec!(50)), ("CVX", dec!(50))]).await;
        let executor = OrderExecutor::new(ExecutionConfig::default());
        let target = weights(&[("XOM", 0.1), ("CVX", -0.1)]);

        executor.rebalance_to_weights(&broker, &target).await.unwrap();
        let second = executor.rebalance_to_weights(&broker, &target).await.unwrap();
        assert!(second.submitted.is_empty());
    }

    #[tokio::test]
    async fn test_unlisted_holding_closed() {
        let broker = broker_with_prices(&[("XOM", dec!(50)), ("CVX", dec!(50))]).await;
        broker
            .submit_order(&Instrument::from("CVX"), dec!(40), OrderStyle::Market)
            .await
            .unwrap();
        let executor = OrderExecutor::new(ExecutionConfig::default());

        let report = executor
            .rebalance_to_weights(&broker, &weights(&[("XOM", 0.05)]))
            .await
            .unwrap();

        let cvx = report
            .submitted
            .iter()
            .find(|o| o.instrument == Instrument::from("CVX"))
            .unwrap();
        assert_eq!(cvx.amount, dec!(-40));
        assert!(!broker
            .positions()
            .await
            .unwrap()
            .contains_key(&Instrument::from("CVX")));
    }

    #[tokio::test]
    async fn test_small_delta_not_sent() {
        let broker = broker_with_prices(&[("XOM", dec!(50))]).await;
        let executor = OrderExecutor::new(ExecutionConfig {
            min_trade_shares: dec!(10),
        });

        // 0.004 * 100000 / 50 = 8 shares
        let report = executor
            .rebalance_to_weights(&broker, &weights(&[("XOM", 0.004)]))
            .await
            .unwrap();
        assert!(report.submitted.is_empty());
    }

    #[tokio::test]
    async fn test_missing_price_recorded_not_fatal() {
        let broker = broker_with_prices(&[("XOM", dec!(50))]).await;
        let executor = OrderExecutor::new(ExecutionConfig::default());

        let report = executor
            .rebalance_to_weights(&broker, &weights(&[("XOM", 0.1), ("GHOST", -0.1)]))
            .await
            .unwrap();

        assert_eq!(report.submitted.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.failed[0].1,
            BrokerError::NoPrice(Instrument::from("GHOST"))
        );
    }

    #[tokio::test]
    async fn test_flatten_cancels_and_closes() {
        let broker = broker_with_prices(&[("XOM", dec!(50)), ("CVX", dec!(80))]).await;
        broker
            .submit_order(&Instrument::from("XOM"), dec!(100), OrderStyle::Market)
            .await
            .unwrap();
        broker
            .submit_order(&Instrument::from("CVX"), dec!(-20), OrderStyle::Market)
            .await
            .unwrap();
        broker
            .submit_order(&Instrument::from("XOM"), dec!(-100), OrderStyle::Stop(dec!(45)))
            .await
            .unwrap();

        let executor = OrderExecutor::new(ExecutionConfig::default());
        let report = executor.flatten(&broker).await.unwrap();

        assert_eq!(report.cancelled.len(), 1);
        assert_eq!(report.submitted.len(), 2);
        assert!(broker.positions().await.unwrap().is_empty());
        assert!(broker.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_account_failure_aborts_batch() {
        let mut broker = MockBroker::new();
        broker
            .expect_portfolio_value()
            .returning(|| Err(BrokerError::Unavailable("session expired".to_string())));
        broker.expect_submit_order().never();

        let executor = OrderExecutor::new(ExecutionConfig::default());
        let result = executor
            .rebalance_to_weights(&broker, &weights(&[("XOM", 0.1)]))
            .await;
        assert!(matches!(result, Err(BrokerError::Unavailable(_))));
    }
}
