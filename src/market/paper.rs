//! Paper trading broker and static universe for simulation and tests.

use super::traits::{Broker, UniverseProvider};
use super::types::{Instrument, OpenOrder, OrderHandle, OrderStyle, Position, ScreenedInstrument};
use crate::error::BrokerError;
use async_trait::async_trait;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Per-share commission with a per-order minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Commission {
    pub per_share: Decimal,
    pub min_per_order: Decimal,
}

impl Commission {
    pub const FREE: Commission = Commission {
        per_share: Decimal::ZERO,
        min_per_order: Decimal::ZERO,
    };

    pub fn fee(&self, amount: Decimal) -> Decimal {
        if self.per_share == Decimal::ZERO && self.min_per_order == Decimal::ZERO {
            return Decimal::ZERO;
        }
        (amount.abs() * self.per_share).max(self.min_per_order)
    }
}

/// Volume-share slippage.
///
/// Fills against one published volume are capped at `volume_limit` of that
/// volume; the rest of the order stays open. Each fill moves against the
/// trader by `price_impact * share^2` of the price, where `share` is the
/// filled fraction of the volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slippage {
    pub volume_limit: Decimal,
    pub price_impact: Decimal,
}

impl Slippage {
    /// Fill everything at the quoted price.
    pub const NONE: Slippage = Slippage {
        volume_limit: Decimal::ZERO,
        price_impact: Decimal::ZERO,
    };

    /// 2.5% of volume per bar, 0.1 impact coefficient.
    pub const VOLUME_SHARE: Slippage = Slippage {
        volume_limit: dec!(0.025),
        price_impact: dec!(0.1),
    };

    /// Signed shares fillable now and their price, or `None` when the
    /// volume is used up. `already_filled` counts unsigned shares filled
    /// against the same volume.
    pub fn execute(
        &self,
        amount: Decimal,
        price: Decimal,
        volume: Option<Decimal>,
        already_filled: Decimal,
    ) -> Option<(Decimal, Decimal)> {
        let volume = match volume {
            Some(volume) if self.volume_limit > Decimal::ZERO => volume,
            _ => return Some((amount, price)),
        };

        let capacity = (volume * self.volume_limit - already_filled).trunc();
        if capacity <= Decimal::ZERO {
            return None;
        }

        let sign = amount.signum();
        let shares = amount.abs().min(capacity);
        let share = shares / volume;
        let impact = share * share * self.price_impact * price;
        Some((sign * shares, price + sign * impact))
    }
}

/// Record of broker activity, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Submitted {
        handle: OrderHandle,
        instrument: Instrument,
        amount: Decimal,
        style: OrderStyle,
    },
    Cancelled {
        handle: OrderHandle,
    },
    Filled {
        handle: OrderHandle,
        instrument: Instrument,
        amount: Decimal,
        price: Decimal,
    },
}

#[derive(Debug, Clone, Default)]
struct PaperPosition {
    amount: Decimal,
    cost_basis: Decimal,
}

#[derive(Debug, Default)]
struct PaperState {
    cash: Decimal,
    positions: HashMap<Instrument, PaperPosition>,
    open_orders: BTreeMap<OrderHandle, OpenOrder>,
    prices: HashMap<Instrument, Decimal>,
    events: Vec<OrderEvent>,
    total_commission: Decimal,
    volumes: HashMap<Instrument, Decimal>,
    /// Unsigned shares filled against the current volumes
    volume_used: HashMap<Instrument, Decimal>,
}

impl PaperState {
    /// Fill what `slippage` allows of `order` at `price`.
    ///
    /// Returns the filled amount and the unfilled remainder; a triggered stop
    /// rests on as a market order.
    fn execute(
        &mut self,
        order: &OpenOrder,
        price: Decimal,
        commission: &Commission,
        slippage: &Slippage,
    ) -> (Decimal, Option<OpenOrder>) {
        let volume = self.volumes.get(&order.instrument).copied();
        let used = self.volume_used.get(&order.instrument).copied().unwrap_or_default();
        let style = if order.is_stop() {
            OrderStyle::Market
        } else {
            order.style
        };

        let Some((amount, fill_price)) = slippage.execute(order.amount, price, volume, used) else {
            debug!(handle = %order.handle, instrument = %order.instrument, "No volume left, order waits");
            return (Decimal::ZERO, Some(OpenOrder { style, ..order.clone() }));
        };

        if volume.is_some() {
            *self.volume_used.entry(order.instrument.clone()).or_default() += amount.abs();
        }
        let fee = commission.fee(amount);
        self.fill(order.handle, &order.instrument, amount, fill_price, fee);
        debug!(
            handle = %order.handle,
            instrument = %order.instrument,
            %amount,
            price = %fill_price,
            %fee,
            "Paper order filled"
        );

        let rest = order.amount - amount;
        let remainder = (!rest.is_zero()).then(|| OpenOrder {
            amount: rest,
            style,
            ..order.clone()
        });
        (amount, remainder)
    }

    fn fill(&mut self, handle: OrderHandle, instrument: &Instrument, amount: Decimal, price: Decimal, fee: Decimal) {
        let position = self.positions.entry(instrument.clone()).or_default();
        let new_amount = position.amount + amount;

        // Basis resets when the position flips or opens; adds average in.
        if position.amount == Decimal::ZERO || position.amount.signum() != new_amount.signum() {
            position.cost_basis = price;
        } else if amount.signum() == position.amount.signum() {
            position.cost_basis =
                (position.cost_basis * position.amount + price * amount) / new_amount;
        }
        position.amount = new_amount;
        if position.amount == Decimal::ZERO {
            self.positions.remove(instrument);
        }

        self.cash -= amount * price + fee;
        self.total_commission += fee;
        self.events.push(OrderEvent::Filled {
            handle,
            instrument: instrument.clone(),
            amount,
            price,
        });
    }
}

/// In-memory broker that fills market orders immediately and rests limit
/// and stop orders until prices move through them.
pub struct PaperBroker {
    state: Arc<RwLock<PaperState>>,
    order_id_counter: AtomicU64,
    commission: Commission,
    slippage: Slippage,
}

impl PaperBroker {
    /// Create a broker holding only cash.
    pub fn new(initial_cash: Decimal) -> Self {
        let state = PaperState {
            cash: initial_cash,
            ..Default::default()
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            order_id_counter: AtomicU64::new(1),
            commission: Commission::FREE,
            slippage: Slippage::NONE,
        }
    }

    pub fn with_commission(mut self, commission: Commission) -> Self {
        self.commission = commission;
        self
    }

    pub fn with_slippage(mut self, slippage: Slippage) -> Self {
        self.slippage = slippage;
        self
    }

    /// Publish the volumes fills are capped against; capacity starts over.
    ///
    /// Instruments without a volume fill in full.
    pub async fn set_volumes(&self, volumes: HashMap<Instrument, Decimal>) {
        let mut state = self.state.write().await;
        state.volumes = volumes;
        state.volume_used.clear();
    }

    fn next_handle(&self) -> OrderHandle {
        OrderHandle(self.order_id_counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Update prices and fill any resting order the move triggers.
    ///
    /// Returns the handles filled by this update.
    pub async fn set_prices(&self, prices: HashMap<Instrument, Decimal>) -> Vec<OrderHandle> {
        let mut state = self.state.write().await;
        state.prices.extend(prices);

        let triggered: Vec<OpenOrder> = state
            .open_orders
            .values()
            .filter(|order| {
                state
                    .prices
                    .get(&order.instrument)
                    .map(|&price| is_triggered(order, price))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let mut filled = Vec::with_capacity(triggered.len());
        for order in triggered {
            let Some(price) = state.prices.get(&order.instrument).copied() else {
                continue;
            };
            state.open_orders.remove(&order.handle);
            let (amount, remainder) =
                state.execute(&order, price, &self.commission, &self.slippage);
            if let Some(rest) = remainder {
                state.open_orders.insert(rest.handle, rest);
            }
            if amount.is_zero() {
                continue;
            }
            info!(
                handle = %order.handle,
                instrument = %order.instrument,
                %amount,
                %price,
                style = ?order.style,
                "Paper resting order triggered"
            );
            filled.push(order.handle);
        }

        filled
    }

    /// Activity since the last `take_events` call.
    pub async fn take_events(&self) -> Vec<OrderEvent> {
        std::mem::take(&mut self.state.write().await.events)
    }

    pub async fn cash(&self) -> Decimal {
        self.state.read().await.cash
    }

    pub async fn total_commission(&self) -> Decimal {
        self.state.read().await.total_commission
    }
}

fn is_triggered(order: &OpenOrder, price: Decimal) -> bool {
    let buying = order.amount > Decimal::ZERO;
    match order.style {
        OrderStyle::Market => true,
        OrderStyle::Limit(limit) => {
            if buying {
                price <= limit
            } else {
                price >= limit
            }
        }
        OrderStyle::Stop(trigger) => {
            if buying {
                price >= trigger
            } else {
                price <= trigger
            }
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn open_orders(&self) -> Result<HashMap<Instrument, Vec<OpenOrder>>, BrokerError> {
        let state = self.state.read().await;
        let mut grouped: HashMap<Instrument, Vec<OpenOrder>> = HashMap::new();
        for order in state.open_orders.values() {
            grouped
                .entry(order.instrument.clone())
                .or_default()
                .push(order.clone());
        }
        Ok(grouped)
    }

    async fn positions(&self) -> Result<HashMap<Instrument, Position>, BrokerError> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .iter()
            .map(|(instrument, p)| {
                (
                    instrument.clone(),
                    Position {
                        instrument: instrument.clone(),
                        amount: p.amount,
                        cost_basis: p.cost_basis,
                    },
                )
            })
            .collect())
    }

    async fn submit_order(
        &self,
        instrument: &Instrument,
        amount: Decimal,
        style: OrderStyle,
    ) -> Result<OrderHandle, BrokerError> {
        if amount == Decimal::ZERO {
            return Err(BrokerError::Rejected {
                instrument: instrument.clone(),
                reason: "zero amount".to_string(),
            });
        }

        let mut state = self.state.write().await;
        let price = state
            .prices
            .get(instrument)
            .copied()
            .ok_or_else(|| BrokerError::NoPrice(instrument.clone()))?;

        let handle = self.next_handle();
        state.events.push(OrderEvent::Submitted {
            handle,
            instrument: instrument.clone(),
            amount,
            style,
        });

        let order = OpenOrder {
            handle,
            instrument: instrument.clone(),
            amount,
            style,
        };

        if is_triggered(&order, price) && !style.is_stop() {
            let (_, remainder) = state.execute(&order, price, &self.commission, &self.slippage);
            if let Some(rest) = remainder {
                debug!(%handle, %instrument, remaining = %rest.amount, "Paper order partially filled");
                state.open_orders.insert(handle, rest);
            }
        } else {
            debug!(%handle, %instrument, %amount, style = ?style, "Paper order resting");
            state.open_orders.insert(handle, order);
        }

        Ok(handle)
    }

    async fn cancel_order(&self, handle: OrderHandle) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        match state.open_orders.remove(&handle) {
            Some(order) => {
                state.events.push(OrderEvent::Cancelled { handle });
                debug!(%handle, instrument = %order.instrument, "Paper order cancelled");
                Ok(())
            }
            None => Err(BrokerError::UnknownOrder(handle)),
        }
    }

    async fn current_price(&self, instrument: &Instrument) -> Result<Decimal, BrokerError> {
        self.state
            .read()
            .await
            .prices
            .get(instrument)
            .copied()
            .ok_or_else(|| BrokerError::NoPrice(instrument.clone()))
    }

    async fn portfolio_value(&self) -> Result<Decimal, BrokerError> {
        let state = self.state.read().await;
        let mut value = state.cash;
        for (instrument, position) in &state.positions {
            let price = state
                .prices
                .get(instrument)
                .copied()
                .unwrap_or(position.cost_basis);
            value += position.amount * price;
        }
        Ok(value)
    }
}

/// Universe provider returning a fixed screen, replaceable between days.
#[derive(Default)]
pub struct StaticUniverse {
    rows: RwLock<Vec<ScreenedInstrument>>,
}

impl StaticUniverse {
    pub fn new(rows: Vec<ScreenedInstrument>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    pub async fn replace(&self, rows: Vec<ScreenedInstrument>) {
        *self.rows.write().await = rows;
    }
}

#[async_trait]
impl UniverseProvider for StaticUniverse {
    async fn screen(&self) -> anyhow::Result<Vec<ScreenedInstrument>> {
        Ok(self.rows.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inst(s: &str) -> Instrument {
        Instrument::from(s)
    }

    async fn broker_with_price(symbol: &str, price: Decimal) -> PaperBroker {
        let broker = PaperBroker::new(dec!(100000));
        broker
            .set_prices(HashMap::from([(inst(symbol), price)]))
            .await;
        broker
    }

    #[tokio::test]
    async fn test_market_order_fills_immediately() {
        let broker = broker_with_price("AAPL", dec!(50)).await;

        broker
            .submit_order(&inst("AAPL"), dec!(100), OrderStyle::Market)
            .await
            .unwrap();

        let positions = broker.positions().await.unwrap();
        assert_eq!(positions[&inst("AAPL")].amount, dec!(100));
        assert_eq!(positions[&inst("AAPL")].cost_basis, dec!(50));
        assert_eq!(broker.cash().await, dec!(95000));
        assert!(broker.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_rests_until_triggered() {
        let broker = broker_with_price("AAPL", dec!(50)).await;
        broker
            .submit_order(&inst("AAPL"), dec!(100), OrderStyle::Market)
            .await
            .unwrap();
        let stop = broker
            .submit_order(&inst("AAPL"), dec!(-100), OrderStyle::Stop(dec!(49.5)))
            .await
            .unwrap();

        assert_eq!(broker.open_orders().await.unwrap()[&inst("AAPL")].len(), 1);

        let filled = broker
            .set_prices(HashMap::from([(inst("AAPL"), dec!(49.8))]))
            .await;
        assert!(filled.is_empty());

        let filled = broker
            .set_prices(HashMap::from([(inst("AAPL"), dec!(49))]))
            .await;
        assert_eq!(filled, vec![stop]);
        assert!(broker.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_stop_triggers_on_rise() {
        let broker = broker_with_price("XOM", dec!(100)).await;
        broker
            .submit_order(&inst("XOM"), dec!(-10), OrderStyle::Market)
            .await
            .unwrap();
        broker
            .submit_order(&inst("XOM"), dec!(10), OrderStyle::Stop(dec!(101)))
            .await
            .unwrap();

        broker
            .set_prices(HashMap::from([(inst("XOM"), dec!(102))]))
            .await;
        assert!(broker.positions().await.unwrap().is_empty());
        // Sold at 100, bought back at 102
        assert_eq!(broker.cash().await, dec!(99980));
    }

    #[tokio::test]
    async fn test_limit_order_rests() {
        let broker = broker_with_price("AAPL", dec!(50)).await;
        broker
            .submit_order(&inst("AAPL"), dec!(10), OrderStyle::Limit(dec!(45)))
            .await
            .unwrap();

        assert!(broker.positions().await.unwrap().is_empty());
        assert_eq!(broker.open_orders().await.unwrap()[&inst("AAPL")][0].amount, dec!(10));
    }

    #[tokio::test]
    async fn test_cancel_unknown_order() {
        let broker = PaperBroker::new(dec!(1000));
        let result = broker.cancel_order(OrderHandle(99)).await;
        assert_eq!(result, Err(BrokerError::UnknownOrder(OrderHandle(99))));
    }

    #[tokio::test]
    async fn test_order_without_price_rejected() {
        let broker = PaperBroker::new(dec!(1000));
        let result = broker
            .submit_order(&inst("AAPL"), dec!(1), OrderStyle::Market)
            .await;
        assert_eq!(result, Err(BrokerError::NoPrice(inst("AAPL"))));
    }

    #[tokio::test]
    async fn test_commission_minimum() {
        let broker = PaperBroker::new(dec!(10000)).with_commission(Commission {
            per_share: dec!(0.001),
            min_per_order: dec!(5),
        });
        broker
            .set_prices(HashMap::from([(inst("AAPL"), dec!(10))]))
            .await;
        broker
            .submit_order(&inst("AAPL"), dec!(100), OrderStyle::Market)
            .await
            .unwrap();

        assert_eq!(broker.total_commission().await, dec!(5));
        assert_eq!(broker.portfolio_value().await.unwrap(), dec!(9995));
    }

    #[test]
    fn test_volume_share_impact() {
        let slippage = Slippage::VOLUME_SHARE;
        // 100 of 10000 shares: 1% of volume, impact 0.1 * 0.01^2 * 50
        assert_eq!(
            slippage.execute(dec!(100), dec!(50), Some(dec!(10000)), Decimal::ZERO),
            Some((dec!(100), dec!(50.0005)))
        );
        assert_eq!(
            slippage.execute(dec!(-100), dec!(50), Some(dec!(10000)), Decimal::ZERO),
            Some((dec!(-100), dec!(49.9995)))
        );
        // Capped at 250 shares, then exhausted
        assert_eq!(
            slippage.execute(dec!(1000), dec!(50), Some(dec!(10000)), Decimal::ZERO),
            Some((dec!(250), dec!(50.003125)))
        );
        assert_eq!(
            slippage.execute(dec!(10), dec!(50), Some(dec!(10000)), dec!(250)),
            None
        );
        // No volume published: full fill at the quote
        assert_eq!(
            slippage.execute(dec!(1000), dec!(50), None, Decimal::ZERO),
            Some((dec!(1000), dec!(50)))
        );
    }

    #[tokio::test]
    async fn test_slippage_moves_fill_price_and_caps_volume() {
        let broker = PaperBroker::new(dec!(100000)).with_slippage(Slippage::VOLUME_SHARE);
        broker
            .set_volumes(HashMap::from([(inst("XOM"), dec!(10000))]))
            .await;
        broker
            .set_prices(HashMap::from([(inst("XOM"), dec!(50))]))
            .await;

        let handle = broker
            .submit_order(&inst("XOM"), dec!(400), OrderStyle::Market)
            .await
            .unwrap();

        let positions = broker.positions().await.unwrap();
        assert_eq!(positions[&inst("XOM")].amount, dec!(250));
        assert_eq!(positions[&inst("XOM")].cost_basis, dec!(50.003125));
        let open = broker.open_orders().await.unwrap();
        assert_eq!(open[&inst("XOM")][0].amount, dec!(150));

        // Next bar's volume fills the rest
        broker
            .set_volumes(HashMap::from([(inst("XOM"), dec!(10000))]))
            .await;
        let filled = broker
            .set_prices(HashMap::from([(inst("XOM"), dec!(50))]))
            .await;
        assert_eq!(filled, vec![handle]);
        assert_eq!(broker.positions().await.unwrap()[&inst("XOM")].amount, dec!(400));
        assert!(broker.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_triggered_stop_remainder_rests_as_market() {
        let broker = PaperBroker::new(dec!(100000)).with_slippage(Slippage::VOLUME_SHARE);
        broker
            .set_prices(HashMap::from([(inst("XOM"), dec!(50))]))
            .await;
        broker
            .submit_order(&inst("XOM"), dec!(300), OrderStyle::Market)
            .await
            .unwrap();
        broker
            .submit_order(&inst("XOM"), dec!(-300), OrderStyle::Stop(dec!(49)))
            .await
            .unwrap();

        broker
            .set_volumes(HashMap::from([(inst("XOM"), dec!(4000))]))
            .await;
        broker
            .set_prices(HashMap::from([(inst("XOM"), dec!(48))]))
            .await;

        assert_eq!(broker.positions().await.unwrap()[&inst("XOM")].amount, dec!(200));
        let open = broker.open_orders().await.unwrap();
        assert_eq!(open[&inst("XOM")][0].amount, dec!(-200));
        assert_eq!(open[&inst("XOM")][0].style, OrderStyle::Market);
    }

    #[tokio::test]
    async fn test_events_recorded() {
        let broker = broker_with_price("AAPL", dec!(50)).await;
        let handle = broker
            .submit_order(&inst("AAPL"), dec!(5), OrderStyle::Limit(dec!(40)))
            .await
            .unwrap();
        broker.cancel_order(handle).await.unwrap();

        let events = broker.take_events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], OrderEvent::Cancelled { handle });
        assert!(broker.take_events().await.is_empty());
    }
}
