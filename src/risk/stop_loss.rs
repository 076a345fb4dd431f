//! Trailing stop-loss reconciler.
//!
//! Keeps one protective stop order per instrument with a nonzero amount.
//! Every cycle the tracked amounts are rebuilt from the broker's open orders
//! and positions; the local table is a cache and never the source of truth.
//! A resting stop found for an untracked instrument seeds the level, and a
//! stop whose size no longer matches is cancelled even when no price is
//! available to replace it.
//!
//! Stop levels:
//! - first stop: `price * (1 - sign * pct_init)`
//! - afterwards: the more protective of the previous stop and
//!   `price * (1 - sign * pct_trail)` (higher for longs, lower for shorts)

use crate::config::StopLossConfig;
use crate::error::BrokerError;
use crate::market::{Broker, Instrument, OpenOrder, OrderHandle, OrderStyle};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, info, warn};

/// Tracked stop for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopState {
    /// Position plus unfilled non-stop orders, as of the last reconcile
    pub amount: Decimal,
    /// Current stop level; unset until the first stop is computed
    pub price: Option<Decimal>,
    /// Live stop order, if the last submission succeeded
    pub order_id: Option<OrderHandle>,
}

/// What one reconciliation cycle did.
#[derive(Debug, Default)]
pub struct StopReport {
    /// Instruments whose stop was replaced, with the new level
    pub placed: Vec<(Instrument, Decimal)>,
    /// Instruments that reconciled to zero and were untracked
    pub dropped: Vec<Instrument>,
    pub cancelled: usize,
    pub failed: Vec<(Instrument, BrokerError)>,
}

/// Maintains trailing stop orders against a [`Broker`].
pub struct StopLossManager {
    config: StopLossConfig,
    states: HashMap<Instrument, StopState>,
}

impl StopLossManager {
    pub fn new(config: StopLossConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn state(&self, instrument: &Instrument) -> Option<&StopState> {
        self.states.get(instrument)
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Run one reconcile-and-replace cycle.
    ///
    /// Fails only when the broker's order book or positions cannot be read.
    /// Per-instrument failures are reported and retried from live state on
    /// the next cycle.
    pub async fn manage_orders(&mut self, broker: &dyn Broker) -> Result<StopReport, BrokerError> {
        let open_orders = broker.open_orders().await?;
        let positions = broker.positions().await?;
        let mut report = StopReport::default();

        let mut live_amounts: HashMap<Instrument, Decimal> = HashMap::new();
        for (instrument, orders) in &open_orders {
            let unfilled: Decimal = orders
                .iter()
                .filter(|o| !o.is_stop())
                .map(|o| o.amount)
                .sum();
            *live_amounts.entry(instrument.clone()).or_default() += unfilled;
        }
        for (instrument, position) in &positions {
            *live_amounts.entry(instrument.clone()).or_default() += position.amount;
        }

        // Full reconcile: every tracked and every live instrument gets its
        // amount from the broker.
        let instruments: BTreeSet<Instrument> = self
            .states
            .keys()
            .cloned()
            .chain(
                live_amounts
                    .iter()
                    .filter(|(_, a)| !a.is_zero())
                    .map(|(i, _)| i.clone()),
            )
            .chain(
                open_orders
                    .iter()
                    .filter(|(_, orders)| orders.iter().any(OpenOrder::is_stop))
                    .map(|(i, _)| i.clone()),
            )
            .collect();

        for instrument in instruments {
            let amount = live_amounts.get(&instrument).copied().unwrap_or_default();
            let live_stops = stop_handles(open_orders.get(&instrument));

            if amount.is_zero() {
                let previous = self.states.remove(&instrument);
                let mut handles = live_stops;
                if let Some(handle) = previous.as_ref().and_then(|s| s.order_id) {
                    handles.insert(handle);
                }
                cancel_handles(broker, &instrument, &handles, &mut report).await;
                if previous.is_some() {
                    debug!(%instrument, "Position closed, stop untracked");
                    report.dropped.push(instrument);
                }
                continue;
            }

            let orders = open_orders.get(&instrument);
            let state = self.states.entry(instrument.clone()).or_insert_with(|| StopState {
                amount,
                // Adopt a resting stop left from an earlier run so it never loosens
                price: most_protective_trigger(orders, amount),
                order_id: None,
            });
            if state.amount.signum() != amount.signum() {
                // Flipped sides: the old level protects the wrong direction.
                state.price = None;
            }
            state.amount = amount;
            let previous_price = state.price;

            let mut handles = live_stops;
            if let Some(handle) = state.order_id {
                handles.insert(handle);
            }

            let current_price = match broker.current_price(&instrument).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(%instrument, error = %e, "No price for stop update");
                    report.failed.push((instrument.clone(), e));
                    // A stop sized for an older amount must not stay live.
                    if live_stop_total(orders) != -amount
                        && cancel_handles(broker, &instrument, &handles, &mut report).await
                    {
                        if let Some(state) = self.states.get_mut(&instrument) {
                            state.order_id = None;
                        }
                    }
                    continue;
                }
            };
            let stop_price = next_stop_price(&self.config, amount, previous_price, current_price);

            if !cancel_handles(broker, &instrument, &handles, &mut report).await {
                // The old stop may still be live; submitting now could double it.
                continue;
            }
            let Some(state) = self.states.get_mut(&instrument) else {
                continue;
            };
            state.order_id = None;
            state.price = Some(stop_price);

            match broker
                .submit_order(&instrument, -amount, OrderStyle::Stop(stop_price))
                .await
            {
                Ok(handle) => {
                    debug!(%instrument, %amount, %stop_price, %handle, "Stop order placed");
                    state.order_id = Some(handle);
                    report.placed.push((instrument, stop_price));
                }
                Err(e) => {
                    error!(%instrument, %amount, %stop_price, error = %e, "Stop order failed");
                    report.failed.push((instrument, e));
                }
            }
        }

        info!(
            tracked = self.states.len(),
            placed = report.placed.len(),
            dropped = report.dropped.len(),
            failed = report.failed.len(),
            "Stop orders reconciled"
        );

        Ok(report)
    }
}

/// Cancel `handles`; true when none of them can still be live.
async fn cancel_handles(
    broker: &dyn Broker,
    instrument: &Instrument,
    handles: &BTreeSet<OrderHandle>,
    report: &mut StopReport,
) -> bool {
    let mut all_gone = true;
    for &handle in handles {
        match broker.cancel_order(handle).await {
            Ok(()) => report.cancelled += 1,
            Err(BrokerError::UnknownOrder(_)) => {
                debug!(%instrument, %handle, "Stop already gone");
            }
            Err(e) => {
                error!(%instrument, %handle, error = %e, "Stop cancel failed");
                report.failed.push((instrument.clone(), e));
                all_gone = false;
            }
        }
    }
    all_gone
}

/// Net amount of the resting stop orders.
fn live_stop_total(orders: Option<&Vec<OpenOrder>>) -> Decimal {
    orders
        .into_iter()
        .flatten()
        .filter(|o| o.is_stop())
        .map(|o| o.amount)
        .sum()
}

/// Tightest trigger among resting stops that protect `amount`: the highest
/// sell stop for a long, the lowest buy stop for a short.
fn most_protective_trigger(orders: Option<&Vec<OpenOrder>>, amount: Decimal) -> Option<Decimal> {
    let triggers = orders
        .into_iter()
        .flatten()
        .filter(|o| o.amount.signum() == -amount.signum())
        .filter_map(|o| match o.style {
            OrderStyle::Stop(trigger) => Some(trigger),
            _ => None,
        });
    if amount > Decimal::ZERO {
        triggers.max()
    } else {
        triggers.min()
    }
}

fn stop_handles(orders: Option<&Vec<OpenOrder>>) -> BTreeSet<OrderHandle> {
    orders
        .into_iter()
        .flatten()
        .filter(|o| o.is_stop())
        .map(|o| o.handle)
        .collect()
}

/// New stop level for a nonzero `amount`.
///
/// Never loosens: for longs the level only rises, for shorts it only falls.
pub fn next_stop_price(
    config: &StopLossConfig,
    amount: Decimal,
    previous: Option<Decimal>,
    current_price: Decimal,
) -> Decimal {
    let sign = amount.signum();
    match previous {
        None => current_price * (Decimal::ONE - sign * config.pct_init),
        Some(previous) => {
            let trail = current_price * (Decimal::ONE - sign * config.pct_trail);
            if sign > Decimal::ZERO {
                previous.max(trail)
            } else {
                previous.min(trail)
            }
        }
    }
}
