//! Performance metrics calculation for backtesting.

use crate::utils::decimal::{safe_div, to_f64};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// A point on the equity curve, recorded after the close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub leverage: Decimal,
    pub longs: usize,
    pub shorts: usize,
    pub drawdown: Decimal,
}

impl EquityPoint {
    pub fn new(
        date: NaiveDate,
        equity: Decimal,
        leverage: Decimal,
        longs: usize,
        shorts: usize,
        peak_equity: Decimal,
    ) -> Self {
        let drawdown = if peak_equity > Decimal::ZERO {
            ((peak_equity - equity) / peak_equity).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        Self {
            date,
            equity,
            leverage,
            longs,
            shorts,
            drawdown,
        }
    }
}

/// Summary statistics of one backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    /// Final equity minus initial balance
    pub total_return: Decimal,
    pub total_return_pct: Decimal,
    /// Largest peak-to-trough loss as a fraction of the peak
    pub max_drawdown: Decimal,
    /// Annualized standard deviation of daily returns
    pub volatility: f64,
    /// Annualized, zero risk-free rate
    pub sharpe_ratio: f64,
    pub total_commission: Decimal,
    pub average_leverage: Decimal,
}

impl BacktestMetrics {
    pub fn calculate(
        equity_curve: &[EquityPoint],
        initial_balance: Decimal,
        total_commission: Decimal,
    ) -> Self {
        let Some(last) = equity_curve.last() else {
            return Self::empty();
        };

        let total_return = last.equity - initial_balance;
        let total_return_pct = safe_div(total_return, initial_balance) * dec!(100);

        let max_drawdown = equity_curve
            .iter()
            .map(|p| p.drawdown)
            .max()
            .unwrap_or_default();

        let returns = daily_returns(initial_balance, equity_curve);
        let (mean, std) = mean_std(&returns);
        let volatility = std * TRADING_DAYS_PER_YEAR.sqrt();
        let sharpe_ratio = if std > 0.0 {
            mean / std * TRADING_DAYS_PER_YEAR.sqrt()
        } else {
            0.0
        };

        let leverage_sum: Decimal = equity_curve.iter().map(|p| p.leverage).sum();
        let average_leverage = leverage_sum / Decimal::from(equity_curve.len());

        Self {
            total_return,
            total_return_pct,
            max_drawdown,
            volatility,
            sharpe_ratio,
            total_commission,
            average_leverage,
        }
    }

    pub fn empty() -> Self {
        Self {
            total_return: Decimal::ZERO,
            total_return_pct: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            volatility: 0.0,
            sharpe_ratio: 0.0,
            total_commission: Decimal::ZERO,
            average_leverage: Decimal::ZERO,
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS
═══════════════════════════════════════════════
RETURNS
  Total Return:      ${:.2} ({:.2}%)

RISK
  Max Drawdown:      {:.2}%
  Volatility:        {:.2}%
  Sharpe Ratio:      {:.3}

ACTIVITY
  Commission Paid:   ${:.2}
  Avg Leverage:      {:.3}
═══════════════════════════════════════════════"#,
            self.total_return,
            self.total_return_pct,
            self.max_drawdown * dec!(100),
            self.volatility * 100.0,
            self.sharpe_ratio,
            self.total_commission,
            self.average_leverage,
        )
    }
}

fn daily_returns(initial_balance: Decimal, curve: &[EquityPoint]) -> Vec<f64> {
    let mut previous = initial_balance;
    let mut returns = Vec::with_capacity(curve.len());
    for point in curve {
        if previous > Decimal::ZERO {
            returns.push(to_f64((point.equity - previous) / previous));
        }
        previous = point.equity;
    }
    returns
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.len() < 2 {
        return (values.first().copied().unwrap_or(0.0), 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn curve(equities: &[Decimal]) -> Vec<EquityPoint> {
        let mut peak = dec!(1000);
        equities
            .iter()
            .enumerate()
            .map(|(i, e)| {
                peak = peak.max(*e);
                EquityPoint::new(day(i as u32 + 1), *e, dec!(1), 2, 2, peak)
            })
            .collect()
    }

    #[test]
    fn test_drawdown_from_peak() {
        let point = EquityPoint::new(day(1), dec!(900), Decimal::ZERO, 0, 0, dec!(1000));
        assert_eq!(point.drawdown, dec!(0.1));
    }

    #[test]
    fn test_calculate() {
        let points = curve(&[dec!(1010), dec!(1050), dec!(945), dec!(1100)]);
        let metrics = BacktestMetrics::calculate(&points, dec!(1000), dec!(12));

        assert_eq!(metrics.total_return, dec!(100));
        assert_eq!(metrics.total_return_pct, dec!(10));
        assert_eq!(metrics.max_drawdown, dec!(0.1));
        assert_eq!(metrics.average_leverage, dec!(1));
        assert!(metrics.volatility > 0.0);
        assert!(metrics.sharpe_ratio > 0.0);
        assert!(metrics.summary().contains("Max Drawdown"));
    }

    #[test]
    fn test_flat_curve() {
        let points = curve(&[dec!(1000), dec!(1000)]);
        let metrics = BacktestMetrics::calculate(&points, dec!(1000), Decimal::ZERO);
        assert_eq!(metrics.total_return, Decimal::ZERO);
        assert_eq!(metrics.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_empty_curve() {
        let metrics = BacktestMetrics::calculate(&[], dec!(1000), Decimal::ZERO);
        assert_eq!(metrics.total_return_pct, Decimal::ZERO);
    }
}
