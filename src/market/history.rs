//! Daily close history and an in-memory history provider.

use super::traits::HistoryProvider;
use super::types::Instrument;
use anyhow::Result;
use async_trait::async_trait;
use ndarray::{Array2, Axis};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Daily closes for a fixed instrument set over a fixed window.
///
/// Rows are trading days (oldest first), columns follow `instruments`.
/// Missing observations are stored as `NaN`.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    instruments: Vec<Instrument>,
    closes: Array2<f64>,
}

impl PriceHistory {
    pub fn new(instruments: Vec<Instrument>, closes: Array2<f64>) -> Result<Self> {
        anyhow::ensure!(
            closes.ncols() == instruments.len(),
            "price matrix has {} columns for {} instruments",
            closes.ncols(),
            instruments.len()
        );
        Ok(Self { instruments, closes })
    }

    /// Build from per-instrument series of equal length; `None` marks a gap.
    pub fn from_columns(columns: Vec<(Instrument, Vec<Option<f64>>)>) -> Result<Self> {
        let days = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let mut closes = Array2::from_elem((days, columns.len()), f64::NAN);
        let mut instruments = Vec::with_capacity(columns.len());

        for (j, (instrument, series)) in columns.into_iter().enumerate() {
            anyhow::ensure!(
                series.len() == days,
                "{} has {} observations, expected {}",
                instrument,
                series.len(),
                days
            );
            for (t, value) in series.into_iter().enumerate() {
                closes[[t, j]] = value.unwrap_or(f64::NAN);
            }
            instruments.push(instrument);
        }

        Ok(Self { instruments, closes })
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn closes(&self) -> &Array2<f64> {
        &self.closes
    }

    /// Number of trading days in the window.
    pub fn days(&self) -> usize {
        self.closes.nrows()
    }

    pub fn width(&self) -> usize {
        self.instruments.len()
    }

    /// Keep only columns that satisfy `keep` and have a usable (finite,
    /// positive) close on every day.
    pub fn retain_complete<F>(&self, keep: F) -> PriceHistory
    where
        F: Fn(&Instrument) -> bool,
    {
        let columns: Vec<usize> = self
            .instruments
            .iter()
            .enumerate()
            .filter(|(j, instrument)| {
                keep(instrument)
                    && self
                        .closes
                        .column(*j)
                        .iter()
                        .all(|p| p.is_finite() && *p > 0.0)
            })
            .map(|(j, _)| j)
            .collect();

        PriceHistory {
            instruments: columns.iter().map(|&j| self.instruments[j].clone()).collect(),
            closes: self.closes.select(Axis(1), &columns),
        }
    }
}

/// History provider backed by a growing in-memory calendar of closes.
#[derive(Default)]
pub struct InMemoryHistory {
    days: RwLock<Vec<HashMap<Instrument, f64>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one trading day of closes.
    pub async fn push_day(&self, closes: HashMap<Instrument, f64>) {
        self.days.write().await.push(closes);
    }

    pub async fn len(&self) -> usize {
        self.days.read().await.len()
    }
}

#[async_trait]
impl HistoryProvider for InMemoryHistory {
    async fn history(&self, instruments: &[Instrument], length: usize) -> Result<PriceHistory> {
        let days = self.days.read().await;
        let start = days.len().saturating_sub(length);
        let window = &days[start..];

        let mut closes = Array2::from_elem((window.len(), instruments.len()), f64::NAN);
        for (t, day) in window.iter().enumerate() {
            for (j, instrument) in instruments.iter().enumerate() {
                if let Some(&price) = day.get(instrument) {
                    closes[[t, j]] = price;
                }
            }
        }

        PriceHistory::new(instruments.to_vec(), closes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(s: &str) -> Instrument {
        Instrument::from(s)
    }

    #[test]
    fn test_retain_complete_drops_gaps_and_filtered() {
        let history = PriceHistory::from_columns(vec![
            (inst("A"), vec![Some(10.0), Some(11.0), Some(12.0)]),
            (inst("B"), vec![Some(10.0), None, Some(12.0)]),
            (inst("C"), vec![Some(5.0), Some(5.5), Some(6.0)]),
            (inst("D"), vec![Some(5.0), Some(0.0), Some(6.0)]),
        ])
        .unwrap();

        let kept = history.retain_complete(|i| i.as_str() != "C");
        assert_eq!(kept.instruments(), &[inst("A")]);
        assert_eq!(kept.days(), 3);
        assert_eq!(kept.closes()[[2, 0]], 12.0);
    }

    #[test]
    fn test_from_columns_rejects_ragged() {
        let result = PriceHistory::from_columns(vec![
            (inst("A"), vec![Some(1.0), Some(2.0)]),
            (inst("B"), vec![Some(1.0)]),
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_history_window() {
        let provider = InMemoryHistory::new();
        for day in 0..5 {
            let mut closes = HashMap::new();
            closes.insert(inst("A"), 100.0 + day as f64);
            if day >= 3 {
                closes.insert(inst("B"), 50.0);
            }
            provider.push_day(closes).await;
        }

        let history = provider.history(&[inst("A"), inst("B")], 3).await.unwrap();
        assert_eq!(history.days(), 3);
        assert_eq!(history.closes()[[0, 0]], 102.0);
        assert!(history.closes()[[0, 1]].is_nan());
        assert_eq!(history.closes()[[2, 1]], 50.0);
    }
}
