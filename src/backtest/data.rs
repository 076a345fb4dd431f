//! Historical day-bar loading for backtesting.

use crate::market::{GroupId, Instrument, ScreenedInstrument};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// One instrument's bar on one trading day.
#[derive(Debug, Clone, PartialEq)]
pub struct DayBar {
    pub instrument: Instrument,
    pub group: GroupId,
    pub open: Decimal,
    pub close: Decimal,
    pub eligible: bool,
    /// Shares traded; caps simulated fills when slippage is on
    pub volume: Option<Decimal>,
}

/// All bars of one trading day.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingDay {
    pub date: NaiveDate,
    pub bars: Vec<DayBar>,
}

impl TradingDay {
    pub fn opens(&self) -> HashMap<Instrument, Decimal> {
        self.bars
            .iter()
            .map(|b| (b.instrument.clone(), b.open))
            .collect()
    }

    pub fn closes(&self) -> HashMap<Instrument, Decimal> {
        self.bars
            .iter()
            .map(|b| (b.instrument.clone(), b.close))
            .collect()
    }

    pub fn volumes(&self) -> HashMap<Instrument, Decimal> {
        self.bars
            .iter()
            .filter_map(|b| b.volume.map(|v| (b.instrument.clone(), v)))
            .collect()
    }

    /// The day's screen: every listed instrument with its sector and eligibility.
    pub fn screen(&self) -> Vec<ScreenedInstrument> {
        self.bars
            .iter()
            .map(|b| ScreenedInstrument {
                instrument: b.instrument.clone(),
                group: b.group.clone(),
                eligible: b.eligible,
            })
            .collect()
    }
}

/// Trait for loading historical market data.
pub trait DataLoader: Send + Sync {
    /// Trading days within `[start, end]`, in date order.
    fn load_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<TradingDay>>;

    /// First and last date in the data.
    fn available_range(&self) -> Option<(NaiveDate, NaiveDate)>;

    fn available_symbols(&self) -> Vec<Instrument>;
}

/// CSV data loader for historical backtesting.
///
/// Expected CSV format (`eligible` optional, defaults to `true`; `volume`
/// optional):
/// ```csv
/// date,symbol,sector,open,close,eligible,volume
/// 2024-01-02,XOM,ENERGY,100.10,101.25,true,18250000
/// ```
#[derive(Clone)]
pub struct CsvDataLoader {
    days: Vec<TradingDay>,
    symbols: Vec<Instrument>,
}

impl CsvDataLoader {
    /// Load data from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Load data from CSV content string.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut by_date: BTreeMap<NaiveDate, Vec<DayBar>> = BTreeMap::new();
        let mut symbols: BTreeSet<Instrument> = BTreeSet::new();

        for (line_num, line) in content.lines().enumerate() {
            // Skip header
            if line_num == 0 && line.starts_with("date") {
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let (date, bar) = parse_row(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            symbols.insert(bar.instrument.clone());
            by_date.entry(date).or_default().push(bar);
        }

        if by_date.is_empty() {
            anyhow::bail!("CSV file contains no data rows");
        }

        let days = by_date
            .into_iter()
            .map(|(date, mut bars)| {
                bars.sort_by(|a, b| a.instrument.cmp(&b.instrument));
                TradingDay { date, bars }
            })
            .collect();

        Ok(Self {
            days,
            symbols: symbols.into_iter().collect(),
        })
    }

    pub fn from_days(days: Vec<TradingDay>) -> Self {
        let symbols: BTreeSet<Instrument> = days
            .iter()
            .flat_map(|d| d.bars.iter().map(|b| b.instrument.clone()))
            .collect();
        Self {
            days,
            symbols: symbols.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

impl DataLoader for CsvDataLoader {
    fn load_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<TradingDay>> {
        Ok(self
            .days
            .iter()
            .filter(|d| d.date >= start && d.date <= end)
            .cloned()
            .collect())
    }

    fn available_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.days.first()?;
        let last = self.days.last()?;
        Some((first.date, last.date))
    }

    fn available_symbols(&self) -> Vec<Instrument> {
        self.symbols.clone()
    }
}

fn parse_row(line: &str) -> Result<(NaiveDate, DayBar)> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        anyhow::bail!(
            "Expected at least 5 columns (date,symbol,sector,open,close[,eligible[,volume]]), got {}",
            parts.len()
        );
    }

    let date = NaiveDate::parse_from_str(parts[0], "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {}", parts[0]))?;
    let open: Decimal = parts[3]
        .parse()
        .with_context(|| format!("Invalid open: {}", parts[3]))?;
    let close: Decimal = parts[4]
        .parse()
        .with_context(|| format!("Invalid close: {}", parts[4]))?;
    if open <= Decimal::ZERO || close <= Decimal::ZERO {
        anyhow::bail!("Prices must be positive, got open {open} close {close}");
    }
    let eligible = match parts.get(5) {
        None | Some(&"") => true,
        Some(flag) => parse_flag(flag).with_context(|| format!("Invalid eligible: {flag}"))?,
    };
    let volume = match parts.get(6) {
        None | Some(&"") => None,
        Some(raw) => {
            let volume: Decimal = raw
                .parse()
                .with_context(|| format!("Invalid volume: {raw}"))?;
            if volume < Decimal::ZERO {
                anyhow::bail!("Volume must not be negative, got {volume}");
            }
            Some(volume)
        }
    };

    Ok((
        date,
        DayBar {
            instrument: Instrument::new(parts[1]),
            group: GroupId::new(parts[2]),
            open,
            close,
            eligible,
            volume,
        },
    ))
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => anyhow::bail!("expected true/false, got {other}"),
    }
}
