use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::error::{RegimeError, RegimeResult};

/// Position of a bar in the aligned date sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BarIndex(pub usize);

impl BarIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for BarIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Daily OHLCV bar. Any field may be unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl Bar {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
        }
    }

    pub fn close_only(date: NaiveDate, close: Option<f64>) -> Self {
        Self {
            close,
            ..Self::empty(date)
        }
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !is_usable(self.open) {
            missing.push("open");
        }
        if !is_usable(self.high) {
            missing.push("high");
        }
        if !is_usable(self.low) {
            missing.push("low");
        }
        if !is_usable(self.close) {
            missing.push("close");
        }
        if !is_usable(self.volume) {
            missing.push("volume");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// High, low and close when all three are usable.
    pub fn hlc(&self) -> Option<(f64, f64, f64)> {
        Some((usable(self.high)?, usable(self.low)?, usable(self.close)?))
    }
}

/// Finite value or `None`.
pub fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn is_usable(value: Option<f64>) -> bool {
    usable(value).is_some()
}

/// Where the bars of an ingested series came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    /// Adjusted OHLCV rows from the data pipeline.
    Ohlcv,
    /// Unadjusted rows kept by the backtest engine.
    RawRows,
    /// Bare close prices aligned with the date sequence.
    ClosesOnly,
}

impl DataSource {
    /// Best-available data, most preferred first.
    pub const FALLBACK_CHAIN: [DataSource; 3] =
        [DataSource::Ohlcv, DataSource::RawRows, DataSource::ClosesOnly];

    pub fn has_ohlcv(&self) -> bool {
        !matches!(self, DataSource::ClosesOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Ohlcv => "ohlcv",
            DataSource::RawRows => "raw_rows",
            DataSource::ClosesOnly => "closes_only",
        }
    }
}

/// Series handed over by the backtest engine after a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesInput {
    #[serde(default)]
    pub dates: Vec<NaiveDate>,
    #[serde(default)]
    pub ohlcv: Option<Vec<Bar>>,
    #[serde(default)]
    pub raw_rows: Option<Vec<Bar>>,
    #[serde(default)]
    pub closes: Option<Vec<Option<f64>>>,
    /// Cumulative strategy return in percent, aligned with `dates`.
    #[serde(default)]
    pub strategy_returns_pct: Option<Vec<Option<f64>>>,
}

/// Summary of one ingestion, mostly for logging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub source: Option<DataSource>,
    pub bars: usize,
    pub bars_missing_fields: usize,
    pub strategy_series: bool,
}

/// Date-aligned bars ready for feature extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    pub source: Option<DataSource>,
    pub bars: Vec<Bar>,
    /// Daily strategy log returns; `None` when no strategy series was supplied.
    pub strategy_log_returns: Option<Vec<Option<f64>>>,
}

impl PriceSeries {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.bars.iter().map(|b| b.date)
    }

    pub fn date(&self, index: BarIndex) -> Option<NaiveDate> {
        self.bars.get(index.get()).map(|b| b.date)
    }

    pub fn has_ohlcv(&self) -> bool {
        self.source.map(|s| s.has_ohlcv()).unwrap_or(false)
    }

    pub fn same_dates(&self, other: &PriceSeries) -> bool {
        self.len() == other.len() && self.dates().eq(other.dates())
    }

    /// Missing-field diagnostics for every incomplete bar.
    pub fn missing_fields(&self) -> Vec<RegimeError> {
        self.bars
            .iter()
            .enumerate()
            .flat_map(|(index, bar)| {
                bar.missing_fields()
                    .into_iter()
                    .map(move |field| RegimeError::MissingField { index, field })
            })
            .collect()
    }
}

impl SeriesInput {
    /// Resolve the best available bars and align them to the date sequence.
    ///
    /// Fails only when the series has dates but no usable close anywhere.
    pub fn ingest(&self) -> RegimeResult<(PriceSeries, IngestReport)> {
        let mut chosen = None;

        for source in DataSource::FALLBACK_CHAIN {
            if let Some(bars) = self.aligned_bars(source) {
                if bars.iter().any(|b| usable(b.close).is_some()) {
                    chosen = Some((source, bars));
                    break;
                }
                debug!("Data source {} present but has no usable closes", source.as_str());
            }
        }

        let (source, bars) = match chosen {
            Some((source, bars)) => (Some(source), bars),
            None if self.dates.is_empty() => (None, Vec::new()),
            None => return Err(RegimeError::NoPriceData),
        };

        let strategy_log_returns = self
            .strategy_returns_pct
            .as_ref()
            .map(|cumulative| strategy_log_returns(cumulative, bars.len()));

        let report = IngestReport {
            source,
            bars: bars.len(),
            bars_missing_fields: bars.iter().filter(|b| !b.is_complete()).count(),
            strategy_series: strategy_log_returns.is_some(),
        };

        Ok((
            PriceSeries {
                source,
                bars,
                strategy_log_returns,
            },
            report,
        ))
    }

    fn aligned_bars(&self, source: DataSource) -> Option<Vec<Bar>> {
        match source {
            DataSource::Ohlcv => self.ohlcv.as_deref().and_then(|rows| self.align_rows(rows)),
            DataSource::RawRows => self.raw_rows.as_deref().and_then(|rows| self.align_rows(rows)),
            DataSource::ClosesOnly => {
                let closes = self.closes.as_ref()?;
                if self.dates.is_empty() {
                    return None;
                }
                Some(
                    self.dates
                        .iter()
                        .enumerate()
                        .map(|(i, &date)| Bar::close_only(date, closes.get(i).copied().flatten()))
                        .collect(),
                )
            }
        }
    }

    /// Match rows to dates by date; dates without a row get an empty bar.
    /// Without a date sequence the rows define it.
    fn align_rows(&self, rows: &[Bar]) -> Option<Vec<Bar>> {
        if rows.is_empty() {
            return None;
        }
        if self.dates.is_empty() {
            let mut sorted = rows.to_vec();
            sorted.sort_by_key(|b| b.date);
            sorted.dedup_by_key(|b| b.date);
            return Some(sorted);
        }

        let by_date: HashMap<NaiveDate, &Bar> = rows.iter().map(|b| (b.date, b)).collect();
        Some(
            self.dates
                .iter()
                .map(|date| by_date.get(date).map(|b| (*b).clone()).unwrap_or_else(|| Bar::empty(*date)))
                .collect(),
        )
    }
}

/// Daily log returns of a cumulative percentage series.
fn strategy_log_returns(cumulative_pct: &[Option<f64>], len: usize) -> Vec<Option<f64>> {
    let growth: Vec<Option<f64>> = (0..len)
        .map(|i| {
            cumulative_pct
                .get(i)
                .copied()
                .flatten()
                .filter(|v| v.is_finite())
                .map(|pct| 1.0 + pct / 100.0)
                .filter(|g| *g > 0.0)
        })
        .collect();

    (0..len)
        .map(|t| {
            if t == 0 {
                return None;
            }
            match (growth[t - 1], growth[t]) {
                (Some(prev), Some(curr)) => Some((curr / prev).ln()),
                _ => None,
            }
        })
        .collect()
}
