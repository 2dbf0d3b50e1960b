use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::FeatureSettings;
use crate::indicators::{BollingerBands, RollingSkewness, VolumeZScore, ADX, ATR};
use crate::types::{usable, BarIndex, PriceSeries};

/// Number of feature columns fed to the HMM.
pub const HMM_DIMS: usize = 4;
/// Observation column holding the (standardized) log return.
pub const RETURN_DIM: usize = 0;
/// Observation column holding the (standardized) ATR ratio.
pub const VOLATILITY_DIM: usize = 1;

/// Per-bar indicators. Unavailable inputs stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub log_return: Option<f64>,
    pub atr_ratio: Option<f64>,
    pub bollinger_width: Option<f64>,
    pub adx: Option<f64>,
    pub return_skewness: Option<f64>,
    pub volume_zscore: Option<f64>,
}

impl FeatureRow {
    /// HMM observation columns: log return, ATR ratio, Bollinger width, ADX.
    pub fn hmm_values(&self) -> Option<[f64; HMM_DIMS]> {
        Some([
            self.log_return?,
            self.atr_ratio?,
            self.bollinger_width?,
            self.adx?,
        ])
    }
}

/// Trailing price momentum used to pick a direction when promoting days.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Momentum {
    /// Sum of the trailing log returns.
    pub net: f64,
    /// Kaufman efficiency ratio `|net| / sum |r|`, in `[0, 1]`.
    pub efficiency: f64,
}

/// Run every indicator over the series, one row per bar.
pub fn extract_features(series: &PriceSeries, settings: &FeatureSettings) -> Vec<FeatureRow> {
    let mut atr = ATR::new(settings.atr_period);
    let mut bollinger = BollingerBands::new(settings.bollinger_period, settings.bollinger_std_dev);
    let mut adx = ADX::new(settings.adx_period);
    let mut skew = RollingSkewness::new(settings.skew_window);
    let mut volume = VolumeZScore::new(settings.volume_window);

    let mut prev_close: Option<f64> = None;
    let mut rows = Vec::with_capacity(series.len());

    for bar in &series.bars {
        let close = usable(bar.close).filter(|c| *c > 0.0);

        let log_return = match (prev_close, close) {
            (Some(prev), Some(curr)) => Some((curr / prev).ln()),
            _ => None,
        };
        prev_close = close;

        let (atr_ratio, adx_value) = match bar.hlc() {
            Some((high, low, close)) if close > 0.0 => {
                (atr.update_ratio(high, low, close), adx.update(high, low, close))
            }
            _ => (None, None),
        };

        rows.push(FeatureRow {
            log_return,
            atr_ratio,
            bollinger_width: bollinger.update(close),
            adx: adx_value,
            return_skewness: skew.update(log_return),
            volume_zscore: volume.update(usable(bar.volume)),
        });
    }

    rows
}

/// Trailing momentum for every bar over `window` log returns.
///
/// `None` when no return is available or the window is perfectly flat, in
/// which case the bar has no direction to be promoted to.
pub fn trailing_momentum(features: &[FeatureRow], window: usize) -> Vec<Option<Momentum>> {
    let window = window.max(1);
    (0..features.len())
        .map(|t| {
            let start = (t + 1).saturating_sub(window);
            let returns: Vec<f64> = features[start..=t].iter().filter_map(|f| f.log_return).collect();
            if returns.is_empty() {
                return None;
            }
            let net: f64 = returns.iter().sum();
            let path: f64 = returns.iter().map(|r| r.abs()).sum();
            if path <= 0.0 || net == 0.0 {
                return None;
            }
            Some(Momentum {
                net,
                efficiency: (net.abs() / path).min(1.0),
            })
        })
        .collect()
}

/// One standardized HMM observation with its originating bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub bar: BarIndex,
    pub values: [f64; HMM_DIMS],
}

/// Standardized observations (zero mean, unit variance per column).
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSet {
    pub rows: Vec<Observation>,
    pub column_means: [f64; HMM_DIMS],
    pub column_stds: [f64; HMM_DIMS],
    by_bar: Vec<Option<usize>>,
}

impl ObservationSet {
    /// Keep the bars where every HMM column is available and z-score them.
    /// A zero-variance column is centred but left unscaled.
    pub fn normalize(features: &[FeatureRow]) -> Self {
        let raw: Vec<(BarIndex, [f64; HMM_DIMS])> = features
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.hmm_values().map(|v| (BarIndex(i), v)))
            .collect();

        let mut column_means = [0.0; HMM_DIMS];
        let mut column_stds = [1.0; HMM_DIMS];

        if !raw.is_empty() {
            let n = raw.len() as f64;
            for d in 0..HMM_DIMS {
                let mean = raw.iter().map(|(_, v)| v[d]).sum::<f64>() / n;
                let var = raw.iter().map(|(_, v)| (v[d] - mean).powi(2)).sum::<f64>() / n;
                column_means[d] = mean;
                column_stds[d] = if var.is_finite() && var > 1e-24 { var.sqrt() } else { 1.0 };
            }
        }

        let mut by_bar = vec![None; features.len()];
        let rows = raw
            .into_iter()
            .enumerate()
            .map(|(row, (bar, values))| {
                by_bar[bar.get()] = Some(row);
                let mut scaled = [0.0; HMM_DIMS];
                for d in 0..HMM_DIMS {
                    scaled[d] = (values[d] - column_means[d]) / column_stds[d];
                }
                Observation { bar, values: scaled }
            })
            .collect();

        Self {
            rows,
            column_means,
            column_stds,
            by_bar,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Observation row for a bar, if that bar was usable.
    pub fn row_of(&self, bar: BarIndex) -> Option<usize> {
        self.by_bar.get(bar.get()).copied().flatten()
    }

    pub fn to_array(&self) -> Array2<f64> {
        let mut data = Array2::zeros((self.rows.len(), HMM_DIMS));
        for (i, obs) in self.rows.iter().enumerate() {
            for (j, &val) in obs.values.iter().enumerate() {
                data[[i, j]] = val;
            }
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, SeriesInput};
    use chrono::NaiveDate;

    fn trending_series(n: usize) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let bars = (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 * 0.5 + (i as f64 * 0.8).sin() * 2.0;
                Bar {
                    date: start + chrono::Duration::days(i as i64),
                    open: Some(c - 0.2),
                    high: Some(c + 1.0),
                    low: Some(c - 1.0),
                    close: Some(c),
                    volume: Some(1_000.0 + (i % 7) as f64 * 50.0),
                }
            })
            .collect();
        let input = SeriesInput {
            ohlcv: Some(bars),
            ..Default::default()
        };
        input.ingest().unwrap().0
    }

    #[test]
    fn test_extract_features_warmup() {
        let series = trending_series(60);
        let rows = extract_features(&series, &FeatureSettings::default());
        assert_eq!(rows.len(), 60);
        assert_eq!(rows[0].log_return, None);
        assert!(rows[1].log_return.is_some());
        assert_eq!(rows[12].atr_ratio, None);
        assert!(rows[13].atr_ratio.is_some());
        assert_eq!(rows[18].bollinger_width, None);
        assert!(rows[19].bollinger_width.is_some());
        assert_eq!(rows[26].adx, None);
        assert!(rows[27].adx.is_some());
        assert!(rows[27].hmm_values().is_some());
    }

    #[test]
    fn test_missing_field_propagates_as_none() {
        let mut series = trending_series(40);
        series.bars[30].high = None;
        series.bars[31].close = None;
        let rows = extract_features(&series, &FeatureSettings::default());
        assert_eq!(rows[30].atr_ratio, None);
        assert_eq!(rows[30].adx, None);
        assert!(rows[30].log_return.is_some());
        assert_eq!(rows[31].log_return, None);
        assert_eq!(rows[32].log_return, None);
        assert_eq!(rows[31].bollinger_width, None);
        assert!(rows[30].hmm_values().is_none());
    }

    #[test]
    fn test_normalized_columns() {
        let series = trending_series(120);
        let rows = extract_features(&series, &FeatureSettings::default());
        let obs = ObservationSet::normalize(&rows);
        assert!(obs.len() > 80);

        for d in 0..HMM_DIMS {
            let n = obs.len() as f64;
            let mean = obs.rows.iter().map(|o| o.values[d]).sum::<f64>() / n;
            let var = obs.rows.iter().map(|o| (o.values[d] - mean).powi(2)).sum::<f64>() / n;
            assert!(mean.abs() < 1e-9);
            assert!((var - 1.0).abs() < 1e-9);
        }

        let first = obs.rows[0];
        assert_eq!(obs.row_of(first.bar), Some(0));
        assert_eq!(obs.row_of(BarIndex(0)), None);
        assert_eq!(obs.to_array().dim(), (obs.len(), HMM_DIMS));
    }

    #[test]
    fn test_momentum_direction() {
        let rows: Vec<FeatureRow> = [None, Some(0.01), Some(0.02), Some(-0.01), Some(0.0)]
            .into_iter()
            .map(|r| FeatureRow {
                log_return: r,
                ..Default::default()
            })
            .collect();
        let momentum = trailing_momentum(&rows, 3);
        assert_eq!(momentum[0], None);
        let m = momentum[3].unwrap();
        assert!((m.net - 0.02).abs() < 1e-12);
        assert!((m.efficiency - 0.5).abs() < 1e-12);

        let flat = vec![
            FeatureRow {
                log_return: Some(0.0),
                ..Default::default()
            };
            4
        ];
        assert!(trailing_momentum(&flat, 3).iter().all(|m| m.is_none()));
    }
}
