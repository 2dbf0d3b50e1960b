use super::Indicator;

/// Average True Range with Wilder smoothing.
#[derive(Debug, Clone)]
pub struct ATR {
    period: usize,
    prev_close: Option<f64>,
    true_ranges: Vec<f64>,
    value: Option<f64>,
}

impl ATR {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            prev_close: None,
            true_ranges: Vec::with_capacity(period),
            value: None,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = self.calculate_true_range(high, low);
        self.prev_close = Some(close);

        match self.value {
            Some(prev_atr) => {
                let period = self.period as f64;
                self.value = Some((prev_atr * (period - 1.0) + tr) / period);
            }
            None => {
                self.true_ranges.push(tr);
                if self.true_ranges.len() == self.period {
                    let sum: f64 = self.true_ranges.iter().sum();
                    self.value = Some(sum / self.period as f64);
                    self.true_ranges.clear();
                }
            }
        }

        self.value
    }

    /// ATR expressed as a fraction of `close`.
    pub fn update_ratio(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let atr = self.update(high, low, close)?;
        if close > 0.0 {
            Some(atr / close)
        } else {
            None
        }
    }

    fn calculate_true_range(&self, high: f64, low: f64) -> f64 {
        let hl = high - low;

        match self.prev_close {
            Some(prev_close) => {
                let hc = (high - prev_close).abs();
                let lc = (low - prev_close).abs();
                hl.max(hc).max(lc)
            }
            None => hl,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Indicator for ATR {
    fn name(&self) -> &'static str {
        "ATR"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.true_ranges.clear();
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_atr(bars: &[(f64, f64, f64)], period: usize) -> Vec<Option<f64>> {
        let trs: Vec<f64> = bars
            .iter()
            .enumerate()
            .map(|(i, &(h, l, _))| {
                if i == 0 {
                    h - l
                } else {
                    let pc = bars[i - 1].2;
                    (h - l).max((h - pc).abs()).max((l - pc).abs())
                }
            })
            .collect();

        let mut out = vec![None; bars.len()];
        if bars.len() < period {
            return out;
        }
        let mut atr = trs[..period].iter().sum::<f64>() / period as f64;
        out[period - 1] = Some(atr);
        for i in period..bars.len() {
            atr = (atr * (period as f64 - 1.0) + trs[i]) / period as f64;
            out[i] = Some(atr);
        }
        out
    }

    #[test]
    fn test_atr_matches_direct_computation() {
        let bars: Vec<(f64, f64, f64)> = (0..60)
            .map(|i| {
                let c = 100.0 + (i as f64 * 0.7).sin() * 4.0;
                (c + 1.5, c - 1.2, c)
            })
            .collect();

        let expected = direct_atr(&bars, 14);
        let mut atr = ATR::new(14);
        for (i, &(h, l, c)) in bars.iter().enumerate() {
            let got = atr.update(h, l, c);
            match (got, expected[i]) {
                (Some(a), Some(b)) => assert!((a - b).abs() < 1e-12),
                (None, None) => {}
                other => panic!("mismatch at {}: {:?}", i, other),
            }
        }
        assert!(atr.is_ready());
    }

    #[test]
    fn test_atr_ratio() {
        let mut atr = ATR::new(2);
        assert_eq!(atr.update_ratio(101.0, 99.0, 100.0), None);
        let ratio = atr.update_ratio(101.0, 99.0, 100.0).unwrap();
        assert!((ratio - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_atr_reset() {
        let mut atr = ATR::new(1);
        atr.update(2.0, 1.0, 1.5);
        assert!(atr.is_ready());
        atr.reset();
        assert!(!atr.is_ready());
        assert_eq!(atr.value(), None);
    }
}
