use super::Indicator;

/// Average Directional Index with classic Wilder smoothing.
///
/// True range and directional movement are seeded with a plain sum over
/// the first `period` bars and then smoothed as `s - s / period + x`. DX
/// values are averaged over `period` bars to seed the ADX, which is then
/// Wilder-smoothed. The first ADX therefore appears on bar `2 * period - 1`.
#[derive(Debug, Clone)]
pub struct ADX {
    period: usize,
    prev: Option<(f64, f64, f64)>,
    seed_count: usize,
    tr_sum: f64,
    plus_dm_sum: f64,
    minus_dm_sum: f64,
    smoothed_ready: bool,
    dx_seed: Vec<f64>,
    value: Option<f64>,
}

impl ADX {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            prev: None,
            seed_count: 0,
            tr_sum: 0.0,
            plus_dm_sum: 0.0,
            minus_dm_sum: 0.0,
            smoothed_ready: false,
            dx_seed: Vec::with_capacity(period),
            value: None,
        }
    }

    /// Returns the ADX for this bar, or `None` while warming up or when the
    /// directional indicators are both zero.
    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let Some((prev_high, prev_low, prev_close)) = self.prev.replace((high, low, close)) else {
            return None;
        };

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        let up_move = high - prev_high;
        let down_move = prev_low - low;
        let plus_dm = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        let minus_dm = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };

        let period = self.period as f64;
        if self.smoothed_ready {
            self.tr_sum = self.tr_sum - self.tr_sum / period + tr;
            self.plus_dm_sum = self.plus_dm_sum - self.plus_dm_sum / period + plus_dm;
            self.minus_dm_sum = self.minus_dm_sum - self.minus_dm_sum / period + minus_dm;
        } else {
            self.tr_sum += tr;
            self.plus_dm_sum += plus_dm;
            self.minus_dm_sum += minus_dm;
            self.seed_count += 1;
            if self.seed_count < self.period {
                return None;
            }
            self.smoothed_ready = true;
        }

        let dx = self.dx()?;

        match self.value {
            Some(prev_adx) => {
                self.value = Some((prev_adx * (period - 1.0) + dx) / period);
            }
            None => {
                self.dx_seed.push(dx);
                if self.dx_seed.len() < self.period {
                    return None;
                }
                self.value = Some(self.dx_seed.iter().sum::<f64>() / period);
                self.dx_seed.clear();
            }
        }

        self.value
    }

    fn dx(&self) -> Option<f64> {
        if self.tr_sum <= 0.0 {
            return None;
        }
        let plus_di = 100.0 * self.plus_dm_sum / self.tr_sum;
        let minus_di = 100.0 * self.minus_dm_sum / self.tr_sum;
        let di_sum = plus_di + minus_di;
        if di_sum <= 0.0 {
            return None;
        }
        Some(100.0 * (plus_di - minus_di).abs() / di_sum)
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Indicator for ADX {
    fn name(&self) -> &'static str {
        "ADX"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        *self = Self::new(self.period);
    }
}
