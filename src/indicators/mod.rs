pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod skewness;
pub mod volume;

pub use adx::*;
pub use atr::*;
pub use bollinger::*;
pub use skewness::*;
pub use volume::*;

use std::collections::VecDeque;

pub trait Indicator {
    fn name(&self) -> &'static str;
    fn is_ready(&self) -> bool;
    fn reset(&mut self);
}

/// Fixed-length window of optional samples with running power sums.
///
/// Missing samples occupy a slot but do not contribute to the sums, so a
/// window is "full" only when every slot holds a value.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    period: usize,
    values: VecDeque<Option<f64>>,
    count: usize,
    sum: f64,
    sum_sq: f64,
    sum_cu: f64,
    pushes_since_resync: usize,
}

impl RollingWindow {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            values: VecDeque::with_capacity(period + 1),
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            sum_cu: 0.0,
            pushes_since_resync: 0,
        }
    }

    pub fn push(&mut self, value: Option<f64>) {
        let value = value.filter(|v| v.is_finite());
        self.values.push_back(value);
        if let Some(v) = value {
            self.add(v);
        }

        if self.values.len() > self.period {
            if let Some(Some(old)) = self.values.pop_front() {
                self.sub(old);
            }
        }

        self.pushes_since_resync += 1;
        if self.count == 0 || self.pushes_since_resync >= self.period * 8 {
            self.resync();
        }
    }

    fn add(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
        self.sum_cu += v * v * v;
    }

    fn sub(&mut self, v: f64) {
        self.count -= 1;
        self.sum -= v;
        self.sum_sq -= v * v;
        self.sum_cu -= v * v * v;
    }

    /// Rebuild the sums from the stored samples to shed accumulated drift.
    fn resync(&mut self) {
        self.count = 0;
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.sum_cu = 0.0;
        let values: Vec<f64> = self.values.iter().flatten().copied().collect();
        for v in values {
            self.add(v);
        }
        self.pushes_since_resync = 0;
    }

    pub fn valid_count(&self) -> usize {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.period && self.count == self.period
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum / self.count as f64)
    }

    /// Population variance (divides by n), clamped at zero.
    pub fn population_variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let n = self.count as f64;
        let var = self.sum_sq / n - mean * mean;
        Some(snap_to_zero(var, self.sum_sq / n))
    }

    /// Sample variance (divides by n - 1).
    pub fn sample_variance(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let n = self.count as f64;
        Some(self.population_variance()? * n / (n - 1.0))
    }

    /// Population third central moment.
    pub fn third_moment(&self) -> Option<f64> {
        let mean = self.mean()?;
        let n = self.count as f64;
        Some(self.sum_cu / n - 3.0 * mean * self.sum_sq / n + 2.0 * mean.powi(3))
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.resync();
    }
}

/// Treat variances lost in cancellation noise as exactly zero.
fn snap_to_zero(variance: f64, raw_second_moment: f64) -> f64 {
    if variance <= 1e-12 * raw_second_moment.abs() || variance <= 0.0 {
        0.0
    } else {
        variance
    }
}

/// Median of the finite values, `None` if there are none.
pub fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
#[cfg(test)]
pub(crate) fn stddev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_window_matches_direct() {
        let data: Vec<f64> = (0..200).map(|i| ((i as f64) * 0.37).sin() * 3.0 + 50.0).collect();
        let mut window = RollingWindow::new(20);
        for (i, &v) in data.iter().enumerate() {
            window.push(Some(v));
            let start = (i + 1).saturating_sub(20);
            let slice = &data[start..=i];
            let direct_mean = mean(slice).unwrap();
            let direct_var = stddev(slice).unwrap().powi(2);
            assert!((window.mean().unwrap() - direct_mean).abs() < 1e-9);
            assert!((window.population_variance().unwrap() - direct_var).abs() < 1e-8);
        }
        assert!(window.is_full());
    }

    #[test]
    fn test_rolling_window_missing_values() {
        let mut window = RollingWindow::new(3);
        window.push(Some(1.0));
        window.push(None);
        window.push(Some(3.0));
        assert_eq!(window.valid_count(), 2);
        assert!(!window.is_full());
        assert_eq!(window.mean(), Some(2.0));

        window.push(Some(5.0));
        window.push(Some(7.0));
        assert!(window.is_full());
        assert_eq!(window.mean(), Some(5.0));
    }

    #[test]
    fn test_constant_window_has_zero_variance() {
        let mut window = RollingWindow::new(5);
        for _ in 0..12 {
            window.push(Some(0.1 + 0.2));
        }
        assert_eq!(window.population_variance(), Some(0.0));
    }

    #[test]
    fn test_median() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(vec![f64::NAN]), None);
        assert_eq!(median(Vec::<f64>::new()), None);
    }
}
