use super::{Indicator, RollingWindow};

/// Rolling bias-corrected sample skewness (Fisher-Pearson G1).
#[derive(Debug, Clone)]
pub struct RollingSkewness {
    window: RollingWindow,
    min_points: usize,
    value: Option<f64>,
}

impl RollingSkewness {
    pub fn new(period: usize) -> Self {
        Self {
            window: RollingWindow::new(period),
            min_points: 3,
            value: None,
        }
    }

    pub fn update(&mut self, sample: Option<f64>) -> Option<f64> {
        self.window.push(sample);
        self.value = self.compute();
        self.value
    }

    fn compute(&self) -> Option<f64> {
        let count = self.window.valid_count();
        if count < self.min_points {
            return None;
        }
        let m2 = self.window.population_variance()?;
        if m2 == 0.0 {
            return Some(0.0);
        }
        let m3 = self.window.third_moment()?;
        let n = count as f64;
        let g1 = m3 / m2.powf(1.5);
        Some((n * (n - 1.0)).sqrt() / (n - 2.0) * g1)
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Indicator for RollingSkewness {
    fn name(&self) -> &'static str {
        "Skewness"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.window.clear();
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bias-corrected skewness of a slice, computed from scratch.
    fn sample_skewness(values: &[f64]) -> Option<f64> {
        if values.len() < 3 {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        if m2 <= 1e-12 * values.iter().map(|v| v * v).sum::<f64>() / n || m2 == 0.0 {
            return Some(0.0);
        }
        let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
        Some((n * (n - 1.0)).sqrt() / (n - 2.0) * m3 / m2.powf(1.5))
    }

    #[test]
    fn test_incremental_matches_scratch() {
        let data: Vec<f64> = (0..150)
            .map(|i| {
                let x = i as f64;
                0.01 * (x * 0.9).sin() + 0.004 * (x * 2.3).cos().powi(3)
            })
            .collect();

        let mut skew = RollingSkewness::new(20);
        for (i, &v) in data.iter().enumerate() {
            let got = skew.update(Some(v));
            let start = (i + 1).saturating_sub(20);
            let expected = sample_skewness(&data[start..=i]);
            match (got, expected) {
                (Some(a), Some(b)) => assert!((a - b).abs() < 1e-6, "bar {}: {} vs {}", i, a, b),
                (None, None) => {}
                other => panic!("mismatch at {}: {:?}", i, other),
            }
        }
    }

    #[test]
    fn test_requires_three_points() {
        let mut skew = RollingSkewness::new(20);
        assert_eq!(skew.update(Some(0.1)), None);
        assert_eq!(skew.update(None), None);
        assert_eq!(skew.update(Some(0.3)), None);
        assert!(skew.update(Some(-0.2)).is_some());
    }

    #[test]
    fn test_zero_variance_gives_zero() {
        let mut skew = RollingSkewness::new(5);
        for _ in 0..8 {
            skew.update(Some(0.0));
        }
        assert_eq!(skew.value(), Some(0.0));
    }

    #[test]
    fn test_right_tail_is_positive() {
        let values = [0.0, 0.0, 0.0, 0.0, 1.0];
        assert!(sample_skewness(&values).unwrap() > 0.0);
    }
}
