use super::{Indicator, RollingWindow};

/// Bollinger Bands reduced to their relative bandwidth.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    std_dev_multiplier: f64,
    prices: RollingWindow,
    bandwidth: Option<f64>,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: f64) -> Self {
        Self {
            std_dev_multiplier,
            prices: RollingWindow::new(period),
            bandwidth: None,
        }
    }

    /// Push a close (or a gap) and return `(upper - lower) / middle` once the
    /// window holds `period` consecutive valid closes.
    pub fn update(&mut self, price: Option<f64>) -> Option<f64> {
        self.prices.push(price);

        self.bandwidth = if self.prices.is_full() {
            let middle = self.prices.mean()?;
            let std_dev = self.prices.population_variance()?.sqrt();
            let deviation = std_dev * self.std_dev_multiplier;
            if middle != 0.0 {
                Some((2.0 * deviation) / middle)
            } else {
                None
            }
        } else {
            None
        };

        self.bandwidth
    }

    pub fn bandwidth(&self) -> Option<f64> {
        self.bandwidth
    }
}

impl Indicator for BollingerBands {
    fn name(&self) -> &'static str {
        "BollingerBands"
    }

    fn is_ready(&self) -> bool {
        self.bandwidth.is_some()
    }

    fn reset(&mut self) {
        self.prices.clear();
        self.bandwidth = None;
    }
}
