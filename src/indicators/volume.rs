use super::{Indicator, RollingWindow};

/// Z-score of the current volume against a trailing window that includes it.
#[derive(Debug, Clone)]
pub struct VolumeZScore {
    volumes: RollingWindow,
    value: Option<f64>,
}

impl VolumeZScore {
    pub fn new(period: usize) -> Self {
        Self {
            volumes: RollingWindow::new(period),
            value: None,
        }
    }

    pub fn update(&mut self, volume: Option<f64>) -> Option<f64> {
        let volume = volume.filter(|v| v.is_finite());
        self.volumes.push(volume);

        self.value = match volume {
            Some(current) if self.volumes.valid_count() >= 2 => {
                let mean = self.volumes.mean()?;
                let std = self.volumes.sample_variance()?.sqrt();
                if std == 0.0 {
                    Some(0.0)
                } else {
                    Some((current - mean) / std)
                }
            }
            _ => None,
        };

        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Indicator for VolumeZScore {
    fn name(&self) -> &'static str {
        "VolumeZScore"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.volumes.clear();
        self.value = None;
    }
}
