use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use serde::Serialize;
use tracing::info;

use super::settings::{
    CalibrationSettings, FeatureSettings, HmmSettings, RegimeSettings, WorkerSettings,
};

#[derive(Debug, Clone, Serialize)]
pub enum SettingsChangeEvent {
    /// Feature or HMM settings changed; the base must be rebuilt.
    ModelUpdated,
    CalibrationUpdated(CalibrationSettings),
    WorkerUpdated(WorkerSettings),
    FullSettingsUpdated,
}

/// Live settings shared between the CLI, the worker and any UI.
pub struct SettingsManager {
    settings: Arc<RwLock<RegimeSettings>>,
    change_tx: broadcast::Sender<SettingsChangeEvent>,
}

impl SettingsManager {
    pub fn new(initial: RegimeSettings) -> Self {
        let (change_tx, _) = broadcast::channel(32);
        Self {
            settings: Arc::new(RwLock::new(initial)),
            change_tx,
        }
    }

    pub async fn get_settings(&self) -> RegimeSettings {
        self.settings.read().await.clone()
    }

    pub async fn update_features(&self, features: FeatureSettings) -> Result<(), String> {
        let mut settings = self.settings.write().await;
        let old = std::mem::replace(&mut settings.features, features);

        if let Err(errors) = settings.validate() {
            settings.features = old;
            return Err(errors.join(", "));
        }

        info!("Feature settings updated: atr={}, bollinger={}, adx={}",
              settings.features.atr_period, settings.features.bollinger_period, settings.features.adx_period);
        let _ = self.change_tx.send(SettingsChangeEvent::ModelUpdated);
        Ok(())
    }

    pub async fn update_hmm(&self, hmm: HmmSettings) -> Result<(), String> {
        let mut settings = self.settings.write().await;
        let old = std::mem::replace(&mut settings.hmm, hmm);

        if let Err(errors) = settings.validate() {
            settings.hmm = old;
            return Err(errors.join(", "));
        }

        info!("HMM settings updated: max_iterations={}, tolerance={}",
              settings.hmm.max_iterations, settings.hmm.tolerance);
        let _ = self.change_tx.send(SettingsChangeEvent::ModelUpdated);
        Ok(())
    }

    pub async fn update_calibration(&self, calibration: CalibrationSettings) -> Result<(), String> {
        let mut settings = self.settings.write().await;
        let old = std::mem::replace(&mut settings.calibration, calibration.clone());

        if let Err(errors) = settings.validate() {
            settings.calibration = old;
            return Err(errors.join(", "));
        }

        info!("Calibration settings updated: steps={}", calibration.steps);
        let _ = self.change_tx.send(SettingsChangeEvent::CalibrationUpdated(calibration));
        Ok(())
    }

    pub async fn update_worker(&self, worker: WorkerSettings) -> Result<(), String> {
        let mut settings = self.settings.write().await;
        let old = std::mem::replace(&mut settings.worker, worker.clone());

        if let Err(errors) = settings.validate() {
            settings.worker = old;
            return Err(errors.join(", "));
        }

        info!("Worker settings updated: debounce={}ms", worker.debounce_ms);
        let _ = self.change_tx.send(SettingsChangeEvent::WorkerUpdated(worker));
        Ok(())
    }

    pub async fn update_full(&self, new_settings: RegimeSettings) -> Result<(), String> {
        if let Err(errors) = new_settings.validate() {
            return Err(errors.join(", "));
        }

        let mut settings = self.settings.write().await;
        *settings = new_settings;

        info!("Full settings updated");
        let _ = self.change_tx.send(SettingsChangeEvent::FullSettingsUpdated);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChangeEvent> {
        self.change_tx.subscribe()
    }

    pub fn settings_arc(&self) -> Arc<RwLock<RegimeSettings>> {
        Arc::clone(&self.settings)
    }
}

impl Clone for SettingsManager {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            change_tx: self.change_tx.clone(),
        }
    }
}
