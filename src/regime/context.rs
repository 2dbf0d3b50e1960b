use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::base::RegimeBase;
use super::{run_pass, RegimeOverlay};
use crate::config::RegimeSettings;
use crate::error::{RegimeError, RegimeResult};
use crate::types::SeriesInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BaseUpdate {
    /// Features were extracted and the model retrained.
    Built,
    /// Same dates without OHLCV; the previous base was kept.
    Reused,
    /// Features and model kept, calibration searched again.
    Recalibrated,
}

#[derive(Debug, Clone, Serialize)]
pub enum BaseEvent {
    Replaced { generation: u64, update: BaseUpdate },
    Cleared { generation: u64 },
}

struct Slot {
    generation: u64,
    base: Option<Arc<RegimeBase>>,
}

/// Owner of the current regime base. Readers take an `Arc` snapshot and
/// never hold the lock while classifying.
pub struct RegimeContext {
    slot: RwLock<Slot>,
    settings: RwLock<RegimeSettings>,
    change_tx: broadcast::Sender<BaseEvent>,
}

impl RegimeContext {
    pub fn new(settings: RegimeSettings) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            slot: RwLock::new(Slot {
                generation: 0,
                base: None,
            }),
            settings: RwLock::new(settings),
            change_tx,
        }
    }

    pub fn settings(&self) -> RegimeSettings {
        self.settings.read().clone()
    }

    /// Store new settings without touching the base.
    pub fn set_settings(&self, settings: RegimeSettings) {
        *self.settings.write() = settings;
    }

    /// Store new settings and rebuild the current base from its series.
    /// Returns the new generation, or `None` when there is no base yet.
    pub fn rebuild(&self, settings: RegimeSettings) -> Option<u64> {
        self.set_settings(settings.clone());
        let current = self.snapshot()?;
        let base = RegimeBase::build(current.series.clone(), &settings);
        Some(self.install(base, BaseUpdate::Built))
    }

    /// Store new settings and rerun only the calibration search.
    pub fn recalibrate(&self, settings: RegimeSettings) -> Option<u64> {
        self.set_settings(settings.clone());
        let current = self.snapshot()?;
        let base = current.recalibrated(&settings.calibration);
        Some(self.install(base, BaseUpdate::Recalibrated))
    }

    /// Ingest a series, reusing the current base when the dates match and
    /// the new series carries no OHLCV.
    pub fn load(&self, input: &SeriesInput) -> RegimeResult<BaseUpdate> {
        let (series, _) = input.ingest()?;

        if !series.has_ohlcv() {
            if let Some(current) = self.snapshot() {
                if current.series.same_dates(&series) {
                    debug!("Reusing regime base for {} bars", series.len());
                    let refreshed = current.with_strategy_returns(series.strategy_log_returns);
                    self.install(refreshed, BaseUpdate::Reused);
                    return Ok(BaseUpdate::Reused);
                }
            }
        }

        let base = RegimeBase::build(series, &self.settings());
        self.install(base, BaseUpdate::Built);
        Ok(BaseUpdate::Built)
    }

    /// Swap in a new base wholesale. Returns its generation.
    pub fn replace(&self, base: RegimeBase) -> u64 {
        self.install(base, BaseUpdate::Built)
    }

    fn install(&self, base: RegimeBase, update: BaseUpdate) -> u64 {
        let bars = base.len();
        let generation = {
            let mut slot = self.slot.write();
            slot.generation += 1;
            slot.base = Some(Arc::new(base));
            slot.generation
        };
        info!("Regime base {} installed ({:?}, {} bars)", generation, update, bars);
        let _ = self.change_tx.send(BaseEvent::Replaced { generation, update });
        generation
    }

    pub fn clear(&self) {
        let generation = {
            let mut slot = self.slot.write();
            slot.generation += 1;
            slot.base = None;
            slot.generation
        };
        let _ = self.change_tx.send(BaseEvent::Cleared { generation });
    }

    pub fn snapshot(&self) -> Option<Arc<RegimeBase>> {
        self.slot.read().base.clone()
    }

    /// Snapshot together with the generation it belongs to.
    pub fn versioned_snapshot(&self) -> (u64, Option<Arc<RegimeBase>>) {
        let slot = self.slot.read();
        (slot.generation, slot.base.clone())
    }

    pub fn generation(&self) -> u64 {
        self.slot.read().generation
    }

    /// Run one slider pass against the current base. Without a base the
    /// overlay is empty.
    pub fn classify(&self, slider: f64) -> RegimeOverlay {
        match self.snapshot() {
            Some(base) => run_pass(&base, slider),
            None => {
                debug!("{}", RegimeError::StaleBase);
                RegimeOverlay::empty()
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BaseEvent> {
        self.change_tx.subscribe()
    }
}
