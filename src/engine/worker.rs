use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{SettingsChangeEvent, SettingsManager, WorkerSettings};
use crate::regime::{run_pass, RegimeContext, RegimeOverlay};

/// A finished slider pass.
#[derive(Debug, Clone)]
pub struct PassResult {
    /// Request generation this pass answered
    pub generation: u64,
    /// Base generation the pass ran against
    pub base_generation: u64,
    pub slider: f64,
    pub overlay: Arc<RegimeOverlay>,
}

struct Request {
    generation: u64,
    slider: f64,
}

/// Debounced background runner for slider passes.
///
/// Requests arriving within the debounce window collapse into the latest
/// one. Each pass runs on the blocking pool; a result is dropped when a
/// newer request or a new base appeared while it was running.
pub struct RegimeWorker {
    context: Arc<RegimeContext>,
    request_tx: mpsc::UnboundedSender<Request>,
    latest: Arc<AtomicU64>,
    debounce_ms: Arc<AtomicU64>,
    result_tx: broadcast::Sender<PassResult>,
    handle: JoinHandle<()>,
}

impl RegimeWorker {
    pub fn spawn(context: Arc<RegimeContext>, settings: &WorkerSettings) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (result_tx, _) = broadcast::channel(16);
        let latest = Arc::new(AtomicU64::new(0));
        let debounce_ms = Arc::new(AtomicU64::new(settings.debounce_ms));

        let handle = tokio::spawn(run_loop(
            Arc::clone(&context),
            request_rx,
            Arc::clone(&latest),
            result_tx.clone(),
            Arc::clone(&debounce_ms),
        ));

        info!("Regime worker started (debounce {}ms)", settings.debounce_ms);
        Self {
            context,
            request_tx,
            latest,
            debounce_ms,
            result_tx,
            handle,
        }
    }

    /// Queue a pass for `slider`. Returns the request generation, or `None`
    /// when the worker has stopped.
    pub fn request(&self, slider: f64) -> Option<u64> {
        let generation = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        self.request_tx.send(Request { generation, slider }).ok()?;
        Some(generation)
    }

    pub fn latest_generation(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PassResult> {
        self.result_tx.subscribe()
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms.load(Ordering::Acquire)
    }

    /// Apply settings changes as they are published. Model and feature
    /// changes rebuild the base, calibration changes rerun the search and
    /// worker changes take effect on the next request. The task ends once
    /// every manager handle is dropped.
    pub fn follow_settings(&self, manager: &SettingsManager) -> JoinHandle<()> {
        let mut changes = manager.subscribe();
        let shared = manager.settings_arc();
        let context = Arc::clone(&self.context);
        let debounce_ms = Arc::clone(&self.debounce_ms);

        tokio::spawn(async move {
            loop {
                let event = match changes.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} settings changes, applying the latest settings", skipped);
                        SettingsChangeEvent::FullSettingsUpdated
                    }
                    Err(RecvError::Closed) => break,
                };

                let settings = shared.read().await.clone();
                debounce_ms.store(settings.worker.debounce_ms, Ordering::Release);

                let context = Arc::clone(&context);
                let applied = match event {
                    SettingsChangeEvent::ModelUpdated | SettingsChangeEvent::FullSettingsUpdated => {
                        tokio::task::spawn_blocking(move || context.rebuild(settings)).await
                    }
                    SettingsChangeEvent::CalibrationUpdated(_) => {
                        tokio::task::spawn_blocking(move || context.recalibrate(settings)).await
                    }
                    SettingsChangeEvent::WorkerUpdated(_) => {
                        context.set_settings(settings);
                        Ok(None)
                    }
                };

                match applied {
                    Ok(Some(generation)) => debug!("Settings applied, base generation {}", generation),
                    Ok(None) => debug!("Settings stored, no base to rebuild"),
                    Err(e) => warn!("Applying settings failed: {}", e),
                }
            }
            debug!("Settings follower finished");
        })
    }

    /// Stop accepting requests and wait for the loop to drain.
    pub async fn shutdown(self) {
        drop(self.request_tx);
        if let Err(e) = self.handle.await {
            warn!("Regime worker ended abnormally: {}", e);
        }
    }
}

async fn run_loop(
    context: Arc<RegimeContext>,
    mut request_rx: mpsc::UnboundedReceiver<Request>,
    latest: Arc<AtomicU64>,
    result_tx: broadcast::Sender<PassResult>,
    debounce_ms: Arc<AtomicU64>,
) {
    let mut open = true;
    while open {
        let Some(mut request) = request_rx.recv().await else {
            break;
        };

        // Quiet period: keep only the newest request.
        let debounce = Duration::from_millis(debounce_ms.load(Ordering::Acquire));
        loop {
            match timeout(debounce, request_rx.recv()).await {
                Ok(Some(newer)) => request = newer,
                Ok(None) => {
                    open = false;
                    break;
                }
                Err(_) => break,
            }
        }

        let (base_generation, Some(base)) = context.versioned_snapshot() else {
            debug!("No regime base yet, dropping request {}", request.generation);
            continue;
        };

        let slider = request.slider;
        let overlay = match tokio::task::spawn_blocking(move || run_pass(&base, slider)).await {
            Ok(overlay) => overlay,
            Err(e) => {
                warn!("Regime pass failed: {}", e);
                continue;
            }
        };

        let stale_request = latest.load(Ordering::Acquire) != request.generation;
        let stale_base = context.generation() != base_generation;
        if stale_request || stale_base {
            debug!(
                "Discarding pass {} (newer request: {}, new base: {})",
                request.generation, stale_request, stale_base
            );
            continue;
        }

        let _ = result_tx.send(PassResult {
            generation: request.generation,
            base_generation,
            slider,
            overlay: Arc::new(overlay),
        });
    }
    debug!("Regime worker loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegimeSettings;
    use crate::regime::{BaseEvent, BaseUpdate};
    use crate::types::SeriesInput;
    use chrono::NaiveDate;

    fn context() -> Arc<RegimeContext> {
        let mut settings = RegimeSettings::default();
        settings.calibration.steps = 10;
        let context = RegimeContext::new(settings);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let input = SeriesInput {
            dates: (0..40).map(|i| start + chrono::Duration::days(i)).collect(),
            closes: Some((0..40).map(|i| Some(100.0 + i as f64 * 0.5)).collect()),
            ..Default::default()
        };
        context.load(&input).unwrap();
        Arc::new(context)
    }

    fn worker_settings() -> WorkerSettings {
        WorkerSettings {
            debounce_ms: 30,
            default_slider: 5.0,
        }
    }

    #[tokio::test]
    async fn test_burst_collapses_to_latest() {
        let worker = RegimeWorker::spawn(context(), &worker_settings());
        let mut results = worker.subscribe();

        worker.request(1.0);
        worker.request(4.0);
        let last = worker.request(8.0).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.generation, last);
        assert_eq!(result.slider, 8.0);
        assert_eq!(result.base_generation, 1);
        assert!(result.overlay.summary.is_some());

        // Nothing else was produced for the earlier requests.
        let extra = tokio::time::timeout(Duration::from_millis(150), results.recv()).await;
        assert!(extra.is_err());

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_spaced_requests_each_answer() {
        let worker = RegimeWorker::spawn(context(), &worker_settings());
        let mut results = worker.subscribe();

        for slider in [2.0, 6.0] {
            let generation = worker.request(slider).unwrap();
            let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(result.generation, generation);
            assert_eq!(result.slider, slider);
        }
        assert_eq!(worker.latest_generation(), 2);
        worker.shutdown().await;
    }

    async fn next_base_event(rx: &mut broadcast::Receiver<crate::regime::BaseEvent>) -> crate::regime::BaseEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_model_settings_change_rebuilds_base() {
        let context = context();
        let manager = SettingsManager::new(context.settings());
        let worker = RegimeWorker::spawn(Arc::clone(&context), &worker_settings());
        let follower = worker.follow_settings(&manager);
        let mut events = context.subscribe();

        let mut hmm = manager.get_settings().await.hmm;
        hmm.max_iterations = 7;
        manager.update_hmm(hmm).await.unwrap();

        assert!(matches!(
            next_base_event(&mut events).await,
            BaseEvent::Replaced { generation: 2, update: BaseUpdate::Built }
        ));
        assert_eq!(context.settings().hmm.max_iterations, 7);

        drop(manager);
        tokio::time::timeout(Duration::from_secs(5), follower).await.unwrap().unwrap();
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_calibration_change_recalibrates_base() {
        let context = context();
        let manager = SettingsManager::new(context.settings());
        let worker = RegimeWorker::spawn(Arc::clone(&context), &worker_settings());
        let _follower = worker.follow_settings(&manager);
        let mut events = context.subscribe();
        let features_before = context.snapshot().unwrap().features.clone();

        let mut calibration = manager.get_settings().await.calibration;
        calibration.steps = 4;
        manager.update_calibration(calibration).await.unwrap();

        assert!(matches!(
            next_base_event(&mut events).await,
            BaseEvent::Replaced { update: BaseUpdate::Recalibrated, .. }
        ));
        let base = context.snapshot().unwrap();
        assert_eq!(base.calibration.steps, 4);
        assert_eq!(base.features, features_before);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_settings_change_debounce() {
        let context = context();
        let manager = SettingsManager::new(context.settings());
        let worker = RegimeWorker::spawn(Arc::clone(&context), &worker_settings());
        let _follower = worker.follow_settings(&manager);
        assert_eq!(worker.debounce_ms(), 30);

        manager
            .update_worker(WorkerSettings {
                debounce_ms: 400,
                default_slider: 5.0,
            })
            .await
            .unwrap();
        for _ in 0..100 {
            if worker.debounce_ms() == 400 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(worker.debounce_ms(), 400);
        assert_eq!(context.generation(), 1);

        // The longer quiet period now holds the pass back.
        let mut results = worker.subscribe();
        let generation = worker.request(3.0).unwrap();
        let early = tokio::time::timeout(Duration::from_millis(150), results.recv()).await;
        assert!(early.is_err());
        let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.generation, generation);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_requests_without_base_are_dropped() {
        let context = Arc::new(RegimeContext::new(RegimeSettings::default()));
        let worker = RegimeWorker::spawn(context, &worker_settings());
        let mut results = worker.subscribe();
        worker.request(5.0);
        let outcome = tokio::time::timeout(Duration::from_millis(200), results.recv()).await;
        assert!(outcome.is_err());
        worker.shutdown().await;
    }
}
