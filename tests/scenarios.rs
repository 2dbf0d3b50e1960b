use chrono::NaiveDate;

use regime_overlay::config::RegimeSettings;
use regime_overlay::regime::classifier::{runs, volatility_vote};
use regime_overlay::regime::{
    aggregate, calibrate, calibrate_parallel, classify, run_pass, BaseUpdate, Calibration, RegimeBase,
    RegimeContext, Thresholds,
};
use regime_overlay::types::{Bar, DayLabel, SeriesInput, Volatility};

fn day(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 4).unwrap() + chrono::Duration::days(i as i64)
}

fn settings(steps: usize) -> RegimeSettings {
    let mut settings = RegimeSettings::default();
    settings.calibration.steps = steps;
    settings
}

fn ohlcv_input(bars: Vec<Bar>) -> SeriesInput {
    SeriesInput {
        dates: bars.iter().map(|b| b.date).collect(),
        ohlcv: Some(bars),
        ..Default::default()
    }
}

/// 40 bars of a gentle, steady uptrend with tight ranges.
fn gentle_uptrend() -> SeriesInput {
    let bars = (0..40)
        .map(|t| {
            let c = 100.0 * 1.0005f64.powi(t as i32);
            Bar {
                date: day(t),
                open: Some(c),
                high: Some(c * 1.002),
                low: Some(c * 0.998),
                close: Some(c),
                volume: Some(1_000.0),
            }
        })
        .collect();
    ohlcv_input(bars)
}

fn flat_series() -> SeriesInput {
    let bars = (0..30)
        .map(|t| Bar {
            date: day(t),
            open: Some(100.0),
            high: Some(100.0),
            low: Some(100.0),
            close: Some(100.0),
            volume: Some(500.0),
        })
        .collect();
    ohlcv_input(bars)
}

/// Alternating calm rallies and volatile selloffs, long enough to train the HMM.
fn mixed_regimes(n: usize) -> SeriesInput {
    let mut close: f64 = 100.0;
    let bars = (0..n)
        .map(|t| {
            let x = t as f64;
            let volatile = (t / 40) % 2 == 1;
            let (ret, spread) = if volatile {
                (-0.006 + 0.015 * (x * 2.3).sin(), 0.025)
            } else {
                (0.004 + 0.002 * (x * 1.7).sin(), 0.005)
            };
            if t > 0 {
                close *= ret.exp();
            }
            Bar {
                date: day(t),
                open: Some(close),
                high: Some(close * (1.0 + spread)),
                low: Some(close * (1.0 - spread)),
                close: Some(close),
                volume: Some(10_000.0 + 3_000.0 * (x * 0.7).cos()),
            }
        })
        .collect();
    ohlcv_input(bars)
}

fn build(input: &SeriesInput, steps: usize) -> RegimeBase {
    RegimeBase::from_input(input, &settings(steps)).unwrap()
}

fn count(labels: &[DayLabel], label: DayLabel) -> usize {
    labels.iter().filter(|l| **l == label).count()
}

#[test]
fn test_gentle_uptrend_is_promoted_to_bull() {
    let base = build(&gentle_uptrend(), 200);
    assert!(base.model.is_none());

    let thresholds = Thresholds::derive(9.0, &base.calibration);
    for t in 19..40 {
        assert_eq!(
            volatility_vote(&base.features[t], &thresholds),
            Some(Volatility::Low),
            "bar {} should vote low-vol",
            t
        );
    }

    let labels = classify(&base, &thresholds);
    let bull = count(&labels, DayLabel::BullHighVol);
    assert!(bull >= 30, "only {} of 40 days are bull", bull);
    assert_eq!(count(&labels, DayLabel::BearHighVol), 0);
}

#[test]
fn test_gentle_uptrend_is_mostly_bull_at_default_slider() {
    let settings = settings(200);
    let base = RegimeBase::from_input(&gentle_uptrend(), &settings).unwrap();
    let thresholds = Thresholds::derive(settings.worker.default_slider, &base.calibration);

    let labels = classify(&base, &thresholds);
    let bull = count(&labels, DayLabel::BullHighVol);
    assert!(bull * 2 > labels.len(), "only {} of {} days are bull", bull, labels.len());
    assert_eq!(count(&labels, DayLabel::BearHighVol), 0);
}

#[test]
fn test_flat_series_is_range_bound() {
    let base = build(&flat_series(), 100);
    for slider in [0.0, 5.0, 10.0] {
        let overlay = run_pass(&base, slider);
        assert_eq!(overlay.segments.len(), 1);
        assert_eq!(overlay.segments[0].label, DayLabel::RangeBound);
        assert_eq!(overlay.segments[0].len(), 30);
    }
}

#[test]
fn test_identical_inputs_give_identical_segments() {
    let a = build(&mixed_regimes(160), 50);
    let b = build(&mixed_regimes(160), 50);
    for slider in [1.0, 5.0, 8.5] {
        assert_eq!(run_pass(&a, slider), run_pass(&b, slider));
    }
}

#[test]
fn test_pass_is_deterministic() {
    let base = build(&mixed_regimes(160), 50);
    let first = run_pass(&base, 6.0);
    for _ in 0..3 {
        assert_eq!(run_pass(&base, 6.0), first);
    }
}

#[test]
fn test_mixed_series_trains_a_model() {
    let base = build(&mixed_regimes(200), 50);
    let model = base.model.as_ref().expect("model should train on 200 bars");

    for row in model.hmm.transition.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-6);
    }
    assert!((model.hmm.start_prob.sum() - 1.0).abs() < 1e-6);
    for row in model.posteriors.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-6);
    }
    assert!(model.hmm.variances.iter().all(|&v| v >= 1e-6));

    let overlay = run_pass(&base, 5.0);
    let summary = overlay.summary.unwrap();
    let confidence = summary.average_confidence.unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert_eq!(summary.hmm.unwrap().observations, base.observations.len());
}

#[test]
fn test_segments_partition_the_series() {
    let base = build(&mixed_regimes(160), 50);
    for slider in 0..=10 {
        let overlay = run_pass(&base, slider as f64);
        let segments = &overlay.segments;

        assert_eq!(segments.first().unwrap().start.get(), 0);
        assert_eq!(segments.last().unwrap().end.get(), base.len() - 1);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end.get() + 1, pair[1].start.get());
            assert_ne!(pair[0].label, pair[1].label);
        }
        for s in segments {
            assert!(s.start <= s.end);
            assert!(s.start_date <= s.end_date);
        }
    }
}

#[test]
fn test_min_segment_length_after_enforcement() {
    let base = build(&mixed_regimes(160), 50);
    for step in 0..=20 {
        let thresholds = Thresholds::derive(step as f64 * 0.5, &base.calibration);
        let labels = classify(&base, &thresholds);
        let r = runs(&labels);
        assert!(
            r.len() == 1 || r.iter().all(|(s, e, _)| e - s >= thresholds.min_segment_length),
            "slider {} produced a run shorter than {}",
            thresholds.slider,
            thresholds.min_segment_length
        );
    }
}

#[test]
fn test_aggregation_round_trip() {
    let base = build(&mixed_regimes(160), 50);
    let thresholds = Thresholds::derive(7.0, &base.calibration);
    let labels = classify(&base, &thresholds);
    let (segments, summary) = aggregate(&base, &labels, &thresholds);

    let rebuilt: Vec<DayLabel> = segments.iter().flat_map(|s| std::iter::repeat(s.label).take(s.len())).collect();
    assert_eq!(rebuilt, labels);

    assert_eq!(summary.labels.iter().map(|s| s.days).sum::<usize>(), labels.len());
    assert_eq!(summary.labels.iter().map(|s| s.segments).sum::<usize>(), segments.len());
    let coverage: f64 = summary.labels.iter().map(|s| s.coverage_pct).sum();
    assert!((coverage - 100.0).abs() < 1e-9);
    for stats in &summary.labels {
        assert_eq!(stats.days, count(&labels, stats.label));
    }

    // Per-label price return compounds the daily close-to-close log returns.
    assert!(base.model.is_some());
    let closes: Vec<f64> = base.series.bars.iter().map(|b| b.close.unwrap()).collect();
    for stats in &summary.labels {
        let log_sum: f64 = (1..closes.len())
            .filter(|&t| labels[t] == stats.label)
            .map(|t| (closes[t] / closes[t - 1]).ln())
            .sum();
        let expected = log_sum.exp_m1() * 100.0;
        assert!(
            (stats.price_return_pct - expected).abs() < 1e-9,
            "{}: {} vs {}",
            stats.label,
            stats.price_return_pct,
            expected
        );
        assert_eq!(stats.strategy_return_pct, stats.price_return_pct);
    }
}

#[test]
fn test_parallel_calibration_matches_sequential() {
    let base = RegimeBase::uncalibrated(mixed_regimes(160).ingest().unwrap().0, &settings(80));
    assert!(base.model.is_some());

    let settings = settings(80).calibration;
    let sequential = calibrate(&base, &settings);
    let parallel = calibrate_parallel(&base, &settings);
    assert_eq!(sequential, parallel);
    assert!(sequential.target_normalized >= sequential.normalized_margin);
    assert!(sequential.target_normalized <= 1.0 - sequential.normalized_margin);
}

#[test]
fn test_calibration_without_model_prefers_anchor() {
    for steps in [11, 1000] {
        let base = RegimeBase::uncalibrated(flat_series().ingest().unwrap().0, &settings(steps));
        assert!(base.model.is_none());
        let settings = settings(steps).calibration;
        for calibration in [calibrate(&base, &settings), calibrate_parallel(&base, &settings)] {
            assert_eq!(calibration.best_score, 0.0);
            assert_eq!(calibration.best_slider, 5.0);
            assert!((calibration.target_normalized - 0.5).abs() < 1e-12);
            assert_eq!(calibration.steps, steps);
            assert_ne!(calibration, Calibration::neutral());
        }
    }
}

#[test]
fn test_context_reuses_base_for_closes_only_refresh() {
    let context = RegimeContext::new(settings(30));
    let input = mixed_regimes(120);
    assert_eq!(context.load(&input).unwrap(), BaseUpdate::Built);
    let before = run_pass(&context.snapshot().unwrap(), 5.0);

    let bars = input.ohlcv.clone().unwrap();
    let refresh = SeriesInput {
        dates: input.dates.clone(),
        closes: Some(bars.iter().map(|b| b.close).collect()),
        strategy_returns_pct: Some((0..bars.len()).map(|i| Some(i as f64 * 0.2)).collect()),
        ..Default::default()
    };
    assert_eq!(context.load(&refresh).unwrap(), BaseUpdate::Reused);

    let after = context.classify(5.0);
    assert_eq!(after.segments, before.segments);
    let bull_before = before.summary.unwrap();
    let bull_after = after.summary.unwrap();
    assert_eq!(bull_before.days, bull_after.days);
    assert_ne!(
        bull_before.labels.iter().map(|s| s.strategy_return_pct).collect::<Vec<_>>(),
        bull_after.labels.iter().map(|s| s.strategy_return_pct).collect::<Vec<_>>()
    );
}

#[test]
fn test_missing_dates_still_get_labels() {
    let mut input = mixed_regimes(100);
    let bars = input.ohlcv.as_mut().unwrap();
    bars.remove(50);
    bars.remove(20);

    let base = build(&input, 30);
    assert_eq!(base.len(), 100);
    let overlay = run_pass(&base, 5.0);
    assert_eq!(overlay.segments.iter().map(|s| s.len()).sum::<usize>(), 100);
}
