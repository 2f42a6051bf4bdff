//! Adaptive iteration-count calibration.
//!
//! Each size is measured as a warm-up/measured pair. The iteration count for
//! the next size is derived from the previous sample so every measurement
//! runs for roughly the target time:
//!
//! ```text
//! iters_i = round(iters_{i-1} * (s_{i-1} / s_i) * (target / time_{i-1}))
//! ```
//!
//! The sweep starts with an unrecorded probe at the first size using the
//! benchmark's baseline count, then records every requested size in order.

use crate::error::RunFailure;
use crate::measure::Executor;
use crate::sample::{CalibrationAnomaly, ResultSet, Sample};

/// Next iteration count from the previous measurement.
///
/// The result is never below 1. When `prev_time` is not a positive finite
/// number the time factor is dropped and only size scaling applies.
///
/// ```text
/// next_iterations(1000, 10, 100, 10.0, 2.0) == (500, [])
/// ```
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn next_iterations(
    prev_iterations: u64,
    prev_size: u64,
    size: u64,
    target_time: f64,
    prev_time: f64,
) -> (u64, Vec<CalibrationAnomaly>) {
    let mut anomalies = Vec::new();
    let mut computed = prev_iterations as f64 * (prev_size as f64 / size as f64);
    if prev_time > 0.0 && prev_time.is_finite() {
        computed *= target_time / prev_time;
    } else {
        anomalies.push(CalibrationAnomaly::TimeCorrectionSkipped {
            previous_time: prev_time,
        });
    }

    let rounded = computed.round();
    let iterations = if rounded.is_nan() || rounded >= u64::MAX as f64 {
        anomalies.push(CalibrationAnomaly::IterationsSaturated { computed });
        u64::MAX
    } else if rounded < 1.0 {
        anomalies.push(CalibrationAnomaly::IterationsClamped { computed });
        1
    } else {
        rounded as u64
    };
    (iterations, anomalies)
}

/// Calibration parameters shared by every sweep of a matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibrator {
    /// Desired seconds per measured sample.
    pub target_time: f64,
    /// Iterations of the warm-up run.
    pub warmup_iterations: u64,
}

impl Calibrator {
    /// Measures one warm-up/measured pair at `size`.
    ///
    /// # Errors
    ///
    /// Fails as soon as either execution fails.
    pub fn measure_pair<E: Executor + ?Sized>(
        &self,
        executor: &E,
        size: u64,
        iterations: u64,
    ) -> Result<Sample, RunFailure> {
        let warmup = executor.execute(size, self.warmup_iterations)?;
        let combined =
            executor.execute(size, self.warmup_iterations.saturating_add(iterations))?;
        let (sample, anomalies) = Sample::difference(iterations, combined, warmup);
        for anomaly in &anomalies {
            anomaly.warn();
        }
        Ok(sample)
    }

    /// Sweeps `sizes` in order, returning one sample per size.
    ///
    /// An empty size list yields an empty result set without running
    /// anything.
    ///
    /// # Errors
    ///
    /// The first failed pair aborts the sweep; no partial set is returned.
    pub fn sweep<E: Executor + ?Sized>(
        &self,
        executor: &E,
        baseline_iterations: u64,
        sizes: &[u64],
    ) -> Result<ResultSet, RunFailure> {
        let mut results = ResultSet::new();
        let Some(&first) = sizes.first() else {
            return Ok(results);
        };

        let probe_iterations = baseline_iterations.max(1);
        let probe = self.measure_pair(executor, first, probe_iterations)?;
        tracing::debug!(
            size = first,
            iterations = probe_iterations,
            time = probe.time,
            "baseline probe"
        );

        let mut prev_size = first;
        let mut prev = probe;
        for &size in sizes {
            let (iterations, anomalies) = next_iterations(
                prev.iterations,
                prev_size,
                size,
                self.target_time,
                prev.time,
            );
            for anomaly in &anomalies {
                anomaly.warn();
            }
            let sample = self.measure_pair(executor, size, iterations)?;
            tracing::debug!(size, iterations, time = sample.time, icount = sample.icount, "sample");
            results.push(size, sample);
            prev_size = size;
            prev = sample;
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Measurement;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::cell::RefCell;

    /// Deterministic executor: `size * iterations * cost` seconds and three
    /// instructions per byte-iteration, plus a fixed start-up overhead.
    struct Linear {
        cost: f64,
        calls: RefCell<Vec<(u64, u64)>>,
        fail_at: Option<u64>,
    }

    impl Linear {
        fn new(cost: f64) -> Self {
            Self {
                cost,
                calls: RefCell::new(Vec::new()),
                fail_at: None,
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    impl Executor for Linear {
        fn execute(&self, size: u64, iterations: u64) -> Result<Measurement, RunFailure> {
            self.calls.borrow_mut().push((size, iterations));
            if self.fail_at == Some(size) {
                return Err(RunFailure::NotBuilt);
            }
            Ok(Measurement {
                time: 0.5 + size as f64 * iterations as f64 * self.cost,
                icount: 1000 + 3 * size * iterations,
            })
        }
    }

    const CALIBRATOR: Calibrator = Calibrator {
        target_time: 10.0,
        warmup_iterations: 1,
    };

    #[test]
    fn reference_step_gives_500() {
        assert_eq!(next_iterations(1000, 10, 100, 10.0, 2.0), (500, vec![]));
    }

    #[rstest]
    #[case(0.0)]
    #[case(-1.5)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn unusable_previous_time_scales_by_size_only(#[case] prev_time: f64) {
        let (iters, anomalies) = next_iterations(1000, 10, 100, 10.0, prev_time);
        assert_eq!(iters, 100);
        assert!(matches!(
            anomalies.as_slice(),
            [CalibrationAnomaly::TimeCorrectionSkipped { .. }]
        ));
    }

    #[test]
    fn tiny_result_clamps_to_one() {
        let (iters, anomalies) = next_iterations(1, 1, 1000, 1.0, 100.0);
        assert_eq!(iters, 1);
        assert!(matches!(
            anomalies.as_slice(),
            [CalibrationAnomaly::IterationsClamped { .. }]
        ));
    }

    #[test]
    fn huge_result_saturates() {
        let (iters, anomalies) = next_iterations(u64::MAX, 1000, 1, 10.0, 1e-9);
        assert_eq!(iters, u64::MAX);
        assert!(matches!(
            anomalies.as_slice(),
            [CalibrationAnomaly::IterationsSaturated { .. }]
        ));
    }

    #[test]
    fn pair_subtracts_warmup() {
        let exec = Linear::new(1e-6);
        let sample = CALIBRATOR
            .measure_pair(&exec, 100, 50)
            .expect("pair succeeds");
        assert_eq!(*exec.calls.borrow(), vec![(100, 1), (100, 51)]);
        assert_eq!(sample.iterations, 50);
        assert_eq!(sample.icount, 3 * 100 * 50);
        assert!((sample.time - 100.0 * 50.0 * 1e-6).abs() < 1e-9);
    }

    #[test]
    fn sweep_records_every_size_in_request_order() {
        let exec = Linear::new(1e-6);
        let sizes = [64, 1, 4096, 8];
        let results = CALIBRATOR.sweep(&exec, 1000, &sizes).expect("sweep succeeds");
        assert!(results.covers(&sizes));
        for (size, sample) in results.iter() {
            assert_eq!(sample.icount, 3 * size * sample.iterations);
        }
    }

    #[test]
    fn sweep_converges_on_target_time() {
        let exec = Linear::new(1e-6);
        let results = CALIBRATOR
            .sweep(&exec, 1000, &[10, 100, 1000])
            .expect("sweep succeeds");
        for (_, sample) in results.iter() {
            assert!((sample.time - 10.0).abs() < 0.01, "time {}", sample.time);
        }
    }

    #[test]
    fn sweep_starts_with_baseline_probe() {
        let exec = Linear::new(1e-6);
        CALIBRATOR.sweep(&exec, 777, &[16]).expect("sweep succeeds");
        let calls = exec.calls.borrow();
        assert_eq!(calls[0], (16, 1));
        assert_eq!(calls[1], (16, 778));
        assert_eq!(calls.len(), 4);
    }

    #[test]
    fn failure_aborts_remaining_sizes() {
        let exec = Linear {
            fail_at: Some(100),
            ..Linear::new(1e-6)
        };
        let err = CALIBRATOR
            .sweep(&exec, 1000, &[10, 100, 1000])
            .expect_err("size 100 fails");
        assert!(matches!(err, RunFailure::NotBuilt));
        assert!(exec.calls.borrow().iter().all(|&(size, _)| size != 1000));
    }

    #[test]
    fn empty_sweep_runs_nothing() {
        let exec = Linear::new(1e-6);
        let results = CALIBRATOR.sweep(&exec, 1000, &[]).expect("nothing to do");
        assert!(results.is_empty());
        assert!(exec.calls.borrow().is_empty());
    }

    proptest! {
        #[test]
        fn iterations_never_below_one(
            prev_iterations in 0u64..u64::MAX,
            prev_size in 1u64..1 << 20,
            size in 1u64..1 << 20,
            target in 0.001f64..1000.0,
            prev_time in -10.0f64..1e6,
        ) {
            let (iters, _) = next_iterations(prev_iterations, prev_size, size, target, prev_time);
            prop_assert!(iters >= 1);
        }
    }
}
