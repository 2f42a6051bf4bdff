//! Raw measurements, differenced samples, and per-unit result sets.

use std::fmt;

/// Totals observed from one instrumented execution.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Measurement {
    /// User plus system CPU seconds of the emulator process.
    pub time: f64,
    /// Instructions counted by the emulator plugin.
    pub icount: u64,
}

/// Oddities noticed while measuring. These are logged and do not fail a
/// sample by themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationAnomaly {
    /// The trace reported the count pattern more than once; the last was used.
    MultipleTraceMatches {
        /// Number of matching lines.
        matches: usize,
    },
    /// The combined run counted fewer instructions than the warm-up alone.
    NegativeIcount {
        /// Warm-up count.
        warmup: u64,
        /// Warm-up plus measured count.
        combined: u64,
    },
    /// The measured time came out at or below zero.
    NonPositiveTime {
        /// Differenced time in seconds.
        time: f64,
    },
    /// The previous time could not drive calibration; size scaling only.
    TimeCorrectionSkipped {
        /// Previous measured time in seconds.
        previous_time: f64,
    },
    /// The computed iteration count fell below one and was clamped.
    IterationsClamped {
        /// Unclamped value.
        computed: f64,
    },
    /// The computed iteration count did not fit and saturated.
    IterationsSaturated {
        /// Unclamped value.
        computed: f64,
    },
}

impl CalibrationAnomaly {
    /// Emits the anomaly as a warning in the current span.
    pub fn warn(&self) {
        tracing::warn!("{self}");
    }
}

impl fmt::Display for CalibrationAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultipleTraceMatches { matches } => {
                write!(f, "{matches} instruction-count lines in trace, using the last")
            }
            Self::NegativeIcount { warmup, combined } => write!(
                f,
                "combined icount {combined} below warm-up icount {warmup}, clamping to 0"
            ),
            Self::NonPositiveTime { time } => write!(f, "non-positive measured time {time}s"),
            Self::TimeCorrectionSkipped { previous_time } => write!(
                f,
                "previous time {previous_time}s unusable, scaling iterations by size only"
            ),
            Self::IterationsClamped { computed } => {
                write!(f, "computed iterations {computed} clamped to 1")
            }
            Self::IterationsSaturated { computed } => {
                write!(f, "computed iterations {computed} saturated")
            }
        }
    }
}

/// Isolated cost of the measured iterations at one input size.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Sample {
    /// Measured iterations (excluding warm-up).
    pub iterations: u64,
    /// Seconds attributable to the measured iterations.
    pub time: f64,
    /// Instructions attributable to the measured iterations.
    pub icount: u64,
}

impl Sample {
    /// Subtracts the warm-up totals from the combined totals.
    ///
    /// Both measurements must come from one paired execution of the same
    /// binary at the same size so the fixed per-invocation cost cancels.
    #[must_use]
    pub fn difference(
        iterations: u64,
        combined: Measurement,
        warmup: Measurement,
    ) -> (Self, Vec<CalibrationAnomaly>) {
        let mut anomalies = Vec::new();
        let icount = combined.icount.checked_sub(warmup.icount).unwrap_or_else(|| {
            anomalies.push(CalibrationAnomaly::NegativeIcount {
                warmup: warmup.icount,
                combined: combined.icount,
            });
            0
        });
        let time = combined.time - warmup.time;
        if time <= 0.0 {
            anomalies.push(CalibrationAnomaly::NonPositiveTime { time });
        }
        (
            Self {
                iterations,
                time,
                icount,
            },
            anomalies,
        )
    }

    /// Instructions per measured iteration.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn icount_per_iteration(&self) -> f64 {
        self.icount as f64 / self.iterations as f64
    }

    /// Nanoseconds per instruction, or `None` when nothing was counted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ns_per_instruction(&self) -> Option<f64> {
        (self.icount != 0).then(|| self.time * 1e9 / self.icount as f64)
    }
}

/// One sample per requested size, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ResultSet {
    entries: Vec<(u64, Sample)>,
}

impl ResultSet {
    /// Creates an empty result set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends the sample for `size`.
    pub fn push(&mut self, size: u64, sample: Sample) {
        self.entries.push((size, sample));
    }

    /// Sample recorded for `size`.
    #[must_use]
    pub fn get(&self, size: u64) -> Option<&Sample> {
        self.entries
            .iter()
            .find_map(|(s, sample)| (*s == size).then_some(sample))
    }

    /// Sizes in recorded order.
    pub fn sizes(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|(size, _)| *size)
    }

    /// `(size, sample)` pairs in recorded order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Sample)> + '_ {
        self.entries.iter().map(|(size, sample)| (*size, sample))
    }

    /// Number of recorded sizes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` when the recorded sizes are exactly `sizes`, in order.
    #[must_use]
    pub fn covers(&self, sizes: &[u64]) -> bool {
        self.sizes().eq(sizes.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn csv_metrics_for_reference_sample() {
        let sample = Sample {
            iterations: 500,
            time: 0.001,
            icount: 1_000_000,
        };
        assert!((sample.icount_per_iteration() - 2000.0).abs() < f64::EPSILON);
        let nspi = sample.ns_per_instruction().expect("non-zero icount");
        assert!((nspi - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_icount_has_no_ns_per_instruction() {
        let sample = Sample {
            iterations: 1,
            time: 0.5,
            icount: 0,
        };
        assert_eq!(sample.ns_per_instruction(), None);
    }

    #[test]
    fn negative_icount_clamps_and_reports() {
        let (sample, anomalies) = Sample::difference(
            10,
            Measurement {
                time: 2.0,
                icount: 5,
            },
            Measurement {
                time: 1.0,
                icount: 9,
            },
        );
        assert_eq!(sample.icount, 0);
        assert_eq!(
            anomalies,
            vec![CalibrationAnomaly::NegativeIcount {
                warmup: 9,
                combined: 5
            }]
        );
    }

    #[test]
    fn non_positive_time_is_reported_but_kept() {
        let (sample, anomalies) = Sample::difference(
            10,
            Measurement {
                time: 1.0,
                icount: 50,
            },
            Measurement {
                time: 1.25,
                icount: 10,
            },
        );
        assert!((sample.time + 0.25).abs() < f64::EPSILON);
        assert_eq!(sample.icount, 40);
        assert!(matches!(
            anomalies.as_slice(),
            [CalibrationAnomaly::NonPositiveTime { .. }]
        ));
    }

    #[test]
    fn result_set_preserves_request_order() {
        let mut set = ResultSet::new();
        let s = Sample {
            iterations: 1,
            time: 1.0,
            icount: 1,
        };
        for size in [64, 1, 8] {
            set.push(size, s);
        }
        assert_eq!(set.sizes().collect::<Vec<_>>(), vec![64, 1, 8]);
        assert!(set.covers(&[64, 1, 8]));
        assert!(!set.covers(&[1, 8, 64]));
        assert!(!set.covers(&[64, 1]));
        assert_eq!(set.get(8), Some(&s));
        assert_eq!(set.get(2), None);
    }

    proptest! {
        #[test]
        fn difference_is_linear(
            warm_icount in 0u64..1 << 40,
            extra_icount in 0u64..1 << 40,
            warm_time in 0.0f64..100.0,
            extra_time in 0.001f64..100.0,
            iterations in 1u64..1 << 32,
        ) {
            let warmup = Measurement { time: warm_time, icount: warm_icount };
            let combined = Measurement {
                time: warm_time + extra_time,
                icount: warm_icount + extra_icount,
            };
            let (sample, _) = Sample::difference(iterations, combined, warmup);
            prop_assert_eq!(sample.icount, combined.icount - warmup.icount);
            prop_assert_eq!(sample.time, combined.time - warmup.time);
            prop_assert_eq!(sample.iterations, iterations);
        }
    }
}
