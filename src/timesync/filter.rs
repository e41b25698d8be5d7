//! Online clock offset filter.
//!
//! Double exponential smoothing over round-trip offset samples. The derivative of the
//! offset (skew) is estimated along with the offset itself so the estimate has no steady
//! state lag when the clocks drift at a constant rate.
//!
//! Reference: <https://en.wikipedia.org/wiki/Exponential_smoothing#Double_exponential_smoothing>
use std::time::Duration;

use typed_builder::TypedBuilder;

/// Filter and probe settings.
///
/// Smaller `alpha` values smooth the offset more but track drift more slowly. Smaller
/// `beta` values give a tighter skew estimate but react slower to skew changes, e.g.,
/// oscillator temperature changes.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(TypedBuilder, Debug, Clone, PartialEq)]
pub struct TimesyncConfig {
    /// Interval between initiating probes.
    #[builder(default = Duration::from_secs(5))]
    pub send_interval: Duration,
    /// Samples with a round-trip time at or above this are not used.
    #[builder(default = 10_000_000)]
    pub max_rtt_ns: u64,
    /// Number of high round-trip samples in a row that produce a warning.
    #[builder(default = 5)]
    pub max_consecutive_high_rtt: u32,
    /// Once converged, samples further than this from the estimate are not used.
    #[builder(default = 100_000_000)]
    pub max_deviation_ns: u64,
    /// Number of high deviation samples in a row, beyond which the filter is reset.
    #[builder(default = 5)]
    pub max_consecutive_high_deviation: u32,
    /// Number of accepted samples over which gains move from initial to final values.
    #[builder(default = 500)]
    pub convergence_window: u32,
    #[builder(default = 0.05)]
    pub alpha_initial: f64,
    #[builder(default = 0.05)]
    pub beta_initial: f64,
    #[builder(default = 0.003)]
    pub alpha_final: f64,
    #[builder(default = 0.003)]
    pub beta_final: f64,
}

impl Default for TimesyncConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TimesyncConfig {
    /// Filter gains `(alpha, beta)` to use after `sample_count` accepted samples.
    ///
    /// Gains follow a sigmoid from the initial to the final values over the convergence
    /// window and hold at the final values afterwards.
    #[must_use]
    pub fn gains(&self, sample_count: u32) -> (f64, f64) {
        if sample_count >= self.convergence_window {
            return (self.alpha_final, self.beta_final);
        }
        let progress = f64::from(sample_count) / f64::from(self.convergence_window);
        let p = 1.0 - (0.5 * (1.0 - 1.0 / (1.0 - progress))).exp();
        (
            self.alpha_initial + p * (self.alpha_final - self.alpha_initial),
            self.beta_initial + p * (self.beta_final - self.beta_initial),
        )
    }
}

/// Current clock offset estimate.
///
/// `offset_ns` is local-minus-remote, relative to the local steady clock, i.e.,
/// `remote ≈ local - offset_ns`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockOffsetEstimate {
    pub offset_ns: f64,
    pub skew_ns: f64,
    /// Samples accepted since the last reset.
    pub sample_count: u32,
    pub alpha: f64,
    pub beta: f64,
    pub consecutive_high_rtt: u32,
    pub consecutive_high_deviation: u32,
}

impl ClockOffsetEstimate {
    #[must_use]
    pub fn new(config: &TimesyncConfig) -> Self {
        let (alpha, beta) = config.gains(0);
        Self {
            offset_ns: 0.0,
            skew_ns: 0.0,
            sample_count: 0,
            alpha,
            beta,
            consecutive_high_rtt: 0,
            consecutive_high_deviation: 0,
        }
    }

    #[must_use]
    pub fn is_converged(&self, config: &TimesyncConfig) -> bool {
        self.sample_count >= config.convergence_window
    }

    /// The estimate oriented as remote-minus-local, i.e., `remote ≈ local + value`.
    #[must_use]
    pub fn remote_minus_local_ns(&self) -> f64 {
        -self.offset_ns
    }

    /// Translate a local steady clock time to remote time.
    #[must_use]
    pub fn to_remote(&self, local_ns: u64) -> u64 {
        shift(local_ns, -self.offset_ns)
    }

    /// Translate a remote time to local steady clock time.
    #[must_use]
    pub fn to_local(&self, remote_ns: u64) -> u64 {
        shift(remote_ns, self.offset_ns)
    }
}

fn shift(ns: u64, by: f64) -> u64 {
    let shifted = ns as f64 + by.round();
    if shifted <= 0.0 {
        0
    } else if shifted >= u64::MAX as f64 {
        u64::MAX
    } else {
        shifted as u64
    }
}

/// A single offset observation from a completed round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Local-minus-remote offset assuming symmetric link latency.
    pub offset_ns: i64,
    pub rtt_ns: u64,
}

impl Sample {
    /// Build a sample from a probe reply received at local time `now_ns`.
    ///
    /// `ts1` is our send time, `tc1` the remote time at which the peer replied.
    /// A send time in the future, or a negative one, yields the maximum round-trip time so
    /// the sample is never admitted.
    #[must_use]
    pub fn from_round_trip(tc1: i64, ts1: i64, now_ns: u64) -> Self {
        let offset = (i128::from(ts1) + i128::from(now_ns) - 2 * i128::from(tc1)) / 2;
        let offset_ns =
            i64::try_from(offset).unwrap_or(if offset < 0 { i64::MIN } else { i64::MAX });
        let rtt_ns = u64::try_from(ts1)
            .ok()
            .and_then(|ts1| now_ns.checked_sub(ts1))
            .unwrap_or(u64::MAX);
        Self { offset_ns, rtt_ns }
    }
}

/// Result of offering a [Sample] to the filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// The estimate was updated.
    Accepted,
    /// Round-trip time too high; `warn` is set when the run of high samples reached the
    /// warning threshold and the counter was reset.
    HighRtt { rtt_ns: u64, warn: bool },
    /// Sample too far from a converged estimate.
    HighDeviation { deviation_ns: u64 },
    /// Too many high deviation samples in a row, most likely a time jump on the remote
    /// system. The estimate has been reset.
    Reset { deviation_ns: u64 },
}

/// Offer `sample` to the filter, updating `estimate` if it is admitted.
pub fn observe(
    estimate: &mut ClockOffsetEstimate,
    sample: Sample,
    config: &TimesyncConfig,
) -> Outcome {
    if sample.rtt_ns >= config.max_rtt_ns {
        estimate.consecutive_high_rtt += 1;
        let warn = estimate.consecutive_high_rtt >= config.max_consecutive_high_rtt;
        if warn {
            estimate.consecutive_high_rtt = 0;
        }
        return Outcome::HighRtt {
            rtt_ns: sample.rtt_ns,
            warn,
        };
    }

    let deviation_ns = (estimate.offset_ns - sample.offset_ns as f64).abs() as u64;
    if estimate.is_converged(config) && deviation_ns > config.max_deviation_ns {
        estimate.consecutive_high_deviation += 1;
        if estimate.consecutive_high_deviation > config.max_consecutive_high_deviation {
            *estimate = ClockOffsetEstimate::new(config);
            return Outcome::Reset { deviation_ns };
        }
        return Outcome::HighDeviation { deviation_ns };
    }

    update(estimate, sample.offset_ns as f64, config);
    Outcome::Accepted
}

fn update(estimate: &mut ClockOffsetEstimate, raw: f64, config: &TimesyncConfig) {
    let (alpha, beta) = config.gains(estimate.sample_count);
    if estimate.sample_count == 0 {
        estimate.offset_ns = raw;
        estimate.skew_ns = 0.0;
    } else {
        let prev = estimate.offset_ns;
        estimate.offset_ns = alpha * raw + (1.0 - alpha) * (estimate.offset_ns + estimate.skew_ns);
        estimate.skew_ns = beta * (estimate.offset_ns - prev) + (1.0 - beta) * estimate.skew_ns;
    }

    estimate.sample_count = estimate.sample_count.saturating_add(1);
    (estimate.alpha, estimate.beta) = config.gains(estimate.sample_count);
    estimate.consecutive_high_rtt = 0;
    estimate.consecutive_high_deviation = 0;
}

#[cfg(test)]
mod test {
    use super::*;

    fn low_rtt(offset_ns: i64) -> Sample {
        Sample {
            offset_ns,
            rtt_ns: 1_000_000,
        }
    }

    #[test]
    fn sample_from_round_trip() {
        // remote clock is 1s behind local, 2ms symmetric rtt
        let ts1 = 10_000_000_000i64;
        let tc1 = ts1 + 1_000_000 - 1_000_000_000;
        let sample = Sample::from_round_trip(tc1, ts1, ts1 as u64 + 2_000_000);

        assert_eq!(sample.rtt_ns, 2_000_000);
        assert_eq!(sample.offset_ns, 1_000_000_000);
    }

    #[test]
    fn sample_from_the_future_is_never_admitted() {
        let sample = Sample::from_round_trip(5, 2_000, 1_000);
        assert_eq!(sample.rtt_ns, u64::MAX);

        let sample = Sample::from_round_trip(5, -1, 1_000);
        assert_eq!(sample.rtt_ns, u64::MAX);
    }

    #[test]
    fn gains_are_scheduled() {
        let config = TimesyncConfig::default();

        assert_eq!(config.gains(0), (0.05, 0.05));
        assert_eq!(config.gains(500), (0.003, 0.003));
        assert_eq!(config.gains(10_000), (0.003, 0.003));

        let mut last = config.gains(0).0;
        for n in 1..500 {
            let (alpha, beta) = config.gains(n);
            assert!(alpha < 0.05 && alpha >= 0.003, "alpha={alpha} at {n}");
            assert!(beta < 0.05 && beta >= 0.003, "beta={beta} at {n}");
            // the sigmoid saturates to the final gain in f64 just before the window ends
            if n < 450 {
                assert!(alpha > 0.003, "alpha={alpha} at {n}");
            }
            assert!(alpha <= last, "alpha not monotonic at {n}");
            last = alpha;
        }
    }

    #[test]
    fn first_sample_initializes_offset() {
        let config = TimesyncConfig::default();
        let mut est = ClockOffsetEstimate::new(&config);

        assert_eq!(observe(&mut est, low_rtt(12_345), &config), Outcome::Accepted);

        assert_eq!(est.offset_ns, 12_345.0);
        assert_eq!(est.skew_ns, 0.0);
        assert_eq!(est.sample_count, 1);
        assert_eq!((est.alpha, est.beta), config.gains(1));
    }

    #[test]
    fn smoothing_update() {
        let config = TimesyncConfig::default();
        let mut est = ClockOffsetEstimate::new(&config);
        observe(&mut est, low_rtt(1_000), &config);
        let (alpha, beta) = config.gains(1);

        observe(&mut est, low_rtt(2_000), &config);

        let expected = alpha * 2_000.0 + (1.0 - alpha) * 1_000.0;
        assert!((est.offset_ns - expected).abs() < 1e-9);
        assert!((est.skew_ns - beta * (expected - 1_000.0)).abs() < 1e-9);
    }

    #[test]
    fn high_rtt_leaves_estimate_untouched() {
        let config = TimesyncConfig::default();
        let mut est = ClockOffsetEstimate::new(&config);
        observe(&mut est, low_rtt(1_000), &config);
        let before = est;

        let zult = observe(
            &mut est,
            Sample {
                offset_ns: 9_999_999,
                rtt_ns: config.max_rtt_ns,
            },
            &config,
        );

        assert_eq!(
            zult,
            Outcome::HighRtt {
                rtt_ns: config.max_rtt_ns,
                warn: false
            }
        );
        assert_eq!(est.offset_ns, before.offset_ns);
        assert_eq!(est.skew_ns, before.skew_ns);
        assert_eq!(est.sample_count, before.sample_count);
        assert_eq!(est.consecutive_high_rtt, 1);
    }

    #[test]
    fn high_rtt_warning_resets_counter() {
        let config = TimesyncConfig::default();
        let mut est = ClockOffsetEstimate::new(&config);
        let high = Sample {
            offset_ns: 0,
            rtt_ns: 50_000_000,
        };

        let warnings: Vec<bool> = (0..5)
            .map(|_| match observe(&mut est, high, &config) {
                Outcome::HighRtt { warn, .. } => warn,
                other => panic!("unexpected {other:?}"),
            })
            .collect();

        assert_eq!(warnings, vec![false, false, false, false, true]);
        assert_eq!(est.consecutive_high_rtt, 0);
    }

    #[test]
    fn accepted_sample_clears_high_rtt_run() {
        let config = TimesyncConfig::default();
        let mut est = ClockOffsetEstimate::new(&config);
        let high = Sample {
            offset_ns: 0,
            rtt_ns: 50_000_000,
        };
        for _ in 0..4 {
            observe(&mut est, high, &config);
        }
        observe(&mut est, low_rtt(0), &config);

        assert_eq!(est.consecutive_high_rtt, 0);
        assert_eq!(
            observe(&mut est, high, &config),
            Outcome::HighRtt {
                rtt_ns: 50_000_000,
                warn: false
            }
        );
    }

    #[test]
    fn deviation_is_ignored_until_converged() {
        let config = TimesyncConfig::builder().convergence_window(10).build();
        let mut est = ClockOffsetEstimate::new(&config);
        observe(&mut est, low_rtt(0), &config);

        assert_eq!(
            observe(&mut est, low_rtt(1_000_000_000), &config),
            Outcome::Accepted
        );
    }

    #[test]
    fn sustained_deviation_resets_filter() {
        let config = TimesyncConfig::builder().convergence_window(10).build();
        let mut est = ClockOffsetEstimate::new(&config);
        for _ in 0..10 {
            observe(&mut est, low_rtt(0), &config);
        }
        assert!(est.is_converged(&config));

        for n in 1..=5 {
            assert_eq!(
                observe(&mut est, low_rtt(1_000_000_000), &config),
                Outcome::HighDeviation {
                    deviation_ns: 1_000_000_000
                },
                "sample {n}"
            );
        }
        assert_eq!(est.sample_count, 10);

        assert_eq!(
            observe(&mut est, low_rtt(1_000_000_000), &config),
            Outcome::Reset {
                deviation_ns: 1_000_000_000
            }
        );
        assert_eq!(est, ClockOffsetEstimate::new(&config));
    }

    #[test]
    fn translation_uses_offset_sign() {
        let config = TimesyncConfig::default();
        let mut est = ClockOffsetEstimate::new(&config);
        observe(&mut est, low_rtt(1_000), &config);

        assert_eq!(est.to_remote(10_000), 9_000);
        assert_eq!(est.to_local(9_000), 10_000);
        assert_eq!(est.to_remote(500), 0);
        assert_eq!(est.remote_minus_local_ns(), -1_000.0);
    }
}
