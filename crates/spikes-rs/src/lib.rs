//! # Spike Analysis
//!
//! Extracts spike events from a sampled voltage trace and summarises them.
//!
//! - [`SpikeDetector`]: local peaks at or above a threshold, one per excursion
//! - [`IntervalSet`]: inter-spike intervals (ISIs)
//! - [`average_frequency`]: spikes per unit of the analysis window

use hrsync_core::{transient_cutoff, HrsyncError, IntegrationConditions, Result, Time, Trajectory};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default amplitude a peak must reach to count as a spike
pub const DEFAULT_THRESHOLD: f64 = 0.0;

/// Converts per-millisecond rates to Hz
pub const PER_SECOND: f64 = 1000.0;

// ============================================================================
// SPIKES
// ============================================================================

/// Detected spikes of one neuron: peak position and amplitude
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpikeSet {
    pub times: Vec<Time>,
    pub values: Vec<f64>,
}

impl SpikeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: Time, value: f64) {
        self.times.push(time);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// `(time, amplitude)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (Time, f64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }
}

/// Peak detector with hysteresis
///
/// A sample is a spike when it is a local peak (`v[j] <= v[j+1] >= v[j+2]`)
/// at or above `threshold`. After a spike, detection is disarmed until the
/// signal falls below the threshold again, so a wiggle that stays above the
/// threshold yields a single spike at its first peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpikeDetector {
    pub threshold: f64,
    /// Samples with `x` before this are ignored
    pub transient: Time,
}

impl Default for SpikeDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            transient: 0.0,
        }
    }
}

impl SpikeDetector {
    pub fn new(threshold: f64, transient: Time) -> Self {
        Self {
            threshold,
            transient,
        }
    }

    /// Detector that skips the transient of `cond`
    pub fn for_conditions(threshold: f64, cond: &IntegrationConditions) -> Self {
        Self::new(threshold, cond.transient)
    }

    pub fn detect(&self, x: ArrayView1<'_, Time>, values: ArrayView1<'_, f64>) -> SpikeSet {
        let mut spikes = SpikeSet::new();
        let len = x.len().min(values.len());
        let start = transient_cutoff(x, self.transient).min(len);
        if len - start < 3 {
            return spikes;
        }

        let mut armed = true;
        for j in start..len - 2 {
            let peak = values[j + 1];
            if peak >= self.threshold {
                if armed && values[j] <= peak && peak >= values[j + 2] {
                    spikes.push(x[j + 1], peak);
                    armed = false;
                }
            } else {
                armed = true;
            }
        }

        spikes
    }
}

// ============================================================================
// INTERVALS
// ============================================================================

/// Inter-spike intervals of one neuron
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalSet {
    pub intervals: Vec<Time>,
}

impl IntervalSet {
    /// Differences between consecutive spike times; empty for fewer than two spikes
    pub fn from_spikes(spikes: &SpikeSet) -> Self {
        Self {
            intervals: spikes.times.windows(2).map(|w| w[1] - w[0]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.intervals.is_empty() {
            return None;
        }
        Some(self.intervals.iter().sum::<f64>() / self.intervals.len() as f64)
    }

    /// Standard deviation over mean; 0 for perfectly regular firing
    pub fn coefficient_of_variation(&self) -> Option<f64> {
        let mean = self.mean()?;
        if mean == 0.0 {
            return None;
        }
        let variance = self
            .intervals
            .iter()
            .map(|&isi| (isi - mean).powi(2))
            .sum::<f64>()
            / self.intervals.len() as f64;
        Some(variance.sqrt() / mean)
    }
}

/// `spike_count / (x_end - transient) * scale`
///
/// An empty or negative window is a configuration error, not an infinite rate.
pub fn average_frequency(
    spike_count: usize,
    transient: Time,
    x_end: Time,
    scale: f64,
) -> Result<f64> {
    let window = x_end - transient;
    if !(window > 0.0) {
        return Err(HrsyncError::Configuration(format!(
            "analysis window is empty: x_end ({}) must exceed transient ({})",
            x_end, transient
        )));
    }
    Ok(spike_count as f64 / window * scale)
}

// ============================================================================
// PER-NEURON ANALYSIS
// ============================================================================

/// Everything extracted from one neuron's voltage trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronReport {
    pub neuron: usize,
    pub spikes: SpikeSet,
    pub intervals: IntervalSet,
    /// Average firing frequency, in the unit chosen by `scale`
    pub frequency: f64,
}

/// Run `detector` over every neuron's voltage
///
/// Frequencies are taken over `[cond.transient, cond.x_end]`.
pub fn analyze(
    trajectory: &Trajectory,
    detector: &SpikeDetector,
    cond: &IntegrationConditions,
    scale: f64,
) -> Result<Vec<NeuronReport>> {
    // fail before scanning any trace
    average_frequency(0, cond.transient, cond.x_end, scale)?;

    (0..trajectory.neuron_count())
        .map(|neuron| {
            let spikes = detector.detect(trajectory.x(), trajectory.voltage(neuron));
            let intervals = IntervalSet::from_spikes(&spikes);
            let frequency = average_frequency(spikes.len(), cond.transient, cond.x_end, scale)?;
            debug!(neuron, spikes = spikes.len(), frequency, "analysed neuron");

            Ok(NeuronReport {
                neuron,
                spikes,
                intervals,
                frequency,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn detect(values: &[f64], transient: f64, threshold: f64) -> SpikeSet {
        let x = Array1::from_iter((0..values.len()).map(|i| i as f64));
        let values = Array1::from_vec(values.to_vec());
        SpikeDetector::new(threshold, transient).detect(x.view(), values.view())
    }

    #[test]
    fn test_single_peak() {
        let spikes = detect(&[0.0, 0.0, 5.0, 0.0, 0.0], 0.0, 1.0);
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes.times, vec![2.0]);
        assert_eq!(spikes.values, vec![5.0]);
    }

    #[test]
    fn test_plateau_counts_once() {
        let spikes = detect(&[0.0, 5.0, 5.0, 5.0, 0.0], 0.0, 1.0);
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes.times, vec![1.0]);
    }

    #[test]
    fn test_wiggle_above_threshold_counts_once() {
        let spikes = detect(&[0.0, 5.0, 3.0, 6.0, 0.0], 0.0, 1.0);
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes.iter().next(), Some((1.0, 5.0)));
    }

    #[test]
    fn test_separate_excursions() {
        let spikes = detect(&[0.0, 5.0, 0.0, 4.0, 0.0, 3.0, 0.0], 0.0, 1.0);
        assert_eq!(spikes.times, vec![1.0, 3.0, 5.0]);
        assert_eq!(spikes.values, vec![5.0, 4.0, 3.0]);
    }

    #[test]
    fn test_peak_below_threshold_ignored() {
        let spikes = detect(&[0.0, 0.5, 0.0, 2.0, 0.0], 0.0, 1.0);
        assert_eq!(spikes.times, vec![3.0]);
    }

    #[test]
    fn test_peak_at_threshold_counts() {
        let spikes = detect(&[0.0, 1.0, 0.0], 0.0, 1.0);
        assert_eq!(spikes.len(), 1);
    }

    #[test]
    fn test_flat_signal_at_threshold() {
        let spikes = detect(&[1.0, 1.0, 1.0, 1.0], 0.0, 1.0);
        assert_eq!(spikes.times, vec![1.0]);
    }

    #[test]
    fn test_transient_excludes_early_peaks() {
        let values = [0.0, 5.0, 0.0, 0.0, 4.0, 0.0];
        let spikes = detect(&values, 2.0, 1.0);
        assert_eq!(spikes.times, vec![4.0]);
    }

    #[test]
    fn test_short_window_is_empty() {
        assert!(detect(&[0.0, 5.0], 0.0, 1.0).is_empty());
        assert!(detect(&[0.0, 5.0, 0.0, 5.0, 0.0], 3.0, 1.0).is_empty());
        assert!(detect(&[0.0, 5.0, 0.0], 10.0, 1.0).is_empty());
        assert!(detect(&[], 0.0, 1.0).is_empty());
    }

    #[test]
    fn test_intervals() {
        let mut spikes = SpikeSet::new();
        for t in [1.0, 3.0, 4.0, 8.0] {
            spikes.push(t, 1.0);
        }
        let isi = IntervalSet::from_spikes(&spikes);
        assert_eq!(isi.intervals, vec![2.0, 1.0, 4.0]);
        assert!((isi.mean().unwrap() - 7.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_intervals_degenerate() {
        assert!(IntervalSet::from_spikes(&SpikeSet::new()).is_empty());

        let mut one = SpikeSet::new();
        one.push(4.0, 1.0);
        let isi = IntervalSet::from_spikes(&one);
        assert_eq!(isi.len(), 0);
        assert_eq!(isi.mean(), None);
        assert_eq!(isi.coefficient_of_variation(), None);
    }

    #[test]
    fn test_coefficient_of_variation() {
        let regular = IntervalSet { intervals: vec![10.0; 9] };
        assert!(regular.coefficient_of_variation().unwrap() < 1e-12);

        let irregular = IntervalSet { intervals: vec![5.0, 15.0, 2.0, 28.0] };
        assert!(irregular.coefficient_of_variation().unwrap() > 0.5);
    }

    #[test]
    fn test_average_frequency() {
        let freq = average_frequency(10, 500.0, 1500.0, PER_SECOND).unwrap();
        assert!((freq - 10.0).abs() < 1e-9);

        assert_eq!(average_frequency(0, 500.0, 1500.0, PER_SECOND).unwrap(), 0.0);
    }

    #[test]
    fn test_average_frequency_empty_window() {
        let err = average_frequency(3, 1500.0, 1500.0, PER_SECOND).unwrap_err();
        assert!(matches!(err, HrsyncError::Configuration(_)));
        assert!(average_frequency(3, 2000.0, 1500.0, PER_SECOND).is_err());
    }

    #[test]
    fn test_analyze_trajectory() {
        let mut traj = Trajectory::allocate(2, 1, 6).unwrap();
        let first = [0.0, 2.0, 0.0, 2.0, 0.0, 2.0, 0.0];
        let second = [0.0; 7];
        for step in 0..7 {
            let state = array![[first[step], second[step]]];
            traj.record(step, step as f64, state.view());
        }

        let cond = IntegrationConditions::new(0.0, 6.0, 1.0, 0.0, 1);
        let detector = SpikeDetector::for_conditions(1.0, &cond);
        let reports = analyze(&traj, &detector, &cond, 1.0).unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].spikes.times, vec![1.0, 3.0, 5.0]);
        assert_eq!(reports[0].intervals.intervals, vec![2.0, 2.0]);
        assert!((reports[0].frequency - 0.5).abs() < 1e-12);
        assert!(reports[1].spikes.is_empty());
        assert_eq!(reports[1].frequency, 0.0);
    }

    #[test]
    fn test_analyze_rejects_empty_window() {
        let traj = Trajectory::allocate(1, 1, 2).unwrap();
        let cond = IntegrationConditions::new(0.0, 2.0, 1.0, 2.0, 1);
        let detector = SpikeDetector::for_conditions(0.0, &cond);
        assert!(analyze(&traj, &detector, &cond, PER_SECOND).is_err());
    }
}
