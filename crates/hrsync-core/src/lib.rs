//! # HRSync Core
//!
//! Shared types for simulating networks of coupled oscillators.
//!
//! ## Data Flow
//!
//! | Stage | Type | Produced by |
//! |-------|------|-------------|
//! | Topology | [`CouplingGraph`] | graph file / constructors |
//! | Bounds | [`IntegrationConditions`] | command line / config file |
//! | Dynamics | [`NetworkModel`] | model crates (e.g. Hindmarsh-Rose) |
//! | Result | [`Trajectory`] | integrator |
//!
//! ## Design Philosophy
//!
//! 1. Reject invalid input before any computation starts
//! 2. One owner per buffer: the trajectory holds every sample
//! 3. Models are pure functions of a state snapshot

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad failure class, used to pick a process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Invalid input, rejected before computation
    Configuration,
    /// Storage could not be reserved
    Resource,
    /// Reading or writing files failed
    Io,
}

/// Common errors
#[derive(Debug, Error)]
pub enum HrsyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid coupling graph: {0}")]
    InvalidGraph(String),

    #[error("Dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        got: usize,
    },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl HrsyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_)
            | Self::InvalidGraph(_)
            | Self::DimensionMismatch { .. }
            | Self::ParseError(_) => ErrorKind::Configuration,
            Self::ResourceExhausted(_) => ErrorKind::Resource,
            Self::IoError(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, HrsyncError>;

/// Independent variable (time-like)
pub type Time = f64;

/// Membrane voltage (dimensionless in the Hindmarsh-Rose scaling)
pub type Voltage = f64;

/// Row of the voltage variable in every state snapshot
pub const VOLTAGE: usize = 0;

// ============================================================================
// COUPLING GRAPH
// ============================================================================

/// Square matrix of coupling weights between neurons
///
/// Row `i` holds the strengths from neuron `i` to every other neuron.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct CouplingGraph {
    weights: Array2<f64>,
}

impl CouplingGraph {
    /// Validate and wrap a weight matrix
    pub fn new(weights: Array2<f64>) -> Result<Self> {
        let (rows, cols) = weights.dim();
        if rows == 0 {
            return Err(HrsyncError::InvalidGraph(
                "vertex count must be at least 1".into(),
            ));
        }
        if rows != cols {
            return Err(HrsyncError::InvalidGraph(format!(
                "weight matrix is {}x{}, expected a square matrix",
                rows, cols
            )));
        }
        if let Some(((i, j), w)) = weights.indexed_iter().find(|(_, w)| !w.is_finite()) {
            return Err(HrsyncError::InvalidGraph(format!(
                "weight ({}, {}) is not finite: {}",
                i, j, w
            )));
        }
        Ok(Self { weights })
    }

    /// Build from nested rows, checking that every row has `rows.len()` entries
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = rows.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n) {
            return Err(HrsyncError::InvalidGraph(format!(
                "row {} has {} columns, expected {}",
                i,
                row.len(),
                n
            )));
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((n, n), flat)
            .map_err(|e| HrsyncError::InvalidGraph(e.to_string()))?;
        Self::new(weights)
    }

    /// `n` neurons with no coupling at all
    pub fn uncoupled(n: usize) -> Result<Self> {
        Self::new(Array2::zeros((n, n)))
    }

    /// Every pair coupled with the same strength, zero diagonal
    pub fn all_to_all(n: usize, strength: f64) -> Result<Self> {
        let mut weights = Array2::from_elem((n, n), strength);
        weights.diag_mut().fill(0.0);
        Self::new(weights)
    }

    /// Replace the diagonal (self-weights) with `value`
    pub fn with_self_weights(mut self, value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(HrsyncError::InvalidGraph(format!(
                "self-weight is not finite: {}",
                value
            )));
        }
        self.weights.diag_mut().fill(value);
        Ok(self)
    }

    pub fn vertex_count(&self) -> usize {
        self.weights.nrows()
    }

    pub fn weight(&self, from: usize, to: usize) -> f64 {
        self.weights[[from, to]]
    }

    /// Coupling row of one neuron
    pub fn row(&self, neuron: usize) -> ArrayView1<'_, f64> {
        self.weights.row(neuron)
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn is_symmetric(&self) -> bool {
        self.weights == self.weights.t()
    }
}

impl TryFrom<Vec<Vec<f64>>> for CouplingGraph {
    type Error = HrsyncError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self> {
        Self::from_rows(rows)
    }
}

impl From<CouplingGraph> for Vec<Vec<f64>> {
    fn from(graph: CouplingGraph) -> Self {
        graph.weights.rows().into_iter().map(|r| r.to_vec()).collect()
    }
}

// ============================================================================
// INTEGRATION CONDITIONS
// ============================================================================

/// Bounds of one integration run
///
/// The same initial values are applied to every neuron.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConditions {
    /// Starting x position
    pub x0: Time,
    /// Final x position
    pub x_end: Time,
    /// Size of each step
    pub step: Time,
    /// Samples before this x are discarded for analysis
    pub transient: Time,
    /// Initial value of each state variable
    pub initial_values: Vec<f64>,
}

impl IntegrationConditions {
    /// Conditions with every initial value set to zero
    pub fn new(x0: Time, x_end: Time, step: Time, transient: Time, state_dimension: usize) -> Self {
        Self {
            x0,
            x_end,
            step,
            transient,
            initial_values: vec![0.0; state_dimension],
        }
    }

    pub fn with_initial_values(mut self, values: Vec<f64>) -> Self {
        self.initial_values = values;
        self
    }

    /// Check every invariant an integrator relies on
    pub fn validate(&self, state_dimension: usize) -> Result<()> {
        if !self.x0.is_finite() || !self.x_end.is_finite() {
            return Err(HrsyncError::Configuration(format!(
                "x0 ({}) and x_end ({}) must be finite",
                self.x0, self.x_end
            )));
        }
        if !(self.step > 0.0) || !self.step.is_finite() {
            return Err(HrsyncError::Configuration(format!(
                "step must be positive and finite, got {}",
                self.step
            )));
        }
        if self.x_end < self.x0 {
            return Err(HrsyncError::Configuration(format!(
                "x_end ({}) precedes x0 ({})",
                self.x_end, self.x0
            )));
        }
        if self.transient.is_nan() {
            return Err(HrsyncError::Configuration("transient is NaN".into()));
        }
        if self.initial_values.len() != state_dimension {
            return Err(HrsyncError::DimensionMismatch {
                what: "initial values".into(),
                expected: state_dimension,
                got: self.initial_values.len(),
            });
        }
        if let Some(v) = self.initial_values.iter().find(|v| !v.is_finite()) {
            return Err(HrsyncError::Configuration(format!(
                "initial value is not finite: {}",
                v
            )));
        }
        Ok(())
    }

    /// `ceil((x_end - x0) / step)`
    pub fn step_count(&self) -> usize {
        ((self.x_end - self.x0) / self.step).ceil() as usize
    }

    /// Width of the analysis window after the transient
    pub fn analysis_window(&self) -> Time {
        self.x_end - self.transient
    }
}

impl Default for IntegrationConditions {
    fn default() -> Self {
        Self::new(0.0, 2000.0, 0.1, 500.0, 3)
    }
}

// ============================================================================
// NETWORK MODEL
// ============================================================================

/// Coupled ODE network: each node's derivative may depend on every node
pub trait NetworkModel: Send + Sync {
    /// State variables per node
    fn state_dimension(&self) -> usize;

    /// Write `node`'s derivatives into `out`
    ///
    /// `state` has one row per state variable and one column per node.
    /// `weights` is the node's row of the coupling graph. Implementations
    /// must only read `state`, so nodes can be evaluated in any order.
    fn derivatives(
        &self,
        t: Time,
        state: ArrayView2<'_, f64>,
        weights: ArrayView1<'_, f64>,
        node: usize,
        out: ArrayViewMut1<'_, f64>,
    );
}

// ============================================================================
// TRAJECTORY
// ============================================================================

/// Sampled solution of a network run
///
/// Single owner of all sample storage. Access values using
/// `approx[[neuron, variable, step]]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    x: Array1<Time>,
    approx: Array3<f64>,
}

impl Trajectory {
    /// Reserve storage for `step_count + 1` samples of every variable
    ///
    /// Fails with [`HrsyncError::ResourceExhausted`] instead of aborting
    /// when the buffers cannot be reserved.
    pub fn allocate(neurons: usize, state_dimension: usize, step_count: usize) -> Result<Self> {
        let samples = step_count.checked_add(1).ok_or_else(|| {
            let msg = format!("{} steps overflow the sample count", step_count);
            HrsyncError::ResourceExhausted(msg)
        })?;
        let cells = neurons
            .checked_mul(state_dimension)
            .and_then(|c| c.checked_mul(samples))
            .ok_or_else(|| {
                HrsyncError::ResourceExhausted(format!(
                    "{} neurons x {} variables x {} samples overflows",
                    neurons, state_dimension, samples
                ))
            })?;

        let x = Array1::from_vec(zeroed_buffer(samples, "x samples")?);
        let approx = Array3::from_shape_vec(
            (neurons, state_dimension, samples),
            zeroed_buffer(cells, "state samples")?,
        )
        .map_err(|e| HrsyncError::ResourceExhausted(format!("trajectory layout: {}", e)))?;

        Ok(Self { x, approx })
    }

    pub fn neuron_count(&self) -> usize {
        self.approx.dim().0
    }

    pub fn state_dimension(&self) -> usize {
        self.approx.dim().1
    }

    /// Number of samples (`step_count + 1`)
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.len().saturating_sub(1)
    }

    /// Independent-variable samples shared by all neurons
    pub fn x(&self) -> ArrayView1<'_, Time> {
        self.x.view()
    }

    /// One state variable of one neuron across all samples
    pub fn series(&self, neuron: usize, variable: usize) -> ArrayView1<'_, f64> {
        self.approx.slice(s![neuron, variable, ..])
    }

    pub fn voltage(&self, neuron: usize) -> ArrayView1<'_, f64> {
        self.series(neuron, VOLTAGE)
    }

    /// Every neuron's state at one sample, shaped `(neuron, variable)`
    pub fn state_at(&self, step: usize) -> ArrayView2<'_, f64> {
        self.approx.slice(s![.., .., step])
    }

    pub fn approx(&self) -> &Array3<f64> {
        &self.approx
    }

    /// Store a sample; `state` is shaped `(variable, neuron)`
    pub fn record(&mut self, step: usize, x: Time, state: ArrayView2<'_, f64>) {
        self.x[step] = x;
        self.approx.slice_mut(s![.., .., step]).assign(&state.t());
    }

    /// Samples of one variable at or after `transient`
    pub fn time_series(&self, neuron: usize, variable: usize, transient: Time) -> TimeSeries {
        let start = transient_cutoff(self.x.view(), transient);
        let mut ts = TimeSeries::new();
        for (&t, &v) in self
            .x
            .slice(s![start..])
            .iter()
            .zip(self.series(neuron, variable).slice(s![start..]).iter())
        {
            ts.push(t, v);
        }
        ts
    }
}

/// `len` zeros, or [`HrsyncError::ResourceExhausted`] if they cannot be reserved
pub fn zeroed_buffer(len: usize, what: &str) -> Result<Vec<f64>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| HrsyncError::ResourceExhausted(format!("{} ({} values): {}", what, len, e)))?;
    buffer.resize(len, 0.0);
    Ok(buffer)
}

/// First index whose `x` is at or after `transient`, or `x.len()` if none
pub fn transient_cutoff(x: ArrayView1<'_, Time>, transient: Time) -> usize {
    x.iter().position(|&xi| xi >= transient).unwrap_or(x.len())
}

// ============================================================================
// TIME SERIES
// ============================================================================

/// Time series data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Time points
    pub time: Vec<Time>,
    /// Values at each time point
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, t: Time, v: f64) {
        self.time.push(t);
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_graph_rejects_non_square() {
        let err = CouplingGraph::new(Array2::zeros((2, 3))).unwrap_err();
        assert!(matches!(err, HrsyncError::InvalidGraph(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_graph_rejects_empty() {
        assert!(CouplingGraph::uncoupled(0).is_err());
        assert!(CouplingGraph::from_rows(vec![]).is_err());
    }

    #[test]
    fn test_graph_rejects_ragged_rows() {
        let rows = vec![vec![0.0, 1.0], vec![1.0]];
        assert!(CouplingGraph::from_rows(rows).is_err());
    }

    #[test]
    fn test_graph_rejects_nan_weight() {
        let err = CouplingGraph::new(array![[0.0, f64::NAN], [1.0, 0.0]]).unwrap_err();
        assert!(err.to_string().contains("not finite"));
    }

    #[test]
    fn test_all_to_all_graph() {
        let graph = CouplingGraph::all_to_all(4, 0.25).unwrap();
        assert_eq!(graph.vertex_count(), 4);
        assert_eq!(graph.weight(0, 0), 0.0);
        assert_eq!(graph.weight(1, 3), 0.25);
        assert!(graph.is_symmetric());

        let graph = graph.with_self_weights(4.0).unwrap();
        assert_eq!(graph.weight(2, 2), 4.0);
    }

    #[test]
    fn test_graph_row_access() {
        let graph = CouplingGraph::from_rows(vec![vec![0.0, 0.5], vec![0.1, 0.0]]).unwrap();
        assert_eq!(graph.row(1).to_vec(), vec![0.1, 0.0]);
        assert!(!graph.is_symmetric());
    }

    #[test]
    fn test_conditions_validation() {
        let cond = IntegrationConditions::new(0.0, 10.0, 0.1, 5.0, 3);
        assert!(cond.validate(3).is_ok());

        let zero_step = IntegrationConditions { step: 0.0, ..cond.clone() };
        assert!(matches!(zero_step.validate(3), Err(HrsyncError::Configuration(_))));

        let negative_step = IntegrationConditions { step: -0.1, ..cond.clone() };
        assert!(negative_step.validate(3).is_err());

        let reversed = IntegrationConditions { x_end: -1.0, ..cond.clone() };
        assert!(reversed.validate(3).is_err());

        match cond.validate(2) {
            Err(HrsyncError::DimensionMismatch { expected, got, .. }) => {
                assert_eq!(expected, 2);
                assert_eq!(got, 3);
            }
            other => panic!("expected dimension mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_step_count_rounds_up() {
        let cond = IntegrationConditions::new(0.0, 1.0, 0.3, 0.0, 1);
        assert_eq!(cond.step_count(), 4);

        let exact = IntegrationConditions::new(0.0, 10.0, 0.5, 0.0, 1);
        assert_eq!(exact.step_count(), 20);

        let empty = IntegrationConditions::new(2.0, 2.0, 0.5, 0.0, 1);
        assert_eq!(empty.step_count(), 0);
    }

    #[test]
    fn test_trajectory_record() {
        let mut traj = Trajectory::allocate(2, 3, 4).unwrap();
        assert_eq!(traj.len(), 5);
        assert_eq!(traj.step_count(), 4);
        assert_eq!(traj.neuron_count(), 2);
        assert_eq!(traj.state_dimension(), 3);

        // rows are variables, columns are neurons
        let state = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        traj.record(1, 0.5, state.view());

        assert_eq!(traj.x()[1], 0.5);
        assert_eq!(traj.voltage(1)[1], 2.0);
        assert_eq!(traj.series(0, 2)[1], 5.0);
        assert_eq!(traj.state_at(1), array![[1.0, 3.0, 5.0], [2.0, 4.0, 6.0]]);
    }

    #[test]
    fn test_trajectory_allocation_overflow() {
        let err = Trajectory::allocate(usize::MAX, 3, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);

        let err = Trajectory::allocate(1, 1, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);

        // fits in usize but not in memory
        let err = Trajectory::allocate(1 << 20, 1 << 20, 1 << 20).unwrap_err();
        assert!(matches!(err, HrsyncError::ResourceExhausted(_)));
    }

    #[test]
    fn test_transient_cutoff() {
        let x = array![0.0, 1.0, 2.0, 3.0];
        assert_eq!(transient_cutoff(x.view(), 0.0), 0);
        assert_eq!(transient_cutoff(x.view(), 1.5), 2);
        assert_eq!(transient_cutoff(x.view(), 3.0), 3);
        assert_eq!(transient_cutoff(x.view(), 10.0), 4);
    }

    #[test]
    fn test_time_series_after_transient() {
        let mut traj = Trajectory::allocate(1, 1, 3).unwrap();
        for step in 0..4 {
            let value = array![[step as f64 * 10.0]];
            traj.record(step, step as f64, value.view());
        }

        let ts = traj.time_series(0, 0, 2.0);
        assert_eq!(ts.len(), 2);
        assert_eq!(ts.time, vec![2.0, 3.0]);
        assert_eq!(ts.values, vec![20.0, 30.0]);
    }

    #[test]
    fn test_time_series() {
        let mut ts = TimeSeries::new();
        ts.push(0.0, -65.0);
        ts.push(0.1, -64.0);
        assert_eq!(ts.len(), 2);
        assert_eq!(ts.values, vec![-65.0, -64.0]);
    }

    #[test]
    fn test_zeroed_buffer_reports_exhaustion() {
        assert_eq!(zeroed_buffer(4, "test").unwrap(), vec![0.0; 4]);

        let err = zeroed_buffer(usize::MAX / 2, "huge").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
    }
}
