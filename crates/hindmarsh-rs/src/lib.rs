//! # Hindmarsh-Rose Network
//!
//! Three-variable bursting neuron (Hindmarsh & Rose, 1984) with diffusive
//! coupling through a weighted graph.
//!
//! ```text
//! dx/dt = y - x³ + 3x² - z + I - Σ_{j≠i} w_ij (x_i - x_j)
//! dy/dt = 1 - 5x² - y
//! dz/dt = r (s_i (x - x_R) - z)
//! ```
//!
//! - x: membrane voltage
//! - y: spiking (fast recovery) variable
//! - z: bursting (slow adaptation) variable
//!
//! The coupling term is the *synchronization factor*: every neuron is pulled
//! toward the voltages of the neurons it is connected to.

use hrsync_core::{NetworkModel, Time, Voltage, VOLTAGE};
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1};
use serde::{Deserialize, Serialize};

/// Resting voltage x_R
pub const X_REST: f64 = -1.56;

/// Slow time scale r
pub const R: f64 = 0.006;

/// External drive current I
pub const CURRENT: f64 = 3.1;

/// Row of the spiking variable in a state snapshot
pub const SPIKING: usize = 1;

/// Row of the bursting variable in a state snapshot
pub const BURSTING: usize = 2;

/// Voltage, spiking and bursting
pub const STATE_DIMENSION: usize = 3;

/// Policy for the per-neuron slow-adaptation parameter `s_i`
///
/// Every variant is a pure function of the neuron index, the neuron count and
/// the neuron's coupling row, so runs are reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SlowAdaptation {
    /// Same value for every neuron
    Constant { s: f64 },
    /// Diagonal entry `w_ii` of the coupling graph
    SelfWeight,
    /// Spread evenly from `from` (first neuron) to `to` (last neuron)
    Linear { from: f64, to: f64 },
}

impl SlowAdaptation {
    /// `s_i` for one neuron
    pub fn value(&self, node: usize, neuron_count: usize, weights: ArrayView1<'_, f64>) -> f64 {
        match *self {
            Self::Constant { s } => s,
            Self::SelfWeight => weights[node],
            Self::Linear { from, to } => {
                if neuron_count <= 1 {
                    from
                } else {
                    from + (to - from) * node as f64 / (neuron_count - 1) as f64
                }
            }
        }
    }
}

impl Default for SlowAdaptation {
    fn default() -> Self {
        Self::SelfWeight
    }
}

/// Hindmarsh-Rose parameters, fixed for the lifetime of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HindmarshRose {
    /// Resting voltage x_R
    pub x_rest: f64,
    /// Slow time scale r
    pub r: f64,
    /// External drive current I
    pub current: f64,
    /// How `s_i` is chosen
    pub adaptation: SlowAdaptation,
}

impl Default for HindmarshRose {
    fn default() -> Self {
        Self {
            x_rest: X_REST,
            r: R,
            current: CURRENT,
            adaptation: SlowAdaptation::default(),
        }
    }
}

impl HindmarshRose {
    pub fn new(adaptation: SlowAdaptation) -> Self {
        Self {
            adaptation,
            ..Self::default()
        }
    }

    pub fn with_current(mut self, current: f64) -> Self {
        self.current = current;
        self
    }

    /// Uncoupled right-hand side for one neuron
    pub fn local_derivatives(&self, x: Voltage, y: f64, z: f64, s: f64) -> [f64; STATE_DIMENSION] {
        [
            y - x * x * x + 3.0 * x * x - z + self.current,
            1.0 - 5.0 * x * x - y,
            self.r * (s * (x - self.x_rest) - z),
        ]
    }
}

/// Synchronization factor of `node`: `Σ_{j≠node} w_j (v_node - v_j)`
///
/// The self-weight is never used.
pub fn sync_factor(
    voltages: ArrayView1<'_, Voltage>,
    weights: ArrayView1<'_, f64>,
    node: usize,
) -> f64 {
    let own = voltages[node];
    voltages
        .iter()
        .zip(weights.iter())
        .enumerate()
        .filter(|&(j, _)| j != node)
        .map(|(_, (&v, &w))| w * (own - v))
        .sum()
}

impl NetworkModel for HindmarshRose {
    fn state_dimension(&self) -> usize {
        STATE_DIMENSION
    }

    fn derivatives(
        &self,
        _t: Time,
        state: ArrayView2<'_, f64>,
        weights: ArrayView1<'_, f64>,
        node: usize,
        mut out: ArrayViewMut1<'_, f64>,
    ) {
        let x = state[[VOLTAGE, node]];
        let y = state[[SPIKING, node]];
        let z = state[[BURSTING, node]];
        let s = self.adaptation.value(node, state.ncols(), weights);

        let [dx, dy, dz] = self.local_derivatives(x, y, z, s);
        out[VOLTAGE] = dx - sync_factor(state.row(VOLTAGE), weights, node);
        out[SPIKING] = dy;
        out[BURSTING] = dz;
    }
}
