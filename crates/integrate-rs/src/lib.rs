//! # Coupled Network Integration
//!
//! Fixed-step explicit integration of a whole [`NetworkModel`] at once.
//!
//! Each neuron's derivative depends on the simultaneous state of every other
//! neuron, so a step is built stage by stage:
//!
//! 1. assemble the trial snapshot for *all* neurons
//! 2. evaluate every neuron's slope against that snapshot
//! 3. only then move on to the next stage
//!
//! Step 2 may run in parallel ([`StageEvaluation::Parallel`]); the stage does
//! not return until every neuron has written its slope column.
//!
//! ## Methods
//!
//! | Method | Order | Stages |
//! |--------|-------|--------|
//! | [`Euler`] | 1 | 1 |
//! | [`RungeKutta4`] | 4 | 4 |

use hrsync_core::{CouplingGraph, IntegrationConditions, NetworkModel, Result, Time, Trajectory};
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// STAGE EVALUATION
// ============================================================================

/// How the per-neuron slopes of one stage are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageEvaluation {
    /// One neuron after another on the calling thread
    Serial,
    /// Neurons spread over the rayon thread pool
    Parallel,
}

impl Default for StageEvaluation {
    fn default() -> Self {
        Self::Serial
    }
}

/// Everything a stepper needs to evaluate one stage
pub struct StageContext<'a> {
    pub model: &'a dyn NetworkModel,
    pub graph: &'a CouplingGraph,
    pub evaluation: StageEvaluation,
}

impl StageContext<'_> {
    /// Fill `slopes` (variable x neuron) from one consistent `trial` snapshot
    ///
    /// Each neuron writes only its own column. Returns after all neurons are done.
    pub fn evaluate(
        &self,
        t: Time,
        trial: ArrayView2<'_, f64>,
        mut slopes: ArrayViewMut2<'_, f64>,
    ) {
        match self.evaluation {
            StageEvaluation::Serial => {
                for (node, column) in slopes.axis_iter_mut(Axis(1)).enumerate() {
                    self.model.derivatives(t, trial, self.graph.row(node), node, column);
                }
            }
            StageEvaluation::Parallel => {
                slopes
                    .axis_iter_mut(Axis(1))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(node, column)| {
                        self.model.derivatives(t, trial, self.graph.row(node), node, column);
                    });
            }
        }
    }
}

/// Scratch buffers reused by every step of a run
pub struct Workspace {
    trial: Array2<f64>,
    slopes: Vec<Array2<f64>>,
}

impl Workspace {
    pub fn new(state_dimension: usize, neurons: usize, stages: usize) -> Self {
        Self {
            trial: Array2::zeros((state_dimension, neurons)),
            slopes: (0..stages)
                .map(|_| Array2::zeros((state_dimension, neurons)))
                .collect(),
        }
    }
}

// ============================================================================
// STEPPERS
// ============================================================================

/// One fixed-step explicit method
pub trait Stepper: Send + Sync {
    fn name(&self) -> &'static str;

    /// Slope evaluations per step
    fn stages(&self) -> usize;

    /// Advance `state` (variable x neuron) from `t` by `h`, writing into `next`
    fn advance(
        &self,
        ctx: &StageContext<'_>,
        t: Time,
        h: Time,
        state: ArrayView2<'_, f64>,
        next: ArrayViewMut2<'_, f64>,
        work: &mut Workspace,
    );
}

/// Forward Euler, first order
#[derive(Debug, Clone, Copy, Default)]
pub struct Euler;

impl Stepper for Euler {
    fn name(&self) -> &'static str {
        "euler"
    }

    fn stages(&self) -> usize {
        1
    }

    fn advance(
        &self,
        ctx: &StageContext<'_>,
        t: Time,
        h: Time,
        state: ArrayView2<'_, f64>,
        mut next: ArrayViewMut2<'_, f64>,
        work: &mut Workspace,
    ) {
        ctx.evaluate(t, state, work.slopes[0].view_mut());
        next.assign(&state);
        next.scaled_add(h, &work.slopes[0]);
    }
}

/// Offsets of the RK4 trial points, as a fraction of the step
const RK4_NODES: [f64; 4] = [0.0, 0.5, 0.5, 1.0];

/// RK4 combination weights (1, 2, 2, 1) / 6
const RK4_WEIGHTS: [f64; 4] = [1.0 / 6.0, 2.0 / 6.0, 2.0 / 6.0, 1.0 / 6.0];

/// Classical fourth-order Runge-Kutta
#[derive(Debug, Clone, Copy, Default)]
pub struct RungeKutta4;

impl Stepper for RungeKutta4 {
    fn name(&self) -> &'static str {
        "rk4"
    }

    fn stages(&self) -> usize {
        4
    }

    fn advance(
        &self,
        ctx: &StageContext<'_>,
        t: Time,
        h: Time,
        state: ArrayView2<'_, f64>,
        mut next: ArrayViewMut2<'_, f64>,
        work: &mut Workspace,
    ) {
        for stage in 0..4 {
            // trial = base + c_stage * h * k_{stage-1}, for every neuron
            work.trial.assign(&state);
            if stage > 0 {
                work.trial.scaled_add(RK4_NODES[stage] * h, &work.slopes[stage - 1]);
            }
            ctx.evaluate(
                t + RK4_NODES[stage] * h,
                work.trial.view(),
                work.slopes[stage].view_mut(),
            );
        }

        next.assign(&state);
        for (slope, weight) in work.slopes.iter().zip(RK4_WEIGHTS) {
            next.scaled_add(weight * h, slope);
        }
    }
}

/// Integration method, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "euler")]
    Euler,
    #[serde(rename = "rk4")]
    RungeKutta4,
}

impl Method {
    pub fn stepper(&self) -> Box<dyn Stepper> {
        match self {
            Self::Euler => Box::new(Euler),
            Self::RungeKutta4 => Box::new(RungeKutta4),
        }
    }

    /// Global order of accuracy
    pub fn order(&self) -> u32 {
        match self {
            Self::Euler => 1,
            Self::RungeKutta4 => 4,
        }
    }
}

impl Default for Method {
    fn default() -> Self {
        Self::RungeKutta4
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Euler => write!(f, "Euler"),
            Self::RungeKutta4 => write!(f, "Runge-Kutta 4"),
        }
    }
}

// ============================================================================
// INTEGRATOR
// ============================================================================

/// Drives a stepper over a whole run and records every sample
pub struct Integrator<'a> {
    model: &'a dyn NetworkModel,
    stepper: Box<dyn Stepper>,
    evaluation: StageEvaluation,
}

impl<'a> Integrator<'a> {
    pub fn new(model: &'a dyn NetworkModel, method: Method) -> Self {
        Self::with_stepper(model, method.stepper())
    }

    pub fn with_stepper(model: &'a dyn NetworkModel, stepper: Box<dyn Stepper>) -> Self {
        Self {
            model,
            stepper,
            evaluation: StageEvaluation::default(),
        }
    }

    pub fn with_evaluation(mut self, evaluation: StageEvaluation) -> Self {
        self.evaluation = evaluation;
        self
    }

    pub fn stepper_name(&self) -> &'static str {
        self.stepper.name()
    }

    /// Integrate from `x0` to `x_end`
    pub fn integrate(
        &self,
        graph: &CouplingGraph,
        cond: &IntegrationConditions,
    ) -> Result<Trajectory> {
        self.integrate_with_progress(graph, cond, |_, _| {})
    }

    /// Integrate, calling `progress(done, total)` roughly every percent of the run
    ///
    /// Conditions are validated and all storage is reserved before the first step.
    #[instrument(skip_all, fields(method = self.stepper.name(), neurons = graph.vertex_count()))]
    pub fn integrate_with_progress<F>(
        &self,
        graph: &CouplingGraph,
        cond: &IntegrationConditions,
        mut progress: F,
    ) -> Result<Trajectory>
    where
        F: FnMut(usize, usize),
    {
        let dimension = self.model.state_dimension();
        cond.validate(dimension)?;

        let neurons = graph.vertex_count();
        let steps = cond.step_count();
        info!(steps, step = cond.step, x0 = cond.x0, x_end = cond.x_end, "starting integration");

        let mut trajectory = Trajectory::allocate(neurons, dimension, steps)?;
        let mut state = Array2::zeros((dimension, neurons));
        for (mut row, &value) in state.axis_iter_mut(Axis(0)).zip(&cond.initial_values) {
            row.fill(value);
        }
        let mut next = Array2::zeros((dimension, neurons));
        let mut work = Workspace::new(dimension, neurons, self.stepper.stages());
        let ctx = StageContext {
            model: self.model,
            graph,
            evaluation: self.evaluation,
        };

        let mut x = cond.x0;
        trajectory.record(0, x, state.view());

        let report_every = (steps / 100).max(1);
        let mut diverged = false;
        for step in 0..steps {
            self.stepper
                .advance(&ctx, x, cond.step, state.view(), next.view_mut(), &mut work);
            std::mem::swap(&mut state, &mut next);
            x += cond.step;
            trajectory.record(step + 1, x, state.view());

            if !diverged && state.iter().any(|v| !v.is_finite()) {
                warn!(step = step + 1, x, "state is no longer finite, step may be too large");
                diverged = true;
            }
            if (step + 1) % report_every == 0 || step + 1 == steps {
                progress(step + 1, steps);
            }
        }

        debug!(x_final = x, samples = trajectory.len(), "integration finished");
        Ok(trajectory)
    }
}

/// Integrate `model` over `graph` with `method`, serially
pub fn simulate(
    model: &dyn NetworkModel,
    graph: &CouplingGraph,
    cond: &IntegrationConditions,
    method: Method,
) -> Result<Trajectory> {
    Integrator::new(model, method).integrate(graph, cond)
}
