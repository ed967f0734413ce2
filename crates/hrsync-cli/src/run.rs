//! `hrsync run`: integrate, analyse and write results

use crate::config::SimulationConfig;
use anyhow::Context;
use clap::{Args, ValueEnum};
use colored::Colorize;
use hrsync_core::HrsyncError;
use hrsync_hindmarsh::SlowAdaptation;
use hrsync_integrate::{Integrator, Method, StageEvaluation};
use hrsync_io::{write_results, write_summary, RunSummary};
use hrsync_spikes::{analyze, NeuronReport, SpikeDetector};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Neurons listed one by one in the printed summary
const LISTED_NEURONS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Rk4,
    Euler,
}

impl From<MethodArg> for Method {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Rk4 => Method::RungeKutta4,
            MethodArg::Euler => Method::Euler,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Starting x position
    #[arg(long, allow_negative_numbers = true)]
    pub x0: Option<f64>,

    /// Final x position
    #[arg(long, allow_negative_numbers = true)]
    pub x_end: Option<f64>,

    /// Step size
    #[arg(long)]
    pub step: Option<f64>,

    /// Samples before this x are excluded from analysis
    #[arg(long, allow_negative_numbers = true)]
    pub transient: Option<f64>,

    /// Coupling graph file
    #[arg(short, long)]
    pub graph: Option<PathBuf>,

    /// Integration method
    #[arg(short, long, value_enum)]
    pub method: Option<MethodArg>,

    /// Evaluate neurons on all cores
    #[arg(long)]
    pub parallel: bool,

    /// Spike threshold
    #[arg(long, allow_negative_numbers = true)]
    pub threshold: Option<f64>,

    /// Same slow adaptation s for every neuron
    #[arg(long, allow_negative_numbers = true)]
    pub s: Option<f64>,

    /// Frequency scale (1000 gives Hz for millisecond time)
    #[arg(long)]
    pub scale: Option<f64>,

    /// Initial voltage,spiking,bursting
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub initial: Option<Vec<f64>>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Overwrite every field given on the command line
    pub fn apply(&self, config: &mut SimulationConfig) {
        if let Some(x0) = self.x0 {
            config.x0 = x0;
        }
        if let Some(x_end) = self.x_end {
            config.x_end = x_end;
        }
        if let Some(step) = self.step {
            config.step = step;
        }
        if let Some(transient) = self.transient {
            config.transient = transient;
        }
        if let Some(graph) = &self.graph {
            config.graph = Some(graph.clone());
        }
        if let Some(method) = self.method {
            config.method = method.into();
        }
        if self.parallel {
            config.evaluation = StageEvaluation::Parallel;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(s) = self.s {
            config.model.adaptation = SlowAdaptation::Constant { s };
        }
        if let Some(scale) = self.scale {
            config.frequency_scale = scale;
        }
        if let Some(initial) = &self.initial {
            config.initial_values = initial.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
    }

    pub fn resolve(&self) -> anyhow::Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::load(path)
                .with_context(|| format!("loading configuration {}", path.display()))?,
            None => SimulationConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }
}

pub fn execute(args: RunArgs) -> anyhow::Result<RunSummary> {
    let config = args.resolve()?;
    config.validate()?;
    let cond = config.conditions();
    if !(cond.analysis_window() > 0.0) {
        return Err(HrsyncError::Configuration(format!(
            "x_end ({}) must exceed transient ({})",
            cond.x_end, cond.transient
        ))
        .into());
    }

    let graph = config.coupling_graph().context("loading coupling graph")?;
    let model = config.model;
    let integrator = Integrator::new(&model, config.method).with_evaluation(config.evaluation);

    println!(
        "{} {} neuron(s), {} on [{}, {}] with step {}",
        "Hindmarsh-Rose network:".green().bold(),
        graph.vertex_count(),
        config.method,
        cond.x0,
        cond.x_end,
        cond.step
    );

    let start = Instant::now();
    let bar = progress_bar(cond.step_count());
    let trajectory =
        integrator.integrate_with_progress(&graph, &cond, |done, _| bar.set_position(done as u64));
    bar.finish_and_clear();
    let trajectory = trajectory.context("integration failed")?;

    let detector = SpikeDetector::for_conditions(config.threshold, &cond);
    let reports = analyze(&trajectory, &detector, &cond, config.frequency_scale)?;
    let elapsed = start.elapsed().as_secs_f64();
    info!(elapsed, neurons = reports.len(), "run finished");

    write_results(&config.output, &trajectory, &reports, cond.transient)
        .with_context(|| format!("writing results to {}", config.output.display()))?;
    let summary = RunSummary::new(&trajectory, integrator.stepper_name(), elapsed, &reports);
    write_summary(config.output.join("summary.json"), &summary)?;

    print_summary(&summary, &reports, &config);
    Ok(summary)
}

fn progress_bar(steps: usize) -> ProgressBar {
    let bar = ProgressBar::new(steps as u64);
    let template = "{spinner} [{bar:40}] {pos}/{len} steps ({eta})";
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

fn print_summary(summary: &RunSummary, reports: &[NeuronReport], config: &SimulationConfig) {
    println!("\tElapsed: {:.6} seconds", summary.elapsed_seconds);
    if let Some(mean) = summary.mean_frequency() {
        println!("\tAvg Frequency: {:.6} spikes/sec", mean);
    }

    for report in reports.iter().take(LISTED_NEURONS) {
        let isi = match report.intervals.mean() {
            Some(mean) => format!("{:.3}", mean),
            None => "-".to_string(),
        };
        println!(
            "  {} {:>4} spikes  {:>10.4} Hz  mean ISI {}",
            format!("neuron {:>3}", report.neuron).cyan(),
            report.spikes.len(),
            report.frequency,
            isi
        );
    }
    if reports.len() > LISTED_NEURONS {
        println!("  ... {} more in frequencies", reports.len() - LISTED_NEURONS);
    }

    println!("{} {}", "Results written to:".green().bold(), config.output.display());
}
