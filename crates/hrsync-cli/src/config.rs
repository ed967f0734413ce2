//! Run configuration
//!
//! Read from an optional JSON file; every field is optional and falls back to
//! [`SimulationConfig::default`]. Command-line flags are applied on top.

use hrsync_core::{CouplingGraph, HrsyncError, IntegrationConditions, Result, Time};
use hrsync_hindmarsh::{HindmarshRose, STATE_DIMENSION};
use hrsync_integrate::{Method, StageEvaluation};
use hrsync_spikes::{DEFAULT_THRESHOLD, PER_SECOND};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Self-weight of the lone neuron simulated when no graph file is given
pub const SINGLE_NEURON_S: f64 = 3.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub x0: Time,
    pub x_end: Time,
    pub step: Time,
    pub transient: Time,
    /// Voltage, spiking, bursting; shared by every neuron
    pub initial_values: Vec<f64>,
    pub method: Method,
    pub evaluation: StageEvaluation,
    pub threshold: f64,
    pub frequency_scale: f64,
    pub model: HindmarshRose,
    /// Coupling graph file; a single uncoupled neuron when absent
    pub graph: Option<PathBuf>,
    pub output: PathBuf,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let cond = IntegrationConditions::default();
        Self {
            x0: cond.x0,
            x_end: cond.x_end,
            step: cond.step,
            transient: cond.transient,
            initial_values: vec![0.0; STATE_DIMENSION],
            method: Method::default(),
            evaluation: StageEvaluation::default(),
            threshold: DEFAULT_THRESHOLD,
            frequency_scale: PER_SECOND,
            model: HindmarshRose::default(),
            graph: None,
            output: PathBuf::from("Out"),
        }
    }
}

impl SimulationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| HrsyncError::Configuration(format!("{}: {}", path.display(), e)))
    }

    /// Analysis settings; integration bounds are checked by [`IntegrationConditions::validate`]
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() {
            return Err(HrsyncError::Configuration(format!(
                "spike threshold must be finite, got {}",
                self.threshold
            )));
        }
        if !self.frequency_scale.is_finite() {
            return Err(HrsyncError::Configuration(format!(
                "frequency scale must be finite, got {}",
                self.frequency_scale
            )));
        }
        Ok(())
    }

    pub fn conditions(&self) -> IntegrationConditions {
        IntegrationConditions::new(self.x0, self.x_end, self.step, self.transient, STATE_DIMENSION)
            .with_initial_values(self.initial_values.clone())
    }

    pub fn coupling_graph(&self) -> Result<CouplingGraph> {
        match &self.graph {
            Some(path) => hrsync_io::read_graph(path),
            None => CouplingGraph::uncoupled(1)?.with_self_weights(SINGLE_NEURON_S),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrsync_core::ErrorKind;
    use hrsync_hindmarsh::SlowAdaptation;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.threshold, 0.0);
        assert_eq!(config.frequency_scale, 1000.0);
        assert_eq!(config.method, Method::RungeKutta4);
        assert_eq!(config.initial_values, vec![0.0; 3]);
        assert!(config.conditions().validate(STATE_DIMENSION).is_ok());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "x_end": 1000.0,
            "method": "euler",
            "evaluation": "parallel",
            "model": { "adaptation": { "policy": "constant", "s": 4.0 } }
        }"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.x_end, 1000.0);
        assert_eq!(config.step, 0.1);
        assert_eq!(config.method, Method::Euler);
        assert_eq!(config.evaluation, StageEvaluation::Parallel);
        assert_eq!(config.model.adaptation, SlowAdaptation::Constant { s: 4.0 });
        assert_eq!(config.model.current, 3.1);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(serde_json::from_str::<SimulationConfig>(r#"{ "stepsize": 0.1 }"#).is_err());

        let model_typo = r#"{ "model": { "curent": 5.0 } }"#;
        assert!(serde_json::from_str::<SimulationConfig>(model_typo).is_err());
    }

    #[test]
    fn test_validate_analysis_settings() {
        assert!(SimulationConfig::default().validate().is_ok());

        let nan_threshold = SimulationConfig {
            threshold: f64::NAN,
            ..SimulationConfig::default()
        };
        let err = nan_threshold.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let infinite_scale = SimulationConfig {
            frequency_scale: f64::INFINITY,
            ..SimulationConfig::default()
        };
        assert!(infinite_scale.validate().is_err());
    }

    #[test]
    fn test_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{ "transient": 100.0, "threshold": 0.5 }"#).unwrap();

        let config = SimulationConfig::load(&path).unwrap();
        assert_eq!(config.transient, 100.0);
        assert_eq!(config.threshold, 0.5);

        fs::write(&path, "{ not json").unwrap();
        let err = SimulationConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let missing = SimulationConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_single_neuron_fallback() {
        let graph = SimulationConfig::default().coupling_graph().unwrap();
        assert_eq!(graph.vertex_count(), 1);
        assert_eq!(graph.weight(0, 0), SINGLE_NEURON_S);
    }
}
