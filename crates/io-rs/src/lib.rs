//! # hrsync I/O
//!
//! Text formats shared with the rest of the tooling.
//!
//! ## Coupling graph files
//!
//! ```text
//! # 3
//! 0 0.5 0
//! 0.5 0 0.5
//! 0 0.5 0
//! ```
//!
//! A `# <vertexCount>` header followed by one whitespace-separated row per
//! vertex. Blank lines are ignored.
//!
//! ## Result files
//!
//! | File | Line format |
//! |------|-------------|
//! | `approx<n>` | `x\tvoltage` for samples at or after the transient |
//! | `spikes<n>` | `x\tamplitude` |
//! | `ISI<n>` | `interval` |
//! | `frequencies` | `neuron\tfrequency` |
//! | `summary.json` | [`RunSummary`] |
//!
//! Reals are written with six decimals.

use hrsync_core::{
    zeroed_buffer, CouplingGraph, HrsyncError, Result, Time, TimeSeries, Trajectory, VOLTAGE,
};
use hrsync_spikes::{IntervalSet, NeuronReport, SpikeSet};
use ndarray::Array2;
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Coupling graph file parser
#[derive(Parser)]
#[grammar_inline = r##"
WHITESPACE = _{ " " | "\t" }

count = @{ ASCII_DIGIT+ }
entry = @{ (!(WHITESPACE | NEWLINE) ~ ANY)+ }

header = { "#" ~ count }
row = { entry+ }
graph = { SOI ~ NEWLINE* ~ header ~ (NEWLINE+ ~ row)* ~ NEWLINE* ~ EOI }
"##]
pub struct GraphParser;

// ============================================================================
// GRAPH FILES
// ============================================================================

/// Parse the text of a coupling graph file
pub fn parse_graph(source: &str) -> Result<CouplingGraph> {
    let graph = GraphParser::parse(Rule::graph, source)
        .map_err(|e| HrsyncError::ParseError(format!("graph file: {}", e)))?
        .next()
        .ok_or_else(|| HrsyncError::ParseError("graph file: empty input".to_string()))?;

    let mut vertex_count = None;
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for pair in graph.into_inner() {
        match pair.as_rule() {
            Rule::header => {
                let count = pair.into_inner().next().map(|c| c.as_str()).unwrap_or_default();
                let n = count.parse::<usize>().map_err(|e| {
                    HrsyncError::ParseError(format!("vertex count '{}': {}", count, e))
                })?;
                if n == 0 {
                    return Err(HrsyncError::InvalidGraph("vertex count is zero".to_string()));
                }
                vertex_count = Some(n);
            }
            Rule::row => {
                let (line, _) = pair.line_col();
                let values = pair
                    .into_inner()
                    .enumerate()
                    .map(|(column, entry)| {
                        entry.as_str().parse::<f64>().map_err(|_| {
                            HrsyncError::ParseError(format!(
                                "line {}, column {}: '{}' is not a number",
                                line,
                                column + 1,
                                entry.as_str()
                            ))
                        })
                    })
                    .collect::<Result<Vec<f64>>>()?;
                rows.push(values);
            }
            _ => {}
        }
    }

    let n = vertex_count
        .ok_or_else(|| HrsyncError::ParseError("missing vertex count header".to_string()))?;
    if rows.len() != n {
        return Err(HrsyncError::InvalidGraph(format!(
            "header declares {} vertices but the file has {} rows",
            n,
            rows.len()
        )));
    }
    if let Some((index, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != n) {
        return Err(HrsyncError::InvalidGraph(format!(
            "row {} has {} columns, expected {}",
            index + 1,
            row.len(),
            n
        )));
    }

    CouplingGraph::from_rows(rows)
}

/// Read and parse a coupling graph file
pub fn read_graph(path: impl AsRef<Path>) -> Result<CouplingGraph> {
    let path = path.as_ref();
    let source = fs::read_to_string(path)?;
    let graph = parse_graph(&source)?;
    info!(path = %path.display(), vertices = graph.vertex_count(), "loaded coupling graph");
    Ok(graph)
}

/// Render a graph in the file format; reals use their shortest exact form
pub fn format_graph(graph: &CouplingGraph) -> String {
    let mut text = format!("# {}\n", graph.vertex_count());
    for row in graph.weights().rows() {
        let line: Vec<String> = row.iter().map(|w| w.to_string()).collect();
        text.push_str(&line.join(" "));
        text.push('\n');
    }
    text
}

/// Write a graph file, creating parent directories as needed
pub fn write_graph(path: impl AsRef<Path>, graph: &CouplingGraph) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    fs::write(path, format_graph(graph))?;
    debug!(path = %path.display(), "wrote coupling graph");
    Ok(())
}

// ============================================================================
// GRID BUILDER
// ============================================================================

/// Strengths above this still build, with a warning
pub const MAX_RECOMMENDED_STRENGTH: f64 = 1.0;

/// `rows x columns` lattice with 4-neighbour coupling
///
/// Vertex `(r, c)` has index `r * columns + c`. Every lattice edge carries
/// `strength` in both directions; all other entries, the diagonal included,
/// are zero.
pub fn grid_graph(rows: usize, columns: usize, strength: f64) -> Result<CouplingGraph> {
    if rows == 0 || columns == 0 {
        return Err(HrsyncError::Configuration(format!(
            "grid must have at least one row and column, got {}x{}",
            rows, columns
        )));
    }
    if strength > MAX_RECOMMENDED_STRENGTH {
        warn!(
            strength,
            "coupling strength above {} may destabilise the network", MAX_RECOMMENDED_STRENGTH
        );
    }

    let too_large =
        || HrsyncError::ResourceExhausted(format!("{}x{} grid is too large", rows, columns));
    let n = rows.checked_mul(columns).ok_or_else(too_large)?;
    let cells = n.checked_mul(n).ok_or_else(too_large)?;

    let mut weights = Array2::from_shape_vec((n, n), zeroed_buffer(cells, "grid weights")?)
        .map_err(|e| HrsyncError::ResourceExhausted(format!("grid layout: {}", e)))?;
    for r in 0..rows {
        for c in 0..columns {
            let id = r * columns + c;
            if c + 1 < columns {
                weights[[id, id + 1]] = strength;
                weights[[id + 1, id]] = strength;
            }
            if r + 1 < rows {
                weights[[id, id + columns]] = strength;
                weights[[id + columns, id]] = strength;
            }
        }
    }

    CouplingGraph::new(weights)
}

/// `Graph/<rows>x<columns>`
pub fn default_grid_path(rows: usize, columns: usize) -> PathBuf {
    Path::new("Graph").join(format!("{}x{}", rows, columns))
}

// ============================================================================
// RESULT WRITERS
// ============================================================================

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn write_lines<F>(path: &Path, body: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let mut out = BufWriter::new(File::create(path)?);
    body(&mut out)?;
    out.flush()?;
    Ok(())
}

/// `time\tvalue` per sample
pub fn write_series(path: impl AsRef<Path>, series: &TimeSeries) -> Result<()> {
    write_lines(path.as_ref(), |out| {
        for (t, v) in series.time.iter().zip(series.values.iter()) {
            writeln!(out, "{:.6}\t{:.6}", t, v)?;
        }
        Ok(())
    })
}

/// `time\tamplitude` per spike
pub fn write_spikes(path: impl AsRef<Path>, spikes: &SpikeSet) -> Result<()> {
    write_lines(path.as_ref(), |out| {
        for (t, v) in spikes.iter() {
            writeln!(out, "{:.6}\t{:.6}", t, v)?;
        }
        Ok(())
    })
}

/// One interval per line
pub fn write_intervals(path: impl AsRef<Path>, intervals: &IntervalSet) -> Result<()> {
    write_lines(path.as_ref(), |out| {
        for isi in &intervals.intervals {
            writeln!(out, "{:.6}", isi)?;
        }
        Ok(())
    })
}

/// `neuron\tfrequency` per report
pub fn write_frequencies(path: impl AsRef<Path>, reports: &[NeuronReport]) -> Result<()> {
    write_lines(path.as_ref(), |out| {
        for report in reports {
            writeln!(out, "{}\t{:.6}", report.neuron, report.frequency)?;
        }
        Ok(())
    })
}

/// Write `approx<n>`, `spikes<n>` and `ISI<n>` for every report plus `frequencies`
///
/// Returns the paths written, in order.
pub fn write_results(
    dir: impl AsRef<Path>,
    trajectory: &Trajectory,
    reports: &[NeuronReport],
    transient: Time,
) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(reports.len() * 3 + 1);
    for report in reports {
        let n = report.neuron;
        let series = trajectory.time_series(n, VOLTAGE, transient);

        let approx = dir.join(format!("approx{}", n));
        write_series(&approx, &series)?;
        let spikes = dir.join(format!("spikes{}", n));
        write_spikes(&spikes, &report.spikes)?;
        let isi = dir.join(format!("ISI{}", n));
        write_intervals(&isi, &report.intervals)?;

        written.extend([approx, spikes, isi]);
    }

    let frequencies = dir.join("frequencies");
    write_frequencies(&frequencies, reports)?;
    written.push(frequencies);

    info!(dir = %dir.display(), files = written.len(), "wrote results");
    Ok(written)
}

// ============================================================================
// RUN SUMMARY
// ============================================================================

/// Machine-readable overview of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub neurons: usize,
    pub steps: usize,
    pub method: String,
    pub elapsed_seconds: f64,
    pub spike_counts: Vec<usize>,
    pub frequencies: Vec<f64>,
    /// `None` for neurons with fewer than two spikes
    pub mean_isi: Vec<Option<f64>>,
}

impl RunSummary {
    pub fn new(
        trajectory: &Trajectory,
        method: &str,
        elapsed_seconds: f64,
        reports: &[NeuronReport],
    ) -> Self {
        Self {
            neurons: trajectory.neuron_count(),
            steps: trajectory.step_count(),
            method: method.to_string(),
            elapsed_seconds,
            spike_counts: reports.iter().map(|r| r.spikes.len()).collect(),
            frequencies: reports.iter().map(|r| r.frequency).collect(),
            mean_isi: reports.iter().map(|r| r.intervals.mean()).collect(),
        }
    }

    /// Mean of the per-neuron frequencies
    pub fn mean_frequency(&self) -> Option<f64> {
        if self.frequencies.is_empty() {
            None
        } else {
            Some(self.frequencies.iter().sum::<f64>() / self.frequencies.len() as f64)
        }
    }
}

/// Pretty-printed JSON
pub fn write_summary(path: impl AsRef<Path>, summary: &RunSummary) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, summary).map_err(std::io::Error::from)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
