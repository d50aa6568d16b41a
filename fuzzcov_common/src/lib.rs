//! Types shared by the fuzzcov runtime and the engines that drive it:
//! command-line/environment arguments, events, and statistics.

pub mod arg;

use std::fmt::Display;

use nu_ansi_term::Color;
#[cfg(feature = "serde")]
use serde::Serialize;

/// A snapshot of the coverage gathered by a campaign so far.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CoverageStats {
    pub total_runs: usize,
    pub covered_edges: usize,
    pub total_edges: usize,
    /// Deepest stack usage, in bytes, observed during the last run
    pub max_stack_used: usize,
    pub percent_coverage: f64,
}

impl CoverageStats {
    #[must_use]
    pub fn new(total_edges: usize) -> CoverageStats {
        CoverageStats {
            total_edges,
            ..CoverageStats::default()
        }
    }

    /// Refreshes the covered edge count and the percentage derived from it.
    pub fn set_covered_edges(&mut self, covered_edges: usize) {
        self.covered_edges = covered_edges;
        self.percent_coverage = if self.total_edges == 0 {
            0.0
        } else {
            (covered_edges as f64 / self.total_edges as f64) * 100.0
        };
    }
}

impl Display for CoverageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            Color::Blue.paint(format!("iter: {}", self.total_runs)),
            Color::LightGreen.paint(format!(
                "cov: {}/{} ({:.2}%)",
                self.covered_edges, self.total_edges, self.percent_coverage
            )),
            Color::LightPurple.paint(format!("stack: {}B", self.max_stack_used)),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum CoverageEvent {
    Start,
    Stop,
    Pulse,
    /// The number of edges that were covered for the first time
    NewEdges(usize),
    /// An improved comparison score or a deeper stack was observed
    NewSignal,
    /// The instrumentation registered a counter section of the given length
    CountersRegistered(usize),
}
