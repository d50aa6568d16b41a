use std::path::PathBuf;

#[cfg(feature = "serde_json_serializer")]
use nu_ansi_term::Color;

use crate::execution_coverage::ExecutionCoverage;
use crate::traits::SaveToStatsFolder;

/// The union of the edges covered by every input executed during a campaign.
///
/// Used to tell whether an execution reached an edge that no previous input
/// reached. Hit counts are not taken into account, and an edge that was
/// covered once stays covered.
///
/// This only answers the edge coverage question. Improved comparison scores
/// and deeper stacks are reported by
/// [`ExecutionCoverage::new_coverage_found`].
pub struct CorpusCoverage {
    corpus_map: Box<[u8]>,
}

impl CorpusCoverage {
    /// Creates a blank coverage map with one marker per edge.
    pub fn new(edge_count: usize) -> Self {
        Self {
            corpus_map: vec![0; edge_count].into_boxed_slice(),
        }
    }

    /// Creates a blank coverage map sized for the counters of `execution`.
    pub fn for_execution(execution: &ExecutionCoverage<'_>) -> Self {
        Self::new(execution.counter_map().len())
    }

    /// Merges the edges hit by `execution` into the corpus coverage.
    /// Returns true if at least one of them was never covered before.
    pub fn update(&mut self, execution: &ExecutionCoverage<'_>) -> bool {
        self.merge(execution) > 0
    }

    /// Merges the edges hit by `execution` into the corpus coverage and
    /// returns how many of them were never covered before.
    ///
    /// # Panics
    /// If the execution does not have exactly one counter per tracked edge.
    pub fn merge(&mut self, execution: &ExecutionCoverage<'_>) -> usize {
        let counters = execution.counter_map();
        assert_eq!(
            counters.len(),
            self.corpus_map.len(),
            "the execution coverage does not track the same edges as the corpus coverage"
        );
        let mut new_edges = 0;
        for (marker, hits) in self.corpus_map.iter_mut().zip(counters.iter()) {
            if hits != 0 && *marker == 0 {
                *marker = 1;
                new_edges += 1;
            }
        }
        new_edges
    }

    /// The number of distinct edges covered by the corpus.
    pub fn number_of_covered_edges(&self) -> usize {
        self.corpus_map.iter().filter(|&&marker| marker != 0).count()
    }

    pub fn is_covered(&self, edge: usize) -> bool {
        self.corpus_map.get(edge).map_or(false, |&marker| marker != 0)
    }

    pub fn covered_edges(&self) -> impl Iterator<Item = usize> + '_ {
        self.corpus_map
            .iter()
            .enumerate()
            .filter(|(_, marker)| **marker != 0)
            .map(|(edge, _)| edge)
    }

    /// The number of edges tracked, covered or not.
    pub fn len(&self) -> usize {
        self.corpus_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus_map.is_empty()
    }
}

#[cfg(feature = "serde_json_serializer")]
#[derive(serde::Serialize)]
struct SerializedCorpusCoverage {
    total_edges: usize,
    covered_edges: Vec<usize>,
}

/// Serializes `value` into a stats file named `name`. A value that cannot be
/// serialized is reported and produces no file.
#[cfg(feature = "serde_json_serializer")]
fn json_stats_file<T: serde::Serialize>(name: &str, value: &T) -> Vec<(PathBuf, Vec<u8>)> {
    match serde_json::to_vec(value) {
        Ok(content) => vec![(PathBuf::new().join(name), content)],
        Err(e) => {
            eprintln!("{} could not save {}: {}", Color::Red.paint("[!]"), name, e);
            vec![]
        }
    }
}

impl SaveToStatsFolder for CorpusCoverage {
    #[cfg(feature = "serde_json_serializer")]
    fn save_to_stats_folder(&self) -> Vec<(PathBuf, Vec<u8>)> {
        let serialized = SerializedCorpusCoverage {
            total_edges: self.len(),
            covered_edges: self.covered_edges().collect(),
        };
        json_stats_file("corpus_coverage.json", &serialized)
    }

    #[cfg(not(feature = "serde_json_serializer"))]
    fn save_to_stats_folder(&self) -> Vec<(PathBuf, Vec<u8>)> {
        vec![]
    }
}
