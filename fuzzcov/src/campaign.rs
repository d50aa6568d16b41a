use fuzzcov_common::{CoverageEvent, CoverageStats};

use crate::corpus_coverage::CorpusCoverage;
use crate::execution_coverage::ExecutionCoverage;
use crate::reporter::Reporter;
use crate::traits::Sensor;

/// What a single execution contributed to the campaign.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Novelty {
    /// Number of edges covered for the first time
    pub new_edges: usize,
    /// Whether a comparison got closer to flipping or the stack got
    /// deeper at some PC than ever before
    pub new_signal: bool,
}

impl Novelty {
    /// Whether the input should be kept in the corpus.
    pub fn is_interesting(&self) -> bool {
        self.new_edges > 0 || self.new_signal
    }
}

/// Disables tracing when dropped, including when the test unwinds.
struct RecordingGuard<'e, 'a>(&'e ExecutionCoverage<'a>);

impl Drop for RecordingGuard<'_, '_> {
    fn drop(&mut self) {
        self.0.stop_recording();
    }
}

/// Runs inputs one after the other and accumulates their coverage.
///
/// The campaign borrows the execution coverage, usually the one returned by
/// [`execution_coverage`](crate::execution_coverage), and owns the corpus
/// coverage for its whole lifetime.
pub struct Campaign<'a> {
    execution: &'a ExecutionCoverage<'a>,
    corpus: CorpusCoverage,
    reporter: Option<Reporter>,
    stats: CoverageStats,
}

impl<'a> Campaign<'a> {
    pub fn new(execution: &'a ExecutionCoverage<'a>) -> Self {
        let corpus = CorpusCoverage::for_execution(execution);
        let stats = CoverageStats::new(corpus.len());
        Self {
            execution,
            corpus,
            reporter: None,
            stats,
        }
    }

    /// Prints an event on the console whenever an input finds new coverage.
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        reporter.report_event(CoverageEvent::Start, Some(&self.stats));
        self.reporter = Some(reporter);
        self
    }

    /// Runs `test` on the current thread while recording its coverage.
    ///
    /// Returns the output of the test and what its execution contributed
    /// to the campaign. If the test panics, tracing is disabled and the
    /// panic is propagated without updating the corpus coverage.
    pub fn execute<T>(&mut self, test: impl FnOnce() -> T) -> (T, Novelty) {
        self.execution.start_recording();
        let output = {
            let _guard = RecordingGuard(self.execution);
            test()
        };
        (output, self.record_run())
    }

    fn record_run(&mut self) -> Novelty {
        let novelty = Novelty {
            new_edges: self.corpus.merge(self.execution),
            new_signal: self.execution.new_coverage_found(),
        };

        self.stats.total_runs += 1;
        self.stats.max_stack_used = self.execution.max_stack_used();
        if novelty.new_edges > 0 {
            self.stats.set_covered_edges(self.corpus.number_of_covered_edges());
        }

        if let Some(reporter) = &self.reporter {
            if novelty.new_edges > 0 {
                reporter.report_event(CoverageEvent::NewEdges(novelty.new_edges), Some(&self.stats));
            } else if novelty.new_signal {
                reporter.report_event(CoverageEvent::NewSignal, Some(&self.stats));
            } else if self.stats.total_runs.is_power_of_two() {
                reporter.report_event(CoverageEvent::Pulse, Some(&self.stats));
            }
        }
        novelty
    }

    pub fn stats(&self) -> CoverageStats {
        self.stats
    }

    pub fn corpus(&self) -> &CorpusCoverage {
        &self.corpus
    }

    pub fn execution(&self) -> &'a ExecutionCoverage<'a> {
        self.execution
    }
}

impl Drop for Campaign<'_> {
    fn drop(&mut self) {
        if let Some(reporter) = &self.reporter {
            reporter.report_event(CoverageEvent::Stop, Some(&self.stats));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicU8;

    use super::*;
    use crate::counter_map::CounterMap;

    #[test]
    fn execute_reports_edges_and_signals() {
        let buffer: Box<[AtomicU8]> = (0..8).map(|_| AtomicU8::new(0)).collect();
        let execution = ExecutionCoverage::new(CounterMap::new(&buffer)).unwrap();
        let mut campaign = Campaign::new(&execution).with_reporter(Reporter::new());

        let (output, novelty) = campaign.execute(|| {
            execution.counter_map().hit(3);
            execution.trace_cmp(42, 30, 200);
            7
        });
        assert_eq!(output, 7);
        assert_eq!(novelty, Novelty { new_edges: 1, new_signal: true });
        assert!(!execution.is_tracing());

        // same edge, same comparison: nothing new
        let (_, novelty) = campaign.execute(|| {
            execution.counter_map().hit(3);
            execution.trace_cmp(42, 30, 200);
        });
        assert!(!novelty.is_interesting());

        // closer comparison operands, no new edge
        let (_, novelty) = campaign.execute(|| {
            execution.counter_map().hit(3);
            execution.trace_cmp(42, 31, 200);
        });
        assert_eq!(novelty, Novelty { new_edges: 0, new_signal: true });
        assert!(novelty.is_interesting());

        // bookkeeping outside of `execute` is not traced
        execution.trace_cmp(43, 64, 255);
        assert_eq!(execution.cmp_score(43).counter, 0);

        let stats = campaign.stats();
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.covered_edges, 1);
        assert_eq!(stats.total_edges, 8);
        assert!((stats.percent_coverage - 12.5).abs() < f64::EPSILON);
        assert_eq!(campaign.corpus().number_of_covered_edges(), 1);
    }

    #[test]
    fn panicking_test_stops_tracing() {
        let buffer: Box<[AtomicU8]> = (0..2).map(|_| AtomicU8::new(0)).collect();
        let execution = ExecutionCoverage::new(CounterMap::new(&buffer)).unwrap();
        let mut campaign = Campaign::new(&execution);

        let result = catch_unwind(AssertUnwindSafe(|| {
            campaign.execute(|| {
                execution.counter_map().hit(0);
                panic!("test failure");
            })
        }));
        assert!(result.is_err());
        assert!(!execution.is_tracing());
        assert_eq!(campaign.stats().total_runs, 0);
        assert_eq!(campaign.corpus().number_of_covered_edges(), 0);
    }
}
