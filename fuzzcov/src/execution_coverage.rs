//! Coverage gathered while running a single input.
//!
//! An [`ExecutionCoverage`] receives three kinds of signals from the
//! instrumentation:
//! * hits of control-flow edges, written directly into its [`CounterMap`]
//! * comparison scores, through [`trace_cmp`](ExecutionCoverage::trace_cmp)
//! * stack depth measurements, through [`trace_stack`](ExecutionCoverage::trace_stack)
//!
//! The edge counters and the per-run comparison counters are cleared by
//! [`reset_state`](ExecutionCoverage::reset_state) before each run. The
//! comparison score watermarks and the per-PC stack depths are kept for the
//! whole campaign, so that progress made by earlier inputs is not reported
//! as new again.
//!
//! None of the hot paths take a lock. All counters are read and written
//! with relaxed atomic loads and stores, so a test that runs on several
//! threads may lose some updates. That is accepted: fuzz targets are
//! expected to run on one thread at a time.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use crate::arg::DefaultArguments;
use crate::cmp_score::{cmp_site_index, CmpScore, CmpScoreTable, CMP_MAP_SIZE};
use crate::counter_map::CounterMap;
use crate::reporter::report_stack_limit_exceeded;
use crate::traits::Sensor;
use crate::CoverageError;

/// Number of slots of the PC → maximum stack usage table.
pub const STACK_MAP_SIZE: usize = 1024 * 256;

/// Reduces a program counter into `0..STACK_MAP_SIZE`.
///
/// Instruction addresses share their low bits, so they are mixed before
/// being masked. PCs that collide share a slot.
#[inline]
pub fn stack_pc_index(pc: usize) -> usize {
    ((pc >> 4) ^ (pc << 8)) & (STACK_MAP_SIZE - 1)
}

/// Source of the thread tokens. `0` is never handed out, so that it can mean
/// that no thread called `reset_state` yet.
static NEXT_THREAD_TOKEN: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_TOKEN: usize = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
    /// The stack frame address of the last `reset_state` call on this thread.
    static TEST_THREAD_STACK_TOP: Cell<Option<usize>> = const { Cell::new(None) };
}

/// A number identifying the current thread, unique for the whole process.
fn current_thread_token() -> usize {
    THREAD_TOKEN.with(|token| *token)
}

#[inline(always)]
fn current_stack_frame() -> usize {
    let local = 0u8;
    std::hint::black_box(&local) as *const u8 as usize
}

/// The coverage of a single execution of the code under test, along with the
/// comparison and stack watermarks of the campaign.
///
/// The instrumentation is compiled to report to a single instance, so there
/// is one per process, installed with
/// [`init_execution_coverage`](crate::init_execution_coverage). The type
/// implements neither `Clone` nor `Copy`.
pub struct ExecutionCoverage<'a> {
    counter_map: CounterMap<'a>,
    /// Hits of each comparison site during the current run.
    new_cmp_counter_map: Box<[AtomicU8]>,
    /// Best scores of each comparison site, over the whole campaign.
    max_cmp_map: CmpScoreTable,
    /// Deepest stack usage seen at each PC, over the whole campaign.
    max_stack_map: Box<[AtomicUsize]>,
    /// Deepest stack usage seen on the test thread during the current run.
    max_stack_recorded: AtomicUsize,
    /// Token of the thread that last called `reset_state`, or `0`.
    test_thread: AtomicUsize,
    max_allowed_stack_usage: usize,
    /// Advisory only: it does not order any of the memory accesses above.
    new_coverage: AtomicBool,
    is_tracing: AtomicBool,
}

impl<'a> ExecutionCoverage<'a> {
    /// Creates the coverage state for the given edge counters, with the
    /// default stack limit.
    pub fn new(counter_map: CounterMap<'a>) -> Result<Self, CoverageError> {
        Self::with_stack_limit(counter_map, DefaultArguments::default().stack_limit)
    }

    /// Creates the coverage state for the given edge counters. The process
    /// aborts when the test uses more than `max_allowed_stack_usage` bytes
    /// of stack.
    pub fn with_stack_limit(counter_map: CounterMap<'a>, max_allowed_stack_usage: usize) -> Result<Self, CoverageError> {
        if counter_map.is_empty() {
            return Err(CoverageError::EmptyCounterMap);
        }
        Ok(Self {
            counter_map,
            new_cmp_counter_map: (0..CMP_MAP_SIZE).map(|_| AtomicU8::new(0)).collect(),
            max_cmp_map: CmpScoreTable::new(CMP_MAP_SIZE),
            max_stack_map: (0..STACK_MAP_SIZE).map(|_| AtomicUsize::new(0)).collect(),
            max_stack_recorded: AtomicUsize::new(0),
            test_thread: AtomicUsize::new(0),
            max_allowed_stack_usage,
            new_coverage: AtomicBool::new(false),
            is_tracing: AtomicBool::new(false),
        })
    }

    pub fn counter_map(&self) -> &CounterMap<'a> {
        &self.counter_map
    }

    /// Prepares the state for the next run.
    ///
    /// Clears the edge counters, the per-run comparison counters, the
    /// new-coverage flag and the stack usage of the run. Must be called on
    /// the thread that is about to run the test: stack depths are measured
    /// relative to the frame of this call, and only on this thread.
    pub fn reset_state(&self) {
        for counter in self.new_cmp_counter_map.iter() {
            counter.store(0, Ordering::Relaxed);
        }
        self.counter_map.clear();
        self.new_coverage.store(false, Ordering::Relaxed);

        self.max_stack_recorded.store(0, Ordering::Relaxed);
        TEST_THREAD_STACK_TOP.with(|top| top.set(Some(current_stack_frame())));
        self.test_thread.store(current_thread_token(), Ordering::Relaxed);
    }

    /// Records a hit of the comparison site `site_id` whose operands have
    /// the given closeness scores. Returns whether the watermark of the site
    /// was raised, in which case new coverage is flagged.
    pub fn update_cmp_map(&self, site_id: usize, hamming: u8, absolute: u8) -> bool {
        let index = cmp_site_index(site_id);
        let hits = &self.new_cmp_counter_map[index];
        let counter = hits.load(Ordering::Relaxed).saturating_add(1);
        hits.store(counter, Ordering::Relaxed);

        let improved = self.max_cmp_map.update(index, CmpScore::new(counter, hamming, absolute));
        if improved {
            self.new_coverage.store(true, Ordering::Relaxed);
        }
        improved
    }

    /// The best score recorded for the comparison site during the campaign.
    pub fn cmp_score(&self, site_id: usize) -> CmpScore {
        self.max_cmp_map.get(cmp_site_index(site_id))
    }

    /// The number of times the comparison site was hit during the current run.
    pub fn cmp_hits_in_run(&self, site_id: usize) -> u8 {
        self.new_cmp_counter_map[cmp_site_index(site_id)].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn new_coverage_found(&self) -> bool {
        self.new_coverage.load(Ordering::Relaxed)
    }

    /// Whether the code under test is currently running.
    ///
    /// Code that runs in the same process outside of the test (the fuzzer
    /// itself) must not influence the scores.
    #[inline]
    pub fn is_tracing(&self) -> bool {
        self.is_tracing.load(Ordering::Relaxed)
    }

    /// Call with `true` right before running the test and with `false`
    /// right after.
    #[inline]
    pub fn set_is_tracing(&self, is_tracing: bool) {
        self.is_tracing.store(is_tracing, Ordering::Relaxed);
    }

    /// Entry point for the comparison callbacks. Does nothing unless tracing.
    #[inline]
    pub fn trace_cmp(&self, site_id: usize, hamming: u8, absolute: u8) {
        if self.is_tracing() {
            self.update_cmp_map(site_id, hamming, absolute);
        }
    }

    /// Entry point for the stack depth callbacks. Does nothing unless tracing.
    #[inline]
    pub fn trace_stack(&self, pc: usize) {
        if self.is_tracing() {
            self.update_max_stack(pc);
        }
    }

    /// Maximum number of bytes of stack the test may use before the process
    /// is aborted.
    pub fn max_allowed_stack_usage(&self) -> usize {
        self.max_allowed_stack_usage
    }

    /// Deepest stack usage, in bytes, measured on the test thread since the
    /// last reset.
    pub fn max_stack_used(&self) -> usize {
        self.max_stack_recorded.load(Ordering::Relaxed)
    }

    /// The deepest stack usage ever measured at `pc`.
    pub fn max_stack_at(&self, pc: usize) -> usize {
        self.max_stack_map[stack_pc_index(pc)].load(Ordering::Relaxed)
    }

    /// Measures the stack usage of the current frame, reached at `pc`.
    ///
    /// Only the thread that last called [`reset_state`](Self::reset_state)
    /// is measured; on any other thread this is a no-op, even one that
    /// called it for an earlier run. A usage deeper than
    /// ever seen at `pc` is new coverage. A usage above
    /// [`max_allowed_stack_usage`](Self::max_allowed_stack_usage) aborts the
    /// process, since the thread may be about to overflow its stack.
    #[inline(never)]
    pub fn update_max_stack(&self, pc: usize) {
        self.update_max_stack_from(pc, current_stack_frame());
    }

    pub(crate) fn update_max_stack_from(&self, pc: usize, frame_address: usize) {
        if self.test_thread.load(Ordering::Relaxed) != current_thread_token() {
            return;
        }
        let Some(top) = TEST_THREAD_STACK_TOP.with(|top| top.get()) else {
            return;
        };
        let usage = top.abs_diff(frame_address);

        if usage > self.max_stack_recorded.load(Ordering::Relaxed) {
            if usage > self.max_allowed_stack_usage {
                report_stack_limit_exceeded(usage, self.max_allowed_stack_usage);
                std::process::abort();
            }
            self.max_stack_recorded.store(usage, Ordering::Relaxed);
        }

        let max_at_pc = &self.max_stack_map[stack_pc_index(pc)];
        if usage > max_at_pc.load(Ordering::Relaxed) {
            max_at_pc.store(usage, Ordering::Relaxed);
            self.new_coverage.store(true, Ordering::Relaxed);
        }
    }
}

impl<'a> Sensor for ExecutionCoverage<'a> {
    fn start_recording(&self) {
        self.reset_state();
        self.set_is_tracing(true);
    }

    fn stop_recording(&self) {
        self.set_is_tracing(false);
    }

    fn iterate_over_observations(&self, handler: &mut dyn FnMut((usize, u64))) {
        for (index, count) in self.counter_map.iter_hit() {
            handler((index, count as u64));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU8;
    use std::sync::Barrier;
    use std::thread;

    use super::*;

    fn counters(len: usize) -> Box<[AtomicU8]> {
        (0..len).map(|_| AtomicU8::new(0)).collect()
    }

    #[test]
    fn empty_counter_map_is_rejected() {
        let buffer = counters(0);
        assert!(matches!(
            ExecutionCoverage::new(CounterMap::new(&buffer)),
            Err(CoverageError::EmptyCounterMap)
        ));
    }

    #[test]
    fn cmp_ties_are_broken_by_closeness() {
        let buffer = counters(4);
        let coverage = ExecutionCoverage::new(CounterMap::new(&buffer)).unwrap();
        let site = 77;

        coverage.reset_state();
        for _ in 0..3 {
            coverage.update_cmp_map(site, 2, 5);
        }
        assert_eq!(coverage.cmp_score(site), CmpScore::new(3, 2, 5));
        assert!(coverage.new_coverage_found());

        // same hit count, same closeness: nothing new
        coverage.reset_state();
        for _ in 0..3 {
            assert!(!coverage.update_cmp_map(site, 2, 5));
        }
        assert!(!coverage.new_coverage_found());

        // same hit count, operands closer in bits
        coverage.reset_state();
        assert!(!coverage.update_cmp_map(site, 2, 5));
        assert!(!coverage.update_cmp_map(site, 2, 5));
        assert!(coverage.update_cmp_map(site, 4, 5));
        assert_eq!(coverage.cmp_score(site), CmpScore::new(3, 4, 5));
        assert!(coverage.new_coverage_found());
    }

    #[test]
    fn higher_hit_count_keeps_previous_closeness() {
        let buffer = counters(4);
        let coverage = ExecutionCoverage::new(CounterMap::new(&buffer)).unwrap();

        coverage.reset_state();
        assert!(coverage.update_cmp_map(9, 40, 250));
        coverage.reset_state();
        assert!(!coverage.update_cmp_map(9, 10, 0));
        assert!(coverage.update_cmp_map(9, 10, 0));
        assert_eq!(coverage.cmp_score(9), CmpScore::new(2, 40, 250));
    }

    #[test]
    fn reset_keeps_watermarks_and_clears_the_run() {
        let buffer = counters(4);
        let coverage = ExecutionCoverage::new(CounterMap::new(&buffer)).unwrap();

        coverage.reset_state();
        coverage.counter_map().hit(2);
        assert!(coverage.update_cmp_map(5, 7, 200));
        assert!(coverage.update_cmp_map(5, 7, 200));
        assert_eq!(coverage.cmp_hits_in_run(5), 2);

        coverage.reset_state();
        assert_eq!(coverage.cmp_score(5), CmpScore::new(2, 7, 200));
        assert!(!coverage.new_coverage_found());
        assert_eq!(coverage.cmp_hits_in_run(5), 0);
        assert!(coverage.new_cmp_counter_map.iter().all(|c| c.load(Ordering::Relaxed) == 0));
        assert!(coverage.counter_map().iter().all(|c| c == 0));
        assert_eq!(coverage.max_stack_used(), 0);
    }

    #[test]
    fn per_run_cmp_counter_saturates() {
        let buffer = counters(1);
        let coverage = ExecutionCoverage::new(CounterMap::new(&buffer)).unwrap();
        coverage.reset_state();
        for _ in 0..300 {
            coverage.update_cmp_map(1, 0, 0);
        }
        assert_eq!(coverage.cmp_hits_in_run(1), 255);
        assert_eq!(coverage.cmp_score(1).counter, 255);
    }

    #[test]
    fn tracing_gates_the_callbacks() {
        let buffer = counters(1);
        let coverage = ExecutionCoverage::new(CounterMap::new(&buffer)).unwrap();
        coverage.reset_state();

        coverage.trace_cmp(3, 8, 255);
        coverage.trace_stack(0x1000);
        assert_eq!(coverage.cmp_score(3), CmpScore::default());
        assert!(!coverage.new_coverage_found());

        coverage.set_is_tracing(true);
        coverage.trace_cmp(3, 8, 255);
        coverage.set_is_tracing(false);
        assert_eq!(coverage.cmp_score(3), CmpScore::new(1, 8, 255));
        assert!(coverage.new_coverage_found());
    }

    #[test]
    fn deeper_stack_at_a_pc_is_new_coverage() {
        let buffer = counters(1);
        let coverage = ExecutionCoverage::with_stack_limit(CounterMap::new(&buffer), 1 << 20).unwrap();
        coverage.reset_state();
        let top = TEST_THREAD_STACK_TOP.with(|t| t.get()).unwrap();

        coverage.update_max_stack_from(0x4000, top - 512);
        assert_eq!(coverage.max_stack_at(0x4000), 512);
        assert_eq!(coverage.max_stack_used(), 512);
        assert!(coverage.new_coverage_found());

        // the watermark at the PC survives the reset, the run maximum does not
        coverage.reset_state();
        let top = TEST_THREAD_STACK_TOP.with(|t| t.get()).unwrap();
        coverage.update_max_stack_from(0x4000, top - 256);
        assert_eq!(coverage.max_stack_used(), 256);
        assert_eq!(coverage.max_stack_at(0x4000), 512);
        assert!(!coverage.new_coverage_found());

        // a shallower usage at another PC is still new for that PC
        coverage.update_max_stack_from(0x8000, top - 128);
        assert_eq!(coverage.max_stack_at(0x8000), 128);
        assert_eq!(coverage.max_stack_used(), 256);
        assert!(coverage.new_coverage_found());
    }

    #[test]
    fn stack_of_other_threads_is_ignored() {
        let buffer = counters(1);
        let coverage = ExecutionCoverage::with_stack_limit(CounterMap::new(&buffer), 4096).unwrap();
        coverage.reset_state();
        let top = TEST_THREAD_STACK_TOP.with(|t| t.get()).unwrap();
        coverage.update_max_stack_from(0x10, top - 100);
        assert_eq!(coverage.max_stack_used(), 100);

        thread::scope(|s| {
            s.spawn(|| {
                // this thread's stack is nowhere near the test thread's, so a
                // measurement would be far above the limit and abort
                coverage.update_max_stack(0x10);
                coverage.update_max_stack_from(0x20, top.wrapping_sub(1 << 30));
            });
        });
        assert_eq!(coverage.max_stack_used(), 100);
        assert_eq!(coverage.max_stack_at(0x20), 0);
    }

    #[test]
    fn stack_of_a_previous_test_thread_is_ignored() {
        let buffer = counters(1);
        let coverage = ExecutionCoverage::with_stack_limit(CounterMap::new(&buffer), 4096).unwrap();
        let barrier = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                coverage.reset_state();
                let top = TEST_THREAD_STACK_TOP.with(|t| t.get()).unwrap();
                barrier.wait();
                // the other thread resets for the next run
                barrier.wait();
                coverage.update_max_stack_from(0x77, top - 300);
                coverage.update_max_stack(0x78);
            });
            barrier.wait();
            coverage.reset_state();
            barrier.wait();
        });
        assert_eq!(coverage.max_stack_used(), 0);
        assert_eq!(coverage.max_stack_at(0x77), 0);
        assert_eq!(coverage.max_stack_at(0x78), 0);
        assert!(!coverage.new_coverage_found());

        let top = TEST_THREAD_STACK_TOP.with(|t| t.get()).unwrap();
        coverage.update_max_stack_from(0x77, top - 300);
        assert_eq!(coverage.max_stack_used(), 300);
        assert!(coverage.new_coverage_found());
    }

    #[test]
    fn observations_are_the_hit_edges() {
        let buffer = counters(5);
        let coverage = ExecutionCoverage::new(CounterMap::new(&buffer)).unwrap();
        coverage.start_recording();
        assert!(coverage.is_tracing());
        coverage.counter_map().hit(1);
        coverage.counter_map().hit(4);
        coverage.counter_map().hit(4);
        coverage.stop_recording();
        assert!(!coverage.is_tracing());

        let mut observations = vec![];
        coverage.iterate_over_observations(&mut |o| observations.push(o));
        assert_eq!(observations, vec![(1, 1), (4, 2)]);
    }
}
