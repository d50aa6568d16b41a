//! The execution coverage of the process.
//!
//! The instrumentation callbacks cannot be handed any state, so they report
//! to the single instance stored here.

use std::sync::OnceLock;

use crate::counter_map::CounterMap;
use crate::execution_coverage::ExecutionCoverage;
use crate::CoverageError;

static SHARED_COVERAGE: OnceLock<ExecutionCoverage<'static>> = OnceLock::new();

/// Installs the execution coverage of the process over `counter_map`.
///
/// Fails with [`CoverageError::AlreadyInitialized`] if it was already
/// installed, in which case the existing instance is left untouched and
/// `counter_map` is not looked at.
pub fn init_execution_coverage(
    counter_map: CounterMap<'static>,
    max_allowed_stack_usage: usize,
) -> Result<&'static ExecutionCoverage<'static>, CoverageError> {
    if SHARED_COVERAGE.get().is_some() {
        return Err(CoverageError::AlreadyInitialized);
    }
    // another thread may still win the race below
    let coverage = ExecutionCoverage::with_stack_limit(counter_map, max_allowed_stack_usage)?;
    let mut installed = false;
    let shared = SHARED_COVERAGE.get_or_init(|| {
        installed = true;
        coverage
    });
    if installed {
        Ok(shared)
    } else {
        Err(CoverageError::AlreadyInitialized)
    }
}

/// The execution coverage of the process, or `None` if no instrumented
/// code registered its counters yet.
#[inline]
pub fn execution_coverage() -> Option<&'static ExecutionCoverage<'static>> {
    SHARED_COVERAGE.get()
}
