//! Fuzzcov is the coverage runtime of a coverage-guided fuzzer.
//!
//! For each execution of the code under test, it tells whether the input
//! reached a control-flow edge that no previous input reached, brought a
//! comparison instruction closer to flipping its outcome, or used more stack
//! at some program point than ever before. The fuzzing engine uses that
//! answer to decide which inputs to keep.
//!
//! * [`ExecutionCoverage`] holds the coverage of the current execution and
//!   the comparison and stack watermarks of the campaign. There is one per
//!   process, see [`init_execution_coverage`] and [`execution_coverage`].
//! * [`CorpusCoverage`] accumulates the edges covered by all executions.
//! * [`Campaign`] ties both together for an engine that runs one input at
//!   a time.
//!
//! ```
//! use std::sync::atomic::AtomicU8;
//! use fuzzcov::{Campaign, CounterMap, ExecutionCoverage};
//!
//! let counters: Box<[AtomicU8]> = (0..16).map(|_| AtomicU8::new(0)).collect();
//! let execution = ExecutionCoverage::new(CounterMap::new(&counters)).unwrap();
//! let mut campaign = Campaign::new(&execution);
//!
//! let (_, novelty) = campaign.execute(|| {
//!     // instrumented code would increment the counters of the edges it takes
//!     execution.counter_map().hit(3);
//! });
//! assert!(novelty.is_interesting());
//! ```

#![cfg_attr(feature = "sancov_hooks", feature(link_llvm_intrinsics))]

mod campaign;
mod cmp_score;
mod corpus_coverage;
mod counter_map;
mod execution_coverage;
#[cfg(feature = "sancov_hooks")]
mod hooks;
mod reporter;
mod shared;
mod traits;

use std::error::Error;
use std::fmt::{Debug, Display};

#[doc(inline)]
pub use fuzzcov_common::arg;
#[doc(inline)]
pub use fuzzcov_common::{CoverageEvent, CoverageStats};

#[doc(inline)]
pub use campaign::{Campaign, Novelty};
#[doc(inline)]
pub use cmp_score::{closeness_at_width, cmp_site_index, CmpOperand, CmpScore, CMP_MAP_SIZE};
#[doc(inline)]
pub use corpus_coverage::CorpusCoverage;
#[doc(inline)]
pub use counter_map::CounterMap;
#[doc(inline)]
pub use execution_coverage::{stack_pc_index, ExecutionCoverage, STACK_MAP_SIZE};
#[doc(inline)]
pub use reporter::Reporter;
#[doc(inline)]
pub use shared::{execution_coverage, init_execution_coverage};
#[doc(inline)]
pub use traits::{SaveToStatsFolder, Sensor};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CoverageError {
    /// The execution coverage of the process was already installed.
    AlreadyInitialized,
    /// A counter map must contain at least one counter.
    EmptyCounterMap,
}

impl Debug for CoverageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as Display>::fmt(self, f)
    }
}
impl Display for CoverageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoverageError::AlreadyInitialized => {
                write!(f, "the execution coverage of the process is already initialized")
            }
            CoverageError::EmptyCounterMap => {
                write!(f, "the counter map does not contain any counter")
            }
        }
    }
}
impl Error for CoverageError {}
