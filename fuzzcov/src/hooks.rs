//! This module implements the hooks defined by Sanitizer Coverage that feed
//! the execution coverage of the process.
//!
//! For more information about Sanitizer Coverage,
//! see <https://clang.llvm.org/docs/SanitizerCoverage.html>
//!
//! The code under test must be compiled with:
//! ```text
//! -fsanitize-coverage=inline-8bit-counters,trace-cmp
//! ```
//! The edge counters are then incremented inline, without calling into this
//! crate. The comparison hooks identify the comparison site by the address
//! the hook returns to, which I name PC (for Program Counter), and also
//! measure the stack depth at that PC.
//!
//! This crate itself must not be instrumented, or the hooks would call
//! themselves.
//!
//! Here is the documentation for the comparison hooks from
//! Sanitizer Coverage:
//!
//! ```text
//! // Called before a comparison instruction.
//! // Arg1 and Arg2 are arguments of the comparison.
//! void __sanitizer_cov_trace_cmp1(uint8_t Arg1, uint8_t Arg2);
//! void __sanitizer_cov_trace_cmp2(uint16_t Arg1, uint16_t Arg2);
//! void __sanitizer_cov_trace_cmp4(uint32_t Arg1, uint32_t Arg2);
//! void __sanitizer_cov_trace_cmp8(uint64_t Arg1, uint64_t Arg2);
//!
//! // Called before a comparison instruction if exactly one of the arguments is constant.
//! // Arg1 and Arg2 are arguments of the comparison, Arg1 is a compile-time constant.
//! void __sanitizer_cov_trace_const_cmp1(uint8_t Arg1, uint8_t Arg2);
//! void __sanitizer_cov_trace_const_cmp2(uint16_t Arg1, uint16_t Arg2);
//! void __sanitizer_cov_trace_const_cmp4(uint32_t Arg1, uint32_t Arg2);
//! void __sanitizer_cov_trace_const_cmp8(uint64_t Arg1, uint64_t Arg2);
//!
//! // Called before a switch statement.
//! // Val is the switch operand.
//! // Cases[0] is the number of case constants.
//! // Cases[1] is the size of Val in bits.
//! // Cases[2:] are the case constants.
//! void __sanitizer_cov_trace_switch(uint64_t Val, uint64_t *Cases);
//! ```

use std::slice;

use nu_ansi_term::Color;

use crate::arg::Arguments;
use crate::cmp_score::{closeness_at_width, CmpOperand};
use crate::counter_map::CounterMap;
use crate::reporter::Reporter;
use crate::shared::{execution_coverage, init_execution_coverage};
use crate::CoverageEvent;

extern "C" {
    #[link_name = "llvm.returnaddress"]
    fn __return_address(l: i32) -> *const u8;
}

#[inline(always)]
unsafe fn return_address() -> usize {
    __return_address(0) as usize
}

#[inline(always)]
fn handle_trace_cmp<T: CmpOperand>(pc: usize, arg1: T, arg2: T) {
    handle_cmp_scores(pc, arg1.hamming_closeness(arg2), arg1.absolute_closeness(arg2));
}

#[inline(always)]
fn handle_cmp_scores(pc: usize, hamming: u8, absolute: u8) {
    let Some(coverage) = execution_coverage() else {
        return;
    };
    if !coverage.is_tracing() {
        return;
    }
    coverage.update_max_stack(pc);
    coverage.update_cmp_map(pc, hamming, absolute);
}

/// `__sanitizer_cov_8bit_counters_init`
///
/// Called once per instrumented module with the bounds of its counters. Only
/// the first module is tracked: the execution coverage of the process can
/// only be installed once.
#[export_name = "__sanitizer_cov_8bit_counters_init"]
unsafe extern "C" fn counters_init(start: *mut u8, stop: *mut u8) {
    if start.is_null() || start == stop {
        return;
    }
    let len = stop.offset_from(start).unsigned_abs();
    let start = if stop < start { stop } else { start };

    let arguments = Arguments::from_env().unwrap_or_else(|e| {
        eprintln!("{} {}", Color::Red.paint("[!]"), e);
        Arguments::default()
    });
    match init_execution_coverage(CounterMap::from_raw_parts(start, len), arguments.stack_limit) {
        Ok(_) => Reporter::new().report_event(CoverageEvent::CountersRegistered(len), None),
        Err(e) => eprintln!("{} ignoring {} counters: {}", Color::Yellow.paint("[-]"), len, e),
    }
}

/// `__sanitizer_cov_trace_cmp1`
///
/// See general module documentation about hooks inserted before specific instructions
#[export_name = "__sanitizer_cov_trace_cmp1"]
extern "C" fn trace_cmp1(arg1: u8, arg2: u8) {
    let pc = unsafe { return_address() };
    handle_trace_cmp(pc, arg1, arg2);
}

/// `__sanitizer_cov_trace_cmp2`
///
/// See general module documentation about hooks inserted before specific instructions
#[export_name = "__sanitizer_cov_trace_cmp2"]
extern "C" fn trace_cmp2(arg1: u16, arg2: u16) {
    let pc = unsafe { return_address() };
    handle_trace_cmp(pc, arg1, arg2);
}

/// `__sanitizer_cov_trace_cmp4`
///
/// See general module documentation about hooks inserted before specific instructions
#[export_name = "__sanitizer_cov_trace_cmp4"]
extern "C" fn trace_cmp4(arg1: u32, arg2: u32) {
    let pc = unsafe { return_address() };
    handle_trace_cmp(pc, arg1, arg2);
}

/// `__sanitizer_cov_trace_cmp8`
///
/// See general module documentation about hooks inserted before specific instructions
#[export_name = "__sanitizer_cov_trace_cmp8"]
extern "C" fn trace_cmp8(arg1: u64, arg2: u64) {
    let pc = unsafe { return_address() };
    handle_trace_cmp(pc, arg1, arg2);
}

/// `__sanitizer_cov_trace_const_cmp1`
///
/// See general module documentation about hooks inserted before specific instructions
#[export_name = "__sanitizer_cov_trace_const_cmp1"]
extern "C" fn trace_const_cmp1(arg1: u8, arg2: u8) {
    let pc = unsafe { return_address() };
    handle_trace_cmp(pc, arg1, arg2);
}

/// `__sanitizer_cov_trace_const_cmp2`
///
/// See general module documentation about hooks inserted before specific instructions
#[export_name = "__sanitizer_cov_trace_const_cmp2"]
extern "C" fn trace_const_cmp2(arg1: u16, arg2: u16) {
    let pc = unsafe { return_address() };
    handle_trace_cmp(pc, arg1, arg2);
}

/// `__sanitizer_cov_trace_const_cmp4`
///
/// See general module documentation about hooks inserted before specific instructions
#[export_name = "__sanitizer_cov_trace_const_cmp4"]
extern "C" fn trace_const_cmp4(arg1: u32, arg2: u32) {
    let pc = unsafe { return_address() };
    handle_trace_cmp(pc, arg1, arg2);
}

/// `__sanitizer_cov_trace_const_cmp8`
///
/// See general module documentation about hooks inserted before specific instructions
#[export_name = "__sanitizer_cov_trace_const_cmp8"]
extern "C" fn trace_const_cmp8(arg1: u64, arg2: u64) {
    let pc = unsafe { return_address() };
    handle_trace_cmp(pc, arg1, arg2);
}

/// `__sanitizer_cov_trace_switch`
///
/// Each case constant is treated as a separate comparison of the switch
/// operand, at consecutive sites starting from the PC of the switch. Both
/// are scored at the operand width given in `Cases[1]`.
#[export_name = "__sanitizer_cov_trace_switch"]
unsafe extern "C" fn trace_switch(val: u64, cases: *const u64) {
    let pc = return_address();
    if cases.is_null() {
        return;
    }
    let number_of_cases = *cases as usize;
    let cases = slice::from_raw_parts(cases, number_of_cases + 2);
    let bits = cases[1];
    for (i, &case) in cases[2..].iter().enumerate() {
        let (hamming, absolute) = closeness_at_width(val, case, bits);
        handle_cmp_scores(pc.wrapping_add(i), hamming, absolute);
    }
}
