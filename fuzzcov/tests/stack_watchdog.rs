use std::process::Command;
use std::sync::atomic::AtomicU8;

use fuzzcov::{CounterMap, ExecutionCoverage};

/// Set in the environment of the child process that is expected to abort.
const ABORTING_CHILD: &str = "FUZZCOV_TEST_ABORTING_CHILD";

const PC: usize = 0x1000;

#[inline(never)]
fn recurse(coverage: &ExecutionCoverage<'_>, depth: usize) -> usize {
    let frame = std::hint::black_box([depth as u8; 256]);
    coverage.update_max_stack(PC);
    if depth == 0 {
        return frame[0] as usize;
    }
    recurse(coverage, depth - 1) + frame[1] as usize
}

fn new_coverage(stack_limit: usize) -> ExecutionCoverage<'static> {
    let counters: &'static [AtomicU8] = Box::leak((0..8).map(|_| AtomicU8::new(0)).collect());
    ExecutionCoverage::with_stack_limit(CounterMap::new(counters), stack_limit).unwrap()
}

#[test]
fn deeper_recursion_is_new_coverage() {
    let coverage = new_coverage(1 << 20);
    assert_eq!(coverage.max_allowed_stack_usage(), 1 << 20);

    coverage.reset_state();
    recurse(&coverage, 16);
    let first = coverage.max_stack_used();
    assert!(first > 8 * 256, "measured only {} bytes", first);
    assert!(coverage.new_coverage_found());
    assert_eq!(coverage.max_stack_at(PC), first);

    coverage.reset_state();
    recurse(&coverage, 8);
    assert!(coverage.max_stack_used() < first);
    assert!(!coverage.new_coverage_found());

    coverage.reset_state();
    recurse(&coverage, 32);
    assert!(coverage.max_stack_used() > first);
    assert!(coverage.new_coverage_found());
    assert_eq!(coverage.max_stack_at(PC), coverage.max_stack_used());
}

#[test]
fn stack_is_not_measured_before_the_first_reset() {
    let observed = std::thread::spawn(|| {
        let coverage = new_coverage(256);
        recurse(&coverage, 64);
        (coverage.max_stack_used(), coverage.new_coverage_found())
    })
    .join()
    .unwrap();
    assert_eq!(observed, (0, false));
}

#[test]
fn exceeding_the_stack_limit_aborts() {
    if std::env::var_os(ABORTING_CHILD).is_some() {
        let coverage = new_coverage(4096);
        coverage.reset_state();
        recurse(&coverage, 1000);
        // reaching this point makes the child succeed, which fails the parent
        return;
    }

    let output = Command::new(std::env::current_exe().unwrap())
        .args(["exceeding_the_stack_limit_aborts", "--exact", "--nocapture", "--test-threads=1"])
        .env(ABORTING_CHILD, "1")
        .output()
        .unwrap();

    assert!(!output.status.success());
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        const SIGABRT: i32 = 6;
        assert_eq!(output.status.signal(), Some(SIGABRT));
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bytes of stack"), "stderr: {}", stderr);
    assert!(stderr.contains("Configured limit is 4096"), "stderr: {}", stderr);
}
