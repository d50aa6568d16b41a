use std::time::Instant;

use fuzzcov_common::{CoverageEvent, CoverageStats};
use nu_ansi_term::Color;

use crate::arg::STACK_LIMIT_ENV;

/// Prints coverage events to the console, prefixed by the time elapsed since
/// the reporter was created.
pub struct Reporter {
    initial_instant: Instant,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            initial_instant: Instant::now(),
        }
    }

    pub fn report_event(&self, event: CoverageEvent, stats: Option<&CoverageStats>) {
        let time_since_start = self.initial_instant.elapsed();
        let time_since_start_display = {
            let time_since_start_millis = time_since_start.as_millis();
            if time_since_start_millis > 10_000 {
                format!("{}s ", time_since_start.as_secs())
            } else {
                format!("{}ms ", time_since_start_millis)
            }
        };
        print!("{} ", time_since_start_display);
        match event {
            CoverageEvent::Start => {
                println!("{}", Color::Yellow.paint("START"));
                return;
            }
            CoverageEvent::Stop => {
                println!("{}", Color::Yellow.paint("STOP"));
                return;
            }
            CoverageEvent::Pulse => {
                print!("{} ", Color::Yellow.paint("PULSE"));
            }
            CoverageEvent::NewEdges(count) => {
                print!("{} ", Color::Cyan.paint(format!("NEW +{}", count)));
            }
            CoverageEvent::NewSignal => {
                print!("{} ", Color::LightCyan.paint("SIGNAL"));
            }
            CoverageEvent::CountersRegistered(count) => {
                println!("{} {} edges", Color::Yellow.paint("COUNTERS"), count);
                return;
            }
        }
        if let Some(stats) = stats {
            print!("{}", stats);
        }
        println!();
    }
}

/// Reports a stack limit violation on stderr. Called right before the
/// process aborts, so it cannot rely on a `Reporter` being reachable.
pub(crate) fn report_stack_limit_exceeded(used: usize, limit: usize) {
    eprintln!(
        "{} Code under test used {} bytes of stack. Configured limit is {}. \
         You can change the limit by setting the {} environment variable.",
        Color::Red.bold().paint("[!]"),
        used,
        limit,
        STACK_LIMIT_ENV,
    );
}
