//! Active/sleep phase scheduling shared by every load worker.
//!
//! A schedule with a zero sleep phase is *continuous*: its owner runs the
//! active body back to back and never pauses.  Otherwise the owner runs the
//! body for `active` seconds, pauses for `sleep` seconds, and repeats.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::shutdown::Shutdown;

// ---------------------------------------------------------------------------
// ScheduleSpec
// ---------------------------------------------------------------------------

/// Active/sleep durations, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub active_secs: u64,
    pub sleep_secs: u64,
}

impl ScheduleSpec {
    /// Never-pausing schedule.
    pub const CONTINUOUS: ScheduleSpec = ScheduleSpec {
        active_secs: 0,
        sleep_secs: 0,
    };

    /// Build a schedule from the configured phases.
    ///
    /// When only one phase is given the other mirrors it; when neither is
    /// given the schedule is continuous.
    pub fn symmetric(active_secs: u64, sleep_secs: u64) -> Self {
        match (active_secs, sleep_secs) {
            (0, 0) => Self::CONTINUOUS,
            (0, s) => Self {
                active_secs: s,
                sleep_secs: s,
            },
            (a, 0) => Self {
                active_secs: a,
                sleep_secs: a,
            },
            (a, s) => Self {
                active_secs: a,
                sleep_secs: s,
            },
        }
    }

    pub fn is_continuous(&self) -> bool {
        self.sleep_secs == 0
    }

    /// The same schedule with active and sleep phases exchanged.
    pub fn swapped(&self) -> Self {
        Self {
            active_secs: self.sleep_secs,
            sleep_secs: self.active_secs,
        }
    }

    pub fn active(&self) -> Duration {
        Duration::from_secs(self.active_secs)
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_secs(self.sleep_secs)
    }

    /// Drive `step` through the phase loop until `shutdown` fires or the step
    /// breaks.
    ///
    /// `step` is one unit of active-phase work; it is called repeatedly while
    /// the current active window is open.  Cancellation is checked before
    /// every step and interrupts the sleep phase.
    pub fn run<F>(&self, shutdown: &Shutdown, mut step: F)
    where
        F: FnMut() -> ControlFlow<()>,
    {
        loop {
            // An end too far out to represent is treated as no end.
            let active_until = if self.is_continuous() {
                None
            } else {
                Instant::now().checked_add(self.active())
            };

            while active_until.map_or(true, |deadline| Instant::now() < deadline) {
                if shutdown.is_cancelled() || step().is_break() {
                    return;
                }
            }

            if shutdown.is_cancelled() {
                return;
            }
            if !self.is_continuous() && shutdown.sleep(self.sleep()) {
                return;
            }
        }
    }
}

impl std::fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_continuous() {
            f.write_str("continuous")
        } else {
            write!(f, "{}s on / {}s off", self.active_secs, self.sleep_secs)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn test_symmetric_phases() {
        assert_eq!(ScheduleSpec::symmetric(0, 0), ScheduleSpec::CONTINUOUS);
        assert_eq!(
            ScheduleSpec::symmetric(7, 0),
            ScheduleSpec {
                active_secs: 7,
                sleep_secs: 7
            }
        );
        assert_eq!(
            ScheduleSpec::symmetric(0, 3),
            ScheduleSpec {
                active_secs: 3,
                sleep_secs: 3
            }
        );
        assert_eq!(
            ScheduleSpec::symmetric(2, 1),
            ScheduleSpec {
                active_secs: 2,
                sleep_secs: 1
            }
        );
    }

    #[test]
    fn test_swapped() {
        let s = ScheduleSpec::symmetric(2, 5).swapped();
        assert_eq!(s.active_secs, 5);
        assert_eq!(s.sleep_secs, 2);
        assert!(ScheduleSpec::CONTINUOUS.swapped().is_continuous());
    }

    #[test]
    fn test_display() {
        assert_eq!(ScheduleSpec::CONTINUOUS.to_string(), "continuous");
        assert_eq!(ScheduleSpec::symmetric(2, 1).to_string(), "2s on / 1s off");
    }

    #[test]
    fn test_continuous_never_sleeps() {
        let shutdown = Shutdown::new();
        let mut calls = 0u32;
        let start = Instant::now();
        ScheduleSpec::CONTINUOUS.run(&shutdown, || {
            calls += 1;
            if calls == 10_000 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(calls, 10_000);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_pulsed_alternates_active_and_sleep() {
        // {active=2, sleep=1}: roughly 2s of steps, then a 1s gap.
        let schedule = ScheduleSpec::symmetric(2, 1);
        let shutdown = Shutdown::new();
        let stamps: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let worker = {
            let shutdown = shutdown.clone();
            let stamps = stamps.clone();
            thread::spawn(move || {
                schedule.run(&shutdown, || {
                    stamps.lock().unwrap().push(Instant::now());
                    thread::sleep(Duration::from_millis(20));
                    ControlFlow::Continue(())
                });
            })
        };

        thread::sleep(Duration::from_millis(3_500));
        shutdown.cancel();
        worker.join().unwrap();

        let stamps = stamps.lock().unwrap();
        let first = stamps[0];
        let largest_gap = stamps
            .windows(2)
            .map(|w| w[1] - w[0])
            .max()
            .unwrap();
        assert!(
            largest_gap >= Duration::from_millis(900),
            "expected a sleep phase, largest gap {:?}",
            largest_gap
        );

        // Steps stop for the sleep window then resume.
        let gap_start = stamps
            .windows(2)
            .find(|w| w[1] - w[0] == largest_gap)
            .map(|w| w[0])
            .unwrap();
        let active_len = gap_start - first;
        assert!(
            active_len >= Duration::from_millis(1_800) && active_len <= Duration::from_millis(2_300),
            "active phase lasted {:?}",
            active_len
        );
        assert!(stamps.last().unwrap().duration_since(gap_start) >= Duration::from_millis(900));
    }

    #[test]
    fn test_cancel_interrupts_sleep_phase() {
        let schedule = ScheduleSpec::symmetric(1, 60);
        let shutdown = Shutdown::new();
        let worker = {
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                schedule.run(&shutdown, || {
                    thread::sleep(Duration::from_millis(10));
                    ControlFlow::Continue(())
                })
            })
        };

        thread::sleep(Duration::from_millis(1_300));
        let cancelled_at = Instant::now();
        shutdown.cancel();
        worker.join().unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_huge_phases_do_not_overflow() {
        // Accepted by the CLI parser, far beyond what `Instant` can add.
        let secs = crate::units::parse_seconds("10000000000000000000").unwrap();
        let schedule = ScheduleSpec::symmetric(secs, 0);
        assert!(!schedule.is_continuous());

        let shutdown = Shutdown::new();
        let mut calls = 0u32;
        schedule.run(&shutdown, || {
            calls += 1;
            if calls == 100 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(calls, 100);

        let remote = shutdown.clone();
        let worker = thread::spawn(move || {
            ScheduleSpec::symmetric(1, secs).run(&remote, || ControlFlow::Continue(()))
        });
        thread::sleep(Duration::from_millis(1_200));
        shutdown.cancel();
        worker.join().unwrap();
    }
}
