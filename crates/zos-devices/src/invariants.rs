//! Runtime-checkable invariants of the device layer
//!
//! Used by tests and debug builds to verify the shared state after each
//! step.
//!
//! # Invariants
//!
//! 1. **Timer Order**: The sleep queue is ordered by wake time, ties by
//!    insertion order
//! 2. **Single Sleep**: No process has more than one pending sleep
//! 3. **Handle Monotonicity**: Every queued handle precedes the next one
//!    to be issued
//! 4. **Line Bounds**: Buffered lines and the accumulator fit `max_line`
//! 5. **Ring Consistency**: `tail == (head + count) % capacity`
//! 6. **Stall Consistency**: A held line implies a full buffer and a
//!    non-empty accumulator; backlogged input implies a held line
//! 7. **Cursor Bounds**: An output cursor never runs past its data

use std::collections::BTreeSet;

use zos_hal::HAL;

use crate::subsystem::DeviceSubsystem;
use crate::terminal::TerminalState;
use crate::timer::SleepRequest;

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

/// Check all device invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_all_invariants<H: HAL>(sys: &DeviceSubsystem<H>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let (entries, next_seq) = {
        let timer = sys.timer.lock();
        (timer.entries(), timer.next_seq())
    };
    violations.extend(check_timer_queue(&entries, next_seq));

    for terminal in sys.terminals() {
        let unit = terminal.unit();
        violations.extend(terminal.with_state(|state| check_terminal_state(unit, state)));
    }

    violations
}

/// Invariants 1-3 over a wake-ordered snapshot of the sleep queue
pub fn check_timer_queue(entries: &[SleepRequest], next_seq: u64) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for pair in entries.windows(2) {
        if pair[0] > pair[1] {
            violations.push(InvariantViolation {
                invariant: "timer_order",
                description: format!(
                    "PID {} (wake {}) queued ahead of PID {} (wake {})",
                    pair[0].pid, pair[0].wake_at, pair[1].pid, pair[1].wake_at
                ),
            });
        }
    }

    let mut seen = BTreeSet::new();
    for req in entries {
        if !seen.insert(req.pid) {
            violations.push(InvariantViolation {
                invariant: "single_sleep",
                description: format!("PID {} has more than one pending sleep", req.pid),
            });
        }
        if req.handle.seq() >= next_seq {
            violations.push(InvariantViolation {
                invariant: "handle_monotonicity",
                description: format!(
                    "handle {} not below next sequence {}",
                    req.handle.seq(),
                    next_seq
                ),
            });
        }
    }

    violations
}

/// Invariants 4-7 for one terminal unit
pub fn check_terminal_state(unit: u32, state: &TerminalState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let lines = state.lines();
    let max_line = state.max_line();

    for (i, line) in lines.lines().enumerate() {
        if line.len() > max_line {
            violations.push(InvariantViolation {
                invariant: "line_bounds",
                description: format!(
                    "unit {} line {} is {} bytes (max {})",
                    unit,
                    i,
                    line.len(),
                    max_line
                ),
            });
        }
    }
    if state.accumulator().len() > max_line {
        violations.push(InvariantViolation {
            invariant: "line_bounds",
            description: format!(
                "unit {} accumulator holds {} bytes (max {})",
                unit,
                state.accumulator().len(),
                max_line
            ),
        });
    }

    if lines.tail() != (lines.head() + lines.len()) % lines.capacity() {
        violations.push(InvariantViolation {
            invariant: "ring_consistency",
            description: format!(
                "unit {} head {} count {} tail {} capacity {}",
                unit,
                lines.head(),
                lines.len(),
                lines.tail(),
                lines.capacity()
            ),
        });
    }

    if state.is_stalled() && (!lines.is_full() || state.accumulator().is_empty()) {
        violations.push(InvariantViolation {
            invariant: "stall_consistency",
            description: format!(
                "unit {} stalled with {} of {} slots used",
                unit,
                lines.len(),
                lines.capacity()
            ),
        });
    }
    if !state.is_stalled() && !state.backlog().is_empty() {
        violations.push(InvariantViolation {
            invariant: "stall_consistency",
            description: format!(
                "unit {} has {} backlogged bytes but no held line",
                unit,
                state.backlog().len()
            ),
        });
    }

    if let Some(cursor) = state.cursor() {
        if cursor.position() > cursor.len() {
            violations.push(InvariantViolation {
                invariant: "cursor_bounds",
                description: format!(
                    "unit {} cursor at {} of {} bytes",
                    unit,
                    cursor.position(),
                    cursor.len()
                ),
            });
        }
    }

    violations
}

/// Assert all invariants hold (panic if not)
pub fn assert_invariants<H: HAL>(sys: &DeviceSubsystem<H>) {
    let violations = check_all_invariants(sys);
    if let Some(v) = violations.first() {
        panic!("Invariant violated: {} ({})", v.invariant, v.description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, OverflowPolicy};
    use crate::timer::TimerQueue;
    use std::sync::Arc;
    use zos_hal::ProcessId;
    use zos_hal_mock::SimHal;

    fn subsystem() -> Arc<DeviceSubsystem<SimHal>> {
        let hal = Arc::new(SimHal::new(2));
        DeviceSubsystem::init(
            hal,
            DeviceConfig::default()
                .with_terminal_units(2)
                .with_line_buffer_depth(1)
                .with_max_line(4),
        )
        .unwrap()
    }

    #[test]
    fn test_invariants_hold_for_new_subsystem() {
        let sys = subsystem();
        assert!(check_all_invariants(&sys).is_empty());
        assert_invariants(&sys);
    }

    #[test]
    fn test_invariants_hold_after_queue_activity() {
        let sys = subsystem();
        {
            let mut timer = sys.timer.lock();
            timer.insert(ProcessId(1), 30).unwrap();
            timer.insert(ProcessId(2), 10).unwrap();
            timer.insert(ProcessId(3), 10).unwrap();
            timer.pop_due(10);
        }
        assert!(check_all_invariants(&sys).is_empty());
    }

    #[test]
    fn test_detects_disordered_snapshot() {
        let mut q = TimerQueue::new();
        q.insert(ProcessId(1), 10).unwrap();
        q.insert(ProcessId(2), 20).unwrap();
        let mut entries = q.entries();
        entries.reverse();

        let v = check_timer_queue(&entries, q.next_seq());
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].invariant, "timer_order");
    }

    #[test]
    fn test_detects_duplicate_sleeper() {
        let mut q = TimerQueue::new();
        q.insert(ProcessId(1), 10).unwrap();
        let mut entries = q.entries();
        entries.push(entries[0].clone());

        let v = check_timer_queue(&entries, q.next_seq());
        assert!(v.iter().any(|v| v.invariant == "single_sleep"));
    }

    #[test]
    fn test_detects_stale_next_seq() {
        let mut q = TimerQueue::new();
        q.insert(ProcessId(1), 10).unwrap();
        let v = check_timer_queue(&q.entries(), 0);
        assert_eq!(v[0].invariant, "handle_monotonicity");
    }

    #[test]
    fn test_detects_oversized_accumulator() {
        let mut st = TerminalState::new(1, 4, OverflowPolicy::Block);
        st.accumulator.extend_from_slice(b"too long");
        let v = check_terminal_state(0, &st);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].invariant, "line_bounds");
    }

    #[test]
    fn test_detects_bogus_stall() {
        let mut st = TerminalState::new(2, 4, OverflowPolicy::Block);
        st.line_pending = true;
        let v = check_terminal_state(0, &st);
        assert!(v.iter().all(|v| v.invariant == "stall_consistency"));
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn test_detects_orphaned_backlog() {
        let mut st = TerminalState::new(2, 4, OverflowPolicy::Block);
        st.backlog.push_back(b'x');
        let v = check_terminal_state(0, &st);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].invariant, "stall_consistency");
    }

    #[test]
    #[should_panic(expected = "Invariant violated")]
    fn test_assert_invariants_panics_on_violation() {
        let sys = subsystem();
        sys.terminal(1).unwrap().state.lock().line_pending = true;
        assert_invariants(&sys);
    }
}
