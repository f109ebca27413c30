//! Terminal units: line discipline and output serialization
//!
//! Each unit owns three locks:
//!
//! - `state` guards the line buffer, the input accumulator, the output
//!   cursor and the waiter registrations
//! - `reader_lock` admits one `TermRead` at a time
//! - `writer_lock` admits one `TermWrite` at a time
//!
//! A reader and a writer on the same unit proceed independently.
//!
//! Under [`OverflowPolicy::Block`] a line completed while the buffer is
//! full stays in the accumulator and receive interrupts are switched off,
//! so further typing waits in the device. Characters the device had
//! already delivered go to a backlog. Transmit keeps running. The read
//! that frees a slot stores the held line, replays the backlog and turns
//! receive interrupts back on.
//!
//! The interrupt handling itself is pure: [`TerminalState::on_interrupt`]
//! mutates the buffers and reports which device output and which process
//! resumptions the driver must carry out (see `driver.rs`). Every control
//! word for a unit is written with its state lock held.

mod driver;
mod line_buffer;

pub(crate) use driver::run_terminal_driver;
pub use line_buffer::LineBuffer;

use std::collections::VecDeque;

use parking_lot::Mutex;
use zos_hal::term::{self, CTRL_RECV_INT, CTRL_XMIT_CHAR, CTRL_XMIT_INT, DEV_BUSY, DEV_READY};
use zos_hal::ProcessId;

use crate::config::OverflowPolicy;

/// Remaining bytes of an in-flight `TermWrite`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputCursor {
    data: Vec<u8>,
    pos: usize,
    owner: ProcessId,
}

impl OutputCursor {
    pub fn new(data: Vec<u8>, owner: ProcessId) -> Self {
        Self { data, pos: 0, owner }
    }

    /// Take the next byte to transmit
    pub fn next_byte(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Process waiting for this write to drain
    pub fn owner(&self) -> ProcessId {
        self.owner
    }
}

/// Side effects requested by one interrupt
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterruptOutcome {
    /// Control word to write to the terminal
    pub output: Option<u32>,
    /// Processes to resume
    pub wake: Vec<ProcessId>,
    /// A completed line is now held for lack of a free slot
    pub stalled: bool,
}

/// Mutable state of one terminal, guarded by the unit's state lock
#[derive(Debug)]
pub struct TerminalState {
    pub(crate) lines: LineBuffer,
    pub(crate) accumulator: Vec<u8>,
    pub(crate) cursor: Option<OutputCursor>,
    /// Reader suspended until a line is completed
    pub(crate) waiting_reader: Option<ProcessId>,
    /// The accumulator holds a completed line that did not fit
    pub(crate) line_pending: bool,
    /// Characters delivered while a line was held
    pub(crate) backlog: VecDeque<u8>,
    max_line: usize,
    policy: OverflowPolicy,
    dropped_lines: u64,
}

impl TerminalState {
    pub fn new(depth: usize, max_line: usize, policy: OverflowPolicy) -> Self {
        Self {
            lines: LineBuffer::new(depth, max_line),
            accumulator: Vec::with_capacity(max_line),
            cursor: None,
            waiting_reader: None,
            line_pending: false,
            backlog: VecDeque::new(),
            max_line,
            policy,
            dropped_lines: 0,
        }
    }

    /// Apply one terminal status word.
    ///
    /// Transmit is serviced whether or not a line is held. A control word
    /// is produced when a byte goes out or when receive interrupts have to
    /// be switched off.
    pub fn on_interrupt(&mut self, status: u32) -> InterruptOutcome {
        let mut outcome = InterruptOutcome::default();
        let was_pending = self.line_pending;
        let sent = if term::stat_xmit(status) == DEV_READY {
            self.transmit_next(&mut outcome)
        } else {
            None
        };
        if term::stat_recv(status) == DEV_BUSY {
            self.receive(term::stat_char(status), &mut outcome);
        }

        let ctrl = self.control_word();
        if let Some(ch) = sent {
            outcome.output = Some(term::ctrl_char(ctrl | CTRL_XMIT_CHAR, ch));
        } else if self.line_pending != was_pending {
            outcome.output = Some(ctrl);
        }
        outcome
    }

    /// Interrupt enables for the current state.
    ///
    /// Receive is on unless a line is held; transmit-ready is on while a
    /// write has bytes left.
    pub fn control_word(&self) -> u32 {
        let mut ctrl = 0;
        if !self.line_pending {
            ctrl |= CTRL_RECV_INT;
        }
        if self.cursor.is_some() {
            ctrl |= CTRL_XMIT_INT;
        }
        ctrl
    }

    fn transmit_next(&mut self, outcome: &mut InterruptOutcome) -> Option<u8> {
        let cursor = self.cursor.as_mut()?;
        let ch = cursor.next_byte()?;
        if cursor.remaining() == 0 {
            outcome.wake.push(cursor.owner());
            self.cursor = None;
        }
        Some(ch)
    }

    fn receive(&mut self, ch: u8, outcome: &mut InterruptOutcome) {
        if self.line_pending {
            self.backlog.push_back(ch);
            return;
        }
        self.accumulator.push(ch);
        if ch == b'\n' || self.accumulator.len() >= self.max_line {
            self.finalize_line(outcome);
        }
    }

    fn finalize_line(&mut self, outcome: &mut InterruptOutcome) {
        if self.lines.is_full() {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    self.lines.drop_oldest();
                    self.dropped_lines += 1;
                }
                OverflowPolicy::Block => {
                    self.line_pending = true;
                    outcome.stalled = true;
                    return;
                }
            }
        }
        self.lines.try_push(&self.accumulator);
        self.accumulator.clear();
        self.line_pending = false;
        if let Some(reader) = self.waiting_reader.take() {
            outcome.wake.push(reader);
        }
    }

    /// Store a held line if a slot is free, then replay the backlog until
    /// it runs out or the buffer fills again.
    fn release_pending_line(&mut self, outcome: &mut InterruptOutcome) {
        if !self.line_pending || self.lines.is_full() {
            return;
        }
        self.finalize_line(outcome);
        while !self.line_pending {
            let Some(ch) = self.backlog.pop_front() else {
                break;
            };
            self.receive(ch, outcome);
        }
    }

    /// Copy the oldest completed line into `out`, releasing its slot.
    ///
    /// Returns the byte count and the follow-up for the freed slot: the
    /// control word re-enabling receive when a held line got stored, and
    /// any process to resume.
    pub fn take_line(&mut self, out: &mut [u8]) -> Option<(usize, InterruptOutcome)> {
        let n = self.lines.pop_into(out)?;
        let mut outcome = InterruptOutcome::default();
        let was_pending = self.line_pending;
        self.release_pending_line(&mut outcome);
        if was_pending && !self.line_pending {
            outcome.output = Some(self.control_word());
        }
        Some((n, outcome))
    }

    /// Every process parked on this unit, removing the registrations
    pub(crate) fn take_all_waiters(&mut self) -> Vec<ProcessId> {
        let mut waiters = Vec::new();
        waiters.extend(self.waiting_reader.take());
        waiters.extend(self.cursor.as_ref().map(|c| c.owner()));
        waiters
    }

    pub fn lines(&self) -> &LineBuffer {
        &self.lines
    }

    pub fn accumulator(&self) -> &[u8] {
        &self.accumulator
    }

    pub fn cursor(&self) -> Option<&OutputCursor> {
        self.cursor.as_ref()
    }

    pub fn is_stalled(&self) -> bool {
        self.line_pending
    }

    /// Characters waiting behind a held line
    pub fn backlog(&self) -> &VecDeque<u8> {
        &self.backlog
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }

    /// Lines discarded under [`OverflowPolicy::DropOldest`]
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }
}

/// One terminal device and its serialization locks
#[derive(Debug)]
pub struct TerminalUnit {
    unit: u32,
    pub(crate) state: Mutex<TerminalState>,
    pub(crate) reader_lock: Mutex<()>,
    pub(crate) writer_lock: Mutex<()>,
}

impl TerminalUnit {
    pub fn new(unit: u32, depth: usize, max_line: usize, policy: OverflowPolicy) -> Self {
        Self {
            unit,
            state: Mutex::new(TerminalState::new(depth, max_line, policy)),
            reader_lock: Mutex::new(()),
            writer_lock: Mutex::new(()),
        }
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }

    /// Number of completed lines waiting for a reader
    pub fn buffered_lines(&self) -> usize {
        self.state.lock().lines.len()
    }

    /// Bytes of the line currently being typed
    pub fn accumulator_len(&self) -> usize {
        self.state.lock().accumulator.len()
    }

    /// Check whether a completed line is held for lack of space
    pub fn is_stalled(&self) -> bool {
        self.state.lock().line_pending
    }

    /// Lines discarded to make room for newer input
    pub fn dropped_lines(&self) -> u64 {
        self.state.lock().dropped_lines
    }

    /// Check whether a write is in flight
    pub fn is_writing(&self) -> bool {
        self.state.lock().cursor.is_some()
    }

    /// Process whose write is in flight
    pub fn writer(&self) -> Option<ProcessId> {
        self.state.lock().cursor.as_ref().map(|c| c.owner())
    }

    /// Run `f` with the unit state locked
    pub fn with_state<R>(&self, f: impl FnOnce(&TerminalState) -> R) -> R {
        f(&self.state.lock())
    }
}
