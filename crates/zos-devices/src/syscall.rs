//! Device syscalls: Sleep, TermRead, TermWrite
//!
//! Each operation runs on the calling process. Arguments are validated
//! before any shared state is touched; a valid request may suspend the
//! caller until the matching driver resumes it.
//!
//! [`dispatch`] is the raw entry point used by the syscall trap: it takes
//! the ABI arguments, runs the operation and produces a [`SyscallResult`]
//! whose [`to_abi`](SyscallResult::to_abi) value is what the caller's
//! return register receives.

use zos_hal::HAL;

use crate::error::DeviceError;
use crate::subsystem::DeviceSubsystem;
use crate::terminal::OutputCursor;

// ============================================================================
// Syscall numbers
// ============================================================================

/// Suspend the caller for a number of seconds
pub const SYS_SLEEP: u32 = 0x60;
/// Read one line from a terminal
pub const SYS_TERM_READ: u32 = 0x61;
/// Write bytes to a terminal
pub const SYS_TERM_WRITE: u32 = 0x62;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// A decoded device syscall
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Syscall {
    Sleep { seconds: i32 },
    TermRead { unit: i32, max_bytes: i32 },
    /// Only the first `length` bytes of `data` are written.
    TermWrite { unit: i32, data: Vec<u8>, length: i32 },
}

impl Syscall {
    /// Syscall number
    pub fn number(&self) -> u32 {
        match self {
            Syscall::Sleep { .. } => SYS_SLEEP,
            Syscall::TermRead { .. } => SYS_TERM_READ,
            Syscall::TermWrite { .. } => SYS_TERM_WRITE,
        }
    }

    /// Register arguments as recorded in the audit log
    fn args(&self) -> [u32; 4] {
        match self {
            Syscall::Sleep { seconds } => [*seconds as u32, 0, 0, 0],
            Syscall::TermRead { unit, max_bytes } => [*unit as u32, *max_bytes as u32, 0, 0],
            Syscall::TermWrite { unit, length, .. } => [*unit as u32, *length as u32, 0, 0],
        }
    }
}

/// Outcome of a dispatched syscall
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyscallResult {
    /// Success with a count (0 for Sleep, bytes written for TermWrite)
    Ok(u64),
    /// Success with the bytes read
    Data(Vec<u8>),
    Err(DeviceError),
}

impl SyscallResult {
    /// Value for the caller's return register (negative = error)
    pub fn to_abi(&self) -> i64 {
        match self {
            SyscallResult::Ok(n) => *n as i64,
            SyscallResult::Data(bytes) => bytes.len() as i64,
            SyscallResult::Err(e) => e.code(),
        }
    }
}

/// Run a device syscall on behalf of the current process.
pub fn dispatch<H: HAL>(sys: &DeviceSubsystem<H>, syscall: Syscall) -> SyscallResult {
    match syscall {
        Syscall::Sleep { seconds } => match sys.sleep(seconds) {
            Ok(()) => SyscallResult::Ok(0),
            Err(e) => SyscallResult::Err(e),
        },
        Syscall::TermRead { unit, max_bytes } => {
            let Ok(max_bytes) = usize::try_from(max_bytes) else {
                return sys.reject(&syscall, DeviceError::InvalidArgument("negative read size"));
            };
            // No line is longer than max_line.
            let mut buf = vec![0u8; max_bytes.min(sys.config().max_line)];
            match sys.term_read(unit, &mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    SyscallResult::Data(buf)
                }
                Err(e) => SyscallResult::Err(e),
            }
        }
        Syscall::TermWrite {
            unit,
            ref data,
            length,
        } => {
            let len = match usize::try_from(length) {
                Ok(len) if len <= data.len() => len,
                _ => {
                    return sys.reject(&syscall, DeviceError::InvalidArgument("write length out of range"));
                }
            };
            match sys.term_write(unit, &data[..len]) {
                Ok(n) => SyscallResult::Ok(n as u64),
                Err(e) => SyscallResult::Err(e),
            }
        }
    }
}

/// ABI code of an operation result
fn result_code<T>(result: &Result<T, DeviceError>, ok: impl FnOnce(&T) -> i64) -> i64 {
    match result {
        Ok(v) => ok(v),
        Err(e) => e.code(),
    }
}

impl<H: HAL> DeviceSubsystem<H> {
    /// Record a syscall refused before it reached its operation
    fn reject(&self, syscall: &Syscall, err: DeviceError) -> SyscallResult {
        let req = self.log_request(syscall.number(), syscall.args());
        self.log_response(req, err.code());
        SyscallResult::Err(err)
    }

    // ========================================================================
    // Sleep
    // ========================================================================

    /// Suspend the caller for at least `seconds` seconds.
    ///
    /// `seconds == 0` returns at once. The caller resumes on the first
    /// clock interrupt at or after its wake time.
    pub fn sleep(&self, seconds: i32) -> Result<(), DeviceError> {
        let req = self.log_request(SYS_SLEEP, [seconds as u32, 0, 0, 0]);
        let result = self.do_sleep(seconds);
        self.log_response(req, result_code(&result, |_| 0));
        result
    }

    fn do_sleep(&self, seconds: i32) -> Result<(), DeviceError> {
        let Ok(seconds) = u64::try_from(seconds) else {
            return Err(DeviceError::InvalidArgument("negative sleep time"));
        };
        if seconds == 0 {
            return Ok(());
        }
        if !self.is_active() {
            return Err(DeviceError::NotActive);
        }

        let hal = self.hal();
        let pid = hal.current_pid();
        let wake_at = hal
            .now_micros()
            .saturating_add(seconds.saturating_mul(MICROS_PER_SECOND));

        {
            let mut queue = self.timer.lock();
            // Checked under the timer lock so shutdown's drain sees us.
            if !self.is_active() {
                return Err(DeviceError::NotActive);
            }
            if let Err(e) = queue.insert(pid, wake_at) {
                drop(queue);
                hal.debug_write(&format!("[clock] sleep for PID {}: {}, halting", pid, e));
                hal.halt(1);
            }
        }

        loop {
            hal.block_me()?;
            if hal.now_micros() >= wake_at {
                return Ok(());
            }
            if !self.is_active() {
                return Err(DeviceError::Abandoned);
            }
        }
    }

    // ========================================================================
    // TermRead
    // ========================================================================

    /// Read one completed line from `unit` into `buf`.
    ///
    /// Suspends until a line is available. Copies at most `buf.len()`
    /// bytes; the rest of the line is discarded. Returns the byte count.
    pub fn term_read(&self, unit: i32, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let req = self.log_request(SYS_TERM_READ, [unit as u32, buf.len() as u32, 0, 0]);
        let result = self.do_term_read(unit, buf);
        self.log_response(req, result_code(&result, |n| *n as i64));
        result
    }

    fn do_term_read(&self, unit: i32, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let terminal = self.unit_arg(unit)?;
        if !self.is_active() {
            return Err(DeviceError::NotActive);
        }
        let hal = self.hal();
        let pid = hal.current_pid();

        let _reader = terminal.reader_lock.lock();
        loop {
            {
                let mut state = terminal.state.lock();
                if let Some((n, freed)) = state.take_line(buf) {
                    // A held line was stored: receive interrupts back on.
                    // On failure the error is logged and input stays held.
                    if let Some(ctrl) = freed.output {
                        let _ = self.write_control(terminal.unit(), ctrl);
                    }
                    drop(state);
                    if freed.stalled {
                        hal.debug_write(&format!(
                            "[term {}] line buffer full, holding input",
                            terminal.unit()
                        ));
                    }
                    self.resume_all(&freed.wake);
                    return Ok(n);
                }
                if !self.is_active() {
                    return Err(DeviceError::Abandoned);
                }
                state.waiting_reader = Some(pid);
            }
            hal.block_me()?;
        }
    }

    // ========================================================================
    // TermWrite
    // ========================================================================

    /// Transmit `data` on `unit`, returning once every byte has been sent.
    ///
    /// Writes on one unit never interleave. An empty write returns 0
    /// without touching the device.
    pub fn term_write(&self, unit: i32, data: &[u8]) -> Result<usize, DeviceError> {
        let req = self.log_request(SYS_TERM_WRITE, [unit as u32, data.len() as u32, 0, 0]);
        let result = self.do_term_write(unit, data);
        self.log_response(req, result_code(&result, |n| *n as i64));
        result
    }

    fn do_term_write(&self, unit: i32, data: &[u8]) -> Result<usize, DeviceError> {
        let terminal = self.unit_arg(unit)?;
        if data.is_empty() {
            return Ok(0);
        }
        if !self.is_active() {
            return Err(DeviceError::NotActive);
        }
        let hal = self.hal();
        let pid = hal.current_pid();

        let _writer = terminal.writer_lock.lock();
        {
            let mut state = terminal.state.lock();
            if !self.is_active() {
                return Err(DeviceError::NotActive);
            }
            state.cursor = Some(OutputCursor::new(data.to_vec(), pid));

            // Ask for a ready interrupt; the driver sends from there. The
            // device raises it once the transmitter is idle. Written under
            // the state lock so it cannot reorder against the driver's
            // control words.
            if let Err(e) = self.write_control(terminal.unit(), state.control_word()) {
                state.cursor = None;
                return Err(e);
            }
        }

        loop {
            hal.block_me()?;
            let mut state = terminal.state.lock();
            let still_mine = state.cursor.as_ref().is_some_and(|c| c.owner() == pid);
            if !still_mine {
                return Ok(data.len());
            }
            if !self.is_active() {
                state.cursor = None;
                return Err(DeviceError::Abandoned);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::syslog::SysEventType;
    use std::sync::Arc;
    use std::time::Duration;
    use zos_hal::term::{self, DEV_BUSY};
    use zos_hal::DeviceClass;
    use zos_hal_mock::SimHal;

    fn setup() -> (Arc<SimHal>, Arc<DeviceSubsystem<SimHal>>) {
        let hal = Arc::new(SimHal::new(2));
        let sys =
            DeviceSubsystem::init(hal.clone(), DeviceConfig::default().with_terminal_units(2))
                .unwrap();
        (hal, sys)
    }

    #[test]
    fn test_sleep_zero_returns_immediately() {
        let (_hal, sys) = setup();
        assert_eq!(sys.sleep(0), Ok(()));
        assert_eq!(sys.pending_sleepers(), 0);
    }

    #[test]
    fn test_sleep_negative_is_invalid() {
        let (_hal, sys) = setup();
        assert_eq!(
            sys.sleep(-1),
            Err(DeviceError::InvalidArgument("negative sleep time"))
        );
        assert_eq!(sys.pending_sleepers(), 0);
    }

    #[test]
    fn test_invalid_units() {
        let (_hal, sys) = setup();
        let mut buf = [0u8; 8];
        assert!(matches!(
            sys.term_read(2, &mut buf),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            sys.term_read(-1, &mut buf),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            sys.term_write(5, b"x"),
            Err(DeviceError::InvalidArgument(_))
        ));
        // Unit is checked before length.
        assert!(matches!(
            sys.term_write(5, b""),
            Err(DeviceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_write_returns_zero() {
        let (hal, sys) = setup();
        assert_eq!(sys.term_write(0, b""), Ok(0));
        assert!(hal.transmitted(0).is_empty());
        assert!(!sys.terminal(0).unwrap().is_writing());
    }

    #[test]
    fn test_read_buffered_line_without_driver() {
        let (_hal, sys) = setup();
        sys.terminal(1).unwrap().state.lock().lines.try_push(b"hi\n");

        let mut buf = [0u8; 10];
        assert_eq!(sys.term_read(1, &mut buf), Ok(3));
        assert_eq!(&buf[..3], b"hi\n");
    }

    #[test]
    fn test_requests_after_shutdown() {
        let (_hal, sys) = setup();
        sys.shutdown();
        assert_eq!(sys.sleep(1), Err(DeviceError::NotActive));
        assert_eq!(sys.term_write(0, b"x"), Err(DeviceError::NotActive));
        let mut buf = [0u8; 4];
        assert_eq!(sys.term_read(0, &mut buf), Err(DeviceError::NotActive));
        // Validation still comes first.
        assert!(matches!(sys.sleep(-3), Err(DeviceError::InvalidArgument(_))));
    }

    #[test]
    fn test_dispatch_validation() {
        let (_hal, sys) = setup();
        let r = dispatch(&sys, Syscall::Sleep { seconds: -1 });
        assert_eq!(r.to_abi(), -1);

        let r = dispatch(&sys, Syscall::TermRead { unit: 0, max_bytes: -4 });
        assert_eq!(r.to_abi(), -1);

        let r = dispatch(
            &sys,
            Syscall::TermWrite {
                unit: 0,
                data: b"abc".to_vec(),
                length: 4,
            },
        );
        assert_eq!(r.to_abi(), -1);

        let r = dispatch(
            &sys,
            Syscall::TermWrite {
                unit: 0,
                data: b"abc".to_vec(),
                length: 0,
            },
        );
        assert_eq!(r, SyscallResult::Ok(0));
        assert_eq!(dispatch(&sys, Syscall::Sleep { seconds: 0 }).to_abi(), 0);
    }

    #[test]
    fn test_dispatch_read_truncates_to_line() {
        let (_hal, sys) = setup();
        sys.terminal(0).unwrap().state.lock().lines.try_push(b"hello\n");
        let r = dispatch(&sys, Syscall::TermRead { unit: 0, max_bytes: 80 });
        assert_eq!(r, SyscallResult::Data(b"hello\n".to_vec()));
        assert_eq!(r.to_abi(), 6);
    }

    #[test]
    fn test_dispatch_read_caps_buffer_at_max_line() {
        let (_hal, sys) = setup();
        sys.terminal(0).unwrap().state.lock().lines.try_push(b"ok\n");
        let r = dispatch(
            &sys,
            Syscall::TermRead {
                unit: 0,
                max_bytes: i32::MAX,
            },
        );
        let SyscallResult::Data(bytes) = r else {
            panic!("expected data, got {:?}", r);
        };
        assert_eq!(bytes, b"ok\n");
        assert!(bytes.capacity() <= sys.config().max_line);
    }

    #[test]
    fn test_read_releases_held_line() {
        let hal = Arc::new(SimHal::new(1));
        let sys = DeviceSubsystem::init(
            hal.clone(),
            DeviceConfig::default()
                .with_terminal_units(1)
                .with_line_buffer_depth(1),
        )
        .unwrap();
        {
            let mut state = sys.terminal(0).unwrap().state.lock();
            for &b in b"a\nb\n" {
                state.on_interrupt(term::status(DEV_BUSY, DEV_BUSY, b));
            }
            assert!(state.is_stalled());
        }
        // Typed while receive interrupts are off
        hal.device_output(DeviceClass::Terminal, 0, 0).unwrap();
        hal.receive_bytes(0, b"c\n");
        assert!(hal.wait_until_drained(DeviceClass::Terminal, 0, Duration::ZERO));

        let mut buf = [0u8; 8];
        assert_eq!(sys.term_read(0, &mut buf), Ok(2));
        assert_eq!(&buf[..2], b"a\n");
        let unit = sys.terminal(0).unwrap();
        assert!(!unit.is_stalled());
        assert_eq!(unit.buffered_lines(), 1);
        // Receive re-enabled: the held characters reach the driver queue.
        assert!(hal.receive_enabled(0));
        assert_eq!(hal.pending_interrupts(DeviceClass::Terminal, 0), 2);
    }

    #[test]
    fn test_syscalls_are_audited() {
        let (_hal, sys) = setup();
        dispatch(&sys, Syscall::TermRead { unit: 0, max_bytes: -1 });
        sys.sleep(0).unwrap();

        let events = sys.syslog_events();
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[0].event_type,
            SysEventType::Request {
                syscall_num: SYS_TERM_READ,
                ..
            }
        ));
        assert!(matches!(
            events[1].event_type,
            SysEventType::Response { request_id: 0, result: -1 }
        ));
        assert!(matches!(
            events[3].event_type,
            SysEventType::Response { request_id: 2, result: 0 }
        ));
    }

    #[test]
    fn test_syscall_numbers() {
        assert_eq!(Syscall::Sleep { seconds: 1 }.number(), SYS_SLEEP);
        assert_eq!(
            Syscall::TermRead { unit: 0, max_bytes: 1 }.number(),
            SYS_TERM_READ
        );
        assert_eq!(SyscallResult::Err(DeviceError::Abandoned).to_abi(), -2);
    }
}
