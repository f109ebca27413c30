//! Device subsystem state and lifecycle
//!
//! [`DeviceSubsystem`] owns everything shared between the syscall side and
//! the driver tasks: the timer queue, one [`TerminalUnit`] per terminal and
//! the syscall audit log. It is created once with [`DeviceSubsystem::init`]
//! and shared behind an `Arc`.
//!
//! Lock order: a unit's `reader_lock` or `writer_lock`, then that unit's
//! `state`. The timer lock and the syslog lock are never held together with
//! any other lock. No lock is held across `block_me`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use zos_hal::{DeviceClass, ProcessId, HAL};

use crate::clock::run_clock_driver;
use crate::config::DeviceConfig;
use crate::error::DeviceError;
use crate::sync::Mailbox;
use crate::syslog::{EventId, SysEvent, SysLog};
use crate::terminal::{run_terminal_driver, TerminalUnit};
use crate::timer::{SleepRequest, TimerQueue};

/// Shared state of the device layer
pub struct DeviceSubsystem<H: HAL> {
    hal: Arc<H>,
    config: DeviceConfig,
    active: AtomicBool,
    pub(crate) timer: Mutex<TimerQueue>,
    terminals: Vec<TerminalUnit>,
    /// Driver tasks report here once they are servicing interrupts
    ready: Mailbox<()>,
    syslog: Mutex<SysLog>,
    drivers: Mutex<Vec<ProcessId>>,
}

impl<H: HAL> DeviceSubsystem<H> {
    /// Build the subsystem: an empty timer queue and one idle terminal
    /// unit per configured terminal.
    ///
    /// No tasks are started; see [`start_driver_tasks`](Self::start_driver_tasks).
    pub fn init(hal: Arc<H>, config: DeviceConfig) -> Result<Arc<Self>, DeviceError> {
        config.validate()?;

        let terminals = (0..config.terminal_units as u32)
            .map(|unit| {
                TerminalUnit::new(
                    unit,
                    config.line_buffer_depth,
                    config.max_line,
                    config.overflow_policy,
                )
            })
            .collect();

        hal.debug_write(&format!(
            "[devices] init: {} terminals, {} lines x {} bytes, overflow {:?}",
            config.terminal_units, config.line_buffer_depth, config.max_line, config.overflow_policy
        ));

        Ok(Arc::new(Self {
            timer: Mutex::new(TimerQueue::with_limit(config.sleep_queue_limit)),
            ready: Mailbox::new(config.terminal_units + 1),
            terminals,
            hal,
            config,
            active: AtomicBool::new(true),
            syslog: Mutex::new(SysLog::new()),
            drivers: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the clock driver and one terminal driver per unit, returning
    /// once every driver is servicing interrupts.
    ///
    /// Calling this again after a successful start returns the running
    /// drivers without spawning new ones. A driver that cannot be spawned
    /// halts the machine with status 1.
    pub fn start_driver_tasks(self: &Arc<Self>) -> Result<Vec<ProcessId>, DeviceError> {
        if !self.is_active() {
            return Err(DeviceError::NotActive);
        }
        let mut drivers = self.drivers.lock();
        if !drivers.is_empty() {
            return Ok(drivers.clone());
        }

        let mut spawned = Vec::with_capacity(self.terminals.len() + 1);

        let sys = Arc::clone(self);
        match self
            .hal
            .spawn_task("clock driver", Box::new(move || run_clock_driver(sys)))
        {
            Ok(pid) => spawned.push(pid),
            Err(e) => self.spawn_failed("clock driver", e),
        }

        for unit in 0..self.terminals.len() as u32 {
            let name = format!("term driver {}", unit);
            let sys = Arc::clone(self);
            match self
                .hal
                .spawn_task(&name, Box::new(move || run_terminal_driver(sys, unit)))
            {
                Ok(pid) => spawned.push(pid),
                Err(e) => self.spawn_failed(&name, e),
            }
        }

        for _ in 0..spawned.len() {
            self.ready.recv();
        }

        self.hal.debug_write(&format!(
            "[devices] {} driver tasks running",
            spawned.len()
        ));
        drivers.extend_from_slice(&spawned);
        Ok(spawned)
    }

    /// Log a failed driver spawn and halt with status 1.
    fn spawn_failed(&self, name: &str, err: zos_hal::HalError) -> ! {
        self.hal
            .debug_write(&format!("[devices] cannot start {}: {}, halting", name, err));
        self.hal.halt(1)
    }

    /// Stop accepting requests and resume every suspended caller.
    ///
    /// Sleepers, readers and writers resumed here return
    /// [`DeviceError::Abandoned`]. Driver tasks exit at their next
    /// interrupt or when the platform stops.
    pub fn shutdown(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.hal
            .debug_write("[devices] shutdown: abandoning pending requests");

        let sleepers: Vec<ProcessId> = self
            .timer
            .lock()
            .drain_all()
            .into_iter()
            .map(|req| req.pid)
            .collect();
        self.resume_all(&sleepers);

        for terminal in &self.terminals {
            let waiters = terminal.state.lock().take_all_waiters();
            self.resume_all(&waiters);
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn hal(&self) -> &Arc<H> {
        &self.hal
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Check whether the subsystem accepts requests
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Terminal unit by number
    pub fn terminal(&self, unit: u32) -> Option<&TerminalUnit> {
        self.terminals.get(unit as usize)
    }

    pub fn terminals(&self) -> &[TerminalUnit] {
        &self.terminals
    }

    /// Terminal unit for a syscall argument
    pub(crate) fn unit_arg(&self, unit: i32) -> Result<&TerminalUnit, DeviceError> {
        u32::try_from(unit)
            .ok()
            .and_then(|u| self.terminal(u))
            .ok_or(DeviceError::InvalidArgument("terminal unit out of range"))
    }

    /// Number of processes waiting in `Sleep`
    pub fn pending_sleepers(&self) -> usize {
        self.timer.lock().len()
    }

    /// Pending sleep requests in wake order
    pub fn sleep_queue(&self) -> Vec<SleepRequest> {
        self.timer.lock().entries()
    }

    /// Driver tasks started by [`start_driver_tasks`](Self::start_driver_tasks)
    pub fn driver_pids(&self) -> Vec<ProcessId> {
        self.drivers.lock().clone()
    }

    /// Copy of the syscall audit log
    pub fn syslog_events(&self) -> Vec<SysEvent> {
        self.syslog.lock().events().to_vec()
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    pub(crate) fn signal_ready(&self) {
        self.ready.send(());
    }

    pub(crate) fn resume(&self, pid: ProcessId) {
        if let Err(e) = self.hal.unblock_proc(pid) {
            self.hal
                .debug_write(&format!("[devices] cannot resume PID {}: {}", pid, e));
        }
    }

    pub(crate) fn resume_all(&self, pids: &[ProcessId]) {
        for &pid in pids {
            self.resume(pid);
        }
    }

    /// Write a terminal control word. Callers hold the unit's state lock
    /// so control words for one unit are never reordered.
    pub(crate) fn write_control(&self, unit: u32, control: u32) -> Result<(), DeviceError> {
        self.hal
            .device_output(DeviceClass::Terminal, unit, control)
            .map_err(|e| {
                self.hal
                    .debug_write(&format!("[term {}] device_output failed: {}", unit, e));
                DeviceError::Hal(e)
            })
    }

    pub(crate) fn log_request(&self, syscall_num: u32, args: [u32; 4]) -> EventId {
        let sender = self.hal.current_pid();
        let now = self.hal.now_micros();
        self.syslog.lock().log_request(sender, syscall_num, args, now)
    }

    pub(crate) fn log_response(&self, request_id: EventId, result: i64) {
        let sender = self.hal.current_pid();
        let now = self.hal.now_micros();
        self.syslog
            .lock()
            .log_response(sender, request_id, result, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zos_hal_mock::SimHal;

    fn setup(units: usize) -> (Arc<SimHal>, Arc<DeviceSubsystem<SimHal>>) {
        let hal = Arc::new(SimHal::new(units as u32));
        let sys = DeviceSubsystem::init(
            hal.clone(),
            DeviceConfig::default().with_terminal_units(units),
        )
        .unwrap();
        (hal, sys)
    }

    #[test]
    fn test_init_builds_idle_units() {
        let (hal, sys) = setup(3);
        assert!(sys.is_active());
        assert_eq!(sys.terminals().len(), 3);
        assert_eq!(sys.pending_sleepers(), 0);
        for (i, t) in sys.terminals().iter().enumerate() {
            assert_eq!(t.unit(), i as u32);
            assert_eq!(t.buffered_lines(), 0);
            assert!(!t.is_writing());
        }
        assert!(sys.driver_pids().is_empty());
        assert!(hal.has_log_containing("[devices] init: 3 terminals"));
    }

    #[test]
    fn test_init_rejects_bad_config() {
        let hal = Arc::new(SimHal::new(1));
        let err = DeviceSubsystem::init(hal, DeviceConfig::default().with_terminal_units(0))
            .err()
            .unwrap();
        assert!(matches!(err, DeviceError::InvalidConfig(_)));
    }

    #[test]
    fn test_unit_arg_bounds() {
        let (_hal, sys) = setup(2);
        assert!(sys.unit_arg(0).is_ok());
        assert!(sys.unit_arg(1).is_ok());
        assert_eq!(
            sys.unit_arg(2).err(),
            Some(DeviceError::InvalidArgument("terminal unit out of range"))
        );
        assert!(sys.unit_arg(-1).is_err());
    }

    #[test]
    fn test_start_driver_tasks_spawns_all() {
        let (hal, sys) = setup(2);
        let pids = sys.start_driver_tasks().unwrap();
        assert_eq!(pids.len(), 3);
        assert_eq!(hal.process_name(pids[0]).as_deref(), Some("clock driver"));
        assert_eq!(hal.process_name(pids[2]).as_deref(), Some("term driver 1"));

        // Second call is a no-op
        assert_eq!(sys.start_driver_tasks().unwrap(), pids);

        sys.shutdown();
        hal.power_off();
        assert!(hal.join_all().is_empty());
        assert!(hal.has_log_containing("[clock] driver exiting"));
        assert!(hal.has_log_containing("[term 1] driver exiting"));
    }

    #[test]
    fn test_start_after_shutdown_fails() {
        let (_hal, sys) = setup(1);
        sys.shutdown();
        assert_eq!(sys.start_driver_tasks().err(), Some(DeviceError::NotActive));
    }

    #[test]
    fn test_spawn_failure_halts() {
        let (hal, sys) = setup(1);
        hal.power_off();
        let starter = {
            let sys = Arc::clone(&sys);
            std::thread::spawn(move || sys.start_driver_tasks())
        };
        assert!(starter.join().is_err());
        assert_eq!(hal.halt_code(), Some(1));
        assert!(hal.has_log_containing("cannot start clock driver"));
        assert!(sys.driver_pids().is_empty());
    }

    #[test]
    fn test_shutdown_resumes_sleepers() {
        let (hal, sys) = setup(1);
        let me = hal.current_pid();
        sys.timer.lock().insert(me, 10).unwrap();

        sys.shutdown();
        assert_eq!(sys.pending_sleepers(), 0);
        assert!(!sys.is_active());

        // The resume left a permit behind.
        hal.block_me().unwrap();
        assert!(!hal.wait_until_blocked(me, Duration::ZERO));

        // Idempotent
        sys.shutdown();
    }
}
