//! Simulated machine implementing the Zero OS HAL
//!
//! `SimHal` backs the device layer with host threads so the blocking
//! protocols can be tested under real concurrency:
//!
//! - a clock that only moves when the test advances it
//! - per-device interrupt queues fed by the test (`clock_interrupt`,
//!   `receive_char`) and by the terminal transmitter
//! - a process table with park/unpark-style suspension
//! - captured console output, halt code and transmitted bytes
//!
//! Terminal transmission is instantaneous: a byte written with
//! `CTRL_XMIT_CHAR` is appended to the unit's output immediately, and if
//! `CTRL_XMIT_INT` is set a transmit-ready interrupt is queued.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use zos_hal::term::{self, CTRL_RECV_INT, CTRL_XMIT_CHAR, CTRL_XMIT_INT, DEV_BUSY, DEV_READY};
use zos_hal::{DeviceClass, HalError, ProcessId, TaskEntry, HAL};

/// Distinguishes simulator instances in thread-local PID bindings
static NEXT_SIM_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// (simulator id, pid) of the process running on this thread
    static CURRENT: Cell<Option<(u64, ProcessId)>> = const { Cell::new(None) };
}

/// Simulated process state
struct SimProcess {
    name: String,
    /// Pending unblock not yet consumed by `block_me`
    permit: bool,
    /// Currently parked in `block_me`
    blocked: bool,
}

struct ProcessTable {
    next_pid: u64,
    procs: BTreeMap<ProcessId, SimProcess>,
    by_thread: HashMap<ThreadId, ProcessId>,
}

/// Simulated terminal unit
#[derive(Default)]
struct SimTerminal {
    /// Status words waiting to be collected by `wait_device`
    pending: VecDeque<u32>,
    /// Characters typed while receive interrupts were disabled
    held: VecDeque<u8>,
    /// Every byte the transmitter has sent
    transmitted: Vec<u8>,
    recv_int: bool,
}

struct Devices {
    clock: VecDeque<u32>,
    terminals: Vec<SimTerminal>,
}

/// Simulated machine for driving the device layer from tests
pub struct SimHal {
    id: u64,
    /// Simulated time in microseconds
    time: AtomicU64,
    powered_off: AtomicBool,
    halt_code: Mutex<Option<i32>>,
    /// Captured debug messages
    debug_log: Mutex<Vec<String>>,
    procs: Mutex<ProcessTable>,
    proc_cv: Condvar,
    devices: Mutex<Devices>,
    device_cv: Condvar,
    tasks: Mutex<Vec<(ProcessId, JoinHandle<()>)>>,
}

impl SimHal {
    /// Create a machine with one clock and `terminal_units` terminals
    pub fn new(terminal_units: u32) -> Self {
        Self::with_time(terminal_units, 0)
    }

    /// Create a machine with a specific starting time
    pub fn with_time(terminal_units: u32, micros: u64) -> Self {
        let terminals = (0..terminal_units).map(|_| SimTerminal::default()).collect();
        Self {
            id: NEXT_SIM_ID.fetch_add(1, Ordering::SeqCst),
            time: AtomicU64::new(micros),
            powered_off: AtomicBool::new(false),
            halt_code: Mutex::new(None),
            debug_log: Mutex::new(Vec::new()),
            procs: Mutex::new(ProcessTable {
                next_pid: 1,
                procs: BTreeMap::new(),
                by_thread: HashMap::new(),
            }),
            proc_cv: Condvar::new(),
            devices: Mutex::new(Devices {
                clock: VecDeque::new(),
                terminals,
            }),
            device_cv: Condvar::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Advance the simulated time by the given duration
    pub fn advance_time(&self, micros: u64) {
        self.time.fetch_add(micros, Ordering::SeqCst);
    }

    /// Set the simulated time to a specific value
    pub fn set_time(&self, micros: u64) {
        self.time.store(micros, Ordering::SeqCst);
    }

    /// Raise one clock interrupt
    pub fn clock_interrupt(&self) {
        let mut devices = self.devices.lock();
        devices.clock.push_back(DEV_READY);
        self.device_cv.notify_all();
    }

    /// Advance time, then raise a clock interrupt
    pub fn tick(&self, micros: u64) {
        self.advance_time(micros);
        self.clock_interrupt();
    }

    // ------------------------------------------------------------------
    // Terminals
    // ------------------------------------------------------------------

    /// Type one character on a terminal
    pub fn receive_char(&self, unit: u32, ch: u8) {
        let mut devices = self.devices.lock();
        let Some(t) = devices.terminals.get_mut(unit as usize) else {
            return;
        };
        if t.recv_int {
            t.pending.push_back(term::status(DEV_BUSY, DEV_READY, ch));
        } else {
            t.held.push_back(ch);
        }
        self.device_cv.notify_all();
    }

    /// Type a sequence of characters on a terminal
    pub fn receive_bytes(&self, unit: u32, bytes: &[u8]) {
        for &b in bytes {
            self.receive_char(unit, b);
        }
    }

    /// Everything the terminal has transmitted so far
    pub fn transmitted(&self, unit: u32) -> Vec<u8> {
        self.devices
            .lock()
            .terminals
            .get(unit as usize)
            .map(|t| t.transmitted.clone())
            .unwrap_or_default()
    }

    /// Wait until the terminal has transmitted at least `len` bytes
    pub fn wait_for_transmitted(&self, unit: u32, len: usize, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut devices = self.devices.lock();
        loop {
            let sent = devices
                .terminals
                .get(unit as usize)
                .map(|t| t.transmitted.len())
                .unwrap_or(0);
            if sent >= len {
                break;
            }
            if self.device_cv.wait_until(&mut devices, deadline).timed_out() {
                break;
            }
        }
        devices
            .terminals
            .get(unit as usize)
            .map(|t| t.transmitted.clone())
            .unwrap_or_default()
    }

    /// Check whether the last control word enabled receive interrupts
    pub fn receive_enabled(&self, unit: u32) -> bool {
        self.devices
            .lock()
            .terminals
            .get(unit as usize)
            .is_some_and(|t| t.recv_int)
    }

    /// Number of interrupts not yet collected by a driver
    pub fn pending_interrupts(&self, class: DeviceClass, unit: u32) -> usize {
        let devices = self.devices.lock();
        match class {
            DeviceClass::Clock => devices.clock.len(),
            DeviceClass::Terminal => devices
                .terminals
                .get(unit as usize)
                .map(|t| t.pending.len() + t.held.len())
                .unwrap_or(0),
        }
    }

    /// Wait until every queued interrupt for a device has been collected
    pub fn wait_until_drained(&self, class: DeviceClass, unit: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut devices = self.devices.lock();
        loop {
            let pending = match class {
                DeviceClass::Clock => devices.clock.len(),
                DeviceClass::Terminal => devices
                    .terminals
                    .get(unit as usize)
                    .map(|t| t.pending.len())
                    .unwrap_or(0),
            };
            if pending == 0 {
                return true;
            }
            if self.device_cv.wait_until(&mut devices, deadline).timed_out() {
                return false;
            }
        }
    }

    // ------------------------------------------------------------------
    // Processes
    // ------------------------------------------------------------------

    /// Check whether a process is parked in `block_me`
    pub fn is_blocked(&self, pid: ProcessId) -> bool {
        self.procs
            .lock()
            .procs
            .get(&pid)
            .map(|p| p.blocked)
            .unwrap_or(false)
    }

    /// Wait until a process parks in `block_me`
    pub fn wait_until_blocked(&self, pid: ProcessId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut table = self.procs.lock();
        loop {
            if table.procs.get(&pid).map(|p| p.blocked).unwrap_or(false) {
                return true;
            }
            if self.proc_cv.wait_until(&mut table, deadline).timed_out() {
                return false;
            }
        }
    }

    /// Name of a process, if known
    pub fn process_name(&self, pid: ProcessId) -> Option<String> {
        self.procs.lock().procs.get(&pid).map(|p| p.name.clone())
    }

    /// Get the number of known processes
    pub fn process_count(&self) -> usize {
        self.procs.lock().procs.len()
    }

    /// Join every spawned task, returning the ones that panicked
    pub fn join_all(&self) -> Vec<ProcessId> {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        tasks
            .into_iter()
            .filter_map(|(pid, handle)| handle.join().err().map(|_| pid))
            .collect()
    }

    // ------------------------------------------------------------------
    // Power
    // ------------------------------------------------------------------

    /// Power the machine off: every blocked process and driver wakes with `Halted`
    pub fn power_off(&self) {
        self.powered_off.store(true, Ordering::SeqCst);
        {
            let _table = self.procs.lock();
            self.proc_cv.notify_all();
        }
        let _devices = self.devices.lock();
        self.device_cv.notify_all();
    }

    /// Check if the machine is powered off
    pub fn is_powered_off(&self) -> bool {
        self.powered_off.load(Ordering::SeqCst)
    }

    /// Exit code passed to `halt`, if the kernel halted
    pub fn halt_code(&self) -> Option<i32> {
        *self.halt_code.lock()
    }

    // ------------------------------------------------------------------
    // Debug log
    // ------------------------------------------------------------------

    /// Get all captured debug messages
    pub fn get_debug_log(&self) -> Vec<String> {
        self.debug_log.lock().clone()
    }

    /// Check if a specific message was logged
    pub fn has_log_containing(&self, substr: &str) -> bool {
        self.debug_log.lock().iter().any(|msg| msg.contains(substr))
    }

    fn alloc_process(table: &mut ProcessTable, name: &str) -> ProcessId {
        let pid = ProcessId(table.next_pid);
        table.next_pid += 1;
        table.procs.insert(
            pid,
            SimProcess {
                name: String::from(name),
                permit: false,
                blocked: false,
            },
        );
        pid
    }
}

impl Default for SimHal {
    fn default() -> Self {
        Self::new(4)
    }
}

impl HAL for SimHal {
    fn spawn_task(&self, name: &str, entry: TaskEntry) -> Result<ProcessId, HalError> {
        if self.is_powered_off() {
            return Err(HalError::TaskSpawnFailed);
        }
        let pid = Self::alloc_process(&mut self.procs.lock(), name);
        let sim_id = self.id;
        let handle = thread::Builder::new()
            .name(format!("{}-{}", name, pid))
            .spawn(move || {
                CURRENT.with(|c| c.set(Some((sim_id, pid))));
                entry();
            })
            .map_err(|_| HalError::TaskSpawnFailed)?;
        self.procs.lock().by_thread.insert(handle.thread().id(), pid);
        self.tasks.lock().push((pid, handle));
        self.debug_write(&format!("[sim] Spawned task '{}' with PID {}", name, pid));
        Ok(pid)
    }

    fn current_pid(&self) -> ProcessId {
        if let Some((sim_id, pid)) = CURRENT.with(|c| c.get()) {
            if sim_id == self.id {
                return pid;
            }
        }
        // Threads the simulator did not spawn (test harness threads) are
        // enrolled on first use.
        let mut table = self.procs.lock();
        let tid = thread::current().id();
        let pid = match table.by_thread.get(&tid) {
            Some(&pid) => pid,
            None => {
                let name = thread::current().name().unwrap_or("external").to_string();
                let pid = Self::alloc_process(&mut table, &name);
                table.by_thread.insert(tid, pid);
                pid
            }
        };
        CURRENT.with(|c| c.set(Some((self.id, pid))));
        pid
    }

    fn block_me(&self) -> Result<(), HalError> {
        let pid = self.current_pid();
        let mut table = self.procs.lock();
        loop {
            if self.is_powered_off() {
                if let Some(p) = table.procs.get_mut(&pid) {
                    p.blocked = false;
                }
                return Err(HalError::Halted);
            }
            let proc = table.procs.get_mut(&pid).ok_or(HalError::ProcessNotFound)?;
            if proc.permit {
                proc.permit = false;
                proc.blocked = false;
                self.proc_cv.notify_all();
                return Ok(());
            }
            if !proc.blocked {
                proc.blocked = true;
                self.proc_cv.notify_all();
            }
            self.proc_cv.wait(&mut table);
        }
    }

    fn unblock_proc(&self, pid: ProcessId) -> Result<(), HalError> {
        let mut table = self.procs.lock();
        let proc = table.procs.get_mut(&pid).ok_or(HalError::ProcessNotFound)?;
        proc.permit = true;
        self.proc_cv.notify_all();
        Ok(())
    }

    fn wait_device(&self, class: DeviceClass, unit: u32) -> Result<u32, HalError> {
        let mut devices = self.devices.lock();
        loop {
            if self.is_powered_off() {
                return Err(HalError::Halted);
            }
            let queue = match class {
                DeviceClass::Clock if unit == 0 => &mut devices.clock,
                DeviceClass::Clock => return Err(HalError::InvalidArgument),
                DeviceClass::Terminal => match devices.terminals.get_mut(unit as usize) {
                    Some(t) => &mut t.pending,
                    None => return Err(HalError::InvalidArgument),
                },
            };
            if let Some(status) = queue.pop_front() {
                self.device_cv.notify_all();
                return Ok(status);
            }
            self.device_cv.wait(&mut devices);
        }
    }

    fn device_output(&self, class: DeviceClass, unit: u32, control: u32) -> Result<(), HalError> {
        if class != DeviceClass::Terminal {
            return Err(HalError::NotSupported);
        }
        let mut devices = self.devices.lock();
        let t = devices
            .terminals
            .get_mut(unit as usize)
            .ok_or(HalError::InvalidArgument)?;

        t.recv_int = control & CTRL_RECV_INT != 0;
        if t.recv_int {
            while let Some(ch) = t.held.pop_front() {
                t.pending.push_back(term::status(DEV_BUSY, DEV_READY, ch));
            }
        }
        if control & CTRL_XMIT_CHAR != 0 {
            t.transmitted.push(term::ctrl_get_char(control));
        }
        if control & CTRL_XMIT_INT != 0 {
            t.pending.push_back(term::status(DEV_READY, DEV_READY, 0));
        }
        self.device_cv.notify_all();
        Ok(())
    }

    fn now_micros(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    fn debug_write(&self, msg: &str) {
        self.debug_log.lock().push(String::from(msg));
    }

    fn halt(&self, code: i32) -> ! {
        *self.halt_code.lock() = Some(code);
        self.debug_write(&format!("[sim] halt({})", code));
        self.power_off();
        panic!("kernel halted with code {}", code);
    }
}
