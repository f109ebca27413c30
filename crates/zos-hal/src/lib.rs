//! Hardware Abstraction Layer trait for the Zero OS device layer
//!
//! This crate defines the HAL trait through which the device-service layer
//! reaches everything it does not own: the process scheduler, the simulated
//! devices, the clock and the kernel console.
//!
//! # Platform Implementations
//!
//! - **Simulator**: host threads for processes, a manually advanced clock,
//!   injected interrupts (`zos-hal-mock`)
//! - **Bare Metal**: interrupt controller and real UART/PIT access (future)

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

use alloc::boxed::Box;

pub mod term;

/// Entry point of a spawned kernel task.
pub type TaskEntry = Box<dyn FnOnce() + Send + 'static>;

/// Process identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device classes that raise interrupts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceClass {
    /// Periodic clock (single unit)
    Clock = 0,
    /// Character terminal
    Terminal = 1,
}

impl DeviceClass {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Clock),
            1 => Some(Self::Terminal),
            _ => None,
        }
    }
}

/// Hardware Abstraction Layer trait
///
/// Implementations provide platform-specific functionality for:
/// - Task management (spawn, suspend, resume)
/// - Device interrupts and device control
/// - Time measurement
/// - Debug output
/// - Kernel halt
pub trait HAL: Send + Sync + 'static {
    // === Task Management ===

    /// Spawn a new kernel task running `entry`
    ///
    /// # Returns
    /// * `Ok(ProcessId)` - PID of the new task
    /// * `Err(HalError::TaskSpawnFailed)` - The scheduler refused the task
    fn spawn_task(&self, name: &str, entry: TaskEntry) -> Result<ProcessId, HalError>;

    /// PID of the calling process
    fn current_pid(&self) -> ProcessId;

    /// Suspend the calling process until another task calls `unblock_proc` on it
    ///
    /// An unblock delivered before the matching block is remembered, so the
    /// next `block_me` returns immediately.
    ///
    /// # Returns
    /// * `Ok(())` - Resumed by `unblock_proc`
    /// * `Err(HalError::Halted)` - The machine was powered off while waiting
    fn block_me(&self) -> Result<(), HalError>;

    /// Make a blocked (or about-to-block) process runnable again
    ///
    /// # Returns
    /// * `Ok(())` - Process resumed or permit recorded
    /// * `Err(HalError::ProcessNotFound)` - No such process
    fn unblock_proc(&self, pid: ProcessId) -> Result<(), HalError>;

    // === Devices ===

    /// Block until the next interrupt from (`class`, `unit`) and return its status word
    ///
    /// There is no timeout and no cancellation.
    ///
    /// # Returns
    /// * `Ok(status)` - Device status word (see [`term`] for terminal layout)
    /// * `Err(HalError::InvalidArgument)` - No such device unit
    /// * `Err(HalError::Halted)` - The machine was powered off
    fn wait_device(&self, class: DeviceClass, unit: u32) -> Result<u32, HalError>;

    /// Write a control word to a device
    ///
    /// For terminals the control word may carry a character to transmit and
    /// the interrupt enable bits (see [`term`]).
    fn device_output(&self, class: DeviceClass, unit: u32, control: u32) -> Result<(), HalError>;

    // === Time ===

    /// Get current time in microseconds (monotonic)
    fn now_micros(&self) -> u64;

    // === Debug ===

    /// Write a debug message to the platform's console/log
    fn debug_write(&self, msg: &str);

    /// Stop the whole kernel with the given exit code
    fn halt(&self, code: i32) -> !;
}

/// HAL errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalError {
    /// Failed to spawn a task
    TaskSpawnFailed,
    /// Process not found or already terminated
    ProcessNotFound,
    /// Invalid argument (unknown device unit, malformed control word)
    InvalidArgument,
    /// Operation not supported on this platform
    NotSupported,
    /// The machine has been powered off
    Halted,
}

impl core::fmt::Display for HalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            HalError::TaskSpawnFailed => "task spawn failed",
            HalError::ProcessNotFound => "process not found",
            HalError::InvalidArgument => "invalid argument",
            HalError::NotSupported => "not supported",
            HalError::Halted => "machine halted",
        };
        f.write_str(s)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}
