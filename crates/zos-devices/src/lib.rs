//! Zero OS Device Services
//!
//! The kernel's device-service layer: a clock-driven wake queue behind
//! `Sleep`, and line-buffered terminals behind `TermRead` and `TermWrite`.
//!
//! # Architecture
//!
//! ```text
//! user process ──syscall──► DeviceSubsystem ◄──interrupt status── driver tasks
//!                              │                                   │
//!                              ├─ TimerQueue ◄──────── clock driver┘
//!                              └─ TerminalUnit[n] ◄─── term driver n
//! ```
//!
//! Callers block with the HAL's `block_me` and are resumed by a driver
//! task with `unblock_proc`. Drivers block in `wait_device` and never on
//! a caller.
//!
//! # Module Organization
//!
//! - `subsystem` - Shared state, initialization, driver start-up, shutdown
//! - `syscall` - Sleep / TermRead / TermWrite and the raw dispatch entry
//! - `timer` - Wake queue ordered by wake time
//! - `clock` - Clock driver task
//! - `terminal` - Line discipline, output cursor and terminal driver task
//! - `sync` - Bounded mailbox used for driver start-up
//! - `syslog` - Syscall audit log
//! - `invariants` - Runtime-checkable state invariants
//! - `loom_tests` - Concurrency models (with `loom` feature)
//!
//! # Example
//!
//! ```ignore
//! let sys = DeviceSubsystem::init(hal, DeviceConfig::default())?;
//! sys.start_driver_tasks()?;
//! sys.term_write(0, b"hello\n")?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod invariants;
pub mod subsystem;
pub mod sync;
pub mod syscall;
pub mod syslog;
pub mod terminal;
pub mod timer;


pub use config::{DeviceConfig, OverflowPolicy};
pub use error::DeviceError;
pub use invariants::{assert_invariants, check_all_invariants, InvariantViolation};
pub use subsystem::DeviceSubsystem;
pub use syscall::{dispatch, Syscall, SyscallResult, SYS_SLEEP, SYS_TERM_READ, SYS_TERM_WRITE};
pub use terminal::{LineBuffer, TerminalState, TerminalUnit};
pub use timer::{SleepHandle, SleepRequest, TimerError, TimerQueue};
