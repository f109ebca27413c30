//! Clock driver task
//!
//! Waits for clock interrupts and resumes every sleeper whose wake time
//! has passed.

use std::sync::Arc;

use zos_hal::{DeviceClass, HAL};

use crate::subsystem::DeviceSubsystem;

/// Body of the clock driver task.
pub(crate) fn run_clock_driver<H: HAL>(sys: Arc<DeviceSubsystem<H>>) {
    let hal = sys.hal().clone();
    sys.signal_ready();

    while sys.is_active() {
        if let Err(e) = hal.wait_device(DeviceClass::Clock, 0) {
            hal.debug_write(&format!("[clock] wait_device failed: {}", e));
            break;
        }
        if !sys.is_active() {
            break;
        }
        sys.wake_due_sleepers();
    }

    hal.debug_write("[clock] driver exiting");
}

impl<H: HAL> DeviceSubsystem<H> {
    /// Resume every sleeper due at the current time.
    ///
    /// Returns the number of processes resumed.
    pub fn wake_due_sleepers(&self) -> usize {
        let now = self.hal().now_micros();
        let due = self.timer.lock().pop_due(now);
        for req in &due {
            self.resume(req.pid);
        }
        due.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use zos_hal::HAL;
    use zos_hal_mock::SimHal;

    use crate::config::DeviceConfig;
    use crate::subsystem::DeviceSubsystem;

    #[test]
    fn test_wake_due_sleepers_without_driver() {
        let hal = std::sync::Arc::new(SimHal::new(1));
        let sys = DeviceSubsystem::init(hal.clone(), DeviceConfig::default().with_terminal_units(1))
            .unwrap();

        let me = hal.current_pid();
        sys.timer.lock().insert(me, 1_000).unwrap();

        assert_eq!(sys.wake_due_sleepers(), 0);
        hal.advance_time(1_000);
        assert_eq!(sys.wake_due_sleepers(), 1);
        assert_eq!(sys.pending_sleepers(), 0);

        // The permit left by the wake lets us pass straight through.
        hal.block_me().unwrap();
        assert!(!hal.wait_until_blocked(me, Duration::ZERO));
    }
}
