//! Terminal driver task (one per unit)

use std::sync::Arc;

use zos_hal::{DeviceClass, HAL};

use crate::subsystem::DeviceSubsystem;

/// Body of the terminal driver task for `unit`.
///
/// Enables interrupts, reports ready, then services interrupts until the
/// subsystem stops or the device wait fails. The driver never blocks on a
/// caller: a held input line only switches receive interrupts off.
pub(crate) fn run_terminal_driver<H: HAL>(sys: Arc<DeviceSubsystem<H>>, unit: u32) {
    let hal = sys.hal().clone();
    let tag = format!("[term {}]", unit);
    let Some(terminal) = sys.terminal(unit) else {
        hal.debug_write(&format!("{} no such unit", tag));
        sys.signal_ready();
        return;
    };

    {
        let state = terminal.state.lock();
        // A write may already be waiting for its ready interrupt.
        let _ = sys.write_control(unit, state.control_word());
    }
    sys.signal_ready();

    while sys.is_active() {
        let status = match hal.wait_device(DeviceClass::Terminal, unit) {
            Ok(status) => status,
            Err(e) => {
                hal.debug_write(&format!("{} wait_device failed: {}", tag, e));
                break;
            }
        };
        if !sys.is_active() {
            break;
        }

        let outcome = {
            let mut state = terminal.state.lock();
            let outcome = state.on_interrupt(status);
            if let Some(ctrl) = outcome.output {
                let _ = sys.write_control(unit, ctrl);
            }
            outcome
        };

        if outcome.stalled {
            hal.debug_write(&format!("{} line buffer full, holding input", tag));
        }
        sys.resume_all(&outcome.wake);
    }

    hal.debug_write(&format!("{} driver exiting", tag));
}
