/*++

Licensed under the Apache-2.0 license.

File Name:

    irq.rs

Abstract:

    File contains the interrupt half of the completion dispatcher.

--*/

use crate::driver::C3Driver;
use c3_registers::{GlobalStatus, IdsStatus};
use log::{trace, warn};

/// Result of the interrupt handler on a shared line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IrqReturn {
    Handled,
    NotMine,
}

impl C3Driver {
    /// Interrupt handler.
    ///
    /// Acknowledges every engine with a pending interrupt, advances its
    /// queue (starting the next program if one is queued) and schedules the
    /// deferred drain. Never unmaps or delivers anything itself.
    pub fn on_completion_signal(&self) -> IrqReturn {
        let shared = &self.shared;
        let global = shared.regs.global_status();
        if global.read(GlobalStatus::HW_ID) != shared.config.hw_id {
            return IrqReturn::NotMine;
        }
        let pending = global.read(GlobalStatus::IRQ_PENDING);
        if pending == 0 {
            return IrqReturn::NotMine;
        }

        for engine in shared.engines.iter() {
            let index = engine.index();
            if pending & (1 << index) == 0 {
                continue;
            }
            let status = shared.regs.ids_status(index);
            shared.regs.ack_ids_status(index, status);
            trace!("c3: engine {index} irq, status {:#010x}", status.get());

            if !status.is_set(IdsStatus::DONE) {
                warn!(
                    "c3: spurious interrupt on engine {index}, status {:#010x}",
                    status.get()
                );
                continue;
            }
            if engine.complete_running(status.get()) {
                shared.schedule_drain(index);
            }
        }
        IrqReturn::Handled
    }
}
