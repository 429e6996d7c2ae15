/*++

Licensed under the Apache-2.0 license.

File Name:

    config.rs

Abstract:

    File contains the driver configuration.

--*/

use c3_registers::C3_HW_ID;

/// Where deferred completion work runs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeferredMode {
    /// A dedicated worker thread drains engines as soon as the interrupt
    /// path schedules them.
    Tasklet,

    /// Scheduled engines are drained by explicit calls to
    /// [`crate::C3Driver::run_deferred`].
    Manual,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Number of IDS engines to drive
    pub engines: usize,

    /// Program slots per engine; one slot is always kept free
    pub slots_per_engine: usize,

    /// Capacity of a program slot in bytes
    pub slot_size: usize,

    /// Base address of the register window
    pub base: u32,

    /// Identity expected in the ID and global status registers
    pub hw_id: u32,

    pub deferred: DeferredMode,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            engines: 2,
            slots_per_engine: 32,
            slot_size: 4096,
            base: 0,
            hw_id: C3_HW_ID,
            deferred: DeferredMode::Tasklet,
        }
    }
}
