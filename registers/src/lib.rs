/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains the C3 accelerator register map shared by the driver and
    the emulated peripheral.

--*/

use tock_registers::register_bitfields;

/// Identity reported in `ID[31:16]` and `GLOBAL_STATUS[31:16]`.
pub const C3_HW_ID: u32 = 0xC3A1;

/// Revision reported in `ID[15:0]`.
pub const C3_HW_REVISION: u32 = 0x0002;

/// Maximum number of IDS engines the global status register can describe.
pub const C3_MAX_ENGINES: usize = 8;

/// Size of the register window claimed by the device.
pub const C3_MMIO_SIZE: u32 = 0x1000;

pub mod offsets {
    /// Identity and revision (read only)
    pub const ID: u32 = 0x000;

    /// Per-engine interrupt pending bits and hardware identity (read only)
    pub const GLOBAL_STATUS: u32 = 0x004;

    /// First IDS register block
    pub const IDS_BASE: u32 = 0x100;

    /// Distance between IDS register blocks
    pub const IDS_STRIDE: u32 = 0x40;

    /// Instruction pointer; writing it starts program execution
    pub const IDS_IP: u32 = 0x00;

    /// Engine status; IRQ_PENDING is write-one-to-clear
    pub const IDS_STATUS: u32 = 0x04;

    /// Address of the instruction currently (or last) executed
    pub const IDS_CURRENT_IP: u32 = 0x08;

    /// Address that caused the last bus error
    pub const IDS_FAULT_ADDR: u32 = 0x0c;

    /// Returns the offset of `reg` in the register block of engine `engine`.
    pub const fn ids(engine: usize, reg: u32) -> u32 {
        IDS_BASE + IDS_STRIDE * engine as u32 + reg
    }
}

register_bitfields! [
    u32,

    /// Identity register
    pub Id [
        REVISION OFFSET(0) NUMBITS(16) [],
        HW_ID OFFSET(16) NUMBITS(16) [],
    ],

    /// Global status register
    pub GlobalStatus [
        IRQ_PENDING OFFSET(0) NUMBITS(8) [],
        HW_ID OFFSET(16) NUMBITS(16) [],
    ],

    /// Per-engine status register
    pub IdsStatus [
        BUSY OFFSET(0) NUMBITS(1) [],
        DONE OFFSET(1) NUMBITS(1) [],
        ERROR OFFSET(2) NUMBITS(1) [],
        BUS_ERROR OFFSET(3) NUMBITS(1) [],
        CHANNEL_ERROR OFFSET(4) NUMBITS(1) [],
        IRQ_PENDING OFFSET(8) NUMBITS(1) [],
        FAULT_OPCODE OFFSET(16) NUMBITS(8) [],
    ],
];

/// Mask of the three status bits that mark a failed program.
pub const IDS_STATUS_FAIL_MASK: u32 = (1 << 2) | (1 << 3) | (1 << 4);
