/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the C3 Emulator Peripheral library.

--*/

mod c3;
mod executor;
mod system_memory;

pub use c3::{C3Accelerator, C3Args};
pub use executor::{ExecOutcome, Fault, MAX_PROGRAM_INSTRUCTIONS};
pub use system_memory::{SharedSystemMemory, SystemMemory, ALLOC_ALIGN, SYSTEM_MEMORY_BASE};
