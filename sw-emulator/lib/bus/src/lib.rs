/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the C3 Emulator Bus library.

--*/
mod clock;
mod ram;
mod register;

pub use c3_emu_types::{Bus, BusError};

pub use crate::clock::{ActionHandle, Clock, Timer};
pub use crate::ram::Ram;
pub use crate::register::{ReadOnlyRegister, ReadWriteRegister, Register};
