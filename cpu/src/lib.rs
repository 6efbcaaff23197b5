//! Emulation of the CAPP machine.
//!
//! The machine is a Content-Addressable Parallel Processor (an array
//! of cells that all compare themselves against a broadcast match and
//! mask) driven by a small control processor.  This crate holds the
//! cell engine, the control processor with its fetch/decode/execute
//! loop, the bit-level I/O channels, and the emulator glue that binds
//! them to an assembled program.

pub mod capp;
pub mod control;
pub mod emulator;
pub mod fault;
pub mod io;
pub mod stack;

pub use capp::{Action, Capp, Cell};
pub use control::{
    Cpu, CpuChannel, IP_MODE_CAPP, IP_MODE_MASK, IP_MODE_REG, IP_MODE_STACK,
};
pub use emulator::{Emulator, RuntimeFault, CAPP_SIZE};
pub use fault::{ArgPos, Fault, OpcodeFault};
pub use stack::{Stack, STACK_LIMIT};
