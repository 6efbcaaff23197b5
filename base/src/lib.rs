//! Shared instruction-set definitions for the CAPP machine.
//!
//! Both the control-processor emulator (`cpu`) and the macro assembler
//! (`assembler`) need to agree on the binary instruction layout, the
//! arena partitioning of the CAPP data word and the shape of an
//! assembled program.  Those definitions live here so that neither
//! crate depends on the other.

pub mod arena;
pub mod instruction;
pub mod prelude;
pub mod program;
