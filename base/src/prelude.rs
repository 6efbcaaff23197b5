//! Flat re-export of the commonly used names.

pub use crate::arena::{ARENA_CODE, ARENA_FREE, ARENA_IO, ARENA_MASK, ARENA_TMP};
pub use crate::instruction::{
    make_alu, make_capp, make_cond, make_exit, make_io, AluOp, CappOp, ChannelId, Class, Code,
    Cond, CondOp, IoOp, Ir,
};
pub use crate::program::{Located, OpcodeRecord, Program};
