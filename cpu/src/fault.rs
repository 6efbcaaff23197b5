//! Runtime fault taxonomy for the control processor.
//!
//! Faults are structured and final: nothing inside the core recovers
//! from one.  Execution faults are joined with the offending opcode so
//! diagnostics can show the decoded instruction; the emulator layer
//! adds the source line number on top.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use base::prelude::{Class, Code};

/// Which operand slot of an instruction was at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPos {
    First,
    Second,
    Both,
}

/// Detail of an opcode-level fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpcodeFault {
    /// The instruction may not be executed at all (a fetched `NEVER`
    /// condition, or an undecodable word).
    Decode,
    /// The op field does not name an operation of its class.
    Op(Class),
    /// An operand was invalid or failed to produce a value.
    Arg {
        class: Class,
        pos: ArgPos,
        cause: Option<Box<Fault>>,
    },
    /// A CAPP operation reserved for the fetch logic (`SWAP`) appeared
    /// in the instruction stream.
    Capp,
    /// An I/O operation failed below the decode layer.
    Io(Box<Fault>),
    /// Immediate words were left unconsumed after execution.
    Imm,
}

/// A runtime fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Nothing to fetch: the halt sentinel, an out-of-range register
    /// index, a stack underflow in stack mode, or no cell carrying the
    /// requested program address.
    IpEmpty,
    /// The monitor raised a trap.
    IpTrap,
    /// Reserved.
    IpKey,
    StackEmpty,
    StackFull,
    /// No channel bound to the addressed slot.
    ChannelInvalid,
    /// The channel rejected a write.
    ChannelFull,
    /// The active list was shorter than the channel data.
    ChannelPartial,
    /// Decode or execution failed for this opcode.
    Opcode { code: Code, fault: OpcodeFault },
}

impl Fault {
    pub(crate) fn opcode(code: &Code, fault: OpcodeFault) -> Fault {
        Fault::Opcode {
            code: code.clone(),
            fault,
        }
    }

    /// Walk the cause chain to the innermost fault.
    pub fn root_cause(&self) -> &Fault {
        match self {
            Fault::Opcode { fault, .. } => match fault {
                OpcodeFault::Arg {
                    cause: Some(cause), ..
                } => cause.root_cause(),
                OpcodeFault::Io(cause) => cause.root_cause(),
                _ => self,
            },
            _ => self,
        }
    }
}

impl Display for OpcodeFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            OpcodeFault::Decode => f.write_str("decode"),
            OpcodeFault::Op(class) => write!(f, "{} op", class.mnemonic()),
            OpcodeFault::Arg { class, pos, cause } => {
                write!(f, "{} ", class.mnemonic())?;
                match pos {
                    ArgPos::First => f.write_str("arg1")?,
                    ArgPos::Second => f.write_str("arg2")?,
                    ArgPos::Both => f.write_str("arg1 arg2")?,
                }
                if let Some(cause) = cause {
                    write!(f, ": {cause}")?;
                }
                Ok(())
            }
            OpcodeFault::Capp => f.write_str("capp"),
            OpcodeFault::Io(cause) => write!(f, "io: {cause}"),
            OpcodeFault::Imm => f.write_str("imm"),
        }
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Fault::IpEmpty => f.write_str("ip empty"),
            Fault::IpTrap => f.write_str("ip trap"),
            Fault::IpKey => f.write_str("ip key unknown"),
            Fault::StackEmpty => f.write_str("stack empty"),
            Fault::StackFull => f.write_str("stack full"),
            Fault::ChannelInvalid => f.write_str("channel invalid"),
            Fault::ChannelFull => f.write_str("channel full"),
            Fault::ChannelPartial => f.write_str("partial channel transfer"),
            Fault::Opcode { code, fault } => {
                write!(f, "bad opcode {:#06x} {}: {}", code.word, code, fault)
            }
        }
    }
}

impl Error for Fault {}
