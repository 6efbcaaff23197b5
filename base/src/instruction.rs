//! Binary representation of control-processor instructions.
//!
//! An instruction occupies one 16-bit primary word, optionally followed
//! in program order by up to four 16-bit immediate words.  The primary
//! word looks like this (most significant bit on the left; bit 13 is
//! unused):
//!
//! | Condition | (unused) | Class   | Op     | A      | B      |
//! |-----------|----------|---------|--------|--------|--------|
//! | 2 bits    | 1 bit    | 2 bits  | 3 bits | 4 bits | 4 bits |
//! | (14-15)   | (13)     | (11-12) | (8-10) | (4-7)  | (0-3)  |
//!
//! The `class` field selects one of the ALU, COND, CAPP and IO
//! instruction classes; `op` selects the operation within the class.
//! The `a` and `b` fields are operand descriptors ([`Ir`]), except for
//! the IO class where `a` names a channel slot.  Each `Imm16` operand
//! consumes one trailing immediate word and each `Imm32` operand two,
//! counted across both operand slots.

use std::fmt::{self, Display, Formatter};

#[cfg(test)]
use test_strategy::{proptest, Arbitrary};

/// Condition code gating execution of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(test, derive(Arbitrary))]
pub enum Cond {
    /// Execute unconditionally.
    Always = 0,
    /// Execute only while the condition flag is set.
    IfTrue = 1,
    /// Execute only while the condition flag is clear.
    IfFalse = 2,
    /// Never legal to execute; reserved.
    Never = 3,
}

impl Cond {
    fn from_bits(bits: u16) -> Cond {
        match bits & 0x3 {
            0 => Cond::Always,
            1 => Cond::IfTrue,
            2 => Cond::IfFalse,
            _ => Cond::Never,
        }
    }

    /// Single-character prefix used in listings.
    pub fn glyph(&self) -> &'static str {
        match self {
            Cond::Always => ".",
            Cond::IfTrue => "+",
            Cond::IfFalse => "-",
            Cond::Never => "~",
        }
    }
}

/// Instruction class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(test, derive(Arbitrary))]
pub enum Class {
    Alu = 0,
    Cond = 1,
    Capp = 2,
    Io = 3,
}

impl Class {
    fn from_bits(bits: u16) -> Class {
        match bits & 0x3 {
            0 => Class::Alu,
            1 => Class::Cond,
            2 => Class::Capp,
            _ => Class::Io,
        }
    }

    /// Mnemonic as written in assembly source.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Class::Alu => "alu",
            Class::Cond => "if",
            Class::Capp => "list",
            Class::Io => "io",
        }
    }
}

/// ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(test, derive(Arbitrary))]
pub enum AluOp {
    Set = 0,
    Xor = 1,
    And = 2,
    Or = 3,
    Shl = 4,
    Shr = 5,
    Add = 6,
    Sub = 7,
}

impl AluOp {
    fn from_bits(bits: u16) -> AluOp {
        match bits & 0x7 {
            0 => AluOp::Set,
            1 => AluOp::Xor,
            2 => AluOp::And,
            3 => AluOp::Or,
            4 => AluOp::Shl,
            5 => AluOp::Shr,
            6 => AluOp::Add,
            _ => AluOp::Sub,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            AluOp::Set => "set",
            AluOp::Xor => "xor",
            AluOp::And => "and",
            AluOp::Or => "or",
            AluOp::Shl => "shl",
            AluOp::Shr => "shr",
            AluOp::Add => "add",
            AluOp::Sub => "sub",
        }
    }
}

/// Comparison operation.  `GE`/`GT` have no encoding; the assembler
/// synthesizes them by swapping operands under `Lt`/`Le`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(test, derive(Arbitrary))]
pub enum CondOp {
    Eq = 0,
    Ne = 1,
    Lt = 2,
    Le = 3,
}

impl CondOp {
    fn from_bits(bits: u16) -> Option<CondOp> {
        match bits & 0x7 {
            0 => Some(CondOp::Eq),
            1 => Some(CondOp::Ne),
            2 => Some(CondOp::Lt),
            3 => Some(CondOp::Le),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            CondOp::Eq => "eq",
            CondOp::Ne => "ne",
            CondOp::Lt => "lt",
            CondOp::Le => "le",
        }
    }
}

/// CAPP associative action selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(test, derive(Arbitrary))]
pub enum CappOp {
    /// Bank swap.  Reserved for the processor's fetch logic; never
    /// legal from an executed instruction stream.
    Swap = 0,
    ListAll = 1,
    ListNot = 2,
    ListNext = 3,
    ListOnly = 4,
    SetOf = 5,
    WriteFirst = 6,
    WriteList = 7,
}

impl CappOp {
    fn from_bits(bits: u16) -> CappOp {
        match bits & 0x7 {
            0 => CappOp::Swap,
            1 => CappOp::ListAll,
            2 => CappOp::ListNot,
            3 => CappOp::ListNext,
            4 => CappOp::ListOnly,
            5 => CappOp::SetOf,
            6 => CappOp::WriteFirst,
            _ => CappOp::WriteList,
        }
    }

    /// True for the operations that take no match/mask arguments.
    /// Their `a` and `b` fields must both encode [`Ir::Zero`].
    pub fn zero_arg(&self) -> bool {
        matches!(
            self,
            CappOp::Swap | CappOp::ListAll | CappOp::ListNot | CappOp::ListNext
        )
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            CappOp::Swap => "swap",
            CappOp::ListAll => "all",
            CappOp::ListNot => "not",
            CappOp::ListNext => "next",
            CappOp::ListOnly => "only",
            CappOp::SetOf => "of",
            CappOp::WriteFirst => "wfirst",
            CappOp::WriteList => "wlist",
        }
    }
}

/// I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(test, derive(Arbitrary))]
pub enum IoOp {
    Fetch = 0,
    Store = 1,
    Await = 2,
    Alert = 3,
}

impl IoOp {
    fn from_bits(bits: u16) -> Option<IoOp> {
        match bits & 0x7 {
            0 => Some(IoOp::Fetch),
            1 => Some(IoOp::Store),
            2 => Some(IoOp::Await),
            3 => Some(IoOp::Alert),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            IoOp::Fetch => "fetch",
            IoOp::Store => "store",
            IoOp::Await => "await",
            IoOp::Alert => "alert",
        }
    }
}

/// Operand descriptor: a register, a latched CAPP observable, one of
/// the two canonical constants, or an immediate-width marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(test, derive(Arbitrary))]
pub enum Ir {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    Ip = 6,
    Stack = 7,
    Match = 8,
    Mask = 9,
    First = 10,
    Count = 11,
    /// The constant 0.
    Zero = 12,
    /// The constant 0xffff_ffff.
    Ones = 13,
    /// One trailing immediate word.
    Imm16 = 14,
    /// Two trailing immediate words, high half first.
    Imm32 = 15,
}

impl Ir {
    pub fn from_bits(bits: u16) -> Ir {
        match bits & 0xf {
            0 => Ir::R0,
            1 => Ir::R1,
            2 => Ir::R2,
            3 => Ir::R3,
            4 => Ir::R4,
            5 => Ir::R5,
            6 => Ir::Ip,
            7 => Ir::Stack,
            8 => Ir::Match,
            9 => Ir::Mask,
            10 => Ir::First,
            11 => Ir::Count,
            12 => Ir::Zero,
            13 => Ir::Ones,
            14 => Ir::Imm16,
            _ => Ir::Imm32,
        }
    }

    /// True if this operand may be used as a destination.
    pub fn writable(&self) -> bool {
        (*self as u16) < (Ir::Match as u16)
    }

    /// Number of trailing immediate words this operand consumes.
    pub fn immediate_words(&self) -> usize {
        match self {
            Ir::Imm16 => 1,
            Ir::Imm32 => 2,
            _ => 0,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Ir::R0 => "r0",
            Ir::R1 => "r1",
            Ir::R2 => "r2",
            Ir::R3 => "r3",
            Ir::R4 => "r4",
            Ir::R5 => "r5",
            Ir::Ip => "ip",
            Ir::Stack => "stack",
            Ir::Match => "match",
            Ir::Mask => "mask",
            Ir::First => "first",
            Ir::Count => "count",
            Ir::Zero => "immz",
            Ir::Ones => "immnz",
            Ir::Imm16 => "imm16",
            Ir::Imm32 => "imm32",
        }
    }
}

/// Channel slot index.  Only the low four bits are encodable; slots 0
/// through 7 exist in the control processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u8);

impl ChannelId {
    pub const TEMP: ChannelId = ChannelId(0);
    pub const DEPOT: ChannelId = ChannelId(1);
    pub const TAPE: ChannelId = ChannelId(2);
    pub const VT: ChannelId = ChannelId(3);
    pub const MONITOR: ChannelId = ChannelId(7);
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match *self {
            ChannelId::TEMP => f.write_str("temp"),
            ChannelId::DEPOT => f.write_str("depot"),
            ChannelId::TAPE => f.write_str("tape"),
            ChannelId::VT => f.write_str("vt"),
            ChannelId::MONITOR => f.write_str("monitor"),
            ChannelId(n) => write!(f, "ch{n}"),
        }
    }
}

/// A single instruction: the primary word plus its immediate words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Code {
    pub word: u16,
    pub immediates: Vec<u16>,
}

fn with_cond(cond: Cond, op: u16, immediates: Vec<u16>) -> Code {
    Code {
        word: ((cond as u16) << 14) | op,
        immediates,
    }
}

/// Build an ALU instruction.  Only the low three bits of the target
/// operand are encoded; the writable destinations all fit there.
pub fn make_alu(cond: Cond, op: AluOp, target: Ir, arg: Ir, imms: &[u16]) -> Code {
    with_cond(
        cond,
        ((Class::Alu as u16) << 11)
            | ((op as u16) << 8)
            | (((target as u16) & 0x7) << 4)
            | (arg as u16),
        imms.to_vec(),
    )
}

/// Build a comparison instruction.
pub fn make_cond(cond: Cond, op: CondOp, a: Ir, b: Ir, imms: &[u16]) -> Code {
    with_cond(
        cond,
        ((Class::Cond as u16) << 11) | ((op as u16) << 8) | ((a as u16) << 4) | (b as u16),
        imms.to_vec(),
    )
}

/// Build a CAPP instruction.
pub fn make_capp(cond: Cond, op: CappOp, matching: Ir, mask: Ir, imms: &[u16]) -> Code {
    with_cond(
        cond,
        ((Class::Capp as u16) << 11) | ((op as u16) << 8) | ((matching as u16) << 4) | (mask as u16),
        imms.to_vec(),
    )
}

/// Build an I/O instruction.
pub fn make_io(cond: Cond, op: IoOp, channel: ChannelId, arg: Ir, imms: &[u16]) -> Code {
    with_cond(
        cond,
        ((Class::Io as u16) << 11)
            | ((op as u16) << 8)
            | (((channel.0 as u16) & 0xf) << 4)
            | (arg as u16),
        imms.to_vec(),
    )
}

/// Build the halt instruction: set `IP` to the all-ones sentinel.
pub fn make_exit(cond: Cond) -> Code {
    make_alu(cond, AluOp::Set, Ir::Ip, Ir::Ones, &[])
}

impl Code {
    pub fn cond(&self) -> Cond {
        Cond::from_bits(self.word >> 14)
    }

    pub fn class(&self) -> Class {
        Class::from_bits(self.word >> 11)
    }

    pub fn alu_decode(&self) -> (AluOp, Ir, Ir) {
        (
            AluOp::from_bits(self.word >> 8),
            Ir::from_bits(self.word >> 4),
            Ir::from_bits(self.word),
        )
    }

    /// The op field of a COND instruction has unused encodings, so the
    /// operation comes back as an `Option`.
    pub fn cond_decode(&self) -> (Option<CondOp>, Ir, Ir) {
        (
            CondOp::from_bits(self.word >> 8),
            Ir::from_bits(self.word >> 4),
            Ir::from_bits(self.word),
        )
    }

    pub fn capp_decode(&self) -> (CappOp, Ir, Ir) {
        (
            CappOp::from_bits(self.word >> 8),
            Ir::from_bits(self.word >> 4),
            Ir::from_bits(self.word),
        )
    }

    pub fn io_decode(&self) -> (Option<IoOp>, ChannelId, Ir) {
        (
            IoOp::from_bits(self.word >> 8),
            ChannelId(((self.word >> 4) & 0xf) as u8),
            Ir::from_bits(self.word),
        )
    }

    /// Number of immediate words this instruction's operands require.
    pub fn immediate_need(&self) -> usize {
        let (a, b) = match self.class() {
            Class::Alu => {
                let (_, _, arg) = self.alu_decode();
                (arg, Ir::Zero)
            }
            Class::Cond => {
                let (_, a, b) = self.cond_decode();
                (a, b)
            }
            Class::Capp => {
                let (_, a, b) = self.capp_decode();
                (a, b)
            }
            Class::Io => {
                let (_, _, arg) = self.io_decode();
                (arg, Ir::Zero)
            }
        };
        a.immediate_words() + b.immediate_words()
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let body = match self.class() {
            Class::Alu => {
                let (op, target, arg) = self.alu_decode();
                format!("{}.{}.{}", op.mnemonic(), target.mnemonic(), arg.mnemonic())
            }
            Class::Cond => {
                let (op, a, b) = self.cond_decode();
                let op = op.map(|o| CondOp::mnemonic(&o)).unwrap_or("??");
                format!("{}.{}.{}", op, a.mnemonic(), b.mnemonic())
            }
            Class::Capp => {
                let (op, a, b) = self.capp_decode();
                format!("{}.{}.{}", op.mnemonic(), a.mnemonic(), b.mnemonic())
            }
            Class::Io => {
                let (op, channel, arg) = self.io_decode();
                let op = op.map(|o| IoOp::mnemonic(&o)).unwrap_or("??");
                format!("{}.{}.{}", op, channel, arg.mnemonic())
            }
        };
        write!(
            f,
            "{}{}.{} imm:{:04x?}",
            self.cond().glyph(),
            self.class().mnemonic(),
            body,
            self.immediates
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cond_roundtrip() {
        for cond in [Cond::Always, Cond::IfTrue, Cond::IfFalse, Cond::Never] {
            let code = make_alu(cond, AluOp::Set, Ir::R0, Ir::Zero, &[]);
            assert_eq!(code.cond(), cond);
            assert_eq!(code.class(), Class::Alu);
        }
    }

    #[test]
    fn test_make_cond_fields() {
        let code = make_cond(Cond::Always, CondOp::Eq, Ir::R0, Ir::R1, &[]);
        assert_eq!(code.cond(), Cond::Always);
        assert_eq!(code.class(), Class::Cond);
        let (op, a, b) = code.cond_decode();
        assert_eq!(op, Some(CondOp::Eq));
        assert_eq!(a, Ir::R0);
        assert_eq!(b, Ir::R1);
    }

    #[test]
    fn test_io_channel_field() {
        let code = make_io(Cond::Always, IoOp::Fetch, ChannelId::TAPE, Ir::Imm16, &[0xff]);
        let (op, channel, arg) = code.io_decode();
        assert_eq!(op, Some(IoOp::Fetch));
        assert_eq!(channel, ChannelId::TAPE);
        assert_eq!(arg, Ir::Imm16);
    }

    #[test]
    fn test_invalid_cond_op_decodes_as_none() {
        let code = Code {
            word: ((Class::Cond as u16) << 11) | (0x7 << 8),
            immediates: vec![],
        };
        let (op, _, _) = code.cond_decode();
        assert_eq!(op, None);
    }

    #[test]
    fn test_invalid_io_op_decodes_as_none() {
        let code = Code {
            word: ((Class::Io as u16) << 11) | (0x7 << 8),
            immediates: vec![],
        };
        let (op, _, _) = code.io_decode();
        assert_eq!(op, None);
    }

    #[test]
    fn test_immediate_need() {
        let cases = [
            (make_alu(Cond::Always, AluOp::Set, Ir::R0, Ir::Zero, &[]), 0),
            (make_alu(Cond::Always, AluOp::Set, Ir::R0, Ir::Imm16, &[]), 1),
            (make_alu(Cond::Always, AluOp::Set, Ir::R0, Ir::Imm32, &[]), 2),
            (
                make_cond(Cond::Always, CondOp::Eq, Ir::Imm16, Ir::Imm16, &[]),
                2,
            ),
            (
                make_cond(Cond::Always, CondOp::Eq, Ir::Imm32, Ir::Imm32, &[]),
                4,
            ),
            (
                make_capp(Cond::Always, CappOp::SetOf, Ir::Imm16, Ir::Imm32, &[]),
                3,
            ),
            (
                make_io(Cond::Always, IoOp::Fetch, ChannelId::TAPE, Ir::Imm16, &[]),
                1,
            ),
        ];
        for (code, need) in cases {
            assert_eq!(code.immediate_need(), need, "{code}");
        }
    }

    #[test]
    fn test_writable() {
        assert!(Ir::R0.writable());
        assert!(Ir::Ip.writable());
        assert!(Ir::Stack.writable());
        assert!(!Ir::Match.writable());
        assert!(!Ir::Mask.writable());
        assert!(!Ir::Zero.writable());
        assert!(!Ir::Imm32.writable());
    }

    #[test]
    fn test_display_all_classes() {
        let codes = [
            make_alu(Cond::Always, AluOp::Set, Ir::R0, Ir::Zero, &[]),
            make_cond(Cond::IfTrue, CondOp::Eq, Ir::R0, Ir::R1, &[]),
            make_capp(Cond::IfFalse, CappOp::ListAll, Ir::Zero, Ir::Zero, &[]),
            make_io(Cond::Always, IoOp::Fetch, ChannelId::TAPE, Ir::Imm16, &[0xff]),
        ];
        for code in codes {
            assert!(!code.to_string().is_empty());
        }
    }

    #[proptest]
    fn alu_roundtrip(cond: Cond, op: AluOp, arg: Ir) {
        // The target field is three bits wide, so only the writable
        // destinations survive a round trip.
        for target in [Ir::R0, Ir::R1, Ir::R2, Ir::R3, Ir::R4, Ir::R5, Ir::Ip, Ir::Stack] {
            let code = make_alu(cond, op, target, arg, &[]);
            assert_eq!(code.cond(), cond);
            assert_eq!(code.class(), Class::Alu);
            assert_eq!(code.alu_decode(), (op, target, arg));
        }
    }

    #[proptest]
    fn cond_roundtrip(cond: Cond, op: CondOp, a: Ir, b: Ir) {
        let code = make_cond(cond, op, a, b, &[]);
        assert_eq!(code.cond(), cond);
        assert_eq!(code.class(), Class::Cond);
        assert_eq!(code.cond_decode(), (Some(op), a, b));
    }

    #[proptest]
    fn capp_roundtrip(cond: Cond, op: CappOp, a: Ir, b: Ir) {
        let code = make_capp(cond, op, a, b, &[]);
        assert_eq!(code.cond(), cond);
        assert_eq!(code.class(), Class::Capp);
        assert_eq!(code.capp_decode(), (op, a, b));
    }

    #[proptest]
    fn io_roundtrip(cond: Cond, op: IoOp, #[strategy(0u8..16)] channel: u8, arg: Ir) {
        let code = make_io(cond, op, ChannelId(channel), arg, &[]);
        assert_eq!(code.cond(), cond);
        assert_eq!(code.class(), Class::Io);
        assert_eq!(code.io_decode(), (Some(op), ChannelId(channel), arg));
    }
}
