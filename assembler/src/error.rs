//! Assembler error taxonomy.
//!
//! Leaf errors describe what went wrong; the `Syntax` and `Macro`
//! wrappers locate it in the listing.  `Syntax` is always outermost
//! for an error escaping [`crate::Assembler::parse`], carrying the
//! line number and source text of the offending line.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    EquateSyntax,
    EquateDuplicate,
    LabelDuplicate,
    LabelMissing(String),
    MacroSyntax,
    MacroNested,
    MacroDuplicate,
    MacroUnterminated,
    StrayEndm,
    ExtraArgs,
    OpcodeMissing,
    ValueMissing,
    OpcodeInvalid,
    TargetInvalid,
    InstructionInvalid,
    ChannelInvalid,
    /// A character literal that is not a single byte.
    ParseCharacter(String),
    /// A word that should have been a number.
    ParseNumber(String),
    /// A `$(…)` expression that failed to evaluate.
    ParseExpression(String),
    /// Locates an error inside a macro expansion.
    Macro {
        name: String,
        line_no: usize,
        cause: Box<AsmError>,
    },
    /// Locates an error in the listing.
    Syntax {
        line_no: usize,
        line: String,
        cause: Box<AsmError>,
    },
}

impl AsmError {
    /// Line number of the outermost location wrapper, if any.
    pub fn line_no(&self) -> Option<usize> {
        match self {
            AsmError::Syntax { line_no, .. } | AsmError::Macro { line_no, .. } => Some(*line_no),
            _ => None,
        }
    }

    /// Strip the location wrappers down to the leaf error.
    pub fn root_cause(&self) -> &AsmError {
        match self {
            AsmError::Syntax { cause, .. } | AsmError::Macro { cause, .. } => cause.root_cause(),
            _ => self,
        }
    }
}

impl Display for AsmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            AsmError::EquateSyntax => f.write_str(".equ syntax"),
            AsmError::EquateDuplicate => f.write_str(".equ duplicated"),
            AsmError::LabelDuplicate => f.write_str("label duplicated"),
            AsmError::LabelMissing(label) => write!(f, "label {label} missing"),
            AsmError::MacroSyntax => f.write_str(".macro syntax"),
            AsmError::MacroNested => f.write_str(".macro in .macro prohibited"),
            AsmError::MacroDuplicate => f.write_str(".macro duplicated"),
            AsmError::MacroUnterminated => f.write_str(".macro without .endm"),
            AsmError::StrayEndm => f.write_str(".endm without .macro"),
            AsmError::ExtraArgs => f.write_str("excessive arguments"),
            AsmError::OpcodeMissing => f.write_str("opcode missing"),
            AsmError::ValueMissing => f.write_str("value missing"),
            AsmError::OpcodeInvalid => f.write_str("opcode invalid"),
            AsmError::TargetInvalid => f.write_str("target invalid"),
            AsmError::InstructionInvalid => f.write_str("instruction invalid"),
            AsmError::ChannelInvalid => f.write_str("channel invalid"),
            AsmError::ParseCharacter(text) => {
                write!(f, "'{text}' is not a single byte character")
            }
            AsmError::ParseNumber(text) => write!(f, "{text} is not a number"),
            AsmError::ParseExpression(text) => write!(f, "$({text}) is not a valid expression"),
            AsmError::Macro {
                name,
                line_no,
                cause,
            } => write!(f, "macro {name} line {line_no} {cause}"),
            AsmError::Syntax {
                line_no,
                line,
                cause,
            } => write!(f, "line {line_no} \"{line}\": {cause}"),
        }
    }
}

impl Error for AsmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AsmError::Syntax { cause, .. } | AsmError::Macro { cause, .. } => Some(cause),
            _ => None,
        }
    }
}
