//! Single-pass macro assembler for the CAPP control processor.
//!
//! Source is line-oriented: semicolons start comments, labels end with
//! a colon, `.equ` defines a symbolic equate and `.macro`/`.endm`
//! bracket a text-substitution macro.  Character literals (`'x'`) and
//! compile-time integer expressions (`$(…)`) are rewritten before
//! tokenization, and a handful of friendly spellings (`write r0 5`,
//! `if some?`, `trap`, `return`, …) are rewritten into the canonical
//! `alu`/`if`/`list`/`io` forms before encoding.
//!
//! The pass records label addresses as it goes; `jump`/`call` emit
//! their final instruction with blank 32-bit immediates and a link
//! label, patched after the pass by [`Assembler::parse`]'s link step.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::{event, Level};

use base::prelude::*;

pub mod error;
pub mod eval;

pub use error::AsmError;

/// A recorded macro body.
#[derive(Debug, Clone)]
struct MacroDef {
    /// Line number of the first body line.
    line_no: usize,
    args: Vec<String>,
    lines: Vec<String>,
}

/// The assembler.  One instance can parse several programs; equates,
/// labels and macros reset at each [`Assembler::parse`].
#[derive(Debug, Default)]
pub struct Assembler {
    /// Records of the most recent parse.
    pub opcodes: Vec<OpcodeRecord>,

    labels: HashMap<String, usize>,
    equates: HashMap<String, String>,
    macros: HashMap<String, MacroDef>,
    predefines: HashMap<String, String>,
}

fn system_equates() -> HashMap<String, String> {
    [
        ("LINENO".to_string(), "0".to_string()),
        ("ARENA_MASK".to_string(), format!("{ARENA_MASK:#x}")),
        ("ARENA_IO".to_string(), format!("{ARENA_IO:#x}")),
        ("ARENA_TMP".to_string(), format!("{ARENA_TMP:#x}")),
        ("ARENA_CODE".to_string(), format!("{ARENA_CODE:#x}")),
        ("ARENA_FREE".to_string(), format!("{ARENA_FREE:#x}")),
    ]
    .into_iter()
    .collect()
}

/// The writable instruction targets.
fn dst_of(word: &str) -> Option<Ir> {
    Some(match word {
        "r0" => Ir::R0,
        "r1" => Ir::R1,
        "r2" => Ir::R2,
        "r3" => Ir::R3,
        "r4" => Ir::R4,
        "r5" => Ir::R5,
        "ip" => Ir::Ip,
        "stack" => Ir::Stack,
        _ => return None,
    })
}

/// The twelve readable sources; immediates are handled separately.
fn ir_of(word: &str) -> Option<Ir> {
    Some(match word {
        "r0" => Ir::R0,
        "r1" => Ir::R1,
        "r2" => Ir::R2,
        "r3" => Ir::R3,
        "r4" => Ir::R4,
        "r5" => Ir::R5,
        "ip" => Ir::Ip,
        "stack" => Ir::Stack,
        "match" => Ir::Match,
        "mask" => Ir::Mask,
        "first" => Ir::First,
        "count" => Ir::Count,
        _ => return None,
    })
}

fn parse_int(word: &str) -> Option<i64> {
    let (negative, rest) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word.strip_prefix('+').unwrap_or(word)),
    };
    if rest.is_empty() {
        return None;
    }
    let cleaned = rest.replace('_', "");
    let value = if let Some(digits) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        i64::from_str_radix(digits, 16).ok()?
    } else if let Some(digits) = cleaned
        .strip_prefix("0b")
        .or_else(|| cleaned.strip_prefix("0B"))
    {
        i64::from_str_radix(digits, 2).ok()?
    } else if let Some(digits) = cleaned
        .strip_prefix("0o")
        .or_else(|| cleaned.strip_prefix("0O"))
    {
        i64::from_str_radix(digits, 8).ok()?
    } else if cleaned.len() > 1 && cleaned.starts_with('0') {
        i64::from_str_radix(&cleaned[1..], 8).ok()?
    } else {
        cleaned.parse::<i64>().ok()?
    };
    let value = if negative { -value } else { value };
    if !(-0x8000_0000..=0xffff_ffff).contains(&value) {
        return None;
    }
    Some(value)
}

/// Numeric value of a simple word: optional `~` complement prefix,
/// then a signed integer in any of the usual radix spellings.
fn parse_value(word: &str) -> Result<u32, AsmError> {
    let (invert, word) = match word.strip_prefix('~') {
        Some(rest) => (true, rest),
        None => (false, word),
    };
    if word.starts_with('\'') {
        // An unexpanded character literal: not a single byte.
        return Err(AsmError::ParseCharacter(
            word.trim_matches('\'').to_string(),
        ));
    }
    let value = parse_int(word).ok_or_else(|| AsmError::ParseNumber(word.to_string()))?;
    let value = value as u32;
    Ok(if invert { !value } else { value })
}

/// The byte value of a character literal body, `x` or `\x`.
fn expand_char(inner: &str) -> Option<u8> {
    if let Some(escaped) = inner.strip_prefix('\\') {
        match escaped {
            "\\" => Some(b'\\'),
            "n" => Some(b'\n'),
            "r" => Some(b'\r'),
            "e" => Some(0x1b),
            _ => None,
        }
    } else if inner.len() == 1 {
        Some(inner.as_bytes()[0])
    } else {
        None
    }
}

fn eval_with(equates: &HashMap<String, String>, expr: &str) -> Result<u32, AsmError> {
    let lookup = |name: &str| -> Option<i64> {
        // Non-numeric equates (register names bound as macro
        // arguments, say) are invisible to expressions.
        let text = equates.get(name)?;
        parse_value(text).ok().map(i64::from)
    };
    match eval::evaluate(expr, &lookup) {
        Ok(value) => Ok(value as u32),
        Err(error) => {
            event!(Level::DEBUG, "expression $({expr}) failed: {error}");
            Err(AsmError::ParseExpression(expr.to_string()))
        }
    }
}

impl Assembler {
    /// Inject a machine constant into the equate table of every
    /// subsequent parse.
    pub fn predefine(&mut self, name: &str, value: &str) {
        self.predefines.insert(name.to_string(), value.to_string());
    }

    fn current_ip(&self) -> usize {
        match self.opcodes.last() {
            Some(op) => op.ip + op.codes.len(),
            None => 0,
        }
    }

    /// Parse a program and link its labels.
    pub fn parse(&mut self, source: &str) -> Result<Program, AsmError> {
        self.labels.clear();
        self.macros.clear();
        self.opcodes.clear();
        self.equates = system_equates();
        for (name, value) in &self.predefines {
            self.equates.insert(name.clone(), value.clone());
        }

        let mut pending: Option<(String, MacroDef)> = None;
        let mut line_no = 0;

        for text in source.lines() {
            line_no += 1;
            event!(Level::TRACE, "{line_no}: {text}");

            let line = text.split(';').next().unwrap_or("").trim().to_string();
            let words: Vec<&str> = line.split(' ').filter(|word| !word.is_empty()).collect();

            let syntax = |cause: AsmError| AsmError::Syntax {
                line_no,
                line: line.clone(),
                cause: Box::new(cause),
            };

            // .macro NAME arg…
            if words.first() == Some(&".macro") {
                if pending.is_some() {
                    return Err(syntax(AsmError::MacroNested));
                }
                if words.len() < 2 {
                    return Err(syntax(AsmError::MacroSyntax));
                }
                if self.macros.contains_key(words[1]) {
                    return Err(syntax(AsmError::MacroDuplicate));
                }
                pending = Some((
                    words[1].to_string(),
                    MacroDef {
                        line_no: line_no + 1,
                        args: words[2..].iter().map(|word| word.to_string()).collect(),
                        lines: Vec::new(),
                    },
                ));
                continue;
            }
            if words.first() == Some(&".endm") {
                match pending.take() {
                    Some((name, def)) => {
                        self.macros.insert(name, def);
                    }
                    None => return Err(syntax(AsmError::StrayEndm)),
                }
                continue;
            }
            if let Some((_, def)) = pending.as_mut() {
                def.lines.push(line.clone());
                continue;
            }

            let step = self
                .parse_line(&line, line_no)
                .and_then(|words| self.parse_words(&words, line_no));
            if let Err(cause) = step {
                return Err(AsmError::Syntax {
                    line_no,
                    line,
                    cause: Box::new(cause),
                });
            }
        }

        if pending.is_some() {
            return Err(AsmError::Syntax {
                line_no,
                line: String::new(),
                cause: Box::new(AsmError::MacroUnterminated),
            });
        }

        // Link pass: resolve every forward-referenced label into the
        // 32-bit immediate of its record's final instruction.
        for op in &mut self.opcodes {
            let Some(label) = &op.link_label else { continue };
            let Some(&ip) = self.labels.get(label) else {
                return Err(AsmError::Syntax {
                    line_no: op.line_no,
                    line: op.words.join(" "),
                    cause: Box::new(AsmError::LabelMissing(label.clone())),
                });
            };
            if let Some(linked) = op.codes.last_mut() {
                if linked.immediates.len() >= 2 {
                    linked.immediates[0] |= ((ip >> 16) & 0xffff) as u16;
                    linked.immediates[1] |= (ip & 0xffff) as u16;
                }
            }
        }

        Ok(Program {
            opcodes: self.opcodes.clone(),
        })
    }

    /// Rewrite one line (character literals, `$(…)`, equates, labels,
    /// macro invocation) down to opcode tokens.  An empty result means
    /// the line produced no instruction of its own.
    fn parse_line(&mut self, line: &str, line_no: usize) -> Result<Vec<String>, AsmError> {
        self.equates
            .insert("LINENO".to_string(), line_no.to_string());

        // 'x' character literals become byte values.
        static CHAR_RE: OnceLock<Regex> = OnceLock::new();
        let char_re = CHAR_RE.get_or_init(|| Regex::new(r"'\\?[^']'").expect("valid pattern"));
        let line = char_re
            .replace_all(line, |caps: &Captures| {
                let matched = &caps[0];
                match expand_char(&matched[1..matched.len() - 1]) {
                    Some(value) => value.to_string(),
                    // Left for parse_value to report.
                    None => matched.to_string(),
                }
            })
            .into_owned();

        // $(expr) compile-time evaluation.
        static EXPR_RE: OnceLock<Regex> = OnceLock::new();
        let expr_re = EXPR_RE.get_or_init(|| Regex::new(r"\$\([^$]*\)").expect("valid pattern"));
        let mut eval_failure: Option<AsmError> = None;
        let equates = &self.equates;
        let line = expr_re
            .replace_all(&line, |caps: &Captures| {
                let matched = &caps[0];
                match eval_with(equates, &matched[2..matched.len() - 1]) {
                    Ok(value) => format!("{value:#x}"),
                    Err(error) => {
                        eval_failure.get_or_insert(error);
                        String::new()
                    }
                }
            })
            .into_owned();
        if let Some(error) = eval_failure {
            return Err(error);
        }

        let mut words: Vec<String> = line
            .split(' ')
            .filter(|word| !word.is_empty())
            .map(|word| word.to_string())
            .collect();
        if words.is_empty() {
            return Ok(words);
        }

        // .equ NAME VALUE
        if words[0] == ".equ" {
            if words.len() != 3 {
                return Err(AsmError::EquateSyntax);
            }
            if self.equates.contains_key(&words[1]) {
                return Err(AsmError::EquateDuplicate);
            }
            self.equates.insert(words[1].clone(), words[2].clone());
            return Ok(Vec::new());
        }

        // Single-pass equate substitution.
        for word in &mut words {
            if let Some(value) = self.equates.get(word.as_str()) {
                *word = value.clone();
            }
        }

        // Labels record the address of the next instruction.
        while words[0].ends_with(':') {
            let label = words[0][..words[0].len() - 1].to_string();
            if self.labels.contains_key(&label) {
                return Err(AsmError::LabelDuplicate);
            }
            self.labels.insert(label, self.current_ip());
            words.remove(0);
            if words.is_empty() {
                return Ok(words);
            }
        }

        // Macro invocation: bind arguments as temporary equates and
        // run the body lines through the same pipeline.  The equate
        // table is restored exactly on exit, error or not.
        if self.macros.contains_key(&words[0]) {
            let name = words[0].clone();
            let def = self.macros[&name].clone();
            let args = &words[1..];
            if args.len() != def.args.len() {
                return Err(AsmError::MacroSyntax);
            }

            let saved = self.equates.clone();
            for (arg_name, value) in def.args.iter().zip(args) {
                self.equates.insert(arg_name.clone(), value.clone());
            }

            let mut failure = None;
            // `@` yields a label prefix unique to this invocation,
            // shared by every line of the body.
            let label_prefix = format!("{name}_{line_no}_");
            for (n, body_line) in def.lines.iter().enumerate() {
                let body_line_no = def.line_no + n;
                let expanded = body_line.replace('@', &label_prefix);
                let step = self
                    .parse_line(&expanded, body_line_no)
                    .and_then(|body_words| self.parse_words(&body_words, body_line_no));
                if let Err(cause) = step {
                    failure = Some(AsmError::Syntax {
                        line_no: body_line_no,
                        line: expanded,
                        cause: Box::new(AsmError::Macro {
                            name: name.clone(),
                            line_no: body_line_no,
                            cause: Box::new(cause),
                        }),
                    });
                    break;
                }
            }

            self.equates = saved;
            return match failure {
                Some(error) => Err(error),
                None => Ok(Vec::new()),
            };
        }

        Ok(words)
    }

    /// Encode one operand: a named source, one of the two canonical
    /// constants, or an immediate sized by its magnitude.
    fn ir_or_imm(&self, words: &[String]) -> Result<(Ir, Vec<u16>), AsmError> {
        if words.len() > 1 {
            return Err(AsmError::ExtraArgs);
        }
        let Some(word) = words.first() else {
            return Ok((Ir::Ones, Vec::new()));
        };
        if let Some(ir) = ir_of(word) {
            return Ok((ir, Vec::new()));
        }
        let value = parse_value(word)?;
        Ok(match value {
            0 => (Ir::Zero, Vec::new()),
            0xffff_ffff => (Ir::Ones, Vec::new()),
            value if value <= 0xffff => (Ir::Imm16, vec![value as u16]),
            value => (Ir::Imm32, vec![(value >> 16) as u16, (value & 0xffff) as u16]),
        })
    }

    /// Encode a match/mask operand pair.  A missing pair selects
    /// everything; a missing mask covers the whole word.
    fn match_mask(&self, words: &[String]) -> Result<(Ir, Ir, Vec<u16>), AsmError> {
        if words.len() > 2 {
            return Err(AsmError::ExtraArgs);
        }
        if words.is_empty() {
            return Ok((Ir::Zero, Ir::Ones, Vec::new()));
        }
        let (matching, mut imms) = self.ir_or_imm(&words[..1])?;
        let mask = if words.len() == 2 {
            let (mask, mask_imms) = self.ir_or_imm(&words[1..2])?;
            imms.extend(mask_imms);
            mask
        } else {
            Ir::Ones
        };
        Ok((matching, mask, imms))
    }

    fn channel_of(&self, word: &str) -> Result<ChannelId, AsmError> {
        Ok(match word {
            "temp" => ChannelId::TEMP,
            "depot" => ChannelId::DEPOT,
            "tape" => ChannelId::TAPE,
            "vt" => ChannelId::VT,
            "monitor" => ChannelId::MONITOR,
            _ => {
                let value = parse_value(word)?;
                if value > 8 {
                    return Err(AsmError::ChannelInvalid);
                }
                ChannelId(value as u8)
            }
        })
    }

    /// Encode the tokens of one line into instructions.
    fn parse_words(&mut self, words: &[String], line_no: usize) -> Result<(), AsmError> {
        if words.is_empty() {
            return Ok(());
        }

        let initial: Vec<String> = words.to_vec();
        let mut words: Vec<String> = words.to_vec();

        let mut cond = Cond::Always;
        match words[0].as_str() {
            "?" => {
                cond = Cond::IfTrue;
                words.remove(0);
            }
            "!" => {
                cond = Cond::IfFalse;
                words.remove(0);
            }
            _ => {}
        }
        if words.is_empty() {
            return Err(AsmError::OpcodeMissing);
        }

        let word_is_dst = words.len() >= 2 && dst_of(&words[1]).is_some();

        // Alternate-syntax rewrites; the encoder below sees only the
        // canonical forms.
        let strs = |items: &[&str]| -> Vec<String> {
            items.iter().map(|item| item.to_string()).collect()
        };
        if words.len() >= 2 && words[0] == "write" && words[1] == "list" {
            words[0] = "list".to_string();
            words[1] = "write".to_string();
        } else if words.len() >= 2 && words[0] == "write" && words[1] == "first" {
            words[0] = "list".to_string();
            words[1] = "first".to_string();
        } else if words.len() >= 2 && words[0] == "write" && word_is_dst {
            let mut rewritten = strs(&["alu", "set"]);
            rewritten.extend(words[1..].iter().cloned());
            words = rewritten;
        } else if words.len() == 2 && words[0] == "if" && words[1] == "some?" {
            words = strs(&["if", "gt?", "count", "0"]);
        } else if words.len() == 2 && words[0] == "if" && words[1] == "none?" {
            words = strs(&["if", "eq?", "count", "0"]);
        } else if words.len() == 3 && words[0] == "if" && words[1] == "true?" {
            words = vec!["if".to_string(), "ne?".to_string(), words[2].clone(), "0".to_string()];
        } else if words.len() == 3 && words[0] == "if" && words[1] == "false?" {
            words = vec!["if".to_string(), "eq?".to_string(), words[2].clone(), "0".to_string()];
        } else if words.len() == 1 && words[0] == "trap" {
            words = strs(&["io", "await", "monitor"]);
        } else if matches!(words[0].as_str(), "fetch" | "store" | "await" | "alert") {
            words.insert(0, "io".to_string());
        } else if words.len() == 1 && words[0] == "return" {
            words = strs(&["alu", "set", "ip", "stack"]);
        } else if words.len() == 2 && words[0] == "vjump" {
            words = vec!["alu".to_string(), "set".to_string(), "ip".to_string(), words[1].clone()];
        }

        let mut codes: Vec<Code> = Vec::new();
        let mut link_label: Option<String> = None;

        match words[0].as_str() {
            "if" => {
                if words.len() < 2 {
                    return Err(AsmError::OpcodeMissing);
                }
                if words.len() < 4 {
                    return Err(AsmError::ValueMissing);
                }
                if words.len() > 4 {
                    return Err(AsmError::ExtraArgs);
                }
                let (a_ir, a_imms) = self.ir_or_imm(&words[2..3])?;
                let (b_ir, b_imms) = self.ir_or_imm(&words[3..4])?;
                // GE/GT have no encoding: swap the operands (and their
                // immediates) under LE/LT.
                let (op, a_ir, b_ir, imms) = match words[1].as_str() {
                    "eq?" => (CondOp::Eq, a_ir, b_ir, [a_imms, b_imms].concat()),
                    "ne?" => (CondOp::Ne, a_ir, b_ir, [a_imms, b_imms].concat()),
                    "lt?" => (CondOp::Lt, a_ir, b_ir, [a_imms, b_imms].concat()),
                    "le?" => (CondOp::Le, a_ir, b_ir, [a_imms, b_imms].concat()),
                    "ge?" => (CondOp::Le, b_ir, a_ir, [b_imms, a_imms].concat()),
                    "gt?" => (CondOp::Lt, b_ir, a_ir, [b_imms, a_imms].concat()),
                    _ => return Err(AsmError::OpcodeInvalid),
                };
                codes.push(make_cond(cond, op, a_ir, b_ir, &imms));
            }

            "list" => {
                if words.len() < 2 {
                    return Err(AsmError::OpcodeMissing);
                }
                match words[1].as_str() {
                    "all" | "not" | "next" => {
                        if words.len() > 2 {
                            return Err(AsmError::ExtraArgs);
                        }
                        let op = match words[1].as_str() {
                            "all" => CappOp::ListAll,
                            "not" => CappOp::ListNot,
                            _ => CappOp::ListNext,
                        };
                        codes.push(make_capp(cond, op, Ir::Zero, Ir::Zero, &[]));
                    }
                    "of" | "only" | "write" | "first" => {
                        if words.len() < 3 {
                            return Err(AsmError::ValueMissing);
                        }
                        let op = match words[1].as_str() {
                            "of" => CappOp::SetOf,
                            "only" => CappOp::ListOnly,
                            "write" => CappOp::WriteList,
                            _ => CappOp::WriteFirst,
                        };
                        let (matching, mask, imms) = self.match_mask(&words[2..])?;
                        codes.push(make_capp(cond, op, matching, mask, &imms));
                    }
                    _ => return Err(AsmError::OpcodeInvalid),
                }
            }

            "io" => {
                if words.len() < 3 {
                    return Err(AsmError::OpcodeMissing);
                }
                let channel = self.channel_of(&words[2])?;
                match words[1].as_str() {
                    "fetch" | "store" | "alert" => {
                        let (arg, imms) = self.ir_or_imm(&words[3..])?;
                        let op = match words[1].as_str() {
                            "fetch" => IoOp::Fetch,
                            "store" => IoOp::Store,
                            _ => IoOp::Alert,
                        };
                        codes.push(make_io(cond, op, channel, arg, &imms));
                    }
                    "await" => {
                        // The response target must be writable, or
                        // CONST_0 to discard; the bare form discards.
                        let (arg, imms) = if words.len() == 3 {
                            (Ir::Zero, Vec::new())
                        } else {
                            self.ir_or_imm(&words[3..])?
                        };
                        if !(arg.writable() || arg == Ir::Zero) {
                            return Err(AsmError::OpcodeInvalid);
                        }
                        codes.push(make_io(cond, IoOp::Await, channel, arg, &imms));
                    }
                    _ => return Err(AsmError::OpcodeInvalid),
                }
            }

            "call" => {
                if words.len() < 2 {
                    return Err(AsmError::OpcodeMissing);
                }
                if words.len() > 2 {
                    return Err(AsmError::ExtraArgs);
                }
                codes.extend([
                    make_alu(cond, AluOp::Set, Ir::Stack, Ir::Imm16, &[1]),
                    make_alu(cond, AluOp::Add, Ir::Stack, Ir::Ip, &[]),
                    make_alu(cond, AluOp::Set, Ir::Ip, Ir::Imm32, &[0, 0]),
                ]);
                link_label = Some(words[1].clone());
            }

            "vcall" => {
                if words.len() < 2 {
                    return Err(AsmError::OpcodeMissing);
                }
                let (arg, imms) = self.ir_or_imm(&words[1..])?;
                codes.extend([
                    make_alu(cond, AluOp::Set, Ir::Stack, Ir::Imm16, &[1]),
                    make_alu(cond, AluOp::Add, Ir::Stack, Ir::Ip, &[]),
                    make_alu(cond, AluOp::Set, Ir::Ip, arg, &imms),
                ]);
            }

            "return" => {
                if words.len() > 1 {
                    return Err(AsmError::ExtraArgs);
                }
                codes.push(make_alu(cond, AluOp::Set, Ir::Ip, Ir::Stack, &[]));
            }

            "exit" => {
                codes.push(make_exit(cond));
            }

            "jump" => {
                if words.len() < 2 {
                    return Err(AsmError::OpcodeMissing);
                }
                if words.len() > 2 {
                    return Err(AsmError::ExtraArgs);
                }
                codes.push(make_alu(cond, AluOp::Set, Ir::Ip, Ir::Imm32, &[0, 0]));
                link_label = Some(words[1].clone());
            }

            "alu" => {
                if words.len() < 4 {
                    return Err(AsmError::OpcodeMissing);
                }
                if words.len() > 4 {
                    return Err(AsmError::ExtraArgs);
                }
                let op = match words[1].as_str() {
                    "set" => AluOp::Set,
                    "xor" => AluOp::Xor,
                    "and" => AluOp::And,
                    "or" => AluOp::Or,
                    "shl" => AluOp::Shl,
                    "shr" => AluOp::Shr,
                    "add" => AluOp::Add,
                    "sub" => AluOp::Sub,
                    _ => return Err(AsmError::OpcodeInvalid),
                };
                let target = dst_of(&words[2]).ok_or(AsmError::TargetInvalid)?;
                let (arg, imms) = self.ir_or_imm(&words[3..])?;
                codes.push(make_alu(cond, op, target, arg, &imms));
            }

            _ => return Err(AsmError::InstructionInvalid),
        }

        if !codes.is_empty() {
            let record = OpcodeRecord {
                line_no,
                ip: self.current_ip(),
                words: initial,
                codes,
                link_label,
            };
            self.opcodes.push(record);
        }
        Ok(())
    }
}
