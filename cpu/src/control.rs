//! The control processor.
//!
//! Each tick fetches one primary word (plus any immediate words) from
//! the source selected by the top two bits of `IP`, gates it on the
//! condition flag, and executes it against the register bank, the
//! stack, the CAPP or a channel slot.
//!
//! Fetching from the CAPP itself uses CAPP actions: the banks are
//! swapped first so the program-memory selection on the inactive bank
//! is not perturbed by whatever selection the program has built on the
//! active one.

use std::fmt::{self, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;

use crate::capp::{Action, Capp};
use crate::fault::{ArgPos, Fault, OpcodeFault};
use crate::io::{Channel, ResponseQueue};
use crate::stack::Stack;

/// Execute from the CAPP.
pub const IP_MODE_CAPP: u32 = 0b00 << 30;
/// Execute from the stack.
pub const IP_MODE_STACK: u32 = 0b01 << 30;
/// Execute from the register bank.
pub const IP_MODE_REG: u32 = 0b10 << 30;
/// Mask of the execute-mode bits.
pub const IP_MODE_MASK: u32 = 0b11 << 30;

/// A channel bound to a slot, paired with its response queue.
#[derive(Debug)]
pub struct CpuChannel {
    pub channel: Channel,
    pub response: ResponseQueue,
}

/// The control processor and its CAPP.
#[derive(Debug)]
pub struct Cpu {
    pub capp: Capp,

    /// Instruction pointer; the top two bits select the fetch mode and
    /// the all-ones value is the halt sentinel.
    pub ip: u32,
    /// General-purpose registers.
    pub register: [u32; 6],
    pub stack: Stack,
    /// Match word latched by the most recent `SET_OF`.
    pub match_reg: u32,
    /// Mask word latched by the most recent `SET_OF`.
    pub mask_reg: u32,
    /// Condition flag, written by COND-class instructions.
    pub cond: bool,

    /// Executed instructions since reset.
    pub ticks: u64,
    /// Accumulated bit flips: CAPP transitions plus ALU target churn.
    pub power: u64,

    channels: [Option<CpuChannel>; 8],
}

impl Cpu {
    pub fn new(capp_cells: usize) -> Cpu {
        Cpu {
            capp: Capp::new(capp_cells),
            ip: 0,
            register: [0; 6],
            stack: Stack::default(),
            match_reg: 0,
            mask_reg: 0,
            cond: false,
            ticks: 0,
            power: 0,
            channels: Default::default(),
        }
    }

    /// Bind a channel to a slot, giving it a fresh response queue.
    pub fn set_channel(&mut self, id: ChannelId, channel: Channel) {
        if let Some(slot) = self.channels.get_mut(usize::from(id.0)) {
            *slot = Some(CpuChannel {
                channel,
                response: ResponseQueue::default(),
            });
        }
    }

    pub fn remove_channel(&mut self, id: ChannelId) {
        if let Some(slot) = self.channels.get_mut(usize::from(id.0)) {
            *slot = None;
        }
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut CpuChannel> {
        self.channels.get_mut(usize::from(id.0))?.as_mut()
    }

    /// Host-side injection into a slot's response queue (how the
    /// embedder answers an `ALERT` or raises a monitor trap).
    pub fn post_response(&mut self, id: ChannelId, value: u32) -> bool {
        match self.channel_mut(id) {
            Some(slot) => {
                slot.response.post(value);
                true
            }
            None => false,
        }
    }

    /// Clear all state, rewind every channel, install the bootstrap
    /// into the register bank and point `IP` at it.
    ///
    /// The bootstrap selects every cell, clears them to the all-ones
    /// word, streams the program in from the `boot` channel and jumps
    /// to CAPP address 0:
    ///
    /// ```text
    /// r0: list of    0 0      ; select all cells
    /// r1: list all            ; tag them
    /// r2: list write -1 -1    ; clear cells to 0xffffffff
    /// r3: io fetch   boot -1  ; stream program bits into the list
    /// r4: list not            ; untag program cells, others stay tagged
    /// r5: alu set    ip 0     ; jump to CAPP-mode address 0
    /// ```
    pub fn reset(&mut self, boot: ChannelId) -> Result<(), Fault> {
        event!(Level::DEBUG, "cpu: reset, boot from channel {boot}");

        self.register = [0; 6];
        self.stack.reset();
        self.capp.reset();
        self.ticks = 0;
        self.power = 0;

        for slot in self.channels.iter_mut().flatten() {
            slot.channel.rewind();
        }

        let bootstrap = [
            make_capp(Cond::Always, CappOp::SetOf, Ir::Zero, Ir::Zero, &[]),
            make_capp(Cond::Always, CappOp::ListAll, Ir::Zero, Ir::Zero, &[]),
            make_capp(Cond::Always, CappOp::WriteList, Ir::Ones, Ir::Ones, &[]),
            make_io(Cond::Always, IoOp::Fetch, boot, Ir::Ones, &[]),
            make_capp(Cond::Always, CappOp::ListNot, Ir::Zero, Ir::Zero, &[]),
            make_alu(Cond::Always, AluOp::Set, Ir::Ip, Ir::Zero, &[]),
        ];
        for (n, code) in bootstrap.iter().enumerate() {
            // The register bank holds bare primary words.
            debug_assert!(code.immediates.is_empty());
            self.register[n] = u32::from(code.word);
        }

        self.ip = IP_MODE_REG;
        Ok(())
    }

    /// Fetch the instruction addressed by `IP`.
    pub fn fetch_code(&mut self) -> Result<Code, Fault> {
        if self.ip == 0xffff_ffff {
            return Err(Fault::IpEmpty);
        }

        match self.ip & IP_MODE_MASK {
            IP_MODE_REG => {
                let reg = (self.ip & 0x7) as usize;
                if reg >= self.register.len() {
                    event!(Level::DEBUG, "ip {:#010x} beyond register bank", self.ip);
                    return Err(Fault::IpEmpty);
                }
                Ok(Code {
                    word: self.register[reg] as u16,
                    immediates: Vec::new(),
                })
            }
            IP_MODE_STACK => match self.stack.pop() {
                Some(word) => Ok(Code {
                    word: word as u16,
                    immediates: Vec::new(),
                }),
                None => {
                    event!(Level::DEBUG, "ip {:#010x} with empty stack", self.ip);
                    Err(Fault::IpEmpty)
                }
            },
            IP_MODE_CAPP => {
                // Work on the other bank so the program's own
                // selection is untouched, then select every cell
                // tagged with this instruction address and drain the
                // list: immediates first, primary word last.
                self.capp.action(Action::Swap, 0, 0);
                self.capp.action(
                    Action::SetOf,
                    ARENA_CODE | ((self.ip & 0x3fff) << 16),
                    ARENA_MASK | (0x3fff << 16),
                );
                self.capp.action(Action::ListAll, 0, 0);

                let mut immediates = Vec::new();
                let mut count = self.capp.count();
                while count > 1 {
                    immediates.push((self.capp.first() & 0xffff) as u16);
                    self.capp.action(Action::ListNext, 0, 0);
                    count = self.capp.count();
                }
                let first = self.capp.first();
                self.capp.action(Action::Swap, 0, 0);

                if count != 1 {
                    return Err(Fault::IpEmpty);
                }
                Ok(Code {
                    word: (first & 0xffff) as u16,
                    immediates,
                })
            }
            _ => {
                event!(Level::DEBUG, "ip {:#010x} has no fetch source", self.ip);
                Err(Fault::IpEmpty)
            }
        }
    }

    /// One instruction cycle: fetch, execute, then surface any pending
    /// monitor trap.
    pub fn tick(&mut self) -> Result<(), Fault> {
        let code = self.fetch_code()?;
        self.execute(code)?;

        if let Some(slot) = self.channel_mut(ChannelId::MONITOR) {
            if slot.response.take().is_some() {
                return Err(Fault::IpTrap);
            }
        }
        Ok(())
    }

    /// Execute a single decoded instruction.
    pub fn execute(&mut self, code: Code) -> Result<(), Fault> {
        event!(Level::TRACE, "{:03x}: {}", self.ip & !IP_MODE_MASK, code);

        self.capp.clear_bits_flipped();

        let mut next_ip = self.ip.wrapping_add(1);
        // ALU target churn, for the power model.
        let mut prior: u64 = 0;
        let mut result: u64 = 0;

        let code = match code.cond() {
            Cond::Always => code,
            Cond::Never => return Err(Fault::opcode(&code, OpcodeFault::Decode)),
            Cond::IfTrue if !self.cond => no_op(),
            Cond::IfFalse if self.cond => no_op(),
            _ => code,
        };

        let mut imms: &[u16] = &code.immediates;

        match code.class() {
            Class::Alu => {
                let (op, dst, arg) = code.alu_decode();
                let value = self
                    .get_value(arg, &mut imms)
                    .map_err(|vf| arg_fault(&code, Class::Alu, ArgPos::Second, vf))?;

                enum Target {
                    Ip,
                    Stack,
                    Reg(usize),
                }

                let (input, target) = match dst {
                    Ir::Ip => (next_ip, Target::Ip),
                    Ir::Stack => {
                        if self.stack.is_full() {
                            return Err(Fault::opcode(
                                &code,
                                OpcodeFault::Arg {
                                    class: Class::Alu,
                                    pos: ArgPos::First,
                                    cause: Some(Box::new(Fault::StackFull)),
                                },
                            ));
                        }
                        let input = if op == AluOp::Set {
                            // A fresh push; nothing to read back.
                            0
                        } else {
                            self.stack.pop().ok_or_else(|| {
                                Fault::opcode(
                                    &code,
                                    OpcodeFault::Arg {
                                        class: Class::Alu,
                                        pos: ArgPos::First,
                                        cause: Some(Box::new(Fault::StackEmpty)),
                                    },
                                )
                            })?
                        };
                        (input, Target::Stack)
                    }
                    Ir::R0 | Ir::R1 | Ir::R2 | Ir::R3 | Ir::R4 | Ir::R5 => {
                        (self.register[dst as usize], Target::Reg(dst as usize))
                    }
                    _ => {
                        return Err(Fault::opcode(
                            &code,
                            OpcodeFault::Arg {
                                class: Class::Alu,
                                pos: ArgPos::First,
                                cause: None,
                            },
                        ))
                    }
                };

                prior = u64::from(input);
                let output = do_alu(op, input, value);
                match target {
                    Target::Ip => next_ip = output,
                    Target::Stack => {
                        // Room was guaranteed above.
                        self.stack.push(output).map_err(|fault| {
                            Fault::opcode(
                                &code,
                                OpcodeFault::Arg {
                                    class: Class::Alu,
                                    pos: ArgPos::First,
                                    cause: Some(Box::new(fault)),
                                },
                            )
                        })?;
                    }
                    Target::Reg(index) => self.register[index] = output,
                }
                result = u64::from(output);
            }

            Class::Cond => {
                let (op, a_ir, b_ir) = code.cond_decode();
                let a = self
                    .get_value(a_ir, &mut imms)
                    .map_err(|vf| arg_fault(&code, Class::Cond, ArgPos::First, vf))?
                    as i32;
                let b = self
                    .get_value(b_ir, &mut imms)
                    .map_err(|vf| arg_fault(&code, Class::Cond, ArgPos::Second, vf))?
                    as i32;
                let op =
                    op.ok_or_else(|| Fault::opcode(&code, OpcodeFault::Op(Class::Cond)))?;
                self.cond = match op {
                    CondOp::Eq => a == b,
                    CondOp::Ne => a != b,
                    CondOp::Lt => a < b,
                    CondOp::Le => a <= b,
                };
            }

            Class::Capp => {
                let (op, match_ir, mask_ir) = code.capp_decode();
                let value = self
                    .get_value(match_ir, &mut imms)
                    .map_err(|vf| arg_fault(&code, Class::Capp, ArgPos::First, vf))?;
                let mask = self
                    .get_value(mask_ir, &mut imms)
                    .map_err(|vf| arg_fault(&code, Class::Capp, ArgPos::Second, vf))?;

                if op.zero_arg() && (match_ir != Ir::Zero || mask_ir != Ir::Zero) {
                    return Err(Fault::opcode(
                        &code,
                        OpcodeFault::Arg {
                            class: Class::Capp,
                            pos: ArgPos::Both,
                            cause: None,
                        },
                    ));
                }

                match op {
                    // Reserved for the fetch logic.
                    CappOp::Swap => return Err(Fault::opcode(&code, OpcodeFault::Capp)),
                    CappOp::ListAll => self.capp.action(Action::ListAll, 0, 0),
                    CappOp::ListNot => self.capp.action(Action::ListNot, 0, 0),
                    CappOp::ListNext => self.capp.action(Action::ListNext, 0, 0),
                    CappOp::ListOnly => self.capp.action(Action::ListOnly, value, mask),
                    CappOp::SetOf => {
                        self.match_reg = value;
                        self.mask_reg = mask;
                        self.capp.action(Action::SetOf, value, mask);
                    }
                    CappOp::WriteFirst => self.capp.action(Action::WriteFirst, value, mask),
                    CappOp::WriteList => self.capp.action(Action::WriteList, value, mask),
                }
            }

            Class::Io => {
                let (op, channel_id, arg) = code.io_decode();
                let op = op.ok_or_else(|| Fault::opcode(&code, OpcodeFault::Op(Class::Io)))?;
                let index = usize::from(channel_id.0);

                if op == IoOp::Await {
                    // The response lands in a writable target, or is
                    // discarded through CONST_0.
                    match arg {
                        Ir::R0
                        | Ir::R1
                        | Ir::R2
                        | Ir::R3
                        | Ir::R4
                        | Ir::R5
                        | Ir::Ip
                        | Ir::Stack
                        | Ir::Zero => {}
                        _ => {
                            return Err(Fault::opcode(
                                &code,
                                OpcodeFault::Arg {
                                    class: Class::Io,
                                    pos: ArgPos::Second,
                                    cause: None,
                                },
                            ))
                        }
                    }
                    let Cpu {
                        channels,
                        register,
                        stack,
                        ip,
                        ..
                    } = self;
                    let slot = channels.get_mut(index).and_then(Option::as_mut).ok_or_else(
                        || Fault::opcode(&code, OpcodeFault::Io(Box::new(Fault::ChannelInvalid))),
                    )?;
                    match slot.response.take() {
                        Some(value) => match arg {
                            Ir::Zero => {}
                            Ir::Ip => next_ip = value,
                            Ir::Stack => {
                                stack.push(value).map_err(|fault| {
                                    Fault::opcode(
                                        &code,
                                        OpcodeFault::Arg {
                                            class: Class::Io,
                                            pos: ArgPos::Second,
                                            cause: Some(Box::new(fault)),
                                        },
                                    )
                                })?;
                            }
                            Ir::R0 | Ir::R1 | Ir::R2 | Ir::R3 | Ir::R4 | Ir::R5 => {
                                register[arg as usize] = value;
                            }
                            // Excluded by the validation above.
                            _ => unreachable!(),
                        },
                        // Nothing yet: hold the instruction pointer so
                        // the same AWAIT retries next tick.
                        None => next_ip = *ip,
                    }
                } else {
                    let value = self
                        .get_value(arg, &mut imms)
                        .map_err(|vf| arg_fault(&code, Class::Io, ArgPos::Second, vf))?;
                    let Cpu { capp, channels, .. } = self;
                    let slot = channels.get_mut(index).and_then(Option::as_mut).ok_or_else(
                        || Fault::opcode(&code, OpcodeFault::Io(Box::new(Fault::ChannelInvalid))),
                    )?;
                    match op {
                        IoOp::Fetch => list_input(capp, &mut slot.channel, value)
                            .map_err(|fault| {
                                Fault::opcode(&code, OpcodeFault::Io(Box::new(fault)))
                            })?,
                        IoOp::Store => list_output(capp, &mut slot.channel, value)
                            .map_err(|fault| {
                                Fault::opcode(&code, OpcodeFault::Io(Box::new(fault)))
                            })?,
                        IoOp::Alert => slot.channel.alert(value, &mut slot.response),
                        IoOp::Await => unreachable!(),
                    }
                }
            }
        }

        if !imms.is_empty() {
            return Err(Fault::opcode(&code, OpcodeFault::Imm));
        }

        self.ip = next_ip;

        // One tick per executed instruction, including an AWAIT that
        // held the instruction pointer.  Power counts the CAPP
        // transitions this instruction caused plus the churn in its
        // ALU target; fetch-time CAPP traffic was cleared above.
        self.ticks += 1;
        self.power += self.capp.bits_flipped() + u64::from((prior ^ result).count_ones());

        Ok(())
    }

    /// Read the value named by an operand descriptor, consuming any
    /// immediate words it needs.
    fn get_value(&mut self, src: Ir, imms: &mut &[u16]) -> Result<u32, ValueFault> {
        Ok(match src {
            Ir::Zero => 0,
            Ir::Ones => 0xffff_ffff,
            Ir::Imm16 => match imms.split_first() {
                Some((&first, rest)) => {
                    *imms = rest;
                    u32::from(first)
                }
                None => return Err(ValueFault::MissingImmediate),
            },
            Ir::Imm32 => {
                if imms.len() < 2 {
                    return Err(ValueFault::MissingImmediate);
                }
                let value = (u32::from(imms[0]) << 16) | u32::from(imms[1]);
                *imms = &imms[2..];
                value
            }
            Ir::Ip => self.ip.wrapping_add(1),
            Ir::Stack => self.stack.pop().ok_or(ValueFault::StackEmpty)?,
            Ir::R0 | Ir::R1 | Ir::R2 | Ir::R3 | Ir::R4 | Ir::R5 => self.register[src as usize],
            Ir::Match => self.match_reg,
            Ir::Mask => self.mask_reg,
            Ir::First => self.capp.first(),
            Ir::Count => self.capp.count() as u32,
        })
    }
}

/// Why an operand failed to produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueFault {
    StackEmpty,
    MissingImmediate,
}

fn arg_fault(code: &Code, class: Class, pos: ArgPos, vf: ValueFault) -> Fault {
    let cause = match vf {
        ValueFault::StackEmpty => Fault::StackEmpty,
        ValueFault::MissingImmediate => Fault::opcode(code, OpcodeFault::Imm),
    };
    Fault::opcode(
        code,
        OpcodeFault::Arg {
            class,
            pos,
            cause: Some(Box::new(cause)),
        },
    )
}

/// The substitute for a condition-gated-out instruction.
fn no_op() -> Code {
    make_alu(Cond::Always, AluOp::Or, Ir::R0, Ir::Zero, &[])
}

fn do_alu(op: AluOp, input: u32, value: u32) -> u32 {
    match op {
        AluOp::Set => value,
        AluOp::Xor => input ^ value,
        AluOp::And => input & value,
        AluOp::Or => input | value,
        // Shift counts clamp to five bits.
        AluOp::Shl => input << (value & 0x1f),
        AluOp::Shr => input >> (value & 0x1f),
        AluOp::Add => input.wrapping_add(value),
        AluOp::Sub => input.wrapping_add((!value).wrapping_add(1)),
    }
}

/// Stream bits from a channel into the active list.  For each list
/// cell, one input bit is gathered per set mask bit (LSB to MSB); the
/// assembled word is written to the head and the list advanced.  Stops
/// at end of input or when the list empties.
fn list_input(capp: &mut Capp, channel: &mut Channel, mask: u32) -> Result<(), Fault> {
    if mask == 0 {
        return Ok(());
    }

    let mut position = 0u32;
    let mut remaining = mask;
    let mut assembled = 0u32;
    while let Some(bit) = channel.next_bit() {
        if capp.count() == 0 {
            return Ok(());
        }
        while remaining & 1 == 0 {
            position += 1;
            remaining >>= 1;
        }
        if bit {
            assembled |= 1 << position;
        }
        position += 1;
        remaining >>= 1;
        if remaining == 0 {
            capp.action(Action::WriteFirst, assembled, mask);
            capp.action(Action::ListNext, 0, 0);
            position = 0;
            remaining = mask;
            assembled = 0;
        }
    }
    Ok(())
}

/// Stream bits from the active list into a channel: one output bit per
/// set mask bit of each list cell (LSB to MSB), advancing the list
/// after each cell.  Stops when the list empties or the channel
/// rejects.
fn list_output(capp: &mut Capp, channel: &mut Channel, mask: u32) -> Result<(), Fault> {
    if mask == 0 {
        return Ok(());
    }

    while capp.count() > 0 {
        let value = capp.first();
        for n in 0..32 {
            if mask & (1 << n) != 0 {
                channel.send((value >> n) & 1 != 0)?;
            }
        }
        capp.action(Action::ListNext, 0, 0);
    }
    Ok(())
}

impl Display for Cpu {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        writeln!(f, "{:>5}: {:04x}_{:03X}", "ip", self.ip >> 16, self.ip & 0x3ff)?;
        writeln!(f, "{:>5}: {}", "cond", self.cond)?;
        for (n, value) in self.register.iter().enumerate() {
            writeln!(
                f,
                "   r{}: {:04X}_{:04X}",
                n,
                value >> 16,
                value & 0xffff
            )?;
        }
        match self.stack.peek() {
            Some(value) => writeln!(
                f,
                "{:>5}: {:04X}_{:04X}",
                "stack",
                value >> 16,
                value & 0xffff
            )?,
            None => writeln!(f, "{:>5}: ----_----", "stack")?,
        }
        for (name, value) in [
            ("match", self.match_reg),
            ("mask", self.mask_reg),
            ("first", self.capp.first()),
            ("count", self.capp.count() as u32),
        ] {
            writeln!(f, "{:>5}: {:01X}_{:07X}", name, value >> 28, value & 0xfffffff)?;
        }
        Ok(())
    }
}
