//! Emulator glue: binds the concrete channels into the control
//! processor's slots, loads the compiled image into the ROM, drives
//! the reset sequence out of the bootstrap registers, and maps runtime
//! faults back to source line numbers.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;

use crate::control::{Cpu, IP_MODE_CAPP, IP_MODE_MASK, IP_MODE_REG, IP_MODE_STACK};
use crate::fault::Fault;
use crate::io::{
    Channel, Depot, Rom, Tape, Temporary, DEPOT_OP_DRUM, DEPOT_OP_SELECT, DRUM_OP_RING,
    DRUM_OP_SELECT, RING_OP_REWIND_READ, RING_OP_REWIND_WRITE, ROM_OP_TRAP, TEMP_DEFAULT_CAPACITY,
};

/// Cells in the emulated CAPP: room for program text, staging and
/// working storage.
pub const CAPP_SIZE: usize = 8192;

/// A runtime fault located at its source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFault {
    /// 1-based source line, or 0 when the address maps to no line.
    pub line_no: usize,
    pub fault: Fault,
}

impl Display for RuntimeFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "line {} {}", self.line_no, self.fault)
    }
}

impl Error for RuntimeFault {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.fault)
    }
}

/// The assembled machine: control processor, CAPP, channels and the
/// program being run.
#[derive(Debug)]
pub struct Emulator {
    pub cpu: Cpu,
    pub program: Program,
}

impl Default for Emulator {
    fn default() -> Emulator {
        Emulator::new()
    }
}

impl Emulator {
    pub fn new() -> Emulator {
        let mut cpu = Cpu::new(CAPP_SIZE);
        cpu.set_channel(
            ChannelId::TEMP,
            Channel::Temp(Temporary::new(TEMP_DEFAULT_CAPACITY)),
        );
        cpu.set_channel(ChannelId::DEPOT, Channel::Depot(Depot::default()));
        cpu.set_channel(ChannelId::TAPE, Channel::Tape(Tape::default()));
        cpu.set_channel(ChannelId::MONITOR, Channel::Rom(Rom::default()));

        let mut emulator = Emulator {
            cpu,
            program: Program::default(),
        };
        // Arm the ROM's trap line; host traps arrive through the
        // monitor slot's response queue.
        if let Some(slot) = emulator.cpu.channel_mut(ChannelId::MONITOR) {
            let (channel, response) = (&mut slot.channel, &mut slot.response);
            channel.alert(ROM_OP_TRAP, response);
        }
        emulator
    }

    pub fn tape_mut(&mut self) -> Option<&mut Tape> {
        match self.cpu.channel_mut(ChannelId::TAPE) {
            Some(slot) => match &mut slot.channel {
                Channel::Tape(tape) => Some(tape),
                _ => None,
            },
            None => None,
        }
    }

    pub fn depot_mut(&mut self) -> Option<&mut Depot> {
        match self.cpu.channel_mut(ChannelId::DEPOT) {
            Some(slot) => match &mut slot.channel {
                Channel::Depot(depot) => Some(depot),
                _ => None,
            },
            None => None,
        }
    }

    pub fn rom_mut(&mut self) -> Option<&mut Rom> {
        match self.cpu.channel_mut(ChannelId::MONITOR) {
            Some(slot) => match &mut slot.channel {
                Channel::Rom(rom) => Some(rom),
                _ => None,
            },
            None => None,
        }
    }

    /// Raise a host trap.  The tick in flight completes; the next
    /// tick boundary surfaces [`Fault::IpTrap`].
    pub fn trap(&mut self) {
        self.cpu.post_response(ChannelId::MONITOR, 0);
    }

    /// Machine constants for the assembler's equate table.
    pub fn defines(&self) -> Vec<(String, String)> {
        [
            ("CAPP_SIZE", format!("{CAPP_SIZE}")),
            ("IP_MODE_CAPP", format!("{IP_MODE_CAPP:#x}")),
            ("IP_MODE_STACK", format!("{IP_MODE_STACK:#x}")),
            ("IP_MODE_REG", format!("{IP_MODE_REG:#x}")),
            ("IP_MODE_MASK", format!("{IP_MODE_MASK:#x}")),
            ("ROM_OP_TRAP", format!("{ROM_OP_TRAP:#x}")),
            ("RING_OP_REWIND_READ", format!("{RING_OP_REWIND_READ:#x}")),
            ("RING_OP_REWIND_WRITE", format!("{RING_OP_REWIND_WRITE:#x}")),
            ("DRUM_OP_SELECT", format!("{DRUM_OP_SELECT:#x}")),
            ("DRUM_OP_RING", format!("{DRUM_OP_RING:#x}")),
            ("DEPOT_OP_SELECT", format!("{DEPOT_OP_SELECT:#x}")),
            ("DEPOT_OP_DRUM", format!("{DEPOT_OP_DRUM:#x}")),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }

    /// Load the program image into the ROM and run the bootstrap until
    /// execution enters the CAPP.
    pub fn reset(&mut self, boot: ChannelId) -> Result<(), Fault> {
        event!(Level::DEBUG, "emulator: reset, boot from {boot}");

        let image = self.program.binary();
        if let Some(rom) = self.rom_mut() {
            rom.set_data(image);
        }

        self.cpu.reset(boot)?;
        while self.cpu.ip & IP_MODE_MASK != IP_MODE_CAPP {
            self.cpu.tick()?;
        }

        // Booting is free.
        self.cpu.capp.clear_bits_flipped();
        Ok(())
    }

    /// Source line of the instruction the processor is about to run.
    pub fn line_no(&self) -> usize {
        let ip = self.cpu.ip as usize;
        for op in &self.program.opcodes {
            if ip >= op.ip && ip < op.ip + op.codes.len() {
                return op.line_no;
            }
        }
        0
    }

    pub fn ticks(&self) -> u64 {
        self.cpu.ticks
    }

    pub fn power(&self) -> u64 {
        self.cpu.power
    }

    /// One emulator step.  Returns `Ok(true)` when the program ran off
    /// its instruction stream (normal termination).  Register-mode
    /// instructions (the bootstrap) are run through without counting
    /// as a step.
    pub fn tick(&mut self) -> Result<bool, RuntimeFault> {
        let line_no = self.line_no();
        loop {
            match self.cpu.tick() {
                Err(Fault::IpEmpty) => return Ok(true),
                Err(fault) => return Err(RuntimeFault { line_no, fault }),
                Ok(()) => {}
            }
            if self.cpu.ip & IP_MODE_MASK != IP_MODE_REG {
                break;
            }
        }
        Ok(false)
    }
}
