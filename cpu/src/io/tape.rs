//! Tape channel: byte-oriented input and output streams presented as
//! a bit stream.  Bits travel LSB-first within each byte; output bits
//! accumulate and flush on every eighth bit.  A tape cannot be
//! rewound.

use std::fmt::{self, Debug, Formatter};
use std::io::{Read, Write};

use tracing::{event, Level};

use crate::fault::Fault;
use crate::io::queue::ResponseQueue;

#[derive(Default)]
pub struct Tape {
    input: Option<Box<dyn Read>>,
    output: Option<Box<dyn Write>>,

    read_index: u8,
    has_input: bool,
    last_input: u8,

    next_output: u8,
    write_index: u8,
}

impl Debug for Tape {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("Tape")
            .field("input", &self.input.is_some())
            .field("output", &self.output.is_some())
            .field("read_index", &self.read_index)
            .field("write_index", &self.write_index)
            .finish()
    }
}

impl Tape {
    pub fn set_input(&mut self, input: Box<dyn Read>) {
        self.input = Some(input);
        self.read_index = 0;
        self.has_input = false;
    }

    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = Some(output);
        self.next_output = 0;
        self.write_index = 0;
    }

    /// Rewind is not possible on a tape.
    pub fn rewind(&mut self) {}

    pub fn next_bit(&mut self) -> Option<bool> {
        if self.read_index == 0 && !self.has_input {
            let input = self.input.as_mut()?;
            let mut one = [0u8; 1];
            match input.read(&mut one) {
                Ok(1) => {
                    self.last_input = one[0];
                    self.has_input = true;
                }
                _ => return None,
            }
        }
        let bit = (self.last_input >> self.read_index) & 1 != 0;
        self.read_index += 1;
        if self.read_index == 8 {
            self.read_index = 0;
            self.has_input = false;
        }
        Some(bit)
    }

    pub fn send(&mut self, value: bool) -> Result<(), Fault> {
        if value {
            self.next_output |= 1 << self.write_index;
        }
        self.write_index += 1;
        if self.write_index == 8 {
            let byte = self.next_output;
            self.next_output = 0;
            self.write_index = 0;
            if let Some(output) = self.output.as_mut() {
                if let Err(error) = output.write_all(&[byte]) {
                    event!(Level::WARN, "tape: output write failed: {error}");
                    return Err(Fault::ChannelFull);
                }
            }
        }
        Ok(())
    }

    pub fn alert(&mut self, _request: u32, response: &mut ResponseQueue) {
        response.post(u32::MAX);
    }
}
