//! Ring: a bit-addressed buffer with independent read and write
//! positions, backed by a byte array.
//!
//! The on-disk form is the raw byte array, little-endian within each
//! byte (bit 0 is the first bit written).  The format stores no exact
//! bit count: writers flush the minimal whole-byte prefix and readers
//! take the file size times eight as the bit count.

use std::io::{Read, Write};

use crate::fault::Fault;
use crate::io::queue::ResponseQueue;

/// Mask of the ring operation bits of an alert request.
pub const RING_OP_MASK: u32 = (1 << 7) - 1;
/// Reset the read position to the start.
pub const RING_OP_REWIND_READ: u32 = 0;
/// Reset the write position to the start.
pub const RING_OP_REWIND_WRITE: u32 = 1;

/// Default capacity in bits.
pub const RING_DEFAULT_CAPACITY: usize = 65536;

#[derive(Debug, Clone)]
pub struct Ring {
    capacity: usize,
    read_index: usize,
    write_index: usize,
    data: Vec<u8>,
}

impl Default for Ring {
    fn default() -> Ring {
        Ring::new(RING_DEFAULT_CAPACITY)
    }
}

impl Ring {
    pub fn new(capacity: usize) -> Ring {
        Ring {
            capacity,
            read_index: 0,
            write_index: 0,
            data: Vec::new(),
        }
    }

    /// Reset the read position to the start and the write position to
    /// the end of the existing data.
    pub fn rewind(&mut self) {
        self.read_index = 0;
        self.write_index = self.data.len() * 8;
    }

    /// Number of bytes currently backing the ring.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Replace the ring contents from a byte stream.
    pub fn unmarshal<R: Read>(&mut self, mut reader: R) -> std::io::Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.read_index = 0;
        self.write_index = data.len() * 8;
        if data.len() * 8 > self.capacity {
            self.capacity = data.len() * 8;
        }
        self.data = data;
        Ok(())
    }

    /// Write the ring contents up to the current write position,
    /// rounded up to whole bytes.
    pub fn marshal<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_all(&self.data[..(self.write_index + 7) / 8])
    }

    pub fn next_bit(&mut self) -> Option<bool> {
        if self.read_index >= self.write_index {
            return None;
        }
        let byte = self.data[self.read_index / 8];
        let bit = (byte >> (self.read_index % 8)) & 1 != 0;
        self.read_index += 1;
        Some(bit)
    }

    pub fn send(&mut self, value: bool) -> Result<(), Fault> {
        if self.write_index >= self.capacity {
            return Err(Fault::ChannelFull);
        }
        while self.write_index / 8 >= self.data.len() {
            self.data.push(0xff);
        }
        let byte = &mut self.data[self.write_index / 8];
        if value {
            *byte |= 1 << (self.write_index % 8);
        } else {
            *byte &= !(1 << (self.write_index % 8));
        }
        self.write_index += 1;
        Ok(())
    }

    pub fn alert(&mut self, request: u32, response: &mut ResponseQueue) {
        match request & RING_OP_MASK {
            RING_OP_REWIND_READ => {
                self.read_index = 0;
                response.post(0);
            }
            RING_OP_REWIND_WRITE => {
                self.write_index = 0;
                response.post(0);
            }
            _ => response.post(u32::MAX),
        }
    }
}
