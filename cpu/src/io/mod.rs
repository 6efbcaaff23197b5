//! Bit-level I/O channels.
//!
//! A channel is a bit stream plus a side-band control path: `rewind`
//! resets it, `next_bit`/`bits` pull from it, `send` pushes one bit
//! into it, and `alert` performs a control request whose single reply
//! lands on the slot's [`ResponseQueue`].
//!
//! The set of channel kinds is closed, so they are a tagged enum
//! rather than trait objects; the instruction decode hot path calls
//! straight into the concrete device.

pub mod depot;
pub mod drum;
pub mod queue;
pub mod ring;
pub mod rom;
pub mod tape;
pub mod temp;
pub mod wordio;

pub use depot::{Depot, DEPOT_OP_DRUM, DEPOT_OP_MASK, DEPOT_OP_SELECT, DEPOT_OP_SELECT_MASK};
pub use drum::{Drum, DRUM_OP_MASK, DRUM_OP_RING, DRUM_OP_SELECT, DRUM_OP_SELECT_MASK};
pub use queue::{ResponseQueue, RESPONSE_LIMIT};
pub use ring::{
    Ring, RING_DEFAULT_CAPACITY, RING_OP_MASK, RING_OP_REWIND_READ, RING_OP_REWIND_WRITE,
};
pub use rom::{Rom, ROM_OP_TRAP};
pub use tape::Tape;
pub use temp::{Temporary, TEMP_DEFAULT_CAPACITY};

use crate::fault::Fault;

/// One of the concrete channel kinds.
#[derive(Debug)]
pub enum Channel {
    Temp(Temporary),
    Tape(Tape),
    Ring(Ring),
    Drum(Drum),
    Depot(Depot),
    Rom(Rom),
}

impl Channel {
    /// Reset the channel to its initial state.
    pub fn rewind(&mut self) {
        match self {
            Channel::Temp(temp) => temp.rewind(),
            Channel::Tape(tape) => tape.rewind(),
            Channel::Ring(ring) => ring.rewind(),
            Channel::Drum(drum) => drum.rewind(),
            Channel::Depot(depot) => depot.rewind(),
            Channel::Rom(rom) => rom.rewind(),
        }
    }

    /// Pull the next bit, or `None` when the stream is exhausted.
    pub fn next_bit(&mut self) -> Option<bool> {
        match self {
            Channel::Temp(temp) => temp.next_bit(),
            Channel::Tape(tape) => tape.next_bit(),
            Channel::Ring(ring) => ring.next_bit(),
            Channel::Drum(drum) => drum.next_bit(),
            Channel::Depot(depot) => depot.next_bit(),
            Channel::Rom(rom) => rom.next_bit(),
        }
    }

    /// Push one bit into the channel.
    pub fn send(&mut self, value: bool) -> Result<(), Fault> {
        match self {
            Channel::Temp(temp) => temp.send(value),
            Channel::Tape(tape) => tape.send(value),
            Channel::Ring(ring) => ring.send(value),
            Channel::Drum(drum) => drum.send(value),
            Channel::Depot(depot) => depot.send(value),
            Channel::Rom(rom) => rom.send(value),
        }
    }

    /// Perform a control request; the reply goes to `response`.
    pub fn alert(&mut self, request: u32, response: &mut ResponseQueue) {
        match self {
            Channel::Temp(temp) => temp.alert(request, response),
            Channel::Tape(tape) => tape.alert(request, response),
            Channel::Ring(ring) => ring.alert(request, response),
            Channel::Drum(drum) => drum.alert(request, response),
            Channel::Depot(depot) => depot.alert(request, response),
            Channel::Rom(rom) => rom.alert(request, response),
        }
    }

    /// Lazy bit stream over the channel.
    pub fn bits(&mut self) -> Bits<'_> {
        Bits { channel: self }
    }
}

/// Iterator adapter over [`Channel::next_bit`].
pub struct Bits<'a> {
    channel: &'a mut Channel,
}

impl Iterator for Bits<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        self.channel.next_bit()
    }
}
