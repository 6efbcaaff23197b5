//! Drum: up to 256 rings addressed by an 8-bit id, with one ring
//! selected at a time.  Bit traffic flows through the selected ring;
//! alerts either switch the selection (auto-creating the ring) or
//! forward a ring operation to it.

use std::collections::BTreeMap;

use crate::fault::Fault;
use crate::io::queue::ResponseQueue;
use crate::io::ring::Ring;

/// Mask separating drum selection from ring forwarding.
pub const DRUM_OP_MASK: u32 = 1 << 8;
/// Select a ring by id; responds with the ring's current byte length.
pub const DRUM_OP_SELECT: u32 = 0 << 8;
/// Mask of the ring id in a select request.
pub const DRUM_OP_SELECT_MASK: u32 = (1 << 8) - 1;
/// Forward the low bits to the selected ring.
pub const DRUM_OP_RING: u32 = 1 << 8;

#[derive(Debug, Clone, Default)]
pub struct Drum {
    rings: BTreeMap<u8, Ring>,
    selected: u8,
}

impl Drum {
    /// Switch the selected ring, creating it if absent.
    pub fn select_ring(&mut self, id: u8) -> &mut Ring {
        self.selected = id;
        self.rings.entry(id).or_default()
    }

    pub fn selected_ring(&mut self) -> &mut Ring {
        let id = self.selected;
        self.rings.entry(id).or_default()
    }

    pub fn rings(&self) -> impl Iterator<Item = (u8, &Ring)> {
        self.rings.iter().map(|(&id, ring)| (id, ring))
    }

    pub fn insert_ring(&mut self, id: u8, ring: Ring) {
        self.rings.insert(id, ring);
    }

    pub fn rewind(&mut self) {
        for ring in self.rings.values_mut() {
            ring.rewind();
        }
    }

    pub fn next_bit(&mut self) -> Option<bool> {
        self.selected_ring().next_bit()
    }

    pub fn send(&mut self, value: bool) -> Result<(), Fault> {
        self.selected_ring().send(value)
    }

    pub fn alert(&mut self, request: u32, response: &mut ResponseQueue) {
        if request & DRUM_OP_MASK == DRUM_OP_RING {
            self.selected_ring().alert(request, response);
        } else {
            let ring = self.select_ring((request & DRUM_OP_SELECT_MASK) as u8);
            response.post(ring.byte_len() as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ring::RING_OP_REWIND_READ;

    #[test]
    fn test_select_auto_creates() {
        let mut drum = Drum::default();
        let mut response = ResponseQueue::default();
        drum.alert(DRUM_OP_SELECT | 0x42, &mut response);
        // A fresh ring has no backing bytes yet.
        assert_eq!(response.take(), Some(0));
        assert_eq!(drum.rings().count(), 1);
    }

    #[test]
    fn test_select_reports_byte_length() {
        let mut drum = Drum::default();
        let mut response = ResponseQueue::default();
        for _ in 0..16 {
            drum.select_ring(3).send(true).unwrap();
        }
        drum.alert(DRUM_OP_SELECT | 3, &mut response);
        assert_eq!(response.take(), Some(2));
    }

    #[test]
    fn test_rings_are_independent() {
        let mut drum = Drum::default();
        drum.select_ring(0).send(true).unwrap();
        drum.select_ring(1).send(false).unwrap();
        assert_eq!(drum.select_ring(0).next_bit(), Some(true));
        assert_eq!(drum.select_ring(1).next_bit(), Some(false));
    }

    #[test]
    fn test_ring_op_forwards_to_selection() {
        let mut drum = Drum::default();
        let mut response = ResponseQueue::default();
        let ring = drum.select_ring(7);
        ring.send(true).unwrap();
        assert_eq!(ring.next_bit(), Some(true));
        drum.alert(DRUM_OP_RING | RING_OP_REWIND_READ, &mut response);
        assert_eq!(response.take(), Some(0));
        assert_eq!(drum.next_bit(), Some(true));
    }
}
