//! Depot: drums addressed by a 24-bit id, with one drum selected at a
//! time.  Selecting an absent drum fails with the all-ones reply (the
//! persistent store decides which drums exist); everything else
//! forwards to the selected drum.

use std::collections::BTreeMap;

use crate::fault::Fault;
use crate::io::drum::Drum;
use crate::io::queue::ResponseQueue;

/// Mask separating depot selection from drum forwarding.
pub const DEPOT_OP_MASK: u32 = 1 << 23;
/// Select a drum by id; responds 0 on success, all-ones if absent.
pub const DEPOT_OP_SELECT: u32 = 0 << 23;
/// Forward the low bits to the selected drum.
pub const DEPOT_OP_DRUM: u32 = 1 << 23;
/// Mask of the drum id in a select request.
pub const DEPOT_OP_SELECT_MASK: u32 = (1 << 23) - 1;

#[derive(Debug, Clone, Default)]
pub struct Depot {
    drums: BTreeMap<u32, Drum>,
    selected: Option<u32>,
}

impl Depot {
    pub fn drums(&self) -> impl Iterator<Item = (u32, &Drum)> {
        self.drums.iter().map(|(&id, drum)| (id, drum))
    }

    /// Access a drum by id, creating it if absent.  Creation is a
    /// host-side operation; programs can only select existing drums.
    pub fn drum_mut(&mut self, id: u32) -> &mut Drum {
        self.drums.entry(id).or_default()
    }

    pub fn contains_drum(&self, id: u32) -> bool {
        self.drums.contains_key(&id)
    }

    fn selected_drum(&mut self) -> Option<&mut Drum> {
        let id = self.selected?;
        self.drums.get_mut(&id)
    }

    pub fn rewind(&mut self) {
        for drum in self.drums.values_mut() {
            drum.rewind();
        }
    }

    pub fn next_bit(&mut self) -> Option<bool> {
        self.selected_drum()?.next_bit()
    }

    pub fn send(&mut self, value: bool) -> Result<(), Fault> {
        match self.selected_drum() {
            Some(drum) => drum.send(value),
            None => Err(Fault::ChannelFull),
        }
    }

    pub fn alert(&mut self, request: u32, response: &mut ResponseQueue) {
        if request & DEPOT_OP_MASK == DEPOT_OP_DRUM {
            match self.selected_drum() {
                Some(drum) => drum.alert(request, response),
                None => response.post(u32::MAX),
            }
        } else {
            let id = request & DEPOT_OP_SELECT_MASK;
            if self.drums.contains_key(&id) {
                self.selected = Some(id);
                response.post(0);
            } else {
                self.selected = None;
                response.post(u32::MAX);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::drum::{DRUM_OP_RING, DRUM_OP_SELECT};
    use crate::io::ring::RING_OP_REWIND_WRITE;

    #[test]
    fn test_select_missing_drum_fails() {
        let mut depot = Depot::default();
        let mut response = ResponseQueue::default();
        depot.alert(DEPOT_OP_SELECT | 5, &mut response);
        assert_eq!(response.take(), Some(u32::MAX));
        // With no selection, drum operations fail too.
        depot.alert(DEPOT_OP_DRUM | DRUM_OP_SELECT, &mut response);
        assert_eq!(response.take(), Some(u32::MAX));
    }

    #[test]
    fn test_select_existing_drum() {
        let mut depot = Depot::default();
        depot.drum_mut(5);
        let mut response = ResponseQueue::default();
        depot.alert(DEPOT_OP_SELECT | 5, &mut response);
        assert_eq!(response.take(), Some(0));
    }

    #[test]
    fn test_drum_forwarding() {
        let mut depot = Depot::default();
        let mut response = ResponseQueue::default();
        depot.drum_mut(1).select_ring(2).send(true).unwrap();

        depot.alert(DEPOT_OP_SELECT | 1, &mut response);
        assert_eq!(response.take(), Some(0));
        depot.alert(DEPOT_OP_DRUM | DRUM_OP_SELECT | 2, &mut response);
        assert_eq!(response.take(), Some(1));
        depot.alert(
            DEPOT_OP_DRUM | DRUM_OP_RING | RING_OP_REWIND_WRITE,
            &mut response,
        );
        assert_eq!(response.take(), Some(0));
    }

    #[test]
    fn test_bits_flow_through_selection() {
        let mut depot = Depot::default();
        let mut response = ResponseQueue::default();
        depot.drum_mut(0);
        depot.alert(DEPOT_OP_SELECT, &mut response);
        assert_eq!(response.take(), Some(0));
        depot.send(true).unwrap();
        assert_eq!(depot.next_bit(), Some(true));
        assert_eq!(depot.next_bit(), None);
    }
}
