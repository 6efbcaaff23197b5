//! The CAPP cell engine.
//!
//! Every cell holds two independent set-membership bits, one tag bit
//! and a 32-bit data word.  An action broadcasts a match and mask to
//! all cells at once; the "active list" is the ordered sequence of
//! cells that are members of the active set bank *and* tagged.  The
//! list is kept as a queue of cell indices rebuilt whenever the engine
//! re-evaluates, so cells stay plain values with no pointers between
//! them.
//!
//! The engine also counts every bit transition it causes (set bit, tag
//! bit or data bit) in `bits_flipped`, which the control processor
//! uses as its power model.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{event, Level};

/// One CAPP cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell {
    /// The two set-membership banks.
    pub set: [bool; 2],
    /// Tag bit, manipulated by the LIST family of actions.
    pub tag: bool,
    /// Data word.
    pub data: u32,
    /// Set when the most recent action touched this cell.
    pub changed: bool,
}

/// The eight associative actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Toggle which set bank is active.
    Swap,
    /// Tag every cell in the active set.
    ListAll,
    /// Complement the tag of every cell in the active set.
    ListNot,
    /// Untag the head of the active list.
    ListNext,
    /// Keep only the tagged, matching cells tagged.
    ListOnly,
    /// Select the cells whose data matches under the mask.
    SetOf,
    /// Write the masked bits into the head of the active list.
    WriteFirst,
    /// Write the masked bits into every cell of the active list.
    WriteList,
}

/// Content-Addressable Parallel Processor.
#[derive(Debug, Clone)]
pub struct Capp {
    cells: Vec<Cell>,
    active: VecDeque<usize>,
    bits_flipped: u64,
    sets_swapped: bool,
}

impl Capp {
    pub fn new(count: usize) -> Capp {
        let mut capp = Capp {
            cells: vec![Cell::default(); count],
            active: VecDeque::new(),
            bits_flipped: 0,
            sets_swapped: false,
        };
        capp.reset();
        capp
    }

    /// Fill every cell with the all-ones word, select and tag all of
    /// them, and zero the power counter.
    pub fn reset(&mut self) {
        for cell in &mut self.cells {
            cell.data = 0xffff_ffff;
        }
        self.action(Action::SetOf, 0xffff_ffff, 0xffff_ffff);
        self.action(Action::ListAll, 0, 0);
        self.bits_flipped = 0;
    }

    /// Data word of the head of the active list, or 0 when empty.
    pub fn first(&self) -> u32 {
        self.active
            .front()
            .map(|&index| self.cells[index].data)
            .unwrap_or(0)
    }

    /// Length of the active list.
    pub fn count(&self) -> usize {
        self.active.len()
    }

    /// Data words of the active list, in cell-array order.
    pub fn list(&self) -> impl Iterator<Item = u32> + '_ {
        self.active.iter().map(move |&index| self.cells[index].data)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn bits_flipped(&self) -> u64 {
        self.bits_flipped
    }

    pub fn clear_bits_flipped(&mut self) {
        self.bits_flipped = 0;
    }

    pub fn sets_swapped(&self) -> bool {
        self.sets_swapped
    }

    fn bank(&self) -> usize {
        usize::from(self.sets_swapped)
    }

    /// Deterministically scramble tags, both set banks and data, then
    /// re-evaluate the active list.
    pub fn randomize(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for cell in &mut self.cells {
            cell.tag = rng.gen::<u32>() & 1 != 0;
            cell.set[0] = rng.gen::<u32>() & 1 != 0;
            cell.set[1] = rng.gen::<u32>() & 1 != 0;
            cell.data = rng.gen::<u32>();
        }
        self.evaluate_all(|_| {});
    }

    /// Replace the cell array with an external snapshot, re-evaluate,
    /// and zero the power counter.
    pub fn import(&mut self, cells: Vec<Cell>) {
        self.cells = cells;
        self.evaluate_all(|_| {});
        self.bits_flipped = 0;
    }

    /// Visit every cell, rebuild the active list from scratch and
    /// charge `bits_flipped` for every transition the visit caused.
    fn evaluate_all<F: FnMut(&mut Cell)>(&mut self, mut eval: F) {
        let Capp {
            cells,
            active,
            bits_flipped,
            sets_swapped,
        } = self;
        let bank = usize::from(*sets_swapped);
        active.clear();
        for (index, cell) in cells.iter_mut().enumerate() {
            let old = *cell;
            cell.changed = false;
            eval(cell);
            let before = *bits_flipped;
            if old.set[bank] != cell.set[bank] {
                *bits_flipped += 1;
            }
            if old.tag != cell.tag {
                *bits_flipped += 1;
            }
            *bits_flipped += u64::from((cell.data ^ old.data).count_ones());
            cell.changed = *bits_flipped != before;
            if cell.set[bank] && cell.tag {
                active.push_back(index);
            }
        }
    }

    /// Perform one associative action.
    pub fn action(&mut self, action: Action, word: u32, mask: u32) {
        event!(
            Level::TRACE,
            "capp: {:?} match:{:#010x} mask:{:#010x}",
            action,
            word,
            mask
        );

        match action {
            Action::Swap => {
                self.sets_swapped = !self.sets_swapped;
                self.evaluate_all(|_| {});
            }
            Action::SetOf => {
                let bank = self.bank();
                self.evaluate_all(move |cell| {
                    cell.set[bank] = (cell.data & mask) == (word & mask);
                });
            }
            Action::ListAll => {
                let bank = self.bank();
                self.evaluate_all(move |cell| {
                    if cell.set[bank] {
                        cell.tag = true;
                    }
                });
            }
            Action::ListNot => {
                let bank = self.bank();
                self.evaluate_all(move |cell| {
                    if cell.set[bank] {
                        cell.tag = !cell.tag;
                    }
                });
            }
            Action::ListOnly => {
                let bank = self.bank();
                self.evaluate_all(move |cell| {
                    if cell.tag && cell.set[bank] {
                        cell.tag = (cell.data & mask) == (word & mask);
                    }
                });
            }
            Action::ListNext => {
                let Capp {
                    cells,
                    active,
                    bits_flipped,
                    ..
                } = self;
                if let Some(head) = active.pop_front() {
                    cells[head].tag = false;
                    *bits_flipped += 1;
                    let mut rest = active.iter().copied();
                    if let Some(new_head) = rest.next() {
                        cells[new_head].changed = true;
                        for index in rest {
                            cells[index].changed = false;
                        }
                    }
                }
            }
            Action::WriteFirst => {
                let Capp {
                    cells,
                    active,
                    bits_flipped,
                    ..
                } = self;
                let mut list = active.iter().copied();
                if let Some(head) = list.next() {
                    let cell = &mut cells[head];
                    let old = cell.data;
                    cell.data = (cell.data & !mask) | (word & mask);
                    let flips = u64::from((cell.data ^ old).count_ones());
                    *bits_flipped += flips;
                    cell.changed = flips != 0;
                    for index in list {
                        cells[index].changed = false;
                    }
                }
            }
            Action::WriteList => {
                let Capp {
                    cells,
                    active,
                    bits_flipped,
                    ..
                } = self;
                for &index in active.iter() {
                    let cell = &mut cells[index];
                    let old = cell.data;
                    cell.data = (cell.data & !mask) | (word & mask);
                    let flips = u64::from((cell.data ^ old).count_ones());
                    *bits_flipped += flips;
                    cell.changed = flips != 0;
                }
            }
        }
    }
}
