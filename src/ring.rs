//! Cyclic lane scheduler
//!
//! A ring is an ordering of lane indices plus a cursor. The lanes themselves
//! live in the file's lane array; a writer ring and a reader ring are two
//! independent cursors over that same array.

/// Fixed-size cyclic cursor over lane indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneRing {
    slots: Vec<usize>,
    pos: usize,
}

impl LaneRing {
    /// Build a ring visiting `order` cyclically, starting at its first entry.
    ///
    /// # Panics
    ///
    /// Panics if `order` is empty.
    pub fn new(order: Vec<usize>) -> Self {
        assert!(!order.is_empty(), "lane ring needs at least one lane");
        Self { slots: order, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current lane, advancing the cursor
    pub fn get(&mut self) -> usize {
        let lane = self.slots[self.pos];
        self.pos = (self.pos + 1) % self.slots.len();
        lane
    }

    /// Current lane, without advancing
    pub fn peek(&self) -> usize {
        self.slots[self.pos]
    }

    /// Step back one position
    pub fn rewind(&mut self) {
        self.move_by(-1);
    }

    pub fn move_by(&mut self, k: isize) {
        let len = self.slots.len() as isize;
        self.pos = (self.pos as isize + k).rem_euclid(len) as usize;
    }

    /// Place the cursor on `lane`. Returns false if the ring does not hold it.
    pub fn move_to(&mut self, lane: usize) -> bool {
        match self.position_of(lane) {
            Some(pos) => {
                self.pos = pos;
                true
            }
            None => false,
        }
    }

    /// Ring position of `lane`
    pub fn position_of(&self, lane: usize) -> Option<usize> {
        self.slots.iter().position(|&l| l == lane)
    }

    /// Cursor position within the ring order
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Lane indices in ring order
    pub fn order(&self) -> &[usize] {
        &self.slots
    }
}
