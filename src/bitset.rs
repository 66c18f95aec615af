//! Dense bit-set over chart indices.
//!
//! States and transitions are numbered densely at index-build time, so all
//! structural relations (ancestors, descendants, completions, exit sets,
//! conflicts) and the runtime sets (configuration, history, entry/exit sets)
//! are plain bit-vectors of a fixed universe size. A micro-step is then a
//! fixed sequence of word-wise operations.

use std::fmt::{Debug, Formatter};
use std::ops::{BitAndAssign, BitOrAssign, BitXorAssign};

use bitvec::prelude::{BitVec, Lsb0};

const WORD_BITS: usize = usize::BITS as usize;

/// A fixed-universe set of state or transition indices.
///
/// All binary operations expect both operands to come from the same universe
/// (same length); mixing universes is a programming error.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
    bits: BitVec<usize, Lsb0>,
    len: usize,
}

impl BitSet {
    /// An empty set over a universe of `len` indices.
    pub fn with_capacity(len: usize) -> BitSet {
        BitSet {
            bits: BitVec::repeat(false, len),
            len,
        }
    }

    /// The universe size, not the number of members.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.none()
    }

    pub fn set(&mut self, index: usize) {
        self.bits.set(index, true);
    }

    pub fn clear(&mut self, index: usize) {
        self.bits.set(index, false);
    }

    pub fn has(&self, index: usize) -> bool {
        index < self.len && self.bits[index]
    }

    /// True if no member is set.
    pub fn none(&self) -> bool {
        self.bits.not_any()
    }

    /// True if at least one member is set.
    pub fn any(&self) -> bool {
        self.bits.any()
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    /// Remove all members, keeping the universe size.
    pub fn clear_all(&mut self) {
        self.bits.fill(false);
    }

    pub fn union(&mut self, other: &BitSet) {
        debug_assert_eq!(self.len, other.len);
        for (w, o) in self
            .bits
            .as_raw_mut_slice()
            .iter_mut()
            .zip(other.bits.as_raw_slice())
        {
            *w |= *o;
        }
    }

    pub fn intersect(&mut self, other: &BitSet) {
        debug_assert_eq!(self.len, other.len);
        for (w, o) in self
            .bits
            .as_raw_mut_slice()
            .iter_mut()
            .zip(other.bits.as_raw_slice())
        {
            *w &= *o;
        }
    }

    /// Remove all members of `other` from this set.
    pub fn and_not(&mut self, other: &BitSet) {
        debug_assert_eq!(self.len, other.len);
        for (w, o) in self
            .bits
            .as_raw_mut_slice()
            .iter_mut()
            .zip(other.bits.as_raw_slice())
        {
            *w &= !*o;
        }
    }

    pub fn symmetric_difference(&mut self, other: &BitSet) {
        debug_assert_eq!(self.len, other.len);
        for (w, o) in self
            .bits
            .as_raw_mut_slice()
            .iter_mut()
            .zip(other.bits.as_raw_slice())
        {
            *w ^= *o;
        }
    }

    /// True if this set and `other` have at least one member in common.
    pub fn intersects(&self, other: &BitSet) -> bool {
        debug_assert_eq!(self.len, other.len);
        self.bits
            .as_raw_slice()
            .iter()
            .zip(other.bits.as_raw_slice())
            .any(|(w, o)| w & o != 0)
    }

    /// True if every member of this set is also a member of `other`.
    pub fn is_subset(&self, other: &BitSet) -> bool {
        debug_assert_eq!(self.len, other.len);
        self.bits
            .as_raw_slice()
            .iter()
            .zip(other.bits.as_raw_slice())
            .all(|(w, o)| w & !o == 0)
    }

    /// First member, lowest index first.
    pub fn first_one(&self) -> Option<usize> {
        self.next_one_from(0)
    }

    /// Next member strictly after `after`.
    ///
    /// The `first_one`/`next_one` cursor stays valid while the set is
    /// mutated, which the entry-set closure relies on: members added below
    /// the cursor are not revisited, members added above it are.
    pub fn next_one(&self, after: usize) -> Option<usize> {
        self.next_one_from(after + 1)
    }

    fn next_one_from(&self, start: usize) -> Option<usize> {
        if start >= self.len {
            return None;
        }
        let words = self.bits.as_raw_slice();
        let mut wi = start / WORD_BITS;
        let mut word = words[wi] & (usize::MAX << (start % WORD_BITS));
        loop {
            if word != 0 {
                let index = wi * WORD_BITS + word.trailing_zeros() as usize;
                return if index < self.len { Some(index) } else { None };
            }
            wi += 1;
            if wi >= words.len() {
                return None;
            }
            word = words[wi];
        }
    }

    /// Iterate members in ascending index order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    /// Iterate members in descending index order (exit order).
    pub fn iter_ones_rev(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).rev().filter(move |i| self.bits[*i])
    }
}

impl BitOrAssign<&BitSet> for BitSet {
    fn bitor_assign(&mut self, rhs: &BitSet) {
        self.union(rhs);
    }
}

impl BitAndAssign<&BitSet> for BitSet {
    fn bitand_assign(&mut self, rhs: &BitSet) {
        self.intersect(rhs);
    }
}

impl BitXorAssign<&BitSet> for BitSet {
    fn bitxor_assign(&mut self, rhs: &BitSet) {
        self.symmetric_difference(rhs);
    }
}

impl Debug for BitSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter_ones()).finish()
    }
}
