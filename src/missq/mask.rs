use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use smallvec::SmallVec;

/// Bit-vector over hardware thread indices. One bit per thread, so a core
/// supports at most 64 threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadMask(u64);

pub const MAX_THREADS: usize = u64::BITS as usize;

impl ThreadMask {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn single(thread: usize) -> Self {
        debug_assert!(thread < MAX_THREADS);
        Self(1u64 << thread)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn contains(self, thread: usize) -> bool {
        debug_assert!(thread < MAX_THREADS);
        self.0 & (1u64 << thread) != 0
    }

    pub fn insert(&mut self, thread: usize) {
        debug_assert!(thread < MAX_THREADS);
        self.0 |= 1u64 << thread;
    }

    pub fn remove(&mut self, thread: usize) {
        debug_assert!(thread < MAX_THREADS);
        self.0 &= !(1u64 << thread);
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_one_hot(self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }

    /// Index of the single set bit. Meaningful only for one-hot masks; callers
    /// check `is_one_hot` first.
    pub fn index(self) -> usize {
        debug_assert!(self.is_one_hot());
        self.0.trailing_zeros() as usize
    }

    /// Decode the set bits into thread indices, lowest first.
    pub fn indices(self) -> SmallVec<[usize; 8]> {
        let mut out = SmallVec::new();
        let mut bits = self.0;
        while bits != 0 {
            let idx = bits.trailing_zeros() as usize;
            out.push(idx);
            bits &= bits - 1;
        }
        out
    }
}

impl BitOr for ThreadMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ThreadMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ThreadMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, idx) in self.indices().iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", idx)?;
        }
        write!(f, "}}")
    }
}
