//! Scores measuring how close a comparison instruction is to flipping its
//! outcome.
//!
//! Each comparison site keeps a watermark made of three independent
//! measurements:
//! * `counter`: the highest number of times the site was reached in a single run
//! * `hamming`: the width of the operands, in bits, minus the Hamming distance
//!   between them
//! * `absolute`: `255 - min(255, |arg1 - arg2|)`
//!
//! Higher is always better. The watermarks live for the whole campaign.

use std::sync::atomic::{AtomicU32, Ordering};

/// Number of slots in the comparison tables.
///
/// Keeping it well under 1MiB per table keeps the per-run reset cheap.
pub const CMP_MAP_SIZE: usize = 1024 * 256;

/// Reduces a comparison site identifier into `0..CMP_MAP_SIZE`.
///
/// Sites that collide share a watermark, which can only hide progress,
/// never invent it.
#[inline]
pub fn cmp_site_index(site_id: usize) -> usize {
    site_id & (CMP_MAP_SIZE - 1)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CmpScore {
    pub counter: u8,
    pub hamming: u8,
    pub absolute: u8,
}

impl CmpScore {
    pub const fn new(counter: u8, hamming: u8, absolute: u8) -> Self {
        Self {
            counter,
            hamming,
            absolute,
        }
    }

    /// Whether `self` is a better score than `old`.
    ///
    /// A higher counter always wins. With equal counters, raising either
    /// the hamming or the absolute score is enough.
    #[inline]
    pub fn improves_on(&self, old: &CmpScore) -> bool {
        match self.counter.cmp(&old.counter) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self.hamming > old.hamming || self.absolute > old.absolute,
            std::cmp::Ordering::Less => false,
        }
    }

    /// The field-by-field maximum of both scores.
    #[inline]
    pub fn max_each(self, other: CmpScore) -> CmpScore {
        CmpScore {
            counter: self.counter.max(other.counter),
            hamming: self.hamming.max(other.hamming),
            absolute: self.absolute.max(other.absolute),
        }
    }

    #[inline]
    fn pack(self) -> u32 {
        u32::from_le_bytes([self.counter, self.hamming, self.absolute, 0])
    }

    #[inline]
    fn unpack(x: u32) -> Self {
        let [counter, hamming, absolute, _] = x.to_le_bytes();
        Self {
            counter,
            hamming,
            absolute,
        }
    }
}

/// The campaign-wide table of best comparison scores.
///
/// Each score is packed in a single word so that a slot is never observed
/// half-written. Loads and stores are relaxed and never combined into a
/// read-modify-write: two threads racing on the same slot may lose one
/// of the updates.
pub(crate) struct CmpScoreTable {
    scores: Box<[AtomicU32]>,
}

impl CmpScoreTable {
    pub fn new(len: usize) -> Self {
        Self {
            scores: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> CmpScore {
        CmpScore::unpack(self.scores[index].load(Ordering::Relaxed))
    }

    /// Raises the watermark at `index` if `score` improves on it.
    /// Returns whether it did.
    #[inline]
    pub fn update(&self, index: usize, score: CmpScore) -> bool {
        let old = self.get(index);
        if score.improves_on(&old) {
            self.scores[index].store(old.max_each(score).pack(), Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

/// Operands of a traced comparison instruction.
pub trait CmpOperand: Copy {
    /// Operand width in bits minus the number of differing bits.
    fn hamming_closeness(self, other: Self) -> u8;
    /// `255` minus the absolute difference, clamped to `0..=255`.
    fn absolute_closeness(self, other: Self) -> u8;
}

macro_rules! impl_cmp_operand {
    ($($t:ty),*) => {
        $(
            impl CmpOperand for $t {
                #[inline]
                fn hamming_closeness(self, other: Self) -> u8 {
                    (<$t>::BITS - (self ^ other).count_ones()) as u8
                }
                #[inline]
                fn absolute_closeness(self, other: Self) -> u8 {
                    let distance = self.abs_diff(other).min(255) as u8;
                    255 - distance
                }
            }
        )*
    };
}
impl_cmp_operand!(u8, u16, u32, u64);

/// The `(hamming, absolute)` closeness of two operands of `bits` bits that
/// were widened to `u64`, as switch operands and case constants are.
///
/// Unknown widths are treated as 64 bits.
pub fn closeness_at_width(arg1: u64, arg2: u64, bits: u64) -> (u8, u8) {
    fn closeness<T: CmpOperand>(arg1: T, arg2: T) -> (u8, u8) {
        (arg1.hamming_closeness(arg2), arg1.absolute_closeness(arg2))
    }
    match bits {
        8 => closeness(arg1 as u8, arg2 as u8),
        16 => closeness(arg1 as u16, arg2 as u16),
        32 => closeness(arg1 as u32, arg2 as u32),
        _ => closeness(arg1, arg2),
    }
}
