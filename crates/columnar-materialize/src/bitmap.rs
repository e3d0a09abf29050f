#![forbid(unsafe_code)]

/// A fixed-length bit vector used for validity and null flags.
///
/// Bits are stored little-endian within each `u64` word: bit 0 is the LSB of word 0.
/// Unlike an append-only validity buffer, bits may be written in any order, which is what
/// the loaders need (rows can be set out of order).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitVec {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

impl BitVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_len_all_false(bits: usize) -> Self {
        Self {
            words: vec![0u64; bits.div_ceil(64)],
            len: bits,
            ones: 0,
        }
    }

    pub fn with_len_all_true(bits: usize) -> Self {
        let mut out = Self::with_len_all_false(bits);
        out.set_range(0, bits, true);
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn count_ones(&self) -> usize {
        self.ones
    }

    pub fn count_zeros(&self) -> usize {
        self.len - self.ones
    }

    pub fn all_true(&self) -> bool {
        self.ones == self.len
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len, "BitVec index out of bounds");
        ((self.words[index / 64] >> (index % 64)) & 1) == 1
    }

    /// Like [`BitVec::get`], but `None` past the end instead of panicking.
    pub fn get_checked(&self, index: usize) -> Option<bool> {
        (index < self.len).then(|| self.get(index))
    }

    pub fn set(&mut self, index: usize, value: bool) {
        debug_assert!(index < self.len, "BitVec index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let was_set = (*word & mask) != 0;
        match (was_set, value) {
            (true, false) => {
                *word &= !mask;
                self.ones -= 1;
            }
            (false, true) => {
                *word |= mask;
                self.ones += 1;
            }
            _ => {}
        }
    }

    /// Set `len` consecutive bits starting at `start`.
    pub fn set_range(&mut self, start: usize, len: usize, value: bool) {
        let end = start + len;
        debug_assert!(end <= self.len, "BitVec range out of bounds");
        let mut i = start;
        while i < end {
            let bit = i % 64;
            let take = (64 - bit).min(end - i);
            let mask = if take == 64 {
                u64::MAX
            } else {
                ((1u64 << take) - 1) << bit
            };
            let word = &mut self.words[i / 64];
            let before = word.count_ones() as usize;
            if value {
                *word |= mask;
            } else {
                *word &= !mask;
            }
            let after = word.count_ones() as usize;
            self.ones = self.ones + after - before;
            i += take;
        }
    }

    /// Extend to `bits` with new bits set to `value`. Never shrinks.
    pub fn grow(&mut self, bits: usize, value: bool) {
        if bits <= self.len {
            return;
        }
        let old = self.len;
        self.words.resize(bits.div_ceil(64), 0);
        self.len = bits;
        if value {
            self.set_range(old, bits - old, true);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|i| self.get(i))
    }
}
