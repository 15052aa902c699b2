//! Change masks.
//!
//! [`ChangeMask`] is the fixed-width mask owned by every holder: one bit per
//! field (or per array slot), grouped into 32-bit words, plus one coalescing
//! block bit per word. A block bit is set whenever any bit in its word is set,
//! and may also be set explicitly through [`ChangeMask::set_block`].
//!
//! [`ElementMask`] is the growable per-element mask of a dynamic collection.
//! Its word count always tracks the collection length rounded up to 32.
//!
//! Out-of-range bits are schema defects: they trip a `debug_assert!` and are
//! ignored in release builds.

/// Bits per mask word.
pub const WORD_BITS: u32 = 32;

/// Fixed-width change mask with block coalescing bits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeMask {
    words: Vec<u32>,
    blocks: Vec<u32>,
}

impl ChangeMask {
    /// Creates an empty mask able to hold `bit_count` bits.
    #[must_use]
    pub fn new(bit_count: u32) -> Self {
        let words = bit_count.div_ceil(WORD_BITS) as usize;
        Self {
            words: vec![0; words],
            blocks: vec![0; words.div_ceil(WORD_BITS as usize)],
        }
    }

    /// Number of bits the mask can hold.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.words.len() as u32 * WORD_BITS
    }

    /// Number of 32-bit words (and block bits).
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Returns the raw words.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Returns word `index`, or 0 when out of range.
    #[must_use]
    pub fn word(&self, index: usize) -> u32 {
        self.words.get(index).copied().unwrap_or(0)
    }

    /// Marks `bit` and its block. Idempotent.
    pub fn set(&mut self, bit: u32) {
        debug_assert!(bit < self.capacity(), "bit {bit} out of range");
        let index = (bit / WORD_BITS) as usize;
        if let Some(word) = self.words.get_mut(index) {
            *word |= 1 << (bit % WORD_BITS);
            self.set_block(index as u32);
        }
    }

    /// Marks block bit `block`. Idempotent.
    pub fn set_block(&mut self, block: u32) {
        debug_assert!(
            (block as usize) < self.words.len(),
            "block {block} out of range"
        );
        if let Some(word) = self.blocks.get_mut((block / WORD_BITS) as usize) {
            *word |= 1 << (block % WORD_BITS);
        }
    }

    /// Returns `true` if `bit` is set.
    #[must_use]
    pub fn test(&self, bit: u32) -> bool {
        debug_assert!(bit < self.capacity(), "bit {bit} out of range");
        self.word((bit / WORD_BITS) as usize) & (1 << (bit % WORD_BITS)) != 0
    }

    /// Returns `true` if block bit `block` is set.
    #[must_use]
    pub fn test_block(&self, block: u32) -> bool {
        self.blocks
            .get((block / WORD_BITS) as usize)
            .is_some_and(|word| word & (1 << (block % WORD_BITS)) != 0)
    }

    /// Clears every bit and block bit.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
        self.blocks.fill(0);
    }

    /// Returns `true` if no bit or block bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0) && self.blocks.iter().all(|w| *w == 0)
    }

    /// Number of set bits (block bits excluded).
    #[must_use]
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Iterates set bits in ascending order, skipping clear blocks.
    #[must_use]
    pub fn iter(&self) -> SetBits<'_> {
        SetBits {
            mask: self,
            next_word: 0,
            base: 0,
            current: 0,
        }
    }

    /// Returns the intersection of two masks. Block bits are re-derived
    /// from the resulting words.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        let mut out = Self::new(self.capacity());
        for (index, (a, b)) in self.words.iter().zip(other.words.iter()).enumerate() {
            out.set_word(index, a & b);
        }
        out
    }

    /// Overwrites word `index`, marking its block if non-zero.
    pub(crate) fn set_word(&mut self, index: usize, value: u32) {
        debug_assert!(index < self.words.len(), "word {index} out of range");
        if let Some(word) = self.words.get_mut(index) {
            *word = value;
            if value != 0 {
                self.set_block(index as u32);
            }
        }
    }
}

/// Ascending iterator over set bits of a [`ChangeMask`].
#[derive(Debug, Clone)]
pub struct SetBits<'a> {
    mask: &'a ChangeMask,
    next_word: usize,
    base: u32,
    current: u32,
}

impl Iterator for SetBits<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if self.current != 0 {
                let offset = self.current.trailing_zeros();
                self.current &= self.current - 1;
                return Some(self.base + offset);
            }
            let index = self.next_word;
            let word = *self.mask.words.get(index)?;
            self.next_word += 1;
            if self.mask.test_block(index as u32) {
                self.base = index as u32 * WORD_BITS;
                self.current = word;
            }
        }
    }
}

impl<'a> IntoIterator for &'a ChangeMask {
    type Item = u32;
    type IntoIter = SetBits<'a>;

    fn into_iter(self) -> SetBits<'a> {
        self.iter()
    }
}

/// Growable per-element mask for dynamic collections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementMask {
    words: Vec<u32>,
}

impl ElementMask {
    /// Creates an empty mask with no words.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Creates a clear mask sized for `len` elements.
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS as usize)],
        }
    }

    pub(crate) fn from_words(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// Returns the raw words.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Returns word `index`, or 0 when out of range.
    #[must_use]
    pub fn word(&self, index: usize) -> u32 {
        self.words.get(index).copied().unwrap_or(0)
    }

    /// Number of words.
    #[must_use]
    pub fn word_len(&self) -> usize {
        self.words.len()
    }

    /// Grows or truncates to `word_count` words; new words are clear.
    pub fn resize(&mut self, word_count: usize) {
        self.words.resize(word_count, 0);
    }

    /// Drops clear words from the end.
    pub fn shrink_if_trailing_clear(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }

    /// Resizes to hold exactly `len` elements and clears bits at `len` and above.
    pub fn fit_len(&mut self, len: usize) {
        self.resize(len.div_ceil(WORD_BITS as usize));
        let tail = (len % WORD_BITS as usize) as u32;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u32 << tail) - 1;
            }
        }
    }

    /// Marks element `index`.
    pub fn set(&mut self, index: usize) {
        let word = index / WORD_BITS as usize;
        debug_assert!(word < self.words.len(), "element {index} out of range");
        if let Some(w) = self.words.get_mut(word) {
            *w |= 1 << (index % WORD_BITS as usize);
        }
    }

    /// Marks every element in `start..end`.
    pub fn set_range(&mut self, start: usize, end: usize) {
        for index in start..end {
            self.set(index);
        }
    }

    /// Returns `true` if element `index` is marked.
    #[must_use]
    pub fn test(&self, index: usize) -> bool {
        self.word(index / WORD_BITS as usize) & (1 << (index % WORD_BITS as usize)) != 0
    }

    /// Clears every bit, keeping the word count.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Returns `true` if no element is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterates marked elements in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            let base = index * WORD_BITS as usize;
            (0..WORD_BITS as usize)
                .filter(move |bit| (word >> bit) & 1 != 0)
                .map(move |bit| base + bit)
        })
    }
}
