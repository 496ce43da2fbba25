use std::fmt;

use thiserror::Error;

use crate::storage::bits::{self, WORD_BITS};

pub const PAGE_SIZE: usize = 4096;
pub type PageId = u64;

/// Byte layout of a page made of two summary bitmaps followed by a field of
/// fixed-size items.
///
/// The header (kind, depth) is kept in the two last bytes of the used
/// bitmap. Those 16 bits address no slot as long as the field is at least
/// 16 items shorter than the bitmap, which `INDEX_LAYOUT` asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub page_size: usize,
    pub item_size: usize,
    pub summary_size: usize,
}

impl PageLayout {
    pub const fn used_offset(&self) -> usize {
        0
    }

    pub const fn full_offset(&self) -> usize {
        self.summary_size
    }

    pub const fn content_offset(&self) -> usize {
        2 * self.summary_size
    }

    pub const fn kind_offset(&self) -> usize {
        self.summary_size - 2
    }

    pub const fn depth_offset(&self) -> usize {
        self.summary_size - 1
    }

    pub const fn summary_bits(&self) -> usize {
        self.summary_size * 8
    }

    pub const fn field_length(&self) -> usize {
        (self.page_size - self.content_offset()) / self.item_size
    }

    /// Allocation units tracked by one leaf page.
    pub const fn leaf_bits(&self) -> u64 {
        (self.field_length() * self.item_size * 8) as u64
    }
}

pub const INDEX_LAYOUT: PageLayout = PageLayout {
    page_size: PAGE_SIZE,
    item_size: 8,
    summary_size: 64,
};

pub const FIELD_LENGTH: usize = INDEX_LAYOUT.field_length();
pub const SUMMARY_WORDS: usize = INDEX_LAYOUT.summary_size / 8;

const _: () = assert!(FIELD_LENGTH + 16 <= INDEX_LAYOUT.summary_bits());
const _: () = assert!(INDEX_LAYOUT.item_size * 8 == WORD_BITS);

/// Number of page numbers addressed by an index page at `depth`:
/// `64 * FIELD_LENGTH^(depth + 1)`, saturating at `u64::MAX`.
pub fn space_size_for_depth(depth: u32) -> u64 {
    let mut result = INDEX_LAYOUT.leaf_bits();
    for _ in 0..depth {
        result = result.saturating_mul(FIELD_LENGTH as u64);
    }
    result
}

/// Byte size of the address space an index tree of `depth` can describe.
pub fn address_space_size_for_depth(depth: u32) -> u64 {
    space_size_for_depth(depth).saturating_mul(PAGE_SIZE as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Unknown,
    /// Pages of the allocation tree itself.
    Index,
    /// Any tag a caller layers on top for its own pages.
    Custom(u8),
}

impl PageKind {
    pub const INDEX_TAG: u8 = b'p';

    pub fn tag(self) -> u8 {
        match self {
            PageKind::Unknown => 0,
            PageKind::Index => Self::INDEX_TAG,
            PageKind::Custom(tag) => tag,
        }
    }

    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => PageKind::Unknown,
            Self::INDEX_TAG => PageKind::Index,
            other => PageKind::Custom(other),
        }
    }
}

/// How the content words of an index page are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Content words are byte offsets of child pages.
    Branch { depth: u32 },
    /// Content words are raw allocation bitmaps.
    Leaf,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("page header is not initialized")]
    Uninitialized,

    #[error("full bits set beyond the last slot")]
    SpareFullBits,

    #[error("slot {slot} is full but not used")]
    FullWithoutUsed { slot: usize },

    #[error("used slot {slot} holds a zero word")]
    ZeroWord { slot: usize },

    #[error("leaf word {slot} is all ones but not marked full")]
    UnmarkedFull { slot: usize },

    #[error("leaf word {slot} is marked full but has free bits")]
    FalseFull { slot: usize },
}

/// Typed view over the bytes of one index page.
///
/// The view borrows the page store mutably, so it cannot outlive an
/// operation that might grow (and remap) the backing region.
pub struct IndexPage<'a> {
    bytes: &'a mut [u8; PAGE_SIZE],
}

impl<'a> IndexPage<'a> {
    pub fn new(bytes: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn kind(&self) -> PageKind {
        PageKind::from_tag(self.bytes[INDEX_LAYOUT.kind_offset()])
    }

    pub fn depth(&self) -> u32 {
        self.bytes[INDEX_LAYOUT.depth_offset()] as u32
    }

    pub fn is_initialized(&self) -> bool {
        self.bytes[INDEX_LAYOUT.kind_offset()] != 0
    }

    pub fn role(&self) -> Role {
        match self.depth() {
            0 => Role::Leaf,
            depth => Role::Branch { depth },
        }
    }

    /// Clears the summary bitmaps and writes the header. Depths above 254
    /// are stored as 255.
    pub fn init(&mut self, kind: PageKind, depth: u32) {
        debug_assert!(!self.is_initialized(), "won't initialize a used page");
        debug_assert_ne!(kind, PageKind::Unknown);

        self.bytes[..INDEX_LAYOUT.content_offset()].fill(0);
        self.bytes[INDEX_LAYOUT.kind_offset()] = kind.tag();
        self.bytes[INDEX_LAYOUT.depth_offset()] = depth.min(u8::MAX as u32) as u8;
    }

    /// Zeroes the whole page, header included.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    fn summary_words(&self, region: usize) -> [u64; SUMMARY_WORDS] {
        let mut words = [0u64; SUMMARY_WORDS];
        for (k, word) in words.iter_mut().enumerate() {
            let start = region + k * 8;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&self.bytes[start..start + 8]);
            *word = u64::from_le_bytes(bytes);
        }
        words
    }

    /// Used bitmap restricted to real slots, with the header bytes masked out.
    pub fn used_words(&self) -> [u64; SUMMARY_WORDS] {
        let mut words = self.summary_words(INDEX_LAYOUT.used_offset());
        for (k, word) in words.iter_mut().enumerate() {
            *word &= slot_mask(k);
        }
        words
    }

    pub fn full_words(&self) -> [u64; SUMMARY_WORDS] {
        self.summary_words(INDEX_LAYOUT.full_offset())
    }

    fn summary_bit(&self, region: usize, slot: usize) -> bool {
        debug_assert!(slot < FIELD_LENGTH);
        self.bytes[region + slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_summary_bit(&mut self, region: usize, slot: usize, value: bool) {
        debug_assert!(slot < FIELD_LENGTH);
        let byte = &mut self.bytes[region + slot / 8];
        let mask = 1u8 << (slot % 8);
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }

    pub fn used(&self, slot: usize) -> bool {
        self.summary_bit(INDEX_LAYOUT.used_offset(), slot)
    }

    pub fn set_used(&mut self, slot: usize, value: bool) {
        self.set_summary_bit(INDEX_LAYOUT.used_offset(), slot, value);
    }

    pub fn full(&self, slot: usize) -> bool {
        self.summary_bit(INDEX_LAYOUT.full_offset(), slot)
    }

    pub fn set_full(&mut self, slot: usize, value: bool) {
        self.set_summary_bit(INDEX_LAYOUT.full_offset(), slot, value);
    }

    fn word_range(slot: usize) -> std::ops::Range<usize> {
        debug_assert!(slot < FIELD_LENGTH);
        let start = INDEX_LAYOUT.content_offset() + slot * INDEX_LAYOUT.item_size;
        start..start + INDEX_LAYOUT.item_size
    }

    pub fn word(&self, slot: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.bytes[Self::word_range(slot)]);
        u64::from_le_bytes(bytes)
    }

    pub fn set_word(&mut self, slot: usize, value: u64) {
        let range = Self::word_range(slot);
        self.bytes[range].copy_from_slice(&value.to_le_bytes());
    }

    /// Marks `slot` used. On first use the content word is zeroed. Returns
    /// the current word and whether this was the first use.
    pub fn use_slot(&mut self, slot: usize) -> (u64, bool) {
        let unused = !self.used(slot);
        if unused {
            self.set_used(slot, true);
            self.set_word(slot, 0);
        }
        (self.word(slot), unused)
    }

    /// Lowest slot whose full bit is clear.
    pub fn first_unfull(&self) -> Option<usize> {
        let i = bits::index_of_zero(&self.full_words());
        (i < FIELD_LENGTH).then_some(i)
    }

    /// Uses the first non-full slot and marks it full right away. Only valid
    /// for a slot that was never used before.
    pub fn allocate_fully(&mut self) -> Option<usize> {
        let slot = self.first_unfull()?;
        let (_, unused) = self.use_slot(slot);
        debug_assert!(unused);
        self.set_full(slot, true);
        Some(slot)
    }

    pub fn is_full(&self) -> bool {
        self.first_unfull().is_none()
    }

    pub fn is_empty(&self) -> bool {
        bits::is_all_zero(&self.used_words())
    }

    /// Checks header well-formedness, `full => used`, and the content of
    /// used words according to the page's role.
    pub fn check(&self) -> Result<(), Violation> {
        if !self.is_initialized() {
            return Err(Violation::Uninitialized);
        }

        let used = self.used_words();
        let full = self.full_words();

        if full.iter().enumerate().any(|(k, &w)| w & !slot_mask(k) != 0) {
            return Err(Violation::SpareFullBits);
        }

        if !bits::implies(&full, &used) {
            let mut diff = [0u64; SUMMARY_WORDS];
            for k in 0..SUMMARY_WORDS {
                diff[k] = full[k] & !used[k];
            }
            let slot = bits::index_of_one(&diff);
            return Err(Violation::FullWithoutUsed { slot });
        }

        let leaf = self.role() == Role::Leaf;
        for slot in 0..FIELD_LENGTH {
            if !self.used(slot) {
                continue;
            }
            let word = self.word(slot);
            if word == 0 {
                return Err(Violation::ZeroWord { slot });
            }
            if leaf {
                let all_one = word == u64::MAX;
                if all_one && !self.full(slot) {
                    return Err(Violation::UnmarkedFull { slot });
                }
                if !all_one && self.full(slot) {
                    return Err(Violation::FalseFull { slot });
                }
            }
        }

        Ok(())
    }
}

/// Bits of summary word `k` that address an existing slot.
fn slot_mask(k: usize) -> u64 {
    let first = k * WORD_BITS;
    if first + WORD_BITS <= FIELD_LENGTH {
        u64::MAX
    } else if first >= FIELD_LENGTH {
        0
    } else {
        (1u64 << (FIELD_LENGTH - first)) - 1
    }
}

impl fmt::Display for IndexPage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.bytes[INDEX_LAYOUT.kind_offset()] {
            0 => '.',
            tag => tag as char,
        };
        let depth = match self.depth() {
            d @ 0..=9 => char::from(b'0' + d as u8),
            _ => '+',
        };
        let slot_bytes = FIELD_LENGTH.div_ceil(8);
        let used = INDEX_LAYOUT.used_offset();
        let full = INDEX_LAYOUT.full_offset();
        write!(
            f,
            "[{}{}|{}|{}]",
            kind,
            depth,
            bits::to_braille(&self.bytes[used..used + slot_bytes]),
            bits::to_braille(&self.bytes[full..full + slot_bytes]),
        )
    }
}
