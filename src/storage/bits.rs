/// number of bits in one bitmap word
pub const WORD_BITS: usize = 64;

pub fn get_bit(word: u64, i: usize) -> bool {
    debug_assert!(i < WORD_BITS);
    word & (1u64 << i) != 0
}

pub fn set_bit(word: &mut u64, i: usize, value: bool) {
    debug_assert!(i < WORD_BITS);
    let mask = 1u64 << i;
    if value {
        *word |= mask;
    } else {
        *word &= !mask;
    }
}

/// index of the first bit that differs from `pattern`, scanning from the
/// least significant bit of the first word onwards
///
/// returns `words.len() * 64` when every bit equals the pattern
fn index_of_bit_core(words: &[u64], pattern: u64) -> usize {
    let mut passed = 0;
    for &word in words {
        let j = (word ^ pattern).trailing_zeros() as usize;
        if j < WORD_BITS {
            return passed + j;
        }
        passed += WORD_BITS;
    }
    passed
}

pub fn index_of_zero(words: &[u64]) -> usize {
    index_of_bit_core(words, u64::MAX)
}

pub fn index_of_one(words: &[u64]) -> usize {
    index_of_bit_core(words, 0)
}

/// first zero bit of a single word, `None` when the word is all ones
pub fn first_zero(word: u64) -> Option<usize> {
    let j = (!word).trailing_zeros() as usize;
    (j < WORD_BITS).then_some(j)
}

/// true iff every bit set in `condition` is also set in `conclusion`
pub fn implies(condition: &[u64], conclusion: &[u64]) -> bool {
    debug_assert_eq!(condition.len(), conclusion.len());
    condition
        .iter()
        .zip(conclusion)
        .all(|(&a, &b)| a & !b == 0)
}

pub fn is_all_zero(words: &[u64]) -> bool {
    words.iter().all(|&w| w == 0)
}

/// one braille glyph per byte, dots follow the bit pattern
pub fn to_braille(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| char::from_u32(0x2800 + b as u32).unwrap_or('?'))
        .collect()
}
