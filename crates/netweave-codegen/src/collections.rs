//! Fixed-capacity container sizing.
//!
//! Containers are laid out inline at a fixed capacity, so their word count
//! is a pure function of capacity and element size.

use serde::{Deserialize, Serialize};

use crate::types::{
    DICT_ENTRY_LINK_WORDS, DICT_META_WORDS, LIST_BOOKKEEPING_WORDS, LIST_META_WORDS,
    TEXT_CHAR_SIZE, TEXT_HEADER_WORDS,
};
use netweave_types::words_for_bytes;

/// Container families with a capacity default in the settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Text,
    Array,
    LinkedList,
    Dictionary,
}

/// Smallest prime `>= n`. Returns 2 for `n <= 2`, `None` past the last `u32` prime.
pub fn next_prime(n: u32) -> Option<u32> {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate = candidate.checked_add(1)?;
    }
    Some(candidate)
}

fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3u32;
    while (d as u64) * (d as u64) <= n as u64 {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

// Each helper returns `None` when the word count does not fit in a `u32`.

/// Bounded text: a length word plus the packed code units.
pub fn text_words(capacity: u32) -> Option<u32> {
    words_for_bytes(capacity.checked_mul(TEXT_CHAR_SIZE)?).checked_add(TEXT_HEADER_WORDS)
}

/// Packed scalars, no metadata.
pub fn fixed_buffer_words(capacity: u32, element_bytes: u32) -> Option<u32> {
    Some(words_for_bytes(capacity.checked_mul(element_bytes)?))
}

pub fn array_words(capacity: u32, element_words: u32) -> Option<u32> {
    capacity.checked_mul(element_words)
}

pub fn linked_list_words(capacity: u32, element_words: u32) -> Option<u32> {
    let slot = element_words.checked_add(LIST_BOOKKEEPING_WORDS)?;
    capacity.checked_mul(slot)?.checked_add(LIST_META_WORDS)
}

pub fn dictionary_words(capacity: u32, key_words: u32, value_words: u32) -> Option<u32> {
    let entry = key_words
        .checked_add(value_words)?
        .checked_add(DICT_ENTRY_LINK_WORDS)?;
    capacity
        .checked_mul(entry)?
        .checked_add(next_prime(capacity)?)?
        .checked_add(DICT_META_WORDS)
}
