// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Flag state word.
//!
//! `0` is uninitialized, `1` is done. Any larger value is active: the high
//! bits hold the runner slot plus one, the low `ADMISSION_BITS` bits count
//! assisting threads that are registering against that runner.

pub(crate) const ADMISSION_BITS: u32 = 7;

/// Most assisting threads that may be registering against one runner at
/// the same time. Further arrivals wait for a slot.
pub const MAX_ASSISTING: usize = (1 << ADMISSION_BITS) - 1;

const ADMISSION_MASK: usize = MAX_ASSISTING;

pub(crate) const UNINITIALIZED: usize = 0;
pub(crate) const DONE: usize = 1;

/// Decoded view of a flag's state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    Uninitialized,
    /// An initializer is running on `runner`; `admitted` threads are
    /// between registering and taking a reference on it.
    Active { runner: usize, admitted: usize },
    Done,
}

impl FlagState {
    pub(crate) fn decode(word: usize) -> Self {
        match word {
            UNINITIALIZED => FlagState::Uninitialized,
            DONE => FlagState::Done,
            _ => FlagState::Active {
                runner: runner_of(word),
                admitted: word & ADMISSION_MASK,
            },
        }
    }
}

/// `Active(runner, 0)`.
pub(crate) fn active(runner: usize) -> usize {
    (runner + 1) << ADMISSION_BITS
}

/// The word with every admission slot taken.
pub(crate) fn saturated(word: usize) -> usize {
    word | ADMISSION_MASK
}

pub(crate) fn is_active(word: usize) -> bool {
    word > DONE
}

pub(crate) fn runner_of(word: usize) -> usize {
    (word >> ADMISSION_BITS) - 1
}
