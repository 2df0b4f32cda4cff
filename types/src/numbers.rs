//! Validated "6 numbers from 1-37" selections.
//!
//! A [`NumberSet`] is used both for a ticket's selection and for a draw's winning numbers.
//! The user's selection order is kept for display, while comparison, hashing and matching
//! always go through the ascending [`NumberSet::canonical`] form.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use thiserror::Error as ThisError;

/// Numbers in every ticket and every set of winning numbers.
pub const NUMBERS_PER_SET: usize = 6;

/// Smallest selectable number.
pub const MIN_NUMBER: u8 = 1;

/// Largest selectable number.
pub const MAX_NUMBER: u8 = 37;

#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum NumberSetError {
    #[error("expected {expected} numbers (got={got})")]
    InvalidCount { expected: usize, got: usize },
    #[error("number out of range (got={value}, min={min}, max={max})")]
    OutOfRange { value: i64, min: u8, max: u8 },
    #[error("number {value} appears more than once")]
    DuplicateValue { value: u8 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "Vec<i64>", into = "Vec<u8>")]
pub struct NumberSet {
    selection: [u8; NUMBERS_PER_SET],
    canonical: [u8; NUMBERS_PER_SET],
}

impl NumberSet {
    /// Validate a raw collection of numbers.
    ///
    /// The count is checked first, then the range of every value, then uniqueness. Input is
    /// never truncated or deduplicated.
    pub fn parse<I, T>(raw: I) -> Result<Self, NumberSetError>
    where
        I: IntoIterator<Item = T>,
        T: Into<i64>,
    {
        let raw: Vec<i64> = raw.into_iter().map(Into::into).collect();
        if raw.len() != NUMBERS_PER_SET {
            return Err(NumberSetError::InvalidCount {
                expected: NUMBERS_PER_SET,
                got: raw.len(),
            });
        }

        let mut selection = [0u8; NUMBERS_PER_SET];
        for (slot, value) in selection.iter_mut().zip(raw.iter().copied()) {
            if value < MIN_NUMBER as i64 || value > MAX_NUMBER as i64 {
                return Err(NumberSetError::OutOfRange {
                    value,
                    min: MIN_NUMBER,
                    max: MAX_NUMBER,
                });
            }
            *slot = value as u8;
        }

        let mut seen = [false; MAX_NUMBER as usize + 1];
        for value in selection {
            if seen[value as usize] {
                return Err(NumberSetError::DuplicateValue { value });
            }
            seen[value as usize] = true;
        }

        let mut canonical = selection;
        canonical.sort_unstable();
        Ok(Self {
            selection,
            canonical,
        })
    }

    /// Pick 6 distinct numbers uniformly at random.
    pub fn quick_pick<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut selection = [0u8; NUMBERS_PER_SET];
        let picked = rand::seq::index::sample(rng, MAX_NUMBER as usize, NUMBERS_PER_SET);
        for (slot, index) in selection.iter_mut().zip(picked.iter()) {
            *slot = index as u8 + MIN_NUMBER;
        }
        let mut canonical = selection;
        canonical.sort_unstable();
        Self {
            selection,
            canonical,
        }
    }

    /// Numbers in the order they were chosen.
    pub fn selection(&self) -> &[u8; NUMBERS_PER_SET] {
        &self.selection
    }

    /// Numbers sorted ascending.
    pub fn canonical(&self) -> &[u8; NUMBERS_PER_SET] {
        &self.canonical
    }

    pub fn contains(&self, value: u8) -> bool {
        self.canonical.binary_search(&value).is_ok()
    }
}

impl PartialEq for NumberSet {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for NumberSet {}

impl Hash for NumberSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl std::fmt::Display for NumberSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, value) in self.canonical.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

impl TryFrom<Vec<i64>> for NumberSet {
    type Error = NumberSetError;

    fn try_from(raw: Vec<i64>) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<NumberSet> for Vec<u8> {
    fn from(set: NumberSet) -> Self {
        set.selection.to_vec()
    }
}
