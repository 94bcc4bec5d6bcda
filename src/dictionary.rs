//! Open-addressed hash map from [`Literal`] keys to [`Literal`] values.
//!
//! Removal leaves a tombstone behind so later probe sequences stay intact. Tombstones count
//! toward the load factor (`contains`) until the next resize rehashes live entries into a
//! fresh slot array; there is no compaction pass, so heavy insert/remove churn keeps growing
//! the table.
//!
//! `Null` and NaN are not valid keys. NaN never compares equal to itself, so an entry keyed
//! by it could never be found again. A NaN nested inside a composite key has the same
//! problem and is not checked for.

use std::fmt;

use thiserror::Error;

use crate::literal::Literal;

const INITIAL_CAPACITY: usize = 8;

// maximum load factor of 3/4, kept as integers
const MAX_LOAD_NUMERATOR: usize = 3;
const MAX_LOAD_DENOMINATOR: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DictionaryError {
    #[error("dictionaries can't have null keys")]
    InvalidKey,
    #[error("dictionaries can't have NaN keys")]
    NanKey,
}

pub(crate) fn check_key(key: &Literal) -> Result<(), DictionaryError> {
    match key {
        Literal::Null => Err(DictionaryError::InvalidKey),
        Literal::Number(n) if n.is_nan() => Err(DictionaryError::NanKey),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default)]
enum Slot {
    #[default]
    Empty,
    Tombstone,
    Occupied {
        key: Literal,
        value: Literal,
    },
}

#[derive(Debug, Clone)]
pub struct LiteralDictionary {
    slots: Vec<Slot>,
    contains: usize,
    count: usize,
}

impl Default for LiteralDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl LiteralDictionary {
    pub fn new() -> Self {
        Self {
            slots: empty_slots(INITIAL_CAPACITY),
            contains: 0,
            count: 0,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots that are occupied or tombstoned.
    pub fn contains(&self) -> usize {
        self.contains
    }

    /// Stores copies of `key` and `value`, replacing any previous value for `key`.
    ///
    /// Returns `true` when a new entry was created.
    pub fn set(&mut self, key: &Literal, value: &Literal) -> Result<bool, DictionaryError> {
        if let Err(err) = check_key(key) {
            tracing::error!("{err}");
            return Err(err);
        }

        if (self.contains + 1) * MAX_LOAD_DENOMINATOR > self.capacity() * MAX_LOAD_NUMERATOR {
            self.grow();
        }

        let index = probe(&self.slots, key, key.hash_value(), false)
            .unwrap_or_else(|| panic!("dictionary probe exhausted {} slots", self.slots.len()));

        match &mut self.slots[index] {
            Slot::Occupied { value: existing, .. } => {
                *existing = value.clone();
                Ok(false)
            }
            slot => {
                *slot = Slot::Occupied {
                    key: key.clone(),
                    value: value.clone(),
                };
                self.contains += 1;
                self.count += 1;
                Ok(true)
            }
        }
    }

    /// Returns a copy of the value stored for `key`, or `Null` when absent.
    pub fn get(&self, key: &Literal) -> Literal {
        if let Err(err) = check_key(key) {
            tracing::error!("{err}");
            return Literal::Null;
        }
        match probe(&self.slots, key, key.hash_value(), true).map(|index| &self.slots[index]) {
            Some(Slot::Occupied { value, .. }) => value.clone(),
            _ => Literal::Null,
        }
    }

    /// Replaces the entry for `key` with a tombstone. `contains` is left unchanged.
    pub fn remove(&mut self, key: &Literal) {
        if let Err(err) = check_key(key) {
            tracing::error!("{err}");
            return;
        }
        if let Some(index) = probe(&self.slots, key, key.hash_value(), true) {
            self.slots[index] = Slot::Tombstone;
            self.count -= 1;
        }
    }

    pub fn exists(&self, key: &Literal) -> bool {
        if check_key(key).is_err() {
            return false;
        }
        matches!(
            probe(&self.slots, key, key.hash_value(), true).map(|index| &self.slots[index]),
            Some(Slot::Occupied { .. })
        )
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&Literal, &Literal)> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { key, value } => Some((key, value)),
            _ => None,
        })
    }

    fn grow(&mut self) {
        let capacity = self.capacity() * 2;
        let old = std::mem::replace(&mut self.slots, empty_slots(capacity));
        for slot in old {
            if let Slot::Occupied { key, value } = slot {
                let index = probe(&self.slots, &key, key.hash_value(), false)
                    .unwrap_or_else(|| panic!("dictionary rehash found no free slot"));
                self.slots[index] = Slot::Occupied { key, value };
            }
        }
        tracing::trace!(
            capacity,
            count = self.count,
            reclaimed = self.contains - self.count,
            "dictionary grown"
        );
        self.contains = self.count;
    }
}

fn empty_slots(capacity: usize) -> Vec<Slot> {
    let mut slots = Vec::with_capacity(capacity);
    slots.resize_with(capacity, Slot::default);
    slots
}

/// Finds the slot holding `key`, or the first empty slot of its probe sequence when
/// `must_exist` is false. Tombstones are skipped in both cases.
fn probe(slots: &[Slot], key: &Literal, hash: u32, must_exist: bool) -> Option<usize> {
    let capacity = slots.len();
    let start = hash as usize % capacity;
    for offset in 0..capacity {
        let index = (start + offset) % capacity;
        match &slots[index] {
            Slot::Empty => return if must_exist { None } else { Some(index) },
            Slot::Tombstone => {}
            Slot::Occupied { key: existing, .. } => {
                if existing == key {
                    return Some(index);
                }
            }
        }
    }
    None
}

impl fmt::Display for LiteralDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, (key, value)) in self.entries().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            key.fmt_nested(f)?;
            write!(f, ": ")?;
            value.fmt_nested(f)?;
        }
        write!(f, "}}")
    }
}
