//! AbstractRecord - the universal payload exchanged by every peer
//!
//! A record is three independent arrays: `ints`, `doubles` and `chars`
//! (raw bytes, not necessarily terminated). Observations, actions and
//! multi-objective rewards are all records; a reward keeps one double per
//! objective.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IntegrityError;
use crate::MAX_RECORD_FIELD_LEN;

/// Arrays at least this long are summarised instead of printed
const DISPLAY_LIMIT: usize = 100;

/// Variable-shaped numeric payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbstractRecord {
    pub ints: Vec<i32>,
    pub doubles: Vec<f64>,
    pub chars: Vec<u8>,
}

/// Observation from an Environment
pub type Observation = AbstractRecord;

/// Action chosen by an Agent
pub type Action = AbstractRecord;

/// Reward vector, one double per objective
pub type Reward = AbstractRecord;

impl AbstractRecord {
    /// Create a record from its three arrays
    pub fn new(ints: Vec<i32>, doubles: Vec<f64>, chars: Vec<u8>) -> Self {
        Self {
            ints,
            doubles,
            chars,
        }
    }

    /// Create a zero-filled record with the given array lengths
    pub fn allocate(num_ints: usize, num_doubles: usize, num_chars: usize) -> Self {
        Self {
            ints: vec![0; num_ints],
            doubles: vec![0.0; num_doubles],
            chars: vec![0; num_chars],
        }
    }

    /// Record with only doubles, the usual shape of a reward
    pub fn from_doubles(doubles: Vec<f64>) -> Self {
        Self {
            doubles,
            ..Self::default()
        }
    }

    /// Whether all three arrays are empty
    pub fn is_empty(&self) -> bool {
        self.ints.is_empty() && self.doubles.is_empty() && self.chars.is_empty()
    }

    /// Copy `src` into `self`.
    ///
    /// Only arrays whose length changes get new storage; the others are
    /// overwritten in place.
    pub fn replace(&mut self, src: &AbstractRecord) {
        replace_array(&mut self.ints, &src.ints);
        replace_array(&mut self.doubles, &src.doubles);
        replace_array(&mut self.chars, &src.chars);
    }

    /// Release all three arrays
    pub fn clear(&mut self) {
        self.ints = Vec::new();
        self.doubles = Vec::new();
        self.chars = Vec::new();
    }

    /// Drop current contents and resize every array to the given lengths,
    /// zero-filled.
    pub fn reallocate(&mut self, num_ints: usize, num_doubles: usize, num_chars: usize) {
        *self = Self::allocate(num_ints, num_doubles, num_chars);
    }

    /// Resize every array to the given lengths, keeping storage whose
    /// capacity already suffices. Contents are zeroed.
    pub fn resize_reusing(&mut self, num_ints: usize, num_doubles: usize, num_chars: usize) {
        reset_array(&mut self.ints, num_ints);
        reset_array(&mut self.doubles, num_doubles);
        reset_array(&mut self.chars, num_chars);
    }

    /// Reject arrays longer than [`MAX_RECORD_FIELD_LEN`].
    ///
    /// Lengths above the ceiling only appear when a stream was corrupted
    /// upstream, so a failing record must never be put on the wire.
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        let ceiling = MAX_RECORD_FIELD_LEN;
        if self.ints.len() > ceiling as usize {
            return Err(IntegrityError::TooManyInts {
                count: self.ints.len(),
                ceiling,
            });
        }
        if self.doubles.len() > ceiling as usize {
            return Err(IntegrityError::TooManyDoubles {
                count: self.doubles.len(),
                ceiling,
            });
        }
        if self.chars.len() > ceiling as usize {
            return Err(IntegrityError::TooManyChars {
                count: self.chars.len(),
                ceiling,
            });
        }
        Ok(())
    }

    /// Bytes taken by the array bodies on the wire, header excluded
    pub fn body_len(&self) -> usize {
        self.ints.len() * 4 + self.doubles.len() * 8 + self.chars.len()
    }
}

fn replace_array<T: Copy>(dst: &mut Vec<T>, src: &[T]) {
    if dst.len() == src.len() {
        dst.copy_from_slice(src);
    } else {
        *dst = src.to_vec();
    }
}

fn reset_array<T: Copy + Default>(dst: &mut Vec<T>, len: usize) {
    dst.clear();
    dst.resize(len, T::default());
}

impl fmt::Display for AbstractRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ints: {}", self.ints.len())?;
        if self.ints.len() < DISPLAY_LIMIT {
            for (i, v) in self.ints.iter().enumerate() {
                writeln!(f, "\tint[{}] = {}", i, v)?;
            }
        }
        writeln!(f, "Doubles: {}", self.doubles.len())?;
        if self.doubles.len() < DISPLAY_LIMIT {
            for (i, v) in self.doubles.iter().enumerate() {
                writeln!(f, "\tdouble[{}] = {}", i, v)?;
            }
        }
        write!(f, "Chars: {}", self.chars.len())?;
        if self.chars.len() < DISPLAY_LIMIT {
            for (i, v) in self.chars.iter().enumerate() {
                write!(f, "\n\tchar[{}] = {}", i, char::from(*v))?;
            }
        }
        Ok(())
    }
}
