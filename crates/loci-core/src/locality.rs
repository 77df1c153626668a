// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Locality identifiers and ranges.
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Identifier of one partition/execution domain.
///
/// Localities are totally ordered by their numeric value. [`Locality::NULL`]
/// (all ones) denotes "no locality" and never names a live partition.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Locality(u32);

impl Locality {
    /// The "no locality" sentinel.
    pub const NULL: Self = Self(u32::MAX);

    /// Wraps a raw locality number.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw locality number.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the locality number as an index into per-locality tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// True for [`Locality::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for Locality {
    fn default() -> Self {
        Self::NULL
    }
}

impl From<u32> for Locality {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Debug for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Locality(null)")
        } else {
            write!(f, "Locality({})", self.0)
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("L-")
        } else {
            write!(f, "L{}", self.0)
        }
    }
}

/// The contiguous set of localities `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalityRange {
    start: u32,
    end: u32,
}

impl LocalityRange {
    /// All localities of a runtime with `count` localities.
    pub const fn all(count: u32) -> Self {
        Self {
            start: 0,
            end: count,
        }
    }

    /// Number of localities in the range.
    pub const fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// True when the range holds no locality.
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True when `locality` falls inside the range.
    pub const fn contains(&self, locality: Locality) -> bool {
        !locality.is_null() && locality.0 >= self.start && locality.0 < self.end
    }

    /// First locality, if any.
    pub const fn first(&self) -> Option<Locality> {
        if self.is_empty() {
            None
        } else {
            Some(Locality(self.start))
        }
    }

    /// Last locality, if any.
    pub const fn last(&self) -> Option<Locality> {
        if self.is_empty() {
            None
        } else {
            Some(Locality(self.end - 1))
        }
    }

    /// Iterates localities in ascending order.
    pub fn iter(&self) -> LocalityIter {
        LocalityIter {
            inner: self.start..self.end,
        }
    }
}

impl IntoIterator for LocalityRange {
    type Item = Locality;
    type IntoIter = LocalityIter;

    fn into_iter(self) -> LocalityIter {
        self.iter()
    }
}

impl IntoIterator for &LocalityRange {
    type Item = Locality;
    type IntoIter = LocalityIter;

    fn into_iter(self) -> LocalityIter {
        self.iter()
    }
}

/// Ascending iterator over a [`LocalityRange`].
#[derive(Clone, Debug)]
pub struct LocalityIter {
    inner: Range<u32>,
}

impl Iterator for LocalityIter {
    type Item = Locality;

    fn next(&mut self) -> Option<Locality> {
        self.inner.next().map(Locality)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for LocalityIter {
    fn next_back(&mut self) -> Option<Locality> {
        self.inner.next_back().map(Locality)
    }
}

impl ExactSizeIterator for LocalityIter {}
