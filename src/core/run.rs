//! Half-open index ranges
//!
//! A [`Run`] names a contiguous span of array indices `[begin, end)`. The
//! upper bound may be absent, meaning the run extends past the last index
//! that was examined. Damage reports carry runs so that a bad region of a
//! million entries is one value rather than a million.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Sub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Run<T> {
    begin: T,
    end: Option<T>,
}

impl<T: Copy + Ord> Run<T> {
    /// Closed run `[begin, end)`.
    ///
    /// # Panics
    ///
    /// Panics if `begin > end`.
    pub fn new(begin: T, end: T) -> Self {
        assert!(begin <= end, "run begins after it ends");
        Run {
            begin,
            end: Some(end),
        }
    }

    /// Open-ended run `[begin, ..)`.
    pub fn new_open(begin: T) -> Self {
        Run { begin, end: None }
    }

    pub fn begin(&self) -> T {
        self.begin
    }

    pub fn end(&self) -> Option<T> {
        self.end
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn contains(&self, index: T) -> bool {
        index >= self.begin && self.end.map_or(true, |end| index < end)
    }

    /// Join two runs that touch or overlap.
    ///
    /// Returns `None` when there is a gap between them.
    pub fn merge(&self, other: &Run<T>) -> Option<Run<T>> {
        let (lo, hi) = if self.begin <= other.begin {
            (self, other)
        } else {
            (other, self)
        };

        match lo.end {
            Some(end) if end < hi.begin => None,
            Some(end) => Some(Run {
                begin: lo.begin,
                end: hi.end.map(|hi_end| hi_end.max(end)),
            }),
            None => Some(Run {
                begin: lo.begin,
                end: None,
            }),
        }
    }
}

impl Run<u32> {
    pub fn single(index: u32) -> Self {
        Run::new(index, index.saturating_add(1))
    }
}

impl<T: Copy + Ord + Sub<Output = T>> Run<T> {
    /// Number of indices covered, `None` for open-ended runs.
    pub fn len(&self) -> Option<T> {
        self.end.map(|end| end - self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.end.map_or(false, |end| end == self.begin)
    }
}

impl<T: Copy + Ord> PartialOrd for Run<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Copy + Ord> Ord for Run<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.begin.cmp(&other.begin).then_with(|| match (self.end, other.end) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
    }
}

impl<T: fmt::Display> fmt::Display for Run<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.end {
            Some(end) => write!(f, "{}..{}", self.begin, end),
            None => write!(f, "{}..", self.begin),
        }
    }
}
