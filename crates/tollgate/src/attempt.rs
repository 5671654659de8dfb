// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;

/// One try of a call against the vendor.
///
/// Indexes are 0-based and strictly increase within a call.
///
/// ```
/// use tollgate::Attempt;
///
/// let first = Attempt::first(3);
/// assert!(first.is_first());
/// assert!(!first.is_last());
///
/// let last = first.next(3).and_then(|a| a.next(3)).unwrap();
/// assert_eq!(last.index(), 2);
/// assert!(last.is_last());
/// assert!(last.next(3).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attempt {
    index: u32,
    is_last: bool,
}

impl Attempt {
    /// The first attempt of a call allowed `max_attempts` attempts.
    #[must_use]
    pub fn first(max_attempts: u32) -> Self {
        Self {
            index: 0,
            is_last: max_attempts <= 1,
        }
    }

    /// The attempt after this one, or `None` when the budget is spent.
    #[must_use]
    pub fn next(self, max_attempts: u32) -> Option<Self> {
        let index = self.index.checked_add(1)?;
        if index >= max_attempts {
            return None;
        }

        Some(Self {
            index,
            is_last: index.saturating_add(1) >= max_attempts,
        })
    }

    /// 0-based index.
    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Number of attempts started so far, including this one.
    #[must_use]
    pub fn count(self) -> u32 {
        self.index.saturating_add(1)
    }

    /// Whether this is attempt 0.
    #[must_use]
    pub fn is_first(self) -> bool {
        self.index == 0
    }

    /// Whether no further attempt is allowed.
    #[must_use]
    pub fn is_last(self) -> bool {
        self.is_last
    }
}

impl Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.index.fmt(f)
    }
}
