//! Page windows for paged lookups.
//!
//! Page indices are 1-based, but an index of 0 (or anything below 1) is
//! also read as the first page. Callers that page from zero therefore see
//! the first page twice when they step from 0 to 1.

use crate::value::Bindings;

/// Inclusive 1-based `[start, end]` record window for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    start: i64,
    end: i64,
}

impl PageWindow {
    pub fn new(page_index: i64, page_size: i64) -> Self {
        if page_size <= 0 {
            return Self { start: 1, end: 0 };
        }
        if page_index <= 1 {
            return Self {
                start: 1,
                end: page_size,
            };
        }
        let end = page_size.saturating_mul(page_index);
        Self {
            start: end - page_size + 1,
            end,
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Number of records the window covers.
    pub fn limit(&self) -> i64 {
        (self.end - self.start + 1).max(0)
    }

    /// Zero-based offset of the first record.
    pub fn offset(&self) -> i64 {
        self.start - 1
    }

    pub fn is_empty(&self) -> bool {
        self.limit() == 0
    }

    /// Add `$start` and `$end` to `bindings`.
    ///
    /// Templates consume them as `LIMIT $end - $start + 1 OFFSET $start - 1`.
    #[must_use]
    pub fn bind(&self, bindings: Bindings) -> Bindings {
        bindings.bind("start", self.start).bind("end", self.end)
    }
}
