//! Pagination contract shared by every list-style query

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::error::{AppError, Result};
use crate::storage::Window;

/// Bounds applied when normalizing a page request.
///
/// Always satisfies `1 <= default_size <= max_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    default_size: i64,
    max_size: i64,
}

impl PageLimits {
    pub fn new(default_size: i64, max_size: i64) -> Result<Self> {
        if default_size < 1 || max_size < 1 {
            return Err(AppError::validation("page sizes must be at least 1"));
        }
        if default_size > max_size {
            return Err(AppError::validation(format!(
                "default page size {default_size} exceeds maximum page size {max_size}"
            )));
        }
        Ok(Self {
            default_size,
            max_size,
        })
    }

    /// Bring arbitrary sizes into range instead of rejecting them
    pub(crate) fn clamped(default_size: i64, max_size: i64) -> Self {
        let max_size = max_size.max(1);
        Self {
            default_size: default_size.clamp(1, max_size),
            max_size,
        }
    }

    pub fn default_size(&self) -> i64 {
        self.default_size
    }

    pub fn max_size(&self) -> i64 {
        self.max_size
    }
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_PAGE_SIZE,
            max_size: MAX_PAGE_SIZE,
        }
    }
}

/// Requested page, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: i64,
    pub size: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: i64, size: i64) -> Self {
        Self { page, size }
    }

    /// Coerce page below 1 to 1, and a size that is not positive or exceeds
    /// the maximum to the default. Normalizing twice changes nothing.
    pub fn normalize(self, limits: PageLimits) -> Self {
        let page = self.page.max(1);
        let size = if self.size <= 0 || self.size > limits.max_size {
            limits.default_size
        } else {
            self.size
        };
        Self { page, size }
    }

    /// Offset of the first item; never negative once normalized
    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0).saturating_mul(self.size)
    }

    pub fn limit(&self) -> i64 {
        self.size
    }

    pub fn window(&self) -> Window {
        Window::new(self.offset(), self.limit())
    }
}

/// Totals describing one page of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub total: i64,
    pub page: i64,
    pub size: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PageInfo {
    /// Derive page totals from a normalized request and the count query result
    pub fn new(request: PageRequest, total: i64) -> Self {
        let total = total.max(0);
        let total_pages = if total == 0 || request.size <= 0 {
            0
        } else {
            (total + request.size - 1) / request.size
        };
        Self {
            total,
            page: request.page,
            size: request.size,
            total_pages,
            has_next: request.page < total_pages,
            has_previous: request.page > 1,
        }
    }
}

/// One page of records plus its totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub info: PageInfo,
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            info: self.info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_coerces_out_of_range_values() {
        let limits = PageLimits::default();
        assert_eq!(PageRequest::new(0, 0).normalize(limits), PageRequest::new(1, 20));
        assert_eq!(PageRequest::new(-3, -1).normalize(limits), PageRequest::new(1, 20));
        assert_eq!(PageRequest::new(2, 500).normalize(limits), PageRequest::new(2, 20));
        assert_eq!(PageRequest::new(4, 100).normalize(limits), PageRequest::new(4, 100));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let limits = PageLimits::new(15, 50).unwrap();
        for page in [-10, -1, 0, 1, 2, 7, i64::MAX] {
            for size in [i64::MIN, -1, 0, 1, 15, 50, 51, 10_000] {
                let once = PageRequest::new(page, size).normalize(limits);
                assert_eq!(once.normalize(limits), once, "page={page} size={size}");
                assert!(once.offset() >= 0);
            }
        }
    }

    #[test]
    fn test_limits_reject_default_above_max() {
        let err = PageLimits::new(500, 100).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(PageLimits::new(0, 100).is_err());
        assert!(PageLimits::new(100, 100).is_ok());
    }

    #[test]
    fn test_normalized_size_never_exceeds_max() {
        let limits = PageLimits::clamped(500, 100);
        assert_eq!(limits.default_size(), 100);
        for size in [i64::MIN, 0, 1, 100, 101, 1000] {
            let request = PageRequest::new(1, size).normalize(limits);
            assert!(request.size >= 1 && request.size <= 100, "size={size}");
        }
    }

    #[test]
    fn test_page_info_totals() {
        let info = PageInfo::new(PageRequest::new(1, 10), 25);
        assert_eq!(info.total_pages, 3);
        assert!(info.has_next);
        assert!(!info.has_previous);

        let info = PageInfo::new(PageRequest::new(3, 10), 25);
        assert!(!info.has_next);
        assert!(info.has_previous);

        let info = PageInfo::new(PageRequest::new(1, 10), 0);
        assert_eq!(info.total_pages, 0);
        assert!(!info.has_next);
    }

    #[test]
    fn test_offset_derivation() {
        let request = PageRequest::new(3, 10);
        assert_eq!(request.offset(), 20);
        assert_eq!(request.window(), Window::new(20, 10));
    }
}
