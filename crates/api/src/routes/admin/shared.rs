//! Shared query and response types for admin routes

use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_LIMIT: i64 = 50;
const MAX_PAGE_LIMIT: i64 = 200;
const DEFAULT_REPORT_DAYS: u32 = 30;
const MAX_REPORT_DAYS: u32 = 365;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    /// `(limit, offset)` clamped to sane bounds
    pub fn bounds(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    /// Rows in this page
    pub total: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub days: Option<u32>,
}

impl WindowQuery {
    pub fn days(&self) -> u32 {
        self.days
            .unwrap_or(DEFAULT_REPORT_DAYS)
            .clamp(1, MAX_REPORT_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds() {
        assert_eq!(PageQuery::default().bounds(), (50, 0));
        let query = PageQuery {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(query.bounds(), (200, 0));
    }

    #[test]
    fn test_window_days() {
        assert_eq!(WindowQuery::default().days(), 30);
        assert_eq!(WindowQuery { days: Some(0) }.days(), 1);
        assert_eq!(WindowQuery { days: Some(900) }.days(), 365);
    }
}
