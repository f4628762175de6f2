//! Pagination contract
//!
//! `?page≥1&limit∈[1,100]`; out-of-range values are clamped, not rejected.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, request: PageRequest) -> Self {
        let total_pages = ((total + u64::from(request.limit) - 1) / u64::from(request.limit)) as u32;
        Self {
            data,
            pagination: PageInfo {
                page: request.page,
                limit: request.limit,
                total,
                total_pages,
            },
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_values() {
        let req = PageRequest::new(Some(0), Some(500));
        assert_eq!(req.page, 1);
        assert_eq!(req.limit, MAX_LIMIT);

        let req = PageRequest::new(None, Some(0));
        assert_eq!(req.limit, 1);
    }

    #[test]
    fn computes_offset_and_total_pages() {
        let req = PageRequest::new(Some(3), Some(10));
        assert_eq!(req.offset(), 20);

        let page = Paginated::new(vec![1, 2, 3], 23, req);
        assert_eq!(page.pagination.total_pages, 3);
        assert_eq!(page.pagination.total, 23);
    }

    #[test]
    fn zero_total_has_zero_pages() {
        let page: Paginated<u8> = Paginated::new(vec![], 0, PageRequest::default());
        assert_eq!(page.pagination.total_pages, 0);
    }
}
