use rocket::FromForm;
use serde::{Deserialize, Serialize};

/// Query parameters selecting one page of a listing. Pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromForm)]
pub struct PaginationRequest {
    #[field(default = 1, validate = range(1..))]
    page_num: u32,
    #[field(default = 50, validate = range(1..=500))]
    page_size: u32,
}

impl PaginationRequest {
    /// Panics if either argument is zero.
    #[cfg(test)]
    pub fn new(page_num: u32, page_size: u32) -> Self {
        assert!(page_num > 0 && page_size > 0, "pages are numbered from 1");
        Self {
            page_num,
            page_size,
        }
    }

    pub fn page_num(&self) -> u32 {
        self.page_num
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// How many items come before this page.
    pub fn skip(&self) -> u64 {
        u64::from(self.page_num - 1) * u64::from(self.page_size)
    }

    /// Wrap up the items of this page.
    pub fn to_paginated<T>(&self, total: u64, items: Vec<T>) -> Paginated<T> {
        Paginated {
            items,
            pagination: PaginationResult {
                page_num: self.page_num,
                page_size: self.page_size,
                total,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationResult {
    pub page_num: u32,
    pub page_size: u32,
    /// Number of items across all pages.
    pub total: u64,
}

/// One page of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: PaginationResult,
}
