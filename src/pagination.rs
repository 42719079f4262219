use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// `page`/`limit` query parameters. Both are 1-based and clamped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn skip(&self) -> i64 {
        let page = self.page.unwrap_or(1).max(1);
        (page - 1).saturating_mul(self.limit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_items: i64,
    /// 0 when there is no next page.
    pub next_page: i64,
    /// 0 when there is no previous page.
    pub previous_page: i64,
    pub per_page: i64,
}

impl PaginationMeta {
    pub fn new(skip: i64, take: i64, total: i64) -> Self {
        let take = take.max(1);
        let current_page = skip / take + 1;
        let total_pages = (total + take - 1) / take;
        Self {
            current_page,
            total_pages,
            total_items: total,
            next_page: if current_page < total_pages { current_page + 1 } else { 0 },
            previous_page: if current_page > 1 { current_page - 1 } else { 0 },
            per_page: take,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}
