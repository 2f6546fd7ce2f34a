//! Page, cursor and offset pagination
//!
//! Page totals come from a count query over the unpaginated state. The count
//! is cached against the SQL it was computed for, so re-paginating an
//! unchanged query never counts twice.

use crate::errors::QueryError;
use crate::query_builder::engine::impl_query_engine;
use crate::query_builder::fragment::SqlFragment;
use crate::query_builder::ordering::{OrderTerm, SortDirection};
use crate::query_builder::state::QueryState;
use crate::relation::Relation;
use crate::validation::ValidatedFieldName;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Resolved page position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationState {
    pub current_page: u64,
    pub per_page: u64,
    pub total_count: u64,
    pub total_pages: u64,
}

impl PaginationState {
    pub fn offset(&self) -> u64 {
        (self.current_page - 1) * self.per_page
    }

    pub fn has_next_page(&self) -> bool {
        self.current_page < self.total_pages
    }

    pub fn has_prev_page(&self) -> bool {
        self.current_page > 1
    }
}

/// Page metadata as handed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub current_page: u64,
    pub per_page: u64,
    pub total_count: u64,
    pub total_pages: u64,
    pub first_page: bool,
    pub last_page: bool,
    pub prev_page: Option<u64>,
    pub next_page: Option<u64>,
    pub offset: u64,
    pub limit: u64,
}

impl From<&PaginationState> for PageInfo {
    fn from(state: &PaginationState) -> Self {
        Self {
            current_page: state.current_page,
            per_page: state.per_page,
            total_count: state.total_count,
            total_pages: state.total_pages,
            first_page: state.current_page == 1,
            last_page: state.current_page >= state.total_pages,
            prev_page: state.has_prev_page().then(|| state.current_page - 1),
            next_page: state.has_next_page().then(|| state.current_page + 1),
            offset: state.offset(),
            limit: state.per_page,
        }
    }
}

/// Keyset pagination direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorDirection {
    /// Rows after the cursor, ascending
    Forward,
    /// Rows before the cursor, descending
    Backward,
}

pub struct PaginationEngine<R: Relation> {
    state: QueryState<R>,
    pagination: Option<PaginationState>,
    cached_count: Option<(String, u64)>,
}

impl_query_engine!(PaginationEngine);

impl<R: Relation> PaginationEngine<R> {
    pub fn new(state: QueryState<R>) -> Self {
        Self {
            state,
            pagination: None,
            cached_count: None,
        }
    }

    fn max_per_page(&self) -> u64 {
        u64::from(self.state.config().max_per_page.max(1))
    }

    fn clamp_per_page(&self, per_page: Option<i64>) -> u64 {
        let default = i64::from(self.state.config().default_per_page);
        let max = self.max_per_page();
        per_page.unwrap_or(default).clamp(1, max as i64) as u64
    }

    /// Apply LIMIT/OFFSET for `page` (at least 1, at most the last page) with
    /// `per_page` clamped into `[1, max_per_page]`
    pub async fn paginate(&mut self, page: Option<i64>, per_page: Option<i64>) -> Result<&mut Self, R::Error> {
        let per_page = self.clamp_per_page(per_page);
        let requested = page.unwrap_or(1).max(1) as u64;

        let total_count = self.total_count().await?;
        let total_pages = total_count.div_ceil(per_page);
        let current_page = requested.min(total_pages.max(1));

        let pagination = PaginationState {
            current_page,
            per_page,
            total_count,
            total_pages,
        };
        self.state.limit(per_page).offset(pagination.offset());
        self.pagination = Some(pagination);
        tracing::debug!(
            table = self.state.table_name(),
            page = current_page,
            per_page,
            total_pages,
            "paginated"
        );
        Ok(self)
    }

    /// Row count ignoring LIMIT/OFFSET, cached for the current filters
    pub async fn total_count(&mut self) -> Result<u64, R::Error> {
        let mut unpaged = self.state.copy();
        unpaged.clear_paging();
        let (key, _) = unpaged.to_sql();
        if let Some((cached_sql, count)) = &self.cached_count {
            if *cached_sql == key {
                return Ok(*count);
            }
        }
        let count = self.state.count_unpaginated().await?.max(0) as u64;
        self.cached_count = Some((key, count));
        Ok(count)
    }

    pub fn pagination_state(&self) -> Option<&PaginationState> {
        self.pagination.as_ref()
    }

    /// `None` until [`paginate`](Self::paginate) has run
    pub fn page_info(&self) -> Option<PageInfo> {
        self.pagination.as_ref().map(PageInfo::from)
    }

    pub fn has_next_page(&self) -> bool {
        self.pagination.is_some_and(|p| p.has_next_page())
    }

    pub fn has_prev_page(&self) -> bool {
        self.pagination.is_some_and(|p| p.has_prev_page())
    }

    /// Rows of the current page
    pub async fn records(&self) -> Result<Vec<R::Row>, R::Error> {
        self.state.all().await
    }

    /// Move to the next page and fetch it; empty when already on the last page
    pub async fn next_page_records(&mut self) -> Result<Vec<R::Row>, R::Error> {
        match self.pagination {
            Some(p) if p.has_next_page() => self.goto(p.current_page + 1, p.per_page).await,
            _ => Ok(Vec::new()),
        }
    }

    /// Move to the previous page and fetch it; empty when already on the first page
    pub async fn prev_page_records(&mut self) -> Result<Vec<R::Row>, R::Error> {
        match self.pagination {
            Some(p) if p.has_prev_page() => self.goto(p.current_page - 1, p.per_page).await,
            _ => Ok(Vec::new()),
        }
    }

    pub async fn first_page_records(&mut self) -> Result<Vec<R::Row>, R::Error> {
        let per_page = self.current_per_page();
        self.goto(1, per_page).await
    }

    pub async fn last_page_records(&mut self) -> Result<Vec<R::Row>, R::Error> {
        let per_page = self.current_per_page();
        // page is clamped down to the last page
        self.goto(u64::MAX, per_page).await
    }

    fn current_per_page(&self) -> u64 {
        self.pagination
            .map(|p| p.per_page)
            .unwrap_or_else(|| self.clamp_per_page(None))
    }

    async fn goto(&mut self, page: u64, per_page: u64) -> Result<Vec<R::Row>, R::Error> {
        let page = i64::try_from(page).unwrap_or(i64::MAX);
        let per_page = i64::try_from(per_page).unwrap_or(i64::MAX);
        self.paginate(Some(page), Some(per_page)).await?;
        self.state.all().await
    }

    /// RFC 5988 `Link` value with `first`, `prev`, `next` and `last` relations.
    /// Existing query parameters of `base_url` and `params` are kept.
    pub fn pagination_links(&self, base_url: &str, params: &[(&str, &str)]) -> Result<String, QueryError> {
        let Some(pagination) = self.pagination else {
            return Ok(String::new());
        };
        let last_page = pagination.total_pages.max(1);
        let mut relations = vec![("first", 1)];
        if pagination.has_prev_page() {
            relations.push(("prev", pagination.current_page - 1));
        }
        if pagination.has_next_page() {
            relations.push(("next", pagination.current_page + 1));
        }
        relations.push(("last", last_page));

        let mut links = Vec::with_capacity(relations.len());
        for (rel, page) in relations {
            let url = page_url(base_url, params, page, pagination.per_page)?;
            links.push(format!("<{}>; rel=\"{}\"", url, rel));
        }
        Ok(links.join(", "))
    }

    /// Numeric paging headers plus `Link`
    pub fn pagination_headers(
        &self,
        base_url: &str,
        params: &[(&str, &str)],
    ) -> Result<BTreeMap<&'static str, String>, QueryError> {
        let mut headers = BTreeMap::new();
        let Some(pagination) = self.pagination else {
            return Ok(headers);
        };
        headers.insert("X-Total-Count", pagination.total_count.to_string());
        headers.insert("X-Total-Pages", pagination.total_pages.to_string());
        headers.insert("X-Current-Page", pagination.current_page.to_string());
        headers.insert("X-Per-Page", pagination.per_page.to_string());
        headers.insert("Link", self.pagination_links(base_url, params)?);
        Ok(headers)
    }

    /// Up to `max_visible` page numbers centred on the current page, within `[1, total_pages]`
    pub fn page_numbers(&self, max_visible: u64) -> Vec<u64> {
        let Some(pagination) = self.pagination else {
            return Vec::new();
        };
        if max_visible == 0 || pagination.total_pages == 0 {
            return Vec::new();
        }
        let total = pagination.total_pages;
        let start = pagination
            .current_page
            .saturating_sub(max_visible / 2)
            .max(1);
        let end = (start + max_visible - 1).min(total);
        let start = end.saturating_sub(max_visible - 1).max(1);
        (start..=end).collect()
    }

    /// Keyset pagination: `field > cursor` ascending, or `field < cursor`
    /// descending when going backward. Without a cursor only the order and
    /// limit are applied.
    pub fn paginate_by_cursor(
        &mut self,
        cursor: Option<Value>,
        limit: i64,
        field: &str,
        direction: CursorDirection,
    ) -> &mut Self {
        let field = match ValidatedFieldName::new(field) {
            Ok(field) => field.into_string(),
            Err(err) => {
                self.state.record_error(err.into());
                return self;
            }
        };
        let limit = self.clamp_per_page(Some(limit));
        let (comparison, order) = match direction {
            CursorDirection::Forward => (">", SortDirection::Asc),
            CursorDirection::Backward => ("<", SortDirection::Desc),
        };
        if let Some(cursor) = cursor.filter(|c| !c.is_null()) {
            self.state
                .and_where_fragment(SqlFragment::bound(format!("{} {} ?", field, comparison), cursor));
        }
        self.state
            .lead_order(OrderTerm::new(field.clone(), SqlFragment::raw(field), order, None));
        self.state.clear_paging();
        self.state.limit(limit);
        self.pagination = None;
        self
    }

    /// Raw OFFSET/LIMIT without page bookkeeping; `limit` is still clamped
    pub fn paginate_by_offset(&mut self, offset: u64, limit: i64) -> &mut Self {
        let limit = self.clamp_per_page(Some(limit));
        self.state.limit(limit).offset(offset);
        self.pagination = None;
        self
    }
}

fn page_url(base_url: &str, params: &[(&str, &str)], page: u64, per_page: u64) -> Result<String, QueryError> {
    let mut url = Url::parse(base_url).map_err(|err| QueryError::InvalidUrl(err.to_string()))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "page" && key != "per_page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (key, value) in &kept {
            query.append_pair(key, value);
        }
        for (key, value) in params {
            if *key != "page" && *key != "per_page" {
                query.append_pair(key, value);
            }
        }
        query.append_pair("page", &page.to_string());
        query.append_pair("per_page", &per_page.to_string());
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::engine::QueryEngine;
    use crate::query_builder::tests::{counted, products};
    use serde_json::json;

    #[tokio::test]
    async fn test_paginate_third_page_of_25() {
        let mut engine = PaginationEngine::new(counted("products", 25));
        engine.paginate(Some(3), Some(10)).await.unwrap();

        let info = engine.page_info().unwrap();
        assert_eq!(info.current_page, 3);
        assert_eq!(info.total_pages, 3);
        assert_eq!(info.offset, 20);
        assert_eq!(info.limit, 10);
        assert!(info.last_page);
        assert_eq!(info.prev_page, Some(2));
        assert_eq!(info.next_page, None);
        assert_eq!(engine.to_sql().0, "SELECT * FROM products LIMIT 10 OFFSET 20");
    }

    #[tokio::test]
    async fn test_page_overflow_clamps_to_last() {
        let mut engine = PaginationEngine::new(counted("products", 25));
        engine.paginate(Some(99), Some(10)).await.unwrap();
        assert_eq!(engine.page_info().unwrap().current_page, 3);

        engine.paginate(Some(-4), Some(10)).await.unwrap();
        assert_eq!(engine.page_info().unwrap().current_page, 1);
    }

    #[tokio::test]
    async fn test_per_page_bounds() {
        let mut engine = PaginationEngine::new(counted("products", 1000));
        engine.paginate(Some(1), Some(10_000)).await.unwrap();
        assert_eq!(engine.page_info().unwrap().per_page, 100);

        engine.paginate(Some(1), Some(0)).await.unwrap();
        assert_eq!(engine.page_info().unwrap().per_page, 1);

        engine.paginate(None, None).await.unwrap();
        assert_eq!(engine.page_info().unwrap().per_page, 25);
    }

    #[tokio::test]
    async fn test_page_invariants_hold_for_any_input() {
        for total in [0_i64, 1, 25, 101] {
            let mut engine = PaginationEngine::new(counted("products", total));
            for page in [-1, 0, 1, 2, 7, 500] {
                for per_page in [-5, 0, 1, 10, 100, 101] {
                    engine.paginate(Some(page), Some(per_page)).await.unwrap();
                    let p = *engine.pagination_state().unwrap();
                    assert!(p.current_page >= 1 && p.current_page <= p.total_pages.max(1));
                    assert!(p.per_page >= 1 && p.per_page <= 100);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_count_is_cached_for_unchanged_query() {
        let state = counted("products", 25);
        let relation = state.relation().clone();
        let mut engine = PaginationEngine::new(state);
        engine.paginate(Some(1), Some(10)).await.unwrap();
        engine.paginate(Some(2), Some(10)).await.unwrap();
        assert_eq!(relation.calls().len(), 1);

        engine.state_mut().and_where("status = ?", vec![json!("active")]);
        engine.paginate(Some(1), Some(10)).await.unwrap();
        assert_eq!(relation.calls().len(), 2);
        assert!(relation.calls()[1].0.starts_with("SELECT COUNT(*) FROM (SELECT * FROM products WHERE"));
    }

    #[tokio::test]
    async fn test_links_headers_and_window() {
        let mut engine = PaginationEngine::new(counted("products", 95));
        engine.paginate(Some(5), Some(10)).await.unwrap();

        let links = engine
            .pagination_links("https://shop.example/products?page=9&q=lamp", &[("sort", "-price")])
            .unwrap();
        assert_eq!(
            links,
            "<https://shop.example/products?q=lamp&sort=-price&page=1&per_page=10>; rel=\"first\", \
             <https://shop.example/products?q=lamp&sort=-price&page=4&per_page=10>; rel=\"prev\", \
             <https://shop.example/products?q=lamp&sort=-price&page=6&per_page=10>; rel=\"next\", \
             <https://shop.example/products?q=lamp&sort=-price&page=10&per_page=10>; rel=\"last\""
        );

        let headers = engine.pagination_headers("https://shop.example/products", &[]).unwrap();
        assert_eq!(headers["X-Total-Count"], "95");
        assert_eq!(headers["X-Total-Pages"], "10");
        assert_eq!(headers["X-Current-Page"], "5");

        assert_eq!(engine.page_numbers(5), vec![3, 4, 5, 6, 7]);
        assert!(matches!(
            engine.pagination_links("not a url", &[]),
            Err(QueryError::InvalidUrl(_))
        ));

        engine.paginate(Some(10), Some(10)).await.unwrap();
        assert_eq!(engine.page_numbers(5), vec![6, 7, 8, 9, 10]);
        engine.paginate(Some(1), Some(10)).await.unwrap();
        assert_eq!(engine.page_numbers(4), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_navigation_re_executes() {
        let state = counted("products", 25);
        let relation = state.relation().clone();
        let mut engine = PaginationEngine::new(state);
        engine.paginate(Some(1), Some(10)).await.unwrap();

        engine.next_page_records().await.unwrap();
        assert_eq!(engine.page_info().unwrap().current_page, 2);
        engine.last_page_records().await.unwrap();
        assert_eq!(engine.page_info().unwrap().current_page, 3);
        assert!(engine.next_page_records().await.unwrap().is_empty());
        engine.first_page_records().await.unwrap();
        assert_eq!(engine.page_info().unwrap().current_page, 1);

        let calls = relation.calls();
        assert_eq!(calls.last().unwrap().0, "SELECT * FROM products LIMIT 10 OFFSET 0");
    }

    #[test]
    fn test_cursor_pagination() {
        let mut engine = PaginationEngine::new(products());
        engine.paginate_by_cursor(Some(json!(120)), 20, "id", CursorDirection::Backward);

        let (sql, params) = engine.to_sql();
        assert_eq!(sql, "SELECT * FROM products WHERE id < $1 ORDER BY id DESC LIMIT 20");
        assert_eq!(params, vec![json!(120)]);

        let mut engine = PaginationEngine::new(products());
        engine.paginate_by_cursor(None, 500, "id", CursorDirection::Forward);
        assert_eq!(engine.to_sql().0, "SELECT * FROM products ORDER BY id ASC LIMIT 100");
    }

    #[test]
    fn test_cursor_field_leads_existing_order() {
        let mut state = products();
        state
            .order_by("name", SortDirection::Asc, None)
            .order_by("id", SortDirection::Desc, None);
        let mut engine = PaginationEngine::new(state);
        engine.paginate_by_cursor(Some(json!(40)), 20, "id", CursorDirection::Forward);

        assert_eq!(
            engine.to_sql().0,
            "SELECT * FROM products WHERE id > $1 ORDER BY id ASC, name ASC LIMIT 20"
        );
    }

    #[test]
    fn test_offset_pagination() {
        let mut engine = PaginationEngine::new(products());
        engine.paginate_by_offset(40, 15);
        assert_eq!(engine.to_sql().0, "SELECT * FROM products LIMIT 15 OFFSET 40");
        assert!(engine.page_info().is_none());
    }
}
