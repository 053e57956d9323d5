//! Pagination options, stopping policies and the accumulated fetch result

use std::sync::Arc;

use harvest_core::HarvestError;
use serde_json::Value;

/// What a policy sees after each page.
#[derive(Debug)]
pub struct PageView<'a> {
    pub page: u32,
    pub requested_size: usize,
    pub item_count: usize,
    pub body: &'a Value,
}

/// Decides whether another page should be requested.
pub trait PaginationPolicy: Send + Sync + std::fmt::Debug {
    fn has_more(&self, page: &PageView<'_>) -> bool;
}

/// Whether a next-link value means "there is another page".
fn link_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Default policy: stop on an empty page or a short page; when a next-link
/// pointer is configured and the body carries it, stop on a null/empty link.
/// Bodies without the metadata fall back to the full-page check alone.
#[derive(Debug, Clone, Default)]
pub struct FullPageHeuristic {
    /// JSON pointer to the next-page indicator, e.g. `/links/next`
    pub next_link_pointer: Option<String>,
}

impl PaginationPolicy for FullPageHeuristic {
    fn has_more(&self, page: &PageView<'_>) -> bool {
        if page.item_count == 0 || page.item_count < page.requested_size {
            return false;
        }
        match self
            .next_link_pointer
            .as_deref()
            .and_then(|p| page.body.pointer(p))
        {
            Some(link) => link_present(link),
            None => true,
        }
    }
}

/// Page size alone decides; tolerates APIs with stale next links.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortPageOnly;

impl PaginationPolicy for ShortPageOnly {
    fn has_more(&self, page: &PageView<'_>) -> bool {
        page.item_count > 0 && page.item_count >= page.requested_size
    }
}

/// Next link alone decides; tolerates APIs that return short non-final pages.
#[derive(Debug, Clone)]
pub struct NextLinkOnly {
    pub pointer: String,
}

impl PaginationPolicy for NextLinkOnly {
    fn has_more(&self, page: &PageView<'_>) -> bool {
        page.item_count > 0 && page.body.pointer(&self.pointer).is_some_and(link_present)
    }
}

/// What `fetch_all` does when one page fails after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageErrorPolicy {
    /// Return what was collected so far
    Stop,
    /// Move on to the next page; give up after `max_consecutive` failures in a row
    Skip { max_consecutive: u32 },
}

/// Options for [`RateLimitedCachingClient::fetch_all`](crate::RateLimitedCachingClient::fetch_all).
#[derive(Debug, Clone)]
pub struct FetchAllOptions {
    pub page_param: String,
    pub size_param: String,
    pub page_size: usize,
    pub first_page: u32,
    /// Runaway guard; reaching it logs a warning, not an error
    pub max_pages: u32,
    /// JSON pointer to the items array; `None` expects a top-level array
    pub items_pointer: Option<String>,
    pub policy: Arc<dyn PaginationPolicy>,
    pub on_page_error: PageErrorPolicy,
    pub use_cache: bool,
}

impl Default for FetchAllOptions {
    fn default() -> Self {
        Self {
            page_param: "page".to_string(),
            size_param: "page_size".to_string(),
            page_size: 100,
            first_page: 1,
            max_pages: 10_000,
            items_pointer: None,
            policy: Arc::new(FullPageHeuristic::default()),
            on_page_error: PageErrorPolicy::Stop,
            use_cache: true,
        }
    }
}

impl FetchAllOptions {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_items_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.items_pointer = Some(pointer.into());
        self
    }

    pub fn with_policy(mut self, policy: impl PaginationPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_page_error_policy(mut self, policy: PageErrorPolicy) -> Self {
        self.on_page_error = policy;
        self
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.page_size == 0 {
            return Err(HarvestError::validation("page_size must be > 0"));
        }
        if self.page_param.is_empty() || self.page_param == self.size_param {
            return Err(HarvestError::validation(format!(
                "page_param {:?} must be non-empty and differ from size_param",
                self.page_param
            )));
        }
        Ok(())
    }
}

/// Pull the items array out of a page body.
pub fn extract_items(body: &Value, pointer: Option<&str>) -> Result<Vec<Value>, HarvestError> {
    let target = match pointer {
        Some(p) => body
            .pointer(p)
            .ok_or_else(|| HarvestError::Decode(format!("no value at {p}")))?,
        None => body,
    };
    match target {
        Value::Array(items) => Ok(items.clone()),
        other => Err(HarvestError::Decode(format!(
            "expected items array at {}, found {}",
            pointer.unwrap_or("/"),
            kind(other)
        ))),
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Items accumulated across pages, in page order.
#[derive(Debug, Default)]
pub struct PagedResult {
    pub items: Vec<Value>,
    pub pages_fetched: u32,
    /// Pages that failed after retries, with their final error
    pub failed_pages: Vec<(u32, HarvestError)>,
    /// The pagination policy signalled the end
    pub complete: bool,
    pub hit_max_pages: bool,
}

impl PagedResult {
    /// Items if every page succeeded, else the first page error.
    pub fn into_items(self) -> Result<Vec<Value>, HarvestError> {
        match self.failed_pages.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(self.items),
        }
    }
}
