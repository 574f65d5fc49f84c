//! Pagination types
//!
//! Defines the page envelope, the declared paging constraints of an
//! operation, and the page-budget arithmetic shared by all iterators.

use crate::error::{Error, Result};
use crate::types::{JsonValue, Warning};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

// ============================================================================
// Pagination Limits
// ============================================================================

/// Declared paging constraints of one paged operation.
///
/// Attached statically to every fetcher (see
/// [`PageFetcher::limits`](super::PageFetcher::limits)); an operation
/// without meaningful limits cannot be paginated and fails at iterator
/// construction rather than at the first fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationLimits {
    /// Maximum page size the operation accepts. Always >= 1.
    pub max_limit: u32,
    /// Maximum offset the operation accepts.
    pub max_offset: u64,
}

impl PaginationLimits {
    /// Create validated limits
    pub fn new(max_limit: u32, max_offset: u64) -> Result<Self> {
        if max_limit == 0 {
            return Err(Error::pagination_contract("max_limit must be at least 1"));
        }
        Ok(Self {
            max_limit,
            max_offset,
        })
    }
}

// ============================================================================
// Page Request
// ============================================================================

/// One page request handed to a fetcher.
///
/// `start` and `to` are only populated in timestamp-cursor mode and pass
/// through to the operation unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageRequest {
    /// Item offset of the requested page
    pub offset: u64,
    /// Requested page size
    pub limit: u32,
    /// Lower window bound (unix ms), timestamp mode only
    pub start: Option<i64>,
    /// Upper window bound (unix ms, inclusive of `to - 1`), timestamp mode only
    pub to: Option<i64>,
}

// ============================================================================
// Page Envelope
// ============================================================================

/// A raw page as the wire carries it.
///
/// Field names are bit-exact: `items`, `start`, `end`, `from`, `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEnvelope {
    /// The page's items
    pub items: Vec<JsonValue>,
    /// Page offset echoed back by the server
    pub start: u64,
    /// Page size echoed back by the server
    pub end: u64,
    /// Oldest item timestamp in the page (unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<i64>,
    /// Newest item timestamp in the page (unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<i64>,
}

impl PageEnvelope {
    /// Number of items in the page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the page carries no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The `from` boundary as a UTC datetime, when present and valid
    pub fn from_datetime(&self) -> Option<DateTime<Utc>> {
        self.from.and_then(DateTime::from_timestamp_millis)
    }

    /// The `to` boundary as a UTC datetime, when present and valid
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        self.to.and_then(DateTime::from_timestamp_millis)
    }

    /// Decode the page's items into a model type.
    ///
    /// Items that fail to decode are dropped and reported as warnings;
    /// the rest of the page is kept.
    pub fn decode<T: DeserializeOwned>(&self) -> (ItemPage<T>, Vec<Warning>) {
        let mut items = Vec::with_capacity(self.items.len());
        let mut warnings = Vec::new();
        for (index, raw) in self.items.iter().enumerate() {
            match serde_json::from_value::<T>(raw.clone()) {
                Ok(item) => items.push(item),
                Err(e) => warnings.push(Warning::ItemDecode {
                    index,
                    message: e.to_string(),
                }),
            }
        }
        if !warnings.is_empty() {
            warn!(
                dropped = warnings.len(),
                "dropping page items that failed to decode"
            );
        }
        (
            ItemPage {
                items,
                start: self.start,
                end: self.end,
                from: self.from,
                to: self.to,
            },
            warnings,
        )
    }
}

/// A page decoded into a model type, same envelope semantics as
/// [`PageEnvelope`].
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPage<T> {
    /// The decoded items
    pub items: Vec<T>,
    /// Page offset echoed back by the server
    pub start: u64,
    /// Page size echoed back by the server
    pub end: u64,
    /// Oldest item timestamp in the page (unix ms)
    pub from: Option<i64>,
    /// Newest item timestamp in the page (unix ms)
    pub to: Option<i64>,
}

// ============================================================================
// Page Budget
// ============================================================================

/// How many pages an iteration may fetch.
///
/// Either an explicit page count, an approximate item count (converted to
/// pages against the operation's `max_limit`), or the named safety default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxItems {
    /// Stop after exactly this many pages
    Pages(u32),
    /// Stop after approximately this many items
    Items(u64),
    /// The fixed default page budget
    #[default]
    Default,
}

impl MaxItems {
    /// Page budget used by [`MaxItems::Default`]
    pub const DEFAULT_PAGE_BUDGET: u32 = 100;

    /// Budgets above this raise a non-fatal warning
    pub const SAFETY_CEILING: u32 = 1_000;

    /// Resolve this spec into a concrete page budget for the given limits.
    ///
    /// `Items(n)` resolves to `ceil(n / max_limit)` pages, with the final
    /// page's effective size truncated to the remainder when non-zero.
    /// The resolved page count is always positive; zero inputs are
    /// contract errors. A budget beyond [`Self::SAFETY_CEILING`] warns but
    /// proceeds.
    pub fn resolve(&self, limits: &PaginationLimits) -> Result<ResolvedBudget> {
        let (pages, final_page_limit) = match *self {
            MaxItems::Pages(0) => {
                return Err(Error::pagination_contract("page budget must be positive"))
            }
            MaxItems::Pages(pages) => (pages, None),
            MaxItems::Items(0) => {
                return Err(Error::pagination_contract("item budget must be positive"))
            }
            MaxItems::Items(items) => {
                let limit = u64::from(limits.max_limit);
                let pages = items.div_ceil(limit).min(u64::from(u32::MAX)) as u32;
                let remainder = (items % limit) as u32;
                (pages, (remainder != 0).then_some(remainder))
            }
            MaxItems::Default => (Self::DEFAULT_PAGE_BUDGET, None),
        };

        let mut warnings = Vec::new();
        if pages > Self::SAFETY_CEILING {
            warn!(
                pages,
                ceiling = Self::SAFETY_CEILING,
                "resolved page budget exceeds the safety ceiling"
            );
            warnings.push(Warning::PageBudgetAboveCeiling {
                pages,
                ceiling: Self::SAFETY_CEILING,
            });
        }

        Ok(ResolvedBudget {
            pages,
            final_page_limit,
            warnings,
        })
    }
}

/// A [`MaxItems`] spec resolved against concrete [`PaginationLimits`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBudget {
    /// Number of pages the iteration may fetch
    pub pages: u32,
    /// Truncated size of the final page, when the item budget does not
    /// divide evenly by the page size
    pub final_page_limit: Option<u32>,
    /// Non-fatal diagnostics raised during resolution
    pub warnings: Vec<Warning>,
}

// ============================================================================
// Timestamp Cursor
// ============================================================================

/// Pulls the "latest timestamp seen" out of a page to drive the next
/// timestamp-cursor round.
///
/// Built once per operation family and reused across calls; stateless.
/// The key form resolves against the envelope's own `from`/`to` fields or,
/// for any other key, as a dot path into the page's last item. The
/// extractor form covers modeled pages.
#[derive(Clone)]
pub struct UnixCursor {
    key: Option<String>,
    extractor: Option<Arc<dyn Fn(&PageEnvelope) -> Option<i64> + Send + Sync>>,
}

impl UnixCursor {
    /// Extract by key: `"from"`/`"to"` read the envelope fields, anything
    /// else is a dot path into the last item of the page.
    pub fn key(path: impl Into<String>) -> Self {
        Self {
            key: Some(path.into()),
            extractor: None,
        }
    }

    /// Extract with a custom closure
    pub fn with_extractor(f: impl Fn(&PageEnvelope) -> Option<i64> + Send + Sync + 'static) -> Self {
        Self {
            key: None,
            extractor: Some(Arc::new(f)),
        }
    }

    /// The configured key path, if any
    pub fn key_path(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Extract the latest timestamp from a page, if present
    pub fn latest_in(&self, page: &PageEnvelope) -> Option<i64> {
        if let Some(extract) = &self.extractor {
            return extract(page);
        }
        let key = self.key.as_deref()?;
        match key {
            "from" => page.from,
            "to" => page.to,
            path => page.items.last().and_then(|item| extract_path_i64(item, path)),
        }
    }
}

impl fmt::Debug for UnixCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnixCursor")
            .field("key", &self.key)
            .field("custom_extractor", &self.extractor.is_some())
            .finish()
    }
}

/// Follow a dot path through a JSON value and read an integer timestamp
fn extract_path_i64(value: &JsonValue, path: &str) -> Option<i64> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let mut current = value;
    for part in path.split('.') {
        match current {
            JsonValue::Object(map) => current = map.get(part)?,
            _ => return None,
        }
    }
    match current {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}
