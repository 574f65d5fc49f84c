//! Collection of page sequences
//!
//! Fully drains a page iterator or stream and merges the pages into one
//! final result shape, with optional content-based deduplication.

use crate::error::Result;
use crate::pagination::iterator::{
    AsyncPageFetcher, PageFetcher, PageIterator, PageStream, UnixPageIterator, UnixPageStream,
};
use crate::pagination::types::{MaxItems, PageEnvelope, UnixCursor};
use crate::types::{JsonValue, Warning};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::ops::Index;
use std::slice::SliceIndex;
use tracing::debug;

// ============================================================================
// Return format
// ============================================================================

/// The output shape a collection run produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnFormat {
    /// Choose by inspecting the first non-empty page: object items become
    /// a structured collection, anything else a flat item list
    #[default]
    First,
    /// A flat ordered list of raw items
    Items,
    /// A structured, ordered collection of object items
    Collection,
}

// ============================================================================
// Collected output
// ============================================================================

/// The merged result of draining a page sequence
#[derive(Debug, Clone, PartialEq)]
pub enum Collected {
    /// Flat ordered list of raw items
    Items(Vec<JsonValue>),
    /// Structured collection of object items
    Collection(ItemCollection<JsonValue>),
}

impl Collected {
    /// All items, in page order
    pub fn items(&self) -> &[JsonValue] {
        match self {
            Collected::Items(items) => items,
            Collected::Collection(collection) => collection.as_slice(),
        }
    }

    /// Number of collected items
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Check if nothing was collected
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Consume into the flat item list
    pub fn into_items(self) -> Vec<JsonValue> {
        match self {
            Collected::Items(items) => items,
            Collected::Collection(collection) => collection.into_vec(),
        }
    }

    /// Decode the collected items into a model type.
    ///
    /// Items that fail to decode are dropped and reported as warnings;
    /// the remainder is kept in order.
    pub fn decode<T: DeserializeOwned>(&self) -> (ItemCollection<T>, Vec<Warning>) {
        let mut items = Vec::with_capacity(self.len());
        let mut warnings = Vec::new();
        for (index, raw) in self.items().iter().enumerate() {
            match serde_json::from_value::<T>(raw.clone()) {
                Ok(item) => items.push(item),
                Err(e) => warnings.push(Warning::ItemDecode {
                    index,
                    message: e.to_string(),
                }),
            }
        }
        (ItemCollection::from_vec(items), warnings)
    }
}

/// An ordered, indexable collection of merged items.
///
/// Supports indexing, slicing, membership, and first/last/find access over
/// the merged result of a pagination run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemCollection<T> {
    items: Vec<T>,
}

impl<T> ItemCollection<T> {
    /// Wrap an item vector
    pub fn from_vec(items: Vec<T>) -> Self {
        Self { items }
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the collection is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First item
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// Last item
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Item at an index
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// First item matching a predicate
    pub fn find(&self, predicate: impl FnMut(&&T) -> bool) -> Option<&T> {
        self.items.iter().find(predicate)
    }

    /// Iterate over the items
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// View as a slice
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Consume into the underlying vector
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: PartialEq> ItemCollection<T> {
    /// Membership test
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }
}

impl<T, I: SliceIndex<[T]>> Index<I> for ItemCollection<T> {
    type Output = I::Output;

    fn index(&self, index: I) -> &Self::Output {
        &self.items[index]
    }
}

impl<T> IntoIterator for ItemCollection<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a ItemCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> FromIterator<T> for ItemCollection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Collector
// ============================================================================

/// Merges drained pages into one [`Collected`] result.
///
/// Deduplication is on by default and collapses items by a stable
/// content fingerprint (canonical JSON text), preserving first-occurrence
/// order, so structurally-equal but distinct instances still collapse.
#[derive(Debug, Clone, Copy)]
pub struct Collector {
    format: ReturnFormat,
    deduplicate: bool,
}

impl Default for Collector {
    fn default() -> Self {
        Self {
            format: ReturnFormat::default(),
            deduplicate: true,
        }
    }
}

impl Collector {
    /// Create a collector with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output format
    #[must_use]
    pub fn with_format(mut self, format: ReturnFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable deduplication
    #[must_use]
    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Merge already-drained pages into the final shape.
    ///
    /// Under the collection shape, items that are not objects are dropped
    /// and reported as a [`Warning::ShapeMismatch`] - a documented lossy
    /// behavior for mixed result sets, not a failure.
    pub fn collect_pages(&self, pages: &[PageEnvelope]) -> (Collected, Vec<Warning>) {
        let mut warnings = Vec::new();
        let mut items: Vec<JsonValue> = pages
            .iter()
            .flat_map(|page| page.items.iter().cloned())
            .collect();

        let collected = match self.resolve_format(pages) {
            ReturnFormat::Collection => {
                let total = items.len();
                items.retain(JsonValue::is_object);
                let dropped = total - items.len();
                if dropped > 0 {
                    debug!(dropped, "dropping items that do not match the collection shape");
                    warnings.push(Warning::ShapeMismatch { dropped });
                }
                if self.deduplicate {
                    items = dedupe_items(items);
                }
                Collected::Collection(ItemCollection::from_vec(items))
            }
            _ => {
                if self.deduplicate {
                    items = dedupe_items(items);
                }
                Collected::Items(items)
            }
        };
        (collected, warnings)
    }

    /// Resolve `First` by the shape of the first non-empty page
    fn resolve_format(&self, pages: &[PageEnvelope]) -> ReturnFormat {
        match self.format {
            ReturnFormat::First => pages
                .iter()
                .find(|page| !page.is_empty())
                .and_then(|page| page.items.first())
                .map_or(ReturnFormat::Items, |item| {
                    if item.is_object() {
                        ReturnFormat::Collection
                    } else {
                        ReturnFormat::Items
                    }
                }),
            resolved => resolved,
        }
    }
}

/// Collapse duplicate items, preserving first-occurrence order
fn dedupe_items(items: Vec<JsonValue>) -> Vec<JsonValue> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(fingerprint(item)))
        .collect()
}

/// Stable content fingerprint of one item
fn fingerprint(value: &JsonValue) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

// ============================================================================
// End-to-end entry points
// ============================================================================

/// Per-call configuration for [`gather`] and [`collect`]
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Page budget for the run
    pub max_items: MaxItems,
    /// Enable timestamp-cursor mode with this extraction config
    pub unix: Option<UnixCursor>,
    /// Output shape
    pub return_format: ReturnFormat,
    /// Collapse duplicate items (on unless disabled)
    pub deduplicate: bool,
    /// Lower window bound passed through to the operation (unix ms)
    pub start: Option<i64>,
    /// Upper window bound for the first fetch/round (unix ms)
    pub to: Option<i64>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            max_items: MaxItems::default(),
            unix: None,
            return_format: ReturnFormat::default(),
            deduplicate: true,
            start: None,
            to: None,
        }
    }
}

impl CollectOptions {
    /// Options with deduplication on and the default budget
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page budget
    #[must_use]
    pub fn with_max_items(mut self, max_items: MaxItems) -> Self {
        self.max_items = max_items;
        self
    }

    /// Enable timestamp-cursor mode
    #[must_use]
    pub fn with_unix(mut self, cursor: UnixCursor) -> Self {
        self.unix = Some(cursor);
        self
    }

    /// Set the output shape
    #[must_use]
    pub fn with_format(mut self, format: ReturnFormat) -> Self {
        self.return_format = format;
        self
    }

    /// Enable or disable deduplication
    #[must_use]
    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Constrain the fetch window
    #[must_use]
    pub fn with_window(mut self, start: Option<i64>, to: Option<i64>) -> Self {
        self.start = start;
        self.to = to;
        self
    }
}

/// Drain an asynchronous paged operation into one merged result.
///
/// Builds the matching stream (offset or timestamp-cursor mode), drains
/// it fully, and merges the pages. Any error raised while draining
/// propagates unchanged.
pub async fn gather<F: AsyncPageFetcher>(
    fetcher: F,
    options: CollectOptions,
) -> Result<(Collected, Vec<Warning>)> {
    let collector = Collector::new()
        .with_format(options.return_format)
        .with_deduplicate(options.deduplicate);

    let (pages, mut warnings) = if let Some(cursor_cfg) = options.unix.clone() {
        let mut stream = UnixPageStream::new(fetcher, options.max_items, cursor_cfg)?
            .with_window(options.start, options.to);
        let pages = stream.collect_pages().await?;
        (pages, stream.warnings().to_vec())
    } else {
        let mut stream =
            PageStream::new(fetcher, options.max_items)?.with_window(options.start, options.to);
        let pages = stream.collect_pages().await?;
        (pages, stream.warnings().to_vec())
    };

    let (collected, more) = collector.collect_pages(&pages);
    warnings.extend(more);
    Ok((collected, warnings))
}

/// Drain a blocking paged operation into one merged result, the sync
/// counterpart of [`gather`].
pub fn collect<F: PageFetcher>(
    fetcher: F,
    options: CollectOptions,
) -> Result<(Collected, Vec<Warning>)> {
    let collector = Collector::new()
        .with_format(options.return_format)
        .with_deduplicate(options.deduplicate);

    let (pages, mut warnings) = if let Some(cursor_cfg) = options.unix.clone() {
        let mut iter = UnixPageIterator::new(fetcher, options.max_items, cursor_cfg)?
            .with_window(options.start, options.to);
        let pages = iter.collect_pages()?;
        (pages, iter.warnings().to_vec())
    } else {
        let mut iter =
            PageIterator::new(fetcher, options.max_items)?.with_window(options.start, options.to);
        let pages = iter.collect_pages()?;
        (pages, iter.warnings().to_vec())
    };

    let (collected, more) = collector.collect_pages(&pages);
    warnings.extend(more);
    Ok((collected, warnings))
}
