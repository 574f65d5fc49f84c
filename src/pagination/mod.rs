//! Pagination module
//!
//! Turns one bounded "fetch a page" operation into a logical sequence of
//! items: cursor state, offset-mode and timestamp-cursor-mode iteration,
//! and collection with deduplication.
//!
//! # Overview
//!
//! A paged operation declares its constraints up front as
//! [`PaginationLimits`] and exposes a fetch entry point through
//! [`PageFetcher`] (blocking) or [`AsyncPageFetcher`]. An iterator drives
//! a [`PageCursor`] against that operation, emitting [`PageEnvelope`]s
//! until the server, the declared offset ceiling, or the resolved
//! [`MaxItems`] budget ends the sequence. A [`Collector`] drains the
//! sequence into one final result shape.

mod collector;
mod cursor;
mod iterator;
mod types;

pub use collector::{
    collect, gather, CollectOptions, Collected, Collector, ItemCollection, ReturnFormat,
};
pub use cursor::PageCursor;
pub use iterator::{
    AsyncPageFetcher, FnFetcher, PageFetcher, PageIterator, PageStream, UnixPageIterator,
    UnixPageStream,
};
pub use types::{
    ItemPage, MaxItems, PageEnvelope, PageRequest, PaginationLimits, ResolvedBudget, UnixCursor,
};
