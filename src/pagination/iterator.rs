//! Page iteration
//!
//! Drives a [`PageCursor`] against a paged operation, producing a lazy,
//! strictly ordered sequence of pages. Offset mode fetches successive
//! offsets until the server, the declared offset ceiling, or the resolved
//! page budget ends the run. Timestamp-cursor mode wraps offset mode in an
//! outer loop that re-windows each round on the latest timestamp seen,
//! for endpoints whose total data exceeds a single page-budget's reach.

use crate::error::{Error, Result};
use crate::pagination::cursor::PageCursor;
use crate::pagination::types::{
    MaxItems, PageEnvelope, PageRequest, PaginationLimits, ResolvedBudget, UnixCursor,
};
use crate::types::Warning;
use async_trait::async_trait;
use futures::Stream;
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// ============================================================================
// Fetcher contracts
// ============================================================================

/// A blocking paged operation.
///
/// Implementations declare their paging constraints statically through
/// [`limits`](Self::limits) and return `None` (or an empty page) to signal
/// end-of-data.
pub trait PageFetcher {
    /// The operation's declared paging constraints
    fn limits(&self) -> PaginationLimits;

    /// Fetch one page
    fn fetch_page(&mut self, request: &PageRequest) -> Result<Option<PageEnvelope>>;
}

/// An asynchronous paged operation, the async counterpart of
/// [`PageFetcher`].
#[async_trait]
pub trait AsyncPageFetcher: Send {
    /// The operation's declared paging constraints
    fn limits(&self) -> PaginationLimits;

    /// Fetch one page
    async fn fetch_page(&mut self, request: &PageRequest) -> Result<Option<PageEnvelope>>;
}

/// Adapts a closure plus declared limits into a fetcher.
///
/// Implements both fetcher contracts, which keeps scripted sources in
/// tests and small ad-hoc operations to one definition.
pub struct FnFetcher<F> {
    limits: PaginationLimits,
    f: F,
}

impl<F> FnFetcher<F> {
    /// Bind a closure to its declared limits
    pub fn new(limits: PaginationLimits, f: F) -> Self {
        Self { limits, f }
    }
}

impl<F> PageFetcher for FnFetcher<F>
where
    F: FnMut(&PageRequest) -> Result<Option<PageEnvelope>>,
{
    fn limits(&self) -> PaginationLimits {
        self.limits
    }

    fn fetch_page(&mut self, request: &PageRequest) -> Result<Option<PageEnvelope>> {
        (self.f)(request)
    }
}

#[async_trait]
impl<F> AsyncPageFetcher for FnFetcher<F>
where
    F: FnMut(&PageRequest) -> Result<Option<PageEnvelope>> + Send,
{
    fn limits(&self) -> PaginationLimits {
        self.limits
    }

    async fn fetch_page(&mut self, request: &PageRequest) -> Result<Option<PageEnvelope>> {
        (self.f)(request)
    }
}

fn validated_limits(limits: PaginationLimits) -> Result<PaginationLimits> {
    if limits.max_limit == 0 {
        return Err(Error::pagination_contract(
            "operation declares no usable page size",
        ));
    }
    Ok(limits)
}

/// Caller-supplied window bounds passed through to every fetch
#[derive(Debug, Clone, Copy, Default)]
struct PageWindow {
    start: Option<i64>,
    to: Option<i64>,
}

// ============================================================================
// Offset mode, blocking
// ============================================================================

/// Blocking offset-mode page iterator.
///
/// Also usable through the [`Iterator`] trait, where each item is a
/// `Result<PageEnvelope>`.
#[derive(Debug)]
pub struct PageIterator<F: PageFetcher> {
    fetcher: F,
    cursor: PageCursor,
    budget: ResolvedBudget,
    window: PageWindow,
}

impl<F: PageFetcher> PageIterator<F> {
    /// Build an iterator over the fetcher's pages.
    ///
    /// Fails fast when the operation does not structurally support
    /// pagination or the budget resolves to nothing.
    pub fn new(fetcher: F, max_items: MaxItems) -> Result<Self> {
        let limits = validated_limits(fetcher.limits())?;
        let budget = max_items.resolve(&limits)?;
        Ok(Self {
            fetcher,
            cursor: PageCursor::new(limits),
            budget,
            window: PageWindow::default(),
        })
    }

    /// Constrain every fetch to a timestamp window
    #[must_use]
    pub fn with_window(mut self, start: Option<i64>, to: Option<i64>) -> Self {
        self.window = PageWindow { start, to };
        self
    }

    /// The cursor driving this iterator
    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Mutable cursor access, e.g. to seed a starting offset
    pub fn cursor_mut(&mut self) -> &mut PageCursor {
        &mut self.cursor
    }

    /// Non-fatal diagnostics from budget resolution
    pub fn warnings(&self) -> &[Warning] {
        &self.budget.warnings
    }

    /// Fetch the next page, or `None` once the sequence has ended.
    ///
    /// An empty page ends the sequence without being emitted; a short page
    /// ends it but is still emitted. Fetch errors propagate unchanged and
    /// leave the cursor state untouched.
    pub fn next_page(&mut self) -> Result<Option<PageEnvelope>> {
        if self.cursor.is_exhausted() {
            return Ok(None);
        }
        let request = PageRequest {
            offset: self.cursor.offset(),
            limit: self.cursor.effective_limit(&self.budget),
            start: self.window.start,
            to: self.window.to,
        };
        match self.fetcher.fetch_page(&request)? {
            Some(page) if !page.is_empty() => {
                self.cursor.advance(page.len(), &self.budget);
                Ok(Some(page))
            }
            _ => {
                self.cursor.mark_exhausted();
                Ok(None)
            }
        }
    }

    /// Drain every remaining page eagerly
    pub fn collect_pages(&mut self) -> Result<Vec<PageEnvelope>> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page()? {
            pages.push(page);
        }
        Ok(pages)
    }
}

impl<F: PageFetcher> Iterator for PageIterator<F> {
    type Item = Result<PageEnvelope>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page().transpose()
    }
}

// ============================================================================
// Offset mode, async
// ============================================================================

/// Asynchronous offset-mode page stream.
///
/// Pull-based: callers drive it through [`next_page`](Self::next_page),
/// which makes backpressure the caller's choice and keeps cancellation
/// explicit via the attached [`CancellationToken`].
pub struct PageStream<F: AsyncPageFetcher> {
    fetcher: F,
    cursor: PageCursor,
    budget: ResolvedBudget,
    window: PageWindow,
    cancel: CancellationToken,
}

impl<F: AsyncPageFetcher> PageStream<F> {
    /// Build a stream over the fetcher's pages; same construction-time
    /// checks as [`PageIterator::new`].
    pub fn new(fetcher: F, max_items: MaxItems) -> Result<Self> {
        let limits = validated_limits(fetcher.limits())?;
        let budget = max_items.resolve(&limits)?;
        Ok(Self {
            fetcher,
            cursor: PageCursor::new(limits),
            budget,
            window: PageWindow::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Constrain every fetch to a timestamp window
    #[must_use]
    pub fn with_window(mut self, start: Option<i64>, to: Option<i64>) -> Self {
        self.window = PageWindow { start, to };
        self
    }

    /// Attach a cancellation token; checked before every fetch
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The cursor driving this stream
    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Mutable cursor access, e.g. to seed a starting offset
    pub fn cursor_mut(&mut self) -> &mut PageCursor {
        &mut self.cursor
    }

    /// Non-fatal diagnostics from budget resolution
    pub fn warnings(&self) -> &[Warning] {
        &self.budget.warnings
    }

    /// Fetch the next page, or `None` once the sequence has ended.
    pub async fn next_page(&mut self) -> Result<Option<PageEnvelope>> {
        if self.cursor.is_exhausted() {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let request = PageRequest {
            offset: self.cursor.offset(),
            limit: self.cursor.effective_limit(&self.budget),
            start: self.window.start,
            to: self.window.to,
        };
        let cancel = self.cancel.clone();
        let fetched = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.fetcher.fetch_page(&request) => result?,
        };
        match fetched {
            Some(page) if !page.is_empty() => {
                self.cursor.advance(page.len(), &self.budget);
                Ok(Some(page))
            }
            _ => {
                self.cursor.mark_exhausted();
                Ok(None)
            }
        }
    }

    /// Drain every remaining page eagerly
    pub async fn collect_pages(&mut self) -> Result<Vec<PageEnvelope>> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page().await? {
            pages.push(page);
        }
        Ok(pages)
    }

    /// Adapt into a [`futures::Stream`] of pages for combinator-style
    /// consumers. The underlying iteration stays strictly sequential.
    pub fn into_stream(self) -> impl Stream<Item = Result<PageEnvelope>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut stream = state?;
            match stream.next_page().await {
                Ok(Some(page)) => Some((Ok(page), Some(stream))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

// ============================================================================
// Timestamp-cursor mode
// ============================================================================

/// Outer-loop progress for timestamp-cursor iteration
#[derive(Debug)]
enum RoundState {
    AwaitingFirstRound,
    Draining {
        pages: VecDeque<PageEnvelope>,
        last: bool,
    },
    Advancing,
    Done,
}

enum RoundOutcome {
    Finished,
    Yield {
        pages: VecDeque<PageEnvelope>,
        last: bool,
        next_ts: Option<i64>,
        warning: Option<Warning>,
    },
}

/// Decide what to do with one drained round.
///
/// Termination: no pages this round; no extractable timestamp (the round
/// is still yielded); or the extracted timestamp equals the previous
/// round's (no progress - the round is a re-read of the same window and is
/// not yielded, which also guards against infinite loops on flat
/// timestamps).
fn evaluate_round(
    pages: Vec<PageEnvelope>,
    cursor_cfg: &UnixCursor,
    current_ts: Option<i64>,
) -> RoundOutcome {
    let Some(tail) = pages.last() else {
        return RoundOutcome::Finished;
    };
    match cursor_cfg.latest_in(tail) {
        None => RoundOutcome::Yield {
            pages: pages.into(),
            last: true,
            next_ts: None,
            warning: Some(Warning::MissingTimestamp {
                key: cursor_cfg.key_path().unwrap_or("<extractor>").to_string(),
            }),
        },
        Some(ts) if current_ts == Some(ts) => {
            debug!(ts, "timestamp cursor made no progress; ending iteration");
            RoundOutcome::Finished
        }
        Some(ts) => RoundOutcome::Yield {
            pages: pages.into(),
            last: false,
            next_ts: Some(ts),
            warning: None,
        },
    }
}

/// Asynchronous timestamp-cursor page stream.
///
/// Each round runs a fresh bounded offset-mode pass with
/// `to = latest_seen + 1` (the window stays inclusive of exactly
/// `latest_seen`), drains it eagerly, then re-windows on the timestamp
/// pulled from the round's last page. Rounds are strictly sequential.
pub struct UnixPageStream<F: AsyncPageFetcher> {
    fetcher: F,
    limits: PaginationLimits,
    budget: ResolvedBudget,
    cursor_cfg: UnixCursor,
    start: Option<i64>,
    initial_to: Option<i64>,
    current_ts: Option<i64>,
    state: RoundState,
    warnings: Vec<Warning>,
    cancel: CancellationToken,
}

impl<F: AsyncPageFetcher> UnixPageStream<F> {
    /// Build a timestamp-cursor stream; same construction-time checks as
    /// [`PageIterator::new`].
    pub fn new(fetcher: F, max_items: MaxItems, cursor_cfg: UnixCursor) -> Result<Self> {
        let limits = validated_limits(fetcher.limits())?;
        let budget = max_items.resolve(&limits)?;
        let warnings = budget.warnings.clone();
        Ok(Self {
            fetcher,
            limits,
            budget,
            cursor_cfg,
            start: None,
            initial_to: None,
            current_ts: None,
            state: RoundState::AwaitingFirstRound,
            warnings,
            cancel: CancellationToken::new(),
        })
    }

    /// Constrain the first round's window; later rounds re-window on the
    /// extracted timestamp
    #[must_use]
    pub fn with_window(mut self, start: Option<i64>, to: Option<i64>) -> Self {
        self.start = start;
        self.initial_to = to;
        self
    }

    /// Attach a cancellation token; checked before every fetch
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The timestamp the next round would window on
    pub fn current_timestamp(&self) -> Option<i64> {
        self.current_ts
    }

    /// Non-fatal diagnostics accumulated so far
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Fetch the next page, or `None` once the outer loop has terminated.
    pub async fn next_page(&mut self) -> Result<Option<PageEnvelope>> {
        loop {
            match &mut self.state {
                RoundState::Done => return Ok(None),
                RoundState::Draining { pages, last } => {
                    if let Some(page) = pages.pop_front() {
                        return Ok(Some(page));
                    }
                    let last = *last;
                    self.state = if last {
                        RoundState::Done
                    } else {
                        RoundState::Advancing
                    };
                }
                RoundState::AwaitingFirstRound | RoundState::Advancing => {
                    match self.run_round().await? {
                        RoundOutcome::Finished => self.state = RoundState::Done,
                        RoundOutcome::Yield {
                            pages,
                            last,
                            next_ts,
                            warning,
                        } => {
                            if let Some(w) = warning {
                                warn!(warning = %w, "timestamp extraction failed; last round");
                                self.warnings.push(w);
                            }
                            if let Some(ts) = next_ts {
                                self.current_ts = Some(ts);
                            }
                            self.state = RoundState::Draining { pages, last };
                        }
                    }
                }
            }
        }
    }

    /// Drain every remaining page across all rounds
    pub async fn collect_pages(&mut self) -> Result<Vec<PageEnvelope>> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page().await? {
            pages.push(page);
        }
        Ok(pages)
    }

    /// Adapt into a [`futures::Stream`] of pages
    pub fn into_stream(self) -> impl Stream<Item = Result<PageEnvelope>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut stream = state?;
            match stream.next_page().await {
                Ok(Some(page)) => Some((Ok(page), Some(stream))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    async fn run_round(&mut self) -> Result<RoundOutcome> {
        let to = self.current_ts.map(|t| t + 1).or(self.initial_to);
        let mut cursor = PageCursor::new(self.limits);
        let mut pages = Vec::new();
        while !cursor.is_exhausted() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let request = PageRequest {
                offset: cursor.offset(),
                limit: cursor.effective_limit(&self.budget),
                start: self.start,
                to,
            };
            let cancel = self.cancel.clone();
            let fetched = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                result = self.fetcher.fetch_page(&request) => result?,
            };
            match fetched {
                Some(page) if !page.is_empty() => {
                    cursor.advance(page.len(), &self.budget);
                    pages.push(page);
                }
                _ => cursor.mark_exhausted(),
            }
        }
        Ok(evaluate_round(pages, &self.cursor_cfg, self.current_ts))
    }
}

/// Blocking timestamp-cursor page iterator, the sync counterpart of
/// [`UnixPageStream`].
pub struct UnixPageIterator<F: PageFetcher> {
    fetcher: F,
    limits: PaginationLimits,
    budget: ResolvedBudget,
    cursor_cfg: UnixCursor,
    start: Option<i64>,
    initial_to: Option<i64>,
    current_ts: Option<i64>,
    state: RoundState,
    warnings: Vec<Warning>,
}

impl<F: PageFetcher> UnixPageIterator<F> {
    /// Build a timestamp-cursor iterator
    pub fn new(fetcher: F, max_items: MaxItems, cursor_cfg: UnixCursor) -> Result<Self> {
        let limits = validated_limits(fetcher.limits())?;
        let budget = max_items.resolve(&limits)?;
        let warnings = budget.warnings.clone();
        Ok(Self {
            fetcher,
            limits,
            budget,
            cursor_cfg,
            start: None,
            initial_to: None,
            current_ts: None,
            state: RoundState::AwaitingFirstRound,
            warnings,
        })
    }

    /// Constrain the first round's window
    #[must_use]
    pub fn with_window(mut self, start: Option<i64>, to: Option<i64>) -> Self {
        self.start = start;
        self.initial_to = to;
        self
    }

    /// The timestamp the next round would window on
    pub fn current_timestamp(&self) -> Option<i64> {
        self.current_ts
    }

    /// Non-fatal diagnostics accumulated so far
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Fetch the next page, or `None` once the outer loop has terminated.
    pub fn next_page(&mut self) -> Result<Option<PageEnvelope>> {
        loop {
            match &mut self.state {
                RoundState::Done => return Ok(None),
                RoundState::Draining { pages, last } => {
                    if let Some(page) = pages.pop_front() {
                        return Ok(Some(page));
                    }
                    let last = *last;
                    self.state = if last {
                        RoundState::Done
                    } else {
                        RoundState::Advancing
                    };
                }
                RoundState::AwaitingFirstRound | RoundState::Advancing => {
                    match self.run_round()? {
                        RoundOutcome::Finished => self.state = RoundState::Done,
                        RoundOutcome::Yield {
                            pages,
                            last,
                            next_ts,
                            warning,
                        } => {
                            if let Some(w) = warning {
                                warn!(warning = %w, "timestamp extraction failed; last round");
                                self.warnings.push(w);
                            }
                            if let Some(ts) = next_ts {
                                self.current_ts = Some(ts);
                            }
                            self.state = RoundState::Draining { pages, last };
                        }
                    }
                }
            }
        }
    }

    /// Drain every remaining page across all rounds
    pub fn collect_pages(&mut self) -> Result<Vec<PageEnvelope>> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page()? {
            pages.push(page);
        }
        Ok(pages)
    }

    fn run_round(&mut self) -> Result<RoundOutcome> {
        let to = self.current_ts.map(|t| t + 1).or(self.initial_to);
        let mut cursor = PageCursor::new(self.limits);
        let mut pages = Vec::new();
        while !cursor.is_exhausted() {
            let request = PageRequest {
                offset: cursor.offset(),
                limit: cursor.effective_limit(&self.budget),
                start: self.start,
                to,
            };
            match self.fetcher.fetch_page(&request)? {
                Some(page) if !page.is_empty() => {
                    cursor.advance(page.len(), &self.budget);
                    pages.push(page);
                }
                _ => cursor.mark_exhausted(),
            }
        }
        Ok(evaluate_round(pages, &self.cursor_cfg, self.current_ts))
    }
}

impl<F: PageFetcher> Iterator for UnixPageIterator<F> {
    type Item = Result<PageEnvelope>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page().transpose()
    }
}
