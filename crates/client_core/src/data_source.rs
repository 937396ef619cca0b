//! Keeps one page of a remote list in sync with the view parameters that select it.
//!
//! View parameters and reactive filters live in `watch` cells. A driver task
//! waits on both and issues one refresh per batch of changes: every change made
//! before the driver runs again collapses into a single wake-up. Results are
//! published through another `watch` cell, so any number of observers can follow
//! `items`, `total_count` and `loading` without polling.

use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use serde::Deserialize;
use serde_json::Value;
use shared::protocol::{FilterMap, QueryPayload, SortSpec};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error};

use crate::{
    config::ClientSettings,
    error::{DataSourceError, FetchError},
    filters::FilterSource,
    normalize::{normalize, NormalizedPage},
    payload::{build_payload, page_count, ViewParameters},
    transport::Transport,
};

pub type RowTransform<T> = Arc<dyn Fn(Value) -> T + Send + Sync>;

/// What to do when responses resolve in a different order than their requests were issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrdering {
    /// Responses older than the last committed one are dropped.
    #[default]
    #[serde(alias = "latest_issued")]
    LatestIssuedWins,
    /// Whatever resolves last overwrites the result set.
    #[serde(alias = "last_resolved")]
    LastResolvedWins,
}

impl FromStr for ResponseOrdering {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "latest_issued" | "latest_issued_wins" => Ok(Self::LatestIssuedWins),
            "last_resolved" | "last_resolved_wins" => Ok(Self::LastResolvedWins),
            other => Err(format!("unknown response ordering: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    /// True while at least one request is in flight.
    pub loading: bool,
    /// Bumped on every commit, including the empty commit after a failure.
    pub revision: u64,
}

impl<T> Default for ResultSet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            loading: false,
            revision: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceEvent {
    Loaded {
        endpoint: String,
        revision: u64,
        total_count: u64,
    },
    FetchFailed {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },
}

pub struct DataSourceConfig<T> {
    endpoint: String,
    normalize: RowTransform<T>,
    filters: FilterSource,
    ordering: ResponseOrdering,
    view: ViewParameters,
}

impl<T> DataSourceConfig<T> {
    pub fn new(
        endpoint: impl Into<String>,
        normalize_fn: impl Fn(Value) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            normalize: Arc::new(normalize_fn),
            filters: FilterSource::default(),
            ordering: ResponseOrdering::default(),
            view: ViewParameters::default(),
        }
    }

    pub fn with_filters(mut self, filters: impl Into<FilterSource>) -> Self {
        self.filters = filters.into();
        self
    }

    pub fn with_ordering(mut self, ordering: ResponseOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_page_size(mut self, items_per_page: u32) -> Self {
        self.view.items_per_page = items_per_page;
        self
    }

    pub fn with_view(mut self, view: ViewParameters) -> Self {
        self.view = view;
        self
    }

    /// Applies the configured default page size and response ordering.
    pub fn with_settings(self, settings: &ClientSettings) -> Self {
        self.with_page_size(settings.default_page_size)
            .with_ordering(settings.response_ordering)
    }
}

struct Inner<T> {
    endpoint: String,
    transport: Arc<dyn Transport>,
    normalize: RowTransform<T>,
    filters: FilterSource,
    ordering: ResponseOrdering,
    view: watch::Sender<ViewParameters>,
    results: watch::Sender<ResultSet<T>>,
    events: broadcast::Sender<DataSourceEvent>,
    issued: AtomicU64,
    // Only touched inside `results` modification closures, which serializes them.
    in_flight: AtomicUsize,
    committed: AtomicU64,
}

pub struct PaginatedDataSource<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for PaginatedDataSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for PaginatedDataSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginatedDataSource")
            .field("endpoint", &self.inner.endpoint)
            .field("view", &*self.inner.view.borrow())
            .field("filters", &self.inner.filters)
            .field("ordering", &self.inner.ordering)
            .finish()
    }
}

impl<T: Send + Sync + 'static> PaginatedDataSource<T> {
    /// Must be called inside a tokio runtime: the change driver is spawned here.
    /// Nothing is fetched until a view parameter changes or [`Self::fetch_data`] runs.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: DataSourceConfig<T>,
    ) -> Result<Self, DataSourceError> {
        config.view.validate()?;

        let (view, _) = watch::channel(config.view);
        let (results, _) = watch::channel(ResultSet::default());
        let (events, _) = broadcast::channel(64);
        let inner = Arc::new(Inner {
            endpoint: config.endpoint,
            transport,
            normalize: config.normalize,
            filters: config.filters,
            ordering: config.ordering,
            view,
            results,
            events,
            issued: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            committed: AtomicU64::new(0),
        });
        spawn_change_driver(&inner);
        Ok(Self { inner })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Re-queries the current view. Failures are logged and reported on
    /// [`Self::events`], never returned.
    pub async fn fetch_data(&self) {
        self.inner.refresh().await;
    }

    pub fn view(&self) -> ViewParameters {
        self.inner.view.borrow().clone()
    }

    pub fn page(&self) -> u32 {
        self.inner.view.borrow().page
    }

    pub fn items_per_page(&self) -> u32 {
        self.inner.view.borrow().items_per_page
    }

    pub fn sort_by(&self) -> SortSpec {
        self.inner.view.borrow().sort_by.clone()
    }

    pub fn sort_desc(&self) -> bool {
        self.inner.view.borrow().sort_desc
    }

    pub fn set_page(&self, page: u32) -> Result<bool, DataSourceError> {
        self.update_view(|view| view.page = page)
    }

    pub fn set_items_per_page(&self, items_per_page: u32) -> Result<bool, DataSourceError> {
        self.update_view(|view| view.items_per_page = items_per_page)
    }

    pub fn set_sort_by(&self, sort_by: impl Into<SortSpec>) -> Result<bool, DataSourceError> {
        let sort_by = sort_by.into();
        self.update_view(|view| view.sort_by = sort_by)
    }

    pub fn set_sort_desc(&self, sort_desc: bool) -> Result<bool, DataSourceError> {
        self.update_view(|view| view.sort_desc = sort_desc)
    }

    /// Applies several parameter changes as one: at most one refresh follows.
    ///
    /// Returns whether anything changed. An invalid result leaves the view untouched.
    pub fn update_view(
        &self,
        apply: impl FnOnce(&mut ViewParameters),
    ) -> Result<bool, DataSourceError> {
        let mut outcome = Ok(false);
        self.inner.view.send_if_modified(|current| {
            let mut next = current.clone();
            apply(&mut next);
            if let Err(err) = next.validate() {
                outcome = Err(err);
                return false;
            }
            if next == *current {
                return false;
            }
            *current = next;
            outcome = Ok(true);
            true
        });
        outcome
    }

    pub fn filters(&self) -> &FilterSource {
        &self.inner.filters
    }

    /// The body the next refresh would send.
    pub fn payload(&self) -> QueryPayload {
        self.inner.payload()
    }

    pub fn total_count(&self) -> u64 {
        self.inner.results.borrow().total_count
    }

    pub fn loading(&self) -> bool {
        self.inner.results.borrow().loading
    }

    pub fn revision(&self) -> u64 {
        self.inner.results.borrow().revision
    }

    pub fn page_count(&self) -> u64 {
        page_count(self.total_count(), self.items_per_page())
    }

    pub fn subscribe(&self) -> watch::Receiver<ResultSet<T>> {
        self.inner.results.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<DataSourceEvent> {
        self.inner.events.subscribe()
    }
}

impl<T: Clone + Send + Sync + 'static> PaginatedDataSource<T> {
    pub fn items(&self) -> Vec<T> {
        self.inner.results.borrow().items.clone()
    }

    pub fn snapshot(&self) -> ResultSet<T> {
        self.inner.results.borrow().clone()
    }

    /// Current result set first, then every later change.
    pub fn stream(&self) -> WatchStream<ResultSet<T>> {
        WatchStream::new(self.inner.results.subscribe())
    }

    /// Waits until a commit newer than `after_revision` has landed and nothing is in flight.
    pub async fn settled(&self, after_revision: u64) -> ResultSet<T> {
        let mut rx = self.inner.results.subscribe();
        let state = match rx
            .wait_for(|state| state.revision > after_revision && !state.loading)
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        };
        state
    }
}

impl<T: Send + Sync + 'static> Inner<T> {
    fn payload(&self) -> QueryPayload {
        let view = self.view.borrow().clone();
        build_payload(&view, &self.filters)
    }

    async fn refresh(&self) {
        let sequence = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlightGuard::enter(self);
        let payload = self.payload();
        debug!(
            endpoint = %self.endpoint,
            sequence,
            page = payload.page,
            per_page = payload.per_page,
            "data source: issuing query"
        );

        match self.fetch_page(&payload).await {
            Ok(page) => {
                let total_count = page.total_count;
                if let Some(revision) = self.commit(sequence, page) {
                    debug!(
                        endpoint = %self.endpoint,
                        sequence,
                        revision,
                        total_count,
                        "data source: committed page"
                    );
                    let _ = self.events.send(DataSourceEvent::Loaded {
                        endpoint: self.endpoint.clone(),
                        revision,
                        total_count,
                    });
                }
            }
            Err(err) => {
                error!(
                    endpoint = %self.endpoint,
                    sequence,
                    error = %err,
                    "data source: fetch failed"
                );
                let _ = self.events.send(DataSourceEvent::FetchFailed {
                    endpoint: self.endpoint.clone(),
                    status: err.status(),
                    message: err.to_string(),
                });
                self.commit(sequence, NormalizedPage::default());
            }
        }
    }

    async fn fetch_page(&self, payload: &QueryPayload) -> Result<NormalizedPage<T>, FetchError> {
        let body = serde_json::to_value(payload)?;
        let response = self.transport.post_json(&self.endpoint, &body).await?;
        let transform = &self.normalize;
        Ok(normalize(response, |row| transform(row)))
    }

    /// Returns the new revision, or `None` when the response was stale and dropped.
    fn commit(&self, sequence: u64, page: NormalizedPage<T>) -> Option<u64> {
        let mut revision = None;
        self.results.send_if_modified(|state| {
            let newest = self.committed.load(Ordering::SeqCst);
            if self.ordering == ResponseOrdering::LatestIssuedWins && sequence < newest {
                return false;
            }
            self.committed.store(sequence.max(newest), Ordering::SeqCst);
            state.items = page.items;
            state.total_count = page.total_count;
            state.revision += 1;
            revision = Some(state.revision);
            true
        });

        if revision.is_none() {
            debug!(
                endpoint = %self.endpoint,
                sequence,
                "data source: discarded stale response"
            );
        }
        revision
    }
}

/// Marks a request in flight for as long as it lives, whichever way the refresh exits.
struct InFlightGuard<'a, T> {
    inner: &'a Inner<T>,
}

impl<'a, T> InFlightGuard<'a, T> {
    fn enter(inner: &'a Inner<T>) -> Self {
        inner.results.send_if_modified(|state| {
            inner.in_flight.fetch_add(1, Ordering::SeqCst);
            let changed = !state.loading;
            state.loading = true;
            changed
        });
        Self { inner }
    }
}

impl<T> Drop for InFlightGuard<'_, T> {
    fn drop(&mut self) {
        let inner = self.inner;
        inner.results.send_if_modified(|state| {
            let remaining = inner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
            let loading = remaining > 0;
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        });
    }
}

/// Resolves to `false` once the data source is gone. The filter store's sender
/// lives in `Inner`, so it can only close together with the view.
async fn next_change(
    view_rx: &mut watch::Receiver<ViewParameters>,
    filters_rx: &mut Option<watch::Receiver<FilterMap>>,
) -> bool {
    match filters_rx.as_mut() {
        None => view_rx.changed().await.is_ok(),
        Some(filters) => tokio::select! {
            changed = view_rx.changed() => changed.is_ok(),
            changed = filters.changed() => changed.is_ok(),
        },
    }
}

/// Holds only a weak handle: the driver ends once the last data source handle is gone.
///
/// Separate setter calls coalesce when the driver cannot run in between them, which
/// holds on a current-thread runtime. On a multi-thread runtime a worker may wake the
/// driver mid-batch; [`PaginatedDataSource::update_view`] is the atomic batch there.
fn spawn_change_driver<T: Send + Sync + 'static>(inner: &Arc<Inner<T>>) {
    let mut view_rx = inner.view.subscribe();
    let mut filters_rx = inner.filters.subscribe();
    let weak = Arc::downgrade(inner);

    tokio::spawn(async move {
        while next_change(&mut view_rx, &mut filters_rx).await {
            // One scheduling turn lets the rest of the caller's batch land first.
            tokio::task::yield_now().await;

            // Everything that changed up to now rides on this one refresh.
            let _ = view_rx.borrow_and_update();
            if let Some(filters) = filters_rx.as_mut() {
                let _ = filters.borrow_and_update();
            }

            let Some(inner) = weak.upgrade() else {
                break;
            };
            tokio::spawn(async move {
                inner.refresh().await;
            });
        }
    });
}

#[cfg(test)]
#[path = "tests/data_source_tests.rs"]
mod tests;
