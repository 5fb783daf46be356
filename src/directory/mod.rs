//! Paged directory listing.
//!
//! [`fetch_page`] runs one page request: the server-side part of the filters
//! goes to the store, the derived facets (license status, contact) are
//! applied to what comes back, and the donator badge is merged in.
//! [`ListingController`] keeps the accumulated result set for a browsing
//! session and makes sure only one page request runs at a time.

pub mod persist;
pub mod virtualizer;

use crate::db::schema::CallsignRecord;
use crate::db::{Database, DirectoryQuery};
use crate::domain::filters::FilterState;
use crate::domain::license::{LicenseClass, LicenseInfo, classify};
use crate::types::CallsignId;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use persist::FilterStore;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Where listing pages come from.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn list_page(&self, query: &DirectoryQuery) -> anyhow::Result<Vec<CallsignRecord>>;
    async fn donator_ids(&self, ids: &[CallsignId]) -> anyhow::Result<HashSet<CallsignId>>;
}

#[async_trait]
impl DirectorySource for Database {
    async fn list_page(&self, query: &DirectoryQuery) -> anyhow::Result<Vec<CallsignRecord>> {
        self.list_directory(query).await
    }

    async fn donator_ids(&self, ids: &[CallsignId]) -> anyhow::Result<HashSet<CallsignId>> {
        Database::donator_ids(self, ids).await
    }
}

/// A record as shown in the directory, with its derived fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    #[serde(flatten)]
    pub record: CallsignRecord,
    pub license_class: LicenseClass,
    pub license: LicenseInfo,
    pub is_donator: bool,
}

/// One fetched page after derived filters and badges are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub page: u32,
    pub items: Vec<DirectoryEntry>,
    /// The store returned a full page, so another one may exist.
    pub has_more: bool,
}

/// Build the store query for `page` of the given filter state.
pub fn build_query(state: &FilterState, page: u32, page_size: u32, today: NaiveDate) -> DirectoryQuery {
    let filters = &state.filters;
    let search = state.search.trim();
    DirectoryQuery {
        search: (!search.is_empty()).then(|| search.to_string()),
        state: filters.state.clone(),
        district: filters.district.clone(),
        license_class: filters.license_class,
        added_since: filters.recent.map(|w| w.cutoff(today)),
        limit: page_size,
        offset: i64::from(page) * i64::from(page_size),
    }
}

/// Fetch one page. Any error discards the whole page.
pub async fn fetch_page(
    source: &dyn DirectorySource,
    state: &FilterState,
    page: u32,
    page_size: u32,
    today: NaiveDate,
) -> anyhow::Result<Page> {
    let query = build_query(state, page, page_size, today);
    let records = source.list_page(&query).await?;
    let has_more = records.len() == page_size as usize;

    let ids: Vec<CallsignId> = records.iter().map(|r| r.id.clone()).collect();
    let donators = source.donator_ids(&ids).await?;

    let items = records
        .into_iter()
        .filter(|r| {
            !state.filters.has_derived()
                || state.filters.matches_derived(
                    r.expiry_date.as_deref(),
                    r.phone.as_deref(),
                    r.email.as_deref(),
                    today,
                )
        })
        .map(|record| DirectoryEntry {
            license_class: LicenseClass::from_callsign(&record.callsign),
            license: classify(record.expiry_date.as_deref(), today),
            is_donator: donators.contains(&record.id),
            record,
        })
        .collect();

    Ok(Page {
        page,
        items,
        has_more,
    })
}

/// What a call to the controller ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Page applied; carries the number of entries added.
    Loaded(usize),
    /// Another fetch was running or there is nothing more to load.
    Skipped,
    /// A newer reset superseded this request before it finished.
    Stale,
    /// The request failed; see [`ListingState::error`].
    Failed,
}

/// Snapshot of everything the listing view renders.
#[derive(Debug, Clone, Default)]
pub struct ListingState {
    pub filter: FilterState,
    pub items: Vec<DirectoryEntry>,
    pub page: u32,
    pub has_more: bool,
    pub error: Option<String>,
    generation: u64,
}

/// Accumulated result set of a browsing session.
///
/// At most one page request is in flight. A reset bumps the generation so
/// results of older requests are dropped on arrival.
pub struct ListingController {
    source: Arc<dyn DirectorySource>,
    store: Option<FilterStore>,
    page_size: u32,
    load_more_delay: Duration,
    in_flight: AtomicUsize,
    state: Mutex<ListingState>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ListingController {
    /// Create a controller, restoring saved filters from `store` if present.
    pub fn new(
        source: Arc<dyn DirectorySource>,
        store: Option<FilterStore>,
        page_size: u32,
        load_more_delay: Duration,
    ) -> Self {
        let filter = store.as_ref().and_then(FilterStore::load).unwrap_or_default();
        Self {
            source,
            store,
            page_size: page_size.max(1),
            load_more_delay,
            in_flight: AtomicUsize::new(0),
            state: Mutex::new(ListingState {
                filter,
                has_more: true,
                ..ListingState::default()
            }),
        }
    }

    pub fn snapshot(&self) -> ListingState {
        self.lock().clone()
    }

    pub fn filter(&self) -> FilterState {
        self.lock().filter.clone()
    }

    /// Whether a page request is running.
    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    /// Fetch `page`. With `reset` the result replaces the list and any
    /// request still running is superseded; otherwise it is appended.
    pub async fn fetch(&self, page: u32, reset: bool) -> FetchOutcome {
        let (_guard, generation, filter) = if reset {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            let guard = InFlight(&self.in_flight);
            let mut state = self.lock();
            state.generation += 1;
            state.error = None;
            (guard, state.generation, state.filter.clone())
        } else {
            let Some(guard) = self.claim() else {
                return FetchOutcome::Skipped;
            };
            let state = self.lock();
            (guard, state.generation, state.filter.clone())
        };
        self.run(page, reset, generation, &filter).await
    }

    /// Next page, after the configured delay. A no-op while a fetch is
    /// running, after the last page, or while an error is shown.
    pub async fn load_more(&self) -> FetchOutcome {
        let (generation, next, filter) = {
            let state = self.lock();
            if !state.has_more || state.error.is_some() {
                return FetchOutcome::Skipped;
            }
            (state.generation, state.page + 1, state.filter.clone())
        };
        let Some(_guard) = self.claim() else {
            return FetchOutcome::Skipped;
        };
        if !self.load_more_delay.is_zero() {
            tokio::time::sleep(self.load_more_delay).await;
        }
        self.run(next, false, generation, &filter).await
    }

    /// Replace the search text, persist it and reload from page 0.
    pub async fn set_search(&self, search: &str) -> FetchOutcome {
        self.update_filter(|f| f.search = search.to_string());
        self.fetch(0, true).await
    }

    /// Replace the facets, persist them and reload from page 0.
    pub async fn set_filters(&self, filters: crate::domain::filters::Filters) -> FetchOutcome {
        self.update_filter(|f| f.filters = filters);
        self.fetch(0, true).await
    }

    /// Clear search and facets, drop the saved copy and reload page 0.
    pub async fn reset_filters(&self) -> FetchOutcome {
        self.lock().filter = FilterState::default();
        if let Some(store) = &self.store
            && let Err(e) = store.clear()
        {
            warn!(error = %e, "Failed to clear saved filters");
        }
        self.fetch(0, true).await
    }

    /// Reload from page 0 after an error.
    pub async fn retry(&self) -> FetchOutcome {
        self.fetch(0, true).await
    }

    /// Hide the current error without reloading.
    pub fn dismiss_error(&self) {
        self.lock().error = None;
    }

    fn update_filter(&self, apply: impl FnOnce(&mut FilterState)) {
        let filter = {
            let mut state = self.lock();
            apply(&mut state.filter);
            state.filter.clone()
        };
        if let Some(store) = &self.store
            && let Err(e) = store.save(&filter)
        {
            warn!(error = %e, "Failed to save filters");
        }
    }

    fn claim(&self) -> Option<InFlight<'_>> {
        self.in_flight
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(&self.in_flight))
    }

    async fn run(&self, page: u32, reset: bool, generation: u64, filter: &FilterState) -> FetchOutcome {
        let today = Utc::now().date_naive();
        let result = fetch_page(self.source.as_ref(), filter, page, self.page_size, today).await;

        let mut state = self.lock();
        if state.generation != generation {
            debug!(page, "Dropping superseded page");
            return FetchOutcome::Stale;
        }
        match result {
            Ok(fetched) => {
                let added = fetched.items.len();
                if reset {
                    state.items = fetched.items;
                } else {
                    state.items.extend(fetched.items);
                }
                state.page = page;
                state.has_more = fetched.has_more;
                state.error = None;
                FetchOutcome::Loaded(added)
            }
            Err(e) => {
                warn!(error = %e, page, "Directory fetch failed");
                if reset {
                    state.items.clear();
                    state.page = 0;
                }
                state.has_more = false;
                state.error = Some("Failed to load callsigns. Please try again.".to_string());
                FetchOutcome::Failed
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListingState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::record;
    use crate::domain::filters::{ContactFilter, Filters};
    use std::sync::atomic::AtomicBool;

    /// Wraps the in-memory database, counting calls and optionally failing.
    struct CountingSource {
        db: Database,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl DirectorySource for CountingSource {
        async fn list_page(&self, query: &DirectoryQuery) -> anyhow::Result<Vec<CallsignRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            self.db.list_directory(query).await
        }

        async fn donator_ids(&self, ids: &[CallsignId]) -> anyhow::Result<HashSet<CallsignId>> {
            self.db.donator_ids(ids).await
        }
    }

    async fn seeded(count: usize) -> (Database, Vec<CallsignRecord>) {
        let db = Database::in_memory().await.unwrap();
        let mut records = Vec::new();
        for i in 0..count {
            let mut r = record(
                &format!("9M2A{i:03}"),
                &format!("2026-01-{:02}", 1 + i % 28),
                &format!("2026-01-01 {:02}:00:00", i % 24),
            );
            if i % 3 == 0 {
                r.phone = Some("012-3456789".to_string());
            }
            db.insert_callsign(&r).await.unwrap();
            records.push(r);
        }
        (db, records)
    }

    fn counting(db: Database) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            db,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn pages_concatenate_to_the_full_ordered_set() {
        let (db, _) = seeded(23).await;
        let expected: Vec<String> = db
            .list_directory(&DirectoryQuery {
                limit: 100,
                ..DirectoryQuery::default()
            })
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.callsign)
            .collect();

        for page_size in [1_u32, 5, 10, 23, 24] {
            let controller = ListingController::new(counting(db.clone()), None, page_size, Duration::ZERO);
            assert!(matches!(controller.fetch(0, true).await, FetchOutcome::Loaded(_)));
            while controller.snapshot().has_more {
                assert!(matches!(controller.load_more().await, FetchOutcome::Loaded(_)));
            }
            let got: Vec<String> = controller
                .snapshot()
                .items
                .into_iter()
                .map(|e| e.record.callsign)
                .collect();
            assert_eq!(got, expected, "page size {page_size}");
            assert_eq!(controller.load_more().await, FetchOutcome::Skipped);
        }
    }

    #[tokio::test]
    async fn concurrent_load_more_issues_one_request() {
        let (db, _) = seeded(30).await;
        let source = counting(db);
        let controller =
            ListingController::new(source.clone(), None, 10, Duration::from_millis(20));
        controller.fetch(0, true).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let (a, b) = tokio::join!(controller.load_more(), controller.load_more());
        assert_eq!(a, FetchOutcome::Loaded(10));
        assert_eq!(b, FetchOutcome::Skipped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(controller.snapshot().items.len(), 20);
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn reset_during_load_more_drops_the_page() {
        let (db, _) = seeded(30).await;
        let controller =
            ListingController::new(counting(db), None, 10, Duration::from_millis(100));
        controller.fetch(0, true).await;
        assert!(controller.snapshot().has_more);

        let (more, reset) = tokio::join!(controller.load_more(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.set_search("9M2A00").await
        });
        assert_eq!(more, FetchOutcome::Stale);
        assert_eq!(reset, FetchOutcome::Loaded(10));

        let state = controller.snapshot();
        assert_eq!(state.page, 0);
        assert_eq!(state.items.len(), 10);
        assert!(state.items.iter().all(|e| e.record.callsign.starts_with("9M2A00")));
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn derived_filters_apply_after_fetch() {
        let (db, _) = seeded(9).await;
        let controller = ListingController::new(counting(db), None, 24, Duration::ZERO);
        let outcome = controller
            .set_filters(Filters {
                contact: Some(ContactFilter::HasPhone),
                ..Filters::default()
            })
            .await;
        assert_eq!(outcome, FetchOutcome::Loaded(3));
        assert!(
            controller
                .snapshot()
                .items
                .iter()
                .all(|e| e.record.phone.is_some())
        );
    }

    #[tokio::test]
    async fn donator_badges_are_merged() {
        let (db, records) = seeded(3).await;
        db.grant_donator(&records[1].id, None, None).await.unwrap();
        let controller = ListingController::new(counting(db), None, 24, Duration::ZERO);
        controller.fetch(0, true).await;
        let state = controller.snapshot();
        let badged: Vec<_> = state
            .items
            .iter()
            .filter(|e| e.is_donator)
            .map(|e| e.record.id.clone())
            .collect();
        assert_eq!(badged, vec![records[1].id.clone()]);
    }

    #[tokio::test]
    async fn errors_discard_results_until_retry() {
        let (db, _) = seeded(5).await;
        let source = counting(db);
        let controller = ListingController::new(source.clone(), None, 24, Duration::ZERO);
        controller.fetch(0, true).await;
        assert_eq!(controller.snapshot().items.len(), 5);

        source.fail.store(true, Ordering::SeqCst);
        assert_eq!(controller.set_search("9M2").await, FetchOutcome::Failed);
        let failed = controller.snapshot();
        assert!(failed.items.is_empty());
        assert!(failed.error.is_some());
        assert_eq!(controller.load_more().await, FetchOutcome::Skipped);

        controller.dismiss_error();
        assert!(controller.snapshot().error.is_none());

        source.fail.store(false, Ordering::SeqCst);
        assert_eq!(controller.retry().await, FetchOutcome::Loaded(5));
        assert!(controller.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn filters_persist_and_reset_clears_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_storage.json");
        let (db, _) = seeded(4).await;

        let controller = ListingController::new(
            counting(db.clone()),
            Some(FilterStore::new(&path)),
            24,
            Duration::ZERO,
        );
        controller.set_search("9M2A001").await;
        assert_eq!(controller.snapshot().items.len(), 1);

        let restored = ListingController::new(
            counting(db.clone()),
            Some(FilterStore::new(&path)),
            24,
            Duration::ZERO,
        );
        assert_eq!(restored.filter().search, "9M2A001");

        restored.reset_filters().await;
        assert!(restored.filter().is_empty());
        assert!(!FilterStore::new(&path).contains());
        assert_eq!(restored.snapshot().items.len(), 4);
    }
}
