//! # Dataset Store
//!
//! Per-job owner of every loaded collection. Each dataset kind has a slot with
//! its raw rows, the rows matching the current search term, the visible page
//! window, the load state and the progress of the current run.
//!
//! Loads go through the [`LoadCoordinator`], so concurrent activations of one
//! kind share a single fetch sequence. Completed collections are kept in a
//! [`FingerprintedCache`] that stays valid while the job's reported counts are
//! unchanged.
//!
//! All state sits behind one `parking_lot::Mutex`. The lock is never held
//! across an `.await`; the store can be cloned and used from many tasks.

use crate::aggregate::AggregateComputer;
use crate::cache::{compute_fingerprint, FingerprintedCache};
use crate::config::SyncConfig;
use crate::coordinator::LoadCoordinator;
use crate::errors::LoadError;
use crate::fetch::PageFetcher;
use crate::filter::filter_rows;
use crate::loader::PagedLoader;
use crate::model::{
    AgencySummaryRow, DatasetKind, InlineResults, LoadState, PageWindow, PerKind, Progress,
    ResultCounts, Row, VolumeTotals,
};
use crate::normalize::canonical_columns;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
struct KindSlot {
    raw: Arc<Vec<Row>>,
    filtered: Arc<Vec<Row>>,
    term: String,
    page_index: usize,
    load_state: LoadState,
    progress: Progress,
}

/// What the cache keeps for a completed kind.
#[derive(Debug, Clone)]
struct CachedView {
    raw: Arc<Vec<Row>>,
    filtered: Arc<Vec<Row>>,
    term: String,
}

#[derive(Debug)]
struct StoreState {
    job_id: String,
    /// Bumped by every job switch; results of older runs are discarded.
    generation: u64,
    counts: ResultCounts,
    inline: InlineResults,
    slots: PerKind<KindSlot>,
    cache: FingerprintedCache<DatasetKind, CachedView>,
    aggregates: AggregateComputer,
}

impl StoreState {
    fn new(job_id: String) -> Self {
        Self {
            job_id,
            generation: 0,
            counts: ResultCounts::default(),
            inline: InlineResults::default(),
            slots: PerKind::default(),
            cache: FingerprintedCache::new(),
            aggregates: AggregateComputer::new(),
        }
    }

    fn observe_counts(&mut self, counts: ResultCounts) -> bool {
        self.counts = counts;
        let fingerprint = compute_fingerprint(&counts);
        self.aggregates.observe(fingerprint);
        self.cache.observe(fingerprint)
    }

    /// Make `raw` the kind's collection and mark it loaded.
    fn install(&mut self, kind: DatasetKind, raw: Arc<Vec<Row>>) {
        let slot = self.slots.get_mut(kind);
        if !Arc::ptr_eq(&slot.raw, &raw) || !slot.load_state.is_loaded() {
            slot.filtered = apply_term(&raw, &slot.term);
            slot.raw = raw;
            slot.page_index = 0;
            slot.load_state = LoadState::Loaded;
            slot.progress = Progress::complete(slot.raw.len());
            self.aggregates.invalidate();
        }
        self.remember(kind);
    }

    /// Refresh the kind's cache entry from its slot.
    fn remember(&mut self, kind: DatasetKind) {
        let slot = self.slots.get(kind);
        let view = CachedView {
            raw: Arc::clone(&slot.raw),
            filtered: Arc::clone(&slot.filtered),
            term: slot.term.clone(),
        };
        let fingerprint = self.cache.current();
        self.cache.put(kind, fingerprint, view);
    }

}

fn apply_term(raw: &Arc<Vec<Row>>, term: &str) -> Arc<Vec<Row>> {
    if term.trim().is_empty() {
        Arc::clone(raw)
    } else {
        Arc::new(filter_rows(raw, term))
    }
}

/// Loaded reconciliation results of one job.
#[derive(Clone)]
pub struct DatasetStore {
    state: Arc<Mutex<StoreState>>,
    coordinator: Arc<LoadCoordinator>,
    loader: Arc<PagedLoader>,
    window_size: usize,
}

impl DatasetStore {
    pub fn new(job_id: impl Into<String>, fetcher: Arc<dyn PageFetcher>, config: &SyncConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::new(job_id.into()))),
            coordinator: Arc::new(LoadCoordinator::new()),
            loader: Arc::new(PagedLoader::new(fetcher, &config.loader)),
            window_size: config.window_size.max(1),
        }
    }

    pub fn with_counts(self, counts: ResultCounts) -> Self {
        self.update_counts(counts);
        self
    }

    pub fn with_inline(self, inline: InlineResults) -> Self {
        self.state.lock().inline = inline;
        self
    }

    pub fn job_id(&self) -> String {
        self.state.lock().job_id.clone()
    }

    pub fn counts(&self) -> ResultCounts {
        self.state.lock().counts
    }

    /// Make `kind` available, loading it if needed.
    ///
    /// Served from the cache while the reported counts are unchanged, then
    /// from a complete inline payload, otherwise through a (possibly shared)
    /// paged load. On failure the kind's previous rows stay visible and its
    /// state becomes [`LoadState::Failed`]; calling again retries.
    pub async fn activate(&self, kind: DatasetKind) -> Result<(), LoadError> {
        let (job_id, generation) = {
            let mut state = self.state.lock();
            if let Some(view) = state.cache.get(&kind).cloned() {
                debug!(%kind, rows = view.raw.len(), "serving kind from cache");
                let slot = state.slots.get_mut(kind);
                if !Arc::ptr_eq(&slot.raw, &view.raw) {
                    slot.raw = view.raw;
                    slot.filtered = view.filtered;
                    slot.term = view.term;
                    slot.page_index = 0;
                }
                slot.load_state = LoadState::Loaded;
                slot.progress = Progress::complete(slot.raw.len());
                return Ok(());
            }

            let reported = state.counts.get(kind);
            if let Some(rows) = state.inline.complete_for(kind, reported) {
                let rows = Arc::new(rows.to_vec());
                debug!(%kind, rows = rows.len(), "using inline results");
                state.install(kind, rows);
                return Ok(());
            }

            let slot = state.slots.get_mut(kind);
            if slot.load_state != LoadState::Loading {
                slot.load_state = LoadState::Loading;
                slot.progress = Progress::default();
            }
            (state.job_id.clone(), state.generation)
        };

        let loader = Arc::clone(&self.loader);
        let progress_sink = Arc::clone(&self.state);
        let result = self
            .coordinator
            .ensure_loaded(generation, kind, move |cancel| async move {
                let report = |progress: Progress| {
                    let mut state = progress_sink.lock();
                    if state.generation == generation {
                        state.slots.get_mut(kind).progress = progress;
                    }
                };
                loader.load_all(&job_id, kind, report, Some(&cancel)).await
            })
            .await;

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(%kind, "discarding result of a load for a previous job");
            return Err(LoadError::Cancelled);
        }
        match result {
            Ok(rows) => {
                // The fingerprint stays on the reported counts, so a mismatch
                // is only logged.
                let reported = state.counts.get(kind);
                if reported != rows.len() {
                    info!(%kind, reported, loaded = rows.len(), "reported count differs from loaded rows");
                }
                state.install(kind, rows);
                Ok(())
            }
            Err(err) => {
                warn!(%kind, error = %err, transient = err.is_transient(), "dataset load failed");
                state.slots.get_mut(kind).load_state = LoadState::Failed(err.clone());
                Err(err)
            }
        }
    }

    /// Filter `kind` by `term` and go back to the first page.
    ///
    /// Returns the number of matching rows. A blank term shows everything.
    pub fn search(&self, kind: DatasetKind, term: &str) -> usize {
        let mut state = self.state.lock();
        let slot = state.slots.get_mut(kind);
        slot.term = term.to_string();
        slot.filtered = apply_term(&slot.raw, term);
        slot.page_index = 0;
        let matching = slot.filtered.len();
        let loaded = slot.load_state.is_loaded();
        if loaded {
            state.remember(kind);
        }
        debug!(%kind, term, matching, "search applied");
        matching
    }

    /// Window `index` of the filtered rows, clamped to the last window.
    pub fn page(&self, kind: DatasetKind, index: usize) -> PageWindow {
        let window_size = self.window_size;
        let mut state = self.state.lock();
        let slot = state.slots.get_mut(kind);
        let total_rows = slot.filtered.len();
        let page_count = total_rows.div_ceil(window_size).max(1);
        let page_index = index.min(page_count - 1);
        slot.page_index = page_index;

        let start = (page_index * window_size).min(total_rows);
        let end = (start + window_size).min(total_rows);
        PageWindow {
            rows: slot.filtered[start..end].to_vec(),
            page_index,
            page_count,
            total_rows,
            window_size,
        }
    }

    pub fn current_page(&self, kind: DatasetKind) -> usize {
        self.state.lock().slots.get(kind).page_index
    }

    pub fn progress_of(&self, kind: DatasetKind) -> Progress {
        self.state.lock().slots.get(kind).progress
    }

    pub fn load_state(&self, kind: DatasetKind) -> LoadState {
        self.state.lock().slots.get(kind).load_state.clone()
    }

    /// Every loaded row of `kind`, unfiltered.
    pub fn rows(&self, kind: DatasetKind) -> Arc<Vec<Row>> {
        Arc::clone(&self.state.lock().slots.get(kind).raw)
    }

    /// Rows of `kind` matching the current search term.
    pub fn filtered_rows(&self, kind: DatasetKind) -> Arc<Vec<Row>> {
        Arc::clone(&self.state.lock().slots.get(kind).filtered)
    }

    /// Agency rollup over matches (BO side) and BO-only records.
    pub fn summary_rows(&self) -> Arc<Vec<AgencySummaryRow>> {
        let mut state = self.state.lock();
        let StoreState {
            slots, aggregates, ..
        } = &mut *state;
        aggregates.summary(
            slots.get(DatasetKind::Matches).raw.as_slice(),
            slots.get(DatasetKind::BackOfficeOnly).raw.as_slice(),
        )
    }

    pub fn volume_totals(&self) -> Arc<VolumeTotals> {
        let mut state = self.state.lock();
        let StoreState {
            slots, aggregates, ..
        } = &mut *state;
        let collections: Vec<(DatasetKind, &[Row])> = slots
            .iter()
            .map(|(kind, slot)| (kind, slot.raw.as_slice()))
            .collect();
        aggregates.totals(&collections)
    }

    /// Canonical column names present in the loaded rows of `kind`.
    pub fn columns(&self, kind: DatasetKind) -> Vec<String> {
        let raw = self.rows(kind);
        canonical_columns(raw.iter().map(Row::source_record))
    }

    /// Adopt freshly reported totals. Cached kinds whose fingerprint no longer
    /// matches are reloaded on their next activation.
    pub fn update_counts(&self, counts: ResultCounts) {
        let changed = self.state.lock().observe_counts(counts);
        if changed {
            info!(?counts, "result counts changed");
        }
    }

    /// Point the store at another job.
    ///
    /// In-flight loads are cancelled and every slot, cache entry and aggregate
    /// of the previous job is dropped.
    pub fn switch_job(&self, job_id: impl Into<String>, counts: ResultCounts, inline: InlineResults) {
        let job_id = job_id.into();
        let mut state = self.state.lock();
        info!(from = %state.job_id, to = %job_id, "switching job");
        let generation = state.generation + 1;
        // Retired under the state lock: an activation that read the old
        // generation can neither start nor join a run after this point.
        let cancelled = self.coordinator.retire_before(generation);
        debug!(cancelled, generation, "previous job's loads retired");
        *state = StoreState::new(job_id);
        state.generation = generation;
        state.inline = inline;
        state.observe_counts(counts);
    }

    /// Edit one loaded row of `kind` in place.
    ///
    /// The edited collection replaces the kind's cache entry, so later
    /// activations keep serving it. Aggregates are recomputed on next read.
    /// Returns `false` when `index` is out of range.
    pub fn update_record(&self, kind: DatasetKind, index: usize, edit: impl FnOnce(&mut Row)) -> bool {
        let mut state = self.state.lock();
        let slot = state.slots.get_mut(kind);
        let Some(row) = Arc::make_mut(&mut slot.raw).get_mut(index) else {
            return false;
        };
        edit(row);
        slot.filtered = apply_term(&slot.raw, &slot.term);
        if slot.load_state.is_loaded() {
            state.remember(kind);
        }
        state.aggregates.invalidate();
        debug!(%kind, index, "row updated");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::model::record;
    use crate::test_support::{numbered_records, FixtureFetcher};

    fn config() -> SyncConfig {
        SyncConfig {
            loader: LoaderConfig {
                page_size: 2,
                chunk_size: 1,
                yield_every: 1,
            },
            window_size: 2,
            ..SyncConfig::default()
        }
    }

    fn store_with(fetcher: &Arc<FixtureFetcher>) -> DatasetStore {
        let fetcher: Arc<dyn PageFetcher> = fetcher.clone();
        DatasetStore::new("job-1", fetcher, &config())
    }

    #[tokio::test]
    async fn activate_then_page() {
        let fetcher = Arc::new(FixtureFetcher::new().with_rows(DatasetKind::Matches, numbered_records(5)));
        let store = store_with(&fetcher);
        store.activate(DatasetKind::Matches).await.unwrap();

        assert_eq!(store.load_state(DatasetKind::Matches), LoadState::Loaded);
        assert_eq!(store.progress_of(DatasetKind::Matches), Progress::complete(5));
        let last = store.page(DatasetKind::Matches, 10);
        assert_eq!(last.page_index, 2);
        assert_eq!(last.page_count, 3);
        assert_eq!(last.rows.len(), 1);
        assert_eq!(store.current_page(DatasetKind::Matches), 2);
    }

    #[tokio::test]
    async fn page_of_empty_kind_is_a_single_empty_window() {
        let store = store_with(&Arc::new(FixtureFetcher::new()));
        let window = store.page(DatasetKind::PartnerOnly, 3);
        assert_eq!(window.page_index, 0);
        assert_eq!(window.page_count, 1);
        assert!(window.rows.is_empty());
    }

    #[tokio::test]
    async fn search_filters_and_resets_page() {
        let fetcher = Arc::new(FixtureFetcher::new().with_rows(DatasetKind::BackOfficeOnly, numbered_records(12)));
        let store = store_with(&fetcher);
        store.activate(DatasetKind::BackOfficeOnly).await.unwrap();
        store.page(DatasetKind::BackOfficeOnly, 3);

        // ids 1, 10, 11
        assert_eq!(store.search(DatasetKind::BackOfficeOnly, "1"), 3);
        assert_eq!(store.current_page(DatasetKind::BackOfficeOnly), 0);
        assert_eq!(store.search(DatasetKind::BackOfficeOnly, "  "), 12);
    }

    #[tokio::test]
    async fn inline_results_skip_the_network() {
        let fetcher = Arc::new(FixtureFetcher::new());
        let inline = InlineResults::new().with(DatasetKind::PartnerOnly, numbered_records(2));
        let store = store_with(&fetcher)
            .with_counts(ResultCounts {
                partner_only: 2,
                ..Default::default()
            })
            .with_inline(inline);
        store.activate(DatasetKind::PartnerOnly).await.unwrap();
        assert_eq!(store.rows(DatasetKind::PartnerOnly).len(), 2);
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn partial_inline_payload_is_ignored() {
        let fetcher = Arc::new(FixtureFetcher::new().with_rows(DatasetKind::PartnerOnly, numbered_records(4)));
        let inline = InlineResults::new().with(DatasetKind::PartnerOnly, numbered_records(2));
        let store = store_with(&fetcher)
            .with_counts(ResultCounts {
                partner_only: 4,
                ..Default::default()
            })
            .with_inline(inline);
        store.activate(DatasetKind::PartnerOnly).await.unwrap();
        assert_eq!(store.rows(DatasetKind::PartnerOnly).len(), 4);
        assert_eq!(fetcher.calls_for(DatasetKind::PartnerOnly), vec![0, 1]);
    }

    #[tokio::test]
    async fn update_record_survives_reactivation() {
        let rows = vec![Row::Record(record([("Agence", "A"), ("Service", "S"), ("Montant", "10")]))];
        let fetcher = Arc::new(FixtureFetcher::new().with_rows(DatasetKind::BackOfficeOnly, rows));
        let store = store_with(&fetcher);
        store.activate(DatasetKind::BackOfficeOnly).await.unwrap();
        assert_eq!(store.summary_rows()[0].total_volume, 10.0);

        let updated = store.update_record(DatasetKind::BackOfficeOnly, 0, |row| {
            row.source_record_mut().insert("Montant".into(), "25".into());
        });
        assert!(updated);
        assert!(!store.update_record(DatasetKind::BackOfficeOnly, 9, |_| {}));
        assert_eq!(store.summary_rows()[0].total_volume, 25.0);

        store.update_record(DatasetKind::BackOfficeOnly, 0, |row| {
            row.source_record_mut().insert("Statut".into(), "VALIDE".into());
        });
        store.activate(DatasetKind::BackOfficeOnly).await.unwrap();
        assert_eq!(fetcher.calls_for(DatasetKind::BackOfficeOnly), vec![0]);
        let rows = store.rows(DatasetKind::BackOfficeOnly);
        assert_eq!(rows[0].source_record().get("Statut").map(String::as_str), Some("VALIDE"));
        assert_eq!(store.summary_rows()[0].total_volume, 25.0);
    }

    #[tokio::test]
    async fn short_load_keeps_reported_counts_as_fingerprint() {
        let fetcher = Arc::new(
            FixtureFetcher::new()
                .with_rows(DatasetKind::Matches, numbered_records(3))
                .with_rows(DatasetKind::PartnerOnly, numbered_records(2)),
        );
        let reported = ResultCounts {
            matches: 7,
            partner_only: 2,
            ..Default::default()
        };
        let store = store_with(&fetcher).with_counts(reported);
        store.activate(DatasetKind::Matches).await.unwrap();
        store.activate(DatasetKind::PartnerOnly).await.unwrap();
        assert_eq!(store.counts(), reported);
        let before = fetcher.total_calls();

        store.update_counts(reported);
        store.activate(DatasetKind::Matches).await.unwrap();
        store.activate(DatasetKind::PartnerOnly).await.unwrap();
        assert_eq!(fetcher.total_calls(), before);
        assert_eq!(store.rows(DatasetKind::Matches).len(), 3);
    }

    #[tokio::test]
    async fn columns_are_canonical() {
        let rows = vec![Row::Record(record([("NumÃ©ro Trans GU", "1"), ("agence", "A")]))];
        let fetcher = Arc::new(FixtureFetcher::new().with_rows(DatasetKind::BackOfficeOnly, rows));
        let store = store_with(&fetcher);
        store.activate(DatasetKind::BackOfficeOnly).await.unwrap();
        assert_eq!(store.columns(DatasetKind::BackOfficeOnly), vec!["Numéro Trans GU", "Agence"]);
    }
}
