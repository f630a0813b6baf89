//! # Paged Loading
//!
//! Drives a [`PageFetcher`] across every page of one dataset kind. Pages are
//! requested sequentially in ascending order, absorbed through the
//! [`CooperativeScheduler`], and reported through a progress callback. A run
//! either returns the complete collection or an error; partial data never
//! escapes.

use crate::config::LoaderConfig;
use crate::errors::LoadError;
use crate::fetch::PageFetcher;
use crate::model::{DatasetKind, Page, Progress, Row};
use crate::scheduler::{checkpoint, CooperativeScheduler};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct PagedLoader {
    fetcher: Arc<dyn PageFetcher>,
    scheduler: CooperativeScheduler,
    page_size: usize,
}

impl PagedLoader {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &LoaderConfig) -> Self {
        Self {
            fetcher,
            scheduler: CooperativeScheduler::new(config.chunk_size, config.yield_every),
            page_size: config.page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch and absorb every page of `kind` for `job_id`.
    ///
    /// `on_progress` sees a non-decreasing `current` and, on success, a final
    /// report with `current == total`. Any fetch failure aborts the run.
    pub async fn load_all<F>(
        &self,
        job_id: &str,
        kind: DatasetKind,
        mut on_progress: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Row>, LoadError>
    where
        F: FnMut(Progress) + Send,
    {
        let started = Instant::now();
        let mut rows: Vec<Row> = Vec::new();
        let mut progress = Progress::default();

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(LoadError::Cancelled);
        }

        let first = self.fetch(job_id, kind, 0).await?;
        let mut total_pages = first.total_pages;
        let complete = first.is_complete_dataset();
        self.absorb_page(first, &mut rows, &mut progress, &mut on_progress, cancel)
            .await?;

        let mut page_index = 0;
        if !complete {
            while page_index + 1 < total_pages {
                page_index += 1;
                checkpoint(cancel).await?;

                let page = self.fetch(job_id, kind, page_index).await?;
                if page.items.is_empty() {
                    warn!(
                        %kind,
                        page = page_index,
                        loaded = rows.len(),
                        reported_total = page.total_items,
                        "backend returned an empty page before the reported total; stopping"
                    );
                    break;
                }
                total_pages = page.total_pages;
                self.absorb_page(page, &mut rows, &mut progress, &mut on_progress, cancel)
                    .await?;
            }
        }

        if rows.is_empty() || progress.current != rows.len() || progress.total != rows.len() {
            on_progress(Progress::complete(rows.len()));
        }

        info!(
            job_id,
            %kind,
            items = rows.len(),
            pages = page_index + 1,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dataset loaded"
        );
        Ok(rows)
    }

    async fn fetch(&self, job_id: &str, kind: DatasetKind, page_index: usize) -> Result<Page, LoadError> {
        self.fetcher
            .fetch_page(job_id, kind, page_index, self.page_size)
            .await
            .inspect_err(|err| {
                warn!(job_id, %kind, page = page_index, error = %err, "page fetch failed");
            })
    }

    async fn absorb_page<F>(
        &self,
        page: Page,
        rows: &mut Vec<Row>,
        progress: &mut Progress,
        on_progress: &mut F,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), LoadError>
    where
        F: FnMut(Progress) + Send,
    {
        let Page {
            items,
            total_items,
            page_index,
            ..
        } = page;
        let stats = self.scheduler.absorb(items, rows, cancel).await?;
        progress.advance(stats.items, total_items);
        debug!(
            page = page_index,
            items = stats.items,
            yields = stats.yields,
            current = progress.current,
            total = progress.total,
            "page absorbed"
        );
        on_progress(*progress);
        Ok(())
    }
}
