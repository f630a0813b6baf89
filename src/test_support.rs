use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errors::LoadError;
use crate::fetch::PageFetcher;
use crate::model::{record, DatasetKind, Match, Page, PerKind, Row};

/// In-memory backend serving fixed collections page by page.
///
/// Every call is recorded so tests can assert how many fetch sequences ran.
#[derive(Default)]
pub struct FixtureFetcher {
    datasets: Mutex<PerKind<Vec<Row>>>,
    failures: Mutex<HashMap<(DatasetKind, usize), LoadError>>,
    reported_totals: Mutex<HashMap<DatasetKind, usize>>,
    whole_first_page: Mutex<Vec<DatasetKind>>,
    calls: Mutex<Vec<(DatasetKind, usize)>>,
    delay: Option<Duration>,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, kind: DatasetKind, rows: Vec<Row>) -> Self {
        self.set_rows(kind, rows);
        self
    }

    /// Fail every fetch of `page_index` for `kind` with `error`.
    pub fn failing_page(self, kind: DatasetKind, page_index: usize, error: LoadError) -> Self {
        self.fail_page(kind, page_index, error);
        self
    }

    /// Report `total` items for `kind` regardless of how many rows exist.
    pub fn with_reported_total(self, kind: DatasetKind, total: usize) -> Self {
        self.reported_totals.lock().insert(kind, total);
        self
    }

    /// Answer page 0 of `kind` with every row while still advertising the
    /// page count implied by the requested size.
    pub fn with_whole_first_page(self, kind: DatasetKind) -> Self {
        self.whole_first_page.lock().push(kind);
        self
    }

    /// Sleep before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_rows(&self, kind: DatasetKind, rows: Vec<Row>) {
        *self.datasets.lock().get_mut(kind) = rows;
    }

    pub fn fail_page(&self, kind: DatasetKind, page_index: usize, error: LoadError) {
        self.failures.lock().insert((kind, page_index), error);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Page indexes requested for `kind`, in request order.
    pub fn calls_for(&self, kind: DatasetKind) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, page)| *page)
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl PageFetcher for FixtureFetcher {
    async fn fetch_page(
        &self,
        _job_id: &str,
        kind: DatasetKind,
        page_index: usize,
        page_size: usize,
    ) -> Result<Page, LoadError> {
        self.calls.lock().push((kind, page_index));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().get(&(kind, page_index)) {
            return Err(error.clone());
        }

        let datasets = self.datasets.lock();
        let rows = datasets.get(kind);
        let page_size = page_size.max(1);
        let total_items = self
            .reported_totals
            .lock()
            .get(&kind)
            .copied()
            .unwrap_or(rows.len());
        let start = (page_index * page_size).min(rows.len());
        let end = if page_index == 0 && self.whole_first_page.lock().contains(&kind) {
            rows.len()
        } else {
            (start + page_size).min(rows.len())
        };
        Ok(Page {
            items: rows[start..end].to_vec(),
            total_items,
            total_pages: total_items.div_ceil(page_size),
            page_index,
        })
    }
}

/// `count` records carrying only a sequential id.
pub fn numbered_records(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| Row::Record(record([("id", i.to_string())])))
        .collect()
}

const AGENCIES: [&str; 5] = ["Dakar Plateau", "Thiès Centre", "Saint-Louis", "Ziguinchor", "Kaolack"];
const SERVICES: [&str; 4] = ["Cash In", "Cash Out", "Transfert", "Paiement Facture"];
const COUNTRIES: [&str; 3] = ["SN", "ML", "CI"];

/// Seeded back-office style records with mixed header spellings.
pub fn generate_records(count: usize, seed: u64) -> Vec<Row> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| Row::Record(generated_record(&mut rng, i)))
        .collect()
}

/// Seeded matches whose BO side looks like [`generate_records`] output.
pub fn generate_matches(count: usize, seed: u64) -> Vec<Row> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let bo_data = generated_record(&mut rng, i);
            let mut partner_data = record([("Transaction ID", format!("GU{i:08}"))]);
            if let Some(amount) = bo_data.get("Montant").or_else(|| bo_data.get("Amount")) {
                partner_data.insert("Amount".to_string(), amount.clone());
            }
            Row::Match(Match {
                key: format!("GU{i:08}"),
                bo_data,
                partner_data,
                differences: Vec::new(),
            })
        })
        .collect()
}

fn generated_record(rng: &mut StdRng, index: usize) -> crate::model::Record {
    let agency = AGENCIES[rng.random_range(0..AGENCIES.len())];
    let service = SERVICES[rng.random_range(0..SERVICES.len())];
    let country = COUNTRIES[rng.random_range(0..COUNTRIES.len())];
    let amount = rng.random_range(100..500_000u32);
    let day = rng.random_range(1..=28u32);

    // Half the rows use the mis-encoded / alternate spellings seen in uploads.
    if rng.random_bool(0.5) {
        record([
            ("Numéro Trans GU", format!("GU{index:08}")),
            ("Agence", agency.to_string()),
            ("Service", service.to_string()),
            ("Pays", country.to_string()),
            ("Date", format!("2024-03-{day:02}")),
            ("Montant", format!("{amount},50")),
        ])
    } else {
        record([
            ("NumÃ©ro Trans GU", format!("GU{index:08}")),
            ("agency", agency.to_string()),
            ("service_name", service.to_string()),
            ("country", country.to_string()),
            ("Date Opération", format!("{day:02}/03/2024")),
            ("Amount", format!("{amount}.50")),
        ])
    }
}
