//! # Data Model
//!
//! Core data structures for reconciliation result sets: dataset kinds, loosely
//! typed records, matched pairs, pages and per-kind load bookkeeping.

use crate::errors::LoadError;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One of the result collections produced by a reconciliation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    /// Record pairs the backend considers corresponding.
    Matches,
    /// Back-office records without a partner counterpart.
    BackOfficeOnly,
    /// Partner records without a back-office counterpart.
    PartnerOnly,
    /// Records present on both sides whose fields disagree.
    Mismatches,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 4] = [
        DatasetKind::Matches,
        DatasetKind::BackOfficeOnly,
        DatasetKind::PartnerOnly,
        DatasetKind::Mismatches,
    ];

    /// Path segment of the paged endpoint serving this kind.
    pub fn path_segment(self) -> &'static str {
        match self {
            DatasetKind::Matches => "matches",
            DatasetKind::BackOfficeOnly => "bo-only",
            DatasetKind::PartnerOnly => "partner-only",
            DatasetKind::Mismatches => "mismatches",
        }
    }

    /// JSON field holding the page items in the endpoint payload.
    pub fn payload_field(self) -> &'static str {
        match self {
            DatasetKind::Matches => "matches",
            DatasetKind::BackOfficeOnly => "boOnly",
            DatasetKind::PartnerOnly => "partnerOnly",
            DatasetKind::Mismatches => "mismatches",
        }
    }

    fn index(self) -> usize {
        match self {
            DatasetKind::Matches => 0,
            DatasetKind::BackOfficeOnly => 1,
            DatasetKind::PartnerOnly => 2,
            DatasetKind::Mismatches => 3,
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.path_segment())
    }
}

/// Fixed-size table indexed by [`DatasetKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerKind<T> {
    slots: [T; 4],
}

impl<T> PerKind<T> {
    pub fn from_fn(mut f: impl FnMut(DatasetKind) -> T) -> Self {
        Self {
            slots: DatasetKind::ALL.map(&mut f),
        }
    }

    pub fn get(&self, kind: DatasetKind) -> &T {
        &self.slots[kind.index()]
    }

    pub fn get_mut(&mut self, kind: DatasetKind) -> &mut T {
        &mut self.slots[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (DatasetKind, &T)> {
        DatasetKind::ALL.into_iter().zip(self.slots.iter())
    }
}

/// Ordered field name to value mapping. Field sets vary between records.
pub type Record = IndexMap<String, String>;

/// Build a record from `(field, value)` pairs, keeping their order.
pub fn record<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Record
where
    K: Into<String>,
    V: Into<String>,
{
    fields
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Field-level disagreement inside a match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Difference {
    pub bo_column: String,
    pub partner_column: String,
    #[serde(deserialize_with = "lenient_string")]
    pub bo_value: String,
    #[serde(deserialize_with = "lenient_string")]
    pub partner_value: String,
}

/// A back-office record paired with its partner counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Match {
    #[serde(deserialize_with = "lenient_string")]
    pub key: String,
    #[serde(deserialize_with = "lenient_record")]
    pub bo_data: Record,
    #[serde(deserialize_with = "lenient_record")]
    pub partner_data: Record,
    pub differences: Vec<Difference>,
}

/// Element of every loaded collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Row {
    Match(Match),
    Record(Record),
}

impl Row {
    /// Record carrying the back-office view of this row.
    ///
    /// Matches expose their BO side; plain records expose themselves.
    pub fn source_record(&self) -> &Record {
        match self {
            Row::Match(m) => &m.bo_data,
            Row::Record(r) => r,
        }
    }

    pub fn source_record_mut(&mut self) -> &mut Record {
        match self {
            Row::Match(m) => &mut m.bo_data,
            Row::Record(r) => r,
        }
    }

    pub fn as_match(&self) -> Option<&Match> {
        match self {
            Row::Match(m) => Some(m),
            Row::Record(_) => None,
        }
    }

    /// Every value a search term is compared against.
    pub fn searchable_values(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            Row::Match(m) => Box::new(
                std::iter::once(m.key.as_str())
                    .chain(m.bo_data.values().map(String::as_str))
                    .chain(m.partner_data.values().map(String::as_str)),
            ),
            Row::Record(r) => Box::new(r.values().map(String::as_str)),
        }
    }

    /// Decode one payload item for the given kind.
    pub fn from_json(kind: DatasetKind, value: serde_json::Value) -> serde_json::Result<Self> {
        match kind {
            DatasetKind::Matches => serde_json::from_value(value).map(Row::Match),
            _ => {
                let wrapper: LenientRecord = serde_json::from_value(value)?;
                Ok(Row::Record(wrapper.0))
            }
        }
    }
}

impl From<Match> for Row {
    fn from(value: Match) -> Self {
        Row::Match(value)
    }
}

impl From<Record> for Row {
    fn from(value: Record) -> Self {
        Row::Record(value)
    }
}

/// One page of one dataset kind as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Row>,
    pub total_items: usize,
    pub total_pages: usize,
    pub page_index: usize,
}

impl Page {
    /// Whether this page alone already holds the whole dataset.
    pub fn is_complete_dataset(&self) -> bool {
        self.total_pages <= 1 || (self.page_index == 0 && self.items.len() >= self.total_items)
    }
}

/// Load lifecycle of one dataset kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Failed(LoadError),
}

impl LoadState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadState::Loaded)
    }
}

/// Progress of one load run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
}

impl Progress {
    pub fn new(current: usize, total: usize) -> Self {
        let current = current.min(total);
        Self {
            current,
            total,
            percentage: percentage_of(current, total),
        }
    }

    /// Progress of a run that finished with `total` items.
    pub fn complete(total: usize) -> Self {
        Self {
            current: total,
            total,
            percentage: 100,
        }
    }

    /// Add `items` to the current count, adopting the latest reported total.
    ///
    /// `current` never decreases and never exceeds `total`.
    pub fn advance(&mut self, items: usize, reported_total: usize) {
        self.total = self.total.max(reported_total);
        self.current = self.current.saturating_add(items).min(self.total);
        self.percentage = percentage_of(self.current, self.total);
    }
}

fn percentage_of(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((current as f64 / total as f64) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Totals a job reports for each collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultCounts {
    pub matches: usize,
    pub bo_only: usize,
    pub partner_only: usize,
    pub mismatches: usize,
}

impl ResultCounts {
    pub fn get(&self, kind: DatasetKind) -> usize {
        match kind {
            DatasetKind::Matches => self.matches,
            DatasetKind::BackOfficeOnly => self.bo_only,
            DatasetKind::PartnerOnly => self.partner_only,
            DatasetKind::Mismatches => self.mismatches,
        }
    }
}

/// Full arrays embedded in a job's initial result payload for small datasets.
#[derive(Debug, Clone, Default)]
pub struct InlineResults {
    collections: PerKind<Option<Vec<Row>>>,
}

impl InlineResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: DatasetKind, rows: Vec<Row>) -> Self {
        *self.collections.get_mut(kind) = Some(rows);
        self
    }

    /// Inline rows for `kind` when they cover the whole reported total.
    pub fn complete_for(&self, kind: DatasetKind, reported_total: usize) -> Option<&[Row]> {
        self.collections
            .get(kind)
            .as_deref()
            .filter(|rows| rows.len() >= reported_total)
    }
}

/// One rollup row per distinct (agency, service, country).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencySummaryRow {
    pub agency: String,
    pub service: String,
    pub country: String,
    pub date: String,
    pub total_volume: f64,
    pub record_count: usize,
}

/// Volume and record count of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct KindVolume {
    pub record_count: usize,
    pub total_volume: f64,
}

/// Volume totals across every loaded collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct VolumeTotals {
    pub per_kind: Vec<(DatasetKind, KindVolume)>,
    pub grand_total: f64,
}

impl VolumeTotals {
    pub fn for_kind(&self, kind: DatasetKind) -> KindVolume {
        self.per_kind
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| *v)
            .unwrap_or_default()
    }
}

/// Fixed-size slice of a filtered collection handed to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct PageWindow {
    pub rows: Vec<Row>,
    pub page_index: usize,
    pub page_count: usize,
    pub total_rows: usize,
    pub window_size: usize,
}

#[derive(Deserialize)]
struct LenientRecord(#[serde(deserialize_with = "lenient_record")] Record);

/// Accept any JSON scalar where a string is expected.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(scalar_to_string(value))
}

/// Decode an object whose values may be strings, numbers, booleans or nulls.
fn lenient_record<'de, D>(deserializer: D) -> Result<Record, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: IndexMap<String, serde_json::Value> = IndexMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| (key, scalar_to_string(value)))
        .collect())
}

fn scalar_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_percentage_rounds() {
        let progress = Progress::new(1, 3);
        assert_eq!(progress.percentage, 33);
        let progress = Progress::new(2, 3);
        assert_eq!(progress.percentage, 67);
        assert_eq!(Progress::new(0, 0).percentage, 0);
    }

    #[test]
    fn progress_advance_is_clamped() {
        let mut progress = Progress::default();
        progress.advance(4, 5);
        assert_eq!(progress.current, 4);
        progress.advance(4, 5);
        assert_eq!(progress.current, 5);
        assert_eq!(progress.percentage, 100);
    }

    #[test]
    fn match_decodes_camel_case_payload() {
        let row = Row::from_json(
            DatasetKind::Matches,
            json!({
                "key": "TX-1",
                "boData": { "Agence": "A", "Montant": 100 },
                "partnerData": { "Agency": "A", "Amount": "100.00" },
                "differences": [
                    { "boColumn": "Montant", "partnerColumn": "Amount", "boValue": 100, "partnerValue": "100.00" }
                ]
            }),
        )
        .unwrap();
        let m = row.as_match().unwrap();
        assert_eq!(m.key, "TX-1");
        assert_eq!(m.bo_data.get("Montant").map(String::as_str), Some("100"));
        assert_eq!(m.differences[0].bo_value, "100");
    }

    #[test]
    fn record_keeps_field_order_and_coerces_scalars() {
        let row = Row::from_json(
            DatasetKind::BackOfficeOnly,
            json!({ "z": 1, "a": null, "m": true }),
        )
        .unwrap();
        let keys: Vec<&str> = row.source_record().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(row.source_record()["a"], "");
        assert_eq!(row.source_record()["m"], "true");
    }

    #[test]
    fn inline_results_require_full_coverage() {
        let inline = InlineResults::new().with(
            DatasetKind::PartnerOnly,
            vec![Row::Record(record([("a", "1")]))],
        );
        assert!(inline.complete_for(DatasetKind::PartnerOnly, 1).is_some());
        assert!(inline.complete_for(DatasetKind::PartnerOnly, 2).is_none());
        assert!(inline.complete_for(DatasetKind::Matches, 0).is_none());
    }
}
