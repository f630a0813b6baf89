//! # Aggregates
//!
//! Rollups over loaded collections: the per-agency summary built from the
//! back-office side of matches plus back-office-only records, and volume
//! totals per collection. Both are memoized under the current fingerprint
//! and dropped whenever a source collection changes.

use crate::cache::{Fingerprint, FingerprintedCache};
use crate::model::{AgencySummaryRow, DatasetKind, KindVolume, Row, VolumeTotals};
use crate::normalize::{FieldResolver, LogicalField};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Parse a money amount as exported by back-office tools.
///
/// Spaces (including non-breaking ones) are thousands separators. When both
/// `,` and `.` appear the last one is the decimal separator; a lone `,` is a
/// decimal comma. Blank or unparseable input counts as zero.
pub fn parse_amount(raw: &str) -> f64 {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if compact.is_empty() {
        return 0.0;
    }

    let normalized = match (compact.rfind(','), compact.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(_), None) => compact.replace(',', "."),
        _ => compact,
    };
    normalized
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// Group BO-side records by (agency, service, country).
///
/// Matches contribute their BO side first, then BO-only records. Records
/// whose three grouping fields are all blank are skipped. Rows come back
/// sorted by agency, then service, then country.
pub fn summarize_by_agency(matches: &[Row], bo_only: &[Row]) -> Vec<AgencySummaryRow> {
    let mut resolver = FieldResolver::new();
    let mut groups: BTreeMap<(String, String, String), AgencySummaryRow> = BTreeMap::new();

    for row in matches.iter().chain(bo_only) {
        let record = row.source_record();
        let agency = resolver.value(record, LogicalField::Agency).unwrap_or_default();
        let service = resolver.value(record, LogicalField::Service).unwrap_or_default();
        let country = resolver.value(record, LogicalField::Country).unwrap_or_default();
        if agency.is_empty() && service.is_empty() && country.is_empty() {
            continue;
        }
        let volume = resolver
            .value(record, LogicalField::Volume)
            .map(parse_amount)
            .unwrap_or(0.0);
        let date = resolver.value(record, LogicalField::Date).unwrap_or_default();

        let group = groups
            .entry((agency.to_string(), service.to_string(), country.to_string()))
            .or_insert_with(|| AgencySummaryRow {
                agency: agency.to_string(),
                service: service.to_string(),
                country: country.to_string(),
                ..AgencySummaryRow::default()
            });
        group.total_volume += volume;
        group.record_count += 1;
        if group.date.is_empty() {
            group.date = date.to_string();
        }
    }

    groups.into_values().collect()
}

/// Record count and summed volume for each given collection.
pub fn volume_totals(collections: &[(DatasetKind, &[Row])]) -> VolumeTotals {
    let mut resolver = FieldResolver::new();
    let mut totals = VolumeTotals::default();
    for (kind, rows) in collections {
        let total_volume = rows
            .iter()
            .filter_map(|row| resolver.value(row.source_record(), LogicalField::Volume))
            .map(parse_amount)
            .sum::<f64>();
        totals.grand_total += total_volume;
        totals.per_kind.push((
            *kind,
            KindVolume {
                record_count: rows.len(),
                total_volume,
            },
        ));
    }
    totals
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AggregateKey {
    AgencySummary,
    VolumeTotals,
}

#[derive(Debug, Clone)]
enum Aggregate {
    Summary(Arc<Vec<AgencySummaryRow>>),
    Totals(Arc<VolumeTotals>),
}

/// Memoizing front for [`summarize_by_agency`] and [`volume_totals`].
#[derive(Debug, Default)]
pub struct AggregateComputer {
    cache: FingerprintedCache<AggregateKey, Aggregate>,
    computations: usize,
}

impl AggregateComputer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, fingerprint: Fingerprint) {
        self.cache.observe(fingerprint);
    }

    /// Drop every memoized aggregate; called when a source collection changes.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    pub fn summary(&mut self, matches: &[Row], bo_only: &[Row]) -> Arc<Vec<AgencySummaryRow>> {
        if let Some(Aggregate::Summary(rows)) = self.cache.get(&AggregateKey::AgencySummary) {
            return Arc::clone(rows);
        }
        let rows = Arc::new(summarize_by_agency(matches, bo_only));
        self.computations += 1;
        debug!(
            groups = rows.len(),
            sources = matches.len() + bo_only.len(),
            "agency summary computed"
        );
        let fingerprint = self.cache.current();
        self.cache.put(
            AggregateKey::AgencySummary,
            fingerprint,
            Aggregate::Summary(Arc::clone(&rows)),
        );
        rows
    }

    pub fn totals(&mut self, collections: &[(DatasetKind, &[Row])]) -> Arc<VolumeTotals> {
        if let Some(Aggregate::Totals(totals)) = self.cache.get(&AggregateKey::VolumeTotals) {
            return Arc::clone(totals);
        }
        let totals = Arc::new(volume_totals(collections));
        self.computations += 1;
        let fingerprint = self.cache.current();
        self.cache.put(
            AggregateKey::VolumeTotals,
            fingerprint,
            Aggregate::Totals(Arc::clone(&totals)),
        );
        totals
    }

    /// Number of times an aggregate was actually computed.
    pub fn computations(&self) -> usize {
        self.computations
    }
}
