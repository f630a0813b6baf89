//! # Key Normalization
//!
//! Source files name the same column in several ways: `Numéro Trans GU`,
//! `Numero Trans GU`, `numero_trans_gu`, or a UTF-8 header decoded as Latin-1
//! (`NumÃ©ro Trans GU`). Everything that needs "the same field" (filtering,
//! column detection, aggregate lookups) goes through this module so they agree.

use crate::model::Record;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Display names of known columns and the folded spellings that map onto them.
///
/// Each display name must fold to one of its own spellings.
const CANONICAL_COLUMNS: &[(&str, &[&str])] = &[
    (
        "Numéro Trans GU",
        &["numero trans gu", "num trans gu", "no trans gu", "numero transaction gu"],
    ),
    ("Numéro Client", &["numero client", "num client", "client number"]),
    ("Référence", &["reference", "ref", "reference transaction"]),
    ("Agence", &["agence", "agency", "nom agence", "agency name"]),
    ("Code Agence", &["code agence", "agency code"]),
    ("Service", &["service", "nom service", "service name"]),
    ("Pays", &["pays", "country", "code pays", "country code"]),
    ("Date", &["date"]),
    ("Date Opération", &["date operation", "transaction date", "date transaction"]),
    ("Montant", &["montant", "amount", "montant transaction", "transaction amount"]),
    ("Volume", &["volume"]),
    ("Frais", &["frais", "fees", "fee"]),
    ("Statut", &["statut", "status", "etat"]),
    ("Téléphone", &["telephone", "phone", "numero telephone"]),
    ("Opération", &["operation", "type operation"]),
];

/// Fields the aggregate layer and UI address by meaning rather than by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalField {
    Agency,
    Service,
    Country,
    Date,
    Volume,
    KeyId,
    Status,
}

impl LogicalField {
    /// Accepted spellings, folded, in priority order.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            LogicalField::Agency => &["agence", "agency", "nom agence", "agency name", "code agence"],
            LogicalField::Service => &["service", "nom service", "service name", "type service", "produit"],
            LogicalField::Country => &["pays", "country", "code pays", "country code"],
            LogicalField::Date => &[
                "date",
                "date operation",
                "date transaction",
                "transaction date",
                "date valeur",
            ],
            LogicalField::Volume => &[
                "volume",
                "montant",
                "amount",
                "montant transaction",
                "transaction amount",
                "valeur",
            ],
            LogicalField::KeyId => &[
                "numero trans gu",
                "num trans gu",
                "numero transaction",
                "transaction id",
                "id transaction",
                "reference",
                "ref",
            ],
            LogicalField::Status => &["statut", "status", "etat"],
        }
    }
}

/// Map a raw field name to its canonical display name.
///
/// Pure and idempotent: `normalize_key(&normalize_key(x)) == normalize_key(x)`.
/// Unknown names come back repaired and whitespace-collapsed.
pub fn normalize_key(raw: &str) -> String {
    let repaired = repair_mojibake(raw);
    let cleaned = collapse_whitespace(&repaired);
    match canonical_table().get(&fold_key(&cleaned)) {
        Some(display) => (*display).to_string(),
        None => cleaned,
    }
}

/// Find the key actually present in `record` for a canonical column name.
///
/// Falls back to `canonical` itself so lookups never fail outright.
pub fn resolve_original(record: &Record, canonical: &str) -> String {
    let target = normalize_key(canonical);
    record
        .keys()
        .find(|key| normalize_key(key) == target)
        .cloned()
        .unwrap_or_else(|| canonical.to_string())
}

/// Value of a logical field, looked up through its alias list.
pub fn field_value(record: &Record, field: LogicalField) -> Option<&str> {
    FieldResolver::new().value(record, field)
}

/// Ordered, de-duplicated canonical column names across `records`.
pub fn canonical_columns<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut columns = Vec::new();
    let mut by_raw: HashMap<&'a str, String> = HashMap::new();
    for record in records {
        for key in record.keys() {
            let canonical = by_raw
                .entry(key.as_str())
                .or_insert_with(|| normalize_key(key))
                .clone();
            if seen.insert(canonical.clone()) {
                columns.push(canonical);
            }
        }
    }
    columns
}

/// Logical field lookups with a per-raw-key fold cache.
///
/// Keys repeat across the records of one collection, so folding each distinct
/// spelling once keeps lookups over tens of thousands of records cheap.
#[derive(Debug, Default)]
pub struct FieldResolver {
    folded: HashMap<String, String>,
}

impl FieldResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// First non-blank value whose key folds to the highest-priority alias.
    pub fn value<'r>(&mut self, record: &'r Record, field: LogicalField) -> Option<&'r str> {
        let aliases = field.aliases();
        let mut best: Option<(usize, &'r str)> = None;
        for (key, value) in record {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let folded = self.fold_cached(key);
            if let Some(rank) = aliases.iter().position(|alias| *alias == folded) {
                if best.map_or(true, |(current, _)| rank < current) {
                    best = Some((rank, value));
                }
            }
        }
        best.map(|(_, value)| value)
    }

    fn fold_cached(&mut self, key: &str) -> &str {
        if !self.folded.contains_key(key) {
            self.folded.insert(key.to_string(), fold_key(key));
        }
        &self.folded[key]
    }
}

/// Comparison form of a field name: mojibake repaired, accents stripped,
/// lowercased, separators collapsed to single spaces.
pub fn fold_key(raw: &str) -> String {
    let repaired = repair_mojibake(raw);
    let stripped: String = repaired
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            '_' | '-' | '.' => ' ',
            other => other,
        })
        .collect();
    collapse_whitespace(&stripped)
}

/// Undo UTF-8 text that was decoded as Latin-1, as often as it keeps decoding.
fn repair_mojibake(raw: &str) -> Cow<'_, str> {
    let mut current = Cow::Borrowed(raw);
    while current.chars().any(|c| matches!(c, 'Ã' | 'Â')) {
        let bytes: Option<Vec<u8>> = current
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect();
        match bytes.and_then(|bytes| String::from_utf8(bytes).ok()) {
            Some(fixed) if fixed != current => current = Cow::Owned(fixed),
            _ => break,
        }
    }
    current
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

fn canonical_table() -> &'static HashMap<String, &'static str> {
    static TABLE: OnceLock<HashMap<String, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = HashMap::new();
        for (display, spellings) in CANONICAL_COLUMNS {
            table.insert(fold_key(display), *display);
            for spelling in *spellings {
                table.insert(fold_key(spelling), *display);
            }
        }
        table
    })
}
