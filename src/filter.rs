//! In-memory search over loaded collections.
//!
//! A term matches a row when any field value contains it case-insensitively.
//! Terms that look like amounts or dates are also compared in a normalized
//! form, so `1 000` finds `1000` and `12/03/2024` finds `2024-03-12`.

use crate::model::Row;
use chrono::NaiveDate;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d"];

/// A parsed search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    lowered: String,
    digits: Option<String>,
    date: Option<NaiveDate>,
}

impl SearchTerm {
    /// Parse a user-entered term. Blank terms yield `None` (no filtering).
    pub fn parse(term: &str) -> Option<Self> {
        let trimmed = term.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            lowered: trimmed.to_lowercase(),
            digits: numeric_form(trimmed),
            date: parse_date(trimmed),
        })
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.searchable_values().any(|value| self.matches_value(value))
    }

    fn matches_value(&self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        if value.to_lowercase().contains(&self.lowered) {
            return true;
        }
        if let Some(digits) = &self.digits {
            let value_digits: String = value.chars().filter(char::is_ascii_digit).collect();
            if value_digits.contains(digits.as_str()) {
                return true;
            }
        }
        if let Some(date) = self.date {
            if parse_date(value) == Some(date) {
                return true;
            }
        }
        false
    }
}

/// Rows of `rows` matching `term`; a blank term keeps every row.
pub fn filter_rows(rows: &[Row], term: &str) -> Vec<Row> {
    match SearchTerm::parse(term) {
        Some(term) => rows.iter().filter(|row| term.matches(row)).cloned().collect(),
        None => rows.to_vec(),
    }
}

/// Digits of a term made only of digits and number/date separators.
fn numeric_form(term: &str) -> Option<String> {
    let numeric_like = term
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '\u{a0}' | '.' | ',' | '-' | '/' | '+'));
    if !numeric_like {
        return None;
    }
    let digits: String = term.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

/// Calendar date of a value, ignoring any time-of-day suffix.
fn parse_date(value: &str) -> Option<NaiveDate> {
    let head = value
        .trim()
        .split(|c: char| c.is_whitespace() || c == 'T')
        .next()?;
    if head.len() < 8 || !head.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(head, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{record, Match};

    fn rec_row(fields: &[(&str, &str)]) -> Row {
        Row::Record(record(fields.iter().copied()))
    }

    #[test]
    fn blank_term_keeps_everything() {
        let rows = vec![rec_row(&[("a", "x")]), rec_row(&[("a", "y")])];
        assert_eq!(filter_rows(&rows, "   ").len(), 2);
        assert!(SearchTerm::parse("").is_none());
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let rows = vec![rec_row(&[("Agence", "Dakar Plateau")]), rec_row(&[("Agence", "Thiès")])];
        let hits = filter_rows(&rows, "PLATEAU");
        assert_eq!(hits, vec![rows[0].clone()]);
    }

    #[test]
    fn numeric_form_ignores_separators() {
        let rows = vec![rec_row(&[("Montant", "1000")]), rec_row(&[("Montant", "250")])];
        let hits = filter_rows(&rows, "1 000");
        assert_eq!(hits, vec![rows[0].clone()]);
    }

    #[test]
    fn date_form_matches_other_layouts() {
        let rows = vec![
            rec_row(&[("Date", "2024-03-12 10:15:00")]),
            rec_row(&[("Date", "2024-03-13")]),
        ];
        let term = SearchTerm::parse("12/03/2024").unwrap();
        assert!(term.matches(&rows[0]));
        assert!(!term.matches(&rows[1]));
    }

    #[test]
    fn matches_search_both_sides_and_key() {
        let row = Row::Match(Match {
            key: "GU-77".to_string(),
            bo_data: record([("Agence", "A")]),
            partner_data: record([("Agency", "Partner Side")]),
            differences: Vec::new(),
        });
        assert!(SearchTerm::parse("gu-77").unwrap().matches(&row));
        assert!(SearchTerm::parse("partner").unwrap().matches(&row));
        assert!(!SearchTerm::parse("missing").unwrap().matches(&row));
    }
}
