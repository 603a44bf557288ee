//! Edition dates (`DD-MM-YYYY`) and page numbers taken from file names.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

const EDITION_DATE_FORMAT: &str = "%d-%m-%Y";

lazy_static! {
    static ref EDITION_DATE: Regex = Regex::new(r"^\d{2}-\d{2}-\d{4}$").unwrap();
    static ref PAGE_NUMBER: Regex = Regex::new(r"page_(\d+)").unwrap();
}

/// `DD-MM-YYYY` and a real calendar date.
pub fn is_edition_date(s: &str) -> bool {
    EDITION_DATE.is_match(s) && NaiveDate::parse_from_str(s, EDITION_DATE_FORMAT).is_ok()
}

pub fn format_edition_date(date: NaiveDate) -> String {
    date.format(EDITION_DATE_FORMAT).to_string()
}

/// Pick the edition date: the submitted date if valid, else the first valid
/// date found by analysis, else `today`.
pub fn resolve_edition_date<'a>(
    submitted: Option<&str>,
    extracted: impl IntoIterator<Item = &'a str>,
    today: NaiveDate,
) -> String {
    if let Some(date) = submitted.filter(|d| is_edition_date(d)) {
        return date.to_string();
    }

    extracted
        .into_iter()
        .map(str::trim)
        .find(|d| is_edition_date(d))
        .map(str::to_string)
        .unwrap_or_else(|| format_edition_date(today))
}

/// Page number embedded in an image key such as `scans/page_12.jpg`.
pub fn page_number_from_key(key: &str) -> Option<u32> {
    let file = key.rsplit('/').next().unwrap_or(key);
    PAGE_NUMBER
        .captures(file)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Assign 1-based page indices to image keys.
///
/// Uses the `page_N` number in each file name when every key has a distinct
/// one; otherwise falls back to list position.
pub fn page_indices(keys: &[String]) -> Vec<u32> {
    let parsed: Option<Vec<u32>> = keys.iter().map(|k| page_number_from_key(k)).collect();

    if let Some(numbers) = parsed {
        let mut seen = numbers.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() == numbers.len() && !numbers.contains(&0) {
            return numbers;
        }
    }

    (1..=keys.len() as u32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn test_edition_date_validation() {
        assert!(is_edition_date("05-03-2026"));
        assert!(!is_edition_date("5-3-2026"));
        assert!(!is_edition_date("2026-03-05"));
        assert!(!is_edition_date("31-02-2026"));
    }

    #[test]
    fn test_resolution_order() {
        assert_eq!(
            resolve_edition_date(Some("01-01-2026"), ["02-02-2026"], today()),
            "01-01-2026"
        );
        assert_eq!(
            resolve_edition_date(Some("yesterday"), ["bad", "02-02-2026"], today()),
            "02-02-2026"
        );
        assert_eq!(resolve_edition_date(None, [], today()), "19-10-2026");
    }

    #[test]
    fn test_page_number_from_key() {
        assert_eq!(page_number_from_key("scans/2026/page_12.jpg"), Some(12));
        assert_eq!(page_number_from_key("scans/cover.jpg"), None);
        assert_eq!(page_number_from_key("page_3/cover.jpg"), None);
    }

    #[test]
    fn test_page_indices_fall_back_to_position() {
        let named = vec!["a/page_3.jpg".to_string(), "a/page_1.jpg".to_string()];
        assert_eq!(page_indices(&named), vec![3, 1]);

        let mixed = vec!["a/page_3.jpg".to_string(), "a/cover.jpg".to_string()];
        assert_eq!(page_indices(&mixed), vec![1, 2]);

        let dupes = vec!["a/page_1.jpg".to_string(), "b/page_1.jpg".to_string()];
        assert_eq!(page_indices(&dupes), vec![1, 2]);
    }
}
