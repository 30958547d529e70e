//! Requirement identifier generation
//!
//! Identifiers look like `REQ-001`: the `REQ-` prefix followed by a number
//! zero-padded to three digits (wider numbers are written in full). Numbers
//! are scoped per project.
//!
//! The next number is the larger of two values: one past the highest
//! well-formed identifier already in the project, and the project's stored
//! sequence. The caller must hold the store's write lock between computing
//! the number and writing the requirement, and must advance the sequence to
//! `n + 1` in the same unit.
//!
//! Numbers stop short of `MAX_SEQUENCE` so that `n + 1` always fits the
//! stored sequence on every backend.

use log::warn;

/// Prefix of every generated identifier
pub const IDENTIFIER_PREFIX: &str = "REQ-";

/// Largest storable sequence value; SQLite keeps it in a signed 64-bit column
pub const MAX_SEQUENCE: u64 = i64::MAX as u64;

/// Formats an identifier number as `REQ-NNN`
pub fn format_identifier(number: u64) -> String {
    format!("{}{:03}", IDENTIFIER_PREFIX, number)
}

/// Extracts the number from a `REQ-<digits>` identifier
///
/// Returns `None` for anything else, including an empty suffix.
pub fn parse_identifier_number(identifier: &str) -> Option<u64> {
    let digits = identifier.strip_prefix(IDENTIFIER_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Highest number among well-formed identifiers; malformed ones are skipped
pub fn max_identifier_number<'a, I>(identifiers: I) -> Option<u64>
where
    I: IntoIterator<Item = &'a str>,
{
    identifiers
        .into_iter()
        .filter_map(|identifier| {
            let number = parse_identifier_number(identifier);
            if number.is_none() {
                warn!("Skipping malformed identifier during scan: {:?}", identifier);
            }
            number
        })
        .max()
}

/// Computes the next identifier number for a project
///
/// `sequence` is the project's stored next number (1 for a fresh project).
/// Returns `None` once the next number would leave no room to advance the
/// sequence.
pub fn next_identifier_number<'a, I>(identifiers: I, sequence: u64) -> Option<u64>
where
    I: IntoIterator<Item = &'a str>,
{
    let from_scan = match max_identifier_number(identifiers) {
        Some(max) => max.checked_add(1)?,
        None => 1,
    };
    let number = from_scan.max(sequence).max(1);
    (number < MAX_SEQUENCE).then_some(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_identifier_padding() {
        assert_eq!(format_identifier(1), "REQ-001");
        assert_eq!(format_identifier(42), "REQ-042");
        assert_eq!(format_identifier(999), "REQ-999");
        assert_eq!(format_identifier(1000), "REQ-1000");
    }

    #[test]
    fn test_parse_identifier_number() {
        assert_eq!(parse_identifier_number("REQ-001"), Some(1));
        assert_eq!(parse_identifier_number("REQ-1234"), Some(1234));
        assert_eq!(parse_identifier_number("REQ-"), None);
        assert_eq!(parse_identifier_number("REQ-abc"), None);
        assert_eq!(parse_identifier_number("REQ-12a"), None);
        assert_eq!(parse_identifier_number("SPEC-001"), None);
        assert_eq!(parse_identifier_number("REQ--1"), None);
    }

    #[test]
    fn test_next_number_empty_project() {
        assert_eq!(next_identifier_number(Vec::<&str>::new(), 1), Some(1));
    }

    #[test]
    fn test_next_number_follows_max() {
        let ids = ["REQ-001", "REQ-007", "REQ-003"];
        assert_eq!(next_identifier_number(ids, 1), Some(8));
    }

    #[test]
    fn test_malformed_identifiers_are_skipped() {
        let ids = ["CUSTOM", "REQ-x1", "REQ-002"];
        assert_eq!(next_identifier_number(ids, 1), Some(3));
    }

    #[test]
    fn test_all_malformed_restarts_at_one() {
        let ids = ["LEGACY-9", "REQ-abc"];
        assert_eq!(next_identifier_number(ids, 1), Some(1));
    }

    #[test]
    fn test_sequence_wins_over_scan() {
        // REQ-005 was deleted after being handed out
        let ids = ["REQ-001", "REQ-002"];
        assert_eq!(next_identifier_number(ids, 6), Some(6));
    }

    #[test]
    fn test_zero_sequence_treated_as_one() {
        assert_eq!(next_identifier_number(Vec::<&str>::new(), 0), Some(1));
    }

    #[test]
    fn test_scan_at_u64_max_is_exhausted() {
        let top = format!("REQ-{}", u64::MAX);
        assert_eq!(next_identifier_number([top.as_str()], 1), None);
    }

    #[test]
    fn test_last_number_below_storable_limit() {
        let near = format!("REQ-{}", MAX_SEQUENCE - 2);
        assert_eq!(
            next_identifier_number([near.as_str()], 1),
            Some(MAX_SEQUENCE - 1)
        );

        let last = format!("REQ-{}", MAX_SEQUENCE - 1);
        assert_eq!(next_identifier_number([last.as_str()], 1), None);
        assert_eq!(next_identifier_number(Vec::<&str>::new(), MAX_SEQUENCE), None);
    }
}
