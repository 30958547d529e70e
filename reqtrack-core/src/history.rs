//! Status history recording
//!
//! History entries are produced by explicit calls from the write path rather
//! than by a save hook. A requirement's trail holds one creation entry plus
//! one entry per persisted write whose status differs from the previously
//! persisted status.

use chrono::Utc;
use uuid::Uuid;

use crate::models::{HistoryEntry, Requirement};

/// Entry written when a requirement is first persisted
pub fn creation_entry(requirement: &Requirement, actor: Option<Uuid>) -> HistoryEntry {
    HistoryEntry {
        id: Uuid::new_v4(),
        requirement_id: requirement.id,
        status: requirement.status,
        changed_by: actor,
        timestamp: Utc::now(),
        notes: format!("Requirement created with status: {}", requirement.status),
    }
}

/// Compares a requirement against its previously persisted row.
///
/// Returns the entry to append when the status changed, `None` otherwise
/// (including when there is no previous row).
pub fn record_status_change(
    previous: Option<&Requirement>,
    current: &Requirement,
    actor: Option<Uuid>,
) -> Option<HistoryEntry> {
    let previous = previous?;
    if previous.status == current.status {
        return None;
    }

    Some(HistoryEntry {
        id: Uuid::new_v4(),
        requirement_id: current.id,
        status: current.status,
        changed_by: actor,
        timestamp: Utc::now(),
        notes: format!(
            "Status changed from {} to {}",
            previous.status, current.status
        ),
    })
}

/// Sorts entries newest first.
///
/// Entries sharing a timestamp keep reverse append order, so the caller
/// should pass them in the order they were written.
pub fn sort_newest_first(entries: &mut [HistoryEntry]) {
    entries.reverse();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRequirement, RequirementStatus};
    use chrono::Duration;

    fn sample() -> Requirement {
        NewRequirement::new("Export data", "Users can export").into_requirement(
            Uuid::new_v4(),
            "REQ-001".into(),
            None,
        )
    }

    #[test]
    fn test_creation_entry() {
        let req = sample();
        let actor = Uuid::new_v4();
        let entry = creation_entry(&req, Some(actor));
        assert_eq!(entry.requirement_id, req.id);
        assert_eq!(entry.status, RequirementStatus::Draft);
        assert_eq!(entry.changed_by, Some(actor));
        assert_eq!(entry.notes, "Requirement created with status: Draft");
    }

    #[test]
    fn test_status_change_recorded() {
        let before = sample();
        let mut after = before.clone();
        after.status = RequirementStatus::InReview;

        let entry = record_status_change(Some(&before), &after, None).unwrap();
        assert_eq!(entry.status, RequirementStatus::InReview);
        assert_eq!(entry.notes, "Status changed from Draft to In Review");
        assert!(entry.changed_by.is_none());
    }

    #[test]
    fn test_same_status_not_recorded() {
        let before = sample();
        let mut after = before.clone();
        after.title = "Changed title".into();
        assert!(record_status_change(Some(&before), &after, None).is_none());
    }

    #[test]
    fn test_no_previous_not_recorded() {
        let req = sample();
        assert!(record_status_change(None, &req, None).is_none());
    }

    #[test]
    fn test_sort_newest_first() {
        let req = sample();
        let mut first = creation_entry(&req, None);
        let mut second = creation_entry(&req, None);
        let mut third = creation_entry(&req, None);
        let now = Utc::now();
        first.timestamp = now - Duration::minutes(10);
        second.timestamp = now;
        third.timestamp = now;

        let mut entries = vec![first.clone(), second.clone(), third.clone()];
        sort_newest_first(&mut entries);

        assert_eq!(entries[0].id, third.id);
        assert_eq!(entries[1].id, second.id);
        assert_eq!(entries[2].id, first.id);
    }
}
