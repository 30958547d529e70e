//! Requirement list filtering

use uuid::Uuid;

use crate::models::{Requirement, RequirementPriority, RequirementStatus, RequirementType};

/// Criteria for narrowing a project's requirement list.
///
/// Unset fields match everything. `title` is a case-insensitive substring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementFilter {
    pub title: Option<String>,
    pub status: Option<RequirementStatus>,
    pub priority: Option<RequirementPriority>,
    pub req_type: Option<RequirementType>,
    pub category_id: Option<Uuid>,
}

impl RequirementFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_status(mut self, status: RequirementStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: RequirementPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_type(mut self, req_type: RequirementType) -> Self {
        self.req_type = Some(req_type);
        self
    }

    pub fn with_category(mut self, category_id: Uuid) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn matches(&self, req: &Requirement) -> bool {
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            if !req.title.to_lowercase().contains(&title.to_lowercase()) {
                return false;
            }
        }
        if self.status.is_some_and(|s| s != req.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != req.priority) {
            return false;
        }
        if self.req_type.is_some_and(|t| t != req.req_type) {
            return false;
        }
        if self.category_id.is_some() && self.category_id != req.category_id {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewRequirement;

    fn req(title: &str) -> Requirement {
        NewRequirement::new(title, "").into_requirement(Uuid::new_v4(), "REQ-001".into(), None)
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(RequirementFilter::new().matches(&req("Anything")));
    }

    #[test]
    fn test_title_case_insensitive() {
        let filter = RequirementFilter::new().with_title("LOGIN");
        assert!(filter.matches(&req("User login page")));
        assert!(!filter.matches(&req("Logout")));
    }

    #[test]
    fn test_combined_criteria() {
        let mut r = req("Audit log");
        r.status = RequirementStatus::Approved;
        r.priority = RequirementPriority::High;

        let filter = RequirementFilter::new()
            .with_status(RequirementStatus::Approved)
            .with_priority(RequirementPriority::High);
        assert!(filter.matches(&r));

        let filter = filter.with_type(RequirementType::Business);
        assert!(!filter.matches(&r));
    }

    #[test]
    fn test_category_filter() {
        let category = Uuid::new_v4();
        let mut r = req("Categorised");
        assert!(!RequirementFilter::new().with_category(category).matches(&r));
        r.category_id = Some(category);
        assert!(RequirementFilter::new().with_category(category).matches(&r));
    }
}
