use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TrackerError;

/// Maximum number of characters kept in a requirement or objective title
pub const TITLE_MAX_LEN: usize = 200;

/// Truncates a title to `TITLE_MAX_LEN` characters.
///
/// Over-long titles are cut, never rejected.
pub fn truncate_title(title: &str) -> String {
    match title.char_indices().nth(TITLE_MAX_LEN) {
        Some((byte_idx, _)) => title[..byte_idx].to_string(),
        None => title.to_string(),
    }
}

/// Lifecycle status of a requirement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum RequirementStatus {
    #[default]
    Draft,
    #[serde(rename = "In Review")]
    InReview,
    Approved,
    Rejected,
    Implemented,
    Verified,
}

impl RequirementStatus {
    /// All statuses in their canonical display order
    pub const ALL: [RequirementStatus; 6] = [
        RequirementStatus::Draft,
        RequirementStatus::InReview,
        RequirementStatus::Approved,
        RequirementStatus::Rejected,
        RequirementStatus::Implemented,
        RequirementStatus::Verified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementStatus::Draft => "Draft",
            RequirementStatus::InReview => "In Review",
            RequirementStatus::Approved => "Approved",
            RequirementStatus::Rejected => "Rejected",
            RequirementStatus::Implemented => "Implemented",
            RequirementStatus::Verified => "Verified",
        }
    }
}

impl fmt::Display for RequirementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequirementStatus {
    type Err = TrackerError;

    /// Strict parse: only the exact display strings are accepted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequirementStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TrackerError::InvalidStatus(s.to_string()))
    }
}

/// Priority of a requirement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum RequirementPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl RequirementPriority {
    pub const ALL: [RequirementPriority; 3] = [
        RequirementPriority::High,
        RequirementPriority::Medium,
        RequirementPriority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementPriority::High => "High",
            RequirementPriority::Medium => "Medium",
            RequirementPriority::Low => "Low",
        }
    }
}

impl fmt::Display for RequirementPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequirementPriority {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequirementPriority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TrackerError::InvalidPriority(s.to_string()))
    }
}

/// Classification of a requirement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum RequirementType {
    #[default]
    Functional,
    #[serde(rename = "Non-functional")]
    NonFunctional,
    Business,
    User,
    Technical,
}

impl RequirementType {
    pub const ALL: [RequirementType; 5] = [
        RequirementType::Functional,
        RequirementType::NonFunctional,
        RequirementType::Business,
        RequirementType::User,
        RequirementType::Technical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementType::Functional => "Functional",
            RequirementType::NonFunctional => "Non-functional",
            RequirementType::Business => "Business",
            RequirementType::User => "User",
            RequirementType::Technical => "Technical",
        }
    }
}

impl fmt::Display for RequirementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequirementType {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.replace(['_', ' '], "-");
        RequirementType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| TrackerError::InvalidType(s.to_string()))
    }
}

/// Role of a user inside an organization
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    #[default]
    Member,
    Viewer,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
            MemberRole::Viewer => "viewer",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(MemberRole::Admin),
            "member" => Ok(MemberRole::Member),
            "viewer" => Ok(MemberRole::Viewer),
            _ => Err(TrackerError::InvalidRole(s.to_string())),
        }
    }
}

/// A person who can act on the tracker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            created_at: Utc::now(),
        }
    }
}

/// Top-level tenant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// Membership of a user in an organization; one per (user, organization)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationMember {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    #[serde(default)]
    pub role: MemberRole,
}

/// A unit of work inside an organization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub organization_id: Uuid,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Next number handed out by the identifier generator
    #[serde(default = "default_next_requirement_number")]
    pub next_requirement_number: u64,
}

fn default_next_requirement_number() -> u64 {
    1
}

impl Project {
    pub fn new(
        organization_id: Uuid,
        name: impl Into<String>,
        description: impl Into<String>,
        created_by: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            organization_id,
            created_by,
            created_at: now,
            updated_at: now,
            next_requirement_number: 1,
        }
    }
}

/// Grouping of requirements inside a project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequirementCategory {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub project_id: Uuid,
}

/// Project-level goal that requirements trace to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectObjective {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Represents a single requirement in the system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    /// Unique identifier for the requirement (UUID)
    pub id: Uuid,

    /// Human-friendly identifier, unique within the project (e.g., "REQ-001")
    pub identifier: String,

    /// Short title, at most `TITLE_MAX_LEN` characters
    pub title: String,

    pub description: String,

    #[serde(default)]
    pub acceptance_criteria: String,

    pub project_id: Uuid,

    #[serde(default)]
    pub category_id: Option<Uuid>,

    #[serde(default)]
    pub req_type: RequirementType,

    #[serde(default)]
    pub priority: RequirementPriority,

    #[serde(default)]
    pub status: RequirementStatus,

    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,

    /// Parent requirement in the same project
    #[serde(default)]
    pub parent_id: Option<Uuid>,

    /// Requirements this one points at; not mirrored on the other side
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<Uuid>,

    /// Objectives this requirement traces to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objectives: Vec<Uuid>,
}

/// Input for creating a requirement.
///
/// `identifier` is normally left empty so the generator assigns the next
/// `REQ-NNN` number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRequirement {
    pub identifier: Option<String>,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub category_id: Option<Uuid>,
    pub req_type: RequirementType,
    pub priority: RequirementPriority,
    pub status: RequirementStatus,
    pub parent_id: Option<Uuid>,
    pub related: Vec<Uuid>,
    pub objectives: Vec<Uuid>,
}

impl NewRequirement {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Builds the requirement row with the given identifier
    pub fn into_requirement(
        self,
        project_id: Uuid,
        identifier: String,
        actor: Option<Uuid>,
    ) -> Requirement {
        let now = Utc::now();
        Requirement {
            id: Uuid::new_v4(),
            identifier,
            title: truncate_title(&self.title),
            description: self.description,
            acceptance_criteria: self.acceptance_criteria,
            project_id,
            category_id: self.category_id,
            req_type: self.req_type,
            priority: self.priority,
            status: self.status,
            created_by: actor,
            created_at: now,
            updated_by: None,
            updated_at: now,
            parent_id: self.parent_id,
            related: self.related,
            objectives: self.objectives,
        }
    }
}

/// Immutable audit record of one status a requirement held
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub requirement_id: Uuid,
    pub status: RequirementStatus,
    pub changed_by: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_title_long() {
        let long = "x".repeat(250);
        assert_eq!(truncate_title(&long).chars().count(), 200);
    }

    #[test]
    fn test_truncate_title_multibyte() {
        let long = "é".repeat(201);
        let cut = truncate_title(&long);
        assert_eq!(cut.chars().count(), 200);
        assert_eq!(cut, "é".repeat(200));
    }

    #[test]
    fn test_truncate_title_short_untouched() {
        assert_eq!(truncate_title("Login"), "Login");
        let exact = "a".repeat(200);
        assert_eq!(truncate_title(&exact), exact);
    }

    #[test]
    fn test_status_parse_is_strict() {
        assert_eq!(
            "In Review".parse::<RequirementStatus>().unwrap(),
            RequirementStatus::InReview
        );
        assert!("in review".parse::<RequirementStatus>().is_err());
        assert!("Done".parse::<RequirementStatus>().is_err());
        for status in RequirementStatus::ALL {
            assert_eq!(status.as_str().parse::<RequirementStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_type_parse_variants() {
        assert_eq!(
            "non_functional".parse::<RequirementType>().unwrap(),
            RequirementType::NonFunctional
        );
        assert_eq!(
            "Non-functional".parse::<RequirementType>().unwrap(),
            RequirementType::NonFunctional
        );
        assert!("Epic".parse::<RequirementType>().is_err());
    }

    #[test]
    fn test_status_serializes_display_string() {
        let json = serde_json::to_string(&RequirementStatus::InReview).unwrap();
        assert_eq!(json, "\"In Review\"");
        let role = serde_json::to_string(&MemberRole::Viewer).unwrap();
        assert_eq!(role, "\"viewer\"");
    }

    #[test]
    fn test_new_requirement_defaults() {
        let draft = NewRequirement::new("Title", "Desc");
        let project = Uuid::new_v4();
        let req = draft.into_requirement(project, "REQ-001".into(), None);
        assert_eq!(req.status, RequirementStatus::Draft);
        assert_eq!(req.priority, RequirementPriority::Medium);
        assert_eq!(req.req_type, RequirementType::Functional);
        assert_eq!(req.project_id, project);
        assert_eq!(req.created_at, req.updated_at);
    }
}
