pub mod access;
pub mod db;
pub mod error;
pub mod export;
pub mod filter;
pub mod history;
pub mod identifier;
pub mod models;
pub mod registry;
pub mod report;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use db::{
    create_backend, migrate_sqlite_to_yaml, migrate_yaml_to_sqlite, open_or_create, BackendType,
    DatabaseBackend, DatabaseConfig, SqliteBackend, YamlBackend,
};
pub use error::{as_tracker_error, TrackerError};
pub use export::{export_requirements_csv, CsvExport};
pub use filter::RequirementFilter;
pub use identifier::{format_identifier, next_identifier_number, parse_identifier_number};
pub use models::{
    HistoryEntry, MemberRole, NewRequirement, Organization, OrganizationMember, Project,
    ProjectObjective, Requirement, RequirementCategory, RequirementPriority, RequirementStatus,
    RequirementType, User, TITLE_MAX_LEN,
};
pub use registry::{determine_database_path, get_registry_path, Registry};
pub use report::{Dashboard, TraceabilityMatrix};
pub use storage::Storage;
pub use store::{RequirementDetail, StatusUpdate, TrackerStore};
