//! Export of project data
//!
//! CSV is the spreadsheet-friendly flat listing of a project's requirements;
//! JSON is a full snapshot of the store for backup and interchange.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::filter::RequirementFilter;
use crate::store::TrackerStore;

/// Column headers of the requirements CSV, in order
pub const CSV_HEADER: [&str; 10] = [
    "ID",
    "Title",
    "Type",
    "Status",
    "Priority",
    "Description",
    "Acceptance Criteria",
    "Created By",
    "Created At",
    "Updated At",
];

pub const CSV_CONTENT_TYPE: &str = "text/csv";

const CSV_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A rendered CSV document plus the metadata needed to serve it as a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvExport {
    pub filename: String,
    pub content_type: &'static str,
    pub body: String,
}

impl CsvExport {
    /// Writes the body to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.body)
            .with_context(|| format!("Failed to write CSV export to {:?}", path))
    }
}

/// Download filename for a project's CSV
pub fn csv_filename(project_name: &str) -> String {
    format!("requirements-{}.csv", project_name)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(CSV_TIMESTAMP_FORMAT).to_string()
}

/// Writes one header row and one row per requirement, in creation order
pub fn write_requirements_csv<W: Write>(
    store: &TrackerStore,
    project_id: &Uuid,
    writer: W,
) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(CSV_HEADER)?;

    let requirements = store.list_requirements(project_id, &RequirementFilter::new());
    for req in &requirements {
        let created_by = req
            .created_by
            .and_then(|id| store.get_user(&id))
            .map(|u| u.username.as_str())
            .unwrap_or("");
        csv_writer.write_record([
            req.identifier.as_str(),
            req.title.as_str(),
            req.req_type.as_str(),
            req.status.as_str(),
            req.priority.as_str(),
            req.description.as_str(),
            req.acceptance_criteria.as_str(),
            created_by,
            format_timestamp(&req.created_at).as_str(),
            format_timestamp(&req.updated_at).as_str(),
        ])?;
    }

    csv_writer.flush().context("Failed to flush CSV output")?;
    Ok(requirements.len())
}

/// Renders the CSV export of a project
pub fn export_requirements_csv(store: &TrackerStore, project_id: &Uuid) -> Result<CsvExport> {
    let project = store
        .get_project(project_id)
        .ok_or_else(|| TrackerError::not_found("Project", project_id))?;

    let mut buffer = Vec::new();
    write_requirements_csv(store, project_id, &mut buffer)?;
    let body = String::from_utf8(buffer).context("CSV output was not valid UTF-8")?;

    Ok(CsvExport {
        filename: csv_filename(&project.name),
        content_type: CSV_CONTENT_TYPE,
        body,
    })
}

/// Exports the whole store to a JSON file
pub fn export_json(store: &TrackerStore, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(store).context("Failed to serialize to JSON")?;
    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON export to {:?}", output_path))?;
    Ok(())
}

/// Reads a store snapshot previously written by `export_json`
pub fn import_json(input_path: &Path) -> Result<TrackerStore> {
    let json = fs::read_to_string(input_path)
        .with_context(|| format!("Failed to read JSON file {:?}", input_path))?;
    serde_json::from_str(&json).context("Failed to parse JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewRequirement;
    use tempfile::TempDir;

    fn setup() -> (TrackerStore, Uuid, Uuid) {
        let mut store = TrackerStore::new();
        let user = store.create_user("alice", "").unwrap().id;
        let org = store.create_organization("Acme", "", Some(user)).unwrap().id;
        let project = store.create_project(&org, "Portal", "", Some(user)).unwrap().id;
        (store, user, project)
    }

    fn parse_rows(body: &str) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(body.as_bytes());
        reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect()
    }

    #[test]
    fn test_empty_project_only_header() {
        let (store, _, project) = setup();
        let export = export_requirements_csv(&store, &project).unwrap();
        let rows = parse_rows(&export.body);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], CSV_HEADER.map(String::from).to_vec());
        assert_eq!(export.filename, "requirements-Portal.csv");
        assert_eq!(export.content_type, "text/csv");
    }

    #[test]
    fn test_rows_and_columns() {
        let (mut store, user, project) = setup();
        let mut draft = NewRequirement::new("Login, with SSO", "Line one\nLine two");
        draft.acceptance_criteria = "Says \"hello\"".into();
        store.create_requirement(&project, draft, Some(user)).unwrap();
        store
            .create_requirement(&project, NewRequirement::new("Anonymous", ""), None)
            .unwrap();

        let export = export_requirements_csv(&store, &project).unwrap();
        let rows = parse_rows(&export.body);
        assert_eq!(rows.len(), 3);

        let first = &rows[1];
        assert_eq!(first.len(), 10);
        assert_eq!(first[0], "REQ-001");
        assert_eq!(first[1], "Login, with SSO");
        assert_eq!(first[2], "Functional");
        assert_eq!(first[3], "Draft");
        assert_eq!(first[4], "Medium");
        assert_eq!(first[5], "Line one\nLine two");
        assert_eq!(first[6], "Says \"hello\"");
        assert_eq!(first[7], "alice");
        assert_eq!(first[8].len(), "2024-01-01 12:00".len());

        assert_eq!(rows[2][0], "REQ-002");
        assert_eq!(rows[2][7], "");
    }

    #[test]
    fn test_unknown_project() {
        let store = TrackerStore::new();
        assert!(export_requirements_csv(&store, &Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let (mut store, user, project) = setup();
        store
            .create_requirement(&project, NewRequirement::new("Persisted", ""), Some(user))
            .unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.json");

        export_json(&store, &path).unwrap();
        let loaded = import_json(&path).unwrap();
        assert_eq!(loaded, store);
    }
}
