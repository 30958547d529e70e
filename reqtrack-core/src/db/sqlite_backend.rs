//! SQLite database storage backend
//!
//! Stores each record type in its own table. Whole-store writes rewrite every
//! table inside one IMMEDIATE transaction; requirement creation, edits and
//! status changes take a row-level path under the same kind of transaction,
//! so two writers never read the same identifier sequence.

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::filter::RequirementFilter;
use crate::history::{creation_entry, record_status_change, sort_newest_first};
use crate::identifier::{format_identifier, next_identifier_number};
use crate::models::{
    HistoryEntry, MemberRole, NewRequirement, Organization, OrganizationMember, Project,
    ProjectObjective, Requirement, RequirementCategory, RequirementStatus, User,
};
use crate::store::{
    check_references, dedup_ids, prepare_update, ReferenceLookup, RequirementRefs, StatusUpdate,
    TrackerStore,
};

use super::traits::{BackendType, DatabaseBackend, DatabaseConfig};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// How long a writer waits for another connection's transaction
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const USER_COLUMNS: &str = "id, username, email, created_at";
const ORGANIZATION_COLUMNS: &str = "id, name, description, created_at";
const MEMBER_COLUMNS: &str = "id, user_id, organization_id, role";
const PROJECT_COLUMNS: &str = "id, name, description, organization_id, created_by, created_at, \
     updated_at, next_requirement_number";
const CATEGORY_COLUMNS: &str = "id, name, description, project_id";
const OBJECTIVE_COLUMNS: &str = "id, project_id, title, description, created_by, created_at";
const REQUIREMENT_COLUMNS: &str = "id, identifier, title, description, acceptance_criteria, \
     project_id, category_id, req_type, priority, status, created_by, created_at, updated_by, \
     updated_at, parent_id";
const HISTORY_COLUMNS: &str = "id, requirement_id, status, changed_by, timestamp, notes";

/// Link tables of a requirement: (table, target column)
const RELATED_LINKS: (&str, &str) = ("requirement_related", "related_id");
const OBJECTIVE_LINKS: (&str, &str) = ("requirement_objectives", "objective_id");

/// SQLite backend implementation
pub struct SqliteBackend {
    path: PathBuf,
    conn: Mutex<Connection>,
}

// =============================================================================
// Column conversions
// =============================================================================

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(idx, e))
}

fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Uuid::parse_str(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = TrackerError>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn opt_id(id: Option<Uuid>) -> Option<String> {
    id.map(|u| u.to_string())
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_col(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: time_col(row, 3)?,
    })
}

fn organization_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: time_col(row, 3)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<OrganizationMember> {
    Ok(OrganizationMember {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        organization_id: uuid_col(row, 2)?,
        role: enum_col(row, 3)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let next: i64 = row.get(7)?;
    Ok(Project {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        organization_id: uuid_col(row, 3)?,
        created_by: opt_uuid_col(row, 4)?,
        created_at: time_col(row, 5)?,
        updated_at: time_col(row, 6)?,
        next_requirement_number: u64::try_from(next).map_err(|e| conversion_error(7, e))?,
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<RequirementCategory> {
    Ok(RequirementCategory {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        project_id: uuid_col(row, 3)?,
    })
}

fn objective_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectObjective> {
    Ok(ProjectObjective {
        id: uuid_col(row, 0)?,
        project_id: uuid_col(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        created_by: opt_uuid_col(row, 4)?,
        created_at: time_col(row, 5)?,
    })
}

/// Requirement row without its links
fn requirement_from_row(row: &Row<'_>) -> rusqlite::Result<Requirement> {
    Ok(Requirement {
        id: uuid_col(row, 0)?,
        identifier: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        acceptance_criteria: row.get(4)?,
        project_id: uuid_col(row, 5)?,
        category_id: opt_uuid_col(row, 6)?,
        req_type: enum_col(row, 7)?,
        priority: enum_col(row, 8)?,
        status: enum_col(row, 9)?,
        created_by: opt_uuid_col(row, 10)?,
        created_at: time_col(row, 11)?,
        updated_by: opt_uuid_col(row, 12)?,
        updated_at: time_col(row, 13)?,
        parent_id: opt_uuid_col(row, 14)?,
        related: Vec::new(),
        objectives: Vec::new(),
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: uuid_col(row, 0)?,
        requirement_id: uuid_col(row, 1)?,
        status: enum_col(row, 2)?,
        changed_by: opt_uuid_col(row, 3)?,
        timestamp: time_col(row, 4)?,
        notes: row.get(5)?,
    })
}

fn lookup_uuid(conn: &Connection, sql: &str, id: &Uuid) -> Result<Option<Uuid>> {
    let value: Option<Option<String>> = conn
        .query_row(sql, [id.to_string()], |row| row.get(0))
        .optional()?;
    Ok(value
        .flatten()
        .map(|text| Uuid::parse_str(&text))
        .transpose()?)
}

impl ReferenceLookup for Connection {
    fn category_project(&self, id: &Uuid) -> Result<Option<Uuid>> {
        lookup_uuid(
            self,
            "SELECT project_id FROM requirement_categories WHERE id = ?1",
            id,
        )
    }

    fn requirement_project(&self, id: &Uuid) -> Result<Option<Uuid>> {
        lookup_uuid(self, "SELECT project_id FROM requirements WHERE id = ?1", id)
    }

    fn objective_project(&self, id: &Uuid) -> Result<Option<Uuid>> {
        lookup_uuid(
            self,
            "SELECT project_id FROM project_objectives WHERE id = ?1",
            id,
        )
    }

    fn requirement_parent(&self, id: &Uuid) -> Result<Option<Uuid>> {
        lookup_uuid(self, "SELECT parent_id FROM requirements WHERE id = ?1", id)
    }
}

impl SqliteBackend {
    /// Opens (creating if needed) a SQLite database in WAL mode
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_config(&DatabaseConfig::for_path(path))
    }

    pub fn with_config(config: &DatabaseConfig) -> Result<Self> {
        let path = config.path.clone();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let backend = Self {
            path,
            conn: Mutex::new(conn),
        };

        backend.init_schema()?;
        Ok(backend)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned: {:?}", self.path))
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        let has_version_table: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
            [],
            |row| row.get(0),
        )?;
        let current_version: i32 = if has_version_table {
            conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0)
        } else {
            0
        };

        if current_version == 0 {
            conn.execute_batch(include_str!("schema.sql"))?;
            debug!("Initialized schema version {} in {:?}", SCHEMA_VERSION, self.path);
        } else if current_version != SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema version {} is not supported, expected {}",
                current_version,
                SCHEMA_VERSION
            );
        }

        Ok(())
    }

    // =========================================================================
    // Reading
    // =========================================================================

    fn query_all<T, F>(conn: &Connection, sql: &str, map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], map)?;
        Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
    }

    /// Every link of one kind, grouped by source requirement, in insertion order
    fn load_links(conn: &Connection, (table, target): (&str, &str)) -> Result<HashMap<Uuid, Vec<Uuid>>> {
        let pairs = Self::query_all(
            conn,
            &format!("SELECT requirement_id, {} FROM {} ORDER BY rowid", target, table),
            |row| Ok((uuid_col(row, 0)?, uuid_col(row, 1)?)),
        )?;
        let mut links: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (source, dest) in pairs {
            links.entry(source).or_default().push(dest);
        }
        Ok(links)
    }

    fn links_for(conn: &Connection, (table, target): (&str, &str), id: &Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM {} WHERE requirement_id = ?1 ORDER BY rowid",
            target, table
        ))?;
        let rows = stmt.query_map([id.to_string()], |row| uuid_col(row, 0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<Uuid>>>()?)
    }

    fn read_requirement(conn: &Connection, id: &Uuid) -> Result<Option<Requirement>> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM requirements WHERE id = ?1", REQUIREMENT_COLUMNS),
                [id.to_string()],
                requirement_from_row,
            )
            .optional()?;
        match row {
            Some(mut req) => {
                req.related = Self::links_for(conn, RELATED_LINKS, id)?;
                req.objectives = Self::links_for(conn, OBJECTIVE_LINKS, id)?;
                Ok(Some(req))
            }
            None => Ok(None),
        }
    }

    fn require_requirement(conn: &Connection, id: &Uuid) -> Result<Requirement> {
        Self::read_requirement(conn, id)?
            .ok_or_else(|| TrackerError::not_found("Requirement", id).into())
    }

    fn read_store(conn: &Connection) -> Result<TrackerStore> {
        let mut requirements = Self::query_all(
            conn,
            &format!("SELECT {} FROM requirements ORDER BY rowid", REQUIREMENT_COLUMNS),
            requirement_from_row,
        )?;
        let mut related = Self::load_links(conn, RELATED_LINKS)?;
        let mut objective_links = Self::load_links(conn, OBJECTIVE_LINKS)?;
        for req in &mut requirements {
            req.related = related.remove(&req.id).unwrap_or_default();
            req.objectives = objective_links.remove(&req.id).unwrap_or_default();
        }

        Ok(TrackerStore {
            users: Self::query_all(
                conn,
                &format!("SELECT {} FROM users ORDER BY rowid", USER_COLUMNS),
                user_from_row,
            )?,
            organizations: Self::query_all(
                conn,
                &format!("SELECT {} FROM organizations ORDER BY rowid", ORGANIZATION_COLUMNS),
                organization_from_row,
            )?,
            members: Self::query_all(
                conn,
                &format!("SELECT {} FROM organization_members ORDER BY rowid", MEMBER_COLUMNS),
                member_from_row,
            )?,
            projects: Self::query_all(
                conn,
                &format!("SELECT {} FROM projects ORDER BY rowid", PROJECT_COLUMNS),
                project_from_row,
            )?,
            categories: Self::query_all(
                conn,
                &format!("SELECT {} FROM requirement_categories ORDER BY rowid", CATEGORY_COLUMNS),
                category_from_row,
            )?,
            objectives: Self::query_all(
                conn,
                &format!("SELECT {} FROM project_objectives ORDER BY rowid", OBJECTIVE_COLUMNS),
                objective_from_row,
            )?,
            requirements,
            history: Self::query_all(
                conn,
                &format!("SELECT {} FROM requirement_history ORDER BY rowid", HISTORY_COLUMNS),
                history_from_row,
            )?,
        })
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Replaces every table with the store's contents; caller owns the transaction
    fn write_store(conn: &Connection, store: &TrackerStore) -> Result<()> {
        // Parents may be written after their children
        conn.execute_batch(
            "PRAGMA defer_foreign_keys = ON;
             DELETE FROM requirement_history;
             DELETE FROM requirement_objectives;
             DELETE FROM requirement_related;
             DELETE FROM requirements;
             DELETE FROM project_objectives;
             DELETE FROM requirement_categories;
             DELETE FROM projects;
             DELETE FROM organization_members;
             DELETE FROM organizations;
             DELETE FROM users;",
        )?;

        for user in &store.users {
            conn.execute(
                "INSERT INTO users (id, username, email, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.id.to_string(),
                    user.username,
                    user.email,
                    format_time(&user.created_at),
                ],
            )?;
        }

        for org in &store.organizations {
            conn.execute(
                "INSERT INTO organizations (id, name, description, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    org.id.to_string(),
                    org.name,
                    org.description,
                    format_time(&org.created_at),
                ],
            )?;
        }

        for member in &store.members {
            conn.execute(
                "INSERT INTO organization_members (id, user_id, organization_id, role)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    member.id.to_string(),
                    member.user_id.to_string(),
                    member.organization_id.to_string(),
                    member.role.as_str(),
                ],
            )?;
        }

        for project in &store.projects {
            conn.execute(
                "INSERT INTO projects
                 (id, name, description, organization_id, created_by, created_at, updated_at,
                  next_requirement_number)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    project.id.to_string(),
                    project.name,
                    project.description,
                    project.organization_id.to_string(),
                    opt_id(project.created_by),
                    format_time(&project.created_at),
                    format_time(&project.updated_at),
                    i64::try_from(project.next_requirement_number).map_err(|_| {
                        TrackerError::IdentifierSequenceExhausted {
                            project: project.id,
                        }
                    })?,
                ],
            )?;
        }

        for category in &store.categories {
            conn.execute(
                "INSERT INTO requirement_categories (id, name, description, project_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    category.id.to_string(),
                    category.name,
                    category.description,
                    category.project_id.to_string(),
                ],
            )?;
        }

        for objective in &store.objectives {
            conn.execute(
                "INSERT INTO project_objectives
                 (id, project_id, title, description, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    objective.id.to_string(),
                    objective.project_id.to_string(),
                    objective.title,
                    objective.description,
                    opt_id(objective.created_by),
                    format_time(&objective.created_at),
                ],
            )?;
        }

        for req in &store.requirements {
            Self::insert_requirement_row(conn, req)?;
        }
        for req in &store.requirements {
            Self::write_links(conn, req)?;
        }

        for entry in &store.history {
            Self::insert_history(conn, entry)?;
        }

        Ok(())
    }

    fn insert_requirement_row(conn: &Connection, req: &Requirement) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO requirements ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                REQUIREMENT_COLUMNS
            ),
            params![
                req.id.to_string(),
                req.identifier,
                req.title,
                req.description,
                req.acceptance_criteria,
                req.project_id.to_string(),
                opt_id(req.category_id),
                req.req_type.as_str(),
                req.priority.as_str(),
                req.status.as_str(),
                opt_id(req.created_by),
                format_time(&req.created_at),
                opt_id(req.updated_by),
                format_time(&req.updated_at),
                opt_id(req.parent_id),
            ],
        )?;
        Ok(())
    }

    fn update_requirement_row(conn: &Connection, req: &Requirement) -> Result<()> {
        conn.execute(
            "UPDATE requirements SET identifier = ?2, title = ?3, description = ?4,
                 acceptance_criteria = ?5, category_id = ?6, req_type = ?7, priority = ?8,
                 status = ?9, updated_by = ?10, updated_at = ?11, parent_id = ?12
             WHERE id = ?1",
            params![
                req.id.to_string(),
                req.identifier,
                req.title,
                req.description,
                req.acceptance_criteria,
                opt_id(req.category_id),
                req.req_type.as_str(),
                req.priority.as_str(),
                req.status.as_str(),
                opt_id(req.updated_by),
                format_time(&req.updated_at),
                opt_id(req.parent_id),
            ],
        )?;
        Ok(())
    }

    /// Replaces the related and objective links of one requirement
    fn write_links(conn: &Connection, req: &Requirement) -> Result<()> {
        for ((table, target), ids) in [
            (RELATED_LINKS, &req.related),
            (OBJECTIVE_LINKS, &req.objectives),
        ] {
            conn.execute(
                &format!("DELETE FROM {} WHERE requirement_id = ?1", table),
                [req.id.to_string()],
            )?;
            let mut stmt = conn.prepare_cached(&format!(
                "INSERT INTO {} (requirement_id, {}) VALUES (?1, ?2)",
                table, target
            ))?;
            for id in ids {
                stmt.execute([req.id.to_string(), id.to_string()])?;
            }
        }
        Ok(())
    }

    fn insert_history(conn: &Connection, entry: &HistoryEntry) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO requirement_history ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                HISTORY_COLUMNS
            ),
            params![
                entry.id.to_string(),
                entry.requirement_id.to_string(),
                entry.status.as_str(),
                opt_id(entry.changed_by),
                format_time(&entry.timestamp),
                entry.notes,
            ],
        )?;
        Ok(())
    }

    fn touch_project(conn: &Connection, project_id: &Uuid) -> Result<()> {
        conn.execute(
            "UPDATE projects SET updated_at = ?1 WHERE id = ?2",
            params![format_time(&Utc::now()), project_id.to_string()],
        )?;
        Ok(())
    }

    fn project_exists(conn: &Connection, project_id: &Uuid) -> Result<bool> {
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?1)",
            [project_id.to_string()],
            |row| row.get(0),
        )?)
    }

    fn identifier_taken(conn: &Connection, project_id: &Uuid, identifier: &str) -> Result<bool> {
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM requirements WHERE project_id = ?1 AND identifier = ?2)",
            params![project_id.to_string(), identifier],
            |row| row.get(0),
        )?)
    }

    /// Reads the project sequence and existing identifiers, then advances the
    /// sequence past the number handed out. Runs inside the caller's
    /// IMMEDIATE transaction.
    fn allocate_identifier(conn: &Connection, project_id: &Uuid) -> Result<String> {
        let sequence: i64 = conn
            .query_row(
                "SELECT next_requirement_number FROM projects WHERE id = ?1",
                [project_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| TrackerError::not_found("Project", project_id))?;

        let mut stmt =
            conn.prepare_cached("SELECT identifier FROM requirements WHERE project_id = ?1")?;
        let identifiers = stmt
            .query_map([project_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let exhausted = || TrackerError::IdentifierSequenceExhausted {
            project: *project_id,
        };
        let number = next_identifier_number(
            identifiers.iter().map(String::as_str),
            u64::try_from(sequence)?,
        )
        .ok_or_else(exhausted)?;
        let advanced = number
            .checked_add(1)
            .and_then(|n| i64::try_from(n).ok())
            .ok_or_else(exhausted)?;
        conn.execute(
            "UPDATE projects SET next_requirement_number = ?1 WHERE id = ?2",
            params![advanced, project_id.to_string()],
        )?;

        let identifier = format_identifier(number);
        debug!("Assigned {} in project {}", identifier, project_id);
        Ok(identifier)
    }

    fn update_in(
        conn: &Connection,
        incoming: Requirement,
        actor: Option<Uuid>,
    ) -> Result<Option<HistoryEntry>> {
        let previous = Self::require_requirement(conn, &incoming.id)?;
        let updated = prepare_update(&previous, incoming, actor);

        if updated.identifier != previous.identifier
            && Self::identifier_taken(conn, &updated.project_id, &updated.identifier)?
        {
            return Err(TrackerError::DuplicateIdentifier {
                project: updated.project_id,
                identifier: updated.identifier,
            }
            .into());
        }
        check_references(conn, &RequirementRefs::of(&updated))?;

        let entry = record_status_change(Some(&previous), &updated, actor);
        Self::update_requirement_row(conn, &updated)?;
        Self::write_links(conn, &updated)?;
        if let Some(entry) = &entry {
            info!("{}: {}", previous.identifier, entry.notes);
            Self::insert_history(conn, entry)?;
        }
        Self::touch_project(conn, &updated.project_id)?;
        Ok(entry)
    }
}

impl DatabaseBackend for SqliteBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<TrackerStore> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let store = Self::read_store(&tx)?;
        tx.commit()?;
        Ok(store)
    }

    fn save(&self, store: &TrackerStore) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::write_store(&tx, store)?;
        tx.commit()?;
        Ok(())
    }

    fn modify(&self, update_fn: &mut dyn FnMut(&mut TrackerStore) -> Result<()>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut store = Self::read_store(&tx)?;
        update_fn(&mut store)?;
        Self::write_store(&tx, &store)?;
        tx.commit()?;
        Ok(())
    }

    // Row-level overrides for the hot paths

    fn role_of(&self, user_id: &Uuid, organization_id: &Uuid) -> Result<Option<MemberRole>> {
        let conn = self.lock()?;
        let role: Option<String> = conn
            .query_row(
                "SELECT role FROM organization_members WHERE user_id = ?1 AND organization_id = ?2",
                [user_id.to_string(), organization_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(role.map(|r| r.parse::<MemberRole>()).transpose()?)
    }

    fn create_requirement(
        &self,
        project_id: &Uuid,
        draft: NewRequirement,
        actor: Option<Uuid>,
    ) -> Result<Requirement> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !Self::project_exists(&tx, project_id)? {
            return Err(TrackerError::not_found("Project", project_id).into());
        }
        check_references(
            &*tx,
            &RequirementRefs {
                id: None,
                project_id: *project_id,
                category_id: draft.category_id,
                parent_id: draft.parent_id,
                related: &draft.related,
                objectives: &draft.objectives,
            },
        )?;

        let explicit = draft.identifier.clone().filter(|id| !id.is_empty());
        let identifier = match explicit {
            Some(identifier) => {
                if Self::identifier_taken(&tx, project_id, &identifier)? {
                    return Err(TrackerError::DuplicateIdentifier {
                        project: *project_id,
                        identifier,
                    }
                    .into());
                }
                identifier
            }
            None => Self::allocate_identifier(&tx, project_id)?,
        };

        let mut requirement = draft.into_requirement(*project_id, identifier, actor);
        dedup_ids(&mut requirement.related);
        dedup_ids(&mut requirement.objectives);

        Self::insert_requirement_row(&tx, &requirement)?;
        Self::write_links(&tx, &requirement)?;
        Self::insert_history(&tx, &creation_entry(&requirement, actor))?;
        Self::touch_project(&tx, project_id)?;
        tx.commit()?;

        info!(
            "Created requirement {} in project {}",
            requirement.identifier, project_id
        );
        Ok(requirement)
    }

    fn get_requirement(&self, id: &Uuid) -> Result<Option<Requirement>> {
        let conn = self.lock()?;
        Self::read_requirement(&conn, id)
    }

    fn list_requirements(
        &self,
        project_id: &Uuid,
        filter: &RequirementFilter,
    ) -> Result<Vec<Requirement>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM requirements WHERE project_id = ?1 ORDER BY rowid",
            REQUIREMENT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([project_id.to_string()], requirement_from_row)?
            .collect::<rusqlite::Result<Vec<Requirement>>>()?;

        let mut requirements = Vec::new();
        for mut req in rows.into_iter().filter(|r| filter.matches(r)) {
            req.related = Self::links_for(&conn, RELATED_LINKS, &req.id)?;
            req.objectives = Self::links_for(&conn, OBJECTIVE_LINKS, &req.id)?;
            requirements.push(req);
        }
        Ok(requirements)
    }

    fn update_requirement(
        &self,
        requirement: Requirement,
        actor: Option<Uuid>,
    ) -> Result<Option<HistoryEntry>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let entry = Self::update_in(&tx, requirement, actor)?;
        tx.commit()?;
        Ok(entry)
    }

    fn update_status(&self, id: &Uuid, target: &str, actor: Option<Uuid>) -> Result<StatusUpdate> {
        let status: RequirementStatus = target.parse()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut requirement = Self::require_requirement(&tx, id)?;
        requirement.status = status;
        let entry = Self::update_in(&tx, requirement, actor)?;
        let requirement = Self::require_requirement(&tx, id)?;
        tx.commit()?;

        Ok(StatusUpdate { requirement, entry })
    }

    fn requirement_history(&self, id: &Uuid) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM requirement_history WHERE requirement_id = ?1 ORDER BY rowid",
            HISTORY_COLUMNS
        ))?;
        let mut entries = stmt
            .query_map([id.to_string()], history_from_row)?
            .collect::<rusqlite::Result<Vec<HistoryEntry>>>()?;
        sort_newest_first(&mut entries);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::as_tracker_error;
    use tempfile::NamedTempFile;

    fn backend() -> (NamedTempFile, SqliteBackend) {
        let temp_file = NamedTempFile::with_suffix(".db").unwrap();
        let backend = SqliteBackend::new(temp_file.path()).unwrap();
        (temp_file, backend)
    }

    fn seed(backend: &SqliteBackend) -> (Uuid, Uuid) {
        let user = backend.create_user("alice", "alice@example.com").unwrap();
        let org = backend
            .create_organization("Acme", "", Some(user.id))
            .unwrap();
        let project = backend
            .create_project(&org.id, "Portal", "", Some(user.id))
            .unwrap();
        (user.id, project.id)
    }

    #[test]
    fn test_sqlite_backend_create_and_load() {
        let (_file, backend) = backend();
        let store = backend.load().unwrap();
        assert!(store.requirements.is_empty());
        assert!(store.users.is_empty());
    }

    #[test]
    fn test_sqlite_backend_reopen_keeps_schema() {
        let temp_file = NamedTempFile::with_suffix(".db").unwrap();
        {
            let backend = SqliteBackend::new(temp_file.path()).unwrap();
            backend.create_user("alice", "").unwrap();
        }
        let backend = SqliteBackend::new(temp_file.path()).unwrap();
        assert_eq!(backend.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (_file, backend) = backend();
        let mut store = TrackerStore::new();
        let user = store.create_user("alice", "").unwrap().id;
        let org = store.create_organization("Acme", "", Some(user)).unwrap().id;
        let project = store.create_project(&org, "Portal", "", Some(user)).unwrap().id;
        let category = store.add_category(&project, "UI", "").unwrap().id;
        let goal = store.add_objective(&project, "Adoption", "", Some(user)).unwrap().id;
        let parent = store
            .create_requirement(&project, NewRequirement::new("Parent", ""), Some(user))
            .unwrap()
            .id;
        let mut draft = NewRequirement::new("Child", "details");
        draft.category_id = Some(category);
        draft.parent_id = Some(parent);
        draft.related = vec![parent];
        draft.objectives = vec![goal];
        let child = store.create_requirement(&project, draft, Some(user)).unwrap().id;
        store.update_status(&child, "Approved", Some(user)).unwrap();
        // Parent pointing forward at a later row
        let later = store
            .create_requirement(&project, NewRequirement::new("Later", ""), None)
            .unwrap()
            .id;
        store.set_parent(&parent, Some(later)).unwrap();

        backend.save(&store).unwrap();
        let loaded = backend.load().unwrap();
        assert_eq!(loaded, store);
    }

    #[test]
    fn test_create_requirement_assigns_sequential_identifiers() {
        let (_file, backend) = backend();
        let (user, project) = seed(&backend);

        let first = backend
            .create_requirement(&project, NewRequirement::new("One", ""), Some(user))
            .unwrap();
        let second = backend
            .create_requirement(&project, NewRequirement::new("Two", ""), Some(user))
            .unwrap();
        assert_eq!(first.identifier, "REQ-001");
        assert_eq!(second.identifier, "REQ-002");

        backend.delete_requirement(&second.id).unwrap();
        let third = backend
            .create_requirement(&project, NewRequirement::new("Three", ""), Some(user))
            .unwrap();
        assert_eq!(third.identifier, "REQ-003");

        let history = backend.requirement_history(&first.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].notes, "Requirement created with status: Draft");
    }

    #[test]
    fn test_explicit_duplicate_identifier_rejected() {
        let (_file, backend) = backend();
        let (user, project) = seed(&backend);
        backend
            .create_requirement(&project, NewRequirement::new("One", ""), Some(user))
            .unwrap();

        let mut draft = NewRequirement::new("Copy", "");
        draft.identifier = Some("REQ-001".into());
        let err = backend
            .create_requirement(&project, draft, Some(user))
            .unwrap_err();
        assert!(matches!(
            as_tracker_error(&err),
            Some(TrackerError::DuplicateIdentifier { .. })
        ));
        assert_eq!(backend.load().unwrap().requirements.len(), 1);
    }

    #[test]
    fn test_update_status_records_history_once() {
        let (_file, backend) = backend();
        let (user, project) = seed(&backend);
        let req = backend
            .create_requirement(&project, NewRequirement::new("One", ""), Some(user))
            .unwrap();

        let update = backend.update_status(&req.id, "In Review", Some(user)).unwrap();
        assert_eq!(update.requirement.status, RequirementStatus::InReview);
        let entry = update.entry.unwrap();
        assert_eq!(entry.notes, "Status changed from Draft to In Review");

        let again = backend.update_status(&req.id, "In Review", Some(user)).unwrap();
        assert!(again.entry.is_none());

        let history = backend.requirement_history(&req.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, RequirementStatus::InReview);
    }

    #[test]
    fn test_update_status_rejects_unknown_status() {
        let (_file, backend) = backend();
        let (user, project) = seed(&backend);
        let req = backend
            .create_requirement(&project, NewRequirement::new("One", ""), Some(user))
            .unwrap();

        let err = backend.update_status(&req.id, "Done", Some(user)).unwrap_err();
        assert_eq!(
            as_tracker_error(&err),
            Some(&TrackerError::InvalidStatus("Done".into()))
        );
        let stored = backend.get_requirement(&req.id).unwrap().unwrap();
        assert_eq!(stored.status, RequirementStatus::Draft);
    }

    #[test]
    fn test_role_of_and_list_filter() {
        let (_file, backend) = backend();
        let (user, project) = seed(&backend);
        let org = backend.get_project(&project).unwrap().unwrap().organization_id;
        assert_eq!(backend.role_of(&user, &org).unwrap(), Some(MemberRole::Admin));
        assert_eq!(backend.role_of(&Uuid::new_v4(), &org).unwrap(), None);

        backend
            .create_requirement(&project, NewRequirement::new("Login page", ""), Some(user))
            .unwrap();
        backend
            .create_requirement(&project, NewRequirement::new("Export", ""), Some(user))
            .unwrap();
        let found = backend
            .list_requirements(&project, &RequirementFilter::new().with_title("LOGIN"))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identifier, "REQ-001");
    }

    #[test]
    fn test_delete_project_cascades() {
        let (_file, backend) = backend();
        let (user, project) = seed(&backend);
        let req = backend
            .create_requirement(&project, NewRequirement::new("One", ""), Some(user))
            .unwrap();
        backend.delete_project(&project).unwrap();

        assert!(backend.get_requirement(&req.id).unwrap().is_none());
        assert!(backend.requirement_history(&req.id).unwrap().is_empty());
    }
}
