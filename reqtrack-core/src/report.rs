//! Aggregated views: status chart data, traceability matrix, dashboard

use anyhow::Result;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::filter::RequirementFilter;
use crate::models::{Organization, Project, ProjectObjective, Requirement, RequirementStatus};
use crate::store::TrackerStore;

/// Number of recently updated projects shown on the dashboard
pub const RECENT_PROJECT_LIMIT: usize = 5;

/// Label of the matrix group holding requirements without a category
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Requirement count per status, every status present, canonical order
pub fn status_counts(store: &TrackerStore, project_id: &Uuid) -> Vec<(RequirementStatus, usize)> {
    let requirements = store.list_requirements(project_id, &RequirementFilter::new());
    RequirementStatus::ALL
        .into_iter()
        .map(|status| {
            let count = requirements.iter().filter(|r| r.status == status).count();
            (status, count)
        })
        .collect()
}

/// One requirement row of the traceability matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixRow {
    pub requirement: Requirement,
    /// One flag per objective, aligned with `TraceabilityMatrix::objectives`
    pub links: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixGroup {
    pub label: String,
    /// `None` for the uncategorized group
    pub category_id: Option<Uuid>,
    pub rows: Vec<MatrixRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceabilityMatrix {
    pub project: Project,
    pub objectives: Vec<ProjectObjective>,
    pub groups: Vec<MatrixGroup>,
}

impl TraceabilityMatrix {
    /// Requirements linked to at least one objective
    pub fn covered_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| &g.rows)
            .filter(|row| row.links.iter().any(|linked| *linked))
            .count()
    }
}

/// Builds the requirement-to-objective matrix of a project.
///
/// Every category gets a group, even an empty one; the uncategorized group
/// only appears when it has rows.
pub fn traceability_matrix(store: &TrackerStore, project_id: &Uuid) -> Result<TraceabilityMatrix> {
    let project = store
        .get_project(project_id)
        .cloned()
        .ok_or_else(|| TrackerError::not_found("Project", project_id))?;
    let objectives: Vec<ProjectObjective> =
        store.objectives(project_id).into_iter().cloned().collect();

    let row = |req: &Requirement| MatrixRow {
        requirement: req.clone(),
        links: objectives
            .iter()
            .map(|o| req.objectives.contains(&o.id))
            .collect(),
    };

    let requirements = store.list_requirements(project_id, &RequirementFilter::new());
    let mut groups: Vec<MatrixGroup> = store
        .categories(project_id)
        .into_iter()
        .map(|category| MatrixGroup {
            label: category.name.clone(),
            category_id: Some(category.id),
            rows: requirements
                .iter()
                .copied()
                .filter(|r| r.category_id == Some(category.id))
                .map(|r| row(r))
                .collect(),
        })
        .collect();

    let uncategorized: Vec<MatrixRow> = requirements
        .iter()
        .copied()
        .filter(|r| r.category_id.is_none())
        .map(|r| row(r))
        .collect();
    if !uncategorized.is_empty() {
        groups.push(MatrixGroup {
            label: UNCATEGORIZED.to_string(),
            category_id: None,
            rows: uncategorized,
        });
    }

    Ok(TraceabilityMatrix {
        project,
        objectives,
        groups,
    })
}

/// Landing view for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dashboard {
    pub organizations: Vec<Organization>,
    /// Most recently updated first, at most `RECENT_PROJECT_LIMIT`
    pub recent_projects: Vec<Project>,
}

pub fn dashboard(store: &TrackerStore, user_id: &Uuid) -> Dashboard {
    let organizations = store
        .organizations_for_user(user_id)
        .into_iter()
        .cloned()
        .collect();
    let mut recent_projects: Vec<Project> = store
        .projects_for_user(user_id)
        .into_iter()
        .cloned()
        .collect();
    recent_projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    recent_projects.truncate(RECENT_PROJECT_LIMIT);
    Dashboard {
        organizations,
        recent_projects,
    }
}
