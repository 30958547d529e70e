//! In-memory aggregate of every tracked record
//!
//! `TrackerStore` holds the whole data set and implements the write rules
//! (identifier assignment, history recording, cascades, reference checks).
//! Backends persist it; the SQLite backend also reuses the pure helpers here
//! for its row-level fast paths.

use anyhow::Result;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::filter::RequirementFilter;
use crate::history::{creation_entry, record_status_change, sort_newest_first};
use crate::identifier::{format_identifier, next_identifier_number};
use crate::models::{
    truncate_title, HistoryEntry, MemberRole, NewRequirement, Organization, OrganizationMember,
    Project, ProjectObjective, Requirement, RequirementCategory, RequirementStatus, User,
};

/// Outcome of a status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub requirement: Requirement,
    /// `None` when the requirement already had the target status
    pub entry: Option<HistoryEntry>,
}

/// A requirement together with everything a detail view shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementDetail {
    pub requirement: Requirement,
    pub category: Option<RequirementCategory>,
    pub parent: Option<Requirement>,
    pub children: Vec<Requirement>,
    pub related: Vec<Requirement>,
    pub objectives: Vec<ProjectObjective>,
    /// Newest first
    pub history: Vec<HistoryEntry>,
}

/// Answers which project a referenced row belongs to
pub trait ReferenceLookup {
    fn category_project(&self, id: &Uuid) -> Result<Option<Uuid>>;
    fn requirement_project(&self, id: &Uuid) -> Result<Option<Uuid>>;
    fn objective_project(&self, id: &Uuid) -> Result<Option<Uuid>>;
    fn requirement_parent(&self, id: &Uuid) -> Result<Option<Uuid>>;
}

/// The outgoing references of a requirement about to be written
#[derive(Debug, Clone, Copy)]
pub struct RequirementRefs<'a> {
    /// `None` while the requirement is being created
    pub id: Option<Uuid>,
    pub project_id: Uuid,
    pub category_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub related: &'a [Uuid],
    pub objectives: &'a [Uuid],
}

impl<'a> RequirementRefs<'a> {
    pub fn of(req: &'a Requirement) -> Self {
        Self {
            id: Some(req.id),
            project_id: req.project_id,
            category_id: req.category_id,
            parent_id: req.parent_id,
            related: &req.related,
            objectives: &req.objectives,
        }
    }
}

/// Verifies every reference stays inside the requirement's project
pub fn check_references<L: ReferenceLookup + ?Sized>(
    lookup: &L,
    refs: &RequirementRefs<'_>,
) -> Result<()> {
    if let Some(category_id) = refs.category_id {
        match lookup.category_project(&category_id)? {
            None => return Err(TrackerError::not_found("Category", category_id).into()),
            Some(project) if project != refs.project_id => {
                return Err(TrackerError::CrossProjectReference {
                    kind: "category",
                    id: category_id,
                }
                .into())
            }
            Some(_) => {}
        }
    }

    if let Some(parent_id) = refs.parent_id {
        if refs.id == Some(parent_id) {
            return Err(
                TrackerError::InvalidParent("a requirement cannot be its own parent".into()).into(),
            );
        }
        check_requirement_in_project(lookup, &parent_id, refs.project_id)?;

        if let Some(own_id) = refs.id {
            let mut seen = HashSet::new();
            let mut cursor = lookup.requirement_parent(&parent_id)?;
            while let Some(ancestor) = cursor {
                if ancestor == own_id {
                    return Err(TrackerError::InvalidParent(
                        "parent chain would form a cycle".into(),
                    )
                    .into());
                }
                if !seen.insert(ancestor) {
                    break;
                }
                cursor = lookup.requirement_parent(&ancestor)?;
            }
        }
    }

    for related_id in refs.related {
        if refs.id == Some(*related_id) {
            return Err(TrackerError::InvalidRelation(
                "a requirement cannot be related to itself".into(),
            )
            .into());
        }
        check_requirement_in_project(lookup, related_id, refs.project_id)?;
    }

    for objective_id in refs.objectives {
        match lookup.objective_project(objective_id)? {
            None => return Err(TrackerError::not_found("Objective", objective_id).into()),
            Some(project) if project != refs.project_id => {
                return Err(TrackerError::CrossProjectObjective.into())
            }
            Some(_) => {}
        }
    }

    Ok(())
}

fn check_requirement_in_project<L: ReferenceLookup + ?Sized>(
    lookup: &L,
    id: &Uuid,
    project_id: Uuid,
) -> Result<()> {
    match lookup.requirement_project(id)? {
        None => Err(TrackerError::not_found("Requirement", id).into()),
        Some(project) if project != project_id => Err(TrackerError::CrossProjectReference {
            kind: "requirement",
            id: *id,
        }
        .into()),
        Some(_) => Ok(()),
    }
}

/// Applies an edit to the persisted row.
///
/// Ownership and creation fields always come from `previous`; the title is
/// re-truncated and the update stamp set. An empty identifier keeps the old
/// one.
pub fn prepare_update(
    previous: &Requirement,
    mut incoming: Requirement,
    actor: Option<Uuid>,
) -> Requirement {
    incoming.id = previous.id;
    incoming.project_id = previous.project_id;
    incoming.created_by = previous.created_by;
    incoming.created_at = previous.created_at;
    if incoming.identifier.is_empty() {
        incoming.identifier = previous.identifier.clone();
    }
    incoming.title = truncate_title(&incoming.title);
    dedup_ids(&mut incoming.related);
    dedup_ids(&mut incoming.objectives);
    incoming.updated_by = actor;
    incoming.updated_at = Utc::now();
    incoming
}

/// Removes repeated ids, keeping first occurrences in order
pub fn dedup_ids(ids: &mut Vec<Uuid>) {
    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(*id));
}

/// Every record of the tracker
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackerStore {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub members: Vec<OrganizationMember>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub categories: Vec<RequirementCategory>,
    #[serde(default)]
    pub objectives: Vec<ProjectObjective>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Append order; use `history_for` for the newest-first view
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ReferenceLookup for TrackerStore {
    fn category_project(&self, id: &Uuid) -> Result<Option<Uuid>> {
        Ok(self.get_category(id).map(|c| c.project_id))
    }

    fn requirement_project(&self, id: &Uuid) -> Result<Option<Uuid>> {
        Ok(self.get_requirement(id).map(|r| r.project_id))
    }

    fn objective_project(&self, id: &Uuid) -> Result<Option<Uuid>> {
        Ok(self.get_objective(id).map(|o| o.project_id))
    }

    fn requirement_parent(&self, id: &Uuid) -> Result<Option<Uuid>> {
        Ok(self.get_requirement(id).and_then(|r| r.parent_id))
    }
}

impl TrackerStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub fn get_user(&self, id: &Uuid) -> Option<&User> {
        self.users.iter().find(|u| u.id == *id)
    }

    pub fn find_user_by_username(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }

    /// Registers a user; usernames are unique
    pub fn create_user(&mut self, username: &str, email: &str) -> Result<User> {
        if self.find_user_by_username(username).is_some() {
            return Err(TrackerError::DuplicateUsername(username.to_string()).into());
        }
        let user = User::new(username, email);
        self.users.push(user.clone());
        info!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    /// Deletes a user, nulling every authorship reference and dropping memberships
    pub fn delete_user(&mut self, id: &Uuid) -> Result<()> {
        let before = self.users.len();
        self.users.retain(|u| u.id != *id);
        if self.users.len() == before {
            return Err(TrackerError::not_found("User", id).into());
        }

        let clear = |slot: &mut Option<Uuid>| {
            if *slot == Some(*id) {
                *slot = None;
            }
        };
        self.members.retain(|m| m.user_id != *id);
        self.projects.iter_mut().for_each(|p| clear(&mut p.created_by));
        self.objectives.iter_mut().for_each(|o| clear(&mut o.created_by));
        for req in &mut self.requirements {
            clear(&mut req.created_by);
            clear(&mut req.updated_by);
        }
        self.history.iter_mut().for_each(|h| clear(&mut h.changed_by));
        info!("Deleted user {}", id);
        Ok(())
    }

    // =========================================================================
    // Organizations and membership
    // =========================================================================

    pub fn get_organization(&self, id: &Uuid) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.id == *id)
    }

    pub fn find_organization_by_name(&self, name: &str) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.name == name)
    }

    /// Creates an organization; the creator, if given, becomes its admin
    pub fn create_organization(
        &mut self,
        name: &str,
        description: &str,
        creator: Option<Uuid>,
    ) -> Result<Organization> {
        if let Some(user_id) = creator {
            self.require_user(&user_id)?;
        }
        let organization = Organization::new(name, description);
        self.organizations.push(organization.clone());
        if let Some(user_id) = creator {
            self.members.push(OrganizationMember {
                id: Uuid::new_v4(),
                user_id,
                organization_id: organization.id,
                role: MemberRole::Admin,
            });
        }
        info!("Created organization {} ({})", organization.name, organization.id);
        Ok(organization)
    }

    /// Deletes an organization and everything it owns
    pub fn delete_organization(&mut self, id: &Uuid) -> Result<()> {
        if self.get_organization(id).is_none() {
            return Err(TrackerError::not_found("Organization", id).into());
        }
        let project_ids: Vec<Uuid> = self
            .projects
            .iter()
            .filter(|p| p.organization_id == *id)
            .map(|p| p.id)
            .collect();
        for project_id in &project_ids {
            self.delete_project(project_id)?;
        }
        self.members.retain(|m| m.organization_id != *id);
        self.organizations.retain(|o| o.id != *id);
        info!(
            "Deleted organization {} with {} project(s)",
            id,
            project_ids.len()
        );
        Ok(())
    }

    pub fn membership(&self, user_id: &Uuid, organization_id: &Uuid) -> Option<&OrganizationMember> {
        self.members
            .iter()
            .find(|m| m.user_id == *user_id && m.organization_id == *organization_id)
    }

    pub fn members_of(&self, organization_id: &Uuid) -> Vec<&OrganizationMember> {
        self.members
            .iter()
            .filter(|m| m.organization_id == *organization_id)
            .collect()
    }

    /// Adds a user to an organization; one membership per pair
    pub fn add_member(
        &mut self,
        organization_id: &Uuid,
        user_id: &Uuid,
        role: MemberRole,
    ) -> Result<OrganizationMember> {
        self.require_organization(organization_id)?;
        self.require_user(user_id)?;
        if self.membership(user_id, organization_id).is_some() {
            return Err(TrackerError::DuplicateMembership {
                user: *user_id,
                organization: *organization_id,
            }
            .into());
        }
        let member = OrganizationMember {
            id: Uuid::new_v4(),
            user_id: *user_id,
            organization_id: *organization_id,
            role,
        };
        self.members.push(member.clone());
        info!(
            "Added user {} to organization {} as {}",
            user_id, organization_id, role
        );
        Ok(member)
    }

    pub fn set_member_role(
        &mut self,
        organization_id: &Uuid,
        user_id: &Uuid,
        role: MemberRole,
    ) -> Result<()> {
        let member = self
            .members
            .iter_mut()
            .find(|m| m.user_id == *user_id && m.organization_id == *organization_id)
            .ok_or_else(|| TrackerError::not_found("Membership", user_id))?;
        member.role = role;
        Ok(())
    }

    pub fn remove_member(&mut self, organization_id: &Uuid, user_id: &Uuid) -> Result<()> {
        let before = self.members.len();
        self.members
            .retain(|m| !(m.user_id == *user_id && m.organization_id == *organization_id));
        if self.members.len() == before {
            return Err(TrackerError::not_found("Membership", user_id).into());
        }
        Ok(())
    }

    /// Organizations the user is a member of, in creation order
    pub fn organizations_for_user(&self, user_id: &Uuid) -> Vec<&Organization> {
        self.organizations
            .iter()
            .filter(|o| self.membership(user_id, &o.id).is_some())
            .collect()
    }

    // =========================================================================
    // Projects
    // =========================================================================

    pub fn get_project(&self, id: &Uuid) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == *id)
    }

    pub fn projects_in(&self, organization_id: &Uuid) -> Vec<&Project> {
        self.projects
            .iter()
            .filter(|p| p.organization_id == *organization_id)
            .collect()
    }

    /// Projects of every organization the user belongs to
    pub fn projects_for_user(&self, user_id: &Uuid) -> Vec<&Project> {
        self.projects
            .iter()
            .filter(|p| self.membership(user_id, &p.organization_id).is_some())
            .collect()
    }

    pub fn create_project(
        &mut self,
        organization_id: &Uuid,
        name: &str,
        description: &str,
        creator: Option<Uuid>,
    ) -> Result<Project> {
        self.require_organization(organization_id)?;
        let project = Project::new(*organization_id, name, description, creator);
        self.projects.push(project.clone());
        info!("Created project {} ({})", project.name, project.id);
        Ok(project)
    }

    /// Deletes a project with its requirements, history, categories and objectives
    pub fn delete_project(&mut self, id: &Uuid) -> Result<()> {
        if self.get_project(id).is_none() {
            return Err(TrackerError::not_found("Project", id).into());
        }
        let requirement_ids: HashSet<Uuid> = self
            .requirements
            .iter()
            .filter(|r| r.project_id == *id)
            .map(|r| r.id)
            .collect();
        self.history
            .retain(|h| !requirement_ids.contains(&h.requirement_id));
        self.requirements.retain(|r| r.project_id != *id);
        self.categories.retain(|c| c.project_id != *id);
        self.objectives.retain(|o| o.project_id != *id);
        self.projects.retain(|p| p.id != *id);
        info!(
            "Deleted project {} with {} requirement(s)",
            id,
            requirement_ids.len()
        );
        Ok(())
    }

    fn touch_project(&mut self, id: &Uuid) {
        if let Some(project) = self.projects.iter_mut().find(|p| p.id == *id) {
            project.updated_at = Utc::now();
        }
    }

    // =========================================================================
    // Categories and objectives
    // =========================================================================

    pub fn get_category(&self, id: &Uuid) -> Option<&RequirementCategory> {
        self.categories.iter().find(|c| c.id == *id)
    }

    pub fn categories(&self, project_id: &Uuid) -> Vec<&RequirementCategory> {
        self.categories
            .iter()
            .filter(|c| c.project_id == *project_id)
            .collect()
    }

    pub fn add_category(
        &mut self,
        project_id: &Uuid,
        name: &str,
        description: &str,
    ) -> Result<RequirementCategory> {
        self.require_project(project_id)?;
        let category = RequirementCategory {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            project_id: *project_id,
        };
        self.categories.push(category.clone());
        Ok(category)
    }

    /// Deletes a category; its requirements become uncategorized
    pub fn delete_category(&mut self, id: &Uuid) -> Result<()> {
        let before = self.categories.len();
        self.categories.retain(|c| c.id != *id);
        if self.categories.len() == before {
            return Err(TrackerError::not_found("Category", id).into());
        }
        for req in &mut self.requirements {
            if req.category_id == Some(*id) {
                req.category_id = None;
            }
        }
        Ok(())
    }

    pub fn get_objective(&self, id: &Uuid) -> Option<&ProjectObjective> {
        self.objectives.iter().find(|o| o.id == *id)
    }

    /// Objectives of a project, oldest first
    pub fn objectives(&self, project_id: &Uuid) -> Vec<&ProjectObjective> {
        let mut objectives: Vec<&ProjectObjective> = self
            .objectives
            .iter()
            .filter(|o| o.project_id == *project_id)
            .collect();
        objectives.sort_by_key(|o| o.created_at);
        objectives
    }

    pub fn add_objective(
        &mut self,
        project_id: &Uuid,
        title: &str,
        description: &str,
        creator: Option<Uuid>,
    ) -> Result<ProjectObjective> {
        self.require_project(project_id)?;
        let objective = ProjectObjective {
            id: Uuid::new_v4(),
            project_id: *project_id,
            title: truncate_title(title),
            description: description.to_string(),
            created_by: creator,
            created_at: Utc::now(),
        };
        self.objectives.push(objective.clone());
        Ok(objective)
    }

    pub fn delete_objective(&mut self, id: &Uuid) -> Result<()> {
        let before = self.objectives.len();
        self.objectives.retain(|o| o.id != *id);
        if self.objectives.len() == before {
            return Err(TrackerError::not_found("Objective", id).into());
        }
        for req in &mut self.requirements {
            req.objectives.retain(|o| o != id);
        }
        Ok(())
    }

    // =========================================================================
    // Requirements
    // =========================================================================

    pub fn get_requirement(&self, id: &Uuid) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.id == *id)
    }

    /// Like `get_requirement` but a missing row is an error
    pub fn requirement(&self, id: &Uuid) -> Result<&Requirement> {
        self.get_requirement(id)
            .ok_or_else(|| TrackerError::not_found("Requirement", id).into())
    }

    pub fn find_requirement_by_identifier(
        &self,
        project_id: &Uuid,
        identifier: &str,
    ) -> Option<&Requirement> {
        self.requirements
            .iter()
            .find(|r| r.project_id == *project_id && r.identifier == identifier)
    }

    fn identifier_taken(&self, project_id: &Uuid, identifier: &str, except: Option<Uuid>) -> bool {
        self.requirements.iter().any(|r| {
            r.project_id == *project_id && r.identifier == identifier && Some(r.id) != except
        })
    }

    /// Creates a requirement, assigning its identifier and writing the
    /// creation history entry in the same step.
    pub fn create_requirement(
        &mut self,
        project_id: &Uuid,
        draft: NewRequirement,
        actor: Option<Uuid>,
    ) -> Result<Requirement> {
        self.require_project(project_id)?;
        check_references(
            self,
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
                if self.identifier_taken(project_id, &identifier, None) {
                    return Err(TrackerError::DuplicateIdentifier {
                        project: *project_id,
                        identifier,
                    }
                    .into());
                }
                identifier
            }
            None => self.allocate_identifier(project_id)?,
        };

        let mut requirement = draft.into_requirement(*project_id, identifier, actor);
        dedup_ids(&mut requirement.related);
        dedup_ids(&mut requirement.objectives);

        let entry = creation_entry(&requirement, actor);
        self.requirements.push(requirement.clone());
        self.history.push(entry);
        self.touch_project(project_id);
        info!(
            "Created requirement {} in project {}",
            requirement.identifier, project_id
        );
        Ok(requirement)
    }

    /// Hands out the next `REQ-NNN` identifier and advances the project sequence
    fn allocate_identifier(&mut self, project_id: &Uuid) -> Result<String> {
        let sequence = self
            .get_project(project_id)
            .map(|p| p.next_requirement_number)
            .ok_or_else(|| TrackerError::not_found("Project", project_id))?;
        let number = next_identifier_number(
            self.requirements
                .iter()
                .filter(|r| r.project_id == *project_id)
                .map(|r| r.identifier.as_str()),
            sequence,
        )
        .ok_or(TrackerError::IdentifierSequenceExhausted {
            project: *project_id,
        })?;
        let advanced = number
            .checked_add(1)
            .ok_or(TrackerError::IdentifierSequenceExhausted {
                project: *project_id,
            })?;
        if let Some(project) = self.projects.iter_mut().find(|p| p.id == *project_id) {
            project.next_requirement_number = advanced;
        }
        let identifier = format_identifier(number);
        debug!("Assigned {} in project {}", identifier, project_id);
        Ok(identifier)
    }

    /// Writes an edited requirement.
    ///
    /// Returns the history entry appended when the status differs from the
    /// persisted one.
    pub fn update_requirement(
        &mut self,
        incoming: Requirement,
        actor: Option<Uuid>,
    ) -> Result<Option<HistoryEntry>> {
        let idx = self
            .requirements
            .iter()
            .position(|r| r.id == incoming.id)
            .ok_or_else(|| TrackerError::not_found("Requirement", incoming.id))?;
        let previous = self.requirements[idx].clone();
        let updated = prepare_update(&previous, incoming, actor);

        if updated.identifier != previous.identifier
            && self.identifier_taken(&updated.project_id, &updated.identifier, Some(updated.id))
        {
            return Err(TrackerError::DuplicateIdentifier {
                project: updated.project_id,
                identifier: updated.identifier,
            }
            .into());
        }
        check_references(self, &RequirementRefs::of(&updated))?;

        let entry = record_status_change(Some(&previous), &updated, actor);
        let project_id = updated.project_id;
        self.requirements[idx] = updated;
        if let Some(entry) = &entry {
            info!("{}: {}", previous.identifier, entry.notes);
            self.history.push(entry.clone());
        }
        self.touch_project(&project_id);
        Ok(entry)
    }

    /// Moves a requirement to the named status.
    ///
    /// The name must be one of the six display strings; anything else leaves
    /// the requirement untouched.
    pub fn update_status(
        &mut self,
        id: &Uuid,
        target: &str,
        actor: Option<Uuid>,
    ) -> Result<StatusUpdate> {
        let status: RequirementStatus = target.parse()?;
        let mut requirement = self.requirement(id)?.clone();
        requirement.status = status;
        let entry = self.update_requirement(requirement, actor)?;
        Ok(StatusUpdate {
            requirement: self.requirement(id)?.clone(),
            entry,
        })
    }

    /// Deletes a requirement and its history; children lose their parent
    pub fn delete_requirement(&mut self, id: &Uuid) -> Result<Requirement> {
        let idx = self
            .requirements
            .iter()
            .position(|r| r.id == *id)
            .ok_or_else(|| TrackerError::not_found("Requirement", id))?;
        let removed = self.requirements.remove(idx);
        self.history.retain(|h| h.requirement_id != *id);
        for req in &mut self.requirements {
            if req.parent_id == Some(*id) {
                req.parent_id = None;
            }
            req.related.retain(|r| r != id);
        }
        info!("Deleted requirement {} ({})", removed.identifier, id);
        Ok(removed)
    }

    /// Points `from` at `to`; the link is one-way
    pub fn add_related(&mut self, from: &Uuid, to: &Uuid) -> Result<bool> {
        let source = self.requirement(from)?;
        if source.related.contains(to) {
            return Ok(false);
        }
        let mut related = source.related.clone();
        related.push(*to);
        check_references(
            self,
            &RequirementRefs {
                id: Some(source.id),
                project_id: source.project_id,
                category_id: None,
                parent_id: None,
                related: &related,
                objectives: &[],
            },
        )?;
        if let Some(req) = self.requirements.iter_mut().find(|r| r.id == *from) {
            req.related = related;
        }
        Ok(true)
    }

    pub fn remove_related(&mut self, from: &Uuid, to: &Uuid) -> Result<bool> {
        let req = self
            .requirements
            .iter_mut()
            .find(|r| r.id == *from)
            .ok_or_else(|| TrackerError::not_found("Requirement", from))?;
        let before = req.related.len();
        req.related.retain(|r| r != to);
        Ok(req.related.len() != before)
    }

    pub fn set_parent(&mut self, child: &Uuid, parent: Option<Uuid>) -> Result<()> {
        let source = self.requirement(child)?;
        check_references(
            self,
            &RequirementRefs {
                id: Some(source.id),
                project_id: source.project_id,
                category_id: None,
                parent_id: parent,
                related: &[],
                objectives: &[],
            },
        )?;
        if let Some(req) = self.requirements.iter_mut().find(|r| r.id == *child) {
            req.parent_id = parent;
        }
        Ok(())
    }

    /// Links a requirement to an objective of the same project.
    ///
    /// Returns `false` when the link already existed.
    pub fn link_objective(&mut self, requirement_id: &Uuid, objective_id: &Uuid) -> Result<bool> {
        let objective_project = self
            .get_objective(objective_id)
            .map(|o| o.project_id)
            .ok_or_else(|| TrackerError::not_found("Objective", objective_id))?;
        let req = self
            .requirements
            .iter_mut()
            .find(|r| r.id == *requirement_id)
            .ok_or_else(|| TrackerError::not_found("Requirement", requirement_id))?;
        if req.project_id != objective_project {
            return Err(TrackerError::CrossProjectObjective.into());
        }
        if req.objectives.contains(objective_id) {
            return Ok(false);
        }
        req.objectives.push(*objective_id);
        Ok(true)
    }

    pub fn unlink_objective(&mut self, requirement_id: &Uuid, objective_id: &Uuid) -> Result<bool> {
        let req = self
            .requirements
            .iter_mut()
            .find(|r| r.id == *requirement_id)
            .ok_or_else(|| TrackerError::not_found("Requirement", requirement_id))?;
        let before = req.objectives.len();
        req.objectives.retain(|o| o != objective_id);
        Ok(req.objectives.len() != before)
    }

    /// Requirements of a project in creation order, narrowed by `filter`
    pub fn list_requirements(
        &self,
        project_id: &Uuid,
        filter: &RequirementFilter,
    ) -> Vec<&Requirement> {
        self.requirements
            .iter()
            .filter(|r| r.project_id == *project_id && filter.matches(r))
            .collect()
    }

    pub fn children(&self, id: &Uuid) -> Vec<&Requirement> {
        self.requirements
            .iter()
            .filter(|r| r.parent_id == Some(*id))
            .collect()
    }

    /// History of a requirement, newest first
    pub fn history_for(&self, requirement_id: &Uuid) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self
            .history
            .iter()
            .filter(|h| h.requirement_id == *requirement_id)
            .cloned()
            .collect();
        sort_newest_first(&mut entries);
        entries
    }

    pub fn requirement_detail(&self, id: &Uuid) -> Result<RequirementDetail> {
        let requirement = self.requirement(id)?.clone();
        let category = requirement
            .category_id
            .and_then(|c| self.get_category(&c))
            .cloned();
        let parent = requirement
            .parent_id
            .and_then(|p| self.get_requirement(&p))
            .cloned();
        let children = self.children(id).into_iter().cloned().collect();
        let related: Vec<Requirement> = requirement
            .related
            .iter()
            .filter_map(|r| self.get_requirement(r))
            .cloned()
            .collect();
        let objectives: Vec<ProjectObjective> = requirement
            .objectives
            .iter()
            .filter_map(|o| self.get_objective(o))
            .cloned()
            .collect();
        let dangling = (requirement.related.len() - related.len())
            + (requirement.objectives.len() - objectives.len());
        if dangling > 0 {
            warn!(
                "Requirement {} has {} dangling link(s); skipped",
                requirement.identifier, dangling
            );
        }
        let history = self.history_for(id);
        Ok(RequirementDetail {
            requirement,
            category,
            parent,
            children,
            related,
            objectives,
            history,
        })
    }

    // =========================================================================
    // Lookup guards
    // =========================================================================

    fn require_user(&self, id: &Uuid) -> Result<()> {
        match self.get_user(id) {
            Some(_) => Ok(()),
            None => Err(TrackerError::not_found("User", id).into()),
        }
    }

    fn require_organization(&self, id: &Uuid) -> Result<()> {
        match self.get_organization(id) {
            Some(_) => Ok(()),
            None => Err(TrackerError::not_found("Organization", id).into()),
        }
    }

    fn require_project(&self, id: &Uuid) -> Result<()> {
        match self.get_project(id) {
            Some(_) => Ok(()),
            None => Err(TrackerError::not_found("Project", id).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::as_tracker_error;

    struct Fixture {
        store: TrackerStore,
        user: Uuid,
        organization: Uuid,
        project: Uuid,
    }

    fn fixture() -> Fixture {
        let mut store = TrackerStore::new();
        let user = store.create_user("alice", "alice@example.com").unwrap().id;
        let organization = store
            .create_organization("Acme", "", Some(user))
            .unwrap()
            .id;
        let project = store
            .create_project(&organization, "Portal", "Customer portal", Some(user))
            .unwrap()
            .id;
        Fixture {
            store,
            user,
            organization,
            project,
        }
    }

    fn add(f: &mut Fixture, title: &str) -> Requirement {
        f.store
            .create_requirement(&f.project, NewRequirement::new(title, "desc"), Some(f.user))
            .unwrap()
    }

    #[test]
    fn test_sequential_identifiers() {
        let mut f = fixture();
        let ids: Vec<String> = (0..5).map(|i| add(&mut f, &format!("R{}", i)).identifier).collect();
        assert_eq!(ids, vec!["REQ-001", "REQ-002", "REQ-003", "REQ-004", "REQ-005"]);
    }

    #[test]
    fn test_identifiers_scoped_per_project() {
        let mut f = fixture();
        let other = f
            .store
            .create_project(&f.organization, "Other", "", None)
            .unwrap()
            .id;
        let a = add(&mut f, "First");
        let b = f
            .store
            .create_requirement(&other, NewRequirement::new("Elsewhere", ""), None)
            .unwrap();
        assert_eq!(a.identifier, "REQ-001");
        assert_eq!(b.identifier, "REQ-001");
    }

    #[test]
    fn test_explicit_identifier_used_verbatim() {
        let mut f = fixture();
        let mut draft = NewRequirement::new("Legacy", "");
        draft.identifier = Some("LEGACY-7".into());
        let req = f.store.create_requirement(&f.project, draft, None).unwrap();
        assert_eq!(req.identifier, "LEGACY-7");

        // Malformed identifiers do not affect numbering
        assert_eq!(add(&mut f, "Next").identifier, "REQ-001");
    }

    #[test]
    fn test_explicit_identifier_advances_scan() {
        let mut f = fixture();
        let mut draft = NewRequirement::new("Imported", "");
        draft.identifier = Some("REQ-050".into());
        f.store.create_requirement(&f.project, draft, None).unwrap();
        assert_eq!(add(&mut f, "Next").identifier, "REQ-051");
    }

    #[test]
    fn test_exhausted_sequence_rejected_without_write() {
        let mut f = fixture();
        let mut draft = NewRequirement::new("Imported", "");
        draft.identifier = Some(format!("REQ-{}", u64::MAX));
        f.store.create_requirement(&f.project, draft, None).unwrap();

        let err = f
            .store
            .create_requirement(&f.project, NewRequirement::new("Next", ""), None)
            .unwrap_err();
        assert_eq!(
            as_tracker_error(&err),
            Some(&TrackerError::IdentifierSequenceExhausted { project: f.project })
        );
        assert_eq!(f.store.requirements.len(), 1);
        assert_eq!(
            f.store.get_project(&f.project).unwrap().next_requirement_number,
            1
        );
    }

    #[test]
    fn test_duplicate_identifier_rejected_without_write() {
        let mut f = fixture();
        add(&mut f, "First");
        let mut draft = NewRequirement::new("Clash", "");
        draft.identifier = Some("REQ-001".into());
        let err = f.store.create_requirement(&f.project, draft, None).unwrap_err();
        assert!(matches!(
            as_tracker_error(&err),
            Some(TrackerError::DuplicateIdentifier { .. })
        ));
        assert_eq!(f.store.requirements.len(), 1);
        assert_eq!(f.store.history.len(), 1);
    }

    #[test]
    fn test_numbers_not_reused_after_delete() {
        let mut f = fixture();
        add(&mut f, "One");
        let two = add(&mut f, "Two");
        f.store.delete_requirement(&two.id).unwrap();
        assert_eq!(add(&mut f, "Three").identifier, "REQ-003");
    }

    #[test]
    fn test_creation_writes_history() {
        let mut f = fixture();
        let req = add(&mut f, "Audited");
        let history = f.store.history_for(&req.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RequirementStatus::Draft);
        assert_eq!(history[0].changed_by, Some(f.user));
    }

    #[test]
    fn test_status_change_appends_one_entry() {
        let mut f = fixture();
        let req = add(&mut f, "Flow");
        let update = f
            .store
            .update_status(&req.id, "Approved", Some(f.user))
            .unwrap();
        assert_eq!(update.requirement.status, RequirementStatus::Approved);
        assert_eq!(update.requirement.updated_by, Some(f.user));
        let entry = update.entry.unwrap();
        assert_eq!(entry.notes, "Status changed from Draft to Approved");

        let history = f.store.history_for(&req.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, RequirementStatus::Approved);
    }

    #[test]
    fn test_same_status_no_history() {
        let mut f = fixture();
        let req = add(&mut f, "Flow");
        let update = f.store.update_status(&req.id, "Draft", None).unwrap();
        assert!(update.entry.is_none());
        assert_eq!(f.store.history_for(&req.id).len(), 1);
    }

    #[test]
    fn test_invalid_status_leaves_requirement_untouched() {
        let mut f = fixture();
        let req = add(&mut f, "Flow");
        let err = f.store.update_status(&req.id, "Done", None).unwrap_err();
        assert_eq!(
            as_tracker_error(&err),
            Some(&TrackerError::InvalidStatus("Done".into()))
        );
        assert_eq!(f.store.requirement(&req.id).unwrap(), &req);
        assert_eq!(f.store.history_for(&req.id).len(), 1);
    }

    #[test]
    fn test_multiple_transitions() {
        let mut f = fixture();
        let req = add(&mut f, "Flow");
        for status in ["In Review", "Approved", "Approved", "Implemented", "Verified"] {
            f.store.update_status(&req.id, status, None).unwrap();
        }
        let history = f.store.history_for(&req.id);
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].status, RequirementStatus::Verified);
        assert_eq!(history[4].status, RequirementStatus::Draft);
    }

    #[test]
    fn test_update_keeps_immutable_fields_and_truncates() {
        let mut f = fixture();
        let req = add(&mut f, "Original");
        let mut edited = req.clone();
        edited.title = "t".repeat(300);
        edited.project_id = Uuid::new_v4();
        edited.created_by = None;
        f.store.update_requirement(edited, Some(f.user)).unwrap();

        let stored = f.store.requirement(&req.id).unwrap();
        assert_eq!(stored.title.chars().count(), 200);
        assert_eq!(stored.project_id, f.project);
        assert_eq!(stored.created_by, Some(f.user));
        assert_eq!(stored.updated_by, Some(f.user));
    }

    #[test]
    fn test_long_title_truncated_on_create() {
        let mut f = fixture();
        let req = add(&mut f, &"A".repeat(250));
        assert_eq!(req.title.len(), 200);
    }

    #[test]
    fn test_cross_project_objective_rejected() {
        let mut f = fixture();
        let other = f
            .store
            .create_project(&f.organization, "Other", "", None)
            .unwrap()
            .id;
        let objective = f
            .store
            .add_objective(&other, "Elsewhere", "", None)
            .unwrap();
        let req = add(&mut f, "Here");

        let err = f.store.link_objective(&req.id, &objective.id).unwrap_err();
        assert_eq!(
            as_tracker_error(&err),
            Some(&TrackerError::CrossProjectObjective)
        );
        assert!(f.store.requirement(&req.id).unwrap().objectives.is_empty());
    }

    #[test]
    fn test_link_objective_idempotent() {
        let mut f = fixture();
        let objective = f
            .store
            .add_objective(&f.project, "Grow", "", Some(f.user))
            .unwrap();
        let req = add(&mut f, "Here");
        assert!(f.store.link_objective(&req.id, &objective.id).unwrap());
        assert!(!f.store.link_objective(&req.id, &objective.id).unwrap());
        assert_eq!(f.store.requirement(&req.id).unwrap().objectives.len(), 1);
    }

    #[test]
    fn test_related_is_one_way() {
        let mut f = fixture();
        let a = add(&mut f, "A");
        let b = add(&mut f, "B");
        assert!(f.store.add_related(&a.id, &b.id).unwrap());
        assert_eq!(f.store.requirement(&a.id).unwrap().related, vec![b.id]);
        assert!(f.store.requirement(&b.id).unwrap().related.is_empty());

        let err = f.store.add_related(&a.id, &a.id).unwrap_err();
        assert!(matches!(
            as_tracker_error(&err),
            Some(TrackerError::InvalidRelation(_))
        ));
    }

    #[test]
    fn test_parent_cycle_rejected() {
        let mut f = fixture();
        let a = add(&mut f, "A");
        let b = add(&mut f, "B");
        f.store.set_parent(&b.id, Some(a.id)).unwrap();
        let err = f.store.set_parent(&a.id, Some(b.id)).unwrap_err();
        assert!(matches!(
            as_tracker_error(&err),
            Some(TrackerError::InvalidParent(_))
        ));

        let detail = f.store.requirement_detail(&a.id).unwrap();
        assert_eq!(detail.children.len(), 1);
        assert_eq!(detail.children[0].id, b.id);
    }

    #[test]
    fn test_delete_requirement_detaches_children() {
        let mut f = fixture();
        let a = add(&mut f, "A");
        let b = add(&mut f, "B");
        f.store.set_parent(&b.id, Some(a.id)).unwrap();
        f.store.add_related(&b.id, &a.id).unwrap();
        f.store.delete_requirement(&a.id).unwrap();

        let b = f.store.requirement(&b.id).unwrap();
        assert!(b.parent_id.is_none());
        assert!(b.related.is_empty());
        assert!(f.store.history_for(&a.id).is_empty());
    }

    #[test]
    fn test_delete_organization_cascades() {
        let mut f = fixture();
        let req = add(&mut f, "Doomed");
        f.store.add_category(&f.project, "UI", "").unwrap();
        f.store.add_objective(&f.project, "Goal", "", None).unwrap();
        f.store.update_status(&req.id, "Approved", None).unwrap();

        f.store.delete_organization(&f.organization).unwrap();
        assert!(f.store.projects.is_empty());
        assert!(f.store.requirements.is_empty());
        assert!(f.store.history.is_empty());
        assert!(f.store.categories.is_empty());
        assert!(f.store.objectives.is_empty());
        assert!(f.store.members.is_empty());
        assert_eq!(f.store.users.len(), 1);
    }

    #[test]
    fn test_delete_user_nulls_references() {
        let mut f = fixture();
        let req = add(&mut f, "Kept");
        f.store
            .update_status(&req.id, "Approved", Some(f.user))
            .unwrap();
        let objective = f
            .store
            .add_objective(&f.project, "Faster onboarding", "", Some(f.user))
            .unwrap();
        f.store.delete_user(&f.user).unwrap();

        let req = f.store.requirement(&req.id).unwrap();
        assert!(req.created_by.is_none());
        assert!(req.updated_by.is_none());
        let history = f.store.history_for(&req.id);
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.changed_by.is_none()));
        assert!(f.store.get_project(&f.project).unwrap().created_by.is_none());
        let objective = f
            .store
            .objectives(&f.project)
            .into_iter()
            .find(|o| o.id == objective.id)
            .unwrap();
        assert!(objective.created_by.is_none());
        assert!(f.store.members.is_empty());
    }

    #[test]
    fn test_duplicate_membership_rejected() {
        let mut f = fixture();
        let err = f
            .store
            .add_member(&f.organization, &f.user, MemberRole::Viewer)
            .unwrap_err();
        assert!(matches!(
            as_tracker_error(&err),
            Some(TrackerError::DuplicateMembership { .. })
        ));
        assert_eq!(
            f.store.membership(&f.user, &f.organization).unwrap().role,
            MemberRole::Admin
        );
    }

    #[test]
    fn test_projects_for_user_filtered_by_membership() {
        let mut f = fixture();
        let outsider = f.store.create_user("bob", "").unwrap().id;
        assert!(f.store.projects_for_user(&outsider).is_empty());
        assert_eq!(f.store.projects_for_user(&f.user).len(), 1);

        f.store
            .add_member(&f.organization, &outsider, MemberRole::Viewer)
            .unwrap();
        assert_eq!(f.store.organizations_for_user(&outsider).len(), 1);
    }

    #[test]
    fn test_list_requirements_filtered() {
        let mut f = fixture();
        let category = f.store.add_category(&f.project, "Security", "").unwrap();
        let mut draft = NewRequirement::new("Login throttling", "");
        draft.category_id = Some(category.id);
        f.store.create_requirement(&f.project, draft, None).unwrap();
        add(&mut f, "Dashboard");

        let all = f.store.list_requirements(&f.project, &RequirementFilter::new());
        assert_eq!(all.len(), 2);
        let by_category = f.store.list_requirements(
            &f.project,
            &RequirementFilter::new().with_category(category.id),
        );
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0].title, "Login throttling");
    }

    #[test]
    fn test_category_from_other_project_rejected() {
        let mut f = fixture();
        let other = f
            .store
            .create_project(&f.organization, "Other", "", None)
            .unwrap()
            .id;
        let foreign = f.store.add_category(&other, "Foreign", "").unwrap();
        let mut draft = NewRequirement::new("Misfiled", "");
        draft.category_id = Some(foreign.id);
        let err = f.store.create_requirement(&f.project, draft, None).unwrap_err();
        assert!(matches!(
            as_tracker_error(&err),
            Some(TrackerError::CrossProjectReference { .. })
        ));
        assert!(f.store.requirements.is_empty());
        assert_eq!(f.store.get_project(&f.project).unwrap().next_requirement_number, 1);
    }
}
