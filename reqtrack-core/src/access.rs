//! Tenant authorization predicates
//!
//! Storage is never filtered by membership. Callers check these predicates
//! at the query boundary before reading or writing on behalf of a user.

use anyhow::Result;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::models::{MemberRole, Requirement};
use crate::store::TrackerStore;

/// What a membership role allows
pub fn role_can_view(role: Option<MemberRole>) -> bool {
    role.is_some()
}

pub fn role_can_edit(role: Option<MemberRole>) -> bool {
    matches!(role, Some(MemberRole::Admin) | Some(MemberRole::Member))
}

pub fn role_can_administer(role: Option<MemberRole>) -> bool {
    role == Some(MemberRole::Admin)
}

fn role_of(store: &TrackerStore, user: &Uuid, organization: &Uuid) -> Option<MemberRole> {
    store.membership(user, organization).map(|m| m.role)
}

/// True when the user holds any membership in the organization
pub fn can_view(store: &TrackerStore, user: &Uuid, organization: &Uuid) -> bool {
    role_can_view(role_of(store, user, organization))
}

/// Admins and members may change data; viewers may not
pub fn can_edit(store: &TrackerStore, user: &Uuid, organization: &Uuid) -> bool {
    role_can_edit(role_of(store, user, organization))
}

pub fn can_administer(store: &TrackerStore, user: &Uuid, organization: &Uuid) -> bool {
    role_can_administer(role_of(store, user, organization))
}

/// A requirement may be deleted by its creator, by the project's creator or
/// by an admin of the owning organization.
pub fn can_delete_requirement(store: &TrackerStore, user: &Uuid, requirement: &Requirement) -> bool {
    if requirement.created_by == Some(*user) {
        return true;
    }
    let Some(project) = store.get_project(&requirement.project_id) else {
        return false;
    };
    if project.created_by == Some(*user) {
        return true;
    }
    can_administer(store, user, &project.organization_id)
}

/// Turns a failed predicate into a `PermissionDenied` error
pub fn ensure(allowed: bool, action: &str) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(TrackerError::PermissionDenied(action.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::as_tracker_error;
    use crate::models::NewRequirement;

    #[test]
    fn test_role_matrix() {
        assert!(!role_can_view(None));
        assert!(role_can_view(Some(MemberRole::Viewer)));
        assert!(!role_can_edit(Some(MemberRole::Viewer)));
        assert!(role_can_edit(Some(MemberRole::Member)));
        assert!(!role_can_administer(Some(MemberRole::Member)));
        assert!(role_can_administer(Some(MemberRole::Admin)));
    }

    #[test]
    fn test_can_view_requires_membership() {
        let mut store = TrackerStore::new();
        let owner = store.create_user("owner", "").unwrap().id;
        let stranger = store.create_user("stranger", "").unwrap().id;
        let org = store.create_organization("Acme", "", Some(owner)).unwrap().id;

        assert!(can_view(&store, &owner, &org));
        assert!(!can_view(&store, &stranger, &org));
    }

    #[test]
    fn test_delete_rules() {
        let mut store = TrackerStore::new();
        let admin = store.create_user("admin", "").unwrap().id;
        let author = store.create_user("author", "").unwrap().id;
        let member = store.create_user("member", "").unwrap().id;
        let org = store.create_organization("Acme", "", Some(admin)).unwrap().id;
        store.add_member(&org, &author, MemberRole::Member).unwrap();
        store.add_member(&org, &member, MemberRole::Member).unwrap();
        let project = store.create_project(&org, "P", "", Some(author)).unwrap().id;
        let req = store
            .create_requirement(&project, NewRequirement::new("R", ""), Some(member))
            .unwrap();

        assert!(can_delete_requirement(&store, &member, &req));
        assert!(can_delete_requirement(&store, &author, &req));
        assert!(can_delete_requirement(&store, &admin, &req));

        let other = store.create_user("other", "").unwrap().id;
        store.add_member(&org, &other, MemberRole::Member).unwrap();
        assert!(!can_delete_requirement(&store, &other, &req));
    }

    #[test]
    fn test_ensure_maps_to_permission_denied() {
        let err = ensure(false, "delete requirement").unwrap_err();
        assert_eq!(
            as_tracker_error(&err),
            Some(&TrackerError::PermissionDenied("delete requirement".into()))
        );
        assert!(ensure(true, "anything").is_ok());
    }
}
