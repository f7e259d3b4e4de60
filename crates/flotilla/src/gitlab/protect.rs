//! Branch-protection option merging and the force-protect flow.
//!
//! Re-protecting an already protected branch requires deleting the existing
//! protection record first, and GitLab drops every setting not re-sent with
//! the new protect call. Force-protect therefore seeds the new options from
//! the old record before overlaying the operator's options, so an update to
//! one access level does not silently reset the others.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::limiter::Limiter;

use super::client::{BranchPermission, Client, ProtectBranchOptions};
use super::types::{BranchAccessDescription, ProtectedBranch};

/// The scalar-or-list form of one access-level setting.
///
/// An empty upstream list stays absent; a single entry collapses to the
/// scalar `*_access_level` field; several entries need the full
/// `allowed_to_*` triples.
fn seed_levels(levels: &[BranchAccessDescription]) -> (Option<u32>, Option<Vec<BranchPermission>>) {
    match levels {
        [] => (None, None),
        [single] => (Some(single.access_level), None),
        several => (
            None,
            Some(
                several
                    .iter()
                    .map(|l| BranchPermission {
                        user_id: l.user_id,
                        group_id: l.group_id,
                        access_level: l.access_level,
                    })
                    .collect(),
            ),
        ),
    }
}

/// Merge the existing protection record into the operator's options.
///
/// Seeds every setting from `old`, then overlays `user`: a setting the
/// operator supplied wins outright (even when it is `false` or empty), a
/// setting they left unset keeps the seeded value. The scalar and list form
/// of one access level are overlaid as a pair, so a supplied scalar also
/// clears a seeded list.
pub fn merge_protect_options(
    old: &ProtectedBranch,
    user: &ProtectBranchOptions,
) -> ProtectBranchOptions {
    let (push_scalar, push_list) = seed_levels(&old.push_access_levels);
    let (merge_scalar, merge_list) = seed_levels(&old.merge_access_levels);
    let (unprotect_scalar, unprotect_list) = seed_levels(&old.unprotect_access_levels);

    let mut merged = ProtectBranchOptions {
        name: user.name.clone(),
        push_access_level: push_scalar,
        merge_access_level: merge_scalar,
        unprotect_access_level: unprotect_scalar,
        allowed_to_push: push_list,
        allowed_to_merge: merge_list,
        allowed_to_unprotect: unprotect_list,
        allow_force_push: Some(old.allow_force_push),
        code_owner_approval_required: Some(old.code_owner_approval_required),
    };

    if user.allow_force_push.is_some() {
        merged.allow_force_push = user.allow_force_push;
    }
    if user.code_owner_approval_required.is_some() {
        merged.code_owner_approval_required = user.code_owner_approval_required;
    }
    if user.push_access_level.is_some() || user.allowed_to_push.is_some() {
        merged.push_access_level = user.push_access_level;
        merged.allowed_to_push = user.allowed_to_push.clone();
    }
    if user.merge_access_level.is_some() || user.allowed_to_merge.is_some() {
        merged.merge_access_level = user.merge_access_level;
        merged.allowed_to_merge = user.allowed_to_merge.clone();
    }
    if user.unprotect_access_level.is_some() || user.allowed_to_unprotect.is_some() {
        merged.unprotect_access_level = user.unprotect_access_level;
        merged.allowed_to_unprotect = user.allowed_to_unprotect.clone();
    }

    merged
}

/// Apply protection to one branch, unprotecting first when a record exists.
///
/// There is no rollback between the two steps: when the reprotect call
/// fails, the branch is left unprotected and the error surfaces for that
/// branch alone. Each network call holds its own limiter slot.
pub async fn force_protect(
    client: &Client,
    limiter: &Arc<Limiter>,
    project_id: u64,
    existing: Option<&ProtectedBranch>,
    opts: &ProtectBranchOptions,
) -> Result<(ProtectedBranch, bool)> {
    if opts.name.is_empty() {
        return Err(Error::validation("protect options are missing a branch name"));
    }

    let effective = match existing {
        Some(old) => {
            let merged = merge_protect_options(old, opts);
            let permit = limiter.lock().await;
            client.unprotect_branch(project_id, &merged.name).await?;
            drop(permit);
            merged
        }
        None => opts.clone(),
    };

    let permit = limiter.lock().await;
    let result = client.protect_branch(project_id, &effective).await;
    drop(permit);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(access_level: u32) -> BranchAccessDescription {
        BranchAccessDescription {
            access_level,
            ..Default::default()
        }
    }

    fn level_for(user_id: u64, access_level: u32) -> BranchAccessDescription {
        BranchAccessDescription {
            user_id: Some(user_id),
            access_level,
            ..Default::default()
        }
    }

    #[test]
    fn scalar_levels_merge_and_empty_lists_stay_absent() {
        // Existing record: push [40], merge [30], unprotect [].
        let old = ProtectedBranch {
            name: "main".to_string(),
            push_access_levels: vec![level(40)],
            merge_access_levels: vec![level(30)],
            unprotect_access_levels: vec![],
            ..Default::default()
        };
        let user = ProtectBranchOptions {
            name: "main".to_string(),
            push_access_level: Some(40),
            ..Default::default()
        };

        let merged = merge_protect_options(&old, &user);
        assert_eq!(merged.push_access_level, Some(40));
        assert_eq!(merged.merge_access_level, Some(30));
        assert_eq!(merged.unprotect_access_level, None);
        assert!(merged.allowed_to_push.is_none());
        assert!(merged.allowed_to_unprotect.is_none());
    }

    #[test]
    fn several_entries_expand_to_permission_triples() {
        let old = ProtectedBranch {
            name: "main".to_string(),
            merge_access_levels: vec![level_for(11, 30), level_for(12, 40)],
            ..Default::default()
        };
        let user = ProtectBranchOptions {
            name: "main".to_string(),
            ..Default::default()
        };

        let merged = merge_protect_options(&old, &user);
        assert_eq!(merged.merge_access_level, None);
        let allowed = merged.allowed_to_merge.unwrap();
        assert_eq!(allowed.len(), 2);
        assert_eq!(allowed[0].user_id, Some(11));
        assert_eq!(allowed[1].access_level, 40);
    }

    #[test]
    fn booleans_copy_from_old_unless_supplied() {
        let old = ProtectedBranch {
            name: "main".to_string(),
            allow_force_push: true,
            code_owner_approval_required: true,
            ..Default::default()
        };

        let untouched = merge_protect_options(
            &old,
            &ProtectBranchOptions {
                name: "main".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(untouched.allow_force_push, Some(true));
        assert_eq!(untouched.code_owner_approval_required, Some(true));

        // A supplied false wins over the seeded true.
        let overridden = merge_protect_options(
            &old,
            &ProtectBranchOptions {
                name: "main".to_string(),
                allow_force_push: Some(false),
                ..Default::default()
            },
        );
        assert_eq!(overridden.allow_force_push, Some(false));
    }

    #[test]
    fn supplied_scalar_clears_seeded_list() {
        let old = ProtectedBranch {
            name: "main".to_string(),
            push_access_levels: vec![level_for(1, 30), level_for(2, 40)],
            ..Default::default()
        };
        let user = ProtectBranchOptions {
            name: "main".to_string(),
            push_access_level: Some(0),
            ..Default::default()
        };

        let merged = merge_protect_options(&old, &user);
        assert_eq!(merged.push_access_level, Some(0));
        assert!(merged.allowed_to_push.is_none());
    }

    #[test]
    fn merge_is_idempotent_when_old_matches_new() {
        let old = ProtectedBranch {
            name: "main".to_string(),
            push_access_levels: vec![level(40)],
            merge_access_levels: vec![level(30)],
            allow_force_push: false,
            code_owner_approval_required: false,
            ..Default::default()
        };
        let user = ProtectBranchOptions {
            name: "main".to_string(),
            push_access_level: Some(40),
            merge_access_level: Some(30),
            allow_force_push: Some(false),
            code_owner_approval_required: Some(false),
            ..Default::default()
        };

        let once = merge_protect_options(&old, &user);
        assert_eq!(once, user);
    }
}
