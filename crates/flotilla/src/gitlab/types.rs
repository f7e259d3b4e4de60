//! Typed GitLab REST v4 payloads.
//!
//! Only the fields the fleet commands read are modeled; everything else in
//! the upstream payload is ignored on deserialize. Each payload registers
//! its dotted-path table for the grouping/ordering pipeline via
//! [`structural_paths!`](crate::structural_paths).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::structural_paths;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub two_factor_enabled: bool,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_activity_on: Option<NaiveDate>,
}

structural_paths!(
    User,
    [
        "id",
        "username",
        "name",
        "email",
        "state",
        "is_admin",
        "external",
        "two_factor_enabled",
        "web_url",
        "created_at",
        "last_activity_on",
    ]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
}

structural_paths!(
    Project,
    [
        "id",
        "name",
        "path",
        "path_with_namespace",
        "web_url",
        "default_branch",
        "archived",
        "visibility",
        "created_at",
        "last_activity_at",
    ]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub short_id: String,
    #[serde(default)]
    pub committed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub commit: Option<Commit>,
}

/// One configured access level on a protected branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchAccessDescription {
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub group_id: Option<u64>,
    pub access_level: u32,
    #[serde(default)]
    pub access_level_description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectedBranch {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub push_access_levels: Vec<BranchAccessDescription>,
    #[serde(default)]
    pub merge_access_levels: Vec<BranchAccessDescription>,
    #[serde(default)]
    pub unprotect_access_levels: Vec<BranchAccessDescription>,
    #[serde(default)]
    pub allow_force_push: bool,
    #[serde(default)]
    pub code_owner_approval_required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: u64,
    pub iid: u64,
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub target_branch: String,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSchedule {
    pub id: u64,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "ref", default)]
    pub schedule_ref: String,
    #[serde(default)]
    pub cron: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub owner: Option<User>,
    #[serde(default)]
    pub last_pipeline: Option<PipelineInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryRepository {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags_count: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalAccessToken {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<NaiveDate>,
}

structural_paths!(
    PersonalAccessToken,
    [
        "id",
        "name",
        "scopes",
        "active",
        "revoked",
        "user_id",
        "created_at",
        "expires_at",
    ]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version: String,
    #[serde(default)]
    pub revision: String,
}

// ---------------------------------------------------------------------------
// Composite payloads carried through multi-stage pipelines
// ---------------------------------------------------------------------------

/// One page of branches attached to the project they came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectBranches {
    pub project: Project,
    #[serde(default)]
    pub branches: Vec<Branch>,
}

structural_paths!(
    ProjectBranches,
    [
        "project.id",
        "project.name",
        "project.path_with_namespace",
        "project.web_url",
        "project.last_activity_at",
    ]
);

/// A project with the protection records relevant to one branch operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectProtectedBranches {
    pub project: Project,
    #[serde(default)]
    pub protected_branches: Vec<ProtectedBranch>,
}

impl ProjectProtectedBranches {
    /// Find the existing protection record for a branch name.
    pub fn search(&self, name: &str) -> Option<&ProtectedBranch> {
        self.protected_branches.iter().find(|b| b.name == name)
    }
}

structural_paths!(
    ProjectProtectedBranches,
    [
        "project.id",
        "project.name",
        "project.path_with_namespace",
        "project.web_url",
    ]
);

/// A project joined with its language breakdown (percent by language).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectWithLanguages {
    pub project: Project,
    #[serde(default)]
    pub languages: BTreeMap<String, f64>,
}

impl ProjectWithLanguages {
    /// Render as "Rust: 88.20, Shell: 11.80", highest percentage first.
    pub fn languages_to_string(&self) -> String {
        if self.languages.is_empty() {
            return "-".to_string();
        }
        let mut pairs: Vec<(&String, &f64)> = self.languages.iter().collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        pairs
            .iter()
            .map(|(name, pct)| format!("{name}: {pct:.2}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

structural_paths!(
    ProjectWithLanguages,
    [
        "project.id",
        "project.name",
        "project.path",
        "project.path_with_namespace",
        "project.web_url",
        "project.last_activity_at",
    ]
);

/// One page of merge requests attached to their project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMergeRequests {
    pub project: Project,
    #[serde(default)]
    pub merge_requests: Vec<MergeRequest>,
}

structural_paths!(
    ProjectMergeRequests,
    [
        "project.id",
        "project.name",
        "project.path_with_namespace",
        "project.web_url",
        "project.last_activity_at",
    ]
);

/// A raw repository file fetched from one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub project: Project,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub raw: String,
}

structural_paths!(
    ProjectFile,
    [
        "project.id",
        "project.name",
        "project.path_with_namespace",
        "project.web_url",
        "file_path",
    ]
);

/// A project paired with zero or one pipeline schedule.
///
/// `schedule: None` marks a project that has no matching schedule; listing
/// output renders those rows with placeholder columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPipelineSchedule {
    pub project: Project,
    #[serde(default)]
    pub schedule: Option<PipelineSchedule>,
}

structural_paths!(
    ProjectPipelineSchedule,
    [
        "project.id",
        "project.name",
        "project.path_with_namespace",
        "project.web_url",
        "schedule.description",
        "schedule.cron",
        "schedule.active",
    ]
);

/// One page of container registry repositories attached to their project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectRegistryRepositories {
    pub project: Project,
    #[serde(default)]
    pub repositories: Vec<RegistryRepository>,
}

structural_paths!(
    ProjectRegistryRepositories,
    [
        "project.id",
        "project.name",
        "project.path_with_namespace",
        "project.web_url",
    ]
);

/// Instance version joined with the upstream drift verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionCheck {
    pub version: String,
    pub status: String,
}

structural_paths!(VersionCheck, ["version", "status"]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_deserializes_from_api_payload() {
        let raw = r#"{
            "id": 122,
            "username": "testuser2",
            "name": "Test User 2",
            "state": "active",
            "web_url": "https://gitlab.example.com/testuser2",
            "created_at": "2022-04-21T15:21:23.810+00:00",
            "email": "testuser2@example.com",
            "two_factor_enabled": true,
            "is_admin": false,
            "unmodeled_field": [1, 2, 3]
        }"#;
        let user: User = serde_json::from_str(raw).unwrap();
        assert_eq!(user.id, 122);
        assert_eq!(user.username, "testuser2");
        assert!(user.two_factor_enabled);
        assert!(user.email.as_deref() == Some("testuser2@example.com"));
    }

    #[test]
    fn schedule_ref_round_trips_through_ref_key() {
        let raw = r#"{"id": 9, "ref": "main", "cron": "0 1 * * *", "active": true}"#;
        let schedule: PipelineSchedule = serde_json::from_str(raw).unwrap();
        assert_eq!(schedule.schedule_ref, "main");

        let back = serde_json::to_value(&schedule).unwrap();
        assert_eq!(back["ref"], "main");
    }

    #[test]
    fn languages_render_sorted_by_percent() {
        let mut languages = BTreeMap::new();
        languages.insert("Shell".to_string(), 11.8);
        languages.insert("Rust".to_string(), 88.2);
        let p = ProjectWithLanguages {
            project: Project::default(),
            languages,
        };
        assert_eq!(p.languages_to_string(), "Rust: 88.20, Shell: 11.80");

        let empty = ProjectWithLanguages::default();
        assert_eq!(empty.languages_to_string(), "-");
    }

    #[test]
    fn protected_branch_search_finds_by_name() {
        let pb = ProjectProtectedBranches {
            project: Project::default(),
            protected_branches: vec![
                ProtectedBranch {
                    name: "main".to_string(),
                    ..Default::default()
                },
                ProtectedBranch {
                    name: "release".to_string(),
                    ..Default::default()
                },
            ],
        };
        assert!(pb.search("release").is_some());
        assert!(pb.search("develop").is_none());
    }
}
