//! GitLab REST v4 client, typed payloads, and branch-protection flows.

pub mod client;
pub mod protect;
pub mod types;

pub use client::{
    CacheMode, CachePolicy, Client, CreatePipelineScheduleOptions, CreateUserOptions, ListQuery,
    ModifyUserOptions, Page, Pacer, ProtectBranchOptions, BranchPermission, DEFAULT_RPS,
};
pub use protect::{force_protect, merge_protect_options};
