//! `projects branches` commands: list and protect.
//!
//! Protect with `--force` re-applies protection on branches that already
//! have a record: the existing record is merged into the requested options,
//! the branch is unprotected, and the merged options are applied. A failure
//! between the two steps leaves the branch unprotected and surfaces as that
//! branch's error.

use std::sync::Arc;

use clap::{Args, Subcommand};

use flotilla::fanout::{self, Element};
use flotilla::gitlab::types::{ProjectBranches, ProjectProtectedBranches};
use flotilla::gitlab::{protect, CacheMode, ProtectBranchOptions};
use flotilla::hosts::Host;
use flotilla::limiter::Limiter;
use flotilla::pipeline;

use super::{collect_projects, ProjectFilterArgs, SortArgs};
use crate::output;
use crate::prompt;
use crate::runtime::Runtime;

const BRANCH_DEFAULT_FIELD: &str = "project.web_url";

#[derive(Subcommand)]
pub enum BranchesAction {
    /// List repository branches across the fleet
    List(ListArgs),
    /// Protect a branch on every matching project
    Protect(ProtectArgs),
}

pub async fn run(rt: &Runtime, action: BranchesAction) -> anyhow::Result<()> {
    match action {
        BranchesAction::List(args) => list(rt, args).await,
        BranchesAction::Protect(args) => protect_cmd(rt, args).await,
    }
}

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    sort: SortArgs,

    #[command(flatten)]
    filters: ProjectFilterArgs,
}

async fn list(rt: &Runtime, args: ListArgs) -> anyhow::Result<()> {
    let mut opts = args.sort.options(&["count", BRANCH_DEFAULT_FIELD])?;
    // Branch listings always group per project.
    opts.group_by = Some(BRANCH_DEFAULT_FIELD.to_string());
    opts.validate::<ProjectBranches>()?;

    let projects = collect_projects(rt, args.filters.query(), CacheMode::Cached).await;
    if projects.is_empty() {
        anyhow::bail!("no projects found");
    }

    let (tx, rx) = fanout::stage_channel();
    for element in projects {
        spawn_branch_pages(rt, element, tx.clone());
    }
    drop(tx);

    let rows = pipeline::from_channel(rx, &opts).await?;
    if rows.is_empty() {
        anyhow::bail!("no branches found");
    }

    let mut unique = 0;
    let mut total = 0;
    let mut body = Vec::new();
    for row in &rows {
        unique += 1;
        total += row.count;
        for element in &row.elements {
            for branch in &element.payload.branches {
                let updated = branch
                    .commit
                    .as_ref()
                    .and_then(|c| c.committed_date)
                    .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                body.push(vec![
                    format!("[{}]", element.host.project_name()),
                    branch.web_url.clone(),
                    format!("[{updated}]"),
                    format!("[{}]", output::cached_str(element.cached)),
                ]);
            }
        }
    }
    println!(
        "{}",
        output::table(&["HOST", "URL", "LAST UPDATED", "CACHED"], body)
    );

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Unique", unique), ("Total", total), ("Errors", errors)]);
    Ok(())
}

fn spawn_branch_pages(
    rt: &Runtime,
    element: Element<flotilla::gitlab::types::Project>,
    tx: tokio::sync::mpsc::Sender<Element<ProjectBranches>>,
) {
    let project = element.payload;
    let fetch: fanout::PageFetcher<ProjectBranches> = {
        let project = project.clone();
        Arc::new(move |host: Host, page| {
            let project = project.clone();
            Box::pin(async move {
                let page_data = host
                    .client()
                    .list_branches(project.id, page, CacheMode::Cached)
                    .await?;
                Ok(flotilla::gitlab::Page {
                    items: vec![ProjectBranches {
                        project,
                        branches: page_data.items,
                    }],
                    next_page: page_data.next_page,
                    total_pages: page_data.total_pages,
                    cached: page_data.cached,
                })
            })
        })
    };
    fanout::spawn_paged(
        element.host,
        fetch,
        Arc::clone(&rt.limiter),
        tx,
        rt.cancel.clone(),
    );
}

#[derive(Args)]
pub struct ProtectArgs {
    /// Branch name or wildcard to protect
    #[arg(long)]
    name: String,

    /// Re-protect branches that already have a protection record,
    /// merging their existing settings into the options below
    #[arg(long)]
    force: bool,

    /// Access level allowed to push (0, 30, 40, 60)
    #[arg(long)]
    push_access_level: Option<u32>,

    /// Access level allowed to merge (0, 30, 40, 60)
    #[arg(long)]
    merge_access_level: Option<u32>,

    /// Access level allowed to unprotect (0, 30, 40, 60)
    #[arg(long)]
    unprotect_access_level: Option<u32>,

    /// Allow force pushes to the protected branch
    #[arg(long)]
    allow_force_push: Option<bool>,

    /// Require code owner approval before merging
    #[arg(long)]
    code_owner_approval_required: Option<bool>,

    #[command(flatten)]
    filters: ProjectFilterArgs,
}

async fn protect_cmd(rt: &Runtime, args: ProtectArgs) -> anyhow::Result<()> {
    let requested = ProtectBranchOptions {
        name: args.name.clone(),
        push_access_level: args.push_access_level,
        merge_access_level: args.merge_access_level,
        unprotect_access_level: args.unprotect_access_level,
        allow_force_push: args.allow_force_push,
        code_owner_approval_required: args.code_owner_approval_required,
        ..Default::default()
    };

    // Find targets against live data.
    let projects = collect_projects(rt, args.filters.query(), CacheMode::Fresh).await;
    if projects.is_empty() {
        anyhow::bail!("no projects found");
    }

    let (tx, rx) = fanout::stage_channel();
    for element in projects {
        let project = element.payload.clone();
        fanout::spawn_single(
            element.host.clone(),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
            move |host: Host| async move {
                let page = host
                    .client()
                    .list_protected_branches(project.id, 1, CacheMode::Fresh)
                    .await?;
                Ok(Some((
                    ProjectProtectedBranches {
                        project,
                        protected_branches: page.items,
                    },
                    page.cached,
                )))
            },
        );
    }
    drop(tx);

    let targets = fanout::collect(rx).await;
    rt.limiter.wait().await;
    if targets.is_empty() {
        anyhow::bail!("no projects found");
    }

    let hosts: flotilla::hosts::Hosts = targets.iter().map(|e| e.host.clone()).collect();
    if !prompt::confirm(&format!(
        "Do you really want to protect branch {:?} in {} project(s) across {:?} ?",
        args.name,
        targets.len(),
        hosts.projects(rt.show_all)
    )) {
        return Ok(());
    }

    let force = args.force;
    let (tx, rx) = fanout::stage_channel();
    for target in targets {
        let requested = requested.clone();
        let payload = target.payload.clone();
        fanout::spawn_self_locking(
            target.host.clone(),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
            move |host: Host, limiter: Arc<Limiter>| async move {
                let existing = if force {
                    payload.search(&requested.name).cloned()
                } else {
                    None
                };
                let (protected, cached) = protect::force_protect(
                    host.client(),
                    &limiter,
                    payload.project.id,
                    existing.as_ref(),
                    &requested,
                )
                .await?;
                Ok(Some((
                    ProjectProtectedBranches {
                        project: payload.project,
                        protected_branches: vec![protected],
                    },
                    cached,
                )))
            },
        );
    }
    drop(tx);

    let opts = pipeline::Options {
        order_by: vec![BRANCH_DEFAULT_FIELD.to_string()],
        ..Default::default()
    };
    let rows = pipeline::from_channel(rx, &opts).await?;

    let mut body = Vec::new();
    for row in &rows {
        for element in &row.elements {
            for branch in &element.payload.protected_branches {
                body.push(vec![
                    format!("[{}]", element.host.project_name()),
                    element.payload.project.web_url.clone(),
                    branch.name.clone(),
                    format!("[{}]", output::cached_str(element.cached)),
                ]);
            }
        }
    }
    println!(
        "{}",
        output::table(&["HOST", "URL", "BRANCH", "CACHED"], body)
    );

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Protected", rows.len()), ("Errors", errors)]);
    Ok(())
}
