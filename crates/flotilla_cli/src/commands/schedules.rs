//! `projects pipelines` commands: schedule listing and cleanup-schedule
//! management.
//!
//! The cleanups command chains four stages across the fleet: list active
//! projects, keep the ones with a CI config, keep the ones whose cleanup
//! config files match the content patterns, then inspect their pipeline
//! schedules. With `--setowner` it re-owns matched schedules through the
//! supplied token (single host only); with `--create` it creates staggered
//! cleanup schedules on projects that have none.

use std::sync::Arc;

use clap::{Args, Subcommand};
use regex::Regex;

use flotilla::error::Error;
use flotilla::fanout::{self, Element};
use flotilla::gitlab::types::{PipelineSchedule, Project, ProjectFile, ProjectPipelineSchedule};
use flotilla::gitlab::{CacheMode, CreatePipelineScheduleOptions};
use flotilla::hosts::Host;
use flotilla::limiter::{Limiter, TaskGuard};
use flotilla::pipeline::{self, Options, ResultRow};
use tokio_util::sync::CancellationToken;

use super::{collect_projects, files, ProjectFilterArgs};
use crate::output;
use crate::prompt;
use crate::runtime::Runtime;

#[derive(Subcommand)]
pub enum PipelinesAction {
    /// List pipeline schedules across the fleet
    Schedules(SchedulesArgs),
    /// List and manage cleanup schedules
    Cleanups(CleanupsArgs),
}

pub async fn run(rt: &Runtime, action: PipelinesAction) -> anyhow::Result<()> {
    match action {
        PipelinesAction::Schedules(args) => schedules(rt, args).await,
        PipelinesAction::Cleanups(args) => cleanups(rt, args).await,
    }
}

#[derive(Args)]
pub struct SchedulesArgs {
    /// Filter schedules by active state
    #[arg(long)]
    active: Option<bool>,

    /// Filter schedules by last pipeline status
    #[arg(long)]
    status: Option<String>,

    /// Regex patterns to match against schedule descriptions
    #[arg(long, value_delimiter = ',', default_value = ".*")]
    description: Vec<String>,

    #[command(flatten)]
    filters: ProjectFilterArgs,
}

/// Filters applied to each schedule as it is scanned.
#[derive(Clone)]
struct ScheduleFilter {
    descriptions: Arc<Vec<Regex>>,
    active: Option<bool>,
    status: Option<String>,
}

impl ScheduleFilter {
    fn matches(&self, schedule: &PipelineSchedule) -> bool {
        if !self.descriptions.iter().any(|d| d.is_match(&schedule.description)) {
            return false;
        }
        if let Some(active) = self.active {
            if schedule.active != active {
                return false;
            }
        }
        if let Some(status) = &self.status {
            let actual = schedule
                .last_pipeline
                .as_ref()
                .map(|p| p.status.as_str())
                .unwrap_or("");
            if actual != status {
                return false;
            }
        }
        true
    }
}

fn compile_patterns(raw: &[String]) -> anyhow::Result<Arc<Vec<Regex>>> {
    let regexes: Vec<Regex> = raw.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?;
    Ok(Arc::new(regexes))
}

/// Walk every schedule page of one project, pushing matching schedules.
/// When `include_missing` is set and nothing matched, a schedule-less
/// element marks the project for the create flow.
#[allow(clippy::too_many_arguments)]
fn spawn_schedule_scan(
    host: Host,
    project: Project,
    filter: ScheduleFilter,
    include_missing: bool,
    mode: CacheMode,
    limiter: Arc<Limiter>,
    tx: tokio::sync::mpsc::Sender<Element<ProjectPipelineSchedule>>,
    cancel: CancellationToken,
) {
    limiter.add(1);
    tokio::spawn(async move {
        let _guard = TaskGuard::new(Arc::clone(&limiter));
        let mut page = 1u32;
        let mut matched = false;
        let mut all_cached = true;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let permit = limiter.lock().await;
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                r = host.client().list_pipeline_schedules(project.id, page, mode) => r,
            };
            drop(permit);

            let page_data = match result {
                Ok(p) => p,
                Err(e) => {
                    limiter.error(host, e);
                    return;
                }
            };
            all_cached = all_cached && page_data.cached;
            for schedule in page_data.items {
                if filter.matches(&schedule) {
                    matched = true;
                    let element = Element {
                        host: host.clone(),
                        payload: ProjectPipelineSchedule {
                            project: project.clone(),
                            schedule: Some(schedule),
                        },
                        cached: page_data.cached,
                    };
                    if tx.send(element).await.is_err() {
                        return;
                    }
                }
            }
            match page_data.next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        if include_missing && !matched {
            let _ = tx
                .send(Element {
                    host,
                    payload: ProjectPipelineSchedule {
                        project,
                        schedule: None,
                    },
                    cached: all_cached,
                })
                .await;
        }
    });
}

fn print_schedule_rows(rt: &Runtime, rows: &[ResultRow<ProjectPipelineSchedule>]) {
    let mut unique = 0;
    let mut total = 0;
    let mut body = Vec::new();
    for row in rows {
        unique += 1;
        total += row.count;
        for element in &row.elements {
            let (count, description, status, owner) = match &element.payload.schedule {
                Some(schedule) => (
                    1,
                    format!(
                        "{} ({})",
                        schedule.description,
                        if schedule.active { "active" } else { "inactive" }
                    ),
                    schedule
                        .last_pipeline
                        .as_ref()
                        .filter(|p| !p.status.is_empty())
                        .map(|p| p.status.clone())
                        .unwrap_or_else(|| "unknown".to_string()),
                    schedule
                        .owner
                        .as_ref()
                        .map(|o| o.username.clone())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                None => (0, "-".to_string(), "-".to_string(), "-".to_string()),
            };
            body.push(vec![
                format!("[{count}]"),
                row.key.clone(),
                description,
                format!("[{status}]"),
                owner,
                format!("[{}]", element.host.project_name()),
                format!("[{}]", output::cached_str(element.cached)),
            ]);
        }
    }
    println!(
        "{}",
        output::table(
            &[
                "COUNT",
                "REPOSITORY",
                "SCHEDULE",
                "STATUS",
                "OWNER",
                "HOST",
                "CACHED"
            ],
            body
        )
    );

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Unique", unique), ("Total", total), ("Errors", errors)]);
}

async fn schedules(rt: &Runtime, args: SchedulesArgs) -> anyhow::Result<()> {
    let filter = ScheduleFilter {
        descriptions: compile_patterns(&args.description)?,
        active: args.active,
        status: args.status.clone(),
    };

    let projects = collect_projects(rt, args.filters.query(), CacheMode::Cached).await;
    if projects.is_empty() {
        anyhow::bail!("no projects found");
    }

    let (tx, rx) = fanout::stage_channel();
    for element in projects {
        spawn_schedule_scan(
            element.host,
            element.payload,
            filter.clone(),
            false,
            CacheMode::Cached,
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
        );
    }
    drop(tx);

    let opts = Options {
        order_by: vec!["project.web_url".to_string()],
        ..Default::default()
    };
    let rows = pipeline::from_channel(rx, &opts).await?;
    print_schedule_rows(rt, &rows);
    Ok(())
}

#[derive(Args)]
pub struct CleanupsArgs {
    /// Cleanup config files to look for
    #[arg(long, value_delimiter = ',', default_values_t = ["werf.yaml".to_string(), "werf.yml".to_string()])]
    filepath: Vec<String>,

    /// Regex patterns the cleanup config must match
    #[arg(long, value_delimiter = ',', default_value = "image")]
    pattern: Vec<String>,

    /// Regex patterns to match against schedule descriptions
    #[arg(long, value_delimiter = ',', default_value = "(?i)cleanup")]
    description: Vec<String>,

    /// Git ref to read config files from; project default branch if omitted
    #[arg(long, default_value = "")]
    r#ref: String,

    /// Private token (api scope) of the new owner for matched schedules
    #[arg(long, default_value = "")]
    setowner: String,

    /// Create cleanup schedules on projects that have none, owned by the
    /// --setowner token's user
    #[arg(long)]
    create: bool,

    #[command(flatten)]
    filters: ProjectFilterArgs,
}

async fn cleanups(rt: &Runtime, args: CleanupsArgs) -> anyhow::Result<()> {
    if args.create && args.setowner.is_empty() {
        anyhow::bail!("missing token, please provide a personal access token with \"api\" scope");
    }

    // Ownership changes are a single-host operation: narrow the filter
    // before re-owning schedules fleet-wide by accident.
    let mut owner_user = None;
    let mode = if args.setowner.is_empty() {
        CacheMode::Cached
    } else {
        if rt.hosts.len() != 1 {
            anyhow::bail!(
                "only a single host is supported when changing cleanup schedule owners, \
                 please use the -f (--filter) flag"
            );
        }
        let host = rt.hosts.first().expect("exactly one host");
        let (user, _) = host
            .client()
            .current_user(CacheMode::Fresh, Some(&args.setowner))
            .await?;
        owner_user = Some(user);
        CacheMode::Fresh
    };

    let content_patterns = compile_patterns(&args.pattern)?;
    let filter = ScheduleFilter {
        descriptions: compile_patterns(&args.description)?,
        active: None,
        status: None,
    };

    // Stage 1: active projects only.
    let query = args.filters.query().set("archived", false);
    let projects = collect_projects(rt, query, mode).await;
    if projects.is_empty() {
        anyhow::bail!("no projects found");
    }

    // Stage 2: keep projects that carry a CI config at all.
    let any_content = compile_patterns(&[".*".to_string()])?;
    let (tx, rx) = fanout::stage_channel();
    for element in projects {
        files::spawn_file_probe(
            rt,
            element.host.clone(),
            element.payload.clone(),
            ".gitlab-ci.yml".to_string(),
            args.r#ref.clone(),
            Arc::clone(&any_content),
            mode,
            tx.clone(),
        );
    }
    drop(tx);
    let with_ci = fanout::collect(rx).await;
    rt.limiter.wait().await;
    if with_ci.is_empty() {
        anyhow::bail!(".gitlab-ci.yml was not found in any project");
    }

    // Stage 3: keep projects whose cleanup config matches the patterns.
    let (tx, rx) = fanout::stage_channel::<ProjectFile>();
    for element in &with_ci {
        for file_path in &args.filepath {
            files::spawn_file_probe(
                rt,
                element.host.clone(),
                element.payload.project.clone(),
                file_path.clone(),
                args.r#ref.clone(),
                Arc::clone(&content_patterns),
                mode,
                tx.clone(),
            );
        }
    }
    drop(tx);
    let matching = fanout::collect(rx).await;
    rt.limiter.wait().await;
    if matching.is_empty() {
        anyhow::bail!(
            "{:?} files or patterns {:?} were not found in any project",
            args.filepath,
            args.pattern
        );
    }

    // Stage 4: inspect the schedules of every matching project.
    let (tx, rx) = fanout::stage_channel();
    for element in matching {
        spawn_schedule_scan(
            element.host,
            element.payload.project,
            filter.clone(),
            true,
            mode,
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
        );
    }
    drop(tx);
    let scanned = fanout::collect(rx).await;
    rt.limiter.wait().await;

    let opts = Options {
        order_by: vec!["project.web_url".to_string()],
        ..Default::default()
    };

    let Some(owner) = owner_user else {
        let rows = pipeline::from_elements(scanned, &opts)?;
        print_schedule_rows(rt, &rows);
        return Ok(());
    };

    let host = rt.hosts.first().expect("exactly one host");
    let rows = if args.create {
        create_missing(rt, host, &args, scanned, &owner).await?
    } else {
        reown_existing(rt, host, &args, scanned, &owner).await?
    };
    print_schedule_rows(rt, &rows);
    Ok(())
}

async fn reown_existing(
    rt: &Runtime,
    host: &Host,
    args: &CleanupsArgs,
    scanned: Vec<Element<ProjectPipelineSchedule>>,
    owner: &flotilla::gitlab::types::User,
) -> anyhow::Result<Vec<ResultRow<ProjectPipelineSchedule>>> {
    let total = scanned.len();
    let targets: Vec<Element<ProjectPipelineSchedule>> = scanned
        .into_iter()
        .filter(|e| {
            e.payload
                .schedule
                .as_ref()
                .and_then(|s| s.owner.as_ref())
                .map(|o| o.id != owner.id)
                .unwrap_or(false)
        })
        .collect();

    if targets.is_empty() {
        if total == 0 {
            anyhow::bail!(
                "no cleanup schedules found in gitlab {:?}",
                host.project_name()
            );
        }
        anyhow::bail!(
            "all cleanup schedules are already owned by {:?} in gitlab {:?}",
            owner.username,
            host.project_name()
        );
    }

    if !prompt::confirm(&format!(
        "Do you really want to change {} cleanup schedule owner(s) to {:?} in gitlab {:?} ?",
        targets.len(),
        owner.username,
        host.project_name()
    )) {
        return Ok(Vec::new());
    }

    println!(
        "Setting cleanup schedule owner to {:?} in {} ...",
        owner.username, host.url
    );
    let token = args.setowner.clone();
    let (tx, rx) = fanout::stage_channel();
    for target in targets {
        let token = token.clone();
        let payload = target.payload.clone();
        fanout::spawn_single(
            target.host.clone(),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
            move |host: Host| async move {
                let Some(schedule) = payload.schedule.as_ref() else {
                    return Ok(None);
                };
                let (owned, cached) = host
                    .client()
                    .take_schedule_ownership(payload.project.id, schedule.id, Some(&token))
                    .await?;
                Ok(Some((
                    ProjectPipelineSchedule {
                        project: payload.project,
                        schedule: Some(owned),
                    },
                    cached,
                )))
            },
        );
    }
    drop(tx);

    let opts = Options {
        order_by: vec!["project.web_url".to_string()],
        ..Default::default()
    };
    Ok(pipeline::from_channel(rx, &opts).await?)
}

async fn create_missing(
    rt: &Runtime,
    host: &Host,
    args: &CleanupsArgs,
    scanned: Vec<Element<ProjectPipelineSchedule>>,
    owner: &flotilla::gitlab::types::User,
) -> anyhow::Result<Vec<ResultRow<ProjectPipelineSchedule>>> {
    let total = scanned.len();
    let targets: Vec<Element<ProjectPipelineSchedule>> = scanned
        .into_iter()
        .filter(|e| e.payload.schedule.is_none())
        .collect();

    if targets.is_empty() {
        if total == 0 {
            anyhow::bail!(
                "no cleanup schedules need to be created in gitlab {:?}",
                host.project_name()
            );
        }
        anyhow::bail!(
            "all cleanup schedules are already created in gitlab {:?}",
            host.project_name()
        );
    }

    if !prompt::confirm(&format!(
        "Do you really want to create {} cleanup schedule(s) owned by {:?} in gitlab {:?} ?",
        targets.len(),
        owner.username,
        host.project_name()
    )) {
        return Ok(Vec::new());
    }

    println!(
        "Creating cleanup schedules with owner {:?} in {} ...",
        owner.username, host.url
    );
    let token = args.setowner.clone();
    let git_ref = args.r#ref.clone();
    let (tx, rx) = fanout::stage_channel();
    for (i, target) in targets.into_iter().enumerate() {
        let token = token.clone();
        let payload = target.payload.clone();
        // Stagger crons across the one-o'clock hour so a fleet of cleanups
        // does not start simultaneously.
        let cron = format!("{i} 1 * * *");
        let schedule_ref = if git_ref.is_empty() {
            payload.project.default_branch.clone().unwrap_or_default()
        } else {
            git_ref.clone()
        };
        fanout::spawn_single(
            target.host.clone(),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
            move |host: Host| async move {
                let opts = CreatePipelineScheduleOptions {
                    description: "Cleanup".to_string(),
                    schedule_ref,
                    cron,
                    active: Some(true),
                };
                let (created, cached) = host
                    .client()
                    .create_pipeline_schedule(payload.project.id, &opts, Some(&token))
                    .await?;
                Ok(Some((
                    ProjectPipelineSchedule {
                        project: payload.project,
                        schedule: Some(created),
                    },
                    cached,
                )))
            },
        );
    }
    drop(tx);

    let opts = Options {
        order_by: vec!["project.web_url".to_string()],
        ..Default::default()
    };
    Ok(pipeline::from_channel(rx, &opts).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(description: &str, active: bool, status: Option<&str>) -> PipelineSchedule {
        PipelineSchedule {
            id: 1,
            description: description.to_string(),
            active,
            last_pipeline: status.map(|s| flotilla::gitlab::types::PipelineInfo {
                id: 1,
                status: s.to_string(),
            }),
            ..Default::default()
        }
    }

    fn filter(descriptions: &[&str], active: Option<bool>, status: Option<&str>) -> ScheduleFilter {
        ScheduleFilter {
            descriptions: Arc::new(
                descriptions
                    .iter()
                    .map(|d| Regex::new(d).unwrap())
                    .collect(),
            ),
            active,
            status: status.map(str::to_string),
        }
    }

    #[test]
    fn description_patterns_select_schedules() {
        let f = filter(&["(?i)cleanup"], None, None);
        assert!(f.matches(&schedule("Nightly Cleanup", true, None)));
        assert!(!f.matches(&schedule("Deploy", true, None)));
    }

    #[test]
    fn active_and_status_filters_narrow_further() {
        let f = filter(&[".*"], Some(true), Some("failed"));
        assert!(f.matches(&schedule("x", true, Some("failed"))));
        assert!(!f.matches(&schedule("x", false, Some("failed"))));
        assert!(!f.matches(&schedule("x", true, Some("success"))));
        assert!(!f.matches(&schedule("x", true, None)));
    }
}
