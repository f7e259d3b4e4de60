//! `projects` command group: list, languages, and the nested branch, merge
//! request, file, pipeline, and registry commands.

use std::sync::Arc;

use clap::{Args, Subcommand};

use flotilla::fanout;
use flotilla::gitlab::types::{Project, ProjectWithLanguages};
use flotilla::gitlab::CacheMode;
use flotilla::hosts::Host;
use flotilla::pipeline;

use super::{branches, files, mr, registry, schedules};
use super::{collect_projects, OutputArgs, ProjectFilterArgs, SortArgs};
use crate::output;
use crate::runtime::Runtime;

#[derive(Subcommand)]
pub enum ProjectsAction {
    /// List projects across the fleet
    List(ListArgs),
    /// List projects with their language breakdown
    Languages(LanguagesArgs),
    /// Branches API
    Branches {
        #[command(subcommand)]
        action: branches::BranchesAction,
    },
    /// Merge requests API
    Mr {
        #[command(subcommand)]
        action: mr::MrAction,
    },
    /// Repository files
    Files {
        #[command(subcommand)]
        action: files::FilesAction,
    },
    /// Pipelines API
    Pipelines {
        #[command(subcommand)]
        action: schedules::PipelinesAction,
    },
    /// Container registry API
    Registry {
        #[command(subcommand)]
        action: registry::RegistryAction,
    },
}

pub async fn run(rt: &Runtime, action: ProjectsAction) -> anyhow::Result<()> {
    match action {
        ProjectsAction::List(args) => list(rt, args).await,
        ProjectsAction::Languages(args) => languages(rt, args).await,
        ProjectsAction::Branches { action } => branches::run(rt, action).await,
        ProjectsAction::Mr { action } => mr::run(rt, action).await,
        ProjectsAction::Files { action } => files::run(rt, action).await,
        ProjectsAction::Pipelines { action } => schedules::run(rt, action).await,
        ProjectsAction::Registry { action } => registry::run(rt, action).await,
    }
}

pub const PROJECT_DEFAULT_FIELD: &str = "web_url";

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    sort: SortArgs,

    #[command(flatten)]
    filters: ProjectFilterArgs,
}

async fn list(rt: &Runtime, args: ListArgs) -> anyhow::Result<()> {
    let opts = args.sort.options(&["count", PROJECT_DEFAULT_FIELD])?;
    opts.validate::<Project>()?;

    let (tx, rx) = fanout::stage_channel();
    let fetch = super::project_fetcher(args.filters.query(), CacheMode::Cached);
    for host in &rt.hosts {
        tracing::info!(host = %host.url, "fetching projects");
        fanout::spawn_paged(
            host.clone(),
            Arc::clone(&fetch),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
        );
    }
    drop(tx);

    let rows = pipeline::from_channel(rx, &opts).await?;

    let mut unique = 0;
    let mut total = 0;
    for row in &rows {
        unique += 1;
        total += row.count;
    }
    output::print_grouped("REPOSITORY", &rows, rt.show_all);

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Unique", unique), ("Total", total), ("Errors", errors)]);
    Ok(())
}

#[derive(Args)]
pub struct LanguagesArgs {
    #[command(flatten)]
    sort: SortArgs,

    #[command(flatten)]
    output: OutputArgs,

    #[command(flatten)]
    filters: ProjectFilterArgs,
}

async fn languages(rt: &Runtime, args: LanguagesArgs) -> anyhow::Result<()> {
    let opts = args
        .sort
        .options(&["count", "project.web_url"])?;
    opts.validate::<ProjectWithLanguages>()?;

    let projects = collect_projects(rt, args.filters.query(), CacheMode::Cached).await;
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
                let (languages, cached) = host
                    .client()
                    .project_languages(project.id, CacheMode::Cached)
                    .await?;
                Ok(Some((ProjectWithLanguages { project, languages }, cached)))
            },
        );
    }
    drop(tx);

    let rows = pipeline::from_channel(rx, &opts).await?;

    if args.output.csv() {
        let mut body = Vec::new();
        for row in &rows {
            for element in &row.elements {
                body.push(vec![
                    element.host.project.clone(),
                    row.key.clone(),
                    element.payload.languages_to_string(),
                ]);
            }
        }
        output::write_csv(&["HOST", "REPOSITORY", "LANGUAGES"], body)?;
    }

    if args.output.table() {
        let mut unique = 0;
        let mut total = 0;
        let mut body = Vec::new();
        for row in &rows {
            unique += 1;
            total += row.count;
            for element in &row.elements {
                body.push(vec![
                    format!("[{}]", row.count),
                    row.key.clone(),
                    format!("[{}]", element.payload.languages_to_string()),
                    format!("[{}]", element.host.project_name()),
                    format!("[{}]", output::cached_str(row.cached)),
                ]);
            }
        }
        println!(
            "{}",
            output::table(
                &["COUNT", "REPOSITORY", "LANGUAGES", "HOST", "CACHED"],
                body
            )
        );

        let errors = output::report_errors(&rt.limiter);
        output::print_totals(&[("Unique", unique), ("Total", total), ("Errors", errors)]);
    } else {
        output::report_errors(&rt.limiter);
    }

    Ok(())
}
