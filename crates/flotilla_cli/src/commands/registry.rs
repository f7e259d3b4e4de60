//! `projects registry` commands.

use std::sync::Arc;

use clap::{Args, Subcommand};

use flotilla::fanout;
use flotilla::gitlab::types::ProjectRegistryRepositories;
use flotilla::gitlab::CacheMode;
use flotilla::hosts::Host;
use flotilla::pipeline;

use super::{collect_projects, ProjectFilterArgs, SortArgs};
use crate::output;
use crate::runtime::Runtime;

const REGISTRY_DEFAULT_FIELD: &str = "project.web_url";

#[derive(Subcommand)]
pub enum RegistryAction {
    /// List container registry repositories across the fleet
    List(ListArgs),
}

pub async fn run(rt: &Runtime, action: RegistryAction) -> anyhow::Result<()> {
    match action {
        RegistryAction::List(args) => list(rt, args).await,
    }
}

#[derive(Args)]
pub struct ListArgs {
    /// Include the deduplicated total size of each repository
    #[arg(long)]
    size: bool,

    #[command(flatten)]
    sort: SortArgs,

    #[command(flatten)]
    filters: ProjectFilterArgs,
}

async fn list(rt: &Runtime, args: ListArgs) -> anyhow::Result<()> {
    let opts = args.sort.options(&["count", REGISTRY_DEFAULT_FIELD])?;
    opts.validate::<ProjectRegistryRepositories>()?;

    let projects = collect_projects(rt, args.filters.query(), CacheMode::Cached).await;
    if projects.is_empty() {
        anyhow::bail!("no projects found");
    }

    let include_size = args.size;
    let (tx, rx) = fanout::stage_channel();
    for element in projects {
        let project = element.payload.clone();
        let fetch: fanout::PageFetcher<ProjectRegistryRepositories> =
            Arc::new(move |host: Host, page| {
                let project = project.clone();
                Box::pin(async move {
                    let page_data = host
                        .client()
                        .list_registry_repositories(project.id, include_size, page, CacheMode::Cached)
                        .await?;
                    Ok(flotilla::gitlab::Page {
                        items: vec![ProjectRegistryRepositories {
                            project,
                            repositories: page_data.items,
                        }],
                        next_page: page_data.next_page,
                        total_pages: page_data.total_pages,
                        cached: page_data.cached,
                    })
                })
            });
        fanout::spawn_paged(
            element.host,
            fetch,
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
        );
    }
    drop(tx);

    let rows = pipeline::from_channel(rx, &opts).await?;
    let rows: Vec<_> = rows
        .into_iter()
        .filter(|r| r.elements.iter().any(|e| !e.payload.repositories.is_empty()))
        .collect();
    if rows.is_empty() {
        anyhow::bail!("no registry repositories found");
    }

    let mut unique = 0;
    let mut total = 0;
    let mut body = Vec::new();
    for row in &rows {
        unique += 1;
        for element in &row.elements {
            total += element.payload.repositories.len();
            for repo in &element.payload.repositories {
                body.push(vec![
                    format!("[{}]", row.count),
                    repo.location.clone(),
                    format!("[{}]", repo.tags_count.unwrap_or(0)),
                    repo.size
                        .map(output::human_bytes)
                        .unwrap_or_else(|| "-".to_string()),
                    format!("[{}]", element.host.project_name()),
                    format!("[{}]", output::cached_str(element.cached)),
                ]);
            }
        }
    }
    println!(
        "{}",
        output::table(
            &[
                "COUNT",
                "REPOSITORY",
                "TAGS COUNT",
                "TOTAL SIZE",
                "HOST",
                "CACHED"
            ],
            body
        )
    );

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Unique", unique), ("Total", total), ("Errors", errors)]);
    Ok(())
}
