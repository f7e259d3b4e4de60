//! `projects mr` commands.

use std::sync::Arc;

use clap::{Args, Subcommand};

use flotilla::fanout::{self, Element};
use flotilla::gitlab::types::{Project, ProjectMergeRequests};
use flotilla::gitlab::{CacheMode, ListQuery};
use flotilla::hosts::Host;
use flotilla::pipeline;

use super::{collect_projects, OutputArgs, ProjectFilterArgs, SortArgs};
use crate::output;
use crate::runtime::Runtime;

#[derive(Subcommand)]
pub enum MrAction {
    /// List merge requests across the fleet
    List(ListArgs),
}

pub async fn run(rt: &Runtime, action: MrAction) -> anyhow::Result<()> {
    match action {
        MrAction::List(args) => list(rt, args).await,
    }
}

#[derive(Args)]
pub struct ListArgs {
    /// Limit projects to these namespaces (path prefix of
    /// path_with_namespace)
    #[arg(long, value_delimiter = ',')]
    namespaces: Vec<String>,

    /// Filter merge requests by state: opened, closed, locked, merged
    #[arg(long, value_parser = ["opened", "closed", "locked", "merged"])]
    state: Option<String>,

    /// Filter merge requests by target branch
    #[arg(long)]
    target_branch: Option<String>,

    /// Filter merge requests by author username
    #[arg(long)]
    author: Option<String>,

    #[command(flatten)]
    sort: SortArgs,

    #[command(flatten)]
    output: OutputArgs,

    #[command(flatten)]
    filters: ProjectFilterArgs,
}

fn in_namespaces(project: &Project, namespaces: &[String]) -> bool {
    if namespaces.is_empty() {
        return true;
    }
    let namespace = project
        .path_with_namespace
        .rsplit_once('/')
        .map(|(ns, _)| ns)
        .unwrap_or("");
    namespaces.iter().any(|n| n == namespace)
}

async fn list(rt: &Runtime, args: ListArgs) -> anyhow::Result<()> {
    let opts = args.sort.options(&["count", "project.web_url"])?;
    opts.validate::<ProjectMergeRequests>()?;

    let projects = collect_projects(rt, args.filters.query(), CacheMode::Cached).await;
    let selected: Vec<Element<Project>> = projects
        .into_iter()
        .filter(|e| in_namespaces(&e.payload, &args.namespaces))
        .collect();
    if selected.is_empty() {
        anyhow::bail!("no projects found");
    }

    let mr_query = ListQuery::new()
        .set_opt("state", args.state.clone())
        .set_opt("target_branch", args.target_branch.clone())
        .set_opt("author_username", args.author.clone());

    let (tx, rx) = fanout::stage_channel();
    for element in selected {
        let project = element.payload.clone();
        let query = mr_query.clone();
        let fetch: fanout::PageFetcher<ProjectMergeRequests> = Arc::new(move |host: Host, page| {
            let project = project.clone();
            let query = query.clone();
            Box::pin(async move {
                let page_data = host
                    .client()
                    .list_project_merge_requests(project.id, &query, page, CacheMode::Cached)
                    .await?;
                Ok(flotilla::gitlab::Page {
                    items: vec![ProjectMergeRequests {
                        project,
                        merge_requests: page_data.items,
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
        .filter(|r| r.elements.iter().any(|e| !e.payload.merge_requests.is_empty()))
        .collect();
    if rows.is_empty() {
        anyhow::bail!("no merge requests found");
    }

    if args.output.csv() {
        let mut body = Vec::new();
        for row in &rows {
            for element in &row.elements {
                for merge_request in &element.payload.merge_requests {
                    body.push(vec![
                        element.host.project_name(),
                        element.payload.project.web_url.clone(),
                        merge_request.title.clone(),
                        merge_request.state.clone(),
                        merge_request
                            .author
                            .as_ref()
                            .map(|a| a.username.clone())
                            .unwrap_or_default(),
                        merge_request.web_url.clone(),
                    ]);
                }
            }
        }
        output::write_csv(
            &["HOST", "REPOSITORY", "TITLE", "STATE", "AUTHOR", "URL"],
            body,
        )?;
    }

    if args.output.table() {
        let mut unique = 0;
        let mut total = 0;
        let mut body = Vec::new();
        for row in &rows {
            unique += 1;
            for element in &row.elements {
                total += element.payload.merge_requests.len();
                for merge_request in &element.payload.merge_requests {
                    body.push(vec![
                        format!("[{}]", element.host.project_name()),
                        merge_request.title.clone(),
                        format!("[{}]", merge_request.state),
                        merge_request
                            .author
                            .as_ref()
                            .map(|a| a.username.clone())
                            .unwrap_or_else(|| "-".to_string()),
                        merge_request.web_url.clone(),
                        format!("[{}]", output::cached_str(element.cached)),
                    ]);
                }
            }
        }
        println!(
            "{}",
            output::table(
                &["HOST", "TITLE", "STATE", "AUTHOR", "URL", "CACHED"],
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

#[cfg(test)]
mod tests {
    use super::*;

    fn project(path_with_namespace: &str) -> Project {
        Project {
            path_with_namespace: path_with_namespace.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn namespace_filter_matches_prefix() {
        let p = project("infra/tools/deploy");
        assert!(in_namespaces(&p, &[]));
        assert!(in_namespaces(&p, &["infra/tools".to_string()]));
        assert!(!in_namespaces(&p, &["infra".to_string()]));
        assert!(!in_namespaces(&p, &["product".to_string()]));
    }
}
