//! `projects files` commands: fleet-wide file content search.

use std::sync::Arc;

use clap::{Args, Subcommand};
use regex::Regex;

use flotilla::fanout;
use flotilla::gitlab::types::ProjectFile;
use flotilla::gitlab::CacheMode;
use flotilla::hosts::Host;
use flotilla::pipeline::{self, Options};

use super::{collect_projects, ProjectFilterArgs};
use crate::output;
use crate::runtime::Runtime;

#[derive(Subcommand)]
pub enum FilesAction {
    /// Search repository file content by regexp
    Search(SearchArgs),
}

pub async fn run(rt: &Runtime, action: FilesAction) -> anyhow::Result<()> {
    match action {
        FilesAction::Search(args) => search(rt, args).await,
    }
}

#[derive(Args)]
pub struct SearchArgs {
    /// Project file paths to fetch
    #[arg(long, value_delimiter = ',', required = true)]
    filepath: Vec<String>,

    /// Regex patterns the file content must match (all of them)
    #[arg(long, value_delimiter = ',', default_value = ".*")]
    pattern: Vec<String>,

    /// Git ref to read from; the project default branch when omitted
    #[arg(long, default_value = "")]
    r#ref: String,

    /// Print the matching file contents
    #[arg(long)]
    show: bool,

    /// Limit printed contents to this many lines
    #[arg(long, default_value_t = 0)]
    num: usize,

    #[command(flatten)]
    filters: ProjectFilterArgs,
}

/// Fetch one file from one project and keep it when every pattern matches.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_file_probe(
    rt: &Runtime,
    host: Host,
    project: flotilla::gitlab::types::Project,
    file_path: String,
    git_ref: String,
    patterns: Arc<Vec<Regex>>,
    mode: CacheMode,
    tx: tokio::sync::mpsc::Sender<fanout::Element<ProjectFile>>,
) {
    fanout::spawn_single(
        host,
        Arc::clone(&rt.limiter),
        tx,
        rt.cancel.clone(),
        move |host: Host| async move {
            let effective_ref = if git_ref.is_empty() {
                project.default_branch.clone().unwrap_or_default()
            } else {
                git_ref
            };
            let fetched = host
                .client()
                .raw_file(project.id, &file_path, &effective_ref, mode)
                .await?;
            let Some((raw, cached)) = fetched else {
                return Ok(None);
            };
            if !patterns.iter().all(|p| p.is_match(&raw)) {
                return Ok(None);
            }
            Ok(Some((
                ProjectFile {
                    project,
                    file_path,
                    raw,
                },
                cached,
            )))
        },
    );
}

async fn search(rt: &Runtime, args: SearchArgs) -> anyhow::Result<()> {
    let patterns: Vec<Regex> = args
        .pattern
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<_, _>>()?;
    let patterns = Arc::new(patterns);

    let projects = collect_projects(rt, args.filters.query(), CacheMode::Cached).await;
    if projects.is_empty() {
        anyhow::bail!("no projects found");
    }

    let (tx, rx) = fanout::stage_channel();
    for element in projects {
        for file_path in &args.filepath {
            spawn_file_probe(
                rt,
                element.host.clone(),
                element.payload.clone(),
                file_path.clone(),
                args.r#ref.clone(),
                Arc::clone(&patterns),
                CacheMode::Cached,
                tx.clone(),
            );
        }
    }
    drop(tx);

    let opts = Options {
        order_by: vec!["project.web_url".to_string()],
        ..Default::default()
    };
    let rows = pipeline::from_channel(rx, &opts).await?;

    let mut unique = 0;
    let mut total = 0;
    let mut body = Vec::new();
    for row in &rows {
        unique += 1;
        total += row.count;
        body.push(vec![
            format!("[{}]", row.count),
            row.key.clone(),
            format!("[{}]", row.host_projects(rt.show_all).join(", ")),
            format!("[{}]", output::cached_str(row.cached)),
        ]);
    }
    println!(
        "{}",
        output::table(&["COUNT", "REPOSITORY", "HOSTS", "CACHED"], body)
    );

    if args.show {
        for row in &rows {
            for element in &row.elements {
                if args.num > 0 {
                    for line in element.payload.raw.lines().take(args.num) {
                        println!("{line}");
                    }
                    println!();
                } else {
                    println!("{}", element.payload.raw);
                }
            }
        }
    }

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Unique", unique), ("Total", total), ("Errors", errors)]);
    Ok(())
}
