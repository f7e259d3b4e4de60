//! Command handlers.
//!
//! Every handler is the same mechanical composition: spawn one producer per
//! host (per target for later stages), drain the stage channel through the
//! grouping pipeline, print rows, then report collected per-host errors.

pub mod branches;
pub mod cache;
pub mod config;
pub mod files;
pub mod mr;
pub mod projects;
pub mod registry;
pub mod schedules;
pub mod tokens;
pub mod users;
pub mod versions;

use std::sync::Arc;

use clap::Args;

use flotilla::fanout::{self, Element, PageFetcher};
use flotilla::gitlab::types::Project;
use flotilla::gitlab::{CacheMode, ListQuery};
use flotilla::pipeline::{Options, SortOrder};

use crate::runtime::Runtime;

/// The `--group_by`, `--sort`, `--order_by` flags shared by listing
/// commands.
#[derive(Debug, Clone, Default, Args)]
pub struct SortArgs {
    /// Group results by this field
    #[arg(long)]
    pub group_by: Option<String>,

    /// Sort direction
    #[arg(long, default_value = "desc")]
    pub sort: String,

    /// Order results by these fields, first is primary
    #[arg(long, value_delimiter = ',')]
    pub order_by: Vec<String>,
}

impl SortArgs {
    /// Pipeline options with a command-specific default ordering.
    pub fn options(&self, default_order: &[&str]) -> anyhow::Result<Options> {
        let order_by = if self.order_by.is_empty() {
            default_order.iter().map(|s| s.to_string()).collect()
        } else {
            self.order_by.clone()
        };
        let sort = if self.sort.is_empty() {
            SortOrder::Desc
        } else {
            self.sort.parse()?
        };
        Ok(Options {
            group_by: self.group_by.clone().filter(|g| !g.is_empty()),
            order_by,
            sort,
        })
    }
}

/// Output format selection for commands that also emit CSV.
#[derive(Debug, Clone, Default, Args)]
pub struct OutputArgs {
    /// Output format
    #[arg(long, value_delimiter = ',', default_value = "table")]
    pub output: Vec<String>,
}

impl OutputArgs {
    pub fn table(&self) -> bool {
        self.output.iter().any(|o| o == "table")
    }

    pub fn csv(&self) -> bool {
        self.output.iter().any(|o| o == "csv")
    }
}

/// Upstream filters shared by every command that starts from a project
/// listing.
#[derive(Debug, Clone, Default, Args)]
pub struct ProjectFilterArgs {
    /// Limit by archived status
    #[arg(long)]
    pub archived: Option<bool>,

    /// Limit by projects the token user is a member of
    #[arg(long)]
    pub membership: Option<bool>,

    /// Limit by projects explicitly owned by the token user
    #[arg(long)]
    pub owned: Option<bool>,

    /// Return projects matching the search criteria
    #[arg(long)]
    pub search: Option<String>,

    /// Return only limited fields for each project
    #[arg(long)]
    pub simple: Option<bool>,

    /// Limit by projects starred by the token user
    #[arg(long)]
    pub starred: Option<bool>,

    /// Include project statistics
    #[arg(long)]
    pub statistics: Option<bool>,

    /// Comma-separated topic names; projects must match all
    #[arg(long)]
    pub topic: Option<String>,

    /// Limit by visibility: public, internal, or private
    #[arg(long)]
    pub visibility: Option<String>,

    /// Limit by projects using the given programming language
    #[arg(long)]
    pub with_programming_language: Option<String>,
}

impl ProjectFilterArgs {
    pub fn query(&self) -> ListQuery {
        ListQuery::new()
            .set_opt("archived", self.archived)
            .set_opt("membership", self.membership)
            .set_opt("owned", self.owned)
            .set_opt("search", self.search.clone())
            .set_opt("simple", self.simple)
            .set_opt("starred", self.starred)
            .set_opt("statistics", self.statistics)
            .set_opt("topic", self.topic.clone())
            .set_opt("visibility", self.visibility.clone())
            .set_opt(
                "with_programming_language",
                self.with_programming_language.clone(),
            )
    }
}

/// A page fetcher over the project listing endpoint.
pub fn project_fetcher(query: ListQuery, mode: CacheMode) -> PageFetcher<Project> {
    Arc::new(move |host, page| {
        let query = query.clone();
        Box::pin(async move { host.client().list_projects(&query, page, mode).await })
    })
}

/// Fan the project listing out across the fleet and drain it into a buffer
/// for a second stage.
pub async fn collect_projects(
    rt: &Runtime,
    query: ListQuery,
    mode: CacheMode,
) -> Vec<Element<Project>> {
    let (tx, rx) = fanout::stage_channel();
    let fetch = project_fetcher(query, mode);
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

    let projects = fanout::collect(rx).await;
    rt.limiter.wait().await;
    projects
}
