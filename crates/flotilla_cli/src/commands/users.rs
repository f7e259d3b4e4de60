//! `users` command group: list, search, create, modify, block, delete,
//! whoami.
//!
//! Mutations follow the find-targets / confirm / apply shape: targets are
//! located with forced revalidation so the decision is made against live
//! data, the operator confirms, and the apply stage runs fresh as well.

use std::sync::Arc;

use clap::{Args, Subcommand};
use regex::Regex;

use flotilla::error::Error;
use flotilla::fanout::{self, Element};
use flotilla::gitlab::types::User;
use flotilla::gitlab::{CacheMode, CreateUserOptions, ListQuery, ModifyUserOptions};
use flotilla::hosts::Host;
use flotilla::limiter::{Limiter, TaskGuard};
use flotilla::pipeline::{self, Options};
use tokio_util::sync::CancellationToken;

use super::SortArgs;
use crate::output;
use crate::prompt;
use crate::runtime::Runtime;

#[derive(Subcommand)]
pub enum UsersAction {
    /// List users across the fleet
    List(ListArgs),
    /// Search for a user by exact field match against a regexp
    Search(SearchArgs),
    /// Create a user on every host
    Create(CreateArgs),
    /// Modify an existing user everywhere it matches
    Modify(ModifyArgs),
    /// Block an existing user everywhere it matches
    Block(TargetArgs),
    /// Delete a user everywhere it matches
    Delete(DeleteArgs),
    /// Current API user on every host
    Whoami,
}

pub async fn run(rt: &Runtime, action: UsersAction) -> anyhow::Result<()> {
    match action {
        UsersAction::List(args) => list(rt, args).await,
        UsersAction::Search(args) => search(rt, args).await,
        UsersAction::Create(args) => create(rt, args).await,
        UsersAction::Modify(args) => modify(rt, args).await,
        UsersAction::Block(args) => block(rt, args).await,
        UsersAction::Delete(args) => delete(rt, args).await,
        UsersAction::Whoami => whoami(rt).await,
    }
}

/// Upstream user-listing filters.
#[derive(Debug, Clone, Default, Args)]
pub struct UserFilterArgs {
    /// Only active users
    #[arg(long)]
    active: Option<bool>,

    /// Only blocked users
    #[arg(long)]
    blocked: Option<bool>,

    /// Only admin users
    #[arg(long)]
    admins: Option<bool>,

    /// Only external users
    #[arg(long)]
    external: Option<bool>,

    /// Exclude internal (bot) users
    #[arg(long)]
    exclude_internal: Option<bool>,

    /// Filter by two-factor state: enabled or disabled
    #[arg(long, value_parser = ["enabled", "disabled"])]
    two_factor: Option<String>,

    /// Server-side search over name, username, and emails
    #[arg(long)]
    search: Option<String>,

    /// Server-side case-insensitive username lookup
    #[arg(long)]
    username: Option<String>,

    /// Only users without projects
    #[arg(long)]
    without_projects: Option<bool>,
}

impl UserFilterArgs {
    fn query(&self) -> ListQuery {
        ListQuery::new()
            .set_opt("active", self.active)
            .set_opt("blocked", self.blocked)
            .set_opt("admins", self.admins)
            .set_opt("external", self.external)
            .set_opt("exclude_internal", self.exclude_internal)
            .set_opt("two_factor", self.two_factor.clone())
            .set_opt("search", self.search.clone())
            .set_opt("username", self.username.clone())
            .set_opt("without_projects", self.without_projects)
    }
}

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    sort: SortArgs,

    /// Only print rows with at least this many hosts
    #[arg(long, default_value_t = 1)]
    count: usize,

    #[command(flatten)]
    filters: UserFilterArgs,
}

async fn list(rt: &Runtime, args: ListArgs) -> anyhow::Result<()> {
    let opts = args.sort.options(&["count", "username"])?;
    opts.validate::<User>()?;

    let (tx, rx) = fanout::stage_channel();
    let query = args.filters.query();
    let fetch: fanout::PageFetcher<User> = Arc::new(move |host: Host, page| {
        let query = query.clone();
        Box::pin(async move {
            host.client()
                .list_users(&query, page, CacheMode::Cached)
                .await
        })
    });
    for host in &rt.hosts {
        tracing::info!(host = %host.url, "fetching users");
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
    let shown: Vec<_> = rows.iter().filter(|r| r.count >= args.count).collect();
    for row in &shown {
        unique += 1;
        total += row.count;
    }
    print_user_rows(rt, &shown);

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Unique", unique), ("Total", total), ("Errors", errors)]);
    Ok(())
}

fn print_user_rows(rt: &Runtime, rows: &[&pipeline::ResultRow<User>]) {
    let body = rows
        .iter()
        .map(|row| {
            vec![
                format!("[{}]", row.count),
                row.key.clone(),
                format!("[{}]", row.host_projects(rt.show_all).join(", ")),
                format!("[{}]", output::cached_str(row.cached)),
            ]
        })
        .collect();
    println!(
        "{}",
        output::table(&["COUNT", "USER", "HOSTS", "CACHED"], body)
    );
}

/// `--by` + pattern, shared by search and the mutation target selectors.
#[derive(Args)]
pub struct TargetArgs {
    /// Field the regexp matches against
    #[arg(long, value_parser = ["email", "username", "name"])]
    by: String,

    /// Regexp over the selected field
    pattern: String,

    /// Only list the hosts where the user exists
    #[arg(long)]
    hosts: bool,
}

#[derive(Args)]
pub struct SearchArgs {
    /// Field the regexp matches against
    #[arg(long, value_parser = ["email", "username", "name"])]
    by: String,

    /// Regexp over the selected field
    pattern: String,

    #[command(flatten)]
    filters: UserFilterArgs,
}

fn user_field(user: &User, by: &str) -> String {
    match by {
        "email" => user.email.clone().unwrap_or_default(),
        "name" => user.name.clone(),
        _ => user.username.clone(),
    }
}

/// One searching producer per host: walk the paginated listing and push the
/// first user whose field matches, then stop that host's pagination.
#[allow(clippy::too_many_arguments)]
fn spawn_user_search(
    host: Host,
    by: String,
    pattern: Regex,
    query: ListQuery,
    mode: CacheMode,
    limiter: Arc<Limiter>,
    tx: tokio::sync::mpsc::Sender<Element<User>>,
    cancel: CancellationToken,
) {
    limiter.add(1);
    tokio::spawn(async move {
        let _guard = TaskGuard::new(Arc::clone(&limiter));
        let mut page = 1u32;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let permit = limiter.lock().await;
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                r = host.client().list_users(&query, page, mode) => r,
            };
            drop(permit);

            let page_data = match result {
                Ok(p) => p,
                Err(e) => {
                    limiter.error(host, e);
                    return;
                }
            };
            let cached = page_data.cached;
            for user in page_data.items {
                if pattern.is_match(&user_field(&user, &by)) {
                    let _ = tx
                        .send(Element {
                            host: host.clone(),
                            payload: user,
                            cached,
                        })
                        .await;
                    return;
                }
            }
            match page_data.next_page {
                Some(next) => page = next,
                None => return,
            }
        }
    });
}

async fn find_users(
    rt: &Runtime,
    by: &str,
    pattern: &Regex,
    query: ListQuery,
    mode: CacheMode,
) -> Vec<Element<User>> {
    let (tx, rx) = fanout::stage_channel();
    for host in &rt.hosts {
        spawn_user_search(
            host.clone(),
            by.to_string(),
            pattern.clone(),
            query.clone(),
            mode,
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
        );
    }
    drop(tx);

    let found = fanout::collect(rx).await;
    rt.limiter.wait().await;
    found
}

async fn search(rt: &Runtime, args: SearchArgs) -> anyhow::Result<()> {
    let pattern = Regex::new(&args.pattern)?;
    println!("Searching for user {} {:?}...", args.by, args.pattern);

    let found = find_users(
        rt,
        &args.by,
        &pattern,
        args.filters.query(),
        CacheMode::Cached,
    )
    .await;

    let opts = Options {
        order_by: vec![args.by.clone()],
        ..Default::default()
    };
    let rows = pipeline::from_elements(found, &opts)?;
    let refs: Vec<_> = rows.iter().collect();
    print_user_rows(rt, &refs);

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Found", rows.len()), ("Errors", errors)]);
    Ok(())
}

#[derive(Args)]
pub struct CreateArgs {
    /// Email
    #[arg(long)]
    email: String,

    /// Username
    #[arg(long)]
    username: String,

    /// Display name
    #[arg(long)]
    name: String,

    /// Password
    #[arg(long)]
    password: Option<String>,

    /// Send a password reset link
    #[arg(long)]
    reset_password: Option<bool>,

    /// Set the password to a random value
    #[arg(long)]
    force_random_password: Option<bool>,

    /// Skip the confirmation email
    #[arg(long)]
    skip_confirmation: Option<bool>,

    /// Create the user as an administrator
    #[arg(long)]
    admin: Option<bool>,

    /// Flag the user as external
    #[arg(long)]
    external: Option<bool>,

    /// Number of projects the user can create
    #[arg(long)]
    projects_limit: Option<u32>,

    /// Admin note for the user
    #[arg(long)]
    note: Option<String>,
}

async fn create(rt: &Runtime, args: CreateArgs) -> anyhow::Result<()> {
    if args.password.is_none()
        && args.reset_password != Some(true)
        && args.force_random_password != Some(true)
    {
        anyhow::bail!(
            "--password, --reset_password, --force_random_password are missing, \
             at least one must be provided"
        );
    }

    if !prompt::confirm(&format!(
        "Do you really want to create user {:?} in {:?} ?",
        args.username,
        rt.hosts.projects(rt.show_all)
    )) {
        return Ok(());
    }

    let opts = CreateUserOptions {
        email: args.email,
        username: args.username,
        name: args.name,
        password: args.password,
        reset_password: args.reset_password,
        force_random_password: args.force_random_password,
        skip_confirmation: args.skip_confirmation,
        admin: args.admin,
        external: args.external,
        projects_limit: args.projects_limit,
        note: args.note,
    };

    let (tx, rx) = fanout::stage_channel();
    for host in &rt.hosts {
        let opts = opts.clone();
        fanout::spawn_single(
            host.clone(),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
            move |host: Host| async move { host.client().create_user(&opts).await.map(Some) },
        );
    }
    drop(tx);

    let pipeline_opts = Options {
        order_by: vec!["username".to_string()],
        ..Default::default()
    };
    let rows = pipeline::from_channel(rx, &pipeline_opts).await?;
    let refs: Vec<_> = rows.iter().collect();
    print_user_rows(rt, &refs);

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Created", rows.len()), ("Errors", errors)]);
    Ok(())
}

#[derive(Args)]
pub struct ModifyArgs {
    /// Field the regexp matches against
    #[arg(long, value_parser = ["email", "username", "name"])]
    by: String,

    /// Regexp over the selected field
    pattern: String,

    /// New display name
    #[arg(long)]
    name: Option<String>,

    /// New email
    #[arg(long)]
    email: Option<String>,

    /// Grant or revoke administrator access
    #[arg(long)]
    admin: Option<bool>,

    /// Flag the user as external
    #[arg(long)]
    external: Option<bool>,

    /// Number of projects the user can create
    #[arg(long)]
    projects_limit: Option<u32>,

    /// Admin note for the user
    #[arg(long)]
    note: Option<String>,
}

async fn modify(rt: &Runtime, args: ModifyArgs) -> anyhow::Result<()> {
    let pattern = Regex::new(&args.pattern)?;
    println!("Searching for user {:?}...", args.pattern);

    let targets = find_users(rt, &args.by, &pattern, ListQuery::new(), CacheMode::Fresh).await;
    if targets.is_empty() {
        anyhow::bail!("user not found: {}", args.pattern);
    }

    let hosts: flotilla::hosts::Hosts = targets.iter().map(|e| e.host.clone()).collect();
    if !prompt::confirm(&format!(
        "Do you really want to modify {} user(s) {:?} in {} gitlab(s) {:?} ?",
        targets.len(),
        args.pattern,
        hosts.len(),
        hosts.projects(rt.show_all)
    )) {
        return Ok(());
    }

    let opts = ModifyUserOptions {
        name: args.name,
        email: args.email,
        admin: args.admin,
        external: args.external,
        projects_limit: args.projects_limit,
        note: args.note,
    };

    let (tx, rx) = fanout::stage_channel();
    for target in targets {
        let opts = opts.clone();
        let id = target.payload.id;
        fanout::spawn_single(
            target.host.clone(),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
            move |host: Host| async move { host.client().modify_user(id, &opts).await.map(Some) },
        );
    }
    drop(tx);

    let pipeline_opts = Options {
        order_by: vec![args.by.clone()],
        ..Default::default()
    };
    let rows = pipeline::from_channel(rx, &pipeline_opts).await?;
    let refs: Vec<_> = rows.iter().collect();
    print_user_rows(rt, &refs);

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Modified", rows.len()), ("Errors", errors)]);
    Ok(())
}

async fn block(rt: &Runtime, args: TargetArgs) -> anyhow::Result<()> {
    let pattern = Regex::new(&args.pattern)?;
    println!("Searching for user {:?}...", args.pattern);

    let targets = find_users(rt, &args.by, &pattern, ListQuery::new(), CacheMode::Fresh).await;
    if targets.is_empty() {
        anyhow::bail!("user not found: {}", args.pattern);
    }

    if args.hosts {
        for target in &targets {
            println!("{}", target.host.project);
        }
        return Ok(());
    }

    let hosts: flotilla::hosts::Hosts = targets.iter().map(|e| e.host.clone()).collect();
    if !prompt::confirm(&format!(
        "Do you really want to block {} user(s) {:?} in {} gitlab(s) {:?} ?",
        targets.len(),
        args.pattern,
        hosts.len(),
        hosts.projects(rt.show_all)
    )) {
        return Ok(());
    }

    let (tx, rx) = fanout::stage_channel();
    for target in targets {
        let user = target.payload.clone();
        fanout::spawn_single(
            target.host.clone(),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
            move |host: Host| async move {
                host.client().block_user(user.id).await?;
                Ok(Some((user, false)))
            },
        );
    }
    drop(tx);

    let pipeline_opts = Options {
        order_by: vec![args.by.clone()],
        ..Default::default()
    };
    let rows = pipeline::from_channel(rx, &pipeline_opts).await?;
    let refs: Vec<_> = rows.iter().collect();
    print_user_rows(rt, &refs);

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Blocked", rows.len()), ("Errors", errors)]);
    Ok(())
}

#[derive(Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Also delete contributions that would otherwise be ghosted
    #[arg(long)]
    hard_delete: bool,
}

async fn delete(rt: &Runtime, args: DeleteArgs) -> anyhow::Result<()> {
    let pattern = Regex::new(&args.target.pattern)?;
    println!("Searching for user {:?}...", args.target.pattern);

    let targets = find_users(
        rt,
        &args.target.by,
        &pattern,
        ListQuery::new(),
        CacheMode::Fresh,
    )
    .await;
    if targets.is_empty() {
        anyhow::bail!("user not found: {}", args.target.pattern);
    }

    if args.target.hosts {
        for target in &targets {
            println!("{}", target.host.project);
        }
        return Ok(());
    }

    let hosts: flotilla::hosts::Hosts = targets.iter().map(|e| e.host.clone()).collect();
    if !prompt::confirm(&format!(
        "Do you really want to delete {} user(s) {:?} in {} gitlab(s) {:?} ?",
        targets.len(),
        args.target.pattern,
        hosts.len(),
        hosts.projects(rt.show_all)
    )) {
        return Ok(());
    }

    let hard_delete = args.hard_delete;
    let (tx, rx) = fanout::stage_channel();
    for target in targets {
        let user = target.payload.clone();
        fanout::spawn_single(
            target.host.clone(),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
            move |host: Host| async move {
                host.client().delete_user(user.id, hard_delete).await?;
                Ok(Some((user, false)))
            },
        );
    }
    drop(tx);

    let pipeline_opts = Options {
        order_by: vec![args.target.by.clone()],
        ..Default::default()
    };
    let rows = pipeline::from_channel(rx, &pipeline_opts).await?;
    let refs: Vec<_> = rows.iter().collect();
    print_user_rows(rt, &refs);

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Deleted", rows.len()), ("Errors", errors)]);
    Ok(())
}

pub async fn whoami(rt: &Runtime) -> anyhow::Result<()> {
    let (tx, rx) = fanout::stage_channel();
    for host in &rt.hosts {
        tracing::info!(host = %host.url, "fetching current user");
        fanout::spawn_single(
            host.clone(),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
            |host: Host| async move {
                host.client()
                    .current_user(CacheMode::Fresh, None)
                    .await
                    .map(Some)
            },
        );
    }
    drop(tx);

    let opts = Options {
        order_by: vec!["username".to_string()],
        ..Default::default()
    };
    let rows = pipeline::from_channel(rx, &opts).await?;
    let total: usize = rows.iter().map(|r| r.count).sum();
    let refs: Vec<_> = rows.iter().collect();
    print_user_rows(rt, &refs);

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Total", total), ("Errors", errors)]);
    Ok(())
}
