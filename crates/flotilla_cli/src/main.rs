//! Flotilla CLI - bulk administration across a fleet of GitLab instances.

mod commands;
mod output;
mod prompt;
mod runtime;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::runtime::Runtime;

#[derive(Parser)]
#[command(name = "flotilla")]
#[command(version)]
#[command(about = "GitLab bulk administration tool")]
#[command(
    long_about = "Flotilla drives uniform administrative queries and mutations across a \
fleet of GitLab instances described by a single configuration file. Results \
are aggregated across hosts, grouped, ordered, and printed as tables or CSV; \
per-host failures are reported after the output without aborting the rest of \
the fleet."
)]
#[command(after_long_help = r#"EXAMPLES
    List users across the fleet, grouped by username:
        $ flotilla users list --group_by username

    Find one user everywhere, bypassing the cache:
        $ flotilla -u users search --by username '^deploy-bot$'

    Protect the main branch on every project:
        $ flotilla projects branches protect --name main --push_access_level 40 --force

    Check version drift:
        $ flotilla versions

CONFIGURATION
    Flotilla reads ~/.config/flotilla/config.yaml unless --config is given.
    Hosts are grouped as team -> project -> name; the -f/--filter regex
    selects hosts by their team.project.name identity.
"#)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Number of concurrent requests across the fleet
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Override the cache TTL from the config file (e.g. "24h", "0")
    #[arg(long, global = true)]
    ttl: Option<String>,

    /// Select hosts by regexp over team.project.name
    #[arg(short = 'f', long, global = true)]
    filter: Option<String>,

    /// Show all hosts in grouped output instead of the first five
    #[arg(short = 'a', long, global = true)]
    all: bool,

    /// Only log messages with the given severity or above
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Refresh the cache: force revalidation of every request
    #[arg(short = 'u', long, global = true)]
    update: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Cache management
    Cache {
        #[command(subcommand)]
        action: commands::cache::CacheAction,
    },
    /// Information about the current configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Information about the current build
    Info,
    /// Projects API
    Projects {
        #[command(subcommand)]
        action: commands::projects::ProjectsAction,
    },
    /// Users API
    Users {
        #[command(subcommand)]
        action: commands::users::UsersAction,
    },
    /// Current API user on every host
    Whoami,
    /// Personal access tokens API
    Tokens {
        #[command(subcommand)]
        action: commands::tokens::TokensAction,
    },
    /// Retrieve version information for the fleet
    Versions,
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn init_logging(args: &GlobalArgs) {
    let level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("flotilla={level},flotilla_cli={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.global);

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        return;
    }

    if let Err(err) = run(cli).await {
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Info = cli.command {
        println!(
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );
        return Ok(());
    }

    let rt = Runtime::new(
        cli.global.config.as_deref(),
        cli.global.filter.as_deref(),
        cli.global.threads,
        cli.global.ttl.as_deref(),
        cli.global.update,
        cli.global.all,
    )?;

    match cli.command {
        Commands::Cache { action } => commands::cache::run(&rt, action),
        Commands::Config { action } => commands::config::run(&rt, action),
        Commands::Projects { action } => commands::projects::run(&rt, action).await,
        Commands::Users { action } => commands::users::run(&rt, action).await,
        Commands::Whoami => commands::users::whoami(&rt).await,
        Commands::Tokens { action } => commands::tokens::run(&rt, action).await,
        Commands::Versions => commands::versions::run(&rt).await,
        Commands::Info | Commands::Completions { .. } => Ok(()),
    }
}
