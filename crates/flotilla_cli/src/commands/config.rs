//! `config` command group.

use clap::Subcommand;

use crate::output;
use crate::runtime::Runtime;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// List the GitLab hosts stored in the config
    List,
}

pub fn run(rt: &Runtime, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::List => list(rt),
    }
}

fn list(rt: &Runtime) -> anyhow::Result<()> {
    let rows = rt
        .hosts
        .iter()
        .map(|h| vec![format!("[{}]", h.full_name()), h.url.clone()])
        .collect();
    println!("{}", output::table(&["HOST", "URL"], rows));
    output::print_totals(&[("Total", rt.hosts.len())]);
    Ok(())
}
