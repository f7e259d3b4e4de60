//! `tokens` command group: personal access tokens across the fleet.

use std::sync::Arc;

use clap::{Args, Subcommand};

use flotilla::fanout;
use flotilla::gitlab::types::PersonalAccessToken;
use flotilla::gitlab::CacheMode;
use flotilla::hosts::Host;
use flotilla::pipeline;

use super::SortArgs;
use crate::output;
use crate::runtime::Runtime;

#[derive(Subcommand)]
pub enum TokensAction {
    /// List personal access tokens across the fleet
    List(ListArgs),
}

pub async fn run(rt: &Runtime, action: TokensAction) -> anyhow::Result<()> {
    match action {
        TokensAction::List(args) => list(rt, args).await,
    }
}

#[derive(Args)]
pub struct ListArgs {
    /// Only tokens in this state
    #[arg(long)]
    active: Option<bool>,

    #[command(flatten)]
    sort: SortArgs,
}

async fn list(rt: &Runtime, args: ListArgs) -> anyhow::Result<()> {
    let opts = args.sort.options(&["name"])?;
    opts.validate::<PersonalAccessToken>()?;

    let (tx, rx) = fanout::stage_channel();
    let fetch: fanout::PageFetcher<PersonalAccessToken> = Arc::new(move |host: Host, page| {
        Box::pin(async move {
            host.client()
                .list_personal_access_tokens(page, CacheMode::Cached)
                .await
        })
    });
    for host in &rt.hosts {
        tracing::info!(host = %host.url, "fetching personal access tokens");
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

    let mut total = 0;
    let mut body = Vec::new();
    for row in &rows {
        for element in &row.elements {
            let token = &element.payload;
            if let Some(active) = args.active {
                if token.active != active {
                    continue;
                }
            }
            total += 1;
            body.push(vec![
                format!("[{}]", element.host.project_name()),
                token.name.clone(),
                format!("[{}]", token.scopes.join(", ")),
                format!("[{}]", if token.active { "active" } else { "inactive" }),
                token
                    .expires_at
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                format!("[{}]", output::cached_str(element.cached)),
            ]);
        }
    }
    println!(
        "{}",
        output::table(
            &["HOST", "NAME", "SCOPES", "ACTIVE", "EXPIRES AT", "CACHED"],
            body
        )
    );

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Total", total), ("Errors", errors)]);
    Ok(())
}
