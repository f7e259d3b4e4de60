//! `versions` command: instance versions and upstream drift status.
//!
//! Each host reports its own version; the drift verdict comes from the
//! public `version.gitlab.com` badge endpoint, which answers an SVG whose
//! text node reads `up-to-date`, `update available`, or `update asap`.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;

use flotilla::error::Error;
use flotilla::fanout;
use flotilla::gitlab::types::{Version, VersionCheck};
use flotilla::gitlab::CacheMode;
use flotilla::hosts::Host;
use flotilla::http::{HttpMethod, HttpRequest, HttpTransport, ReqwestTransport};
use flotilla::limiter::Limiter;
use flotilla::pipeline::{self, Options, SortOrder};

use crate::output;
use crate::runtime::Runtime;

pub async fn run(rt: &Runtime) -> anyhow::Result<()> {
    // The badge endpoint lives outside the fleet; it gets its own plain
    // transport so fleet DNS overrides and the cache stay out of the way.
    let check_transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(&HashMap::new()).map_err(|e| Error::Transport(e.to_string()))?);

    let (tx, rx) = fanout::stage_channel();
    for host in &rt.hosts {
        tracing::info!(host = %host.url, "fetching version info");
        let transport = Arc::clone(&check_transport);
        fanout::spawn_self_locking(
            host.clone(),
            Arc::clone(&rt.limiter),
            tx.clone(),
            rt.cancel.clone(),
            move |host: Host, limiter: Arc<Limiter>| async move {
                let permit = limiter.lock().await;
                let (version, cached) = host.client().version(CacheMode::Fresh).await?;
                drop(permit);

                let permit = limiter.lock().await;
                let status = check_version(transport.as_ref(), &host.url, &version).await?;
                drop(permit);

                Ok(Some((
                    VersionCheck {
                        version: version.version,
                        status,
                    },
                    cached,
                )))
            },
        );
    }
    drop(tx);

    let opts = Options {
        order_by: vec!["host".to_string()],
        sort: SortOrder::Asc,
        ..Default::default()
    };
    let rows = pipeline::from_channel(rx, &opts).await?;

    let mut body = Vec::new();
    for row in &rows {
        for element in &row.elements {
            body.push(vec![
                format!("[{}]", element.host.project),
                element.host.url.clone(),
                element.payload.version.clone(),
                format!("[{}]", element.payload.status),
            ]);
        }
    }
    println!(
        "{}",
        output::table(&["HOST", "URL", "VERSION", "STATUS"], body)
    );

    let errors = output::report_errors(&rt.limiter);
    output::print_totals(&[("Total", rows.len()), ("Errors", errors)]);
    Ok(())
}

/// Query the upstream badge for one instance version.
async fn check_version(
    transport: &dyn HttpTransport,
    host_url: &str,
    version: &Version,
) -> flotilla::Result<String> {
    let info = STANDARD.encode(format!("{{\"version\": \"{}\"}}", version.version));
    let url = format!("https://version.gitlab.com/check.svg?gitlab_info={info}");

    let response = transport
        .send(HttpRequest {
            method: HttpMethod::Get,
            url,
            headers: vec![("Referer".to_string(), format!("{host_url}/help"))],
            body: Vec::new(),
        })
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    if !(200..300).contains(&response.status) {
        return Err(Error::Api {
            status: response.status,
            message: "version check failed".to_string(),
        });
    }

    parse_badge(&String::from_utf8_lossy(&response.body)).ok_or_else(|| {
        Error::validation("version check response carries no status text")
    })
}

/// Extract the first text node of the badge SVG, lowercased.
fn parse_badge(svg: &str) -> Option<String> {
    let re = Regex::new(r"<text[^>]*>([^<]+)</text>").expect("badge pattern is valid");
    re.captures(svg)
        .map(|caps| caps[1].trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn badge_text_is_extracted_and_lowercased() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="120" height="20">
            <rect width="120" height="20" fill="#4c1"/>
            <text x="10" y="14">Up-to-date</text>
        </svg>"##;
        assert_eq!(parse_badge(svg).as_deref(), Some("up-to-date"));
    }

    #[test]
    fn badge_without_text_yields_none() {
        assert!(parse_badge("<svg></svg>").is_none());
    }
}
