//! Runtime wiring shared by every command handler.
//!
//! Commands receive an explicit `Runtime` (config, host registry, limiter,
//! cancellation token) instead of reaching for globals, so a handler's
//! inputs are visible at its call site and tests can construct a runtime
//! around a mock fleet.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use flotilla::config::{parse_duration, Config};
use flotilla::hosts::{build_registry, Hosts};
use flotilla::limiter::Limiter;

pub struct Runtime {
    pub config: Config,
    pub hosts: Hosts,
    pub limiter: Arc<Limiter>,
    pub cancel: CancellationToken,
    pub show_all: bool,
}

impl Runtime {
    pub fn new(
        config_path: Option<&Path>,
        filter: Option<&str>,
        threads: Option<usize>,
        ttl: Option<&str>,
        update: bool,
        show_all: bool,
    ) -> anyhow::Result<Runtime> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => Config::default_path()?,
        };
        let mut config =
            Config::from_file(&path).with_context(|| format!("loading {}", path.display()))?;
        tracing::debug!(config = %path.display(), "configuration loaded");

        if let Some(filter) = filter {
            config.filter = filter.to_string();
        }
        if let Some(threads) = threads {
            config.threads = threads;
        }

        // --update forces revalidation everywhere by capping freshness at
        // zero; an explicit --ttl overrides the config file's value.
        let ttl_override = if update {
            Some(Some(Duration::ZERO))
        } else {
            match ttl {
                Some(raw) => Some(Some(parse_duration(raw)?)),
                None => None,
            }
        };

        let hosts = build_registry(&config, ttl_override)?;
        if hosts.is_empty() {
            anyhow::bail!("no hosts match filter {:?}", config.filter);
        }

        let limiter = Limiter::new(config.threads);

        let cancel = CancellationToken::new();
        let handler_token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nShutdown requested, finishing in-flight requests...");
                handler_token.cancel();
            }
        });

        Ok(Runtime {
            config,
            hosts,
            limiter,
            cancel,
            show_all,
        })
    }
}
