//! Flotilla - bulk administration for fleets of GitLab instances.
//!
//! One configuration file describes many GitLab hosts grouped as
//! `team.project.name`; every operation fans out across the fleet under a
//! bounded concurrency limiter, flows through a shared HTTP cache, and is
//! aggregated into grouped, ordered result rows.
//!
//! The pieces compose in a fixed shape:
//!
//! ```text
//! config -> host registry -> fan-out producers -> channel -> pipeline -> rows
//!                 |                  |
//!            HTTP transport      limiter (semaphore + error log)
//!            (+ disk cache)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use flotilla::{config::Config, fanout, gitlab, hosts, limiter::Limiter, pipeline};
//!
//! let cfg = Config::from_file(&Config::default_path()?)?;
//! let fleet = hosts::build_registry(&cfg, None)?;
//! let limiter = Limiter::new(cfg.threads);
//!
//! let (tx, rx) = fanout::stage_channel();
//! for host in &fleet {
//!     let client = host.client().clone();
//!     fanout::spawn_paged(host.clone(), /* fetch users */, limiter.clone(), tx.clone(), cancel.clone());
//! }
//! drop(tx);
//!
//! let rows = pipeline::from_channel(rx, &options).await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fanout;
pub mod gitlab;
pub mod hosts;
pub mod http;
pub mod index;
pub mod limiter;
pub mod pipeline;
pub mod retry;

pub use error::{Error, Result};
