//! Host registry.
//!
//! A `Host` is one configured GitLab instance, identified by
//! `team.project.name` and bound to its own authenticated REST client. The
//! registry is built once from the config: the filter regex selects hosts,
//! per-host DNS overrides are collected, and every client shares the single
//! process transport (and with it the disk cache). The registry is immutable
//! and stably ordered afterwards.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use regex::Regex;

use crate::cache::DiskCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gitlab::{CachePolicy, Client, Pacer, DEFAULT_RPS};
use crate::http::{CachingTransport, HttpTransport, ReqwestTransport};

/// One configured GitLab instance.
#[derive(Clone)]
pub struct Host {
    pub team: String,
    pub project: String,
    pub name: String,
    pub url: String,
    client: Client,
}

impl Host {
    /// `team.project.name` — the identity the filter regex matches.
    pub fn full_name(&self) -> String {
        format!("{}.{}.{}", self.team, self.project, self.name)
    }

    /// `project.name` — the short form shown in output tables.
    pub fn project_name(&self) -> String {
        format!("{}.{}", self.project, self.name)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("team", &self.team)
            .field("project", &self.project)
            .field("name", &self.name)
            .field("url", &self.url)
            .finish()
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.team == other.team
            && self.project == other.project
            && self.name == other.name
            && self.url == other.url
    }
}

impl Eq for Host {}

impl PartialOrd for Host {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Host {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.team, &self.project, &self.name).cmp(&(&other.team, &other.project, &other.name))
    }
}

/// The filtered, ordered fleet.
#[derive(Debug, Clone, Default)]
pub struct Hosts(Vec<Host>);

impl Hosts {
    pub fn iter(&self) -> std::slice::Iter<'_, Host> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Host> {
        self.0.first()
    }

    pub fn as_slice(&self) -> &[Host] {
        &self.0
    }

    /// Short project names for display: at most five sorted entries with a
    /// trailing `"..."` marker, or all of them when `all` is set.
    pub fn projects(&self, all: bool) -> Vec<String> {
        let mut k = self.0.len();
        if !all && k > 5 {
            k = 5;
        }
        let mut names: Vec<String> = self.0[..k].iter().map(Host::project_name).collect();
        names.sort();
        if !all && k == 5 && self.0.len() > 5 {
            names.push("...".to_string());
        }
        names
    }
}

impl<'a> IntoIterator for &'a Hosts {
    type Item = &'a Host;
    type IntoIter = std::slice::Iter<'a, Host>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Host> for Hosts {
    fn from_iter<I: IntoIterator<Item = Host>>(iter: I) -> Self {
        let mut hosts: Vec<Host> = iter.into_iter().collect();
        hosts.sort();
        Hosts(hosts)
    }
}

/// Build the host registry from the config.
///
/// `ttl_override` replaces the configured cache TTL (the `--ttl` and
/// `--update` flags); `Some(Some(0s))` forces revalidation everywhere.
pub fn build_registry(
    cfg: &Config,
    ttl_override: Option<Option<std::time::Duration>>,
) -> Result<Hosts> {
    let filter = Regex::new(&cfg.filter)
        .map_err(|e| Error::config(format!("invalid filter {:?}: {e}", cfg.filter)))?;

    // DNS overrides must be known before the shared transport is built.
    let mut overrides: HashMap<String, IpAddr> = HashMap::new();
    for (team, projects) in &cfg.hosts {
        for (project, names) in projects {
            for (name, entry) in names {
                if entry.ip.is_empty() {
                    continue;
                }
                let full_name = format!("{team}.{project}.{name}");
                if !filter.is_match(&full_name) {
                    continue;
                }
                let hostname = hostname_of(&entry.url)?;
                let addr: IpAddr = entry
                    .ip
                    .parse()
                    .map_err(|_| Error::config(format!("invalid ip for host {full_name:?}")))?;
                overrides.insert(hostname, addr);
            }
        }
    }

    let base: Arc<dyn HttpTransport> = Arc::new(
        ReqwestTransport::new(&overrides).map_err(|e| Error::Transport(e.to_string()))?,
    );
    let transport: Arc<dyn HttpTransport> = if cfg.cache.enabled {
        Arc::new(CachingTransport::new(base, DiskCache::open(&cfg.cache)?))
    } else {
        base
    };

    let policy = CachePolicy {
        enabled: cfg.cache.enabled,
        ttl: ttl_override.unwrap_or(cfg.cache.ttl),
    };

    build_with_transport(cfg, &filter, transport, policy)
}

/// Register hosts over an existing transport. Split out so tests can inject
/// a mock transport underneath real clients.
pub fn build_with_transport(
    cfg: &Config,
    filter: &Regex,
    transport: Arc<dyn HttpTransport>,
    policy: CachePolicy,
) -> Result<Hosts> {
    let mut hosts = Vec::new();

    for (team, projects) in &cfg.hosts {
        for (project, names) in projects {
            for (name, entry) in names {
                let full_name = format!("{team}.{project}.{name}");
                if !filter.is_match(&full_name) {
                    continue;
                }
                if entry.url.is_empty() {
                    return Err(Error::config(format!("missing url for host {full_name:?}")));
                }
                if entry.token.is_empty() {
                    return Err(Error::config(format!(
                        "missing token for host {full_name:?}"
                    )));
                }

                // Cached requests must not be throttled: pacing applies only
                // to hosts that ask for it.
                let pacer = if entry.rate_limiter.enabled {
                    Some(Pacer::new(DEFAULT_RPS))
                } else {
                    None
                };

                hosts.push(Host {
                    team: team.clone(),
                    project: project.clone(),
                    name: name.clone(),
                    url: entry.url.clone(),
                    client: Client::new(
                        &entry.url,
                        &entry.token,
                        Arc::clone(&transport),
                        policy.clone(),
                        pacer,
                    ),
                });
            }
        }
    }

    hosts.sort();
    Ok(Hosts(hosts))
}

fn hostname_of(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::config(format!("invalid url {url:?}: {e}")))?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| Error::config(format!("url {url:?} has no host")))
}

#[cfg(test)]
pub(crate) fn test_host(team: &str, project: &str, name: &str) -> Host {
    use crate::http::MockTransport;

    let url = format!("https://{name}.example.com");
    Host {
        team: team.to_string(),
        project: project.to_string(),
        name: name.to_string(),
        url: url.clone(),
        client: Client::new(
            &url,
            "glpat-test",
            Arc::new(MockTransport::new()),
            CachePolicy::default(),
            None,
        ),
    }
}

#[cfg(test)]
pub(crate) fn test_host_with(team: &str, project: &str, name: &str, client: Client) -> Host {
    Host {
        team: team.to_string(),
        project: project.to_string(),
        name: name.to_string(),
        url: client.base_url().to_string(),
        client,
    }
}
