//! Per-host GitLab REST v4 client.
//!
//! Every host in the registry owns one `Client` bound to its base URL and
//! token, all sharing the process-wide transport (and therefore the disk
//! cache and DNS overrides). Authentication uses the `PRIVATE-TOKEN` header;
//! selected calls accept a per-call token override for ownership flows.
//! Pagination follows the `X-Next-Page` / `X-Total-Pages` response headers
//! with `per_page=100`.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::http::{
    HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpTransport, WEAK_ETAG,
};
use crate::retry::with_retry;

use super::types::*;

/// Conservative default pacing for hosts that opt into client-side limiting.
pub const DEFAULT_RPS: u32 = 5;

const PER_PAGE: u32 = 100;

/// How a single request treats the HTTP cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Accept cached responses: freshness-bounded when a TTL is configured,
    /// any age otherwise.
    Cached,
    /// Force revalidation. The response still lands in the cache.
    Fresh,
}

/// Cache behaviour shared by every client of one fleet.
#[derive(Debug, Clone, Default)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    fn header_value(&self, mode: CacheMode) -> Option<String> {
        match mode {
            CacheMode::Fresh => Some("max-age=0".to_string()),
            CacheMode::Cached => {
                if !self.enabled {
                    return None;
                }
                match self.ttl {
                    Some(ttl) => Some(format!("max-age={}", ttl.as_secs())),
                    None => Some("max-stale".to_string()),
                }
            }
        }
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Client-side request pacing backed by governor.
#[derive(Clone)]
pub struct Pacer {
    inner: Arc<DirectLimiter>,
}

impl Pacer {
    pub fn new(requests_per_second: u32) -> Pacer {
        let rps = NonZeroU32::new(requests_per_second)
            .unwrap_or_else(|| NonZeroU32::new(1).expect("1 is non-zero"));
        Pacer {
            inner: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        }
    }

    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<u32>,
    pub total_pages: Option<u32>,
    /// True when this page was served from the local cache.
    pub cached: bool,
}

#[derive(Clone)]
pub struct Client {
    base: String,
    token: String,
    transport: Arc<dyn HttpTransport>,
    cache_policy: CachePolicy,
    pacer: Option<Pacer>,
}

impl Client {
    pub fn new(
        base_url: &str,
        token: &str,
        transport: Arc<dyn HttpTransport>,
        cache_policy: CachePolicy,
        pacer: Option<Pacer>,
    ) -> Client {
        Client {
            base: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            transport,
            cache_policy,
            pacer,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn api_url(&self, path: &str, query: &[(String, String)]) -> String {
        let mut url = format!("{}/api/v4/{}", self.base, path);
        let mut sep = '?';
        for (k, v) in query {
            url.push(sep);
            url.push_str(k);
            url.push('=');
            url.push_str(&urlencode(v));
            sep = '&';
        }
        url
    }

    fn headers(&self, mode: CacheMode, token_override: Option<&str>) -> HttpHeaders {
        let mut headers: HttpHeaders = vec![
            (
                "PRIVATE-TOKEN".to_string(),
                token_override.unwrap_or(&self.token).to_string(),
            ),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if let Some(value) = self.cache_policy.header_value(mode) {
            let validated = value != "max-stale";
            headers.push(("Cache-Control".to_string(), value));
            if validated {
                headers.push(("etag".to_string(), WEAK_ETAG.to_string()));
            }
        }
        headers
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        if let Some(pacer) = &self.pacer {
            pacer.wait().await;
        }
        let resp = with_retry(|| async {
            let resp = self
                .transport
                .send(request.clone())
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            if resp.status >= 500 {
                return Err(api_error(&resp));
            }
            Ok(resp)
        })
        .await?;

        if !(200..300).contains(&resp.status) {
            return Err(api_error(&resp));
        }
        Ok(resp)
    }

    async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
        mode: CacheMode,
        token_override: Option<&str>,
    ) -> Result<HttpResponse> {
        self.send(HttpRequest {
            method: HttpMethod::Get,
            url: self.api_url(path, query),
            headers: self.headers(mode, token_override),
            body: Vec::new(),
        })
        .await
    }

    async fn send_json<B: Serialize>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
        token_override: Option<&str>,
    ) -> Result<HttpResponse> {
        let mut headers = self.headers(CacheMode::Fresh, token_override);
        let body = match body {
            Some(b) => {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
                serde_json::to_vec(b).map_err(|e| Error::validation(e.to_string()))?
            }
            None => Vec::new(),
        };
        self.send(HttpRequest {
            method,
            url: self.api_url(path, &[]),
            headers,
            body,
        })
        .await
    }

    fn page_of<T: DeserializeOwned>(resp: HttpResponse) -> Result<Page<T>> {
        let cached = resp.from_cache();
        let next_page = header_u32(&resp, "X-Next-Page");
        let total_pages = header_u32(&resp, "X-Total-Pages");
        let items: Vec<T> = serde_json::from_slice(&resp.body)
            .map_err(|e| Error::validation(format!("cannot decode response: {e}")))?;
        Ok(Page {
            items,
            next_page,
            total_pages,
            cached,
        })
    }

    fn one_of<T: DeserializeOwned>(resp: HttpResponse) -> Result<(T, bool)> {
        let cached = resp.from_cache();
        let value: T = serde_json::from_slice(&resp.body)
            .map_err(|e| Error::validation(format!("cannot decode response: {e}")))?;
        Ok((value, cached))
    }

    fn paged_query(query: &ListQuery, page: u32) -> Vec<(String, String)> {
        let mut q = query.to_query();
        q.push(("per_page".to_string(), PER_PAGE.to_string()));
        q.push(("page".to_string(), page.to_string()));
        q
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn list_users(
        &self,
        query: &ListQuery,
        page: u32,
        mode: CacheMode,
    ) -> Result<Page<User>> {
        let resp = self
            .get("users", &Self::paged_query(query, page), mode, None)
            .await?;
        Self::page_of(resp)
    }

    /// The user whose token authenticates the call. `token_override` lets
    /// ownership flows validate a different token.
    pub async fn current_user(
        &self,
        mode: CacheMode,
        token_override: Option<&str>,
    ) -> Result<(User, bool)> {
        let resp = self.get("user", &[], mode, token_override).await?;
        Self::one_of(resp)
    }

    pub async fn create_user(&self, opts: &CreateUserOptions) -> Result<(User, bool)> {
        let resp = self
            .send_json(HttpMethod::Post, "users", Some(opts), None)
            .await?;
        Self::one_of(resp)
    }

    pub async fn modify_user(&self, id: u64, opts: &ModifyUserOptions) -> Result<(User, bool)> {
        let resp = self
            .send_json(HttpMethod::Put, &format!("users/{id}"), Some(opts), None)
            .await?;
        Self::one_of(resp)
    }

    pub async fn block_user(&self, id: u64) -> Result<()> {
        self.send_json::<()>(HttpMethod::Post, &format!("users/{id}/block"), None, None)
            .await?;
        Ok(())
    }

    pub async fn delete_user(&self, id: u64, hard_delete: bool) -> Result<()> {
        let path = if hard_delete {
            format!("users/{id}?hard_delete=true")
        } else {
            format!("users/{id}")
        };
        self.send_json::<()>(HttpMethod::Delete, &path, None, None)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    pub async fn list_projects(
        &self,
        query: &ListQuery,
        page: u32,
        mode: CacheMode,
    ) -> Result<Page<Project>> {
        let resp = self
            .get("projects", &Self::paged_query(query, page), mode, None)
            .await?;
        Self::page_of(resp)
    }

    pub async fn project_languages(
        &self,
        project_id: u64,
        mode: CacheMode,
    ) -> Result<(std::collections::BTreeMap<String, f64>, bool)> {
        let resp = self
            .get(&format!("projects/{project_id}/languages"), &[], mode, None)
            .await?;
        Self::one_of(resp)
    }

    // ------------------------------------------------------------------
    // Branches
    // ------------------------------------------------------------------

    pub async fn list_branches(
        &self,
        project_id: u64,
        page: u32,
        mode: CacheMode,
    ) -> Result<Page<Branch>> {
        let resp = self
            .get(
                &format!("projects/{project_id}/repository/branches"),
                &Self::paged_query(&ListQuery::default(), page),
                mode,
                None,
            )
            .await?;
        Self::page_of(resp)
    }

    pub async fn list_protected_branches(
        &self,
        project_id: u64,
        page: u32,
        mode: CacheMode,
    ) -> Result<Page<ProtectedBranch>> {
        let resp = self
            .get(
                &format!("projects/{project_id}/protected_branches"),
                &Self::paged_query(&ListQuery::default(), page),
                mode,
                None,
            )
            .await?;
        Self::page_of(resp)
    }

    pub async fn protect_branch(
        &self,
        project_id: u64,
        opts: &ProtectBranchOptions,
    ) -> Result<(ProtectedBranch, bool)> {
        let resp = self
            .send_json(
                HttpMethod::Post,
                &format!("projects/{project_id}/protected_branches"),
                Some(opts),
                None,
            )
            .await?;
        Self::one_of(resp)
    }

    pub async fn unprotect_branch(&self, project_id: u64, name: &str) -> Result<()> {
        self.send_json::<()>(
            HttpMethod::Delete,
            &format!(
                "projects/{project_id}/protected_branches/{}",
                urlencode(name)
            ),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Merge requests
    // ------------------------------------------------------------------

    pub async fn list_project_merge_requests(
        &self,
        project_id: u64,
        query: &ListQuery,
        page: u32,
        mode: CacheMode,
    ) -> Result<Page<MergeRequest>> {
        let resp = self
            .get(
                &format!("projects/{project_id}/merge_requests"),
                &Self::paged_query(query, page),
                mode,
                None,
            )
            .await?;
        Self::page_of(resp)
    }

    // ------------------------------------------------------------------
    // Pipeline schedules
    // ------------------------------------------------------------------

    pub async fn list_pipeline_schedules(
        &self,
        project_id: u64,
        page: u32,
        mode: CacheMode,
    ) -> Result<Page<PipelineSchedule>> {
        let resp = self
            .get(
                &format!("projects/{project_id}/pipeline_schedules"),
                &Self::paged_query(&ListQuery::default(), page),
                mode,
                None,
            )
            .await?;
        Self::page_of(resp)
    }

    /// Take ownership of a schedule on behalf of the override token's user.
    pub async fn take_schedule_ownership(
        &self,
        project_id: u64,
        schedule_id: u64,
        token_override: Option<&str>,
    ) -> Result<(PipelineSchedule, bool)> {
        let resp = self
            .send_json::<()>(
                HttpMethod::Post,
                &format!("projects/{project_id}/pipeline_schedules/{schedule_id}/take_ownership"),
                None,
                token_override,
            )
            .await?;
        Self::one_of(resp)
    }

    pub async fn create_pipeline_schedule(
        &self,
        project_id: u64,
        opts: &CreatePipelineScheduleOptions,
        token_override: Option<&str>,
    ) -> Result<(PipelineSchedule, bool)> {
        let resp = self
            .send_json(
                HttpMethod::Post,
                &format!("projects/{project_id}/pipeline_schedules"),
                Some(opts),
                token_override,
            )
            .await?;
        Self::one_of(resp)
    }

    // ------------------------------------------------------------------
    // Repository files
    // ------------------------------------------------------------------

    /// Fetch a raw repository file. Returns `Ok(None)` when the file does
    /// not exist on the ref (a common, non-erroneous outcome when sweeping a
    /// fleet for a config file).
    pub async fn raw_file(
        &self,
        project_id: u64,
        file_path: &str,
        git_ref: &str,
        mode: CacheMode,
    ) -> Result<Option<(String, bool)>> {
        let path = format!(
            "projects/{project_id}/repository/files/{}/raw",
            urlencode(file_path)
        );
        let query = vec![("ref".to_string(), git_ref.to_string())];
        match self.get(&path, &query, mode, None).await {
            Ok(resp) => {
                let cached = resp.from_cache();
                Ok(Some((
                    String::from_utf8_lossy(&resp.body).into_owned(),
                    cached,
                )))
            }
            Err(Error::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Container registry
    // ------------------------------------------------------------------

    pub async fn list_registry_repositories(
        &self,
        project_id: u64,
        include_size: bool,
        page: u32,
        mode: CacheMode,
    ) -> Result<Page<RegistryRepository>> {
        let mut query = vec![("tags_count".to_string(), "true".to_string())];
        if include_size {
            query.push(("size".to_string(), "true".to_string()));
        }
        query.push(("per_page".to_string(), PER_PAGE.to_string()));
        query.push(("page".to_string(), page.to_string()));
        let resp = self
            .get(
                &format!("projects/{project_id}/registry/repositories"),
                &query,
                mode,
                None,
            )
            .await?;
        Self::page_of(resp)
    }

    // ------------------------------------------------------------------
    // Tokens and version
    // ------------------------------------------------------------------

    pub async fn list_personal_access_tokens(
        &self,
        page: u32,
        mode: CacheMode,
    ) -> Result<Page<PersonalAccessToken>> {
        let resp = self
            .get(
                "personal_access_tokens",
                &Self::paged_query(&ListQuery::default(), page),
                mode,
                None,
            )
            .await?;
        Self::page_of(resp)
    }

    pub async fn version(&self, mode: CacheMode) -> Result<(Version, bool)> {
        let resp = self.get("version", &[], mode, None).await?;
        Self::one_of(resp)
    }
}

fn api_error(resp: &HttpResponse) -> Error {
    // GitLab error bodies are {"message": ...} or {"error": ...}.
    let message = serde_json::from_slice::<serde_json::Value>(&resp.body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| String::from_utf8_lossy(&resp.body).into_owned());
    Error::Api {
        status: resp.status,
        message,
    }
}

fn header_u32(resp: &HttpResponse, name: &str) -> Option<u32> {
    resp.header(name)
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
}

/// Percent-encode everything outside the RFC 3986 unreserved set. Also used
/// for path components, so `/` encodes to `%2F` (project file paths).
pub fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Request options
// ---------------------------------------------------------------------------

/// Pass-through query parameters for listing endpoints.
///
/// Listing endpoints across the API accept different filters; rather than
/// enumerate every upstream field, commands populate the pairs they expose
/// as flags and the client forwards them untouched (in insertion order, so
/// cache keys stay stable).
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    params: Vec<(String, String)>,
}

impl ListQuery {
    pub fn new() -> ListQuery {
        ListQuery::default()
    }

    pub fn set(mut self, key: &str, value: impl ToString) -> ListQuery {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn set_opt(mut self, key: &str, value: Option<impl ToString>) -> ListQuery {
        if let Some(v) = value {
            self.params.push((key.to_string(), v.to_string()));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    fn to_query(&self) -> Vec<(String, String)> {
        self.params.clone()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateUserOptions {
    pub email: String,
    pub username: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_password: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_random_password: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_confirmation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModifyUserOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Access grant for `allowed_to_push` / `allowed_to_merge` /
/// `allowed_to_unprotect`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BranchPermission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u64>,
    pub access_level: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProtectBranchOptions {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_access_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_access_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unprotect_access_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_force_push: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_owner_approval_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_to_push: Option<Vec<BranchPermission>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_to_merge: Option<Vec<BranchPermission>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_to_unprotect: Option<Vec<BranchPermission>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreatePipelineScheduleOptions {
    pub description: String,
    #[serde(rename = "ref")]
    pub schedule_ref: String,
    pub cron: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;

    fn client_with(transport: &MockTransport, policy: CachePolicy) -> Client {
        Client::new(
            "https://gitlab.example.com/",
            "glpat-test",
            Arc::new(transport.clone()),
            policy,
            None,
        )
    }

    #[test]
    fn urlencode_escapes_path_separators() {
        assert_eq!(urlencode("werf.yaml"), "werf.yaml");
        assert_eq!(urlencode("config/werf.yaml"), "config%2Fwerf.yaml");
        assert_eq!(urlencode("a b"), "a%20b");
    }

    #[test]
    fn cache_header_reflects_policy() {
        let none = CachePolicy {
            enabled: false,
            ttl: None,
        };
        assert_eq!(none.header_value(CacheMode::Cached), None);
        assert_eq!(
            none.header_value(CacheMode::Fresh),
            Some("max-age=0".to_string())
        );

        let stale = CachePolicy {
            enabled: true,
            ttl: None,
        };
        assert_eq!(
            stale.header_value(CacheMode::Cached),
            Some("max-stale".to_string())
        );

        let bounded = CachePolicy {
            enabled: true,
            ttl: Some(Duration::from_secs(86400)),
        };
        assert_eq!(
            bounded.header_value(CacheMode::Cached),
            Some("max-age=86400".to_string())
        );

        // A zero TTL (the --update flag) forces revalidation everywhere.
        let refresh = CachePolicy {
            enabled: true,
            ttl: Some(Duration::ZERO),
        };
        assert_eq!(
            refresh.header_value(CacheMode::Cached),
            Some("max-age=0".to_string())
        );
    }

    #[tokio::test]
    async fn list_users_parses_pagination_headers() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            "https://gitlab.example.com/api/v4/users?per_page=100&page=1",
            r#"[{"id": 1, "username": "root", "name": "Administrator"}]"#,
            &[("X-Next-Page", "2"), ("X-Total-Pages", "3")],
        );

        let client = client_with(&transport, CachePolicy::default());
        let page = client
            .list_users(&ListQuery::default(), 1, CacheMode::Cached)
            .await
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].username, "root");
        assert_eq!(page.next_page, Some(2));
        assert_eq!(page.total_pages, Some(3));
        assert!(!page.cached);
    }

    #[tokio::test]
    async fn requests_carry_token_and_cache_mode() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            "https://gitlab.example.com/api/v4/user",
            r#"{"id": 1, "username": "root", "name": "Administrator"}"#,
            &[],
        );

        let client = client_with(
            &transport,
            CachePolicy {
                enabled: true,
                ttl: None,
            },
        );
        client
            .current_user(CacheMode::Cached, None)
            .await
            .unwrap();
        client
            .current_user(CacheMode::Fresh, Some("glpat-other"))
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(
            crate::http::header_get(&requests[0].headers, "PRIVATE-TOKEN"),
            Some("glpat-test")
        );
        assert_eq!(
            crate::http::header_get(&requests[0].headers, "Cache-Control"),
            Some("max-stale")
        );
        assert_eq!(
            crate::http::header_get(&requests[1].headers, "PRIVATE-TOKEN"),
            Some("glpat-other")
        );
        assert_eq!(
            crate::http::header_get(&requests[1].headers, "Cache-Control"),
            Some("max-age=0")
        );
        assert_eq!(
            crate::http::header_get(&requests[1].headers, "etag"),
            Some(WEAK_ETAG)
        );
    }

    #[tokio::test]
    async fn api_errors_surface_status_and_message() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            "https://gitlab.example.com/api/v4/user",
            HttpResponse {
                status: 403,
                headers: Vec::new(),
                body: br#"{"message": "403 Forbidden"}"#.to_vec(),
            },
        );

        let client = client_with(&transport, CachePolicy::default());
        let err = client
            .current_user(CacheMode::Cached, None)
            .await
            .unwrap_err();
        match err {
            Error::Api { status, message } => {
                assert_eq!(status, 403);
                assert!(message.contains("Forbidden"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_raw_file_is_none_not_error() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            "https://gitlab.example.com/api/v4/projects/7/repository/files/werf.yaml/raw?ref=main",
            HttpResponse {
                status: 404,
                headers: Vec::new(),
                body: br#"{"message": "404 File Not Found"}"#.to_vec(),
            },
        );

        let client = client_with(&transport, CachePolicy::default());
        let got = client
            .raw_file(7, "werf.yaml", "main", CacheMode::Cached)
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn create_user_posts_json_body() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            "https://gitlab.example.com/api/v4/users",
            r#"{"id": 5, "username": "newbie", "name": "New User"}"#,
            &[],
        );

        let client = client_with(&transport, CachePolicy::default());
        let opts = CreateUserOptions {
            email: "newbie@example.com".to_string(),
            username: "newbie".to_string(),
            name: "New User".to_string(),
            reset_password: Some(true),
            ..Default::default()
        };
        let (user, cached) = client.create_user(&opts).await.unwrap();
        assert_eq!(user.id, 5);
        assert!(!cached);

        let body: serde_json::Value =
            serde_json::from_slice(&transport.requests()[0].body).unwrap();
        assert_eq!(body["username"], "newbie");
        assert_eq!(body["reset_password"], true);
        assert!(body.get("password").is_none());
    }
}
