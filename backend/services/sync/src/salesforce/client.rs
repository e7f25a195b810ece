use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use tokio::sync::RwLock;

use tidemark_common::error::{TidemarkError, TidemarkResult};
use tidemark_common::record::SourceRecord;

use super::models::{ApiError, QueryPage, TokenResponse};

#[derive(Debug, Clone)]
pub struct SalesforceClientConfig {
    pub login_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_version: String,
    pub include_deleted: bool,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl SalesforceClientConfig {
    /// Load Salesforce config from environment.
    ///
    /// Login URL and client credentials are mandatory.
    pub fn from_env() -> TidemarkResult<Self> {
        let login_url = required_var("SF_LOGIN_URL")?;
        let client_id = required_var("SF_CLIENT_ID")?;
        let client_secret = required_var("SF_CLIENT_SECRET")?;

        let api_version =
            std::env::var("SF_API_VERSION").unwrap_or_else(|_| "59.0".to_string());
        let include_deleted = std::env::var("SF_INCLUDE_DELETED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);
        let max_retries = std::env::var("SF_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let timeout_secs = std::env::var("SF_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            login_url: login_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            api_version,
            include_deleted,
            max_retries,
            timeout_secs,
        })
    }
}

fn required_var(key: &str) -> TidemarkResult<String> {
    std::env::var(key)
        .map_err(|_| TidemarkError::Config(format!("{key} is required but not set")))
}

#[derive(Debug, thiserror::Error)]
pub enum SalesforceClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("not authenticated: {0}")]
    Unauthenticated(String),
}

impl From<SalesforceClientError> for TidemarkError {
    fn from(err: SalesforceClientError) -> Self {
        match err {
            SalesforceClientError::Unauthenticated(msg) => TidemarkError::Authentication(msg),
            other => TidemarkError::Extraction(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    instance_url: String,
}

/// Salesforce REST client: OAuth client-credentials login and paginated SOQL.
pub struct SalesforceClient {
    client: Client,
    config: SalesforceClientConfig,
    session: RwLock<Option<Session>>,
}

impl SalesforceClient {
    pub fn new(config: SalesforceClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            session: RwLock::new(None),
        })
    }

    /// Exchange the client credentials for a bearer token.
    ///
    /// Safe to call again after the token expired; the new token replaces the old.
    pub async fn authenticate(&self) -> TidemarkResult<()> {
        match self.fetch_token().await {
            Ok(session) => {
                tracing::info!(instance_url = %session.instance_url, "salesforce authenticated");
                *self.session.write().await = Some(session);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "salesforce authentication failed");
                *self.session.write().await = None;
                Err(TidemarkError::Authentication(e.to_string()))
            }
        }
    }

    async fn fetch_token(&self) -> Result<Session, SalesforceClientError> {
        let url = format!("{}/services/oauth2/token", self.config.login_url);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SalesforceClientError::HttpError { status, body });
        }

        let token: TokenResponse = response.json().await?;
        Ok(Session {
            access_token: token.access_token,
            instance_url: token
                .instance_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| self.config.login_url.clone()),
        })
    }

    async fn session(&self) -> TidemarkResult<Session> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        self.authenticate().await?;
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| TidemarkError::Authentication("no session after login".to_string()))
    }

    fn query_path(&self) -> String {
        let endpoint = if self.config.include_deleted {
            "queryAll"
        } else {
            "query"
        };
        format!("/services/data/v{}/{endpoint}", self.config.api_version)
    }

    /// Lazily page through the result of `soql`, `page_size` records at a time.
    ///
    /// Each call starts the query from scratch.
    pub fn query_batches(&self, soql: &str, page_size: u32) -> QueryBatches<'_> {
        QueryBatches {
            client: self,
            page_size,
            state: PageState::Start(soql.trim().to_string()),
            pages: 0,
            fetched: 0,
        }
    }

    /// Collect every page of `soql` into memory.
    #[allow(dead_code)]
    pub async fn query_all(&self, soql: &str, page_size: u32) -> TidemarkResult<Vec<SourceRecord>> {
        let mut batches = self.query_batches(soql, page_size);
        let mut all = Vec::new();
        while let Some(batch) = batches.next_batch().await {
            all.extend(batch?);
        }
        Ok(all)
    }

    /// Fetch one page, refreshing the token once on 401.
    async fn fetch_page(
        &self,
        request: &PageRequest,
        page_size: u32,
    ) -> Result<QueryPage, SalesforceClientError> {
        let session = self
            .session()
            .await
            .map_err(|e| SalesforceClientError::Unauthenticated(e.to_string()))?;

        match self.request_with_retry(&session, request, page_size).await {
            Err(SalesforceClientError::HttpError { status, .. })
                if status == StatusCode::UNAUTHORIZED =>
            {
                tracing::warn!("salesforce token rejected, re-authenticating");
                self.authenticate()
                    .await
                    .map_err(|e| SalesforceClientError::Unauthenticated(e.to_string()))?;
                let session = self
                    .session()
                    .await
                    .map_err(|e| SalesforceClientError::Unauthenticated(e.to_string()))?;
                self.request_with_retry(&session, request, page_size).await
            }
            other => other,
        }
    }

    fn build_request(&self, session: &Session, request: &PageRequest, page_size: u32) -> RequestBuilder {
        let builder = match request {
            PageRequest::Query(soql) => self
                .client
                .get(format!("{}{}", session.instance_url, self.query_path()))
                .query(&[("q", soql.as_str())]),
            PageRequest::Next(path) => self
                .client
                .get(format!("{}{}", session.instance_url, path)),
        };
        builder
            .bearer_auth(&session.access_token)
            .header("Sforce-Query-Options", format!("batchSize={page_size}"))
    }

    /// Issue one page request, retrying transient failures up to `max_retries` times.
    async fn request_with_retry(
        &self,
        session: &Session,
        request: &PageRequest,
        page_size: u32,
    ) -> Result<QueryPage, SalesforceClientError> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let wait = retry_backoff(attempt);
                tracing::warn!(attempt, wait_secs = wait.as_secs(), %last_error, "retrying page request");
                tokio::time::sleep(wait).await;
            }

            match self.attempt_page(session, request, page_size).await {
                PageAttempt::Page(page) => return Ok(page),
                PageAttempt::Fatal(e) => return Err(e),
                PageAttempt::Transient { reason, retry_after } => {
                    last_error = reason;
                    // Retry-After only matters when another attempt follows.
                    if let Some(wait) = retry_after.filter(|_| attempt + 1 < attempts) {
                        tracing::warn!(wait_secs = wait.as_secs(), "salesforce asked to slow down");
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        Err(SalesforceClientError::MaxRetriesExceeded {
            attempts,
            last_error,
        })
    }

    async fn attempt_page(
        &self,
        session: &Session,
        request: &PageRequest,
        page_size: u32,
    ) -> PageAttempt {
        let response = match self.build_request(session, request, page_size).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return PageAttempt::Transient {
                    reason: e.to_string(),
                    retry_after: None,
                }
            }
            Err(e) => return PageAttempt::Fatal(e.into()),
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)));

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return PageAttempt::Fatal(e.into()),
        };

        if status.is_success() {
            return match serde_json::from_str::<QueryPage>(&body) {
                Ok(page) => PageAttempt::Page(page),
                Err(e) => PageAttempt::Fatal(SalesforceClientError::Decode(e.to_string())),
            };
        }

        let errors = ApiError::parse_body(&body);
        let limited = status == StatusCode::TOO_MANY_REQUESTS
            || errors.iter().any(|e| e.error_code == REQUEST_LIMIT_EXCEEDED);

        if limited || status.is_server_error() {
            return PageAttempt::Transient {
                reason: format!("{status}: {}", ApiError::summarize(&errors, &body)),
                retry_after,
            };
        }

        PageAttempt::Fatal(SalesforceClientError::HttpError {
            status,
            body: ApiError::summarize(&errors, &body),
        })
    }
}

const MAX_BACKOFF_SECS: u64 = 30;
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Org-wide API quota exhausted; Salesforce reports it as 403 with this code.
const REQUEST_LIMIT_EXCEEDED: &str = "REQUEST_LIMIT_EXCEEDED";

/// Exponential backoff before retry number `attempt`, capped.
fn retry_backoff(attempt: u32) -> Duration {
    let secs = 1u64
        .checked_shl(attempt)
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// Result of a single page request.
enum PageAttempt {
    Page(QueryPage),
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    Fatal(SalesforceClientError),
}

#[derive(Debug)]
enum PageRequest {
    Query(String),
    Next(String),
}

#[derive(Debug)]
enum PageState {
    Start(String),
    Next(String),
    /// Last page claimed more to come without a continuation.
    Truncated,
    Done,
    Failed,
}

/// Finite, non-restartable sequence of record batches.
///
/// One page is in flight at a time. A failed page request, or a page that is
/// not done but carries no continuation, ends the sequence: the error is
/// yielded once and every later call returns `None`.
pub struct QueryBatches<'a> {
    client: &'a SalesforceClient,
    page_size: u32,
    state: PageState,
    pages: usize,
    fetched: usize,
}

impl QueryBatches<'_> {
    /// Next non-empty batch, `None` once the source reports completion.
    pub async fn next_batch(&mut self) -> Option<TidemarkResult<Vec<SourceRecord>>> {
        loop {
            let request = match std::mem::replace(&mut self.state, PageState::Done) {
                PageState::Start(soql) => PageRequest::Query(soql),
                PageState::Next(path) => PageRequest::Next(path),
                PageState::Done => return None,
                PageState::Failed => {
                    self.state = PageState::Failed;
                    return None;
                }
                PageState::Truncated => {
                    self.state = PageState::Failed;
                    return Some(Err(TidemarkError::Extraction(format!(
                        "page {} not done but no continuation given after {} records",
                        self.pages, self.fetched
                    ))));
                }
            };

            let page = match self.client.fetch_page(&request, self.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    self.state = PageState::Failed;
                    tracing::error!(
                        page = self.pages + 1,
                        fetched = self.fetched,
                        error = %e,
                        "salesforce page request failed"
                    );
                    return Some(Err(e.into()));
                }
            };

            self.pages += 1;
            self.fetched += page.records.len();

            self.state = match (page.done, page.next_records_url) {
                (false, Some(next)) => PageState::Next(next),
                (false, None) => {
                    tracing::error!(
                        page = self.pages,
                        fetched = self.fetched,
                        total = page.total_size,
                        "page not done but no continuation given"
                    );
                    PageState::Truncated
                }
                (true, _) => PageState::Done,
            };

            tracing::info!(
                page = self.pages,
                records = page.records.len(),
                fetched = self.fetched,
                total = page.total_size,
                "fetched salesforce page"
            );

            if !page.records.is_empty() {
                return Some(Ok(page.records));
            }
        }
    }
}
