//! Snowflake client module
//!
//! Provides [`SnowflakeClient`] for executing statements through the
//! Snowflake SQL API (`/api/v2/statements`).

use super::Auth;
use super::transfer::StageUploader;
use super::store::{ResultSet, Warehouse, WarehouseSession};
use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

const STATEMENTS_PATH: &str = "api/v2/statements";

/// Server-side statement timeout unless configured otherwise
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Session defaults sent with every statement
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatementContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(flatten)]
    context: &'a StatementContext,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
    statement_handle: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<PartitionInfo>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PartitionInfo {}

#[derive(Debug)]
enum Outcome {
    Done(StatementResponse),
    Pending(String),
}

fn parse_outcome(status: StatusCode, body: &str) -> Result<Outcome> {
    match status {
        StatusCode::OK => {
            let response = serde_json::from_str(body).context("Invalid statement response")?;
            Ok(Outcome::Done(response))
        }
        StatusCode::ACCEPTED => {
            let response: StatementResponse =
                serde_json::from_str(body).context("Invalid statement status response")?;
            let handle = response
                .statement_handle
                .ok_or_else(|| eyre!("Statement accepted without a handle"))?;
            Ok(Outcome::Pending(handle))
        }
        _ => {
            let message = serde_json::from_str::<StatementResponse>(body)
                .ok()
                .and_then(|r| r.message)
                .unwrap_or_else(|| body.to_string());
            eyre::bail!("Statement failed ({}): {}", status, message)
        }
    }
}

/// `PUT` statement transferring a local file into a named stage
pub fn put_statement(file: &Path, stage: &str) -> String {
    format!(
        "PUT 'file://{}' @{} AUTO_COMPRESS = TRUE OVERWRITE = TRUE;",
        file.display(),
        stage
    )
}

/// Snowflake SQL API client.
///
/// Every statement is a `POST /api/v2/statements`. Statements that outlive
/// the synchronous window come back as `202 Accepted` and are polled until
/// they finish; multi-partition results are fetched partition by partition.
/// Files are uploaded into stages through a [`StageUploader`] sharing the
/// same account and credential.
///
/// # Example
/// ```no_run
/// use articles_etl::client::{Auth, SnowflakeClient};
/// use url::Url;
///
/// # async fn example() -> eyre::Result<()> {
/// let url = Url::parse("https://myorg-myaccount.snowflakecomputing.com")?;
/// let client = SnowflakeClient::try_new(url, Auth::OAuth("token".into()))?;
///
/// let count = client.execute("SELECT COUNT(*) FROM articles;").await?.count()?;
/// println!("{} rows", count);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct SnowflakeClient {
    client: Client,
    url: Url,
    context: StatementContext,
    timeout: Duration,
    poll_interval: Duration,
    uploader: StageUploader,
}

impl SnowflakeClient {
    /// Create a client for an account URL
    ///
    /// # Errors
    /// Returns an error if the credential is not a valid header value or the
    /// HTTP client cannot be built
    pub fn try_new(url: Url, auth: Auth) -> Result<Self> {
        let uploader = StageUploader::new(url.clone(), auth.clone())?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {}", auth.token()).parse()?);
        headers.insert(
            "x-snowflake-authorization-token-type",
            auth.token_type().parse()?,
        );
        headers.insert(ACCEPT, "application/json".parse()?);
        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            url,
            context: StatementContext::default(),
            timeout: DEFAULT_STATEMENT_TIMEOUT,
            poll_interval: Duration::from_secs(1),
            uploader,
        })
    }

    pub fn with_context(mut self, context: StatementContext) -> Self {
        self.uploader = self.uploader.with_context(context.clone());
        self.context = context;
        self
    }

    /// Login name and account used when opening upload sessions
    pub fn with_login(mut self, user: Option<String>, account: Option<String>) -> Self {
        self.uploader = self.uploader.with_user(user);
        if let Some(account) = account {
            self.uploader = self.uploader.with_account(account);
        }
        self
    }

    /// Server-side statement timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn context(&self) -> &StatementContext {
        &self.context
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn uploader(&self) -> &StageUploader {
        &self.uploader
    }

    /// Verify the account is reachable and the credential is accepted
    pub async fn test_connection(&self) -> Result<()> {
        self.execute("SELECT 1;").await.map(|_| ())
    }

    /// Execute one statement and collect its full result set
    pub async fn execute(&self, statement: &str) -> Result<ResultSet> {
        log::debug!("Executing on {}: {}", self.url, statement.trim());
        let body = StatementRequest {
            statement,
            timeout: self.timeout.as_secs(),
            context: &self.context,
        };
        let response = self
            .client
            .post(self.url.join(STATEMENTS_PATH)?)
            .json(&body)
            .send()
            .await
            .map_err(|e| eyre!("Failed to send statement: {}", e))?;

        let mut outcome = Self::read_outcome(response).await?;
        let response = loop {
            match outcome {
                Outcome::Done(response) => break response,
                Outcome::Pending(handle) => {
                    log::trace!("Statement {} still running", handle);
                    tokio::time::sleep(self.poll_interval).await;
                    let response = self
                        .client
                        .get(self.statement_url(&handle)?)
                        .send()
                        .await
                        .map_err(|e| eyre!("Failed to poll statement {}: {}", handle, e))?;
                    outcome = Self::read_outcome(response).await?;
                }
            }
        };

        self.collect(response).await
    }

    fn statement_url(&self, handle: &str) -> Result<Url> {
        Ok(self.url.join(&format!("{}/{}", STATEMENTS_PATH, handle))?)
    }

    async fn read_outcome(response: reqwest::Response) -> Result<Outcome> {
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read statement response")?;
        parse_outcome(status, &body)
    }

    /// Gather the first partition plus any remaining ones
    async fn collect(&self, response: StatementResponse) -> Result<ResultSet> {
        let meta = response.result_set_meta_data.unwrap_or_default();
        let columns = meta.row_type.into_iter().map(|r| r.name).collect();
        let mut rows = response.data;

        if meta.partition_info.len() > 1 {
            let handle = response
                .statement_handle
                .ok_or_else(|| eyre!("Partitioned result without a statement handle"))?;
            for partition in 1..meta.partition_info.len() {
                log::trace!("Fetching partition {} of {}", partition, handle);
                let response = self
                    .client
                    .get(self.statement_url(&handle)?)
                    .query(&[("partition", partition)])
                    .send()
                    .await
                    .map_err(|e| eyre!("Failed to fetch partition {}: {}", partition, e))?;
                match Self::read_outcome(response).await? {
                    Outcome::Done(part) => rows.extend(part.data),
                    Outcome::Pending(_) => {
                        eyre::bail!("Partition {} of {} is not ready", partition, handle)
                    }
                }
            }
        }

        Ok(ResultSet::new(columns, rows))
    }
}

impl std::fmt::Display for SnowflakeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.context.database {
            Some(database) => write!(f, "{} (database: {})", self.url, database),
            None => write!(f, "{}", self.url),
        }
    }
}

/// Stage-scoped handle on the SQL API
///
/// The SQL API is stateless, so opening a session costs nothing; the handle
/// exists to bound the lifetime of destination access to one stage. Uploads
/// open their own short-lived login session.
pub struct SnowflakeSession {
    client: SnowflakeClient,
}

impl Drop for SnowflakeSession {
    fn drop(&mut self) {
        log::debug!("Closing warehouse session on {}", self.client.url);
    }
}

#[async_trait]
impl Warehouse for SnowflakeClient {
    type Session = SnowflakeSession;

    async fn connect(&self) -> Result<SnowflakeSession> {
        log::debug!("Opening warehouse session on {}", self);
        Ok(SnowflakeSession {
            client: self.clone(),
        })
    }
}

#[async_trait]
impl WarehouseSession for SnowflakeSession {
    async fn execute(&self, sql: &str) -> Result<ResultSet> {
        self.client.execute(sql).await
    }

    async fn put(&self, file: &Path, stage: &str) -> Result<()> {
        self.client
            .uploader
            .upload(file, stage)
            .await
            .with_context(|| format!("Failed to upload {} to @{}", file.display(), stage))
    }
}
