//! Stage uploads
//!
//! The SQL API refuses `PUT`, so a file reaches a stage the way the Snowflake
//! drivers move it: open a session, submit the `PUT` through the session query
//! endpoint to learn where the stage keeps its files, then write the file
//! straight into that cloud location.

use super::Auth;
use super::snowflake::{StatementContext, put_statement};
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use eyre::{Context, Result, bail, eyre};
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use url::Url;
use uuid::Uuid;

const LOGIN_PATH: &str = "session/v1/login-request";
const QUERY_PATH: &str = "queries/v1/query-request";
const SESSION_PATH: &str = "session";
const SNOWFLAKE_ACCEPT: &str = "application/snowflake";

#[derive(Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginData<'a> {
    client_app_id: &'a str,
    client_app_version: &'a str,
    account_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    login_name: Option<&'a str>,
    authenticator: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    data: LoginData<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    sql_text: &'a str,
    async_exec: bool,
    sequence_id: u64,
    query_submission_time: i64,
}

/// Response wrapper shared by the session endpoints
#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<serde_json::Value>,
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    success: bool,
}

impl Envelope {
    fn ensure_success(&self, what: &str) -> Result<()> {
        if self.success {
            return Ok(());
        }
        bail!(
            "{} failed ({}): {}",
            what,
            self.code.as_deref().unwrap_or("no code"),
            self.message.as_deref().unwrap_or("no message")
        )
    }

    fn into_data<T: DeserializeOwned>(self, what: &str) -> Result<T> {
        self.ensure_success(what)?;
        let data = self
            .data
            .ok_or_else(|| eyre!("{} response carried no data", what))?;
        serde_json::from_value(data).with_context(|| format!("Invalid {} response", what))
    }
}

#[derive(Debug, Deserialize)]
struct SessionData {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadCommand {
    command: Option<String>,
    #[serde(default)]
    auto_compress: bool,
    encryption_material: Option<serde_json::Value>,
    stage_info: StageInfo,
}

/// Cloud location behind a stage, as reported for a `PUT`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageInfo {
    location_type: String,
    /// Bucket or container, then the stage prefix
    location: String,
    region: Option<String>,
    end_point: Option<String>,
    storage_account: Option<String>,
    presigned_url: Option<String>,
    #[serde(default)]
    creds: HashMap<String, serde_json::Value>,
}

impl StageInfo {
    fn cred(&self, key: &str) -> Option<&str> {
        self.creds
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    fn end_point(&self) -> Option<&str> {
        self.end_point.as_deref().filter(|e| !e.is_empty())
    }

    /// Split the location into its container and the object key for `name`
    fn target(&self, name: &str) -> (&str, String) {
        let (container, prefix) = self
            .location
            .split_once('/')
            .unwrap_or((self.location.as_str(), ""));
        let key = if prefix.is_empty() || prefix.ends_with('/') {
            format!("{}{}", prefix, name)
        } else {
            format!("{}/{}", prefix, name)
        };
        (container, key)
    }
}

fn session_header(token: &str) -> String {
    format!("Snowflake Token=\"{}\"", token)
}

/// Base URL for a storage endpoint. Endpoints carrying a scheme are used as
/// given; bare host names are reached over https.
fn endpoint_base(end_point: Option<&str>, default_host: &str) -> String {
    match end_point {
        Some(e) if e.contains("://") => e.to_string(),
        Some(e) => format!("https://{}", e),
        None => format!("https://{}", default_host),
    }
}

fn object_url(base: &str, container: &str, object: &str) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid storage endpoint {}", base))?;
    url.path_segments_mut()
        .map_err(|_| eyre!("Storage endpoint {} cannot carry a path", base))?
        .pop_if_empty()
        .push(container)
        .extend(object.split('/'));
    Ok(url)
}

/// Value of the `sfc-digest` metadata Snowflake keeps on staged files
fn sfc_digest(body: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(body))
}

/// Read the file, gzipping it when the stage asks for compression
fn read_payload(file: &Path, compress: bool) -> Result<(String, Vec<u8>)> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| eyre!("{} has no file name", file.display()))?;
    let raw = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if !compress {
        return Ok((name.to_string(), raw));
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok((format!("{}.gz", name), encoder.finish()?))
}

async fn read_envelope(response: reqwest::Response, what: &str) -> Result<Envelope> {
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read {} response", what))?;
    if !status.is_success() {
        bail!("{} failed ({}): {}", what, status, body);
    }
    serde_json::from_str(&body).with_context(|| format!("Invalid {} response", what))
}

async fn check_upload(response: reqwest::Response, target: &str) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{} upload failed ({}): {}", target, status, body)
}

/// Uploads local files into named stages through a short-lived session
#[derive(Clone, Debug)]
pub struct StageUploader {
    client: Client,
    url: Url,
    auth: Auth,
    context: StatementContext,
    account: String,
    user: Option<String>,
}

impl StageUploader {
    /// The account name defaults to the first label of the account host
    pub fn new(url: Url, auth: Auth) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        let account = url
            .host_str()
            .and_then(|host| host.split('.').next())
            .unwrap_or_default()
            .to_uppercase();

        Ok(Self {
            client,
            url,
            auth,
            context: StatementContext::default(),
            account,
            user: None,
        })
    }

    pub fn with_context(mut self, context: StatementContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Login name; required for key-pair JWT sessions
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Upload one file into `stage`, replacing any file of the same name
    pub async fn upload(&self, file: &Path, stage: &str) -> Result<()> {
        let token = self.login().await?;
        let result = self.upload_with(&token, file, stage).await;
        self.logout(&token).await;
        result
    }

    async fn login(&self) -> Result<String> {
        let mut params = Vec::new();
        let context = &self.context;
        for (key, value) in [
            ("warehouse", &context.warehouse),
            ("databaseName", &context.database),
            ("schemaName", &context.schema),
            ("roleName", &context.role),
        ] {
            if let Some(value) = value {
                params.push((key, value.as_str()));
            }
        }

        let body = LoginRequest {
            data: LoginData {
                client_app_id: env!("CARGO_PKG_NAME"),
                client_app_version: env!("CARGO_PKG_VERSION"),
                account_name: &self.account,
                login_name: self.user.as_deref(),
                authenticator: self.auth.authenticator(),
                token: self.auth.token(),
            },
        };
        let response = self
            .client
            .post(self.url.join(LOGIN_PATH)?)
            .query(&params)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| eyre!("Failed to open a session on {}: {}", self.url, e))?;

        let session: SessionData = read_envelope(response, "Login").await?.into_data("Login")?;
        log::debug!("Opened upload session on {} as {}", self.url, self.auth);
        Ok(session.token)
    }

    async fn logout(&self, token: &str) {
        let result: Result<()> = async {
            let response = self
                .client
                .post(self.url.join(SESSION_PATH)?)
                .query(&[("delete", "true")])
                .header(AUTHORIZATION, session_header(token))
                .header(ACCEPT, SNOWFLAKE_ACCEPT)
                .send()
                .await?;
            read_envelope(response, "Logout")
                .await?
                .ensure_success("Logout")
        }
        .await;
        if let Err(e) = result {
            log::warn!("Failed to close upload session on {}: {}", self.url, e);
        }
    }

    async fn command(&self, token: &str, sql: &str) -> Result<UploadCommand> {
        let body = QueryRequest {
            sql_text: sql,
            async_exec: false,
            sequence_id: 1,
            query_submission_time: chrono::Utc::now().timestamp_millis(),
        };
        let response = self
            .client
            .post(self.url.join(QUERY_PATH)?)
            .query(&[("requestId", Uuid::new_v4().to_string())])
            .header(AUTHORIZATION, session_header(token))
            .header(ACCEPT, SNOWFLAKE_ACCEPT)
            .json(&body)
            .send()
            .await
            .map_err(|e| eyre!("Failed to send PUT: {}", e))?;
        read_envelope(response, "PUT").await?.into_data("PUT")
    }

    async fn upload_with(&self, token: &str, file: &Path, stage: &str) -> Result<()> {
        let command = self.command(token, &put_statement(file, stage)).await?;
        if let Some(kind) = command.command.as_deref()
            && kind != "UPLOAD"
        {
            bail!("PUT into @{} answered with a {} command", stage, kind);
        }
        if command.encryption_material.is_some() {
            bail!(
                "Stage @{} requires client-side encryption; create it with ENCRYPTION = (TYPE = 'SNOWFLAKE_SSE')",
                stage
            );
        }

        let info = command.stage_info;
        let (name, body) = read_payload(file, command.auto_compress)?;
        let digest = sfc_digest(&body);
        log::debug!(
            "Uploading {} ({} bytes) to {} location {}",
            name,
            body.len(),
            info.location_type,
            info.location
        );

        let uploaded = match info.location_type.to_uppercase().as_str() {
            "S3" => self.upload_s3(&info, &name, body, &digest).await,
            "AZURE" => self.upload_azure(&info, &name, body, &digest).await,
            "GCS" => self.upload_gcs(&info, &name, body, &digest).await,
            other => bail!("Unsupported stage location type {}", other),
        };
        uploaded.with_context(|| format!("Failed to upload {} to @{}", name, stage))?;

        log::info!("Uploaded {} to @{}", name, stage);
        Ok(())
    }

    async fn upload_s3(&self, info: &StageInfo, name: &str, body: Vec<u8>, digest: &str) -> Result<()> {
        let key_id = info
            .cred("AWS_KEY_ID")
            .ok_or_else(|| eyre!("S3 stage returned no AWS_KEY_ID"))?;
        let secret = info
            .cred("AWS_SECRET_KEY")
            .ok_or_else(|| eyre!("S3 stage returned no AWS_SECRET_KEY"))?;
        let credentials = Credentials::new(
            key_id,
            secret,
            info.cred("AWS_TOKEN").map(str::to_string),
            None,
            "snowflake-stage",
        );
        let region = info
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "us-east-1".to_string());

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(region));
        if let Some(endpoint) = info.end_point() {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint_base(Some(endpoint), "s3.amazonaws.com"))
                .force_path_style(endpoint.contains("://"));
        }
        let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());

        let (bucket, key) = info.target(name);
        client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .metadata("sfc-digest", digest)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("Failed to upload to s3://{}/{}", bucket, key))?;
        Ok(())
    }

    async fn upload_azure(&self, info: &StageInfo, name: &str, body: Vec<u8>, digest: &str) -> Result<()> {
        let base = match info.end_point() {
            Some(e) if e.contains("://") => e.to_string(),
            end_point => {
                let account = info
                    .storage_account
                    .as_deref()
                    .ok_or_else(|| eyre!("Azure stage returned no storage account"))?;
                format!(
                    "https://{}.{}",
                    account,
                    end_point.unwrap_or("blob.core.windows.net")
                )
            }
        };
        let (container, blob) = info.target(name);
        let mut url = object_url(&base, container, &blob)?;
        if let Some(sas) = info.cred("AZURE_SAS_TOKEN") {
            url.set_query(Some(sas.trim_start_matches('?')));
        }

        let response = self
            .client
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-meta-sfcdigest", digest)
            .body(body)
            .send()
            .await
            .map_err(|e| eyre!("Failed to reach Azure storage: {}", e))?;
        check_upload(response, "Azure").await
    }

    async fn upload_gcs(&self, info: &StageInfo, name: &str, body: Vec<u8>, digest: &str) -> Result<()> {
        let request = match info.presigned_url.as_deref().filter(|u| !u.is_empty()) {
            Some(presigned) => self.client.put(presigned),
            None => {
                let token = info
                    .cred("GCS_ACCESS_TOKEN")
                    .ok_or_else(|| eyre!("GCS stage returned neither a presigned URL nor an access token"))?;
                let base = endpoint_base(info.end_point(), "storage.googleapis.com");
                let (bucket, object) = info.target(name);
                self.client
                    .put(object_url(&base, bucket, &object)?)
                    .bearer_auth(token)
            }
        };

        let response = request
            .header("x-goog-meta-sfc-digest", digest)
            .body(body)
            .send()
            .await
            .map_err(|e| eyre!("Failed to reach GCS: {}", e))?;
        check_upload(response, "GCS").await
    }
}
