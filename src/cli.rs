//! CLI helper functions

use crate::{
    articles::{self, ArticlesPipeline, LoadMode, RowCountValidator, ValidationReport},
    client::{
        Auth, AuthType, DEFAULT_STATEMENT_TIMEOUT, PostgresSource, SnowflakeClient,
        StatementContext,
    },
    etl::{RetryPolicy, Validator},
    schedule::{self, Tally},
    storage::CsvWriter,
};
use eyre::{Context, Result, eyre};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Read an optional variable, failing only when it is set but unparsable
fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("Invalid {} '{}': {}", name, raw, e)),
        _ => Ok(None),
    }
}

/// Load the PostgreSQL source from environment variables
///
/// Expected environment variables:
/// - POSTGRES_URL: connection string or URL (required)
pub fn load_source() -> Result<PostgresSource> {
    let url = std::env::var("POSTGRES_URL").context("POSTGRES_URL environment variable not set")?;
    Ok(PostgresSource::new(url))
}

/// Load the Snowflake client from environment variables
///
/// Expected environment variables:
/// - SNOWFLAKE_URL: account URL (required)
/// - SNOWFLAKE_TOKEN: bearer credential (required)
/// - SNOWFLAKE_TOKEN_TYPE: keypair_jwt, oauth or pat (optional, defaults to keypair_jwt)
/// - SNOWFLAKE_WAREHOUSE, SNOWFLAKE_DATABASE, SNOWFLAKE_SCHEMA, SNOWFLAKE_ROLE: session defaults (optional)
/// - SNOWFLAKE_STATEMENT_TIMEOUT_SECS: server-side statement timeout (optional, defaults to 3600)
/// - SNOWFLAKE_USER: login name for upload sessions (optional; required for key-pair JWT)
/// - SNOWFLAKE_ACCOUNT: account name for upload sessions (optional, defaults to the URL's first host label)
pub fn load_warehouse() -> Result<SnowflakeClient> {
    let url_str =
        std::env::var("SNOWFLAKE_URL").context("SNOWFLAKE_URL environment variable not set")?;
    let url =
        Url::parse(&url_str).with_context(|| format!("Invalid SNOWFLAKE_URL: {}", url_str))?;
    let token =
        std::env::var("SNOWFLAKE_TOKEN").context("SNOWFLAKE_TOKEN environment variable not set")?;

    let token_type = match std::env::var("SNOWFLAKE_TOKEN_TYPE") {
        Ok(raw) => AuthType::from_str(&raw)
            .map_err(|_| eyre!("Invalid SNOWFLAKE_TOKEN_TYPE: {}", raw))?,
        Err(_) => AuthType::KeypairJwt,
    };

    let context = StatementContext {
        warehouse: std::env::var("SNOWFLAKE_WAREHOUSE").ok(),
        database: std::env::var("SNOWFLAKE_DATABASE").ok(),
        schema: std::env::var("SNOWFLAKE_SCHEMA").ok(),
        role: std::env::var("SNOWFLAKE_ROLE").ok(),
    };

    let timeout = parse_env::<u64>("SNOWFLAKE_STATEMENT_TIMEOUT_SECS")?
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_STATEMENT_TIMEOUT);

    Ok(SnowflakeClient::try_new(url, Auth::new(&token_type, token))
        .context("Failed to create Snowflake client")?
        .with_context(context)
        .with_timeout(timeout)
        .with_login(
            std::env::var("SNOWFLAKE_USER").ok(),
            std::env::var("SNOWFLAKE_ACCOUNT").ok(),
        ))
}

/// Retry policy from `STAGE_RETRIES` and `STAGE_RETRY_DELAY_SECS`
pub fn load_retry_policy() -> Result<RetryPolicy> {
    let defaults = RetryPolicy::default();
    let retries = parse_env::<u32>("STAGE_RETRIES")?.unwrap_or(defaults.retries);
    let delay = parse_env::<u64>("STAGE_RETRY_DELAY_SECS")?
        .map(Duration::from_secs)
        .unwrap_or(defaults.delay);
    Ok(RetryPolicy::new(retries, delay))
}

/// Load mode from `LOAD_MODE`
pub fn load_mode() -> Result<LoadMode> {
    Ok(parse_env::<LoadMode>("LOAD_MODE")?.unwrap_or_default())
}

/// Assemble the articles pipeline from the environment
///
/// With `debug` the staged CSV is kept on disk after the run.
pub fn build_pipeline(debug: bool) -> Result<ArticlesPipeline<PostgresSource, SnowflakeClient>> {
    let source = load_source()?;
    let warehouse = load_warehouse()?;
    let mode = load_mode()?;
    let retry = load_retry_policy()?;

    log::info!("Destination: {}", warehouse);
    log::info!(
        "Load mode: {}, retries: {}, retry delay: {}s",
        mode,
        retry.retries,
        retry.delay.as_secs()
    );

    Ok(articles::pipeline(
        source,
        warehouse,
        CsvWriter::new().with_retain(debug),
        mode,
        retry,
    ))
}

/// Execute one pipeline run
pub async fn run_once(debug: bool) -> Result<ValidationReport> {
    let pipeline = build_pipeline(debug)?;
    let report = pipeline.run().await?;
    log::info!(
        "✓ Validated {} row(s) in source and destination",
        report.destination
    );
    Ok(report)
}

/// Run the pipeline hourly until Ctrl-C
pub async fn schedule(debug: bool) -> Result<Tally> {
    let pipeline = build_pipeline(debug)?;
    log::info!("Scheduling pipeline every {} minute(s)", schedule::HOURLY.as_secs() / 60);
    let tally = schedule::every(schedule::HOURLY, || pipeline.run(), schedule::shutdown_signal()).await;
    Ok(tally)
}

/// Verify both connection profiles
pub async fn check_connections() -> Result<()> {
    let source = load_source()?;
    let warehouse = load_warehouse()?;

    log::info!("Checking source database...");
    source.test_connection().await?;
    log::info!("✓ Source database reachable");

    log::info!("Checking {}...", warehouse);
    warehouse
        .test_connection()
        .await
        .context("Destination warehouse did not answer")?;
    log::info!("✓ Destination warehouse reachable");

    Ok(())
}

/// Compare row counts without running a load
pub async fn validate_only() -> Result<ValidationReport> {
    let validator = RowCountValidator::articles(load_source()?, load_warehouse()?);
    let report = validator.validate(None).await?;
    log::info!("✓ Source and destination both hold {} row(s)", report.source);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 14] = [
        "POSTGRES_URL",
        "SNOWFLAKE_URL",
        "SNOWFLAKE_TOKEN",
        "SNOWFLAKE_TOKEN_TYPE",
        "SNOWFLAKE_WAREHOUSE",
        "SNOWFLAKE_DATABASE",
        "SNOWFLAKE_SCHEMA",
        "SNOWFLAKE_ROLE",
        "SNOWFLAKE_STATEMENT_TIMEOUT_SECS",
        "SNOWFLAKE_USER",
        "SNOWFLAKE_ACCOUNT",
        "STAGE_RETRIES",
        "STAGE_RETRY_DELAY_SECS",
        "LOAD_MODE",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_load_source_no_url() {
        clear_env();

        let result = load_source();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("POSTGRES_URL"));
    }

    #[test]
    #[serial_test::serial]
    fn test_load_warehouse_with_url() {
        clear_env();
        unsafe {
            std::env::set_var("SNOWFLAKE_URL", "https://acme.snowflakecomputing.com");
            std::env::set_var("SNOWFLAKE_TOKEN", "token");
            std::env::set_var("SNOWFLAKE_WAREHOUSE", "ETL_WH");
        }

        let client = load_warehouse().unwrap();
        assert_eq!(client.url().host_str(), Some("acme.snowflakecomputing.com"));
        assert_eq!(client.context().warehouse.as_deref(), Some("ETL_WH"));
        assert_eq!(client.context().role, None);
        assert_eq!(client.timeout(), DEFAULT_STATEMENT_TIMEOUT);
        assert_eq!(client.uploader().account(), "ACME");

        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn test_load_warehouse_statement_timeout() {
        clear_env();
        unsafe {
            std::env::set_var("SNOWFLAKE_URL", "https://acme.snowflakecomputing.com");
            std::env::set_var("SNOWFLAKE_TOKEN", "token");
            std::env::set_var("SNOWFLAKE_STATEMENT_TIMEOUT_SECS", "7200");
            std::env::set_var("SNOWFLAKE_ACCOUNT", "MYORG-ACME");
        }
        let client = load_warehouse().unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(7200));
        assert_eq!(client.uploader().account(), "MYORG-ACME");

        unsafe {
            std::env::set_var("SNOWFLAKE_STATEMENT_TIMEOUT_SECS", "an hour");
        }
        assert!(
            load_warehouse()
                .unwrap_err()
                .to_string()
                .contains("SNOWFLAKE_STATEMENT_TIMEOUT_SECS")
        );

        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn test_load_warehouse_invalid_url() {
        clear_env();
        unsafe {
            std::env::set_var("SNOWFLAKE_URL", "not-a-valid-url");
            std::env::set_var("SNOWFLAKE_TOKEN", "token");
        }

        let result = load_warehouse();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid SNOWFLAKE_URL")
        );

        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn test_load_warehouse_bad_token_type() {
        clear_env();
        unsafe {
            std::env::set_var("SNOWFLAKE_URL", "https://acme.snowflakecomputing.com");
            std::env::set_var("SNOWFLAKE_TOKEN", "token");
            std::env::set_var("SNOWFLAKE_TOKEN_TYPE", "password");
        }

        let result = load_warehouse();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("SNOWFLAKE_TOKEN_TYPE")
        );

        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn test_retry_policy_from_env() {
        clear_env();
        assert_eq!(load_retry_policy().unwrap(), RetryPolicy::default());

        unsafe {
            std::env::set_var("STAGE_RETRIES", "0");
            std::env::set_var("STAGE_RETRY_DELAY_SECS", "10");
        }
        let policy = load_retry_policy().unwrap();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay, Duration::from_secs(10));

        unsafe {
            std::env::set_var("STAGE_RETRIES", "three");
        }
        assert!(load_retry_policy().is_err());

        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn test_load_mode_from_env() {
        clear_env();
        assert_eq!(load_mode().unwrap(), LoadMode::Replace);

        unsafe {
            std::env::set_var("LOAD_MODE", "append");
        }
        assert_eq!(load_mode().unwrap(), LoadMode::Append);

        unsafe {
            std::env::set_var("LOAD_MODE", "upsert");
        }
        assert!(load_mode().unwrap_err().to_string().contains("LOAD_MODE"));

        clear_env();
    }
}
