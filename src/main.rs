use articles_etl::cli;
use clap::{Parser, Subcommand, builder::styling};
use eyre::Result;
use owo_colors::OwoColorize;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// Articles ETL: copy public.articles from PostgreSQL into Snowflake and check the row counts match
#[derive(Parser)]
#[command(name = "articles-etl", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source connection profiles from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging and retention of the staged CSV file
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one pipeline run: extract, transform, stage, load, validate
    Run,

    /// Run the pipeline every hour until interrupted
    Schedule,

    /// Test connectivity to the source database and the destination warehouse
    Check,

    /// Compare source and destination row counts without loading
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dotenv = dotenvy::from_filename(&cli.env);

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    if let Err(e) = dotenv {
        log::debug!("Not sourcing {}: {}", cli.env.bright_black(), e);
    }

    match cli.command {
        Commands::Run => {
            log::info!("Running pipeline {}", "once".cyan());
            cli::run_once(cli.debug).await?;
        }
        Commands::Schedule => {
            log::info!("Running pipeline {}", "hourly".cyan());
            let tally = cli::schedule(cli.debug).await?;
            log::info!(
                "Completed {} run(s), {} failed",
                tally.total(),
                tally.failed.red()
            );
        }
        Commands::Check => {
            log::info!("Checking connection profiles from {}", cli.env.bright_black());
            cli::check_connections().await?;
        }
        Commands::Validate => {
            log::info!("Validating destination against source");
            cli::validate_only().await?;
        }
    }

    Ok(())
}
