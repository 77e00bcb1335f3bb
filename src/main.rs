use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use fitbod_elastic::config::Config;
use fitbod_elastic::elastic::ElasticClient;
use fitbod_elastic::gmail::GmailClient;
use fitbod_elastic::ingest::Ingestor;

#[derive(Parser)]
#[command(name = "fitbod-elastic", version)]
#[command(about = "Fetch Fitbod CSV exports from Gmail and index every workout set in Elasticsearch")]
struct Cli {
    /// Only index sets newer than this many days; 0 re-indexes the full
    /// history. Defaults to the configured value (7).
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(0..=36500))]
    days: Option<u32>,

    /// Path to the TOML configuration file
    #[arg(
        short,
        long,
        default_value = "fitbod-elastic.toml",
        env = "FITBOD_ELASTIC_CONFIG"
    )]
    config: PathBuf,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_example_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    dotenvy::dotenv().ok();

    if cli.print_example_config {
        print!("{}", toml::to_string_pretty(&Config::example())?);
        return Ok(());
    }

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    let days = cli.days.unwrap_or(config.ingest.days);

    let gmail = GmailClient::connect(&config.gmail).await?;
    let elastic = ElasticClient::new(config.elastic.clone())?;
    let ingestor = Ingestor::new(
        config.ingest.clone(),
        config.gmail.query.clone(),
        gmail,
        elastic,
    );

    ingestor.run(days).await
}
