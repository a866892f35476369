use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gigchat::app::{self, AppConfig, Command};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gigchat", version, about = "Marketplace inbox from the command line")]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite message database
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// JSON file of projects, used instead of the API
    #[arg(long, global = true)]
    seed: Option<PathBuf>,
    /// Party id the inbox is built for
    #[arg(long, global = true)]
    viewer: Option<String>,
    /// Base URL of the marketplace API
    #[arg(long, global = true)]
    api: Option<String>,
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn resolve_config(&self) -> gigchat::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from(path)?,
            None => AppConfig::load(),
        };
        if let Some(db) = &self.db {
            config.database = Some(db.clone());
        }
        if let Some(seed) = &self.seed {
            config.seed_file = Some(seed.clone());
        }
        if let Some(viewer) = &self.viewer {
            config.viewer = Some(viewer.clone());
        }
        if let Some(api) = &self.api {
            config.api_base_url = gigchat::utils::normalize_url(api);
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = cli
        .resolve_config()
        .and_then(|config| app::run(&config, cli.command.clone(), &mut std::io::stdout().lock()));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
