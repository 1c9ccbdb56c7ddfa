use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use questmap_cli::{
    app::App,
    cli::{Cli, Commands},
    commands,
};
use questmap_config::{ConfigLoader, Preset};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    if let Some(preset) = &cli.preset {
        loader = loader.with_preset(preset.parse::<Preset>()?);
    }
    // missing credentials stop the process here
    let config = loader.load().context("Failed to load configuration")?;

    // CLI flags beat RUST_LOG, which beats the config file
    let filter = match cli.level_override() {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    debug!(backend = ?config.store.backend, scope = %config.query_scope(), "Starting questmap");

    let app = App::new(config)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let format = cli.format;

    match cli.command {
        Commands::List => commands::list::execute(&app, format, &mut out).await?,
        Commands::Place {
            lat,
            lng,
            description,
        } => commands::place::execute(&app, lat, lng, &description, format, &mut out).await?,
        Commands::Move { id, lat, lng } => {
            commands::relocate::execute(&app, &id, lat, lng, format, &mut out).await?
        }
        Commands::Remove { id } => commands::remove::execute(&app, &id, format, &mut out).await?,
        Commands::Clear => commands::clear::execute(&app, format, &mut out).await?,
        Commands::Watch => commands::watch::execute(&app, format, &mut out).await?,
        Commands::Repl => commands::repl::execute(&app, format, &mut out).await?,
    }

    Ok(())
}
