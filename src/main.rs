use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tabtrigger::config::Config;
use tabtrigger::coordinator::CoordinatorServer;
use tabtrigger::storage::BookingStore;

#[derive(Parser)]
#[command(
    name = "tabtrigger",
    version,
    about = "Time-triggered booking coordinator for browser automation agents",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to LOG_FORMAT or text
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator server
    Serve {
        /// Address to bind (overrides HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// TOML configuration file (environment is used otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Inspect or reset the booking store
    Bookings {
        #[command(subcommand)]
        action: BookingsAction,

        /// TOML configuration file (environment is used otherwise)
        #[arg(short, long, global = true)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BookingsAction {
    /// Print stored bookings
    List,

    /// Remove every stored booking
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Serve { config, .. } | Commands::Bookings { config, .. } => config.clone(),
    };
    let config = load_config(config_path.as_deref())?;

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;
    config.log_fallbacks();

    match cli.command {
        Commands::Serve { host, port, .. } => {
            tracing::info!(host = ?host, port = ?port, "Starting serve command");
            serve(config, host, port).await?;
        }

        Commands::Bookings { action, .. } => match action {
            BookingsAction::List => list_bookings(&config)?,
            BookingsAction::Clear => clear_bookings(&config)?,
        },
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("tabtrigger=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("tabtrigger={level},warn"))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tabtrigger=info,warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn serve(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let server = CoordinatorServer::new(config)?;
    println!("{}", server.info().display());

    server.start_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn open_store(config: &Config) -> Result<BookingStore> {
    Ok(BookingStore::open(&config.storage.data_dir)?)
}

fn list_bookings(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let bookings = store.list();

    if bookings.is_empty() {
        println!("No bookings stored in {}", store.primary_path().display());
        return Ok(());
    }

    println!("{:<10} {:<12} {:<26} {:>7}  URL", "ID", "STATUS", "TRIGGER", "TICKETS");
    for booking in &bookings {
        println!(
            "{:<10} {:<12} {:<26} {:>7}  {}",
            booking.id,
            booking.status.as_str(),
            booking.trigger_time.to_rfc3339(),
            booking.total_quantity(),
            booking.url
        );
    }
    println!("{} booking(s)", bookings.len());
    Ok(())
}

fn clear_bookings(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let count = store.count();

    if !store.clear() {
        anyhow::bail!("Failed to clear {}", store.primary_path().display());
    }

    tracing::info!(removed = count, "Booking store cleared");
    println!("Removed {count} booking(s)");
    Ok(())
}
