use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pasarela::config::{Config, ConfigError};
use pasarela::utils::format_duration;
use pasarela::Pasarela;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pasarela")]
#[command(about = "A resilient, JWT-authenticated client for ArangoDB clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to configuration file; the ARANGO_* environment is used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate and query the server version
    Ping,
    /// List databases visible to the configured user
    Databases,
    /// Generate an example configuration file
    Config {
        /// Configuration mode (single or cluster)
        #[arg(short, long, default_value = "single")]
        mode: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration
    Validate,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ping => ping(cli.config.as_deref()).await,
        Commands::Databases => list_databases(cli.config.as_deref()).await,
        Commands::Config { mode, output } => generate_config(&mode, &output),
        Commands::Validate => validate_config(cli.config.as_deref()),
        Commands::Version => {
            show_version();
            Ok(())
        }
    }
}

/// File configuration (if any) overlaid with the environment
fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => {
            let config = Config::load_from_file(path)?.with_env(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
        None => Config::from_env(),
    }
}

fn connect(path: Option<&Path>) -> Result<Pasarela> {
    let config = load_config(path).context("Failed to load configuration")?;
    init_logging(&config)?;
    info!(
        "Starting pasarela v{} against {} node(s)",
        env!("CARGO_PKG_VERSION"),
        config.cluster.endpoints.len()
    );
    Pasarela::from_config(&config).context("Failed to initialize client")
}

async fn ping(path: Option<&Path>) -> Result<()> {
    let client = connect(path)?;
    let started = std::time::Instant::now();
    let version = client.ping().await.context("Ping failed")?;

    println!(
        "✓ {} {} ({})",
        version.server,
        version.version,
        format_duration(started.elapsed())
    );
    if let Some(license) = version.license {
        println!("  License: {}", license);
    }
    Ok(())
}

async fn list_databases(path: Option<&Path>) -> Result<()> {
    let client = connect(path)?;
    let databases = client
        .list_databases()
        .await
        .context("Failed to list databases")?;

    println!("{} database(s):", databases.len());
    for name in databases {
        println!("  {}", name);
    }
    Ok(())
}

fn generate_config(mode: &str, output: &Path) -> Result<()> {
    println!("Generating {} configuration file: {:?}", mode, output);

    Config::create_example_config(output, mode).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  pasarela --config {:?} ping", output);
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => println!("Validating configuration file: {:?}", path),
        None => println!("Validating configuration from environment"),
    }

    match load_config(path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Database: {}", config.database);
            println!("  Auth mode: {}", config.auth.mode);
            println!("  Token cache: {}", config.auth.cache);
            println!(
                "  Database deletion: {}",
                if config.safety.disable_database_delete { "disabled" } else { "enabled" }
            );
            println!(
                "  Collection deletion: {}",
                if config.safety.disable_collection_delete { "disabled" } else { "enabled" }
            );
            println!("  Cluster endpoints: {} node(s)", config.cluster.endpoints.len());
            for (i, endpoint) in config.cluster.endpoints.iter().enumerate() {
                println!("    {}: {}", i + 1, endpoint);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
                ConfigError::NoNodesConfigured => eprintln!("  No cluster endpoints configured"),
            }
            Err(e.into())
        }
    }
}

fn show_version() {
    println!("pasarela v{}", env!("CARGO_PKG_VERSION"));
    println!("A resilient, JWT-authenticated client for ArangoDB clusters");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Ordered node failover with failure cooldown");
    println!("  • Single-flight JWT renewal with optional disk cache");
    println!("  • Central guard for destructive operations");
}

fn init_logging(config: &Config) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pasarela={}", config.logging.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized at level: {}", config.logging.level);
    Ok(())
}
