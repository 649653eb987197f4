use anyhow::Result;
use clap::{Parser, Subcommand};
use prizedraw::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "prizedraw")]
#[command(about = "Prize-draw ticketing: unique code pools and atomic per-tenant allocation", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the database and top the ticket pool up to the target size
    Init {
        /// Override the configured pool size
        #[arg(long)]
        size: Option<u64>,

        /// Create the sample tenants and users if none exist
        #[arg(long)]
        seed: bool,
    },

    /// Manage tenants
    #[command(subcommand)]
    Tenant(TenantCommands),

    /// Manage users
    #[command(subcommand)]
    User(UserCommands),

    /// Atomically allocate tickets to a user under a tenant
    Allocate {
        /// Tenant id
        #[arg(long)]
        tenant: i64,

        /// User id
        #[arg(long)]
        user: i64,

        /// Number of tickets to allocate
        #[arg(long)]
        count: u32,

        /// Print the allocations as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show pool size and per-tenant allocation counts
    Status,

    /// Issue many allocate calls concurrently (load driver)
    Stress {
        /// Tenant id
        #[arg(long)]
        tenant: i64,

        /// User id
        #[arg(long)]
        user: i64,

        /// Tickets per request
        #[arg(long, default_value_t = 2)]
        count: u32,

        /// Total number of allocate calls
        #[arg(long, default_value_t = 1000)]
        requests: u64,

        /// Concurrent workers
        #[arg(long, default_value_t = 8)]
        concurrency: u32,
    },
}

#[derive(Subcommand)]
enum TenantCommands {
    /// Create a new tenant
    Add {
        /// Display name
        #[arg(long)]
        name: String,
    },

    /// List all tenants
    List,
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a new user
    Add {
        /// Display name
        #[arg(long)]
        name: String,
    },

    /// List all users
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.unwrap_or_else(|| {
        let default_path = Config::default_path();
        if default_path.exists() {
            default_path
        } else {
            PathBuf::from("config/default.yaml")
        }
    });

    let config = Config::load_or_default(&config_path)?;

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format)?;

    if config_path.exists() {
        tracing::debug!("Config loaded from: {}", config_path.display());
    } else {
        tracing::debug!("No config file found, using built-in defaults");
    }

    match cli.command {
        Commands::Init { size, seed } => {
            prizedraw::cli::admin::init(config, size, seed).await?;
        }
        Commands::Tenant(TenantCommands::Add { name }) => {
            prizedraw::cli::admin::add_tenant(config, &name).await?;
        }
        Commands::Tenant(TenantCommands::List) => {
            prizedraw::cli::admin::list_tenants(config).await?;
        }
        Commands::User(UserCommands::Add { name }) => {
            prizedraw::cli::admin::add_user(config, &name).await?;
        }
        Commands::User(UserCommands::List) => {
            prizedraw::cli::admin::list_users(config).await?;
        }
        Commands::Allocate {
            tenant,
            user,
            count,
            json,
        } => {
            prizedraw::cli::admin::allocate(config, tenant, user, count, json).await?;
        }
        Commands::Status => {
            prizedraw::cli::admin::status(config).await?;
        }
        Commands::Stress {
            tenant,
            user,
            count,
            requests,
            concurrency,
        } => {
            prizedraw::cli::stress::run_stress(config, tenant, user, count, requests, concurrency)
                .await?;
        }
    }

    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        _ => {
            // Default to pretty
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
