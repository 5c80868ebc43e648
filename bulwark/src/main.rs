use bulwark::{Bulwark, BulwarkBuilder, LockoutStatus, RepositoryProvider};
use chrono::Duration;
use clap::Parser;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Administer the bulwark counter store
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database connection string
    #[arg(
        long,
        global = true,
        env = "BULWARK_DATABASE_URL",
        default_value = "sqlite://bulwark.db?mode=rwc"
    )]
    db_url: String,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(clap::Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Delete counters that lapsed long ago
    Prune {
        #[arg(long, default_value_t = 7)]
        older_than_days: u32,
    },
    /// Print an account's lockout state as JSON
    Status { username: String },
    /// Clear an account's failure tally and lockout
    Unlock { username: String },
    /// Print version information
    Version,
}

#[derive(Serialize)]
struct AccountReport {
    #[serde(flatten)]
    lockout: LockoutStatus,
    failures: u32,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    // RUST_LOG=
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "Command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[allow(unreachable_code)]
async fn run(cli: Cli) -> CliResult {
    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }

    #[cfg(feature = "postgres")]
    {
        if cli.db_url.starts_with("postgres://") || cli.db_url.starts_with("postgresql://") {
            let bulwark = BulwarkBuilder::new()
                .with_postgres(&cli.db_url)
                .await?
                .build()
                .await?;
            return execute(&bulwark, cli.command).await;
        }
    }

    #[cfg(feature = "sqlite")]
    {
        let bulwark = BulwarkBuilder::new()
            .with_sqlite(&cli.db_url)
            .await?
            .build()
            .await?;
        return execute(&bulwark, cli.command).await;
    }

    Err(format!("no storage backend compiled in for {}", cli.db_url).into())
}

async fn execute<R: RepositoryProvider>(bulwark: &Bulwark<R>, command: Commands) -> CliResult {
    match command {
        Commands::Migrate => {
            println!("Running migrations...");
            bulwark.migrate().await?;
        }
        Commands::Prune { older_than_days } => {
            let count = bulwark
                .prune(Duration::days(i64::from(older_than_days)))
                .await?;
            println!("Pruned {count} counter(s)");
        }
        Commands::Status { username } => {
            let report = AccountReport {
                lockout: bulwark.lockout_status(&username).await?,
                failures: bulwark.failure_count(&username).await?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Unlock { username } => {
            if bulwark.unlock_account(&username).await? {
                println!("Unlocked {username}");
            } else {
                println!("{username} was not locked; failure tally cleared");
            }
        }
        Commands::Version => print_version(),
    }
    Ok(())
}

fn print_version() {
    println!("bulwark v{}", env!("CARGO_PKG_VERSION"));
}
