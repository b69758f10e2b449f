use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Vigil — resilience policy for pooled worker sessions",
    version,
    propagate_version = true,
)]
struct Cli {
    /// TOML policy file. Without it, defaults plus VIGIL_* environment
    /// overrides are used.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the effective policy configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Classify an error message and show the retry strategy it gets
    Classify {
        /// Error message, as reported by the failing operation
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Show the retry strategy for every error kind
    Strategies {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the full settings tree as JSON (secrets masked)
    Show,
    /// Print one value by dotted path, e.g. sessions.maxConcurrentSessions
    Get { path: String },
    /// Check the configuration and list every violation
    Validate,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,vigil=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let source = cli.config.as_deref();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(source),
            ConfigAction::Get { path } => commands::config::get(source, &path),
            ConfigAction::Validate => commands::config::validate(source),
        },
        Commands::Classify { message, format } => {
            commands::retry::classify(source, &message.join(" "), &format)
        }
        Commands::Strategies { format } => commands::retry::strategies(source, &format),
    }
}
