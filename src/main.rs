use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cursor_kit::configs::{detect_available, ConfigDescriptor, ConfigKind};
use cursor_kit::output::{print_error, print_info, print_success};
use cursor_kit::receive::{receive, ConflictStrategy, ReceiveOptions, ReceiveOutcome};
use cursor_kit::share::{start_share, ShareOptions, ShareOutcome};
use cursor_kit::transport::TunnelProvider;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cursor-kit")]
#[command(about = "Share AI-IDE config directories between machines over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Share AI IDE configs (.cursor, .agent, .github) from the current directory
    Share {
        /// Port for the HTTP server (next free port is tried on conflict)
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
        /// Expose the share on the internet via a tunnel provider
        #[arg(long, value_enum)]
        via: Option<TunnelProvider>,
        /// Limit the share to specific config kinds (default: all detected)
        #[arg(long, value_enum, value_delimiter = ',')]
        configs: Vec<ConfigKind>,
    },
    /// Receive shared configs from a cursor-kit share URL into the current directory
    Receive {
        /// The share URL (e.g. http://192.168.1.15:8080)
        url: String,
        /// Overwrite existing configs without prompting
        #[arg(short, long)]
        force: bool,
        /// Conflict strategy for non-interactive use
        #[arg(long, value_enum)]
        strategy: Option<ConflictStrategy>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cursor_kit=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Share {
            port,
            via,
            configs,
        } => run_share(port, via, configs).await,
        Commands::Receive {
            url,
            force,
            strategy,
        } => run_receive(&url, force, strategy).await,
    };

    if let Err(err) = result {
        print_error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run_share(
    port: u16,
    via: Option<TunnelProvider>,
    requested: Vec<ConfigKind>,
) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;

    let available = detect_available(&cwd);
    if available.is_empty() {
        anyhow::bail!(
            "No AI IDE configs found in the current directory.\n\
             Expected one of .cursor, .agent, or .github (with Copilot instructions)."
        );
    }

    let selected: Vec<ConfigDescriptor> = if requested.is_empty() {
        available
    } else {
        let mut selected = Vec::new();
        for kind in requested {
            let descriptor = available
                .iter()
                .find(|c| c.kind == kind)
                .cloned()
                .with_context(|| format!("Config '{kind}' not found in the current directory"))?;
            selected.push(descriptor);
        }
        selected
    };

    let outcome = start_share(
        selected,
        ShareOptions {
            requested_port: port,
            provider: via,
        },
    )
    .await?;

    match outcome {
        ShareOutcome::Confirmed | ShareOutcome::ConfirmedAssumed | ShareOutcome::Interrupted => {
            Ok(())
        }
        ShareOutcome::Failed => anyhow::bail!("Transfer failed"),
    }
}

async fn run_receive(url: &str, force: bool, strategy: Option<ConflictStrategy>) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;

    let outcome = receive(url, &cwd, ReceiveOptions { force, strategy }).await?;

    match outcome {
        ReceiveOutcome::Applied { configs, .. } => {
            println!();
            for config in &configs {
                print_success(&format!("{}: {}", config.label, config.action));
            }
            println!();
            print_success("Transfer complete!");
            Ok(())
        }
        ReceiveOutcome::Cancelled => {
            print_info("Operation cancelled, nothing was changed.");
            // Cancellation is still a non-zero exit for scripting.
            std::process::exit(1);
        }
    }
}
