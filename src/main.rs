//! CI Messaging - Main Entry Point
//!
//! Runs the configured listeners, or publishes or waits for a single message.

use ci_messaging::config::MessagingConfig;
use ci_messaging::observability::{init_default_logging, metrics};
use ci_messaging::publish::{self, MessageType, RunContext, RunStatus};
use ci_messaging::trigger::{ListenerSet, LoggingCallback};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Message-bus listener that triggers CI jobs
#[derive(Parser)]
#[command(name = "ci-messaging")]
#[command(about = "Listen for CI events on a message bus and publish build outcomes")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "CI_MESSAGING_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every configured listener until interrupted
    Run,
    /// Publish one message
    Send {
        /// Provider name; optional when only one provider is configured
        #[arg(short, long)]
        provider: Option<String>,
        /// Job the message reports on (CI_NAME)
        #[arg(long)]
        job: String,
        /// Message type (CI_TYPE), e.g. component-build-done
        #[arg(long = "type", default_value = "custom")]
        message_type: MessageType,
        /// Run outcome; omitted while the run is still going
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Extra properties in `key=value` lines
        #[arg(long, default_value = "")]
        properties: String,
        /// Message content
        #[arg(long, default_value = "")]
        content: String,
    },
    /// Wait for one message matching a selector and print its body
    Wait {
        #[arg(short, long)]
        provider: Option<String>,
        /// Selector expression, e.g. "CI_TYPE = 'complete'"
        #[arg(short, long, default_value = "")]
        selector: String,
        /// Minutes to wait; 60 when omitted or not positive
        #[arg(short, long)]
        timeout: Option<i64>,
        /// Print the body as `NAME=<body>`
        #[arg(long)]
        variable: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Passed,
    Failed,
}

impl From<StatusArg> for RunStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Passed => RunStatus::Succeeded,
            StatusArg::Failed => RunStatus::Failed,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting ci-messaging v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_listeners(config).await,
        Commands::Send {
            provider,
            job,
            message_type,
            status,
            properties,
            content,
        } => {
            let run = RunContext::new(job)
                .with_status(status.map(RunStatus::from).unwrap_or(RunStatus::Running))
                .with_process_environment();
            send(&config, provider.as_deref(), &run, message_type, &properties, &content).await
        }
        Commands::Wait {
            provider,
            selector,
            timeout,
            variable,
        } => wait(&config, provider.as_deref(), &selector, timeout, variable).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<MessagingConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(MessagingConfig::load_from_file(path)?)
        }
        None => {
            for path_str in ["ci-messaging.toml", "config/ci-messaging.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(MessagingConfig::load_from_file(&path)?);
                }
            }

            Err("no configuration file found; pass -c/--config or create ci-messaging.toml".into())
        }
    }
}

async fn run_listeners(config: MessagingConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.listeners.is_empty() {
        warn!("No listeners configured; nothing to do");
        return Ok(());
    }

    let mut listeners = ListenerSet::new();
    listeners
        .start_all(&config, Arc::new(LoggingCallback))
        .await?;
    info!(jobs = ?listeners.job_names(), "Listeners running");

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    listeners.stop_all().await;

    match serde_json::to_string(&metrics().get_metrics()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Final listener metrics"),
        Err(e) => warn!("Unable to serialise metrics: {}", e),
    }
    Ok(())
}

async fn send(
    config: &MessagingConfig,
    provider: Option<&str>,
    run: &RunContext,
    message_type: MessageType,
    properties: &str,
    content: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let provider = config.resolve_provider(provider)?;
    publish::send_message(
        provider,
        run,
        message_type,
        properties,
        content,
        &config.retry_timing(),
    )
    .await?;
    Ok(())
}

async fn wait(
    config: &MessagingConfig,
    provider: Option<&str>,
    selector: &str,
    timeout: Option<i64>,
    variable: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let provider = config.resolve_provider(provider)?;
    let body =
        publish::wait_for_message(provider, selector, timeout, &config.retry_timing()).await?;

    match (body, variable) {
        (Some(body), Some(name)) if !name.is_empty() => println!("{name}={body}"),
        (Some(body), _) => println!("{body}"),
        (None, _) => return Err("timed out waiting for message".into()),
    }
    Ok(())
}

fn handle_config_command(
    config: &MessagingConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(
        providers = config.providers.len(),
        listeners = config.listeners.len(),
        "Configuration validation complete"
    );
    Ok(())
}
