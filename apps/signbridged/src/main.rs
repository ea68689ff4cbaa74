use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use signbridge_dispatch::{HostManifest, HostRegistry};
use signbridge_policy::FileOriginAllowlist;
use signbridge_protocol::{DEFAULT_AGENT_NAME, ResolvedItem, resolve_items};
use signbridge_relay::{RelayBuilder, RelayConfig};
use tracing::info;

mod http;

use crate::http::{AppState, router};

#[derive(Debug, Parser)]
#[command(name = "signbridged")]
#[command(about = "SignBridge signing-request relay")]
struct Cli {
    #[arg(long, global = true, default_value = ".signbridge")]
    root: PathBuf,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept signing requests over HTTP and relay them to the agent.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8787")]
        listen: SocketAddr,
        #[arg(long, default_value = DEFAULT_AGENT_NAME)]
        agent: String,
        #[arg(long, default_value_t = 150)]
        grace_ms: u64,
    },
    /// Validate a request file and print the resolved object plan.
    Validate { file: PathBuf },
    /// Manage the caller origin allowlist.
    Allowlist {
        #[command(subcommand)]
        command: AllowlistCommand,
    },
    /// Manage signing agent host manifests.
    Host {
        #[command(subcommand)]
        command: HostCommand,
    },
}

#[derive(Debug, Subcommand)]
enum AllowlistCommand {
    List,
    Add { origin: String },
    Remove { origin: String },
}

#[derive(Debug, Subcommand)]
enum HostCommand {
    /// Register an executable as a stdio signing agent.
    Install {
        path: PathBuf,
        #[arg(long, default_value = DEFAULT_AGENT_NAME)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "allowed-origin")]
        allowed_origins: Vec<String>,
    },
    Show {
        #[arg(long, default_value = DEFAULT_AGENT_NAME)]
        name: String,
    },
    Uninstall {
        #[arg(long, default_value = DEFAULT_AGENT_NAME)]
        name: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationReport {
    valid: bool,
    errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    objects: Vec<ResolvedItem>,
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            listen,
            agent,
            grace_ms,
        } => {
            let mut config = RelayConfig::new(&cli.root);
            config.agent_name = agent;
            config.grace_period = Duration::from_millis(grace_ms);
            serve(config, listen).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { file } => validate_file(&file).await,
        Command::Allowlist { command } => {
            let allowlist = FileOriginAllowlist::new(RelayConfig::new(&cli.root).allowlist_path);
            allowlist_command(&allowlist, command).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Host { command } => {
            let hosts = HostRegistry::new(RelayConfig::new(&cli.root).manifest_dir);
            host_command(&hosts, command).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(config: RelayConfig, listen: SocketAddr) -> Result<()> {
    let relay = RelayBuilder::new(config).build();
    let app = router(AppState {
        relay: relay.clone(),
    });

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    let config = relay.config();
    info!(
        listen = %listen,
        agent = %config.agent_name,
        grace_ms = config.grace_period.as_millis() as u64,
        allowlist = %config.allowlist_path.display(),
        hosts = %config.manifest_dir.display(),
        "signbridged listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let closed = relay.shutdown();
    info!(closed, "signbridged stopped");
    Ok(())
}

async fn validate_file(path: &Path) -> Result<ExitCode> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw: Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let report = validation_report(&raw);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validation_report(raw: &Value) -> ValidationReport {
    match signbridge_validation::validate(raw) {
        Ok(request) => ValidationReport {
            valid: true,
            errors: Vec::new(),
            objects: resolve_items(&request),
        },
        Err(result) => ValidationReport {
            valid: false,
            errors: result.errors,
            objects: Vec::new(),
        },
    }
}

async fn allowlist_command(allowlist: &FileOriginAllowlist, command: AllowlistCommand) -> Result<()> {
    match command {
        AllowlistCommand::List => {
            for origin in allowlist.load().await?.origins() {
                println!("{origin}");
            }
        }
        AllowlistCommand::Add { origin } => {
            if allowlist.add(&origin).await? {
                info!(%origin, path = %allowlist.path().display(), "origin added");
            } else {
                info!(%origin, "origin already allowed");
            }
        }
        AllowlistCommand::Remove { origin } => {
            if allowlist.remove(&origin).await? {
                info!(%origin, path = %allowlist.path().display(), "origin removed");
            } else {
                info!(%origin, "origin was not in the allowlist");
            }
        }
    }
    Ok(())
}

async fn host_command(hosts: &HostRegistry, command: HostCommand) -> Result<()> {
    match command {
        HostCommand::Install {
            path,
            name,
            description,
            allowed_origins,
        } => {
            let path = std::path::absolute(&path)
                .with_context(|| format!("failed to resolve {}", path.display()))?;
            let manifest = HostManifest {
                description,
                allowed_origins,
                ..HostManifest::stdio(name, path)
            };
            let written = hosts
                .install(&manifest)
                .await
                .with_context(|| format!("failed to install host '{}'", manifest.name))?;
            info!(name = %manifest.name, manifest = %written.display(), "host installed");
        }
        HostCommand::Show { name } => {
            let manifest = hosts.lookup(&name).await?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        HostCommand::Uninstall { name } => {
            if hosts.uninstall(&name).await? {
                info!(%name, "host uninstalled");
            } else {
                info!(%name, "host was not installed");
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
