use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use desktop_eye::{
    core::error::ProvisioningError, environment::BASE_ENVIRONMENT, orchestrator::Capability,
    AppServices, ConfigStore,
};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;

/// DesktopEye backend services
#[derive(Parser)]
#[command(name = "desktop-eye")]
#[command(about = "Provision and drive the DesktopEye OCR, classification, translation and speech backends")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the package manager and create the configured environment
    Provision {
        /// Environment to create (defaults to the configured one)
        #[arg(long)]
        env: Option<String>,
        /// Python version for a newly created environment
        #[arg(long)]
        python: Option<String>,
    },
    /// Run a command inside an environment
    Exec {
        command: String,
        #[arg(long)]
        env: Option<String>,
    },
    /// List known models and whether they are on disk
    Models,
    /// Download every missing model
    DownloadModels,
    /// Switch a capability to a backend and report the outcome
    Switch {
        capability: Capability,
        backend: String,
        /// Construct the backend without loading its model
        #[arg(long)]
        no_load: bool,
    },
    /// Print the state of the services as JSON
    Status,
}

fn setup_logging() {
    let filter = std::env::var("DESKTOP_EYE_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let config = Arc::new(ConfigStore::open()?);
    let services = AppServices::build(config.clone())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let outcome = run(cli.command, &services, &cancel).await;
    services.shutdown().await;
    match outcome? {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

/// Returns the process exit code.
async fn run(command: Commands, services: &AppServices, cancel: &CancellationToken) -> Result<i32> {
    match command {
        Commands::Provision { env, python } => {
            let environment = services.environment();
            environment.install_base(cancel).await?;
            let name = env.unwrap_or_else(|| environment.default_environment().to_string());
            if name != BASE_ENVIRONMENT {
                environment
                    .create_environment(&name, python.as_deref(), cancel)
                    .await?;
            }
            services.config().mark_setup_finished()?;
            println!(
                "environment `{name}` ready at {}",
                environment.environment_prefix(Some(&name)).display()
            );
        }
        Commands::Exec { command, env } => {
            match services
                .environment()
                .execute_command(&command, env.as_deref(), cancel)
                .await
            {
                Ok(output) => print!("{}", output.stdout),
                Err(ProvisioningError::CommandFailed {
                    exit_code,
                    stdout,
                    stderr,
                    ..
                }) => {
                    print!("{stdout}");
                    eprint!("{stderr}");
                    return Ok(exit_code.filter(|code| *code != 0).unwrap_or(1));
                }
                Err(error) => return Err(error.into()),
            }
        }
        Commands::Models => {
            for model in services.catalog().models() {
                let status = services.models().status(&model);
                println!("{:<14} {:<40} {status:?}", model.folder, model.name);
            }
        }
        Commands::DownloadModels => {
            let reports = services.downloads().download_missing(cancel).await?;
            for report in &reports {
                println!("{report}");
            }
        }
        Commands::Switch {
            capability,
            backend,
            no_load,
        } => {
            let descriptor = services
                .switch(capability, &backend, !no_load, cancel)
                .await
                .with_context(|| format!("switching {capability} to `{backend}`"))?;
            println!("{} now served by {}", descriptor.capability, descriptor.backend);
        }
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&services.status())?);
        }
    }
    Ok(0)
}
