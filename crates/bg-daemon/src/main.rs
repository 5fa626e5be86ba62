use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use bg_core::models::{DaemonConfig, DeploymentOutcome, DeploymentRequest};
use bg_core::services::config_loader;
use bg_core::services::control::{ServiceController, SystemctlControlPlane};
use bg_core::services::coordinator::Coordinator;
use bg_core::services::registry::ServiceRegistry;
use bg_core::services::state::SlotStateStore;
use bg_core::services::traffic::{build_switch, effective_mode};
use bg_core::services::workspace::GitWorkspace;

use bg_daemon::cli::{self, Cli, Command, USAGE};
use bg_daemon::dispatch::Dispatcher;
use bg_daemon::{events, logging, status};

const USAGE_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;

    let cli = match cli::parse(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("bg-daemon: {e}\n\n{USAGE}");
            return Ok(ExitCode::from(USAGE_EXIT));
        }
    };
    if cli.command == Command::Help {
        println!("{USAGE}");
        return Ok(ExitCode::SUCCESS);
    }

    // Dropped after `run` returns, flushing the log file before exit.
    let _guard = logging::init(cli.debug, cli.log_file.as_deref())?;
    run(cli).await
}

async fn run(cli: Cli) -> color_eyre::Result<ExitCode> {
    let config = config_loader::load(&cli.config)
        .wrap_err_with(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Serve => {
            serve(Arc::new(build_coordinator(&config)?)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Deploy {
            repository_url,
            git_ref,
            commit_sha,
        } => {
            if let Err(e) = cli::ensure_one_shot_supported(effective_mode(config.traffic)) {
                tracing::error!("{e}");
                eprintln!("bg-daemon: {e}");
                return Ok(ExitCode::from(USAGE_EXIT));
            }
            let coordinator = build_coordinator(&config)?;
            let request = DeploymentRequest::new(&repository_url, &git_ref, &commit_sha);
            let outcome = coordinator.execute(&request).await;
            println!("{}", events::render_outcome(&outcome)?);
            Ok(if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Status => {
            let services = ServiceRegistry::new(config.services.clone())?;
            let state = SlotStateStore::new(&config.state_dir);
            let rows = status::collect(&services, &state).await;
            print!("{}", status::render(&rows));
            Ok(ExitCode::SUCCESS)
        }
        Command::Help => Ok(ExitCode::SUCCESS),
    }
}

fn build_coordinator(config: &DaemonConfig) -> color_eyre::Result<Coordinator> {
    let services = ServiceRegistry::new(config.services.clone())?;
    let state = Arc::new(SlotStateStore::new(&config.state_dir));
    let units = ServiceController::new(Arc::new(SystemctlControlPlane::new(
        config.control_plane,
    )))
    .with_timeout(Duration::from_secs(config.control_timeout_secs));
    let traffic = build_switch(config.traffic, &config.target_host);
    tracing::info!(
        services = services.len(),
        traffic = traffic.name(),
        timeout_secs = config.control_timeout_secs,
        "coordinator ready"
    );

    Ok(Coordinator::new(
        services,
        state,
        Arc::new(GitWorkspace::new()),
        Arc::new(units),
        traffic,
    ))
}

async fn serve(coordinator: Arc<Coordinator>) -> color_eyre::Result<()> {
    coordinator
        .reconcile()
        .await
        .wrap_err("restoring traffic to the recorded slots")?;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<DeploymentOutcome>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(outcome) = out_rx.recv().await {
            let line = match events::render_outcome(&outcome) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("could not encode outcome: {e}");
                    continue;
                }
            };
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut dispatcher = Dispatcher::new(coordinator.clone(), out_tx);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!("waiting for push events on stdin");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match events::parse_event(&line) {
                    Ok(request) => dispatcher.submit(request),
                    Err(e) => {
                        tracing::warn!("discarding malformed push event: {e}");
                        dispatcher.reject(e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    dispatcher.finish().await;
    let _ = writer.await;
    coordinator.traffic().shutdown().await;
    tracing::info!("stopped");
    Ok(())
}
