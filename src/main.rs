use std::sync::Arc;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ota_agent::adapters::{LinuxPlatform, ReqwestHttpClient, WsControlChannel};
use ota_agent::apply::{Applier, RunToken};
use ota_agent::cli::{load_config, parse_args, run_cli_command, version_string, CliCommand};
use ota_agent::config::AgentConfig;
use ota_agent::download::Downloader;
use ota_agent::store::UpdateStore;
use ota_agent::{OtaError, UpdateEvent, UpdateSession};

const DEFAULT_LOG_FILTER: &str = "ota_agent=info";

fn main() -> Result<()> {
    color_eyre::install()?;

    let command = parse_args(std::env::args());
    if let Some(result) = run_cli_command(&command) {
        if let Err(e) = result {
            eprintln!("Error: {:?}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    let config_path = match &command {
        CliCommand::Run { config } => config.clone(),
        _ => None,
    };
    let config = load_config(config_path.as_deref())?;

    init_tracing();
    info!("Starting {}", version_string());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_agent(config))
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Wire the production adapters into a session and run until interrupted
/// or until an update hands the device to its reset.
async fn run_agent(config: AgentConfig) -> Result<()> {
    let store = Arc::new(
        UpdateStore::load(config.store_dir())
            .wrap_err_with(|| format!("Failed to open update store at {}", config.store_dir().display()))?,
    );
    info!(
        "Update store at {} holds {} record(s)",
        store.root().display(),
        store.len()
    );

    let platform = Arc::new(
        LinuxPlatform::new()
            .with_shutdown_command(config.shutdown_command.clone())
            .with_reset_command(config.reset_command.clone()),
    );
    let channel = Arc::new(
        WsControlChannel::new(config.broker_url.clone())
            .with_subscribe_timeout(config.subscribe_timeout),
    );
    let downloader = Downloader::new(store.clone(), Arc::new(ReqwestHttpClient::new()))
        .with_range_resume(config.range_resume)
        .with_hash_policy(config.hash_policy);
    let run_token = RunToken::new();
    let applier = Applier::new(store.clone(), platform.clone(), config.staging_dir())
        .with_shutdown_timeout(config.shutdown_timeout)
        .with_run_token(run_token.clone());

    let (session, actor) = UpdateSession::spawn(
        config.session_config(),
        store,
        channel,
        platform,
        downloader,
        applier,
    );

    let mut events = session.subscribe();
    session.start().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => handle_event(&session, &config, event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} update events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        if run_token.is_cancelled() {
            info!("Update handed to device reset, leaving main loop");
            break;
        }
    }

    session.stop().await;
    if let Err(e) = actor.await {
        error!("Session task ended abnormally: {}", e);
    }
    Ok(())
}

async fn handle_event(session: &UpdateSession, config: &AgentConfig, event: UpdateEvent) {
    let result = match &event {
        UpdateEvent::Available(record) => {
            info!("Update '{}' ({}) available", record.id, record.version);
            if config.auto_retrieve {
                session.retrieve_update(record).await
            } else {
                Ok(())
            }
        }
        UpdateEvent::Retrieved(record) => {
            info!("Update '{}' ready to apply", record.id);
            if config.auto_apply {
                session.apply_update(record).await
            } else {
                Ok(())
            }
        }
        UpdateEvent::Success(record) => {
            info!("Running update '{}' ({})", record.id, record.version);
            Ok(())
        }
        UpdateEvent::Failure { record, reason } => {
            warn!("Update '{}' failed: {}", record.id, reason);
            Ok(())
        }
    };

    match result {
        Ok(()) => {}
        // Another task owns the session; the update is offered again later
        Err(e @ (OtaError::InvalidState { .. } | OtaError::ConfirmationPending { .. })) => {
            info!("Deferred {} for '{}': {}", event.kind(), event.record().id, e)
        }
        Err(e) => error!("Handling {} for '{}' failed: {}", event.kind(), event.record().id, e),
    }
}
