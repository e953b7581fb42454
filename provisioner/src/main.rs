//! clawctl - Entry Point
//!
//! Provisioning and lifecycle orchestrator for single-VM agent deployments
//! on Google Cloud. Serves the HTTP control surface by default.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::Context;
use clawctl::app::options::AppOptions;
use clawctl::app::run::run;
use clawctl::app::state::AppState;
use clawctl::cloud::MemoryCloud;
use clawctl::deploy::PipelineSettings;
use clawctl::filesys::file::File;
use clawctl::logs::{init_logging, LogLevel, LogOptions};
use clawctl::models::DeploymentRequest;
use clawctl::storage::layout::StorageLayout;
use clawctl::storage::settings::Settings;
use clawctl::store::MemoryStore;
use clawctl::utils::version_info;
use control_api::{DeployBody, DeployResponse};

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    if let Err(e) = dispatch(cli_args).await {
        eprintln!("clawctl: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(cli_args: HashMap<String, String>) -> anyhow::Result<()> {
    // Print version and exit
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version_info())?);
        return Ok(());
    }

    // Render a boot payload without touching the cloud
    if let Some(path) = cli_args.get("render") {
        let request = read_request(path).await?;
        let state = offline_state();
        let payload = state.pipeline.preflight(&request)?;
        println!("{}", payload.script);
        return Ok(());
    }

    let layout = match cli_args.get("home") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file, falling back to defaults when absent
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let mut settings = if settings_file.exists().await {
        settings_file
            .read_json::<Settings>()
            .await
            .with_context(|| format!("reading {}", settings_file.path().display()))?
    } else {
        Settings::default()
    };
    if let Some(level) = cli_args.get("log-level") {
        settings.log_level = level.parse::<LogLevel>().map_err(anyhow::Error::msg)?;
    }
    if let Some(port) = cli_args.get("port") {
        settings.server.port = port.parse().context("--port")?;
    }
    settings.validate()?;

    // Initialize logging; the guard flushes the log file on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings.log_to_file.then(|| layout.logs_dir()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the whole pipeline against the in-memory cloud
    if let Some(path) = cli_args.get("dry-run") {
        let request = read_request(path).await?;
        let state = offline_state();
        let payload = state.pipeline.preflight(&request)?;
        let report = state.pipeline.deploy(&request).await?;
        let response = DeployResponse::from(report);
        println!("{}", serde_json::to_string_pretty(&response)?);
        println!("{}", payload.script);
        return Ok(());
    }

    let options = AppOptions::from_settings(&settings, layout);
    info!("Running clawctl with options: {:?}", options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run clawctl: {e}");
        return Err(e.into());
    }
    Ok(())
}

async fn read_request(path: &str) -> anyhow::Result<DeploymentRequest> {
    let body = File::new(path)
        .read_json::<DeployBody>()
        .await
        .with_context(|| format!("reading deploy request {path}"))?;
    Ok(DeploymentRequest::from(body))
}

fn offline_state() -> AppState {
    AppState::new(
        Arc::new(MemoryCloud::new()),
        Arc::new(MemoryStore::new()),
        PipelineSettings::immediate(),
    )
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Unable to install signal handlers, waiting for Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
