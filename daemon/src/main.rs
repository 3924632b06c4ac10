//! pushdeploy - Entry Point
//!
//! Push-webhook deployment daemon.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use colored::Colorize;
use tracing::{error, info};

use pushdeploy::app::run::run;
use pushdeploy::config::{Config, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use pushdeploy::logs::{init_logging, LogOptions};
use pushdeploy::notify::Notifier;
use pushdeploy::utils::version_info;

#[tokio::main]
async fn main() -> ExitCode {
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

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    // Resolve and load the configuration
    let config_path = cli_args
        .get("config")
        .cloned()
        .or_else(|| env::var(CONFIG_PATH_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match Config::load(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Invalid configuration:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    if cli_args.contains_key("check-config") {
        print_config_summary(&config_path, &config);
        return ExitCode::SUCCESS;
    }

    // Initialize logging; the guard flushes the log file on exit
    let log_options = LogOptions {
        log_level: config.logging.level.clone(),
        log_file: config.logging.file.clone(),
        json_format: config.logging.json,
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    if cli_args.contains_key("test-notify") {
        return test_notify(&config).await;
    }

    info!(
        "Running pushdeploy {} ({}) with config {}",
        version.version, version.git_hash, config_path
    );
    match run(config, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run pushdeploy: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn test_notify(config: &Config) -> ExitCode {
    let notifier = match Notifier::from_config(&config.notification) {
        Ok(notifier) => notifier,
        Err(e) => {
            error!("Cannot build notification channels: {e}");
            return ExitCode::FAILURE;
        }
    };
    if notifier.is_empty() {
        println!("{}", "No notification channel is enabled".yellow());
        return ExitCode::SUCCESS;
    }

    match notifier.send_test_notification().await {
        Ok(()) => {
            println!("{}", "Test notification sent".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{} {}", "Test notification failed:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_config_summary(path: &str, config: &Config) {
    println!("{} {}", "Configuration OK:".green().bold(), path);
    println!(
        "  listen      {}:{}",
        config.server.host, config.server.port
    );
    println!(
        "  endpoints   POST {}  GET {}",
        config.webhook.path, config.server.deploys_path
    );
    println!("  database    {}", config.database.path.display());
    println!(
        "  timeout     {}s per command",
        config.execution.command_timeout_secs
    );

    println!("  {}", "deployments".bold());
    if config.deployments.is_empty() {
        println!("    {}", "none configured".yellow());
    }
    for spec in &config.deployments {
        let dir_state = if spec.work_dir.is_dir() {
            "ok".green()
        } else {
            "missing".red()
        };
        println!(
            "    {} {} @ {} -> {} [{}] ({} commands)",
            "-".dimmed(),
            spec.name.cyan(),
            spec.repository,
            spec.work_dir.display(),
            dir_state,
            spec.commands.len()
        );
    }

    let on_off = |enabled: bool| if enabled { "enabled".green() } else { "disabled".dimmed() };
    println!("  {}", "notifications".bold());
    println!("    chat   {}", on_off(config.notification.webhook.enabled));
    println!("    email  {}", on_off(config.notification.email.enabled));
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to listen for SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to listen for SIGINT");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
