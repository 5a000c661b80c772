// src/main.rs

//! The main entry point for the Sandmail application.

use anyhow::Result;
use sandmail::config::{Config, Role};
use sandmail::server;
use std::env;
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    // Define version information.
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("Sandmail version {VERSION}");
        return Ok(());
    }

    // An explicit --config must exist; the default path may be absent, in
    // which case the built-in defaults are used.
    let explicit_config = flag_value(&args, "--config");
    let config_path = explicit_config.unwrap_or("config.toml");
    let loaded = match explicit_config {
        Some(path) => Config::from_file(path),
        None => Config::from_file_or_default(config_path),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    // Override port if provided as a command-line argument
    if args.iter().any(|arg| arg == "--port") {
        match flag_value(&args, "--port").map(str::parse::<u16>) {
            Some(Ok(port)) => config.smtp.port = port,
            Some(Err(_)) => {
                eprintln!("Invalid port number: {}", flag_value(&args, "--port").unwrap_or_default());
                std::process::exit(1);
            }
            None => {
                eprintln!("--port flag requires a value");
                std::process::exit(1);
            }
        }
    }

    if args.iter().any(|arg| arg == "--role") {
        match flag_value(&args, "--role").map(str::parse::<Role>) {
            Some(Ok(role)) => config.role = role,
            Some(Err(e)) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
            None => {
                eprintln!("--role flag requires a value (service or ui)");
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // RUST_LOG takes precedence over the configured level.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();

    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {:#}", e);
        return Err(e);
    }

    Ok(())
}

/// Returns the value following `flag`, if any.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
