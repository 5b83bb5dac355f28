//! Server binary: `server [config_path]`, default `config.ini`.

use clap::Parser;
use server::config::{default_config_text, Config, ConfigError};
use server::{banner, logging, signal, Server};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "server")]
#[command(about = "RESP-compatible key/value server")]
struct Args {
    /// Path to the configuration file (default: config.ini)
    config: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print!("{}", default_config_text());
        return;
    }

    logging::init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    banner::print_banner(&config, config.worker_threads().max(1));

    let server = match Server::new(config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            eprintln!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    {
        let server = server.clone();
        signal::install(move || server.stop());
    }

    if let Err(e) = server.run() {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// An explicitly named config must exist; the default path falls back to
/// built-in defaults when absent.
fn load_config(args: &Args) -> Result<Config, ConfigError> {
    match &args.config {
        Some(path) => Config::load(path),
        None => {
            let default = Path::new("config.ini");
            if default.exists() {
                Config::load(default)
            } else {
                tracing::info!("no config.ini found, using defaults");
                Ok(Config::default())
            }
        }
    }
}
