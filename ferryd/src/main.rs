use std::process;

use clap::{Arg, Command};
use env_logger::Env;
use log::{error, info};
use tokio::signal;

mod config;
mod daemon;

use config::Config;
use daemon::Daemon;

#[tokio::main]
async fn main() {
    let matches = Command::new("ferryd")
        .version("0.1.0")
        .about("Ferry Daemon - remote filesystem agent on a shared pub/sub channel")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/ferry/ferryd.toml"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {:#}", e);
            process::exit(1);
        }
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(config.logging.level.as_str()))
        .init();

    info!("Starting Ferry Daemon");
    info!("Config file: {}", config_path);

    let mut daemon = Daemon::new(config);

    if let Err(e) = daemon.start().await {
        error!("Failed to start daemon: {:#}", e);
        process::exit(1);
    }

    info!("Ferry Daemon started successfully");

    signal::ctrl_c().await.expect("Failed to listen for ctrl+c");

    info!("Shutting down Ferry Daemon");
    daemon.stop().await;
}
