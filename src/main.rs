use std::path::PathBuf;

use ::tracing::{error, info_span};
use clap::Parser;
use service::Service;

mod config;
mod data_model;
mod http_objects;
mod keys;
mod middleware;
mod pipeline;
mod routes;
mod service;
mod tracing;
mod transcode;
mod validation;
use crate::tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match config::ServerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading config: {:?}", err);
            std::process::exit(1);
        }
    };

    let telemetry = match setup_tracing(&config) {
        Ok(telemetry) => telemetry,
        Err(err) => {
            eprintln!("Error setting up tracing: {:?}", err);
            std::process::exit(1);
        }
    };

    let root_span = info_span!(
        "imgdrop",
        env = config.env,
        "imgdrop-instance" = config.instance_id()
    );
    let _guard = root_span.enter();

    match Service::new(config) {
        Ok(service) => {
            if let Err(err) = service.start().await {
                error!("Error starting service: {:?}", err);
            }
        }
        Err(err) => error!("Error creating service: {:?}", err),
    }

    // export traces and metrics before shutdown
    telemetry.shutdown();
}
