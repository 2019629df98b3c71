use actix_web::{App, HttpServer, web};
use clap::Parser;
use dotenv::dotenv;
use log::{error, info};
use statter_engine::{Config, ProbeScheduler, QueryService, open_store, open_store_read_only};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

mod controllers;
mod models;
mod services;
mod state;

use controllers::responses::list_responses;
use controllers::service::list_services;
use services::health::health_check;
use state::AppState;

/// Serve service health and probe history over HTTP
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the YAML or JSON configuration file
    #[arg(short, long, env = "STATTER_CONFIG", default_value = "statter.yaml")]
    config: PathBuf,

    /// Listen port, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve the stored history without probing
    #[arg(long)]
    no_monitor: bool,
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/services", web::get().to(list_services))
        .route("/services/", web::get().to(list_services))
        .route("/responses", web::get().to(list_responses))
        .route("/responses/", web::get().to(list_responses));
}

fn to_io_error(err: statter_engine::MonitorError) -> io::Error {
    io::Error::other(err.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let args = Args::parse();
    let config = Arc::new(Config::load(&args.config).map_err(|e| {
        error!("Configuration from {} is invalid: {}", args.config.display(), e);
        to_io_error(e)
    })?);

    let (store, monitor) = if args.no_monitor {
        info!("Monitoring disabled, serving stored history only");
        let store = open_store_read_only(&config).await.map_err(to_io_error)?;
        (store, None)
    } else {
        let store = open_store(&config).await.map_err(to_io_error)?;
        let scheduler = ProbeScheduler::from_config(Arc::clone(&config), Arc::clone(&store))
            .map_err(to_io_error)?;
        (store, Some(scheduler.start()))
    };

    let data = web::Data::new(AppState::new(QueryService::new(
        config.services.clone(),
        store,
    )));

    let port = args.port.unwrap_or(config.port);
    info!("Server is live at http://0.0.0.0:{}", port);

    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
        .bind(("0.0.0.0", port))?
        .run()
        .await;

    if let Some(handle) = monitor {
        let report = handle.stop(config.drain_timeout()).await;
        info!(
            "Monitor stopped ({} drained, {} aborted)",
            report.drained, report.aborted
        );
    }

    server
}
