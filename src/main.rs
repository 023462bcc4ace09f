use std::path::Path;

use actix_web::{web, App, HttpServer};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use warp_vault::api;
use warp_vault::app_state::AppState;
use warp_vault::config::AppConfig;

fn init_logging(config_file: &str) {
    if Path::new(config_file).exists() {
        if let Err(e) = log4rs::init_file(config_file, Default::default()) {
            eprintln!("Failed to initialize log4rs from {}: {}", config_file, e);
        } else {
            return;
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    warn!("Log configuration {} not usable, logging to stderr", config_file);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = AppConfig::load().map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    init_logging(&config.logging.config_file);

    let app_state = AppState::from_config(config.clone()).map_err(|e| {
        error!("Failed to initialize application state: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    let shutdown = CancellationToken::new();
    let sweeper = if config.sweeper.enabled {
        Some(std::sync::Arc::new(app_state.sweeper()).start_background(shutdown.clone()))
    } else {
        info!("Orphan sweeper disabled");
        None
    };

    let bind = (config.server.host.clone(), config.server.port);
    info!("Starting server on {}:{}", bind.0, bind.1);

    let data = web::Data::new(app_state);
    let result = HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(data.clone())
            .configure(api::configure)
    })
    .workers(config.server.workers.max(1))
    .bind(bind)?
    .run()
    .await;

    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    result
}
