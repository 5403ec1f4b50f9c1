//! # Stepwise API Server
//!
//! The main entry point for the Actix-web HTTP server.

use std::sync::Arc;

use actix_web::middleware::from_fn;
use actix_web::{App, HttpServer, web};
use stepwise_core::ports::TokenService;
use stepwise_infra::JwtTokenService;
use tracing_actix_web::TracingLogger;

#[cfg(feature = "scheduler")]
mod background;
mod config;
mod handlers;
mod incidents;
mod middleware;
mod state;
mod telemetry;

use config::AppConfig;
use middleware::request_id::echo_request_id;
use state::AppState;
use telemetry::{TelemetryConfig, init_telemetry};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry);

    let config = AppConfig::from_env().map_err(std::io::Error::other)?;

    tracing::info!(
        "Starting Stepwise API Server on {}:{}",
        config.host,
        config.port
    );

    let incidents = incidents::reporter(config.incident_webhook_url.as_deref(), &telemetry.service_name);
    let state = AppState::new(&config, incidents)
        .await
        .map_err(std::io::Error::other)?;
    let tokens: Arc<dyn TokenService> = Arc::new(JwtTokenService::from_env());

    #[cfg(feature = "scheduler")]
    let mut scheduler = start_scheduler(&state, &config).await;

    let max_upload_bytes = config.max_upload_bytes;

    HttpServer::new(move || {
        App::new()
            .wrap(from_fn(echo_request_id))
            .wrap(TracingLogger::default())
            .app_data(web::PayloadConfig::new(max_upload_bytes))
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(tokens.clone()))
            .configure(handlers::configure_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    #[cfg(feature = "scheduler")]
    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!("Failed to stop scheduler: {}", e);
        }
    }

    Ok(())
}

#[cfg(feature = "scheduler")]
async fn start_scheduler(state: &AppState, config: &AppConfig) -> Option<background::Scheduler> {
    use background::{Scheduler, SchedulerConfig};

    let result = async {
        let scheduler = Scheduler::new(SchedulerConfig::from_env()).await?;
        scheduler
            .add_prune_job(state.window_store().clone(), config.limits.longest_window())
            .await?;
        scheduler.start().await?;
        Ok::<_, tokio_cron_scheduler::JobSchedulerError>(scheduler)
    }
    .await;

    result
        .map_err(|e| tracing::error!("Failed to start scheduler: {}. Pruning disabled.", e))
        .ok()
}
