//! Wallet service binary
//!
//! Opens the ledger, serves `/metrics` and `/health`, logs balance events and
//! runs the voucher expiry sweep until interrupted.

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use anyhow::Context;
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use wallet::{Config, WalletService};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting wallet service");

    // Load configuration
    let config = match std::env::var("WALLET_CONFIG") {
        Ok(path) => {
            let mut config = Config::from_file(&path).with_context(|| format!("loading {}", path))?;
            config.apply_env()?;
            config
        }
        Err(_) => Config::from_env()?,
    };

    let service = Arc::new(WalletService::open(config.clone())?);
    tracing::info!(
        data_dir = ?config.ledger.data_dir,
        version = %config.service_version,
        "Ledger opened successfully"
    );

    tokio::spawn(log_balance_events(service.clone()));
    tokio::spawn(expiry_sweep(
        service.clone(),
        Duration::from_secs(config.voucher.expiry_sweep_interval_secs),
    ));

    tracing::info!(addr = %config.metrics_listen_addr, "Serving metrics");
    let data = web::Data::from(service);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/health", web::get().to(health_check))
            .route("/metrics", web::get().to(prometheus_metrics))
    })
    .bind(&config.metrics_listen_addr)
    .with_context(|| format!("binding metrics listener on {}", config.metrics_listen_addr))?
    .run()
    .await?;

    tracing::info!("Shutting down wallet service");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("WALLET_LOG_JSON").map_or(false, |v| v == "1") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn health_check(service: web::Data<WalletService>) -> impl Responder {
    let config = service.config();
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: config.service_name.clone(),
        version: config.service_version.clone(),
    })
}

async fn prometheus_metrics(service: web::Data<WalletService>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = service.engine().metrics().registry().gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().body(format!("Failed to encode metrics: {}", e))
        }
    }
}

async fn log_balance_events(service: Arc<WalletService>) {
    let mut events = service.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(payload) => tracing::debug!(
                    account_id = %event.account_id,
                    balance = %event.new_balance,
                    event = %payload,
                    "balance_changed"
                ),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize balance event"),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Balance event logger lagged")
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn expiry_sweep(service: Arc<WalletService>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if let Err(e) = service.vouchers().expire_due(Utc::now()).await {
            tracing::error!(error = %e, "Voucher expiry sweep failed");
        }
    }
}
