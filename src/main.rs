use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenv::dotenv;
use std::env;
use std::sync::Arc;
use tokio::sync::broadcast;

// Internal modules
mod detector;
mod engine;
mod haptics;
mod model;
mod notify;
mod sensor;
mod settings;
mod store;
#[cfg(test)]
mod tests;
mod websockets;

use crate::detector::DetectionConfig;
use crate::engine::FallDetectionEngine;
use crate::haptics::LogHaptics;
use crate::notify::{broadcast_observer, BroadcastNotifier};
use crate::sensor::StreamSensorSource;
use crate::settings::{EnvSettings, SettingsProvider};
use crate::store::SqliteEventStore;
use crate::websockets::ws_handler;

/// **Global Application State**
///
/// Shared by every connected client:
/// - `engine`: the fall detection engine instance.
/// - `store`: SQLite event log behind the history API.
/// - `sensor`: ingest point the WebSocket handler feeds samples into.
/// - `tx`: broadcast channel carrying live data and alerts to dashboards.
pub struct AppState {
    pub engine: Arc<FallDetectionEngine>,
    pub store: Arc<SqliteEventStore>,
    pub sensor: Arc<StreamSensorSource>,
    pub tx: broadcast::Sender<String>,
}

/// **GET /api/history**
///
/// The last 20 fall events, newest first; populates the dashboard event log.
async fn get_history(data: web::Data<AppState>) -> impl Responder {
    match data.store.recent(20).await {
        Ok(logs) => HttpResponse::Ok().json(logs),
        Err(err) => {
            log::error!("❌ history query failed: {err}");
            HttpResponse::InternalServerError().body("Error fetching events")
        }
    }
}

/// **GET /api/status**
///
/// Live engine snapshot for the dashboard header.
async fn get_status(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.engine.status().await)
}

/// **Application Entry Point**
///
/// Initializes the event log, the broadcast system, the fall detection
/// engine, and starts the HTTP server.
#[tokio::main]
async fn main() -> std::io::Result<()> {
    // 1. Environment + logging
    dotenv().ok();
    env_logger::init();

    // 2. Event log (SQLite pool, schema bootstrap, 30-day retention)
    let database_url = env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:milo_fallwatch.db?mode=rwc".to_string());
    let store = Arc::new(
        SqliteEventStore::connect(&database_url)
            .await
            .expect("failed to open event log"),
    );
    match store.prune_older_than(30).await {
        Ok(0) => {}
        Ok(pruned) => log::info!("pruned {pruned} fall events past retention"),
        Err(err) => log::warn!("retention prune failed: {err}"),
    }

    // 3. Broadcast system (capacity 100, oldest dropped under pressure)
    let (tx, _rx) = broadcast::channel(100);

    // 4. Fall detection engine and its collaborators
    let sensor = Arc::new(StreamSensorSource::new());
    let settings_provider = Arc::new(EnvSettings);
    let user_id = env::var("MILO_USER_ID").unwrap_or_else(|_| "senior-1".to_string());
    let engine = Arc::new(FallDetectionEngine::new(
        sensor.clone(),
        store.clone(),
        Arc::new(BroadcastNotifier::new(tx.clone())),
        Arc::new(LogHaptics),
        settings_provider.clone(),
        user_id,
        DetectionConfig::default(),
    ));

    engine.on_fall_event(broadcast_observer(tx.clone()));

    let settings = settings_provider.get().await;
    if settings.fall_detection_enabled {
        if !engine.start(None).await {
            log::warn!("fall detection could not be enabled at startup");
        }
    } else {
        log::info!("fall detection disabled by settings");
    }

    // 5. Initialize global state
    let app_state = web::Data::new(AppState {
        engine,
        store,
        sensor,
        tx,
    });

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    log::info!("🚀 milo-fallwatch listening at http://{bind_addr}");

    // 6. Start the HTTP server
    HttpServer::new(move || {
        let cors = actix_cors::Cors::permissive();

        App::new()
            .wrap(cors)
            .app_data(app_state.clone())
            .route("/api/history", web::get().to(get_history))
            .route("/api/status", web::get().to(get_status))
            .route("/ws", web::get().to(ws_handler))
    })
    .bind(bind_addr)?
    .run()
    .await
}
