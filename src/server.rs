//! HTTP endpoint.
//!
//! `GET /scan` runs the full pipeline. `GET /devices` lists everything in
//! one window, and `GET /devices/:address/gatt` reads the device the
//! caller picked from that list.
//!
//! Requests take turns on the adapter. Each one runs on its own task so a
//! timeout can abort it and a panic turns into a 500.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::session::{ScanResponse, ScanSession};

/// Shared state for the handlers.
#[derive(Clone)]
pub struct AppState {
    session: ScanSession,
    request_timeout: Duration,
    adapter_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// Create handler state around a session.
    pub fn new(session: ScanSession, request_timeout: Duration) -> Self {
        Self {
            session,
            request_timeout,
            adapter_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run one BLE job with exclusive use of the adapter.
    async fn run_exclusive<F, Fut>(&self, job: F) -> (StatusCode, Json<ScanResponse>)
    where
        F: FnOnce(ScanSession) -> Fut + Send,
        Fut: Future<Output = ScanResponse> + Send + 'static,
    {
        let marker = self.session.config().marker.clone();
        let lock = self.adapter_lock.clone();
        let work = job(self.session.clone());

        let handle = tokio::spawn(async move {
            let _guard = lock.lock().await;
            work.await
        });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.request_timeout, handle).await {
            Ok(Ok(response)) => (StatusCode::OK, Json(response)),
            Ok(Err(e)) => {
                error!("BLE job failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ScanResponse::internal_error(&marker, e.to_string())),
                )
            }
            Err(_) => {
                warn!("BLE job exceeded {:?}, aborting", self.request_timeout);
                abort.abort();
                (StatusCode::OK, Json(ScanResponse::timeout(&marker)))
            }
        }
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scan", get(scan))
        .route("/devices", get(devices))
        .route("/devices/:address/gatt", get(device_gatt))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router until the process exits.
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn scan(State(state): State<AppState>) -> (StatusCode, Json<ScanResponse>) {
    info!("GET /scan");
    state
        .run_exclusive(|session| async move { session.run().await })
        .await
}

async fn devices(State(state): State<AppState>) -> (StatusCode, Json<ScanResponse>) {
    info!("GET /devices");
    state
        .run_exclusive(|session| async move { session.discover_all().await })
        .await
}

async fn device_gatt(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> (StatusCode, Json<ScanResponse>) {
    info!("GET /devices/{}/gatt", address);
    state
        .run_exclusive(|session| async move { session.read_device(&address).await })
        .await
}
