//! Health-Check-Endpunkt fuer Mediabridge
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Worker-Lebendigkeit

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use mediabridge_engine::EngineTelemetrie;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub workers: u64,
    pub workers_alive: u64,
    pub channels_active: u64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    worker: Arc<AtomicU64>,
    worker_lebendig: Arc<AtomicU64>,
    kanaele: Arc<AtomicU64>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            worker: Arc::new(AtomicU64::new(0)),
            worker_lebendig: Arc::new(AtomicU64::new(0)),
            kanaele: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Uebernimmt Worker-Anzahl und Lebendigkeit aus einem Engine-Snapshot
    pub fn telemetrie_setzen(&self, t: &EngineTelemetrie) {
        self.worker.store(t.worker_anzahl, Ordering::Relaxed);
        self.worker_lebendig
            .store(t.worker_lebendig, Ordering::Relaxed);
        self.kanaele.store(t.kanaele_aktiv, Ordering::Relaxed);
    }

    /// Alle Worker lebendig = healthy, einige = degraded, keiner = unhealthy
    pub fn status(&self) -> HealthStatus {
        let gesamt = self.worker.load(Ordering::Relaxed);
        let lebendig = self.worker_lebendig.load(Ordering::Relaxed);
        if gesamt > 0 && lebendig >= gesamt {
            HealthStatus::Healthy
        } else if lebendig > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    pub fn antwort(&self) -> HealthResponse {
        HealthResponse {
            status: self.status(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            workers: self.worker.load(Ordering::Relaxed),
            workers_alive: self.worker_lebendig.load(Ordering::Relaxed),
            channels_active: self.kanaele.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Engine-Status zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();
    let http_status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK, // 200 auch bei degraded (Probe soll nicht failen)
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(response))
}
