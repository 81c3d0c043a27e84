//! mediabridge-server – Bibliotheks-Root
//!
//! Verdrahtet Media-Engine, Ereignis-Protokollierung und Observability zu
//! einem lauffaehigen Prozess. Die Steuerungsebene (Signalisierung) ist
//! nicht Teil des Servers; Ereignisse werden strukturiert geloggt.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use config::ServerConfig;
use mediabridge_codec::CodecBibliothek;
use mediabridge_core::{EreignisSenke, MedienEreignis};
use mediabridge_engine::MedienEngine;
use mediabridge_observability::{observability_server_starten, HealthState, MediabridgeMetriken};
use tokio::sync::{mpsc, watch};

/// Intervall in dem Engine-Telemetrie in Metriken und Health uebernommen wird
const TELEMETRIE_INTERVALL: Duration = Duration::from_secs(1);

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Codec-Bibliothek und Ereignis-Kanal anlegen
    /// 2. Worker-Pool der Media-Engine starten
    /// 3. Observability-Server (`/metrics`, `/health`) starten
    /// 4. Telemetrie periodisch uebernehmen
    /// 5. Auf Ctrl-C warten, dann Engine geordnet herunterfahren
    pub async fn starten(self) -> Result<()> {
        let engine_config = self.config.engine_config();
        tracing::info!(
            worker = engine_config.effektive_worker_anzahl(),
            ports_von = engine_config.ports.von,
            ports_bis = engine_config.ports.bis,
            observability = %self.config.observability_bind_adresse(),
            "Server startet"
        );

        let bibliothek = Arc::new(CodecBibliothek::standard());
        let (ereignis_tx, ereignis_rx) = mpsc::unbounded_channel::<MedienEreignis>();
        let ereignis_task = tokio::spawn(ereignisse_protokollieren(ereignis_rx));

        let senke: Arc<dyn EreignisSenke> = Arc::new(ereignis_tx);
        let engine = Arc::new(MedienEngine::starten(engine_config, bibliothek, senke)?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metriken = MediabridgeMetriken::neu()?;
        let health = HealthState::neu();

        let observability_task = if self.config.observability.aktiviert {
            let bind = self.config.observability_bind_adresse();
            let (m, h, rx) = (metriken.clone(), health.clone(), shutdown_rx.clone());
            Some(tokio::spawn(async move {
                if let Err(e) = observability_server_starten(bind, m, h, rx).await {
                    tracing::error!(fehler = %e, "Observability-Server fehlgeschlagen");
                }
            }))
        } else {
            tracing::info!("Observability-Server deaktiviert");
            None
        };

        let telemetrie_task = tokio::spawn(telemetrie_uebernehmen(
            Arc::clone(&engine),
            metriken,
            health,
            shutdown_rx,
        ));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        shutdown_tx.send_replace(true);

        // Worker-Threads joinen blockiert; nicht auf dem Runtime-Thread
        let engine_stopp = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine_stopp.herunterfahren()).await?;

        let _ = telemetrie_task.await;
        if let Some(task) = observability_task {
            let _ = task.await;
        }
        // Letzte Referenz auf die Senke faellt mit der Engine; danach endet der Log-Task
        drop(engine);
        let _ = ereignis_task.await;

        tracing::info!("Server beendet");
        Ok(())
    }
}

/// Schreibt alle Medien-Ereignisse als strukturierte Log-Zeilen
async fn ereignisse_protokollieren(mut rx: mpsc::UnboundedReceiver<MedienEreignis>) {
    while let Some(ereignis) = rx.recv().await {
        ereignis_loggen(&ereignis);
    }
    tracing::debug!("Ereignis-Kanal geschlossen");
}

fn ereignis_loggen(ereignis: &MedienEreignis) {
    match ereignis {
        MedienEreignis::KanalGeoeffnet { kanal_id, rtp_port } => {
            tracing::info!(kanal = %kanal_id, rtp_port, "Kanal geoeffnet");
        }
        MedienEreignis::KanalGeschlossen { kanal_id, grund } => {
            tracing::info!(kanal = %kanal_id, grund = %grund, "Kanal geschlossen");
        }
        MedienEreignis::DtmfEmpfangen { kanal_id, ziffer } => {
            tracing::info!(kanal = %kanal_id, ziffer = %ziffer, "DTMF empfangen");
        }
        MedienEreignis::AufnahmeBeendet {
            kanal_id,
            ziel,
            grund,
        } => {
            tracing::info!(kanal = %kanal_id, ziel = %ziel, grund = %grund, "Aufnahme beendet");
        }
        andere => {
            tracing::debug!(ereignis = ?andere, "Medien-Ereignis");
        }
    }
}

/// Kopiert den Telemetrie-Snapshot der Engine in Metriken und Health-State
async fn telemetrie_uebernehmen(
    engine: Arc<MedienEngine>,
    metriken: MediabridgeMetriken,
    health: HealthState,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut intervall = tokio::time::interval(TELEMETRIE_INTERVALL);
    intervall.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = intervall.tick() => {
                let t = engine.telemetrie();
                metriken.aktualisieren(&t);
                health.telemetrie_setzen(&t);
            }
            geaendert = shutdown_rx.changed() => {
                if geaendert.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
