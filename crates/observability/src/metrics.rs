//! Prometheus-kompatible Metriken fuer Mediabridge
//!
//! Registrierte Metriken:
//! - `mediabridge_channels_active` – Gauge: Offene Kanaele
//! - `mediabridge_mixers_active` – Gauge: Laufende Mixer
//! - `mediabridge_rtp_packets_received_total` – Counter: Empfangene RTP-Pakete
//! - `mediabridge_rtp_packets_sent_total` – Counter: Gesendete RTP-Pakete
//! - `mediabridge_jitter_dropped_total` – Counter: Vom Jitter Buffer verworfene Pakete
//! - `mediabridge_jitter_overflows_total` – Counter: Jitter-Buffer-Flushes
//! - `mediabridge_decrypt_failures_total` – Counter: Fehlgeschlagene Entschluesselungen
//! - `mediabridge_dtmf_digits_total` – Counter: Empfangene und gesendete DTMF-Ziffern
//! - `mediabridge_ports_free` – Gauge: Freie RTP-Port-Paare
//!
//! Die Werte stammen aus `MedienEngine::telemetrie()` und werden vom Server
//! einmal pro Sekunde per [`MediabridgeMetriken::aktualisieren`] uebernommen.

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use mediabridge_engine::EngineTelemetrie;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Mediabridge-Prometheus-Metriken
#[derive(Clone)]
pub struct MediabridgeMetriken {
    pub registry: Arc<Registry>,

    // Zustand
    pub channels_active: IntGauge,
    pub mixers_active: IntGauge,
    pub ports_free: IntGauge,

    // Zaehler
    pub rtp_packets_received_total: IntCounter,
    pub rtp_packets_sent_total: IntCounter,
    pub jitter_dropped_total: IntCounter,
    pub jitter_overflows_total: IntCounter,
    pub decrypt_failures_total: IntCounter,
    pub dtmf_digits_total: IntCounter,
}

fn gauge(registry: &Registry, name: &str, hilfe: &str) -> Result<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

/// Hebt einen Counter auf einen absoluten Stand an (Counter fallen nie)
fn nachziehen(counter: &IntCounter, stand: u64) {
    let aktuell = counter.get();
    if stand > aktuell {
        counter.inc_by(stand - aktuell);
    }
}

impl MediabridgeMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let channels_active = gauge(
            &registry,
            "mediabridge_channels_active",
            "Anzahl offener RTP-Kanaele",
        )?;
        let mixers_active = gauge(
            &registry,
            "mediabridge_mixers_active",
            "Anzahl laufender Mixer",
        )?;
        let ports_free = gauge(
            &registry,
            "mediabridge_ports_free",
            "Freie RTP/RTCP-Port-Paare im Pool",
        )?;

        let rtp_packets_received_total = zaehler(
            &registry,
            "mediabridge_rtp_packets_received_total",
            "Gesamtanzahl empfangener RTP-Pakete",
        )?;
        let rtp_packets_sent_total = zaehler(
            &registry,
            "mediabridge_rtp_packets_sent_total",
            "Gesamtanzahl gesendeter RTP-Pakete",
        )?;
        let jitter_dropped_total = zaehler(
            &registry,
            "mediabridge_jitter_dropped_total",
            "Vom Jitter Buffer verworfene Pakete (Duplikate, Fenster, Flush)",
        )?;
        let jitter_overflows_total = zaehler(
            &registry,
            "mediabridge_jitter_overflows_total",
            "Jitter-Buffer-Ueberlaeufe mit Flush",
        )?;
        let decrypt_failures_total = zaehler(
            &registry,
            "mediabridge_decrypt_failures_total",
            "Fehlgeschlagene SRTP-Entschluesselungen",
        )?;
        let dtmf_digits_total = zaehler(
            &registry,
            "mediabridge_dtmf_digits_total",
            "Empfangene und gesendete DTMF-Ziffern",
        )?;

        #[cfg(target_os = "linux")]
        {
            let prozess = prometheus::process_collector::ProcessCollector::for_self();
            registry.register(Box::new(prozess))?;
        }

        Ok(Self {
            registry: Arc::new(registry),
            channels_active,
            mixers_active,
            ports_free,
            rtp_packets_received_total,
            rtp_packets_sent_total,
            jitter_dropped_total,
            jitter_overflows_total,
            decrypt_failures_total,
            dtmf_digits_total,
        })
    }

    /// Uebernimmt einen Telemetrie-Snapshot der Engine
    pub fn aktualisieren(&self, t: &EngineTelemetrie) {
        self.channels_active.set(t.kanaele_aktiv as i64);
        self.mixers_active.set(t.mixer_aktiv as i64);
        self.ports_free.set(t.ports_frei as i64);
        nachziehen(&self.rtp_packets_received_total, t.pakete_empfangen);
        nachziehen(&self.rtp_packets_sent_total, t.pakete_gesendet);
        nachziehen(&self.jitter_dropped_total, t.jitter_verworfen);
        nachziehen(&self.jitter_overflows_total, t.jitter_ueberlaeufe);
        nachziehen(&self.decrypt_failures_total, t.entschluesselung_fehlgeschlagen);
        nachziehen(&self.dtmf_digits_total, t.dtmf_ziffern);
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: MediabridgeMetriken) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<MediabridgeMetriken>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(fehler = %err, "Metriken-Export fehlgeschlagen");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = MediabridgeMetriken::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn telemetrie_wird_uebernommen() {
        let metriken = MediabridgeMetriken::neu().unwrap();
        let mut t = EngineTelemetrie {
            kanaele_aktiv: 4,
            mixer_aktiv: 1,
            pakete_empfangen: 100,
            dtmf_ziffern: 3,
            ports_frei: 10,
            ..Default::default()
        };
        metriken.aktualisieren(&t);
        assert_eq!(metriken.channels_active.get(), 4);
        assert_eq!(metriken.rtp_packets_received_total.get(), 100);
        assert_eq!(metriken.ports_free.get(), 10);

        // Counter folgen dem absoluten Stand und fallen nie
        t.pakete_empfangen = 150;
        t.kanaele_aktiv = 2;
        metriken.aktualisieren(&t);
        assert_eq!(metriken.rtp_packets_received_total.get(), 150);
        assert_eq!(metriken.channels_active.get(), 2);

        t.pakete_empfangen = 20;
        metriken.aktualisieren(&t);
        assert_eq!(metriken.rtp_packets_received_total.get(), 150);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = MediabridgeMetriken::neu().unwrap();
        metriken.channels_active.set(5);
        metriken.dtmf_digits_total.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("mediabridge_channels_active 5"));
        assert!(output.contains("mediabridge_dtmf_digits_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn alle_metriken_in_registry_registriert() {
        let metriken = MediabridgeMetriken::neu().unwrap();
        let families = metriken.registry.gather();
        let namen: Vec<&str> = families.iter().map(|f| f.get_name()).collect();

        for name in [
            "mediabridge_channels_active",
            "mediabridge_mixers_active",
            "mediabridge_rtp_packets_received_total",
            "mediabridge_rtp_packets_sent_total",
            "mediabridge_jitter_dropped_total",
            "mediabridge_jitter_overflows_total",
            "mediabridge_decrypt_failures_total",
            "mediabridge_dtmf_digits_total",
            "mediabridge_ports_free",
        ] {
            assert!(namen.contains(&name), "{name} fehlt");
        }
    }
}
