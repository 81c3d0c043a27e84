//! Zaehler pro Worker und aggregierter Snapshot
//!
//! Jeder Worker besitzt eine `WorkerTelemetrie` aus Atomics. Kanaele melden
//! einmal pro Sekunde die Differenz ihrer Statistik seit der letzten Meldung;
//! die Engine summiert alle Worker zu einem `EngineTelemetrie`-Snapshot, den
//! der Server in die Prometheus-Metriken kopiert.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::channel::KanalStatistik;

/// Sekunden ohne Heartbeat, ab denen ein Worker als haengend gilt
pub const HEARTBEAT_TIMEOUT_SEKUNDEN: u64 = 5;

/// Laufende Zaehler eines Workers
#[derive(Debug, Default)]
pub struct WorkerTelemetrie {
    pub kanaele_aktiv: AtomicU64,
    pub mixer_aktiv: AtomicU64,
    pub pakete_empfangen: AtomicU64,
    pub pakete_gesendet: AtomicU64,
    pub jitter_verworfen: AtomicU64,
    pub jitter_ueberlaeufe: AtomicU64,
    pub entschluesselung_fehlgeschlagen: AtomicU64,
    pub dtmf_ziffern: AtomicU64,
    /// Unix-Sekunden des letzten Schleifendurchlaufs
    pub heartbeat: AtomicU64,
}

fn unix_sekunden() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl WorkerTelemetrie {
    pub fn heartbeat_setzen(&self) {
        self.heartbeat.store(unix_sekunden(), Ordering::Relaxed);
    }

    /// True wenn der Worker in den letzten Sekunden gelaufen ist
    pub fn lebendig(&self) -> bool {
        let letzter = self.heartbeat.load(Ordering::Relaxed);
        unix_sekunden().saturating_sub(letzter) < HEARTBEAT_TIMEOUT_SEKUNDEN
    }

    /// Addiert die Differenz zwischen zwei Statistik-Snapshots eines Kanals
    pub fn kanal_delta(&self, vorher: &KanalStatistik, jetzt: &KanalStatistik) {
        let d = |alt: u64, neu: u64| neu.saturating_sub(alt);
        self.pakete_empfangen
            .fetch_add(d(vorher.pakete_ein, jetzt.pakete_ein), Ordering::Relaxed);
        self.pakete_gesendet
            .fetch_add(d(vorher.pakete_aus, jetzt.pakete_aus), Ordering::Relaxed);
        self.jitter_verworfen.fetch_add(
            d(vorher.jitter.verworfen(), jetzt.jitter.verworfen()),
            Ordering::Relaxed,
        );
        self.jitter_ueberlaeufe.fetch_add(
            d(vorher.jitter.ueberlaeufe, jetzt.jitter.ueberlaeufe),
            Ordering::Relaxed,
        );
        self.entschluesselung_fehlgeschlagen.fetch_add(
            d(
                vorher.entschluesselung_fehlgeschlagen,
                jetzt.entschluesselung_fehlgeschlagen,
            ),
            Ordering::Relaxed,
        );
        self.dtmf_ziffern.fetch_add(
            d(
                vorher.dtmf_empfangen + vorher.dtmf_gesendet,
                jetzt.dtmf_empfangen + jetzt.dtmf_gesendet,
            ),
            Ordering::Relaxed,
        );
    }
}

/// Aggregierter Zustand aller Worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineTelemetrie {
    pub kanaele_aktiv: u64,
    pub mixer_aktiv: u64,
    pub pakete_empfangen: u64,
    pub pakete_gesendet: u64,
    pub jitter_verworfen: u64,
    pub jitter_ueberlaeufe: u64,
    pub entschluesselung_fehlgeschlagen: u64,
    pub dtmf_ziffern: u64,
    pub ports_frei: u64,
    pub ports_kapazitaet: u64,
    pub worker_anzahl: u64,
    pub worker_lebendig: u64,
}

impl EngineTelemetrie {
    /// Summiert die Zaehler aller Worker
    pub fn aus_workern<'a>(worker: impl IntoIterator<Item = &'a WorkerTelemetrie>) -> Self {
        let mut summe = Self::default();
        for w in worker {
            let l = |a: &AtomicU64| a.load(Ordering::Relaxed);
            summe.kanaele_aktiv += l(&w.kanaele_aktiv);
            summe.mixer_aktiv += l(&w.mixer_aktiv);
            summe.pakete_empfangen += l(&w.pakete_empfangen);
            summe.pakete_gesendet += l(&w.pakete_gesendet);
            summe.jitter_verworfen += l(&w.jitter_verworfen);
            summe.jitter_ueberlaeufe += l(&w.jitter_ueberlaeufe);
            summe.entschluesselung_fehlgeschlagen += l(&w.entschluesselung_fehlgeschlagen);
            summe.dtmf_ziffern += l(&w.dtmf_ziffern);
            summe.worker_anzahl += 1;
            if w.lebendig() {
                summe.worker_lebendig += 1;
            }
        }
        summe
    }
}
