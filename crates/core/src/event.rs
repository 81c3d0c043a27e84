//! Ereignisse an den Steuerungs-Kollaborator
//!
//! Die Media-Engine meldet Lifecycle- und Signalisierungs-Ereignisse ueber
//! einen tokio-Kanal an die Steuerungsebene. Die Engine blockiert dabei nie:
//! das Senden erfolgt nicht-blockierend, ein geschlossener Empfaenger wird
//! ignoriert.

use crate::types::{KanalId, MixerId};
use serde::{Deserialize, Serialize};

/// Alle Ereignisse die von der Media-Engine gemeldet werden
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MedienEreignis {
    // --- Kanal-Lifecycle ---
    /// Kanal wurde geoeffnet und tickt
    KanalGeoeffnet { kanal_id: KanalId, rtp_port: u16 },
    /// Kanal wurde geschlossen (Grund: "idle", "no port", "requested", ...)
    KanalGeschlossen { kanal_id: KanalId, grund: String },

    // --- DTMF ---
    /// Eine DTMF-Ziffer wurde empfangen (RFC 2833)
    DtmfEmpfangen { kanal_id: KanalId, ziffer: char },

    // --- Wiedergabe ---
    /// Wiedergabe gestartet (kein vorheriger Player)
    WiedergabeGestartet { kanal_id: KanalId, wiedergabe: String },
    /// Laufende Wiedergabe durch eine neue ersetzt
    WiedergabeErsetzt { kanal_id: KanalId, wiedergabe: String },
    /// Wiedergabe vollstaendig abgespielt
    WiedergabeBeendet { kanal_id: KanalId, wiedergabe: String },
    /// Wiedergabe durch DTMF oder Schliessen unterbrochen
    WiedergabeUnterbrochen { kanal_id: KanalId, wiedergabe: String },

    // --- Aufnahme ---
    /// Aufnahme hat begonnen zu schreiben
    AufnahmeGestartet { kanal_id: KanalId, ziel: String },
    /// Aufnahme beendet (Grund: "finished", "silence", "maxduration", "closed", ...)
    AufnahmeBeendet {
        kanal_id: KanalId,
        ziel: String,
        grund: String,
    },

    // --- Mixer ---
    /// Mixer wurde erstellt
    MixerErstellt { mixer_id: MixerId },
    /// Kanal wurde in einen Mixer aufgenommen
    MixerBeigetreten { mixer_id: MixerId, kanal_id: KanalId },
    /// Kanal hat den Mixer verlassen
    MixerVerlassen { mixer_id: MixerId, kanal_id: KanalId },
    /// Mixer hat keine Teilnehmer mehr und wurde beendet
    MixerBeendet { mixer_id: MixerId },
}

impl MedienEreignis {
    /// Gibt die betroffene KanalId zurueck (falls vorhanden)
    pub fn kanal_id(&self) -> Option<KanalId> {
        match self {
            Self::KanalGeoeffnet { kanal_id, .. }
            | Self::KanalGeschlossen { kanal_id, .. }
            | Self::DtmfEmpfangen { kanal_id, .. }
            | Self::WiedergabeGestartet { kanal_id, .. }
            | Self::WiedergabeErsetzt { kanal_id, .. }
            | Self::WiedergabeBeendet { kanal_id, .. }
            | Self::WiedergabeUnterbrochen { kanal_id, .. }
            | Self::AufnahmeGestartet { kanal_id, .. }
            | Self::AufnahmeBeendet { kanal_id, .. }
            | Self::MixerBeigetreten { kanal_id, .. }
            | Self::MixerVerlassen { kanal_id, .. } => Some(*kanal_id),
            Self::MixerErstellt { .. } | Self::MixerBeendet { .. } => None,
        }
    }
}

/// Senke fuer Medien-Ereignisse
///
/// Die Engine nutzt einen `tokio::sync::mpsc::UnboundedSender`; Tests koennen
/// eigene Senken einsetzen.
pub trait EreignisSenke: Send + Sync + 'static {
    /// Meldet ein Ereignis (darf nie blockieren)
    fn melden(&self, ereignis: MedienEreignis);
}

impl EreignisSenke for tokio::sync::mpsc::UnboundedSender<MedienEreignis> {
    fn melden(&self, ereignis: MedienEreignis) {
        // Empfaenger weg = Steuerungsebene beendet; Ereignis verwerfen
        let _ = self.send(ereignis);
    }
}
