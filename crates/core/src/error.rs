//! Fehlertypen fuer Mediabridge
//!
//! Zentraler Fehler-Enum fuer alle Lifecycle-Fehler der Media-Engine.
//! Fehler pro Paket oder pro Tick werden nie als `Err` propagiert, sondern
//! lokal gezaehlt (siehe Statistik-Typen in `mediabridge-engine`).

use thiserror::Error;

/// Globaler Result-Alias fuer Mediabridge
pub type Result<T> = std::result::Result<T, MediabridgeError>;

/// Alle moeglichen Fehler der Steuerungsebene
#[derive(Debug, Error)]
pub enum MediabridgeError {
    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Codec nicht verfuegbar: {0}")]
    CodecNichtVerfuegbar(String),

    // --- Ressourcen ---
    #[error("Kein UDP-Port verfuegbar")]
    KeinPortVerfuegbar,

    #[error("Kanal nicht gefunden: {0}")]
    KanalNichtGefunden(String),

    #[error("Befehls-Queue ueberlastet: {0}")]
    Ueberlastet(String),

    #[error("Engine wurde beendet")]
    EngineBeendet,

    // --- Sicherheit ---
    #[error("Sicherheits-Handshake fehlgeschlagen: {0}")]
    Handshake(String),

    // --- Intern ---
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl MediabridgeError {
    /// Erstellt einen Konfigurationsfehler aus einer beliebigen Nachricht
    pub fn konfiguration(msg: impl Into<String>) -> Self {
        Self::Konfiguration(msg.into())
    }

    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Schliessgrund, wie er dem Steuerungs-Kollaborator gemeldet wird
    pub fn schliessgrund(&self) -> String {
        match self {
            Self::KeinPortVerfuegbar => "no port".into(),
            Self::Handshake(grund) => format!("dtls handshake failed: {grund}"),
            andere => andere.to_string(),
        }
    }

    /// Gibt true zurueck wenn der Fehler durch falsche Parameter entstand
    pub fn ist_konfigurationsfehler(&self) -> bool {
        matches!(self, Self::Konfiguration(_) | Self::CodecNichtVerfuegbar(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = MediabridgeError::Konfiguration("DTMF-Payload-Typ kollidiert".into());
        assert_eq!(
            e.to_string(),
            "Konfigurationsfehler: DTMF-Payload-Typ kollidiert"
        );
    }

    #[test]
    fn schliessgruende() {
        assert_eq!(MediabridgeError::KeinPortVerfuegbar.schliessgrund(), "no port");
        assert_eq!(
            MediabridgeError::Handshake("fingerprint".into()).schliessgrund(),
            "dtls handshake failed: fingerprint"
        );
    }

    #[test]
    fn konfigurationsfehler_erkennung() {
        assert!(MediabridgeError::konfiguration("x").ist_konfigurationsfehler());
        assert!(MediabridgeError::CodecNichtVerfuegbar("ilbc".into()).ist_konfigurationsfehler());
        assert!(!MediabridgeError::KeinPortVerfuegbar.ist_konfigurationsfehler());
    }
}
