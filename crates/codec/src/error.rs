//! Fehlertypen fuer das Codec-Subsystem

use mediabridge_protocol::KlangFormat;
use thiserror::Error;

/// Alle moeglichen Fehler beim Transkodieren
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Keine gueltige Darstellung im Cache (Generation ohne Eingabe)")]
    KeineDaten,

    #[error("Kein Konvertierungspfad von {von} nach {nach}")]
    KeinPfad { von: KlangFormat, nach: KlangFormat },

    #[error("Codec-Bibliothek nicht verfuegbar: {0}")]
    NichtVerfuegbar(KlangFormat),

    #[error("Ungueltige Frame-Groesse fuer {format}: {laenge} (Vielfaches von {vielfaches} erwartet)")]
    UngueltigeFrameGroesse {
        format: KlangFormat,
        laenge: usize,
        vielfaches: usize,
    },

    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),
}

pub type CodecResult<T> = Result<T, CodecError>;
