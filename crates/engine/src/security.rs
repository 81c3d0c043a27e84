//! Schnittstelle zur Sicherheitsschicht (DTLS-SRTP)
//!
//! Handshake und Schluesselableitung liegen ausserhalb der Engine. Der Kanal
//! reicht empfangene Datagramme waehrend des Handshakes an die Sitzung weiter,
//! versendet deren ausgehende Records und schuetzt/entschuetzt danach jedes
//! RTP-Paket in-place.

use mediabridge_protocol::RtpPaket;

/// Zustand des Handshakes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Handshake laeuft noch
    Verhandelt,
    /// Schluessel stehen, SRTP aktiv
    Abgeschlossen,
    /// Handshake endgueltig gescheitert
    Fehlgeschlagen(String),
}

/// Eine Sicherheitssitzung pro Kanal
///
/// Implementierungen muessen nicht-blockierend sein: alle Methoden werden
/// direkt aus dem 20ms-Tick aufgerufen.
pub trait SicherheitsSitzung: Send {
    /// Aktueller Handshake-Zustand
    fn handshake(&mut self) -> HandshakeStatus;

    /// Fuettert empfangene Transport-Bytes in die Sitzung
    fn schreiben(&mut self, daten: &[u8]);

    /// Naechstes Datagramm das die Sitzung senden moechte
    fn ausgehend(&mut self) -> Option<Vec<u8>>;

    /// Schuetzt ein ausgehendes RTP-Paket (false = verwerfen)
    fn schuetzen(&mut self, paket: &mut RtpPaket) -> bool;

    /// Entschuetzt ein empfangenes RTP-Paket (false = verwerfen)
    fn entschuetzen(&mut self, paket: &mut RtpPaket) -> bool;
}
