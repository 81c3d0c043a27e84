//! RTP-Paketmodell (RFC 3550)
//!
//! Feste Paketstruktur mit Header-Zugriff per Bitmaske. Das Paket lebt in
//! einem vorallokierten Slot (Jitter Buffer) oder auf dem Stack und wird an
//! Ort und Stelle veraendert – keine Heap-Allokation pro Paket.
//!
//! ## Header-Format (12 Bytes + 4 Bytes pro CSRC)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   V(2) P(1) X(1) CC(4)
//!  1       1   M(1) PT(7)
//!  2       2   Sequenznummer (big-endian)
//!  4       4   Zeitstempel (big-endian)
//!  8       4   SSRC (big-endian)
//! 12      4*CC CSRC-Liste
//! 12+4*CC  N   Nutzdaten
//! ```
//!
//! Invariante: `nutzdaten_offset = 12 + 4 * csrc_anzahl`,
//! `nutzdaten_laenge = laenge - nutzdaten_offset`.

use std::io;

/// RTP-Protokollversion
pub const RTP_VERSION: u8 = 2;

/// Groesse des festen RTP-Headers in Bytes
pub const RTP_HEADER_GROESSE: usize = 12;

/// Maximale Paketgroesse: 160 Byte Nutzdaten + 15 CSRC + SRTP-Auth-Tag
pub const RTP_MAX_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// RtpPaket
// ---------------------------------------------------------------------------

/// Ein RTP-Paket mit fester Puffergroesse
#[derive(Clone)]
pub struct RtpPaket {
    daten: [u8; RTP_MAX_GROESSE],
    laenge: usize,
}

impl Default for RtpPaket {
    fn default() -> Self {
        Self::leer()
    }
}

impl std::fmt::Debug for RtpPaket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpPaket")
            .field("pt", &self.payload_typ())
            .field("seq", &self.sequenz())
            .field("ts", &self.zeitstempel())
            .field("ssrc", &self.ssrc())
            .field("marker", &self.marker())
            .field("laenge", &self.laenge)
            .finish()
    }
}

impl RtpPaket {
    /// Leeres Paket (Laenge 0)
    pub const fn leer() -> Self {
        Self {
            daten: [0u8; RTP_MAX_GROESSE],
            laenge: 0,
        }
    }

    /// Initialisiert einen minimalen v2-Header und leert die Nutzdaten
    pub fn initialisieren(&mut self, payload_typ: u8, sequenz: u16, zeitstempel: u32, ssrc: u32) {
        self.daten[..RTP_HEADER_GROESSE].fill(0);
        self.daten[0] = RTP_VERSION << 6;
        self.laenge = RTP_HEADER_GROESSE;
        self.payload_typ_setzen(payload_typ);
        self.sequenz_setzen(sequenz);
        self.zeitstempel_setzen(zeitstempel);
        self.ssrc_setzen(ssrc);
    }

    /// Kopiert ein empfangenes Datagramm in das Paket und validiert den Header
    ///
    /// # Fehler
    /// - `InvalidData` wenn das Datagramm zu gross, zu kurz oder kein RTP v2 ist
    pub fn aus_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.len() > RTP_MAX_GROESSE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "RTP-Paket zu gross: {} Bytes (Maximum {})",
                    bytes.len(),
                    RTP_MAX_GROESSE
                ),
            ));
        }
        self.daten[..bytes.len()].copy_from_slice(bytes);
        self.laenge = bytes.len();
        self.validieren()
    }

    /// Prueft Version und Mindestlaenge (Header + CSRC-Liste)
    pub fn validieren(&self) -> io::Result<()> {
        if self.laenge < RTP_HEADER_GROESSE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "RTP-Header zu kurz: {} Bytes (erwartet {})",
                    self.laenge, RTP_HEADER_GROESSE
                ),
            ));
        }
        if self.version() != RTP_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Ungueltige RTP-Version: {}", self.version()),
            ));
        }
        if self.laenge < self.nutzdaten_offset() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "CSRC-Liste abgeschnitten: {} CSRCs bei {} Bytes",
                    self.csrc_anzahl(),
                    self.laenge
                ),
            ));
        }
        Ok(())
    }

    /// Gesamte logische Laenge in Bytes
    pub fn laenge(&self) -> usize {
        self.laenge
    }

    /// Setzt die logische Laenge (z.B. nach SRTP-Transformation)
    ///
    /// Wird auf `RTP_MAX_GROESSE` begrenzt.
    pub fn laenge_setzen(&mut self, laenge: usize) {
        self.laenge = laenge.min(RTP_MAX_GROESSE);
    }

    /// Gueltige Bytes des Pakets
    pub fn als_bytes(&self) -> &[u8] {
        &self.daten[..self.laenge]
    }

    /// Gesamter Puffer (fuer In-Place-Transformationen mit Laengenaenderung)
    pub fn puffer_mut(&mut self) -> &mut [u8; RTP_MAX_GROESSE] {
        &mut self.daten
    }

    // --- Header-Felder ---

    pub fn version(&self) -> u8 {
        self.daten[0] >> 6
    }

    pub fn padding(&self) -> bool {
        self.daten[0] & 0x20 != 0
    }

    pub fn extension(&self) -> bool {
        self.daten[0] & 0x10 != 0
    }

    pub fn csrc_anzahl(&self) -> usize {
        (self.daten[0] & 0x0F) as usize
    }

    pub fn marker(&self) -> bool {
        self.daten[1] & 0x80 != 0
    }

    pub fn marker_setzen(&mut self, marker: bool) {
        if marker {
            self.daten[1] |= 0x80;
        } else {
            self.daten[1] &= 0x7F;
        }
    }

    pub fn payload_typ(&self) -> u8 {
        self.daten[1] & 0x7F
    }

    pub fn payload_typ_setzen(&mut self, pt: u8) {
        self.daten[1] = (self.daten[1] & 0x80) | (pt & 0x7F);
    }

    pub fn sequenz(&self) -> u16 {
        u16::from_be_bytes([self.daten[2], self.daten[3]])
    }

    pub fn sequenz_setzen(&mut self, seq: u16) {
        self.daten[2..4].copy_from_slice(&seq.to_be_bytes());
    }

    pub fn zeitstempel(&self) -> u32 {
        u32::from_be_bytes([self.daten[4], self.daten[5], self.daten[6], self.daten[7]])
    }

    pub fn zeitstempel_setzen(&mut self, ts: u32) {
        self.daten[4..8].copy_from_slice(&ts.to_be_bytes());
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.daten[8], self.daten[9], self.daten[10], self.daten[11]])
    }

    pub fn ssrc_setzen(&mut self, ssrc: u32) {
        self.daten[8..12].copy_from_slice(&ssrc.to_be_bytes());
    }

    /// CSRC-Eintrag `index` (None wenn ausserhalb der CSRC-Liste)
    pub fn csrc(&self, index: usize) -> Option<u32> {
        if index >= self.csrc_anzahl() {
            return None;
        }
        let o = RTP_HEADER_GROESSE + index * 4;
        Some(u32::from_be_bytes([
            self.daten[o],
            self.daten[o + 1],
            self.daten[o + 2],
            self.daten[o + 3],
        ]))
    }

    // --- Nutzdaten ---

    /// Offset der Nutzdaten: 12 + 4 * CSRC-Anzahl
    pub fn nutzdaten_offset(&self) -> usize {
        RTP_HEADER_GROESSE + 4 * self.csrc_anzahl()
    }

    /// Laenge der Nutzdaten (0 bei inkonsistentem Header)
    pub fn nutzdaten_laenge(&self) -> usize {
        self.laenge.saturating_sub(self.nutzdaten_offset())
    }

    pub fn nutzdaten(&self) -> &[u8] {
        let offset = self.nutzdaten_offset().min(self.laenge);
        &self.daten[offset..self.laenge]
    }

    pub fn nutzdaten_mut(&mut self) -> &mut [u8] {
        let offset = self.nutzdaten_offset().min(self.laenge);
        &mut self.daten[offset..self.laenge]
    }

    /// Ersetzt die Nutzdaten; gibt false zurueck wenn sie nicht passen
    pub fn nutzdaten_setzen(&mut self, nutzdaten: &[u8]) -> bool {
        let offset = self.nutzdaten_offset();
        if offset + nutzdaten.len() > RTP_MAX_GROESSE {
            return false;
        }
        self.daten[offset..offset + nutzdaten.len()].copy_from_slice(nutzdaten);
        self.laenge = offset + nutzdaten.len();
        true
    }
}

// ---------------------------------------------------------------------------
// Demultiplexing (RFC 7983)
// ---------------------------------------------------------------------------

/// Art eines empfangenen Datagramms anhand des ersten Bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagrammArt {
    /// DTLS-Record (20..=63)
    Dtls,
    /// RTP oder RTCP (128..=191)
    Rtp,
    /// STUN oder unbekannt
    Sonstiges,
}

/// Klassifiziert ein Datagramm nach RFC 7983
pub fn datagramm_klassifizieren(bytes: &[u8]) -> DatagrammArt {
    match bytes.first() {
        Some(20..=63) => DatagrammArt::Dtls,
        Some(128..=191) => DatagrammArt::Rtp,
        _ => DatagrammArt::Sonstiges,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
