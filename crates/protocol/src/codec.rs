//! Audio-Formate und RTP-Payload-Typen
//!
//! Sechs Darstellungen werden unterstuetzt: vier Wire-Codecs (PCMU, PCMA,
//! G.722, iLBC) und zwei interne Linear-16-Formate (Schmal-/Breitband), die
//! nie auf die Leitung gehen.
//!
//! Alle Angaben beziehen sich auf einen 20ms-Frame (ein Tick).

use serde::{Deserialize, Serialize};

/// Dauer eines Ticks bzw. eines RTP-Frames in Millisekunden
pub const FRAME_MS: u32 = 20;

/// RTP-Zeitstempel-Inkrement pro Frame (8 kHz RTP-Clock, auch fuer G.722)
pub const ZEITSTEMPEL_PRO_FRAME: u32 = 160;

/// Standard-Payload-Typ fuer RFC 2833 telephone-event
pub const DTMF_PAYLOAD_TYP_STANDARD: u8 = 101;

// ---------------------------------------------------------------------------
// KlangFormat
// ---------------------------------------------------------------------------

/// Die sechs Audio-Darstellungen des Transcoding-Caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KlangFormat {
    /// G.711 A-law (PCMA)
    Alaw,
    /// G.711 µ-law (PCMU)
    Ulaw,
    /// G.722 (64 kbit/s, 16 kHz Audio)
    G722,
    /// iLBC (20ms-Frames, 38 Bytes)
    Ilbc,
    /// Linear 16 Bit, 8 kHz (intern)
    Linear16,
    /// Linear 16 Bit, 16 kHz (intern)
    Linear16Breit,
}

impl KlangFormat {
    /// Alle Formate in Index-Reihenfolge
    pub const ALLE: [KlangFormat; 6] = [
        Self::Alaw,
        Self::Ulaw,
        Self::G722,
        Self::Ilbc,
        Self::Linear16,
        Self::Linear16Breit,
    ];

    /// Anzahl der Formate
    pub const ANZAHL: usize = 6;

    /// Stabiler Index (fuer Arrays pro Format)
    pub fn index(self) -> usize {
        match self {
            Self::Alaw => 0,
            Self::Ulaw => 1,
            Self::G722 => 2,
            Self::Ilbc => 3,
            Self::Linear16 => 4,
            Self::Linear16Breit => 5,
        }
    }

    /// RTP-Payload-Typ (interne Formate haben dynamische, nie gesendete Typen)
    pub fn payload_typ(self) -> u8 {
        match self {
            Self::Ulaw => 0,
            Self::Alaw => 8,
            Self::G722 => 9,
            Self::Ilbc => 97,
            Self::Linear16 => 118,
            Self::Linear16Breit => 119,
        }
    }

    /// Konvertiert einen Payload-Typ in ein Wire-Format
    ///
    /// Interne Linear-Formate werden nie von der Leitung akzeptiert.
    pub fn aus_payload_typ(pt: u8) -> Option<Self> {
        match pt {
            0 => Some(Self::Ulaw),
            8 => Some(Self::Alaw),
            9 => Some(Self::G722),
            97 => Some(Self::Ilbc),
            _ => None,
        }
    }

    /// Abtastrate des dekodierten Audios in Hz
    pub fn abtastrate(self) -> u32 {
        match self {
            Self::G722 | Self::Linear16Breit => 16_000,
            _ => 8_000,
        }
    }

    /// Bytes pro Sample (1 fuer byte-kodierte Formate, 2 fuer Linear)
    pub fn bytes_pro_sample(self) -> usize {
        match self {
            Self::Linear16 | Self::Linear16Breit => 2,
            _ => 1,
        }
    }

    /// True fuer die internen Linear-16-Formate
    pub fn ist_linear(self) -> bool {
        matches!(self, Self::Linear16 | Self::Linear16Breit)
    }

    /// True wenn das Format nativ Breitband ist
    pub fn ist_breitband(self) -> bool {
        matches!(self, Self::G722 | Self::Linear16Breit)
    }

    /// True wenn das Format auf der Leitung gesendet werden darf
    pub fn ist_wire_format(self) -> bool {
        !self.ist_linear()
    }

    /// Anzahl Audio-Samples pro 20ms-Frame
    pub fn samples_pro_frame(self) -> usize {
        (self.abtastrate() * FRAME_MS / 1000) as usize
    }

    /// Nutzdaten-Bytes pro 20ms-Frame
    pub fn bytes_pro_frame(self) -> usize {
        match self {
            Self::Alaw | Self::Ulaw => 160,
            // 16 kHz * 4 Bit
            Self::G722 => 160,
            Self::Ilbc => 38,
            Self::Linear16 => 320,
            Self::Linear16Breit => 640,
        }
    }

    /// Kurzname fuer Logs und Konfiguration
    pub fn name(self) -> &'static str {
        match self {
            Self::Alaw => "pcma",
            Self::Ulaw => "pcmu",
            Self::G722 => "g722",
            Self::Ilbc => "ilbc",
            Self::Linear16 => "l16",
            Self::Linear16Breit => "l16wb",
        }
    }
}

impl std::fmt::Display for KlangFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_typen_rundweg() {
        for format in KlangFormat::ALLE {
            if format.ist_wire_format() {
                assert_eq!(KlangFormat::aus_payload_typ(format.payload_typ()), Some(format));
            } else {
                assert_eq!(KlangFormat::aus_payload_typ(format.payload_typ()), None);
            }
        }
    }

    #[test]
    fn indizes_eindeutig() {
        let mut gesehen = [false; KlangFormat::ANZAHL];
        for format in KlangFormat::ALLE {
            assert!(!gesehen[format.index()]);
            gesehen[format.index()] = true;
        }
    }

    #[test]
    fn frame_groessen() {
        assert_eq!(KlangFormat::Alaw.samples_pro_frame(), 160);
        assert_eq!(KlangFormat::G722.samples_pro_frame(), 320);
        assert_eq!(KlangFormat::Linear16Breit.bytes_pro_frame(), 640);
        assert_eq!(KlangFormat::Ilbc.bytes_pro_frame(), 38);
    }

    #[test]
    fn serde_namen() {
        let json = serde_json::to_string(&KlangFormat::Linear16Breit).unwrap();
        assert_eq!(json, "\"linear16_breit\"");
        let f: KlangFormat = serde_json::from_str("\"g722\"").unwrap();
        assert_eq!(f, KlangFormat::G722);
    }
}
