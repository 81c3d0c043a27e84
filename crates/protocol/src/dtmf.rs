//! RFC 2833 / RFC 4733 telephone-event Nutzdaten
//!
//! ## Nutzdatenformat (4 Bytes)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Event-Code (0-9, 10='*', 11='#', 12-15='A'-'D')
//!  1       1   E(1) R(1) Lautstaerke(6)
//!  2       2   Dauer in Zeitstempel-Einheiten (big-endian)
//! ```

use std::io;

/// Mindestlaenge einer telephone-event Nutzlast
pub const DTMF_NUTZDATEN_LAENGE: usize = 4;

/// Dekodiertes telephone-event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfEreignis {
    /// Event-Code (0..=15 fuer DTMF)
    pub code: u8,
    /// End-Bit gesetzt
    pub ende: bool,
    /// Lautstaerke in -dBm0 (0..=63)
    pub lautstaerke: u8,
    /// Dauer in RTP-Zeitstempel-Einheiten
    pub dauer: u16,
}

impl DtmfEreignis {
    /// Dekodiert ein Ereignis aus den RTP-Nutzdaten
    ///
    /// # Fehler
    /// - `InvalidData` wenn die Nutzdaten kuerzer als 4 Bytes sind
    pub fn decode(nutzdaten: &[u8]) -> io::Result<Self> {
        if nutzdaten.len() < DTMF_NUTZDATEN_LAENGE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "telephone-event zu kurz: {} Bytes (erwartet {})",
                    nutzdaten.len(),
                    DTMF_NUTZDATEN_LAENGE
                ),
            ));
        }
        Ok(Self {
            code: nutzdaten[0],
            ende: nutzdaten[1] & 0x80 != 0,
            lautstaerke: nutzdaten[1] & 0x3F,
            dauer: u16::from_be_bytes([nutzdaten[2], nutzdaten[3]]),
        })
    }

    /// Serialisiert das Ereignis in 4 Bytes
    pub fn encode(&self) -> [u8; DTMF_NUTZDATEN_LAENGE] {
        let dauer = self.dauer.to_be_bytes();
        let mut flags = self.lautstaerke & 0x3F;
        if self.ende {
            flags |= 0x80;
        }
        [self.code, flags, dauer[0], dauer[1]]
    }

    /// Ziffer des Ereignisses (None fuer Nicht-DTMF-Events wie Flash)
    pub fn ziffer(&self) -> Option<char> {
        code_zu_ziffer(self.code)
    }
}

/// Wandelt einen Event-Code in eine DTMF-Ziffer um
pub fn code_zu_ziffer(code: u8) -> Option<char> {
    match code {
        0..=9 => Some((b'0' + code) as char),
        10 => Some('*'),
        11 => Some('#'),
        12..=15 => Some((b'A' + code - 12) as char),
        _ => None,
    }
}

/// Wandelt eine DTMF-Ziffer in einen Event-Code um (Kleinbuchstaben erlaubt)
pub fn ziffer_zu_code(ziffer: char) -> Option<u8> {
    match ziffer {
        '0'..='9' => Some(ziffer as u8 - b'0'),
        '*' => Some(10),
        '#' => Some(11),
        'A'..='D' => Some(ziffer as u8 - b'A' + 12),
        'a'..='d' => Some(ziffer as u8 - b'a' + 12),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ende_und_dauer() {
        let e = DtmfEreignis::decode(&[5, 0x8A, 0x03, 0x20]).unwrap();
        assert_eq!(e.code, 5);
        assert!(e.ende);
        assert_eq!(e.lautstaerke, 10);
        assert_eq!(e.dauer, 800);
        assert_eq!(e.ziffer(), Some('5'));
    }

    #[test]
    fn encode_setzt_end_bit() {
        let e = DtmfEreignis {
            code: 11,
            ende: true,
            lautstaerke: 10,
            dauer: 480,
        };
        assert_eq!(e.encode(), [11, 0x8A, 0x01, 0xE0]);
        assert_eq!(DtmfEreignis::decode(&e.encode()).unwrap(), e);
    }

    #[test]
    fn zu_kurz_abgelehnt() {
        assert!(DtmfEreignis::decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn ziffern_abbildung() {
        for (c, code) in [('0', 0), ('9', 9), ('*', 10), ('#', 11), ('A', 12), ('D', 15)] {
            assert_eq!(ziffer_zu_code(c), Some(code));
            assert_eq!(code_zu_ziffer(code), Some(c));
        }
        assert_eq!(ziffer_zu_code('b'), Some(13));
        assert_eq!(ziffer_zu_code('x'), None);
        assert_eq!(code_zu_ziffer(16), None);
    }
}
