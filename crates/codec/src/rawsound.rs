//! Sample-Puffer (rawsound)
//!
//! Formatgekennzeichneter Container fuer Audio-Samples. Byte-kodierte Formate
//! (G.711, G.722, iLBC) liegen in `bytes`, die Linear-16-Formate in `samples`.
//!
//! Der Puffer besitzt seinen Speicher immer selbst und verwendet ihn ueber
//! Ticks hinweg wieder. Nutzdaten eines Pakets werden hineinkopiert, da der
//! Jitter-Buffer-Slot noch im selben Tick in den Pool zurueckgeht.
//!
//! Invariante: `dirty == true` bedeutet, dass der Inhalt nicht als gueltiges
//! Audio gelesen werden darf.

use mediabridge_protocol::KlangFormat;

/// Ein Audio-Frame in einer der sechs Darstellungen
#[derive(Debug, Clone)]
pub struct RawSound {
    format: KlangFormat,
    bytes: Vec<u8>,
    samples: Vec<i16>,
    dirty: bool,
}

impl RawSound {
    /// Erstellt einen leeren, als dirty markierten Puffer
    pub fn neu(format: KlangFormat) -> Self {
        Self {
            format,
            bytes: Vec::new(),
            samples: Vec::new(),
            dirty: true,
        }
    }

    /// Erstellt einen gueltigen Puffer aus byte-kodierten Daten
    pub fn aus_bytes(format: KlangFormat, daten: &[u8]) -> Self {
        let mut klang = Self::neu(format);
        klang.bytes_fuellen(daten);
        klang
    }

    /// Erstellt einen gueltigen Puffer aus Linear-16-Samples
    pub fn aus_samples(format: KlangFormat, samples: &[i16]) -> Self {
        let mut klang = Self::neu(format);
        klang.samples_fuellen(samples);
        klang
    }

    /// Erstellt einen 20ms-Frame Stille im gegebenen Linear-Format
    pub fn stille(format: KlangFormat) -> Self {
        let mut klang = Self::neu(format);
        let n = format.samples_pro_frame();
        klang.samples_schreiben().resize(n, 0);
        klang
    }

    pub fn format(&self) -> KlangFormat {
        self.format
    }

    pub fn ist_dirty(&self) -> bool {
        self.dirty
    }

    /// Markiert den Inhalt als ungueltig (Speicher bleibt erhalten)
    pub fn dirty_setzen(&mut self) {
        self.dirty = true;
    }

    pub fn bytes_pro_sample(&self) -> usize {
        self.format.bytes_pro_sample()
    }

    pub fn abtastrate(&self) -> u32 {
        self.format.abtastrate()
    }

    /// Anzahl der enthaltenen Audio-Samples (0 wenn dirty)
    pub fn anzahl_samples(&self) -> usize {
        if self.dirty {
            return 0;
        }
        match self.format {
            KlangFormat::Alaw | KlangFormat::Ulaw => self.bytes.len(),
            // 2 Samples pro Byte (64 kbit/s bei 16 kHz)
            KlangFormat::G722 => self.bytes.len() * 2,
            KlangFormat::Ilbc => {
                self.bytes.len() / KlangFormat::Ilbc.bytes_pro_frame()
                    * KlangFormat::Ilbc.samples_pro_frame()
            }
            KlangFormat::Linear16 | KlangFormat::Linear16Breit => self.samples.len(),
        }
    }

    /// Byte-kodierte Daten (leer fuer Linear-Formate)
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Linear-16-Samples (leer fuer byte-kodierte Formate)
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Ersetzt den Inhalt durch byte-kodierte Daten und markiert gueltig
    pub fn bytes_fuellen(&mut self, daten: &[u8]) {
        let ziel = self.bytes_schreiben();
        ziel.extend_from_slice(daten);
    }

    /// Ersetzt den Inhalt durch Samples und markiert gueltig
    pub fn samples_fuellen(&mut self, samples: &[i16]) {
        let ziel = self.samples_schreiben();
        ziel.extend_from_slice(samples);
    }

    /// Leert den Byte-Speicher zum Beschreiben und markiert gueltig
    pub fn bytes_schreiben(&mut self) -> &mut Vec<u8> {
        self.dirty = false;
        self.bytes.clear();
        &mut self.bytes
    }

    /// Leert den Sample-Speicher zum Beschreiben und markiert gueltig
    pub fn samples_schreiben(&mut self) -> &mut Vec<i16> {
        self.dirty = false;
        self.samples.clear();
        &mut self.samples
    }

    /// Kopiert Inhalt und Gueltigkeit eines anderen Puffers gleichen Formats
    ///
    /// Wiederverwendet den eigenen Speicher (keine Allokation nach Warm-up).
    pub fn kopieren_von(&mut self, andere: &RawSound) {
        debug_assert_eq!(self.format, andere.format);
        self.bytes.clear();
        self.bytes.extend_from_slice(&andere.bytes);
        self.samples.clear();
        self.samples.extend_from_slice(&andere.samples);
        self.dirty = andere.dirty;
    }
}
