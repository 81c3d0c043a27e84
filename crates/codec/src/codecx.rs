//! Transcoding-Cache (codecx)
//!
//! Haelt pro Kanalrichtung je eine `RawSound`-Darstellung fuer alle sechs
//! Formate. Pro Tick ist hoechstens eine Darstellung die Quelle; alle anderen
//! werden erst bei Bedarf abgeleitet und bis zur naechsten Generation
//! wiederverwendet ("einmal rechnen, oft lesen").
//!
//! ## Konvertierungsgraph
//!
//! ```text
//!   Alaw <──────> Ulaw            (direkte Tabelle)
//!     \            /
//!      \          /
//!       Linear16 <──> Ilbc        (iLBC, 160 Samples <-> 38 Bytes)
//!          │
//!          │ FIR 2:1 / 1:2
//!          │
//!     Linear16Breit <──> G722     (G.722)
//! ```
//!
//! Direkte Tabellen werden dem Umweg ueber Linear-16 vorgezogen, frische
//! Schmalband-Daten dem Resampling.

use std::mem;
use std::sync::Arc;

use mediabridge_protocol::KlangFormat;
use tracing::trace;

use crate::bibliothek::{CodecBibliothek, SprachDekodierer, SprachKodierer};
use crate::error::{CodecError, CodecResult};
use crate::g711;
use crate::rawsound::RawSound;
use crate::resample::{Dezimierer, Interpolierer};

/// Anzahl verarbeiteter Pakete bevor die Signalleistung berechnet wird
pub const LEISTUNG_MIN_PAKETE: u64 = 100;

/// Pol des DC-Blockers (y = x - x1 + a*y1)
const DC_POL: f64 = 0.995;

#[derive(Debug, Clone, Copy, Default)]
struct DcBlocker {
    x1: f64,
    y1: f64,
}

impl DcBlocker {
    #[inline]
    fn filtern(&mut self, x: f64) -> f64 {
        let y = x - self.x1 + DC_POL * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }
}

/// Lazy berechneter Transcoding-Cache einer Kanalrichtung
pub struct CodecCache {
    bibliothek: Arc<CodecBibliothek>,
    darstellungen: [RawSound; KlangFormat::ANZAHL],
    generation: u64,
    quelle: Option<KlangFormat>,

    g722_kodierer: Option<Box<dyn SprachKodierer>>,
    g722_dekodierer: Option<Box<dyn SprachDekodierer>>,
    ilbc_kodierer: Option<Box<dyn SprachKodierer>>,
    ilbc_dekodierer: Option<Box<dyn SprachDekodierer>>,
    dezimierer: Dezimierer,
    interpolierer: Interpolierer,

    pakete: u64,
    neuberechnungen: u64,
    dc: DcBlocker,
    /// (Generation, RMS) der letzten Leistungsberechnung
    leistung: Option<(u64, f64)>,
}

impl std::fmt::Debug for CodecCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecCache")
            .field("generation", &self.generation)
            .field("quelle", &self.quelle)
            .field("pakete", &self.pakete)
            .field("neuberechnungen", &self.neuberechnungen)
            .finish()
    }
}

impl CodecCache {
    pub fn neu(bibliothek: Arc<CodecBibliothek>) -> Self {
        Self {
            bibliothek,
            darstellungen: KlangFormat::ALLE.map(RawSound::neu),
            generation: 0,
            quelle: None,
            g722_kodierer: None,
            g722_dekodierer: None,
            ilbc_kodierer: None,
            ilbc_dekodierer: None,
            dezimierer: Dezimierer::neu(),
            interpolierer: Interpolierer::neu(),
            pakete: 0,
            neuberechnungen: 0,
            dc: DcBlocker::default(),
            leistung: None,
        }
    }

    // -----------------------------------------------------------------------
    // Generationen und Eingabe
    // -----------------------------------------------------------------------

    /// Beginnt eine neue Generation: alle Darstellungen werden ungueltig
    pub fn generation_markieren(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.quelle = None;
        for klang in &mut self.darstellungen {
            klang.dirty_setzen();
        }
    }

    /// Uebernimmt Paket-Nutzdaten als einzige frische Darstellung
    pub fn aus_paket(&mut self, format: KlangFormat, nutzdaten: &[u8]) {
        self.generation_markieren();
        let klang = &mut self.darstellungen[format.index()];
        if format.ist_linear() {
            let samples = klang.samples_schreiben();
            samples.extend(
                nutzdaten
                    .chunks_exact(2)
                    .map(|b| i16::from_be_bytes([b[0], b[1]])),
            );
        } else {
            klang.bytes_fuellen(nutzdaten);
        }
        self.quelle = Some(format);
        self.pakete += 1;
    }

    /// Uebernimmt einen Sample-Puffer (Player, Mixer) als einzige Quelle
    pub fn aus_rohklang(&mut self, klang: &RawSound) {
        self.generation_markieren();
        if klang.ist_dirty() {
            return;
        }
        let format = klang.format();
        self.darstellungen[format.index()].kopieren_von(klang);
        self.quelle = Some(format);
        self.pakete += 1;
    }

    /// Uebernimmt Linear-Samples als einzige Quelle
    pub fn aus_samples(&mut self, format: KlangFormat, samples: &[i16]) {
        debug_assert!(format.ist_linear());
        self.generation_markieren();
        self.darstellungen[format.index()].samples_fuellen(samples);
        self.quelle = Some(format);
        self.pakete += 1;
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn ist_frisch(&self, format: KlangFormat) -> bool {
        !self.darstellungen[format.index()].ist_dirty()
    }

    /// True wenn in dieser Generation eine Quelle gesetzt wurde
    pub fn hat_daten(&self) -> bool {
        self.quelle.is_some()
    }

    pub fn quelle(&self) -> Option<KlangFormat> {
        self.quelle
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn verarbeitete_pakete(&self) -> u64 {
        self.pakete
    }

    /// Anzahl durchgefuehrter Umwandlungen seit Erstellung
    pub fn neuberechnungen(&self) -> u64 {
        self.neuberechnungen
    }

    /// Liefert die Darstellung im Zielformat (bei Bedarf berechnet)
    pub fn getref(&mut self, format: KlangFormat) -> CodecResult<&RawSound> {
        self.ableiten(format, 0)?;
        Ok(&self.darstellungen[format.index()])
    }

    /// RMS der DC-bereinigten Schmalband-Samples dieser Generation
    ///
    /// `None` solange weniger als 100 Pakete verarbeitet wurden oder in dieser
    /// Generation keine Daten vorliegen.
    pub fn signal_leistung(&mut self) -> Option<f64> {
        if self.pakete < LEISTUNG_MIN_PAKETE || !self.hat_daten() {
            return None;
        }
        if let Some((generation, rms)) = self.leistung {
            if generation == self.generation {
                return Some(rms);
            }
        }
        self.ableiten(KlangFormat::Linear16, 0).ok()?;

        let samples = self.darstellungen[KlangFormat::Linear16.index()].samples();
        if samples.is_empty() {
            return None;
        }
        let mut summe = 0.0;
        for &s in samples {
            let y = self.dc.filtern(s as f64);
            summe += y * y;
        }
        let rms = (summe / samples.len() as f64).sqrt();
        self.leistung = Some((self.generation, rms));
        Some(rms)
    }

    /// Gibt Codec-Instanzen frei und setzt alle Zustaende zurueck
    pub fn zuruecksetzen(&mut self) {
        self.generation_markieren();
        self.g722_kodierer = None;
        self.g722_dekodierer = None;
        self.ilbc_kodierer = None;
        self.ilbc_dekodierer = None;
        self.dezimierer.zuruecksetzen();
        self.interpolierer.zuruecksetzen();
        self.pakete = 0;
        self.dc = DcBlocker::default();
        self.leistung = None;
    }

    // -----------------------------------------------------------------------
    // Ableitung
    // -----------------------------------------------------------------------

    /// Bevorzugte direkte Quellen und Zwischenformat fuer ein Ziel
    fn pfade(ziel: KlangFormat) -> (&'static [KlangFormat], KlangFormat) {
        use KlangFormat::*;
        match ziel {
            Alaw => (&[Ulaw, Linear16], Linear16),
            Ulaw => (&[Alaw, Linear16], Linear16),
            Ilbc => (&[Linear16], Linear16),
            Linear16 => (&[Alaw, Ulaw, Ilbc, Linear16Breit], Linear16Breit),
            Linear16Breit => (&[G722, Linear16], Linear16),
            G722 => (&[Linear16Breit], Linear16Breit),
        }
    }

    fn ableiten(&mut self, ziel: KlangFormat, besucht: u8) -> CodecResult<()> {
        if self.ist_frisch(ziel) {
            return Ok(());
        }
        if !self.hat_daten() {
            return Err(CodecError::KeineDaten);
        }
        let bit = 1u8 << ziel.index();
        if besucht & bit != 0 {
            return Err(CodecError::KeinPfad {
                von: self.quelle.unwrap_or(ziel),
                nach: ziel,
            });
        }

        let (direkt, umweg) = Self::pfade(ziel);
        let quelle = match direkt.iter().copied().find(|&f| self.ist_frisch(f)) {
            Some(q) => q,
            None => {
                self.ableiten(umweg, besucht | bit)?;
                umweg
            }
        };
        self.umwandeln(quelle, ziel)
    }

    /// Eine Kante des Graphen: berechnet `ziel` aus der frischen `quelle`
    fn umwandeln(&mut self, quelle: KlangFormat, ziel: KlangFormat) -> CodecResult<()> {
        use KlangFormat::*;

        let mut ausgabe = mem::replace(&mut self.darstellungen[ziel.index()], RawSound::neu(ziel));
        let ein = &self.darstellungen[quelle.index()];

        let ergebnis = match (quelle, ziel) {
            (Alaw, Ulaw) => {
                let ziel_bytes = ausgabe.bytes_schreiben();
                ziel_bytes.extend(ein.bytes().iter().map(|&b| g711::alaw_zu_ulaw(b)));
                Ok(())
            }
            (Ulaw, Alaw) => {
                let ziel_bytes = ausgabe.bytes_schreiben();
                ziel_bytes.extend(ein.bytes().iter().map(|&b| g711::ulaw_zu_alaw(b)));
                Ok(())
            }
            (Alaw, Linear16) => {
                g711::alaw_dekodieren(ein.bytes(), ausgabe.samples_schreiben());
                Ok(())
            }
            (Ulaw, Linear16) => {
                g711::ulaw_dekodieren(ein.bytes(), ausgabe.samples_schreiben());
                Ok(())
            }
            (Linear16, Alaw) => {
                g711::alaw_kodieren(ein.samples(), ausgabe.bytes_schreiben());
                Ok(())
            }
            (Linear16, Ulaw) => {
                g711::ulaw_kodieren(ein.samples(), ausgabe.bytes_schreiben());
                Ok(())
            }
            (Linear16Breit, Linear16) => {
                self.dezimierer
                    .verarbeiten(ein.samples(), ausgabe.samples_schreiben());
                Ok(())
            }
            (Linear16, Linear16Breit) => {
                self.interpolierer
                    .verarbeiten(ein.samples(), ausgabe.samples_schreiben());
                Ok(())
            }
            (G722, Linear16Breit) => {
                dekodierer_holen(&mut self.g722_dekodierer, &self.bibliothek, G722).and_then(
                    |dek| dek.dekodieren(ein.bytes(), ausgabe.samples_schreiben()),
                )
            }
            (Linear16Breit, G722) => {
                kodierer_holen(&mut self.g722_kodierer, &self.bibliothek, G722)
                    .and_then(|kod| kod.kodieren(ein.samples(), ausgabe.bytes_schreiben()))
            }
            (Ilbc, Linear16) => {
                let frame = Ilbc.bytes_pro_frame();
                if ein.bytes().len() % frame != 0 {
                    Err(CodecError::UngueltigeFrameGroesse {
                        format: Ilbc,
                        laenge: ein.bytes().len(),
                        vielfaches: frame,
                    })
                } else {
                    dekodierer_holen(&mut self.ilbc_dekodierer, &self.bibliothek, Ilbc).and_then(
                        |dek| dek.dekodieren(ein.bytes(), ausgabe.samples_schreiben()),
                    )
                }
            }
            (Linear16, Ilbc) => {
                let frame = Ilbc.samples_pro_frame();
                if ein.samples().len() % frame != 0 {
                    Err(CodecError::UngueltigeFrameGroesse {
                        format: Ilbc,
                        laenge: ein.samples().len(),
                        vielfaches: frame,
                    })
                } else {
                    kodierer_holen(&mut self.ilbc_kodierer, &self.bibliothek, Ilbc)
                        .and_then(|kod| kod.kodieren(ein.samples(), ausgabe.bytes_schreiben()))
                }
            }
            (von, nach) => Err(CodecError::KeinPfad { von, nach }),
        };

        if ergebnis.is_err() {
            ausgabe.dirty_setzen();
        } else {
            self.neuberechnungen += 1;
            trace!(von = %quelle, nach = %ziel, generation = self.generation, "Darstellung abgeleitet");
        }
        self.darstellungen[ziel.index()] = ausgabe;
        ergebnis
    }
}

fn kodierer_holen<'a>(
    platz: &'a mut Option<Box<dyn SprachKodierer>>,
    bibliothek: &CodecBibliothek,
    format: KlangFormat,
) -> CodecResult<&'a mut Box<dyn SprachKodierer>> {
    if platz.is_none() {
        *platz = Some(bibliothek.fabrik(format)?.kodierer()?);
    }
    platz.as_mut().ok_or(CodecError::NichtVerfuegbar(format))
}

fn dekodierer_holen<'a>(
    platz: &'a mut Option<Box<dyn SprachDekodierer>>,
    bibliothek: &CodecBibliothek,
    format: KlangFormat,
) -> CodecResult<&'a mut Box<dyn SprachDekodierer>> {
    if platz.is_none() {
        *platz = Some(bibliothek.fabrik(format)?.dekodierer()?);
    }
    platz.as_mut().ok_or(CodecError::NichtVerfuegbar(format))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> CodecCache {
        CodecCache::neu(Arc::new(CodecBibliothek::standard()))
    }

    fn sinus_alaw(n: usize, amplitude: f64) -> Vec<u8> {
        (0..n)
            .map(|i| {
                let s = amplitude * (i as f64 * 0.3).sin();
                g711::linear_zu_alaw(s as i16)
            })
            .collect()
    }

    #[test]
    fn ohne_eingabe_keine_daten() {
        let mut c = cache();
        assert!(!c.hat_daten());
        assert!(matches!(c.getref(KlangFormat::Linear16), Err(CodecError::KeineDaten)));
    }

    #[test]
    fn paket_macht_genau_eine_darstellung_frisch() {
        let mut c = cache();
        c.aus_paket(KlangFormat::Alaw, &[0xD5; 160]);
        for format in KlangFormat::ALLE {
            assert_eq!(c.ist_frisch(format), format == KlangFormat::Alaw);
        }
        assert_eq!(c.quelle(), Some(KlangFormat::Alaw));
        assert_eq!(c.verarbeitete_pakete(), 1);
    }

    #[test]
    fn cache_treffer_ohne_neuberechnung() {
        let mut c = cache();
        c.aus_paket(KlangFormat::Alaw, &sinus_alaw(160, 5000.0));

        let erster = c.getref(KlangFormat::Ulaw).unwrap().bytes().as_ptr();
        assert_eq!(c.neuberechnungen(), 1);
        let zweiter = c.getref(KlangFormat::Ulaw).unwrap().bytes().as_ptr();
        assert_eq!(c.neuberechnungen(), 1);
        assert_eq!(erster, zweiter);
    }

    #[test]
    fn generation_isoliert() {
        let mut c = cache();
        c.aus_paket(KlangFormat::Ulaw, &[0xFF; 160]);
        c.getref(KlangFormat::Linear16).unwrap();
        c.getref(KlangFormat::Alaw).unwrap();

        c.generation_markieren();
        for format in KlangFormat::ALLE {
            assert!(!c.ist_frisch(format));
        }
        assert!(matches!(c.getref(KlangFormat::Alaw), Err(CodecError::KeineDaten)));
    }

    #[test]
    fn direkte_tabelle_bevorzugt() {
        let mut c = cache();
        let alaw = sinus_alaw(160, 8000.0);
        c.aus_paket(KlangFormat::Alaw, &alaw);
        let ulaw = c.getref(KlangFormat::Ulaw).unwrap().bytes().to_vec();
        // Nur eine Kante, Linear16 wurde nicht angefasst
        assert_eq!(c.neuberechnungen(), 1);
        assert!(!c.ist_frisch(KlangFormat::Linear16));
        for (a, u) in alaw.iter().zip(&ulaw) {
            assert_eq!(*u, g711::alaw_zu_ulaw(*a));
        }
    }

    #[test]
    fn g722_nach_schmalband() {
        let mut c = cache();
        c.aus_paket(KlangFormat::G722, &[0xFA; 160]);
        let l16 = c.getref(KlangFormat::Linear16).unwrap();
        assert_eq!(l16.anzahl_samples(), 160);
        // G722 -> L16B -> L16
        assert_eq!(c.neuberechnungen(), 2);
        assert!(c.ist_frisch(KlangFormat::Linear16Breit));
    }

    #[test]
    fn alaw_nach_g722_ueber_resampling() {
        let mut c = cache();
        c.aus_paket(KlangFormat::Alaw, &sinus_alaw(160, 8000.0));
        let g722 = c.getref(KlangFormat::G722).unwrap();
        assert_eq!(g722.bytes().len(), 160);
        // Alaw -> L16 -> L16B -> G722
        assert_eq!(c.neuberechnungen(), 3);
    }

    #[test]
    fn linear_paket_big_endian() {
        let mut c = cache();
        c.aus_paket(KlangFormat::Linear16, &[0x01, 0x00, 0xFF, 0xFF]);
        assert_eq!(c.getref(KlangFormat::Linear16).unwrap().samples(), &[256, -1]);
    }

    #[test]
    fn ilbc_nach_alaw_ueber_linear() {
        let mut kodierer = crate::ilbc::IlbcKodierer::neu();
        let mut frame = Vec::new();
        let sinus: Vec<i16> = (0..160).map(|i| (6000.0 * (i as f64 * 0.3).sin()) as i16).collect();
        kodierer.kodieren(&sinus, &mut frame).unwrap();

        let mut c = cache();
        c.aus_paket(KlangFormat::Ilbc, &frame);
        let alaw = c.getref(KlangFormat::Alaw).unwrap();
        assert_eq!(alaw.bytes().len(), 160);
        // Ilbc -> L16 -> Alaw
        assert_eq!(c.neuberechnungen(), 2);
        assert!(c.ist_frisch(KlangFormat::Linear16));
    }

    #[test]
    fn alaw_nach_ilbc_ueber_linear() {
        let mut c = cache();
        c.aus_paket(KlangFormat::Alaw, &sinus_alaw(320, 8000.0));
        let ilbc = c.getref(KlangFormat::Ilbc).unwrap();
        assert_eq!(ilbc.bytes().len(), 76);
        assert_eq!(c.neuberechnungen(), 2);

        // Falsche Framegroesse wird abgelehnt
        c.aus_paket(KlangFormat::Alaw, &sinus_alaw(100, 8000.0));
        assert!(matches!(
            c.getref(KlangFormat::Ilbc),
            Err(CodecError::UngueltigeFrameGroesse { vielfaches: 160, .. })
        ));
    }

    #[test]
    fn ilbc_ohne_bibliothek_nicht_verfuegbar() {
        let mut c = CodecCache::neu(Arc::new(CodecBibliothek::standard().ohne_ilbc()));
        c.aus_paket(KlangFormat::Alaw, &[0xD5; 160]);
        assert!(matches!(
            c.getref(KlangFormat::Ilbc),
            Err(CodecError::NichtVerfuegbar(KlangFormat::Ilbc))
        ));
        assert!(!c.ist_frisch(KlangFormat::Ilbc));
        // Zwischenergebnis bleibt nutzbar
        assert!(c.ist_frisch(KlangFormat::Linear16));
    }

    #[test]
    fn aus_rohklang_kopiert() {
        let mut c = cache();
        let klang = RawSound::aus_samples(KlangFormat::Linear16, &[100; 160]);
        c.aus_rohklang(&klang);
        let alaw = c.getref(KlangFormat::Alaw).unwrap();
        assert_eq!(alaw.bytes().len(), 160);
        assert_eq!(alaw.bytes()[0], g711::linear_zu_alaw(100));
    }

    #[test]
    fn leistung_erst_nach_100_paketen() {
        let mut c = cache();
        let signal = sinus_alaw(160, 10000.0);
        for _ in 0..99 {
            c.aus_paket(KlangFormat::Alaw, &signal);
            assert_eq!(c.signal_leistung(), None);
        }
        c.aus_paket(KlangFormat::Alaw, &signal);
        let rms = c.signal_leistung().unwrap();
        assert!(rms > 1000.0, "rms={rms}");
        // Gecacht innerhalb der Generation
        assert_eq!(c.signal_leistung(), Some(rms));
    }

    #[test]
    fn dc_anteil_wird_entfernt() {
        let mut c = cache();
        for _ in 0..200 {
            c.aus_samples(KlangFormat::Linear16, &[4000; 160]);
            let _ = c.signal_leistung();
        }
        c.aus_samples(KlangFormat::Linear16, &[4000; 160]);
        assert!(c.signal_leistung().unwrap() < 10.0);
    }

    #[test]
    fn zuruecksetzen_setzt_paketzaehler_zurueck() {
        let mut c = cache();
        c.aus_paket(KlangFormat::G722, &[0; 160]);
        c.getref(KlangFormat::Linear16Breit).unwrap();
        c.zuruecksetzen();
        assert_eq!(c.verarbeitete_pakete(), 0);
        assert!(!c.hat_daten());
    }
}
