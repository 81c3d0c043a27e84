//! Wiedergabe und Aufnahme
//!
//! Datei-I/O liegt ausserhalb der Engine. Ein Kanal zieht pro Tick einen
//! Frame aus seiner `Wiedergabe` und schiebt beide Codec-Caches in jede aktive
//! `Aufnahme`. Mitgeliefert werden zwei Speicher-Implementierungen fuer Tests
//! und einfache Anwendungen.

use std::sync::Arc;
use std::time::Duration;

use mediabridge_codec::{CodecCache, RawSound};
use mediabridge_protocol::KlangFormat;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Wiedergabe
// ---------------------------------------------------------------------------

/// Quelle fuer abzuspielendes Audio
pub trait Wiedergabe: Send {
    /// Fuellt `ziel` mit einem 20ms-Frame; false = erschoepft
    fn lesen(&mut self, ziel: &mut RawSound) -> bool;
}

/// Eine angeforderte Wiedergabe
pub struct WiedergabeAuftrag {
    /// Kennung fuer Ereignisse
    pub kennung: String,
    pub quelle: Box<dyn Wiedergabe>,
    /// Wird durch eine empfangene DTMF-Ziffer abgebrochen
    pub unterbrechbar: bool,
}

impl std::fmt::Debug for WiedergabeAuftrag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WiedergabeAuftrag")
            .field("kennung", &self.kennung)
            .field("unterbrechbar", &self.unterbrechbar)
            .finish()
    }
}

impl WiedergabeAuftrag {
    pub fn neu(kennung: impl Into<String>, quelle: Box<dyn Wiedergabe>) -> Self {
        Self {
            kennung: kennung.into(),
            quelle,
            unterbrechbar: false,
        }
    }

    pub fn unterbrechbar(mut self, unterbrechbar: bool) -> Self {
        self.unterbrechbar = unterbrechbar;
        self
    }
}

/// Spielt einen Sample-Vektor frameweise ab
#[derive(Debug, Clone)]
pub struct PufferWiedergabe {
    format: KlangFormat,
    samples: Vec<i16>,
    position: usize,
    wiederholen: bool,
}

impl PufferWiedergabe {
    /// `format` muss Linear16 oder Linear16Breit sein
    pub fn neu(format: KlangFormat, samples: Vec<i16>) -> Self {
        debug_assert!(format.ist_linear());
        Self {
            format,
            samples,
            position: 0,
            wiederholen: false,
        }
    }

    /// Beginnt nach dem letzten Frame wieder von vorne
    pub fn endlos(mut self) -> Self {
        self.wiederholen = true;
        self
    }
}

impl Wiedergabe for PufferWiedergabe {
    fn lesen(&mut self, ziel: &mut RawSound) -> bool {
        if self.position >= self.samples.len() {
            if !self.wiederholen || self.samples.is_empty() {
                return false;
            }
            self.position = 0;
        }
        let frame = self.format.samples_pro_frame();
        let ende = (self.position + frame).min(self.samples.len());

        if ziel.format() != self.format {
            *ziel = RawSound::neu(self.format);
        }
        let ausgabe = ziel.samples_schreiben();
        ausgabe.extend_from_slice(&self.samples[self.position..ende]);
        // Letzten Frame mit Stille auffuellen
        ausgabe.resize(frame, 0);
        self.position = ende;
        true
    }
}

// ---------------------------------------------------------------------------
// Aufnahme
// ---------------------------------------------------------------------------

/// Senke fuer aufgenommenes Audio
pub trait Aufnahme: Send {
    /// Schreibt einen Tick; false = Aufnahme beenden
    fn schreiben(&mut self, eingang: &mut CodecCache, ausgang: &mut CodecCache) -> bool;

    /// Wird genau einmal beim Beenden aufgerufen
    fn beenden(&mut self);
}

/// Start-/Stopp-Bedingungen einer Aufnahme
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AufnahmeSchwellen {
    /// Start erst wenn die gemittelte Leistung diesen Wert ueberschreitet
    pub start_leistung: Option<f64>,
    /// Stopp wenn die gemittelte Leistung darunter faellt (nach `min_dauer`)
    pub ende_leistung: Option<f64>,
    pub min_dauer: Duration,
    pub max_dauer: Option<Duration>,
}

impl AufnahmeSchwellen {
    pub fn braucht_leistung(&self) -> bool {
        self.start_leistung.is_some() || self.ende_leistung.is_some()
    }
}

/// Eine angeforderte Aufnahme oder eine Steuerung einer laufenden
pub struct AufnahmeAuftrag {
    /// Identitaet (z.B. Dateiname); gleiche Ziele werden zusammengefasst
    pub ziel: String,
    /// None = nur Flags einer laufenden Aufnahme aendern
    pub schreiber: Option<Box<dyn Aufnahme>>,
    pub schwellen: AufnahmeSchwellen,
    pub pausiert: bool,
    pub beenden: bool,
}

impl std::fmt::Debug for AufnahmeAuftrag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AufnahmeAuftrag")
            .field("ziel", &self.ziel)
            .field("schreiber", &self.schreiber.is_some())
            .field("schwellen", &self.schwellen)
            .field("pausiert", &self.pausiert)
            .field("beenden", &self.beenden)
            .finish()
    }
}

impl AufnahmeAuftrag {
    pub fn neu(ziel: impl Into<String>, schreiber: Box<dyn Aufnahme>) -> Self {
        Self {
            ziel: ziel.into(),
            schreiber: Some(schreiber),
            schwellen: AufnahmeSchwellen::default(),
            pausiert: false,
            beenden: false,
        }
    }

    /// Aendert Pause/Ende einer laufenden Aufnahme mit gleichem Ziel
    pub fn steuerung(ziel: impl Into<String>, pausiert: bool, beenden: bool) -> Self {
        Self {
            ziel: ziel.into(),
            schreiber: None,
            schwellen: AufnahmeSchwellen::default(),
            pausiert,
            beenden,
        }
    }

    pub fn mit_schwellen(mut self, schwellen: AufnahmeSchwellen) -> Self {
        self.schwellen = schwellen;
        self
    }
}

/// Gemeinsamer Puffer einer `SpeicherAufnahme`
#[derive(Debug, Default)]
pub struct AufnahmeDaten {
    /// Empfangene Schmalband-Samples
    pub eingang: Vec<i16>,
    /// Gesendete Schmalband-Samples
    pub ausgang: Vec<i16>,
    pub ticks: u64,
    pub beendet: bool,
}

/// Sammelt die Linear-16-Samples beider Richtungen im Speicher
#[derive(Debug, Clone, Default)]
pub struct SpeicherAufnahme {
    daten: Arc<Mutex<AufnahmeDaten>>,
    /// Maximale Anzahl Ticks (None = unbegrenzt)
    limit: Option<u64>,
}

impl SpeicherAufnahme {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Liefert false nach `ticks` geschriebenen Ticks
    pub fn mit_limit(mut self, ticks: u64) -> Self {
        self.limit = Some(ticks);
        self
    }

    /// Zugriff auf den gemeinsamen Puffer (bleibt nach dem Beenden gueltig)
    pub fn daten(&self) -> Arc<Mutex<AufnahmeDaten>> {
        Arc::clone(&self.daten)
    }
}

impl Aufnahme for SpeicherAufnahme {
    fn schreiben(&mut self, eingang: &mut CodecCache, ausgang: &mut CodecCache) -> bool {
        let mut daten = self.daten.lock();
        if let Some(limit) = self.limit {
            if daten.ticks >= limit {
                return false;
            }
        }
        if let Ok(klang) = eingang.getref(KlangFormat::Linear16) {
            daten.eingang.extend_from_slice(klang.samples());
        }
        if let Ok(klang) = ausgang.getref(KlangFormat::Linear16) {
            daten.ausgang.extend_from_slice(klang.samples());
        }
        daten.ticks += 1;
        true
    }

    fn beenden(&mut self) {
        self.daten.lock().beendet = true;
    }
}
