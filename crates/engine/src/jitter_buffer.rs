//! Jitter Buffer fuer eingehende RTP-Pakete
//!
//! Fester Pool vorallokierter Paket-Slots. Eingehende Pakete werden direkt in
//! einen reservierten Slot gelesen (kein Kopieren, keine Allokation pro Paket)
//! und nach Sequenznummer einsortiert.
//!
//! ## Slot-Zustaende
//!
//! Jeder Slot ist zu jedem Zeitpunkt in genau einem Zustand:
//!
//! ```text
//!   frei ──reservieren()──> reserviert ──push()──> geordnet
//!    ^                                               │
//!    │                                          peek()/pop()
//!    └────────── naechste Operation ──────── ausgeliehen
//! ```
//!
//! ## Ausgabe-Cursor
//!
//! `outsn` ist die naechste erwartete Sequenznummer. Beim ersten Push nach
//! Erstellung, Leerlauf oder Flush wird `outsn = seq - wasserstand` gesetzt;
//! die Ausgabe wartet damit einen Wasserstand lang auf umsortierte Pakete.
//! Der Resync setzt nie hinter die zuletzt ausgelieferte Sequenz zurueck:
//! ein verspaetetes Paket auf leerem Buffer, das nicht vor der zuletzt
//! gelieferten Sequenz liegt, gilt als ausserhalb des Fensters.
//!
//! ## Performance-Eigenschaften
//! - O(1) Einfuegen und Entnahme (Index = seq mod slots)
//! - Keine Locks (gehoert genau einem Kanal auf einem Worker)

use std::collections::VecDeque;

use mediabridge_protocol::RtpPaket;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Jitter Buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterBufferConfig {
    /// Anzahl der Paket-Slots (Fenstergroesse)
    pub slots: usize,
    /// Vorlauf in Paketen vor der ersten Ausgabe
    pub wasserstand: u16,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            slots: 20,
            wasserstand: 2,
        }
    }
}

impl JitterBufferConfig {
    /// Prueft die Konfiguration auf Konsistenz
    pub fn validieren(&self) -> Result<(), String> {
        if self.slots < 2 {
            return Err(format!(
                "Jitter Buffer braucht mindestens 2 Slots, konfiguriert: {}",
                self.slots
            ));
        }
        if self.slots > u16::MAX as usize {
            return Err(format!("Zu viele Jitter-Buffer-Slots: {}", self.slots));
        }
        if self.wasserstand as usize >= self.slots {
            return Err(format!(
                "Wasserstand ({}) muss kleiner als die Slot-Anzahl ({}) sein",
                self.wasserstand, self.slots
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterBufferStatistik {
    /// Anzahl eingefuegter Pakete gesamt
    pub empfangen: u64,
    /// Anzahl in Reihenfolge entnommener Pakete
    pub abgespielt: u64,
    /// Ausserhalb des Fensters verworfen (zu alt oder zu weit voraus)
    pub ausserhalb_fenster: u64,
    /// Slot bereits belegt (Duplikat/Ueberlappung)
    pub duplikate: u64,
    /// Leere Positionen beim Abspielen (Verlust)
    pub luecken: u64,
    /// Veraltete Slots beim Abspielen recycelt
    pub veraltet: u64,
    /// Anzahl Komplett-Flushes wegen Ueberlauf
    pub ueberlaeufe: u64,
    /// Beim Flush verworfene Pakete
    pub geflusht: u64,
}

impl JitterBufferStatistik {
    /// Summe aller verworfenen Pakete
    pub fn verworfen(&self) -> u64 {
        self.ausserhalb_fenster + self.duplikate + self.veraltet + self.geflusht
    }
}

// ---------------------------------------------------------------------------
// JitterBuffer
// ---------------------------------------------------------------------------

/// Sequenzgeordneter Paket-Puffer mit fester Kapazitaet
pub struct JitterBuffer {
    pool: Vec<RtpPaket>,
    frei: VecDeque<usize>,
    geordnet: Vec<Option<usize>>,
    belegt: usize,
    reserviert: Option<usize>,
    /// Per peek() ausgeliehen, noch nicht konsumiert
    gepeekt: Option<usize>,
    /// Per pop() konsumiert, bis zur naechsten Operation lesbar
    ausgeliehen: Option<usize>,
    outsn: Option<u16>,
    /// Zuletzt per pop()/poppeeked() ausgelieferte Sequenz
    zuletzt_geliefert: Option<u16>,
    wasserstand: u16,
    statistik: JitterBufferStatistik,
}

impl std::fmt::Debug for JitterBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitterBuffer")
            .field("slots", &self.pool.len())
            .field("belegt", &self.belegt)
            .field("outsn", &self.outsn)
            .finish()
    }
}

impl JitterBuffer {
    /// Erstellt einen Jitter Buffer (Konfiguration muss validiert sein)
    pub fn neu(config: JitterBufferConfig) -> Self {
        let slots = config.slots.max(2);
        Self {
            pool: vec![RtpPaket::leer(); slots],
            frei: (0..slots).collect(),
            geordnet: vec![None; slots],
            belegt: 0,
            reserviert: None,
            gepeekt: None,
            ausgeliehen: None,
            outsn: None,
            zuletzt_geliefert: None,
            wasserstand: config.wasserstand,
            statistik: JitterBufferStatistik::default(),
        }
    }

    pub fn slots(&self) -> usize {
        self.pool.len()
    }

    /// Anzahl einsortierter, noch nicht abgespielter Pakete
    pub fn fuellstand(&self) -> usize {
        self.belegt
    }

    pub fn statistik(&self) -> &JitterBufferStatistik {
        &self.statistik
    }

    /// Naechste erwartete Sequenznummer (None vor dem ersten Push)
    pub fn outsn(&self) -> Option<u16> {
        self.outsn
    }

    /// Liefert einen beschreibbaren Slot (schlaegt nie fehl)
    ///
    /// Ist kein Slot frei, laeuft der Produzent dem Konsumenten davon: alle
    /// einsortierten Pakete werden verworfen (Flush).
    pub fn reservieren(&mut self) -> &mut RtpPaket {
        self.ausgeliehen_freigeben();
        let index = match self.reserviert {
            Some(index) => index,
            None => {
                let index = match self.frei.pop_front() {
                    Some(index) => index,
                    None => {
                        self.flushen();
                        // Nach dem Flush ist mindestens ein Slot frei (slots >= 2)
                        self.frei.pop_front().unwrap_or(0)
                    }
                };
                self.reserviert = Some(index);
                index
            }
        };
        &mut self.pool[index]
    }

    /// Sortiert den zuletzt reservierten Slot nach seiner Sequenznummer ein
    pub fn push(&mut self) {
        self.ausgeliehen_freigeben();
        let Some(index) = self.reserviert.take() else {
            return;
        };
        let seq = self.pool[index].sequenz();
        self.statistik.empfangen += 1;

        let n = self.pool.len();

        // Resync: erster Push, nach Leerlauf oder Flush
        if self.outsn.is_none() || (self.belegt == 0 && self.gepeekt.is_none()) {
            if let Some(letzte) = self.zuletzt_geliefert {
                if (letzte.wrapping_sub(seq) as usize) < n {
                    self.statistik.ausserhalb_fenster += 1;
                    debug!(
                        sequenz = seq,
                        zuletzt_geliefert = letzte,
                        "Verspaetetes Paket nach Leerlauf verworfen"
                    );
                    self.frei.push_back(index);
                    return;
                }
            }
            let mut neu = seq.wrapping_sub(self.wasserstand);
            // Nie hinter die zuletzt gelieferte Sequenz zurueck
            if let Some(letzte) = self.zuletzt_geliefert {
                if (letzte.wrapping_sub(neu) as usize) < n {
                    neu = letzte.wrapping_add(1);
                }
            }
            if self.outsn != Some(neu) {
                trace!(sequenz = seq, outsn = neu, "Jitter Buffer synchronisiert");
            }
            self.outsn = Some(neu);
        }
        let outsn = self.outsn.unwrap_or(seq);

        let abstand = seq.wrapping_sub(outsn) as usize;
        if abstand >= n {
            self.statistik.ausserhalb_fenster += 1;
            debug!(sequenz = seq, outsn, "Paket ausserhalb des Fensters verworfen");
            self.frei.push_back(index);
            return;
        }

        let position = seq as usize % n;
        if self.geordnet[position].is_some() || self.gepeekt_hat_sequenz(seq) {
            self.statistik.duplikate += 1;
            debug!(sequenz = seq, "Doppeltes Paket verworfen");
            self.frei.push_back(index);
            return;
        }

        self.geordnet[position] = Some(index);
        self.belegt += 1;
    }

    /// Naechstes Paket in Reihenfolge ohne es zu konsumieren
    ///
    /// Eine Luecke oder ein veralteter Slot liefert `None` und rueckt den
    /// Cursor weiter. Ein zweiter Aufruf vor `poppeeked()` liefert dasselbe
    /// Paket.
    pub fn peek(&mut self) -> Option<&mut RtpPaket> {
        self.ausgeliehen_freigeben();
        if let Some(index) = self.gepeekt {
            return Some(&mut self.pool[index]);
        }
        let index = self.naechsten_holen()?;
        self.gepeekt = Some(index);
        Some(&mut self.pool[index])
    }

    /// Konsumiert das per `peek()` gelieferte Paket
    pub fn poppeeked(&mut self) {
        if let Some(index) = self.gepeekt.take() {
            self.konsumieren();
            self.frei.push_back(index);
        }
    }

    /// Naechstes Paket in Reihenfolge, konsumiert
    ///
    /// Der Slot bleibt bis zur naechsten Operation am Buffer lesbar.
    pub fn pop(&mut self) -> Option<&mut RtpPaket> {
        self.ausgeliehen_freigeben();
        let index = match self.gepeekt.take() {
            Some(index) => index,
            None => self.naechsten_holen()?,
        };
        self.konsumieren();
        self.ausgeliehen = Some(index);
        Some(&mut self.pool[index])
    }

    /// Gibt alle Slots frei und vergisst den Cursor (z.B. bei SSRC-Wechsel)
    pub fn zuruecksetzen(&mut self) {
        self.frei.clear();
        self.frei.extend(0..self.pool.len());
        self.geordnet.iter_mut().for_each(|s| *s = None);
        self.belegt = 0;
        self.reserviert = None;
        self.gepeekt = None;
        self.ausgeliehen = None;
        self.outsn = None;
        self.zuletzt_geliefert = None;
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn ausgeliehen_freigeben(&mut self) {
        if let Some(index) = self.ausgeliehen.take() {
            self.frei.push_back(index);
        }
    }

    fn gepeekt_hat_sequenz(&self, seq: u16) -> bool {
        self.gepeekt
            .map(|index| self.pool[index].sequenz() == seq)
            .unwrap_or(false)
    }

    fn konsumieren(&mut self) {
        if let Some(outsn) = self.outsn {
            self.zuletzt_geliefert = Some(outsn);
            self.outsn = Some(outsn.wrapping_add(1));
        }
        self.statistik.abgespielt += 1;
    }

    /// Entnimmt den Slot an `outsn` aus der Ordnung (Cursor bleibt stehen)
    fn naechsten_holen(&mut self) -> Option<usize> {
        let outsn = self.outsn?;
        let position = outsn as usize % self.pool.len();

        let Some(index) = self.geordnet[position] else {
            self.statistik.luecken += 1;
            trace!(outsn, "Luecke im Jitter Buffer");
            self.outsn = Some(outsn.wrapping_add(1));
            return None;
        };

        self.geordnet[position] = None;
        self.belegt -= 1;

        if self.pool[index].sequenz() != outsn {
            self.statistik.veraltet += 1;
            debug!(
                outsn,
                sequenz = self.pool[index].sequenz(),
                "Veralteter Slot recycelt"
            );
            self.frei.push_back(index);
            self.outsn = Some(outsn.wrapping_add(1));
            return None;
        }
        Some(index)
    }

    fn flushen(&mut self) {
        let mut anzahl = 0u64;
        for slot in self.geordnet.iter_mut() {
            if let Some(index) = slot.take() {
                self.frei.push_back(index);
                anzahl += 1;
            }
        }
        self.belegt = 0;
        self.outsn = None;
        self.statistik.ueberlaeufe += 1;
        self.statistik.geflusht += anzahl;
        warn!(
            verworfen = anzahl,
            ueberlaeufe = self.statistik.ueberlaeufe,
            "Jitter-Buffer-Ueberlauf: alle Pakete verworfen"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
