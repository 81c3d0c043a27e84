//! Worker – kooperative Tick-Schleife auf einem eigenen Thread
//!
//! Jeder Worker besitzt eine Menge von Kanaelen und Mixern exklusiv. Er laeuft
//! auf einem benannten OS-Thread mit einer `current_thread`-Runtime und
//! schlaeft bis zur naechsten faelligen Deadline oder bis ein Befehl eintrifft.
//!
//! ## Befehle
//!
//! Die Engine schickt [`WorkerBefehl`]e ueber eine begrenzte `mpsc`-Queue an
//! den Worker, dem der Kanal laut Registry gehoert. Ist der Kanal inzwischen
//! zu einem anderen Worker gewandert, wird der Befehl weitergeleitet; ist er
//! gerade unterwegs, wird der Befehl kurz zurueckgestellt.
//!
//! ## Migration
//!
//! `mischen(a, b)` mit Kanaelen auf verschiedenen Workern verschiebt `b` zum
//! Worker von `a`:
//!
//! ```text
//!   Worker(a) ──Abgeben{b}──> Worker(b) ──Uebernehmen{b, mischen_mit: a}──> Worker(a)
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use mediabridge_core::{EreignisSenke, KanalId, MediabridgeError, MixerId, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::channel::{Kanal, KanalStatistik};
use crate::media::{AufnahmeAuftrag, WiedergabeAuftrag};
use crate::mixer::Mixer;
use crate::security::SicherheitsSitzung;
use crate::telemetry::WorkerTelemetrie;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Tick-Intervall fuer Kanaele und Mixer
pub(crate) const TICK: Duration = Duration::from_millis(20);

/// Rueckstand, ab dem eine Deadline neu ausgerichtet statt aufgeholt wird
const MAX_RUECKSTAND: Duration = Duration::from_millis(100);

/// Intervall fuer Telemetrie, Heartbeat und zurueckgestellte Befehle
const HAUSHALTUNG: Duration = Duration::from_secs(1);

/// Maximales Alter eines zurueckgestellten Befehls
const ZURUECKSTELLEN_MAX_ALTER: Duration = Duration::from_secs(1);

/// Maximale Anzahl zurueckgestellter Befehle pro Worker
const ZURUECKSTELLEN_MAX: usize = 1024;

// ---------------------------------------------------------------------------
// Befehle
// ---------------------------------------------------------------------------

/// Befehl an einen Worker; traegt nur besessene Werte
pub(crate) enum WorkerBefehl {
    /// Neuer Kanal; der Worker startet dessen Tick
    Oeffnen(Box<Kanal>),
    /// Migrierter Kanal von einem anderen Worker
    Uebernehmen {
        kanal: Box<Kanal>,
        mischen_mit: Option<KanalId>,
    },
    /// Kanal an Worker `ziel` abgeben und dort mit `mischen_mit` mischen
    Abgeben {
        kanal_id: KanalId,
        ziel: usize,
        mischen_mit: KanalId,
    },
    ZielSetzen {
        kanal_id: KanalId,
        remote: SocketAddr,
    },
    RichtungSetzen {
        kanal_id: KanalId,
        senden: bool,
        empfangen: bool,
    },
    EchoSetzen {
        kanal_id: KanalId,
        echo: bool,
    },
    Abspielen {
        kanal_id: KanalId,
        auftrag: WiedergabeAuftrag,
    },
    Aufnehmen {
        kanal_id: KanalId,
        auftrag: AufnahmeAuftrag,
    },
    DtmfSenden {
        kanal_id: KanalId,
        ziffern: String,
    },
    SicherheitSetzen {
        kanal_id: KanalId,
        sitzung: Box<dyn SicherheitsSitzung>,
    },
    /// Wird an den Worker von `a` geschickt
    Mischen {
        a: KanalId,
        b: KanalId,
    },
    Entmischen {
        kanal_id: KanalId,
    },
    Schliessen {
        kanal_id: KanalId,
        grund: String,
    },
    Statistik {
        kanal_id: KanalId,
        antwort: oneshot::Sender<KanalStatistik>,
    },
}

impl WorkerBefehl {
    /// Kanal, dem der Befehl gilt; `None` fuer Befehle, die einen Kanal mitbringen
    pub(crate) fn kanal_id(&self) -> Option<KanalId> {
        match self {
            Self::Oeffnen(_) | Self::Uebernehmen { .. } => None,
            Self::Mischen { a, .. } => Some(*a),
            Self::Abgeben { kanal_id, .. }
            | Self::ZielSetzen { kanal_id, .. }
            | Self::RichtungSetzen { kanal_id, .. }
            | Self::EchoSetzen { kanal_id, .. }
            | Self::Abspielen { kanal_id, .. }
            | Self::Aufnehmen { kanal_id, .. }
            | Self::DtmfSenden { kanal_id, .. }
            | Self::SicherheitSetzen { kanal_id, .. }
            | Self::Entmischen { kanal_id }
            | Self::Schliessen { kanal_id, .. }
            | Self::Statistik { kanal_id, .. } => Some(*kanal_id),
        }
    }

    /// Kurzname fuer Logs
    pub(crate) fn art(&self) -> &'static str {
        match self {
            Self::Oeffnen(_) => "oeffnen",
            Self::Uebernehmen { .. } => "uebernehmen",
            Self::Abgeben { .. } => "abgeben",
            Self::ZielSetzen { .. } => "ziel_setzen",
            Self::RichtungSetzen { .. } => "richtung_setzen",
            Self::EchoSetzen { .. } => "echo_setzen",
            Self::Abspielen { .. } => "abspielen",
            Self::Aufnehmen { .. } => "aufnehmen",
            Self::DtmfSenden { .. } => "dtmf_senden",
            Self::SicherheitSetzen { .. } => "sicherheit_setzen",
            Self::Mischen { .. } => "mischen",
            Self::Entmischen { .. } => "entmischen",
            Self::Schliessen { .. } => "schliessen",
            Self::Statistik { .. } => "statistik",
        }
    }
}

/// Von Engine und allen Workern geteilter Zustand
#[derive(Clone)]
pub(crate) struct WorkerVerbund {
    /// Kanal -> Index des besitzenden Workers
    pub registry: Arc<DashMap<KanalId, usize>>,
    /// Befehls-Queues aller Worker, nach Index
    pub sender: Arc<Vec<mpsc::Sender<WorkerBefehl>>>,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub(crate) struct Worker {
    index: usize,
    kanaele: HashMap<KanalId, Kanal>,
    mixer: HashMap<MixerId, Mixer>,
    rx: mpsc::Receiver<WorkerBefehl>,
    verbund: WorkerVerbund,
    telemetrie: Arc<WorkerTelemetrie>,
    ereignisse: Arc<dyn EreignisSenke>,
    zurueckgestellt: Vec<(Instant, WorkerBefehl)>,
    naechste_haushaltung: Instant,
}

impl Worker {
    pub(crate) fn neu(
        index: usize,
        rx: mpsc::Receiver<WorkerBefehl>,
        verbund: WorkerVerbund,
        telemetrie: Arc<WorkerTelemetrie>,
        ereignisse: Arc<dyn EreignisSenke>,
    ) -> Self {
        Self {
            index,
            kanaele: HashMap::new(),
            mixer: HashMap::new(),
            rx,
            verbund,
            telemetrie,
            ereignisse,
            zurueckgestellt: Vec::new(),
            naechste_haushaltung: Instant::now(),
        }
    }

    /// Startet den Worker auf einem eigenen Thread `mb-worker-{index}`
    pub(crate) fn starten(self, stopp: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        let index = self.index;
        std::thread::Builder::new()
            .name(format!("mb-worker-{index}"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(worker = index, fehler = %e, "Worker-Runtime konnte nicht erstellt werden");
                        return;
                    }
                };
                runtime.block_on(self.laufen(stopp));
            })
            .map_err(MediabridgeError::Io)
    }

    async fn laufen(mut self, mut stopp: watch::Receiver<bool>) {
        info!(worker = self.index, "Worker gestartet");
        self.telemetrie.heartbeat_setzen();

        while !*stopp.borrow() {
            let termin = self.naechster_termin();
            tokio::select! {
                befehl = self.rx.recv() => match befehl {
                    Some(befehl) => self.befehl_ausfuehren(befehl),
                    None => break,
                },
                ergebnis = stopp.changed() => {
                    if ergebnis.is_err() || *stopp.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(termin) => {}
            }

            let jetzt = Instant::now();
            self.faellige_ticks(jetzt);
            if jetzt >= self.naechste_haushaltung {
                self.haushaltung(jetzt);
            }
        }

        self.herunterfahren();
        info!(worker = self.index, "Worker gestoppt");
    }

    /// Frueheste Deadline ueber Kanaele, Mixer und Haushaltung
    fn naechster_termin(&self) -> Instant {
        let kanaele = self.kanaele.values().map(|k| k.naechster_tick);
        let mixer = self.mixer.values().map(|m| m.naechster_tick);
        kanaele
            .chain(mixer)
            .fold(self.naechste_haushaltung, Instant::min)
    }

    /// Fuehrt alle faelligen Ticks aus; Mixer zuerst, dann Kanaele
    fn faellige_ticks(&mut self, jetzt: Instant) {
        let kanaele = &mut self.kanaele;
        self.mixer.retain(|id, mixer| {
            if mixer.naechster_tick > jetzt {
                return true;
            }
            let laeuft = mixer.tick(kanaele);
            mixer.naechster_tick = termin_vorruecken(mixer.naechster_tick, jetzt, id);
            laeuft
        });

        let mut geschlossen = Vec::new();
        for (id, kanal) in self.kanaele.iter_mut() {
            if kanal.naechster_tick > jetzt {
                continue;
            }
            if kanal.tick() {
                kanal.naechster_tick = termin_vorruecken(kanal.naechster_tick, jetzt, id);
            } else {
                geschlossen.push(*id);
            }
        }
        for id in geschlossen {
            self.kanal_entfernen(id);
        }
    }

    /// Entfernt einen geschlossenen Kanal; Transport und Ports werden freigegeben
    fn kanal_entfernen(&mut self, id: KanalId) {
        if let Some(mut kanal) = self.kanaele.remove(&id) {
            kanal.telemetrie_melden(&self.telemetrie);
            let index = self.index;
            self.verbund.registry.remove_if(&id, |_, w| *w == index);
            debug!(worker = self.index, kanal = %id, "Kanal aus Worker entfernt");
        }
    }

    fn haushaltung(&mut self, jetzt: Instant) {
        for kanal in self.kanaele.values_mut() {
            kanal.telemetrie_melden(&self.telemetrie);
        }
        self.telemetrie
            .kanaele_aktiv
            .store(self.kanaele.len() as u64, Ordering::Relaxed);
        self.telemetrie
            .mixer_aktiv
            .store(self.mixer.len() as u64, Ordering::Relaxed);
        self.telemetrie.heartbeat_setzen();
        self.zurueckgestellte_wiederholen();
        self.naechste_haushaltung = jetzt + HAUSHALTUNG;
    }

    /// Schliesst alle Kanaele mit Grund "shutdown"
    fn herunterfahren(&mut self) {
        for kanal in self.kanaele.values_mut() {
            kanal.schliessen_anfordern("shutdown");
        }
        let kanaele = &mut self.kanaele;
        self.mixer.retain(|_, mixer| mixer.tick(kanaele));
        let ids: Vec<KanalId> = self.kanaele.keys().copied().collect();
        for id in ids {
            if let Some(kanal) = self.kanaele.get_mut(&id) {
                kanal.tick();
            }
            self.kanal_entfernen(id);
        }
        self.mixer.clear();
        self.telemetrie
            .kanaele_aktiv
            .store(0, Ordering::Relaxed);
        self.telemetrie
            .mixer_aktiv
            .store(0, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Befehlsverarbeitung
    // -----------------------------------------------------------------------

    pub(crate) fn befehl_ausfuehren(&mut self, befehl: WorkerBefehl) {
        match befehl {
            WorkerBefehl::Oeffnen(kanal) => self.kanal_einsetzen(*kanal),
            WorkerBefehl::Uebernehmen { kanal, mischen_mit } => {
                let id = kanal.id();
                info!(worker = self.index, kanal = %id, "Kanal uebernommen");
                self.kanal_einsetzen(*kanal);
                if let Some(a) = mischen_mit {
                    self.lokal_mischen(a, id);
                }
                self.zurueckgestellte_wiederholen();
            }
            andere => self.kanal_befehl(andere, Instant::now()),
        }
    }

    fn kanal_einsetzen(&mut self, mut kanal: Kanal) {
        let id = kanal.id();
        if let Err(e) = kanal.transport_anmelden() {
            error!(worker = self.index, kanal = %id, fehler = %e, "Transport konnte nicht angemeldet werden");
            kanal.schliessen_anfordern("transport error");
        }
        kanal.starten(Instant::now());
        self.verbund.registry.insert(id, self.index);
        self.kanaele.insert(id, kanal);
        debug!(worker = self.index, kanal = %id, "Kanal eingesetzt");
    }

    /// Fuehrt einen kanalbezogenen Befehl aus oder leitet ihn weiter
    fn kanal_befehl(&mut self, befehl: WorkerBefehl, erhalten: Instant) {
        let Some(kanal_id) = befehl.kanal_id() else {
            return;
        };

        if !self.kanaele.contains_key(&kanal_id) {
            self.nicht_lokal(kanal_id, befehl, erhalten);
            return;
        }

        match befehl {
            WorkerBefehl::ZielSetzen { remote, .. } => {
                self.mit_kanal(kanal_id, |k| k.ziel_setzen(remote))
            }
            WorkerBefehl::RichtungSetzen {
                senden, empfangen, ..
            } => self.mit_kanal(kanal_id, |k| k.richtung_setzen(senden, empfangen)),
            WorkerBefehl::EchoSetzen { echo, .. } => {
                self.mit_kanal(kanal_id, |k| k.echo_setzen(echo))
            }
            WorkerBefehl::Abspielen { auftrag, .. } => {
                self.mit_kanal(kanal_id, |k| k.abspielen(auftrag))
            }
            WorkerBefehl::Aufnehmen { auftrag, .. } => {
                self.mit_kanal(kanal_id, |k| k.aufnehmen(auftrag))
            }
            WorkerBefehl::DtmfSenden { ziffern, .. } => {
                self.mit_kanal(kanal_id, |k| k.dtmf_senden(&ziffern))
            }
            WorkerBefehl::SicherheitSetzen { sitzung, .. } => {
                self.mit_kanal(kanal_id, |k| k.sicherheit_setzen(sitzung))
            }
            WorkerBefehl::Schliessen { grund, .. } => {
                self.mit_kanal(kanal_id, |k| k.schliessen_anfordern(grund))
            }
            WorkerBefehl::Statistik { antwort, .. } => {
                if let Some(kanal) = self.kanaele.get(&kanal_id) {
                    let _ = antwort.send(kanal.statistik());
                }
            }
            WorkerBefehl::Entmischen { .. } => self.loesen(kanal_id),
            WorkerBefehl::Mischen { a, b } => self.mischen(a, b),
            WorkerBefehl::Abgeben {
                ziel, mischen_mit, ..
            } => self.abgeben(kanal_id, ziel, mischen_mit),
            WorkerBefehl::Oeffnen(_) | WorkerBefehl::Uebernehmen { .. } => {}
        }
    }

    fn mit_kanal(&mut self, kanal_id: KanalId, f: impl FnOnce(&mut Kanal)) {
        if let Some(kanal) = self.kanaele.get_mut(&kanal_id) {
            f(kanal);
        }
    }

    /// Befehl fuer einen Kanal, den dieser Worker (noch) nicht besitzt
    fn nicht_lokal(&mut self, kanal_id: KanalId, befehl: WorkerBefehl, erhalten: Instant) {
        let besitzer = self.verbund.registry.get(&kanal_id).map(|e| *e.value());
        match besitzer {
            Some(w) if w == self.index => self.zurueckstellen(befehl, erhalten),
            Some(w) => match self.verbund.sender.get(w) {
                Some(tx) => {
                    let art = befehl.art();
                    if tx.try_send(befehl).is_err() {
                        warn!(
                            worker = self.index,
                            ziel = w,
                            kanal = %kanal_id,
                            befehl = art,
                            "Weiterleitung fehlgeschlagen, Befehl verworfen"
                        );
                    }
                }
                None => {
                    error!(worker = self.index, ziel = w, "Registry verweist auf unbekannten Worker");
                }
            },
            None => {
                debug!(
                    worker = self.index,
                    kanal = %kanal_id,
                    befehl = befehl.art(),
                    "Kanal unbekannt, Befehl verworfen"
                );
            }
        }
    }

    fn zurueckstellen(&mut self, befehl: WorkerBefehl, erhalten: Instant) {
        if self.zurueckgestellt.len() >= ZURUECKSTELLEN_MAX {
            warn!(worker = self.index, befehl = befehl.art(), "Zu viele zurueckgestellte Befehle, verworfen");
            return;
        }
        debug!(worker = self.index, befehl = befehl.art(), "Befehl zurueckgestellt");
        self.zurueckgestellt.push((erhalten, befehl));
    }

    fn zurueckgestellte_wiederholen(&mut self) {
        if self.zurueckgestellt.is_empty() {
            return;
        }
        let jetzt = Instant::now();
        for (erhalten, befehl) in std::mem::take(&mut self.zurueckgestellt) {
            if jetzt.saturating_duration_since(erhalten) > ZURUECKSTELLEN_MAX_ALTER {
                debug!(worker = self.index, befehl = befehl.art(), "Zurueckgestellter Befehl abgelaufen");
                continue;
            }
            self.kanal_befehl(befehl, erhalten);
        }
    }

    // -----------------------------------------------------------------------
    // Mixer und Migration
    // -----------------------------------------------------------------------

    /// `a` ist lokal; `b` ist lokal oder wird hierher migriert
    fn mischen(&mut self, a: KanalId, b: KanalId) {
        if self.kanaele.contains_key(&b) {
            self.lokal_mischen(a, b);
            return;
        }
        let besitzer = self.verbund.registry.get(&b).map(|e| *e.value());
        let Some(w) = besitzer else {
            warn!(worker = self.index, kanal = %b, "Mischen: Kanal unbekannt");
            return;
        };
        let Some(tx) = self.verbund.sender.get(w) else {
            return;
        };
        let befehl = WorkerBefehl::Abgeben {
            kanal_id: b,
            ziel: self.index,
            mischen_mit: a,
        };
        if tx.try_send(befehl).is_err() {
            warn!(worker = self.index, ziel = w, kanal = %b, "Mischen: Abgabe konnte nicht angefordert werden");
        } else {
            debug!(worker = self.index, von = w, kanal = %b, "Migration angefordert");
        }
    }

    /// Gibt einen Kanal an Worker `ziel` ab
    fn abgeben(&mut self, kanal_id: KanalId, ziel: usize, mischen_mit: KanalId) {
        if ziel == self.index {
            self.lokal_mischen(mischen_mit, kanal_id);
            return;
        }
        let Some(tx) = self.verbund.sender.get(ziel).cloned() else {
            return;
        };
        self.loesen(kanal_id);
        let Some(mut kanal) = self.kanaele.remove(&kanal_id) else {
            return;
        };
        kanal.telemetrie_melden(&self.telemetrie);
        if let Err(e) = kanal.transport_abmelden() {
            warn!(worker = self.index, kanal = %kanal_id, fehler = %e, "Transport konnte nicht abgemeldet werden");
        }

        self.verbund.registry.insert(kanal_id, ziel);
        let befehl = WorkerBefehl::Uebernehmen {
            kanal: Box::new(kanal),
            mischen_mit: Some(mischen_mit),
        };
        match tx.try_send(befehl) {
            Ok(()) => {
                info!(worker = self.index, ziel, kanal = %kanal_id, "Kanal abgegeben");
            }
            Err(e) => {
                warn!(worker = self.index, ziel, kanal = %kanal_id, "Abgabe fehlgeschlagen, Kanal bleibt");
                if let WorkerBefehl::Uebernehmen { kanal, .. } = e.into_inner() {
                    self.kanal_einsetzen(*kanal);
                }
            }
        }
    }

    /// Beide Kanaele liegen auf diesem Worker
    fn lokal_mischen(&mut self, a: KanalId, b: KanalId) {
        if a == b || !self.kanaele.contains_key(&a) || !self.kanaele.contains_key(&b) {
            warn!(worker = self.index, %a, %b, "Mischen: Kanaele nicht verfuegbar");
            return;
        }

        match (self.mixer_von(a), self.mixer_von(b)) {
            (Some(x), Some(y)) if x == y => {}
            (Some(x), _) => {
                self.loesen(b);
                if let Some(mixer) = self.mixer.get_mut(&x) {
                    mixer.aufnehmen(b);
                }
            }
            (None, Some(y)) => {
                if let Some(mixer) = self.mixer.get_mut(&y) {
                    mixer.aufnehmen(a);
                }
            }
            (None, None) => {
                let mut mixer =
                    Mixer::neu(MixerId::new(), Arc::clone(&self.ereignisse), Instant::now());
                mixer.aufnehmen(a);
                mixer.aufnehmen(b);
                self.mixer.insert(mixer.id(), mixer);
            }
        }
    }

    /// Mixer, dem der Kanal angehoert oder fuer den er vorgemerkt ist
    fn mixer_von(&self, kanal_id: KanalId) -> Option<MixerId> {
        self.kanaele
            .get(&kanal_id)
            .and_then(Kanal::mixer)
            .filter(|m| self.mixer.contains_key(m))
            .or_else(|| {
                self.mixer
                    .values()
                    .find(|m| m.ist_vorgemerkt(kanal_id))
                    .map(Mixer::id)
            })
    }

    /// Loest einen Kanal aus jedem Mixer; der Mixer bemerkt es im naechsten Tick
    fn loesen(&mut self, kanal_id: KanalId) {
        if let Some(kanal) = self.kanaele.get_mut(&kanal_id) {
            kanal.mixer_setzen(None);
        }
        for mixer in self.mixer.values_mut() {
            mixer.vormerkung_entfernen(kanal_id);
        }
    }
}

/// Naechste Deadline; bei zu grossem Rueckstand wird neu ausgerichtet
fn termin_vorruecken(termin: Instant, jetzt: Instant, wer: &dyn Display) -> Instant {
    let naechster = termin + TICK;
    let rueckstand = jetzt.saturating_duration_since(naechster);
    if rueckstand > MAX_RUECKSTAND {
        warn!(
            tick = %wer,
            rueckstand_ms = rueckstand.as_millis() as u64,
            "Tick verspaetet, Deadline neu ausgerichtet"
        );
        jetzt + TICK
    } else {
        naechster
    }
}
