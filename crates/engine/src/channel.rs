//! Kanal – Zustandsmaschine eines RTP/RTCP-Streams
//!
//! Ein Kanal besitzt seinen Transport, einen Jitter Buffer und je einen
//! Codec-Cache fuer Ein- und Ausgang. Er wird von genau einem Worker besessen
//! und alle 20ms per [`Kanal::tick`] getrieben; dabei wird nie auf I/O
//! gewartet und es gibt keine Locks.
//!
//! ## Zustaende
//!
//! ```text
//!   Ruhend ──starten()──> Aktiv ──schliessen_anfordern()──> Schliessend ──tick──> Geschlossen
//! ```
//!
//! ## Ablauf eines Ticks
//!
//! 1. Transport leeren (Demultiplexing, Sicherheit, Jitter Buffer, RTCP)
//! 2. Unter Mixer-Kontrolle: fertig (der Mixer treibt das Audio)
//! 3. Schliessen abschliessen falls angefordert
//! 4. Zeitstempel vorruecken, Leerlauf pruefen, Aufnahmen uebernehmen,
//!    neue Generation in beiden Caches
//! 5. Pop-Kette: entschuetzen, DTMF erkennen, Audio in den Eingangs-Cache
//! 6. DTMF-Ziffern senden
//! 7. Wiedergabe tauschen, Echo oder Wiedergabe senden
//! 8. Aufnahmen bedienen
//!
//! Fehler pro Paket werden in [`KanalStatistik`] gezaehlt, nie propagiert.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mediabridge_codec::codecx::LEISTUNG_MIN_PAKETE;
use mediabridge_codec::{CodecBibliothek, CodecCache, RawSound};
use mediabridge_core::{
    EreignisSenke, KanalId, MediabridgeError, MedienEreignis, MixerId, Result,
};
use mediabridge_protocol::codec::{DTMF_PAYLOAD_TYP_STANDARD, FRAME_MS, ZEITSTEMPEL_PRO_FRAME};
use mediabridge_protocol::dtmf::{ziffer_zu_code, DtmfEreignis};
use mediabridge_protocol::rtp::{datagramm_klassifizieren, DatagrammArt, RTP_MAX_GROESSE};
use mediabridge_protocol::{KlangFormat, RtpPaket};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::jitter_buffer::{JitterBuffer, JitterBufferConfig, JitterBufferStatistik};
use crate::media::{Aufnahme, AufnahmeAuftrag, AufnahmeSchwellen, WiedergabeAuftrag};
use crate::security::{HandshakeStatus, SicherheitsSitzung};
use crate::telemetry::WorkerTelemetrie;
use crate::transport::RtpTransport;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Empfangspuffer fuer ein Datagramm
const DATAGRAMM_PUFFER: usize = 2048;

/// Maximal gelesene Datagramme pro Socket und Tick
const MAX_DATAGRAMME_PRO_TICK: usize = 64;

/// Sequenzluecke ab der ein DTMF-Marker synthetisiert wird
const DTMF_MAX_SEQUENZLUECKE: u16 = 20;

/// Ticks zwischen zwei gesendeten DTMF-Ziffern
const DTMF_TICKS_PRO_ZIFFER: u32 = 10;

/// Frames pro gesendeter DTMF-Ziffer (Start, Fortsetzung, Ende)
const DTMF_FRAMES_PRO_ZIFFER: u8 = 3;

/// Lautstaerke gesendeter DTMF-Events in -dBm0
const DTMF_LAUTSTAERKE: u8 = 10;

/// Ticks ueber die die Signalleistung gemittelt wird
const LEISTUNG_FENSTER: usize = 10;

/// Standard-Leerlauf: 20 Sekunden ohne Empfang
pub const STANDARD_LEERLAUF_TICKS: u32 = 1000;

// ---------------------------------------------------------------------------
// Parameter
// ---------------------------------------------------------------------------

/// Lebenszyklus eines Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KanalZustand {
    /// Erstellt, tickt noch nicht
    Ruhend,
    /// Transport gebunden, Tick laeuft
    Aktiv,
    /// Schliessen angefordert, wird im naechsten Tick abgeschlossen
    Schliessend,
    /// Ressourcen freigegeben
    Geschlossen,
}

/// Parameter beim Oeffnen eines Kanals
pub struct KanalParameter {
    /// Ziel fuer ausgehendes RTP (None = erstes gueltiges Paket latchen)
    pub remote: Option<SocketAddr>,
    /// Codec auf der Leitung
    pub codec: KlangFormat,
    pub senden: bool,
    pub empfangen: bool,
    /// Payload-Typ fuer RFC 2833 Events
    pub dtmf_payload_typ: u8,
    pub sicherheit: Option<Box<dyn SicherheitsSitzung>>,
}

impl std::fmt::Debug for KanalParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KanalParameter")
            .field("remote", &self.remote)
            .field("codec", &self.codec)
            .field("senden", &self.senden)
            .field("empfangen", &self.empfangen)
            .field("dtmf_payload_typ", &self.dtmf_payload_typ)
            .field("sicherheit", &self.sicherheit.is_some())
            .finish()
    }
}

impl KanalParameter {
    /// Bidirektionaler Kanal ohne festes Ziel
    pub fn neu(codec: KlangFormat) -> Self {
        Self {
            remote: None,
            codec,
            senden: true,
            empfangen: true,
            dtmf_payload_typ: DTMF_PAYLOAD_TYP_STANDARD,
            sicherheit: None,
        }
    }

    pub fn mit_remote(mut self, remote: SocketAddr) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn mit_richtung(mut self, senden: bool, empfangen: bool) -> Self {
        self.senden = senden;
        self.empfangen = empfangen;
        self
    }

    pub fn mit_dtmf_payload_typ(mut self, pt: u8) -> Self {
        self.dtmf_payload_typ = pt;
        self
    }

    pub fn mit_sicherheit(mut self, sitzung: Box<dyn SicherheitsSitzung>) -> Self {
        self.sicherheit = Some(sitzung);
        self
    }

    /// Prueft Codec und DTMF-Payload-Typ gegen die Codec-Bibliothek
    pub fn validieren(&self, bibliothek: &CodecBibliothek) -> Result<()> {
        if !self.codec.ist_wire_format() {
            return Err(MediabridgeError::konfiguration(format!(
                "{} ist ein internes Format und kann nicht gesendet werden",
                self.codec
            )));
        }
        if !bibliothek.unterstuetzt(self.codec) {
            return Err(MediabridgeError::CodecNichtVerfuegbar(
                self.codec.name().to_string(),
            ));
        }
        if self.dtmf_payload_typ > 127 {
            return Err(MediabridgeError::konfiguration(format!(
                "DTMF-Payload-Typ {} ausserhalb 0..=127",
                self.dtmf_payload_typ
            )));
        }
        if self.dtmf_payload_typ == self.codec.payload_typ() {
            return Err(MediabridgeError::konfiguration(format!(
                "DTMF-Payload-Typ {} kollidiert mit {}",
                self.dtmf_payload_typ, self.codec
            )));
        }
        Ok(())
    }
}

/// Gemeinsame Umgebung aller Kanaele einer Engine
#[derive(Clone)]
pub struct KanalKontext {
    pub bibliothek: Arc<CodecBibliothek>,
    pub jitter: JitterBufferConfig,
    pub leerlauf_ticks: u32,
    pub ereignisse: Arc<dyn EreignisSenke>,
}

impl std::fmt::Debug for KanalKontext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KanalKontext")
            .field("jitter", &self.jitter)
            .field("leerlauf_ticks", &self.leerlauf_ticks)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Statistik
// ---------------------------------------------------------------------------

/// Zaehler eines Kanals (Snapshot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KanalStatistik {
    pub pakete_ein: u64,
    pub pakete_aus: u64,
    pub bytes_ein: u64,
    pub bytes_aus: u64,
    /// Entschuetzen fehlgeschlagen, Paket verworfen
    pub entschluesselung_fehlgeschlagen: u64,
    /// Kein RTP v2 oder Header abgeschnitten
    pub fehlerhaft: u64,
    /// Groesser als ein Paket-Slot
    pub zu_gross: u64,
    pub unbekannter_payload: u64,
    pub dtmf_empfangen: u64,
    pub dtmf_gesendet: u64,
    pub sendefehler: u64,
    pub rtcp_empfangen: u64,
    pub jitter: JitterBufferStatistik,
}

// ---------------------------------------------------------------------------
// Interne Hilfstypen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct DtmfSendung {
    code: u8,
    schritt: u8,
    zeitstempel: u32,
}

#[derive(Debug, Clone, Copy)]
struct EmpfangenesEvent {
    sequenz: u16,
    zeitstempel: u32,
    marker: bool,
    ereignis: DtmfEreignis,
}

struct AktiveAufnahme {
    ziel: String,
    schreiber: Box<dyn Aufnahme>,
    schwellen: AufnahmeSchwellen,
    pausiert: bool,
    beenden: bool,
    gestartet: bool,
    /// Ticks seit dem Start (auch pausiert)
    laufzeit: u64,
}

#[derive(Debug, Default)]
struct AufnahmeSchritt {
    gestartet: bool,
    ende: Option<&'static str>,
}

impl AktiveAufnahme {
    fn aus_auftrag(auftrag: AufnahmeAuftrag, schreiber: Box<dyn Aufnahme>) -> Self {
        Self {
            ziel: auftrag.ziel,
            schreiber,
            schwellen: auftrag.schwellen,
            pausiert: auftrag.pausiert,
            beenden: auftrag.beenden,
            gestartet: false,
            laufzeit: 0,
        }
    }

    fn schritt(
        &mut self,
        mittel: Option<f64>,
        eingang: &mut CodecCache,
        ausgang: &mut CodecCache,
    ) -> AufnahmeSchritt {
        let mut schritt = AufnahmeSchritt::default();
        if self.beenden {
            schritt.ende = Some("finished");
            return schritt;
        }
        if !self.gestartet {
            let bereit = match self.schwellen.start_leistung {
                None => true,
                Some(schwelle) => mittel.is_some_and(|m| m > schwelle),
            };
            if !bereit {
                return schritt;
            }
            self.gestartet = true;
            schritt.gestartet = true;
        }

        self.laufzeit += 1;
        if !self.pausiert && !self.schreiber.schreiben(eingang, ausgang) {
            schritt.ende = Some("writefailed");
            return schritt;
        }

        let dauer = Duration::from_millis(self.laufzeit * FRAME_MS as u64);
        if self.schwellen.max_dauer.is_some_and(|max| dauer >= max) {
            schritt.ende = Some("maxduration");
        } else if let (Some(schwelle), Some(m)) = (self.schwellen.ende_leistung, mittel) {
            if dauer >= self.schwellen.min_dauer && m < schwelle {
                schritt.ende = Some("silence");
            }
        }
        schritt
    }
}

// ---------------------------------------------------------------------------
// Kanal
// ---------------------------------------------------------------------------

/// Ein RTP-Kanal mit eigenem Tick
pub struct Kanal {
    id: KanalId,
    zustand: KanalZustand,
    transport: Box<dyn RtpTransport>,
    jitter: JitterBuffer,
    pub(crate) eingang: CodecCache,
    pub(crate) ausgang: CodecCache,
    codec: KlangFormat,
    dtmf_pt: u8,
    remote: Option<SocketAddr>,

    senden: bool,
    empfangen: bool,
    echo: bool,

    ssrc_aus: u32,
    ssrc_ein: Option<u32>,
    sequenz_aus: u16,
    zeitstempel_aus: u32,
    marker_faellig: bool,
    audio_gesendet: bool,
    dtmf_gesendet: bool,

    dtmf_warteschlange: VecDeque<u8>,
    dtmf_sendung: Option<DtmfSendung>,
    dtmf_pause: u32,
    letzte_event_sequenz: Option<u16>,
    letzter_event_zeitstempel: Option<u32>,

    wiedergabe: Option<WiedergabeAuftrag>,
    neue_wiedergabe: Option<WiedergabeAuftrag>,
    aufnahmen: Vec<AktiveAufnahme>,
    neue_aufnahmen: Vec<AufnahmeAuftrag>,
    leistung_verlauf: VecDeque<f64>,

    sicherheit: Option<Box<dyn SicherheitsSitzung>>,
    handshake_fertig: bool,

    mixer: Option<MixerId>,
    ticks_ohne_empfang: u32,
    leerlauf_ticks: u32,
    schliessgrund: Option<String>,

    statistik: KanalStatistik,
    gemeldet: KanalStatistik,
    ereignisse: Arc<dyn EreignisSenke>,
    rohklang: RawSound,
    pub(crate) naechster_tick: Instant,
}

impl std::fmt::Debug for Kanal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kanal")
            .field("id", &self.id)
            .field("zustand", &self.zustand)
            .field("codec", &self.codec)
            .field("remote", &self.remote)
            .field("mixer", &self.mixer)
            .finish()
    }
}

impl Kanal {
    /// Erstellt einen Kanal im Zustand `Ruhend`
    ///
    /// # Fehler
    /// Konfigurationsfehler wenn Codec, DTMF-Payload-Typ oder Jitter-Buffer
    /// ungueltig sind.
    pub fn neu(
        id: KanalId,
        parameter: KanalParameter,
        transport: Box<dyn RtpTransport>,
        kontext: &KanalKontext,
    ) -> Result<Self> {
        parameter.validieren(&kontext.bibliothek)?;
        kontext
            .jitter
            .validieren()
            .map_err(MediabridgeError::Konfiguration)?;

        let bibliothek = Arc::clone(&kontext.bibliothek);
        Ok(Self {
            id,
            zustand: KanalZustand::Ruhend,
            transport,
            jitter: JitterBuffer::neu(kontext.jitter),
            eingang: CodecCache::neu(Arc::clone(&bibliothek)),
            ausgang: CodecCache::neu(bibliothek),
            codec: parameter.codec,
            dtmf_pt: parameter.dtmf_payload_typ,
            remote: parameter.remote,
            senden: parameter.senden,
            empfangen: parameter.empfangen,
            echo: false,
            ssrc_aus: rand::random(),
            ssrc_ein: None,
            sequenz_aus: rand::random(),
            zeitstempel_aus: rand::random(),
            marker_faellig: true,
            audio_gesendet: false,
            dtmf_gesendet: false,
            dtmf_warteschlange: VecDeque::new(),
            dtmf_sendung: None,
            dtmf_pause: 0,
            letzte_event_sequenz: None,
            letzter_event_zeitstempel: None,
            wiedergabe: None,
            neue_wiedergabe: None,
            aufnahmen: Vec::new(),
            neue_aufnahmen: Vec::new(),
            leistung_verlauf: VecDeque::with_capacity(LEISTUNG_FENSTER),
            sicherheit: parameter.sicherheit,
            handshake_fertig: false,
            mixer: None,
            ticks_ohne_empfang: 0,
            leerlauf_ticks: kontext.leerlauf_ticks,
            schliessgrund: None,
            statistik: KanalStatistik::default(),
            gemeldet: KanalStatistik::default(),
            ereignisse: Arc::clone(&kontext.ereignisse),
            rohklang: RawSound::neu(KlangFormat::Linear16),
            naechster_tick: Instant::now(),
        })
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn id(&self) -> KanalId {
        self.id
    }

    pub fn zustand(&self) -> KanalZustand {
        self.zustand
    }

    pub fn codec(&self) -> KlangFormat {
        self.codec
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn lokaler_port(&self) -> u16 {
        self.transport.lokaler_port()
    }

    pub fn mixer(&self) -> Option<MixerId> {
        self.mixer
    }

    pub fn ist_schliessend(&self) -> bool {
        matches!(
            self.zustand,
            KanalZustand::Schliessend | KanalZustand::Geschlossen
        )
    }

    pub fn statistik(&self) -> KanalStatistik {
        let mut statistik = self.statistik;
        statistik.jitter = *self.jitter.statistik();
        statistik
    }

    // -----------------------------------------------------------------------
    // Steuerung (vom Worker aufgerufen)
    // -----------------------------------------------------------------------

    /// Startet den Tick ab `jetzt`
    pub fn starten(&mut self, jetzt: Instant) {
        if self.zustand == KanalZustand::Ruhend {
            self.zustand = KanalZustand::Aktiv;
            self.naechster_tick = jetzt;
        }
    }

    pub fn ziel_setzen(&mut self, remote: SocketAddr) {
        debug!(kanal = %self.id, %remote, "RTP-Ziel gesetzt");
        self.remote = Some(remote);
    }

    pub fn richtung_setzen(&mut self, senden: bool, empfangen: bool) {
        self.senden = senden;
        if empfangen && !self.empfangen {
            self.ticks_ohne_empfang = 0;
        }
        self.empfangen = empfangen;
    }

    pub fn echo_setzen(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Uebernimmt die Wiedergabe im naechsten Tick
    pub fn abspielen(&mut self, auftrag: WiedergabeAuftrag) {
        self.neue_wiedergabe = Some(auftrag);
    }

    /// Reiht eine Aufnahme (oder deren Steuerung) fuer den naechsten Tick ein
    pub fn aufnehmen(&mut self, auftrag: AufnahmeAuftrag) {
        self.neue_aufnahmen.push(auftrag);
    }

    /// Reiht DTMF-Ziffern zum Senden ein; unbekannte Zeichen werden ignoriert
    pub fn dtmf_senden(&mut self, ziffern: &str) {
        self.dtmf_warteschlange
            .extend(ziffern.chars().filter_map(ziffer_zu_code));
    }

    /// Ersetzt die Sicherheitssitzung; der Handshake beginnt von vorn
    pub fn sicherheit_setzen(&mut self, sitzung: Box<dyn SicherheitsSitzung>) {
        self.sicherheit = Some(sitzung);
        self.handshake_fertig = false;
    }

    pub(crate) fn mixer_setzen(&mut self, mixer: Option<MixerId>) {
        self.mixer = mixer;
    }

    /// Meldet den Transport am Reactor des aufrufenden Workers an
    pub(crate) fn transport_anmelden(&mut self) -> std::io::Result<()> {
        self.transport.anmelden()
    }

    pub(crate) fn transport_abmelden(&mut self) -> std::io::Result<()> {
        self.transport.abmelden()
    }

    /// Fordert das Schliessen an; der erste Grund gewinnt
    pub fn schliessen_anfordern(&mut self, grund: impl Into<String>) {
        if self.ist_schliessend() {
            return;
        }
        let grund = grund.into();
        debug!(kanal = %self.id, grund = %grund, "Schliessen angefordert");
        self.schliessgrund = Some(grund);
        self.zustand = KanalZustand::Schliessend;
    }

    /// Meldet die Statistik-Differenz seit dem letzten Aufruf
    pub(crate) fn telemetrie_melden(&mut self, telemetrie: &WorkerTelemetrie) {
        let jetzt = self.statistik();
        telemetrie.kanal_delta(&self.gemeldet, &jetzt);
        self.gemeldet = jetzt;
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Fuehrt einen 20ms-Tick aus; false = Kanal ist geschlossen
    pub fn tick(&mut self) -> bool {
        match self.zustand {
            KanalZustand::Geschlossen => return false,
            KanalZustand::Ruhend => self.zustand = KanalZustand::Aktiv,
            _ => {}
        }

        self.transport_leeren();

        if self.mixer.is_some() && !self.ist_schliessend() {
            return true;
        }
        if self.zustand == KanalZustand::Schliessend {
            self.abschliessen();
            return false;
        }

        self.vorbereiten();
        if self.zustand == KanalZustand::Schliessend {
            self.abschliessen();
            return false;
        }

        let medien = self.paket_holen();
        self.dtmf_senden_tick();
        self.wiedergabe_tauschen();

        if self.echo {
            if medien {
                self.echo_senden();
            }
        } else if let Some(auftrag) = self.wiedergabe.as_mut() {
            if auftrag.quelle.lesen(&mut self.rohklang) {
                self.ausgang.aus_rohklang(&self.rohklang);
                self.audio_senden();
            } else {
                let kennung = auftrag.kennung.clone();
                self.wiedergabe = None;
                debug!(kanal = %self.id, wiedergabe = %kennung, "Wiedergabe beendet");
                self.melden(MedienEreignis::WiedergabeBeendet {
                    kanal_id: self.id,
                    wiedergabe: kennung,
                });
            }
        }

        self.aufnahmen_bedienen();
        self.tick_beenden();
        true
    }

    // -----------------------------------------------------------------------
    // Tick-Bausteine (auch vom Mixer genutzt)
    // -----------------------------------------------------------------------

    /// Liest alle anliegenden Datagramme und treibt die Sicherheitssitzung
    pub(crate) fn transport_leeren(&mut self) {
        let mut puffer = [0u8; DATAGRAMM_PUFFER];
        self.handshake_pruefen();

        for _ in 0..MAX_DATAGRAMME_PRO_TICK {
            let (n, von) = match self.transport.rtp_empfangen(&mut puffer) {
                Ok(Some(empfangen)) => empfangen,
                Ok(None) => break,
                Err(e) => {
                    debug!(kanal = %self.id, fehler = %e, "RTP-Empfang fehlgeschlagen");
                    break;
                }
            };
            self.datagramm_verarbeiten(&puffer[..n], von);
        }

        for _ in 0..MAX_DATAGRAMME_PRO_TICK {
            match self.transport.rtcp_empfangen(&mut puffer) {
                Ok(Some(_)) => self.statistik.rtcp_empfangen += 1,
                Ok(None) => break,
                Err(e) => {
                    debug!(kanal = %self.id, fehler = %e, "RTCP-Empfang fehlgeschlagen");
                    break;
                }
            }
        }

        self.handshake_pruefen();
        self.sicherheit_ausgehend_senden();
    }

    fn datagramm_verarbeiten(&mut self, daten: &[u8], von: SocketAddr) {
        match datagramm_klassifizieren(daten) {
            DatagrammArt::Dtls => match self.sicherheit.as_mut() {
                Some(sitzung) => {
                    sitzung.schreiben(daten);
                    self.latchen(von);
                }
                None => {
                    self.statistik.fehlerhaft += 1;
                    trace!(kanal = %self.id, "DTLS ohne Sicherheitssitzung verworfen");
                }
            },
            DatagrammArt::Rtp => {
                if !self.handshake_fertig {
                    if let Some(sitzung) = self.sicherheit.as_mut() {
                        sitzung.schreiben(daten);
                        return;
                    }
                }
                if ist_rtcp_mux(daten) {
                    self.statistik.rtcp_empfangen += 1;
                    return;
                }
                self.rtp_einsortieren(daten, von);
            }
            DatagrammArt::Sonstiges => {
                self.statistik.fehlerhaft += 1;
                trace!(kanal = %self.id, laenge = daten.len(), "Unbekanntes Datagramm verworfen");
            }
        }
    }

    fn rtp_einsortieren(&mut self, daten: &[u8], von: SocketAddr) {
        if daten.len() > RTP_MAX_GROESSE {
            self.statistik.zu_gross += 1;
            debug!(kanal = %self.id, laenge = daten.len(), "RTP-Paket zu gross");
            return;
        }
        let slot = self.jitter.reservieren();
        if let Err(e) = slot.aus_bytes(daten) {
            self.statistik.fehlerhaft += 1;
            debug!(kanal = %self.id, fehler = %e, "Fehlerhaftes RTP-Paket verworfen");
            return;
        }

        let ssrc = slot.ssrc();
        if self.ssrc_ein != Some(ssrc) {
            if let Some(alt) = self.ssrc_ein {
                info!(kanal = %self.id, alt, neu = ssrc, "SSRC gewechselt, Jitter Buffer zurueckgesetzt");
                self.jitter.zuruecksetzen();
                if self.jitter.reservieren().aus_bytes(daten).is_err() {
                    return;
                }
            }
            self.ssrc_ein = Some(ssrc);
        }

        self.jitter.push();
        self.statistik.pakete_ein += 1;
        self.statistik.bytes_ein += daten.len() as u64;
        self.ticks_ohne_empfang = 0;
        self.latchen(von);
    }

    /// Symmetrisches RTP: erstes gueltiges Paket legt das Ziel fest
    fn latchen(&mut self, von: SocketAddr) {
        if self.remote.is_none() {
            info!(kanal = %self.id, remote = %von, "RTP-Ziel gelatcht");
            self.remote = Some(von);
        }
    }

    fn handshake_pruefen(&mut self) {
        if self.handshake_fertig || self.ist_schliessend() {
            return;
        }
        let Some(sitzung) = self.sicherheit.as_mut() else {
            return;
        };
        match sitzung.handshake() {
            HandshakeStatus::Verhandelt => {}
            HandshakeStatus::Abgeschlossen => {
                info!(kanal = %self.id, "Sicherheits-Handshake abgeschlossen");
                self.handshake_fertig = true;
            }
            HandshakeStatus::Fehlgeschlagen(grund) => {
                warn!(kanal = %self.id, grund = %grund, "Sicherheits-Handshake fehlgeschlagen");
                self.schliessen_anfordern(MediabridgeError::Handshake(grund).schliessgrund());
            }
        }
    }

    fn sicherheit_ausgehend_senden(&mut self) {
        let Some(sitzung) = self.sicherheit.as_mut() else {
            return;
        };
        while let Some(datagramm) = sitzung.ausgehend() {
            let Some(ziel) = self.remote else {
                trace!(kanal = %self.id, "Kein Ziel fuer Handshake-Datagramm");
                continue;
            };
            if let Err(e) = self.transport.senden(&datagramm, ziel) {
                self.statistik.sendefehler += 1;
                debug!(kanal = %self.id, fehler = %e, "Handshake-Datagramm nicht gesendet");
            }
        }
    }

    /// Zeitstempel, Leerlauf, Aufnahmen uebernehmen, neue Generation
    pub(crate) fn vorbereiten(&mut self) {
        self.zeitstempel_aus = self.zeitstempel_aus.wrapping_add(ZEITSTEMPEL_PRO_FRAME);
        self.audio_gesendet = false;
        self.dtmf_gesendet = false;

        if self.empfangen {
            self.ticks_ohne_empfang = self.ticks_ohne_empfang.saturating_add(1);
            if self.ticks_ohne_empfang >= self.leerlauf_ticks {
                info!(kanal = %self.id, ticks = self.ticks_ohne_empfang, "Kein Empfang, Kanal im Leerlauf");
                self.schliessen_anfordern("idle");
            }
        }

        self.aufnahmen_uebernehmen();
        self.eingang.generation_markieren();
        self.ausgang.generation_markieren();
    }

    fn aufnahmen_uebernehmen(&mut self) {
        for auftrag in std::mem::take(&mut self.neue_aufnahmen) {
            if let Some(laufend) = self.aufnahmen.iter_mut().find(|a| a.ziel == auftrag.ziel) {
                laufend.pausiert = auftrag.pausiert;
                laufend.beenden = auftrag.beenden;
                continue;
            }
            let mut auftrag = auftrag;
            match auftrag.schreiber.take() {
                Some(schreiber) => {
                    debug!(kanal = %self.id, ziel = %auftrag.ziel, "Aufnahme uebernommen");
                    self.aufnahmen
                        .push(AktiveAufnahme::aus_auftrag(auftrag, schreiber));
                }
                None => {
                    debug!(kanal = %self.id, ziel = %auftrag.ziel, "Steuerung ohne laufende Aufnahme ignoriert");
                }
            }
        }
    }

    /// Pop-Kette: liefert true wenn ein Audio-Paket im Eingangs-Cache liegt
    ///
    /// DTMF-Pakete werden hier konsumiert und nie als Medien weitergereicht.
    pub(crate) fn paket_holen(&mut self) -> bool {
        loop {
            let Some(paket) = self.jitter.pop() else {
                return false;
            };

            if self.handshake_fertig {
                if let Some(sitzung) = self.sicherheit.as_mut() {
                    if !sitzung.entschuetzen(paket) {
                        self.statistik.entschluesselung_fehlgeschlagen += 1;
                        trace!(kanal = %self.id, sequenz = paket.sequenz(), "Entschuetzen fehlgeschlagen");
                        return false;
                    }
                }
            }

            let pt = paket.payload_typ();
            if pt == self.dtmf_pt {
                let event = match DtmfEreignis::decode(paket.nutzdaten()) {
                    Ok(ereignis) => EmpfangenesEvent {
                        sequenz: paket.sequenz(),
                        zeitstempel: paket.zeitstempel(),
                        marker: paket.marker(),
                        ereignis,
                    },
                    Err(e) => {
                        self.statistik.fehlerhaft += 1;
                        debug!(kanal = %self.id, fehler = %e, "Fehlerhaftes DTMF-Paket");
                        continue;
                    }
                };
                self.dtmf_verarbeiten(event);
                continue;
            }

            let Some(format) = KlangFormat::aus_payload_typ(pt).filter(|f| f.ist_wire_format())
            else {
                self.statistik.unbekannter_payload += 1;
                debug!(kanal = %self.id, payload_typ = pt, "Unbekannter Payload-Typ verworfen");
                return false;
            };
            self.eingang.aus_paket(format, paket.nutzdaten());
            return true;
        }
    }

    fn dtmf_verarbeiten(&mut self, event: EmpfangenesEvent) {
        let synthetisiert = match self.letzte_event_sequenz {
            None => true,
            Some(letzte) => event.sequenz.wrapping_sub(letzte) > DTMF_MAX_SEQUENZLUECKE,
        };

        // Wiederholte End-Pakete tragen den Zeitstempel des gemeldeten Events
        if (event.marker || synthetisiert)
            && self.letzter_event_zeitstempel != Some(event.zeitstempel)
        {
            self.letzter_event_zeitstempel = Some(event.zeitstempel);

            if self.wiedergabe.as_ref().is_some_and(|w| w.unterbrechbar) {
                if let Some(auftrag) = self.wiedergabe.take() {
                    debug!(kanal = %self.id, wiedergabe = %auftrag.kennung, "Wiedergabe durch DTMF unterbrochen");
                    self.melden(MedienEreignis::WiedergabeUnterbrochen {
                        kanal_id: self.id,
                        wiedergabe: auftrag.kennung,
                    });
                }
            }

            if let Some(ziffer) = event.ereignis.ziffer() {
                self.statistik.dtmf_empfangen += 1;
                debug!(kanal = %self.id, ziffer = %ziffer, synthetisiert, "DTMF empfangen");
                self.melden(MedienEreignis::DtmfEmpfangen {
                    kanal_id: self.id,
                    ziffer,
                });
            }
        }

        self.letzte_event_sequenz = if event.ereignis.ende {
            None
        } else {
            Some(event.sequenz)
        };
    }

    /// Sendet den naechsten DTMF-Frame oder startet die naechste Ziffer
    pub(crate) fn dtmf_senden_tick(&mut self) {
        self.dtmf_pause = self.dtmf_pause.saturating_sub(1);

        let sendung = match self.dtmf_sendung {
            Some(sendung) => sendung,
            None => {
                if self.dtmf_pause > 0 {
                    return;
                }
                let Some(code) = self.dtmf_warteschlange.pop_front() else {
                    return;
                };
                self.dtmf_pause = DTMF_TICKS_PRO_ZIFFER;
                self.statistik.dtmf_gesendet += 1;
                DtmfSendung {
                    code,
                    schritt: 0,
                    zeitstempel: self.zeitstempel_aus,
                }
            }
        };

        let ereignis = DtmfEreignis {
            code: sendung.code,
            ende: sendung.schritt + 1 == DTMF_FRAMES_PRO_ZIFFER,
            lautstaerke: DTMF_LAUTSTAERKE,
            dauer: (ZEITSTEMPEL_PRO_FRAME as u16) * (sendung.schritt as u16 + 1),
        };
        let mut paket = RtpPaket::leer();
        paket.initialisieren(
            self.dtmf_pt,
            self.sequenz_aus,
            sendung.zeitstempel,
            self.ssrc_aus,
        );
        paket.marker_setzen(sendung.schritt == 0);
        paket.nutzdaten_setzen(&ereignis.encode());
        self.paket_abschicken(&mut paket);
        self.dtmf_gesendet = true;

        let schritt = sendung.schritt + 1;
        self.dtmf_sendung = (schritt < DTMF_FRAMES_PRO_ZIFFER).then_some(DtmfSendung {
            schritt,
            ..sendung
        });
    }

    fn wiedergabe_tauschen(&mut self) {
        let Some(neu) = self.neue_wiedergabe.take() else {
            return;
        };
        let kennung = neu.kennung.clone();
        let ereignis = match self.wiedergabe.replace(neu) {
            Some(_) => MedienEreignis::WiedergabeErsetzt {
                kanal_id: self.id,
                wiedergabe: kennung,
            },
            None => MedienEreignis::WiedergabeGestartet {
                kanal_id: self.id,
                wiedergabe: kennung,
            },
        };
        self.melden(ereignis);
    }

    fn echo_senden(&mut self) {
        let Some(quelle) = self.eingang.quelle() else {
            return;
        };
        match self.eingang.getref(quelle) {
            Ok(klang) => self.ausgang.aus_rohklang(klang),
            Err(e) => {
                debug!(kanal = %self.id, fehler = %e, "Echo nicht dekodierbar");
                return;
            }
        }
        self.audio_senden();
    }

    /// Kodiert den Ausgangs-Cache in den Kanal-Codec und sendet ihn
    ///
    /// In einem Tick mit DTMF-Frame wird kein Audio gesendet.
    pub(crate) fn audio_senden(&mut self) {
        if self.dtmf_gesendet || !self.ausgang.hat_daten() {
            return;
        }
        let mut paket = RtpPaket::leer();
        paket.initialisieren(
            self.codec.payload_typ(),
            self.sequenz_aus,
            self.zeitstempel_aus,
            self.ssrc_aus,
        );
        match self.ausgang.getref(self.codec) {
            Ok(klang) => {
                if !paket.nutzdaten_setzen(klang.bytes()) {
                    self.statistik.zu_gross += 1;
                    return;
                }
            }
            Err(e) => {
                debug!(kanal = %self.id, fehler = %e, "Ausgang nicht kodierbar");
                return;
            }
        }
        paket.marker_setzen(self.marker_faellig);
        self.marker_faellig = false;
        self.audio_gesendet = true;
        self.paket_abschicken(&mut paket);
    }

    fn paket_abschicken(&mut self, paket: &mut RtpPaket) {
        self.sequenz_aus = self.sequenz_aus.wrapping_add(1);

        if let Some(sitzung) = self.sicherheit.as_mut() {
            // Kein ungeschuetztes Audio vor Abschluss des Handshakes
            if !self.handshake_fertig || !sitzung.schuetzen(paket) {
                self.statistik.sendefehler += 1;
                return;
            }
        }
        if !self.senden {
            return;
        }
        let Some(ziel) = self.remote else {
            return;
        };
        match self.transport.senden(paket.als_bytes(), ziel) {
            Ok(n) => {
                self.statistik.pakete_aus += 1;
                self.statistik.bytes_aus += n as u64;
                trace!(kanal = %self.id, sequenz = paket.sequenz(), "RTP gesendet");
            }
            Err(e) => {
                self.statistik.sendefehler += 1;
                trace!(kanal = %self.id, fehler = %e, "RTP-Senden fehlgeschlagen");
            }
        }
    }

    /// Schreibt beide Caches in alle aktiven Aufnahmen
    pub(crate) fn aufnahmen_bedienen(&mut self) {
        if self.aufnahmen.is_empty() {
            return;
        }
        let mittel = if self.aufnahmen.iter().any(|a| a.schwellen.braucht_leistung()) {
            self.leistung_messen()
        } else {
            None
        };

        let mut i = 0;
        while i < self.aufnahmen.len() {
            let schritt = self.aufnahmen[i].schritt(mittel, &mut self.eingang, &mut self.ausgang);
            if schritt.gestartet {
                let ziel = self.aufnahmen[i].ziel.clone();
                debug!(kanal = %self.id, ziel = %ziel, "Aufnahme gestartet");
                self.melden(MedienEreignis::AufnahmeGestartet {
                    kanal_id: self.id,
                    ziel,
                });
            }
            match schritt.ende {
                Some(grund) => {
                    let mut aufnahme = self.aufnahmen.remove(i);
                    aufnahme.schreiber.beenden();
                    debug!(kanal = %self.id, ziel = %aufnahme.ziel, grund, "Aufnahme beendet");
                    self.melden(MedienEreignis::AufnahmeBeendet {
                        kanal_id: self.id,
                        ziel: aufnahme.ziel,
                        grund: grund.to_string(),
                    });
                }
                None => i += 1,
            }
        }
    }

    /// Gleitender Mittelwert der Eingangsleistung ueber die letzten Ticks
    fn leistung_messen(&mut self) -> Option<f64> {
        if self.eingang.verarbeitete_pakete() >= LEISTUNG_MIN_PAKETE {
            // Kein Paket in diesem Tick zaehlt als Stille
            let leistung = self.eingang.signal_leistung().unwrap_or(0.0);
            if self.leistung_verlauf.len() == LEISTUNG_FENSTER {
                self.leistung_verlauf.pop_front();
            }
            self.leistung_verlauf.push_back(leistung);
        }
        if self.leistung_verlauf.is_empty() {
            return None;
        }
        Some(self.leistung_verlauf.iter().sum::<f64>() / self.leistung_verlauf.len() as f64)
    }

    /// Beginnt nach einem Tick ohne Audio einen neuen Talk-Spurt
    pub(crate) fn tick_beenden(&mut self) {
        if !self.audio_gesendet {
            self.marker_faellig = true;
        }
    }

    /// Gibt Wiedergabe, Aufnahmen und Codec-Zustaende frei
    fn abschliessen(&mut self) {
        if self.zustand == KanalZustand::Geschlossen {
            return;
        }

        if let Some(auftrag) = self.wiedergabe.take() {
            self.melden(MedienEreignis::WiedergabeUnterbrochen {
                kanal_id: self.id,
                wiedergabe: auftrag.kennung,
            });
        }
        self.neue_wiedergabe = None;
        self.neue_aufnahmen.clear();
        for mut aufnahme in std::mem::take(&mut self.aufnahmen) {
            aufnahme.schreiber.beenden();
            self.melden(MedienEreignis::AufnahmeBeendet {
                kanal_id: self.id,
                ziel: aufnahme.ziel,
                grund: "closed".into(),
            });
        }

        self.eingang.zuruecksetzen();
        self.ausgang.zuruecksetzen();
        self.jitter.zuruecksetzen();
        self.zustand = KanalZustand::Geschlossen;

        let grund = self
            .schliessgrund
            .take()
            .unwrap_or_else(|| "requested".to_string());
        info!(kanal = %self.id, grund = %grund, "Kanal geschlossen");
        self.melden(MedienEreignis::KanalGeschlossen {
            kanal_id: self.id,
            grund,
        });
    }

    fn melden(&self, ereignis: MedienEreignis) {
        self.ereignisse.melden(ereignis);
    }
}

/// RTCP im RTP-Socket (rtcp-mux): Payload-Typen 192..=223
fn ist_rtcp_mux(daten: &[u8]) -> bool {
    daten.len() >= 2 && (64..=95).contains(&(daten[1] & 0x7F))
}
