//! MedienEngine – Steuerungsoberflaeche der Media-Engine
//!
//! Die Engine besitzt den Port-Pool, die Kanal-Registry und die Befehls-Queues
//! der Worker. Alle Methoden sind nicht-blockierend: sie validieren, schicken
//! einen Befehl an den besitzenden Worker und kehren sofort zurueck.
//! Ergebnisse und Lebenszyklus-Meldungen kommen als [`MedienEreignis`] ueber
//! die beim Start uebergebene [`EreignisSenke`].
//!
//! ## Beispiel
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use mediabridge_codec::CodecBibliothek;
//! # use mediabridge_engine::{EngineConfig, KanalParameter, MedienEngine};
//! # use mediabridge_protocol::KlangFormat;
//! # fn beispiel() -> mediabridge_core::Result<()> {
//! let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
//! let engine = MedienEngine::starten(
//!     EngineConfig::default(),
//!     Arc::new(CodecBibliothek::standard()),
//!     Arc::new(tx),
//! )?;
//! let kanal = engine.kanal_oeffnen(KanalParameter::neu(KlangFormat::Ulaw))?;
//! engine.echo_setzen(kanal, true)?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use dashmap::DashMap;
use mediabridge_codec::CodecBibliothek;
use mediabridge_core::{EreignisSenke, KanalId, MediabridgeError, MedienEreignis, Result};
use mediabridge_protocol::dtmf::ziffer_zu_code;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::channel::{Kanal, KanalKontext, KanalParameter, KanalStatistik};
use crate::config::EngineConfig;
use crate::media::{AufnahmeAuftrag, WiedergabeAuftrag};
use crate::port_pool::PortPool;
use crate::security::SicherheitsSitzung;
use crate::telemetry::{EngineTelemetrie, WorkerTelemetrie};
use crate::transport::{RtpTransport, UdpTransport};
use crate::worker::{Worker, WorkerBefehl, WorkerVerbund};

/// Laufende Media-Engine mit ihrem Worker-Pool
pub struct MedienEngine {
    kontext: KanalKontext,
    ports: Arc<PortPool>,
    verbund: WorkerVerbund,
    telemetrie: Vec<Arc<WorkerTelemetrie>>,
    stopp: watch::Sender<bool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for MedienEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MedienEngine")
            .field("worker", &self.telemetrie.len())
            .field("kanaele", &self.verbund.registry.len())
            .field("ports_frei", &self.ports.frei())
            .finish()
    }
}

impl MedienEngine {
    /// Validiert die Konfiguration und startet den Worker-Pool
    pub fn starten(
        config: EngineConfig,
        bibliothek: Arc<CodecBibliothek>,
        ereignisse: Arc<dyn EreignisSenke>,
    ) -> Result<Self> {
        config.validieren()?;

        let anzahl = config.effektive_worker_anzahl();
        let ports = Arc::new(PortPool::neu(&config.ports));
        let (stopp, stopp_rx) = watch::channel(false);

        let mut sender = Vec::with_capacity(anzahl);
        let mut empfaenger = Vec::with_capacity(anzahl);
        for _ in 0..anzahl {
            let (tx, rx) = mpsc::channel(config.befehl_queue);
            sender.push(tx);
            empfaenger.push(rx);
        }
        let verbund = WorkerVerbund {
            registry: Arc::new(DashMap::new()),
            sender: Arc::new(sender),
        };

        let mut telemetrie = Vec::with_capacity(anzahl);
        let mut threads = Vec::with_capacity(anzahl);
        for (index, rx) in empfaenger.into_iter().enumerate() {
            let t = Arc::new(WorkerTelemetrie::default());
            t.heartbeat_setzen();
            let worker = Worker::neu(
                index,
                rx,
                verbund.clone(),
                Arc::clone(&t),
                Arc::clone(&ereignisse),
            );
            match worker.starten(stopp_rx.clone()) {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    stopp.send_replace(true);
                    return Err(e);
                }
            }
            telemetrie.push(t);
        }

        info!(
            worker = anzahl,
            ports = ports.kapazitaet(),
            von = config.ports.von,
            bis = config.ports.bis,
            "MedienEngine gestartet"
        );

        Ok(Self {
            kontext: KanalKontext {
                bibliothek,
                jitter: config.jitter,
                leerlauf_ticks: config.leerlauf_ticks,
                ereignisse,
            },
            ports,
            verbund,
            telemetrie,
            stopp,
            threads: Mutex::new(threads),
        })
    }

    // -----------------------------------------------------------------------
    // Kanaele
    // -----------------------------------------------------------------------

    /// Oeffnet einen Kanal auf einem freien Port-Paar und startet den Tick
    ///
    /// # Fehler
    /// - Konfigurationsfehler bei ungueltigen Parametern (kein Ereignis)
    /// - `KeinPortVerfuegbar`; zusaetzlich wird `KanalGeschlossen` mit
    ///   Grund "no port" gemeldet
    pub fn kanal_oeffnen(&self, parameter: KanalParameter) -> Result<KanalId> {
        self.laeuft()?;
        parameter.validieren(&self.kontext.bibliothek)?;

        let transport = match UdpTransport::binden(&self.ports) {
            Ok(t) => t,
            Err(e) => {
                let fehler = MediabridgeError::KeinPortVerfuegbar;
                let kanal_id = KanalId::new();
                warn!(kanal = %kanal_id, fehler = %e, "Kanal konnte nicht geoeffnet werden");
                self.kontext
                    .ereignisse
                    .melden(MedienEreignis::KanalGeschlossen {
                        kanal_id,
                        grund: fehler.schliessgrund(),
                    });
                return Err(fehler);
            }
        };
        self.kanal_oeffnen_mit_transport(parameter, Box::new(transport))
    }

    /// Oeffnet einen Kanal auf einem vom Aufrufer gelieferten Transport
    pub fn kanal_oeffnen_mit_transport(
        &self,
        parameter: KanalParameter,
        transport: Box<dyn RtpTransport>,
    ) -> Result<KanalId> {
        self.laeuft()?;
        let kanal_id = KanalId::new();
        let kanal = Kanal::neu(kanal_id, parameter, transport, &self.kontext)?;
        let rtp_port = kanal.lokaler_port();

        let worker = self.am_wenigsten_belastet();
        self.verbund.registry.insert(kanal_id, worker);
        if let Err(e) = self.an_worker(worker, WorkerBefehl::Oeffnen(Box::new(kanal))) {
            self.verbund.registry.remove(&kanal_id);
            return Err(e);
        }

        info!(kanal = %kanal_id, worker, rtp_port, "Kanal geoeffnet");
        self.kontext
            .ereignisse
            .melden(MedienEreignis::KanalGeoeffnet { kanal_id, rtp_port });
        Ok(kanal_id)
    }

    pub fn ziel_setzen(&self, kanal_id: KanalId, remote: SocketAddr) -> Result<()> {
        self.befehl(kanal_id, WorkerBefehl::ZielSetzen { kanal_id, remote })
    }

    pub fn richtung_setzen(&self, kanal_id: KanalId, senden: bool, empfangen: bool) -> Result<()> {
        self.befehl(
            kanal_id,
            WorkerBefehl::RichtungSetzen {
                kanal_id,
                senden,
                empfangen,
            },
        )
    }

    pub fn echo_setzen(&self, kanal_id: KanalId, echo: bool) -> Result<()> {
        self.befehl(kanal_id, WorkerBefehl::EchoSetzen { kanal_id, echo })
    }

    /// Startet oder ersetzt die Wiedergabe
    pub fn abspielen(&self, kanal_id: KanalId, auftrag: WiedergabeAuftrag) -> Result<()> {
        self.befehl(kanal_id, WorkerBefehl::Abspielen { kanal_id, auftrag })
    }

    /// Startet eine Aufnahme oder steuert eine laufende (gleiches Ziel)
    pub fn aufnehmen(&self, kanal_id: KanalId, auftrag: AufnahmeAuftrag) -> Result<()> {
        self.befehl(kanal_id, WorkerBefehl::Aufnehmen { kanal_id, auftrag })
    }

    /// Reiht DTMF-Ziffern (0-9, *, #, A-D) zum Senden ein
    pub fn dtmf_senden(&self, kanal_id: KanalId, ziffern: &str) -> Result<()> {
        if ziffern.is_empty() || ziffern.chars().any(|z| ziffer_zu_code(z).is_none()) {
            return Err(MediabridgeError::konfiguration(format!(
                "Ungueltige DTMF-Ziffern: {ziffern:?}"
            )));
        }
        self.befehl(
            kanal_id,
            WorkerBefehl::DtmfSenden {
                kanal_id,
                ziffern: ziffern.to_string(),
            },
        )
    }

    /// Setzt eine Sicherheitssitzung ein; der Handshake beginnt neu
    pub fn sicherheit_setzen(
        &self,
        kanal_id: KanalId,
        sitzung: Box<dyn SicherheitsSitzung>,
    ) -> Result<()> {
        self.befehl(kanal_id, WorkerBefehl::SicherheitSetzen { kanal_id, sitzung })
    }

    /// Verbindet zwei Kanaele ueber einen Mixer
    ///
    /// Liegen beide auf verschiedenen Workern, wird `b` zum Worker von `a`
    /// migriert. Ist einer der beiden schon gemischt, tritt der andere diesem
    /// Mixer bei.
    pub fn mischen(&self, a: KanalId, b: KanalId) -> Result<()> {
        if a == b {
            return Err(MediabridgeError::konfiguration(
                "Ein Kanal kann nicht mit sich selbst gemischt werden",
            ));
        }
        if !self.verbund.registry.contains_key(&b) {
            return Err(MediabridgeError::KanalNichtGefunden(b.to_string()));
        }
        self.befehl(a, WorkerBefehl::Mischen { a, b })
    }

    /// Loest einen Kanal aus seinem Mixer
    pub fn entmischen(&self, kanal_id: KanalId) -> Result<()> {
        self.befehl(kanal_id, WorkerBefehl::Entmischen { kanal_id })
    }

    /// Schliesst einen Kanal; unbekannte Kanaele sind kein Fehler
    pub fn schliessen(&self, kanal_id: KanalId, grund: impl Into<String>) -> Result<()> {
        let befehl = WorkerBefehl::Schliessen {
            kanal_id,
            grund: grund.into(),
        };
        match self.befehl(kanal_id, befehl) {
            Err(MediabridgeError::KanalNichtGefunden(_)) => {
                debug!(kanal = %kanal_id, "Schliessen: Kanal bereits geschlossen");
                Ok(())
            }
            andere => andere,
        }
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    /// Statistik-Snapshot eines Kanals aus dessen Worker
    pub async fn statistik(&self, kanal_id: KanalId) -> Result<KanalStatistik> {
        let (antwort, rx) = oneshot::channel();
        self.befehl(kanal_id, WorkerBefehl::Statistik { kanal_id, antwort })?;
        rx.await
            .map_err(|_| MediabridgeError::KanalNichtGefunden(kanal_id.to_string()))
    }

    /// Summierte Zaehler aller Worker plus Port-Pool
    pub fn telemetrie(&self) -> EngineTelemetrie {
        let mut snapshot = EngineTelemetrie::aus_workern(self.telemetrie.iter().map(Arc::as_ref));
        snapshot.ports_frei = self.ports.frei() as u64;
        snapshot.ports_kapazitaet = self.ports.kapazitaet() as u64;
        snapshot
    }

    /// Anzahl registrierter Kanaele
    pub fn kanal_anzahl(&self) -> usize {
        self.verbund.registry.len()
    }

    pub fn worker_anzahl(&self) -> usize {
        self.telemetrie.len()
    }

    pub fn ist_registriert(&self, kanal_id: KanalId) -> bool {
        self.verbund.registry.contains_key(&kanal_id)
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Stoppt alle Worker und wartet auf ihre Threads
    ///
    /// Offene Kanaele werden mit Grund "shutdown" geschlossen.
    pub fn herunterfahren(&self) {
        if !self.stopp.send_replace(true) {
            info!("MedienEngine wird heruntergefahren");
        }
        let threads: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            if handle.join().is_err() {
                warn!("Worker-Thread ist mit Panic beendet worden");
            }
        }
    }

    fn laeuft(&self) -> Result<()> {
        if *self.stopp.borrow() {
            return Err(MediabridgeError::EngineBeendet);
        }
        Ok(())
    }

    /// Worker mit den wenigsten registrierten Kanaelen
    fn am_wenigsten_belastet(&self) -> usize {
        let mut last = vec![0usize; self.verbund.sender.len()];
        for eintrag in self.verbund.registry.iter() {
            if let Some(n) = last.get_mut(*eintrag.value()) {
                *n += 1;
            }
        }
        last.iter()
            .enumerate()
            .min_by_key(|(_, n)| **n)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn befehl(&self, kanal_id: KanalId, befehl: WorkerBefehl) -> Result<()> {
        self.laeuft()?;
        let worker = self
            .verbund
            .registry
            .get(&kanal_id)
            .map(|e| *e.value())
            .ok_or_else(|| MediabridgeError::KanalNichtGefunden(kanal_id.to_string()))?;
        self.an_worker(worker, befehl)
    }

    fn an_worker(&self, worker: usize, befehl: WorkerBefehl) -> Result<()> {
        let tx = self
            .verbund
            .sender
            .get(worker)
            .ok_or_else(|| MediabridgeError::intern(format!("Worker {worker} existiert nicht")))?;
        tx.try_send(befehl).map_err(|e| match e {
            TrySendError::Full(b) => {
                warn!(worker, befehl = b.art(), "Befehls-Queue voll");
                MediabridgeError::Ueberlastet(format!("worker {worker}"))
            }
            TrySendError::Closed(_) => MediabridgeError::EngineBeendet,
        })
    }
}

impl Drop for MedienEngine {
    fn drop(&mut self) {
        self.stopp.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testhilfe::{ereignisse, TestNetz, TestTransport};
    use mediabridge_protocol::KlangFormat;

    fn engine(worker: usize) -> (MedienEngine, mpsc::UnboundedReceiver<MedienEreignis>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = EngineConfig {
            worker_anzahl: worker,
            ..Default::default()
        };
        let engine =
            MedienEngine::starten(config, Arc::new(CodecBibliothek::standard()), Arc::new(tx))
                .unwrap();
        (engine, rx)
    }

    #[test]
    fn ungueltige_konfiguration_wird_abgelehnt() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = EngineConfig {
            befehl_queue: 0,
            ..Default::default()
        };
        let fehler =
            MedienEngine::starten(config, Arc::new(CodecBibliothek::standard()), Arc::new(tx))
                .unwrap_err();
        assert!(fehler.ist_konfigurationsfehler());
    }

    #[test]
    fn kanaele_werden_verteilt() {
        let (engine, mut rx) = engine(2);
        let a = engine
            .kanal_oeffnen_mit_transport(
                KanalParameter::neu(KlangFormat::Ulaw),
                Box::new(TestTransport(TestNetz::default())),
            )
            .unwrap();
        let b = engine
            .kanal_oeffnen_mit_transport(
                KanalParameter::neu(KlangFormat::Alaw),
                Box::new(TestTransport(TestNetz::default())),
            )
            .unwrap();
        let wa = *engine.verbund.registry.get(&a).unwrap();
        let wb = *engine.verbund.registry.get(&b).unwrap();
        assert_ne!(wa, wb);
        assert_eq!(engine.kanal_anzahl(), 2);

        let alle = ereignisse(&mut rx);
        assert!(matches!(
            alle[0],
            MedienEreignis::KanalGeoeffnet { rtp_port: 40_000, .. }
        ));
        engine.herunterfahren();
    }

    #[test]
    fn unbekannter_kanal() {
        let (engine, _rx) = engine(1);
        let id = KanalId::new();
        assert!(matches!(
            engine.echo_setzen(id, true),
            Err(MediabridgeError::KanalNichtGefunden(_))
        ));
        assert!(engine.schliessen(id, "egal").is_ok());
        engine.herunterfahren();
    }

    #[test]
    fn ungueltige_dtmf_ziffern() {
        let (engine, _rx) = engine(1);
        let id = engine
            .kanal_oeffnen_mit_transport(
                KanalParameter::neu(KlangFormat::Ulaw),
                Box::new(TestTransport(TestNetz::default())),
            )
            .unwrap();
        assert!(engine.dtmf_senden(id, "12x").unwrap_err().ist_konfigurationsfehler());
        assert!(engine.dtmf_senden(id, "").is_err());
        assert!(engine.dtmf_senden(id, "123#").is_ok());
        assert!(engine.mischen(id, id).is_err());
        engine.herunterfahren();
    }

    #[test]
    fn nach_herunterfahren_beendet() {
        let (engine, _rx) = engine(1);
        engine.herunterfahren();
        assert!(matches!(
            engine.kanal_oeffnen(KanalParameter::neu(KlangFormat::Ulaw)),
            Err(MediabridgeError::EngineBeendet)
        ));
        let t = engine.telemetrie();
        assert_eq!(t.worker_anzahl, 1);
        assert_eq!(t.ports_kapazitaet, t.ports_frei);
    }

    #[test]
    fn kein_port_meldet_schliessgrund() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut config = EngineConfig {
            worker_anzahl: 1,
            ..Default::default()
        };
        // Ein einziges Port-Paar
        config.ports.bind_adresse = std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);
        config.ports.von = 39_000;
        config.ports.bis = 39_001;
        let engine =
            MedienEngine::starten(config, Arc::new(CodecBibliothek::standard()), Arc::new(tx))
                .unwrap();
        assert_eq!(engine.telemetrie().ports_kapazitaet, 1);

        let _erster = engine.kanal_oeffnen(KanalParameter::neu(KlangFormat::Ulaw));
        let zweiter = engine.kanal_oeffnen(KanalParameter::neu(KlangFormat::Ulaw));
        assert!(matches!(zweiter, Err(MediabridgeError::KeinPortVerfuegbar)));
        assert!(ereignisse(&mut rx).iter().any(|e| matches!(
            e,
            MedienEreignis::KanalGeschlossen { grund, .. } if grund == "no port"
        )));
        engine.herunterfahren();
    }
}
