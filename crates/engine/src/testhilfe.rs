//! Test-Transport im Speicher und Kanal-Fabrik fuer Unit-Tests

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use mediabridge_codec::CodecBibliothek;
use mediabridge_core::{KanalId, MedienEreignis};
use mediabridge_protocol::RtpPaket;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::channel::{Kanal, KanalKontext, KanalParameter, STANDARD_LEERLAUF_TICKS};
use crate::jitter_buffer::JitterBufferConfig;
use crate::transport::RtpTransport;

type Datagramme = Arc<Mutex<VecDeque<(Vec<u8>, SocketAddr)>>>;

/// Geteilte Warteschlangen hinter einem `TestTransport`
#[derive(Clone, Default)]
pub(crate) struct TestNetz {
    pub rtp: Datagramme,
    pub rtcp: Datagramme,
    pub gesendet: Arc<Mutex<Vec<(Vec<u8>, SocketAddr)>>>,
    /// Protokoll der Reactor-Wechsel ("an"/"ab")
    pub reactor: Arc<Mutex<Vec<&'static str>>>,
}

impl TestNetz {
    pub fn einspeisen(&self, datagramm: Vec<u8>, von: SocketAddr) {
        self.rtp.lock().push_back((datagramm, von));
    }

    /// Alle bisher gesendeten Datagramme als RTP-Pakete
    pub fn gesendete_pakete(&self) -> Vec<RtpPaket> {
        self.gesendet
            .lock()
            .iter()
            .filter_map(|(d, _)| {
                let mut p = RtpPaket::leer();
                p.aus_bytes(d).ok().map(|_| p)
            })
            .collect()
    }
}

pub(crate) struct TestTransport(pub TestNetz);

fn abholen(warteschlange: &Datagramme, puffer: &mut [u8]) -> Option<(usize, SocketAddr)> {
    warteschlange.lock().pop_front().map(|(d, von)| {
        puffer[..d.len()].copy_from_slice(&d);
        (d.len(), von)
    })
}

impl RtpTransport for TestTransport {
    fn rtp_empfangen(&mut self, puffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        Ok(abholen(&self.0.rtp, puffer))
    }

    fn rtcp_empfangen(&mut self, puffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        Ok(abholen(&self.0.rtcp, puffer))
    }

    fn senden(&mut self, daten: &[u8], ziel: SocketAddr) -> io::Result<usize> {
        self.0.gesendet.lock().push((daten.to_vec(), ziel));
        Ok(daten.len())
    }

    fn lokaler_port(&self) -> u16 {
        40_000
    }

    fn anmelden(&mut self) -> io::Result<()> {
        self.0.reactor.lock().push("an");
        Ok(())
    }

    fn abmelden(&mut self) -> io::Result<()> {
        self.0.reactor.lock().push("ab");
        Ok(())
    }
}

pub(crate) fn adresse(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Kontext ohne Vorlauf im Jitter Buffer (erstes Paket wird sofort abgespielt)
pub(crate) fn kontext() -> (KanalKontext, mpsc::UnboundedReceiver<MedienEreignis>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let kontext = KanalKontext {
        bibliothek: Arc::new(CodecBibliothek::standard()),
        jitter: JitterBufferConfig {
            slots: 20,
            wasserstand: 0,
        },
        leerlauf_ticks: STANDARD_LEERLAUF_TICKS,
        ereignisse: Arc::new(tx),
    };
    (kontext, rx)
}

pub(crate) fn kanal_mit(kontext: &KanalKontext, parameter: KanalParameter) -> (Kanal, TestNetz) {
    let netz = TestNetz::default();
    let k = Kanal::neu(
        KanalId::new(),
        parameter,
        Box::new(TestTransport(netz.clone())),
        kontext,
    )
    .unwrap();
    (k, netz)
}

pub(crate) fn kanal(
    parameter: KanalParameter,
) -> (Kanal, TestNetz, mpsc::UnboundedReceiver<MedienEreignis>) {
    let (kontext, rx) = kontext();
    let (k, netz) = kanal_mit(&kontext, parameter);
    (k, netz, rx)
}

pub(crate) fn rtp(pt: u8, seq: u16, ts: u32, nutzdaten: &[u8]) -> Vec<u8> {
    let mut p = RtpPaket::leer();
    p.initialisieren(pt, seq, ts, 0x1111);
    assert!(p.nutzdaten_setzen(nutzdaten));
    p.als_bytes().to_vec()
}

pub(crate) fn ereignisse(rx: &mut mpsc::UnboundedReceiver<MedienEreignis>) -> Vec<MedienEreignis> {
    let mut alle = Vec::new();
    while let Ok(e) = rx.try_recv() {
        alle.push(e);
    }
    alle
}
