//! Integration-Tests fuer Konferenzen: Mixer, Aufnahme und Austritt

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use mediabridge_codec::{g711, CodecBibliothek};
use mediabridge_core::{KanalId, MedienEreignis, MixerId};
use mediabridge_engine::{
    AufnahmeAuftrag, JitterBufferConfig, Kanal, KanalKontext, KanalParameter, Mixer,
    RtpTransport, SpeicherAufnahme,
};
use mediabridge_protocol::{KlangFormat, RtpPaket};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Clone, Default)]
struct Leitung {
    eingang: Arc<Mutex<VecDeque<Vec<u8>>>>,
    gesendet: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Leitung {
    fn senden(&self, seq: u16, wert: i16) {
        let mut p = RtpPaket::leer();
        p.initialisieren(0, seq, u32::from(seq) * 160, 0xBEEF);
        assert!(p.nutzdaten_setzen(&[g711::linear_zu_ulaw(wert); 160]));
        self.eingang.lock().push_back(p.als_bytes().to_vec());
    }

    fn anzahl_gesendet(&self) -> usize {
        self.gesendet.lock().len()
    }
}

struct LeitungsTransport(Leitung);

impl RtpTransport for LeitungsTransport {
    fn rtp_empfangen(&mut self, puffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        Ok(self.0.eingang.lock().pop_front().map(|d| {
            puffer[..d.len()].copy_from_slice(&d);
            (d.len(), SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000))
        }))
    }

    fn rtcp_empfangen(&mut self, _puffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        Ok(None)
    }

    fn senden(&mut self, daten: &[u8], _ziel: SocketAddr) -> io::Result<usize> {
        self.0.gesendet.lock().push(daten.to_vec());
        Ok(daten.len())
    }

    fn lokaler_port(&self) -> u16 {
        31_000
    }
}

fn dekodiert(wert: i16) -> i16 {
    g711::ulaw_zu_linear(g711::linear_zu_ulaw(wert))
}

/// Ein Worker-Durchlauf: erst der Mixer, dann alle Kanaele
fn durchlauf(mixer: &mut Option<Mixer>, kanaele: &mut HashMap<KanalId, Kanal>) {
    if let Some(m) = mixer.as_mut() {
        if !m.tick(kanaele) {
            *mixer = None;
        }
    }
    kanaele.retain(|_, k| k.tick());
}

#[test]
fn konferenz_mit_aufnahme_und_austritt() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let kontext = KanalKontext {
        bibliothek: Arc::new(CodecBibliothek::standard()),
        jitter: JitterBufferConfig {
            slots: 16,
            wasserstand: 0,
        },
        leerlauf_ticks: 1000,
        ereignisse: Arc::new(tx),
    };

    let mut kanaele = HashMap::new();
    let mut leitungen = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let leitung = Leitung::default();
        let kanal = Kanal::neu(
            KanalId::new(),
            KanalParameter::neu(KlangFormat::Ulaw)
                .mit_remote(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9100)),
            Box::new(LeitungsTransport(leitung.clone())),
            &kontext,
        )
        .unwrap();
        ids.push(kanal.id());
        kanaele.insert(kanal.id(), kanal);
        leitungen.push(leitung);
    }
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    let aufnahme = SpeicherAufnahme::neu();
    let daten = aufnahme.daten();
    kanaele
        .get_mut(&a)
        .unwrap()
        .aufnehmen(AufnahmeAuftrag::neu("konferenz-a", Box::new(aufnahme)));

    let mut mixer = Some(Mixer::neu(
        MixerId::new(),
        Arc::clone(&kontext.ereignisse),
        Instant::now(),
    ));
    for id in &ids {
        mixer.as_mut().unwrap().aufnehmen(*id);
    }

    // Tick 1: alle drei sprechen
    leitungen[0].senden(1, 200);
    leitungen[1].senden(1, 100);
    leitungen[2].senden(1, 50);
    durchlauf(&mut mixer, &mut kanaele);

    {
        let d = daten.lock();
        assert_eq!(d.ticks, 1);
        assert!(d.eingang.iter().all(|&s| s == dekodiert(200)));
        assert!(d
            .ausgang
            .iter()
            .all(|&s| s == dekodiert(100) + dekodiert(50)));
    }
    assert_eq!(leitungen[0].anzahl_gesendet(), 1);

    // C verlaesst die Konferenz, A und B bleiben gekoppelt
    kanaele.get_mut(&c).unwrap().schliessen_anfordern("bye");
    leitungen[1].senden(2, 100);
    durchlauf(&mut mixer, &mut kanaele);
    assert!(mixer.is_some());
    assert!(!kanaele.contains_key(&c));
    assert_eq!(leitungen[0].anzahl_gesendet(), 2);

    // B geht auch: der Mixer beendet sich und A tickt wieder selbst
    kanaele.get_mut(&b).unwrap().schliessen_anfordern("bye");
    durchlauf(&mut mixer, &mut kanaele);
    assert!(mixer.is_none());
    assert_eq!(kanaele[&a].mixer(), None);

    let kanal_a = kanaele.get_mut(&a).unwrap();
    kanal_a.echo_setzen(true);
    leitungen[0].senden(2, 300);
    assert!(kanal_a.tick());
    assert_eq!(leitungen[0].anzahl_gesendet(), 3);

    let ereignisse: Vec<MedienEreignis> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    let verlassen = ereignisse
        .iter()
        .filter(|e| matches!(e, MedienEreignis::MixerVerlassen { .. }))
        .count();
    assert_eq!(verlassen, 3);
    assert!(ereignisse
        .iter()
        .any(|e| matches!(e, MedienEreignis::MixerBeendet { .. })));
    assert!(ereignisse.iter().any(|e| matches!(
        e,
        MedienEreignis::AufnahmeGestartet { ziel, .. } if ziel == "konferenz-a"
    )));
}
