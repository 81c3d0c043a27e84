//! Integration-Tests fuer Kanal-Szenarien ueber einen Transport im Speicher

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use mediabridge_codec::CodecBibliothek;
use mediabridge_core::{KanalId, MedienEreignis};
use mediabridge_engine::{
    HandshakeStatus, JitterBufferConfig, Kanal, KanalKontext, KanalParameter, KanalZustand,
    RtpTransport, SicherheitsSitzung,
};
use mediabridge_protocol::{DtmfEreignis, KlangFormat, RtpPaket};
use parking_lot::Mutex;
use tokio::sync::mpsc;

type Warteschlange = Arc<Mutex<VecDeque<Vec<u8>>>>;

struct SpeicherTransport {
    eingang: Warteschlange,
    gesendet: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RtpTransport for SpeicherTransport {
    fn rtp_empfangen(&mut self, puffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        Ok(self.eingang.lock().pop_front().map(|d| {
            puffer[..d.len()].copy_from_slice(&d);
            (d.len(), gegenstelle())
        }))
    }

    fn rtcp_empfangen(&mut self, _puffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        Ok(None)
    }

    fn senden(&mut self, daten: &[u8], _ziel: SocketAddr) -> io::Result<usize> {
        self.gesendet.lock().push(daten.to_vec());
        Ok(daten.len())
    }

    fn lokaler_port(&self) -> u16 {
        30_000
    }
}

fn gegenstelle() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 30_500)
}

struct Aufbau {
    kanal: Kanal,
    eingang: Warteschlange,
    ereignisse: mpsc::UnboundedReceiver<MedienEreignis>,
}

fn aufbau(parameter: KanalParameter) -> Aufbau {
    let (tx, ereignisse) = mpsc::unbounded_channel();
    let kontext = KanalKontext {
        bibliothek: Arc::new(CodecBibliothek::standard()),
        jitter: JitterBufferConfig {
            slots: 20,
            wasserstand: 0,
        },
        leerlauf_ticks: 1000,
        ereignisse: Arc::new(tx),
    };
    let eingang = Warteschlange::default();
    let transport = SpeicherTransport {
        eingang: Arc::clone(&eingang),
        gesendet: Arc::default(),
    };
    let kanal = Kanal::neu(KanalId::new(), parameter, Box::new(transport), &kontext).unwrap();
    Aufbau {
        kanal,
        eingang,
        ereignisse,
    }
}

fn dtmf_paket(seq: u16, ts: u32, marker: bool, ereignis: DtmfEreignis) -> Vec<u8> {
    let mut p = RtpPaket::leer();
    p.initialisieren(101, seq, ts, 0xCAFE);
    p.marker_setzen(marker);
    assert!(p.nutzdaten_setzen(&ereignis.encode()));
    p.als_bytes().to_vec()
}

fn alle(rx: &mut mpsc::UnboundedReceiver<MedienEreignis>) -> Vec<MedienEreignis> {
    let mut v = Vec::new();
    while let Ok(e) = rx.try_recv() {
        v.push(e);
    }
    v
}

#[test]
fn dtmf_ohne_startpaket_ergibt_genau_eine_ziffer() {
    let mut a = aufbau(KanalParameter::neu(KlangFormat::Ulaw));
    let ziffer_5 = |ende, dauer| DtmfEreignis {
        code: 5,
        ende,
        lautstaerke: 10,
        dauer,
    };

    // Sequenz 10 (Marker) ging verloren
    for (seq, ende, dauer) in [
        (11, false, 320),
        (12, false, 480),
        (13, true, 640),
        (14, true, 640),
        (15, true, 640),
    ] {
        a.eingang
            .lock()
            .push_back(dtmf_paket(seq, 8000, false, ziffer_5(ende, dauer)));
    }

    for _ in 0..10 {
        assert!(a.kanal.tick());
    }

    let ziffern: Vec<char> = alle(&mut a.ereignisse)
        .into_iter()
        .filter_map(|e| match e {
            MedienEreignis::DtmfEmpfangen { ziffer, .. } => Some(ziffer),
            _ => None,
        })
        .collect();
    assert_eq!(ziffern, vec!['5']);
    assert_eq!(a.kanal.statistik().dtmf_empfangen, 1);
}

#[test]
fn zwei_ziffern_mit_verlorenen_startpaketen() {
    let mut a = aufbau(KanalParameter::neu(KlangFormat::Ulaw));
    let ereignis = |code, ende| DtmfEreignis {
        code,
        ende,
        lautstaerke: 10,
        dauer: 160,
    };
    for (seq, ts, code, ende) in [
        (2, 1000, 1, false),
        (3, 1000, 1, true),
        (4, 1000, 1, true),
        (8, 3000, 2, false),
        (9, 3000, 2, true),
    ] {
        a.eingang
            .lock()
            .push_back(dtmf_paket(seq, ts, false, ereignis(code, ende)));
    }
    for _ in 0..10 {
        a.kanal.tick();
    }
    let ziffern: Vec<char> = alle(&mut a.ereignisse)
        .into_iter()
        .filter_map(|e| match e {
            MedienEreignis::DtmfEmpfangen { ziffer, .. } => Some(ziffer),
            _ => None,
        })
        .collect();
    assert_eq!(ziffern, vec!['1', '2']);
}

#[test]
fn sequenzsprung_ohne_marker_startet_neue_ziffer() {
    let mut a = aufbau(KanalParameter::neu(KlangFormat::Ulaw));
    let ereignis = |code| DtmfEreignis {
        code,
        ende: false,
        lautstaerke: 10,
        dauer: 160,
    };
    let ziffern = |rx: &mut mpsc::UnboundedReceiver<MedienEreignis>| -> Vec<char> {
        alle(rx)
            .into_iter()
            .filter_map(|e| match e {
                MedienEreignis::DtmfEmpfangen { ziffer, .. } => Some(ziffer),
                _ => None,
            })
            .collect()
    };

    // Ziffer 1 mit Marker, End-Pakete gehen verloren
    a.eingang.lock().push_back(dtmf_paket(10, 1000, true, ereignis(1)));
    a.eingang.lock().push_back(dtmf_paket(11, 1000, false, ereignis(1)));
    for _ in 0..3 {
        a.kanal.tick();
    }
    assert_eq!(ziffern(&mut a.ereignisse), vec!['1']);

    // Fortsetzung ohne Marker, Abstand 9: kein neues Event
    a.eingang.lock().push_back(dtmf_paket(20, 3000, false, ereignis(3)));
    for _ in 0..3 {
        a.kanal.tick();
    }
    assert!(ziffern(&mut a.ereignisse).is_empty());

    // Abstand 25 > 20 ohne Marker: neue Ziffer wird synthetisiert
    a.eingang.lock().push_back(dtmf_paket(45, 5000, false, ereignis(2)));
    for _ in 0..3 {
        a.kanal.tick();
    }
    assert_eq!(ziffern(&mut a.ereignisse), vec!['2']);
    assert_eq!(a.kanal.statistik().dtmf_empfangen, 2);
}

#[test]
fn leerlauf_schliesst_nach_1000_ticks() {
    let mut a = aufbau(KanalParameter::neu(KlangFormat::Alaw));
    for tick in 1..1000 {
        assert!(a.kanal.tick(), "Tick {tick} sollte noch laufen");
    }
    assert!(!a.kanal.tick());
    assert_eq!(a.kanal.zustand(), KanalZustand::Geschlossen);

    let gruende: Vec<String> = alle(&mut a.ereignisse)
        .into_iter()
        .filter_map(|e| match e {
            MedienEreignis::KanalGeschlossen { grund, .. } => Some(grund),
            _ => None,
        })
        .collect();
    assert_eq!(gruende, vec!["idle".to_string()]);
}

#[test]
fn ohne_empfangsrichtung_kein_leerlauf() {
    let mut a = aufbau(KanalParameter::neu(KlangFormat::Alaw).mit_richtung(true, false));
    for _ in 0..1500 {
        assert!(a.kanal.tick());
    }
}

struct AbgelehnteSitzung;

impl SicherheitsSitzung for AbgelehnteSitzung {
    fn handshake(&mut self) -> HandshakeStatus {
        HandshakeStatus::Fehlgeschlagen("certificate fingerprint mismatch".into())
    }

    fn schreiben(&mut self, _daten: &[u8]) {}

    fn ausgehend(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn schuetzen(&mut self, _paket: &mut RtpPaket) -> bool {
        false
    }

    fn entschuetzen(&mut self, _paket: &mut RtpPaket) -> bool {
        false
    }
}

#[test]
fn handshake_fehlschlag_liefert_schliessgrund() {
    let mut a = aufbau(
        KanalParameter::neu(KlangFormat::Ulaw).mit_sicherheit(Box::new(AbgelehnteSitzung)),
    );
    assert!(!a.kanal.tick());
    let gruende: Vec<String> = alle(&mut a.ereignisse)
        .into_iter()
        .filter_map(|e| match e {
            MedienEreignis::KanalGeschlossen { grund, .. } => Some(grund),
            _ => None,
        })
        .collect();
    assert_eq!(
        gruende,
        vec!["dtls handshake failed: certificate fingerprint mismatch".to_string()]
    );
}
