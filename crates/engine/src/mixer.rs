//! Mixer – N-Wege Audio-Konferenz
//!
//! Ein Mixer koppelt 2..N Kanaele desselben Workers. Solange ein Kanal Mitglied
//! ist, ersetzt der Mixer-Tick dessen eigenen Audio-Tick; die Haushaltung des
//! Kanals (Zeitstempel, Leerlauf, Aufnahmen, DTMF) laeuft weiter, aber aus dem
//! Mixer heraus.
//!
//! ## Mitgliedschaft
//!
//! Kanaele und Mixer verweisen nur ueber IDs aufeinander: der Mixer haelt
//! `Vec<KanalId>`, der Kanal `Option<MixerId>`. Aenderungen werden genau
//! einmal pro Tick am Anfang uebernommen.
//!
//! ## Mischen
//!
//! - 2 Mitglieder: paarweiser Austausch, jeder bekommt das Eingangssignal des
//!   anderen direkt im eigenen Codec
//! - 3+ Mitglieder: Summe im gemeinsamen Linear-Format, pro Empfaenger wird
//!   der eigene Beitrag abgezogen und saettigend auf 16 Bit begrenzt

use std::collections::HashMap;
use std::sync::Arc;

use mediabridge_core::{EreignisSenke, KanalId, MedienEreignis, MixerId};
use mediabridge_protocol::KlangFormat;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::channel::Kanal;

/// Berechnet die Mischung fuer einen Empfaenger: Summe ohne eigenen Beitrag
///
/// Fehlende eigene Samples zaehlen als 0. Das Ergebnis wird auf den
/// 16-Bit-Bereich gesaettigt.
pub fn mischen_berechnen(summe: &[i32], eigener: Option<&[i16]>, ausgabe: &mut Vec<i16>) {
    ausgabe.clear();
    ausgabe.extend(summe.iter().enumerate().map(|(k, &s)| {
        let eigen = eigener.and_then(|e| e.get(k)).copied().unwrap_or(0) as i32;
        (s - eigen).clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }));
}

/// Gemeinsames Linear-Format fuer eine Konferenz
pub fn gemeinsames_format(codecs: impl IntoIterator<Item = KlangFormat>) -> KlangFormat {
    if codecs.into_iter().any(KlangFormat::ist_breitband) {
        KlangFormat::Linear16Breit
    } else {
        KlangFormat::Linear16
    }
}

/// Reicht das Eingangssignal von `von` als Ausgang an `nach` weiter
fn weiterreichen(von: &mut Kanal, nach: &mut Kanal) {
    let Some(quelle) = von.eingang.quelle() else {
        return;
    };
    match von.eingang.getref(quelle) {
        Ok(klang) => nach.ausgang.aus_rohklang(klang),
        Err(e) => {
            trace!(kanal = %von.id(), fehler = %e, "Eingang nicht dekodierbar");
            return;
        }
    }
    nach.audio_senden();
}

/// Eine laufende Konferenz
pub struct Mixer {
    id: MixerId,
    mitglieder: Vec<KanalId>,
    warteschlange: Vec<KanalId>,
    summe: Vec<i32>,
    beitraege: Vec<Vec<i16>>,
    mischung: Vec<i16>,
    /// Waehrend des Ticks aus der Kanal-Map entnommene Mitglieder
    arbeitsplatz: Vec<Kanal>,
    hat_paket: Vec<bool>,
    ereignisse: Arc<dyn EreignisSenke>,
    pub(crate) naechster_tick: Instant,
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("id", &self.id)
            .field("mitglieder", &self.mitglieder)
            .field("warteschlange", &self.warteschlange)
            .finish()
    }
}

impl Mixer {
    /// Erstellt einen leeren Mixer; Mitglieder kommen ueber `aufnehmen`
    pub fn neu(id: MixerId, ereignisse: Arc<dyn EreignisSenke>, jetzt: Instant) -> Self {
        info!(mixer = %id, "Mixer erstellt");
        ereignisse.melden(MedienEreignis::MixerErstellt { mixer_id: id });
        Self {
            id,
            mitglieder: Vec::new(),
            warteschlange: Vec::new(),
            summe: Vec::new(),
            beitraege: Vec::new(),
            mischung: Vec::new(),
            arbeitsplatz: Vec::new(),
            hat_paket: Vec::new(),
            ereignisse,
            naechster_tick: jetzt,
        }
    }

    pub fn id(&self) -> MixerId {
        self.id
    }

    pub fn mitglieder(&self) -> &[KanalId] {
        &self.mitglieder
    }

    /// Mitglied oder zur Aufnahme vorgemerkt
    pub fn enthaelt(&self, kanal_id: KanalId) -> bool {
        self.mitglieder.contains(&kanal_id) || self.warteschlange.contains(&kanal_id)
    }

    /// Merkt einen Kanal fuer den naechsten Tick vor
    pub fn aufnehmen(&mut self, kanal_id: KanalId) {
        if !self.enthaelt(kanal_id) {
            self.warteschlange.push(kanal_id);
        }
    }

    pub fn ist_vorgemerkt(&self, kanal_id: KanalId) -> bool {
        self.warteschlange.contains(&kanal_id)
    }

    pub fn vormerkung_entfernen(&mut self, kanal_id: KanalId) {
        self.warteschlange.retain(|k| *k != kanal_id);
    }

    /// Fuehrt einen Mixer-Tick aus; false = Mixer hat sich beendet
    pub fn tick(&mut self, kanaele: &mut HashMap<KanalId, Kanal>) -> bool {
        self.mitgliedschaft_aktualisieren(kanaele);

        if self.mitglieder.len() < 2 {
            for kanal_id in std::mem::take(&mut self.mitglieder) {
                if let Some(kanal) = kanaele.get_mut(&kanal_id) {
                    kanal.mixer_setzen(None);
                }
                self.verlassen_melden(kanal_id);
            }
            info!(mixer = %self.id, "Mixer beendet");
            self.ereignisse
                .melden(MedienEreignis::MixerBeendet { mixer_id: self.id });
            return false;
        }

        // Lesephase: jedes Mitglied genau eine Pop-Kette
        self.arbeitsplatz.clear();
        self.hat_paket.clear();
        for kanal_id in &self.mitglieder {
            if let Some(mut kanal) = kanaele.remove(kanal_id) {
                kanal.transport_leeren();
                kanal.vorbereiten();
                self.hat_paket.push(kanal.paket_holen());
                kanal.dtmf_senden_tick();
                self.arbeitsplatz.push(kanal);
            }
        }

        // Schreibphase
        if self.arbeitsplatz.len() == 2 {
            let (links, rechts) = self.arbeitsplatz.split_at_mut(1);
            let (a, b) = (&mut links[0], &mut rechts[0]);
            if self.hat_paket[1] {
                weiterreichen(b, a);
            }
            if self.hat_paket[0] {
                weiterreichen(a, b);
            }
        } else {
            self.summieren_und_senden();
        }

        for mut kanal in self.arbeitsplatz.drain(..) {
            kanal.aufnahmen_bedienen();
            kanal.tick_beenden();
            kanaele.insert(kanal.id(), kanal);
        }
        true
    }

    fn mitgliedschaft_aktualisieren(&mut self, kanaele: &mut HashMap<KanalId, Kanal>) {
        for kanal_id in std::mem::take(&mut self.warteschlange) {
            let Some(kanal) = kanaele.get_mut(&kanal_id) else {
                debug!(mixer = %self.id, kanal = %kanal_id, "Kanal fuer Mixer nicht gefunden");
                continue;
            };
            if kanal.ist_schliessend() || self.mitglieder.contains(&kanal_id) {
                continue;
            }
            kanal.mixer_setzen(Some(self.id));
            self.mitglieder.push(kanal_id);
            info!(mixer = %self.id, kanal = %kanal_id, "Kanal tritt Mixer bei");
            self.ereignisse.melden(MedienEreignis::MixerBeigetreten {
                mixer_id: self.id,
                kanal_id,
            });
        }

        let id = self.id;
        let mut verlassen = Vec::new();
        self.mitglieder.retain(|kanal_id| {
            let bleibt = match kanaele.get_mut(kanal_id) {
                Some(kanal) if kanal.mixer() == Some(id) && !kanal.ist_schliessend() => true,
                Some(kanal) => {
                    if kanal.mixer() == Some(id) {
                        kanal.mixer_setzen(None);
                    }
                    false
                }
                None => false,
            };
            if !bleibt {
                verlassen.push(*kanal_id);
            }
            bleibt
        });
        for kanal_id in verlassen {
            self.verlassen_melden(kanal_id);
        }
    }

    fn verlassen_melden(&self, kanal_id: KanalId) {
        info!(mixer = %self.id, kanal = %kanal_id, "Kanal verlaesst Mixer");
        self.ereignisse.melden(MedienEreignis::MixerVerlassen {
            mixer_id: self.id,
            kanal_id,
        });
    }

    /// 3+ Mitglieder: gemeinsame Summe, eigener Beitrag wird abgezogen
    fn summieren_und_senden(&mut self) {
        let format = gemeinsames_format(self.arbeitsplatz.iter().map(Kanal::codec));
        let laenge = format.samples_pro_frame();

        self.summe.clear();
        self.summe.resize(laenge, 0);
        self.beitraege.resize_with(self.arbeitsplatz.len(), Vec::new);

        let mut beitragende = 0;
        for (i, kanal) in self.arbeitsplatz.iter_mut().enumerate() {
            let beitrag = &mut self.beitraege[i];
            beitrag.clear();
            if !self.hat_paket[i] {
                continue;
            }
            match kanal.eingang.getref(format) {
                Ok(klang) => beitrag.extend_from_slice(klang.samples()),
                Err(e) => {
                    trace!(kanal = %kanal.id(), fehler = %e, "Beitrag nicht dekodierbar");
                    continue;
                }
            }
            for (s, &x) in self.summe.iter_mut().zip(beitrag.iter()) {
                *s += x as i32;
            }
            beitragende += 1;
        }

        for (i, kanal) in self.arbeitsplatz.iter_mut().enumerate() {
            let eigener = (!self.beitraege[i].is_empty()).then(|| self.beitraege[i].as_slice());
            let andere = beitragende - usize::from(eigener.is_some());
            if andere == 0 {
                continue;
            }
            mischen_berechnen(&self.summe, eigener, &mut self.mischung);
            kanal.ausgang.aus_samples(format, &self.mischung);
            kanal.audio_senden();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::KanalParameter;
    use crate::testhilfe::*;
    use mediabridge_codec::g711;

    #[test]
    fn eigener_beitrag_wird_abgezogen() {
        // B = 100, C = 50, A = 200
        let summe = vec![350i32; 160];
        let a = vec![200i16; 160];
        let mut ausgabe = Vec::new();
        mischen_berechnen(&summe, Some(&a), &mut ausgabe);
        assert_eq!(ausgabe, vec![150; 160]);

        mischen_berechnen(&summe, None, &mut ausgabe);
        assert_eq!(ausgabe, vec![350; 160]);
    }

    #[test]
    fn mischung_saettigt() {
        let summe = vec![40_000i32, -40_000, 100];
        let mut ausgabe = Vec::new();
        mischen_berechnen(&summe, None, &mut ausgabe);
        assert_eq!(ausgabe, vec![i16::MAX, i16::MIN, 100]);
    }

    #[test]
    fn format_wahl() {
        assert_eq!(
            gemeinsames_format([KlangFormat::Ulaw, KlangFormat::Alaw]),
            KlangFormat::Linear16
        );
        assert_eq!(
            gemeinsames_format([KlangFormat::Ulaw, KlangFormat::G722]),
            KlangFormat::Linear16Breit
        );
    }

    fn ulaw_konstant(wert: i16) -> Vec<u8> {
        vec![g711::linear_zu_ulaw(wert); 160]
    }

    fn dekodiert(wert: i16) -> i16 {
        g711::ulaw_zu_linear(g711::linear_zu_ulaw(wert))
    }

    #[test]
    fn drei_wege_konferenz_ohne_eigenes_signal() {
        let (kontext, mut rx) = kontext();
        let mut kanaele = HashMap::new();
        let mut netze = Vec::new();
        let mut ids = Vec::new();
        for port in [6000, 6002, 6004] {
            let (k, netz) = kanal_mit(
                &kontext,
                KanalParameter::neu(KlangFormat::Ulaw).mit_remote(adresse(port)),
            );
            ids.push(k.id());
            kanaele.insert(k.id(), k);
            netze.push(netz);
        }

        let mut mixer = Mixer::neu(MixerId::new(), Arc::clone(&kontext.ereignisse), Instant::now());
        for &id in &ids {
            mixer.aufnehmen(id);
        }

        for (netz, wert) in netze.iter().zip([200i16, 100, 50]) {
            netz.einspeisen(rtp(0, 1, 0, &ulaw_konstant(wert)), adresse(1));
        }
        assert!(mixer.tick(&mut kanaele));
        assert_eq!(mixer.mitglieder().len(), 3);

        let a = kanaele.get_mut(&ids[0]).unwrap();
        let klang = a.ausgang.getref(KlangFormat::Linear16).unwrap();
        let erwartet = dekodiert(100) + dekodiert(50);
        assert!(klang.samples().iter().all(|&s| s == erwartet));
        assert_eq!(netze[0].gesendete_pakete().len(), 1);

        let e = ereignisse(&mut rx);
        assert!(matches!(e[0], MedienEreignis::MixerErstellt { .. }));
        assert_eq!(
            e.iter()
                .filter(|e| matches!(e, MedienEreignis::MixerBeigetreten { .. }))
                .count(),
            3
        );
    }

    #[test]
    fn zwei_wege_austausch() {
        let (kontext, _rx) = kontext();
        let mut kanaele = HashMap::new();
        let (a, netz_a) = kanal_mit(&kontext, KanalParameter::neu(KlangFormat::Ulaw).mit_remote(adresse(7000)));
        let (b, netz_b) = kanal_mit(&kontext, KanalParameter::neu(KlangFormat::Alaw).mit_remote(adresse(7002)));
        let (id_a, id_b) = (a.id(), b.id());
        kanaele.insert(id_a, a);
        kanaele.insert(id_b, b);

        let mut mixer = Mixer::neu(MixerId::new(), Arc::clone(&kontext.ereignisse), Instant::now());
        mixer.aufnehmen(id_a);
        mixer.aufnehmen(id_b);

        // A sendet µ-law Stille, B bekommt sie als A-law
        netz_a.einspeisen(rtp(0, 1, 0, &[0xFF; 160]), adresse(1));
        assert!(mixer.tick(&mut kanaele));

        let an_b = netz_b.gesendete_pakete();
        assert_eq!(an_b.len(), 1);
        assert_eq!(an_b[0].payload_typ(), 8);
        assert_eq!(an_b[0].nutzdaten(), &[0xD5; 160][..]);
        assert!(netz_a.gesendete_pakete().is_empty());
        assert_eq!(kanaele[&id_a].mixer(), Some(mixer.id()));
    }

    #[test]
    fn mixer_mit_einem_mitglied_beendet_sich() {
        let (kontext, mut rx) = kontext();
        let mut kanaele = HashMap::new();
        let (a, _) = kanal_mit(&kontext, KanalParameter::neu(KlangFormat::Ulaw));
        let (b, _) = kanal_mit(&kontext, KanalParameter::neu(KlangFormat::Ulaw));
        let (id_a, id_b) = (a.id(), b.id());
        kanaele.insert(id_a, a);
        kanaele.insert(id_b, b);

        let mut mixer = Mixer::neu(MixerId::new(), Arc::clone(&kontext.ereignisse), Instant::now());
        mixer.aufnehmen(id_a);
        mixer.aufnehmen(id_b);
        assert!(mixer.tick(&mut kanaele));

        // Entmischen: Flag am Kanal, der Mixer raeumt im naechsten Tick auf
        kanaele.get_mut(&id_b).unwrap().mixer_setzen(None);
        assert!(!mixer.tick(&mut kanaele));
        assert_eq!(kanaele[&id_a].mixer(), None);
        assert!(mixer.mitglieder().is_empty());

        let e = ereignisse(&mut rx);
        assert_eq!(
            e.iter()
                .filter(|e| matches!(e, MedienEreignis::MixerVerlassen { .. }))
                .count(),
            2
        );
        assert!(matches!(e.last(), Some(MedienEreignis::MixerBeendet { .. })));
    }

    #[test]
    fn unbekannter_kanal_wird_ignoriert() {
        let (kontext, _rx) = kontext();
        let mut kanaele = HashMap::new();
        let mut mixer = Mixer::neu(MixerId::new(), Arc::clone(&kontext.ereignisse), Instant::now());
        mixer.aufnehmen(KanalId::new());
        assert!(!mixer.tick(&mut kanaele));
    }
}
