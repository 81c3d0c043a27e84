//! iLBC-Rahmen (20 ms, 38 Bytes) mit nativem LPC-Kodierer
//!
//! Schmalband-Sprachcodec im iLBC-Rahmenformat: 160 Samples (8 kHz) werden zu
//! 38 Bytes, 15,2 kbit/s. Filterzustaende laufen ueber Frames weiter, ein
//! Kodierer/Dekodierer gehoert daher genau einem Stream.
//!
//! Der Bitstrom ist nicht kompatibel mit RFC-3951-Gegenstellen. Eine solche
//! Implementierung laesst sich ueber `CodecBibliothek::mit_ilbc` einsetzen.
//!
//! ## Ablauf pro Frame
//!
//! ```text
//! Kodierer:  Hochpass -> Hann-Fenster (80 + 160) -> Autokorrelation
//!            -> Lag-Fenster -> Levinson-Durbin -> LSF -> 10 x 4 Bit
//!            pro Subframe (4 x 40): Gain-Suche (6 Bit) + adaptive
//!            Praediktion mit 2/1-Bit-Anregung im geschlossenen Kreis
//! Dekodierer: LSF -> Interpolation -> Synthesefilter
//! ```
//!
//! ## Bitbelegung (304 Bit)
//!
//! | Feld              | Bits          |
//! |-------------------|---------------|
//! | LSF               | 10 x 4        |
//! | Gain pro Subframe | 4 x 6         |
//! | Anregung          | 4 x 20 x (2+1)|

use std::f64::consts::PI;

use mediabridge_protocol::KlangFormat;

use crate::bibliothek::{CodecFabrik, SprachDekodierer, SprachKodierer};
use crate::error::{CodecError, CodecResult};

// ---------------------------------------------------------------------------
// Parameter
// ---------------------------------------------------------------------------

const FRAME_SAMPLES: usize = 160;
const FRAME_BYTES: usize = 38;
const ORDNUNG: usize = 10;
const SUBFRAMES: usize = 4;
const SUBFRAME_LAENGE: usize = FRAME_SAMPLES / SUBFRAMES;
/// Samples des Vorframes im Analysefenster
const VORLAUF: usize = 80;
const FENSTER: usize = VORLAUF + FRAME_SAMPLES;

const LSF_BITS: u32 = 4;
const LSF_STUFEN: usize = 1 << LSF_BITS;
const LSF_MIN_ABSTAND: f64 = 0.04;
const LSF_UNTEN: [f64; ORDNUNG] = [0.10, 0.25, 0.45, 0.70, 0.95, 1.20, 1.45, 1.70, 2.00, 2.30];
const LSF_OBEN: [f64; ORDNUNG] = [0.60, 0.95, 1.30, 1.65, 1.95, 2.25, 2.50, 2.75, 2.95, 3.05];

const GAIN_BITS: u32 = 6;
const GAIN_MAX_INDEX: usize = (1 << GAIN_BITS) - 1;
/// log2-Schritt: Index 63 entspricht 2^15
const GAIN_LOG2_SCHRITT: f64 = 15.0 / GAIN_MAX_INDEX as f64;
const GAIN_SUCHE_UNTEN: usize = 4;
const GAIN_SUCHE_OBEN: usize = 8;

/// Lloyd-Max-Stufen fuer Gauss-Verteilung (gerade Samples 2 Bit, ungerade 1 Bit)
const STUFEN_FEIN: [f64; 4] = [-1.510, -0.4528, 0.4528, 1.510];
const STUFEN_GROB: [f64; 2] = [-0.7979, 0.7979];

const BANDBREITE: f64 = 0.94;
const HOCHPASS_POL: f64 = 0.97;
/// Unterhalb gilt das Fenster als Stille
const ENERGIE_MIN: f64 = 1.0e3;
const LAG_FENSTER_HZ: f64 = 60.0;

const NULLSTELLEN_RASTER: usize = 512;
const BISEKTIONEN: usize = 30;

const _: () = assert!(
    ORDNUNG * LSF_BITS as usize + SUBFRAMES * (GAIN_BITS as usize + SUBFRAME_LAENGE / 2 * 3)
        == FRAME_BYTES * 8
);

// ---------------------------------------------------------------------------
// LPC und Linienspektralfrequenzen
// ---------------------------------------------------------------------------

type Lpc = [f64; ORDNUNG + 1];
type Lsf = [f64; ORDNUNG];

fn lsf_flach() -> Lsf {
    std::array::from_fn(|i| (i + 1) as f64 * PI / (ORDNUNG + 1) as f64)
}

fn levinson(r: &Lpc) -> Option<Lpc> {
    let mut a = [0.0; ORDNUNG + 1];
    a[0] = 1.0;
    let mut fehler = r[0];
    for i in 1..=ORDNUNG {
        let mut acc = r[i];
        for j in 1..i {
            acc += a[j] * r[i - j];
        }
        let k = -acc / fehler;
        let vorher = a;
        for j in 1..i {
            a[j] = vorher[j] + k * vorher[i - j];
        }
        a[i] = k;
        fehler *= 1.0 - k * k;
        if fehler <= 0.0 {
            return None;
        }
    }
    Some(a)
}

/// Gefensterte Autokorrelations-Analyse; `None` bei Stille
fn lpc_analyse(signal: &[f64; FENSTER], fenster: &[f64; FENSTER]) -> Option<Lpc> {
    let gewichtet: [f64; FENSTER] = std::array::from_fn(|i| signal[i] * fenster[i]);
    let mut r = [0.0; ORDNUNG + 1];
    for (lag, wert) in r.iter_mut().enumerate() {
        *wert = (lag..FENSTER).map(|i| gewichtet[i] * gewichtet[i - lag]).sum();
    }
    if r[0] < ENERGIE_MIN {
        return None;
    }
    r[0] *= 1.0001;
    for (lag, wert) in r.iter_mut().enumerate().skip(1) {
        let x = 2.0 * PI * LAG_FENSTER_HZ * lag as f64 / 8000.0;
        *wert *= (-0.5 * x * x).exp();
    }

    let mut a = levinson(&r)?;
    let mut faktor = 1.0;
    for koeffizient in a.iter_mut().skip(1) {
        faktor *= BANDBREITE;
        *koeffizient *= faktor;
    }
    Some(a)
}

/// Symmetrische Summen-/Differenzpolynome ohne die Nullstellen bei z = -1 / z = 1
fn lsf_polynome(a: &Lpc) -> (Lpc, Lpc) {
    let mut p = [0.0; ORDNUNG + 2];
    let mut q = [0.0; ORDNUNG + 2];
    for i in 0..=ORDNUNG + 1 {
        let vor = if i <= ORDNUNG { a[i] } else { 0.0 };
        let rueck = if i >= 1 { a[ORDNUNG + 1 - i] } else { 0.0 };
        p[i] = vor + rueck;
        q[i] = vor - rueck;
    }
    let mut p_red = [0.0; ORDNUNG + 1];
    let mut q_red = [0.0; ORDNUNG + 1];
    p_red[0] = p[0];
    q_red[0] = q[0];
    for i in 1..=ORDNUNG {
        p_red[i] = p[i] - p_red[i - 1];
        q_red[i] = q[i] + q_red[i - 1];
    }
    (p_red, q_red)
}

/// Wert eines symmetrischen Polynoms auf dem Einheitskreis (ohne Phasenfaktor)
fn symmetrisch_auswerten(c: &Lpc, omega: f64) -> f64 {
    let mitte = ORDNUNG / 2;
    let mut summe = c[mitte];
    for k in 1..=mitte {
        summe += 2.0 * c[mitte - k] * (k as f64 * omega).cos();
    }
    summe
}

/// Genau `ORDNUNG / 2` Nullstellen in (0, pi) oder `None`
fn nullstellen(c: &Lpc) -> Option<[f64; ORDNUNG / 2]> {
    let mut gefunden = [0.0; ORDNUNG / 2];
    let mut anzahl = 0;
    let mut w0 = 0.0;
    let mut f0 = symmetrisch_auswerten(c, w0);
    for j in 1..=NULLSTELLEN_RASTER {
        let w1 = PI * j as f64 / NULLSTELLEN_RASTER as f64;
        let f1 = symmetrisch_auswerten(c, w1);
        if (f0 < 0.0) != (f1 < 0.0) {
            if anzahl == gefunden.len() {
                return None;
            }
            let (mut unten, mut oben, mut f_unten) = (w0, w1, f0);
            for _ in 0..BISEKTIONEN {
                let mitte = 0.5 * (unten + oben);
                let f_mitte = symmetrisch_auswerten(c, mitte);
                if (f_mitte < 0.0) == (f_unten < 0.0) {
                    unten = mitte;
                    f_unten = f_mitte;
                } else {
                    oben = mitte;
                }
            }
            gefunden[anzahl] = 0.5 * (unten + oben);
            anzahl += 1;
        }
        w0 = w1;
        f0 = f1;
    }
    (anzahl == gefunden.len()).then_some(gefunden)
}

/// LPC -> LSF; die Nullstellen von P und Q muessen sich abwechseln
fn lpc_zu_lsf(a: &Lpc) -> Option<Lsf> {
    let (p, q) = lsf_polynome(a);
    let p_null = nullstellen(&p)?;
    let q_null = nullstellen(&q)?;
    let mut lsf = [0.0; ORDNUNG];
    for i in 0..ORDNUNG / 2 {
        lsf[2 * i] = p_null[i];
        lsf[2 * i + 1] = q_null[i];
    }
    lsf.windows(2).all(|w| w[0] < w[1]).then_some(lsf)
}

/// Multipliziert ein Polynom vom Grad `grad` mit (1 - 2c z^-1 + z^-2)
fn quadratisch_multiplizieren(poly: &mut Lpc, grad: usize, c: f64) {
    for i in (1..=grad + 2).rev() {
        let mut wert = poly[i] - 2.0 * c * poly[i - 1];
        if i >= 2 {
            wert += poly[i - 2];
        }
        poly[i] = wert;
    }
}

fn lsf_zu_lpc(lsf: &Lsf) -> Lpc {
    let mut p = [0.0; ORDNUNG + 1];
    let mut q = [0.0; ORDNUNG + 1];
    p[0] = 1.0;
    q[0] = 1.0;
    for i in 0..ORDNUNG / 2 {
        quadratisch_multiplizieren(&mut p, 2 * i, lsf[2 * i].cos());
        quadratisch_multiplizieren(&mut q, 2 * i, lsf[2 * i + 1].cos());
    }
    // A = ((1 + z^-1) P' + (1 - z^-1) Q') / 2, der Term z^-11 hebt sich auf
    let mut a = [0.0; ORDNUNG + 1];
    a[0] = 1.0;
    for i in 1..=ORDNUNG {
        a[i] = 0.5 * ((p[i] + p[i - 1]) + (q[i] - q[i - 1]));
    }
    a
}

/// Erzwingt Ordnung und Mindestabstand (stabiles Synthesefilter)
fn stabilisieren(lsf: &mut Lsf) {
    lsf[0] = lsf[0].max(LSF_MIN_ABSTAND);
    for i in 1..ORDNUNG {
        lsf[i] = lsf[i].max(lsf[i - 1] + LSF_MIN_ABSTAND);
    }
    lsf[ORDNUNG - 1] = lsf[ORDNUNG - 1].min(PI - LSF_MIN_ABSTAND);
    for i in (0..ORDNUNG - 1).rev() {
        lsf[i] = lsf[i].min(lsf[i + 1] - LSF_MIN_ABSTAND);
    }
}

fn lsf_schritt(i: usize) -> f64 {
    (LSF_OBEN[i] - LSF_UNTEN[i]) / (LSF_STUFEN - 1) as f64
}

fn lsf_quantisieren(lsf: &Lsf) -> [u8; ORDNUNG] {
    std::array::from_fn(|i| {
        let index = ((lsf[i] - LSF_UNTEN[i]) / lsf_schritt(i)).round();
        index.clamp(0.0, (LSF_STUFEN - 1) as f64) as u8
    })
}

fn lsf_rekonstruieren(indizes: &[u8; ORDNUNG]) -> Lsf {
    let mut lsf = std::array::from_fn(|i| LSF_UNTEN[i] + indizes[i] as f64 * lsf_schritt(i));
    stabilisieren(&mut lsf);
    lsf
}

/// Linear interpoliertes Filter fuer Subframe `subframe` (0..4)
fn subframe_lpc(vorher: &Lsf, aktuell: &Lsf, subframe: usize) -> Lpc {
    let gewicht = (subframe + 1) as f64 / SUBFRAMES as f64;
    let lsf = std::array::from_fn(|i| (1.0 - gewicht) * vorher[i] + gewicht * aktuell[i]);
    lsf_zu_lpc(&lsf)
}

// ---------------------------------------------------------------------------
// Anregung und Synthese
// ---------------------------------------------------------------------------

fn verstaerkung(index: usize) -> f64 {
    (index as f64 * GAIN_LOG2_SCHRITT).exp2()
}

fn gain_index(rms: f64) -> usize {
    let index = (rms.max(1.0).log2() / GAIN_LOG2_SCHRITT).round();
    index.clamp(0.0, GAIN_MAX_INDEX as f64) as usize
}

fn stufen(n: usize) -> &'static [f64] {
    if n % 2 == 0 {
        &STUFEN_FEIN
    } else {
        &STUFEN_GROB
    }
}

fn stufen_bits(n: usize) -> u32 {
    if n % 2 == 0 {
        2
    } else {
        1
    }
}

fn naechste_stufe(stufen: &[f64], wert: f64) -> u8 {
    let mut beste = 0;
    let mut abstand = f64::INFINITY;
    for (i, &stufe) in stufen.iter().enumerate() {
        let d = (stufe - wert).abs();
        if d < abstand {
            abstand = d;
            beste = i;
        }
    }
    beste as u8
}

/// Synthesefilter 1/A(z); Kodierer und Dekodierer fuehren denselben Zustand
#[derive(Debug, Clone, Copy, Default)]
struct Synthese {
    speicher: [f64; ORDNUNG],
}

impl Synthese {
    fn vorhersage(&self, a: &Lpc) -> f64 {
        -(1..=ORDNUNG)
            .map(|k| a[k] * self.speicher[k - 1])
            .sum::<f64>()
    }

    fn schritt(&mut self, a: &Lpc, anregung: f64) -> f64 {
        let y = (self.vorhersage(a) + anregung).clamp(i16::MIN as f64, i16::MAX as f64);
        self.speicher.copy_within(0..ORDNUNG - 1, 1);
        self.speicher[0] = y;
        y
    }
}

/// Quantisiert einen Subframe im geschlossenen Kreis; liefert den Fehler
fn subframe_kodieren(
    ziel: &[f64],
    a: &Lpc,
    gain: f64,
    zustand: &mut Synthese,
    codes: &mut [u8; SUBFRAME_LAENGE],
) -> f64 {
    let mut fehler = 0.0;
    for (n, &x) in ziel.iter().enumerate() {
        let code = naechste_stufe(stufen(n), (x - zustand.vorhersage(a)) / gain);
        let y = zustand.schritt(a, gain * stufen(n)[code as usize]);
        codes[n] = code;
        fehler += (x - y) * (x - y);
    }
    fehler
}

fn residuum_rms(signal: &[f64], start: usize, a: &Lpc) -> f64 {
    let summe: f64 = (start..start + SUBFRAME_LAENGE)
        .map(|n| {
            let e = signal[n] + (1..=ORDNUNG).map(|k| a[k] * signal[n - k]).sum::<f64>();
            e * e
        })
        .sum();
    (summe / SUBFRAME_LAENGE as f64).sqrt()
}

#[derive(Debug, Clone, Copy)]
struct Hochpass {
    x1: f64,
    y1: f64,
}

impl Hochpass {
    fn filtern(&mut self, x: f64) -> f64 {
        let y = x - self.x1 + HOCHPASS_POL * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }
}

// ---------------------------------------------------------------------------
// Bitstrom (MSB zuerst)
// ---------------------------------------------------------------------------

struct BitSchreiber<'a> {
    bytes: &'a mut [u8; FRAME_BYTES],
    position: usize,
}

impl BitSchreiber<'_> {
    fn schreiben(&mut self, wert: u32, bits: u32) {
        for b in (0..bits).rev() {
            if (wert >> b) & 1 == 1 {
                self.bytes[self.position / 8] |= 0x80 >> (self.position % 8);
            }
            self.position += 1;
        }
    }
}

struct BitLeser<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl BitLeser<'_> {
    fn lesen(&mut self, bits: u32) -> u32 {
        let mut wert = 0;
        for _ in 0..bits {
            let bit = (self.bytes[self.position / 8] >> (7 - self.position % 8)) & 1;
            wert = (wert << 1) | bit as u32;
            self.position += 1;
        }
        wert
    }
}

// ---------------------------------------------------------------------------
// Kodierer
// ---------------------------------------------------------------------------

struct Kandidat {
    fehler: f64,
    index: usize,
    zustand: Synthese,
    codes: [u8; SUBFRAME_LAENGE],
}

/// iLBC-Kodierer (160 Samples -> 38 Bytes)
#[derive(Debug, Clone)]
pub struct IlbcKodierer {
    hochpass: Hochpass,
    /// Hochpass-gefiltertes Signal: Vorlauf + aktueller Frame
    signal: [f64; FENSTER],
    fenster: [f64; FENSTER],
    lsf_vorher: Lsf,
    synthese: Synthese,
}

impl Default for IlbcKodierer {
    fn default() -> Self {
        Self::neu()
    }
}

impl IlbcKodierer {
    pub fn neu() -> Self {
        let fenster = std::array::from_fn(|i| {
            0.5 - 0.5 * (2.0 * PI * (i as f64 + 0.5) / FENSTER as f64).cos()
        });
        Self {
            hochpass: Hochpass { x1: 0.0, y1: 0.0 },
            signal: [0.0; FENSTER],
            fenster,
            lsf_vorher: lsf_flach(),
            synthese: Synthese::default(),
        }
    }

    fn frame_kodieren(&mut self, samples: &[i16], ausgabe: &mut Vec<u8>) {
        self.signal.copy_within(FRAME_SAMPLES..FENSTER, 0);
        for (ziel, &s) in self.signal[VORLAUF..].iter_mut().zip(samples) {
            *ziel = self.hochpass.filtern(s as f64);
        }

        let lsf = lpc_analyse(&self.signal, &self.fenster)
            .and_then(|a| lpc_zu_lsf(&a))
            .unwrap_or(self.lsf_vorher);
        let indizes = lsf_quantisieren(&lsf);
        let lsf = lsf_rekonstruieren(&indizes);

        let mut bytes = [0u8; FRAME_BYTES];
        let mut schreiber = BitSchreiber {
            bytes: &mut bytes,
            position: 0,
        };
        for &index in &indizes {
            schreiber.schreiben(index as u32, LSF_BITS);
        }

        for subframe in 0..SUBFRAMES {
            let a = subframe_lpc(&self.lsf_vorher, &lsf, subframe);
            let start = VORLAUF + subframe * SUBFRAME_LAENGE;
            let ziel = &self.signal[start..start + SUBFRAME_LAENGE];

            let mitte = gain_index(residuum_rms(&self.signal, start, &a));
            let bereich =
                mitte.saturating_sub(GAIN_SUCHE_UNTEN)..=(mitte + GAIN_SUCHE_OBEN).min(GAIN_MAX_INDEX);
            let mut beste: Option<Kandidat> = None;
            for index in bereich {
                let mut zustand = self.synthese;
                let mut codes = [0u8; SUBFRAME_LAENGE];
                let fehler = subframe_kodieren(ziel, &a, verstaerkung(index), &mut zustand, &mut codes);
                if beste.as_ref().map_or(true, |b| fehler < b.fehler) {
                    beste = Some(Kandidat {
                        fehler,
                        index,
                        zustand,
                        codes,
                    });
                }
            }
            // Der Suchbereich ist nie leer
            let Some(beste) = beste else {
                continue;
            };

            schreiber.schreiben(beste.index as u32, GAIN_BITS);
            for (n, &code) in beste.codes.iter().enumerate() {
                schreiber.schreiben(code as u32, stufen_bits(n));
            }
            self.synthese = beste.zustand;
        }

        self.lsf_vorher = lsf;
        ausgabe.extend_from_slice(&bytes);
    }
}

impl SprachKodierer for IlbcKodierer {
    fn kodieren(&mut self, samples: &[i16], ausgabe: &mut Vec<u8>) -> CodecResult<()> {
        if samples.len() % FRAME_SAMPLES != 0 {
            return Err(CodecError::UngueltigeFrameGroesse {
                format: KlangFormat::Ilbc,
                laenge: samples.len(),
                vielfaches: FRAME_SAMPLES,
            });
        }
        ausgabe.reserve(samples.len() / FRAME_SAMPLES * FRAME_BYTES);
        for frame in samples.chunks_exact(FRAME_SAMPLES) {
            self.frame_kodieren(frame, ausgabe);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dekodierer
// ---------------------------------------------------------------------------

/// iLBC-Dekodierer (38 Bytes -> 160 Samples)
#[derive(Debug, Clone)]
pub struct IlbcDekodierer {
    lsf_vorher: Lsf,
    synthese: Synthese,
}

impl Default for IlbcDekodierer {
    fn default() -> Self {
        Self::neu()
    }
}

impl IlbcDekodierer {
    pub fn neu() -> Self {
        Self {
            lsf_vorher: lsf_flach(),
            synthese: Synthese::default(),
        }
    }

    fn frame_dekodieren(&mut self, frame: &[u8], ausgabe: &mut Vec<i16>) {
        let mut leser = BitLeser {
            bytes: frame,
            position: 0,
        };
        let mut indizes = [0u8; ORDNUNG];
        for index in indizes.iter_mut() {
            *index = leser.lesen(LSF_BITS) as u8;
        }
        let lsf = lsf_rekonstruieren(&indizes);

        for subframe in 0..SUBFRAMES {
            let a = subframe_lpc(&self.lsf_vorher, &lsf, subframe);
            let gain = verstaerkung(leser.lesen(GAIN_BITS) as usize);
            for n in 0..SUBFRAME_LAENGE {
                let code = leser.lesen(stufen_bits(n)) as usize;
                let y = self.synthese.schritt(&a, gain * stufen(n)[code]);
                ausgabe.push(y.round() as i16);
            }
        }
        self.lsf_vorher = lsf;
    }
}

impl SprachDekodierer for IlbcDekodierer {
    fn dekodieren(&mut self, daten: &[u8], ausgabe: &mut Vec<i16>) -> CodecResult<()> {
        if daten.len() % FRAME_BYTES != 0 {
            return Err(CodecError::UngueltigeFrameGroesse {
                format: KlangFormat::Ilbc,
                laenge: daten.len(),
                vielfaches: FRAME_BYTES,
            });
        }
        ausgabe.reserve(daten.len() / FRAME_BYTES * FRAME_SAMPLES);
        for frame in daten.chunks_exact(FRAME_BYTES) {
            self.frame_dekodieren(frame, ausgabe);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fabrik
// ---------------------------------------------------------------------------

/// Fabrik fuer den nativen iLBC-Rahmen-Codec
#[derive(Debug, Default, Clone, Copy)]
pub struct IlbcFabrik;

impl CodecFabrik for IlbcFabrik {
    fn format(&self) -> KlangFormat {
        KlangFormat::Ilbc
    }

    fn kodierer(&self) -> CodecResult<Box<dyn SprachKodierer>> {
        Ok(Box::new(IlbcKodierer::neu()))
    }

    fn dekodierer(&self) -> CodecResult<Box<dyn SprachDekodierer>> {
        Ok(Box::new(IlbcDekodierer::neu()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprachaehnlich(n: usize) -> Vec<i16> {
        (0..n)
            .map(|i| {
                let t = i as f64 / 8000.0;
                let s = 5000.0 * (2.0 * PI * 300.0 * t).sin() + 2500.0 * (2.0 * PI * 1100.0 * t).sin();
                s as i16
            })
            .collect()
    }

    fn rms(samples: &[i16]) -> f64 {
        let summe: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (summe / samples.len() as f64).sqrt()
    }

    fn rundweg(signal: &[i16]) -> Vec<i16> {
        let mut enc = IlbcKodierer::neu();
        let mut dec = IlbcDekodierer::neu();
        let mut ausgabe = Vec::new();
        for frame in signal.chunks(FRAME_SAMPLES) {
            let mut bytes = Vec::new();
            enc.kodieren(frame, &mut bytes).unwrap();
            assert_eq!(bytes.len(), FRAME_BYTES);
            dec.dekodieren(&bytes, &mut ausgabe).unwrap();
        }
        ausgabe
    }

    #[test]
    fn rahmen_passen_zum_format() {
        assert_eq!(FRAME_SAMPLES, KlangFormat::Ilbc.samples_pro_frame());
        assert_eq!(FRAME_BYTES, KlangFormat::Ilbc.bytes_pro_frame());
    }

    #[test]
    fn frame_laengen() {
        let mut enc = IlbcKodierer::neu();
        let mut bytes = Vec::new();
        enc.kodieren(&[0i16; 320], &mut bytes).unwrap();
        assert_eq!(bytes.len(), 76);

        let mut dec = IlbcDekodierer::neu();
        let mut samples = Vec::new();
        dec.dekodieren(&bytes, &mut samples).unwrap();
        assert_eq!(samples.len(), 320);
    }

    #[test]
    fn ungueltige_laengen_abgelehnt() {
        let mut enc = IlbcKodierer::neu();
        assert!(matches!(
            enc.kodieren(&[0i16; 100], &mut Vec::new()),
            Err(CodecError::UngueltigeFrameGroesse { vielfaches: 160, .. })
        ));
        let mut dec = IlbcDekodierer::neu();
        assert!(matches!(
            dec.dekodieren(&[0u8; 37], &mut Vec::new()),
            Err(CodecError::UngueltigeFrameGroesse { vielfaches: 38, .. })
        ));
    }

    #[test]
    fn flaches_spektrum_ergibt_neutrales_filter() {
        let a = lsf_zu_lpc(&lsf_flach());
        assert!((a[0] - 1.0).abs() < 1e-12);
        for k in 1..=ORDNUNG {
            assert!(a[k].abs() < 1e-9, "a[{k}]={}", a[k]);
        }
        let lsf = lpc_zu_lsf(&a).unwrap();
        for (ist, soll) in lsf.iter().zip(lsf_flach()) {
            assert!((ist - soll).abs() < 1e-6);
        }
    }

    #[test]
    fn lsf_rundweg_ueber_lpc() {
        let lsf: Lsf = [0.3, 0.5, 0.9, 1.2, 1.5, 1.9, 2.2, 2.5, 2.7, 2.95];
        let a = lsf_zu_lpc(&lsf);
        let zurueck = lpc_zu_lsf(&a).unwrap();
        for (ist, soll) in zurueck.iter().zip(lsf) {
            assert!((ist - soll).abs() < 1e-6, "{ist} != {soll}");
        }
    }

    #[test]
    fn stabilisieren_erzwingt_abstand() {
        let mut lsf = [1.0; ORDNUNG];
        lsf[ORDNUNG - 1] = 3.2;
        stabilisieren(&mut lsf);
        assert!(lsf[0] >= LSF_MIN_ABSTAND);
        assert!(lsf[ORDNUNG - 1] <= PI - LSF_MIN_ABSTAND);
        for w in lsf.windows(2) {
            assert!(w[1] - w[0] >= LSF_MIN_ABSTAND - 1e-12);
        }
    }

    #[test]
    fn stille_bleibt_leise() {
        let ausgabe = rundweg(&[0i16; FRAME_SAMPLES * 10]);
        let letzte = &ausgabe[ausgabe.len() - FRAME_SAMPLES..];
        assert!(rms(letzte) < 50.0, "rms={}", rms(letzte));
    }

    #[test]
    fn sprachaehnliches_signal_ueberlebt_rundweg() {
        let signal = sprachaehnlich(FRAME_SAMPLES * 50);
        let ausgabe = rundweg(&signal);
        assert_eq!(ausgabe.len(), signal.len());

        // Einschwingen ignorieren
        let ab = FRAME_SAMPLES * 10;
        let (ein, aus) = (&signal[ab..], &ausgabe[ab..]);
        let verhaeltnis = rms(aus) / rms(ein);
        assert!(verhaeltnis > 0.5 && verhaeltnis < 2.0, "verhaeltnis={verhaeltnis}");

        let fehler: Vec<i16> = ein
            .iter()
            .zip(aus)
            .map(|(&a, &b)| (a as i32 - b as i32).clamp(-32768, 32767) as i16)
            .collect();
        assert!(rms(&fehler) < rms(ein), "fehler={} signal={}", rms(&fehler), rms(ein));
    }

    #[test]
    fn kodierer_und_dekodierer_laufen_synchron() {
        let signal = sprachaehnlich(FRAME_SAMPLES * 5);
        let mut enc = IlbcKodierer::neu();
        let mut dec = IlbcDekodierer::neu();
        for frame in signal.chunks(FRAME_SAMPLES) {
            let mut bytes = Vec::new();
            enc.kodieren(frame, &mut bytes).unwrap();
            dec.dekodieren(&bytes, &mut Vec::new()).unwrap();
            assert_eq!(enc.synthese.speicher, dec.synthese.speicher);
            assert_eq!(enc.lsf_vorher, dec.lsf_vorher);
        }
    }

    #[test]
    fn fabrik_liefert_ilbc() {
        let fabrik = IlbcFabrik;
        assert_eq!(fabrik.format(), KlangFormat::Ilbc);
        let mut enc = fabrik.kodierer().unwrap();
        let mut bytes = Vec::new();
        enc.kodieren(&[0i16; 160], &mut bytes).unwrap();
        assert_eq!(bytes.len(), 38);
    }
}
