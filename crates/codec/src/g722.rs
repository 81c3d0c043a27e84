//! G.722 Sub-Band-ADPCM (64 kbit/s)
//!
//! Native Festkomma-Implementierung nach ITU-T G.722, Modus 1 (6 Bit
//! Unterband, 2 Bit Oberband). 16 kHz Linear-16 rein, ein Byte pro zwei
//! Samples raus. Die QMF-Filter- und Praediktorzustaende bleiben ueber
//! Frames hinweg erhalten, ein Kodierer/Dekodierer gehoert daher genau einem
//! Stream.
//!
//! ## Ablauf pro Sample-Paar
//!
//! ```text
//! Kodierer:  QMF-Analyse -> SUBTRA -> QUANTL/QUANTH -> INVQAL/INVQAH
//!            -> LOGSCL/LOGSCH -> SCALEL/SCALEH -> Block 4 (Praediktor)
//! Dekodierer: INVQBL/INVQAH -> RECONS -> LIMIT -> LOGSCL/LOGSCH
//!            -> SCALEL/SCALEH -> Block 4 -> QMF-Synthese
//! ```

use mediabridge_protocol::KlangFormat;

use crate::bibliothek::{CodecFabrik, SprachDekodierer, SprachKodierer};
use crate::error::{CodecError, CodecResult};

// ---------------------------------------------------------------------------
// Tabellen (ITU-T G.722)
// ---------------------------------------------------------------------------

const Q6: [i32; 32] = [
    0, 35, 72, 110, 150, 190, 233, 276, 323, 370, 422, 473, 530, 587, 650, 714, 786, 858, 940,
    1023, 1121, 1219, 1339, 1458, 1612, 1765, 1980, 2195, 2557, 2919, 0, 0,
];

const ILN: [i32; 32] = [
    0, 63, 62, 31, 30, 29, 28, 27, 26, 25, 24, 23, 22, 21, 20, 19, 18, 17, 16, 15, 14, 13, 12, 11,
    10, 9, 8, 7, 6, 5, 4, 0,
];

const ILP: [i32; 32] = [
    0, 61, 60, 59, 58, 57, 56, 55, 54, 53, 52, 51, 50, 49, 48, 47, 46, 45, 44, 43, 42, 41, 40, 39,
    38, 37, 36, 35, 34, 33, 32, 0,
];

const WL: [i32; 8] = [-60, -30, 58, 172, 334, 538, 1198, 3042];

const RL42: [i32; 16] = [0, 7, 6, 5, 4, 3, 2, 1, 7, 6, 5, 4, 3, 2, 1, 0];

const ILB: [i32; 32] = [
    2048, 2093, 2139, 2186, 2233, 2282, 2332, 2383, 2435, 2489, 2543, 2599, 2656, 2714, 2774,
    2834, 2896, 2960, 3025, 3091, 3158, 3228, 3298, 3371, 3444, 3520, 3597, 3676, 3756, 3838,
    3922, 4008,
];

const QM4: [i32; 16] = [
    0, -20456, -12896, -8968, -6288, -4240, -2584, -1200, 20456, 12896, 8968, 6288, 4240, 2584,
    1200, 0,
];

const QM6: [i32; 64] = [
    -136, -136, -136, -136, -24808, -21904, -19008, -16704, -14984, -13512, -12280, -11192,
    -10232, -9360, -8576, -7856, -7192, -6576, -6000, -5456, -4944, -4464, -4008, -3576, -3168,
    -2776, -2400, -2032, -1688, -1360, -1040, -728, 24808, 21904, 19008, 16704, 14984, 13512,
    12280, 11192, 10232, 9360, 8576, 7856, 7192, 6576, 6000, 5456, 4944, 4464, 4008, 3576, 3168,
    2776, 2400, 2032, 1688, 1360, 1040, 728, 432, 136, -432, -136,
];

const QM2: [i32; 4] = [-7408, -1616, 7408, 1616];

const QMF_KOEFFIZIENTEN: [i32; 12] = [3, -11, 12, 32, -210, 951, 3876, -805, 362, -156, 53, -11];

const IHN: [i32; 3] = [0, 1, 0];
const IHP: [i32; 3] = [0, 3, 2];
const WH: [i32; 3] = [0, -214, 798];
const RH2: [i32; 4] = [2, 1, 2, 1];

#[inline]
fn saettigen(wert: i32) -> i32 {
    wert.clamp(i16::MIN as i32, i16::MAX as i32)
}

// ---------------------------------------------------------------------------
// Band-Zustand und Block 4 (adaptiver Praediktor)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Band {
    s: i32,
    sp: i32,
    sz: i32,
    r: [i32; 3],
    a: [i32; 3],
    ap: [i32; 3],
    p: [i32; 3],
    d: [i32; 7],
    b: [i32; 7],
    bp: [i32; 7],
    sg: [i32; 7],
    nb: i32,
    det: i32,
}

impl Band {
    fn neu(det: i32) -> Self {
        Self {
            det,
            ..Default::default()
        }
    }

    /// Block 4: Rekonstruktion, Pol-/Nullstellen-Anpassung und Praediktion
    fn block4(&mut self, d: i32) {
        // RECONS
        self.d[0] = d;
        self.r[0] = saettigen(self.s + d);

        // PARREC
        self.p[0] = saettigen(self.sz + d);

        // UPPOL2
        for i in 0..3 {
            self.sg[i] = self.p[i] >> 15;
        }
        let wd1 = saettigen(self.a[1] << 2);
        let mut wd2 = if self.sg[0] == self.sg[1] { -wd1 } else { wd1 };
        if wd2 > 32767 {
            wd2 = 32767;
        }
        let mut wd3 = (wd2 >> 7) + if self.sg[0] == self.sg[2] { 128 } else { -128 };
        wd3 += (self.a[2] * 32512) >> 15;
        self.ap[2] = wd3.clamp(-12288, 12288);

        // UPPOL1
        self.sg[0] = self.p[0] >> 15;
        self.sg[1] = self.p[1] >> 15;
        let wd1 = if self.sg[0] == self.sg[1] { 192 } else { -192 };
        let wd2 = (self.a[1] * 32640) >> 15;
        self.ap[1] = saettigen(wd1 + wd2);
        let wd3 = saettigen(15360 - self.ap[2]);
        self.ap[1] = self.ap[1].clamp(-wd3, wd3);

        // UPZERO
        let wd1 = if d == 0 { 0 } else { 128 };
        self.sg[0] = d >> 15;
        for i in 1..7 {
            self.sg[i] = self.d[i] >> 15;
            let wd2 = if self.sg[i] == self.sg[0] { wd1 } else { -wd1 };
            let wd3 = (self.b[i] * 32640) >> 15;
            self.bp[i] = saettigen(wd2 + wd3);
        }

        // DELAYA
        for i in (1..7).rev() {
            self.d[i] = self.d[i - 1];
            self.b[i] = self.bp[i];
        }
        for i in (1..3).rev() {
            self.r[i] = self.r[i - 1];
            self.p[i] = self.p[i - 1];
            self.a[i] = self.ap[i];
        }

        // FILTEP
        let wd1 = saettigen(self.r[1] + self.r[1]);
        let wd1 = (self.a[1] * wd1) >> 15;
        let wd2 = saettigen(self.r[2] + self.r[2]);
        let wd2 = (self.a[2] * wd2) >> 15;
        self.sp = saettigen(wd1 + wd2);

        // FILTEZ
        self.sz = 0;
        for i in (1..7).rev() {
            let wd1 = saettigen(self.d[i] + self.d[i]);
            self.sz += (self.b[i] * wd1) >> 15;
        }
        self.sz = saettigen(self.sz);

        // PREDIC
        self.s = saettigen(self.sp + self.sz);
    }

    /// LOGSCL + SCALEL (Unterband)
    fn skalierung_unten(&mut self, il4: usize) {
        let wd = (self.nb * 127) >> 7;
        self.nb = (wd + WL[il4]).clamp(0, 18432);
        self.det = skalieren(self.nb, 8);
    }

    /// LOGSCH + SCALEH (Oberband)
    fn skalierung_oben(&mut self, ih2: usize) {
        let wd = (self.nb * 127) >> 7;
        self.nb = (wd + WH[ih2]).clamp(0, 22528);
        self.det = skalieren(self.nb, 10);
    }
}

fn skalieren(nb: i32, basis: i32) -> i32 {
    let wd1 = ((nb >> 6) & 31) as usize;
    let wd2 = basis - (nb >> 11);
    let wd3 = if wd2 < 0 {
        ILB[wd1] << -wd2
    } else {
        ILB[wd1] >> wd2
    };
    wd3 << 2
}

// ---------------------------------------------------------------------------
// Kodierer
// ---------------------------------------------------------------------------

/// G.722 Kodierer (16 kHz Linear-16 -> 64 kbit/s)
#[derive(Debug, Clone)]
pub struct G722Kodierer {
    x: [i32; 24],
    band: [Band; 2],
}

impl Default for G722Kodierer {
    fn default() -> Self {
        Self::neu()
    }
}

impl G722Kodierer {
    pub fn neu() -> Self {
        Self {
            x: [0; 24],
            band: [Band::neu(32), Band::neu(8)],
        }
    }

    fn paar_kodieren(&mut self, s0: i16, s1: i16) -> u8 {
        // Sende-QMF
        self.x.copy_within(2.., 0);
        self.x[22] = s0 as i32;
        self.x[23] = s1 as i32;

        let mut summe_gerade = 0;
        let mut summe_ungerade = 0;
        for i in 0..12 {
            summe_ungerade += self.x[2 * i] * QMF_KOEFFIZIENTEN[i];
            summe_gerade += self.x[2 * i + 1] * QMF_KOEFFIZIENTEN[11 - i];
        }
        let xlow = (summe_gerade + summe_ungerade) >> 14;
        let xhigh = (summe_gerade - summe_ungerade) >> 14;

        // Unterband: SUBTRA, QUANTL
        let unten = &mut self.band[0];
        let el = saettigen(xlow - unten.s);
        let wd = if el >= 0 { el } else { -(el + 1) };
        let mut i = 1;
        while i < 30 {
            let wd1 = (Q6[i] * unten.det) >> 12;
            if wd < wd1 {
                break;
            }
            i += 1;
        }
        let ilow = if el < 0 { ILN[i] } else { ILP[i] };

        // INVQAL
        let ril = (ilow >> 2) as usize;
        let dlow = (unten.det * QM4[ril]) >> 15;

        unten.skalierung_unten(RL42[ril] as usize);
        unten.block4(dlow);

        // Oberband: SUBTRA, QUANTH
        let oben = &mut self.band[1];
        let eh = saettigen(xhigh - oben.s);
        let wd = if eh >= 0 { eh } else { -(eh + 1) };
        let wd1 = (564 * oben.det) >> 12;
        let mih = if wd >= wd1 { 2 } else { 1 };
        let ihigh = if eh < 0 { IHN[mih] } else { IHP[mih] };

        // INVQAH
        let dhigh = (oben.det * QM2[ihigh as usize]) >> 15;

        oben.skalierung_oben(RH2[ihigh as usize] as usize);
        oben.block4(dhigh);

        ((ihigh << 6) | ilow) as u8
    }
}

impl SprachKodierer for G722Kodierer {
    fn kodieren(&mut self, samples: &[i16], ausgabe: &mut Vec<u8>) -> CodecResult<()> {
        if samples.len() % 2 != 0 {
            return Err(CodecError::UngueltigeFrameGroesse {
                format: KlangFormat::G722,
                laenge: samples.len(),
                vielfaches: 2,
            });
        }
        ausgabe.reserve(samples.len() / 2);
        for paar in samples.chunks_exact(2) {
            let code = self.paar_kodieren(paar[0], paar[1]);
            ausgabe.push(code);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dekodierer
// ---------------------------------------------------------------------------

/// G.722 Dekodierer (64 kbit/s -> 16 kHz Linear-16)
#[derive(Debug, Clone)]
pub struct G722Dekodierer {
    x: [i32; 24],
    band: [Band; 2],
}

impl Default for G722Dekodierer {
    fn default() -> Self {
        Self::neu()
    }
}

impl G722Dekodierer {
    pub fn neu() -> Self {
        Self {
            x: [0; 24],
            band: [Band::neu(32), Band::neu(8)],
        }
    }

    fn byte_dekodieren(&mut self, code: u8) -> (i16, i16) {
        let code = code as i32;
        let wd1 = (code & 0x3F) as usize;
        let ihigh = ((code >> 6) & 0x03) as usize;
        let wd2 = QM6[wd1];
        let ril = wd1 >> 2;

        // Unterband: INVQBL, RECONS, LIMIT
        let unten = &mut self.band[0];
        let wd2 = (unten.det * wd2) >> 15;
        let rlow = (unten.s + wd2).clamp(-16384, 16383);

        // INVQAL
        let dlowt = (unten.det * QM4[ril]) >> 15;

        unten.skalierung_unten(RL42[ril] as usize);
        unten.block4(dlowt);

        // Oberband: INVQAH, RECONS, LIMIT
        let oben = &mut self.band[1];
        let dhigh = (oben.det * QM2[ihigh]) >> 15;
        let rhigh = (dhigh + oben.s).clamp(-16384, 16383);

        oben.skalierung_oben(RH2[ihigh] as usize);
        oben.block4(dhigh);

        // Empfangs-QMF
        self.x.copy_within(2.., 0);
        self.x[22] = rlow + rhigh;
        self.x[23] = rlow - rhigh;

        let mut xout1 = 0;
        let mut xout2 = 0;
        for i in 0..12 {
            xout2 += self.x[2 * i] * QMF_KOEFFIZIENTEN[i];
            xout1 += self.x[2 * i + 1] * QMF_KOEFFIZIENTEN[11 - i];
        }
        (
            saettigen(xout1 >> 11) as i16,
            saettigen(xout2 >> 11) as i16,
        )
    }
}

impl SprachDekodierer for G722Dekodierer {
    fn dekodieren(&mut self, daten: &[u8], ausgabe: &mut Vec<i16>) -> CodecResult<()> {
        ausgabe.reserve(daten.len() * 2);
        for &code in daten {
            let (a, b) = self.byte_dekodieren(code);
            ausgabe.push(a);
            ausgabe.push(b);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fabrik
// ---------------------------------------------------------------------------

/// Fabrik fuer die native G.722 Implementierung
#[derive(Debug, Default, Clone, Copy)]
pub struct G722Fabrik;

impl CodecFabrik for G722Fabrik {
    fn format(&self) -> KlangFormat {
        KlangFormat::G722
    }

    fn kodierer(&self) -> CodecResult<Box<dyn SprachKodierer>> {
        Ok(Box::new(G722Kodierer::neu()))
    }

    fn dekodierer(&self) -> CodecResult<Box<dyn SprachDekodierer>> {
        Ok(Box::new(G722Dekodierer::neu()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sinus(frequenz: f64, amplitude: f64, n: usize) -> Vec<i16> {
        (0..n)
            .map(|i| {
                let t = i as f64 / 16_000.0;
                (amplitude * (2.0 * std::f64::consts::PI * frequenz * t).sin()) as i16
            })
            .collect()
    }

    fn rms(samples: &[i16]) -> f64 {
        let summe: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (summe / samples.len() as f64).sqrt()
    }

    #[test]
    fn frame_laengen() {
        let mut enc = G722Kodierer::neu();
        let mut bytes = Vec::new();
        enc.kodieren(&[0i16; 320], &mut bytes).unwrap();
        assert_eq!(bytes.len(), 160);

        let mut dec = G722Dekodierer::neu();
        let mut samples = Vec::new();
        dec.dekodieren(&bytes, &mut samples).unwrap();
        assert_eq!(samples.len(), 320);
    }

    #[test]
    fn ungerade_laenge_abgelehnt() {
        let mut enc = G722Kodierer::neu();
        let mut bytes = Vec::new();
        assert!(matches!(
            enc.kodieren(&[0i16; 3], &mut bytes),
            Err(CodecError::UngueltigeFrameGroesse { vielfaches: 2, .. })
        ));
    }

    #[test]
    fn stille_bleibt_leise() {
        let mut enc = G722Kodierer::neu();
        let mut dec = G722Dekodierer::neu();
        let mut ausgabe = Vec::new();
        for _ in 0..10 {
            let mut bytes = Vec::new();
            enc.kodieren(&[0i16; 320], &mut bytes).unwrap();
            ausgabe.clear();
            dec.dekodieren(&bytes, &mut ausgabe).unwrap();
        }
        assert!(rms(&ausgabe) < 50.0, "rms={}", rms(&ausgabe));
    }

    #[test]
    fn sinus_ueberlebt_rundweg() {
        let signal = sinus(1000.0, 8000.0, 320 * 20);
        let mut enc = G722Kodierer::neu();
        let mut dec = G722Dekodierer::neu();
        let mut ausgabe = Vec::new();
        for frame in signal.chunks(320) {
            let mut bytes = Vec::new();
            enc.kodieren(frame, &mut bytes).unwrap();
            dec.dekodieren(&bytes, &mut ausgabe).unwrap();
        }
        assert_eq!(ausgabe.len(), signal.len());
        // Eingeschwungenen Teil pruefen
        let rest = &ausgabe[ausgabe.len() / 2..];
        assert!(rms(rest) > 1000.0, "rms={}", rms(rest));
    }

    #[test]
    fn fabrik_liefert_g722() {
        let fabrik = G722Fabrik;
        assert_eq!(fabrik.format(), KlangFormat::G722);
        assert!(fabrik.kodierer().is_ok());
        assert!(fabrik.dekodierer().is_ok());
    }
}
