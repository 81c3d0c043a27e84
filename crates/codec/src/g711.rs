//! G.711 A-law / µ-law
//!
//! Segmentierte Kompandierung nach ITU-T G.711. Alle Umwandlungen laufen ueber
//! vorberechnete Tabellen (O(1) pro Sample):
//!
//! - `ALAW_ZU_LINEAR`, `ULAW_ZU_LINEAR`: 256 Eintraege
//! - `LINEAR_ZU_ALAW`, `LINEAR_ZU_ULAW`: 65536 Eintraege (Index = Sample als u16)
//! - `ALAW_ZU_ULAW`, `ULAW_ZU_ALAW`: direkte Byte-Tabellen, definiert als
//!   Komposition ueber Linear-16

use std::sync::LazyLock;

const SIGN_BIT: u8 = 0x80;
const QUANT_MASK: u8 = 0x0F;
const SEG_SHIFT: u8 = 4;
const SEG_MASK: u8 = 0x70;

/// µ-law Bias (0x84)
const ULAW_BIAS: i32 = 0x84;
/// µ-law Clip (14-Bit Betrag)
const ULAW_CLIP: i32 = 8159;

const SEG_AEND: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];
const SEG_UEND: [i32; 8] = [0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF];

fn segment_suchen(wert: i32, tabelle: &[i32; 8]) -> usize {
    tabelle
        .iter()
        .position(|&grenze| wert <= grenze)
        .unwrap_or(tabelle.len())
}

// ---------------------------------------------------------------------------
// Einzelsample-Umwandlung (Tabellenaufbau)
// ---------------------------------------------------------------------------

fn linear_zu_alaw_berechnen(sample: i16) -> u8 {
    let mut pcm = (sample as i32) >> 3;
    let maske: u8 = if pcm >= 0 {
        0xD5
    } else {
        pcm = -pcm - 1;
        0x55
    };

    let seg = segment_suchen(pcm, &SEG_AEND);
    if seg >= 8 {
        return 0x7F ^ maske;
    }
    let mut aval = (seg as u8) << SEG_SHIFT;
    if seg < 2 {
        aval |= ((pcm >> 1) as u8) & QUANT_MASK;
    } else {
        aval |= ((pcm >> seg) as u8) & QUANT_MASK;
    }
    aval ^ maske
}

fn alaw_zu_linear_berechnen(alaw: u8) -> i16 {
    let a = alaw ^ 0x55;
    let mut t = ((a & QUANT_MASK) as i32) << 4;
    let seg = ((a & SEG_MASK) >> SEG_SHIFT) as i32;
    match seg {
        0 => t += 8,
        1 => t += 0x108,
        _ => {
            t += 0x108;
            t <<= seg - 1;
        }
    }
    if a & SIGN_BIT != 0 {
        t as i16
    } else {
        -t as i16
    }
}

fn linear_zu_ulaw_berechnen(sample: i16) -> u8 {
    let mut pcm = (sample as i32) >> 2;
    let maske: u8 = if pcm < 0 {
        pcm = -pcm;
        0x7F
    } else {
        0xFF
    };
    if pcm > ULAW_CLIP {
        pcm = ULAW_CLIP;
    }
    pcm += ULAW_BIAS >> 2;

    let seg = segment_suchen(pcm, &SEG_UEND);
    if seg >= 8 {
        return 0x7F ^ maske;
    }
    let uval = ((seg as u8) << SEG_SHIFT) | (((pcm >> (seg + 1)) as u8) & QUANT_MASK);
    uval ^ maske
}

fn ulaw_zu_linear_berechnen(ulaw: u8) -> i16 {
    let u = !ulaw;
    let mut t = (((u & QUANT_MASK) as i32) << 3) + ULAW_BIAS;
    t <<= ((u & SEG_MASK) >> SEG_SHIFT) as i32;
    if u & SIGN_BIT != 0 {
        (ULAW_BIAS - t) as i16
    } else {
        (t - ULAW_BIAS) as i16
    }
}

// ---------------------------------------------------------------------------
// Tabellen
// ---------------------------------------------------------------------------

static ALAW_ZU_LINEAR: LazyLock<[i16; 256]> =
    LazyLock::new(|| std::array::from_fn(|i| alaw_zu_linear_berechnen(i as u8)));

static ULAW_ZU_LINEAR: LazyLock<[i16; 256]> =
    LazyLock::new(|| std::array::from_fn(|i| ulaw_zu_linear_berechnen(i as u8)));

static LINEAR_ZU_ALAW: LazyLock<Box<[u8]>> = LazyLock::new(|| {
    (0..=u16::MAX)
        .map(|i| linear_zu_alaw_berechnen(i as i16))
        .collect()
});

static LINEAR_ZU_ULAW: LazyLock<Box<[u8]>> = LazyLock::new(|| {
    (0..=u16::MAX)
        .map(|i| linear_zu_ulaw_berechnen(i as i16))
        .collect()
});

static ALAW_ZU_ULAW: LazyLock<[u8; 256]> =
    LazyLock::new(|| std::array::from_fn(|i| linear_zu_ulaw(alaw_zu_linear(i as u8))));

static ULAW_ZU_ALAW: LazyLock<[u8; 256]> =
    LazyLock::new(|| std::array::from_fn(|i| linear_zu_alaw(ulaw_zu_linear(i as u8))));

// ---------------------------------------------------------------------------
// Oeffentliche API
// ---------------------------------------------------------------------------

#[inline]
pub fn alaw_zu_linear(alaw: u8) -> i16 {
    ALAW_ZU_LINEAR[alaw as usize]
}

#[inline]
pub fn ulaw_zu_linear(ulaw: u8) -> i16 {
    ULAW_ZU_LINEAR[ulaw as usize]
}

#[inline]
pub fn linear_zu_alaw(sample: i16) -> u8 {
    LINEAR_ZU_ALAW[sample as u16 as usize]
}

#[inline]
pub fn linear_zu_ulaw(sample: i16) -> u8 {
    LINEAR_ZU_ULAW[sample as u16 as usize]
}

#[inline]
pub fn alaw_zu_ulaw(alaw: u8) -> u8 {
    ALAW_ZU_ULAW[alaw as usize]
}

#[inline]
pub fn ulaw_zu_alaw(ulaw: u8) -> u8 {
    ULAW_ZU_ALAW[ulaw as usize]
}

/// Dekodiert A-law Bytes und haengt die Samples an `ausgabe` an
pub fn alaw_dekodieren(daten: &[u8], ausgabe: &mut Vec<i16>) {
    ausgabe.extend(daten.iter().map(|&b| alaw_zu_linear(b)));
}

/// Dekodiert µ-law Bytes und haengt die Samples an `ausgabe` an
pub fn ulaw_dekodieren(daten: &[u8], ausgabe: &mut Vec<i16>) {
    ausgabe.extend(daten.iter().map(|&b| ulaw_zu_linear(b)));
}

/// Kodiert Samples nach A-law
pub fn alaw_kodieren(samples: &[i16], ausgabe: &mut Vec<u8>) {
    ausgabe.extend(samples.iter().map(|&s| linear_zu_alaw(s)));
}

/// Kodiert Samples nach µ-law
pub fn ulaw_kodieren(samples: &[i16], ausgabe: &mut Vec<u8>) {
    ausgabe.extend(samples.iter().map(|&s| linear_zu_ulaw(s)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bekannte_werte() {
        // Stille
        assert_eq!(linear_zu_alaw(0), 0xD5);
        assert_eq!(linear_zu_ulaw(0), 0xFF);
        assert_eq!(ulaw_zu_linear(0xFF), 0);
        assert_eq!(alaw_zu_linear(0xD5), 8);
        // Vollaussteuerung
        assert_eq!(ulaw_zu_linear(0x80), 32124);
        assert_eq!(ulaw_zu_linear(0x00), -32124);
        assert_eq!(alaw_zu_linear(0xAA), 32256);
        assert_eq!(alaw_zu_linear(0x2A), -32256);
    }

    #[test]
    fn direkte_tabellen_entsprechen_komposition() {
        for b in 0..=255u8 {
            assert_eq!(alaw_zu_ulaw(b), linear_zu_ulaw(alaw_zu_linear(b)), "alaw {b:#04x}");
            assert_eq!(ulaw_zu_alaw(b), linear_zu_alaw(ulaw_zu_linear(b)), "ulaw {b:#04x}");
        }
    }

    #[test]
    fn dekodierte_werte_sind_fixpunkte() {
        for b in 0..=255u8 {
            let l = alaw_zu_linear(b);
            assert_eq!(alaw_zu_linear(linear_zu_alaw(l)), l);
            let l = ulaw_zu_linear(b);
            assert_eq!(ulaw_zu_linear(linear_zu_ulaw(l)), l);
        }
    }

    #[test]
    fn rundweg_erhaelt_ordnung_und_laenge() {
        let rampe: Vec<i16> = (0..160).map(|i| (i * 400 - 32000) as i16).collect();

        let mut kodiert = Vec::new();
        alaw_kodieren(&rampe, &mut kodiert);
        assert_eq!(kodiert.len(), 160);

        let mut zurueck = Vec::new();
        alaw_dekodieren(&kodiert, &mut zurueck);
        assert_eq!(zurueck.len(), 160);
        assert!(zurueck.windows(2).all(|w| w[0] <= w[1]));

        let mut kodiert = Vec::new();
        ulaw_kodieren(&rampe, &mut kodiert);
        let mut zurueck = Vec::new();
        ulaw_dekodieren(&kodiert, &mut zurueck);
        assert_eq!(zurueck.len(), 160);
        assert!(zurueck.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn verlust_ist_begrenzt() {
        for s in [-30000i16, -1000, -10, 0, 10, 1000, 30000] {
            let a = alaw_zu_linear(linear_zu_alaw(s));
            let u = ulaw_zu_linear(linear_zu_ulaw(s));
            // Quantisierungsfehler max. halbe Segmentstufe (<= 1024 im obersten Segment)
            assert!((a as i32 - s as i32).abs() <= 1024, "alaw {s} -> {a}");
            assert!((u as i32 - s as i32).abs() <= 1024, "ulaw {s} -> {u}");
        }
    }
}
