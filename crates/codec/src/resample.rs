//! Schmal-/Breitband-Umsetzung (8 kHz <-> 16 kHz)
//!
//! 17-Tap Halbband-Tiefpass in Q15. Beim Dezimieren laeuft jedes Eingangs-
//! Sample durch die Verzoegerungskette, auch die verworfenen; dadurch bleibt
//! der Filterzustand ueber Paketgrenzen hinweg stetig. Beim Interpolieren
//! wird mit Nullen aufgefuellt und mit Verstaerkung 2 gefiltert.

/// Halbband-Koeffizienten (Q15, Summe 32768)
const FIR_KOEFFIZIENTEN: [i32; 17] = [
    0, -172, 0, 761, 0, -2494, 0, 10083, 16412, 10083, 0, -2494, 0, 761, 0, -172, 0,
];

const TAPS: usize = FIR_KOEFFIZIENTEN.len();

/// FIR-Verzoegerungskette (Ringpuffer)
#[derive(Debug, Clone)]
struct Verlauf {
    werte: [i32; TAPS],
    pos: usize,
}

impl Verlauf {
    fn neu() -> Self {
        Self {
            werte: [0; TAPS],
            pos: 0,
        }
    }

    #[inline]
    fn schieben(&mut self, wert: i32) {
        self.werte[self.pos] = wert;
        self.pos = (self.pos + 1) % TAPS;
    }

    /// Faltung mit den Koeffizienten (aeltestes Sample zuerst)
    #[inline]
    fn falten(&self) -> i32 {
        let mut summe = 0i32;
        for (k, koeff) in FIR_KOEFFIZIENTEN.iter().enumerate() {
            summe += self.werte[(self.pos + k) % TAPS] * koeff;
        }
        summe
    }
}

#[inline]
fn saettigen(wert: i32) -> i16 {
    wert.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// 16 kHz -> 8 kHz
#[derive(Debug, Clone)]
pub struct Dezimierer {
    verlauf: Verlauf,
}

impl Default for Dezimierer {
    fn default() -> Self {
        Self::neu()
    }
}

impl Dezimierer {
    pub fn neu() -> Self {
        Self {
            verlauf: Verlauf::neu(),
        }
    }

    /// Haengt `eingabe.len() / 2` Samples an `ausgabe` an
    pub fn verarbeiten(&mut self, eingabe: &[i16], ausgabe: &mut Vec<i16>) {
        ausgabe.reserve(eingabe.len() / 2);
        for paar in eingabe.chunks_exact(2) {
            self.verlauf.schieben(paar[0] as i32);
            self.verlauf.schieben(paar[1] as i32);
            ausgabe.push(saettigen(self.verlauf.falten() >> 15));
        }
    }

    pub fn zuruecksetzen(&mut self) {
        self.verlauf = Verlauf::neu();
    }
}

/// 8 kHz -> 16 kHz
#[derive(Debug, Clone)]
pub struct Interpolierer {
    verlauf: Verlauf,
}

impl Default for Interpolierer {
    fn default() -> Self {
        Self::neu()
    }
}

impl Interpolierer {
    pub fn neu() -> Self {
        Self {
            verlauf: Verlauf::neu(),
        }
    }

    /// Haengt `eingabe.len() * 2` Samples an `ausgabe` an
    pub fn verarbeiten(&mut self, eingabe: &[i16], ausgabe: &mut Vec<i16>) {
        ausgabe.reserve(eingabe.len() * 2);
        for &sample in eingabe {
            self.verlauf.schieben(sample as i32);
            ausgabe.push(saettigen(self.verlauf.falten() >> 14));
            self.verlauf.schieben(0);
            ausgabe.push(saettigen(self.verlauf.falten() >> 14));
        }
    }

    pub fn zuruecksetzen(&mut self) {
        self.verlauf = Verlauf::neu();
    }
}
