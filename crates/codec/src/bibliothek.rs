//! Codec-Bibliotheken
//!
//! Zustandsbehaftete Sprach-Codecs (G.722, iLBC) werden ueber Fabriken
//! erzeugt, damit der Transcoding-Cache seine Instanzen erst bei Bedarf
//! anlegt. G.722 und der iLBC-Rahmen-Codec sind nativ enthalten. Eine andere
//! iLBC-Implementierung (z.B. RFC-3951-kompatibel) ersetzt den nativen Codec
//! per `mit_ilbc`; ohne iLBC wird ein Kanal mit iLBC beim Oeffnen abgelehnt.

use std::fmt;
use std::sync::Arc;

use mediabridge_protocol::KlangFormat;

use crate::error::{CodecError, CodecResult};
use crate::g722::G722Fabrik;
use crate::ilbc::IlbcFabrik;

/// Kodiert Linear-16-Samples in das Wire-Format
pub trait SprachKodierer: Send {
    /// Haengt die kodierten Bytes an `ausgabe` an
    fn kodieren(&mut self, samples: &[i16], ausgabe: &mut Vec<u8>) -> CodecResult<()>;
}

/// Dekodiert Wire-Bytes in Linear-16-Samples
pub trait SprachDekodierer: Send {
    /// Haengt die dekodierten Samples an `ausgabe` an
    fn dekodieren(&mut self, daten: &[u8], ausgabe: &mut Vec<i16>) -> CodecResult<()>;
}

/// Erzeugt Kodierer/Dekodierer fuer genau ein Format
pub trait CodecFabrik: Send + Sync {
    fn format(&self) -> KlangFormat;
    fn kodierer(&self) -> CodecResult<Box<dyn SprachKodierer>>;
    fn dekodierer(&self) -> CodecResult<Box<dyn SprachDekodierer>>;
}

/// Registry der verfuegbaren Codec-Fabriken
#[derive(Clone)]
pub struct CodecBibliothek {
    g722: Arc<dyn CodecFabrik>,
    ilbc: Option<Arc<dyn CodecFabrik>>,
}

impl fmt::Debug for CodecBibliothek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecBibliothek")
            .field("g722", &true)
            .field("ilbc", &self.ilbc.is_some())
            .finish()
    }
}

impl Default for CodecBibliothek {
    fn default() -> Self {
        Self::standard()
    }
}

impl CodecBibliothek {
    /// Native Codecs (G.722 und iLBC)
    pub fn standard() -> Self {
        Self {
            g722: Arc::new(G722Fabrik),
            ilbc: Some(Arc::new(IlbcFabrik)),
        }
    }

    /// Ersetzt die iLBC-Implementierung
    pub fn mit_ilbc(mut self, fabrik: Arc<dyn CodecFabrik>) -> Self {
        self.ilbc = Some(fabrik);
        self
    }

    /// Entfernt iLBC; Kanaele mit iLBC werden dann abgelehnt
    pub fn ohne_ilbc(mut self) -> Self {
        self.ilbc = None;
        self
    }

    /// Prueft ob ein Format vollstaendig transkodiert werden kann
    pub fn unterstuetzt(&self, format: KlangFormat) -> bool {
        match format {
            KlangFormat::Ilbc => self.ilbc.is_some(),
            _ => true,
        }
    }

    /// Fabrik fuer ein zustandsbehaftetes Format
    pub fn fabrik(&self, format: KlangFormat) -> CodecResult<&Arc<dyn CodecFabrik>> {
        match format {
            KlangFormat::G722 => Ok(&self.g722),
            KlangFormat::Ilbc => self
                .ilbc
                .as_ref()
                .ok_or(CodecError::NichtVerfuegbar(KlangFormat::Ilbc)),
            andere => Err(CodecError::NichtVerfuegbar(andere)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestFabrik;

    struct NullKodierer;
    impl SprachKodierer for NullKodierer {
        fn kodieren(&mut self, _samples: &[i16], ausgabe: &mut Vec<u8>) -> CodecResult<()> {
            ausgabe.extend_from_slice(&[0u8; 38]);
            Ok(())
        }
    }

    struct NullDekodierer;
    impl SprachDekodierer for NullDekodierer {
        fn dekodieren(&mut self, _daten: &[u8], ausgabe: &mut Vec<i16>) -> CodecResult<()> {
            ausgabe.extend_from_slice(&[0i16; 160]);
            Ok(())
        }
    }

    impl CodecFabrik for TestFabrik {
        fn format(&self) -> KlangFormat {
            KlangFormat::Ilbc
        }
        fn kodierer(&self) -> CodecResult<Box<dyn SprachKodierer>> {
            Ok(Box::new(NullKodierer))
        }
        fn dekodierer(&self) -> CodecResult<Box<dyn SprachDekodierer>> {
            Ok(Box::new(NullDekodierer))
        }
    }

    #[test]
    fn standard_enthaelt_ilbc() {
        let bib = CodecBibliothek::standard();
        assert!(bib.unterstuetzt(KlangFormat::G722));
        assert!(bib.unterstuetzt(KlangFormat::Alaw));
        assert!(bib.unterstuetzt(KlangFormat::Ilbc));
        let mut kodierer = bib.fabrik(KlangFormat::Ilbc).unwrap().kodierer().unwrap();
        let mut bytes = Vec::new();
        kodierer.kodieren(&[0i16; 160], &mut bytes).unwrap();
        assert_eq!(bytes.len(), 38);
    }

    #[test]
    fn ohne_ilbc_nicht_verfuegbar() {
        let bib = CodecBibliothek::standard().ohne_ilbc();
        assert!(!bib.unterstuetzt(KlangFormat::Ilbc));
        assert!(matches!(
            bib.fabrik(KlangFormat::Ilbc),
            Err(CodecError::NichtVerfuegbar(KlangFormat::Ilbc))
        ));
    }

    #[test]
    fn ilbc_austauschbar() {
        let bib = CodecBibliothek::standard()
            .ohne_ilbc()
            .mit_ilbc(Arc::new(TestFabrik));
        assert!(bib.unterstuetzt(KlangFormat::Ilbc));
        let fabrik = bib.fabrik(KlangFormat::Ilbc).unwrap();
        let mut dekodierer = fabrik.dekodierer().unwrap();
        let mut samples = Vec::new();
        dekodierer.dekodieren(&[0xFF; 38], &mut samples).unwrap();
        // NullDekodierer statt nativem Codec
        assert_eq!(samples, vec![0i16; 160]);
    }

    #[test]
    fn g711_hat_keine_fabrik() {
        assert!(CodecBibliothek::standard().fabrik(KlangFormat::Ulaw).is_err());
    }
}
