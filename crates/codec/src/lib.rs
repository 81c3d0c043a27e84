//! mediabridge-codec – Sample-Puffer und Transcoding-Cache
//!
//! Dieses Crate stellt die Audio-Darstellungen und Umwandlungen der
//! Media-Engine bereit.
//!
//! ## Module
//!
//! - `rawsound`   – Formatgekennzeichneter Sample-Puffer mit Dirty-Flag
//! - `g711`       – A-law / µ-law Tabellen
//! - `g722`       – Native G.722 Implementierung (64 kbit/s)
//! - `ilbc`       – Nativer Codec im iLBC-Rahmenformat (20 ms, 38 Bytes)
//! - `resample`   – 17-Tap FIR fuer 8 kHz <-> 16 kHz
//! - `bibliothek` – Codec-Fabriken (nativ, iLBC austauschbar)
//! - `codecx`     – Lazy Transcoding-Cache pro Kanalrichtung
//! - `error`      – Fehlertypen

pub mod bibliothek;
pub mod codecx;
pub mod error;
pub mod g711;
pub mod g722;
pub mod ilbc;
pub mod rawsound;
pub mod resample;

pub use bibliothek::{CodecBibliothek, CodecFabrik, SprachDekodierer, SprachKodierer};
pub use codecx::CodecCache;
pub use error::{CodecError, CodecResult};
pub use rawsound::RawSound;
