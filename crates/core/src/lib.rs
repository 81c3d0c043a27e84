//! mediabridge-core – Gemeinsame Typen, Ereignisse und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Mediabridge-Crates gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{MediabridgeError, Result};
pub use event::{EreignisSenke, MedienEreignis};
pub use types::{KanalId, MixerId};
