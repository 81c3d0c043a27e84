//! Gemeinsame Identifikationstypen fuer Mediabridge
//!
//! Kanaele und Mixer werden ausschliesslich ueber IDs referenziert, nie ueber
//! direkte Zeiger. Die Aufloesung erfolgt ueber die Registry des Workers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Kanal-ID (ein RTP/RTCP-Portpaar)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KanalId(pub Uuid);

impl KanalId {
    /// Erstellt eine neue zufaellige KanalId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for KanalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for KanalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kanal:{}", self.0)
    }
}

/// Eindeutige Mixer-ID (eine Audio-Konferenz)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MixerId(pub Uuid);

impl MixerId {
    /// Erstellt eine neue zufaellige MixerId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MixerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MixerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mixer:{}", self.0)
    }
}
