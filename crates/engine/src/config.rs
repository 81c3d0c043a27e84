//! Konfiguration der Media-Engine

use mediabridge_core::{MediabridgeError, Result};
use serde::{Deserialize, Serialize};

use crate::channel::STANDARD_LEERLAUF_TICKS;
use crate::jitter_buffer::JitterBufferConfig;
use crate::port_pool::PortPoolConfig;

/// Standard-Kapazitaet der Befehls-Queue pro Worker
pub const STANDARD_BEFEHL_QUEUE: usize = 256;

/// Engine-Konfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Anzahl Worker-Threads (0 = CPU-Kerne - 1, mindestens 1)
    pub worker_anzahl: usize,
    /// Kapazitaet der Befehls-Queue pro Worker
    pub befehl_queue: usize,
    /// Ticks ohne Empfang bis ein Kanal mit "idle" geschlossen wird
    pub leerlauf_ticks: u32,
    pub ports: PortPoolConfig,
    pub jitter: JitterBufferConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_anzahl: 0,
            befehl_queue: STANDARD_BEFEHL_QUEUE,
            leerlauf_ticks: STANDARD_LEERLAUF_TICKS,
            ports: PortPoolConfig::default(),
            jitter: JitterBufferConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Prueft alle Werte; Fehler sind Konfigurationsfehler
    pub fn validieren(&self) -> Result<()> {
        if self.befehl_queue == 0 {
            return Err(MediabridgeError::konfiguration(
                "befehl_queue muss groesser als 0 sein",
            ));
        }
        if self.leerlauf_ticks == 0 {
            return Err(MediabridgeError::konfiguration(
                "leerlauf_ticks muss groesser als 0 sein",
            ));
        }
        self.ports
            .validieren()
            .map_err(MediabridgeError::Konfiguration)?;
        self.jitter
            .validieren()
            .map_err(MediabridgeError::Konfiguration)?;
        Ok(())
    }

    /// Tatsaechliche Worker-Anzahl nach Aufloesung von 0 = automatisch
    pub fn effektive_worker_anzahl(&self) -> usize {
        if self.worker_anzahl > 0 {
            return self.worker_anzahl;
        }
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_ist_gueltig() {
        let config = EngineConfig::default();
        assert!(config.validieren().is_ok());
        assert!(config.effektive_worker_anzahl() >= 1);
    }

    #[test]
    fn explizite_worker_anzahl() {
        let config = EngineConfig {
            worker_anzahl: 3,
            ..Default::default()
        };
        assert_eq!(config.effektive_worker_anzahl(), 3);
    }

    #[test]
    fn ungueltige_werte() {
        let config = EngineConfig {
            befehl_queue: 0,
            ..Default::default()
        };
        assert!(config.validieren().unwrap_err().ist_konfigurationsfehler());

        let config = EngineConfig {
            jitter: JitterBufferConfig {
                slots: 4,
                wasserstand: 4,
            },
            ..Default::default()
        };
        assert!(config.validieren().is_err());
    }
}
