//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.
//!
//! ```toml
//! [engine]
//! worker_anzahl = 0        # 0 = CPU-Kerne - 1
//!
//! [ports]
//! bind_adresse = "0.0.0.0"
//! von = 10000
//! bis = 20000
//!
//! [jitter]
//! slots = 20
//! wasserstand = 2
//!
//! [logging]
//! level = "info"
//! format = "text"
//!
//! [observability]
//! port = 9300
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use mediabridge_engine::{EngineConfig, JitterBufferConfig, PortPoolConfig};
use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker-Pool und Kanal-Lebenszyklus
    pub engine: EngineEinstellungen,
    /// RTP/RTCP-Port-Bereich
    pub ports: PortPoolConfig,
    /// Jitter Buffer pro Kanal
    pub jitter: JitterBufferConfig,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Worker-Pool und Kanal-Lebenszyklus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineEinstellungen {
    /// Anzahl Worker-Threads (0 = automatisch)
    pub worker_anzahl: usize,
    /// Kapazitaet der Befehls-Queue pro Worker
    pub befehl_queue: usize,
    /// Ticks (je 20ms) ohne Empfang bis ein Kanal geschlossen wird
    pub leerlauf_ticks: u32,
}

impl Default for EngineEinstellungen {
    fn default() -> Self {
        let standard = EngineConfig::default();
        Self {
            worker_anzahl: standard.worker_anzahl,
            befehl_queue: standard.befehl_queue,
            leerlauf_ticks: standard.leerlauf_ticks,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder Filter-Direktive
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Bind-Adresse fuer Metriken und Health
    pub bind_adresse: IpAddr,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            bind_adresse: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Parst und validiert eine TOML-Konfiguration
    pub fn aus_toml(inhalt: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(inhalt)?;
        config.engine_config().validieren()?;
        Ok(config)
    }

    /// Bildet die Abschnitte auf die Engine-Konfiguration ab
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            worker_anzahl: self.engine.worker_anzahl,
            befehl_queue: self.engine.befehl_queue,
            leerlauf_ticks: self.engine.leerlauf_ticks,
            ports: self.ports.clone(),
            jitter: self.jitter,
        }
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> SocketAddr {
        SocketAddr::new(self.observability.bind_adresse, self.observability.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.ports.von, 10_000);
        assert_eq!(cfg.jitter.wasserstand, 2);
        assert_eq!(cfg.engine.leerlauf_ticks, 1000);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.engine_config().validieren().is_ok());
    }

    #[test]
    fn bind_adresse_observability() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.observability_bind_adresse().to_string(), "0.0.0.0:9300");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [engine]
            worker_anzahl = 3

            [ports]
            bind_adresse = "127.0.0.1"
            von = 30000
            bis = 30100

            [jitter]
            wasserstand = 4
        "#;
        let cfg = ServerConfig::aus_toml(toml).unwrap();
        assert_eq!(cfg.engine.worker_anzahl, 3);
        assert_eq!(cfg.ports.von, 30_000);
        assert_eq!(cfg.jitter.wasserstand, 4);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.jitter.slots, 20);
        assert_eq!(cfg.observability.port, 9300);

        let engine = cfg.engine_config();
        assert_eq!(engine.effektive_worker_anzahl(), 3);
        assert_eq!(engine.ports.bis, 30_100);
    }

    #[test]
    fn ungueltige_werte_werden_abgelehnt() {
        let toml = r#"
            [jitter]
            slots = 4
            wasserstand = 8
        "#;
        assert!(ServerConfig::aus_toml(toml).is_err());

        let toml = r#"
            [ports]
            von = 20000
            bis = 10000
        "#;
        assert!(ServerConfig::aus_toml(toml).is_err());
    }

    #[test]
    fn fehlende_datei_ergibt_standard() {
        let cfg = ServerConfig::laden("/nicht/vorhanden/mediabridge.toml").unwrap();
        assert_eq!(cfg.observability.port, 9300);
    }
}
