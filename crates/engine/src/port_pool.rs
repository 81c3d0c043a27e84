//! UDP-Port-Pool fuer RTP/RTCP-Paare
//!
//! Verwaltet gerade RTP-Ports eines konfigurierten Bereichs; der RTCP-Port ist
//! jeweils RTP + 1. Der Pool wird der Engine explizit uebergeben
//! (`Arc<PortPool>`) und von allen Workern gemeinsam genutzt. Eine Belegung
//! ist ein `PortPaar`-Guard, der die Ports beim Drop zurueckgibt.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Konfiguration des Port-Bereichs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortPoolConfig {
    /// Lokale Adresse an die RTP/RTCP-Sockets gebunden werden
    pub bind_adresse: IpAddr,
    /// Erster Port (inklusive, wird auf gerade aufgerundet)
    pub von: u16,
    /// Letzter Port (inklusive)
    pub bis: u16,
}

impl Default for PortPoolConfig {
    fn default() -> Self {
        Self {
            bind_adresse: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            von: 10_000,
            bis: 20_000,
        }
    }
}

impl PortPoolConfig {
    pub fn validieren(&self) -> Result<(), String> {
        if self.von == 0 {
            return Err("Port-Bereich darf nicht bei 0 beginnen".into());
        }
        if self.bis <= self.von {
            return Err(format!(
                "Ungueltiger Port-Bereich: {}..={}",
                self.von, self.bis
            ));
        }
        Ok(())
    }
}

/// Gemeinsamer Pool freier RTP-Ports
#[derive(Debug)]
pub struct PortPool {
    frei: Mutex<VecDeque<u16>>,
    bind_adresse: IpAddr,
    kapazitaet: usize,
}

impl PortPool {
    /// Erstellt einen Pool mit allen geraden Ports des Bereichs
    pub fn neu(config: &PortPoolConfig) -> Self {
        let start = config.von + (config.von % 2);
        let frei: VecDeque<u16> = (start..config.bis)
            .step_by(2)
            .filter(|&p| p < u16::MAX)
            .collect();
        let kapazitaet = frei.len();
        Self {
            frei: Mutex::new(frei),
            bind_adresse: config.bind_adresse,
            kapazitaet,
        }
    }

    /// Belegt das naechste freie Port-Paar
    pub fn belegen(self: &Arc<Self>) -> Option<PortPaar> {
        let rtp = self.frei.lock().pop_front()?;
        trace!(rtp, "Port-Paar belegt");
        Some(PortPaar {
            rtp,
            pool: Arc::clone(self),
        })
    }

    /// Anzahl freier Paare
    pub fn frei(&self) -> usize {
        self.frei.lock().len()
    }

    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }

    pub fn bind_adresse(&self) -> IpAddr {
        self.bind_adresse
    }

    fn freigeben(&self, rtp: u16) {
        // Hinten anstellen: zuletzt genutzte Ports ruhen am laengsten
        self.frei.lock().push_back(rtp);
        trace!(rtp, "Port-Paar freigegeben");
    }
}

/// Belegtes RTP/RTCP-Port-Paar (gibt die Ports beim Drop zurueck)
#[derive(Debug)]
pub struct PortPaar {
    rtp: u16,
    pool: Arc<PortPool>,
}

impl PortPaar {
    pub fn rtp(&self) -> u16 {
        self.rtp
    }

    pub fn rtcp(&self) -> u16 {
        self.rtp + 1
    }

    pub fn bind_adresse(&self) -> IpAddr {
        self.pool.bind_adresse
    }
}

impl Drop for PortPaar {
    fn drop(&mut self) {
        self.pool.freigeben(self.rtp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(von: u16, bis: u16) -> Arc<PortPool> {
        Arc::new(PortPool::neu(&PortPoolConfig {
            bind_adresse: IpAddr::V4(Ipv4Addr::LOCALHOST),
            von,
            bis,
        }))
    }

    #[test]
    fn nur_gerade_ports() {
        let p = pool(10_001, 10_010);
        assert_eq!(p.kapazitaet(), 4);
        let paar = p.belegen().unwrap();
        assert_eq!(paar.rtp(), 10_002);
        assert_eq!(paar.rtcp(), 10_003);
    }

    #[test]
    fn drop_gibt_ports_zurueck() {
        let p = pool(20_000, 20_004);
        let a = p.belegen().unwrap();
        let b = p.belegen().unwrap();
        assert!(p.belegen().is_none());
        assert_eq!(p.frei(), 0);

        drop(a);
        assert_eq!(p.frei(), 1);
        let c = p.belegen().unwrap();
        assert_eq!(c.rtp(), 20_000);
        drop(b);
        drop(c);
        assert_eq!(p.frei(), 2);
    }

    #[test]
    fn config_validierung() {
        assert!(PortPoolConfig::default().validieren().is_ok());
        let falsch = PortPoolConfig {
            von: 5000,
            bis: 4000,
            ..Default::default()
        };
        assert!(falsch.validieren().is_err());
    }
}
