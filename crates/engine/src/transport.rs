//! RTP/RTCP-Transport eines Kanals
//!
//! Der Tick darf nie auf I/O warten: alle Operationen sind nicht-blockierend
//! und liefern `Ok(None)` wenn gerade nichts anliegt.
//!
//! ## Reactor-Zuordnung
//!
//! Die Sockets werden beim Oeffnen ausserhalb jeder Runtime gebunden und erst
//! vom besitzenden Worker an dessen Reactor angemeldet. Migriert ein Kanal
//! beim Mischen zu einem anderen Worker, meldet der abgebende Worker die
//! Sockets ab und der uebernehmende meldet sie erneut an:
//!
//! ```text
//!   binden() ──> Frei ──anmelden()──> Angemeldet ──abmelden()──> Frei ──> ...
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::debug;

use crate::port_pool::{PortPaar, PortPool};

/// Anzahl Port-Paare die beim Oeffnen probiert werden bevor aufgegeben wird
const BIND_VERSUCHE: usize = 16;

/// Nicht-blockierender Datagramm-Transport eines Kanals
pub trait RtpTransport: Send {
    /// Empfaengt ein Datagramm vom RTP-Socket
    fn rtp_empfangen(&mut self, puffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Empfaengt ein Datagramm vom RTCP-Socket
    fn rtcp_empfangen(&mut self, puffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Sendet ein Datagramm ueber den RTP-Socket
    fn senden(&mut self, daten: &[u8], ziel: SocketAddr) -> io::Result<usize>;

    /// Lokaler RTP-Port
    fn lokaler_port(&self) -> u16;

    /// Meldet die Sockets am Reactor des aktuellen Threads an
    fn anmelden(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Loest die Sockets vom Reactor, bevor der Kanal den Worker verlaesst
    fn abmelden(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn nicht_blockierend<T>(ergebnis: io::Result<T>) -> io::Result<Option<T>> {
    match ergebnis {
        Ok(wert) => Ok(Some(wert)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Debug)]
enum Sockets {
    /// Gebunden, keinem Reactor zugeordnet
    Frei {
        rtp: std::net::UdpSocket,
        rtcp: std::net::UdpSocket,
    },
    Angemeldet {
        rtp: UdpSocket,
        rtcp: UdpSocket,
    },
    /// Ein Reactor-Wechsel ist fehlgeschlagen
    Verloren,
}

fn nicht_angemeldet() -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        "Transport an keinem Reactor angemeldet",
    )
}

fn verloren() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "Transport-Sockets verloren")
}

/// UDP-Transport auf einem Port-Paar aus dem Pool
#[derive(Debug)]
pub struct UdpTransport {
    sockets: Sockets,
    ports: PortPaar,
}

impl UdpTransport {
    /// Belegt ein Port-Paar und bindet beide Sockets
    ///
    /// Ports, die von einem anderen Prozess belegt sind, werden uebersprungen
    /// (und kommen hinten wieder in den Pool). Der Transport ist danach noch
    /// keinem Reactor zugeordnet.
    pub fn binden(pool: &Arc<PortPool>) -> io::Result<Self> {
        for _ in 0..BIND_VERSUCHE {
            let Some(ports) = pool.belegen() else {
                break;
            };
            match Self::paar_binden(ports) {
                Ok(transport) => return Ok(transport),
                Err(e) => {
                    debug!(fehler = %e, "Port-Paar nicht bindbar, naechstes");
                }
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "kein freies Port-Paar",
        ))
    }

    fn paar_binden(ports: PortPaar) -> io::Result<Self> {
        let ip = ports.bind_adresse();
        let rtp = std::net::UdpSocket::bind(SocketAddr::new(ip, ports.rtp()))?;
        let rtcp = std::net::UdpSocket::bind(SocketAddr::new(ip, ports.rtcp()))?;
        // Voraussetzung fuer UdpSocket::from_std
        rtp.set_nonblocking(true)?;
        rtcp.set_nonblocking(true)?;
        Ok(Self {
            sockets: Sockets::Frei { rtp, rtcp },
            ports,
        })
    }

    pub fn rtcp_port(&self) -> u16 {
        self.ports.rtcp()
    }

    pub fn ist_angemeldet(&self) -> bool {
        matches!(self.sockets, Sockets::Angemeldet { .. })
    }
}

impl RtpTransport for UdpTransport {
    fn rtp_empfangen(&mut self, puffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match &self.sockets {
            Sockets::Angemeldet { rtp, .. } => nicht_blockierend(rtp.try_recv_from(puffer)),
            Sockets::Frei { .. } => Err(nicht_angemeldet()),
            Sockets::Verloren => Err(verloren()),
        }
    }

    fn rtcp_empfangen(&mut self, puffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match &self.sockets {
            Sockets::Angemeldet { rtcp, .. } => nicht_blockierend(rtcp.try_recv_from(puffer)),
            Sockets::Frei { .. } => Err(nicht_angemeldet()),
            Sockets::Verloren => Err(verloren()),
        }
    }

    /// Schreibbereitschaft kennt der Reactor erst nach seinem ersten
    /// Durchlauf; bis dahin liefert das Senden `WouldBlock`.
    fn senden(&mut self, daten: &[u8], ziel: SocketAddr) -> io::Result<usize> {
        match &self.sockets {
            Sockets::Angemeldet { rtp, .. } => rtp.try_send_to(daten, ziel),
            Sockets::Frei { .. } => Err(nicht_angemeldet()),
            Sockets::Verloren => Err(verloren()),
        }
    }

    fn lokaler_port(&self) -> u16 {
        self.ports.rtp()
    }

    /// Braucht eine Runtime mit aktiviertem I/O im aktuellen Thread
    fn anmelden(&mut self) -> io::Result<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "keine Tokio-Runtime im aktuellen Thread",
            ));
        }
        match std::mem::replace(&mut self.sockets, Sockets::Verloren) {
            Sockets::Frei { rtp, rtcp } => {
                let rtp = UdpSocket::from_std(rtp)?;
                let rtcp = UdpSocket::from_std(rtcp)?;
                self.sockets = Sockets::Angemeldet { rtp, rtcp };
                debug!(port = self.ports.rtp(), "Transport angemeldet");
                Ok(())
            }
            angemeldet @ Sockets::Angemeldet { .. } => {
                self.sockets = angemeldet;
                Ok(())
            }
            Sockets::Verloren => Err(verloren()),
        }
    }

    fn abmelden(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.sockets, Sockets::Verloren) {
            Sockets::Angemeldet { rtp, rtcp } => {
                let rtp = rtp.into_std()?;
                let rtcp = rtcp.into_std()?;
                self.sockets = Sockets::Frei { rtp, rtcp };
                debug!(port = self.ports.rtp(), "Transport abgemeldet");
                Ok(())
            }
            frei @ Sockets::Frei { .. } => {
                self.sockets = frei;
                Ok(())
            }
            Sockets::Verloren => Err(verloren()),
        }
    }
}
