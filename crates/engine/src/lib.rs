//! mediabridge-engine – Echtzeit-Media-Engine
//!
//! Terminiert RTP-Streams, glaettet Jitter, transkodiert zwischen Codecs,
//! mischt Konferenzen und spielt Medien ab bzw. nimmt sie auf:
//! - Jitter Buffer mit festen Slots und Wasserstand
//! - Kanal-Zustandsmaschine mit 20ms-Tick
//! - N-Wege Mixer mit Abzug des eigenen Beitrags
//! - Worker-Pool mit kooperativer Deadline-Schleife
//! - Austauschbare Sicherheitssitzung (DTLS/SRTP) und Medienquellen/-senken

pub mod channel;
pub mod config;
pub mod engine;
pub mod jitter_buffer;
pub mod media;
pub mod mixer;
pub mod port_pool;
pub mod security;
pub mod telemetry;
pub mod transport;

mod worker;

#[cfg(test)]
mod testhilfe;

// Bequeme Re-Exporte der wichtigsten Typen
pub use channel::{Kanal, KanalKontext, KanalParameter, KanalStatistik, KanalZustand};
pub use config::EngineConfig;
pub use engine::MedienEngine;
pub use jitter_buffer::{JitterBuffer, JitterBufferConfig, JitterBufferStatistik};
pub use media::{
    Aufnahme, AufnahmeAuftrag, AufnahmeDaten, AufnahmeSchwellen, PufferWiedergabe,
    SpeicherAufnahme, Wiedergabe, WiedergabeAuftrag,
};
pub use mixer::Mixer;
pub use port_pool::{PortPaar, PortPool, PortPoolConfig};
pub use security::{HandshakeStatus, SicherheitsSitzung};
pub use telemetry::{EngineTelemetrie, WorkerTelemetrie};
pub use transport::{RtpTransport, UdpTransport};
