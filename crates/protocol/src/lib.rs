//! mediabridge-protocol – Wire-Formate der Media-Engine
//!
//! - [`rtp`] – RTP-Paketmodell (RFC 3550) und RFC 7983 Demultiplexing
//! - [`dtmf`] – RFC 2833/4733 telephone-event Nutzdaten
//! - [`codec`] – Audio-Formate und Payload-Typen

pub mod codec;
pub mod dtmf;
pub mod rtp;

pub use codec::KlangFormat;
pub use dtmf::DtmfEreignis;
pub use rtp::RtpPaket;
