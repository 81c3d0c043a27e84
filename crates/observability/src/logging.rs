//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (hat Vorrang vor der Konfigurationsdatei):
//! - `MB_LOG_LEVEL`: Filter-Direktive (z.B. `debug` oder
//!   `info,mediabridge_engine::channel=trace`), Standard: info
//! - `MB_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Kanal- und Mixer-IDs werden als strukturierte Felder (`kanal`, `mixer`)
//! geloggt; im JSON-Format landen sie als eigene Schluessel. Worker-Threads
//! heissen `mb-worker-N` und erscheinen im Thread-Namen.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

const ENV_LEVEL: &str = "MB_LOG_LEVEL";
const ENV_FORMAT: &str = "MB_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// Umgebungsvariablen ueberschreiben `level` und `format`. Ein ungueltiges
/// Format faellt auf `text` zurueck; eine ungueltige Filter-Direktive auf `info`.
///
/// # Fehler
/// Wenn bereits ein globaler Subscriber gesetzt ist.
pub fn logging_initialisieren(level: &str, format: &str) -> Result<()> {
    let level = std::env::var(ENV_LEVEL).unwrap_or_else(|_| level.to_string());
    let level_ok = direktive_gueltig(&level);
    let filter = filter_erstellen(&level);

    let format = std::env::var(ENV_FORMAT).unwrap_or_else(|_| format.to_string());

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
    };
    ergebnis.map_err(|e| anyhow!("Logging bereits initialisiert: {e}"))?;

    if !log_format_gueltig(&format) {
        tracing::warn!(format = %format, "Unbekanntes Log-Format, verwende text");
    }
    if !level_ok {
        tracing::warn!(level = %level, "Ungueltige Log-Direktive, verwende info");
    }
    Ok(())
}

/// Baut den Filter aus einer Direktive; ungueltige Direktiven ergeben `info`
///
/// Teile ohne `=` muessen einfache Level sein. `EnvFilter` wuerde ein
/// unbekanntes Wort sonst als Target lesen und fast alles stummschalten.
pub fn filter_erstellen(direktive: &str) -> EnvFilter {
    if !direktive_gueltig(direktive) {
        return EnvFilter::new("info");
    }
    EnvFilter::try_new(direktive).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn direktive_gueltig(direktive: &str) -> bool {
    let mut teile = direktive
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .peekable();
    teile.peek().is_some()
        && teile.all(|teil| teil.contains('=') || log_level_gueltig(&teil.to_ascii_lowercase()))
}

/// Validiert ob ein einfacher Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
