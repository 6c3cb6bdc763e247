//! Logging setup and helpers.
//!
//! The store only emits `tracing` events; installing a subscriber is the
//! host's choice. [`init`] installs a plain formatter with file and line
//! numbers on every event.

use std::fmt;

use anyhow::{Result, anyhow};
use tracing::Level;

/// Installs a global `fmt` subscriber at `level`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init(level: Level) -> Result<()> {
    let subscriber = tracing_subscriber::fmt().with_file(true).with_line_number(true).with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!("failed to install subscriber: {e}"))
}

/// Shows only the length of a byte buffer in log output.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl fmt::Display for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl fmt::Debug for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_bytes() {
        assert_eq!(RedactedBytes(b"secret").to_string(), "[6 bytes]");
        assert_eq!(format!("{:?}", RedactedBytes(&[])), "[0 bytes]");
    }
}
