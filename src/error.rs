//! Error types shared across the scanner.

use std::net::SocketAddrV4;

use thiserror::Error;

/// Failures that can end a scan.
///
/// Per-probe conditions (refused, unreachable, timeout) are never errors:
/// they are classified into verdicts by the engine. Only configuration
/// problems and unrecoverable platform errors surface here.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Bad user input. Reported once, before any probe is issued.
    #[error("{0}")]
    Config(String),

    /// `connect` failed in a way the platform cannot recover from, for
    /// example a broadcast address on a platform where that is fatal.
    /// The address is named so the user can blocklist it with `-B`.
    #[error("fatal error probing {addr}: {source} (exclude the address with -B {})", .addr.ip())]
    Fatal {
        addr: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },

    /// An I/O failure outside any single probe, such as the readiness
    /// backend refusing to start.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Process exit code for this error: 1 for configuration errors,
    /// 2 for fatal runtime errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            ScanError::Config(_) => 1,
            ScanError::Fatal { .. } | ScanError::Io(_) => 2,
        }
    }
}
