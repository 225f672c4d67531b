//! Typed error taxonomy for the engine.
//!
//! Mirrors the exception hierarchy of the original tool (`InvalidQueryFile`,
//! `BufferOverflow`, `UnknownDestination`, `FailedToInitializePacketfilter`,
//! ...) as a handful of `thiserror` enums, one per failing component, instead
//! of a single catch-all type.

use thiserror::Error;

/// Failures loading or compiling a payload file (a "Payload error").
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload file is empty")]
    Empty,
    #[error("no valid queries found in query file: {0}")]
    InvalidQueryFile(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures mutating or finalising a packet buffer.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("payload of {size} bytes exceeds maximum of {max} bytes")]
    BufferOverflow { size: usize, max: usize },
}

/// Failures opening or configuring a raw socket (a "Capability error" or
/// "Filter-install error").
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("could not open raw socket: {0}")]
    Open(#[source] std::io::Error),
    #[error("could not bind interface: {0}")]
    Interface(#[source] std::io::Error),
    #[error("could not install packet filter: {0}")]
    FilterInstall(String),
    #[error("destination address not set")]
    UnknownDestination,
}

/// Failures validating run configuration (a "Configuration error").
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Invalid(String),
}
