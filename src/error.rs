//! Unified error types for the IoBridge firmware.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! command handlers' error reporting uniform. All variants are `Copy` so they
//! can be cheaply passed through the dispatcher without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed command or argument.
    Parse(&'static str),
    /// A shared resource (sector buffer, socket send buffer) is in use.
    Busy(&'static str),
    /// Flash erase/read/write reported an error or timeout.
    Flash(FlashError),
    /// SHA-1 mismatch in a mailbox transfer.
    Integrity,
    /// Command issued in the wrong protocol state (e.g. no buffered sector).
    Protocol(&'static str),
    /// A network send failed.
    Net(NetError),
    /// Explicit reset or watchdog path.
    Fatal(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Busy(what) => write!(f, "busy: {what}"),
            Self::Flash(e) => write!(f, "flash: {e}"),
            Self::Integrity => write!(f, "checksum mismatch"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Net(e) => write!(f, "net: {e}"),
            Self::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Flash I/O errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Read returned an error.
    ReadFailed,
    /// Write returned an error.
    WriteFailed,
    /// Sector erase returned an error.
    EraseFailed,
    /// The platform reported an operation timeout.
    Timeout,
    /// Address or length outside the flash geometry.
    OutOfRange,
    /// Post-write verification read back different content.
    VerifyFailed,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed => write!(f, "read error"),
            Self::WriteFailed => write!(f, "write error"),
            Self::EraseFailed => write!(f, "erase error"),
            Self::Timeout => write!(f, "timeout"),
            Self::OutOfRange => write!(f, "address out of range"),
            Self::VerifyFailed => write!(f, "verify failed"),
        }
    }
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

// ---------------------------------------------------------------------------
// Network errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// The underlying stack refused the send.
    SendFailed,
    /// No peer to send to (nothing received yet, no TCP connection).
    NotConnected,
    /// A send was attempted while one is still in flight.
    SendInProgress,
    /// Payload does not fit the send buffer.
    Overflow,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendFailed => write!(f, "send failed"),
            Self::NotConnected => write!(f, "not connected"),
            Self::SendInProgress => write!(f, "send in progress"),
            Self::Overflow => write!(f, "send buffer overflow"),
        }
    }
}

impl From<NetError> for Error {
    fn from(e: NetError) -> Self {
        Self::Net(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
