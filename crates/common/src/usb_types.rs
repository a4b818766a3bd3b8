//! USB value types shared across the shell
//!
//! `TransferKind` names the four USB transfer types the shell can issue, and
//! `UsbError` is the transport-level failure recorded against a transfer.

use std::fmt;
use thiserror::Error;

/// USB transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Control,
    Interrupt,
    Bulk,
    Isochronous,
}

impl TransferKind {
    /// Short name used by the filter language (`type=ctrl`)
    pub fn short_name(self) -> &'static str {
        match self {
            TransferKind::Control => "ctrl",
            TransferKind::Interrupt => "int",
            TransferKind::Bulk => "bulk",
            TransferKind::Isochronous => "isoc",
        }
    }

    /// Parse a short name back into a transfer kind
    pub fn from_short_name(name: &str) -> Option<Self> {
        match name {
            "ctrl" => Some(TransferKind::Control),
            "int" => Some(TransferKind::Interrupt),
            "bulk" => Some(TransferKind::Bulk),
            "isoc" => Some(TransferKind::Isochronous),
            _ => None,
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferKind::Control => "control",
            TransferKind::Interrupt => "interrupt",
            TransferKind::Bulk => "bulk",
            TransferKind::Isochronous => "isochronous",
        };
        f.write_str(name)
    }
}

/// USB transport error
///
/// Mirrors the libusb error codes so that both the safe `rusb` calls and the
/// raw isochronous path report failures the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    #[error("Input/Output Error")]
    Io,
    #[error("Invalid parameter")]
    InvalidParam,
    #[error("Access denied (insufficient permissions)")]
    Access,
    #[error("No such device (it may have been disconnected)")]
    NoDevice,
    #[error("Entity not found")]
    NotFound,
    #[error("Resource busy")]
    Busy,
    #[error("Operation timed out")]
    Timeout,
    #[error("Overflow")]
    Overflow,
    #[error("Pipe error")]
    Pipe,
    #[error("System call interrupted (perhaps due to signal)")]
    Interrupted,
    #[error("Insufficient memory")]
    NoMem,
    #[error("Operation not supported or unimplemented on this platform")]
    NotSupported,
    #[error("{message}")]
    Other { code: i32, message: String },
}

impl UsbError {
    /// libusb error code for this error
    pub fn code(&self) -> i32 {
        match self {
            UsbError::Io => -1,
            UsbError::InvalidParam => -2,
            UsbError::Access => -3,
            UsbError::NoDevice => -4,
            UsbError::NotFound => -5,
            UsbError::Busy => -6,
            UsbError::Timeout => -7,
            UsbError::Overflow => -8,
            UsbError::Pipe => -9,
            UsbError::Interrupted => -10,
            UsbError::NoMem => -11,
            UsbError::NotSupported => -12,
            UsbError::Other { code, .. } => *code,
        }
    }

    /// Build an error from a raw (negative) libusb return code
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => UsbError::Io,
            -2 => UsbError::InvalidParam,
            -3 => UsbError::Access,
            -4 => UsbError::NoDevice,
            -5 => UsbError::NotFound,
            -6 => UsbError::Busy,
            -7 => UsbError::Timeout,
            -8 => UsbError::Overflow,
            -9 => UsbError::Pipe,
            -10 => UsbError::Interrupted,
            -11 => UsbError::NoMem,
            -12 => UsbError::NotSupported,
            _ => UsbError::Other {
                code,
                message: "Other error".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names() {
        for kind in [
            TransferKind::Control,
            TransferKind::Interrupt,
            TransferKind::Bulk,
            TransferKind::Isochronous,
        ] {
            assert_eq!(TransferKind::from_short_name(kind.short_name()), Some(kind));
        }
        assert_eq!(TransferKind::from_short_name("control"), None);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(UsbError::from_code(-7), UsbError::Timeout);
        assert_eq!(UsbError::Pipe.code(), -9);
        assert_eq!(UsbError::from_code(-99).code(), -99);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(UsbError::Timeout.to_string(), "Operation timed out");
        assert_eq!(TransferKind::Isochronous.to_string(), "isochronous");
    }
}
