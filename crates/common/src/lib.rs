//! Common utilities for usb-shell
//!
//! This crate provides the pieces shared by the shell library and its
//! binary: the workspace error type, logging setup, and the USB value types
//! (transfer kinds and transport errors) that flow through the transfer log.

pub mod error;
pub mod logging;
pub mod usb_types;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{TransferKind, UsbError};
