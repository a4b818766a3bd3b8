//! Interactive USB transfer shell
//!
//! Opens one USB device, issues control, interrupt, bulk and isochronous
//! transfers on command, keeps every transfer and its payload in an in-memory
//! log, and lets the operator list or export logged transfers through a small
//! filter language.
//!
//! The pieces, bottom-up: [`arena`] owns payload bytes, [`transfer_log`]
//! records transfers, [`usb`] talks to the device behind the
//! [`usb::Transport`] seam, [`filter`] selects log entries, [`export`] prints
//! or saves them, and [`interpreter`] turns text lines into all of the above
//! against one [`session::Session`].

pub mod arena;
pub mod config;
pub mod export;
pub mod filter;
pub mod interpreter;
pub mod payload;
pub mod session;
pub mod test_utils;
pub mod transfer_log;
pub mod usb;

pub use config::ShellConfig;
pub use interpreter::{CommandError, Flow, Interpreter, InterpreterSettings};
pub use session::{Session, SessionSettings};
