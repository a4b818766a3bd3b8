//! USB subsystem
//!
//! The transport contract, its libusb implementation, the isochronous
//! descriptor ring and the per-type transfer handlers.

pub mod device;
pub mod iso;
pub mod transfers;
pub mod transport;

// Re-export public types
pub use device::UsbDevice;
pub use iso::IsoRing;
pub use transfers::{ControlSetup, IssueError};
pub use transport::{IsoCompletion, IsoDescriptor, IsoPacket, IsoTransferStatus, Transport};
