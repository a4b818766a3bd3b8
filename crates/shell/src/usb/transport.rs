//! USB transport contract
//!
//! Everything the shell does to hardware goes through [`Transport`]:
//! interface claiming, the three synchronous transfer kinds, and the
//! asynchronous isochronous path with its event pump.
//!
//! The isochronous path is asynchronous at this layer only. [`submit_and_wait`]
//! wraps a submission and pumps events until its single completion has fired,
//! so callers see an ordinary blocking call.

use common::UsbError;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Slice of time given to each event-pump call while waiting for a completion
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Transfer-level status reported with an isochronous completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoTransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
}

impl IsoTransferStatus {
    /// Map a raw libusb transfer status
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => IsoTransferStatus::Completed,
            2 => IsoTransferStatus::TimedOut,
            3 => IsoTransferStatus::Cancelled,
            4 => IsoTransferStatus::Stall,
            5 => IsoTransferStatus::NoDevice,
            6 => IsoTransferStatus::Overflow,
            _ => IsoTransferStatus::Error,
        }
    }
}

/// Outcome of one isochronous packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoPacket {
    pub actual_length: usize,
    /// Raw packet status; zero means success
    pub status: i32,
}

/// Everything the completion callback reports for one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoCompletion {
    pub status: IsoTransferStatus,
    pub start_frame: u32,
    pub packets: Vec<IsoPacket>,
}

impl IsoCompletion {
    /// Sum of per-packet actual lengths
    pub fn actual_length(&self) -> usize {
        self.packets.iter().map(|p| p.actual_length).sum()
    }

    /// Number of packets with a non-zero status
    pub fn error_count(&self) -> usize {
        self.packets.iter().filter(|p| p.status != 0).count()
    }

    /// Result recorded in the transfer log
    pub fn result(&self) -> Result<usize, UsbError> {
        match self.status {
            IsoTransferStatus::Completed => Ok(self.actual_length()),
            IsoTransferStatus::TimedOut | IsoTransferStatus::Cancelled => Err(UsbError::Timeout),
            IsoTransferStatus::Stall => Err(UsbError::Pipe),
            IsoTransferStatus::NoDevice => Err(UsbError::NoDevice),
            IsoTransferStatus::Overflow => Err(UsbError::Overflow),
            IsoTransferStatus::Error => Err(UsbError::Io),
        }
    }
}

/// A reusable asynchronous isochronous transfer descriptor
pub trait IsoDescriptor {
    /// Number of packets this descriptor was allocated for
    fn packet_count(&self) -> usize;

    /// Take the completion delivered since the last submission, if it fired
    fn take_completion(&mut self) -> Option<IsoCompletion>;
}

/// USB transport primitives used by the shell
pub trait Transport {
    type Iso: IsoDescriptor;

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> Result<(), UsbError>;

    /// Control transfer; direction comes from bit 7 of `request_type`
    fn control_transfer(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Bulk transfer; direction comes from bit 7 of `endpoint`
    fn bulk_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Interrupt transfer; direction comes from bit 7 of `endpoint`
    fn interrupt_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Allocate an isochronous descriptor for `packets` packets
    fn alloc_iso(&mut self, packets: usize) -> Result<Self::Iso, UsbError>;

    /// Submit an isochronous transfer over `buffer`, split into packets of
    /// `packet_size` bytes
    ///
    /// # Safety
    /// `buffer` is accessed by the transport after this call returns. The
    /// caller must keep it alive and untouched until `iso` has delivered its
    /// completion. [`submit_and_wait`] upholds this.
    unsafe fn submit_iso(
        &mut self,
        iso: &mut Self::Iso,
        endpoint: u8,
        buffer: &mut [u8],
        packet_size: usize,
        timeout: Duration,
    ) -> Result<(), UsbError>;

    /// Request cancellation of an in-flight submission
    fn cancel_iso(&mut self, iso: &mut Self::Iso) -> Result<(), UsbError>;

    /// Process pending transport events, blocking for at most `timeout`
    fn handle_events(&mut self, timeout: Duration) -> Result<(), UsbError>;
}

/// Submit an isochronous transfer and block until its completion fires
///
/// The wait is bounded by `timeout + grace`. Past that deadline the
/// submission is cancelled and pumping continues until the cancellation
/// completes, since `buffer` must outlive the transfer.
pub fn submit_and_wait<T: Transport>(
    transport: &mut T,
    iso: &mut T::Iso,
    endpoint: u8,
    buffer: &mut [u8],
    packet_size: usize,
    timeout: Duration,
    grace: Duration,
) -> Result<IsoCompletion, UsbError> {
    // Drop anything left over from a previous use of this descriptor.
    let _ = iso.take_completion();

    // SAFETY: we do not return until the completion for this submission has
    // been taken, and `buffer` stays mutably borrowed for the whole call.
    unsafe { transport.submit_iso(iso, endpoint, buffer, packet_size, timeout)? };

    let deadline = Instant::now() + timeout + grace;
    let mut cancelled = false;

    loop {
        if let Some(completion) = iso.take_completion() {
            trace!(
                "Isochronous completion on {:#x}: {:?}, {} packet(s)",
                endpoint,
                completion.status,
                completion.packets.len()
            );
            return Ok(completion);
        }

        if !cancelled && Instant::now() >= deadline {
            warn!(
                "Isochronous transfer on {:#x} did not complete in time, cancelling",
                endpoint
            );
            if let Err(e) = transport.cancel_iso(iso) {
                debug!("Cancel on {:#x} returned {}", endpoint, e);
            }
            cancelled = true;
        }

        match transport.handle_events(EVENT_POLL_INTERVAL) {
            Ok(()) | Err(UsbError::Interrupted) => {}
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                if !cancelled {
                    let _ = transport.cancel_iso(iso);
                    cancelled = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(packets: &[(usize, i32)]) -> IsoCompletion {
        IsoCompletion {
            status: IsoTransferStatus::Completed,
            start_frame: 0,
            packets: packets
                .iter()
                .map(|&(actual_length, status)| IsoPacket {
                    actual_length,
                    status,
                })
                .collect(),
        }
    }

    #[test]
    fn test_completion_totals() {
        let c = completion(&[(8, 0), (0, -71), (4, 0), (2, -18)]);
        assert_eq!(c.actual_length(), 14);
        assert_eq!(c.error_count(), 2);
        assert_eq!(c.result(), Ok(14));
    }

    #[test]
    fn test_completion_result_status() {
        let mut c = completion(&[(8, 0)]);
        c.status = IsoTransferStatus::Cancelled;
        assert_eq!(c.result(), Err(UsbError::Timeout));
        c.status = IsoTransferStatus::Stall;
        assert_eq!(c.result(), Err(UsbError::Pipe));
    }

    #[test]
    fn test_status_from_raw() {
        assert_eq!(IsoTransferStatus::from_raw(0), IsoTransferStatus::Completed);
        assert_eq!(IsoTransferStatus::from_raw(1), IsoTransferStatus::Error);
        assert_eq!(IsoTransferStatus::from_raw(5), IsoTransferStatus::NoDevice);
        assert_eq!(IsoTransferStatus::from_raw(42), IsoTransferStatus::Error);
    }
}
