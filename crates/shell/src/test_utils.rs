//! Test utilities for usb-shell
//!
//! Provides [`MockTransport`], an in-memory [`Transport`] that records every
//! call and answers with scripted data, so the issuer and interpreter can be
//! exercised without hardware.
//!
//! # Example
//!
//! ```
//! use shell::test_utils::{MockCall, MockTransport};
//! use shell::usb::Transport;
//!
//! let mut transport = MockTransport::new();
//! transport.claim_interface(0).unwrap();
//! assert_eq!(transport.calls(), &[MockCall::Claim(0)]);
//! ```

use crate::usb::transport::{IsoCompletion, IsoDescriptor, IsoPacket, IsoTransferStatus, Transport};
use common::UsbError;
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

/// A call observed by [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Claim(u8),
    Release(u8),
    SetAlt(u8, u8),
    Control {
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: Vec<u8>,
    },
    Bulk {
        endpoint: u8,
        data: Vec<u8>,
    },
    Interrupt {
        endpoint: u8,
        data: Vec<u8>,
    },
    IsoSubmit {
        endpoint: u8,
        data: Vec<u8>,
        packet_size: usize,
    },
    IsoCancel,
}

type CompletionSlot = Rc<RefCell<Option<IsoCompletion>>>;

/// Isochronous descriptor handed out by [`MockTransport`]
#[derive(Debug)]
pub struct MockIso {
    packets: usize,
    completion: CompletionSlot,
}

impl IsoDescriptor for MockIso {
    fn packet_count(&self) -> usize {
        self.packets
    }

    fn take_completion(&mut self) -> Option<IsoCompletion> {
        self.completion.borrow_mut().take()
    }
}

struct InFlight {
    slot: CompletionSlot,
    completion: IsoCompletion,
}

/// In-memory transport with scripted responses
#[derive(Default)]
pub struct MockTransport {
    calls: Vec<MockCall>,
    claimed: BTreeSet<u8>,
    claim_error: Option<UsbError>,
    alt_error: Option<UsbError>,
    transfer_errors: VecDeque<UsbError>,
    in_data: VecDeque<Vec<u8>>,
    iso_packets: Option<Vec<IsoPacket>>,
    iso_submit_error: Option<UsbError>,
    iso_stalls: bool,
    iso_allocations: usize,
    in_flight: Option<InFlight>,
    events_handled: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Interfaces currently claimed
    pub fn claimed(&self) -> Vec<u8> {
        self.claimed.iter().copied().collect()
    }

    /// Fail the next interface claims with `err`
    pub fn fail_claims(&mut self, err: Option<UsbError>) {
        self.claim_error = err;
    }

    /// Fail alternate-setting selection with `err`
    pub fn fail_alt_settings(&mut self, err: Option<UsbError>) {
        self.alt_error = err;
    }

    /// Fail the next synchronous transfer with `err`
    pub fn push_transfer_error(&mut self, err: UsbError) {
        self.transfer_errors.push_back(err);
    }

    /// Bytes the next device-to-host transfer will receive
    pub fn push_in_data(&mut self, data: Vec<u8>) {
        self.in_data.push_back(data);
    }

    /// Per-packet results reported by the next isochronous completions;
    /// by default every packet succeeds at full length
    pub fn set_iso_packets(&mut self, packets: Vec<IsoPacket>) {
        self.iso_packets = Some(packets);
    }

    /// Fail the next isochronous submission with `err`
    pub fn fail_iso_submit(&mut self, err: UsbError) {
        self.iso_submit_error = Some(err);
    }

    /// Never deliver isochronous completions unless cancelled
    pub fn stall_iso(&mut self, stall: bool) {
        self.iso_stalls = stall;
    }

    /// Number of isochronous descriptors allocated
    pub fn iso_allocations(&self) -> usize {
        self.iso_allocations
    }

    /// Number of event-pump calls
    pub fn events_handled(&self) -> usize {
        self.events_handled
    }

    fn sync_transfer(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize, UsbError> {
        if let Some(err) = self.transfer_errors.pop_front() {
            return Err(err);
        }
        if endpoint & 0x80 == 0 {
            return Ok(buf.len());
        }
        let data = self.in_data.pop_front().unwrap_or_default();
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn deliver(&mut self, status: Option<IsoTransferStatus>) {
        if let Some(in_flight) = self.in_flight.take() {
            let mut completion = in_flight.completion;
            if let Some(status) = status {
                completion.status = status;
            }
            *in_flight.slot.borrow_mut() = Some(completion);
        }
    }
}

impl Transport for MockTransport {
    type Iso = MockIso;

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.calls.push(MockCall::Claim(interface));
        if let Some(err) = self.claim_error.clone() {
            return Err(err);
        }
        self.claimed.insert(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.calls.push(MockCall::Release(interface));
        if !self.claimed.remove(&interface) {
            return Err(UsbError::NotFound);
        }
        Ok(())
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> Result<(), UsbError> {
        self.calls.push(MockCall::SetAlt(interface, setting));
        match self.alt_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn control_transfer(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.calls.push(MockCall::Control {
            request_type,
            request,
            value,
            index,
            data: buf.to_vec(),
        });
        self.sync_transfer(request_type, buf)
    }

    fn bulk_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.calls.push(MockCall::Bulk {
            endpoint,
            data: buf.to_vec(),
        });
        self.sync_transfer(endpoint, buf)
    }

    fn interrupt_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.calls.push(MockCall::Interrupt {
            endpoint,
            data: buf.to_vec(),
        });
        self.sync_transfer(endpoint, buf)
    }

    fn alloc_iso(&mut self, packets: usize) -> Result<MockIso, UsbError> {
        self.iso_allocations += 1;
        Ok(MockIso {
            packets,
            completion: Rc::new(RefCell::new(None)),
        })
    }

    unsafe fn submit_iso(
        &mut self,
        iso: &mut MockIso,
        endpoint: u8,
        buffer: &mut [u8],
        packet_size: usize,
        _timeout: Duration,
    ) -> Result<(), UsbError> {
        self.calls.push(MockCall::IsoSubmit {
            endpoint,
            data: buffer.to_vec(),
            packet_size,
        });
        if let Some(err) = self.iso_submit_error.take() {
            return Err(err);
        }

        let packets = self.iso_packets.clone().unwrap_or_else(|| {
            vec![
                IsoPacket {
                    actual_length: packet_size,
                    status: 0,
                };
                iso.packets
            ]
        });

        if endpoint & 0x80 != 0 {
            // device writes each packet's payload at the start of its slot
            for (i, packet) in packets.iter().enumerate() {
                let start = i * packet_size;
                let end = (start + packet.actual_length.min(packet_size)).min(buffer.len());
                if start < end {
                    buffer[start..end].fill((i as u8).wrapping_add(1));
                }
            }
        }

        self.in_flight = Some(InFlight {
            slot: Rc::clone(&iso.completion),
            completion: IsoCompletion {
                status: IsoTransferStatus::Completed,
                start_frame: 0,
                packets,
            },
        });
        Ok(())
    }

    fn cancel_iso(&mut self, _iso: &mut MockIso) -> Result<(), UsbError> {
        self.calls.push(MockCall::IsoCancel);
        if self.in_flight.is_none() {
            return Err(UsbError::NotFound);
        }
        self.deliver(Some(IsoTransferStatus::Cancelled));
        Ok(())
    }

    fn handle_events(&mut self, _timeout: Duration) -> Result<(), UsbError> {
        self.events_handled += 1;
        if !self.iso_stalls {
            self.deliver(None);
        }
        Ok(())
    }
}
