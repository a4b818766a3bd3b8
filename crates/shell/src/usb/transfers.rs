//! Transfer issuing
//!
//! One handler per transfer type. Each handler resolves its payload, gets
//! a buffer from the session arena, runs the transfer through the transport
//! and appends the outcome to the transfer log.
//!
//! Transport failures are outcomes, not errors: the entry is recorded with
//! the failing result and the handler returns normally. Handlers only return
//! `Err` when no transfer was issued at all (bad arguments, arena
//! exhaustion, interface selection failures).

use crate::arena::{ArenaError, Region};
use crate::payload::{ArgumentError, int_arg, resolve_payload};
use crate::session::Session;
use crate::transfer_log::{TransferDetails, TransferEntry};
use crate::usb::transport::{Transport, submit_and_wait};
use common::UsbError;
use thiserror::Error;
use tracing::{debug, warn};

/// Reasons a transfer command aborts before anything is logged
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error("Cannot allocate transfer buffer: {0}")]
    Arena(#[from] ArenaError),

    #[error("Input file or array required for sending data w/ isochronous transfer")]
    MissingPayload,

    #[error("Failed to claim interface {interface}: {source} ({})", .source.code())]
    Claim { interface: u8, source: UsbError },

    #[error("Failed to set alt setting {alt} on interface {interface}: {source} ({})", .source.code())]
    AltSetting {
        interface: u8,
        alt: u8,
        source: UsbError,
    },

    #[error("Failed to allocate isochronous descriptor: {0}")]
    Descriptor(UsbError),
}

/// Largest data stage a control transfer can carry (`wLength` is 16 bits)
pub const MAX_CONTROL_LENGTH: usize = u16::MAX as usize;

/// Setup fields of a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// Bulk or interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataKind {
    Bulk,
    Interrupt,
}

fn is_in(address: u8) -> bool {
    address & 0x80 != 0
}

impl<T: Transport> Session<T> {
    /// Claim `interface` and select its alternate setting `alt`
    ///
    /// A previously claimed, different interface is released first.
    /// Re-selecting the claimed interface only changes its alt setting. If
    /// the alt setting fails the interface stays claimed.
    pub fn select_interface(&mut self, interface: u8, alt: u8) -> Result<(), IssueError> {
        if self.claimed_interface != Some(interface) {
            if let Some(previous) = self.claimed_interface.take() {
                if let Err(e) = self.transport.release_interface(previous) {
                    warn!("Failed to release interface {}: {}", previous, e);
                }
            }

            self.transport
                .claim_interface(interface)
                .map_err(|source| IssueError::Claim { interface, source })?;
            self.claimed_interface = Some(interface);
        }

        self.transport
            .set_alternate_setting(interface, alt)
            .map_err(|source| IssueError::AltSetting {
                interface,
                alt,
                source,
            })?;

        debug!("Selected interface {} alt setting {}", interface, alt);
        Ok(())
    }

    /// Issue a control transfer
    ///
    /// For device-to-host requests `source[0]` is the byte count to read;
    /// otherwise `source` is a payload file or hex literal.
    pub fn control_transfer<S: AsRef<str>>(
        &mut self,
        setup: ControlSetup,
        source: &[S],
    ) -> Result<&TransferEntry, IssueError> {
        let (region, incoming) =
            self.prepare_buffer(setup.request_type, source, MAX_CONTROL_LENGTH)?;
        let timeout = self.transfer_timeout;

        debug!(
            "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, len={}",
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            region.len()
        );

        let result = self.transport.control_transfer(
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            self.arena.bytes_mut(region),
            timeout,
        );

        let details = TransferDetails::Control {
            request_type: setup.request_type,
            request: setup.request,
            value: setup.value,
            index: setup.index,
        };
        Ok(self.record(details, region, incoming, result))
    }

    /// Issue a bulk transfer on `endpoint`
    pub fn bulk_transfer<S: AsRef<str>>(
        &mut self,
        endpoint: u8,
        source: &[S],
    ) -> Result<&TransferEntry, IssueError> {
        self.data_transfer(DataKind::Bulk, endpoint, source)
    }

    /// Issue an interrupt transfer on `endpoint`
    pub fn interrupt_transfer<S: AsRef<str>>(
        &mut self,
        endpoint: u8,
        source: &[S],
    ) -> Result<&TransferEntry, IssueError> {
        self.data_transfer(DataKind::Interrupt, endpoint, source)
    }

    fn data_transfer<S: AsRef<str>>(
        &mut self,
        kind: DataKind,
        endpoint: u8,
        source: &[S],
    ) -> Result<&TransferEntry, IssueError> {
        let (region, incoming) = self.prepare_buffer(endpoint, source, usize::MAX)?;
        let timeout = self.transfer_timeout;

        debug!(
            "{:?} transfer: endpoint={:#x}, len={}, is_in={}",
            kind,
            endpoint,
            region.len(),
            incoming
        );

        let buf = self.arena.bytes_mut(region);
        let (result, details) = match kind {
            DataKind::Bulk => (
                self.transport.bulk_transfer(endpoint, buf, timeout),
                TransferDetails::Bulk { endpoint },
            ),
            DataKind::Interrupt => (
                self.transport.interrupt_transfer(endpoint, buf, timeout),
                TransferDetails::Interrupt { endpoint },
            ),
        };
        Ok(self.record(details, region, incoming, result))
    }

    /// Issue an isochronous transfer of `packets` packets of `packet_size`
    /// bytes and wait for it to complete
    ///
    /// Host-to-device transfers need a payload; it is truncated or
    /// zero-padded to `packets * packet_size`.
    pub fn isochronous_transfer<S: AsRef<str>>(
        &mut self,
        endpoint: u8,
        packets: usize,
        packet_size: usize,
        source: &[S],
    ) -> Result<&TransferEntry, IssueError> {
        let incoming = is_in(endpoint);
        if !incoming && source.is_empty() {
            return Err(IssueError::MissingPayload);
        }

        let total = packets
            .checked_mul(packet_size)
            .ok_or_else(|| ArgumentError::new("packet size", &packet_size.to_string()))?;
        let region = self.arena.allocate(total)?;

        if !incoming {
            let data = resolve_payload(source, Some(total));
            let buf = self.arena.bytes_mut(region);
            buf[..data.len()].copy_from_slice(&data);
            buf[data.len()..].fill(0);
        }

        let iso = self
            .ring
            .acquire(&mut self.transport, packets)
            .map_err(IssueError::Descriptor)?;

        debug!(
            "Isochronous transfer: endpoint={:#x}, packets={}, packet_size={}, total={}",
            endpoint, packets, packet_size, total
        );

        let outcome = submit_and_wait(
            &mut self.transport,
            iso,
            endpoint,
            self.arena.bytes_mut(region),
            packet_size,
            self.transfer_timeout,
            self.completion_grace,
        );

        let (size, errors, start_frame, result) = match outcome {
            Ok(completion) => {
                let size = completion.actual_length();
                if incoming {
                    compact_packets(
                        self.arena.bytes_mut(region),
                        packet_size,
                        completion.packets.iter().map(|p| p.actual_length),
                    );
                }
                (
                    size,
                    completion.error_count(),
                    completion.start_frame,
                    completion.result(),
                )
            }
            Err(e) => {
                warn!(
                    "Isochronous submission on {:#x} failed: {} ({})",
                    endpoint,
                    e,
                    e.code()
                );
                (if incoming { 0 } else { total }, 0, 0, Err(e))
            }
        };

        let details = TransferDetails::Isochronous {
            endpoint,
            packets,
            packet_size,
            start_frame,
            errors,
        };
        Ok(self
            .log
            .append(TransferEntry::new(details, region, size, result)))
    }

    /// Resolve the payload source into an arena buffer
    ///
    /// Returns the buffer and whether the transfer is device-to-host.
    fn prepare_buffer<S: AsRef<str>>(
        &mut self,
        address: u8,
        source: &[S],
        max_len: usize,
    ) -> Result<(Region, bool), IssueError> {
        if is_in(address) {
            let length = match source.first() {
                Some(arg) => int_arg::<usize>("length", arg.as_ref())?,
                None => 0,
            };
            if length > max_len {
                return Err(ArgumentError::new("length", &length.to_string()).into());
            }
            return Ok((self.store_zeroed(length)?, true));
        }

        let data = resolve_payload(source, None);
        if data.len() > max_len {
            return Err(ArgumentError::new("payload length", &data.len().to_string()).into());
        }
        let region = if data.is_empty() {
            Region::EMPTY
        } else {
            self.arena.allocate_from(&data)?
        };
        Ok((region, false))
    }

    fn store_zeroed(&mut self, length: usize) -> Result<Region, ArenaError> {
        if length == 0 {
            return Ok(Region::EMPTY);
        }
        self.arena.allocate(length)
    }

    /// Append the outcome of a synchronous transfer
    ///
    /// Device-to-host entries keep only the bytes actually received.
    fn record(
        &mut self,
        details: TransferDetails,
        region: Region,
        incoming: bool,
        result: Result<usize, UsbError>,
    ) -> &TransferEntry {
        let size = match (&result, incoming) {
            (Ok(n), true) => (*n).min(region.len()),
            (Err(_), true) => 0,
            (_, false) => region.len(),
        };

        match &result {
            Ok(n) => debug!("Transfer succeeded: {} bytes", n),
            Err(e) => warn!("Transfer failed: {} ({})", e, e.code()),
        }

        self.log
            .append(TransferEntry::new(details, region, size, result))
    }
}

/// Move each packet's received bytes to the front of the buffer, in order
fn compact_packets(buf: &mut [u8], packet_size: usize, lengths: impl Iterator<Item = usize>) {
    let mut write = 0;
    for (i, length) in lengths.enumerate() {
        let start = i * packet_size;
        let length = length.min(packet_size).min(buf.len().saturating_sub(start));
        if length > 0 && start != write {
            buf.copy_within(start..start + length, write);
        }
        write += length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionSettings;
    use crate::test_utils::{MockCall, MockTransport};
    use crate::usb::transport::IsoPacket;
    use common::TransferKind;
    use std::time::Duration;

    fn session() -> Session<MockTransport> {
        Session::new(MockTransport::new(), &SessionSettings::default())
    }

    fn setup(request_type: u8) -> ControlSetup {
        ControlSetup {
            request_type,
            request: 6,
            value: 0x100,
            index: 0,
        }
    }

    #[test]
    fn test_control_length_limited_to_wlength() {
        let mut s = session();
        let err = s.control_transfer(setup(0x80), &["0x10000"]).unwrap_err();
        assert_eq!(
            err,
            IssueError::Argument(ArgumentError::new("length", "65536"))
        );
        assert!(s.transport().calls().is_empty());
        assert!(s.log().is_empty());
        assert_eq!(s.arena().allocated_bytes(), 0);

        s.control_transfer(setup(0x80), &["0xffff"]).unwrap();
        assert_eq!(s.log().get(0).unwrap().payload.len(), 0xffff);
    }

    #[test]
    fn test_select_same_interface_only_changes_alt() {
        let mut s = session();
        s.select_interface(1, 0).unwrap();
        s.select_interface(1, 2).unwrap();
        assert_eq!(
            s.transport().calls(),
            &[MockCall::Claim(1), MockCall::SetAlt(1, 0), MockCall::SetAlt(1, 2)]
        );
    }

    #[test]
    fn test_select_other_interface_releases_first() {
        let mut s = session();
        s.select_interface(1, 0).unwrap();
        s.transport_mut().clear_calls();
        s.select_interface(3, 1).unwrap();
        assert_eq!(
            s.transport().calls(),
            &[MockCall::Release(1), MockCall::Claim(3), MockCall::SetAlt(3, 1)]
        );
        assert_eq!(s.claimed_interface(), Some(3));
    }

    #[test]
    fn test_alt_failure_keeps_interface_claimed() {
        let mut s = session();
        s.transport_mut().fail_alt_settings(Some(UsbError::NotFound));
        let err = s.select_interface(2, 5).unwrap_err();
        assert!(matches!(err, IssueError::AltSetting { interface: 2, alt: 5, .. }));
        assert_eq!(s.claimed_interface(), Some(2));
        assert_eq!(s.transport().claimed(), vec![2]);
    }

    #[test]
    fn test_claim_failure_reports_transport_text() {
        let mut s = session();
        s.transport_mut().fail_claims(Some(UsbError::Busy));
        let err = s.select_interface(0, 0).unwrap_err();
        assert_eq!(err.to_string(), "Failed to claim interface 0: Resource busy (-6)");
        assert_eq!(s.claimed_interface(), None);
    }

    #[test]
    fn test_control_in_reads_requested_length() {
        let mut s = session();
        s.transport_mut().push_in_data(vec![0x12, 0x01, 0x00, 0x02]);
        let entry = s.control_transfer(setup(0x80), &["18"]).unwrap().clone();

        assert_eq!(entry.id, 0);
        assert_eq!(entry.result, Ok(4));
        assert_eq!(entry.size, 4);
        assert_eq!(entry.payload.len(), 18);
        assert_eq!(s.arena().bytes(entry.saved_region()), &[0x12, 0x01, 0x00, 0x02]);
    }

    #[test]
    fn test_control_out_uses_hex_literal() {
        let mut s = session();
        let entry = s
            .control_transfer(setup(0x40), &["81 00 51 01"])
            .unwrap()
            .clone();
        assert_eq!(entry.size, 4);
        assert!(matches!(
            &s.transport().calls()[0],
            MockCall::Control { data, .. } if data == &[0x81, 0x00, 0x51, 0x01]
        ));
    }

    #[test]
    fn test_control_out_without_data_skips_arena() {
        let mut s = session();
        let entry = s
            .control_transfer::<&str>(setup(0x00), &[])
            .unwrap()
            .clone();
        assert_eq!(entry.size, 0);
        assert_eq!(s.arena().block_count(), 0);
    }

    #[test]
    fn test_failed_transfer_is_recorded() {
        let mut s = session();
        s.transport_mut().push_transfer_error(UsbError::Pipe);
        let entry = s.bulk_transfer(0x81, &["64"]).unwrap().clone();
        assert_eq!(entry.result, Err(UsbError::Pipe));
        assert_eq!(entry.size, 0);
        assert_eq!(s.log().len(), 1);
    }

    #[test]
    fn test_oversized_buffer_aborts_without_entry() {
        let mut s = Session::new(
            MockTransport::new(),
            &SessionSettings {
                block_size: 16,
                ..SessionSettings::default()
            },
        );
        let err = s.interrupt_transfer(0x81, &["17"]).unwrap_err();
        assert!(matches!(err, IssueError::Arena(ArenaError::TooLarge { .. })));
        assert!(s.log().is_empty());
        assert!(s.transport().calls().is_empty());
    }

    #[test]
    fn test_bad_length_aborts() {
        let mut s = session();
        assert!(matches!(
            s.bulk_transfer(0x82, &["lots"]),
            Err(IssueError::Argument(_))
        ));
        assert!(s.log().is_empty());
    }

    #[test]
    fn test_iso_in_sums_packets() {
        let mut s = session();
        s.transport_mut().set_iso_packets(vec![
            IsoPacket { actual_length: 8, status: 0 },
            IsoPacket { actual_length: 0, status: -71 },
            IsoPacket { actual_length: 3, status: 0 },
        ]);
        let entry = s.isochronous_transfer::<&str>(0x82, 3, 8, &[]).unwrap().clone();

        assert_eq!(entry.kind(), TransferKind::Isochronous);
        assert_eq!(entry.payload.len(), 24);
        assert_eq!(entry.size, 11);
        assert_eq!(entry.result, Ok(11));
        assert!(matches!(entry.details, TransferDetails::Isochronous { errors: 1, .. }));
        // packet 0 filled with 1s, packet 2 with 3s, compacted
        let mut expected = vec![1u8; 8];
        expected.extend([3u8; 3]);
        assert_eq!(s.arena().bytes(entry.saved_region()), expected.as_slice());
    }

    #[test]
    fn test_iso_out_requires_payload() {
        let mut s = session();
        assert_eq!(
            s.isochronous_transfer::<&str>(0x02, 2, 4, &[]).unwrap_err(),
            IssueError::MissingPayload
        );
        assert!(s.log().is_empty());
    }

    #[test]
    fn test_iso_out_pads_and_truncates() {
        let mut s = session();
        s.isochronous_transfer(0x02, 2, 4, &["aabb"]).unwrap();
        s.isochronous_transfer(0x02, 1, 2, &["01020304"]).unwrap();

        let sent: Vec<Vec<u8>> = s
            .transport()
            .calls()
            .iter()
            .filter_map(|c| match c {
                MockCall::IsoSubmit { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![vec![0xaa, 0xbb, 0, 0, 0, 0, 0, 0], vec![0x01, 0x02]]);
    }

    #[test]
    fn test_iso_submission_failure_is_recorded() {
        let mut s = session();
        s.transport_mut().fail_iso_submit(UsbError::NoDevice);
        let entry = s.isochronous_transfer::<&str>(0x81, 4, 4, &[]).unwrap().clone();
        assert_eq!(entry.result, Err(UsbError::NoDevice));
        assert_eq!(entry.size, 0);
    }

    #[test]
    fn test_iso_in_with_many_packets() {
        let mut s = session();
        let entry = s.isochronous_transfer::<&str>(0x81, 300, 1, &[]).unwrap().clone();

        assert_eq!(entry.result, Ok(300));
        assert_eq!(entry.size, 300);
        let data = s.arena().bytes(entry.saved_region());
        assert_eq!(data[0], 1);
        assert_eq!(data[254], 255);
        assert_eq!(data[255], 0);
        assert_eq!(data[299], 44);
    }

    #[test]
    fn test_iso_stalled_completion_is_cancelled() {
        let mut s = Session::new(
            MockTransport::new(),
            &SessionSettings {
                transfer_timeout: Duration::ZERO,
                completion_grace: Duration::ZERO,
                ..SessionSettings::default()
            },
        );
        s.transport_mut().stall_iso(true);
        let entry = s.isochronous_transfer::<&str>(0x81, 2, 4, &[]).unwrap().clone();
        assert_eq!(entry.result, Err(UsbError::Timeout));
        assert!(s.transport().calls().contains(&MockCall::IsoCancel));
    }

    #[test]
    fn test_iso_reuses_ring_slot_descriptors() {
        let mut s = Session::new(
            MockTransport::new(),
            &SessionSettings {
                ring_len: 2,
                ..SessionSettings::default()
            },
        );
        for _ in 0..4 {
            s.isochronous_transfer::<&str>(0x81, 4, 8, &[]).unwrap();
        }
        assert_eq!(s.transport().iso_allocations(), 2);
        s.isochronous_transfer::<&str>(0x81, 5, 8, &[]).unwrap();
        assert_eq!(s.transport().iso_allocations(), 3);
    }

    #[test]
    fn test_ids_span_all_types() {
        let mut s = session();
        s.control_transfer(setup(0x80), &["2"]).unwrap();
        s.transport_mut().push_transfer_error(UsbError::Timeout);
        s.interrupt_transfer(0x81, &["8"]).unwrap();
        s.bulk_transfer(0x02, &["ff"]).unwrap();
        s.isochronous_transfer::<&str>(0x83, 1, 8, &[]).unwrap();
        let ids: Vec<u32> = s.log().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_compact_packets() {
        let mut buf = [1, 1, 0, 0, 2, 0, 0, 0, 3, 3, 3, 0];
        compact_packets(&mut buf, 4, [2, 1, 3].into_iter());
        assert_eq!(&buf[..6], &[1, 1, 2, 3, 3, 3]);
    }
}

/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use crate::session::SessionSettings;
    use crate::test_utils::MockTransport;
    use crate::usb::transport::IsoPacket;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn iso_totals_match_packet_reports(
            reports in proptest::collection::vec((0usize..=16, -5i32..=2), 1..24)
        ) {
            let mut s = Session::new(MockTransport::new(), &SessionSettings::default());
            let packets: Vec<IsoPacket> = reports
                .iter()
                .map(|&(actual_length, status)| IsoPacket { actual_length, status })
                .collect();
            s.transport_mut().set_iso_packets(packets);

            let entry = s
                .isochronous_transfer::<&str>(0x81, reports.len(), 16, &[])
                .unwrap()
                .clone();

            let expected_size: usize = reports.iter().map(|r| r.0).sum();
            let expected_errors = reports.iter().filter(|r| r.1 != 0).count();
            prop_assert_eq!(entry.payload.len(), reports.len() * 16);
            prop_assert_eq!(entry.size, expected_size);
            let is_expected_errors = matches!(
                entry.details,
                TransferDetails::Isochronous { errors, .. } if errors == expected_errors
            );
            prop_assert!(is_expected_errors);
        }
    }
}
