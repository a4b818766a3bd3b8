//! libusb-backed transport
//!
//! [`UsbDevice`] wraps an open `rusb` device handle and implements
//! [`Transport`] on it. Control, bulk and interrupt transfers use rusb's safe
//! API; isochronous transfers are not exposed there, so [`LibusbIsoTransfer`]
//! drives them through `rusb::ffi`.

use crate::usb::transport::{IsoCompletion, IsoDescriptor, IsoPacket, IsoTransferStatus, Transport};
use common::UsbError;
use rusb::{Context, DeviceHandle, UsbContext, ffi};
use std::ffi::c_void;
use std::os::raw::{c_int, c_uint};
use std::ptr::NonNull;
use std::time::Duration;
use tracing::{debug, warn};

/// An opened USB device
pub struct UsbDevice {
    context: Context,
    handle: DeviceHandle<Context>,
    vendor_id: u16,
    product_id: u16,
}

impl UsbDevice {
    /// Open the first device matching `vendor_id:product_id`
    ///
    /// Kernel drivers are detached automatically when interfaces are claimed,
    /// where the platform supports it.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;

        let handle = context
            .open_device_with_vid_pid(vendor_id, product_id)
            .ok_or(UsbError::NotFound)?;

        match handle.set_auto_detach_kernel_driver(true) {
            Ok(()) => debug!("Auto-detach of kernel drivers enabled"),
            Err(e) => debug!("Auto-detach of kernel drivers unavailable: {}", e),
        }

        debug!("Opened device {:04x}:{:04x}", vendor_id, product_id);

        Ok(Self {
            context,
            handle,
            vendor_id,
            product_id,
        })
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }
}

impl Transport for UsbDevice {
    type Iso = LibusbIsoTransfer;

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .claim_interface(interface)
            .map_err(map_rusb_error)?;
        debug!("Claimed interface {}", interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .release_interface(interface)
            .map_err(map_rusb_error)?;
        debug!("Released interface {}", interface);
        Ok(())
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> Result<(), UsbError> {
        self.handle
            .set_alternate_setting(interface, setting)
            .map_err(map_rusb_error)
    }

    fn control_transfer(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        let result = if request_type & 0x80 != 0 {
            self.handle
                .read_control(request_type, request, value, index, buf, timeout)
        } else {
            self.handle
                .write_control(request_type, request, value, index, buf, timeout)
        };
        result.map_err(map_rusb_error)
    }

    fn bulk_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        let result = if endpoint & 0x80 != 0 {
            self.handle.read_bulk(endpoint, buf, timeout)
        } else {
            self.handle.write_bulk(endpoint, buf, timeout)
        };
        result.map_err(map_rusb_error)
    }

    fn interrupt_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        let result = if endpoint & 0x80 != 0 {
            self.handle.read_interrupt(endpoint, buf, timeout)
        } else {
            self.handle.write_interrupt(endpoint, buf, timeout)
        };
        result.map_err(map_rusb_error)
    }

    fn alloc_iso(&mut self, packets: usize) -> Result<LibusbIsoTransfer, UsbError> {
        LibusbIsoTransfer::new(packets)
    }

    unsafe fn submit_iso(
        &mut self,
        iso: &mut LibusbIsoTransfer,
        endpoint: u8,
        buffer: &mut [u8],
        packet_size: usize,
        timeout: Duration,
    ) -> Result<(), UsbError> {
        let length = c_int::try_from(buffer.len()).map_err(|_| UsbError::InvalidParam)?;
        let packet_length = c_uint::try_from(packet_size).map_err(|_| UsbError::InvalidParam)?;
        let timeout_ms = c_uint::try_from(timeout.as_millis()).unwrap_or(c_uint::MAX);

        let raw = iso.raw.as_ptr();
        iso.state.done = false;
        let user_data = &mut *iso.state as *mut CompletionState as *mut c_void;

        // SAFETY: `raw` was allocated with `iso.packets` packet descriptors
        // and is not in flight; the caller keeps `buffer` alive until the
        // completion fires.
        let res = unsafe {
            ffi::libusb_fill_iso_transfer(
                raw,
                self.handle.as_raw(),
                endpoint,
                buffer.as_mut_ptr(),
                length,
                iso.packets as c_int,
                iso_transfer_cb,
                user_data,
                timeout_ms,
            );
            ffi::libusb_set_iso_packet_lengths(raw, packet_length);
            ffi::libusb_submit_transfer(raw)
        };

        if res < 0 {
            return Err(UsbError::from_code(res));
        }
        iso.in_flight = true;
        Ok(())
    }

    fn cancel_iso(&mut self, iso: &mut LibusbIsoTransfer) -> Result<(), UsbError> {
        // SAFETY: `raw` is a live transfer owned by `iso`.
        let res = unsafe { ffi::libusb_cancel_transfer(iso.raw.as_ptr()) };
        if res < 0 {
            return Err(UsbError::from_code(res));
        }
        Ok(())
    }

    fn handle_events(&mut self, timeout: Duration) -> Result<(), UsbError> {
        self.context
            .handle_events(Some(timeout))
            .map_err(map_rusb_error)
    }
}

/// Set by the completion callback
struct CompletionState {
    done: bool,
}

extern "system" fn iso_transfer_cb(transfer: *mut ffi::libusb_transfer) {
    // SAFETY: libusb hands back the transfer we filled, whose user data
    // points at the boxed `CompletionState` of its owning descriptor.
    unsafe {
        let state = (*transfer).user_data as *mut CompletionState;
        if let Some(state) = state.as_mut() {
            state.done = true;
        }
    }
}

/// An isochronous `libusb_transfer` with a fixed packet count
pub struct LibusbIsoTransfer {
    raw: NonNull<ffi::libusb_transfer>,
    packets: usize,
    state: Box<CompletionState>,
    in_flight: bool,
}

impl LibusbIsoTransfer {
    fn new(packets: usize) -> Result<Self, UsbError> {
        let count = c_int::try_from(packets).map_err(|_| UsbError::InvalidParam)?;
        // SAFETY: plain allocation; ownership is taken by `Self` and released
        // in `Drop`.
        let raw = unsafe { ffi::libusb_alloc_transfer(count) };
        let raw = NonNull::new(raw).ok_or(UsbError::NoMem)?;

        Ok(Self {
            raw,
            packets,
            state: Box::new(CompletionState { done: false }),
            in_flight: false,
        })
    }
}

impl IsoDescriptor for LibusbIsoTransfer {
    fn packet_count(&self) -> usize {
        self.packets
    }

    fn take_completion(&mut self) -> Option<IsoCompletion> {
        if !self.state.done {
            return None;
        }
        self.state.done = false;
        self.in_flight = false;

        // SAFETY: the transfer has completed, so libusb no longer writes to
        // it; it was allocated with `self.packets` packet descriptors.
        let completion = unsafe {
            let raw = self.raw.as_ptr();
            let descriptors = std::slice::from_raw_parts(
                (*raw).iso_packet_desc.as_ptr(),
                self.packets,
            );
            IsoCompletion {
                status: IsoTransferStatus::from_raw((*raw).status as i32),
                start_frame: 0,
                packets: descriptors
                    .iter()
                    .map(|d| IsoPacket {
                        actual_length: d.actual_length as usize,
                        status: d.status as i32,
                    })
                    .collect(),
            }
        };
        Some(completion)
    }
}

impl Drop for LibusbIsoTransfer {
    fn drop(&mut self) {
        if self.in_flight {
            // Freeing an in-flight transfer is undefined behaviour in libusb;
            // leaking it is the only sound option.
            warn!("Leaking isochronous transfer that never completed");
            return;
        }
        // SAFETY: not in flight, and owned exclusively by `self`.
        unsafe { ffi::libusb_free_transfer(self.raw.as_ptr()) };
    }
}

/// Map rusb::Error to the shell's UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::Interrupted => UsbError::Interrupted,
        rusb::Error::NoMem => UsbError::NoMem,
        rusb::Error::NotSupported => UsbError::NotSupported,
        _ => UsbError::Other {
            code: -99,
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::NotFound), UsbError::NotFound);
        assert_eq!(map_rusb_error(rusb::Error::Other).code(), -99);
    }

    #[test]
    fn test_mapped_codes_match_libusb() {
        for err in [
            rusb::Error::Io,
            rusb::Error::Access,
            rusb::Error::Busy,
            rusb::Error::Overflow,
            rusb::Error::NotSupported,
        ] {
            let mapped = map_rusb_error(err);
            assert_eq!(UsbError::from_code(mapped.code()), mapped);
        }
    }
}
