//! Isochronous descriptor ring
//!
//! A small pool of reusable isochronous descriptors, handed out round-robin.
//! A slot keeps its descriptor across calls and only rebuilds it when the
//! requested packet count changes. Reuse saves reallocation; nothing depends
//! on it for correctness.

use crate::usb::transport::{IsoDescriptor, Transport};
use common::UsbError;
use tracing::debug;

/// Default number of ring slots
pub const DEFAULT_RING_LEN: usize = 10;

/// Round-robin pool of isochronous descriptors
pub struct IsoRing<D> {
    slots: Vec<Option<D>>,
    next: usize,
    reallocations: usize,
}

impl<D: IsoDescriptor> IsoRing<D> {
    /// Create a ring of `len` empty slots; descriptors are built on first use
    pub fn new(len: usize) -> Self {
        let len = len.max(1);
        Self {
            slots: (0..len).map(|_| None).collect(),
            next: 0,
            reallocations: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the slot the next call to [`IsoRing::acquire`] will use
    pub fn next_slot(&self) -> usize {
        self.next
    }

    /// How many descriptors have been (re)built so far
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    /// Whether `slot` must be rebuilt to carry `packets` packets
    pub fn needs_realloc(slot: Option<&D>, packets: usize) -> bool {
        slot.is_none_or(|d| d.packet_count() != packets)
    }

    /// Take the next slot's descriptor, sized for `packets` packets, and
    /// advance the ring
    pub fn acquire<T>(&mut self, transport: &mut T, packets: usize) -> Result<&mut D, UsbError>
    where
        T: Transport<Iso = D>,
    {
        let index = self.next;
        let len = self.slots.len();
        let slot = &mut self.slots[index];

        if Self::needs_realloc(slot.as_ref(), packets) {
            let old = slot.take();
            if let Some(old) = old {
                debug!(
                    "Rebuilding isochronous slot {} ({} -> {} packets)",
                    index,
                    old.packet_count(),
                    packets
                );
            }
            *slot = Some(transport.alloc_iso(packets)?);
            self.reallocations += 1;
        }

        self.next = (index + 1) % len;

        slot.as_mut().ok_or(UsbError::NoMem)
    }

    /// Drop every descriptor
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransport;

    #[test]
    fn test_lazy_and_round_robin() {
        let mut transport = MockTransport::new();
        let mut ring = IsoRing::new(3);
        assert_eq!(ring.reallocations(), 0);

        for expected_slot in [0, 1, 2, 0] {
            assert_eq!(ring.next_slot(), expected_slot);
            ring.acquire(&mut transport, 8).unwrap();
        }
        // three slots built once each, the fourth call reused slot 0
        assert_eq!(ring.reallocations(), 3);
        assert_eq!(transport.iso_allocations(), 3);
    }

    #[test]
    fn test_realloc_only_on_shape_change() {
        let mut transport = MockTransport::new();
        let mut ring = IsoRing::new(1);

        ring.acquire(&mut transport, 8).unwrap();
        ring.acquire(&mut transport, 8).unwrap();
        assert_eq!(ring.reallocations(), 1);

        let d = ring.acquire(&mut transport, 4).unwrap();
        assert_eq!(d.packet_count(), 4);
        assert_eq!(ring.reallocations(), 2);
    }

    #[test]
    fn test_zero_length_ring_is_clamped() {
        let ring: IsoRing<crate::test_utils::MockIso> = IsoRing::new(0);
        assert_eq!(ring.len(), 1);
    }
}
