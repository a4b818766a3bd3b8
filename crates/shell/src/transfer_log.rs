//! Transfer log
//!
//! Append-only record of every transfer issued during the session. Ids are
//! assigned on append and increase by one per entry, so iteration order,
//! insertion order and id order are the same thing.

use crate::arena::Region;
use common::{TransferKind, UsbError};

/// Type-specific parameters of a logged transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferDetails {
    Control {
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
    },
    Interrupt {
        endpoint: u8,
    },
    Bulk {
        endpoint: u8,
    },
    Isochronous {
        endpoint: u8,
        packets: usize,
        packet_size: usize,
        start_frame: u32,
        errors: usize,
    },
}

/// One issued transfer and its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEntry {
    /// Position in the log; assigned by [`TransferLog::append`]
    pub id: u32,
    pub details: TransferDetails,
    /// Arena-owned buffer the transfer read from or wrote into
    pub payload: Region,
    /// Payload size: buffer length, or the received total for isochronous
    pub size: usize,
    /// Byte count reported by the transport, or its error
    pub result: Result<usize, UsbError>,
}

impl TransferEntry {
    /// Build an entry that has not been appended yet
    pub fn new(
        details: TransferDetails,
        payload: Region,
        size: usize,
        result: Result<usize, UsbError>,
    ) -> Self {
        Self {
            id: 0,
            details,
            payload,
            size,
            result,
        }
    }

    pub fn kind(&self) -> TransferKind {
        match self.details {
            TransferDetails::Control { .. } => TransferKind::Control,
            TransferDetails::Interrupt { .. } => TransferKind::Interrupt,
            TransferDetails::Bulk { .. } => TransferKind::Bulk,
            TransferDetails::Isochronous { .. } => TransferKind::Isochronous,
        }
    }

    /// Endpoint address, or the request type for control transfers
    pub fn endpoint_or_request_type(&self) -> u8 {
        match self.details {
            TransferDetails::Control { request_type, .. } => request_type,
            TransferDetails::Interrupt { endpoint }
            | TransferDetails::Bulk { endpoint }
            | TransferDetails::Isochronous { endpoint, .. } => endpoint,
        }
    }

    /// The bytes `save` exports for this entry
    pub fn saved_region(&self) -> Region {
        self.payload.truncated(self.size)
    }
}

/// Append-only, id-ordered transfer log
#[derive(Debug, Default)]
pub struct TransferLog {
    entries: Vec<TransferEntry>,
}

impl TransferLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next appended entry will receive
    pub fn next_id(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Assign the next id to `entry` and add it at the tail
    pub fn append(&mut self, mut entry: TransferEntry) -> &TransferEntry {
        entry.id = self.next_id();
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn get(&self, id: u32) -> Option<&TransferEntry> {
        self.entries.get(id as usize)
    }

    /// Entries in insertion order; every call starts from the first entry
    pub fn iter(&self) -> std::slice::Iter<'_, TransferEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a TransferLog {
    type Item = &'a TransferEntry;
    type IntoIter = std::slice::Iter<'a, TransferEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(endpoint: u8) -> TransferEntry {
        TransferEntry::new(TransferDetails::Bulk { endpoint }, Region::EMPTY, 0, Ok(0))
    }

    #[test]
    fn test_append_assigns_ids() {
        let mut log = TransferLog::new();
        assert_eq!(log.append(bulk(1)).id, 0);
        assert_eq!(log.append(bulk(2)).id, 1);
        assert_eq!(log.next_id(), 2);
        assert_eq!(log.get(1).map(|e| e.endpoint_or_request_type()), Some(2));
    }

    #[test]
    fn test_iteration_is_restartable() {
        let mut log = TransferLog::new();
        for ep in 0..5 {
            log.append(bulk(ep));
        }
        let first: Vec<u32> = log.iter().map(|e| e.id).collect();
        let second: Vec<u32> = (&log).into_iter().map(|e| e.id).collect();
        assert_eq!(first, vec![0, 1, 2, 3, 4]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_kind_and_endpoint() {
        let ctrl = TransferEntry::new(
            TransferDetails::Control {
                request_type: 0x80,
                request: 6,
                value: 0x100,
                index: 0,
            },
            Region::EMPTY,
            0,
            Err(UsbError::Pipe),
        );
        assert_eq!(ctrl.kind(), TransferKind::Control);
        assert_eq!(ctrl.endpoint_or_request_type(), 0x80);
    }
}
