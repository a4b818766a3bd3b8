//! Session state
//!
//! Everything a shell session mutates lives in one [`Session`]: the
//! transport, the arena that owns every payload, the transfer log, the
//! isochronous descriptor ring and the currently claimed interface. It is
//! built at session start, handed by reference to every command, and torn
//! down once at the end.

use crate::arena::{Arena, DEFAULT_BLOCK_SIZE};
use crate::transfer_log::TransferLog;
use crate::usb::iso::{DEFAULT_RING_LEN, IsoRing};
use crate::usb::transport::Transport;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for synchronous transfers and isochronous submissions
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default slack added to the isochronous timeout before cancelling
pub const DEFAULT_COMPLETION_GRACE: Duration = Duration::from_millis(1000);

/// Tunables a session is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub block_size: usize,
    pub ring_len: usize,
    pub transfer_timeout: Duration,
    pub completion_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            ring_len: DEFAULT_RING_LEN,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            completion_grace: DEFAULT_COMPLETION_GRACE,
        }
    }
}

/// State of one shell session against one device
pub struct Session<T: Transport> {
    pub(crate) transport: T,
    pub(crate) arena: Arena,
    pub(crate) log: TransferLog,
    pub(crate) ring: IsoRing<T::Iso>,
    pub(crate) claimed_interface: Option<u8>,
    pub(crate) transfer_timeout: Duration,
    pub(crate) completion_grace: Duration,
    closed: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, settings: &SessionSettings) -> Self {
        debug!(
            "Starting session: block size {:#x}, {} isochronous slot(s), timeout {:?}",
            settings.block_size, settings.ring_len, settings.transfer_timeout
        );
        Self {
            transport,
            arena: Arena::new(settings.block_size),
            log: TransferLog::new(),
            ring: IsoRing::new(settings.ring_len),
            claimed_interface: None,
            transfer_timeout: settings.transfer_timeout,
            completion_grace: settings.completion_grace,
            closed: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn log(&self) -> &TransferLog {
        &self.log
    }

    pub fn ring(&self) -> &IsoRing<T::Iso> {
        &self.ring
    }

    /// Interface claimed by the last successful `select`, if any
    pub fn claimed_interface(&self) -> Option<u8> {
        self.claimed_interface
    }

    /// Release the claimed interface and every session-owned buffer
    ///
    /// Runs once; later calls (including the one from `Drop`) do nothing.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.ring.clear();

        if let Some(interface) = self.claimed_interface.take() {
            if let Err(e) = self.transport.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
        }

        info!(
            "Session closed after {} transfer(s) ({} payload bytes in {} block(s))",
            self.log.len(),
            self.arena.allocated_bytes(),
            self.arena.block_count()
        );
        self.arena.destroy_all();
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockCall, MockTransport};

    #[test]
    fn test_shutdown_releases_claimed_interface_once() {
        let mut session = Session::new(MockTransport::new(), &SessionSettings::default());
        session.select_interface(2, 0).unwrap();
        session.shutdown();
        session.shutdown();

        let releases = session
            .transport()
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Release(2)))
            .count();
        assert_eq!(releases, 1);
        assert!(session.claimed_interface().is_none());
    }

    #[test]
    fn test_default_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.block_size, 0x30000);
        assert_eq!(settings.ring_len, 10);
        assert_eq!(settings.transfer_timeout, Duration::from_millis(1000));
    }
}
