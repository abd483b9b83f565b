//! Socket plumbing shared by the protocol clients.
//!
//! Both transports allow a single outstanding request: a second `send` while
//! one is in flight fails with [ProbeError::SocketBusy] instead of queuing.
mod tcp;
mod udp;

use std::sync::atomic::{AtomicBool, Ordering};

pub use tcp::{FrameValidator, TcpTransport};
pub use udp::{DatagramValidator, UdpTransport};

use crate::error::{ProbeError, Result};

/// The one pending-request slot a transport owns.
#[derive(Debug, Default)]
struct PendingSlot(AtomicBool);

impl PendingSlot {
    /// Claim the slot, or fail if a request already holds it.
    fn acquire(&self) -> Result<PendingGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ProbeError::SocketBusy)?;
        Ok(PendingGuard(&self.0))
    }
}

/// Frees the slot when the request resolves, fails, times out or is dropped.
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
