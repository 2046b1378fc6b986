//! Multicast reception capability.
//!
//! Some platforms only deliver multicast packets to a process holding an
//! explicit grant. Discovery acquires the grant before browsing and releases
//! it when the run stops. [`HostMulticastLock`] is the implementation for
//! hosts where no grant is needed; it only tracks whether the lock is held.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::discovery::DiscoveryResult;

/// Platform capability to receive multicast traffic.
pub trait MulticastLock: Send + Sync {
    /// Acquires the capability. Fails with [`DiscoveryError::Multicast`](crate::discovery::DiscoveryError::Multicast) when denied.
    fn acquire(&self) -> DiscoveryResult<()>;

    /// Releases the capability. Must only be called while held.
    fn release(&self);

    /// Returns true while the capability is held.
    fn is_held(&self) -> bool;
}

/// Lock for desktop and server hosts, where multicast needs no grant.
#[derive(Debug, Default)]
pub struct HostMulticastLock {
    held: AtomicBool,
}

impl MulticastLock for HostMulticastLock {
    fn acquire(&self) -> DiscoveryResult<()> {
        self.held.store(true, Ordering::SeqCst);
        log::debug!("[Multicast] Lock acquired");
        Ok(())
    }

    fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            log::debug!("[Multicast] Lock released");
        } else {
            log::warn!("[Multicast] Release called without holding the lock");
        }
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}
