//! Ownership token over the tunnel descriptor
//!
//! The descriptor itself is created and closed by the platform VPN layer. The
//! backend only needs to guarantee that exactly one component uses it while
//! the tunnel is up and that nothing touches it afterwards. [`TunnelHandle`]
//! expresses that: it is not `Clone`, and [`TunnelHandle::release`] consumes it.

use std::os::raw::c_int;
use std::time::Instant;

use crate::error::{Result, TunnelError};

/// Raw descriptor as passed across the boundary
pub type RawDescriptor = c_int;

/// Exclusive handle over the tunnel descriptor
#[derive(Debug)]
pub struct TunnelHandle {
    fd: RawDescriptor,
    acquired_at: Instant,
}

impl TunnelHandle {
    /// Take ownership of `fd`
    pub fn acquire(fd: RawDescriptor) -> Result<Self> {
        if fd < 0 {
            return Err(TunnelError::InvalidDescriptor(fd));
        }
        tracing::debug!("Acquired tunnel descriptor {}", fd);
        Ok(Self {
            fd,
            acquired_at: Instant::now(),
        })
    }

    /// Descriptor owned by this handle
    #[must_use]
    pub fn fd(&self) -> RawDescriptor {
        self.fd
    }

    /// Give the descriptor back
    pub fn release(self) {
        tracing::debug!(
            "Released tunnel descriptor {} after {:?}",
            self.fd,
            self.acquired_at.elapsed()
        );
    }
}
