//! Port allocation by bounded linear probe
//!
//! Candidates are `port, port + step, port + 2*step, ...` while the candidate
//! stays at or below `max_port` and the attempt number stays at or below
//! `retries`. The probe is deterministic for a given occupancy state.
//!
//! Occupancy checks are advisory: a foreign process may still grab a port
//! between the check and its use. Within one run, [`PortAllocator`] keeps a
//! reservation set so two engines never receive the same port.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use simfleet_core::prelude::*;
use simfleet_core::PortRange;

/// Occupancy check for a single port
pub trait PortProbe: Send + Sync {
    fn is_bound(&self, port: u16) -> bool;
}

/// Probes by trying to bind the port on the loopback interface
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPortProbe;

impl PortProbe for LocalPortProbe {
    fn is_bound(&self, port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_err()
    }
}

/// Iterate over `(attempt, port)` candidates of a range
pub fn candidates(range: &PortRange) -> impl Iterator<Item = (u32, u16)> {
    let PortRange {
        port,
        max_port,
        step,
        retries,
    } = *range;

    (0..=retries)
        .map(move |attempt| (attempt, port as u64 + attempt as u64 * step as u64))
        .take_while(move |(_, candidate)| step > 0 && *candidate <= max_port as u64)
        .map(|(attempt, candidate)| (attempt, candidate as u16))
}

/// Find the first free port in `range`.
///
/// Fails with `PortUnavailable` when every candidate is occupied.
pub fn find_available_port(range: &PortRange, probe: &dyn PortProbe) -> Result<u16> {
    let mut attempts = 0;
    for (_, candidate) in candidates(range) {
        attempts += 1;
        if !probe.is_bound(candidate) {
            debug!("Port {} is available", candidate);
            return Ok(candidate);
        }
        trace!("Port {} is occupied", candidate);
    }

    Err(exhausted(range, attempts))
}

fn exhausted(range: &PortRange, attempts: u32) -> Error {
    Error::PortUnavailable {
        port: range.port,
        max_port: range.max_port,
        attempts,
    }
}

// ─────────────────────────────────────────────────────────────────
// Allocator
// ─────────────────────────────────────────────────────────────────

/// Hands out ports as leases, tracking which ones this process reserved
pub struct PortAllocator {
    probe: Box<dyn PortProbe>,
    probe_delay: Duration,
    reserved: Arc<Mutex<HashSet<u16>>>,
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("probe_delay", &self.probe_delay)
            .field("reserved", &self.reserved_ports())
            .finish()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(LocalPortProbe)
    }
}

impl PortAllocator {
    pub fn new(probe: impl PortProbe + 'static) -> Self {
        Self {
            probe: Box::new(probe),
            probe_delay: Duration::ZERO,
            reserved: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Fixed delay between probing two occupied candidates
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    /// Reserve the first free port of `range`.
    ///
    /// Ports already leased by this allocator count as occupied.
    pub async fn acquire(&self, range: &PortRange) -> Result<PortLease> {
        range.validate()?;

        let mut attempts = 0;
        for (attempt, candidate) in candidates(range) {
            if attempt > 0 && !self.probe_delay.is_zero() {
                tokio::time::sleep(self.probe_delay).await;
            }
            attempts += 1;

            if self.try_reserve(candidate) {
                info!("Reserved port {} (attempt {})", candidate, attempt + 1);
                return Ok(PortLease {
                    port: candidate,
                    reserved: Some(Arc::clone(&self.reserved)),
                });
            }
            trace!("Port {} is occupied", candidate);
        }

        warn!(
            "No free port in {}..={} after {} attempts",
            range.port, range.max_port, attempts
        );
        Err(exhausted(range, attempts))
    }

    fn try_reserve(&self, port: u16) -> bool {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        if reserved.contains(&port) || self.probe.is_bound(port) {
            return false;
        }
        reserved.insert(port);
        true
    }

    /// Ports currently leased, in ascending order
    pub fn reserved_ports(&self) -> Vec<u16> {
        let reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        let mut ports: Vec<u16> = reserved.iter().copied().collect();
        ports.sort_unstable();
        ports
    }
}

/// A reserved port. The reservation is released on drop.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    reserved: Option<Arc<Mutex<HashSet<u16>>>>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Release the reservation now
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(reserved) = self.reserved.take() {
            let mut reserved = reserved.lock().unwrap_or_else(|e| e.into_inner());
            reserved.remove(&self.port);
            debug!("Released port {}", self.port);
        }
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}
