// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Live connection record for one device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use crate::event::DeviceAddress;
use crate::transport::DeviceHandle;

use super::device_config::DeviceConfig;

/// One open link to a device, owned by the manager's registry.
///
/// The handle lives inside the link mutex, so every use of the link (reads
/// and notification waits alike) is serialized through it. The in-flight
/// counter starts at zero for every new connection.
pub(crate) struct DeviceConnection<H> {
    /// Configuration the connection was established with.
    pub config: Arc<DeviceConfig>,
    /// Distinguishes this connection from earlier ones to the same address.
    pub generation: u64,
    link: Mutex<H>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl<H: DeviceHandle> DeviceConnection<H> {
    pub fn new(config: Arc<DeviceConfig>, generation: u64, handle: H) -> Self {
        Self {
            config,
            generation,
            link: Mutex::new(handle),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.config.address
    }

    /// Acquires exclusive use of the link.
    pub async fn link(&self) -> MutexGuard<'_, H> {
        self.link.lock().await
    }

    /// Admits one more read unless `limit` reads are already in flight.
    ///
    /// The returned guard releases the slot when dropped.
    pub fn try_admit(&self, limit: usize) -> Option<InFlightGuard<'_>> {
        let previous = self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(&self.in_flight);
        (previous < limit).then_some(guard)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flags the connection as retired. Listeners and queued reads stop
    /// using it once they observe the flag.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Retires the connection and disconnects its handle.
    pub async fn close(&self) {
        self.mark_closed();
        self.link.lock().await.disconnect().await;
    }
}

impl<H> std::fmt::Debug for DeviceConnection<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("address", &self.config.address)
            .field("generation", &self.generation)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Slot in a connection's in-flight read counter.
pub(crate) struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
