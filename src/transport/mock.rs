// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted in-memory transport for tests and demos.
//!
//! [`MockTransport`] behaves like a radio on which every address is
//! reachable. Failures, delays and notifications are scripted per address,
//! and the transport records what the manager did so tests can assert on
//! it: connect attempts, live handles and how many link operations ran at
//! the same time.
//!
//! # Examples
//!
//! ```
//! use tagfleet::DeviceAddress;
//! use tagfleet::transport::mock::MockTransport;
//!
//! let transport = MockTransport::new();
//! let address = DeviceAddress::new("12:34:56:78:12:34").unwrap();
//!
//! // The next two connection attempts fail, the third succeeds
//! transport.fail_connects(&address, 2);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::capabilities::Capability;
use crate::error::TransportError;
use crate::event::{DeviceAddress, Notification};

use super::{DeviceHandle, NotificationHandler, Transport};

/// Script and counters for one address.
#[derive(Debug, Default)]
struct MockDevice {
    connect_failures: u32,
    enable_failures: u32,
    read_failures: u32,
    notification_failures: u32,
    notifications: VecDeque<Notification>,
    values: HashMap<Capability, Vec<f64>>,
    connect_attempts: u32,
    live_handles: usize,
    max_live_handles: usize,
    link_active: usize,
    max_link_active: usize,
    reads: u32,
    enabled: Vec<Capability>,
}

#[derive(Debug, Default)]
struct MockState {
    devices: Mutex<HashMap<DeviceAddress, MockDevice>>,
    read_delay: Mutex<Duration>,
}

impl MockState {
    fn with_device<R>(&self, address: &DeviceAddress, f: impl FnOnce(&mut MockDevice) -> R) -> R {
        let mut devices = self.devices.lock();
        f(devices.entry(address.clone()).or_default())
    }
}

/// Decrements the active-link counter when a link operation ends.
struct LinkOp<'a> {
    state: &'a MockState,
    address: &'a DeviceAddress,
}

impl<'a> LinkOp<'a> {
    fn enter(state: &'a MockState, address: &'a DeviceAddress) -> Self {
        state.with_device(address, |dev| {
            dev.link_active += 1;
            dev.max_link_active = dev.max_link_active.max(dev.link_active);
        });
        Self { state, address }
    }
}

impl Drop for LinkOp<'_> {
    fn drop(&mut self) {
        self.state.with_device(self.address, |dev| dev.link_active -= 1);
    }
}

/// Consumes one scripted failure, returning true if the call should fail.
fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

/// In-memory [`Transport`] with scripted behavior.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// Creates a transport on which every device is reachable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long every capability read takes.
    #[must_use]
    pub fn with_read_delay(self, delay: Duration) -> Self {
        *self.state.read_delay.lock() = delay;
        self
    }

    /// Makes the next `count` connection attempts to `address` fail.
    pub fn fail_connects(&self, address: &DeviceAddress, count: u32) {
        self.state
            .with_device(address, |dev| dev.connect_failures = count);
    }

    /// Makes the next `count` capability enables on `address` fail.
    pub fn fail_enables(&self, address: &DeviceAddress, count: u32) {
        self.state
            .with_device(address, |dev| dev.enable_failures = count);
    }

    /// Makes the next `count` capability reads on `address` fail.
    pub fn fail_reads(&self, address: &DeviceAddress, count: u32) {
        self.state.with_device(address, |dev| dev.read_failures = count);
    }

    /// Makes the next `count` notification waits on `address` fail.
    pub fn fail_notification_waits(&self, address: &DeviceAddress, count: u32) {
        self.state
            .with_device(address, |dev| dev.notification_failures = count);
    }

    /// Queues a notification to be delivered by the next wait on `address`.
    pub fn push_notification(&self, address: &DeviceAddress, notification: Notification) {
        self.state
            .with_device(address, |dev| dev.notifications.push_back(notification));
    }

    /// Sets the raw values returned when `capability` is read on `address`.
    ///
    /// Unset capabilities return `1.0, 2.0, …` for each declared field.
    pub fn set_values(&self, address: &DeviceAddress, capability: Capability, values: Vec<f64>) {
        self.state.with_device(address, |dev| {
            dev.values.insert(capability, values);
        });
    }

    /// Number of connection attempts made to `address`, failed ones included.
    #[must_use]
    pub fn connect_attempts(&self, address: &DeviceAddress) -> u32 {
        self.state.with_device(address, |dev| dev.connect_attempts)
    }

    /// Number of open handles for `address` right now.
    #[must_use]
    pub fn live_handles(&self, address: &DeviceAddress) -> usize {
        self.state.with_device(address, |dev| dev.live_handles)
    }

    /// Highest number of simultaneously open handles ever seen for `address`.
    #[must_use]
    pub fn max_live_handles(&self, address: &DeviceAddress) -> usize {
        self.state.with_device(address, |dev| dev.max_live_handles)
    }

    /// Highest number of link operations that ever overlapped on `address`.
    #[must_use]
    pub fn max_link_concurrency(&self, address: &DeviceAddress) -> usize {
        self.state.with_device(address, |dev| dev.max_link_active)
    }

    /// Number of successful capability reads on `address`.
    #[must_use]
    pub fn read_count(&self, address: &DeviceAddress) -> u32 {
        self.state.with_device(address, |dev| dev.reads)
    }

    /// Capabilities enabled on `address`, in call order, across all handles.
    #[must_use]
    pub fn enabled(&self, address: &DeviceAddress) -> Vec<Capability> {
        self.state.with_device(address, |dev| dev.enabled.clone())
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    async fn connect(&self, address: &DeviceAddress) -> Result<MockHandle, TransportError> {
        tokio::task::yield_now().await;

        let failed = self.state.with_device(address, |dev| {
            dev.connect_attempts += 1;
            if take_failure(&mut dev.connect_failures) {
                return true;
            }
            dev.live_handles += 1;
            dev.max_live_handles = dev.max_live_handles.max(dev.live_handles);
            false
        });

        if failed {
            return Err(TransportError::ConnectFailed(format!(
                "{address} did not answer"
            )));
        }

        Ok(MockHandle {
            state: Arc::clone(&self.state),
            address: address.clone(),
            handler: None,
            open: true,
        })
    }
}

/// Handle returned by [`MockTransport`].
pub struct MockHandle {
    state: Arc<MockState>,
    address: DeviceAddress,
    handler: Option<NotificationHandler>,
    open: bool,
}

impl MockHandle {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }
}

impl DeviceHandle for MockHandle {
    async fn enable(&mut self, capability: Capability) -> Result<(), TransportError> {
        self.ensure_open()?;

        let failed = self.state.with_device(&self.address, |dev| {
            let failed = take_failure(&mut dev.enable_failures);
            if !failed {
                dev.enabled.push(capability);
            }
            failed
        });

        if failed {
            return Err(TransportError::EnableFailed {
                capability,
                message: "configuration write rejected".to_string(),
            });
        }
        Ok(())
    }

    async fn read(&mut self, capability: Capability) -> Result<Vec<f64>, TransportError> {
        self.ensure_open()?;
        let _op = LinkOp::enter(&self.state, &self.address);

        let delay = *self.state.read_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.state.with_device(&self.address, |dev| {
            if take_failure(&mut dev.read_failures) {
                return Err(TransportError::ReadFailed {
                    capability,
                    message: "link lost".to_string(),
                });
            }
            dev.reads += 1;
            Ok(dev.values.get(&capability).cloned().unwrap_or_else(|| {
                std::iter::successors(Some(1.0), |v| Some(v + 1.0))
                    .take(capability.fields().len())
                    .collect()
            }))
        })
    }

    fn set_notification_handler(&mut self, handler: NotificationHandler) {
        self.handler = Some(handler);
    }

    async fn wait_for_notification(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        self.ensure_open()?;
        let _op = LinkOp::enter(&self.state, &self.address);

        let next = self.state.with_device(&self.address, |dev| {
            if take_failure(&mut dev.notification_failures) {
                return Err(TransportError::NotificationFailed(
                    "peripheral disconnected".to_string(),
                ));
            }
            Ok(dev.notifications.pop_front())
        })?;

        match (next, &self.handler) {
            (Some(notification), Some(handler)) => {
                handler(notification);
                Ok(true)
            }
            (Some(_), None) => Ok(false),
            (None, _) => {
                tokio::time::sleep(timeout).await;
                Ok(false)
            }
        }
    }

    async fn disconnect(&mut self) {
        if std::mem::take(&mut self.open) {
            self.state
                .with_device(&self.address, |dev| dev.live_handles -= 1);
        }
    }
}

impl std::fmt::Debug for MockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHandle")
            .field("address", &self.address)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}
