// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Abstraction over the physical radio link.
//!
//! The connection manager never speaks BLE itself. It drives a
//! [`Transport`] to open links and a [`DeviceHandle`] per open link to
//! enable capabilities, read values and wait for notifications. A BLE
//! stack (or the scripted [`mock::MockTransport`]) implements both traits.
//!
//! All returned futures are `Send` so that device work can run on
//! spawned tasks.

pub mod mock;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::Capability;
use crate::error::TransportError;
use crate::event::{DeviceAddress, Notification};

/// Callback invoked by a handle whenever a notification arrives.
pub type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

/// Opens links to devices.
pub trait Transport: Send + Sync + 'static {
    /// Handle type for one open link.
    type Handle: DeviceHandle;

    /// Opens a link to the device at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectFailed`] if the device cannot be
    /// reached. Callers retry.
    fn connect(
        &self,
        address: &DeviceAddress,
    ) -> impl Future<Output = Result<Self::Handle, TransportError>> + Send;
}

/// One open link to a device.
///
/// A handle is exclusively owned by one connection and all calls on it are
/// serialized by that connection's link lock.
pub trait DeviceHandle: Send + 'static {
    /// Enables a capability on the device.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EnableFailed`] if the device rejects it.
    fn enable(
        &mut self,
        capability: Capability,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Reads the raw values of a capability, in schema order.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the link failed during the read.
    fn read(
        &mut self,
        capability: Capability,
    ) -> impl Future<Output = Result<Vec<f64>, TransportError>> + Send;

    /// Installs the callback that receives notifications from the device.
    fn set_notification_handler(&mut self, handler: NotificationHandler);

    /// Waits up to `timeout` for one notification.
    ///
    /// Returns `Ok(true)` if a notification was dispatched to the handler
    /// and `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the link failed.
    fn wait_for_notification(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool, TransportError>> + Send;

    /// Closes the link. Closing an already closed link is a no-op.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}
