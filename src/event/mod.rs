// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event system for connection status, sensor readings and key presses.
//!
//! The [`EventBus`] uses tokio's broadcast channel so that any number of
//! consumers can observe what the connection manager emits.
//!
//! # Examples
//!
//! ```
//! use tagfleet::event::{ConnectionStatus, DeviceAddress, DeviceEvent, EventBus};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! let address: DeviceAddress = "12:34:56:78:12:34".parse().unwrap();
//! bus.publish(DeviceEvent::status_changed(ConnectionStatus::Connecting, "Tag", address));
//! ```

mod address;
mod device_event;
mod event_bus;
mod keypress;

pub use address::DeviceAddress;
pub use device_event::{ConnectionStatus, DeviceEvent, SensorReading};
pub use event_bus::EventBus;
pub(crate) use event_bus::DEFAULT_CHANNEL_CAPACITY;
pub use keypress::{Button, Direction, KeyEvent, Notification};
