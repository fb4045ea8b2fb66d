// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `tagfleet` library.
//!
//! Device I/O failures ([`TransportError`]) are recovered inside the
//! connection manager and only ever surface as status events. The other
//! variants describe misconfiguration and are returned to the caller.

use thiserror::Error;

use crate::capabilities::Capability;
use crate::event::DeviceAddress;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error reported by the radio transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid device or manager configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A capability read returned a different number of values than its
    /// schema declares.
    #[error("{capability} produced {actual} values, schema declares {expected}")]
    FieldCount {
        /// The capability that was read.
        capability: Capability,
        /// Number of fields declared by the schema.
        expected: usize,
        /// Number of raw values returned by the device.
        actual: usize,
    },

    /// The address is not present in the configuration store.
    #[error("device {0} is not configured")]
    DeviceNotFound(DeviceAddress),
}

/// Errors raised by a [`Transport`](crate::transport::Transport) or
/// [`DeviceHandle`](crate::transport::DeviceHandle).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the link to the device failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Enabling a capability on a connected device failed.
    #[error("failed to enable {capability}: {message}")]
    EnableFailed {
        /// The capability being enabled.
        capability: Capability,
        /// Transport-specific description.
        message: String,
    },

    /// Reading a capability failed.
    #[error("failed to read {capability}: {message}")]
    ReadFailed {
        /// The capability being read.
        capability: Capability,
        /// Transport-specific description.
        message: String,
    },

    /// Waiting for a notification failed at the transport level.
    #[error("notification wait failed: {0}")]
    NotificationFailed(String),

    /// The link was already closed.
    #[error("link is disconnected")]
    Disconnected,
}

/// Errors related to loading device configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Address is not a colon-separated 6-octet hardware address.
    #[error("invalid device address: {0}")]
    InvalidAddress(String),

    /// A sensor name does not exist in the capability registry.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// A read interval was zero, negative or not finite.
    #[error("invalid read interval: {0}")]
    InvalidInterval(f64),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
