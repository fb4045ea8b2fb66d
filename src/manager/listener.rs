// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notification listener for devices with a notifying capability.

use std::sync::Arc;

use crate::event::{DeviceAddress, DeviceEvent, EventBus, Notification};
use crate::transport::{DeviceHandle, NotificationHandler, Transport};

use super::device_config::DeviceConfig;
use super::device_manager::{Connection, ConnectionManager};

impl<T: Transport> ConnectionManager<T> {
    /// Builds the callback that turns raw notifications into key press
    /// events for one device.
    pub(super) fn notification_handler(&self, config: &DeviceConfig) -> NotificationHandler {
        let events = self.inner.events.clone();
        let address = config.address.clone();
        Arc::new(move |notification: Notification| {
            dispatch(&events, &address, notification);
        })
    }

    pub(super) fn spawn_listener(&self, conn: Arc<Connection<T>>) {
        let manager = self.clone();
        tokio::spawn(async move { manager.listen(conn).await });
    }

    /// Waits for notifications until the connection is retired or the
    /// manager shuts down.
    ///
    /// The link is held for the whole wait, so reads on the same device
    /// queue behind it for at most the notification timeout.
    async fn listen(&self, conn: Arc<Connection<T>>) {
        let address = conn.address().clone();
        let timeout = self.inner.settings.notification_timeout;
        tracing::debug!(%address, generation = conn.generation, "Listener started");

        loop {
            if self.is_shut_down() || conn.is_closed() {
                break;
            }

            let result = {
                let mut link = conn.link().await;
                if conn.is_closed() {
                    break;
                }
                link.wait_for_notification(timeout).await
            };

            if let Err(error) = result {
                tracing::warn!(%address, name = %conn.config.name, %error, "Notification wait failed");
                self.reconnect_failed(&conn, false);
                break;
            }
        }

        tracing::debug!(%address, generation = conn.generation, "Listener stopped");
    }
}

fn dispatch(events: &EventBus, address: &DeviceAddress, notification: Notification) {
    match notification.decode() {
        Some(event) => {
            tracing::debug!(%address, source = ?event.source, direction = ?event.direction, "Key press");
            events.publish(DeviceEvent::Keypress {
                address: address.clone(),
                event,
            });
        }
        None => {
            tracing::debug!(%address, code = notification.code, "Unknown key code");
        }
    }
}
