// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests of the connection manager against the mock transport.

use std::time::Duration;

use tagfleet::event::{Button, Direction, KeyEvent, Notification};
use tagfleet::transport::mock::MockTransport;
use tagfleet::{
    Capability, ConfigStore, ConnectionManager, ConnectionStatus, DeviceAddress, DeviceConfig,
    DeviceEvent, ManagerSettings, ReadOutcome,
};
use tokio::sync::broadcast;

use ConnectionStatus::{Connected, Connecting, Disconnected, Enabling, Retrying};

const TAG: &str = "12:34:56:78:12:34";
const OTHER_TAG: &str = "AA:BB:CC:DD:EE:FF";

fn addr(s: &str) -> DeviceAddress {
    DeviceAddress::new(s).unwrap()
}

/// Settings with short delays so that retry cycles finish quickly.
fn fast_settings() -> ManagerSettings {
    ManagerSettings::default()
        .with_backoff(Duration::from_millis(10))
        .with_notification_timeout(Duration::from_millis(5))
}

fn manager_with(
    transport: MockTransport,
    configs: impl IntoIterator<Item = DeviceConfig>,
) -> ConnectionManager<MockTransport> {
    ConnectionManager::with_settings(transport, ConfigStore::from_entries(configs), fast_settings())
}

/// Receives the next event, failing the test if none arrives in time.
async fn recv(rx: &mut broadcast::Receiver<DeviceEvent>) -> DeviceEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Receives the next `count` events, all of which must be statuses.
async fn statuses(rx: &mut broadcast::Receiver<DeviceEvent>, count: usize) -> Vec<ConnectionStatus> {
    let mut seen = Vec::with_capacity(count);
    for _ in 0..count {
        let event = recv(rx).await;
        seen.push(
            event
                .status()
                .unwrap_or_else(|| panic!("expected status event, got {event:?}")),
        );
    }
    seen
}

/// Asserts that no event arrives within a short grace period.
async fn assert_quiet(rx: &mut broadcast::Receiver<DeviceEvent>) {
    let next = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(next.is_err(), "unexpected event: {next:?}");
}

// ============================================================================
// Scenarios
// ============================================================================

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn single_read_after_connect() {
        let manager = manager_with(
            MockTransport::new(),
            [DeviceConfig::new(addr(TAG)).with_name("Kitchen")],
        );
        let mut rx = manager.subscribe();

        manager.connect_all();
        assert_eq!(statuses(&mut rx, 3).await, [Connecting, Enabling, Connected]);

        let outcome = manager.read_once(&addr(TAG)).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Emitted);

        let DeviceEvent::Sensors(reading) = recv(&mut rx).await else {
            panic!("expected sensors event");
        };
        assert_eq!(reading.name, "Kitchen");
        assert_eq!(reading.address, addr(TAG));
        assert_eq!(reading.readings.len(), 1);
        let ir = reading.get(Capability::IrTemperature).unwrap();
        assert_eq!(ir.get("ambient_temp_degC"), Some(1.0));
        assert_eq!(ir.get("target_temp_degC"), Some(2.0));

        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn listener_failure_reconnects_once() {
        let transport = MockTransport::new();
        transport.fail_notification_waits(&addr(TAG), 1);
        let manager = manager_with(
            transport,
            [DeviceConfig::new(addr(TAG)).with_capability(Capability::Keypress)],
        );
        let mut rx = manager.subscribe();

        manager.connect_all();
        assert_eq!(
            statuses(&mut rx, 7).await,
            [Connecting, Enabling, Connected, Disconnected, Connecting, Enabling, Connected]
        );

        assert_quiet(&mut rx).await;
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.transport().connect_attempts(&addr(TAG)), 2);
        assert_eq!(manager.transport().live_handles(&addr(TAG)), 1);
        assert_eq!(manager.transport().max_live_handles(&addr(TAG)), 1);
    }

    #[tokio::test]
    async fn excess_concurrent_reads_are_dropped() {
        let transport = MockTransport::new().with_read_delay(Duration::from_millis(20));
        let manager = manager_with(transport, [DeviceConfig::new(addr(TAG))]);
        let mut rx = manager.subscribe();

        manager.connect_all();
        statuses(&mut rx, 3).await;

        let address = addr(TAG);
        let (a, b, c, d, e, f) = tokio::join!(
            manager.read_once(&address),
            manager.read_once(&address),
            manager.read_once(&address),
            manager.read_once(&address),
            manager.read_once(&address),
            manager.read_once(&address),
        );
        let outcomes = [a, b, c, d, e, f].map(Result::unwrap);

        let emitted = outcomes.iter().filter(|o| **o == ReadOutcome::Emitted).count();
        let dropped = outcomes.iter().filter(|o| **o == ReadOutcome::Dropped).count();
        assert_eq!(emitted, 5);
        assert_eq!(dropped, 1);
        assert_eq!(manager.transport().read_count(&address), 5);
        assert_eq!(manager.in_flight_reads(&address), Some(0));
    }

    #[tokio::test]
    async fn read_failure_reads_again_after_reconnect() {
        let manager = manager_with(MockTransport::new(), [DeviceConfig::new(addr(TAG))]);
        let mut rx = manager.subscribe();

        manager.connect_all();
        statuses(&mut rx, 3).await;

        manager.transport().fail_reads(&addr(TAG), 1);
        let outcome = manager.read_once(&addr(TAG)).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Reconnecting);

        assert_eq!(
            statuses(&mut rx, 4).await,
            [Disconnected, Connecting, Enabling, Connected]
        );
        assert!(recv(&mut rx).await.is_sensors());
        assert_eq!(manager.transport().read_count(&addr(TAG)), 1);
    }
}

// ============================================================================
// Connection lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn unreachable_device_is_retried() {
        let transport = MockTransport::new();
        transport.fail_connects(&addr(TAG), 2);
        let manager = manager_with(transport, [DeviceConfig::new(addr(TAG))]);
        let mut rx = manager.subscribe();

        manager.connect_all();

        assert_eq!(
            statuses(&mut rx, 7).await,
            [Connecting, Retrying, Connecting, Retrying, Connecting, Enabling, Connected]
        );
        assert_eq!(manager.transport().connect_attempts(&addr(TAG)), 3);
        assert_eq!(manager.status(&addr(TAG)), Some(Connected));
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.transport().live_handles(&addr(TAG)), 1);
        assert_eq!(manager.transport().max_live_handles(&addr(TAG)), 1);
    }

    #[tokio::test]
    async fn enable_failure_is_retried_like_connect_failure() {
        let transport = MockTransport::new();
        transport.fail_enables(&addr(TAG), 1);
        let manager = manager_with(transport, [DeviceConfig::new(addr(TAG))]);
        let mut rx = manager.subscribe();

        manager.connect_all();

        assert_eq!(
            statuses(&mut rx, 6).await,
            [Connecting, Enabling, Retrying, Connecting, Enabling, Connected]
        );
        assert_eq!(manager.transport().live_handles(&addr(TAG)), 1);
        assert_eq!(manager.transport().max_live_handles(&addr(TAG)), 1);
    }

    #[tokio::test]
    async fn concurrent_reconnects_collapse() {
        let manager = manager_with(MockTransport::new(), [DeviceConfig::new(addr(TAG))]);
        let mut rx = manager.subscribe();

        manager.connect_all();
        statuses(&mut rx, 3).await;

        let accepted = (0..8)
            .filter(|_| manager.reconnect(&addr(TAG), false))
            .count();
        assert_eq!(accepted, 1);

        assert_eq!(
            statuses(&mut rx, 4).await,
            [Disconnected, Connecting, Enabling, Connected]
        );
        assert_quiet(&mut rx).await;
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.transport().max_live_handles(&addr(TAG)), 1);
    }

    #[tokio::test]
    async fn connect_all_skips_connecting_and_connected_devices() {
        let transport = MockTransport::new();
        transport.fail_connects(&addr(OTHER_TAG), u32::MAX);
        let manager = manager_with(
            transport,
            [DeviceConfig::new(addr(TAG)), DeviceConfig::new(addr(OTHER_TAG))],
        );

        assert_eq!(manager.connect_all(), 2);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(manager.is_connected(&addr(TAG)));
        assert!(!manager.is_connected(&addr(OTHER_TAG)));
        assert_eq!(manager.connect_all(), 0);

        manager.stop().await;
    }

    #[tokio::test]
    async fn stop_emits_no_disconnected_status() {
        let manager = manager_with(
            MockTransport::new(),
            [DeviceConfig::new(addr(TAG)).with_capability(Capability::Keypress)],
        );
        let mut rx = manager.subscribe();

        manager.connect_all();
        statuses(&mut rx, 3).await;

        manager.stop().await;

        assert_quiet(&mut rx).await;
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.transport().live_handles(&addr(TAG)), 0);
        assert_eq!(
            manager.read_once(&addr(TAG)).await.unwrap(),
            ReadOutcome::NotConnected
        );
    }
}

// ============================================================================
// Notifications and link access
// ============================================================================

mod notifications {
    use super::*;

    #[tokio::test]
    async fn key_presses_are_published() {
        let manager = manager_with(
            MockTransport::new(),
            [DeviceConfig::new(addr(TAG)).with_capability(Capability::Keypress)],
        );
        let mut rx = manager.subscribe();

        manager.connect_all();
        statuses(&mut rx, 3).await;

        manager
            .transport()
            .push_notification(&addr(TAG), Notification::down(0x01));
        manager
            .transport()
            .push_notification(&addr(TAG), Notification::up(0x01));

        for direction in [Direction::Down, Direction::Up] {
            assert_eq!(
                recv(&mut rx).await,
                DeviceEvent::Keypress {
                    address: addr(TAG),
                    event: KeyEvent {
                        source: Button::Right,
                        direction,
                    },
                }
            );
        }
    }

    #[tokio::test]
    async fn unknown_key_codes_are_ignored() {
        let manager = manager_with(
            MockTransport::new(),
            [DeviceConfig::new(addr(TAG)).with_capability(Capability::Keypress)],
        );
        let mut rx = manager.subscribe();

        manager.connect_all();
        statuses(&mut rx, 3).await;

        manager
            .transport()
            .push_notification(&addr(TAG), Notification::down(0x42));

        assert_quiet(&mut rx).await;
        assert!(manager.is_connected(&addr(TAG)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reads_and_listener_never_overlap_on_link() {
        let transport = MockTransport::new().with_read_delay(Duration::from_millis(2));
        let manager = manager_with(
            transport,
            [DeviceConfig::new(addr(TAG))
                .with_capability(Capability::Keypress)
                .with_capability(Capability::Gyroscope)],
        );
        let mut rx = manager.subscribe();

        manager.connect_all();
        statuses(&mut rx, 3).await;

        let reads: Vec<_> = (0..10)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.read_once(&addr(TAG)).await })
            })
            .collect();
        for read in reads {
            read.await.unwrap().unwrap();
        }

        assert!(manager.transport().read_count(&addr(TAG)) > 0);
        assert_eq!(manager.transport().max_link_concurrency(&addr(TAG)), 1);
        assert_eq!(manager.in_flight_reads(&addr(TAG)), Some(0));

        manager.stop().await;
    }
}

// ============================================================================
// Configuration and scheduling
// ============================================================================

mod scheduling {
    use super::*;

    #[tokio::test]
    async fn start_schedules_reads_from_json_config() {
        let store = ConfigStore::from_json(
            r#"[{
                "address": "12:34:56:78:12:34",
                "name": "Porch",
                "sensors": {"barometer": true},
                "read_interval": 0.02
            }]"#,
        )
        .unwrap();
        let manager = ConnectionManager::with_settings(MockTransport::new(), store, fast_settings());
        let mut rx = manager.subscribe();

        assert_eq!(manager.start(), 1);
        assert_eq!(manager.start(), 0);

        let mut readings = 0;
        while readings < 2 {
            if let DeviceEvent::Sensors(reading) = recv(&mut rx).await {
                assert_eq!(reading.name, "Porch");
                assert!(reading.get(Capability::Barometer).is_some());
                readings += 1;
            }
        }

        manager.stop().await;
    }

    #[tokio::test]
    async fn sensors_event_serializes_per_capability() {
        let manager = manager_with(
            MockTransport::new(),
            [DeviceConfig::new(addr(TAG)).with_capability(Capability::Humidity)],
        );
        let mut rx = manager.subscribe();

        manager.connect_all();
        statuses(&mut rx, 3).await;
        manager
            .transport()
            .set_values(&addr(TAG), Capability::Humidity, vec![21.5, 40.0]);
        manager.read_once(&addr(TAG)).await.unwrap();

        let json = serde_json::to_value(recv(&mut rx).await).unwrap();
        assert_eq!(json["category"], "sensors");
        assert_eq!(json["sensor_tag_name"], "SensorTag");
        assert_eq!(json["sensor_tag_address"], TAG);
        assert_eq!(json["humidity"]["relative_humidity"], 40.0);
        assert_eq!(json["IRtemperature"]["target_temp_degC"], 2.0);
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn added_device_connects_on_demand() {
        let manager = manager_with(MockTransport::new(), Vec::new());
        let mut rx = manager.subscribe();

        manager.add_device(DeviceConfig::new(addr(OTHER_TAG)).with_name("Garage"));
        assert!(manager.connect(&addr(OTHER_TAG)).unwrap());
        assert!(!manager.connect(&addr(OTHER_TAG)).unwrap());

        let DeviceEvent::Status { status, name, .. } = recv(&mut rx).await else {
            panic!("expected status event");
        };
        assert_eq!(status, Connecting);
        assert_eq!(name, "Garage");
    }
}
