// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoding of side-button notifications.

use serde::Serialize;

/// Which button(s) a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Button {
    /// The left button (code `0x02`).
    Left,
    /// The right button (code `0x01`).
    Right,
    /// Both buttons at once (code `0x03`).
    Both,
}

impl Button {
    /// Looks up the button for a raw notification code.
    ///
    /// Returns `None` for codes outside the table.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Right),
            0x02 => Some(Self::Left),
            0x03 => Some(Self::Both),
            _ => None,
        }
    }
}

/// Button transition reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Button pressed.
    Down,
    /// Button released.
    Up,
}

/// Raw notification as delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// Button bitmask.
    pub code: u8,
    /// Press or release.
    pub direction: Direction,
}

impl Notification {
    /// A button press.
    #[must_use]
    pub const fn down(code: u8) -> Self {
        Self {
            code,
            direction: Direction::Down,
        }
    }

    /// A button release.
    #[must_use]
    pub const fn up(code: u8) -> Self {
        Self {
            code,
            direction: Direction::Up,
        }
    }

    /// Decodes the notification into a semantic key event.
    #[must_use]
    pub const fn decode(self) -> Option<KeyEvent> {
        match Button::from_code(self.code) {
            Some(source) => Some(KeyEvent {
                source,
                direction: self.direction,
            }),
            None => None,
        }
    }
}

/// A decoded button event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyEvent {
    /// Which button(s).
    pub source: Button,
    /// Press or release.
    pub direction: Direction,
}
