//! Packed gear state for drivetrain change events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Front/rear gear state packed into one 32-bit field, as transmitted by
/// gear-change events.
///
/// Byte layout, most significant first: front teeth, front gear number,
/// rear teeth, rear gear number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GearCombination(pub u32);

impl GearCombination {
    /// Replacement for events that report zero rear teeth, a known firmware
    /// defect. Encodes 16 front teeth against 48 rear teeth, a ratio no real
    /// drivetrain ships, so affected tours stand out in gear charts.
    pub const DIAGNOSTIC: GearCombination = GearCombination(0x1001_3001);

    /// Create a new GearCombination from a packed u32 value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Pack individual gear components into a combination.
    pub fn from_parts(front_teeth: u8, front_gear: u8, rear_teeth: u8, rear_gear: u8) -> Self {
        Self(
            (u32::from(front_teeth) << 24)
                | (u32::from(front_gear) << 16)
                | (u32::from(rear_teeth) << 8)
                | u32::from(rear_gear),
        )
    }

    /// Number of teeth on the engaged front chainring.
    pub fn front_teeth(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// One-based index of the engaged front gear.
    pub fn front_gear(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Number of teeth on the engaged rear sprocket.
    pub fn rear_teeth(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// One-based index of the engaged rear gear.
    pub fn rear_gear(&self) -> u8 {
        self.0 as u8
    }

    /// Gear ratio front:rear, or `None` when rear teeth is zero.
    pub fn ratio(&self) -> Option<f32> {
        let rear = self.rear_teeth();
        if rear == 0 {
            return None;
        }
        Some(f32::from(self.front_teeth()) / f32::from(rear))
    }

    /// Whether the event carries the impossible zero-rear-teeth value.
    pub fn has_zero_rear_teeth(&self) -> bool {
        self.rear_teeth() == 0
    }

    /// Get the raw packed u32 value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for GearCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.front_teeth(), self.rear_teeth())
    }
}

/// A drivetrain shift at an absolute device time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GearChangeEvent {
    /// Epoch milliseconds.
    pub time: i64,
    pub gear: GearCombination,
}
