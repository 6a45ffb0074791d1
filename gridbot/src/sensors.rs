//! Gridbot - Sensor snapshot
//!
//! One [`SensorImage`] is captured at the start of every heartbeat so that
//! every behavior of that tick decides on the same readings.

use crate::hal::Hal;
use crate::types::*;

/// Calibrated value of a fully black line
pub const CALIBRATED_MAX: u16 = 1000;

/// Proximity sensors facing forward (0, 1, 6, 7)
pub const FRONT_PROXIMITY_MASK: u8 = 0b1100_0011;

/// Ground sensor position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[repr(u8)]
pub enum LineSensor {
    /// Left of the line
    Left = 0,
    /// On the line
    Center = 1,
    /// Right of the line
    Right = 2,
}

/// Detection thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct SensorConfig {
    /// Raw ground value below which the floor is gone
    pub abyss_threshold: u16,
    /// Raw proximity value above which an obstacle is reported
    pub collision_threshold: u16,
    /// Calibrated ground value above which a sensor sees the line
    pub line_threshold: u16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            abyss_threshold: 100,
            collision_threshold: 1500,
            line_threshold: 500,
        }
    }
}

/// Readings and derived masks of one heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorImage {
    /// Capture time
    pub timestamp: TimeUs,
    /// Raw ground values
    pub line_raw: LineReading,
    /// Calibrated ground values, 0 (white) ..= 1000 (black)
    pub line: LineReading,
    /// Raw proximity values
    pub proximity: ProximityReading,
    /// Bit per ground sensor over a drop-off
    pub abyss: u8,
    /// Bit per proximity sensor above the collision threshold
    pub collision: u8,
    /// Bit per ground sensor on the line
    pub black: u8,
}

impl SensorImage {
    /// Empty image
    pub const fn new() -> Self {
        Self {
            timestamp: 0,
            line_raw: [0; LINE_SENSOR_COUNT],
            line: [0; LINE_SENSOR_COUNT],
            proximity: [0; PROXIMITY_SENSOR_COUNT],
            abyss: 0,
            collision: 0,
            black: 0,
        }
    }

    /// Read every sensor once
    pub fn capture<H: Hal>(hal: &H, config: &SensorConfig) -> Self {
        let line_raw = hal.read_line();
        let line = hal.rescale_line(&line_raw);
        let proximity = hal.read_proximity();
        Self::from_readings(hal.time_us(), line_raw, line, proximity, config)
    }

    /// Derive the masks from readings
    pub fn from_readings(
        timestamp: TimeUs,
        line_raw: LineReading,
        line: LineReading,
        proximity: ProximityReading,
        config: &SensorConfig,
    ) -> Self {
        let abyss = mask_where(&line_raw, |v| v < config.abyss_threshold);
        // A drop-off reads black once rescaled; it is not a line
        let black = mask_where(&line, |v| v > config.line_threshold) & !abyss;
        let collision = mask_where(&proximity, |v| v > config.collision_threshold);

        Self {
            timestamp,
            line_raw,
            line,
            proximity,
            abyss,
            collision,
            black,
        }
    }

    /// Any ground sensor over a drop-off
    pub fn is_abyss(&self) -> bool {
        self.abyss != 0
    }

    /// Obstacle ahead, as a mask of the forward sensors
    pub fn front_collision(&self) -> u8 {
        self.collision & FRONT_PROXIMITY_MASK
    }

    /// Ground sensor sees the line
    pub fn on_line(&self, sensor: LineSensor) -> bool {
        self.black & (1 << sensor as u8) != 0
    }

    /// Calibrated value of one ground sensor
    pub fn line_value(&self, sensor: LineSensor) -> u16 {
        self.line[sensor as usize]
    }
}

fn mask_where(values: &[u16], pred: impl Fn(u16) -> bool) -> u8 {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| pred(**v))
        .fold(0u8, |acc, (i, _)| acc | (1 << i))
}
