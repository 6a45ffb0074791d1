//! Gridbot - Hardware Abstraction Layer
//!
//! HAL provides the platform-independent interface the kernel consumes:
//! - Time measurement
//! - Frame transmission
//! - Differential drive with step counters
//! - Ground (line) and proximity sensors
//! - Indicator LEDs
//!
//! Peripheral faults are the implementation's concern: readings degrade to
//! stale or default values instead of failing.
//!
//! # Implementing a HAL
//!
//! ```ignore
//! struct EpuckHal;
//!
//! impl Transport for EpuckHal {
//!     fn send(&self, msg: &Message) -> Result<()> {
//!         // Queue 32 bytes on the UART ring buffer
//!     }
//! }
//!
//! impl Hal for EpuckHal {
//!     fn time_us(&self) -> TimeUs {
//!         // Read the free-running timer
//!     }
//!
//!     // ... implement other methods
//! }
//! ```

use crate::protocol::Message;
use crate::types::*;

// ============================================================================
// Transport
// ============================================================================

/// Outbound side of the serial transport
pub trait Transport {
    /// Queue one frame for transmission
    fn send(&self, msg: &Message) -> Result<()>;
}

// ============================================================================
// HAL Trait
// ============================================================================

/// Hardware Abstraction Layer trait
///
/// Speeds are in steps per second. The angular component is differential:
/// the left wheel runs at `line - angular`, the right wheel at
/// `line + angular`, so a positive angular speed turns counter-clockwise.
pub trait Hal: Transport {
    /// Get current time in microseconds
    ///
    /// Must be monotonically increasing.
    fn time_us(&self) -> TimeUs;

    /// Get current time in milliseconds
    fn time_ms(&self) -> u32 {
        (self.time_us() / 1000) as u32
    }

    /// Command both wheels
    fn set_line_and_angular_speed(&self, line: i32, angular: i32);

    /// Stop both wheels
    fn stop_motors(&self) {
        self.set_line_and_angular_speed(0, 0);
    }

    /// Overwrite both step counters
    fn set_step_counters(&self, value: i32);

    /// Signed steps of one wheel since the last counter write
    fn step_count(&self, side: Side) -> i32;

    /// Raw ground sensor values (high = reflective)
    fn read_line(&self) -> LineReading;

    /// Map raw ground values to 0 (white) ..= 1000 (black)
    fn rescale_line(&self, raw: &LineReading) -> LineReading;

    /// Store new calibration coefficients from black and white samples
    ///
    /// Fails when the samples do not give usable contrast.
    fn calibrate_line(&self, black: &LineReading, white: &LineReading) -> Result<()>;

    /// Raw proximity values (high = close)
    fn read_proximity(&self) -> ProximityReading;

    /// Drive the indicator LEDs
    fn set_leds(&self, mask: u16);

    /// Get platform name
    fn platform_name(&self) -> &'static str;
}

// ============================================================================
// Mock HAL (for testing and simulation)
// ============================================================================

#[cfg(any(test, feature = "std"))]
pub mod mock {
    //! Host-side HAL recording everything the kernel does.
    //!
    //! Wheel step counters integrate the commanded speeds whenever time
    //! advances. An optional grid node model makes the ground sensors see
    //! the node's lines while the robot rotates in place.

    use super::*;
    use crate::behaviors::MotionConfig;
    use std::cell::RefCell;
    use std::vec::Vec;

    /// Raw value of a white floor
    pub const WHITE_RAW: u16 = 2500;
    /// Raw value of a black line
    pub const BLACK_RAW: u16 = 400;
    /// Raw value seen over a drop-off
    pub const VOID_RAW: u16 = 20;

    /// Half width of a line, in rotation steps, for the node model
    const LINE_HALF_WIDTH_STEPS: i32 = 24;

    /// Rotation between the center and an outer ground sensor crossing a line
    const SENSOR_SPREAD_STEPS: i32 = 60;

    const MICRO: i64 = 1_000_000;

    struct MockState {
        time_us: TimeUs,
        line: LineReading,
        proximity: ProximityReading,
        black: LineReading,
        white: LineReading,
        calibrations: u32,
        line_speed: i32,
        angular_speed: i32,
        /// Step accumulators in step-microseconds per wheel
        steps: [i64; 2],
        leds: u16,
        sent: Vec<Message>,
        fail_send: bool,
        node: Option<u8>,
        quarter_turn_steps: i32,
    }

    /// Recording HAL for host tests
    pub struct MockHal {
        state: RefCell<MockState>,
    }

    impl MockHal {
        /// White floor, nothing nearby, default calibration
        pub fn new() -> Self {
            Self {
                state: RefCell::new(MockState {
                    time_us: 0,
                    line: [WHITE_RAW; LINE_SENSOR_COUNT],
                    proximity: [0; PROXIMITY_SENSOR_COUNT],
                    black: [BLACK_RAW; LINE_SENSOR_COUNT],
                    white: [WHITE_RAW; LINE_SENSOR_COUNT],
                    calibrations: 0,
                    line_speed: 0,
                    angular_speed: 0,
                    steps: [0; 2],
                    leds: 0,
                    sent: Vec::new(),
                    fail_send: false,
                    node: None,
                    quarter_turn_steps: MotionConfig::default().quarter_turn_steps as i32,
                }),
            }
        }

        /// Advance time and integrate wheel steps
        pub fn advance_time(&self, us: u64) {
            let mut s = self.state.borrow_mut();
            s.time_us += us;
            let left = (s.line_speed - s.angular_speed) as i64;
            let right = (s.line_speed + s.angular_speed) as i64;
            s.steps[0] += left * us as i64;
            s.steps[1] += right * us as i64;
        }

        /// Set raw ground readings
        pub fn set_line(&self, raw: LineReading) {
            self.state.borrow_mut().line = raw;
        }

        /// Set raw proximity readings
        pub fn set_proximity(&self, raw: ProximityReading) {
            self.state.borrow_mut().proximity = raw;
        }

        /// Place the robot on a node with the given direction mask
        ///
        /// While set, the ground sensors follow the node's lines as the
        /// robot rotates in place.
        pub fn set_grid_node(&self, mask: Option<u8>) {
            self.state.borrow_mut().node = mask;
        }

        /// Make every send fail
        pub fn set_send_failure(&self, fail: bool) {
            self.state.borrow_mut().fail_send = fail;
        }

        /// Frames sent so far
        pub fn sent(&self) -> Vec<Message> {
            self.state.borrow().sent.clone()
        }

        /// Drain the sent frames
        pub fn take_sent(&self) -> Vec<Message> {
            core::mem::take(&mut self.state.borrow_mut().sent)
        }

        /// Last commanded (line, angular) speeds
        pub fn speeds(&self) -> (i32, i32) {
            let s = self.state.borrow();
            (s.line_speed, s.angular_speed)
        }

        /// Current LED mask
        pub fn leds(&self) -> u16 {
            self.state.borrow().leds
        }

        /// Successful calibrations so far
        pub fn calibrations(&self) -> u32 {
            self.state.borrow().calibrations
        }

        /// Clockwise rotation in steps since the last counter write
        fn rotation(s: &MockState) -> i32 {
            ((s.steps[0] - s.steps[1]) / (2 * MICRO)) as i32
        }
    }

    impl Default for MockHal {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for MockHal {
        fn send(&self, msg: &Message) -> Result<()> {
            let mut s = self.state.borrow_mut();
            if s.fail_send {
                return Err(Error::HalFailure);
            }
            s.sent.push(*msg);
            Ok(())
        }
    }

    impl Hal for MockHal {
        fn time_us(&self) -> TimeUs {
            self.state.borrow().time_us
        }

        fn set_line_and_angular_speed(&self, line: i32, angular: i32) {
            let mut s = self.state.borrow_mut();
            s.line_speed = line;
            s.angular_speed = angular;
        }

        fn set_step_counters(&self, value: i32) {
            let mut s = self.state.borrow_mut();
            s.steps = [value as i64 * MICRO; 2];
        }

        fn step_count(&self, side: Side) -> i32 {
            let s = self.state.borrow();
            let acc = match side {
                Side::Left => s.steps[0],
                Side::Right => s.steps[1],
            };
            (acc / MICRO) as i32
        }

        fn read_line(&self) -> LineReading {
            let s = self.state.borrow();
            let Some(mask) = s.node else {
                return s.line;
            };

            let full = 4 * s.quarter_turn_steps;
            let heading = Self::rotation(&s).rem_euclid(full);
            // Turning clockwise, the right sensor reaches a line first
            let sees = |offset: i32| {
                Direction::ALL.iter().any(|d| {
                    if mask & d.bit() == 0 {
                        return false;
                    }
                    let angle = *d as i32 * s.quarter_turn_steps + offset;
                    let diff = (heading - angle).rem_euclid(full);
                    diff.min(full - diff) <= LINE_HALF_WIDTH_STEPS
                })
            };
            let raw = |hit: bool| if hit { BLACK_RAW } else { WHITE_RAW };
            [
                raw(sees(SENSOR_SPREAD_STEPS)),
                raw(sees(0)),
                raw(sees(-SENSOR_SPREAD_STEPS)),
            ]
        }

        fn rescale_line(&self, raw: &LineReading) -> LineReading {
            let s = self.state.borrow();
            let mut out = [0; LINE_SENSOR_COUNT];
            for i in 0..LINE_SENSOR_COUNT {
                let span = (s.white[i] as i32 - s.black[i] as i32).max(1);
                let value = (s.white[i] as i32 - raw[i] as i32) * 1000 / span;
                out[i] = value.clamp(0, 1000) as u16;
            }
            out
        }

        fn calibrate_line(&self, black: &LineReading, white: &LineReading) -> Result<()> {
            if black.iter().zip(white.iter()).any(|(b, w)| *w <= *b) {
                return Err(Error::InvalidArg);
            }
            let mut s = self.state.borrow_mut();
            s.black = *black;
            s.white = *white;
            s.calibrations += 1;
            Ok(())
        }

        fn read_proximity(&self) -> ProximityReading {
            self.state.borrow().proximity
        }

        fn set_leds(&self, mask: u16) {
            self.state.borrow_mut().leds = mask;
        }

        fn platform_name(&self) -> &'static str {
            "mock"
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_steps_follow_speeds() {
            let hal = MockHal::new();
            hal.set_line_and_angular_speed(100, 0);
            hal.advance_time(1_000_000);
            assert_eq!(hal.step_count(Side::Left), 100);
            assert_eq!(hal.step_count(Side::Right), 100);

            hal.set_step_counters(0);
            hal.set_line_and_angular_speed(0, 50); // counter-clockwise
            hal.advance_time(2_000_000);
            assert_eq!(hal.step_count(Side::Left), -100);
            assert_eq!(hal.step_count(Side::Right), 100);
        }

        #[test]
        fn test_rescale_default_calibration() {
            let hal = MockHal::new();
            let scaled = hal.rescale_line(&[WHITE_RAW, BLACK_RAW, VOID_RAW]);
            assert_eq!(scaled, [0, 1000, 1000]);
        }

        #[test]
        fn test_calibration_needs_contrast() {
            let hal = MockHal::new();
            assert_eq!(hal.calibrate_line(&[500; 3], &[500; 3]), Err(Error::InvalidArg));
            hal.calibrate_line(&[300; 3], &[2300; 3]).unwrap();
            assert_eq!(hal.rescale_line(&[1300; 3]), [500; 3]);
            assert_eq!(hal.calibrations(), 1);
        }

        #[test]
        fn test_grid_node_model() {
            let hal = MockHal::new();
            hal.set_grid_node(Some(Direction::Front.bit() | Direction::Right.bit()));
            assert_eq!(hal.read_line(), [WHITE_RAW, BLACK_RAW, WHITE_RAW]);

            // Rotate clockwise half a quarter: between lines
            hal.set_line_and_angular_speed(0, -100);
            hal.advance_time(1_610_000);
            assert_eq!(hal.read_line()[1], WHITE_RAW);

            // Right sensor reaches the right line first
            hal.advance_time(1_020_000);
            assert_eq!(hal.read_line(), [WHITE_RAW, WHITE_RAW, BLACK_RAW]);

            // Another 60 steps: center on the right line
            hal.advance_time(600_000);
            assert_eq!(hal.read_line(), [WHITE_RAW, BLACK_RAW, WHITE_RAW]);
        }

        #[test]
        fn test_send_failure() {
            let hal = MockHal::new();
            hal.set_send_failure(true);
            assert_eq!(hal.send(&Message::empty()), Err(Error::HalFailure));
            assert!(hal.sent().is_empty());
        }
    }
}
