//! Gridbot - Navigation behaviors
//!
//! Run and reset actions registered with the [`Scheduler`] by the
//! navigation states of [`Conquest`]. Every run action decides on the
//! sensor image of the current heartbeat. Working state lives in
//! [`BehaviorState`] and returns to its default through the reset actions.
//!
//! | Behavior | Priority | Claims |
//! |----------|----------|--------|
//! | abyss | 250 | ground sensor over a drop-off |
//! | calibration sampler | 220 | never |
//! | node scanner | 220 | never |
//! | movement | 200 | while a planned motion runs |
//! | collision | 150 | obstacle ahead |
//! | node detection | 100 | from the first side line until centered on the node |
//! | line following | 50 | always |
//!
//! [`Scheduler`]: crate::behavior::Scheduler

use crate::conquest::Conquest;
use crate::hal::Hal;
use crate::log::{log_debug, log_info};
use crate::sensors::LineSensor;
use crate::types::*;

/// Drop-off guard
pub const PRIORITY_ABYSS: Priority = 250;
/// Passive samplers riding along a rotation
pub const PRIORITY_SAMPLER: Priority = 220;
/// Planned rotations and drives
pub const PRIORITY_MOVEMENT: Priority = 200;
/// Obstacle guard
pub const PRIORITY_COLLISION: Priority = 150;
/// Node crossing
pub const PRIORITY_NODE: Priority = 100;
/// Line tracking
pub const PRIORITY_LINE: Priority = 50;

// ============================================================================
// Configuration
// ============================================================================

/// Drive geometry and controller gains
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct MotionConfig {
    /// Wheel steps for a quarter turn in place
    pub quarter_turn_steps: u32,
    /// Distance from the ground sensors to the wheel axle, in steps
    pub axle_offset_steps: u32,
    /// Wheel speed while rotating in place (steps/s)
    pub turn_speed: i32,
    /// Line speed while crossing a node (steps/s)
    pub crossing_speed: i32,
    /// Proportional gain numerator
    pub kp: i32,
    /// Derivative gain numerator
    pub kd: i32,
    /// Common gain denominator
    pub gain_divisor: i32,
    /// Largest steering correction (steps/s)
    pub max_correction: i32,
    /// Consecutive ticks over a drop-off before stopping
    pub abyss_debounce: u8,
    /// Consecutive ticks with an obstacle ahead before stopping
    pub collision_debounce: u8,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            quarter_turn_steps: 323,
            axle_offset_steps: 233,
            turn_speed: 200,
            crossing_speed: 150,
            kp: 4,
            kd: 2,
            gain_divisor: 10,
            max_correction: 200,
            abyss_debounce: 1,
            collision_debounce: 2,
        }
    }
}

// ============================================================================
// Working State
// ============================================================================

/// Planned wheel motion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Motion {
    /// Line speed (steps/s)
    pub line: i32,
    /// Angular speed (steps/s, positive counter-clockwise)
    pub angular: i32,
    /// Mean absolute wheel travel at which the motion ends
    pub steps: u32,
}

impl Motion {
    /// Rotate in place by `quarters` (positive clockwise)
    pub fn rotation(quarters: i8, config: &MotionConfig) -> Self {
        let speed = config.turn_speed.abs();
        Self {
            line: 0,
            angular: if quarters > 0 { -speed } else { speed },
            steps: quarters.unsigned_abs() as u32 * config.quarter_turn_steps,
        }
    }

    /// One full clockwise turn
    pub fn full_turn(config: &MotionConfig) -> Self {
        Self::rotation(4, config)
    }
}

/// Movement behavior state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Movement {
    target: Option<Motion>,
    started: bool,
    finished: bool,
}

impl Movement {
    /// Arm a motion; it starts on the next run
    pub fn plan(&mut self, motion: Motion) {
        *self = Self {
            target: Some(motion),
            started: false,
            finished: false,
        };
    }

    /// Planned motion completed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wheel travel since the motion started
    pub fn progress<H: Hal>(&self, hal: &H) -> u32 {
        if !self.started {
            return 0;
        }
        let left = hal.step_count(Side::Left).unsigned_abs();
        let right = hal.step_count(Side::Right).unsigned_abs();
        (left + right) / 2
    }
}

/// Node detection phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeDetector {
    /// No side line seen
    #[default]
    Following,
    /// Outer sensors over the crossing line
    Crossing {
        /// Side directions seen so far
        mask: u8,
    },
    /// Driving the axle onto the node
    Centering {
        /// Side directions of the node
        mask: u8,
        /// Travel when the crossing line was left behind
        from: i32,
    },
}

/// Line follower state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineFollower {
    last_error: i32,
}

/// Extremes of the raw ground readings over a rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationSampler {
    /// Darkest reading per sensor
    pub black: LineReading,
    /// Brightest reading per sensor
    pub white: LineReading,
    /// Ticks sampled
    pub samples: u32,
}

impl Default for CalibrationSampler {
    fn default() -> Self {
        Self {
            black: [u16::MAX; LINE_SENSOR_COUNT],
            white: [0; LINE_SENSOR_COUNT],
            samples: 0,
        }
    }
}

impl CalibrationSampler {
    /// Smallest black/white spread over all sensors
    pub fn contrast(&self) -> u16 {
        self.black
            .iter()
            .zip(self.white.iter())
            .map(|(b, w)| w.saturating_sub(*b))
            .min()
            .unwrap_or(0)
    }
}

/// Lines seen by the center sensor during a full rotation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeScanner {
    in_line: bool,
    run_start: u32,
    mask: u8,
}

impl NodeScanner {
    fn sample(&mut self, black: bool, progress: u32, quarter: u32) {
        match (self.in_line, black) {
            (false, true) => {
                self.in_line = true;
                self.run_start = progress;
            }
            (true, false) => {
                self.in_line = false;
                self.record((self.run_start + progress) / 2, quarter);
            }
            _ => {}
        }
    }

    fn record(&mut self, angle: u32, quarter: u32) {
        let quarter = quarter.max(1);
        let index = ((angle + quarter / 2) / quarter) % 4;
        self.mask |= Direction::ALL[index as usize].bit();
    }

    /// Close an open line at `progress` and return the direction mask
    pub fn finish(&mut self, progress: u32, quarter: u32) -> u8 {
        if self.in_line {
            self.in_line = false;
            self.record((self.run_start + progress) / 2, quarter);
        }
        self.mask
    }
}

/// Working state of every navigation behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BehaviorState {
    /// Planned motion
    pub movement: Movement,
    /// Node crossing phase
    pub detector: NodeDetector,
    /// Line controller memory
    pub follower: LineFollower,
    /// Calibration extremes
    pub sampler: CalibrationSampler,
    /// Start node lines
    pub scanner: NodeScanner,
    /// Consecutive abyss ticks
    pub abyss_hits: u8,
    /// Consecutive obstacle ticks
    pub collision_hits: u8,
}

// ============================================================================
// Abyss
// ============================================================================

pub(crate) fn abyss_run<H: Hal>(c: &mut Conquest<'_, H>) -> bool {
    let abyss = c.image.abyss;
    if abyss == 0 {
        c.behaviors.abyss_hits = 0;
        return false;
    }

    c.behaviors.abyss_hits = c.behaviors.abyss_hits.saturating_add(1);
    if c.behaviors.abyss_hits < c.config.motion.abyss_debounce {
        return false;
    }

    c.hal.stop_motors();
    c.outcome.abyss = abyss;
    log_info!("abyss under ground sensors {:?}", abyss);
    c.go(NavigationState::Abyss);
    true
}

pub(crate) fn abyss_reset<H: Hal>(c: &mut Conquest<'_, H>) {
    c.behaviors.abyss_hits = 0;
}

// ============================================================================
// Collision
// ============================================================================

pub(crate) fn collision_run<H: Hal>(c: &mut Conquest<'_, H>) -> bool {
    if c.image.front_collision() == 0 {
        c.behaviors.collision_hits = 0;
        return false;
    }

    c.behaviors.collision_hits = c.behaviors.collision_hits.saturating_add(1);
    if c.behaviors.collision_hits < c.config.motion.collision_debounce {
        return false;
    }

    c.hal.stop_motors();
    c.outcome.collision = c.image.collision;
    log_info!("obstacle on proximity sensors {:?}", c.image.collision);
    c.go(NavigationState::Collision);
    true
}

pub(crate) fn collision_reset<H: Hal>(c: &mut Conquest<'_, H>) {
    c.behaviors.collision_hits = 0;
}

// ============================================================================
// Movement
// ============================================================================

pub(crate) fn movement_run<H: Hal>(c: &mut Conquest<'_, H>) -> bool {
    let movement = c.behaviors.movement;
    let Some(motion) = movement.target else {
        return false;
    };
    if movement.finished {
        return false;
    }

    if !movement.started {
        c.hal.set_step_counters(0);
        c.hal.set_line_and_angular_speed(motion.line, motion.angular);
        c.behaviors.movement.started = true;
        return true;
    }

    if movement.progress(c.hal) >= motion.steps {
        c.hal.stop_motors();
        c.behaviors.movement.finished = true;
    }
    true
}

pub(crate) fn movement_reset<H: Hal>(c: &mut Conquest<'_, H>) {
    c.behaviors.movement = Movement::default();
}

// ============================================================================
// Node Detection
// ============================================================================

fn travel<H: Hal>(hal: &H) -> i32 {
    (hal.step_count(Side::Left) + hal.step_count(Side::Right)) / 2
}

pub(crate) fn node_detect_run<H: Hal>(c: &mut Conquest<'_, H>) -> bool {
    let image = c.image;
    let mut sides = 0u8;
    if image.on_line(LineSensor::Left) {
        sides |= Direction::Left.bit();
    }
    if image.on_line(LineSensor::Right) {
        sides |= Direction::Right.bit();
    }

    match c.behaviors.detector {
        NodeDetector::Following => {
            if sides == 0 {
                return false;
            }
            log_debug!("crossing line, sides {:?}", sides);
            c.behaviors.detector = NodeDetector::Crossing { mask: sides };
        }
        NodeDetector::Crossing { mask } => {
            c.behaviors.detector = if sides != 0 {
                NodeDetector::Crossing { mask: mask | sides }
            } else {
                NodeDetector::Centering {
                    mask,
                    from: travel(c.hal),
                }
            };
        }
        NodeDetector::Centering { mask, from } => {
            if travel(c.hal) - from >= c.config.motion.axle_offset_steps as i32 {
                c.hal.stop_motors();
                let mut mask = mask | Direction::Back.bit();
                if image.on_line(LineSensor::Center) {
                    mask |= Direction::Front.bit();
                }
                let node = NodeDescriptor::from_mask(mask);
                c.desk.set_last_node(node);
                log_info!("node reached, directions {:?}", node.mask());
                c.go(NavigationState::HitNode);
                return true;
            }
        }
    }

    c.hal
        .set_line_and_angular_speed(c.config.motion.crossing_speed, 0);
    true
}

pub(crate) fn node_detect_reset<H: Hal>(c: &mut Conquest<'_, H>) {
    c.behaviors.detector = NodeDetector::Following;
}

// ============================================================================
// Line Following
// ============================================================================

pub(crate) fn line_follow_run<H: Hal>(c: &mut Conquest<'_, H>) -> bool {
    let m = c.config.motion;
    let error = c.image.line_value(LineSensor::Left) as i32
        - c.image.line_value(LineSensor::Right) as i32;
    let derivative = error - c.behaviors.follower.last_error;
    c.behaviors.follower.last_error = error;

    let correction = (m.kp * error + m.kd * derivative) / m.gain_divisor.max(1);
    let angular = correction.clamp(-m.max_correction, m.max_correction);
    c.hal
        .set_line_and_angular_speed(c.desk.speed() as i32, angular);
    true
}

pub(crate) fn line_follow_reset<H: Hal>(c: &mut Conquest<'_, H>) {
    c.behaviors.follower = LineFollower::default();
}

// ============================================================================
// Calibration Sampler
// ============================================================================

pub(crate) fn calibration_sample_run<H: Hal>(c: &mut Conquest<'_, H>) -> bool {
    let raw = c.image.line_raw;
    let floor = c.config.sensors.abyss_threshold;
    let sampler = &mut c.behaviors.sampler;
    for i in 0..LINE_SENSOR_COUNT {
        if raw[i] < floor {
            continue;
        }
        sampler.black[i] = sampler.black[i].min(raw[i]);
        sampler.white[i] = sampler.white[i].max(raw[i]);
    }
    sampler.samples += 1;
    false
}

pub(crate) fn calibration_sample_reset<H: Hal>(c: &mut Conquest<'_, H>) {
    c.behaviors.sampler = CalibrationSampler::default();
}

// ============================================================================
// Node Scanner
// ============================================================================

pub(crate) fn node_scan_run<H: Hal>(c: &mut Conquest<'_, H>) -> bool {
    let progress = c.behaviors.movement.progress(c.hal);
    let black = c.image.on_line(LineSensor::Center);
    let quarter = c.config.motion.quarter_turn_steps;
    c.behaviors.scanner.sample(black, progress, quarter);
    false
}

pub(crate) fn node_scan_reset<H: Hal>(c: &mut Conquest<'_, H>) {
    c.behaviors.scanner = NodeScanner::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_direction() {
        let config = MotionConfig::default();
        let right = Motion::rotation(1, &config);
        assert!(right.angular < 0);
        assert_eq!(right.steps, config.quarter_turn_steps);

        let back_left = Motion::rotation(-2, &config);
        assert!(back_left.angular > 0);
        assert_eq!(back_left.steps, 2 * config.quarter_turn_steps);
        assert_eq!(Motion::full_turn(&config).steps, 4 * config.quarter_turn_steps);
    }

    #[test]
    fn test_scanner_maps_lines_to_quadrants() {
        let quarter = 323;
        let mut scanner = NodeScanner::default();
        // Front line straddles the start of the rotation
        for progress in (0..1300).step_by(2) {
            let on_front = progress <= 24 || progress >= 1268;
            let on_left = (945..=993).contains(&progress);
            scanner.sample(on_front || on_left, progress, quarter);
        }
        let mask = scanner.finish(1300, quarter);
        assert_eq!(mask, Direction::Front.bit() | Direction::Left.bit());
    }

    #[test]
    fn test_scanner_without_lines() {
        let mut scanner = NodeScanner::default();
        for progress in 0..100 {
            scanner.sample(false, progress, 323);
        }
        assert_eq!(scanner.finish(100, 323), 0);
    }

    #[test]
    fn test_sampler_contrast() {
        let mut sampler = CalibrationSampler::default();
        assert_eq!(sampler.contrast(), 0);
        sampler.black = [400, 500, 450];
        sampler.white = [2400, 2000, 2600];
        assert_eq!(sampler.contrast(), 1500);
    }
}
