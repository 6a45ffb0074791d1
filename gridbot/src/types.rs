//! Gridbot - Base types and configuration
//!
//! Capacities, error codes, the two state enumerations driven by the
//! coordinator and the node descriptor reported over the protocol.

use core::fmt;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Number of state slots in every FSM context
pub const FSM_MAX_STATES: usize = 16;

/// Capacity of the behavior arena
pub const MAX_BEHAVIORS: usize = 16;

/// Capacity of the inbound handler chain
pub const MAX_HANDLERS: usize = 8;

/// Capacity of the periodic timer table
pub const MAX_TIMER_EVENTS: usize = 8;

/// Ground (line) sensors: left, center, right
pub const LINE_SENSOR_COUNT: usize = 3;

/// Infrared proximity sensors around the body
pub const PROXIMITY_SENSOR_COUNT: usize = 8;

/// Heartbeat period in microseconds (10ms default)
pub const HEARTBEAT_PERIOD_US: u64 = 10_000;

/// Multiplier from the SetSpeed payload unit to steps per second
pub const SPEED_UNIT_STEPS: u16 = 10;

/// Platform maximum wheel speed in steps per second
pub const MAX_SPEED_STEPS: u16 = 1000;

/// Line speed used after reset, in steps per second
pub const DEFAULT_SPEED_STEPS: u16 = 300;

// ============================================================================
// Basic Types
// ============================================================================

/// Index of a state inside an FSM context
pub type StateId = usize;

/// Behavior priority (higher runs first)
pub type Priority = u8;

/// Timestamp in microseconds
pub type TimeUs = u64;

/// Raw readings of the ground sensors
pub type LineReading = [u16; LINE_SENSOR_COUNT];

/// Raw readings of the proximity sensors
pub type ProximityReading = [u16; PROXIMITY_SENSOR_COUNT];

/// Wheel selector for step counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Side {
    /// Left wheel
    Left,
    /// Right wheel
    Right,
}

// ============================================================================
// Error Types
// ============================================================================

/// Result type for gridbot operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error codes
///
/// Every variant is recoverable; callers may ignore and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Error {
    /// State index outside the FSM table
    InvalidState,
    /// Invalid argument provided
    InvalidArg,
    /// Fixed-capacity storage is full
    NoMemory,
    /// Item already registered
    AlreadyExists,
    /// Item not found
    NotFound,
    /// A request is already in flight
    Busy,
    /// Collaborator failure
    HalFailure,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Error::InvalidState => "invalid state index",
            Error::InvalidArg => "invalid argument",
            Error::NoMemory => "capacity exhausted",
            Error::AlreadyExists => "already registered",
            Error::NotFound => "not found",
            Error::Busy => "request in flight",
            Error::HalFailure => "hal failure",
        };
        f.write_str(text)
    }
}

// ============================================================================
// Navigation State
// ============================================================================

/// Physical activity of the robot (Navigation FSM states)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[repr(u8)]
pub enum NavigationState {
    /// Powered up, nothing known about the grid
    #[default]
    Start = 0,
    /// Sampling black/white levels for the line sensors
    Calibration = 1,
    /// Identifying the node the robot was placed on
    Initial = 2,
    /// Parked, waiting for a request
    Stop = 3,
    /// Following the line toward the next node
    MoveForward = 4,
    /// Quarter turn counter-clockwise
    TurnLeft = 5,
    /// Quarter turn clockwise
    TurnRight = 6,
    /// Rotating to face the first available path
    CenterLine = 7,
    /// Parked on a freshly detected node
    HitNode = 8,
    /// Parked in front of an obstacle
    Collision = 9,
    /// Parked at a drop-off
    Abyss = 10,
    /// Turning around and following the line back
    ReturnNode = 11,
}

impl NavigationState {
    /// All states in index order
    pub const ALL: [NavigationState; 12] = [
        NavigationState::Start,
        NavigationState::Calibration,
        NavigationState::Initial,
        NavigationState::Stop,
        NavigationState::MoveForward,
        NavigationState::TurnLeft,
        NavigationState::TurnRight,
        NavigationState::CenterLine,
        NavigationState::HitNode,
        NavigationState::Collision,
        NavigationState::Abyss,
        NavigationState::ReturnNode,
    ];

    /// FSM slot of this state
    pub const fn id(self) -> StateId {
        self as StateId
    }

    /// Map an FSM slot back to a state
    pub fn from_id(id: StateId) -> Option<Self> {
        Self::ALL.get(id).copied()
    }

    /// Parked states need a request to leave
    pub fn is_parked(self) -> bool {
        matches!(
            self,
            NavigationState::Stop
                | NavigationState::HitNode
                | NavigationState::Collision
                | NavigationState::Abyss
        )
    }
}

// ============================================================================
// Request State
// ============================================================================

/// Protocol request lifecycle (Request FSM states)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[repr(u8)]
pub enum RequestState {
    /// Idle, accepting requests
    #[default]
    None = 0,
    /// Reset staged
    Reset = 1,
    /// Status staged
    GetStatus = 2,
    /// Turn staged
    Turn = 3,
    /// Move staged
    Move = 4,
    /// SetSpeed staged
    SetSpeed = 5,
    /// SetLed staged
    SetLed = 6,
}

impl RequestState {
    /// All states in index order
    pub const ALL: [RequestState; 7] = [
        RequestState::None,
        RequestState::Reset,
        RequestState::GetStatus,
        RequestState::Turn,
        RequestState::Move,
        RequestState::SetSpeed,
        RequestState::SetLed,
    ];

    /// FSM slot of this state
    pub const fn id(self) -> StateId {
        self as StateId
    }

    /// Map an FSM slot back to a state
    pub fn from_id(id: StateId) -> Option<Self> {
        Self::ALL.get(id).copied()
    }

    /// A request is staged and being processed
    pub fn is_busy(self) -> bool {
        self != RequestState::None
    }
}

// ============================================================================
// Node Descriptor
// ============================================================================

/// Grid direction relative to the robot heading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[repr(u8)]
pub enum Direction {
    /// Ahead
    Front = 0,
    /// Clockwise quarter
    Right = 1,
    /// Behind
    Back = 2,
    /// Counter-clockwise quarter
    Left = 3,
}

impl Direction {
    /// Clockwise order starting ahead
    pub const ALL: [Direction; 4] = [
        Direction::Front,
        Direction::Right,
        Direction::Back,
        Direction::Left,
    ];

    /// Bit inside the descriptor direction mask
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Traversable directions of the current node, oriented to the heading
///
/// High byte: direction mask (bit 0 front, 1 right, 2 back, 3 left).
/// Low byte: flags, bit 0 marks a valid descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct NodeDescriptor(u16);

impl NodeDescriptor {
    /// No node identified yet
    pub const INVALID: NodeDescriptor = NodeDescriptor(0);

    const VALID_FLAG: u16 = 0x0001;
    const DIRECTION_MASK: u8 = 0x0F;

    /// Build a valid descriptor from a direction mask
    pub const fn from_mask(mask: u8) -> Self {
        NodeDescriptor((((mask & Self::DIRECTION_MASK) as u16) << 8) | Self::VALID_FLAG)
    }

    /// Build a valid descriptor from a list of directions
    pub fn from_directions(directions: &[Direction]) -> Self {
        let mask = directions.iter().fold(0u8, |acc, d| acc | d.bit());
        Self::from_mask(mask)
    }

    /// Raw 16-bit value as sent on the wire
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Rebuild from the wire value
    pub const fn from_raw(raw: u16) -> Self {
        NodeDescriptor(raw)
    }

    /// High byte (direction mask, zero when invalid)
    pub const fn high_byte(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Direction mask
    pub const fn mask(self) -> u8 {
        self.high_byte() & Self::DIRECTION_MASK
    }

    /// Node has been identified
    pub const fn is_valid(self) -> bool {
        self.0 & Self::VALID_FLAG != 0
    }

    /// Direction is traversable
    pub const fn has(self, direction: Direction) -> bool {
        self.is_valid() && self.mask() & direction.bit() != 0
    }

    /// Re-orient after the robot turned `quarters` clockwise (negative = ccw)
    ///
    /// What was on the right is ahead after one clockwise quarter.
    pub fn rotated(self, quarters: i8) -> Self {
        if !self.is_valid() {
            return self;
        }
        let shift = quarters.rem_euclid(4) as u32;
        let mask = self.mask();
        let rotated = ((mask >> shift) | (mask << (4 - shift))) & Self::DIRECTION_MASK;
        Self::from_mask(rotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ids_round_trip() {
        for state in NavigationState::ALL {
            assert_eq!(NavigationState::from_id(state.id()), Some(state));
        }
        assert_eq!(NavigationState::from_id(12), None);
        assert!(NavigationState::ALL.len() <= FSM_MAX_STATES);
        assert!(RequestState::ALL.len() <= FSM_MAX_STATES);
    }

    #[test]
    fn test_parked_states() {
        let parked: heapless::Vec<NavigationState, 12> = NavigationState::ALL
            .iter()
            .copied()
            .filter(|s| s.is_parked())
            .collect();
        assert_eq!(
            parked.as_slice(),
            &[
                NavigationState::Stop,
                NavigationState::HitNode,
                NavigationState::Collision,
                NavigationState::Abyss
            ]
        );
    }

    #[test]
    fn test_node_descriptor_bits() {
        let node = NodeDescriptor::from_directions(&[Direction::Front, Direction::Back]);
        assert!(node.is_valid());
        assert!(node.has(Direction::Front));
        assert!(!node.has(Direction::Left));
        assert_eq!(node.high_byte(), 0b0101);
        assert_eq!(node.raw(), 0x0501);

        assert!(!NodeDescriptor::INVALID.is_valid());
        assert_eq!(NodeDescriptor::INVALID.high_byte(), 0);
        assert!(!NodeDescriptor::INVALID.has(Direction::Front));
    }

    #[test]
    fn test_node_descriptor_rotation() {
        // Path on the right becomes the front after a clockwise quarter
        let node = NodeDescriptor::from_directions(&[Direction::Right, Direction::Back]);
        let cw = node.rotated(1);
        assert!(cw.has(Direction::Front));
        assert!(cw.has(Direction::Right));
        assert!(!cw.has(Direction::Back));

        // Path on the left becomes the front after a counter-clockwise quarter
        let node = NodeDescriptor::from_directions(&[Direction::Left]);
        assert!(node.rotated(-1).has(Direction::Front));
        assert_eq!(node.rotated(4), node);
        assert_eq!(node.rotated(2).mask(), Direction::Right.bit());
    }
}
