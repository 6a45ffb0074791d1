//! Gridbot - Wire protocol
//!
//! Every frame is 32 bytes: a little-endian 16-bit type code followed by a
//! 30-byte payload. Requests carry codes below `0x8000`, replies set the
//! top bit.
//!
//! Request payloads:
//! - Turn: byte 0, signed quarter-turn count (negative = left)
//! - Move: byte 0, 0 = forward, 1 = return to the previous node
//! - SetSpeed: byte 0, speed in units of 10 steps/s
//! - SetLed: bytes 0-1, LED mask (LE)
//!
//! Reply payloads:
//! - Status: see [`StatusReport`]
//! - HitNode: bytes 0-1, node descriptor (LE)
//! - Collision: bytes 0-7, one byte per proximity sensor (1 = triggered)
//! - Abyss: bytes 0-2, one byte per ground sensor (1 = over the void)
//! - Rejected: bytes 0-1, type code of the refused request (LE)

use crate::types::*;

/// Frame size on the wire
pub const FRAME_SIZE: usize = 32;

/// Payload bytes after the type code
pub const PAYLOAD_SIZE: usize = FRAME_SIZE - 2;

// ============================================================================
// Message Types
// ============================================================================

/// Known type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[repr(u16)]
pub enum MsgType {
    /// Reinitialize the kernel
    ResetRequest = 0x0001,
    /// Report status (also starts initialization)
    StatusRequest = 0x0002,
    /// Rotate by quarter turns
    TurnRequest = 0x0003,
    /// Drive to the next node
    MoveRequest = 0x0004,
    /// Change the line speed
    SetSpeedRequest = 0x0005,
    /// Drive the LEDs
    SetLedRequest = 0x0006,
    /// Request completed
    Ok = 0x8000,
    /// Status report
    Status = 0x8001,
    /// Move ended on a node
    HitNode = 0x8002,
    /// Move ended in front of an obstacle
    Collision = 0x8003,
    /// Move or turn ended at a drop-off
    Abyss = 0x8004,
    /// Request refused
    Rejected = 0x80FF,
}

impl MsgType {
    /// Decode a type code
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x0001 => MsgType::ResetRequest,
            0x0002 => MsgType::StatusRequest,
            0x0003 => MsgType::TurnRequest,
            0x0004 => MsgType::MoveRequest,
            0x0005 => MsgType::SetSpeedRequest,
            0x0006 => MsgType::SetLedRequest,
            0x8000 => MsgType::Ok,
            0x8001 => MsgType::Status,
            0x8002 => MsgType::HitNode,
            0x8003 => MsgType::Collision,
            0x8004 => MsgType::Abyss,
            0x80FF => MsgType::Rejected,
            _ => return None,
        })
    }

    /// Wire code
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Sent by the host
    pub const fn is_request(self) -> bool {
        self.code() & 0x8000 == 0
    }
}

impl TryFrom<u16> for MsgType {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        Self::from_code(code).ok_or(Error::InvalidArg)
    }
}

/// Direction of a Move request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum MoveKind {
    /// Follow the line ahead
    Forward,
    /// Turn around and go back
    Return,
}

// ============================================================================
// Message
// ============================================================================

/// One protocol frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Type code
    pub code: u16,
    /// Payload, zero padded
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Message {
    /// Zero code, zero payload
    pub const fn empty() -> Self {
        Self {
            code: 0,
            payload: [0; PAYLOAD_SIZE],
        }
    }

    /// Frame of `kind` with an empty payload
    pub const fn new(kind: MsgType) -> Self {
        Self {
            code: kind.code(),
            payload: [0; PAYLOAD_SIZE],
        }
    }

    /// Frame of `kind` with the payload prefix `data`
    pub fn with_payload(kind: MsgType, data: &[u8]) -> Result<Self> {
        if data.len() > PAYLOAD_SIZE {
            return Err(Error::InvalidArg);
        }
        let mut msg = Self::new(kind);
        msg.payload[..data.len()].copy_from_slice(data);
        Ok(msg)
    }

    /// Decoded type, if known
    pub fn kind(&self) -> Option<MsgType> {
        MsgType::from_code(self.code)
    }

    /// Type code equals `kind`
    pub fn is(&self, kind: MsgType) -> bool {
        self.code == kind.code()
    }

    /// Serialize to the wire layout
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut out = [0u8; FRAME_SIZE];
        out[..2].copy_from_slice(&self.code.to_le_bytes());
        out[2..].copy_from_slice(&self.payload);
        out
    }

    /// Parse the wire layout
    pub fn from_bytes(bytes: &[u8; FRAME_SIZE]) -> Self {
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[2..]);
        Self {
            code: u16::from_le_bytes([bytes[0], bytes[1]]),
            payload,
        }
    }

    /// Parse a buffer that must hold exactly one frame
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let frame: &[u8; FRAME_SIZE] = bytes.try_into().map_err(|_| Error::InvalidArg)?;
        Ok(Self::from_bytes(frame))
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.payload[offset], self.payload[offset + 1]])
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Reset request
    pub const fn reset_request() -> Self {
        Self::new(MsgType::ResetRequest)
    }

    /// Status request
    pub const fn status_request() -> Self {
        Self::new(MsgType::StatusRequest)
    }

    /// Turn request, negative counts turn left
    pub fn turn_request(quarters: i8) -> Self {
        let mut msg = Self::new(MsgType::TurnRequest);
        msg.payload[0] = quarters as u8;
        msg
    }

    /// Move request
    pub fn move_request(kind: MoveKind) -> Self {
        let mut msg = Self::new(MsgType::MoveRequest);
        msg.payload[0] = match kind {
            MoveKind::Forward => 0,
            MoveKind::Return => 1,
        };
        msg
    }

    /// SetSpeed request in units of 10 steps/s
    pub fn set_speed_request(units: u8) -> Self {
        let mut msg = Self::new(MsgType::SetSpeedRequest);
        msg.payload[0] = units;
        msg
    }

    /// SetLed request
    pub fn set_led_request(mask: u16) -> Self {
        let mut msg = Self::new(MsgType::SetLedRequest);
        msg.payload[..2].copy_from_slice(&mask.to_le_bytes());
        msg
    }

    /// Quarter turns of a Turn request
    pub fn turn_quarters(&self) -> i8 {
        self.payload[0] as i8
    }

    /// Direction of a Move request
    pub fn move_kind(&self) -> Option<MoveKind> {
        match self.payload[0] {
            0 => Some(MoveKind::Forward),
            1 => Some(MoveKind::Return),
            _ => None,
        }
    }

    /// Speed of a SetSpeed request in steps/s
    pub fn speed_steps(&self) -> u16 {
        self.payload[0] as u16 * SPEED_UNIT_STEPS
    }

    /// LED mask of a SetLed request
    pub fn led_mask(&self) -> u16 {
        self.u16_at(0)
    }

    // ------------------------------------------------------------------------
    // Replies
    // ------------------------------------------------------------------------

    /// Completion reply
    pub const fn ok() -> Self {
        Self::new(MsgType::Ok)
    }

    /// Refusal of the request with `code`
    pub fn rejected(code: u16) -> Self {
        let mut msg = Self::new(MsgType::Rejected);
        msg.payload[..2].copy_from_slice(&code.to_le_bytes());
        msg
    }

    /// Node reached
    pub fn hit_node(node: NodeDescriptor) -> Self {
        let mut msg = Self::new(MsgType::HitNode);
        msg.payload[..2].copy_from_slice(&node.raw().to_le_bytes());
        msg
    }

    /// Obstacle reached, one byte per proximity sensor
    pub fn collision(mask: u8) -> Self {
        let mut msg = Self::new(MsgType::Collision);
        spread_bits(mask, &mut msg.payload[..PROXIMITY_SENSOR_COUNT]);
        msg
    }

    /// Drop-off reached, one byte per ground sensor
    pub fn abyss(mask: u8) -> Self {
        let mut msg = Self::new(MsgType::Abyss);
        spread_bits(mask, &mut msg.payload[..LINE_SENSOR_COUNT]);
        msg
    }

    /// Refused type code carried by a Rejected reply
    pub fn rejected_code(&self) -> u16 {
        self.u16_at(0)
    }

    /// Descriptor carried by a HitNode reply
    pub fn node(&self) -> NodeDescriptor {
        NodeDescriptor::from_raw(self.u16_at(0))
    }

    /// Sensor mask carried by a Collision or Abyss reply
    pub fn sensor_mask(&self) -> u8 {
        let count = if self.is(MsgType::Collision) {
            PROXIMITY_SENSOR_COUNT
        } else {
            LINE_SENSOR_COUNT
        };
        gather_bits(&self.payload[..count])
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::empty()
    }
}

fn spread_bits(mask: u8, out: &mut [u8]) {
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = (mask >> i) & 1;
    }
}

fn gather_bits(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, b)| acc | (((*b != 0) as u8) << i))
}

// ============================================================================
// Status Report
// ============================================================================

/// Payload of a Status reply
///
/// | Bytes | Field |
/// |-------|-------|
/// | 0-3   | uptime in ms (LE) |
/// | 4-6   | abyss, one byte per ground sensor |
/// | 7-14  | collision, one byte per proximity sensor |
/// | 15    | node descriptor high byte |
/// | 16-17 | line speed in steps/s (LE) |
/// | 18    | navigation state |
/// | 19    | 1 when initialization failed |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct StatusReport {
    /// Milliseconds since boot
    pub uptime_ms: u32,
    /// Ground sensors over a drop-off
    pub abyss: u8,
    /// Proximity sensors above threshold
    pub collision: u8,
    /// Direction mask of the last node (descriptor high byte)
    pub node_mask: u8,
    /// Line speed in steps/s
    pub speed: u16,
    /// Navigation state
    pub navigation: NavigationState,
    /// Initialization failed
    pub error: bool,
}

impl StatusReport {
    const ABYSS_AT: usize = 4;
    const COLLISION_AT: usize = 7;
    const NODE_AT: usize = 15;
    const SPEED_AT: usize = 16;
    const NAV_AT: usize = 18;
    const ERROR_AT: usize = 19;

    /// Build the Status reply
    pub fn encode(&self) -> Message {
        let mut msg = Message::new(MsgType::Status);
        let p = &mut msg.payload;
        p[..4].copy_from_slice(&self.uptime_ms.to_le_bytes());
        spread_bits(self.abyss, &mut p[Self::ABYSS_AT..Self::COLLISION_AT]);
        spread_bits(self.collision, &mut p[Self::COLLISION_AT..Self::NODE_AT]);
        p[Self::NODE_AT] = self.node_mask;
        p[Self::SPEED_AT..Self::NAV_AT].copy_from_slice(&self.speed.to_le_bytes());
        p[Self::NAV_AT] = self.navigation as u8;
        p[Self::ERROR_AT] = self.error as u8;
        msg
    }

    /// Parse a Status reply
    pub fn decode(msg: &Message) -> Result<Self> {
        if !msg.is(MsgType::Status) {
            return Err(Error::InvalidArg);
        }
        let p = &msg.payload;
        let navigation =
            NavigationState::from_id(p[Self::NAV_AT] as StateId).ok_or(Error::InvalidArg)?;
        Ok(Self {
            uptime_ms: u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
            abyss: gather_bits(&p[Self::ABYSS_AT..Self::COLLISION_AT]),
            collision: gather_bits(&p[Self::COLLISION_AT..Self::NODE_AT]),
            node_mask: p[Self::NODE_AT],
            speed: msg.u16_at(Self::SPEED_AT),
            navigation,
            error: p[Self::ERROR_AT] != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let msg = Message::set_led_request(0x0102);
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), FRAME_SIZE);
        assert_eq!(&bytes[..4], &[0x06, 0x00, 0x02, 0x01]);
        assert!(bytes[4..].iter().all(|b| *b == 0));
        assert_eq!(Message::from_bytes(&bytes), msg);
    }

    #[test]
    fn test_from_slice_length() {
        assert_eq!(Message::from_slice(&[0u8; 31]), Err(Error::InvalidArg));
        assert_eq!(Message::from_slice(&[0u8; 33]), Err(Error::InvalidArg));
        let msg = Message::from_slice(&Message::ok().to_bytes()).unwrap();
        assert_eq!(msg.kind(), Some(MsgType::Ok));
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(MsgType::try_from(0x0004), Ok(MsgType::MoveRequest));
        assert_eq!(MsgType::try_from(0x1234), Err(Error::InvalidArg));
        assert!(MsgType::TurnRequest.is_request());
        assert!(!MsgType::Rejected.is_request());
        assert_eq!(MsgType::Rejected.code(), 0x80FF);
    }

    #[test]
    fn test_request_payloads() {
        assert_eq!(Message::turn_request(-2).turn_quarters(), -2);
        assert_eq!(
            Message::move_request(MoveKind::Return).move_kind(),
            Some(MoveKind::Return)
        );
        assert_eq!(Message::set_speed_request(50).speed_steps(), 500);

        let mut bogus = Message::new(MsgType::MoveRequest);
        bogus.payload[0] = 7;
        assert_eq!(bogus.move_kind(), None);
    }

    #[test]
    fn test_payload_too_long() {
        assert_eq!(
            Message::with_payload(MsgType::Ok, &[0u8; PAYLOAD_SIZE + 1]),
            Err(Error::InvalidArg)
        );
        let msg = Message::with_payload(MsgType::Ok, &[9, 8]).unwrap();
        assert_eq!(&msg.payload[..3], &[9, 8, 0]);
    }

    #[test]
    fn test_sensor_replies() {
        let msg = Message::collision(0b1000_0001);
        assert_eq!(&msg.payload[..8], &[1, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(msg.sensor_mask(), 0b1000_0001);

        let msg = Message::abyss(0b010);
        assert_eq!(&msg.payload[..3], &[0, 1, 0]);
        assert_eq!(msg.payload[3], 0);
        assert_eq!(msg.sensor_mask(), 0b010);

        let node = NodeDescriptor::from_directions(&[Direction::Front, Direction::Left]);
        assert_eq!(Message::hit_node(node).node(), node);
        assert_eq!(Message::rejected(0x0003).rejected_code(), 0x0003);
    }

    #[test]
    fn test_status_layout() {
        let report = StatusReport {
            uptime_ms: 0x0403_0201,
            abyss: 0b001,
            collision: 0b0100_0000,
            node_mask: 0b1010,
            speed: 500,
            navigation: NavigationState::Stop,
            error: false,
        };
        let msg = report.encode();
        let p = &msg.payload;
        assert_eq!(&p[..4], &[1, 2, 3, 4]);
        assert_eq!(&p[4..7], &[1, 0, 0]);
        assert_eq!(p[13], 1);
        assert_eq!(p[15], 0b1010);
        assert_eq!(u16::from_le_bytes([p[16], p[17]]), 500);
        assert_eq!(p[18], 3);
        assert_eq!(StatusReport::decode(&msg), Ok(report));
        assert_eq!(StatusReport::decode(&Message::ok()), Err(Error::InvalidArg));
    }
}
