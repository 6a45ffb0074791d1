//! # Gridbot: reactive control kernel for a line-grid robot
//!
//! A two-wheeled robot explores a grid of black lines drawn on a white
//! floor. A host sends requests over a serial link (move to the next node,
//! turn, report status) and the robot answers with 32-byte frames.
//!
//! ## Architecture
//!
//! ### 1. Two state machines
//!
//! The navigation FSM tracks what the robot is physically doing; the request
//! FSM tracks which host request is being served. Both are [`fsm::Fsm`]
//! tables of enter/update/exit hooks.
//!
//! ### 2. Subsumption behaviors
//!
//! Active navigation states register prioritized behaviors (abyss guard,
//! collision guard, node detection, line following) with the
//! [`behavior::Scheduler`]. Each tick the highest-priority behavior that
//! claims the tick wins.
//!
//! ### 3. Heartbeat
//!
//! [`Conquest::heartbeat`] runs every 10 ms: snapshot sensors, update
//! navigation, serve the staged request, publish the navigation state.
//!
//! ### 4. Request desk
//!
//! Frames arrive asynchronously. Acceptors registered with the
//! [`dispatch::Dispatcher`] stage at most one request at a time on the
//! [`desk::RequestDesk`], guarded by a critical section.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gridbot::prelude::*;
//!
//! static DESK: RequestDesk = RequestDesk::new();
//!
//! let hal = EpuckHal::new();
//! let mut dispatcher = Dispatcher::new();
//! desk::install(&mut dispatcher)?;
//!
//! // UART receive path
//! dispatcher.dispatch(&DESK, &Message::from_bytes(&frame), &hal);
//!
//! // Timer path
//! let mut robot = Conquest::new(&DESK, &hal, None);
//! robot.heartbeat();
//! ```
//!
//! ## License
//!
//! MIT License

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]

mod log;

// Core modules
pub mod types;
pub mod fsm;
pub mod behavior;
pub mod sensors;
pub mod protocol;
pub mod hal;
pub mod dispatch;
pub mod desk;
pub mod behaviors;
pub mod conquest;
pub mod timer;
mod requests;

// Re-exports for convenience
pub use types::*;
pub use fsm::{Fsm, FsmRef, Hook, StateHooks};
pub use behavior::{ResetFn, RunFn, Scheduler, SchedulerRef};
pub use sensors::{LineSensor, SensorConfig, SensorImage};
pub use protocol::{Message, MoveKind, MsgType, StatusReport, FRAME_SIZE, PAYLOAD_SIZE};
pub use hal::{Hal, Transport};
pub use dispatch::{DispatchStats, Dispatcher, Handler};
pub use desk::{DeskView, RequestDesk};
pub use behaviors::MotionConfig;
pub use conquest::{heartbeat_event, Conquest, ConquestConfig, Outcome};
pub use timer::{PeriodicTimer, TimerHandle};

/// Prelude - commonly used items
pub mod prelude {
    pub use crate::types::*;
    pub use crate::fsm::Fsm;
    pub use crate::behavior::Scheduler;
    pub use crate::protocol::{Message, MoveKind, MsgType};
    pub use crate::hal::{Hal, Transport};
    pub use crate::dispatch::Dispatcher;
    pub use crate::desk::{self, RequestDesk};
    pub use crate::conquest::{Conquest, ConquestConfig};
    pub use crate::timer::PeriodicTimer;
}

// ============================================================================
// Version
// ============================================================================

/// Major version
pub const VERSION_MAJOR: u32 = 0;
/// Minor version
pub const VERSION_MINOR: u32 = 1;
/// Patch version
pub const VERSION_PATCH: u32 = 0;
/// Version string
pub const VERSION_STRING: &str = "0.1.0";

/// Get version as packed integer (major << 16 | minor << 8 | patch)
pub const fn version() -> u32 {
    (VERSION_MAJOR << 16) | (VERSION_MINOR << 8) | VERSION_PATCH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version(), 0x000100);
        assert_eq!(VERSION_STRING, env!("CARGO_PKG_VERSION"));
    }
}
