//! Gridbot - Request desk
//!
//! The only state shared between the byte-reception path and the
//! heartbeat: request lifecycle, pending request, requested speed, last
//! node descriptor and a snapshot of the navigation state for the
//! acceptors. Every access goes through a critical section.
//!
//! Acceptors are [`Handler`]s over the desk. Each one checks its type
//! code, that no request is in flight and, where it matters, that the
//! robot is in a state where the request makes sense. An accepted frame is
//! staged atomically; the heartbeat picks it up on its next tick.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::dispatch::{Dispatcher, Handler};
use crate::hal::Transport;
use crate::log::{log_debug, log_warn};
use crate::protocol::{Message, MoveKind, MsgType};
use crate::types::*;

struct Shared {
    request: RequestState,
    pending: Message,
    speed: u16,
    last_node: NodeDescriptor,
    navigation: NavigationState,
    init_error: bool,
    accepted: u32,
    rejected: u32,
}

impl Shared {
    const fn new() -> Self {
        Self {
            request: RequestState::None,
            pending: Message::empty(),
            speed: DEFAULT_SPEED_STEPS,
            last_node: NodeDescriptor::INVALID,
            navigation: NavigationState::Start,
            init_error: false,
            accepted: 0,
            rejected: 0,
        }
    }

    fn view(&self) -> DeskView {
        DeskView {
            request: self.request,
            pending: self.pending,
            speed: self.speed,
            last_node: self.last_node,
            navigation: self.navigation,
            init_error: self.init_error,
            accepted: self.accepted,
            rejected: self.rejected,
        }
    }
}

/// Snapshot of the desk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeskView {
    /// Request lifecycle
    pub request: RequestState,
    /// Staged frame, meaningful while `request` is busy
    pub pending: Message,
    /// Line speed in steps/s
    pub speed: u16,
    /// Last identified node
    pub last_node: NodeDescriptor,
    /// Navigation state as of the last heartbeat
    pub navigation: NavigationState,
    /// Initialization failed
    pub init_error: bool,
    /// Frames staged so far
    pub accepted: u32,
    /// Frames refused so far
    pub rejected: u32,
}

/// Shared request slot
pub struct RequestDesk {
    inner: Mutex<RefCell<Shared>>,
}

impl RequestDesk {
    /// Idle desk with default speed and no node
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Shared::new())),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    /// Consistent copy of every field
    pub fn view(&self) -> DeskView {
        self.with(|s| s.view())
    }

    /// Request lifecycle
    pub fn request_state(&self) -> RequestState {
        self.with(|s| s.request)
    }

    /// Staged frame, if a request is in flight
    pub fn pending(&self) -> Option<Message> {
        self.with(|s| s.request.is_busy().then_some(s.pending))
    }

    /// Line speed in steps/s
    pub fn speed(&self) -> u16 {
        self.with(|s| s.speed)
    }

    /// Change the line speed
    pub fn set_speed(&self, speed: u16) {
        self.with(|s| s.speed = speed);
    }

    /// Last identified node
    pub fn last_node(&self) -> NodeDescriptor {
        self.with(|s| s.last_node)
    }

    /// Record the node the robot stands on
    pub fn set_last_node(&self, node: NodeDescriptor) {
        self.with(|s| s.last_node = node);
    }

    /// Navigation state as of the last heartbeat
    pub fn navigation(&self) -> NavigationState {
        self.with(|s| s.navigation)
    }

    /// Publish the navigation snapshot read by the acceptors
    pub fn publish(&self, navigation: NavigationState, init_error: bool) {
        self.with(|s| {
            s.navigation = navigation;
            s.init_error = init_error;
        });
    }

    /// End the request in flight
    pub fn complete(&self) {
        self.with(|s| s.request = RequestState::None);
    }

    /// Restore default speed and forget the node
    ///
    /// The request in flight is left alone.
    pub fn reset(&self) {
        self.with(|s| {
            s.speed = DEFAULT_SPEED_STEPS;
            s.last_node = NodeDescriptor::INVALID;
            s.init_error = false;
        });
    }

    /// Stage `msg` as `state` when idle and `eligible` agrees
    ///
    /// The checks and the write happen in one critical section. Fails with
    /// [`Error::Busy`] while a request is in flight and
    /// [`Error::InvalidState`] when the snapshot is not eligible.
    pub fn stage(
        &self,
        msg: &Message,
        state: RequestState,
        eligible: impl FnOnce(&DeskView) -> bool,
    ) -> Result<()> {
        self.with(|s| {
            if s.request.is_busy() {
                return Err(Error::Busy);
            }
            if !eligible(&s.view()) {
                return Err(Error::InvalidState);
            }
            s.pending = *msg;
            s.request = state;
            s.accepted = s.accepted.wrapping_add(1);
            Ok(())
        })
    }

    fn count_rejected(&self) {
        self.with(|s| s.rejected = s.rejected.wrapping_add(1));
    }
}

impl Default for RequestDesk {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Acceptors
// ============================================================================

fn accept(
    desk: &RequestDesk,
    msg: &Message,
    state: RequestState,
    eligible: impl FnOnce(&DeskView) -> bool,
) -> bool {
    match desk.stage(msg, state, eligible) {
        Ok(()) => {
            log_debug!("request {:?} staged", state);
            true
        }
        Err(e) => {
            log_debug!("request {:?} not staged: {:?}", state, e);
            false
        }
    }
}

/// Reset is accepted in every navigation state
pub fn accept_reset(desk: &RequestDesk, msg: &Message, _: &dyn Transport) -> bool {
    msg.is(MsgType::ResetRequest) && accept(desk, msg, RequestState::Reset, |_| true)
}

/// Status is answered once the robot is parked or initialization settled
pub fn accept_status(desk: &RequestDesk, msg: &Message, _: &dyn Transport) -> bool {
    use NavigationState as N;

    msg.is(MsgType::StatusRequest)
        && accept(desk, msg, RequestState::GetStatus, |v| {
            matches!(
                v.navigation,
                N::Start | N::Calibration | N::Initial | N::Stop | N::Abyss
            )
        })
}

/// Turn needs a known node and at most a half turn
pub fn accept_turn(desk: &RequestDesk, msg: &Message, _: &dyn Transport) -> bool {
    use NavigationState as N;

    msg.is(MsgType::TurnRequest)
        && accept(desk, msg, RequestState::Turn, |v| {
            matches!(v.navigation, N::Stop | N::HitNode)
                && (-2..=2).contains(&msg.turn_quarters())
                && v.last_node.is_valid()
        })
}

/// Move forward needs a path ahead; return needs a known node
pub fn accept_move(desk: &RequestDesk, msg: &Message, _: &dyn Transport) -> bool {
    use NavigationState as N;

    msg.is(MsgType::MoveRequest)
        && accept(desk, msg, RequestState::Move, |v| match msg.move_kind() {
            Some(MoveKind::Forward) => {
                matches!(v.navigation, N::Stop | N::HitNode) && v.last_node.has(Direction::Front)
            }
            Some(MoveKind::Return) => {
                matches!(v.navigation, N::Stop | N::HitNode | N::Abyss) && v.last_node.is_valid()
            }
            None => false,
        })
}

/// SetSpeed is accepted while parked and only within the platform maximum
pub fn accept_set_speed(desk: &RequestDesk, msg: &Message, _: &dyn Transport) -> bool {
    msg.is(MsgType::SetSpeedRequest)
        && accept(desk, msg, RequestState::SetSpeed, |v| {
            (v.navigation.is_parked() || v.navigation == NavigationState::Start)
                && msg.speed_steps() <= MAX_SPEED_STEPS
        })
}

/// SetLed is accepted while parked, in Start, or after a failed initialization
pub fn accept_set_led(desk: &RequestDesk, msg: &Message, _: &dyn Transport) -> bool {
    msg.is(MsgType::SetLedRequest)
        && accept(desk, msg, RequestState::SetLed, |v| {
            v.navigation.is_parked() || v.navigation == NavigationState::Start || v.init_error
        })
}

/// Default handler: refuse with a Rejected reply
pub fn reject(desk: &RequestDesk, msg: &Message, tx: &dyn Transport) -> bool {
    desk.count_rejected();
    log_warn!("request {:?} rejected", msg.code);
    if let Err(e) = tx.send(&Message::rejected(msg.code)) {
        log_warn!("rejected reply dropped: {:?}", e);
    }
    true
}

/// The acceptors in registration order
pub const ACCEPTORS: [Handler<RequestDesk>; 6] = [
    accept_reset,
    accept_status,
    accept_turn,
    accept_move,
    accept_set_speed,
    accept_set_led,
];

/// Register every acceptor and the rejecting default handler
pub fn install(dispatcher: &mut Dispatcher<RequestDesk>) -> Result<()> {
    for acceptor in ACCEPTORS {
        dispatcher.register_handler(acceptor)?;
    }
    dispatcher.set_default_handler(Some(reject));
    Ok(())
}
