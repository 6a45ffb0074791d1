//! Gridbot - Navigation coordinator
//!
//! [`Conquest`] owns the two state machines, the behavior scheduler and the
//! sensor image, and runs them from a fixed-period heartbeat:
//!
//! 1. Capture the sensor image
//! 2. Update the navigation FSM (active states run the scheduler)
//! 3. Pick up the request staged on the desk and update the request FSM
//! 4. Publish the navigation state for the acceptors
//!
//! Navigation states register their behaviors on entry. Their exit hooks
//! reset and unregister every behavior, so only the active state's
//! behaviors are ever in the scheduler.
//!
//! ```ignore
//! let desk = RequestDesk::new();
//! let hal = EpuckHal::new();
//! let mut robot = Conquest::new(&desk, &hal, None);
//!
//! loop {
//!     wait_for_tick();
//!     robot.heartbeat();
//! }
//! ```

use heapless::HistoryBuffer;

use crate::behavior::{ResetFn, RunFn, Scheduler};
use crate::behaviors::*;
use crate::desk::RequestDesk;
use crate::fsm::{Fsm, Hook};
use crate::hal::Hal;
use crate::log::{log_debug, log_error, log_info, log_warn};
use crate::protocol::Message;
use crate::requests;
use crate::sensors::{SensorConfig, SensorImage};
use crate::types::*;

/// LEDs lit when initialization fails
pub const ERROR_LED_MASK: u16 = 0x00FF;

/// Navigation states remembered by [`Conquest::history`]
pub const NAV_HISTORY_LEN: usize = 8;

// ============================================================================
// Configuration
// ============================================================================

/// Coordinator configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct ConquestConfig {
    /// Detection thresholds
    pub sensors: SensorConfig,
    /// Drive geometry and gains
    pub motion: MotionConfig,
    /// Heartbeat period (microseconds)
    pub heartbeat_period: TimeUs,
    /// Calibrate the line sensors before the first node scan
    pub calibrate_on_start: bool,
    /// Smallest usable black/white spread on every ground sensor
    pub min_contrast: u16,
}

impl Default for ConquestConfig {
    fn default() -> Self {
        Self {
            sensors: SensorConfig::default(),
            motion: MotionConfig::default(),
            heartbeat_period: HEARTBEAT_PERIOD_US,
            calibrate_on_start: true,
            min_contrast: 300,
        }
    }
}

/// Sensor masks captured when a move or turn ended abnormally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Ground sensors over the drop-off
    pub abyss: u8,
    /// Proximity sensors above threshold
    pub collision: u8,
}

/// State and its enter/update/exit hooks
type StateRow<C> = (NavigationState, Option<Hook<C>>, Option<Hook<C>>, Option<Hook<C>>);

/// Working state of the request in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RequestWork {
    /// Quarter turns still to start (negative = left)
    pub turns: i8,
    /// Move request already left the node
    pub move_started: bool,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Reactive navigation kernel
pub struct Conquest<'a, H: Hal> {
    pub(crate) hal: &'a H,
    pub(crate) desk: &'a RequestDesk,
    pub(crate) config: ConquestConfig,
    navigation: Fsm<Conquest<'a, H>>,
    requests: Fsm<Conquest<'a, H>>,
    pub(crate) scheduler: Scheduler<Conquest<'a, H>>,
    pub(crate) image: SensorImage,
    pub(crate) behaviors: BehaviorState,
    pub(crate) outcome: Outcome,
    pub(crate) work: RequestWork,
    /// Rotation planned by CenterLine, in quarters
    centering: i8,
    /// ReturnNode finished its half turn and drives along the line
    turned_back: bool,
    pub(crate) calibrated: bool,
    pub(crate) init_error: bool,
    history: HistoryBuffer<NavigationState, NAV_HISTORY_LEN>,
    ticks: u32,
}

pub(crate) fn navigation_fsm<'c, 'a, H: Hal>(
    c: &'c mut Conquest<'a, H>,
) -> &'c mut Fsm<Conquest<'a, H>> {
    &mut c.navigation
}

pub(crate) fn request_fsm<'c, 'a, H: Hal>(
    c: &'c mut Conquest<'a, H>,
) -> &'c mut Fsm<Conquest<'a, H>> {
    &mut c.requests
}

pub(crate) fn scheduler<'c, 'a, H: Hal>(
    c: &'c mut Conquest<'a, H>,
) -> &'c mut Scheduler<Conquest<'a, H>> {
    &mut c.scheduler
}

impl<'a, H: Hal> Conquest<'a, H> {
    /// Create a coordinator in `Start` with no request in flight
    pub fn new(desk: &'a RequestDesk, hal: &'a H, config: Option<ConquestConfig>) -> Self {
        let mut conquest = Self {
            hal,
            desk,
            config: config.unwrap_or_default(),
            navigation: Fsm::new(),
            requests: Fsm::new(),
            scheduler: Scheduler::new(),
            image: SensorImage::new(),
            behaviors: BehaviorState::default(),
            outcome: Outcome::default(),
            work: RequestWork::default(),
            centering: 0,
            turned_back: false,
            calibrated: false,
            init_error: false,
            history: HistoryBuffer::new(),
            ticks: 0,
        };
        conquest.configure_navigation();
        requests::configure(&mut conquest.requests);
        desk.publish(NavigationState::Start, false);
        log_info!("conquest ready on {:?}", hal.platform_name());
        conquest
    }

    fn configure_navigation(&mut self) {
        use NavigationState as N;

        let fsm = &mut self.navigation;
        fsm.init();
        let table: [StateRow<Self>; 12] = [
            (N::Start, Some(halt), None, None),
            (N::Calibration, Some(calibration_enter), Some(calibration_update), Some(teardown)),
            (N::Initial, Some(initial_enter), Some(initial_update), Some(teardown)),
            (N::Stop, Some(halt), None, None),
            (N::MoveForward, Some(move_forward_enter), Some(run_behaviors), Some(teardown)),
            (N::TurnLeft, Some(turn_left_enter), Some(turn_left_update), Some(teardown)),
            (N::TurnRight, Some(turn_right_enter), Some(turn_right_update), Some(teardown)),
            (N::CenterLine, Some(center_line_enter), Some(center_line_update), Some(teardown)),
            (N::HitNode, Some(halt), None, None),
            (N::Collision, Some(halt), None, None),
            (N::Abyss, Some(halt), None, None),
            (N::ReturnNode, Some(return_node_enter), Some(return_node_update), Some(teardown)),
        ];
        for (state, on_enter, on_update, on_exit) in table {
            // Every navigation id is below FSM_MAX_STATES
            let _ = fsm.configure_state(state.id(), on_enter, on_update, on_exit);
        }
    }

    /// Run one control cycle
    pub fn heartbeat(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
        self.image = SensorImage::capture(self.hal, &self.config.sensors);

        Fsm::update(self, navigation_fsm);

        self.sync_requests();
        Fsm::update(self, request_fsm);

        self.desk.publish(self.navigation_state(), self.init_error);
    }

    /// Enter the busy state staged by an acceptor
    fn sync_requests(&mut self) {
        let staged = self.desk.request_state();
        if staged.id() == self.requests.state() {
            return;
        }
        log_debug!("request {:?} picked up", staged);
        let _ = Fsm::switch(self, request_fsm, staged.id());
    }

    /// Current navigation state
    pub fn navigation_state(&self) -> NavigationState {
        NavigationState::from_id(self.navigation.state()).unwrap_or_default()
    }

    /// Current request state as seen by the heartbeat
    pub fn request_state(&self) -> RequestState {
        RequestState::from_id(self.requests.state()).unwrap_or_default()
    }

    /// Sensor image of the last heartbeat
    pub fn image(&self) -> &SensorImage {
        &self.image
    }

    /// Masks captured by the last abyss or collision
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Line sensors calibrated since power-up
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Initialization failed; cleared by Reset
    pub fn has_init_error(&self) -> bool {
        self.init_error
    }

    /// Behaviors currently registered
    pub fn active_behaviors(&self) -> usize {
        self.scheduler.len()
    }

    /// Navigation states entered recently, oldest first
    ///
    /// Includes states entered and left within one heartbeat.
    pub fn history(&self) -> impl Iterator<Item = NavigationState> + '_ {
        self.history.oldest_ordered().copied()
    }

    /// Heartbeats run so far
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Configuration in use
    pub fn config(&self) -> &ConquestConfig {
        &self.config
    }

    /// Switch the navigation FSM
    pub(crate) fn go(&mut self, state: NavigationState) {
        log_info!("navigation {:?} -> {:?}", self.navigation_state(), state);
        self.history.write(state);
        let _ = Fsm::switch(self, navigation_fsm, state.id());
    }

    /// Return the request FSM and the desk to idle
    pub(crate) fn finish_request(&mut self) {
        self.desk.complete();
        let _ = Fsm::switch(self, request_fsm, RequestState::None.id());
    }

    /// Send a reply, logging transport failures
    pub(crate) fn reply(&self, msg: Message) {
        if let Err(e) = self.hal.send(&msg) {
            log_warn!("reply {:?} dropped: {:?}", msg.code, e);
        }
    }

    /// Reset every registered behavior, then unregister them all
    pub(crate) fn drop_behaviors(&mut self) {
        Scheduler::reset(self, scheduler);
        self.scheduler.clear();
    }

    fn enlist(&mut self, run: RunFn<Self>, reset: Option<ResetFn<Self>>, priority: Priority) {
        if let Err(e) = self.scheduler.register(run, reset, priority) {
            log_error!("behavior registration failed: {:?}", e);
        }
    }

    fn fail_init(&mut self) {
        log_error!("initialization failed in {:?}", self.navigation_state());
        self.init_error = true;
        self.hal.stop_motors();
        self.hal.set_leds(ERROR_LED_MASK);
        self.drop_behaviors();
    }
}

/// Timer callback running one heartbeat
pub fn heartbeat_event<H: Hal>(c: &mut Conquest<'_, H>) {
    c.heartbeat();
}

// ============================================================================
// Shared Hooks
// ============================================================================

fn halt<H: Hal>(c: &mut Conquest<'_, H>) {
    c.hal.stop_motors();
}

fn teardown<H: Hal>(c: &mut Conquest<'_, H>) {
    c.drop_behaviors();
}

fn run_behaviors<H: Hal>(c: &mut Conquest<'_, H>) {
    Scheduler::run(c, scheduler);
}

// ============================================================================
// Calibration
// ============================================================================

fn calibration_enter<H: Hal>(c: &mut Conquest<'_, H>) {
    c.behaviors.sampler = CalibrationSampler::default();
    c.behaviors.movement.plan(Motion::full_turn(&c.config.motion));
    c.enlist(calibration_sample_run, Some(calibration_sample_reset), PRIORITY_SAMPLER);
    c.enlist(movement_run, Some(movement_reset), PRIORITY_MOVEMENT);
}

fn calibration_update<H: Hal>(c: &mut Conquest<'_, H>) {
    if c.init_error {
        return;
    }
    Scheduler::run(c, scheduler);
    if !c.behaviors.movement.is_finished() {
        return;
    }

    let sampler = c.behaviors.sampler;
    if sampler.contrast() < c.config.min_contrast {
        log_warn!("line contrast {} too low", sampler.contrast());
        c.fail_init();
        return;
    }
    match c.hal.calibrate_line(&sampler.black, &sampler.white) {
        Ok(()) => {
            log_info!("line sensors calibrated over {} samples", sampler.samples);
            c.calibrated = true;
            c.go(NavigationState::Initial);
        }
        Err(e) => {
            log_warn!("line calibration refused: {:?}", e);
            c.fail_init();
        }
    }
}

// ============================================================================
// Initial / CenterLine
// ============================================================================

fn initial_enter<H: Hal>(c: &mut Conquest<'_, H>) {
    c.behaviors.scanner = NodeScanner::default();
    c.behaviors.movement.plan(Motion::full_turn(&c.config.motion));
    c.enlist(node_scan_run, Some(node_scan_reset), PRIORITY_SAMPLER);
    c.enlist(movement_run, Some(movement_reset), PRIORITY_MOVEMENT);
}

fn initial_update<H: Hal>(c: &mut Conquest<'_, H>) {
    if c.init_error {
        return;
    }
    Scheduler::run(c, scheduler);
    if !c.behaviors.movement.is_finished() {
        return;
    }

    let progress = c.behaviors.movement.progress(c.hal);
    let mask = c
        .behaviors
        .scanner
        .finish(progress, c.config.motion.quarter_turn_steps);
    if mask == 0 {
        log_warn!("no line found around the start node");
        c.fail_init();
        return;
    }

    let node = NodeDescriptor::from_mask(mask);
    c.desk.set_last_node(node);
    log_info!("start node directions {:?}", node.mask());
    if node.has(Direction::Front) {
        c.go(NavigationState::Stop);
    } else {
        c.go(NavigationState::CenterLine);
    }
}

fn center_line_enter<H: Hal>(c: &mut Conquest<'_, H>) {
    let node = c.desk.last_node();
    c.centering = if node.has(Direction::Right) {
        1
    } else if node.has(Direction::Left) {
        -1
    } else {
        2
    };
    c.behaviors
        .movement
        .plan(Motion::rotation(c.centering, &c.config.motion));
    c.enlist(movement_run, Some(movement_reset), PRIORITY_MOVEMENT);
}

fn center_line_update<H: Hal>(c: &mut Conquest<'_, H>) {
    Scheduler::run(c, scheduler);
    if c.behaviors.movement.is_finished() {
        let node = c.desk.last_node().rotated(c.centering);
        c.desk.set_last_node(node);
        c.go(NavigationState::Stop);
    }
}

// ============================================================================
// Driving
// ============================================================================

fn enlist_line_behaviors<H: Hal>(c: &mut Conquest<'_, H>) {
    c.enlist(collision_run, Some(collision_reset), PRIORITY_COLLISION);
    c.enlist(node_detect_run, Some(node_detect_reset), PRIORITY_NODE);
    c.enlist(line_follow_run, Some(line_follow_reset), PRIORITY_LINE);
}

fn move_forward_enter<H: Hal>(c: &mut Conquest<'_, H>) {
    c.hal.set_step_counters(0);
    c.enlist(abyss_run, Some(abyss_reset), PRIORITY_ABYSS);
    enlist_line_behaviors(c);
}

/// Half turn in place first; the guards join once the robot faces back
fn return_node_enter<H: Hal>(c: &mut Conquest<'_, H>) {
    c.turned_back = false;
    c.behaviors
        .movement
        .plan(Motion::rotation(2, &c.config.motion));
    c.enlist(movement_run, Some(movement_reset), PRIORITY_MOVEMENT);
}

fn return_node_update<H: Hal>(c: &mut Conquest<'_, H>) {
    Scheduler::run(c, scheduler);
    if c.turned_back || !c.behaviors.movement.is_finished() {
        return;
    }

    let node = c.desk.last_node().rotated(2);
    c.desk.set_last_node(node);
    c.turned_back = true;
    c.drop_behaviors();
    move_forward_enter(c);
}

// ============================================================================
// Turns
// ============================================================================

fn start_turn<H: Hal>(c: &mut Conquest<'_, H>, quarters: i8) {
    c.behaviors
        .movement
        .plan(Motion::rotation(quarters, &c.config.motion));
    c.enlist(abyss_run, Some(abyss_reset), PRIORITY_ABYSS);
    c.enlist(movement_run, Some(movement_reset), PRIORITY_MOVEMENT);
}

fn finish_turn<H: Hal>(c: &mut Conquest<'_, H>, state: NavigationState, quarters: i8) {
    Scheduler::run(c, scheduler);
    if c.navigation_state() == state && c.behaviors.movement.is_finished() {
        let node = c.desk.last_node().rotated(quarters);
        c.desk.set_last_node(node);
        c.go(NavigationState::Stop);
    }
}

fn turn_left_enter<H: Hal>(c: &mut Conquest<'_, H>) {
    start_turn(c, -1);
}

fn turn_left_update<H: Hal>(c: &mut Conquest<'_, H>) {
    finish_turn(c, NavigationState::TurnLeft, -1);
}

fn turn_right_enter<H: Hal>(c: &mut Conquest<'_, H>) {
    start_turn(c, 1);
}

fn turn_right_update<H: Hal>(c: &mut Conquest<'_, H>) {
    finish_turn(c, NavigationState::TurnRight, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::{MockHal, BLACK_RAW, VOID_RAW, WHITE_RAW};

    fn tick(c: &mut Conquest<'_, MockHal>, hal: &MockHal) {
        hal.advance_time(HEARTBEAT_PERIOD_US);
        c.heartbeat();
    }

    #[test]
    fn test_starts_idle() {
        let desk = RequestDesk::new();
        let hal = MockHal::new();
        let mut c = Conquest::new(&desk, &hal, None);
        for _ in 0..10 {
            tick(&mut c, &hal);
        }
        assert_eq!(c.navigation_state(), NavigationState::Start);
        assert_eq!(c.request_state(), RequestState::None);
        assert_eq!(c.active_behaviors(), 0);
        assert_eq!(c.ticks(), 10);
        assert!(hal.sent().is_empty());
    }

    #[test]
    fn test_move_forward_registers_line_behaviors() {
        let desk = RequestDesk::new();
        let hal = MockHal::new();
        let mut c = Conquest::new(&desk, &hal, None);

        c.go(NavigationState::MoveForward);
        assert_eq!(c.active_behaviors(), 4);
        assert_eq!(c.scheduler.priorities().as_slice(), &[250, 150, 100, 50]);

        c.go(NavigationState::Stop);
        assert_eq!(c.active_behaviors(), 0);
    }

    #[test]
    fn test_abyss_stops_and_captures_mask() {
        let desk = RequestDesk::new();
        let hal = MockHal::new();
        let mut c = Conquest::new(&desk, &hal, None);
        hal.set_line([WHITE_RAW, BLACK_RAW, WHITE_RAW]);
        c.go(NavigationState::MoveForward);
        tick(&mut c, &hal);
        assert!(hal.speeds().0 > 0);

        hal.set_line([WHITE_RAW, VOID_RAW, WHITE_RAW]);
        tick(&mut c, &hal);
        assert_eq!(c.navigation_state(), NavigationState::Abyss);
        assert_eq!(c.outcome().abyss, 0b010);
        assert_eq!(hal.speeds(), (0, 0));
        assert_eq!(c.active_behaviors(), 0);
        assert_eq!(desk.navigation(), NavigationState::Abyss);
    }

    #[test]
    fn test_collision_needs_consecutive_ticks() {
        let desk = RequestDesk::new();
        let hal = MockHal::new();
        let mut c = Conquest::new(&desk, &hal, None);
        hal.set_line([WHITE_RAW, BLACK_RAW, WHITE_RAW]);
        c.go(NavigationState::MoveForward);

        let mut prox = [0; PROXIMITY_SENSOR_COUNT];
        prox[7] = 3000;
        hal.set_proximity(prox);
        tick(&mut c, &hal);
        assert_eq!(c.navigation_state(), NavigationState::MoveForward);
        tick(&mut c, &hal);
        assert_eq!(c.navigation_state(), NavigationState::Collision);
        assert_eq!(c.outcome().collision, 0b1000_0000);
    }

    #[test]
    fn test_return_turns_before_guarding() {
        let desk = RequestDesk::new();
        let hal = MockHal::new();
        let mut c = Conquest::new(&desk, &hal, None);
        desk.set_last_node(NodeDescriptor::from_directions(&[
            Direction::Front,
            Direction::Right,
        ]));
        hal.set_line([WHITE_RAW, VOID_RAW, WHITE_RAW]);
        c.go(NavigationState::ReturnNode);
        assert_eq!(c.active_behaviors(), 1);

        let mut guard = 0;
        while !c.turned_back {
            tick(&mut c, &hal);
            assert_eq!(c.navigation_state(), NavigationState::ReturnNode);
            guard += 1;
            assert!(guard < 1000);
        }
        assert_eq!(c.scheduler.priorities().as_slice(), &[250, 150, 100, 50]);
        assert_eq!(desk.last_node().mask(), 0b1100);

        // Still over the edge once facing back
        tick(&mut c, &hal);
        assert_eq!(c.navigation_state(), NavigationState::Abyss);
        assert_eq!(c.outcome().abyss, 0b010);
    }

    #[test]
    fn test_turn_rotates_descriptor() {
        let desk = RequestDesk::new();
        let hal = MockHal::new();
        let mut c = Conquest::new(&desk, &hal, None);
        desk.set_last_node(NodeDescriptor::from_directions(&[
            Direction::Front,
            Direction::Right,
        ]));
        c.go(NavigationState::TurnRight);

        let mut guard = 0;
        while c.navigation_state() == NavigationState::TurnRight {
            tick(&mut c, &hal);
            guard += 1;
            assert!(guard < 1000);
        }
        assert_eq!(c.navigation_state(), NavigationState::Stop);
        let node = desk.last_node();
        assert!(node.has(Direction::Front));
        assert!(node.has(Direction::Left));
        assert!(!node.has(Direction::Right));
        assert!(hal.step_count(Side::Left) >= 323);
    }
}
