//! Gridbot - Request handlers
//!
//! Hooks of the request FSM. They run at step 3 of the heartbeat, after
//! the navigation FSM, so they always see the navigation outcome of the
//! current tick. A handler ends its request with
//! [`Conquest::finish_request`], which frees the desk for the next one.

use crate::behavior::Scheduler;
use crate::behaviors::BehaviorState;
use crate::conquest::{scheduler, Conquest, Outcome, RequestWork};
use crate::fsm::Fsm;
use crate::hal::Hal;
use crate::log::{log_info, log_warn};
use crate::protocol::{Message, MoveKind, StatusReport};
use crate::types::*;

/// Install the request hooks
pub(crate) fn configure<H: Hal>(fsm: &mut Fsm<Conquest<'_, H>>) {
    use RequestState as R;

    fsm.init();
    // Every request id is below FSM_MAX_STATES
    let _ = fsm.configure_state(R::Reset.id(), None, Some(handle_reset), None);
    let _ = fsm.configure_state(R::GetStatus.id(), None, Some(handle_status), None);
    let _ = fsm.configure_state(R::Turn.id(), Some(turn_enter), Some(handle_turn), None);
    let _ = fsm.configure_state(R::Move.id(), Some(move_enter), Some(handle_move), None);
    let _ = fsm.configure_state(R::SetSpeed.id(), None, Some(handle_set_speed), None);
    let _ = fsm.configure_state(R::SetLed.id(), None, Some(handle_set_led), None);
}

fn pending<H: Hal>(c: &Conquest<'_, H>) -> Message {
    c.desk.pending().unwrap_or_default()
}

fn refuse<H: Hal>(c: &mut Conquest<'_, H>) {
    let msg = pending(c);
    log_warn!("request {:?} cannot proceed in {:?}", msg.code, c.navigation_state());
    c.reply(Message::rejected(msg.code));
    c.finish_request();
}

// ============================================================================
// Reset
// ============================================================================

fn handle_reset<H: Hal>(c: &mut Conquest<'_, H>) {
    c.go(NavigationState::Start);
    Scheduler::reset(c, scheduler);
    c.scheduler.clear();

    c.behaviors = BehaviorState::default();
    c.outcome = Outcome::default();
    c.work = RequestWork::default();
    c.init_error = false;
    c.desk.reset();
    c.hal.stop_motors();
    c.hal.set_leds(0);

    log_info!("kernel reset");
    c.reply(Message::ok());
    c.finish_request();
}

// ============================================================================
// Status
// ============================================================================

fn handle_status<H: Hal>(c: &mut Conquest<'_, H>) {
    use NavigationState as N;

    let navigation = c.navigation_state();
    match navigation {
        N::Start => {
            if c.calibrated || !c.config.calibrate_on_start {
                c.go(N::Initial);
            } else {
                c.go(N::Calibration);
            }
        }
        N::Stop | N::Abyss => send_status(c),
        _ if c.init_error => send_status(c),
        _ => {}
    }
}

fn send_status<H: Hal>(c: &mut Conquest<'_, H>) {
    let report = StatusReport {
        uptime_ms: c.hal.time_ms(),
        abyss: c.image.abyss,
        collision: c.image.collision,
        node_mask: c.desk.last_node().high_byte(),
        speed: c.desk.speed(),
        navigation: c.navigation_state(),
        error: c.init_error,
    };
    c.reply(report.encode());
    c.finish_request();
}

// ============================================================================
// Turn
// ============================================================================

fn turn_enter<H: Hal>(c: &mut Conquest<'_, H>) {
    c.work.turns = pending(c).turn_quarters().clamp(-2, 2);
}

fn handle_turn<H: Hal>(c: &mut Conquest<'_, H>) {
    use NavigationState as N;

    match c.navigation_state() {
        N::Stop | N::HitNode => {
            let turns = c.work.turns;
            if turns == 0 {
                c.reply(Message::ok());
                c.finish_request();
            } else if turns < 0 {
                c.work.turns += 1;
                c.go(N::TurnLeft);
            } else {
                c.work.turns -= 1;
                c.go(N::TurnRight);
            }
        }
        N::TurnLeft | N::TurnRight => {}
        N::Abyss => {
            c.reply(Message::abyss(c.outcome.abyss));
            c.finish_request();
        }
        _ => refuse(c),
    }
}

// ============================================================================
// Move
// ============================================================================

fn move_enter<H: Hal>(c: &mut Conquest<'_, H>) {
    c.work.move_started = false;
}

fn handle_move<H: Hal>(c: &mut Conquest<'_, H>) {
    use NavigationState as N;

    let navigation = c.navigation_state();
    if !c.work.move_started {
        let target = match (pending(c).move_kind(), navigation) {
            (Some(MoveKind::Forward), N::Stop | N::HitNode) => N::MoveForward,
            (Some(MoveKind::Return), N::Stop | N::HitNode | N::Abyss) => N::ReturnNode,
            _ => return refuse(c),
        };
        c.work.move_started = true;
        c.go(target);
        return;
    }

    match navigation {
        N::HitNode => {
            c.reply(Message::hit_node(c.desk.last_node()));
            c.go(N::Stop);
            c.finish_request();
        }
        N::Collision => {
            c.reply(Message::collision(c.outcome.collision));
            c.go(N::Stop);
            c.finish_request();
        }
        N::Abyss => {
            c.reply(Message::abyss(c.outcome.abyss));
            c.finish_request();
        }
        _ => {}
    }
}

// ============================================================================
// SetSpeed / SetLed
// ============================================================================

fn handle_set_speed<H: Hal>(c: &mut Conquest<'_, H>) {
    let speed = pending(c).speed_steps();
    if speed > MAX_SPEED_STEPS {
        return refuse(c);
    }
    c.desk.set_speed(speed);
    log_info!("line speed {} steps/s", speed);
    c.reply(Message::ok());
    c.finish_request();
}

fn handle_set_led<H: Hal>(c: &mut Conquest<'_, H>) {
    c.hal.set_leds(pending(c).led_mask());
    c.reply(Message::ok());
    c.finish_request();
}
