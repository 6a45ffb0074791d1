//! Gridbot - Finite State Machine engine
//!
//! A state container with optional enter/update/exit hooks per state.
//! Hooks are plain `fn` pointers over a caller-defined context `C`, the
//! same context that owns the FSM. Transitions are therefore driven through
//! an accessor (`FsmRef<C>`) that locates the FSM inside the context, which
//! lets a hook call [`Fsm::switch`] on its own or any other FSM.
//!
//! ```ignore
//! struct Robot { fsm: Fsm<Robot>, ticks: u32 }
//!
//! fn fsm(r: &mut Robot) -> &mut Fsm<Robot> { &mut r.fsm }
//! fn count(r: &mut Robot) { r.ticks += 1; }
//!
//! robot.fsm.configure_state(1, None, Some(count), None)?;
//! Fsm::switch(&mut robot, fsm, 1)?;
//! Fsm::update(&mut robot, fsm);
//! ```

use crate::types::*;

/// State hook
pub type Hook<C> = fn(&mut C);

/// Locates an FSM inside its context
pub type FsmRef<C> = fn(&mut C) -> &mut Fsm<C>;

/// Hook triple for one state
pub struct StateHooks<C> {
    /// Runs after the previous state's exit
    pub on_enter: Option<Hook<C>>,
    /// Runs on every update while active
    pub on_update: Option<Hook<C>>,
    /// Runs before the index changes
    pub on_exit: Option<Hook<C>>,
}

impl<C> StateHooks<C> {
    /// Hooks of an unconfigured state
    pub const EMPTY: Self = Self {
        on_enter: None,
        on_update: None,
        on_exit: None,
    };
}

impl<C> Clone for StateHooks<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for StateHooks<C> {}

/// FSM context: current index plus the hook table
pub struct Fsm<C> {
    current: StateId,
    states: [StateHooks<C>; FSM_MAX_STATES],
}

impl<C> Fsm<C> {
    /// Create an FSM in state 0 with no hooks
    pub const fn new() -> Self {
        Self {
            current: 0,
            states: [StateHooks::EMPTY; FSM_MAX_STATES],
        }
    }

    /// Clear every hook and return to state 0
    pub fn init(&mut self) {
        self.states = [StateHooks::EMPTY; FSM_MAX_STATES];
        self.current = 0;
    }

    /// Install the hooks of `state`
    ///
    /// Overwrites existing hooks, including those of the active state.
    pub fn configure_state(
        &mut self,
        state: StateId,
        on_enter: Option<Hook<C>>,
        on_update: Option<Hook<C>>,
        on_exit: Option<Hook<C>>,
    ) -> Result<()> {
        let slot = self.states.get_mut(state).ok_or(Error::InvalidState)?;
        *slot = StateHooks {
            on_enter,
            on_update,
            on_exit,
        };
        Ok(())
    }

    /// Current state index
    pub fn state(&self) -> StateId {
        self.current
    }

    /// Hooks installed for `state`
    pub fn hooks(&self, state: StateId) -> Option<&StateHooks<C>> {
        self.states.get(state)
    }

    /// Transition to `state`
    ///
    /// Runs the current exit hook, moves the index, then runs the new
    /// enter hook. Switching to the active state still runs both hooks.
    /// Hooks may switch again; recursion depth is the caller's concern.
    pub fn switch(ctx: &mut C, fsm: FsmRef<C>, state: StateId) -> Result<()> {
        if state >= FSM_MAX_STATES {
            return Err(Error::InvalidState);
        }

        let machine = fsm(ctx);
        let on_exit = machine.states[machine.current].on_exit;
        if let Some(on_exit) = on_exit {
            on_exit(ctx);
        }

        let machine = fsm(ctx);
        machine.current = state;
        let on_enter = machine.states[state].on_enter;
        if let Some(on_enter) = on_enter {
            on_enter(ctx);
        }

        Ok(())
    }

    /// Run the update hook of the current state
    pub fn update(ctx: &mut C, fsm: FsmRef<C>) {
        let machine = fsm(ctx);
        let on_update = machine.states[machine.current].on_update;
        if let Some(on_update) = on_update {
            on_update(ctx);
        }
    }
}

impl<C> Default for Fsm<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Enter(StateId),
        Update(StateId),
        Exit(StateId),
    }

    struct Ctx {
        fsm: Fsm<Ctx>,
        other: Fsm<Ctx>,
        events: Vec<Event, 32>,
    }

    impl Ctx {
        fn new() -> Self {
            Self {
                fsm: Fsm::new(),
                other: Fsm::new(),
                events: Vec::new(),
            }
        }
    }

    fn fsm(c: &mut Ctx) -> &mut Fsm<Ctx> {
        &mut c.fsm
    }

    fn other(c: &mut Ctx) -> &mut Fsm<Ctx> {
        &mut c.other
    }

    fn enter_0(c: &mut Ctx) {
        c.events.push(Event::Enter(0)).unwrap();
    }
    fn exit_0(c: &mut Ctx) {
        c.events.push(Event::Exit(0)).unwrap();
    }
    fn enter_1(c: &mut Ctx) {
        c.events.push(Event::Enter(1)).unwrap();
    }
    fn update_1(c: &mut Ctx) {
        c.events.push(Event::Update(1)).unwrap();
    }
    fn exit_1(c: &mut Ctx) {
        c.events.push(Event::Exit(1)).unwrap();
    }

    // Enter hook that immediately moves on to state 3
    fn enter_2_forward(c: &mut Ctx) {
        c.events.push(Event::Enter(2)).unwrap();
        Fsm::switch(c, fsm, 3).unwrap();
    }
    fn enter_3(c: &mut Ctx) {
        c.events.push(Event::Enter(3)).unwrap();
    }

    // Update hook that drives a second machine
    fn update_drives_other(c: &mut Ctx) {
        Fsm::switch(c, other, 5).unwrap();
    }

    fn configured() -> Ctx {
        let mut c = Ctx::new();
        c.fsm.configure_state(0, Some(enter_0), None, Some(exit_0)).unwrap();
        c.fsm
            .configure_state(1, Some(enter_1), Some(update_1), Some(exit_1))
            .unwrap();
        c
    }

    #[test]
    fn test_init_state_zero() {
        let mut c = configured();
        Fsm::switch(&mut c, fsm, 1).unwrap();
        c.fsm.init();
        assert_eq!(c.fsm.state(), 0);
        assert!(c.fsm.hooks(1).unwrap().on_enter.is_none());
    }

    #[test]
    fn test_enter_exit_ordering() {
        let mut c = configured();

        Fsm::switch(&mut c, fsm, 1).unwrap();
        Fsm::switch(&mut c, fsm, 0).unwrap();

        assert_eq!(
            c.events.as_slice(),
            &[Event::Exit(0), Event::Enter(1), Event::Exit(1), Event::Enter(0)]
        );
    }

    #[test]
    fn test_self_transition_runs_hooks() {
        let mut c = configured();
        Fsm::switch(&mut c, fsm, 0).unwrap();
        assert_eq!(c.events.as_slice(), &[Event::Exit(0), Event::Enter(0)]);
        assert_eq!(c.fsm.state(), 0);
    }

    #[test]
    fn test_invalid_state_rejected() {
        let mut c = configured();
        Fsm::switch(&mut c, fsm, 1).unwrap();
        c.events.clear();

        assert_eq!(Fsm::switch(&mut c, fsm, FSM_MAX_STATES), Err(Error::InvalidState));
        assert_eq!(c.fsm.state(), 1);
        assert!(c.events.is_empty());

        assert_eq!(
            c.fsm.configure_state(FSM_MAX_STATES, None, None, None),
            Err(Error::InvalidState)
        );
    }

    #[test]
    fn test_update_no_transition() {
        let mut c = configured();
        Fsm::update(&mut c, fsm); // state 0 has no update hook
        assert!(c.events.is_empty());

        Fsm::switch(&mut c, fsm, 1).unwrap();
        c.events.clear();
        Fsm::update(&mut c, fsm);
        Fsm::update(&mut c, fsm);
        assert_eq!(c.events.as_slice(), &[Event::Update(1), Event::Update(1)]);
        assert_eq!(c.fsm.state(), 1);
    }

    #[test]
    fn test_reentrant_switch_from_enter() {
        let mut c = configured();
        c.fsm.configure_state(2, Some(enter_2_forward), None, None).unwrap();
        c.fsm.configure_state(3, Some(enter_3), None, None).unwrap();

        Fsm::switch(&mut c, fsm, 2).unwrap();

        assert_eq!(c.fsm.state(), 3);
        assert_eq!(
            c.events.as_slice(),
            &[Event::Exit(0), Event::Enter(2), Event::Enter(3)]
        );
    }

    #[test]
    fn test_hook_switches_other_machine() {
        let mut c = configured();
        c.fsm.configure_state(4, None, Some(update_drives_other), None).unwrap();
        Fsm::switch(&mut c, fsm, 4).unwrap();
        Fsm::update(&mut c, fsm);
        assert_eq!(c.other.state(), 5);
        assert_eq!(c.fsm.state(), 4);
    }

    #[test]
    fn test_reconfigure_active_state() {
        let mut c = configured();
        Fsm::switch(&mut c, fsm, 1).unwrap();
        c.fsm.configure_state(1, None, None, None).unwrap();
        c.events.clear();

        Fsm::update(&mut c, fsm);
        Fsm::switch(&mut c, fsm, 0).unwrap();
        assert_eq!(c.events.as_slice(), &[Event::Enter(0)]);
    }
}
