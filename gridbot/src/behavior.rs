//! Gridbot - Subsumption behavior scheduler
//!
//! Behaviors are `run` actions ordered by descending priority. Each
//! [`Scheduler::run`] walks the list from the top and stops at the first
//! action that claims the tick, so a higher-priority behavior subsumes
//! every behavior below it for that control cycle.
//!
//! Nodes live in a fixed arena addressed by index and are identified by
//! their `run` action. The list may change while it is being walked: an
//! action can unregister itself or any other behavior. Unlinked nodes keep
//! their `next` index and their slot until the outermost walk finishes, so
//! iteration always resumes at the first node that is still linked.

use crate::types::*;
use heapless::Vec;

/// Behavior action; returns true to claim the tick
pub type RunFn<C> = fn(&mut C) -> bool;

/// Optional action returning the behavior to its quiescent state
pub type ResetFn<C> = fn(&mut C);

/// Locates the scheduler inside its context
pub type SchedulerRef<C> = fn(&mut C) -> &mut Scheduler<C>;

type Index = u8;

struct BehaviorNode<C> {
    run: RunFn<C>,
    reset: Option<ResetFn<C>>,
    priority: Priority,
    next: Option<Index>,
    linked: bool,
}

/// Priority-ordered behavior list over a fixed arena
pub struct Scheduler<C> {
    slots: [Option<BehaviorNode<C>>; MAX_BEHAVIORS],
    head: Option<Index>,
    /// Free slot indices
    free: Vec<Index, MAX_BEHAVIORS>,
    /// Unlinked during a walk, recycled once the walk ends
    retired: Vec<Index, MAX_BEHAVIORS>,
    /// Nesting depth of active walks
    walking: u8,
    len: usize,
}

fn same_action<C>(a: RunFn<C>, b: RunFn<C>) -> bool {
    a as usize == b as usize
}

impl<C> Scheduler<C> {
    /// Create an empty scheduler
    pub fn new() -> Self {
        let mut free = Vec::new();
        for index in (0..MAX_BEHAVIORS as Index).rev() {
            // Capacity equals the arena size
            let _ = free.push(index);
        }

        Self {
            slots: core::array::from_fn(|_| None),
            head: None,
            free,
            retired: Vec::new(),
            walking: 0,
            len: 0,
        }
    }

    /// Add a behavior
    ///
    /// The node goes right after the last node whose priority is greater
    /// or equal, so equal priorities keep registration order.
    pub fn register(
        &mut self,
        run: RunFn<C>,
        reset: Option<ResetFn<C>>,
        priority: Priority,
    ) -> Result<()> {
        if self.find(run).is_some() {
            return Err(Error::AlreadyExists);
        }
        let index = self.free.pop().ok_or(Error::NoMemory)?;

        let mut prev: Option<Index> = None;
        let mut cursor = self.head;
        while let Some(i) = cursor {
            let node = self.node(i);
            if node.priority < priority {
                break;
            }
            prev = Some(i);
            cursor = node.next;
        }

        self.slots[index as usize] = Some(BehaviorNode {
            run,
            reset,
            priority,
            next: cursor,
            linked: true,
        });
        match prev {
            Some(p) => self.node_mut(p).next = Some(index),
            None => self.head = Some(index),
        }
        self.len += 1;
        Ok(())
    }

    /// Remove the behavior whose action is `run`; no-op when absent
    pub fn unregister(&mut self, run: RunFn<C>) {
        let Some((prev, index)) = self.find(run) else {
            return;
        };

        let next = self.node(index).next;
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        self.node_mut(index).linked = false;
        self.len -= 1;

        if self.walking > 0 {
            let _ = self.retired.push(index);
        } else {
            self.release(index);
        }
    }

    /// Remove every behavior
    pub fn clear(&mut self) {
        while let Some(head) = self.head {
            let run = self.node(head).run;
            self.unregister(run);
        }
    }

    /// Check whether `run` is registered
    pub fn is_registered(&self, run: RunFn<C>) -> bool {
        self.find(run).is_some()
    }

    /// Number of registered behaviors
    pub fn len(&self) -> usize {
        self.len
    }

    /// No behavior registered
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Priorities in walk order
    pub fn priorities(&self) -> Vec<Priority, MAX_BEHAVIORS> {
        let mut out = Vec::new();
        let mut cursor = self.head;
        while let Some(i) = cursor {
            let node = self.node(i);
            let _ = out.push(node.priority);
            cursor = node.next;
        }
        out
    }

    /// Walk the list until one behavior claims the tick
    ///
    /// Returns true when a behavior claimed it.
    pub fn run(ctx: &mut C, sched: SchedulerRef<C>) -> bool {
        let mut cursor = sched(ctx).begin_walk();
        let mut claimed = false;

        while let Some(i) = cursor {
            let run = sched(ctx).node(i).run;
            if run(ctx) {
                claimed = true;
                break;
            }
            cursor = sched(ctx).successor(i);
        }

        sched(ctx).end_walk();
        claimed
    }

    /// Invoke every reset action regardless of outcome
    pub fn reset(ctx: &mut C, sched: SchedulerRef<C>) {
        let mut cursor = sched(ctx).begin_walk();

        while let Some(i) = cursor {
            let reset = sched(ctx).node(i).reset;
            if let Some(reset) = reset {
                reset(ctx);
            }
            cursor = sched(ctx).successor(i);
        }

        sched(ctx).end_walk();
    }

    // ========================================================================
    // Private Helpers
    // ========================================================================

    fn begin_walk(&mut self) -> Option<Index> {
        self.walking += 1;
        self.head
    }

    fn end_walk(&mut self) {
        self.walking -= 1;
        if self.walking == 0 {
            while let Some(index) = self.retired.pop() {
                self.release(index);
            }
        }
    }

    /// First linked node after `index`, skipping nodes unlinked mid-walk
    fn successor(&self, index: Index) -> Option<Index> {
        let mut cursor = self.node(index).next;
        while let Some(i) = cursor {
            let node = self.node(i);
            if node.linked {
                return Some(i);
            }
            cursor = node.next;
        }
        None
    }

    fn find(&self, run: RunFn<C>) -> Option<(Option<Index>, Index)> {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(i) = cursor {
            let node = self.node(i);
            if same_action(node.run, run) {
                return Some((prev, i));
            }
            prev = Some(i);
            cursor = node.next;
        }
        None
    }

    fn release(&mut self, index: Index) {
        self.slots[index as usize] = None;
        let _ = self.free.push(index);
    }

    fn node(&self, index: Index) -> &BehaviorNode<C> {
        match &self.slots[index as usize] {
            Some(node) => node,
            None => unreachable!("behavior slot {} is free", index),
        }
    }

    fn node_mut(&mut self, index: Index) -> &mut BehaviorNode<C> {
        match &mut self.slots[index as usize] {
            Some(node) => node,
            None => unreachable!("behavior slot {} is free", index),
        }
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx {
        sched: Scheduler<Ctx>,
        /// Which behaviors claim the tick
        claims: [bool; 4],
        ran: Vec<u8, 32>,
        resets: Vec<u8, 32>,
    }

    impl Ctx {
        fn new() -> Self {
            Self {
                sched: Scheduler::new(),
                claims: [false; 4],
                ran: Vec::new(),
                resets: Vec::new(),
            }
        }
    }

    fn sched(c: &mut Ctx) -> &mut Scheduler<Ctx> {
        &mut c.sched
    }

    fn run_a(c: &mut Ctx) -> bool {
        c.ran.push(0).unwrap();
        c.claims[0]
    }
    fn run_b(c: &mut Ctx) -> bool {
        c.ran.push(1).unwrap();
        c.claims[1]
    }
    fn run_c(c: &mut Ctx) -> bool {
        c.ran.push(2).unwrap();
        c.claims[2]
    }
    fn run_d(c: &mut Ctx) -> bool {
        c.ran.push(3).unwrap();
        c.claims[3]
    }
    fn reset_a(c: &mut Ctx) {
        c.resets.push(0).unwrap();
    }
    fn reset_c(c: &mut Ctx) {
        c.resets.push(2).unwrap();
    }

    // Removes itself while running
    fn run_self_removing(c: &mut Ctx) -> bool {
        c.ran.push(10).unwrap();
        c.sched.unregister(run_self_removing);
        false
    }

    // Removes run_c, which sits below it
    fn run_removes_c(c: &mut Ctx) -> bool {
        c.ran.push(11).unwrap();
        c.sched.unregister(run_c);
        false
    }

    // Removes itself and the next behavior
    fn run_removes_self_and_b(c: &mut Ctx) -> bool {
        c.ran.push(12).unwrap();
        c.sched.unregister(run_removes_self_and_b);
        c.sched.unregister(run_b);
        false
    }

    #[test]
    fn test_highest_priority_claims() {
        let mut c = Ctx::new();
        c.claims = [true; 4];
        c.sched.register(run_a, None, 10).unwrap();
        c.sched.register(run_b, None, 50).unwrap();
        c.sched.register(run_c, None, 30).unwrap();

        assert!(Scheduler::run(&mut c, sched));
        assert_eq!(c.ran.as_slice(), &[1]);
        assert_eq!(c.sched.priorities().as_slice(), &[50, 30, 10]);
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let mut c = Ctx::new();
        c.sched.register(run_a, None, 20).unwrap();
        c.sched.register(run_b, None, 20).unwrap();
        c.sched.register(run_c, None, 30).unwrap();
        c.sched.register(run_d, None, 20).unwrap();

        assert!(!Scheduler::run(&mut c, sched));
        assert_eq!(c.ran.as_slice(), &[2, 0, 1, 3]);
    }

    #[test]
    fn test_stops_after_first_claim() {
        let mut c = Ctx::new();
        c.claims = [false, true, true, false];
        c.sched.register(run_a, None, 40).unwrap();
        c.sched.register(run_b, None, 30).unwrap();
        c.sched.register(run_c, None, 20).unwrap();
        c.sched.register(run_d, None, 10).unwrap();

        assert!(Scheduler::run(&mut c, sched));
        assert_eq!(c.ran.as_slice(), &[0, 1]);
    }

    #[test]
    fn test_duplicate_and_capacity() {
        let mut c = Ctx::new();
        c.sched.register(run_a, None, 1).unwrap();
        assert_eq!(c.sched.register(run_a, None, 9), Err(Error::AlreadyExists));
        assert_eq!(c.sched.len(), 1);

        // Fill the arena with distinct closures-free actions
        fn f0(_: &mut Ctx) -> bool { false }
        fn f1(_: &mut Ctx) -> bool { true }
        fn f2(c: &mut Ctx) -> bool { c.claims[0] }
        fn f3(c: &mut Ctx) -> bool { c.claims[1] }
        fn f4(c: &mut Ctx) -> bool { c.claims[2] }
        fn f5(c: &mut Ctx) -> bool { c.claims[3] }
        fn f6(c: &mut Ctx) -> bool { c.ran.is_empty() }
        fn f7(c: &mut Ctx) -> bool { c.resets.is_empty() }
        fn f8(c: &mut Ctx) -> bool { c.ran.len() > 1 }
        fn f9(c: &mut Ctx) -> bool { c.ran.len() > 2 }
        fn f10(c: &mut Ctx) -> bool { c.ran.len() > 3 }
        fn f11(c: &mut Ctx) -> bool { c.ran.len() > 4 }
        fn f12(c: &mut Ctx) -> bool { c.ran.len() > 5 }
        fn f13(c: &mut Ctx) -> bool { c.ran.len() > 6 }
        fn f14(c: &mut Ctx) -> bool { c.ran.len() > 7 }
        let fill: [RunFn<Ctx>; 15] = [f0, f1, f2, f3, f4, f5, f6, f7, f8, f9, f10, f11, f12, f13, f14];
        for f in fill {
            c.sched.register(f, None, 5).unwrap();
        }
        assert_eq!(c.sched.len(), MAX_BEHAVIORS);
        assert_eq!(c.sched.register(run_b, None, 5), Err(Error::NoMemory));

        // Freed slot is reusable
        c.sched.unregister(run_a);
        c.sched.register(run_b, None, 5).unwrap();
        assert!(c.sched.is_registered(run_b));
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let mut c = Ctx::new();
        c.sched.register(run_a, None, 1).unwrap();
        c.sched.unregister(run_b);
        assert_eq!(c.sched.len(), 1);
    }

    #[test]
    fn test_unregister_self_during_run() {
        let mut c = Ctx::new();
        c.sched.register(run_a, None, 90).unwrap();
        c.sched.register(run_self_removing, None, 50).unwrap();
        c.sched.register(run_b, None, 10).unwrap();

        assert!(!Scheduler::run(&mut c, sched));
        assert_eq!(c.ran.as_slice(), &[0, 10, 1]);
        assert!(!c.sched.is_registered(run_self_removing));
        assert_eq!(c.sched.len(), 2);

        c.ran.clear();
        Scheduler::run(&mut c, sched);
        assert_eq!(c.ran.as_slice(), &[0, 1]);
    }

    #[test]
    fn test_unregister_unvisited_during_run() {
        let mut c = Ctx::new();
        c.sched.register(run_removes_c, None, 90).unwrap();
        c.sched.register(run_c, None, 50).unwrap();
        c.sched.register(run_d, None, 10).unwrap();

        Scheduler::run(&mut c, sched);
        assert_eq!(c.ran.as_slice(), &[11, 3]);
    }

    #[test]
    fn test_unregister_self_and_next_during_run() {
        let mut c = Ctx::new();
        c.sched.register(run_removes_self_and_b, None, 90).unwrap();
        c.sched.register(run_b, None, 50).unwrap();
        c.sched.register(run_d, None, 10).unwrap();

        Scheduler::run(&mut c, sched);
        assert_eq!(c.ran.as_slice(), &[12, 3]);
        assert_eq!(c.sched.len(), 1);
    }

    #[test]
    fn test_reset_visits_every_reset_action() {
        let mut c = Ctx::new();
        c.claims = [true; 4];
        c.sched.register(run_a, Some(reset_a), 10).unwrap();
        c.sched.register(run_b, None, 20).unwrap();
        c.sched.register(run_c, Some(reset_c), 30).unwrap();

        Scheduler::reset(&mut c, sched);
        assert_eq!(c.resets.as_slice(), &[2, 0]);
        assert!(c.ran.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut c = Ctx::new();
        c.sched.register(run_a, None, 10).unwrap();
        c.sched.register(run_b, None, 20).unwrap();
        c.sched.clear();
        assert!(c.sched.is_empty());
        assert!(!Scheduler::run(&mut c, sched));
        assert!(c.ran.is_empty());
    }
}
