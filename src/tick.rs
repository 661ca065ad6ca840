//! Tick scheduler: the `Idle -> Open -> Closed -> Integrating -> Broadcast`
//! cycle that bounds how long entities have to submit intents each tick and
//! hands the accumulated intents to the integration phase.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::actions::{CollectIntent, EatIntent, CollectResult, EatResult, ObjectChange};
use crate::geometry::Direction;
use crate::movement::MoveResult;

/// Abstracts wall-clock access so deadline logic is testable without
/// sleeping. Every timestamp the scheduler and lease manager hand out comes
/// from a `Clock`, never `SystemTime::now()` directly.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// The real wall clock, used in production.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the unix epoch")
            .as_millis() as u64
    }
}

/// A clock tests can move by hand.
pub struct FakeClock {
    now_ms: AtomicU64,
}

impl FakeClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TickConfig {
    pub tick_duration_ms: u64,
    pub intent_deadline_ms: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_duration_ms: 1000,
            intent_deadline_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    Idle,
    Open,
    Closed,
    Integrating,
    Broadcast,
}

/// Per-tick scratch: the window during which entities may submit intents.
///
/// Intents submitted after `deadline_ms`, or a second move intent from an
/// entity that already submitted one this tick, are rejected.
pub struct TickContext {
    pub tick_id: u64,
    pub start_time_ms: u64,
    pub deadline_ms: u64,
    // Insertion order, not a HashMap: the movement resolver needs claims in
    // submission order for its result ordering to be reproducible.
    move_intents: Vec<(String, Direction)>,
    collect_intents: Vec<CollectIntent>,
    eat_intents: Vec<EatIntent>,
    move_submitted: std::collections::HashSet<String>,
    collect_submitted: std::collections::HashSet<String>,
    eat_submitted: std::collections::HashSet<String>,
}

impl TickContext {
    fn new(tick_id: u64, start_time_ms: u64, deadline_ms: u64) -> Self {
        Self {
            tick_id,
            start_time_ms,
            deadline_ms,
            move_intents: Vec::new(),
            collect_intents: Vec::new(),
            eat_intents: Vec::new(),
            move_submitted: std::collections::HashSet::new(),
            collect_submitted: std::collections::HashSet::new(),
            eat_submitted: std::collections::HashSet::new(),
        }
    }

    pub fn is_past_deadline(&self, clock: &dyn Clock) -> bool {
        clock.now_ms() >= self.deadline_ms
    }

    /// Returns `false` without recording the intent if the deadline has
    /// passed or this entity already has a move queued this tick.
    pub fn submit_move_intent(&mut self, clock: &dyn Clock, entity_id: &str, direction: Direction) -> bool {
        if self.is_past_deadline(clock) || self.move_submitted.contains(entity_id) {
            return false;
        }
        self.move_submitted.insert(entity_id.to_string());
        self.move_intents.push((entity_id.to_string(), direction));
        true
    }

    /// Returns `false` without recording the intent if the deadline has
    /// passed or this entity already has a collect intent queued this tick —
    /// same at-most-one-per-tick-per-action-family rule move intents follow.
    pub fn submit_collect_intent(&mut self, clock: &dyn Clock, intent: CollectIntent) -> bool {
        if self.is_past_deadline(clock) || self.collect_submitted.contains(&intent.entity_id) {
            return false;
        }
        self.collect_submitted.insert(intent.entity_id.clone());
        self.collect_intents.push(intent);
        true
    }

    pub fn submit_eat_intent(&mut self, clock: &dyn Clock, intent: EatIntent) -> bool {
        if self.is_past_deadline(clock) || self.eat_submitted.contains(&intent.entity_id) {
            return false;
        }
        self.eat_submitted.insert(intent.entity_id.clone());
        self.eat_intents.push(intent);
        true
    }

    pub fn move_intents(&self) -> Vec<(String, Direction)> {
        self.move_intents.clone()
    }

    pub fn collect_intents(&self) -> &[CollectIntent] {
        &self.collect_intents
    }

    pub fn eat_intents(&self) -> &[EatIntent] {
        &self.eat_intents
    }
}

/// The outcome of one integration pass, handed to the broadcast phase.
pub struct TickResult {
    pub tick_id: u64,
    pub move_results: Vec<MoveResult>,
    pub collect_results: Vec<CollectResult>,
    pub eat_results: Vec<EatResult>,
    pub object_changes: Vec<ObjectChange>,
    pub duration_ms: u64,
}

/// Drives the tick state machine over real time, handing each closed
/// [`TickContext`] to an `integrate` callback and the resulting
/// [`TickResult`] to a `broadcast` callback.
///
/// Structured like a bus-connected service's own tick-interval loop,
/// generalized onto an explicit open/closed intent window.
pub struct TickScheduler<C: Clock = SystemClock> {
    config: TickConfig,
    clock: Arc<C>,
    phase: Mutex<TickPhase>,
    context: Mutex<Option<TickContext>>,
    current_tick: AtomicU64,
    stop_requested: AtomicBool,
}

impl<C: Clock> TickScheduler<C> {
    pub fn new(config: TickConfig, clock: Arc<C>) -> Self {
        Self {
            config,
            clock,
            phase: Mutex::new(TickPhase::Idle),
            context: Mutex::new(None),
            current_tick: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> TickPhase {
        *self.phase.lock()
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.phase(), TickPhase::Idle) || self.current_tick() > 0
    }

    fn set_phase(&self, phase: TickPhase) {
        *self.phase.lock() = phase;
    }

    /// Submit a move intent for the currently open tick. Returns `false` if
    /// no tick is open, the deadline has passed, or the entity already has
    /// a move queued.
    pub fn submit_move_intent(&self, entity_id: &str, direction: Direction) -> bool {
        let mut guard = self.context.lock();
        match guard.as_mut() {
            Some(ctx) => ctx.submit_move_intent(self.clock.as_ref(), entity_id, direction),
            None => false,
        }
    }

    pub fn submit_collect_intent(&self, intent: CollectIntent) -> bool {
        let mut guard = self.context.lock();
        match guard.as_mut() {
            Some(ctx) => ctx.submit_collect_intent(self.clock.as_ref(), intent),
            None => false,
        }
    }

    pub fn submit_eat_intent(&self, intent: EatIntent) -> bool {
        let mut guard = self.context.lock();
        match guard.as_mut() {
            Some(ctx) => ctx.submit_eat_intent(self.clock.as_ref(), intent),
            None => false,
        }
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Run the scheduler loop until [`TickScheduler::request_stop`] is
    /// called. `on_start` fires synchronously once the intent window opens
    /// (this is where observations are queued, before any intent is
    /// admitted); `integrate` performs the world mutation for a closed tick;
    /// `broadcast` fans the resulting [`TickResult`] out to observers.
    pub async fn run<S, I, B>(&self, mut on_start: S, mut integrate: I, mut broadcast: B)
    where
        S: FnMut(&TickContext),
        I: FnMut(&TickContext) -> TickResult,
        B: FnMut(&TickResult),
    {
        while !self.stop_requested.load(Ordering::SeqCst) {
            let tick_id = self.current_tick.fetch_add(1, Ordering::SeqCst) + 1;

            self.set_phase(TickPhase::Open);
            let start = self.clock.now_ms();
            let deadline = start + self.config.intent_deadline_ms;
            let opened = TickContext::new(tick_id, start, deadline);
            on_start(&opened);
            *self.context.lock() = Some(opened);

            tokio::time::sleep(Duration::from_millis(self.config.intent_deadline_ms)).await;

            self.set_phase(TickPhase::Closed);
            let context = self
                .context
                .lock()
                .take()
                .expect("context was set when the tick opened");

            self.set_phase(TickPhase::Integrating);
            let started = std::time::Instant::now();
            let mut result = integrate(&context);
            result.duration_ms = started.elapsed().as_millis() as u64;

            self.set_phase(TickPhase::Broadcast);
            broadcast(&result);

            self.set_phase(TickPhase::Idle);
            let remaining = self
                .config
                .tick_duration_ms
                .saturating_sub(self.config.intent_deadline_ms);
            if remaining > 0 {
                tokio::time::sleep(Duration::from_millis(remaining)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_intent_rejected_past_deadline() {
        let clock = FakeClock::new(0);
        let mut ctx = TickContext::new(1, 0, 500);
        assert!(ctx.submit_move_intent(&clock, "a", Direction::North));

        clock.set(500);
        assert!(!ctx.submit_move_intent(&clock, "b", Direction::South));
    }

    #[test]
    fn duplicate_move_intent_from_same_entity_rejected() {
        let clock = FakeClock::new(0);
        let mut ctx = TickContext::new(1, 0, 500);
        assert!(ctx.submit_move_intent(&clock, "a", Direction::North));
        assert!(!ctx.submit_move_intent(&clock, "a", Direction::South));
        assert_eq!(ctx.move_intents().len(), 1);
    }

    #[test]
    fn move_intents_preserve_submission_order() {
        let clock = FakeClock::new(0);
        let mut ctx = TickContext::new(1, 0, 500);
        assert!(ctx.submit_move_intent(&clock, "charlie", Direction::North));
        assert!(ctx.submit_move_intent(&clock, "alpha", Direction::South));
        assert!(ctx.submit_move_intent(&clock, "bravo", Direction::East));

        let ids: Vec<&str> = ctx.move_intents().iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["charlie", "alpha", "bravo"]);
    }

    #[test]
    fn scheduler_submit_fails_with_no_open_context() {
        let clock = Arc::new(FakeClock::new(0));
        let scheduler = TickScheduler::new(TickConfig::default(), clock);
        assert!(!scheduler.submit_move_intent("a", Direction::North));
    }
}
