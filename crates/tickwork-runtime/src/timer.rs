use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use crate::bridge::{panic_message, CrossThreadBridge};

/// Unique identifier for a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(Uuid);

impl TimerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback run each time a timer fires
pub type TimerTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Type of timer
#[derive(Debug, Clone, Copy)]
enum TimerType {
    /// One-shot timer that fires once and is removed
    OneShot { fire_at: i64 },
    /// Recurring timer that fires repeatedly at an interval
    Recurring { interval: i64, next_fire: i64 },
}

impl TimerType {
    fn next_step(&self) -> i64 {
        match self {
            TimerType::OneShot { fire_at } => *fire_at,
            TimerType::Recurring { next_fire, .. } => *next_fire,
        }
    }

    fn shift(&mut self, steps: i64) {
        match self {
            TimerType::OneShot { fire_at } => *fire_at += steps,
            TimerType::Recurring { next_fire, .. } => *next_fire += steps,
        }
    }
}

/// A timer with metadata
struct Timer {
    name: String,
    task: TimerTask,
    timer_type: TimerType,
    created_at: Instant,
    /// Breaks ties between timers created within the same clock reading
    seq: u64,
}

/// A timer selected for firing in the current step
struct DueTimer {
    id: TimerId,
    name: String,
    task: TimerTask,
    repeating: bool,
    created_at: Instant,
    seq: u64,
}

/// Tick-driven one-shot and repeating timers
///
/// Time is measured in simulation steps: [`advance`](Self::advance) is called
/// once per step. Fired callbacks are handed to the [`CrossThreadBridge`] so
/// they run with the same guarantees as any other host mutation.
///
/// Cancellation is best-effort: a timer already selected for firing by an
/// `advance` call in progress still runs once.
pub struct TickScheduler {
    bridge: Arc<CrossThreadBridge>,
    timers: Mutex<HashMap<TimerId, Timer>>,
    current_step: AtomicI64,
    paused_at: Mutex<Option<i64>>,
    next_seq: AtomicU64,
}

impl TickScheduler {
    pub fn new(bridge: Arc<CrossThreadBridge>) -> Self {
        Self {
            bridge,
            timers: Mutex::new(HashMap::new()),
            current_step: AtomicI64::new(0),
            paused_at: Mutex::new(None),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Schedule a one-shot timer that fires after `delay_steps` steps
    pub fn schedule_delayed<F>(&self, task: F, delay_steps: i64) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_delayed_named("delayed", task, delay_steps)
    }

    /// [`schedule_delayed`](Self::schedule_delayed) with a name used in logs
    pub fn schedule_delayed_named<F>(
        &self,
        name: impl Into<String>,
        task: F,
        delay_steps: i64,
    ) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(task), |base| TimerType::OneShot {
            fire_at: base + delay_steps.max(0),
        })
    }

    /// Schedule a recurring timer that fires every `interval_steps`, starting on the next step
    pub fn schedule_repeating<F>(&self, task: F, interval_steps: i64) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_repeating_with_delay(task, interval_steps, 0)
    }

    /// Schedule a recurring timer whose first firing is `initial_delay_steps` away
    pub fn schedule_repeating_with_delay<F>(
        &self,
        task: F,
        interval_steps: i64,
        initial_delay_steps: i64,
    ) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_repeating_named("repeating", task, interval_steps, initial_delay_steps)
    }

    pub fn schedule_repeating_named<F>(
        &self,
        name: impl Into<String>,
        task: F,
        interval_steps: i64,
        initial_delay_steps: i64,
    ) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(task), |base| TimerType::Recurring {
            interval: interval_steps.max(1),
            next_fire: base + initial_delay_steps.max(0),
        })
    }

    /// Cancel a timer
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = self.timers.lock().remove(&id);
        if let Some(timer) = &removed {
            debug!(target: "timers", "Cancelled timer {} ({})", timer.name, id);
        }
        removed.is_some()
    }

    /// Cancel every timer, returning how many were pending
    pub fn cancel_all(&self) -> usize {
        let mut timers = self.timers.lock();
        let count = timers.len();
        timers.clear();
        count
    }

    /// Steps until the timer is next due, or `None` for an unknown timer
    ///
    /// While paused the remaining time is frozen.
    pub fn get_remaining_steps(&self, id: TimerId) -> Option<i64> {
        let now = (*self.paused_at.lock()).unwrap_or_else(|| self.current_step());
        self.timers
            .lock()
            .get(&id)
            .map(|timer| (timer.timer_type.next_step() - now).max(0))
    }

    /// Get the number of active timers
    pub fn active_count(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn current_step(&self) -> i64 {
        self.current_step.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.lock().is_some()
    }

    /// Freeze all timers until [`resume_all`](Self::resume_all)
    pub fn pause_all(&self) {
        let mut paused_at = self.paused_at.lock();
        if paused_at.is_none() {
            let step = self.current_step();
            *paused_at = Some(step);
            info!(target: "timers", "Timers paused at step {}", step);
        }
    }

    /// Resume timers, pushing every pending timer back by the paused duration
    pub fn resume_all(&self) {
        let mut paused = self.paused_at.lock();
        let Some(paused_at) = paused.take() else {
            return;
        };

        let elapsed = self.current_step() - paused_at;
        let mut timers = self.timers.lock();
        for timer in timers.values_mut() {
            timer.timer_type.shift(elapsed);
        }
        info!(
            target: "timers",
            "Timers resumed after {} step(s), {} timer(s) shifted",
            elapsed,
            timers.len()
        );
    }

    /// Advance one simulation step and fire every timer that has come due
    ///
    /// Timers due in the same step fire in creation order. Returns the number
    /// of timers fired.
    pub fn advance(&self) -> usize {
        let step = self.current_step.fetch_add(1, Ordering::AcqRel) + 1;
        if self.is_paused() {
            return 0;
        }

        let mut due = Vec::new();
        {
            let mut timers = self.timers.lock();
            for (id, timer) in timers.iter_mut() {
                if timer.timer_type.next_step() > step {
                    continue;
                }
                let repeating = matches!(timer.timer_type, TimerType::Recurring { .. });
                due.push(DueTimer {
                    id: *id,
                    name: timer.name.clone(),
                    task: timer.task.clone(),
                    repeating,
                    created_at: timer.created_at,
                    seq: timer.seq,
                });
                if let TimerType::Recurring {
                    interval,
                    next_fire,
                } = &mut timer.timer_type
                {
                    *next_fire = step + *interval;
                }
            }

            // Remove one-shot timers that have fired
            for fired in due.iter().filter(|d| !d.repeating) {
                timers.remove(&fired.id);
            }
        }

        due.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.seq.cmp(&b.seq))
        });

        let count = due.len();
        for fired in due {
            trace!(target: "timers", step, "Firing timer {} ({})", fired.name, fired.id);
            self.bridge.execute_now(move || fire(fired));
        }
        count
    }

    /// Register a timer whose due step is computed from the scheduler's clock
    ///
    /// While paused the clock is frozen at the pause step, so the timer is
    /// shifted by `resume_all` like every other pending timer. The pause lock
    /// is held until the timer is stored so a concurrent resume cannot miss it.
    fn insert(
        &self,
        name: String,
        task: TimerTask,
        due: impl FnOnce(i64) -> TimerType,
    ) -> TimerId {
        let paused_at = self.paused_at.lock();
        let base = (*paused_at).unwrap_or_else(|| self.current_step());
        let timer_type = due(base);
        let id = TimerId::new();
        let timer = Timer {
            name,
            task,
            timer_type,
            created_at: Instant::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        trace!(
            target: "timers",
            "Scheduled timer {} ({}) due at step {}",
            timer.name,
            id,
            timer_type.next_step()
        );
        self.timers.lock().insert(id, timer);
        drop(paused_at);
        id
    }
}

fn fire(timer: DueTimer) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (timer.task)())) {
        let disposition = if timer.repeating {
            "rescheduled"
        } else {
            "removed"
        };
        error!(
            target: "timers",
            "Timer {} ({}) panicked, {}: {}",
            timer.name,
            timer.id,
            disposition,
            panic_message(payload.as_ref())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> TickScheduler {
        TickScheduler::new(Arc::new(CrossThreadBridge::new()))
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_one_shot_timer() {
        let manager = scheduler();
        let (count, task) = counter();
        manager.schedule_delayed(task, 3);

        for _ in 0..2 {
            manager.advance();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(manager.advance(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Should be removed after firing
        assert_eq!(manager.active_count(), 0);
        manager.advance();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delayed_fires_on_nth_advance_for_any_delay() {
        for n in 1..20 {
            let manager = scheduler();
            let (count, task) = counter();
            manager.schedule_delayed(task, n);

            for _ in 1..n {
                manager.advance();
                assert_eq!(count.load(Ordering::SeqCst), 0, "fired early with delay {n}");
            }
            manager.advance();
            assert_eq!(count.load(Ordering::SeqCst), 1, "did not fire with delay {n}");
        }
    }

    #[test]
    fn test_recurring_timer() {
        let manager = scheduler();
        let fired_at = Arc::new(Mutex::new(Vec::new()));
        let (k, m) = (4, 5);

        let log = fired_at.clone();
        let clock = Arc::new(AtomicI64::new(0));
        let tick = clock.clone();
        manager.schedule_repeating(move || log.lock().push(tick.load(Ordering::SeqCst)), k);

        for _ in 0..(m * k) {
            clock.store(manager.current_step() + 1, Ordering::SeqCst);
            manager.advance();
        }

        let fired_at = fired_at.lock();
        assert_eq!(fired_at.len(), m as usize);
        assert!(fired_at.windows(2).all(|w| w[1] - w[0] == k));
        // Should still be active
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn test_cancel_timer() {
        let manager = scheduler();
        let (count, task) = counter();
        let id = manager.schedule_delayed(task, 2);

        assert!(manager.cancel(id));
        assert_eq!(manager.active_count(), 0);
        assert!(!manager.cancel(id)); // Already removed

        manager.advance();
        manager.advance();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_step_timers_fire_in_creation_order() {
        let manager = scheduler();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, delay) in [("first", 3), ("second", 2), ("third", 1)] {
            let order = order.clone();
            manager.schedule_delayed(move || order.lock().push(label), delay);
            if label != "third" {
                manager.advance();
            }
        }
        assert!(order.lock().is_empty());

        manager.advance();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_pause_preserves_remaining_steps() {
        let manager = scheduler();
        let (count, task) = counter();
        let id = manager.schedule_delayed(task, 10);

        for _ in 0..5 {
            manager.advance();
        }
        manager.pause_all();
        for _ in 0..100 {
            assert_eq!(manager.advance(), 0);
        }
        assert_eq!(manager.get_remaining_steps(id), Some(5));
        manager.resume_all();
        assert_eq!(manager.get_remaining_steps(id), Some(5));

        for _ in 0..4 {
            manager.advance();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        manager.advance();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.current_step(), 110);
    }

    #[test]
    fn test_timer_scheduled_while_paused_counts_from_resume() {
        let manager = scheduler();
        let (count, task) = counter();
        let (ticks, repeat) = counter();

        manager.pause_all();
        for _ in 0..50 {
            manager.advance();
        }
        let id = manager.schedule_delayed(task, 3);
        let repeating = manager.schedule_repeating_with_delay(repeat, 2, 2);
        assert_eq!(manager.get_remaining_steps(id), Some(3));
        assert_eq!(manager.get_remaining_steps(repeating), Some(2));

        manager.resume_all();
        assert_eq!(manager.get_remaining_steps(id), Some(3));

        manager.advance();
        manager.advance();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        manager.advance();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_timers() {
        let manager = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));

        let r = runs.clone();
        manager.schedule_repeating(
            move || {
                r.fetch_add(1, Ordering::SeqCst);
                panic!("repeating effect failed");
            },
            1,
        );
        manager.schedule_delayed(|| panic!("one-shot failed"), 1);

        manager.advance();
        assert_eq!(manager.active_count(), 1);
        manager.advance();
        manager.advance();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unknown_timer_has_no_remaining_steps() {
        let manager = scheduler();
        let id = manager.schedule_delayed(|| {}, 1);
        manager.cancel(id);
        assert_eq!(manager.get_remaining_steps(id), None);
    }
}
