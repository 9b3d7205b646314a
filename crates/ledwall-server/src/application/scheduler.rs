//! Frame/event scheduler.
//!
//! One tick of the loop:
//!
//! ```text
//! frame_wait ──► fire due events ──► recomposite ──► dispatch ──► (repeat)
//! ```
//!
//! Frames are anchored to absolute multiples of the frame period since the
//! clock epoch, so a slow tick shortens the next sleep instead of shifting
//! every later frame.  Events live in a min-heap keyed by due time; periodic
//! events are re-inserted before their action runs.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::canvas::Canvas;
use crate::application::dispatch::{DispatchReport, Dispatcher};
use crate::application::element::period_for_rate;
use crate::application::manage_devices::DeviceLink;

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Time source for the scheduler.
///
/// The system implementation lives in `infrastructure::clock`; tests drive
/// a manual clock instead of sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's epoch.
    fn now_since_epoch(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// Time from `now` until the next exact multiple of `period`.
///
/// Exactly on a boundary yields a full period.  A zero period yields zero.
pub fn until_next_boundary(now: Duration, period: Duration) -> Duration {
    let period_ns = period.as_nanos();
    if period_ns == 0 {
        return Duration::ZERO;
    }
    let into_period = now.as_nanos() % period_ns;
    // Always below `period`, so it fits back into a u64.
    Duration::from_nanos((period_ns - into_period) as u64)
}

// ── Actions ───────────────────────────────────────────────────────────────────

pub type CanvasFn = Box<dyn FnMut(&mut Canvas) + Send>;

/// What an event does when it fires.
pub enum Action {
    /// Steps one element to its next frame.
    AdvanceElement(u32),
    /// Steps every animated element.
    AdvanceAll,
    /// Asks every connected device for its buffered logs on the next send.
    RequestLogs,
    /// Asks every connected device for a status line on the next send.
    RequestStatus,
    Custom(CanvasFn),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::AdvanceElement(id) => f.debug_tuple("AdvanceElement").field(id).finish(),
            Action::AdvanceAll => f.write_str("AdvanceAll"),
            Action::RequestLogs => f.write_str("RequestLogs"),
            Action::RequestStatus => f.write_str("RequestStatus"),
            Action::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// ── EventQueue ────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("periodic events need a non-zero period")]
    ZeroPeriod,

    #[error("frame period must be non-zero")]
    ZeroFramePeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

struct Entry {
    /// `None` while the action is out being executed.
    action: Option<Action>,
    period: Option<Duration>,
}

/// Min-heap of timed actions.
///
/// Ties on the due time pop in insertion order.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<(Duration, u64, u64)>>,
    entries: HashMap<u64, Entry>,
    next_seq: u64,
    next_id: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, at: Duration, id: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((at, seq, id)));
    }

    fn insert(&mut self, at: Duration, action: Action, period: Option<Duration>) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                action: Some(action),
                period,
            },
        );
        self.push(at, id);
        EventId(id)
    }

    /// Schedules `action` to fire once at `at`.
    pub fn schedule_once(&mut self, at: Duration, action: Action) -> EventId {
        self.insert(at, action, None)
    }

    /// Schedules `action` at `first` and every `period` after that.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ZeroPeriod`] for a zero period, which would
    /// otherwise fire forever within one tick.
    pub fn schedule_periodic(
        &mut self,
        first: Duration,
        period: Duration,
        action: Action,
    ) -> Result<EventId, SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }
        Ok(self.insert(first, action, Some(period)))
    }

    /// Removes an event; returns `false` if it was not scheduled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        self.entries.remove(&id.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Due time of the earliest live event.
    pub fn next_due(&mut self) -> Option<Duration> {
        while let Some(Reverse((at, _, id))) = self.heap.peek().copied() {
            if self.entries.contains_key(&id) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops the earliest event due at or before `now`.
    ///
    /// A periodic event's next occurrence is queued before this returns.
    /// Hand its action back with [`EventQueue::restore`] once it has run.
    pub fn pop_due(&mut self, now: Duration) -> Option<(EventId, Action)> {
        loop {
            let Reverse((at, _, id)) = self.heap.peek().copied()?;
            if at > now {
                return None;
            }
            self.heap.pop();

            let period = match self.entries.get(&id) {
                Some(entry) => entry.period,
                // Cancelled.
                None => continue,
            };
            match period {
                Some(period) => {
                    self.push(at + period, id);
                    let action = self.entries.get_mut(&id).and_then(|e| e.action.take());
                    if let Some(action) = action {
                        return Some((EventId(id), action));
                    }
                }
                None => {
                    if let Some(action) = self.entries.remove(&id).and_then(|e| e.action) {
                        return Some((EventId(id), action));
                    }
                }
            }
        }
    }

    /// Returns a periodic event's action after it ran.  One-shot and
    /// cancelled events are dropped.
    pub fn restore(&mut self, id: EventId, action: Action) {
        if let Some(entry) = self.entries.get_mut(&id.0) {
            entry.action = Some(action);
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub frame_period: Duration,
    /// Interval for GET_LOGS requests; `None` disables polling.
    pub log_poll: Option<Duration>,
    /// Interval for GET_STATUS requests; `None` disables polling.
    pub status_poll: Option<Duration>,
}

impl SchedulerConfig {
    /// Frame period for a rate in frames per second, without polls.
    ///
    /// `None` when the rate has no usable period (see [`period_for_rate`]).
    pub fn from_frame_rate(frame_rate: f64) -> Option<Self> {
        Some(Self {
            frame_period: period_for_rate(frame_rate)?,
            log_poll: None,
            status_poll: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub events_fired: usize,
    pub dispatch: DispatchReport,
}

pub struct Scheduler<L> {
    canvas: Canvas,
    dispatcher: Dispatcher<L>,
    queue: EventQueue,
    clock: Arc<dyn Clock>,
    frame_period: Duration,
    running: Arc<AtomicBool>,
}

impl<L: DeviceLink> Scheduler<L> {
    /// Builds a scheduler and queues one periodic advance per animated
    /// element, plus the configured diagnostic polls.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ZeroFramePeriod`] for a zero frame period.
    pub fn new(
        canvas: Canvas,
        dispatcher: Dispatcher<L>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
        running: Arc<AtomicBool>,
    ) -> Result<Self, SchedulerError> {
        if config.frame_period.is_zero() {
            return Err(SchedulerError::ZeroFramePeriod);
        }
        let now = clock.now_since_epoch();
        let mut queue = EventQueue::new();

        for id in canvas.ids() {
            let Some(period) = canvas.element(id).and_then(|e| e.frame_period()) else {
                continue;
            };
            match queue.schedule_periodic(now + period, period, Action::AdvanceElement(id)) {
                Ok(_) => debug!("element {id} advances every {period:?}"),
                Err(e) => warn!("element {id} will not animate: {e}"),
            }
        }
        let polls = [
            (config.log_poll, Action::RequestLogs),
            (config.status_poll, Action::RequestStatus),
        ];
        for (interval, action) in polls {
            let Some(interval) = interval else { continue };
            if let Err(e) = queue.schedule_periodic(now + interval, interval, action) {
                warn!("diagnostic poll disabled: {e}");
            }
        }

        Ok(Self {
            canvas,
            dispatcher,
            queue,
            clock,
            frame_period: config.frame_period,
            running,
        })
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn frame_period(&self) -> Duration {
        self.frame_period
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Queues a one-shot action `delay` from now.
    pub fn schedule_in(&mut self, delay: Duration, action: Action) -> EventId {
        let at = self.clock.now_since_epoch() + delay;
        self.queue.schedule_once(at, action)
    }

    /// Queues a periodic action whose first run is one `period` from now.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ZeroPeriod`] for a zero period.
    pub fn schedule_every(
        &mut self,
        period: Duration,
        action: Action,
    ) -> Result<EventId, SchedulerError> {
        let first = self.clock.now_since_epoch() + period;
        self.queue.schedule_periodic(first, period, action)
    }

    pub fn cancel(&mut self, id: EventId) -> bool {
        self.queue.cancel(id)
    }

    /// Sleeps until the next frame boundary and returns it.
    pub async fn frame_wait(&self) -> Duration {
        let now = self.clock.now_since_epoch();
        let wait = until_next_boundary(now, self.frame_period);
        self.clock.sleep(wait).await;
        now + wait
    }

    /// Fires every due event, recomposites and sends one frame.
    pub async fn tick(&mut self) -> TickReport {
        let now = self.clock.now_since_epoch();
        let mut events_fired = 0;
        while let Some((id, mut action)) = self.queue.pop_due(now) {
            self.run_action(&mut action);
            self.queue.restore(id, action);
            events_fired += 1;
        }

        self.canvas.recomposite();
        let dispatch = self.dispatcher.dispatch_frame(self.canvas.buffer()).await;
        TickReport {
            events_fired,
            dispatch,
        }
    }

    fn run_action(&mut self, action: &mut Action) {
        match action {
            Action::AdvanceElement(id) => {
                if !self.canvas.advance(*id) {
                    debug!("advance for removed element {id} ignored");
                }
            }
            Action::AdvanceAll => self.canvas.advance_all(),
            Action::RequestLogs => self.dispatcher.request_logs(),
            Action::RequestStatus => self.dispatcher.request_status(),
            Action::Custom(f) => f(&mut self.canvas),
        }
    }

    /// Runs ticks on frame boundaries until the running flag is cleared.
    ///
    /// The flag is only checked at the top of each tick.
    pub async fn run(&mut self) {
        info!(
            "scheduler started: {}x{} canvas, {} element(s), frame period {:?}",
            self.canvas.width(),
            self.canvas.height(),
            self.canvas.len(),
            self.frame_period
        );
        while self.running.load(Ordering::Relaxed) {
            self.frame_wait().await;
            let report = self.tick().await;
            if report.dispatch.failed > 0 {
                debug!("tick: {report:?}");
            }
        }

        for (mac, link) in self.dispatcher.registry().disconnect_all() {
            debug!("closing link to {mac}");
            link.close().await;
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Clock that only moves when told to; `sleep` advances it instantly.
    pub(crate) struct ManualClock {
        now: Mutex<Duration>,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl ManualClock {
        pub(crate) fn at(now: Duration) -> Self {
            Self {
                now: Mutex::new(now),
                sleeps: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }

        pub(crate) fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now_since_epoch(&self) -> Duration {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            self.advance(duration);
        }
    }
}
