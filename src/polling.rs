//! Background reconciliation of training status and history.
//!
//! A [`Poller`] thread fetches status on a timer and writes the results into
//! the [`AppStore`]. The cadence follows the last successful observation:
//! fast while a job is training, slow otherwise. Failed polls keep the
//! previous snapshot and surface the error through the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, TrainingHistoryEntry, TrainingStatus};
use crate::config::PollingSettings;
use crate::store::AppStore;

/// Backend calls the poll loop depends on.
pub trait StatusSource: Send + Sync + 'static {
    fn training_status(&self) -> Result<TrainingStatus, ApiError>;
    fn training_history(&self) -> Result<Vec<TrainingHistoryEntry>, ApiError>;
}

impl StatusSource for ApiClient {
    fn training_status(&self) -> Result<TrainingStatus, ApiError> {
        ApiClient::training_status(self)
    }

    fn training_history(&self) -> Result<Vec<TrainingHistoryEntry>, ApiError> {
        ApiClient::training_history(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cadence {
    pub idle: Duration,
    pub active: Duration,
}

impl From<&PollingSettings> for Cadence {
    fn from(settings: &PollingSettings) -> Self {
        Self {
            idle: settings.idle_interval,
            active: settings.active_interval,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    BecameActive,
    BecameIdle,
}

/// Pure cadence state machine driven by poll outcomes.
///
/// A finished run leaves a history refresh owed until one succeeds; while it
/// is owed the policy keeps the active cadence so the refresh is retried
/// promptly.
#[derive(Clone, Copy, Debug)]
pub struct ReconcilePolicy {
    phase: PollPhase,
    cadence: Cadence,
    history_pending: bool,
}

impl ReconcilePolicy {
    pub fn new(cadence: Cadence, phase: PollPhase) -> Self {
        Self {
            phase,
            cadence,
            history_pending: false,
        }
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    /// True while the history refresh for a finished run has not landed.
    pub fn history_pending(&self) -> bool {
        self.history_pending
    }

    /// Whether the next successful status poll should also fetch history.
    pub fn wants_history(&self) -> bool {
        self.phase == PollPhase::Active || self.history_pending
    }

    /// Record the result of a history fetch; a failure leaves any owed
    /// refresh in place.
    pub fn history_refreshed(&mut self, ok: bool) {
        if ok {
            self.history_pending = false;
        }
    }

    /// Feed one poll result: `Some(is_training)` on success, `None` on failure.
    pub fn observe(&mut self, outcome: Option<bool>) -> Transition {
        let Some(is_training) = outcome else {
            return Transition::Unchanged;
        };
        let next = if is_training {
            PollPhase::Active
        } else {
            PollPhase::Idle
        };
        let transition = match (self.phase, next) {
            (PollPhase::Idle, PollPhase::Active) => Transition::BecameActive,
            (PollPhase::Active, PollPhase::Idle) => Transition::BecameIdle,
            _ => Transition::Unchanged,
        };
        if transition == Transition::BecameIdle {
            self.history_pending = true;
        }
        self.phase = next;
        transition
    }

    pub fn next_interval(&self) -> Duration {
        match self.phase {
            PollPhase::Active => self.cadence.active,
            PollPhase::Idle if self.history_pending => self.cadence.active,
            PollPhase::Idle => self.cadence.idle,
        }
    }
}

/// Progress notifications for callers that want to follow a poll loop.
#[derive(Clone, Debug, PartialEq)]
pub enum PollEvent {
    Status(TrainingStatus),
    Failed(String),
    Stopped(StopReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    CeilingReached,
    TrainingFinished,
}

pub struct PollOptions {
    pub cadence: Cadence,
    /// Stop after this much wall time.
    pub ceiling: Option<Duration>,
    pub start_active: bool,
    /// Stop once a job seen training goes idle.
    pub stop_when_idle: bool,
    pub events: Option<Sender<PollEvent>>,
}

impl PollOptions {
    /// Long-running background reconciliation.
    pub fn background(settings: &PollingSettings) -> Self {
        Self {
            cadence: Cadence::from(settings),
            ceiling: None,
            start_active: false,
            stop_when_idle: false,
            events: None,
        }
    }

    /// Fast, bounded loop following a training job that was just started.
    pub fn training_watch(settings: &PollingSettings) -> Self {
        Self {
            cadence: Cadence::from(settings),
            ceiling: Some(settings.training_watch_ceiling),
            start_active: true,
            stop_when_idle: false,
            events: None,
        }
    }

    pub fn stop_when_idle(mut self, stop: bool) -> Self {
        self.stop_when_idle = stop;
        self
    }

    pub fn with_events(mut self, events: Sender<PollEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

/// Cloneable handle that stops a poll loop from any thread.
#[derive(Clone, Debug)]
pub struct PollCanceller {
    cancelled: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl PollCanceller {
    /// Idempotent; wakes a sleeping loop immediately.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            let _ = self.wake.send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Owns a running poll thread; dropping it cancels the loop.
#[derive(Debug)]
pub struct PollHandle {
    canceller: PollCanceller,
    thread: Option<JoinHandle<StopReason>>,
}

impl PollHandle {
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> PollCanceller {
        self.canceller.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .is_none_or(|thread| thread.is_finished())
    }

    /// Wait for the loop to stop. A loop that panicked reports `Cancelled`.
    pub fn join(mut self) -> StopReason {
        let Some(thread) = self.thread.take() else {
            return StopReason::Cancelled;
        };
        thread.join().unwrap_or_else(|_| {
            warn!("Poll thread panicked");
            StopReason::Cancelled
        })
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.canceller.cancel();
    }
}

pub struct Poller;

impl Poller {
    pub fn spawn<S: StatusSource>(
        source: Arc<S>,
        store: Arc<AppStore>,
        options: PollOptions,
    ) -> PollHandle {
        let (wake_tx, wake_rx) = mpsc::channel();
        let canceller = PollCanceller {
            cancelled: Arc::new(AtomicBool::new(false)),
            wake: wake_tx,
        };
        let cancelled = Arc::clone(&canceller.cancelled);
        let thread = thread::Builder::new()
            .name("dishlab-poller".into())
            .spawn(move || run_poll_loop(source.as_ref(), &store, options, &cancelled, &wake_rx));
        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(err) => {
                warn!("Failed to spawn poll thread: {err}");
                None
            }
        };
        PollHandle { canceller, thread }
    }
}

/// What one poll tick did.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    Applied(Transition),
    /// Status was applied but the history fetch failed; it is retried on
    /// later ticks.
    Partial {
        transition: Transition,
        error: String,
    },
    Failed(String),
    Discarded,
}

/// Run one poll against `source` and merge the result into `store`.
pub fn poll_once<S: StatusSource + ?Sized>(
    source: &S,
    store: &AppStore,
    policy: &mut ReconcilePolicy,
    cancelled: &AtomicBool,
) -> TickOutcome {
    let status = source.training_status();
    if cancelled.load(Ordering::SeqCst) {
        return TickOutcome::Discarded;
    }
    let status = match status {
        Ok(status) => status,
        Err(err) => {
            return TickOutcome::Failed(record_failure(store, policy, "status", &err));
        }
    };
    let transition = policy.observe(Some(status.is_training));
    if transition != Transition::Unchanged {
        info!(
            "Training {}: {}",
            if status.is_training { "active" } else { "idle" },
            status.status_message
        );
    }
    store.set_training_status(status);
    store.clear_poll_error();

    if policy.wants_history() {
        let history = source.training_history();
        if cancelled.load(Ordering::SeqCst) {
            return TickOutcome::Discarded;
        }
        policy.history_refreshed(history.is_ok());
        match history {
            Ok(history) => store.set_training_history(history),
            Err(err) => {
                let error = record_failure(store, policy, "history", &err);
                return TickOutcome::Partial { transition, error };
            }
        }
    }
    TickOutcome::Applied(transition)
}

fn record_failure(
    store: &AppStore,
    policy: &mut ReconcilePolicy,
    what: &str,
    err: &ApiError,
) -> String {
    policy.observe(None);
    warn!("Training {what} poll failed: {err}");
    let message = err.to_string();
    store.record_poll_error(message.clone());
    message
}

fn run_poll_loop<S: StatusSource + ?Sized>(
    source: &S,
    store: &AppStore,
    options: PollOptions,
    cancelled: &AtomicBool,
    wake_rx: &Receiver<()>,
) -> StopReason {
    let started = Instant::now();
    let phase = if options.start_active {
        PollPhase::Active
    } else {
        PollPhase::Idle
    };
    let mut policy = ReconcilePolicy::new(options.cadence, phase);
    let mut seen_training = false;
    let mut finished = false;
    let emit = |event: PollEvent| {
        if let Some(events) = &options.events {
            let _ = events.send(event);
        }
    };
    debug!("Poll loop started in {phase:?} phase");

    let reason = loop {
        if cancelled.load(Ordering::SeqCst) {
            break StopReason::Cancelled;
        }
        let (transition, error) = match poll_once(source, store, &mut policy, cancelled) {
            TickOutcome::Discarded => break StopReason::Cancelled,
            TickOutcome::Failed(message) => (None, Some(message)),
            TickOutcome::Applied(transition) => (Some(transition), None),
            TickOutcome::Partial { transition, error } => (Some(transition), Some(error)),
        };
        if let Some(transition) = transition {
            let status = store.training_status();
            seen_training |= status.is_training;
            emit(PollEvent::Status(status));
            finished |= seen_training && transition == Transition::BecameIdle;
        }
        if let Some(message) = error {
            emit(PollEvent::Failed(message));
        }
        // A finished watch stops once the run's history has landed.
        if options.stop_when_idle && finished && !policy.history_pending() {
            break StopReason::TrainingFinished;
        }

        let mut wait = policy.next_interval();
        if let Some(ceiling) = options.ceiling {
            let elapsed = started.elapsed();
            if elapsed >= ceiling {
                break StopReason::CeilingReached;
            }
            wait = wait.min(ceiling - elapsed);
        }
        match wake_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break StopReason::Cancelled,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if options.ceiling.is_some_and(|ceiling| started.elapsed() >= ceiling) {
            break StopReason::CeilingReached;
        }
    };
    debug!("Poll loop stopped: {reason:?}");
    emit(PollEvent::Stopped(reason));
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    const FAST: Cadence = Cadence {
        idle: Duration::from_millis(40),
        active: Duration::from_millis(5),
    };

    fn status(is_training: bool) -> TrainingStatus {
        TrainingStatus {
            is_training,
            status_message: if is_training { "Training" } else { "Ready" }.into(),
            ..TrainingStatus::default()
        }
    }

    #[derive(Default)]
    struct ScriptedSource {
        statuses: Mutex<VecDeque<Result<TrainingStatus, ApiError>>>,
        fallback: Option<TrainingStatus>,
        status_calls: AtomicUsize,
        history_calls: AtomicUsize,
        /// 1-based history calls that fail.
        failing_history_calls: Vec<usize>,
        delay: Duration,
        entered: Mutex<Option<Sender<()>>>,
    }

    impl ScriptedSource {
        fn with(statuses: Vec<Result<TrainingStatus, ApiError>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                ..Self::default()
            }
        }
    }

    impl StatusSource for ScriptedSource {
        fn training_status(&self) -> Result<TrainingStatus, ApiError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(entered) = self.entered.lock().unwrap().take() {
                let _ = entered.send(());
            }
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            match self.statuses.lock().unwrap().pop_front() {
                Some(next) => next,
                None => Ok(self.fallback.clone().unwrap_or_else(|| status(false))),
            }
        }

        fn training_history(&self) -> Result<Vec<TrainingHistoryEntry>, ApiError> {
            let calls = self.history_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing_history_calls.contains(&calls) {
                return Err(ApiError::Network("history unavailable".into()));
            }
            Ok(vec![TrainingHistoryEntry {
                run_name: format!("run_{calls}"),
                ..TrainingHistoryEntry::default()
            }])
        }
    }

    #[test]
    fn cadence_follows_the_last_observation() {
        let cadence = Cadence {
            idle: Duration::from_secs(30),
            active: Duration::from_secs(5),
        };
        let mut policy = ReconcilePolicy::new(cadence, PollPhase::Idle);
        let intervals: Vec<_> = [true, true, false, true]
            .into_iter()
            .map(|is_training| {
                policy.observe(Some(is_training));
                if policy.wants_history() {
                    policy.history_refreshed(true);
                }
                policy.next_interval()
            })
            .collect();
        assert_eq!(
            intervals,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(5),
                Duration::from_secs(30),
                Duration::from_secs(5)
            ]
        );
    }

    #[test]
    fn failures_keep_the_current_phase() {
        let mut policy = ReconcilePolicy::new(FAST, PollPhase::Active);
        assert_eq!(policy.observe(None), Transition::Unchanged);
        assert_eq!(policy.phase(), PollPhase::Active);
        assert_eq!(policy.observe(Some(false)), Transition::BecameIdle);
        assert_eq!(policy.observe(None), Transition::Unchanged);
        assert_eq!(policy.phase(), PollPhase::Idle);
    }

    #[test]
    fn failed_poll_keeps_snapshot_and_recovery_clears_error() {
        let source = ScriptedSource::with(vec![
            Ok(status(true)),
            Err(ApiError::Network("connection refused".into())),
            Ok(status(true)),
        ]);
        let store = AppStore::new();
        let cancelled = AtomicBool::new(false);
        let mut policy = ReconcilePolicy::new(FAST, PollPhase::Idle);

        poll_once(&source, &store, &mut policy, &cancelled);
        let outcome = poll_once(&source, &store, &mut policy, &cancelled);
        assert!(matches!(outcome, TickOutcome::Failed(_)));
        assert!(store.training_status().is_training);
        assert_eq!(
            store.error().as_deref(),
            Some("Network error: connection refused")
        );
        assert_eq!(policy.phase(), PollPhase::Active);

        poll_once(&source, &store, &mut policy, &cancelled);
        assert_eq!(store.error(), None);
    }

    #[test]
    fn finishing_a_run_refreshes_history_once() {
        let source = ScriptedSource::with(vec![Ok(status(false)), Ok(status(false))]);
        let store = AppStore::new();
        let cancelled = AtomicBool::new(false);
        let mut policy = ReconcilePolicy::new(FAST, PollPhase::Active);

        let outcome = poll_once(&source, &store, &mut policy, &cancelled);
        assert_eq!(outcome, TickOutcome::Applied(Transition::BecameIdle));
        assert_eq!(store.training_history()[0].run_name, "run_1");
        poll_once(&source, &store, &mut policy, &cancelled);
        assert_eq!(source.history_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_history_after_finish_keeps_transition_and_retries() {
        let source = ScriptedSource {
            failing_history_calls: vec![1],
            ..ScriptedSource::with(vec![Ok(status(false)), Ok(status(false))])
        };
        let store = AppStore::new();
        let cancelled = AtomicBool::new(false);
        let mut policy = ReconcilePolicy::new(FAST, PollPhase::Active);

        let outcome = poll_once(&source, &store, &mut policy, &cancelled);
        assert_eq!(
            outcome,
            TickOutcome::Partial {
                transition: Transition::BecameIdle,
                error: "Network error: history unavailable".into(),
            }
        );
        assert!(!store.training_status().is_training);
        assert!(store.error().is_some());
        assert!(policy.history_pending());
        assert_eq!(policy.next_interval(), FAST.active);

        let outcome = poll_once(&source, &store, &mut policy, &cancelled);
        assert_eq!(outcome, TickOutcome::Applied(Transition::Unchanged));
        assert_eq!(store.training_history()[0].run_name, "run_2");
        assert_eq!(store.error(), None);
        assert!(!policy.history_pending());
        assert_eq!(policy.next_interval(), FAST.idle);
    }

    #[test]
    fn watch_finishes_after_history_retry_succeeds() {
        let source = Arc::new(ScriptedSource {
            failing_history_calls: vec![2],
            ..ScriptedSource::with(vec![Ok(status(true)), Ok(status(false))])
        });
        let store = Arc::new(AppStore::new());
        let (events_tx, events_rx) = mpsc::channel();
        let options = PollOptions {
            cadence: FAST,
            ceiling: Some(Duration::from_millis(500)),
            start_active: true,
            stop_when_idle: true,
            events: Some(events_tx),
        };
        let handle = Poller::spawn(Arc::clone(&source), Arc::clone(&store), options);
        assert_eq!(handle.join(), StopReason::TrainingFinished);
        assert_eq!(source.history_calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.training_history()[0].run_name, "run_3");
        assert_eq!(store.error(), None);

        let failures = events_rx
            .try_iter()
            .filter(|event| matches!(event, PollEvent::Failed(_)))
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn ceiling_stops_the_loop() {
        let source = Arc::new(ScriptedSource {
            fallback: Some(status(true)),
            ..ScriptedSource::default()
        });
        let store = Arc::new(AppStore::new());
        let handle = Poller::spawn(
            Arc::clone(&source),
            store,
            PollOptions {
                cadence: FAST,
                ceiling: Some(Duration::from_millis(60)),
                start_active: true,
                stop_when_idle: false,
                events: None,
            },
        );
        assert_eq!(handle.join(), StopReason::CeilingReached);
        assert!(source.status_calls.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn cancel_is_idempotent_and_wakes_the_loop() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(AppStore::new());
        let handle = Poller::spawn(
            source,
            store,
            PollOptions {
                cadence: Cadence {
                    idle: Duration::from_secs(3600),
                    active: Duration::from_secs(3600),
                },
                ceiling: None,
                start_active: false,
                stop_when_idle: false,
                events: None,
            },
        );
        let canceller = handle.canceller();
        let started = Instant::now();
        handle.cancel();
        handle.cancel();
        canceller.cancel();
        assert!(canceller.is_cancelled());
        assert_eq!(handle.join(), StopReason::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn result_arriving_after_cancel_is_discarded() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let source = Arc::new(ScriptedSource {
            fallback: Some(status(true)),
            delay: Duration::from_millis(150),
            entered: Mutex::new(Some(entered_tx)),
            ..ScriptedSource::default()
        });
        let store = Arc::new(AppStore::new());
        let handle = Poller::spawn(source, Arc::clone(&store), PollOptions {
            cadence: FAST,
            ceiling: None,
            start_active: false,
            stop_when_idle: false,
            events: None,
        });
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.cancel();
        assert_eq!(handle.join(), StopReason::Cancelled);
        assert!(!store.training_status().is_training);
    }

    #[test]
    fn watch_stops_when_training_finishes_and_reports_events() {
        let source = Arc::new(ScriptedSource::with(vec![
            Ok(status(false)),
            Ok(status(true)),
            Ok(status(true)),
            Ok(status(false)),
        ]));
        let store = Arc::new(AppStore::new());
        let (events_tx, events_rx) = mpsc::channel();
        let options = PollOptions {
            cadence: FAST,
            ceiling: Some(Duration::from_secs(10)),
            start_active: true,
            stop_when_idle: false,
            events: None,
        }
        .stop_when_idle(true)
        .with_events(events_tx);
        let handle = Poller::spawn(Arc::clone(&source), Arc::clone(&store), options);
        assert_eq!(handle.join(), StopReason::TrainingFinished);
        assert_eq!(source.status_calls.load(Ordering::SeqCst), 4);

        let events: Vec<_> = events_rx.try_iter().collect();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events.last(),
            Some(&PollEvent::Stopped(StopReason::TrainingFinished))
        );
        assert!(!store.training_status().is_training);
        assert!(!store.training_history().is_empty());
    }
}
