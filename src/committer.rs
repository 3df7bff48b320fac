//! Debounced background commits.
//!
//! A [`Committer`] runs a [`CommitAction`] at most once per burst of [`trigger()`](Committer::trigger) calls. The
//! action fires when no trigger has arrived for the quiet period, or when the max delay has passed since the first
//! trigger of the burst, whichever happens first. Triggers that arrive while the action is running start another
//! cycle once it completes.
//!
//! The background task only exists while there is something to commit: the first trigger of an idle committer
//! spawns it and it exits as soon as a commit finds no newer triggers.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::CacheError;
use crate::traits::CommitAction;
use crate::types::CommitPhase;

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct CommitState {
    phase:         CommitPhase,
    // First trigger not yet covered by a commit. Bounds the total delay.
    first_trigger: Option<Instant>,
    last_trigger:  Option<Instant>,
    // Bumped on every trigger. A commit covers every trigger issued before it started.
    requested:     u64,
    // Generation covered by the commit currently running. Only meaningful while flushing.
    in_flight:     u64,
    // Somebody is waiting in flush_and_wait; skip the debounce.
    urgent:        bool,
    // The last commit failed and is waiting to be retried.
    retrying:      bool,
    closed:        bool,
}

impl CommitState {
    fn go_idle(&mut self) {
        self.phase = CommitPhase::Idle;
        self.urgent = false;
    }
}

#[derive(Clone, Debug, Default)]
struct Progress {
    // Highest trigger generation covered by a successful commit.
    committed: u64,
    // Highest trigger generation a commit has been attempted for.
    attempted: u64,
    // Number of commit attempts so far, failed or not.
    attempts:  u64,
    error:     Option<Arc<CacheError>>,
}

struct Shared<A> {
    name:         String,
    action:       Arc<A>,
    quiet_period: Duration,
    max_delay:    Duration,
    state:        Mutex<CommitState>,
    wakeup:       Notify,
    progress:     watch::Sender<Progress>,
}

pub struct Committer<A>
where
    A: CommitAction,
{
    shared: Arc<Shared<A>>,
}

impl<A> Committer<A>
where
    A: CommitAction,
{
    pub fn new(name: impl Into<String>, action: Arc<A>, quiet_period: Duration, max_delay: Duration) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                action,
                quiet_period,
                // A max delay shorter than the quiet period would make the quiet period meaningless.
                max_delay: max_delay.max(quiet_period),
                state: Mutex::new(CommitState {
                    phase:         CommitPhase::Idle,
                    first_trigger: None,
                    last_trigger:  None,
                    requested:     0,
                    in_flight:     0,
                    urgent:        false,
                    retrying:      false,
                    closed:        false,
                }),
                wakeup: Notify::new(),
                progress,
            }),
        }
    }

    pub fn phase(&self) -> CommitPhase {
        self.shared.state.lock().phase
    }

    pub fn quiet_period(&self) -> Duration {
        self.shared.quiet_period
    }

    pub fn max_delay(&self) -> Duration {
        self.shared.max_delay
    }

    /// True if there are triggers not yet covered by a successful commit.
    pub fn has_pending(&self) -> bool {
        let requested = self.shared.state.lock().requested;
        requested > self.shared.progress.borrow().committed
    }

    /// Request a commit. Never blocks and never waits for the commit.
    ///
    /// Must be called from within a Tokio runtime. Must not be called while holding a lock the commit action
    /// itself needs.
    pub fn trigger(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            warn!("[{}] Commit requested after close; ignored", self.shared.name);
            return;
        }

        let now = Instant::now();
        state.requested += 1;
        state.last_trigger = Some(now);
        state.first_trigger.get_or_insert(now);

        if state.phase == CommitPhase::Idle {
            self.start_monitor(&mut state);
        }
    }

    fn start_monitor(&self, state: &mut CommitState) {
        state.phase = CommitPhase::Pending;
        debug!("[{}] Starting commit monitor", self.shared.name);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.monitor().await });
    }

    /// Commit everything triggered so far without waiting for the debounce and wait for it to land.
    ///
    /// On timeout the commit is not cancelled; it completes in the background. Dropping the returned future has the
    /// same effect.
    pub async fn flush_and_wait(&self, timeout: Duration) -> Result<(), CacheError> {
        let mut progress = self.shared.progress.subscribe();
        let (target, attempts_before, hurry) = {
            let mut state = self.shared.state.lock();
            if state.requested <= progress.borrow().committed {
                return Ok(());
            }
            if state.phase == CommitPhase::Idle {
                // A failed commit the closed committer gave up on.
                if let Some(err) = progress.borrow().error.clone() {
                    return Err(CacheError::CommitFailed(err));
                }
                self.start_monitor(&mut state);
            }
            // A running commit that already covers everything needs no follow-up.
            let covered = state.phase == CommitPhase::Flushing && state.in_flight >= state.requested;
            if !covered {
                state.urgent = true;
            }
            (state.requested, progress.borrow().attempts, !covered)
        };
        if hurry {
            self.shared.wakeup.notify_one();
        }

        let wait = async {
            loop {
                {
                    let current = progress.borrow_and_update();
                    if current.committed >= target {
                        return Ok(());
                    }
                    // Only a failure of an attempt made after we asked counts; older ones are being retried.
                    if current.attempts > attempts_before && current.attempted >= target {
                        if let Some(err) = &current.error {
                            return Err(CacheError::CommitFailed(Arc::clone(err)));
                        }
                    }
                }
                if progress.changed().await.is_err() {
                    // The sender lives in `shared`, which we hold.
                    return Ok(());
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("[{}] Commit did not finish within {timeout:?}", self.shared.name);
                Err(CacheError::CommitTimeout(timeout))
            }
        }
    }

    /// Stop accepting triggers. Work already scheduled still runs, except for the retry of a failed commit, which is
    /// abandoned.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.wakeup.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl<A> Shared<A>
where
    A: CommitAction,
{
    async fn monitor(&self) {
        loop {
            let deadline = {
                let mut state = self.state.lock();
                if state.closed && state.retrying && !state.urgent {
                    state.go_idle();
                    warn!("[{}] Committer is closed; giving up on the failed commit", self.name);
                    break;
                }
                if state.urgent {
                    None
                }
                else {
                    let now = Instant::now();
                    let quiet = state.last_trigger.unwrap_or(now) + self.quiet_period;
                    let hard = state.first_trigger.unwrap_or(now) + self.max_delay;
                    Some(quiet.min(hard)).filter(|deadline| *deadline > now)
                }
            };

            if let Some(deadline) = deadline {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = self.wakeup.notified() => {}
                }
                // Triggers may have moved the deadline; recompute.
                continue;
            }

            let generation = {
                let mut state = self.state.lock();
                state.phase = CommitPhase::Flushing;
                state.urgent = false;
                state.first_trigger = None;
                state.last_trigger = None;
                state.in_flight = state.requested;
                state.in_flight
            };

            debug!("[{}] Committing up to trigger #{generation}", self.name);
            let outcome = self.action.commit().await;
            let failed = outcome.is_err();

            self.progress.send_modify(|progress| {
                progress.attempted = generation;
                progress.attempts += 1;
                match outcome {
                    Ok(()) => {
                        progress.committed = generation;
                        progress.error = None;
                    }
                    Err(err) => {
                        error!("[{}] Commit failed: {err}", self.name);
                        progress.error = Some(Arc::new(err));
                    }
                }
            });

            let mut state = self.state.lock();
            state.retrying = failed;
            if failed {
                if state.closed {
                    state.go_idle();
                    warn!("[{}] Committer is closed; giving up on the failed commit", self.name);
                    break;
                }
                // Retry after a quiet period, sooner if more triggers arrive and then settle.
                let now = Instant::now();
                state.first_trigger.get_or_insert(now);
                state.last_trigger.get_or_insert(now);
                state.phase = CommitPhase::Pending;
                continue;
            }

            if state.requested > generation {
                // Triggered while we were busy.
                state.phase = CommitPhase::Pending;
                continue;
            }

            state.go_idle();
            debug!("[{}] Nothing left to commit; stopping monitor", self.name);
            break;
        }
    }
}

impl<A> Drop for Committer<A>
where
    A: CommitAction,
{
    fn drop(&mut self) {
        if !self.is_closed() && self.has_pending() {
            warn!(
                "[{}] Dropped with uncommitted changes; they will be lost if the runtime stops before the background commit",
                self.shared.name
            );
        }
    }
}
