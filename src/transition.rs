use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::ServoError;

/// Moves a servo toward a target position one hardware write at a time.
pub trait TransitionController: Send + Sync + 'static {
    /// Blocks until the move is over. `Err` values for which
    /// [`ServoError::is_expected_stop`] holds count as a normal end.
    fn move_to(&self, target: &dyn StepTarget, position: f64) -> Result<(), ServoError>;
}

/// What a transition controller gets to see of a servo: the hardware write
/// path and nothing else.
pub trait StepTarget: Send + Sync {
    fn name(&self) -> String;
    fn actual_position(&self) -> f64;
    /// Number of discrete positions the hardware can tell apart.
    fn precision(&self) -> Result<i64, ServoError>;
    fn step(&self, position: f64) -> Result<(), ServoError>;
}

/// Outcome of a transition, written exactly once by whoever holds the id it
/// was created with.
#[derive(Debug)]
pub struct TransitionStatus {
    auth: u64,
    outcome: Mutex<Option<Result<(), ServoError>>>,
    done: Condvar,
}

pub type TransitionHandle = Arc<TransitionStatus>;

impl TransitionStatus {
    pub fn new(auth: u64) -> Self {
        Self { auth, outcome: Mutex::new(None), done: Condvar::new() }
    }

    pub(crate) fn completed() -> TransitionHandle {
        let status = TransitionStatus::new(0);
        *status.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(Ok(()));
        Arc::new(status)
    }

    pub fn complete(&self, auth: u64, cause: Option<ServoError>) -> Result<(), ServoError> {
        if auth != self.auth {
            return Err(ServoError::AccessDenied);
        }
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if outcome.is_some() {
            return Err(ServoError::AlreadyCompleted);
        }
        *outcome = Some(match cause {
            None => Ok(()),
            Some(e) => Err(e),
        });
        self.done.notify_all();
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn is_ok(&self) -> Result<bool, ServoError> {
        self.outcome().map(|o| o.is_ok())
    }

    pub fn cause(&self) -> Result<Option<ServoError>, ServoError> {
        self.outcome().map(|o| o.err())
    }

    fn outcome(&self) -> Result<Result<(), ServoError>, ServoError> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ServoError::NotCompleted)
    }

    /// Blocks until the transition is over and returns how it ended.
    pub fn wait(&self) -> Result<(), ServoError> {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            outcome = self.done.wait(outcome).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// `None` if the transition is still running after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), ServoError>> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = outcome.as_ref() {
                return Some(result.clone());
            }
            let left = deadline.checked_duration_since(Instant::now())?;
            outcome = self
                .done
                .wait_timeout(outcome, left)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|p| p.into_inner().0);
        }
    }
}

static NEXT_AUTH: AtomicU64 = AtomicU64::new(1);

/// Writer half of a [`TransitionStatus`]. Consumed on completion; dropping it
/// unused resolves the status as failed with [`ServoError::Closed`].
pub(crate) struct Completer {
    status: Option<TransitionHandle>,
    auth: u64,
}

impl Completer {
    pub(crate) fn new() -> (Self, TransitionHandle) {
        let auth = NEXT_AUTH.fetch_add(1, Ordering::Relaxed);
        let status = Arc::new(TransitionStatus::new(auth));
        (Self { status: Some(Arc::clone(&status)), auth }, status)
    }

    pub(crate) fn complete(mut self, cause: Option<ServoError>) {
        if let Some(status) = self.status.take() {
            if let Err(e) = status.complete(self.auth, cause) {
                error!("completing transition: {e}");
            }
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(status) = self.status.take() {
            let _ = status.complete(self.auth, Some(ServoError::Closed));
        }
    }
}

struct TransitionJob {
    target: Box<dyn StepTarget>,
    position: f64,
    completer: Completer,
}

/// Runs `controller` against `target` and settles the completion token.
/// Never unwinds.
pub(crate) fn drive(
    controller: &dyn TransitionController,
    target: &dyn StepTarget,
    position: f64,
    completer: Completer,
) {
    debug!(servo = %target.name(), from = target.actual_position(), to = position, "transition");

    let result = panic::catch_unwind(AssertUnwindSafe(|| controller.move_to(target, position)))
        .unwrap_or_else(|_| Err(ServoError::Internal("transition controller panicked".into())));

    match result {
        Ok(()) => completer.complete(None),
        Err(e) if e.is_expected_stop() => {
            debug!(servo = %target.name(), "stopped: {e}");
            completer.complete(None);
        }
        Err(e) => {
            error!(servo = %target.name(), "unexpected error, stopping: {e}");
            completer.complete(Some(e));
        }
    }
}

/// One background thread per servo; transitions queue up and run in order.
pub(crate) struct TransitionWorker {
    controller: Arc<dyn TransitionController>,
    tx: mpsc::UnboundedSender<TransitionJob>,
}

impl TransitionWorker {
    pub(crate) fn spawn(
        name: &str,
        controller: Arc<dyn TransitionController>,
    ) -> Result<Self, ServoError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<TransitionJob>();
        let worker_controller = Arc::clone(&controller);

        let worker = name.to_string();
        thread::Builder::new()
            .name(format!("transition-{name}"))
            .spawn(move || {
                debug!(%worker, "transition worker started");
                while let Some(job) = rx.blocking_recv() {
                    drive(&*worker_controller, &*job.target, job.position, job.completer);
                }
                debug!(%worker, "transition worker stopped");
            })
            .map_err(|e| ServoError::Worker(e.to_string()))?;

        Ok(Self { controller, tx })
    }

    pub(crate) fn controller(&self) -> &Arc<dyn TransitionController> {
        &self.controller
    }

    pub(crate) fn submit(
        &self,
        target: Box<dyn StepTarget>,
        position: f64,
    ) -> Result<TransitionHandle, ServoError> {
        let (completer, handle) = Completer::new();
        self.tx
            .send(TransitionJob { target, position, completer })
            .map_err(|_| ServoError::Closed)?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_id_is_refused() {
        let status = TransitionStatus::new(0);
        assert!(matches!(status.complete(1, None), Err(ServoError::AccessDenied)));
        assert!(!status.is_complete());
    }

    #[test]
    fn reading_before_completion_fails() {
        let status = TransitionStatus::new(0);
        assert!(matches!(status.is_ok(), Err(ServoError::NotCompleted)));
        assert!(matches!(status.cause(), Err(ServoError::NotCompleted)));
    }

    #[test]
    fn success_has_no_cause() {
        let status = TransitionStatus::new(0);
        status.complete(0, None).unwrap();
        assert!(status.is_ok().unwrap());
        assert!(status.cause().unwrap().is_none());
    }

    #[test]
    fn failure_keeps_cause() {
        let status = TransitionStatus::new(0);
        status.complete(0, Some(ServoError::Communication("bus stuck".into()))).unwrap();
        assert!(!status.is_ok().unwrap());
        assert!(matches!(status.cause().unwrap(), Some(ServoError::Communication(_))));
    }

    #[test]
    fn completes_only_once() {
        let status = TransitionStatus::new(7);
        status.complete(7, None).unwrap();
        assert!(matches!(status.complete(7, None), Err(ServoError::AlreadyCompleted)));
    }

    #[test]
    fn dropped_completer_resolves_closed() {
        let (completer, handle) = Completer::new();
        drop(completer);
        assert!(matches!(handle.wait(), Err(ServoError::Closed)));
    }

    #[test]
    fn wait_timeout_expires_while_pending() {
        let (completer, handle) = Completer::new();
        assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());

        let waiter = {
            let handle = Arc::clone(&handle);
            thread::spawn(move || handle.wait_timeout(Duration::from_secs(5)))
        };
        completer.complete(None);
        assert!(matches!(waiter.join().unwrap(), Some(Ok(()))));
    }

    struct Panicking;

    impl TransitionController for Panicking {
        fn move_to(&self, _target: &dyn StepTarget, _position: f64) -> Result<(), ServoError> {
            panic!("boom");
        }
    }

    struct Idle;

    impl StepTarget for Idle {
        fn name(&self) -> String {
            "idle".into()
        }
        fn actual_position(&self) -> f64 {
            0.0
        }
        fn precision(&self) -> Result<i64, ServoError> {
            Ok(2)
        }
        fn step(&self, _position: f64) -> Result<(), ServoError> {
            Ok(())
        }
    }

    struct AtLimit;

    impl TransitionController for AtLimit {
        fn move_to(&self, _target: &dyn StepTarget, position: f64) -> Result<(), ServoError> {
            Err(ServoError::LimitReached(position))
        }
    }

    #[test]
    fn limit_stop_completes_ok() {
        let (completer, handle) = Completer::new();
        drive(&AtLimit, &Idle, 1.0, completer);
        assert!(handle.is_ok().unwrap());
        assert!(handle.cause().unwrap().is_none());
    }

    #[test]
    fn panics_become_failed_tokens() {
        let (completer, handle) = Completer::new();
        drive(&Panicking, &Idle, 1.0, completer);
        assert!(matches!(handle.cause().unwrap(), Some(ServoError::Internal(_))));
    }
}
