use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
};

use tracing::debug;

use crate::{
    controller::{Controller, ControllerInner},
    error::ServoError,
    meta::{keys, Meta},
    model::{check_position, ServoId, CENTER},
    transition::{
        StepTarget, TransitionController, TransitionHandle, TransitionStatus, TransitionWorker,
    },
};

/// Observer of position changes. Callbacks run on whichever thread made the
/// change, after the change is visible.
pub trait ServoListener: Send + Sync {
    fn position_changed(&self, _servo: &Servo, _position: f64) {}
    fn actual_position_changed(&self, _servo: &Servo, _position: f64) {}
}

/// The position control surface shared by servos and coordinate transforms.
pub trait PositionControl: Send + Sync {
    fn name(&self) -> String;

    /// Requests `position`. The returned handle completes once the hardware
    /// has caught up; immediately unless a transition controller is attached.
    fn set_position(&self, position: f64) -> Result<TransitionHandle, ServoError>;

    /// Last requested position.
    fn position(&self) -> f64;

    /// Last position confirmed written to the hardware.
    fn actual_position(&self) -> f64;

    fn set_enabled(&self, enabled: bool) -> Result<(), ServoError>;
    fn is_enabled(&self) -> bool;

    fn attach(&self, transition: Arc<dyn TransitionController>) -> Result<(), ServoError>;
    fn detach(&self) -> Option<Arc<dyn TransitionController>>;

    fn add_listener(&self, listener: Arc<dyn ServoListener>);
    fn remove_listener(&self, listener: &Arc<dyn ServoListener>) -> Result<(), ServoError>;

    fn meta(&self) -> Result<Meta, ServoError>;
}

struct ServoCore {
    id: ServoId,
    controller: Weak<ControllerInner>,
    requested: AtomicU64,
    actual: AtomicU64,
    enabled: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn ServoListener>>>,
    transition: Mutex<Option<TransitionWorker>>,
}

/// A single channel of a controller. Cheap to clone; all clones are the same servo.
#[derive(Clone)]
pub struct Servo {
    core: Arc<ServoCore>,
}

impl fmt::Debug for Servo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Servo")
            .field("id", &self.core.id)
            .field("position", &self.position())
            .field("actual_position", &self.actual_position())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Servo {
    pub(crate) fn new(id: ServoId, controller: Weak<ControllerInner>) -> Self {
        Self {
            core: Arc::new(ServoCore {
                id,
                controller,
                requested: AtomicU64::new(CENTER.to_bits()),
                actual: AtomicU64::new(CENTER.to_bits()),
                enabled: AtomicBool::new(true),
                listeners: Mutex::new(Vec::new()),
                transition: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ServoId {
        self.core.id
    }

    pub fn controller(&self) -> Option<Controller> {
        self.core.controller.upgrade().map(Controller::from_inner)
    }

    fn inner(&self) -> Result<Arc<ControllerInner>, ServoError> {
        self.core.controller.upgrade().ok_or(ServoError::Closed)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn ServoListener>>> {
        self.core.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker(&self) -> MutexGuard<'_, Option<TransitionWorker>> {
        self.core.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, f: impl Fn(&dyn ServoListener)) {
        let listeners = self.listeners().clone();
        for l in &listeners {
            f(l.as_ref());
        }
    }

    /// The hardware write path: one write under the controller lock, then the
    /// idle clock is reset and listeners are told, both with the lock released.
    pub(crate) fn write_actual(&self, position: f64) -> Result<(), ServoError> {
        check_position(position)?;
        let inner = self.inner()?;

        {
            let mut bus = inner.bus();
            bus.check_ready()?;
            if !self.core.enabled.load(Ordering::SeqCst) {
                return Err(ServoError::Disabled(self.id()));
            }
            if inner.is_lazy() && self.actual_position() == position {
                debug!(servo = %self.id(), position, "unchanged, skipped");
                return Ok(());
            }
            bus.driver.write_position(self.id(), position)?;
            self.core.actual.store(position.to_bits(), Ordering::SeqCst);
        }

        inner.touch();
        self.notify(|l| l.actual_position_changed(self, position));
        Ok(())
    }

    pub fn transition_controller(&self) -> Option<Arc<dyn TransitionController>> {
        self.worker().as_ref().map(|w| Arc::clone(w.controller()))
    }
}

impl PositionControl for Servo {
    fn name(&self) -> String {
        self.id().to_string()
    }

    fn set_position(&self, position: f64) -> Result<TransitionHandle, ServoError> {
        check_position(position)?;
        self.inner()?.check_init()?;
        if !self.is_enabled() {
            return Err(ServoError::Disabled(self.id()));
        }

        self.core.requested.store(position.to_bits(), Ordering::SeqCst);
        self.notify(|l| l.position_changed(self, position));

        let queued = self
            .worker()
            .as_ref()
            .map(|w| w.submit(Box::new(HardwarePath(self.clone())), position));

        match queued {
            Some(handle) => handle,
            None => {
                self.write_actual(position)?;
                Ok(TransitionStatus::completed())
            }
        }
    }

    fn position(&self) -> f64 {
        f64::from_bits(self.core.requested.load(Ordering::SeqCst))
    }

    fn actual_position(&self) -> f64 {
        f64::from_bits(self.core.actual.load(Ordering::SeqCst))
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), ServoError> {
        let inner = self.inner()?;
        inner.check_init()?;
        {
            let mut bus = inner.bus();
            bus.check_ready()?;
            bus.driver.set_enabled(self.id(), enabled)?;
            self.core.enabled.store(enabled, Ordering::SeqCst);
        }
        inner.touch();
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.core.enabled.load(Ordering::SeqCst)
    }

    fn attach(&self, transition: Arc<dyn TransitionController>) -> Result<(), ServoError> {
        let mut worker = self.worker();
        if worker.is_some() {
            return Err(ServoError::InvalidArgument(format!(
                "servo {} already has a transition controller attached",
                self.id()
            )));
        }
        let port = self.inner()?.port().to_string();
        *worker = Some(TransitionWorker::spawn(&format!("{port}-{}", self.id()), transition)?);
        Ok(())
    }

    fn detach(&self) -> Option<Arc<dyn TransitionController>> {
        self.worker().take().map(|w| Arc::clone(w.controller()))
    }

    fn add_listener(&self, listener: Arc<dyn ServoListener>) {
        self.listeners().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn ServoListener>) -> Result<(), ServoError> {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        if listeners.len() == before {
            return Err(ServoError::InvalidArgument(format!(
                "not a registered listener of servo {}",
                self.id()
            )));
        }
        Ok(())
    }

    fn meta(&self) -> Result<Meta, ServoError> {
        Ok(self.inner()?.meta())
    }
}

/// Handed to transition controllers instead of the servo itself, so a
/// transition can step the hardware but not re-request positions.
struct HardwarePath(Servo);

impl StepTarget for HardwarePath {
    fn name(&self) -> String {
        self.0.name()
    }

    fn actual_position(&self) -> f64 {
        self.0.actual_position()
    }

    fn precision(&self) -> Result<i64, ServoError> {
        self.0.meta()?.property_int(keys::PRECISION)
    }

    fn step(&self, position: f64) -> Result<(), ServoError> {
        self.0.write_actual(position)
    }
}
