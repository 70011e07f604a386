use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak,
    },
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    driver::ServoDriver,
    error::ServoError,
    meta::{canonical_key, keys, Meta, MetaValue},
    model::ServoId,
    servo::{PositionControl, Servo},
    silent::{PowerProxy, SilentConfig, SilentModeManager},
};

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// Silent mode is switched on right after `init()` if the controller supports it.
    pub silent: bool,
    pub silent_timeout: Duration,
    pub heartbeat: Duration,
    pub lazy: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let silent = SilentConfig::default();
        Self {
            silent: false,
            silent_timeout: silent.timeout,
            heartbeat: silent.heartbeat,
            lazy: false,
        }
    }
}

/// Observer of controller level events. Callbacks run on whichever thread
/// caused the event, the silent mode thread included.
pub trait ControllerListener: Send + Sync {
    fn silent_status_changed(&self, _controller: &Controller, _silent: bool) {}
    fn device_arrived(&self, _controller: &Controller) {}
    fn device_departed(&self, _controller: &Controller) {}
    fn exception(&self, _controller: &Controller, _error: &ServoError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InitState {
    New,
    Ready,
    Closed,
}

/// Everything that talks to the hardware lives behind this one lock.
pub(crate) struct Bus {
    pub(crate) driver: Box<dyn ServoDriver>,
    state: InitState,
}

impl Bus {
    pub(crate) fn check_ready(&self) -> Result<(), ServoError> {
        match self.state {
            InitState::Ready => Ok(()),
            InitState::New | InitState::Closed => Err(ServoError::NotInitialized),
        }
    }
}

pub(crate) struct ControllerInner {
    port: String,
    config: ControllerConfig,
    bus: Mutex<Bus>,
    ready: AtomicBool,
    servos: OnceLock<Vec<Servo>>,
    meta: RwLock<Meta>,
    lazy: AtomicBool,
    disconnect_allowed: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn ControllerListener>>>,
    silencer: OnceLock<SilentModeManager>,
}

impl ControllerInner {
    pub(crate) fn bus(&self) -> MutexGuard<'_, Bus> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn port(&self) -> &str {
        &self.port
    }

    pub(crate) fn check_init(&self) -> Result<(), ServoError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServoError::NotInitialized)
        }
    }

    pub(crate) fn is_lazy(&self) -> bool {
        self.lazy.load(Ordering::SeqCst)
    }

    pub(crate) fn meta(&self) -> Meta {
        self.meta.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Resets the silent mode idle clock. Never call with the bus lock held.
    pub(crate) fn touch(&self) {
        if let Some(silencer) = self.silencer.get() {
            silencer.touch();
        }
    }
}

/// Owner of a fixed set of servos sharing one hardware transport.
///
/// All hardware access (position writes, enable/disable, reset, sleep and
/// wake up) is serialized on a single controller lock. Nothing holds that
/// lock while calling listeners or the silent mode manager.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("port", &self.inner.port)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Controller {
    pub fn new(
        port: impl Into<String>,
        driver: impl ServoDriver,
        config: ControllerConfig,
    ) -> Self {
        let meta = driver.meta();
        let disconnect_allowed = meta.feature(keys::ALLOW_DISCONNECT).unwrap_or(true);
        Self {
            inner: Arc::new(ControllerInner {
                port: port.into(),
                config,
                bus: Mutex::new(Bus { driver: Box::new(driver), state: InitState::New }),
                ready: AtomicBool::new(false),
                servos: OnceLock::new(),
                meta: RwLock::new(meta),
                lazy: AtomicBool::new(config.lazy),
                disconnect_allowed: AtomicBool::new(disconnect_allowed),
                listeners: Mutex::new(Vec::new()),
                silencer: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ControllerInner>) -> Self {
        Self { inner }
    }

    pub fn port(&self) -> &str {
        &self.inner.port
    }

    /// Opens the driver, creates the servos, starts the silent mode manager if
    /// the hardware supports one, and resets. Only ever succeeds once; a failed
    /// attempt leaves the controller uninitialized and may be retried.
    pub fn init(&self) -> Result<(), ServoError> {
        let silent = SilentConfig {
            timeout: self.inner.config.silent_timeout,
            heartbeat: self.inner.config.heartbeat,
        };
        silent.validate()?;

        let (count, meta) = {
            let mut bus = self.inner.bus();
            check_new(&bus)?;
            bus.driver.open()?;
            (bus.driver.servo_count(), bus.driver.meta())
        };

        let silencer = if meta.feature(keys::SILENT).unwrap_or(false) {
            let proxy = ControllerProxy { inner: Arc::downgrade(&self.inner) };
            Some(SilentModeManager::start(&self.inner.port, proxy, silent)?)
        } else {
            None
        };

        {
            let mut bus = self.inner.bus();
            check_new(&bus)?;
            bus.state = InitState::Ready;
        }

        *self.inner.meta.write().unwrap_or_else(PoisonError::into_inner) = meta;
        let servos = (0..count)
            .map(|i| Servo::new(ServoId(i), Arc::downgrade(&self.inner)))
            .collect();
        if self.inner.servos.set(servos).is_err() {
            return Err(ServoError::AlreadyInitialized);
        }
        if let Some(silencer) = silencer {
            silencer.set_silent_mode(self.inner.config.silent);
            let _ = self.inner.silencer.set(silencer);
        }

        self.inner.ready.store(true, Ordering::SeqCst);
        info!(port = %self.inner.port, servos = count, "initialized");

        self.reset()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.check_init().is_ok()
    }

    pub fn reset(&self) -> Result<(), ServoError> {
        self.inner.check_init()?;
        {
            let mut bus = self.inner.bus();
            bus.check_ready()?;
            bus.driver.reset()?;
        }
        self.inner.touch();
        Ok(())
    }

    /// Stops the silent mode manager and transition workers. Every hardware
    /// operation fails with `NotInitialized` afterwards.
    pub fn close(&self) -> Result<(), ServoError> {
        self.inner.check_init()?;
        if let Some(silencer) = self.inner.silencer.get() {
            silencer.shutdown();
        }

        {
            let mut bus = self.inner.bus();
            bus.check_ready()?;
            bus.state = InitState::Closed;
        }
        self.inner.ready.store(false, Ordering::SeqCst);

        for servo in self.inner.servos.get().into_iter().flatten() {
            servo.detach();
        }
        info!(port = %self.inner.port, "closed");
        Ok(())
    }

    pub fn servo_count(&self) -> usize {
        match self.inner.servos.get() {
            Some(servos) => servos.len(),
            None => self.inner.bus().driver.servo_count(),
        }
    }

    pub fn servo(&self, id: usize) -> Result<Servo, ServoError> {
        self.inner.check_init()?;
        let servos = self.inner.servos.get().ok_or(ServoError::NotInitialized)?;
        servos
            .get(id)
            .cloned()
            .ok_or(ServoError::NoSuchServo { id, count: servos.len() })
    }

    pub fn servos(&self) -> Result<Vec<Servo>, ServoError> {
        self.inner.check_init()?;
        self.inner.servos.get().cloned().ok_or(ServoError::NotInitialized)
    }

    pub fn meta(&self) -> Meta {
        self.inner.meta()
    }

    /// Writes a property the driver declared writable, then refreshes the
    /// cached metadata from the driver.
    pub fn set_meta_property(
        &self,
        key: &str,
        value: impl Into<MetaValue>,
    ) -> Result<(), ServoError> {
        self.inner.check_init()?;
        let key = canonical_key(key);
        if !self.meta().is_writable(key) {
            return Err(ServoError::Unsupported(format!("can't set property '{key}', no writer")));
        }

        let value = value.into();
        let meta = {
            let mut bus = self.inner.bus();
            bus.check_ready()?;
            bus.driver.write_property(key, &value)?;
            bus.driver.meta()
        };
        *self.inner.meta.write().unwrap_or_else(PoisonError::into_inner) = meta;

        self.inner.touch();
        Ok(())
    }

    pub fn set_lazy_mode(&self, lazy: bool) {
        self.inner.lazy.store(lazy, Ordering::SeqCst);
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.is_lazy()
    }

    pub fn allow_disconnect(&self, allowed: bool) -> Result<(), ServoError> {
        self.inner.check_init()?;
        self.inner.disconnect_allowed.store(allowed, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_disconnect_allowed(&self) -> Result<bool, ServoError> {
        self.inner.check_init()?;
        Ok(self.inner.disconnect_allowed.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.inner.bus().driver.is_connected()
    }

    pub fn device_arrived(&self) {
        info!(port = %self.inner.port, "device arrived");
        self.each_listener(|l| l.device_arrived(self));
    }

    pub fn device_departed(&self) {
        info!(port = %self.inner.port, "device departed");
        self.each_listener(|l| l.device_departed(self));
    }

    pub fn add_listener(&self, listener: Arc<dyn ControllerListener>) {
        self.listeners().push(listener);
    }

    pub fn remove_listener(
        &self,
        listener: &Arc<dyn ControllerListener>,
    ) -> Result<(), ServoError> {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        if listeners.len() == before {
            return Err(ServoError::InvalidArgument("not a registered listener".into()));
        }
        Ok(())
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn ControllerListener>>> {
        self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn each_listener(&self, f: impl Fn(&dyn ControllerListener)) {
        let listeners = self.listeners().clone();
        for l in &listeners {
            f(l.as_ref());
        }
    }

    fn silent_status_changed(&self, silent: bool) {
        self.each_listener(|l| l.silent_status_changed(self, silent));
    }

    fn exception(&self, error: &ServoError) {
        self.each_listener(|l| l.exception(self, error));
    }

    fn silencer(&self) -> Result<&SilentModeManager, ServoError> {
        self.inner.check_init()?;
        if !self.meta().feature(keys::SILENT)? {
            return Err(ServoError::Unsupported("silent operation is not supported".into()));
        }
        self.inner
            .silencer
            .get()
            .ok_or_else(|| {
                ServoError::Unsupported("silent operation is declared, but not running".into())
            })
    }

    pub fn set_silent_mode(&self, silent: bool) -> Result<(), ServoError> {
        let silencer = self.silencer()?;
        let old = silencer.silent_mode();
        // leaving a sleeping state is reported by the wake up itself
        let sleeping = silencer.is_silent_now();
        silencer.set_silent_mode(silent);
        if old != silent && !sleeping {
            self.silent_status_changed(silencer.is_silent_now());
        }
        Ok(())
    }

    pub fn silent_mode(&self) -> Result<bool, ServoError> {
        Ok(self.silencer()?.silent_mode())
    }

    pub fn set_silent_timeout(
        &self,
        timeout: Duration,
        heartbeat: Duration,
    ) -> Result<(), ServoError> {
        self.silencer()?.set_silent_timeout(timeout, heartbeat)
    }

    pub fn silent_timeout(&self) -> Result<SilentConfig, ServoError> {
        Ok(self.silencer()?.silent_timeout())
    }

    pub fn is_silent_now(&self) -> Result<bool, ServoError> {
        Ok(self.silencer()?.is_silent_now())
    }
}

fn check_new(bus: &Bus) -> Result<(), ServoError> {
    match bus.state {
        InitState::New => Ok(()),
        InitState::Ready => Err(ServoError::AlreadyInitialized),
        InitState::Closed => Err(ServoError::Closed),
    }
}

/// Power proxy handed to the silent mode manager. Holds the controller
/// weakly so the manager thread never keeps it alive.
struct ControllerProxy {
    inner: Weak<ControllerInner>,
}

impl ControllerProxy {
    fn power(&self, silent: bool) -> Result<(), ServoError> {
        let controller = Controller::from_inner(self.inner.upgrade().ok_or(ServoError::Closed)?);

        let result = {
            let mut bus = controller.inner.bus();
            match bus.check_ready() {
                Ok(()) if silent => bus.driver.sleep(),
                Ok(()) => bus.driver.wake_up(),
                Err(e) => Err(e),
            }
        };

        match &result {
            Ok(()) => {
                debug!(port = %controller.port(), silent, "power state changed");
                controller.silent_status_changed(silent);
            }
            Err(e) => {
                warn!(port = %controller.port(), silent, "power state change failed: {e}");
                controller.exception(e);
            }
        }
        result
    }
}

impl PowerProxy for ControllerProxy {
    fn sleep(&self) -> Result<(), ServoError> {
        self.power(true)
    }

    fn wake_up(&self) -> Result<(), ServoError> {
        self.power(false)
    }
}
