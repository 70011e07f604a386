use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use tokio::{runtime, sync::Notify, time};
use tracing::{debug, info, warn};

use crate::error::ServoError;

/// Hardware specific power behaviour: stop driving the servos, and start again.
pub trait PowerProxy: Send + Sync + 'static {
    fn sleep(&self) -> Result<(), ServoError>;
    fn wake_up(&self) -> Result<(), ServoError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilentState {
    /// Hardware is driven.
    Active,
    /// The proxy has been told to sleep.
    Passive,
}

#[derive(Debug, Clone, Copy)]
pub struct SilentConfig {
    pub timeout: Duration,
    pub heartbeat: Duration,
}

impl Default for SilentConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10), heartbeat: Duration::from_secs(30) }
    }
}

impl SilentConfig {
    pub fn validate(&self) -> Result<(), ServoError> {
        if self.timeout.is_zero() {
            return Err(ServoError::InvalidArgument("silent timeout must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// `None` waits until notified.
    Wait(Option<Duration>),
    Sleep,
    WakeUp,
    Stop,
}

#[derive(Debug)]
struct Machine {
    enabled: bool,
    config: SilentConfig,
    last_operation: Instant,
    state: SilentState,
    touched_while_passive: bool,
    stopped: bool,
}

impl Machine {
    fn new(config: SilentConfig, now: Instant) -> Self {
        Self {
            enabled: false,
            config,
            last_operation: now,
            state: SilentState::Active,
            touched_while_passive: false,
            stopped: false,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_operation = now;
        if self.state == SilentState::Passive {
            self.touched_while_passive = true;
        }
    }

    /// One pass of the state table. Mutates state for the transitions it
    /// decides on; the caller performs the proxy call outside the lock.
    fn decide(&mut self, now: Instant) -> Decision {
        if self.stopped {
            return Decision::Stop;
        }

        let elapsed = now.saturating_duration_since(self.last_operation);

        match self.state {
            SilentState::Active => {
                if !self.enabled {
                    return Decision::Wait(None);
                }
                if elapsed >= self.config.timeout {
                    self.state = SilentState::Passive;
                    self.touched_while_passive = false;
                    return Decision::Sleep;
                }
                Decision::Wait(Some(self.config.timeout - elapsed))
            }
            SilentState::Passive => {
                if !self.enabled || self.touched_while_passive {
                    self.state = SilentState::Active;
                    self.touched_while_passive = false;
                    self.last_operation = now;
                    return Decision::WakeUp;
                }
                if self.config.heartbeat.is_zero() {
                    return Decision::Wait(None);
                }
                let deadline = self.config.timeout + self.config.heartbeat;
                if elapsed >= deadline {
                    self.state = SilentState::Active;
                    self.last_operation = now;
                    return Decision::WakeUp;
                }
                Decision::Wait(Some(deadline - elapsed))
            }
        }
    }
}

struct Shared {
    machine: Mutex<Machine>,
    notify: Notify,
}

impl Shared {
    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Idle power manager: tells the proxy to sleep once nothing has touched the
/// device for `timeout`, and wakes it on the next touch or every `heartbeat`.
pub struct SilentModeManager {
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SilentModeManager {
    pub fn start<P: PowerProxy>(
        name: &str,
        proxy: P,
        config: SilentConfig,
    ) -> Result<Self, ServoError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            machine: Mutex::new(Machine::new(config, Instant::now())),
            notify: Notify::new(),
        });
        let loop_shared = Arc::clone(&shared);

        let rt = runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| ServoError::Worker(e.to_string()))?;

        let handle = thread::Builder::new()
            .name(format!("silent-{name}"))
            .spawn(move || rt.block_on(run(loop_shared, proxy)))
            .map_err(|e| ServoError::Worker(e.to_string()))?;

        Ok(Self { shared, thread: Mutex::new(Some(handle)) })
    }

    /// Record activity now. Callable from any thread.
    pub fn touch(&self) {
        self.shared.machine().touch(Instant::now());
        self.shared.notify.notify_one();
    }

    pub fn set_silent_mode(&self, enabled: bool) {
        {
            let mut machine = self.shared.machine();
            if machine.enabled == enabled {
                return;
            }
            machine.enabled = enabled;
            if enabled {
                machine.last_operation = Instant::now();
            }
        }
        self.shared.notify.notify_one();
    }

    pub fn silent_mode(&self) -> bool {
        self.shared.machine().enabled
    }

    pub fn set_silent_timeout(
        &self,
        timeout: Duration,
        heartbeat: Duration,
    ) -> Result<(), ServoError> {
        let config = SilentConfig { timeout, heartbeat };
        config.validate()?;
        self.shared.machine().config = config;
        self.shared.notify.notify_one();
        Ok(())
    }

    pub fn silent_timeout(&self) -> SilentConfig {
        self.shared.machine().config
    }

    pub fn state(&self) -> SilentState {
        self.shared.machine().state
    }

    /// Asleep, and not about to be woken by silent mode having been switched off.
    pub fn is_silent_now(&self) -> bool {
        let machine = self.shared.machine();
        machine.enabled && machine.state == SilentState::Passive
    }

    /// Stops the loop and waits for it, unless called from the loop itself.
    pub fn shutdown(&self) {
        self.signal_stop();
        let handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("silent mode loop panicked");
            }
        }
    }

    fn signal_stop(&self) {
        self.shared.machine().stopped = true;
        self.shared.notify.notify_one();
    }
}

impl Drop for SilentModeManager {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

fn call(what: &str, f: impl FnOnce() -> Result<(), ServoError>) {
    info!("{what}");
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{what} failed: {e}"),
        Err(_) => warn!("{what} panicked"),
    }
}

async fn run<P: PowerProxy>(shared: Arc<Shared>, proxy: P) {
    debug!("silent mode loop started");

    loop {
        let decision = shared.machine().decide(Instant::now());

        match decision {
            Decision::Stop => break,
            Decision::Sleep => call("sleep", || proxy.sleep()),
            Decision::WakeUp => call("wake_up", || proxy.wake_up()),
            Decision::Wait(None) => {
                debug!("waiting indefinitely");
                shared.notify.notified().await;
            }
            Decision::Wait(Some(interval)) => {
                debug!(?interval, "waiting");
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = time::sleep(interval) => {}
                }
            }
        }
    }

    debug!("silent mode loop stopped");
}
