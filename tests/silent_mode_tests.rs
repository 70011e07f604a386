use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use servo_bus::{
    Controller, ControllerConfig, ControllerListener, NullDriver, PositionControl, PowerProxy,
    ServoError, SilentConfig, SilentModeManager, SilentState,
};

#[derive(Clone, Default)]
struct CountingProxy {
    sleeps: Arc<AtomicUsize>,
    wakes: Arc<AtomicUsize>,
}

impl CountingProxy {
    fn counts(&self) -> (usize, usize) {
        (self.sleeps.load(Ordering::SeqCst), self.wakes.load(Ordering::SeqCst))
    }
}

impl PowerProxy for CountingProxy {
    fn sleep(&self) -> Result<(), ServoError> {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wake_up(&self) -> Result<(), ServoError> {
        self.wakes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn silent_config(timeout: Duration, heartbeat: Duration) -> ControllerConfig {
    ControllerConfig { silent: true, silent_timeout: timeout, heartbeat, lazy: false }
}

fn manager(timeout: u64, heartbeat: u64) -> (SilentModeManager, CountingProxy) {
    let proxy = CountingProxy::default();
    let config = SilentConfig { timeout: ms(timeout), heartbeat: ms(heartbeat) };
    let m = SilentModeManager::start("test", proxy.clone(), config).unwrap();
    (m, proxy)
}

#[test]
fn sleeps_after_timeout_and_wakes_on_heartbeat() {
    let (m, proxy) = manager(100, 200);
    m.set_silent_mode(true);

    thread::sleep(ms(50));
    assert_eq!(proxy.counts(), (0, 0));
    assert_eq!(m.state(), SilentState::Active);

    thread::sleep(ms(150));
    assert_eq!(proxy.counts(), (1, 0));
    assert!(m.is_silent_now());

    thread::sleep(ms(150));
    assert_eq!(proxy.counts(), (1, 1));
    assert_eq!(m.state(), SilentState::Active);

    m.shutdown();
}

#[test]
fn touch_restarts_the_countdown() {
    let (m, proxy) = manager(200, 0);
    m.set_silent_mode(true);

    thread::sleep(ms(120));
    m.touch();
    thread::sleep(ms(130));
    assert_eq!(proxy.counts(), (0, 0));

    thread::sleep(ms(170));
    assert_eq!(proxy.counts(), (1, 0));
    m.shutdown();
}

#[test]
fn touch_wakes_a_sleeping_device() {
    let (m, proxy) = manager(50, 0);
    m.set_silent_mode(true);

    thread::sleep(ms(150));
    assert_eq!(proxy.counts(), (1, 0));
    // zero heartbeat: stays asleep until touched
    thread::sleep(ms(100));
    assert_eq!(proxy.counts(), (1, 0));

    m.touch();
    thread::sleep(ms(20));
    assert_eq!(proxy.counts(), (1, 1));
    assert!(!m.is_silent_now());
    m.shutdown();
}

#[test]
fn not_silent_never_sleeps() {
    let (m, proxy) = manager(30, 0);
    thread::sleep(ms(120));
    assert_eq!(proxy.counts(), (0, 0));
    assert!(!m.silent_mode());
    m.shutdown();
}

#[test]
fn disabling_wakes_a_sleeping_device() {
    let (m, proxy) = manager(50, 0);
    m.set_silent_mode(true);
    thread::sleep(ms(120));
    assert!(m.is_silent_now());

    m.set_silent_mode(false);
    assert!(!m.is_silent_now());
    thread::sleep(ms(30));
    assert_eq!(proxy.counts(), (1, 1));
    assert_eq!(m.state(), SilentState::Active);
    m.shutdown();
}

#[test]
fn reconfiguring_takes_effect_immediately() {
    let (m, proxy) = manager(10_000, 0);
    m.set_silent_mode(true);
    thread::sleep(ms(30));
    assert_eq!(proxy.counts(), (0, 0));

    m.set_silent_timeout(ms(40), ms(0)).unwrap();
    thread::sleep(ms(100));
    assert_eq!(proxy.counts(), (1, 0));

    assert!(matches!(
        m.set_silent_timeout(Duration::ZERO, ms(10)),
        Err(ServoError::InvalidArgument(_))
    ));
    assert_eq!(m.silent_timeout().timeout, ms(40));
    m.shutdown();
}

#[derive(Default)]
struct StatusLog {
    changes: Mutex<Vec<bool>>,
    errors: AtomicUsize,
}

impl ControllerListener for StatusLog {
    fn silent_status_changed(&self, _controller: &Controller, silent: bool) {
        self.changes.lock().unwrap().push(silent);
    }

    fn exception(&self, _controller: &Controller, _error: &ServoError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn controller_goes_quiet_and_wakes_on_write() {
    let cfg = ControllerConfig {
        silent_timeout: ms(60),
        heartbeat: Duration::ZERO,
        ..ControllerConfig::default()
    };
    let c = Controller::new("null", NullDriver::new(2), cfg);
    c.init().unwrap();
    let log = Arc::new(StatusLog::default());
    c.add_listener(log.clone());

    c.set_silent_mode(true).unwrap();
    assert!(c.silent_mode().unwrap());

    thread::sleep(ms(150));
    assert!(c.is_silent_now().unwrap());

    c.servo(0).unwrap().set_position(0.2).unwrap();
    thread::sleep(ms(30));
    assert!(!c.is_silent_now().unwrap());

    // enabled (not silent yet), slept, woke up
    assert_eq!(*log.changes.lock().unwrap(), vec![false, true, false]);
    c.close().unwrap();
}

#[test]
fn silent_mode_from_config() {
    let cfg = silent_config(ms(40), Duration::ZERO);
    let c = Controller::new("null", NullDriver::new(1), cfg);
    c.init().unwrap();
    assert!(c.silent_mode().unwrap());
    thread::sleep(ms(120));
    assert!(c.is_silent_now().unwrap());
    c.close().unwrap();
}

#[test]
fn disabling_while_asleep_reports_only_the_wake_up() {
    let cfg = silent_config(ms(40), Duration::ZERO);
    let c = Controller::new("null", NullDriver::new(1), cfg);
    c.init().unwrap();
    let log = Arc::new(StatusLog::default());
    c.add_listener(log.clone());

    thread::sleep(ms(120));
    assert!(c.is_silent_now().unwrap());

    c.set_silent_mode(false).unwrap();
    assert!(!c.is_silent_now().unwrap());
    thread::sleep(ms(30));

    assert_eq!(*log.changes.lock().unwrap(), vec![true, false]);
    assert!(!c.silent_mode().unwrap());
    c.close().unwrap();
}

#[test]
fn closing_a_sleeping_controller_is_quiet() {
    let cfg = silent_config(ms(20), ms(20));
    let c = Controller::new("null", NullDriver::new(1), cfg);
    c.init().unwrap();
    let log = Arc::new(StatusLog::default());
    c.add_listener(log.clone());

    // sleeping and waking every 20ms, so close lands mid cycle
    thread::sleep(ms(75));
    c.close().unwrap();
    let seen = log.changes.lock().unwrap().len();
    thread::sleep(ms(80));

    assert_eq!(log.errors.load(Ordering::SeqCst), 0);
    assert_eq!(log.changes.lock().unwrap().len(), seen);
    assert!(matches!(c.is_silent_now(), Err(ServoError::NotInitialized)));
}
