use std::{sync::Mutex, time::Duration};

use pyo3::prelude::*;

use crate::{Controller, ControllerConfig, CrawlTransition, NullDriver, PositionControl, ServoError};

fn to_py_err(e: ServoError) -> PyErr {
    pyo3::exceptions::PyRuntimeError::new_err(e.to_string())
}

#[pyclass]
pub struct PyServoController {
    controller: Mutex<Option<Controller>>,
}

impl PyServoController {
    fn with<T>(&self, f: impl FnOnce(&Controller) -> Result<T, ServoError>) -> PyResult<T> {
        let guard = self
            .controller
            .lock()
            .map_err(|_| pyo3::exceptions::PyRuntimeError::new_err("controller lock poisoned"))?;
        let controller = guard
            .as_ref()
            .ok_or_else(|| pyo3::exceptions::PyRuntimeError::new_err("controller is closed"))?;
        f(controller).map_err(to_py_err)
    }
}

#[pymethods]
impl PyServoController {
    #[staticmethod]
    pub fn new_null(
        servo_count: Option<usize>,
        silent_timeout_ms: Option<u64>,
        crawl: Option<bool>,
    ) -> PyResult<Self> {
        let cfg = ControllerConfig {
            silent_timeout: Duration::from_millis(silent_timeout_ms.unwrap_or(10_000)),
            ..ControllerConfig::default()
        };
        let controller = Controller::new("null", NullDriver::new(servo_count.unwrap_or(8)), cfg);
        controller.init().map_err(to_py_err)?;

        if crawl.unwrap_or(false) {
            for servo in controller.servos().map_err(to_py_err)? {
                servo.attach(std::sync::Arc::new(CrawlTransition)).map_err(to_py_err)?;
            }
        }

        Ok(Self { controller: Mutex::new(Some(controller)) })
    }

    /// Returns immediately; use `wait_position` to block until a transition is done.
    pub fn set_position(&self, id: usize, position: f64) -> PyResult<()> {
        self.with(|c| c.servo(id)?.set_position(position).map(|_| ()))
    }

    pub fn wait_position(
        &self,
        id: usize,
        position: f64,
        timeout_ms: Option<u64>,
    ) -> PyResult<bool> {
        self.with(|c| {
            let handle = c.servo(id)?.set_position(position)?;
            match handle.wait_timeout(Duration::from_millis(timeout_ms.unwrap_or(10_000))) {
                Some(result) => result.map(|_| true),
                None => Ok(false),
            }
        })
    }

    pub fn get_position(&self, id: usize) -> PyResult<f64> {
        self.with(|c| Ok(c.servo(id)?.position()))
    }

    pub fn get_actual_position(&self, id: usize) -> PyResult<f64> {
        self.with(|c| Ok(c.servo(id)?.actual_position()))
    }

    pub fn set_silent_mode(&self, silent: bool) -> PyResult<()> {
        self.with(|c| c.set_silent_mode(silent))
    }

    pub fn is_silent_now(&self) -> PyResult<bool> {
        self.with(|c| c.is_silent_now())
    }

    pub fn close(&self) {
        if let Ok(mut guard) = self.controller.lock() {
            if let Some(controller) = guard.as_ref() {
                let _ = controller.close();
            }
            *guard = None;
        }
    }
}

#[pymodule]
fn servo_bus_py(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyServoController>()?;
    Ok(())
}
