use std::{thread, time::Duration};

use tracing::info;

use crate::{
    driver::ServoDriver,
    error::ServoError,
    meta::{keys, Meta, MetaValue},
    model::{ServoId, CENTER},
};

const PULSE_MIN: i64 = 0;
const PULSE_MAX: i64 = 1023;
const BANDWIDTH: i64 = 2400 / 8;

/// Controller without hardware behind it. Logs every write and, if asked to,
/// spends as long on it as a real controller at the advertised bandwidth.
pub struct NullDriver {
    pulses: Vec<i64>,
    pulse_min: i64,
    pulse_max: i64,
    write_delay: Duration,
}

impl Default for NullDriver {
    fn default() -> Self {
        Self::new(8)
    }
}

impl NullDriver {
    pub fn new(servo_count: usize) -> Self {
        let center = PULSE_MIN + ((PULSE_MAX - PULSE_MIN) as f64 * CENTER) as i64;
        Self {
            pulses: vec![center; servo_count],
            pulse_min: PULSE_MIN,
            pulse_max: PULSE_MAX,
            write_delay: Duration::ZERO,
        }
    }

    /// Emulate the time a write takes at `controller/bandwidth` writes per second.
    pub fn with_bandwidth_delay(self) -> Self {
        self.with_write_delay(Duration::from_millis(1000 / BANDWIDTH as u64))
    }

    pub fn with_write_delay(mut self, write_delay: Duration) -> Self {
        self.write_delay = write_delay;
        self
    }

    fn pulse(&self, position: f64) -> i64 {
        self.pulse_min + ((self.pulse_max - self.pulse_min) as f64 * position).round() as i64
    }

    fn parse_bound(key: &str, value: &MetaValue) -> Result<i64, ServoError> {
        let p = value
            .as_int()
            .ok_or_else(|| ServoError::InvalidArgument(format!("{key}: not an integer: {value}")))?;
        if !(PULSE_MIN..=PULSE_MAX).contains(&p) {
            return Err(ServoError::InvalidArgument(format!(
                "{key}: value ({p}) is outside of valid range ({PULSE_MIN}...{PULSE_MAX})"
            )));
        }
        Ok(p)
    }
}

impl ServoDriver for NullDriver {
    fn servo_count(&self) -> usize {
        self.pulses.len()
    }

    fn meta(&self) -> Meta {
        Meta::new()
            .with_feature(keys::ALLOW_DISCONNECT, false)
            .with_feature(keys::SILENT, true)
            .with_property(keys::MANUFACTURER_NAME, "DIY Zoning Project")
            .with_property(keys::MANUFACTURER_MODEL, "Null Servo Controller")
            .with_property(keys::MAX_SERVOS, self.pulses.len() as i64)
            .with_property(keys::BANDWIDTH, BANDWIDTH)
            .with_property(keys::PRECISION, self.pulse_max - self.pulse_min + 1)
            .with_property(keys::RANGE_UNITS, "μs")
            .with_writable_property(keys::RANGE_MIN, self.pulse_min)
            .with_writable_property(keys::RANGE_MAX, self.pulse_max)
    }

    fn reset(&mut self) -> Result<(), ServoError> {
        info!(servos = self.pulses.len(), "reset");
        Ok(())
    }

    fn write_position(&mut self, id: ServoId, position: f64) -> Result<(), ServoError> {
        let pulse = self.pulse(position);
        let count = self.pulses.len();
        let slot = self
            .pulses
            .get_mut(id.0)
            .ok_or(ServoError::NoSuchServo { id: id.0, count })?;
        *slot = pulse;
        info!(servo = %id, requested = position, actual = pulse, "write");
        if !self.write_delay.is_zero() {
            thread::sleep(self.write_delay);
        }
        Ok(())
    }

    fn write_property(&mut self, key: &str, value: &MetaValue) -> Result<(), ServoError> {
        match key {
            keys::RANGE_MIN => {
                let p = Self::parse_bound(key, value)?;
                if p >= self.pulse_max {
                    return Err(ServoError::InvalidArgument(format!(
                        "{key} ({p}) can't be set higher than current {} ({})",
                        keys::RANGE_MAX,
                        self.pulse_max
                    )));
                }
                self.pulse_min = p;
            }
            keys::RANGE_MAX => {
                let p = Self::parse_bound(key, value)?;
                if p <= self.pulse_min {
                    return Err(ServoError::InvalidArgument(format!(
                        "{key} ({p}) can't be set lower than current {} ({})",
                        keys::RANGE_MIN,
                        self.pulse_min
                    )));
                }
                self.pulse_max = p;
            }
            other => return Err(ServoError::Unsupported(format!("can't set property '{other}'"))),
        }
        info!(key, %value, "range changed");
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), ServoError> {
        info!("sleep");
        Ok(())
    }

    fn wake_up(&mut self) -> Result<(), ServoError> {
        info!("wake_up");
        Ok(())
    }
}
