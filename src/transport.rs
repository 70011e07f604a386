use std::{io::Write, time::Duration};

use tracing::debug;

use crate::error::ServoError;

/// Byte pipe to the physical controller. One per controller, only ever used
/// under the controller lock.
pub trait Transport: Send + 'static {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;
}

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// `timeout` bounds both the open and every subsequent write.
    pub fn open(path: &str, baudrate: u32, timeout: Duration) -> Result<Self, ServoError> {
        let port = serialport::new(path, baudrate)
            .timeout(timeout)
            .open()
            .map_err(|e| ServoError::Communication(format!("{path}: {e}")))?;

        debug!(path, baudrate, "serial port open");
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }
}
