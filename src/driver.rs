use tracing::debug;

use crate::{
    error::ServoError,
    meta::{Meta, MetaValue},
    model::ServoId,
    transport::Transport,
};

/// Hardware specific half of a controller.
///
/// Every method is called with the controller lock held, so implementations
/// never see two calls at once and must not call back into the controller.
pub trait ServoDriver: Send + 'static {
    fn servo_count(&self) -> usize;

    fn meta(&self) -> Meta;

    fn open(&mut self) -> Result<(), ServoError> {
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ServoError> {
        Ok(())
    }

    fn write_position(&mut self, id: ServoId, position: f64) -> Result<(), ServoError>;

    fn set_enabled(&mut self, _id: ServoId, _enabled: bool) -> Result<(), ServoError> {
        Ok(())
    }

    /// Only called for keys the driver marked writable in its [`Meta`].
    fn write_property(&mut self, key: &str, _value: &MetaValue) -> Result<(), ServoError> {
        Err(ServoError::Unsupported(format!("can't set property '{key}'")))
    }

    fn sleep(&mut self) -> Result<(), ServoError> {
        debug!("sleep: not implemented");
        Ok(())
    }

    fn wake_up(&mut self) -> Result<(), ServoError> {
        debug!("wake_up: not implemented");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Vendor packet layout. Frames returned here are written to the transport as a unit.
pub trait PacketEncoder: Send + 'static {
    fn servo_count(&self) -> usize;
    fn meta(&self) -> Meta;
    fn position(&self, id: ServoId, position: f64) -> Result<Vec<u8>, ServoError>;

    fn reset(&self) -> Option<Vec<u8>> {
        None
    }

    fn sleep(&self) -> Option<Vec<u8>> {
        None
    }

    fn wake_up(&self) -> Option<Vec<u8>> {
        None
    }
}

pub struct EncodedDriver<T, E> {
    transport: T,
    encoder: E,
}

impl<T: Transport, E: PacketEncoder> EncodedDriver<T, E> {
    pub fn new(transport: T, encoder: E) -> Self {
        Self { transport, encoder }
    }

    fn send(&mut self, frame: Option<Vec<u8>>) -> Result<(), ServoError> {
        match frame {
            Some(bytes) => self.transport.write(&bytes).map_err(ServoError::from),
            None => Ok(()),
        }
    }
}

impl<T: Transport, E: PacketEncoder> ServoDriver for EncodedDriver<T, E> {
    fn servo_count(&self) -> usize {
        self.encoder.servo_count()
    }

    fn meta(&self) -> Meta {
        self.encoder.meta()
    }

    fn reset(&mut self) -> Result<(), ServoError> {
        let frame = self.encoder.reset();
        self.send(frame)
    }

    fn write_position(&mut self, id: ServoId, position: f64) -> Result<(), ServoError> {
        let frame = self.encoder.position(id, position)?;
        self.send(Some(frame))
    }

    fn sleep(&mut self) -> Result<(), ServoError> {
        let frame = self.encoder.sleep();
        self.send(frame)
    }

    fn wake_up(&mut self) -> Result<(), ServoError> {
        let frame = self.encoder.wake_up();
        self.send(frame)
    }
}
