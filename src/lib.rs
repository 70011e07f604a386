pub mod controller;
pub mod crawl;
pub mod driver;
pub mod driver_null;
pub mod error;
pub mod meta;
pub mod model;
pub mod servo;
pub mod silent;
pub mod transform;
pub mod transition;
pub mod transport;

#[cfg(feature = "python")]
pub mod python;

pub use controller::{Controller, ControllerConfig, ControllerListener};
pub use crawl::CrawlTransition;
pub use driver::{EncodedDriver, PacketEncoder, ServoDriver};
pub use driver_null::NullDriver;
pub use error::ServoError;
pub use meta::{keys, Meta, MetaValue};
pub use model::ServoId;
pub use servo::{PositionControl, Servo, ServoListener};
pub use silent::{PowerProxy, SilentConfig, SilentModeManager, SilentState};
pub use transform::{CoordinateTransform, TransformExt, Transformed};
pub use transition::{StepTarget, TransitionController, TransitionHandle, TransitionStatus};
pub use transport::{SerialTransport, Transport};
