use std::sync::Arc;

use crate::{
    error::ServoError,
    meta::Meta,
    servo::{PositionControl, ServoListener},
    transition::{TransitionController, TransitionHandle},
};

/// A coordinate mapping in front of a servo. `resolve` undoes `transform`
/// over the mapping's valid domain.
pub trait CoordinateTransform: Send + Sync {
    fn transform(&self, value: f64) -> f64;
    fn resolve(&self, position: f64) -> f64;
}

/// `1 - x` both ways.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reverse;

impl CoordinateTransform for Reverse {
    fn transform(&self, value: f64) -> f64 {
        1.0 - value
    }

    fn resolve(&self, position: f64) -> f64 {
        1.0 - position
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScaleShift {
    scale: f64,
    shift: f64,
}

impl ScaleShift {
    pub fn new(scale: f64, shift: f64) -> Result<Self, ServoError> {
        if scale == 0.0 {
            return Err(ServoError::InvalidArgument("scale can't be 0".into()));
        }
        Ok(Self { scale, shift })
    }
}

impl CoordinateTransform for ScaleShift {
    fn transform(&self, value: f64) -> f64 {
        value * self.scale + self.shift
    }

    fn resolve(&self, position: f64) -> f64 {
        (position - self.shift) / self.scale
    }
}

/// Output leaves 0...1.0 for most inputs; compose with [`ScaleShift`] to bring it back.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sine;

impl CoordinateTransform for Sine {
    fn transform(&self, value: f64) -> f64 {
        value.sin()
    }

    fn resolve(&self, position: f64) -> f64 {
        position.asin()
    }
}

/// Same caveat as [`Sine`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Cosine;

impl CoordinateTransform for Cosine {
    fn transform(&self, value: f64) -> f64 {
        value.cos()
    }

    fn resolve(&self, position: f64) -> f64 {
        position.acos()
    }
}

/// Maps a linear position onto the angular travel of a lever between
/// `start` and `end` degrees.
#[derive(Debug, Clone, Copy)]
pub struct LinearAngle {
    range: f64,
    offset: f64,
    scale: f64,
}

impl Default for LinearAngle {
    fn default() -> Self {
        Self::from_angles(0.0, 180.0)
    }
}

impl LinearAngle {
    pub fn new(start: f64, end: f64) -> Result<Self, ServoError> {
        if !(0.0..=180.0).contains(&start) {
            return Err(ServoError::InvalidArgument(format!(
                "start angle {start} is outside of 0...180 range"
            )));
        }
        if !(0.0..=180.0).contains(&end) {
            return Err(ServoError::InvalidArgument(format!(
                "end angle {end} is outside of 0...180 range"
            )));
        }
        if end <= start {
            return Err(ServoError::InvalidArgument(format!(
                "end angle {end} is less or equal than start angle {start}"
            )));
        }
        Ok(Self::from_angles(start, end))
    }

    fn from_angles(start: f64, end: f64) -> Self {
        let offset = start.to_radians().cos();
        Self { range: end - start, offset, scale: end.to_radians().cos() - offset }
    }
}

impl CoordinateTransform for LinearAngle {
    fn transform(&self, value: f64) -> f64 {
        (value * self.scale + self.offset).acos().to_degrees() / self.range
    }

    fn resolve(&self, position: f64) -> f64 {
        ((position * self.range).to_radians().cos() - self.offset) / self.scale
    }
}

/// Restricts travel to `min...max` of the full range.
#[derive(Debug, Clone, Copy)]
pub struct Limit {
    min: f64,
    max: f64,
}

impl Limit {
    pub fn new(min: f64, max: f64) -> Result<Self, ServoError> {
        if min >= max {
            return Err(ServoError::InvalidArgument(format!(
                "limit min {min} must be below max {max}"
            )));
        }
        Ok(Self { min, max })
    }
}

impl CoordinateTransform for Limit {
    fn transform(&self, value: f64) -> f64 {
        self.min + (self.max - self.min) * value
    }

    fn resolve(&self, position: f64) -> f64 {
        (position - self.min) / (self.max - self.min)
    }
}

/// One node of a transform chain. Positions go through `transform` on the
/// way down and `resolve` on the way up; everything else passes straight
/// through to the target.
#[derive(Debug, Clone)]
pub struct Transformed<X, T> {
    transform: X,
    target: T,
}

impl<X: CoordinateTransform, T: PositionControl> Transformed<X, T> {
    pub fn new(target: T, transform: X) -> Self {
        Self { transform, target }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn into_target(self) -> T {
        self.target
    }
}

impl<X: CoordinateTransform, T: PositionControl> PositionControl for Transformed<X, T> {
    fn name(&self) -> String {
        self.target.name()
    }

    fn set_position(&self, position: f64) -> Result<TransitionHandle, ServoError> {
        self.target.set_position(self.transform.transform(position))
    }

    fn position(&self) -> f64 {
        self.transform.resolve(self.target.position())
    }

    fn actual_position(&self) -> f64 {
        self.transform.resolve(self.target.actual_position())
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), ServoError> {
        self.target.set_enabled(enabled)
    }

    fn is_enabled(&self) -> bool {
        self.target.is_enabled()
    }

    fn attach(&self, transition: Arc<dyn TransitionController>) -> Result<(), ServoError> {
        self.target.attach(transition)
    }

    fn detach(&self) -> Option<Arc<dyn TransitionController>> {
        self.target.detach()
    }

    fn add_listener(&self, listener: Arc<dyn ServoListener>) {
        self.target.add_listener(listener)
    }

    fn remove_listener(&self, listener: &Arc<dyn ServoListener>) -> Result<(), ServoError> {
        self.target.remove_listener(listener)
    }

    fn meta(&self) -> Result<Meta, ServoError> {
        self.target.meta()
    }
}

/// Builder methods for stacking transforms on anything position controlled.
pub trait TransformExt: PositionControl + Sized {
    fn transformed<X: CoordinateTransform>(self, transform: X) -> Transformed<X, Self> {
        Transformed::new(self, transform)
    }

    fn reversed(self) -> Transformed<Reverse, Self> {
        self.transformed(Reverse)
    }

    fn scaled(self, scale: f64, shift: f64) -> Result<Transformed<ScaleShift, Self>, ServoError> {
        Ok(self.transformed(ScaleShift::new(scale, shift)?))
    }

    fn sine(self) -> Transformed<Sine, Self> {
        self.transformed(Sine)
    }

    fn cosine(self) -> Transformed<Cosine, Self> {
        self.transformed(Cosine)
    }

    fn linear(self, start: f64, end: f64) -> Result<Transformed<LinearAngle, Self>, ServoError> {
        Ok(self.transformed(LinearAngle::new(start, end)?))
    }

    fn limited(self, min: f64, max: f64) -> Result<Transformed<Limit, Self>, ServoError> {
        Ok(self.transformed(Limit::new(min, max)?))
    }
}

impl<T: PositionControl> TransformExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;
    const SAMPLES: [f64; 7] = [0.0, 0.1, 0.25, 0.3, 0.5, 0.77, 1.0];

    fn assert_round_trip(t: &dyn CoordinateTransform) {
        for x in SAMPLES {
            let back = t.resolve(t.transform(x));
            assert!((back - x).abs() < EPS, "{x} came back as {back}");
        }
    }

    #[test]
    fn reverse() {
        assert!((Reverse.resolve(Reverse.transform(0.3)) - 0.3).abs() < EPS);
        assert!((Reverse.transform(0.3) - 0.7).abs() < EPS);
        assert_round_trip(&Reverse);
    }

    #[test]
    fn scale_shift() {
        let t = ScaleShift::new(2.0, 0.1).unwrap();
        assert!((t.transform(0.4) - 0.9).abs() < EPS);
        assert!((t.resolve(t.transform(0.4)) - 0.4).abs() < EPS);
        assert_round_trip(&t);
        assert!(matches!(ScaleShift::new(0.0, 0.5), Err(ServoError::InvalidArgument(_))));
    }

    #[test]
    fn trigonometric() {
        assert_round_trip(&Sine);
        assert_round_trip(&Cosine);
    }

    #[test]
    fn linear_angle() {
        assert_round_trip(&LinearAngle::default());
        assert_round_trip(&LinearAngle::new(30.0, 150.0).unwrap());
        assert!(LinearAngle::new(90.0, 90.0).is_err());
        assert!(LinearAngle::new(-1.0, 90.0).is_err());
        assert!(LinearAngle::new(0.0, 181.0).is_err());
    }

    #[test]
    fn limit() {
        let t = Limit::new(0.2, 0.6).unwrap();
        assert!((t.transform(0.0) - 0.2).abs() < EPS);
        assert!((t.transform(1.0) - 0.6).abs() < EPS);
        assert_round_trip(&t);
        assert!(Limit::new(0.6, 0.6).is_err());
        assert!(Limit::new(0.7, 0.2).is_err());
    }
}
