use tracing::debug;

use crate::{
    error::ServoError,
    transition::{StepTarget, TransitionController},
};

/// Rounding slack allowed at the ends of the 0...1.0 range.
const EDGE_TOLERANCE: f64 = 1e-9;

/// Moves the servo one hardware step at a time, as fast as the controller
/// accepts writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlTransition;

impl CrawlTransition {
    pub fn new() -> Self {
        Self
    }
}

fn snap_to_edge(position: f64) -> f64 {
    if position > 1.0 && position - 1.0 < EDGE_TOLERANCE {
        1.0
    } else if position < 0.0 && -position < EDGE_TOLERANCE {
        0.0
    } else {
        position
    }
}

impl TransitionController for CrawlTransition {
    fn move_to(&self, target: &dyn StepTarget, position: f64) -> Result<(), ServoError> {
        let precision = target.precision()?;
        if precision <= 1 {
            return Err(ServoError::InvalidArgument(format!(
                "expected precision > 1, got {precision}"
            )));
        }

        let step = 1.0 / (precision - 1) as f64;
        debug!(precision, step, "crawl");

        loop {
            let actual = target.actual_position();
            if (position - actual).abs() <= step / 2.0 {
                return Ok(());
            }

            let next = snap_to_edge(if actual > position { actual - step } else { actual + step });
            if !(0.0..=1.0).contains(&next) {
                return Err(ServoError::LimitReached(actual));
            }

            target.step(next)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::model::ServoId;

    struct Recorder {
        precision: i64,
        actual: Mutex<f64>,
        writes: Mutex<Vec<f64>>,
        disable_after: Option<usize>,
    }

    impl Recorder {
        fn new(precision: i64, actual: f64) -> Self {
            Self {
                precision,
                actual: Mutex::new(actual),
                writes: Mutex::new(Vec::new()),
                disable_after: None,
            }
        }

        fn writes(&self) -> Vec<f64> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl StepTarget for Recorder {
        fn name(&self) -> String {
            "recorder".into()
        }

        fn actual_position(&self) -> f64 {
            *self.actual.lock().unwrap()
        }

        fn precision(&self) -> Result<i64, ServoError> {
            Ok(self.precision)
        }

        fn step(&self, position: f64) -> Result<(), ServoError> {
            let mut writes = self.writes.lock().unwrap();
            if Some(writes.len()) == self.disable_after {
                return Err(ServoError::Disabled(ServoId(0)));
            }
            writes.push(position);
            *self.actual.lock().unwrap() = position;
            Ok(())
        }
    }

    #[test]
    fn converges_monotonically_in_equal_steps() {
        let target = Recorder::new(256, 0.0);
        CrawlTransition.move_to(&target, 1.0).unwrap();

        let step = 1.0 / 255.0;
        let writes = target.writes();
        assert!(!writes.is_empty());
        let mut previous = 0.0;
        for (i, w) in writes.iter().enumerate() {
            assert!(*w > previous, "write {i} not increasing: {w} after {previous}");
            if i + 1 < writes.len() {
                assert!((w - previous - step).abs() < 1e-9, "write {i} is not one step");
            }
            previous = *w;
        }
        assert!((1.0 - target.actual_position()).abs() <= step / 2.0);
    }

    #[test]
    fn moves_down_as_well() {
        let target = Recorder::new(11, 0.9);
        CrawlTransition.move_to(&target, 0.2).unwrap();
        assert_eq!(target.writes().len(), 7);
        assert!((target.actual_position() - 0.2).abs() <= 0.05);
    }

    #[test]
    fn stops_at_mechanical_limit() {
        // step 0.05: from 0.97 the next candidate would be 1.02
        let target = Recorder::new(21, 0.97);
        let err = CrawlTransition.move_to(&target, 1.0).unwrap_err();
        assert!(matches!(err, ServoError::LimitReached(p) if p == 0.97));
        assert!(err.is_expected_stop());
        assert!(target.writes().is_empty());
        assert_eq!(target.actual_position(), 0.97);
    }

    #[test]
    fn already_close_enough() {
        let target = Recorder::new(21, 0.98);
        CrawlTransition.move_to(&target, 1.0).unwrap();
        assert!(target.writes().is_empty());
    }

    #[test]
    fn rejects_degenerate_precision() {
        let target = Recorder::new(1, 0.0);
        assert!(matches!(
            CrawlTransition.move_to(&target, 1.0),
            Err(ServoError::InvalidArgument(_))
        ));
        assert!(target.writes().is_empty());
    }

    #[test]
    fn disable_surfaces_as_expected_stop() {
        let mut target = Recorder::new(101, 0.0);
        target.disable_after = Some(3);
        let err = CrawlTransition.move_to(&target, 1.0).unwrap_err();
        assert!(err.is_expected_stop());
        assert_eq!(target.writes().len(), 3);
    }
}
