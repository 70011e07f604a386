use std::fmt;

/// Channel index of a servo within its controller, `0..count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServoId(pub usize);

impl fmt::Display for ServoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position every servo is assumed to hold before its first hardware write.
pub const CENTER: f64 = 0.5;

pub(crate) fn check_position(position: f64) -> Result<(), crate::ServoError> {
    if !(0.0..=1.0).contains(&position) {
        return Err(crate::ServoError::PositionOutOfRange(position));
    }
    Ok(())
}
