use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use crate::error::ServoError;

/// Keys may be given in their fully qualified form, the prefix is stripped before lookup.
pub const META_PREFIX: &str = "http://servomaster.sourceforge.net/meta/";

pub mod keys {
    pub const PRECISION: &str = "controller/precision";
    pub const MAX_SERVOS: &str = "controller/maxservos";
    pub const BANDWIDTH: &str = "controller/bandwidth";
    pub const SILENT: &str = "controller/silent";
    pub const ALLOW_DISCONNECT: &str = "controller/allow_disconnect";
    pub const RANGE_MIN: &str = "servo/range/min";
    pub const RANGE_MAX: &str = "servo/range/max";
    pub const RANGE_UNITS: &str = "servo/range/units";
    pub const MANUFACTURER_NAME: &str = "manufacturer/name";
    pub const MANUFACTURER_MODEL: &str = "manufacturer/model";
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::Text(v) => f.write_str(v),
        }
    }
}

impl MetaValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            MetaValue::Float(_) => None,
            MetaValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

/// Controller metadata: boolean features and typed properties.
///
/// A snapshot is cached by the controller and handed out by value; drivers
/// rebuild it whenever a writable property changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    features: BTreeMap<String, bool>,
    properties: BTreeMap<String, MetaValue>,
    writable: BTreeSet<String>,
}

pub(crate) fn canonical_key(key: &str) -> &str {
    key.strip_prefix(META_PREFIX).unwrap_or(key)
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feature(mut self, key: &str, value: bool) -> Self {
        self.features.insert(key.to_string(), value);
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn with_writable_property(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.writable.insert(key.to_string());
        self.with_property(key, value)
    }

    pub fn feature(&self, key: &str) -> Result<bool, ServoError> {
        let key = canonical_key(key);
        self.features
            .get(key)
            .copied()
            .ok_or_else(|| ServoError::Unsupported(format!("no feature '{key}'")))
    }

    pub fn property(&self, key: &str) -> Result<&MetaValue, ServoError> {
        let key = canonical_key(key);
        self.properties
            .get(key)
            .ok_or_else(|| ServoError::Unsupported(format!("no property '{key}'")))
    }

    pub fn property_int(&self, key: &str) -> Result<i64, ServoError> {
        let value = self.property(key)?;
        value
            .as_int()
            .ok_or_else(|| {
                ServoError::InvalidArgument(format!("property '{key}' is not an integer: {value}"))
            })
    }

    pub fn property_text(&self, key: &str) -> Result<String, ServoError> {
        self.property(key).map(ToString::to_string)
    }

    pub fn is_writable(&self, key: &str) -> bool {
        self.writable.contains(canonical_key(key))
    }

    pub fn features(&self) -> impl Iterator<Item = (&str, bool)> {
        self.features.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[features: {:?}, properties: {{", self.features)?;
        for (i, (k, v)) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Meta {
        Meta::new()
            .with_feature(keys::SILENT, true)
            .with_property(keys::PRECISION, "1024")
            .with_property(keys::BANDWIDTH, 300i64)
            .with_writable_property(keys::RANGE_MIN, 0i64)
    }

    #[test]
    fn unknown_keys_are_unsupported() {
        let meta = sample();
        assert!(matches!(meta.feature("controller/lazy"), Err(ServoError::Unsupported(_))));
        assert!(matches!(meta.property("servo/speed"), Err(ServoError::Unsupported(_))));
    }

    #[test]
    fn text_integers_parse() {
        let meta = sample();
        assert_eq!(meta.property_int(keys::PRECISION).unwrap(), 1024);
        assert_eq!(meta.property_int(keys::BANDWIDTH).unwrap(), 300);
    }

    #[test]
    fn prefixed_keys_resolve() {
        let meta = sample();
        let key = format!("{META_PREFIX}{}", keys::SILENT);
        assert!(meta.feature(&key).unwrap());
        assert!(meta.is_writable(&format!("{META_PREFIX}{}", keys::RANGE_MIN)));
        assert!(!meta.is_writable(keys::PRECISION));
    }
}
