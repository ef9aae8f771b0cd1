//! Serialized values, value schemas, and the [ValueMapper] codec contract.
//!
//! The kernel never reflects on concrete model types. Everything that crosses
//! the simulation boundary - activity arguments, resource samples, computed
//! attributes - travels as a [SerializedValue], and mission models translate
//! between their own types and serialized values with explicitly registered
//! [ValueMapper]s.

use hifitime::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A self-describing value, the lingua franca between the kernel and mission models.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SerializedValue {
    Null,
    Boolean(bool),
    Int(i64),
    Real(f64),
    Text(String),
    List(Vec<SerializedValue>),
    Map(BTreeMap<String, SerializedValue>),
}

impl SerializedValue {
    /// Reads this value as a real number, widening integers.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            SerializedValue::Real(r) => Some(*r),
            SerializedValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SerializedValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            SerializedValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SerializedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SerializedValue]> {
        match self {
            SerializedValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, SerializedValue>> {
        match self {
            SerializedValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<f64> for SerializedValue {
    fn from(value: f64) -> Self {
        SerializedValue::Real(value)
    }
}

impl From<i64> for SerializedValue {
    fn from(value: i64) -> Self {
        SerializedValue::Int(value)
    }
}

impl From<bool> for SerializedValue {
    fn from(value: bool) -> Self {
        SerializedValue::Boolean(value)
    }
}

impl From<&str> for SerializedValue {
    fn from(value: &str) -> Self {
        SerializedValue::Text(value.to_string())
    }
}

impl From<String> for SerializedValue {
    fn from(value: String) -> Self {
        SerializedValue::Text(value)
    }
}

/// The shape of data a [ValueMapper] produces and accepts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueSchema {
    Real,
    Int,
    Boolean,
    Text,
    Duration,
    Series(Box<ValueSchema>),
    Struct(BTreeMap<String, ValueSchema>),
    /// An enumeration over a closed set of named variants.
    Variant(Vec<String>),
}

/// A codec between a model-side type and [SerializedValue].
///
/// Mappers are registered statically per activity parameter and per resource;
/// the kernel only ever touches user data through this interface.
pub trait ValueMapper: Send + Sync {
    type Value;

    fn value_schema(&self) -> ValueSchema;

    fn deserialize(&self, value: &SerializedValue) -> Result<Self::Value, String>;

    fn serialize(&self, value: &Self::Value) -> SerializedValue;
}

/// Maps `f64`, accepting integers on the way in.
pub struct RealMapper;

impl ValueMapper for RealMapper {
    type Value = f64;

    fn value_schema(&self) -> ValueSchema {
        ValueSchema::Real
    }

    fn deserialize(&self, value: &SerializedValue) -> Result<f64, String> {
        value
            .as_real()
            .ok_or_else(|| format!("expected a real number, got {value:?}"))
    }

    fn serialize(&self, value: &f64) -> SerializedValue {
        SerializedValue::Real(*value)
    }
}

pub struct IntMapper;

impl ValueMapper for IntMapper {
    type Value = i64;

    fn value_schema(&self) -> ValueSchema {
        ValueSchema::Int
    }

    fn deserialize(&self, value: &SerializedValue) -> Result<i64, String> {
        value
            .as_int()
            .ok_or_else(|| format!("expected an integer, got {value:?}"))
    }

    fn serialize(&self, value: &i64) -> SerializedValue {
        SerializedValue::Int(*value)
    }
}

pub struct BooleanMapper;

impl ValueMapper for BooleanMapper {
    type Value = bool;

    fn value_schema(&self) -> ValueSchema {
        ValueSchema::Boolean
    }

    fn deserialize(&self, value: &SerializedValue) -> Result<bool, String> {
        value
            .as_boolean()
            .ok_or_else(|| format!("expected a boolean, got {value:?}"))
    }

    fn serialize(&self, value: &bool) -> SerializedValue {
        SerializedValue::Boolean(*value)
    }
}

pub struct TextMapper;

impl ValueMapper for TextMapper {
    type Value = String;

    fn value_schema(&self) -> ValueSchema {
        ValueSchema::Text
    }

    fn deserialize(&self, value: &SerializedValue) -> Result<String, String> {
        value
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| format!("expected text, got {value:?}"))
    }

    fn serialize(&self, value: &String) -> SerializedValue {
        SerializedValue::Text(value.clone())
    }
}

/// Durations travel as whole microseconds, the resolution used by flight schedules.
pub struct DurationMapper;

impl ValueMapper for DurationMapper {
    type Value = Duration;

    fn value_schema(&self) -> ValueSchema {
        ValueSchema::Duration
    }

    fn deserialize(&self, value: &SerializedValue) -> Result<Duration, String> {
        let micros = value
            .as_int()
            .ok_or_else(|| format!("expected microseconds as an integer, got {value:?}"))?;
        Ok(Duration::from_total_nanoseconds(micros as i128 * 1_000))
    }

    fn serialize(&self, value: &Duration) -> SerializedValue {
        SerializedValue::Int((value.total_nanoseconds() / 1_000) as i64)
    }
}
