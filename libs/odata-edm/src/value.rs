//! Entity and value model
//!
//! Untyped containers for data flowing between the wire formats, the
//! processors and the data sources. Type names refer to the [`crate::Edm`].

use crate::error::{EdmError, Result};
use crate::model::PrimitiveType;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    Boolean(bool),
    Byte(u8),
    SByte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Decimal(Decimal),
    Double(f64),
    Single(f32),
    String(String),
    Guid(Uuid),
    DateTimeOffset(DateTime<FixedOffset>),
    Date(NaiveDate),
    Binary(Vec<u8>),
}

impl PrimitiveValue {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            PrimitiveValue::Boolean(_) => PrimitiveType::Boolean,
            PrimitiveValue::Byte(_) => PrimitiveType::Byte,
            PrimitiveValue::SByte(_) => PrimitiveType::SByte,
            PrimitiveValue::Int16(_) => PrimitiveType::Int16,
            PrimitiveValue::Int32(_) => PrimitiveType::Int32,
            PrimitiveValue::Int64(_) => PrimitiveType::Int64,
            PrimitiveValue::Decimal(_) => PrimitiveType::Decimal,
            PrimitiveValue::Double(_) => PrimitiveType::Double,
            PrimitiveValue::Single(_) => PrimitiveType::Single,
            PrimitiveValue::String(_) => PrimitiveType::String,
            PrimitiveValue::Guid(_) => PrimitiveType::Guid,
            PrimitiveValue::DateTimeOffset(_) => PrimitiveType::DateTimeOffset,
            PrimitiveValue::Date(_) => PrimitiveType::Date,
            PrimitiveValue::Binary(_) => PrimitiveType::Binary,
        }
    }

    /// Numeric view of the value. Strings are parsed as decimals.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            PrimitiveValue::Byte(v) => Some(Decimal::from(*v)),
            PrimitiveValue::SByte(v) => Some(Decimal::from(*v)),
            PrimitiveValue::Int16(v) => Some(Decimal::from(*v)),
            PrimitiveValue::Int32(v) => Some(Decimal::from(*v)),
            PrimitiveValue::Int64(v) => Some(Decimal::from(*v)),
            PrimitiveValue::Decimal(v) => Some(*v),
            PrimitiveValue::Double(v) => Decimal::try_from(*v).ok(),
            PrimitiveValue::Single(v) => Decimal::try_from(*v).ok(),
            PrimitiveValue::String(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.primitive_type().is_numeric()
    }

    /// Key comparison: numeric values compare by decimal value regardless of width,
    /// and a string compared with a number is read as a decimal.
    pub fn key_equals(&self, other: &PrimitiveValue) -> bool {
        if self.is_numeric() || other.is_numeric() {
            return match (self.to_decimal(), other.to_decimal()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
        }
        self == other
    }

    /// Literal form used in resource paths and `Location` headers.
    pub fn to_uri_literal(&self) -> String {
        match self {
            PrimitiveValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            PrimitiveValue::Binary(bytes) => format!("binary'{}'", URL_SAFE_NO_PAD.encode(bytes)),
            other => other.to_text(),
        }
    }

    /// Plain text form, as used by `$value` and JSON strings.
    pub fn to_text(&self) -> String {
        match self {
            PrimitiveValue::Boolean(v) => v.to_string(),
            PrimitiveValue::Byte(v) => v.to_string(),
            PrimitiveValue::SByte(v) => v.to_string(),
            PrimitiveValue::Int16(v) => v.to_string(),
            PrimitiveValue::Int32(v) => v.to_string(),
            PrimitiveValue::Int64(v) => v.to_string(),
            PrimitiveValue::Decimal(v) => v.normalize().to_string(),
            PrimitiveValue::Double(v) => format_float(*v),
            PrimitiveValue::Single(v) => format_float(f64::from(*v)),
            PrimitiveValue::String(s) => s.clone(),
            PrimitiveValue::Guid(v) => v.to_string(),
            PrimitiveValue::DateTimeOffset(v) => v.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            PrimitiveValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            PrimitiveValue::Binary(bytes) => STANDARD.encode(bytes),
        }
    }

    /// Parses the plain text form of a value of type `ty`.
    pub fn parse_text(ty: PrimitiveType, text: &str) -> Result<Self> {
        let conversion = || EdmError::Conversion {
            value: text.to_string(),
            target: ty.name().to_string(),
        };
        let trimmed = text.trim();
        let value = match ty {
            PrimitiveType::Boolean => match trimmed {
                "true" | "1" => PrimitiveValue::Boolean(true),
                "false" | "0" => PrimitiveValue::Boolean(false),
                _ => return Err(conversion()),
            },
            PrimitiveType::Byte => PrimitiveValue::Byte(trimmed.parse().map_err(|_| conversion())?),
            PrimitiveType::SByte => PrimitiveValue::SByte(trimmed.parse().map_err(|_| conversion())?),
            PrimitiveType::Int16 => PrimitiveValue::Int16(trimmed.parse().map_err(|_| conversion())?),
            PrimitiveType::Int32 => PrimitiveValue::Int32(trimmed.parse().map_err(|_| conversion())?),
            PrimitiveType::Int64 => PrimitiveValue::Int64(trimmed.parse().map_err(|_| conversion())?),
            PrimitiveType::Decimal => Decimal::from_str(trimmed)
                .or_else(|_| Decimal::from_scientific(trimmed))
                .map(PrimitiveValue::Decimal)
                .map_err(|_| conversion())?,
            PrimitiveType::Double => PrimitiveValue::Double(parse_float(trimmed).ok_or_else(conversion)?),
            PrimitiveType::Single => {
                PrimitiveValue::Single(parse_float(trimmed).ok_or_else(conversion)? as f32)
            }
            PrimitiveType::String => PrimitiveValue::String(text.to_string()),
            PrimitiveType::Guid => PrimitiveValue::Guid(Uuid::parse_str(trimmed).map_err(|_| conversion())?),
            PrimitiveType::DateTimeOffset => PrimitiveValue::DateTimeOffset(
                DateTime::parse_from_rfc3339(trimmed).map_err(|_| conversion())?,
            ),
            PrimitiveType::Date => PrimitiveValue::Date(
                NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| conversion())?,
            ),
            PrimitiveType::Binary => PrimitiveValue::Binary(
                STANDARD
                    .decode(trimmed)
                    .or_else(|_| URL_SAFE.decode(trimmed))
                    .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
                    .map_err(|_| conversion())?,
            ),
        };
        Ok(value)
    }

    /// Converts the value to `ty`, rejecting lossy numeric narrowing.
    pub fn coerce(self, ty: PrimitiveType) -> Result<Self> {
        if self.primitive_type() == ty {
            return Ok(self);
        }
        let err = |value: &PrimitiveValue| EdmError::Conversion {
            value: value.to_text(),
            target: ty.name().to_string(),
        };

        if ty.is_numeric() {
            if let PrimitiveValue::String(s) = &self {
                return Self::parse_text(ty, s);
            }
            let decimal = self.to_decimal().ok_or_else(|| err(&self))?;
            if ty.is_integral() && decimal.fract() != Decimal::ZERO {
                return Err(err(&self));
            }
            let converted = match ty {
                PrimitiveType::Byte => u8::try_from(decimal).ok().map(PrimitiveValue::Byte),
                PrimitiveType::SByte => i8::try_from(decimal).ok().map(PrimitiveValue::SByte),
                PrimitiveType::Int16 => i16::try_from(decimal).ok().map(PrimitiveValue::Int16),
                PrimitiveType::Int32 => i32::try_from(decimal).ok().map(PrimitiveValue::Int32),
                PrimitiveType::Int64 => i64::try_from(decimal).ok().map(PrimitiveValue::Int64),
                PrimitiveType::Decimal => Some(PrimitiveValue::Decimal(decimal)),
                PrimitiveType::Double => f64::try_from(decimal).ok().map(PrimitiveValue::Double),
                PrimitiveType::Single => f32::try_from(decimal).ok().map(PrimitiveValue::Single),
                _ => None,
            };
            return converted.ok_or_else(|| err(&self));
        }

        match (self, ty) {
            (PrimitiveValue::String(s), ty) => Self::parse_text(ty, &s),
            (PrimitiveValue::DateTimeOffset(dt), PrimitiveType::Date) => {
                Ok(PrimitiveValue::Date(dt.date_naive()))
            }
            (other, _) => Err(err(&other)),
        }
    }
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        let text = if v > 0.0 { "INF" } else { "-INF" };
        text.to_string()
    } else {
        v.to_string()
    }
}

fn parse_float(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        _ => text.parse().ok(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Primitive(PrimitiveValue),
    Complex(ComplexValue),
    Collection(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_primitive(&self) -> Option<&PrimitiveValue> {
        match self {
            Value::Primitive(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_complex(&self) -> Option<&ComplexValue> {
        match self {
            Value::Complex(v) => Some(v),
            _ => None,
        }
    }
}

impl From<PrimitiveValue> for Value {
    fn from(value: PrimitiveValue) -> Self {
        Value::Primitive(value)
    }
}

impl From<ComplexValue> for Value {
    fn from(value: ComplexValue) -> Self {
        Value::Complex(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Primitive(PrimitiveValue::String(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Primitive(PrimitiveValue::String(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Primitive(PrimitiveValue::Boolean(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Primitive(PrimitiveValue::Int32(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Primitive(PrimitiveValue::Int64(value))
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Primitive(PrimitiveValue::Decimal(value))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Collection(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComplexValue {
    pub type_name: String,
    pub properties: BTreeMap<String, Value>,
}

impl ComplexValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavigationLink {
    Single(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

/// An entity instance. `links` holds inlined (expanded or deep-inserted) navigation targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub type_name: String,
    pub properties: BTreeMap<String, Value>,
    pub links: BTreeMap<String, NavigationLink>,
}

impl Entity {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_link(mut self, name: impl Into<String>, link: NavigationLink) -> Self {
        self.links.insert(name.into(), link);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn link(&self, name: &str) -> Option<&NavigationLink> {
        self.links.get(name)
    }

    /// Copies every property and link of `patch` over this entity.
    pub fn merge(&mut self, patch: &Entity) {
        for (name, value) in &patch.properties {
            self.properties.insert(name.clone(), value.clone());
        }
        for (name, link) in &patch.links {
            self.links.insert(name.clone(), link.clone());
        }
    }
}
