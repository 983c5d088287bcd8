//! Value kinds, formats and the built-in boolean adapters.

use std::fmt;

use bytes::Bytes;

use crate::adapters::{AdaptersMap, Dumper, Loader};
use crate::error::{Error, Result};

/// Server type identifier.
pub type Oid = u32;

/// Oids of the built-in types known by name.
pub mod oids {
    use super::Oid;

    /// `bool`
    pub const BOOL: Oid = 16;
    /// `bytea`
    pub const BYTEA: Oid = 17;
    /// `int8`
    pub const INT8: Oid = 20;
    /// `text`
    pub const TEXT: Oid = 25;
    /// `float8`
    pub const FLOAT8: Oid = 701;
}

/// Resolve a built-in type name to its oid.
#[must_use]
pub fn oid_by_name(name: &str) -> Option<Oid> {
    match name.to_ascii_lowercase().as_str() {
        "bool" | "boolean" => Some(oids::BOOL),
        "bytea" => Some(oids::BYTEA),
        "int8" | "bigint" => Some(oids::INT8),
        "text" => Some(oids::TEXT),
        "float8" | "double precision" => Some(oids::FLOAT8),
        _ => None,
    }
}

/// Wire format of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Textual representation.
    Text,
    /// Binary representation.
    Binary,
}

impl Format {
    /// Upper-case name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
        }
    }
}

/// Format requested when dumping a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DumpFormat {
    /// Whatever dumper was registered last for the kind.
    Auto,
    /// Text format.
    Text,
    /// Binary format.
    Binary,
}

impl DumpFormat {
    /// Upper-case name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
        }
    }
}

impl From<Format> for DumpFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => Self::Text,
            Format::Binary => Self::Binary,
        }
    }
}

/// Closed set of value kinds adapters are registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Booleans.
    Bool,
    /// 64-bit integers.
    Int,
    /// 64-bit floats.
    Float,
    /// Strings.
    Text,
    /// Byte strings.
    Bytes,
}

impl ValueKind {
    /// Resolve a kind from one of its accepted names.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Some(Self::Bool),
            "int" | "int8" | "bigint" | "i64" => Some(Self::Int),
            "float" | "float8" | "double precision" | "f64" => Some(Self::Float),
            "text" | "str" | "string" | "varchar" => Some(Self::Text),
            "bytes" | "bytea" => Some(Self::Bytes),
            _ => None,
        }
    }

    /// Canonical name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value crossing the adapter boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// String.
    Text(String),
    /// Byte string.
    Bytes(Bytes),
}

impl Value {
    /// Kind of the value, `None` for NULL.
    #[must_use]
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Int(_) => Some(ValueKind::Int),
            Self::Float(_) => Some(ValueKind::Float),
            Self::Text(_) => Some(ValueKind::Text),
            Self::Bytes(_) => Some(ValueKind::Bytes),
        }
    }
}

fn expect_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(Error::Load(format!("expected a bool, got {other:?}"))),
    }
}

/// Text dumper for booleans.
#[derive(Debug, Default)]
pub struct BoolDumper;

impl Dumper for BoolDumper {
    fn format(&self) -> Format {
        Format::Text
    }

    fn oid(&self) -> Oid {
        oids::BOOL
    }

    fn dump(&self, value: &Value) -> Result<Bytes> {
        let b = expect_bool(value)?;
        Ok(Bytes::from_static(if b { b"t" } else { b"f" }))
    }

    fn quote(&self, value: &Value) -> Result<Bytes> {
        let b = expect_bool(value)?;
        Ok(Bytes::from_static(if b { b"true" } else { b"false" }))
    }

    fn name(&self) -> &'static str {
        "BoolDumper"
    }
}

/// Binary dumper for booleans.
#[derive(Debug, Default)]
pub struct BoolBinaryDumper;

impl Dumper for BoolBinaryDumper {
    fn format(&self) -> Format {
        Format::Binary
    }

    fn oid(&self) -> Oid {
        oids::BOOL
    }

    fn dump(&self, value: &Value) -> Result<Bytes> {
        let b = expect_bool(value)?;
        Ok(Bytes::from_static(if b { b"\x01" } else { b"\x00" }))
    }

    fn name(&self) -> &'static str {
        "BoolBinaryDumper"
    }
}

/// Text loader for booleans.
#[derive(Debug, Default)]
pub struct BoolLoader;

impl Loader for BoolLoader {
    fn format(&self) -> Format {
        Format::Text
    }

    fn load(&self, data: &[u8]) -> Result<Value> {
        Ok(Value::Bool(data == b"t"))
    }

    fn name(&self) -> &'static str {
        "BoolLoader"
    }
}

/// Binary loader for booleans.
#[derive(Debug, Default)]
pub struct BoolBinaryLoader;

impl Loader for BoolBinaryLoader {
    fn format(&self) -> Format {
        Format::Binary
    }

    fn load(&self, data: &[u8]) -> Result<Value> {
        Ok(Value::Bool(data != b"\x00"))
    }

    fn name(&self) -> &'static str {
        "BoolBinaryLoader"
    }
}

/// Register the built-in adapters on `map`.
pub fn register_default_adapters(map: &mut AdaptersMap) -> Result<()> {
    map.register_dumper(ValueKind::Bool, std::sync::Arc::new(BoolDumper));
    map.register_dumper(ValueKind::Bool, std::sync::Arc::new(BoolBinaryDumper));
    map.register_loader_by_name("bool", std::sync::Arc::new(BoolLoader))?;
    map.register_loader_by_name("bool", std::sync::Arc::new(BoolBinaryLoader))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_dumpers() {
        assert_eq!(BoolDumper.dump(&Value::Bool(true)).unwrap(), &b"t"[..]);
        assert_eq!(BoolDumper.quote(&Value::Bool(false)).unwrap(), &b"false"[..]);
        assert_eq!(BoolBinaryDumper.dump(&Value::Bool(true)).unwrap(), &b"\x01"[..]);
        assert!(BoolDumper.dump(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_bool_loaders() {
        assert_eq!(BoolLoader.load(b"t").unwrap(), Value::Bool(true));
        assert_eq!(BoolLoader.load(b"f").unwrap(), Value::Bool(false));
        assert_eq!(BoolBinaryLoader.load(b"\x02").unwrap(), Value::Bool(true));
        assert_eq!(BoolBinaryLoader.load(b"\x00").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ValueKind::from_name("boolean"), Some(ValueKind::Bool));
        assert_eq!(ValueKind::from_name("BIGINT"), Some(ValueKind::Int));
        assert_eq!(ValueKind::from_name("decimal"), None);
        assert_eq!(oid_by_name("bool"), Some(oids::BOOL));
        assert_eq!(Value::Null.kind(), None);
    }
}
