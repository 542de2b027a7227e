//! Atomic element types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of an atomic variable, or the destination type of a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomicType {
    Char,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    Url,
}

impl AtomicType {
    /// Size in bytes of one element in a flat buffer.
    ///
    /// String and Url values are variable length; their size here is that of
    /// a single character, which is how they land in an output buffer.
    pub fn size_of(&self) -> usize {
        match self {
            AtomicType::Char | AtomicType::Byte | AtomicType::UByte => 1,
            AtomicType::Short | AtomicType::UShort => 2,
            AtomicType::Int | AtomicType::UInt | AtomicType::Float => 4,
            AtomicType::Int64 | AtomicType::UInt64 | AtomicType::Double => 8,
            AtomicType::String | AtomicType::Url => 1,
        }
    }

    /// True for String and Url
    pub fn is_string(&self) -> bool {
        matches!(self, AtomicType::String | AtomicType::Url)
    }

    /// Types that may be written into a char destination
    pub fn is_char_compatible(&self) -> bool {
        matches!(
            self,
            AtomicType::Char | AtomicType::Byte | AtomicType::UByte | AtomicType::String | AtomicType::Url
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            AtomicType::Byte | AtomicType::Short | AtomicType::Int | AtomicType::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, AtomicType::Float | AtomicType::Double)
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AtomicType::Char => "char",
            AtomicType::Byte => "byte",
            AtomicType::UByte => "ubyte",
            AtomicType::Short => "short",
            AtomicType::UShort => "ushort",
            AtomicType::Int => "int",
            AtomicType::UInt => "uint",
            AtomicType::Int64 => "int64",
            AtomicType::UInt64 => "uint64",
            AtomicType::Float => "float",
            AtomicType::Double => "double",
            AtomicType::String => "string",
            AtomicType::Url => "url",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for AtomicType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "char" => Ok(AtomicType::Char),
            "byte" | "int8" => Ok(AtomicType::Byte),
            "ubyte" | "uint8" => Ok(AtomicType::UByte),
            "short" | "int16" => Ok(AtomicType::Short),
            "ushort" | "uint16" => Ok(AtomicType::UShort),
            "int" | "int32" => Ok(AtomicType::Int),
            "uint" | "uint32" => Ok(AtomicType::UInt),
            "int64" => Ok(AtomicType::Int64),
            "uint64" => Ok(AtomicType::UInt64),
            "float" | "float32" => Ok(AtomicType::Float),
            "double" | "float64" => Ok(AtomicType::Double),
            "string" => Ok(AtomicType::String),
            "url" => Ok(AtomicType::Url),
            other => Err(format!("unknown atomic type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(AtomicType::Char.size_of(), 1);
        assert_eq!(AtomicType::UShort.size_of(), 2);
        assert_eq!(AtomicType::Float.size_of(), 4);
        assert_eq!(AtomicType::Int64.size_of(), 8);
    }

    #[test]
    fn test_parse_roundtrip() {
        for t in [AtomicType::Byte, AtomicType::Double, AtomicType::Url] {
            let parsed: AtomicType = t.to_string().parse().unwrap();
            assert_eq!(parsed, t);
        }
        assert!("complex".parse::<AtomicType>().is_err());
    }
}
