#![forbid(unsafe_code)]

/// Declared type of a column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalType {
    #[default]
    Null,
    Boolean,
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    String,
    Bytes,
    Array,
    Map,
    Struct,
    Union,
}

impl LogicalType {
    pub const SCALARS: [LogicalType; 9] = [
        LogicalType::Boolean,
        LogicalType::Byte,
        LogicalType::Short,
        LogicalType::Integer,
        LogicalType::Long,
        LogicalType::Float,
        LogicalType::Double,
        LogicalType::String,
        LogicalType::Bytes,
    ];

    pub fn is_scalar(self) -> bool {
        Self::SCALARS.contains(&self)
    }

    pub fn is_container(self) -> bool {
        matches!(
            self,
            LogicalType::Array | LogicalType::Map | LogicalType::Struct | LogicalType::Union
        )
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            LogicalType::Byte | LogicalType::Short | LogicalType::Integer | LogicalType::Long
        )
    }

    pub fn is_floating(self) -> bool {
        matches!(self, LogicalType::Float | LogicalType::Double)
    }

    /// Stable one-byte code used by the block payload layout.
    pub fn code(self) -> u8 {
        match self {
            LogicalType::Null => 0,
            LogicalType::Boolean => 1,
            LogicalType::Byte => 2,
            LogicalType::Short => 3,
            LogicalType::Integer => 4,
            LogicalType::Long => 5,
            LogicalType::Float => 6,
            LogicalType::Double => 7,
            LogicalType::String => 8,
            LogicalType::Bytes => 9,
            LogicalType::Array => 10,
            LogicalType::Map => 11,
            LogicalType::Struct => 12,
            LogicalType::Union => 13,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => LogicalType::Null,
            1 => LogicalType::Boolean,
            2 => LogicalType::Byte,
            3 => LogicalType::Short,
            4 => LogicalType::Integer,
            5 => LogicalType::Long,
            6 => LogicalType::Float,
            7 => LogicalType::Double,
            8 => LogicalType::String,
            9 => LogicalType::Bytes,
            10 => LogicalType::Array,
            11 => LogicalType::Map,
            12 => LogicalType::Struct,
            13 => LogicalType::Union,
            _ => return None,
        })
    }
}

/// Encoding strategy recorded in a block header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncodingKind {
    Sequential,
    Constant,
    Dictionary,
    RunLengthArray,
    Null,
    Union,
}

/// Passive schema node used to resolve container shapes and filter struct children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub logical_type: LogicalType,
    /// Array: the element schema. Map: the value schema. Struct: named fields.
    /// Union: optional member types.
    pub children: Vec<ColumnSchema>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<ColumnSchema>) -> Self {
        self.children = children;
        self
    }

    pub fn array(name: impl Into<String>, element: ColumnSchema) -> Self {
        Self::new(name, LogicalType::Array).with_children(vec![element])
    }

    pub fn map(name: impl Into<String>, value: ColumnSchema) -> Self {
        Self::new(name, LogicalType::Map).with_children(vec![value])
    }

    pub fn structure(name: impl Into<String>, fields: Vec<ColumnSchema>) -> Self {
        Self::new(name, LogicalType::Struct).with_children(fields)
    }

    pub fn child(&self, name: &str) -> Option<&ColumnSchema> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Element schema of an array, or value schema of a map.
    pub fn element(&self) -> Option<&ColumnSchema> {
        match self.logical_type {
            LogicalType::Array | LogicalType::Map => self.children.first(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_roundtrip() {
        for code in 0..=13u8 {
            let ty = LogicalType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert_eq!(LogicalType::from_code(14), None);
        assert_eq!(LogicalType::from_code(0xFF), None);
    }

    #[test]
    fn schema_lookup() {
        let schema = ColumnSchema::structure(
            "s",
            vec![
                ColumnSchema::new("a", LogicalType::Integer),
                ColumnSchema::array("b", ColumnSchema::new("item", LogicalType::String)),
            ],
        );
        assert_eq!(schema.child("a").map(|c| c.logical_type), Some(LogicalType::Integer));
        assert!(schema.child("zzz").is_none());
        let b = schema.child("b").unwrap();
        assert_eq!(b.element().map(|c| c.logical_type), Some(LogicalType::String));
        assert!(schema.element().is_none());
    }
}
