//! Type system for the algebra IR

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    // Primitives
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal { precision: u8, scale: u8 },

    // Text
    String,
    Varchar(Option<u32>),

    // Binary
    Blob,

    // Temporal
    Date,
    Time,
    Timestamp,

    // Complex
    Array(Box<DataType>),
    Document,

    // Special
    Null,
    Unknown,
}

impl DataType {
    /// Integer types the store keeps as 32-bit numbers
    pub fn is_narrow_int(&self) -> bool {
        matches!(self, DataType::Int8 | DataType::Int16 | DataType::Int32)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
                | DataType::Decimal { .. }
        )
    }

    /// Element type for arrays, the type itself otherwise
    pub fn component(&self) -> &DataType {
        match self {
            DataType::Array(inner) => inner,
            other => other,
        }
    }
}

/// One named, typed column of a row type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }
}

/// Ordered output fields of an algebra node
pub type RowType = Vec<Field>;

/// Field names of a row type, in order
pub fn field_names(row_type: &[Field]) -> Vec<String> {
    row_type.iter().map(|f| f.name.clone()).collect()
}
