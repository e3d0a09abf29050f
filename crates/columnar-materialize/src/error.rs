#![forbid(unsafe_code)]

use crate::loader::LoaderVariant;
use crate::types::{EncodingKind, LogicalType};

pub type Result<T, E = LoadError> = std::result::Result<T, E>;

/// Failures raised while materializing a column block.
///
/// Setter-level problems that the loader can resolve on its own (a value that does not fit
/// the destination type, a setter that makes no sense for the destination) never show up
/// here; they are stored as nulls. What remains are structural misuse of a loader and
/// blocks the factory cannot decode.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unsupported encoding {encoding:?} for logical type {logical_type:?}")]
    UnsupportedEncoding {
        logical_type: LogicalType,
        encoding: EncodingKind,
    },

    #[error("operation `{operation}` is not supported by the {variant:?} loader")]
    UnsupportedOperation {
        operation: &'static str,
        variant: LoaderVariant,
    },

    #[error("operation `{operation}` is not supported by a {logical_type:?} allocator")]
    UnsupportedAllocation {
        operation: &'static str,
        logical_type: LogicalType,
    },

    #[error("row {index} is out of bounds for a column of {len} rows")]
    RowOutOfBounds { index: u32, len: u32 },

    #[error("dictionary index {index} is out of bounds for a dictionary of {len} entries")]
    DictionaryIndexOutOfBounds { index: u32, len: u32 },

    #[error("dictionary was used before `create_dictionary`")]
    DictionaryNotCreated,

    #[error("loader was built before `finish`")]
    NotFinished,

    #[error("loader was already finished")]
    Finished,

    #[error("child column `{child}` has {actual} rows, expected {expected}")]
    ChildLengthMismatch {
        child: String,
        expected: u32,
        actual: u32,
    },

    #[error("union has no materialized child of type {logical_type:?}")]
    UnionChildMissing { logical_type: LogicalType },

    #[error("invalid column block: {0}")]
    InvalidBlock(String),

    #[cfg(feature = "arrow")]
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl LoadError {
    pub(crate) fn unsupported(operation: &'static str, variant: LoaderVariant) -> Self {
        Self::UnsupportedOperation { operation, variant }
    }

    pub(crate) fn invalid_block(msg: impl Into<String>) -> Self {
        Self::InvalidBlock(msg.into())
    }
}
