#![forbid(unsafe_code)]

use super::LoaderVariant;
use crate::block::EncodedColumnBlock;
use crate::error::{LoadError, Result};
use crate::types::{ColumnSchema, EncodingKind, LogicalType};

/// Pick the loader variant for a block.
///
/// The decision is made per axis: container shape (taken from the schema node when one is
/// supplied, since the header's encoding for nested columns is not authoritative), then
/// logical type, then the header's encoding. Only a block that declares itself null maps
/// to [`LoaderVariant::Null`]; every other unknown combination is an error.
pub fn select_variant(
    block: &EncodedColumnBlock,
    schema: Option<&ColumnSchema>,
) -> Result<LoaderVariant> {
    let unsupported = || LoadError::UnsupportedEncoding {
        logical_type: block.logical_type,
        encoding: block.encoding,
    };

    if block.logical_type == LogicalType::Null || block.encoding == EncodingKind::Null {
        return Ok(LoaderVariant::Null);
    }

    let shape = match schema.map(|s| s.logical_type).filter(|t| t.is_container()) {
        Some(shape) => {
            let compatible = match (shape, block.logical_type) {
                (LogicalType::Struct | LogicalType::Map, LogicalType::Struct | LogicalType::Map) => {
                    true
                }
                (shape, declared) => shape == declared,
            };
            if !compatible {
                return Err(unsupported());
            }
            shape
        }
        None => block.logical_type,
    };

    let variant = match shape {
        LogicalType::Array => match block.encoding {
            EncodingKind::Sequential => LoaderVariant::Array,
            EncodingKind::RunLengthArray => LoaderVariant::RunLengthArray,
            _ => return Err(unsupported()),
        },
        LogicalType::Struct => match block.encoding {
            EncodingKind::Sequential => LoaderVariant::Struct,
            _ => return Err(unsupported()),
        },
        LogicalType::Map => match block.encoding {
            EncodingKind::Sequential => LoaderVariant::Map,
            _ => return Err(unsupported()),
        },
        LogicalType::Union => match block.encoding {
            EncodingKind::Union | EncodingKind::Sequential => LoaderVariant::Union,
            _ => return Err(unsupported()),
        },
        scalar if scalar.is_scalar() => match block.encoding {
            EncodingKind::Sequential => LoaderVariant::Sequential,
            EncodingKind::Constant => LoaderVariant::Constant,
            EncodingKind::Dictionary => LoaderVariant::Dictionary,
            _ => return Err(unsupported()),
        },
        _ => return Err(unsupported()),
    };

    log::debug!(
        "column `{}`: {:?}/{:?} -> {:?} loader",
        block.name,
        block.logical_type,
        block.encoding,
        variant
    );
    Ok(variant)
}

/// Logical type the loader materializes: a scalar schema node overrides the block's type
/// (values are then converted with downcast-or-null).
pub(crate) fn target_type(block: &EncodedColumnBlock, schema: Option<&ColumnSchema>) -> LogicalType {
    match schema {
        Some(s) if s.logical_type.is_scalar() && block.logical_type.is_scalar() => s.logical_type,
        Some(s) if s.logical_type.is_container() => s.logical_type,
        _ => block.logical_type,
    }
}

/// Schema of the named child of a struct or map node.
///
/// Map children take the map's value schema. A struct schema with fields filters children
/// by name: `None` means the child is not declared and should be dropped.
pub(crate) fn spread_child_schema<'s>(
    schema: Option<&'s ColumnSchema>,
    shape: LogicalType,
    name: &str,
) -> Option<Option<&'s ColumnSchema>> {
    match (schema, shape) {
        (None, _) => Some(None),
        (Some(schema), LogicalType::Map) => Some(schema.element()),
        (Some(schema), _) if schema.children.is_empty() => Some(None),
        (Some(schema), _) => schema.child(name).map(Some),
    }
}
