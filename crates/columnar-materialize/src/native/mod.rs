#![forbid(unsafe_code)]

//! Native backend: cell-addressable columns built from boxed values.

mod nested;
mod scalar;

pub use nested::{ArrayColumn, ChildSegments, StructColumn, UnionColumn};
pub use scalar::{RowSelection, ScalarColumn};

use crate::block::EncodedColumnBlock;
use crate::error::Result;
use crate::loader::{select_variant, target_type, BoxedLoader, LoaderFactory, LoaderVariant};
use crate::options::LoaderOptions;
use crate::types::{ColumnSchema, LogicalType};
use crate::value::Value;
use nested::{ArrayLoader, NullLoader, RunLengthArrayLoader, StructLoader, UnionLoader};
use scalar::{ConstantLoader, DictionaryLoader, SequentialLoader};

/// A materialized native column.
#[derive(Clone, Debug, PartialEq)]
pub enum NativeColumn {
    /// Entirely absent column of the given length.
    Null(u32),
    Scalar(ScalarColumn),
    Array(ArrayColumn),
    Struct(StructColumn),
    Map(StructColumn),
    Union(UnionColumn),
}

impl NativeColumn {
    pub fn logical_type(&self) -> LogicalType {
        match self {
            NativeColumn::Null(_) => LogicalType::Null,
            NativeColumn::Scalar(c) => c.logical_type(),
            NativeColumn::Array(_) => LogicalType::Array,
            NativeColumn::Struct(_) => LogicalType::Struct,
            NativeColumn::Map(_) => LogicalType::Map,
            NativeColumn::Union(_) => LogicalType::Union,
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            NativeColumn::Null(len) => *len,
            NativeColumn::Scalar(c) => c.len(),
            NativeColumn::Array(c) => c.len(),
            NativeColumn::Struct(c) | NativeColumn::Map(c) => c.len(),
            NativeColumn::Union(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell at `row`; `None` when the row is null or out of range.
    pub fn get(&self, row: u32) -> Option<Value> {
        match self {
            NativeColumn::Null(_) => None,
            NativeColumn::Scalar(c) => c.get(row),
            NativeColumn::Array(c) => c.get(row),
            NativeColumn::Struct(c) => c.get_struct(row),
            NativeColumn::Map(c) => c.get_map(row),
            NativeColumn::Union(c) => c.get(row),
        }
    }

    pub fn is_null(&self, row: u32) -> bool {
        match self {
            NativeColumn::Null(_) => true,
            NativeColumn::Scalar(c) => c.is_null(row),
            NativeColumn::Array(c) => c.is_null(row),
            NativeColumn::Struct(c) | NativeColumn::Map(c) => c.is_null(row),
            NativeColumn::Union(c) => c.is_null(row),
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarColumn> {
        match self {
            NativeColumn::Scalar(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayColumn> {
        match self {
            NativeColumn::Array(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructColumn> {
        match self {
            NativeColumn::Struct(c) | NativeColumn::Map(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_union(&self) -> Option<&UnionColumn> {
        match self {
            NativeColumn::Union(c) => Some(c),
            _ => None,
        }
    }
}

/// Creates native loaders.
///
/// An optional schema node resolves container shapes, overrides scalar target types and
/// filters struct children.
#[derive(Clone, Debug, Default)]
pub struct NativeLoaderFactory<'s> {
    options: LoaderOptions,
    schema: Option<&'s ColumnSchema>,
}

impl<'s> NativeLoaderFactory<'s> {
    pub fn new(options: LoaderOptions) -> Self {
        Self {
            options,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: Option<&'s ColumnSchema>) -> Self {
        self.schema = schema;
        self
    }
}

impl LoaderFactory for NativeLoaderFactory<'_> {
    type Output = NativeColumn;

    fn create(
        &mut self,
        block: &EncodedColumnBlock,
        load_size: u32,
    ) -> Result<BoxedLoader<'_, NativeColumn>> {
        let variant = select_variant(block, self.schema)?;
        let target = target_type(block, self.schema);
        let options = self.options;
        let element = || self.schema.and_then(ColumnSchema::element).cloned();
        let loader: BoxedLoader<'_, NativeColumn> = match variant {
            LoaderVariant::Sequential => Box::new(SequentialLoader::new(target, load_size, options)?),
            LoaderVariant::Constant => Box::new(ConstantLoader::new(target, load_size, options)),
            LoaderVariant::Dictionary => Box::new(DictionaryLoader::new(target, load_size, options)),
            LoaderVariant::Null => Box::new(NullLoader::new(load_size)),
            LoaderVariant::Array => Box::new(ArrayLoader::new(load_size, element(), options)),
            LoaderVariant::RunLengthArray => {
                Box::new(RunLengthArrayLoader::new(load_size, element(), options))
            }
            LoaderVariant::Struct => Box::new(StructLoader::new(
                LogicalType::Struct,
                load_size,
                self.schema.cloned(),
                options,
            )),
            LoaderVariant::Map => Box::new(StructLoader::new(
                LogicalType::Map,
                load_size,
                self.schema.cloned(),
                options,
            )),
            LoaderVariant::Union => {
                Box::new(UnionLoader::new(load_size, self.schema.cloned(), options))
            }
        };
        Ok(loader)
    }
}

/// Materialize `block` into a native column.
pub fn load_native(
    block: &EncodedColumnBlock,
    schema: Option<&ColumnSchema>,
    options: LoaderOptions,
) -> Result<NativeColumn> {
    NativeLoaderFactory::new(options)
        .with_schema(schema)
        .load(block)
}
