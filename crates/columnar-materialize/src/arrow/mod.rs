#![forbid(unsafe_code)]

//! Interchange backend: materializes blocks into Arrow arrays.
//!
//! Loaders write through a borrowed [`MemoryAllocator`] node plus a base row offset.
//! Container loaders obtain child nodes from their own node and hand them to child
//! factories, so a whole nested column lands in one allocator tree that is turned into an
//! [`ArrayRef`] by [`MemoryAllocator::finish`].

mod allocator;
mod loader;

pub use allocator::{
    BooleanAllocator, ByteArrayAllocator, ListAllocator, MapAllocator, NullAllocator,
    PrimitiveAllocator, StructAllocator, UnionAllocator,
};
pub use loader::ArrowLoaderFactory;

use crate::block::EncodedColumnBlock;
use crate::error::{LoadError, Result};
use crate::loader::{select_variant, target_type, LoaderFactory, LoaderVariant};
use crate::options::LoaderOptions;
use crate::types::{ColumnSchema, LogicalType};
use crate::value::Value;
use arrow_array::types::{Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type};
use arrow_array::ArrayRef;

/// A destination node in an Arrow buffer tree.
///
/// Rows are addressed absolutely and may be written in any order; writing past the end
/// grows the node, and rows that are never written are null (valid for struct and map
/// nodes, whose validity only records explicit nulls).
pub trait MemoryAllocator {
    fn logical_type(&self) -> LogicalType;

    /// Current value count.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow to at least `count` rows.
    fn set_value_count(&mut self, count: u32);

    fn set_null(&mut self, index: u32) -> Result<()>;

    fn set_nulls(&mut self, start: u32, count: u32) -> Result<()> {
        for index in start..start.saturating_add(count) {
            self.set_null(index)?;
        }
        Ok(())
    }

    /// Store a value already converted to [`MemoryAllocator::logical_type`]; any other
    /// value is stored as null.
    fn set_value(&mut self, _index: u32, _value: Value) -> Result<()> {
        Err(unsupported(&*self, "set_value"))
    }

    /// List row `index` covers child rows `[start, start + length)`.
    fn set_array_index(&mut self, _index: u32, _start: u32, _length: u32) -> Result<()> {
        Err(unsupported(&*self, "set_array_index"))
    }

    /// The element node of a list, created on first use.
    fn array_child(&mut self, _kind: AllocatorType) -> Result<&mut dyn MemoryAllocator> {
        Err(unsupported(&*self, "array_child"))
    }

    /// The named child node of a struct or map, created on first use.
    fn child(&mut self, _name: &str, _kind: AllocatorType) -> Result<&mut dyn MemoryAllocator> {
        Err(unsupported(&*self, "child"))
    }

    /// The member node of a union, created on first use.
    fn union_child(&mut self, _kind: AllocatorType) -> Result<&mut dyn MemoryAllocator> {
        Err(unsupported(&*self, "union_child"))
    }

    /// Union row `index` publishes row `index` of the `logical_type` member.
    fn set_union_type(&mut self, _index: u32, _logical_type: LogicalType) -> Result<()> {
        Err(unsupported(&*self, "set_union_type"))
    }

    /// Hand over the populated buffers as an array and reset the node.
    fn finish(&mut self) -> Result<ArrayRef>;
}

fn unsupported<A: MemoryAllocator + ?Sized>(node: &A, operation: &'static str) -> LoadError {
    LoadError::UnsupportedAllocation {
        operation,
        logical_type: node.logical_type(),
    }
}

/// What kind of node to allocate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatorType {
    pub logical_type: LogicalType,
    /// Value type of map entries; ignored for other types.
    pub map_value_type: LogicalType,
}

impl AllocatorType {
    pub fn new(
        logical_type: LogicalType,
        schema: Option<&ColumnSchema>,
        options: &LoaderOptions,
    ) -> Self {
        let map_value_type = schema
            .filter(|_| logical_type == LogicalType::Map)
            .and_then(ColumnSchema::element)
            .map(|value| value.logical_type)
            .unwrap_or(options.map_value_type);
        Self {
            logical_type,
            map_value_type,
        }
    }

    /// Node type for `block` under an optional schema node.
    pub fn for_block(
        block: &EncodedColumnBlock,
        schema: Option<&ColumnSchema>,
        options: &LoaderOptions,
    ) -> Result<Self> {
        let logical_type = match select_variant(block, schema)? {
            LoaderVariant::Null => schema.map_or(LogicalType::Null, |s| s.logical_type),
            _ => target_type(block, schema),
        };
        Ok(Self::new(logical_type, schema, options))
    }

    pub fn allocate(self) -> Box<dyn MemoryAllocator> {
        match self.logical_type {
            LogicalType::Null => Box::new(NullAllocator::default()),
            LogicalType::Boolean => Box::new(BooleanAllocator::default()),
            LogicalType::Byte => Box::new(PrimitiveAllocator::<Int8Type>::default()),
            LogicalType::Short => Box::new(PrimitiveAllocator::<Int16Type>::default()),
            LogicalType::Integer => Box::new(PrimitiveAllocator::<Int32Type>::default()),
            LogicalType::Long => Box::new(PrimitiveAllocator::<Int64Type>::default()),
            LogicalType::Float => Box::new(PrimitiveAllocator::<Float32Type>::default()),
            LogicalType::Double => Box::new(PrimitiveAllocator::<Float64Type>::default()),
            LogicalType::String => Box::new(ByteArrayAllocator::new(LogicalType::String)),
            LogicalType::Bytes => Box::new(ByteArrayAllocator::new(LogicalType::Bytes)),
            LogicalType::Array => Box::new(ListAllocator::default()),
            LogicalType::Struct => Box::new(StructAllocator::default()),
            LogicalType::Map => Box::new(MapAllocator::new(AllocatorType {
                logical_type: self.map_value_type,
                map_value_type: LogicalType::String,
            })),
            LogicalType::Union => Box::new(UnionAllocator::default()),
        }
    }
}

/// Materialize `block` into a standalone Arrow array.
pub fn load_arrow(
    block: &EncodedColumnBlock,
    schema: Option<&ColumnSchema>,
    options: LoaderOptions,
) -> Result<ArrayRef> {
    let mut root = AllocatorType::for_block(block, schema, &options)?.allocate();
    ArrowLoaderFactory::new(root.as_mut(), 0, options)
        .with_schema(schema)
        .load(block)?;
    root.finish()
}
