#![forbid(unsafe_code)]

//! The loader protocol shared by every backend.
//!
//! A loader is a single-use builder for one column block. Callers drive it with per-row
//! setters (or per-dictionary-entry / per-group operations for the encoded variants), then
//! call [`ColumnLoader::finish`] and [`ColumnLoader::build`].
//!
//! Scalar setters default to storing null: a setter that has no meaning for the
//! destination, or a value that does not fit it, degrades to an absent row. Operations that
//! belong to a different variant entirely (dictionary calls on a sequential loader,
//! `load_child` on a scalar loader, `set_null` on a run-length array loader) fail with
//! [`LoadError::UnsupportedOperation`].

mod dispatch;

pub use dispatch::select_variant;
pub(crate) use dispatch::{spread_child_schema, target_type};

use crate::block::EncodedColumnBlock;
use crate::codec;
use crate::error::{LoadError, Result};
use crate::types::LogicalType;
use crate::value::{ByteSlice, Value};
use bytes::Bytes;

/// Behavioral strategy of a loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoaderVariant {
    Sequential,
    Constant,
    Dictionary,
    RunLengthArray,
    Null,
    Array,
    Struct,
    Map,
    Union,
}

pub type BoxedLoader<'a, O> = Box<dyn ColumnLoader<Output = O> + 'a>;

pub trait ColumnLoader {
    type Output;

    fn variant(&self) -> LoaderVariant;

    fn logical_type(&self) -> LogicalType;

    /// Number of rows this loader materializes. Fixed at construction.
    fn load_size(&self) -> u32;

    /// `true` only for the null variant: the caller may skip driving the loader.
    fn is_loading_skipped(&self) -> bool {
        false
    }

    fn set_null(&mut self, index: u32) -> Result<()>;

    fn set_boolean(&mut self, index: u32, _value: bool) -> Result<()> {
        self.set_null(index)
    }

    fn set_byte(&mut self, index: u32, _value: i8) -> Result<()> {
        self.set_null(index)
    }

    fn set_short(&mut self, index: u32, _value: i16) -> Result<()> {
        self.set_null(index)
    }

    fn set_integer(&mut self, index: u32, _value: i32) -> Result<()> {
        self.set_null(index)
    }

    fn set_long(&mut self, index: u32, _value: i64) -> Result<()> {
        self.set_null(index)
    }

    fn set_float(&mut self, index: u32, _value: f32) -> Result<()> {
        self.set_null(index)
    }

    fn set_double(&mut self, index: u32, _value: f64) -> Result<()> {
        self.set_null(index)
    }

    /// Bytes value taken from `buffer[start..start + length]`.
    fn set_bytes(&mut self, index: u32, _buffer: &Bytes, _start: usize, _length: usize) -> Result<()> {
        self.set_null(index)
    }

    /// UTF-8 value taken from `buffer[start..start + length]`.
    fn set_string(&mut self, index: u32, _buffer: &Bytes, _start: usize, _length: usize) -> Result<()> {
        self.set_null(index)
    }

    // Constant variant.

    fn set_const(&mut self, _value: Value) -> Result<()> {
        Err(LoadError::unsupported("set_const", self.variant()))
    }

    fn set_const_null(&mut self) -> Result<()> {
        Err(LoadError::unsupported("set_const_null", self.variant()))
    }

    fn set_const_from_boolean(&mut self, value: bool) -> Result<()> {
        self.set_const(Value::Boolean(value))
    }

    fn set_const_from_byte(&mut self, value: i8) -> Result<()> {
        self.set_const(Value::Byte(value))
    }

    fn set_const_from_short(&mut self, value: i16) -> Result<()> {
        self.set_const(Value::Short(value))
    }

    fn set_const_from_integer(&mut self, value: i32) -> Result<()> {
        self.set_const(Value::Integer(value))
    }

    fn set_const_from_long(&mut self, value: i64) -> Result<()> {
        self.set_const(Value::Long(value))
    }

    fn set_const_from_float(&mut self, value: f32) -> Result<()> {
        self.set_const(Value::Float(value))
    }

    fn set_const_from_double(&mut self, value: f64) -> Result<()> {
        self.set_const(Value::Double(value))
    }

    fn set_const_from_bytes(&mut self, buffer: &Bytes, start: usize, length: usize) -> Result<()> {
        self.set_const(Value::Bytes(slice_of(buffer, start, length)?))
    }

    fn set_const_from_string(&mut self, buffer: &Bytes, start: usize, length: usize) -> Result<()> {
        self.set_const(Value::String(slice_of(buffer, start, length)?))
    }

    // Dictionary variant.

    fn create_dictionary(&mut self, _size: u32) -> Result<()> {
        Err(LoadError::unsupported("create_dictionary", self.variant()))
    }

    fn set_value_to_dic(&mut self, _dic_index: u32, _value: Value) -> Result<()> {
        Err(LoadError::unsupported("set_value_to_dic", self.variant()))
    }

    fn set_null_to_dic(&mut self, _dic_index: u32) -> Result<()> {
        Err(LoadError::unsupported("set_null_to_dic", self.variant()))
    }

    fn set_boolean_to_dic(&mut self, dic_index: u32, value: bool) -> Result<()> {
        self.set_value_to_dic(dic_index, Value::Boolean(value))
    }

    fn set_byte_to_dic(&mut self, dic_index: u32, value: i8) -> Result<()> {
        self.set_value_to_dic(dic_index, Value::Byte(value))
    }

    fn set_short_to_dic(&mut self, dic_index: u32, value: i16) -> Result<()> {
        self.set_value_to_dic(dic_index, Value::Short(value))
    }

    fn set_integer_to_dic(&mut self, dic_index: u32, value: i32) -> Result<()> {
        self.set_value_to_dic(dic_index, Value::Integer(value))
    }

    fn set_long_to_dic(&mut self, dic_index: u32, value: i64) -> Result<()> {
        self.set_value_to_dic(dic_index, Value::Long(value))
    }

    fn set_float_to_dic(&mut self, dic_index: u32, value: f32) -> Result<()> {
        self.set_value_to_dic(dic_index, Value::Float(value))
    }

    fn set_double_to_dic(&mut self, dic_index: u32, value: f64) -> Result<()> {
        self.set_value_to_dic(dic_index, Value::Double(value))
    }

    fn set_bytes_to_dic(
        &mut self,
        dic_index: u32,
        buffer: &Bytes,
        start: usize,
        length: usize,
    ) -> Result<()> {
        self.set_value_to_dic(dic_index, Value::Bytes(slice_of(buffer, start, length)?))
    }

    fn set_string_to_dic(
        &mut self,
        dic_index: u32,
        buffer: &Bytes,
        start: usize,
        length: usize,
    ) -> Result<()> {
        self.set_value_to_dic(dic_index, Value::String(slice_of(buffer, start, length)?))
    }

    /// Row `index` takes the dictionary entry `dic_index`. A null entry yields a null row.
    fn set_dictionary_index(&mut self, _index: u32, _dic_index: u32) -> Result<()> {
        Err(LoadError::unsupported("set_dictionary_index", self.variant()))
    }

    // Array variants.

    /// Row `index` is the child range `[start, start + length)`.
    fn set_array_index(&mut self, _index: u32, _start: u32, _length: u32) -> Result<()> {
        Err(LoadError::unsupported("set_array_index", self.variant()))
    }

    fn set_null_and_repetitions(
        &mut self,
        _start_index: u32,
        _repetitions: u32,
        _row_group_index: u32,
    ) -> Result<()> {
        Err(LoadError::unsupported("set_null_and_repetitions", self.variant()))
    }

    /// Rows `[start_index, start_index + repetitions)` share row group `row_group_index`,
    /// backed by child rows `[row_group_start, row_group_start + row_group_length)`.
    fn set_row_group_index_and_repetitions(
        &mut self,
        _start_index: u32,
        _repetitions: u32,
        _row_group_index: u32,
        _row_group_start: u32,
        _row_group_length: u32,
    ) -> Result<()> {
        Err(LoadError::unsupported(
            "set_row_group_index_and_repetitions",
            self.variant(),
        ))
    }

    // Containers.

    fn load_child(&mut self, _child: &EncodedColumnBlock, _child_load_size: u32) -> Result<()> {
        Err(LoadError::unsupported("load_child", self.variant()))
    }

    /// Publish row `index` of the already loaded `logical_type` child as the union's row.
    fn set_index_and_column_type(&mut self, _index: u32, _logical_type: LogicalType) -> Result<()> {
        Err(LoadError::unsupported("set_index_and_column_type", self.variant()))
    }

    /// Seal the loader. Calling it again is a no-op.
    fn finish(&mut self) -> Result<()>;

    /// Hand over the materialized output. Fails with [`LoadError::NotFinished`] before
    /// [`ColumnLoader::finish`].
    fn build(self: Box<Self>) -> Result<Self::Output>;
}

/// Creates loaders for blocks and drives them to completion.
pub trait LoaderFactory {
    type Output;

    fn create(
        &mut self,
        block: &EncodedColumnBlock,
        load_size: u32,
    ) -> Result<BoxedLoader<'_, Self::Output>>;

    fn load(&mut self, block: &EncodedColumnBlock) -> Result<Self::Output> {
        let load_size = block.resolve_load_size()?;
        self.load_with_size(block, load_size)
    }

    fn load_with_size(&mut self, block: &EncodedColumnBlock, load_size: u32) -> Result<Self::Output> {
        let expected = block.resolve_load_size()?;
        if block.repetitions.is_some() && load_size != expected {
            return Err(LoadError::invalid_block(format!(
                "column `{}`: requested load size {load_size} but repetitions expand to {expected}",
                block.name
            )));
        }
        if load_size < block.row_count && block.repetitions.is_none() {
            return Err(LoadError::invalid_block(format!(
                "column `{}`: load size {load_size} is smaller than row count {}",
                block.name, block.row_count
            )));
        }

        let mut loader = self.create(block, load_size)?;
        if !loader.is_loading_skipped() {
            codec::drive(block, loader.as_mut())?;
        }
        loader.finish()?;
        loader.build()
    }
}

/// Tracks the finish/build lifecycle every loader shares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Lifecycle {
    finished: bool,
}

impl Lifecycle {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(LoadError::Finished);
        }
        Ok(())
    }

    pub(crate) fn ensure_finished(&self) -> Result<()> {
        if !self.finished {
            return Err(LoadError::NotFinished);
        }
        Ok(())
    }

    /// Returns `true` the first time it is called.
    pub(crate) fn finish(&mut self) -> bool {
        !std::mem::replace(&mut self.finished, true)
    }
}

pub(crate) fn check_row(index: u32, len: u32) -> Result<()> {
    if index >= len {
        return Err(LoadError::RowOutOfBounds { index, len });
    }
    Ok(())
}

pub(crate) fn check_run(start: u32, repetitions: u32, len: u32) -> Result<()> {
    match start.checked_add(repetitions) {
        Some(end) if end <= len => Ok(()),
        _ => Err(LoadError::RowOutOfBounds {
            index: start.saturating_add(repetitions),
            len,
        }),
    }
}

pub(crate) fn slice_of(buffer: &Bytes, start: usize, length: usize) -> Result<ByteSlice> {
    ByteSlice::view(buffer, start, length).ok_or_else(|| {
        LoadError::invalid_block(format!(
            "byte range {start}+{length} exceeds a buffer of {} bytes",
            buffer.len()
        ))
    })
}
