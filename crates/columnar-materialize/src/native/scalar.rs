#![forbid(unsafe_code)]

use super::NativeColumn;
use crate::bitmap::BitVec;
use crate::dictionary::Dictionary;
use crate::error::{LoadError, Result};
use crate::loader::{check_row, slice_of, ColumnLoader, Lifecycle, LoaderVariant};
use crate::options::LoaderOptions;
use crate::sink::{coerce, store_coerced, RowSink};
use crate::types::{EncodingKind, LogicalType};
use crate::value::{ByteSlice, Primitive, Value};
use bytes::Bytes;
use std::ops::Range;
use std::sync::Arc;

/// Rows to extract in a bulk [`ScalarColumn::fill`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowSelection<'a> {
    Range(Range<u32>),
    Indices(&'a [u32]),
}

impl RowSelection<'_> {
    pub fn len(&self) -> usize {
        match self {
            RowSelection::Range(r) => r.len(),
            RowSelection::Indices(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rows(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            RowSelection::Range(r) => Box::new(r.clone()),
            RowSelection::Indices(rows) => Box::new(rows.iter().copied()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum TypedValues {
    Boolean(Vec<bool>),
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Integer(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<ByteSlice>),
    Bytes(Vec<ByteSlice>),
}

impl TypedValues {
    fn new(ty: LogicalType, len: usize) -> Option<Self> {
        Some(match ty {
            LogicalType::Boolean => TypedValues::Boolean(vec![false; len]),
            LogicalType::Byte => TypedValues::Byte(vec![0; len]),
            LogicalType::Short => TypedValues::Short(vec![0; len]),
            LogicalType::Integer => TypedValues::Integer(vec![0; len]),
            LogicalType::Long => TypedValues::Long(vec![0; len]),
            LogicalType::Float => TypedValues::Float(vec![0.0; len]),
            LogicalType::Double => TypedValues::Double(vec![0.0; len]),
            LogicalType::String => TypedValues::String(vec![ByteSlice::default(); len]),
            LogicalType::Bytes => TypedValues::Bytes(vec![ByteSlice::default(); len]),
            _ => return None,
        })
    }

    /// Returns `false` when `value` does not match the vector's type.
    fn set(&mut self, row: usize, value: Value) -> bool {
        match (self, value) {
            (TypedValues::Boolean(v), Value::Boolean(x)) => v[row] = x,
            (TypedValues::Byte(v), Value::Byte(x)) => v[row] = x,
            (TypedValues::Short(v), Value::Short(x)) => v[row] = x,
            (TypedValues::Integer(v), Value::Integer(x)) => v[row] = x,
            (TypedValues::Long(v), Value::Long(x)) => v[row] = x,
            (TypedValues::Float(v), Value::Float(x)) => v[row] = x,
            (TypedValues::Double(v), Value::Double(x)) => v[row] = x,
            (TypedValues::String(v), Value::String(x)) => v[row] = x,
            (TypedValues::Bytes(v), Value::Bytes(x)) => v[row] = x,
            _ => return false,
        }
        true
    }

    fn get(&self, row: usize) -> Option<Value> {
        Some(match self {
            TypedValues::Boolean(v) => Value::Boolean(*v.get(row)?),
            TypedValues::Byte(v) => Value::Byte(*v.get(row)?),
            TypedValues::Short(v) => Value::Short(*v.get(row)?),
            TypedValues::Integer(v) => Value::Integer(*v.get(row)?),
            TypedValues::Long(v) => Value::Long(*v.get(row)?),
            TypedValues::Float(v) => Value::Float(*v.get(row)?),
            TypedValues::Double(v) => Value::Double(*v.get(row)?),
            TypedValues::String(v) => Value::String(v.get(row)?.clone()),
            TypedValues::Bytes(v) => Value::Bytes(v.get(row)?.clone()),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
enum CellManager {
    Sequential {
        values: TypedValues,
        validity: BitVec,
    },
    Constant {
        value: Option<Value>,
        /// Rows explicitly nulled on top of the constant.
        nulls: Option<BitVec>,
    },
    Dictionary {
        dictionary: Arc<Dictionary>,
        indices: Vec<u32>,
        validity: BitVec,
    },
}

/// A scalar column backed by one of the cell managers.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarColumn {
    logical_type: LogicalType,
    len: u32,
    cells: CellManager,
}

impl ScalarColumn {
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Encoding of the backing cell manager.
    pub fn encoding(&self) -> EncodingKind {
        match self.cells {
            CellManager::Sequential { .. } => EncodingKind::Sequential,
            CellManager::Constant { .. } => EncodingKind::Constant,
            CellManager::Dictionary { .. } => EncodingKind::Dictionary,
        }
    }

    pub fn dictionary(&self) -> Option<&Arc<Dictionary>> {
        match &self.cells {
            CellManager::Dictionary { dictionary, .. } => Some(dictionary),
            _ => None,
        }
    }

    /// Cell at `row`; `None` for null rows and rows past the end.
    pub fn get(&self, row: u32) -> Option<Value> {
        if row >= self.len {
            return None;
        }
        let slot = row as usize;
        match &self.cells {
            CellManager::Sequential { values, validity } => {
                if validity.get(slot) {
                    values.get(slot)
                } else {
                    None
                }
            }
            CellManager::Constant { value, nulls } => {
                if nulls.as_ref().is_some_and(|n| n.get(slot)) {
                    return None;
                }
                value.clone()
            }
            CellManager::Dictionary {
                dictionary,
                indices,
                validity,
            } => {
                if !validity.get(slot) {
                    return None;
                }
                dictionary.get(indices[slot]).cloned()
            }
        }
    }

    pub fn is_null(&self, row: u32) -> bool {
        if row >= self.len {
            return true;
        }
        let slot = row as usize;
        match &self.cells {
            CellManager::Sequential { validity, .. } => !validity.get(slot),
            CellManager::Constant { value, nulls } => {
                value.is_none() || nulls.as_ref().is_some_and(|n| n.get(slot))
            }
            CellManager::Dictionary {
                dictionary,
                indices,
                validity,
            } => !validity.get(slot) || dictionary.is_null(indices[slot]),
        }
    }

    pub fn null_count(&self) -> usize {
        (0..self.len).filter(|&row| self.is_null(row)).count()
    }

    /// Extract `rows` into `out` as `T`, converting with the checked rules.
    ///
    /// Null rows, rows past the end and cells that do not convert to `T` become `None`.
    /// Writes at most `out.len()` rows and returns how many were written.
    pub fn fill<T: Primitive>(&self, rows: RowSelection<'_>, out: &mut [Option<T>]) -> usize {
        let mut written = 0;
        for (slot, row) in out.iter_mut().zip(rows.rows()) {
            *slot = self.get(row).as_ref().and_then(T::from_value);
            written += 1;
        }
        written
    }
}

fn value_vector(target: LogicalType, len: u32) -> Result<TypedValues> {
    TypedValues::new(target, len as usize)
        .ok_or_else(|| LoadError::invalid_block(format!("{target:?} is not a scalar type")))
}

fn take_slice(options: &LoaderOptions, buffer: &Bytes, start: usize, length: usize) -> Result<ByteSlice> {
    let slice = slice_of(buffer, start, length)?;
    Ok(if options.copy_byte_slices {
        slice.to_owned_copy()
    } else {
        slice
    })
}

/// One value (or null) per row.
pub(crate) struct SequentialLoader {
    target: LogicalType,
    len: u32,
    values: TypedValues,
    validity: BitVec,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl SequentialLoader {
    pub(crate) fn new(target: LogicalType, len: u32, options: LoaderOptions) -> Result<Self> {
        Ok(Self {
            target,
            len,
            values: value_vector(target, len)?,
            validity: BitVec::with_len_all_false(len as usize),
            options,
            lifecycle: Lifecycle::default(),
        })
    }

    fn store(&mut self, index: u32, value: Value) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let (target, validate) = (self.target, self.options.validate_utf8);
        store_coerced(self, target, validate, index, value)
    }
}

impl RowSink for SequentialLoader {
    fn write_value(&mut self, index: u32, value: Value) -> Result<()> {
        check_row(index, self.len)?;
        let slot = index as usize;
        let stored = self.values.set(slot, value);
        self.validity.set(slot, stored);
        Ok(())
    }

    fn write_null(&mut self, index: u32) -> Result<()> {
        check_row(index, self.len)?;
        self.validity.set(index as usize, false);
        Ok(())
    }
}

impl ColumnLoader for SequentialLoader {
    type Output = NativeColumn;

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Sequential
    }

    fn logical_type(&self) -> LogicalType {
        self.target
    }

    fn load_size(&self) -> u32 {
        self.len
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.write_null(index)
    }

    fn set_boolean(&mut self, index: u32, value: bool) -> Result<()> {
        self.store(index, Value::Boolean(value))
    }

    fn set_byte(&mut self, index: u32, value: i8) -> Result<()> {
        self.store(index, Value::Byte(value))
    }

    fn set_short(&mut self, index: u32, value: i16) -> Result<()> {
        self.store(index, Value::Short(value))
    }

    fn set_integer(&mut self, index: u32, value: i32) -> Result<()> {
        self.store(index, Value::Integer(value))
    }

    fn set_long(&mut self, index: u32, value: i64) -> Result<()> {
        self.store(index, Value::Long(value))
    }

    fn set_float(&mut self, index: u32, value: f32) -> Result<()> {
        self.store(index, Value::Float(value))
    }

    fn set_double(&mut self, index: u32, value: f64) -> Result<()> {
        self.store(index, Value::Double(value))
    }

    fn set_bytes(&mut self, index: u32, buffer: &Bytes, start: usize, length: usize) -> Result<()> {
        let slice = take_slice(&self.options, buffer, start, length)?;
        self.store(index, Value::Bytes(slice))
    }

    fn set_string(&mut self, index: u32, buffer: &Bytes, start: usize, length: usize) -> Result<()> {
        let slice = take_slice(&self.options, buffer, start, length)?;
        self.store(index, Value::String(slice))
    }

    fn finish(&mut self) -> Result<()> {
        self.lifecycle.finish();
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<NativeColumn> {
        self.lifecycle.ensure_finished()?;
        Ok(NativeColumn::Scalar(ScalarColumn {
            logical_type: self.target,
            len: self.len,
            cells: CellManager::Sequential {
                values: self.values,
                validity: self.validity,
            },
        }))
    }
}

/// One value broadcast to every row without per-row storage.
pub(crate) struct ConstantLoader {
    target: LogicalType,
    len: u32,
    value: Option<Value>,
    nulls: Option<BitVec>,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl ConstantLoader {
    pub(crate) fn new(target: LogicalType, len: u32, options: LoaderOptions) -> Self {
        Self {
            target,
            len,
            value: None,
            nulls: None,
            options,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for ConstantLoader {
    type Output = NativeColumn;

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Constant
    }

    fn logical_type(&self) -> LogicalType {
        self.target
    }

    fn load_size(&self) -> u32 {
        self.len
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        check_row(index, self.len)?;
        let len = self.len as usize;
        self.nulls
            .get_or_insert_with(|| BitVec::with_len_all_false(len))
            .set(index as usize, true);
        Ok(())
    }

    fn set_const(&mut self, value: Value) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let value = match value {
            Value::String(s) if self.options.copy_byte_slices => Value::String(s.to_owned_copy()),
            Value::Bytes(b) if self.options.copy_byte_slices => Value::Bytes(b.to_owned_copy()),
            other => other,
        };
        self.value = coerce(value, self.target, self.options.validate_utf8);
        Ok(())
    }

    fn set_const_null(&mut self) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.value = None;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.lifecycle.finish();
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<NativeColumn> {
        self.lifecycle.ensure_finished()?;
        Ok(NativeColumn::Scalar(ScalarColumn {
            logical_type: self.target,
            len: self.len,
            cells: CellManager::Constant {
                value: self.value,
                nulls: self.nulls,
            },
        }))
    }
}

/// Dictionary entries plus one index per row.
pub(crate) struct DictionaryLoader {
    target: LogicalType,
    len: u32,
    dictionary: Option<Dictionary>,
    indices: Vec<u32>,
    validity: BitVec,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl DictionaryLoader {
    pub(crate) fn new(target: LogicalType, len: u32, options: LoaderOptions) -> Self {
        Self {
            target,
            len,
            dictionary: None,
            indices: vec![0; len as usize],
            validity: BitVec::with_len_all_false(len as usize),
            options,
            lifecycle: Lifecycle::default(),
        }
    }

    fn dictionary_mut(&mut self) -> Result<&mut Dictionary> {
        self.lifecycle.ensure_open()?;
        self.dictionary.as_mut().ok_or(LoadError::DictionaryNotCreated)
    }
}

impl ColumnLoader for DictionaryLoader {
    type Output = NativeColumn;

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Dictionary
    }

    fn logical_type(&self) -> LogicalType {
        self.target
    }

    fn load_size(&self) -> u32 {
        self.len
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        check_row(index, self.len)?;
        self.validity.set(index as usize, false);
        Ok(())
    }

    fn create_dictionary(&mut self, size: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.dictionary = Some(Dictionary::new(size));
        Ok(())
    }

    fn set_value_to_dic(&mut self, dic_index: u32, value: Value) -> Result<()> {
        let (target, options) = (self.target, self.options);
        let dictionary = self.dictionary_mut()?;
        let value = match value {
            Value::String(s) if options.copy_byte_slices => Value::String(s.to_owned_copy()),
            Value::Bytes(b) if options.copy_byte_slices => Value::Bytes(b.to_owned_copy()),
            other => other,
        };
        match coerce(value, target, options.validate_utf8) {
            Some(value) => dictionary.set(dic_index, value),
            None => dictionary.set_null(dic_index),
        }
    }

    fn set_null_to_dic(&mut self, dic_index: u32) -> Result<()> {
        self.dictionary_mut()?.set_null(dic_index)
    }

    fn set_dictionary_index(&mut self, index: u32, dic_index: u32) -> Result<()> {
        let len = self.len;
        let dictionary = self.dictionary_mut()?;
        check_row(index, len)?;
        if dic_index >= dictionary.len() {
            return Err(LoadError::DictionaryIndexOutOfBounds {
                index: dic_index,
                len: dictionary.len(),
            });
        }
        let valid = !dictionary.is_null(dic_index);
        let slot = index as usize;
        self.indices[slot] = dic_index;
        self.validity.set(slot, valid);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.lifecycle.finish();
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<NativeColumn> {
        self.lifecycle.ensure_finished()?;
        Ok(NativeColumn::Scalar(ScalarColumn {
            logical_type: self.target,
            len: self.len,
            cells: CellManager::Dictionary {
                dictionary: Arc::new(self.dictionary.unwrap_or_else(|| Dictionary::new(0))),
                indices: self.indices,
                validity: self.validity,
            },
        }))
    }
}
