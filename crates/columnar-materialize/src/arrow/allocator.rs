#![forbid(unsafe_code)]

use super::{AllocatorType, MemoryAllocator};
use crate::bitmap::BitVec;
use crate::error::{LoadError, Result};
use crate::types::LogicalType;
use crate::value::Value;
use arrow_array::builder::{BinaryBuilder, StringBuilder};
use arrow_array::types::{
    ArrowPrimitiveType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
};
use arrow_array::{
    make_array, Array, ArrayRef, BooleanArray, ListArray, MapArray, NullArray, PrimitiveArray,
    StructArray, UnionArray,
};
use arrow_buffer::{BooleanBuffer, NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow_data::transform::MutableArrayData;
use arrow_data::ArrayData;
use arrow_schema::{DataType, Field, Fields, UnionFields};
use std::sync::Arc;

fn null_buffer(validity: &BitVec) -> Option<NullBuffer> {
    (validity.count_zeros() > 0).then(|| NullBuffer::new(validity.iter().collect::<BooleanBuffer>()))
}

fn slot(index: u32) -> usize {
    index as usize
}

fn offsets(lengths: Vec<usize>) -> Result<OffsetBuffer<i32>> {
    let total: usize = lengths.iter().sum();
    if i32::try_from(total).is_err() {
        return Err(LoadError::invalid_block(format!(
            "{total} child rows overflow 32-bit list offsets"
        )));
    }
    Ok(OffsetBuffer::from_lengths(lengths))
}

fn check_child_len(name: &str, expected: usize, array: &ArrayRef) -> Result<()> {
    if array.len() != expected {
        return Err(LoadError::ChildLengthMismatch {
            child: name.to_string(),
            expected: expected as u32,
            actual: array.len() as u32,
        });
    }
    Ok(())
}

/// Arrow primitive types with a matching scalar [`LogicalType`].
pub trait PrimitiveSlot: ArrowPrimitiveType {
    const LOGICAL_TYPE: LogicalType;

    fn extract(value: &Value) -> Option<Self::Native>;
}

macro_rules! primitive_slot {
    ($($arrow:ty => $variant:ident),* $(,)?) => {
        $(
            impl PrimitiveSlot for $arrow {
                const LOGICAL_TYPE: LogicalType = LogicalType::$variant;

                fn extract(value: &Value) -> Option<Self::Native> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

primitive_slot!(
    Int8Type => Byte,
    Int16Type => Short,
    Int32Type => Integer,
    Int64Type => Long,
    Float32Type => Float,
    Float64Type => Double,
);

/// Fixed-width numeric node.
#[derive(Debug)]
pub struct PrimitiveAllocator<T: PrimitiveSlot> {
    values: Vec<T::Native>,
    validity: BitVec,
}

impl<T: PrimitiveSlot> Default for PrimitiveAllocator<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            validity: BitVec::new(),
        }
    }
}

impl<T: PrimitiveSlot> PrimitiveAllocator<T> {
    fn grow(&mut self, rows: usize) {
        if rows > self.values.len() {
            self.values.resize(rows, T::Native::default());
            self.validity.grow(rows, false);
        }
    }
}

impl<T: PrimitiveSlot> MemoryAllocator for PrimitiveAllocator<T> {
    fn logical_type(&self) -> LogicalType {
        T::LOGICAL_TYPE
    }

    fn len(&self) -> u32 {
        self.values.len() as u32
    }

    fn set_value_count(&mut self, count: u32) {
        self.grow(slot(count));
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.grow(slot(index) + 1);
        self.validity.set(slot(index), false);
        Ok(())
    }

    fn set_nulls(&mut self, start: u32, count: u32) -> Result<()> {
        self.grow(slot(start) + slot(count));
        self.validity.set_range(slot(start), slot(count), false);
        Ok(())
    }

    fn set_value(&mut self, index: u32, value: Value) -> Result<()> {
        let Some(v) = T::extract(&value) else {
            return self.set_null(index);
        };
        self.grow(slot(index) + 1);
        self.values[slot(index)] = v;
        self.validity.set(slot(index), true);
        Ok(())
    }

    fn finish(&mut self) -> Result<ArrayRef> {
        let values = std::mem::take(&mut self.values);
        let validity = std::mem::take(&mut self.validity);
        let array = PrimitiveArray::<T>::try_new(ScalarBuffer::from(values), null_buffer(&validity))?;
        Ok(Arc::new(array))
    }
}

/// Bit-packed boolean node.
#[derive(Debug, Default)]
pub struct BooleanAllocator {
    values: BitVec,
    validity: BitVec,
}

impl BooleanAllocator {
    fn grow(&mut self, rows: usize) {
        self.values.grow(rows, false);
        self.validity.grow(rows, false);
    }
}

impl MemoryAllocator for BooleanAllocator {
    fn logical_type(&self) -> LogicalType {
        LogicalType::Boolean
    }

    fn len(&self) -> u32 {
        self.values.len() as u32
    }

    fn set_value_count(&mut self, count: u32) {
        self.grow(slot(count));
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.grow(slot(index) + 1);
        self.validity.set(slot(index), false);
        Ok(())
    }

    fn set_nulls(&mut self, start: u32, count: u32) -> Result<()> {
        self.grow(slot(start) + slot(count));
        self.validity.set_range(slot(start), slot(count), false);
        Ok(())
    }

    fn set_value(&mut self, index: u32, value: Value) -> Result<()> {
        let Value::Boolean(v) = value else {
            return self.set_null(index);
        };
        self.grow(slot(index) + 1);
        self.values.set(slot(index), v);
        self.validity.set(slot(index), true);
        Ok(())
    }

    fn finish(&mut self) -> Result<ArrayRef> {
        let values = std::mem::take(&mut self.values);
        let validity = std::mem::take(&mut self.validity);
        let array = BooleanArray::new(values.iter().collect(), null_buffer(&validity));
        Ok(Arc::new(array))
    }
}

/// Variable-width node for `Utf8` or `Binary`. Values are copied out of the block payload.
#[derive(Debug)]
pub struct ByteArrayAllocator {
    logical_type: LogicalType,
    values: Vec<Option<Box<[u8]>>>,
}

impl ByteArrayAllocator {
    /// `logical_type` is `String` or `Bytes`.
    pub fn new(logical_type: LogicalType) -> Self {
        Self {
            logical_type,
            values: Vec::new(),
        }
    }

    fn grow(&mut self, rows: usize) {
        if rows > self.values.len() {
            self.values.resize(rows, None);
        }
    }
}

impl MemoryAllocator for ByteArrayAllocator {
    fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    fn len(&self) -> u32 {
        self.values.len() as u32
    }

    fn set_value_count(&mut self, count: u32) {
        self.grow(slot(count));
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.grow(slot(index) + 1);
        self.values[slot(index)] = None;
        Ok(())
    }

    fn set_value(&mut self, index: u32, value: Value) -> Result<()> {
        let bytes = match (&value, self.logical_type) {
            (Value::String(s), LogicalType::String) | (Value::Bytes(s), LogicalType::Bytes) => {
                Box::from(s.as_bytes())
            }
            _ => return self.set_null(index),
        };
        self.grow(slot(index) + 1);
        self.values[slot(index)] = Some(bytes);
        Ok(())
    }

    fn finish(&mut self) -> Result<ArrayRef> {
        let values = std::mem::take(&mut self.values);
        let data_len = values.iter().flatten().map(|v| v.len()).sum();
        if self.logical_type == LogicalType::String {
            let mut builder = StringBuilder::with_capacity(values.len(), data_len);
            for value in &values {
                match value.as_deref().map(std::str::from_utf8) {
                    Some(Ok(s)) => builder.append_value(s),
                    Some(Err(_)) => {
                        log::trace!("invalid UTF-8 string stored as null");
                        builder.append_null();
                    }
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        } else {
            let mut builder = BinaryBuilder::with_capacity(values.len(), data_len);
            for value in &values {
                builder.append_option(value.as_deref());
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}

/// Node for an entirely absent column.
#[derive(Debug, Default)]
pub struct NullAllocator {
    len: u32,
}

impl MemoryAllocator for NullAllocator {
    fn logical_type(&self) -> LogicalType {
        LogicalType::Null
    }

    fn len(&self) -> u32 {
        self.len
    }

    fn set_value_count(&mut self, count: u32) {
        self.len = self.len.max(count);
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.set_value_count(index.saturating_add(1));
        Ok(())
    }

    fn set_nulls(&mut self, start: u32, count: u32) -> Result<()> {
        self.set_value_count(start.saturating_add(count));
        Ok(())
    }

    fn set_value(&mut self, index: u32, _value: Value) -> Result<()> {
        self.set_null(index)
    }

    fn finish(&mut self) -> Result<ArrayRef> {
        Ok(Arc::new(NullArray::new(std::mem::take(&mut self.len) as usize)))
    }
}

/// `List` node: per-row spans into one element node.
#[derive(Default)]
pub struct ListAllocator {
    spans: Vec<(u32, u32)>,
    validity: BitVec,
    child: Option<Box<dyn MemoryAllocator>>,
}

impl ListAllocator {
    fn grow(&mut self, rows: usize) {
        if rows > self.spans.len() {
            self.spans.resize(rows, (0, 0));
            self.validity.grow(rows, false);
        }
    }
}

impl MemoryAllocator for ListAllocator {
    fn logical_type(&self) -> LogicalType {
        LogicalType::Array
    }

    fn len(&self) -> u32 {
        self.spans.len() as u32
    }

    fn set_value_count(&mut self, count: u32) {
        self.grow(slot(count));
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.grow(slot(index) + 1);
        self.validity.set(slot(index), false);
        Ok(())
    }

    fn set_nulls(&mut self, start: u32, count: u32) -> Result<()> {
        self.grow(slot(start) + slot(count));
        self.validity.set_range(slot(start), slot(count), false);
        Ok(())
    }

    fn set_array_index(&mut self, index: u32, start: u32, length: u32) -> Result<()> {
        self.grow(slot(index) + 1);
        self.spans[slot(index)] = (start, length);
        self.validity.set(slot(index), true);
        Ok(())
    }

    fn array_child(&mut self, kind: AllocatorType) -> Result<&mut dyn MemoryAllocator> {
        Ok(self.child.get_or_insert_with(|| kind.allocate()).as_mut())
    }

    /// Rows whose spans tile the child from row 0 share the child's buffers; otherwise the
    /// spans are gathered into a new values array.
    fn finish(&mut self) -> Result<ArrayRef> {
        let child: ArrayRef = match self.child.as_mut() {
            Some(child) => child.finish()?,
            None => Arc::new(NullArray::new(0)),
        };
        let spans = std::mem::take(&mut self.spans);
        let validity = std::mem::take(&mut self.validity);

        let mut lengths = Vec::with_capacity(spans.len());
        let mut contiguous = true;
        let mut next = 0usize;
        for (row, &(start, length)) in spans.iter().enumerate() {
            if !validity.get(row) {
                lengths.push(0);
                continue;
            }
            let (start, length) = (start as usize, length as usize);
            if start + length > child.len() {
                return Err(LoadError::invalid_block(format!(
                    "list row {row} spans {start}+{length} past {} child rows",
                    child.len()
                )));
            }
            contiguous &= start == next;
            next = start + length;
            lengths.push(length);
        }
        let offsets = offsets(lengths)?;
        let total = *offsets.last().unwrap_or(&0) as usize;

        let values = if contiguous {
            child.slice(0, total)
        } else {
            let data = child.to_data();
            let mut gather = MutableArrayData::new(vec![&data], false, total);
            for (row, &(start, length)) in spans.iter().enumerate() {
                if validity.get(row) && length > 0 {
                    gather.extend(0, start as usize, (start + length) as usize);
                }
            }
            make_array(gather.freeze())
        };

        let field = Arc::new(Field::new("item", values.data_type().clone(), true));
        let array = ListArray::try_new(field, offsets, values, null_buffer(&validity))?;
        Ok(Arc::new(array))
    }
}

/// `Struct` node: named children sharing the node's rows.
#[derive(Default)]
pub struct StructAllocator {
    validity: BitVec,
    children: Vec<(String, Box<dyn MemoryAllocator>)>,
}

impl MemoryAllocator for StructAllocator {
    fn logical_type(&self) -> LogicalType {
        LogicalType::Struct
    }

    fn len(&self) -> u32 {
        self.validity.len() as u32
    }

    fn set_value_count(&mut self, count: u32) {
        self.validity.grow(slot(count), true);
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.validity.grow(slot(index) + 1, true);
        self.validity.set(slot(index), false);
        Ok(())
    }

    fn child(&mut self, name: &str, kind: AllocatorType) -> Result<&mut dyn MemoryAllocator> {
        let pos = match self.children.iter().position(|(n, _)| n == name) {
            Some(pos) => pos,
            None => {
                self.children.push((name.to_string(), kind.allocate()));
                self.children.len() - 1
            }
        };
        Ok(self.children[pos].1.as_mut())
    }

    fn finish(&mut self) -> Result<ArrayRef> {
        let validity = std::mem::take(&mut self.validity);
        let len = validity.len();
        let nulls = null_buffer(&validity);
        if self.children.is_empty() {
            return Ok(Arc::new(StructArray::new_empty_fields(len, nulls)));
        }

        let mut fields = Vec::with_capacity(self.children.len());
        let mut arrays = Vec::with_capacity(self.children.len());
        for (name, child) in &mut self.children {
            child.set_value_count(len as u32);
            let array = child.finish()?;
            check_child_len(name, len, &array)?;
            fields.push(Field::new(name.as_str(), array.data_type().clone(), true));
            arrays.push(array);
        }
        self.children.clear();
        Ok(Arc::new(StructArray::try_new(Fields::from(fields), arrays, nulls)?))
    }
}

/// `Map` node: every named child is a key, and a row's entries are the keys whose child
/// value is present in that row.
pub struct MapAllocator {
    value_type: AllocatorType,
    validity: BitVec,
    keys: Vec<(String, Box<dyn MemoryAllocator>)>,
}

impl MapAllocator {
    pub fn new(value_type: AllocatorType) -> Self {
        Self {
            value_type,
            validity: BitVec::new(),
            keys: Vec::new(),
        }
    }
}

impl MemoryAllocator for MapAllocator {
    fn logical_type(&self) -> LogicalType {
        LogicalType::Map
    }

    fn len(&self) -> u32 {
        self.validity.len() as u32
    }

    fn set_value_count(&mut self, count: u32) {
        self.validity.grow(slot(count), true);
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.validity.grow(slot(index) + 1, true);
        self.validity.set(slot(index), false);
        Ok(())
    }

    /// Map values all share the node's value type; `_kind` is ignored.
    fn child(&mut self, name: &str, _kind: AllocatorType) -> Result<&mut dyn MemoryAllocator> {
        let pos = match self.keys.iter().position(|(n, _)| n == name) {
            Some(pos) => pos,
            None => {
                self.keys.push((name.to_string(), self.value_type.allocate()));
                self.keys.len() - 1
            }
        };
        Ok(self.keys[pos].1.as_mut())
    }

    fn finish(&mut self) -> Result<ArrayRef> {
        let validity = std::mem::take(&mut self.validity);
        let len = validity.len();

        let mut names = Vec::with_capacity(self.keys.len());
        let mut columns = Vec::with_capacity(self.keys.len());
        for (name, child) in &mut self.keys {
            child.set_value_count(len as u32);
            let array = child.finish()?;
            check_child_len(name, len, &array)?;
            names.push(std::mem::take(name));
            columns.push(array);
        }
        self.keys.clear();

        let value_type = match columns.first() {
            Some(first) => first.data_type().clone(),
            None => self.value_type.allocate().finish()?.data_type().clone(),
        };
        if let Some(other) = columns.iter().find(|c| *c.data_type() != value_type) {
            return Err(LoadError::invalid_block(format!(
                "map values disagree on type: {value_type} vs {}",
                other.data_type()
            )));
        }

        let datas: Vec<ArrayData> = columns.iter().map(|c| c.to_data()).collect();
        let mut gather = (!datas.is_empty())
            .then(|| MutableArrayData::new(datas.iter().collect(), false, len));
        let mut keys = StringBuilder::new();
        let mut lengths = Vec::with_capacity(len);
        for row in 0..len {
            if !validity.get(row) {
                lengths.push(0);
                continue;
            }
            let mut entries = 0;
            for (key, column) in columns.iter().enumerate() {
                if column.is_valid(row) {
                    keys.append_value(&names[key]);
                    if let Some(gather) = gather.as_mut() {
                        gather.extend(key, row, row + 1);
                    }
                    entries += 1;
                }
            }
            lengths.push(entries);
        }
        let values = match gather {
            Some(gather) => make_array(gather.freeze()),
            None => arrow_array::new_empty_array(&value_type),
        };

        let entry_fields = Fields::from(vec![
            Field::new("keys", DataType::Utf8, false),
            Field::new("values", value_type, true),
        ]);
        let entries = StructArray::try_new(
            entry_fields.clone(),
            vec![Arc::new(keys.finish()) as ArrayRef, values],
            None,
        )?;
        let field = Arc::new(Field::new("entries", DataType::Struct(entry_fields), false));
        let array = MapArray::try_new(
            field,
            offsets(lengths)?,
            entries,
            null_buffer(&validity),
            false,
        )?;
        Ok(Arc::new(array))
    }
}

/// Sparse `Union` node. Type id 0 is a `Null` member that backs null rows and `Null`
/// typed rows; other members get ids in the order they are first requested.
#[derive(Default)]
pub struct UnionAllocator {
    types: Vec<Option<LogicalType>>,
    members: Vec<(LogicalType, Box<dyn MemoryAllocator>)>,
}

impl UnionAllocator {
    fn grow(&mut self, rows: usize) {
        if rows > self.types.len() {
            self.types.resize(rows, None);
        }
    }
}

impl MemoryAllocator for UnionAllocator {
    fn logical_type(&self) -> LogicalType {
        LogicalType::Union
    }

    fn len(&self) -> u32 {
        self.types.len() as u32
    }

    fn set_value_count(&mut self, count: u32) {
        self.grow(slot(count));
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.grow(slot(index) + 1);
        self.types[slot(index)] = None;
        Ok(())
    }

    fn union_child(&mut self, kind: AllocatorType) -> Result<&mut dyn MemoryAllocator> {
        let pos = match self
            .members
            .iter()
            .position(|(t, _)| *t == kind.logical_type)
        {
            Some(pos) => pos,
            None => {
                if self.members.len() >= i8::MAX as usize {
                    return Err(LoadError::invalid_block("too many union members".to_string()));
                }
                self.members.push((kind.logical_type, kind.allocate()));
                self.members.len() - 1
            }
        };
        Ok(self.members[pos].1.as_mut())
    }

    fn set_union_type(&mut self, index: u32, logical_type: LogicalType) -> Result<()> {
        if !self.members.iter().any(|(t, _)| *t == logical_type) {
            return Err(LoadError::UnionChildMissing { logical_type });
        }
        self.grow(slot(index) + 1);
        self.types[slot(index)] = Some(logical_type);
        Ok(())
    }

    fn finish(&mut self) -> Result<ArrayRef> {
        let types = std::mem::take(&mut self.types);
        // Null members fold into the reserved type id 0 child.
        let members: Vec<_> = std::mem::take(&mut self.members)
            .into_iter()
            .filter(|(t, _)| *t != LogicalType::Null)
            .collect();
        let len = types.len();

        let type_ids: Vec<i8> = types
            .iter()
            .map(|t| match t {
                Some(t) => members
                    .iter()
                    .position(|(m, _)| m == t)
                    .map_or(0, |pos| pos as i8 + 1),
                None => 0,
            })
            .collect();

        let mut fields = vec![Field::new("null", DataType::Null, true)];
        let mut children: Vec<ArrayRef> = vec![Arc::new(NullArray::new(len))];
        for (member, mut node) in members {
            node.set_value_count(len as u32);
            let array = node.finish()?;
            let name = format!("{member:?}").to_lowercase();
            check_child_len(&name, len, &array)?;
            fields.push(Field::new(name, array.data_type().clone(), true));
            children.push(array);
        }
        let union_fields = UnionFields::new(0..fields.len() as i8, fields);
        let array = UnionArray::try_new(union_fields, ScalarBuffer::from(type_ids), None, children)?;
        Ok(Arc::new(array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::cast::AsArray;
    use arrow_array::types::Int32Type;
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive_rows_default_to_null() {
        let mut node = PrimitiveAllocator::<Int16Type>::default();
        node.set_value(2, Value::Short(7)).unwrap();
        node.set_value(0, Value::Integer(1)).unwrap();
        node.set_value_count(4);
        let array = node.finish().unwrap();
        let array = array.as_primitive::<Int16Type>();
        assert_eq!(array.len(), 4);
        assert_eq!(array.null_count(), 3);
        assert_eq!(array.value(2), 7);
    }

    #[test]
    fn list_gathers_non_contiguous_spans() {
        let mut list = ListAllocator::default();
        let kind = AllocatorType {
            logical_type: LogicalType::Integer,
            map_value_type: LogicalType::String,
        };
        let child = list.array_child(kind).unwrap();
        for (i, v) in [10, 20, 30].into_iter().enumerate() {
            child.set_value(i as u32, Value::Integer(v)).unwrap();
        }
        list.set_array_index(0, 1, 2).unwrap();
        list.set_null(1).unwrap();
        list.set_array_index(2, 1, 2).unwrap();

        let array = list.finish().unwrap();
        let array = array.as_list::<i32>();
        assert_eq!(array.len(), 3);
        assert!(array.is_null(1));
        let row = array.value(2);
        assert_eq!(row.as_primitive::<Int32Type>().values().to_vec(), vec![20, 30]);
        assert_eq!(array.values().len(), 4);
    }

    #[test]
    fn list_spans_past_child_are_rejected() {
        let mut list = ListAllocator::default();
        list.set_array_index(0, 0, 1).unwrap();
        assert!(matches!(list.finish(), Err(LoadError::InvalidBlock(_))));
    }

    #[test]
    fn union_requires_member() {
        let mut union = UnionAllocator::default();
        assert!(matches!(
            union.set_union_type(0, LogicalType::Long),
            Err(LoadError::UnionChildMissing { .. })
        ));
    }

    #[test]
    fn null_union_member_uses_reserved_child() {
        let mut union = UnionAllocator::default();
        let kind = |logical_type| AllocatorType {
            logical_type,
            map_value_type: LogicalType::String,
        };
        union.union_child(kind(LogicalType::Null)).unwrap();
        union
            .union_child(kind(LogicalType::Integer))
            .unwrap()
            .set_value(1, Value::Integer(5))
            .unwrap();
        union.set_union_type(0, LogicalType::Null).unwrap();
        union.set_union_type(1, LogicalType::Integer).unwrap();

        let array = union.finish().unwrap();
        let array = array.as_union();
        assert_eq!(array.type_ids().to_vec(), vec![0, 1]);
        let DataType::Union(fields, _) = array.data_type() else {
            panic!("not a union: {:?}", array.data_type());
        };
        let names: Vec<_> = fields.iter().map(|(_, f)| f.name().clone()).collect();
        assert_eq!(names, vec!["null".to_string(), "integer".to_string()]);
        assert_eq!(array.value(1).as_primitive::<Int32Type>().value(0), 5);
    }

    #[test]
    fn scalar_nodes_reject_container_operations() {
        let mut node = BooleanAllocator::default();
        assert!(matches!(
            node.set_array_index(0, 0, 0),
            Err(LoadError::UnsupportedAllocation {
                operation: "set_array_index",
                logical_type: LogicalType::Boolean
            })
        ));
    }
}
