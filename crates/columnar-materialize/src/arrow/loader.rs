#![forbid(unsafe_code)]

use super::{AllocatorType, MemoryAllocator};
use crate::bitmap::BitVec;
use crate::block::EncodedColumnBlock;
use crate::dictionary::Dictionary;
use crate::error::{LoadError, Result};
use crate::loader::{
    check_row, select_variant, spread_child_schema, BoxedLoader, ColumnLoader, Lifecycle,
    LoaderFactory, LoaderVariant,
};
use crate::options::LoaderOptions;
use crate::sink::{broadcast, coerce, resolve_dictionary_row, store_coerced, GroupSpan, RowSink, RunTable};
use crate::types::{ColumnSchema, LogicalType};
use crate::value::Value;
use bytes::Bytes;

/// Creates loaders that write rows `[base, base + load_size)` of an allocator node.
///
/// Container loaders create child factories over the node's children, so nested blocks are
/// written into the same tree.
pub struct ArrowLoaderFactory<'a, 's> {
    dst: &'a mut dyn MemoryAllocator,
    base: u32,
    options: LoaderOptions,
    schema: Option<&'s ColumnSchema>,
}

impl<'a, 's> ArrowLoaderFactory<'a, 's> {
    pub fn new(dst: &'a mut dyn MemoryAllocator, base: u32, options: LoaderOptions) -> Self {
        Self {
            dst,
            base,
            options,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: Option<&'s ColumnSchema>) -> Self {
        self.schema = schema;
        self
    }
}

/// Node types a loader variant can write into.
fn accepts(variant: LoaderVariant, node: LogicalType) -> bool {
    match variant {
        LoaderVariant::Null => true,
        LoaderVariant::Sequential | LoaderVariant::Constant | LoaderVariant::Dictionary => {
            node.is_scalar()
        }
        LoaderVariant::Array | LoaderVariant::RunLengthArray => node == LogicalType::Array,
        LoaderVariant::Struct | LoaderVariant::Map => {
            matches!(node, LogicalType::Struct | LogicalType::Map)
        }
        LoaderVariant::Union => node == LogicalType::Union,
    }
}

impl LoaderFactory for ArrowLoaderFactory<'_, '_> {
    type Output = ();

    fn create(&mut self, block: &EncodedColumnBlock, load_size: u32) -> Result<BoxedLoader<'_, ()>> {
        if self.base.checked_add(load_size).is_none() {
            return Err(LoadError::invalid_block(format!(
                "column `{}`: {load_size} rows at offset {} overflow the node",
                block.name, self.base
            )));
        }
        let variant = select_variant(block, self.schema)?;
        let node = self.dst.logical_type();
        if !accepts(variant, node) {
            return Err(LoadError::invalid_block(format!(
                "column `{}`: {variant:?} loader cannot write into a {node:?} node",
                block.name
            )));
        }

        let options = self.options;
        let schema = self.schema;
        let target = Target {
            dst: &mut *self.dst,
            base: self.base,
            len: load_size,
        };
        let loader: BoxedLoader<'_, ()> = match variant {
            LoaderVariant::Sequential => Box::new(SequentialLoader::new(target, options)),
            LoaderVariant::Constant => Box::new(ConstantLoader::new(target, options)),
            LoaderVariant::Dictionary => Box::new(DictionaryLoader::new(target, options)),
            LoaderVariant::Null => Box::new(NullLoader::new(target)),
            LoaderVariant::Array => Box::new(ArrayLoader::new(
                target,
                schema.and_then(ColumnSchema::element),
                options,
            )),
            LoaderVariant::RunLengthArray => Box::new(RunLengthArrayLoader::new(
                target,
                schema.and_then(ColumnSchema::element),
                options,
            )),
            LoaderVariant::Struct => {
                Box::new(SpreadLoader::new(LogicalType::Struct, target, schema, options))
            }
            LoaderVariant::Map => {
                Box::new(SpreadLoader::new(LogicalType::Map, target, schema, options))
            }
            LoaderVariant::Union => Box::new(UnionLoader::new(target, schema, options)),
        };
        Ok(loader)
    }
}

fn load_into(
    dst: &mut dyn MemoryAllocator,
    base: u32,
    options: LoaderOptions,
    schema: Option<&ColumnSchema>,
    child: &EncodedColumnBlock,
    child_load_size: u32,
) -> Result<()> {
    log::trace!(
        "loading child `{}` into {:?} node at row {base} ({child_load_size} rows)",
        child.name,
        dst.logical_type()
    );
    ArrowLoaderFactory::new(dst, base, options)
        .with_schema(schema)
        .load_with_size(child, child_load_size)
}

/// Window `[base, base + len)` of a destination node, addressed from 0.
struct Target<'d> {
    dst: &'d mut dyn MemoryAllocator,
    base: u32,
    len: u32,
}

impl Target<'_> {
    fn row(&self, index: u32) -> Result<u32> {
        check_row(index, self.len)?;
        Ok(self.base + index)
    }

    /// Make the node cover the whole window; rows never written stay null.
    fn seal(&mut self) {
        self.dst.set_value_count(self.base + self.len);
    }
}

impl RowSink for Target<'_> {
    fn write_value(&mut self, index: u32, value: Value) -> Result<()> {
        let row = self.row(index)?;
        self.dst.set_value(row, value)
    }

    fn write_null(&mut self, index: u32) -> Result<()> {
        let row = self.row(index)?;
        self.dst.set_null(row)
    }
}

struct SequentialLoader<'d> {
    target: Target<'d>,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl<'d> SequentialLoader<'d> {
    fn new(target: Target<'d>, options: LoaderOptions) -> Self {
        Self {
            target,
            options,
            lifecycle: Lifecycle::default(),
        }
    }

    fn store(&mut self, index: u32, value: Value) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let ty = self.target.dst.logical_type();
        store_coerced(&mut self.target, ty, self.options.validate_utf8, index, value)
    }
}

impl ColumnLoader for SequentialLoader<'_> {
    type Output = ();

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Sequential
    }

    fn logical_type(&self) -> LogicalType {
        self.target.dst.logical_type()
    }

    fn load_size(&self) -> u32 {
        self.target.len
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.target.write_null(index)
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
        let slice = crate::loader::slice_of(buffer, start, length)?;
        self.store(index, Value::Bytes(slice))
    }

    fn set_string(&mut self, index: u32, buffer: &Bytes, start: usize, length: usize) -> Result<()> {
        let slice = crate::loader::slice_of(buffer, start, length)?;
        self.store(index, Value::String(slice))
    }

    fn finish(&mut self) -> Result<()> {
        if self.lifecycle.finish() {
            self.target.seal();
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        self.lifecycle.ensure_finished()
    }
}

/// Buffers the constant and writes it to every row at finish.
struct ConstantLoader<'d> {
    target: Target<'d>,
    value: Option<Value>,
    nulls: Option<BitVec>,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl<'d> ConstantLoader<'d> {
    fn new(target: Target<'d>, options: LoaderOptions) -> Self {
        Self {
            target,
            value: None,
            nulls: None,
            options,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for ConstantLoader<'_> {
    type Output = ();

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Constant
    }

    fn logical_type(&self) -> LogicalType {
        self.target.dst.logical_type()
    }

    fn load_size(&self) -> u32 {
        self.target.len
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        check_row(index, self.target.len)?;
        let len = self.target.len as usize;
        self.nulls
            .get_or_insert_with(|| BitVec::with_len_all_false(len))
            .set(index as usize, true);
        Ok(())
    }

    fn set_const(&mut self, value: Value) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.value = coerce(value, self.target.dst.logical_type(), self.options.validate_utf8);
        Ok(())
    }

    fn set_const_null(&mut self) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.value = None;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.lifecycle.finish() {
            return Ok(());
        }
        let len = self.target.len;
        match &self.nulls {
            None => broadcast(&mut self.target, len, self.value.as_ref())?,
            Some(nulls) => {
                for index in 0..len {
                    match &self.value {
                        Some(v) if !nulls.get(index as usize) => {
                            self.target.write_value(index, v.clone())?
                        }
                        _ => self.target.write_null(index)?,
                    }
                }
            }
        }
        self.target.seal();
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        self.lifecycle.ensure_finished()
    }
}

/// Resolves each row through a loader-local dictionary; the node only sees plain values.
struct DictionaryLoader<'d> {
    target: Target<'d>,
    dictionary: Option<Dictionary>,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl<'d> DictionaryLoader<'d> {
    fn new(target: Target<'d>, options: LoaderOptions) -> Self {
        Self {
            target,
            dictionary: None,
            options,
            lifecycle: Lifecycle::default(),
        }
    }

    fn dictionary_mut(&mut self) -> Result<&mut Dictionary> {
        self.lifecycle.ensure_open()?;
        self.dictionary.as_mut().ok_or(LoadError::DictionaryNotCreated)
    }
}

impl ColumnLoader for DictionaryLoader<'_> {
    type Output = ();

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Dictionary
    }

    fn logical_type(&self) -> LogicalType {
        self.target.dst.logical_type()
    }

    fn load_size(&self) -> u32 {
        self.target.len
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.target.write_null(index)
    }

    fn create_dictionary(&mut self, size: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.dictionary = Some(Dictionary::new(size));
        Ok(())
    }

    fn set_value_to_dic(&mut self, dic_index: u32, value: Value) -> Result<()> {
        let target = self.target.dst.logical_type();
        let validate = self.options.validate_utf8;
        let dictionary = self.dictionary_mut()?;
        match coerce(value, target, validate) {
            Some(value) => dictionary.set(dic_index, value),
            None => dictionary.set_null(dic_index),
        }
    }

    fn set_null_to_dic(&mut self, dic_index: u32) -> Result<()> {
        self.dictionary_mut()?.set_null(dic_index)
    }

    fn set_dictionary_index(&mut self, index: u32, dic_index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let dictionary = self.dictionary.as_ref().ok_or(LoadError::DictionaryNotCreated)?;
        resolve_dictionary_row(&mut self.target, dictionary, index, dic_index)
    }

    fn finish(&mut self) -> Result<()> {
        if self.lifecycle.finish() {
            self.target.seal();
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        self.lifecycle.ensure_finished()
    }
}

/// Fills its window with nulls without reading the block.
struct NullLoader<'d> {
    target: Target<'d>,
    lifecycle: Lifecycle,
}

impl<'d> NullLoader<'d> {
    fn new(target: Target<'d>) -> Self {
        Self {
            target,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for NullLoader<'_> {
    type Output = ();

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Null
    }

    fn logical_type(&self) -> LogicalType {
        LogicalType::Null
    }

    fn load_size(&self) -> u32 {
        self.target.len
    }

    fn is_loading_skipped(&self) -> bool {
        true
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.target.write_null(index)
    }

    fn finish(&mut self) -> Result<()> {
        if self.lifecycle.finish() {
            self.target.dst.set_nulls(self.target.base, self.target.len)?;
            self.target.seal();
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        self.lifecycle.ensure_finished()
    }
}

/// Rows of the list node's element child this loader appended.
#[derive(Clone, Copy, Debug, Default)]
struct ChildWindow {
    origin: Option<u32>,
    rows: u32,
}

impl ChildWindow {
    /// Load `child` at the end of the element node, keeping this loader's rows contiguous.
    fn append(
        &mut self,
        list: &mut dyn MemoryAllocator,
        element: Option<&ColumnSchema>,
        options: LoaderOptions,
        child: &EncodedColumnBlock,
        child_load_size: u32,
    ) -> Result<()> {
        let kind = AllocatorType::for_block(child, element, &options)?;
        let node = list.array_child(kind)?;
        let base = node.len();
        let origin = *self.origin.get_or_insert(base);
        if base != origin + self.rows {
            return Err(LoadError::invalid_block(format!(
                "array child `{}` would not be contiguous in the element node",
                child.name
            )));
        }
        self.rows = self.rows.checked_add(child_load_size).ok_or_else(|| {
            LoadError::invalid_block("array child rows exceed u32".to_string())
        })?;
        load_into(node, base, options, element, child, child_load_size)
    }

    fn covers(&self, span: GroupSpan) -> bool {
        span.start
            .checked_add(span.length)
            .is_some_and(|end| end <= self.rows)
    }

    fn publish(&self, list: &mut dyn MemoryAllocator, row: u32, span: GroupSpan) -> Result<()> {
        let start = self.origin.unwrap_or(0) + span.start;
        list.set_array_index(row, start, span.length)
    }
}

/// Per-row spans, written to the list node at finish once the child is complete.
struct ArrayLoader<'d, 's> {
    target: Target<'d>,
    element: Option<&'s ColumnSchema>,
    child: ChildWindow,
    spans: Vec<Option<GroupSpan>>,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl<'d, 's> ArrayLoader<'d, 's> {
    fn new(target: Target<'d>, element: Option<&'s ColumnSchema>, options: LoaderOptions) -> Self {
        Self {
            spans: vec![None; target.len as usize],
            target,
            element,
            child: ChildWindow::default(),
            options,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for ArrayLoader<'_, '_> {
    type Output = ();

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Array
    }

    fn logical_type(&self) -> LogicalType {
        LogicalType::Array
    }

    fn load_size(&self) -> u32 {
        self.target.len
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        check_row(index, self.target.len)?;
        self.spans[index as usize] = None;
        Ok(())
    }

    fn set_array_index(&mut self, index: u32, start: u32, length: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        check_row(index, self.target.len)?;
        self.spans[index as usize] = Some(GroupSpan { start, length });
        Ok(())
    }

    fn load_child(&mut self, child: &EncodedColumnBlock, child_load_size: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.child.append(
            &mut *self.target.dst,
            self.element,
            self.options,
            child,
            child_load_size,
        )
    }

    fn finish(&mut self) -> Result<()> {
        if !self.lifecycle.finish() {
            return Ok(());
        }
        for (row, span) in self.spans.iter().enumerate() {
            let row = self.target.base + row as u32;
            match span {
                Some(span) if !self.child.covers(*span) => {
                    return Err(LoadError::invalid_block(format!(
                        "array row {row} spans {}+{} past {} child rows",
                        span.start, span.length, self.child.rows
                    )));
                }
                Some(span) => self.child.publish(&mut *self.target.dst, row, *span)?,
                None => self.target.dst.set_null(row)?,
            }
        }
        self.target.seal();
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        self.lifecycle.ensure_finished()
    }
}

/// Run-length rows expanded into list spans: rows of one row group point at the same child
/// range and the list node gathers it once per row.
struct RunLengthArrayLoader<'d, 's> {
    target: Target<'d>,
    element: Option<&'s ColumnSchema>,
    child: ChildWindow,
    runs: RunTable,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl<'d, 's> RunLengthArrayLoader<'d, 's> {
    fn new(target: Target<'d>, element: Option<&'s ColumnSchema>, options: LoaderOptions) -> Self {
        Self {
            runs: RunTable::new(target.len),
            target,
            element,
            child: ChildWindow::default(),
            options,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for RunLengthArrayLoader<'_, '_> {
    type Output = ();

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::RunLengthArray
    }

    fn logical_type(&self) -> LogicalType {
        LogicalType::Array
    }

    fn load_size(&self) -> u32 {
        self.target.len
    }

    fn set_null(&mut self, _index: u32) -> Result<()> {
        Err(LoadError::unsupported("set_null", LoaderVariant::RunLengthArray))
    }

    fn set_null_and_repetitions(
        &mut self,
        start_index: u32,
        repetitions: u32,
        _row_group_index: u32,
    ) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.runs.push_null(start_index, repetitions)
    }

    fn set_row_group_index_and_repetitions(
        &mut self,
        start_index: u32,
        repetitions: u32,
        row_group_index: u32,
        row_group_start: u32,
        row_group_length: u32,
    ) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.runs.push_group(
            start_index,
            repetitions,
            row_group_index,
            GroupSpan {
                start: row_group_start,
                length: row_group_length,
            },
        )
    }

    fn load_child(&mut self, child: &EncodedColumnBlock, child_load_size: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.child.append(
            &mut *self.target.dst,
            self.element,
            self.options,
            child,
            child_load_size,
        )
    }

    fn finish(&mut self) -> Result<()> {
        if !self.lifecycle.finish() {
            return Ok(());
        }
        self.runs.seal()?;
        for (group, span) in self.runs.groups() {
            if !self.child.covers(span) {
                return Err(LoadError::invalid_block(format!(
                    "row group {group} spans {}+{} past {} child rows",
                    span.start, span.length, self.child.rows
                )));
            }
        }
        log::trace!(
            "expanding {} run-length rows over {} row groups",
            self.runs.len(),
            self.runs.group_count()
        );
        for (row, span) in self.runs.rows().enumerate() {
            let row = self.target.base + row as u32;
            match span {
                Some(span) => self.child.publish(&mut *self.target.dst, row, span)?,
                None => self.target.dst.set_null(row)?,
            }
        }
        self.target.seal();
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        self.lifecycle.ensure_finished()
    }
}

/// Struct and map blocks: children are written into named child nodes over the same rows.
struct SpreadLoader<'d, 's> {
    shape: LogicalType,
    target: Target<'d>,
    schema: Option<&'s ColumnSchema>,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl<'d, 's> SpreadLoader<'d, 's> {
    fn new(
        shape: LogicalType,
        target: Target<'d>,
        schema: Option<&'s ColumnSchema>,
        options: LoaderOptions,
    ) -> Self {
        Self {
            shape,
            target,
            schema,
            options,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for SpreadLoader<'_, '_> {
    type Output = ();

    fn variant(&self) -> LoaderVariant {
        if self.shape == LogicalType::Map {
            LoaderVariant::Map
        } else {
            LoaderVariant::Struct
        }
    }

    fn logical_type(&self) -> LogicalType {
        self.shape
    }

    fn load_size(&self) -> u32 {
        self.target.len
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.target.write_null(index)
    }

    fn load_child(&mut self, child: &EncodedColumnBlock, child_load_size: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        if child_load_size != self.target.len {
            return Err(LoadError::ChildLengthMismatch {
                child: child.name.clone(),
                expected: self.target.len,
                actual: child_load_size,
            });
        }
        let Some(schema) = spread_child_schema(self.schema, self.shape, &child.name) else {
            log::debug!("dropping child `{}`: not in the declared schema", child.name);
            return Ok(());
        };
        let kind = AllocatorType::for_block(child, schema, &self.options)?;
        let node = self.target.dst.child(&child.name, kind)?;
        load_into(node, self.target.base, self.options, schema, child, child_load_size)
    }

    fn finish(&mut self) -> Result<()> {
        if self.lifecycle.finish() {
            self.target.seal();
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        self.lifecycle.ensure_finished()
    }
}

/// Sparse union: every member node covers the union's rows.
struct UnionLoader<'d, 's> {
    target: Target<'d>,
    schema: Option<&'s ColumnSchema>,
    members: Vec<LogicalType>,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl<'d, 's> UnionLoader<'d, 's> {
    fn new(target: Target<'d>, schema: Option<&'s ColumnSchema>, options: LoaderOptions) -> Self {
        Self {
            target,
            schema,
            members: Vec::new(),
            options,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for UnionLoader<'_, '_> {
    type Output = ();

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Union
    }

    fn logical_type(&self) -> LogicalType {
        LogicalType::Union
    }

    fn load_size(&self) -> u32 {
        self.target.len
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.target.write_null(index)
    }

    fn load_child(&mut self, child: &EncodedColumnBlock, child_load_size: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        if child_load_size != self.target.len {
            return Err(LoadError::ChildLengthMismatch {
                child: child.name.clone(),
                expected: self.target.len,
                actual: child_load_size,
            });
        }
        let member = child.logical_type;
        let schema = self
            .schema
            .and_then(|s| s.children.iter().find(|c| c.logical_type == member));
        let kind = AllocatorType::new(member, schema, &self.options);
        let node = self.target.dst.union_child(kind)?;
        load_into(node, self.target.base, self.options, schema, child, child_load_size)?;
        if !self.members.contains(&member) {
            self.members.push(member);
        }
        Ok(())
    }

    fn set_index_and_column_type(&mut self, index: u32, logical_type: LogicalType) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let row = self.target.row(index)?;
        if !self.members.contains(&logical_type) {
            return Err(LoadError::UnionChildMissing { logical_type });
        }
        self.target.dst.set_union_type(row, logical_type)
    }

    fn finish(&mut self) -> Result<()> {
        if self.lifecycle.finish() {
            self.target.seal();
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<()> {
        self.lifecycle.ensure_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::{PrimitiveAllocator, StructAllocator, UnionAllocator};
    use crate::codec::BlockWriter;
    use arrow_array::cast::AsArray;
    use arrow_array::types::{Int32Type, Int8Type};
    use arrow_array::Array;
    use pretty_assertions::assert_eq;

    #[test]
    fn blocks_land_at_their_base_offset() {
        let mut node = PrimitiveAllocator::<Int32Type>::default();
        let first = BlockWriter::sequential("n", LogicalType::Integer, &[Some(Value::Integer(1))]).unwrap();
        let second = BlockWriter::constant("n", LogicalType::Integer, Some(&Value::Integer(9)), 2).unwrap();
        ArrowLoaderFactory::new(&mut node, 0, LoaderOptions::default())
            .load(&first)
            .unwrap();
        ArrowLoaderFactory::new(&mut node, 1, LoaderOptions::default())
            .load(&second)
            .unwrap();

        let array = node.finish().unwrap();
        assert_eq!(array.as_primitive::<Int32Type>().values().to_vec(), vec![1, 9, 9]);
        assert_eq!(array.null_count(), 0);
    }

    #[test]
    fn values_narrowed_to_the_node_type() {
        let mut node = PrimitiveAllocator::<Int8Type>::default();
        let block = BlockWriter::sequential(
            "n",
            LogicalType::Integer,
            &[Some(Value::Integer(300)), Some(Value::Integer(-4))],
        )
        .unwrap();
        ArrowLoaderFactory::new(&mut node, 0, LoaderOptions::default())
            .load(&block)
            .unwrap();

        let array = node.finish().unwrap();
        let array = array.as_primitive::<Int8Type>();
        assert!(array.is_null(0));
        assert_eq!(array.value(1), -4);
    }

    #[test]
    fn container_blocks_reject_scalar_nodes() {
        let mut node = PrimitiveAllocator::<Int32Type>::default();
        let child = BlockWriter::sequential("x", LogicalType::Integer, &[Some(Value::Integer(1))]).unwrap();
        let block = BlockWriter::structure("s", vec![child], &[true]).unwrap();
        let err = ArrowLoaderFactory::new(&mut node, 0, LoaderOptions::default())
            .load(&block)
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidBlock(_)));
    }

    #[test]
    fn struct_rows_are_valid_unless_nulled() {
        let mut node = StructAllocator::default();
        let child = BlockWriter::sequential(
            "x",
            LogicalType::Integer,
            &[Some(Value::Integer(1)), None, Some(Value::Integer(3))],
        )
        .unwrap();
        let block = BlockWriter::structure("s", vec![child], &[true, true, false]).unwrap();
        ArrowLoaderFactory::new(&mut node, 0, LoaderOptions::default())
            .load(&block)
            .unwrap();

        let array = node.finish().unwrap();
        let array = array.as_struct();
        assert_eq!(array.len(), 3);
        assert!(array.is_valid(1));
        assert!(array.is_null(2));
        assert!(array.column(0).is_null(1));
    }

    #[test]
    fn union_type_needs_loaded_member() {
        let mut node = UnionAllocator::default();
        let mut factory = ArrowLoaderFactory::new(&mut node, 0, LoaderOptions::default());
        let block = BlockWriter::union("u", Vec::new(), &[None]).unwrap();
        let mut loader = factory.create(&block, 1).unwrap();
        assert!(matches!(
            loader.set_index_and_column_type(0, LogicalType::Integer),
            Err(LoadError::UnionChildMissing {
                logical_type: LogicalType::Integer
            })
        ));
    }
}
