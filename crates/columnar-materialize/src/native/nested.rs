#![forbid(unsafe_code)]

use super::{NativeColumn, NativeLoaderFactory};
use crate::bitmap::BitVec;
use crate::block::EncodedColumnBlock;
use crate::error::{LoadError, Result};
use crate::loader::{
    check_row, spread_child_schema, ColumnLoader, Lifecycle, LoaderFactory, LoaderVariant,
};
use crate::options::LoaderOptions;
use crate::sink::{GroupSpan, RunTable};
use crate::types::{ColumnSchema, LogicalType};
use crate::value::Value;
use std::sync::Arc;

/// Child rows of an array column, possibly loaded in several segments.
///
/// Segments are addressed as one concatenated row space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChildSegments {
    segments: Vec<Arc<NativeColumn>>,
    /// `offsets[i]` is the first row of segment `i`; the last entry is the total length.
    offsets: Vec<u32>,
}

impl ChildSegments {
    fn push(&mut self, column: NativeColumn) -> Result<()> {
        let start = self.len();
        let end = start.checked_add(column.len()).ok_or_else(|| {
            LoadError::invalid_block("array child rows exceed u32".to_string())
        })?;
        if self.offsets.is_empty() {
            self.offsets.push(0);
        }
        self.offsets.push(end);
        self.segments.push(Arc::new(column));
        Ok(())
    }

    pub fn len(&self) -> u32 {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn segments(&self) -> &[Arc<NativeColumn>] {
        &self.segments
    }

    /// Segment holding `row` and the row's offset inside it.
    pub fn locate(&self, row: u32) -> Option<(&Arc<NativeColumn>, u32)> {
        if row >= self.len() {
            return None;
        }
        let segment = self.offsets.partition_point(|&start| start <= row) - 1;
        Some((&self.segments[segment], row - self.offsets[segment]))
    }

    pub fn get(&self, row: u32) -> Option<Value> {
        let (column, local) = self.locate(row)?;
        column.get(local)
    }

    fn covers(&self, start: u32, length: u32) -> bool {
        start.checked_add(length).is_some_and(|end| end <= self.len())
    }

    fn collect(&self, start: u32, length: u32) -> Vec<Option<Value>> {
        (start..start + length).map(|row| self.get(row)).collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum ArrayRows {
    Spans {
        spans: Vec<GroupSpan>,
        validity: BitVec,
    },
    Runs(RunTable),
}

/// An array column: each valid row is a span of child rows.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayColumn {
    len: u32,
    child: ChildSegments,
    rows: ArrayRows,
}

impl ArrayColumn {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn child(&self) -> &ChildSegments {
        &self.child
    }

    /// Whether the column was materialized from run-length groups.
    pub fn is_run_length(&self) -> bool {
        matches!(self.rows, ArrayRows::Runs(_))
    }

    /// Child span of `row`, or `None` for null rows.
    pub fn span(&self, row: u32) -> Option<GroupSpan> {
        if row >= self.len {
            return None;
        }
        match &self.rows {
            ArrayRows::Spans { spans, validity } => {
                validity.get(row as usize).then(|| spans[row as usize])
            }
            ArrayRows::Runs(runs) => runs.lookup(row).map(|(_, span)| span),
        }
    }

    /// Row group backing `row` of a run-length column.
    pub fn row_group(&self, row: u32) -> Option<u32> {
        match &self.rows {
            ArrayRows::Runs(runs) => runs.lookup(row).map(|(group, _)| group),
            ArrayRows::Spans { .. } => None,
        }
    }

    /// Child column holding the whole span of `row`. Rows sharing a row group return the
    /// same allocation. `None` for null rows and for spans crossing a segment boundary.
    pub fn child_for_row(&self, row: u32) -> Option<&Arc<NativeColumn>> {
        let span = self.span(row)?;
        if span.length == 0 {
            return self.child.segments.first();
        }
        let (column, local) = self.child.locate(span.start)?;
        local
            .checked_add(span.length)
            .is_some_and(|end| end <= column.len())
            .then_some(column)
    }

    pub fn get(&self, row: u32) -> Option<Value> {
        let span = self.span(row)?;
        Some(Value::Array(self.child.collect(span.start, span.length)))
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.span(row).is_none()
    }
}

/// A struct or map column: named children sharing the parent's rows.
#[derive(Clone, Debug, PartialEq)]
pub struct StructColumn {
    len: u32,
    children: Vec<(Arc<str>, NativeColumn)>,
    validity: BitVec,
}

impl StructColumn {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &NativeColumn)> {
        self.children.iter().map(|(name, column)| (name.as_ref(), column))
    }

    pub fn child(&self, name: &str) -> Option<&NativeColumn> {
        self.children
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, column)| column)
    }

    pub fn is_null(&self, row: u32) -> bool {
        !self.validity.get_checked(row as usize).unwrap_or(false)
    }

    pub(crate) fn get_struct(&self, row: u32) -> Option<Value> {
        if self.is_null(row) {
            return None;
        }
        Some(Value::Struct(
            self.children
                .iter()
                .map(|(name, column)| (Arc::clone(name), column.get(row)))
                .collect(),
        ))
    }

    pub(crate) fn get_map(&self, row: u32) -> Option<Value> {
        if self.is_null(row) {
            return None;
        }
        Some(Value::Map(
            self.children
                .iter()
                .filter_map(|(name, column)| Some((Arc::clone(name), column.get(row)?)))
                .collect(),
        ))
    }
}

/// A union column: each row publishes one row of the child of its active type.
#[derive(Clone, Debug, PartialEq)]
pub struct UnionColumn {
    len: u32,
    children: Vec<(LogicalType, NativeColumn)>,
    types: Vec<Option<LogicalType>>,
}

impl UnionColumn {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Active member type of `row`, or `None` for null rows.
    pub fn type_of(&self, row: u32) -> Option<LogicalType> {
        self.types.get(row as usize).copied().flatten()
    }

    pub fn member(&self, logical_type: LogicalType) -> Option<&NativeColumn> {
        self.children
            .iter()
            .find(|(t, _)| *t == logical_type)
            .map(|(_, column)| column)
    }

    pub fn member_types(&self) -> impl Iterator<Item = LogicalType> + '_ {
        self.children.iter().map(|(t, _)| *t)
    }

    pub fn get(&self, row: u32) -> Option<Value> {
        self.member(self.type_of(row)?)?.get(row)
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.get(row).is_none()
    }
}

fn load_nested(
    options: LoaderOptions,
    schema: Option<&ColumnSchema>,
    child: &EncodedColumnBlock,
    child_load_size: u32,
) -> Result<NativeColumn> {
    log::trace!(
        "loading child `{}` ({:?}/{:?}, {child_load_size} rows)",
        child.name,
        child.logical_type,
        child.encoding
    );
    NativeLoaderFactory::new(options)
        .with_schema(schema)
        .load_with_size(child, child_load_size)
}

/// Per-row spans into an element child.
pub(crate) struct ArrayLoader {
    len: u32,
    element: Option<ColumnSchema>,
    child: ChildSegments,
    spans: Vec<GroupSpan>,
    validity: BitVec,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl ArrayLoader {
    pub(crate) fn new(len: u32, element: Option<ColumnSchema>, options: LoaderOptions) -> Self {
        Self {
            len,
            element,
            child: ChildSegments::default(),
            spans: vec![GroupSpan { start: 0, length: 0 }; len as usize],
            validity: BitVec::with_len_all_false(len as usize),
            options,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for ArrayLoader {
    type Output = NativeColumn;

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Array
    }

    fn logical_type(&self) -> LogicalType {
        LogicalType::Array
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

    fn set_array_index(&mut self, index: u32, start: u32, length: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        check_row(index, self.len)?;
        let slot = index as usize;
        self.spans[slot] = GroupSpan { start, length };
        self.validity.set(slot, true);
        Ok(())
    }

    fn load_child(&mut self, child: &EncodedColumnBlock, child_load_size: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let column = load_nested(self.options, self.element.as_ref(), child, child_load_size)?;
        self.child.push(column)
    }

    fn finish(&mut self) -> Result<()> {
        if !self.lifecycle.finish() {
            return Ok(());
        }
        for (row, span) in self.spans.iter().enumerate() {
            if self.validity.get(row) && !self.child.covers(span.start, span.length) {
                return Err(LoadError::invalid_block(format!(
                    "array row {row} spans {}+{} past {} child rows",
                    span.start,
                    span.length,
                    self.child.len()
                )));
            }
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<NativeColumn> {
        self.lifecycle.ensure_finished()?;
        Ok(NativeColumn::Array(ArrayColumn {
            len: self.len,
            child: self.child,
            rows: ArrayRows::Spans {
                spans: self.spans,
                validity: self.validity,
            },
        }))
    }
}

/// Runs of rows sharing row groups of one shared child.
pub(crate) struct RunLengthArrayLoader {
    element: Option<ColumnSchema>,
    child: ChildSegments,
    runs: RunTable,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl RunLengthArrayLoader {
    pub(crate) fn new(len: u32, element: Option<ColumnSchema>, options: LoaderOptions) -> Self {
        Self {
            element,
            child: ChildSegments::default(),
            runs: RunTable::new(len),
            options,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for RunLengthArrayLoader {
    type Output = NativeColumn;

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::RunLengthArray
    }

    fn logical_type(&self) -> LogicalType {
        LogicalType::Array
    }

    fn load_size(&self) -> u32 {
        self.runs.len()
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
        log::trace!("null run {start_index}+{repetitions}");
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
        log::trace!(
            "run {start_index}+{repetitions} -> group {row_group_index} \
             [{row_group_start}, +{row_group_length})"
        );
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
        let column = load_nested(self.options, self.element.as_ref(), child, child_load_size)?;
        self.child.push(column)
    }

    fn finish(&mut self) -> Result<()> {
        if !self.lifecycle.finish() {
            return Ok(());
        }
        self.runs.seal()?;
        for (group, span) in self.runs.groups() {
            if !self.child.covers(span.start, span.length) {
                return Err(LoadError::invalid_block(format!(
                    "row group {group} spans {}+{} past {} child rows",
                    span.start,
                    span.length,
                    self.child.len()
                )));
            }
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<NativeColumn> {
        self.lifecycle.ensure_finished()?;
        Ok(NativeColumn::Array(ArrayColumn {
            len: self.runs.len(),
            child: self.child,
            rows: ArrayRows::Runs(self.runs),
        }))
    }
}

/// Named children sharing the parent's rows; rows are valid unless nulled.
pub(crate) struct StructLoader {
    logical_type: LogicalType,
    len: u32,
    schema: Option<ColumnSchema>,
    children: Vec<(Arc<str>, NativeColumn)>,
    validity: BitVec,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl StructLoader {
    /// `logical_type` is `Struct` or `Map`.
    pub(crate) fn new(
        logical_type: LogicalType,
        len: u32,
        schema: Option<ColumnSchema>,
        options: LoaderOptions,
    ) -> Self {
        Self {
            logical_type,
            len,
            schema,
            children: Vec::new(),
            validity: BitVec::with_len_all_true(len as usize),
            options,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for StructLoader {
    type Output = NativeColumn;

    fn variant(&self) -> LoaderVariant {
        if self.logical_type == LogicalType::Map {
            LoaderVariant::Map
        } else {
            LoaderVariant::Struct
        }
    }

    fn logical_type(&self) -> LogicalType {
        self.logical_type
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

    fn load_child(&mut self, child: &EncodedColumnBlock, child_load_size: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let declared = spread_child_schema(self.schema.as_ref(), self.logical_type, &child.name);
        let Some(schema) = declared else {
            log::debug!("dropping child `{}`: not in the declared schema", child.name);
            return Ok(());
        };
        let column = load_nested(self.options, schema, child, child_load_size)?;
        let name: Arc<str> = Arc::from(child.name.as_str());
        match self.children.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = column,
            None => self.children.push((name, column)),
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.lifecycle.finish() {
            return Ok(());
        }
        for (name, column) in &self.children {
            if column.len() != self.len {
                return Err(LoadError::ChildLengthMismatch {
                    child: name.to_string(),
                    expected: self.len,
                    actual: column.len(),
                });
            }
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<NativeColumn> {
        self.lifecycle.ensure_finished()?;
        let column = StructColumn {
            len: self.len,
            children: self.children,
            validity: self.validity,
        };
        Ok(if self.logical_type == LogicalType::Map {
            NativeColumn::Map(column)
        } else {
            NativeColumn::Struct(column)
        })
    }
}

/// One child per member type plus the active type of each row.
///
/// Every `load_child` must happen before the `set_index_and_column_type` calls that read
/// the child.
pub(crate) struct UnionLoader {
    len: u32,
    schema: Option<ColumnSchema>,
    children: Vec<(LogicalType, NativeColumn)>,
    types: Vec<Option<LogicalType>>,
    options: LoaderOptions,
    lifecycle: Lifecycle,
}

impl UnionLoader {
    pub(crate) fn new(len: u32, schema: Option<ColumnSchema>, options: LoaderOptions) -> Self {
        Self {
            len,
            schema,
            children: Vec::new(),
            types: vec![None; len as usize],
            options,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for UnionLoader {
    type Output = NativeColumn;

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Union
    }

    fn logical_type(&self) -> LogicalType {
        LogicalType::Union
    }

    fn load_size(&self) -> u32 {
        self.len
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        check_row(index, self.len)?;
        self.types[index as usize] = None;
        Ok(())
    }

    fn load_child(&mut self, child: &EncodedColumnBlock, child_load_size: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let member = child.logical_type;
        let schema = self
            .schema
            .as_ref()
            .and_then(|s| s.children.iter().find(|c| c.logical_type == member));
        let column = load_nested(self.options, schema, child, child_load_size)?;
        match self.children.iter_mut().find(|(t, _)| *t == member) {
            Some((_, existing)) => *existing = column,
            None => self.children.push((member, column)),
        }
        Ok(())
    }

    fn set_index_and_column_type(&mut self, index: u32, logical_type: LogicalType) -> Result<()> {
        self.lifecycle.ensure_open()?;
        check_row(index, self.len)?;
        if !self.children.iter().any(|(t, _)| *t == logical_type) {
            return Err(LoadError::UnionChildMissing { logical_type });
        }
        self.types[index as usize] = Some(logical_type);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.lifecycle.finish() {
            return Ok(());
        }
        for (member, column) in &self.children {
            if column.len() != self.len {
                return Err(LoadError::ChildLengthMismatch {
                    child: format!("{member:?}"),
                    expected: self.len,
                    actual: column.len(),
                });
            }
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<NativeColumn> {
        self.lifecycle.ensure_finished()?;
        Ok(NativeColumn::Union(UnionColumn {
            len: self.len,
            children: self.children,
            types: self.types,
        }))
    }
}

/// A column known to be entirely absent.
pub(crate) struct NullLoader {
    len: u32,
    lifecycle: Lifecycle,
}

impl NullLoader {
    pub(crate) fn new(len: u32) -> Self {
        Self {
            len,
            lifecycle: Lifecycle::default(),
        }
    }
}

impl ColumnLoader for NullLoader {
    type Output = NativeColumn;

    fn variant(&self) -> LoaderVariant {
        LoaderVariant::Null
    }

    fn logical_type(&self) -> LogicalType {
        LogicalType::Null
    }

    fn load_size(&self) -> u32 {
        self.len
    }

    fn is_loading_skipped(&self) -> bool {
        true
    }

    fn set_null(&mut self, index: u32) -> Result<()> {
        self.lifecycle.ensure_open()?;
        check_row(index, self.len)
    }

    fn finish(&mut self) -> Result<()> {
        self.lifecycle.finish();
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<NativeColumn> {
        self.lifecycle.ensure_finished()?;
        Ok(NativeColumn::Null(self.len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BlockWriter;
    use pretty_assertions::assert_eq;

    fn ints(name: &str, values: &[Option<i32>]) -> EncodedColumnBlock {
        let values: Vec<_> = values.iter().map(|v| v.map(Value::Integer)).collect();
        BlockWriter::sequential(name, LogicalType::Integer, &values).unwrap()
    }

    fn finish(mut loader: Box<dyn ColumnLoader<Output = NativeColumn>>) -> Result<NativeColumn> {
        loader.finish()?;
        loader.build()
    }

    #[test]
    fn array_child_segments_concatenate() {
        let mut loader = ArrayLoader::new(2, None, LoaderOptions::default());
        loader.load_child(&ints("e", &[Some(1), Some(2)]), 2).unwrap();
        loader.load_child(&ints("e", &[Some(3)]), 1).unwrap();
        loader.set_array_index(0, 1, 2).unwrap();
        loader.set_array_index(1, 0, 0).unwrap();
        let column = finish(Box::new(loader)).unwrap();
        assert_eq!(
            column.get(0),
            Some(Value::Array(vec![Some(Value::Integer(2)), Some(Value::Integer(3))]))
        );
        assert_eq!(column.get(1), Some(Value::Array(vec![])));
    }

    #[test]
    fn child_for_row_needs_span_in_one_segment() {
        let mut loader = ArrayLoader::new(3, None, LoaderOptions::default());
        loader.load_child(&ints("e", &[Some(1), Some(2)]), 2).unwrap();
        loader.load_child(&ints("e", &[Some(3)]), 1).unwrap();
        loader.set_array_index(0, 1, 2).unwrap();
        loader.set_array_index(1, 0, 2).unwrap();
        loader.set_array_index(2, 2, 1).unwrap();
        let column = finish(Box::new(loader)).unwrap();
        let array = column.as_array().unwrap();
        let segments = array.child().segments();

        assert!(array.child_for_row(0).is_none());
        assert!(Arc::ptr_eq(array.child_for_row(1).unwrap(), &segments[0]));
        assert!(Arc::ptr_eq(array.child_for_row(2).unwrap(), &segments[1]));
    }

    #[test]
    fn array_span_past_child_is_rejected() {
        let mut loader = ArrayLoader::new(1, None, LoaderOptions::default());
        loader.load_child(&ints("e", &[Some(1)]), 1).unwrap();
        loader.set_array_index(0, 0, 2).unwrap();
        assert!(matches!(loader.finish(), Err(LoadError::InvalidBlock(_))));
    }

    #[test]
    fn run_length_loader_rejects_per_row_null() {
        let mut loader = RunLengthArrayLoader::new(3, None, LoaderOptions::default());
        assert!(matches!(
            loader.set_null(0),
            Err(LoadError::UnsupportedOperation {
                operation: "set_null",
                variant: LoaderVariant::RunLengthArray
            })
        ));
    }

    #[test]
    fn struct_child_length_must_match() {
        let mut loader = StructLoader::new(LogicalType::Struct, 3, None, LoaderOptions::default());
        loader.load_child(&ints("a", &[Some(1), None]), 2).unwrap();
        assert!(matches!(
            loader.finish(),
            Err(LoadError::ChildLengthMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn union_requires_loaded_member() {
        let mut loader = UnionLoader::new(1, None, LoaderOptions::default());
        assert!(matches!(
            loader.set_index_and_column_type(0, LogicalType::Integer),
            Err(LoadError::UnionChildMissing {
                logical_type: LogicalType::Integer
            })
        ));
    }

    #[test]
    fn null_loader_skips_and_builds_without_buffers() {
        let loader = NullLoader::new(5);
        assert!(loader.is_loading_skipped());
        let column = finish(Box::new(loader)).unwrap();
        assert_eq!(column, NativeColumn::Null(5));
        assert_eq!(column.len(), 5);
        assert_eq!(column.get(4), None);
    }
}
