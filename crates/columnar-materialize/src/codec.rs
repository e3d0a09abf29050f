#![forbid(unsafe_code)]

//! Block payload layout.
//!
//! This is the decode-side contract between the block producer and the loaders: [`drive`]
//! replays a payload into any [`ColumnLoader`], and [`BlockWriter`] lays values out the same
//! way. All integers are little-endian. A presence byte is `0` for null and `1` for a
//! value; scalar values are fixed width except strings and bytes, which are `u32` length
//! prefixed.

use crate::block::EncodedColumnBlock;
use crate::error::{LoadError, Result};
use crate::loader::{ColumnLoader, LoaderVariant};
use crate::sink::GroupSpan;
use crate::types::{EncodingKind, LogicalType};
use crate::value::Value;
use bytes::Bytes;
use std::ops::Range;

/// Dictionary index marking a null row.
pub const NULL_DICTIONARY_INDEX: u32 = u32::MAX;

/// Union type tag marking a null row.
pub const NULL_UNION_TAG: u8 = 0xFF;

/// Cursor over a block payload.
pub struct PayloadReader<'a> {
    bytes: &'a Bytes,
    pos: usize,
}

/// A decoded scalar. Strings and bytes stay in the payload as a byte range.
#[derive(Clone, Debug, PartialEq)]
pub enum RawScalar {
    Value(Value),
    Span { start: usize, len: usize },
}

impl<'a> PayloadReader<'a> {
    pub fn new(bytes: &'a Bytes) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or_else(|| LoadError::invalid_block("payload offset overflow"))?;
        let bytes: &'a [u8] = self.bytes.as_ref();
        let out = bytes.get(self.pos..end).ok_or_else(|| {
            LoadError::invalid_block(format!(
                "payload truncated: need {n} bytes at offset {}, have {}",
                self.pos,
                bytes.len()
            ))
        })?;
        self.pos = end;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_presence(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(LoadError::invalid_block(format!(
                "invalid presence byte {other:#04x} at offset {}",
                self.pos - 1
            ))),
        }
    }

    pub fn read_scalar(&mut self, ty: LogicalType) -> Result<RawScalar> {
        let value = match ty {
            LogicalType::Boolean => match self.read_u8()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => {
                    return Err(LoadError::invalid_block(format!(
                        "invalid boolean byte {other:#04x}"
                    )))
                }
            },
            LogicalType::Byte => Value::Byte(i8::from_le_bytes(self.take_array()?)),
            LogicalType::Short => Value::Short(i16::from_le_bytes(self.take_array()?)),
            LogicalType::Integer => Value::Integer(i32::from_le_bytes(self.take_array()?)),
            LogicalType::Long => Value::Long(i64::from_le_bytes(self.take_array()?)),
            LogicalType::Float => Value::Float(f32::from_le_bytes(self.take_array()?)),
            LogicalType::Double => Value::Double(f64::from_le_bytes(self.take_array()?)),
            LogicalType::String | LogicalType::Bytes => {
                let len = self.read_u32()? as usize;
                let start = self.pos;
                self.take(len)?;
                return Ok(RawScalar::Span { start, len });
            }
            other => {
                return Err(LoadError::invalid_block(format!(
                    "{other:?} has no scalar payload encoding"
                )))
            }
        };
        Ok(RawScalar::Value(value))
    }

    pub fn read_optional(&mut self, ty: LogicalType) -> Result<Option<RawScalar>> {
        if self.read_presence()? {
            self.read_scalar(ty).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn expect_end(&self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(LoadError::invalid_block(format!(
                "{} trailing payload bytes",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}

fn apply_row<L: ColumnLoader + ?Sized>(
    loader: &mut L,
    index: u32,
    ty: LogicalType,
    raw: &RawScalar,
    payload: &Bytes,
) -> Result<()> {
    match raw {
        RawScalar::Span { start, len } if ty == LogicalType::String => {
            loader.set_string(index, payload, *start, *len)
        }
        RawScalar::Span { start, len } => loader.set_bytes(index, payload, *start, *len),
        RawScalar::Value(Value::Boolean(v)) => loader.set_boolean(index, *v),
        RawScalar::Value(Value::Byte(v)) => loader.set_byte(index, *v),
        RawScalar::Value(Value::Short(v)) => loader.set_short(index, *v),
        RawScalar::Value(Value::Integer(v)) => loader.set_integer(index, *v),
        RawScalar::Value(Value::Long(v)) => loader.set_long(index, *v),
        RawScalar::Value(Value::Float(v)) => loader.set_float(index, *v),
        RawScalar::Value(Value::Double(v)) => loader.set_double(index, *v),
        RawScalar::Value(_) => loader.set_null(index),
    }
}

fn apply_const<L: ColumnLoader + ?Sized>(
    loader: &mut L,
    ty: LogicalType,
    raw: &RawScalar,
    payload: &Bytes,
) -> Result<()> {
    match raw {
        RawScalar::Span { start, len } if ty == LogicalType::String => {
            loader.set_const_from_string(payload, *start, *len)
        }
        RawScalar::Span { start, len } => loader.set_const_from_bytes(payload, *start, *len),
        RawScalar::Value(Value::Boolean(v)) => loader.set_const_from_boolean(*v),
        RawScalar::Value(Value::Byte(v)) => loader.set_const_from_byte(*v),
        RawScalar::Value(Value::Short(v)) => loader.set_const_from_short(*v),
        RawScalar::Value(Value::Integer(v)) => loader.set_const_from_integer(*v),
        RawScalar::Value(Value::Long(v)) => loader.set_const_from_long(*v),
        RawScalar::Value(Value::Float(v)) => loader.set_const_from_float(*v),
        RawScalar::Value(Value::Double(v)) => loader.set_const_from_double(*v),
        RawScalar::Value(_) => loader.set_const_null(),
    }
}

fn apply_dic<L: ColumnLoader + ?Sized>(
    loader: &mut L,
    dic_index: u32,
    ty: LogicalType,
    raw: &RawScalar,
    payload: &Bytes,
) -> Result<()> {
    match raw {
        RawScalar::Span { start, len } if ty == LogicalType::String => {
            loader.set_string_to_dic(dic_index, payload, *start, *len)
        }
        RawScalar::Span { start, len } => loader.set_bytes_to_dic(dic_index, payload, *start, *len),
        RawScalar::Value(Value::Boolean(v)) => loader.set_boolean_to_dic(dic_index, *v),
        RawScalar::Value(Value::Byte(v)) => loader.set_byte_to_dic(dic_index, *v),
        RawScalar::Value(Value::Short(v)) => loader.set_short_to_dic(dic_index, *v),
        RawScalar::Value(Value::Integer(v)) => loader.set_integer_to_dic(dic_index, *v),
        RawScalar::Value(Value::Long(v)) => loader.set_long_to_dic(dic_index, *v),
        RawScalar::Value(Value::Float(v)) => loader.set_float_to_dic(dic_index, *v),
        RawScalar::Value(Value::Double(v)) => loader.set_double_to_dic(dic_index, *v),
        RawScalar::Value(_) => loader.set_null_to_dic(dic_index),
    }
}

fn first_child(block: &EncodedColumnBlock) -> Result<&EncodedColumnBlock> {
    block.children.first().ok_or_else(|| {
        LoadError::invalid_block(format!("array column `{}` has no child block", block.name))
    })
}

/// Replay `block`'s payload into `loader`.
///
/// The loader must have been created for this block (see [`crate::loader::select_variant`]).
/// Repetition arrays are applied here: per-row calls fan out to every output row of their
/// source row, run-length groups are remapped to output ranges, and the children of
/// struct/map/union blocks inherit the parent's repetitions.
pub fn drive<L: ColumnLoader + ?Sized>(block: &EncodedColumnBlock, loader: &mut L) -> Result<()> {
    let projection = block.projection()?;
    let targets = |src: u32| -> Range<u32> {
        match &projection {
            Some(p) => p.targets(src),
            None => src..src + 1,
        }
    };
    let ty = block.logical_type;
    let payload = &block.payload;
    let mut reader = PayloadReader::new(payload);

    match loader.variant() {
        LoaderVariant::Null => return Ok(()),
        LoaderVariant::Sequential => {
            for src in 0..block.row_count {
                let raw = reader.read_optional(ty)?;
                for out in targets(src) {
                    match &raw {
                        Some(raw) => apply_row(loader, out, ty, raw, payload)?,
                        None => loader.set_null(out)?,
                    }
                }
            }
        }
        LoaderVariant::Constant => match reader.read_optional(ty)? {
            Some(raw) => apply_const(loader, ty, &raw, payload)?,
            None => loader.set_const_null()?,
        },
        LoaderVariant::Dictionary => {
            let size = reader.read_u32()?;
            // Every entry carries at least its presence byte.
            if size as usize > reader.remaining() {
                return Err(LoadError::invalid_block(format!(
                    "dictionary declares {size} entries but only {} payload bytes remain",
                    reader.remaining()
                )));
            }
            loader.create_dictionary(size)?;
            for dic_index in 0..size {
                match reader.read_optional(ty)? {
                    Some(raw) => apply_dic(loader, dic_index, ty, &raw, payload)?,
                    None => loader.set_null_to_dic(dic_index)?,
                }
            }
            for src in 0..block.row_count {
                let dic_index = reader.read_u32()?;
                for out in targets(src) {
                    if dic_index == NULL_DICTIONARY_INDEX {
                        loader.set_null(out)?;
                    } else {
                        loader.set_dictionary_index(out, dic_index)?;
                    }
                }
            }
        }
        LoaderVariant::Array => {
            let child = first_child(block)?;
            loader.load_child(child, child.resolve_load_size()?)?;
            for src in 0..block.row_count {
                let span = if reader.read_presence()? {
                    Some((reader.read_u32()?, reader.read_u32()?))
                } else {
                    None
                };
                for out in targets(src) {
                    match span {
                        Some((start, len)) => loader.set_array_index(out, start, len)?,
                        None => loader.set_null(out)?,
                    }
                }
            }
        }
        LoaderVariant::RunLengthArray => {
            let child = first_child(block)?;
            loader.load_child(child, child.resolve_load_size()?)?;
            let groups = reader.read_u32()?;
            for group in 0..groups {
                let start = reader.read_u32()?;
                let repetitions = reader.read_u32()?;
                let (start, repetitions) = match &projection {
                    Some(p) => p.map_run(start, repetitions)?,
                    None => (start, repetitions),
                };
                if reader.read_presence()? {
                    let row_group = reader.read_u32()?;
                    let rg_start = reader.read_u32()?;
                    let rg_len = reader.read_u32()?;
                    loader.set_row_group_index_and_repetitions(
                        start,
                        repetitions,
                        row_group,
                        rg_start,
                        rg_len,
                    )?;
                } else {
                    loader.set_null_and_repetitions(start, repetitions, group)?;
                }
            }
        }
        LoaderVariant::Struct | LoaderVariant::Map => {
            let load_size = loader.load_size();
            for child in &block.children {
                let child = child.inherit_repetitions(block);
                loader.load_child(&child, load_size)?;
            }
            for src in 0..block.row_count {
                if !reader.read_presence()? {
                    for out in targets(src) {
                        loader.set_null(out)?;
                    }
                }
            }
        }
        LoaderVariant::Union => {
            let load_size = loader.load_size();
            for child in &block.children {
                let child = child.inherit_repetitions(block);
                loader.load_child(&child, load_size)?;
            }
            for src in 0..block.row_count {
                let tag = reader.read_u8()?;
                let member = if tag == NULL_UNION_TAG {
                    None
                } else {
                    Some(LogicalType::from_code(tag).ok_or_else(|| {
                        LoadError::invalid_block(format!("invalid union type tag {tag:#04x}"))
                    })?)
                };
                for out in targets(src) {
                    match member {
                        Some(member) => loader.set_index_and_column_type(out, member)?,
                        None => loader.set_null(out)?,
                    }
                }
            }
        }
    }

    reader.expect_end()
}

/// One run of a run-length encoded array block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunGroup {
    pub start: u32,
    pub repetitions: u32,
    /// Row group index and its child span; `None` for a null run.
    pub group: Option<(u32, GroupSpan)>,
}

/// Produces blocks in the payload layout [`drive`] understands.
pub struct BlockWriter;

impl BlockWriter {
    pub fn sequential(
        name: &str,
        ty: LogicalType,
        values: &[Option<Value>],
    ) -> Result<EncodedColumnBlock> {
        let mut out = Vec::new();
        for value in values {
            write_optional(&mut out, ty, value.as_ref())?;
        }
        Ok(EncodedColumnBlock::new(
            name,
            ty,
            EncodingKind::Sequential,
            row_count(values.len())?,
            out,
        ))
    }

    pub fn constant(
        name: &str,
        ty: LogicalType,
        value: Option<&Value>,
        rows: u32,
    ) -> Result<EncodedColumnBlock> {
        let mut out = Vec::new();
        write_optional(&mut out, ty, value)?;
        Ok(EncodedColumnBlock::new(
            name,
            ty,
            EncodingKind::Constant,
            rows,
            out,
        ))
    }

    /// `indices[row]` of `None` is a null row.
    pub fn dictionary(
        name: &str,
        ty: LogicalType,
        dictionary: &[Option<Value>],
        indices: &[Option<u32>],
    ) -> Result<EncodedColumnBlock> {
        let mut out = Vec::new();
        out.extend_from_slice(&row_count(dictionary.len())?.to_le_bytes());
        for value in dictionary {
            write_optional(&mut out, ty, value.as_ref())?;
        }
        for index in indices {
            out.extend_from_slice(&index.unwrap_or(NULL_DICTIONARY_INDEX).to_le_bytes());
        }
        Ok(EncodedColumnBlock::new(
            name,
            ty,
            EncodingKind::Dictionary,
            row_count(indices.len())?,
            out,
        ))
    }

    /// `spans[row]` is `(start, length)` into `child`, or `None` for a null row.
    pub fn array(
        name: &str,
        child: EncodedColumnBlock,
        spans: &[Option<(u32, u32)>],
    ) -> Result<EncodedColumnBlock> {
        let mut out = Vec::new();
        for span in spans {
            match span {
                Some((start, len)) => {
                    out.push(1);
                    out.extend_from_slice(&start.to_le_bytes());
                    out.extend_from_slice(&len.to_le_bytes());
                }
                None => out.push(0),
            }
        }
        Ok(EncodedColumnBlock::new(
            name,
            LogicalType::Array,
            EncodingKind::Sequential,
            row_count(spans.len())?,
            out,
        )
        .with_children(vec![child]))
    }

    pub fn run_length_array(
        name: &str,
        child: EncodedColumnBlock,
        rows: u32,
        groups: &[RunGroup],
    ) -> Result<EncodedColumnBlock> {
        let mut out = Vec::new();
        out.extend_from_slice(&row_count(groups.len())?.to_le_bytes());
        for group in groups {
            out.extend_from_slice(&group.start.to_le_bytes());
            out.extend_from_slice(&group.repetitions.to_le_bytes());
            match group.group {
                Some((index, span)) => {
                    out.push(1);
                    out.extend_from_slice(&index.to_le_bytes());
                    out.extend_from_slice(&span.start.to_le_bytes());
                    out.extend_from_slice(&span.length.to_le_bytes());
                }
                None => out.push(0),
            }
        }
        Ok(EncodedColumnBlock::new(
            name,
            LogicalType::Array,
            EncodingKind::RunLengthArray,
            rows,
            out,
        )
        .with_children(vec![child]))
    }

    /// Children must each have `present.len()` rows.
    pub fn structure(
        name: &str,
        children: Vec<EncodedColumnBlock>,
        present: &[bool],
    ) -> Result<EncodedColumnBlock> {
        Self::spread(name, LogicalType::Struct, children, present)
    }

    /// Children are the map keys; each must have `present.len()` rows.
    pub fn map(
        name: &str,
        children: Vec<EncodedColumnBlock>,
        present: &[bool],
    ) -> Result<EncodedColumnBlock> {
        Self::spread(name, LogicalType::Map, children, present)
    }

    fn spread(
        name: &str,
        ty: LogicalType,
        children: Vec<EncodedColumnBlock>,
        present: &[bool],
    ) -> Result<EncodedColumnBlock> {
        let out: Vec<u8> = present.iter().map(|&p| u8::from(p)).collect();
        Ok(EncodedColumnBlock::new(
            name,
            ty,
            EncodingKind::Sequential,
            row_count(present.len())?,
            out,
        )
        .with_children(children))
    }

    /// One child per member type; `tags[row]` selects the member, `None` is a null row.
    pub fn union(
        name: &str,
        children: Vec<EncodedColumnBlock>,
        tags: &[Option<LogicalType>],
    ) -> Result<EncodedColumnBlock> {
        let out: Vec<u8> = tags
            .iter()
            .map(|t| t.map(LogicalType::code).unwrap_or(NULL_UNION_TAG))
            .collect();
        Ok(EncodedColumnBlock::new(
            name,
            LogicalType::Union,
            EncodingKind::Union,
            row_count(tags.len())?,
            out,
        )
        .with_children(children))
    }
}

fn row_count(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| LoadError::invalid_block(format!("{len} rows exceed u32")))
}

fn write_optional(out: &mut Vec<u8>, ty: LogicalType, value: Option<&Value>) -> Result<()> {
    match value {
        Some(value) => {
            out.push(1);
            write_scalar(out, ty, value)
        }
        None => {
            out.push(0);
            Ok(())
        }
    }
}

fn write_scalar(out: &mut Vec<u8>, ty: LogicalType, value: &Value) -> Result<()> {
    let value = value
        .cast_to(ty)
        .map_err(|err| LoadError::invalid_block(err.to_string()))?;
    match value {
        Value::Boolean(v) => out.push(u8::from(v)),
        Value::Byte(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Short(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Integer(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Long(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::String(s) | Value::Bytes(s) => {
            out.extend_from_slice(&row_count(s.len())?.to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        other => {
            return Err(LoadError::invalid_block(format!(
                "{:?} has no scalar payload encoding",
                other.logical_type()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_rejects_truncation_and_trailing_bytes() {
        let bytes = Bytes::from_static(&[1, 0, 0]);
        let mut reader = PayloadReader::new(&bytes);
        assert!(reader.read_presence().unwrap());
        assert!(reader.read_u32().is_err());

        let bytes = Bytes::from_static(&[0, 9]);
        let mut reader = PayloadReader::new(&bytes);
        assert!(!reader.read_presence().unwrap());
        assert!(reader.expect_end().is_err());
        assert!(reader.read_presence().is_err());
    }

    #[test]
    fn strings_stay_in_payload() {
        let block = BlockWriter::sequential(
            "s",
            LogicalType::String,
            &[Some(Value::string("abc")), None],
        )
        .unwrap();
        let mut reader = PayloadReader::new(&block.payload);
        assert_eq!(
            reader.read_optional(LogicalType::String).unwrap(),
            Some(RawScalar::Span { start: 5, len: 3 })
        );
        assert_eq!(reader.read_optional(LogicalType::String).unwrap(), None);
        reader.expect_end().unwrap();
    }

    #[test]
    fn writer_rejects_values_outside_declared_type() {
        assert!(BlockWriter::sequential("b", LogicalType::Byte, &[Some(Value::Integer(300))]).is_err());
    }
}
