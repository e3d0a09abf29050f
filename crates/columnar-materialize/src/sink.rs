#![forbid(unsafe_code)]

//! Backend-agnostic pieces of the loader algorithms.
//!
//! Both backends store rows through [`RowSink`], so the downcast-or-null rule, dictionary
//! row resolution and run-length group bookkeeping live here once.

use crate::dictionary::Dictionary;
use crate::error::{LoadError, Result};
use crate::types::LogicalType;
use crate::value::Value;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Minimal write capability of a positional destination.
pub(crate) trait RowSink {
    /// `value` has already been converted to the sink's logical type.
    fn write_value(&mut self, index: u32, value: Value) -> Result<()>;

    fn write_null(&mut self, index: u32) -> Result<()>;
}

/// Convert `value` to `target`, or `None` when it cannot be represented there.
pub(crate) fn coerce(value: Value, target: LogicalType, validate_utf8: bool) -> Option<Value> {
    match (&value, target) {
        (Value::String(s), LogicalType::String) if validate_utf8 && s.as_str().is_none() => {
            log::trace!("invalid UTF-8 string stored as null");
            return None;
        }
        (Value::Bytes(b), LogicalType::String) if !validate_utf8 => {
            return Some(Value::String(b.clone()));
        }
        _ => {}
    }
    match value.cast_to(target) {
        Ok(v) => Some(v),
        Err(err) => {
            log::trace!("{err}; storing null");
            None
        }
    }
}

/// Store `value` at `index`, converting it to `target` with downcast-or-null.
pub(crate) fn store_coerced<S: RowSink + ?Sized>(
    sink: &mut S,
    target: LogicalType,
    validate_utf8: bool,
    index: u32,
    value: Value,
) -> Result<()> {
    match coerce(value, target, validate_utf8) {
        Some(v) => sink.write_value(index, v),
        None => sink.write_null(index),
    }
}

/// Store dictionary entry `dic_index` at row `index`; a null entry yields a null row.
pub(crate) fn resolve_dictionary_row<S: RowSink + ?Sized>(
    sink: &mut S,
    dictionary: &Dictionary,
    index: u32,
    dic_index: u32,
) -> Result<()> {
    if dic_index >= dictionary.len() {
        return Err(LoadError::DictionaryIndexOutOfBounds {
            index: dic_index,
            len: dictionary.len(),
        });
    }
    match dictionary.get(dic_index) {
        Some(v) => sink.write_value(index, v.clone()),
        None => sink.write_null(index),
    }
}

/// Write `value` (or null) to every row in `0..len`.
pub(crate) fn broadcast<S: RowSink + ?Sized>(sink: &mut S, len: u32, value: Option<&Value>) -> Result<()> {
    for index in 0..len {
        match value {
            Some(v) => sink.write_value(index, v.clone())?,
            None => sink.write_null(index)?,
        }
    }
    Ok(())
}

/// Child span of one run-length row group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupSpan {
    pub start: u32,
    pub length: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Run {
    start: u32,
    repetitions: u32,
    group: Option<u32>,
}

/// Row runs of a run-length encoded array column.
///
/// Each run covers consecutive rows that are either null or share a row group; a row group
/// is a span of the shared child. Rows outside every run are null.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunTable {
    len: u32,
    runs: Vec<Run>,
    groups: BTreeMap<u32, GroupSpan>,
    sorted: bool,
}

impl RunTable {
    pub(crate) fn new(len: u32) -> Self {
        Self {
            len,
            runs: Vec::new(),
            groups: BTreeMap::new(),
            sorted: true,
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn push_null(&mut self, start: u32, repetitions: u32) -> Result<()> {
        crate::loader::check_run(start, repetitions, self.len)?;
        self.push_run(Run {
            start,
            repetitions,
            group: None,
        });
        Ok(())
    }

    pub(crate) fn push_group(
        &mut self,
        start: u32,
        repetitions: u32,
        group: u32,
        span: GroupSpan,
    ) -> Result<()> {
        crate::loader::check_run(start, repetitions, self.len)?;
        match self.groups.entry(group) {
            Entry::Occupied(existing) if *existing.get() != span => {
                return Err(LoadError::invalid_block(format!(
                    "row group {group} redefined: {:?} vs {span:?}",
                    existing.get()
                )));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(span);
            }
        }
        self.push_run(Run {
            start,
            repetitions,
            group: Some(group),
        });
        Ok(())
    }

    fn push_run(&mut self, run: Run) {
        if run.repetitions == 0 {
            return;
        }
        if let Some(last) = self.runs.last() {
            if last.start > run.start {
                self.sorted = false;
            }
        }
        self.runs.push(run);
    }

    /// Sort runs by start row and reject overlaps.
    pub(crate) fn seal(&mut self) -> Result<()> {
        if !self.sorted {
            self.runs.sort_by_key(|r| r.start);
            self.sorted = true;
        }
        for pair in self.runs.windows(2) {
            if pair[0].start + pair[0].repetitions > pair[1].start {
                return Err(LoadError::invalid_block(format!(
                    "run-length groups overlap at row {}",
                    pair[1].start
                )));
            }
        }
        Ok(())
    }

    /// Row group index and child span for `row`, or `None` for null rows.
    pub fn lookup(&self, row: u32) -> Option<(u32, GroupSpan)> {
        if row >= self.len {
            return None;
        }
        let pos = self.runs.partition_point(|r| r.start <= row);
        let run = self.runs.get(pos.checked_sub(1)?)?;
        if row >= run.start + run.repetitions {
            return None;
        }
        let group = run.group?;
        let span = *self.groups.get(&group)?;
        Some((group, span))
    }

    pub fn group(&self, group: u32) -> Option<GroupSpan> {
        self.groups.get(&group).copied()
    }

    /// Defined row groups with their spans.
    pub fn groups(&self) -> impl Iterator<Item = (u32, GroupSpan)> + '_ {
        self.groups.iter().map(|(&group, &span)| (group, span))
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Every row with its span, in row order.
    pub fn rows(&self) -> impl Iterator<Item = Option<GroupSpan>> + '_ {
        (0..self.len).map(|row| self.lookup(row).map(|(_, span)| span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct VecSink(Vec<Option<Value>>);

    impl RowSink for VecSink {
        fn write_value(&mut self, index: u32, value: Value) -> Result<()> {
            self.0[index as usize] = Some(value);
            Ok(())
        }

        fn write_null(&mut self, index: u32) -> Result<()> {
            self.0[index as usize] = None;
            Ok(())
        }
    }

    #[test]
    fn store_coerced_nulls_overflow() {
        let mut sink = VecSink(vec![Some(Value::Byte(1)); 2]);
        store_coerced(&mut sink, LogicalType::Byte, true, 0, Value::Integer(300)).unwrap();
        store_coerced(&mut sink, LogicalType::Byte, true, 1, Value::Integer(-3)).unwrap();
        assert_eq!(sink.0, vec![None, Some(Value::Byte(-3))]);
    }

    #[test]
    fn invalid_utf8_respects_option() {
        let bad = Value::String(crate::value::ByteSlice::copy_from_slice(&[0xff]));
        assert_eq!(coerce(bad.clone(), LogicalType::String, true), None);
        assert_eq!(coerce(bad.clone(), LogicalType::String, false), Some(bad));
    }

    #[test]
    fn dictionary_null_entries_resolve_to_null_rows() {
        let mut dic = Dictionary::new(2);
        dic.set(0, Value::string("a")).unwrap();
        let mut sink = VecSink(vec![None; 2]);
        resolve_dictionary_row(&mut sink, &dic, 0, 0).unwrap();
        resolve_dictionary_row(&mut sink, &dic, 1, 1).unwrap();
        assert_eq!(sink.0, vec![Some(Value::string("a")), None]);
        assert!(resolve_dictionary_row(&mut sink, &dic, 1, 2).is_err());
    }

    #[test]
    fn run_table_lookup() {
        let mut runs = RunTable::new(10);
        let span = GroupSpan {
            start: 3,
            length: 2,
        };
        runs.push_group(6, 3, 0, span).unwrap();
        runs.push_null(3, 3).unwrap();
        runs.push_group(0, 2, 0, span).unwrap();
        runs.seal().unwrap();

        assert_eq!(runs.lookup(0), Some((0, span)));
        assert_eq!(runs.lookup(2), None);
        assert_eq!(runs.lookup(4), None);
        assert_eq!(runs.lookup(8), Some((0, span)));
        assert_eq!(runs.lookup(9), None);
        assert_eq!(runs.lookup(10), None);
        assert_eq!(runs.group_count(), 1);

        let other = GroupSpan {
            start: 0,
            length: 1,
        };
        assert!(runs.push_group(9, 1, 0, other).is_err());
        assert!(runs.push_null(9, 2).is_err());
    }

    #[test]
    fn sparse_group_indices_are_keyed_not_allocated() {
        let mut runs = RunTable::new(2);
        let span = GroupSpan {
            start: 0,
            length: 1,
        };
        runs.push_group(0, 1, u32::MAX, span).unwrap();
        runs.push_null(1, 1).unwrap();
        runs.seal().unwrap();

        assert_eq!(runs.lookup(0), Some((u32::MAX, span)));
        assert_eq!(runs.group(u32::MAX), Some(span));
        assert_eq!(runs.group(0), None);
        assert_eq!(runs.groups().collect::<Vec<_>>(), vec![(u32::MAX, span)]);
    }

    #[test]
    fn overlapping_runs_are_rejected() {
        let mut runs = RunTable::new(5);
        runs.push_null(0, 3).unwrap();
        runs.push_null(2, 2).unwrap();
        assert!(runs.seal().is_err());
    }
}
