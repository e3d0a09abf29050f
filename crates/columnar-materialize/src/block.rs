#![forbid(unsafe_code)]

use crate::error::{LoadError, Result};
use crate::types::{EncodingKind, LogicalType};
use bytes::Bytes;
use std::ops::Range;
use std::sync::Arc;

/// A self-describing encoded column block: header, payload and (for containers) child
/// blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedColumnBlock {
    pub name: String,
    pub logical_type: LogicalType,
    pub encoding: EncodingKind,
    /// Number of source rows encoded in the payload.
    pub row_count: u32,
    /// Explicit number of rows to materialize; rows past `row_count` are null.
    pub load_size: Option<u32>,
    /// Per source row output multiplicity (`0` drops the row, `>1` duplicates it).
    pub repetitions: Option<Arc<[u32]>>,
    pub payload: Bytes,
    pub children: Vec<EncodedColumnBlock>,
}

impl EncodedColumnBlock {
    pub fn new(
        name: impl Into<String>,
        logical_type: LogicalType,
        encoding: EncodingKind,
        row_count: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            logical_type,
            encoding,
            row_count,
            load_size: None,
            repetitions: None,
            payload: payload.into(),
            children: Vec::new(),
        }
    }

    /// A block declaring an entirely absent column.
    pub fn null(name: impl Into<String>, row_count: u32) -> Self {
        Self::new(
            name,
            LogicalType::Null,
            EncodingKind::Null,
            row_count,
            Bytes::new(),
        )
    }

    pub fn with_children(mut self, children: Vec<EncodedColumnBlock>) -> Self {
        self.children = children;
        self
    }

    pub fn with_load_size(mut self, load_size: u32) -> Self {
        self.load_size = Some(load_size);
        self
    }

    pub fn with_repetitions(mut self, repetitions: Vec<u32>) -> Self {
        self.repetitions = Some(repetitions.into());
        self
    }

    pub fn child(&self, name: &str) -> Option<&EncodedColumnBlock> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Number of rows a loader for this block materializes.
    ///
    /// With a repetition array the load size is its sum (and must agree with an explicit
    /// override); otherwise the override, which may not be smaller than `row_count`;
    /// otherwise `row_count`.
    pub fn resolve_load_size(&self) -> Result<u32> {
        if let Some(reps) = &self.repetitions {
            if reps.len() != self.row_count as usize {
                return Err(LoadError::invalid_block(format!(
                    "column `{}`: {} repetition entries for {} rows",
                    self.name,
                    reps.len(),
                    self.row_count
                )));
            }
            let total: u64 = reps.iter().map(|&r| r as u64).sum();
            let total = u32::try_from(total).map_err(|_| {
                LoadError::invalid_block(format!(
                    "column `{}`: repetitions sum to {total}, which exceeds u32",
                    self.name
                ))
            })?;
            if let Some(load_size) = self.load_size {
                if load_size != total {
                    return Err(LoadError::invalid_block(format!(
                        "column `{}`: repetitions sum to {total} but load size is {load_size}",
                        self.name
                    )));
                }
            }
            return Ok(total);
        }

        match self.load_size {
            Some(load_size) if load_size < self.row_count => Err(LoadError::invalid_block(
                format!(
                    "column `{}`: row count {} exceeds load size {load_size}",
                    self.name, self.row_count
                ),
            )),
            Some(load_size) => Ok(load_size),
            None => Ok(self.row_count),
        }
    }

    pub fn projection(&self) -> Result<Option<RowProjection>> {
        self.resolve_load_size()?;
        Ok(self.repetitions.as_deref().map(RowProjection::new))
    }

    /// Child block carrying the parent's repetitions when it has none of its own, so that
    /// children of a projected struct/map/union line up with the parent's output rows.
    pub(crate) fn inherit_repetitions(&self, parent: &EncodedColumnBlock) -> EncodedColumnBlock {
        let mut child = self.clone();
        if child.repetitions.is_none() {
            if let Some(reps) = &parent.repetitions {
                if reps.len() == child.row_count as usize {
                    child.repetitions = Some(Arc::clone(reps));
                    child.load_size = None;
                }
            }
        }
        child
    }
}

/// Expansion of source rows into output rows driven by a repetition array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowProjection {
    /// `offsets[i]..offsets[i + 1]` are the output rows of source row `i`.
    offsets: Vec<u32>,
}

impl RowProjection {
    pub fn new(repetitions: &[u32]) -> Self {
        let mut offsets = Vec::with_capacity(repetitions.len() + 1);
        let mut acc = 0u32;
        offsets.push(acc);
        for &r in repetitions {
            acc = acc.saturating_add(r);
            offsets.push(acc);
        }
        Self { offsets }
    }

    pub fn source_rows(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    pub fn output_rows(&self) -> u32 {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Output rows for source row `src`; empty when the row is dropped or out of range.
    pub fn targets(&self, src: u32) -> Range<u32> {
        let src = src as usize;
        match (self.offsets.get(src), self.offsets.get(src + 1)) {
            (Some(&start), Some(&end)) => start..end,
            _ => 0..0,
        }
    }

    /// Map a run of `repetitions` source rows starting at `start` to `(start, len)` in
    /// output rows. Order is preserved, so a contiguous run stays contiguous.
    pub fn map_run(&self, start: u32, repetitions: u32) -> Result<(u32, u32)> {
        let end = start as usize + repetitions as usize;
        if end >= self.offsets.len() {
            return Err(LoadError::invalid_block(format!(
                "run {start}+{repetitions} exceeds {} source rows",
                self.source_rows()
            )));
        }
        let out_start = self.offsets[start as usize];
        Ok((out_start, self.offsets[end] - out_start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(rows: u32) -> EncodedColumnBlock {
        EncodedColumnBlock::new(
            "c",
            LogicalType::Integer,
            EncodingKind::Sequential,
            rows,
            Bytes::new(),
        )
    }

    #[test]
    fn load_size_resolution() {
        assert_eq!(block(4).resolve_load_size().unwrap(), 4);
        assert_eq!(block(4).with_load_size(6).resolve_load_size().unwrap(), 6);
        assert!(block(4).with_load_size(3).resolve_load_size().is_err());

        let projected = block(3).with_repetitions(vec![2, 0, 3]);
        assert_eq!(projected.resolve_load_size().unwrap(), 5);
        assert!(projected.clone().with_load_size(4).resolve_load_size().is_err());
        assert_eq!(projected.with_load_size(5).resolve_load_size().unwrap(), 5);
        assert!(block(2).with_repetitions(vec![1]).resolve_load_size().is_err());
    }

    #[test]
    fn projection_targets_and_runs() {
        let p = RowProjection::new(&[2, 0, 3, 1]);
        assert_eq!(p.output_rows(), 6);
        assert_eq!(p.targets(0), 0..2);
        assert!(p.targets(1).is_empty());
        assert_eq!(p.targets(2), 2..5);
        assert!(p.targets(9).is_empty());
        assert_eq!(p.map_run(1, 2).unwrap(), (2, 3));
        assert_eq!(p.map_run(0, 4).unwrap(), (0, 6));
        assert!(p.map_run(3, 2).is_err());
    }

    #[test]
    fn children_inherit_parent_repetitions() {
        let parent = block(2).with_repetitions(vec![1, 2]);
        let child = block(2).inherit_repetitions(&parent);
        assert_eq!(child.resolve_load_size().unwrap(), 3);

        let own = block(2).with_repetitions(vec![0, 1]).inherit_repetitions(&parent);
        assert_eq!(own.resolve_load_size().unwrap(), 1);
    }
}
