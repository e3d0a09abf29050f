#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::error::{LoadError, Result};
use crate::value::Value;

/// Value table of a dictionary-encoded block.
///
/// Entries start out null; `set` fills an entry and clears its null flag. A null entry's
/// value slot is never read.
#[derive(Clone, Debug, PartialEq)]
pub struct Dictionary {
    values: Vec<Option<Value>>,
    is_null: BitVec,
}

impl Dictionary {
    pub fn new(size: u32) -> Self {
        let size = size as usize;
        Self {
            values: vec![None; size],
            is_null: BitVec::with_len_all_true(size),
        }
    }

    pub fn len(&self) -> u32 {
        self.values.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn set(&mut self, index: u32, value: Value) -> Result<()> {
        let slot = self.check(index)?;
        self.values[slot] = Some(value);
        self.is_null.set(slot, false);
        Ok(())
    }

    pub fn set_null(&mut self, index: u32) -> Result<()> {
        let slot = self.check(index)?;
        self.values[slot] = None;
        self.is_null.set(slot, true);
        Ok(())
    }

    pub fn is_null(&self, index: u32) -> bool {
        self.is_null.get_checked(index as usize).unwrap_or(true)
    }

    /// Entry at `index`, or `None` when the entry is null or out of range.
    pub fn get(&self, index: u32) -> Option<&Value> {
        if self.is_null(index) {
            return None;
        }
        self.values.get(index as usize)?.as_ref()
    }

    pub fn null_count(&self) -> usize {
        self.is_null.count_ones()
    }

    fn check(&self, index: u32) -> Result<usize> {
        if index >= self.len() {
            return Err(LoadError::DictionaryIndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        Ok(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_default_to_null() {
        let mut dic = Dictionary::new(3);
        assert_eq!(dic.null_count(), 3);
        dic.set(1, Value::Integer(5)).unwrap();
        assert_eq!(dic.get(1), Some(&Value::Integer(5)));
        assert_eq!(dic.get(0), None);
        assert!(dic.is_null(2));

        dic.set_null(1).unwrap();
        assert_eq!(dic.get(1), None);
        assert_eq!(dic.null_count(), 3);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut dic = Dictionary::new(1);
        assert!(matches!(
            dic.set(1, Value::Boolean(true)),
            Err(LoadError::DictionaryIndexOutOfBounds { index: 1, len: 1 })
        ));
        assert_eq!(dic.get(7), None);
        assert!(dic.is_null(7));
    }
}
