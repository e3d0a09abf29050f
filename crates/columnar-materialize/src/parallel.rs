#![forbid(unsafe_code)]

//! Loading several independent top-level blocks at once.
//!
//! Each block gets its own loader and destination, so blocks never share mutable state and
//! can be materialized on a worker pool. Results keep the input order; the first failing
//! block (in input order) determines the error.

use crate::block::EncodedColumnBlock;
use crate::error::Result;
use crate::native::{load_native, NativeColumn};
use crate::options::LoaderOptions;
use crate::types::ColumnSchema;

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::{prelude::*, ThreadPool};
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::OnceLock;

/// Crate-local pool. Global pool initialization can fail (and panic on first use) under
/// resource pressure; when no pool can be built, loading runs on the calling thread.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
static LOAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn desired_threads() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    std::env::var("RAYON_NUM_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .map_or(available, |n| n.min(available))
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn build_pool() -> Option<ThreadPool> {
    let mut threads = desired_threads().max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("columnar-load-{i}"))
            .build()
        {
            Ok(pool) => return Some(pool),
            Err(err) if threads > 1 => {
                log::debug!("load pool with {threads} threads failed ({err}); retrying smaller");
                threads /= 2;
            }
            Err(err) => {
                log::warn!("no load pool available ({err}); loading serially");
                return None;
            }
        }
    }
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn load_pool() -> Option<&'static ThreadPool> {
    LOAD_POOL.get_or_init(build_pool).as_ref()
}

/// Run `load` over every block, on the pool when one is available.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn load_all<T, F>(blocks: &[EncodedColumnBlock], load: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize, &EncodedColumnBlock) -> Result<T> + Sync,
{
    match load_pool() {
        Some(pool) if blocks.len() > 1 => pool.install(|| {
            blocks
                .par_iter()
                .enumerate()
                .map(|(i, block)| load(i, block))
                .collect::<Vec<_>>()
                .into_iter()
                .collect()
        }),
        _ => blocks.iter().enumerate().map(|(i, b)| load(i, b)).collect(),
    }
}

#[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
fn load_all<T, F>(blocks: &[EncodedColumnBlock], load: F) -> Result<Vec<T>>
where
    F: Fn(usize, &EncodedColumnBlock) -> Result<T>,
{
    blocks.iter().enumerate().map(|(i, b)| load(i, b)).collect()
}

fn schema_at<'s>(schemas: &'s [Option<ColumnSchema>], index: usize) -> Option<&'s ColumnSchema> {
    schemas.get(index).and_then(Option::as_ref)
}

/// Materialize each block into a native column. `schemas[i]` (when present) applies to
/// `blocks[i]`.
pub fn load_native_columns(
    blocks: &[EncodedColumnBlock],
    schemas: &[Option<ColumnSchema>],
    options: LoaderOptions,
) -> Result<Vec<NativeColumn>> {
    log::debug!("loading {} native columns", blocks.len());
    load_all(blocks, |i, block| load_native(block, schema_at(schemas, i), options))
}

/// Materialize each block into a standalone Arrow array.
#[cfg(feature = "arrow")]
pub fn load_arrow_columns(
    blocks: &[EncodedColumnBlock],
    schemas: &[Option<ColumnSchema>],
    options: LoaderOptions,
) -> Result<Vec<arrow_array::ArrayRef>> {
    log::debug!("loading {} arrow columns", blocks.len());
    load_all(blocks, |i, block| {
        crate::arrow::load_arrow(block, schema_at(schemas, i), options)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BlockWriter;
    use crate::types::LogicalType;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn blocks(n: i32) -> Vec<EncodedColumnBlock> {
        (0..n)
            .map(|i| {
                BlockWriter::sequential(
                    &format!("c{i}"),
                    LogicalType::Integer,
                    &[Some(Value::Integer(i)), None],
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn results_keep_input_order() {
        let columns = load_native_columns(&blocks(16), &[], LoaderOptions::default()).unwrap();
        let firsts: Vec<_> = columns.iter().map(|c| c.get(0)).collect();
        let expected: Vec<_> = (0..16).map(|i| Some(Value::Integer(i))).collect();
        assert_eq!(firsts, expected);
        assert!(columns.iter().all(|c| c.is_null(1)));
    }

    #[test]
    fn schemas_apply_per_block() {
        let schemas = vec![None, Some(ColumnSchema::new("c1", LogicalType::Long))];
        let columns = load_native_columns(&blocks(2), &schemas, LoaderOptions::default()).unwrap();
        assert_eq!(columns[0].logical_type(), LogicalType::Integer);
        assert_eq!(columns[1].get(0), Some(Value::Long(1)));
    }

    #[test]
    fn failing_block_fails_the_batch() {
        let mut input = blocks(3);
        input[1].payload = bytes::Bytes::from_static(&[1]);
        assert!(load_native_columns(&input, &[], LoaderOptions::default()).is_err());
    }
}
