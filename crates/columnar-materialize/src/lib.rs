//! Materialization layer for encoded column blocks.
//!
//! This crate focuses on:
//! - Decoding self-describing column blocks (sequential, constant, dictionary, run-length
//!   array and container encodings) through one loader protocol.
//! - Two backends behind that protocol: cell-addressable native columns, and Arrow arrays
//!   (behind the `arrow` feature).
//! - Nested columns (arrays, structs, maps, unions) with optional schema-driven shapes.
//! - Loading independent top-level blocks on a worker pool (behind the `parallel` feature).

#![forbid(unsafe_code)]

#[cfg(feature = "arrow")]
pub mod arrow;
mod bitmap;
mod block;
pub mod codec;
mod dictionary;
mod error;
mod loader;
pub mod native;
mod options;
mod parallel;
mod sink;
mod types;
mod value;

pub use crate::bitmap::BitVec;
pub use crate::block::{EncodedColumnBlock, RowProjection};
pub use crate::codec::{BlockWriter, RunGroup};
pub use crate::dictionary::Dictionary;
pub use crate::error::{LoadError, Result};
pub use crate::loader::{select_variant, BoxedLoader, ColumnLoader, LoaderFactory, LoaderVariant};
pub use crate::native::{load_native, NativeColumn, NativeLoaderFactory};
pub use crate::options::LoaderOptions;
#[cfg(feature = "arrow")]
pub use crate::parallel::load_arrow_columns;
pub use crate::parallel::load_native_columns;
pub use crate::sink::{GroupSpan, RunTable};
pub use crate::types::{ColumnSchema, EncodingKind, LogicalType};
pub use crate::value::{ByteSlice, CastError, Primitive, Value};

#[cfg(feature = "arrow")]
pub use crate::arrow::{load_arrow, ArrowLoaderFactory};
