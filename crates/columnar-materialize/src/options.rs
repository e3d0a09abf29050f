#![forbid(unsafe_code)]

use crate::types::LogicalType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Copy string/bytes payload ranges into fresh allocations instead of keeping slices of
    /// the block payload alive. Only affects the native backend; the Arrow backend always
    /// copies into its own buffers.
    pub copy_byte_slices: bool,
    /// Store null for string values whose bytes are not valid UTF-8.
    pub validate_utf8: bool,
    /// Value type of Arrow map entries when no schema describes the map.
    pub map_value_type: LogicalType,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            copy_byte_slices: false,
            validate_utf8: true,
            map_value_type: LogicalType::String,
        }
    }
}
