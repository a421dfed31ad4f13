// SPDX-License-Identifier: MIT

//! Resolution, normalization and validation of declarative disk layouts.
//!
//! A layout document names image variants (`base`, `usb`, ...) built on a
//! shared `common` layout and on any number of parent documents.
//! [`PartitionTable`] turns one into byte-exact partition tables.

pub mod config;
pub mod document;
pub mod error;
/// Partition sizes, table totals, resize requests and disk placement.
pub mod geometry;
pub mod merge;
pub mod normalize;
/// Human friendly size strings.
pub mod number;
pub mod partition;
pub mod resolve;
/// Where layout documents and their parents are read from.
pub mod source;
pub mod table;
/// Alignment, capacity and bad-block checks.
pub mod validate;

pub use config::LayoutConfig;
pub use document::LayoutDocument;
pub use error::{LayoutError, LayoutResult};
pub use geometry::{Adjustment, PartitionExtent, TableTotals};
pub use number::{SizeSpec, parse_human_number, parse_relative_number, produce_human_number};
pub use partition::{DeviceInfo, Features, Partition, PartitionNum, PartitionType};
pub use source::{ConfigSource, FsSource, MemorySource};
pub use table::PartitionTable;

/// Label reported for partitions that have none.
pub const DEFAULT_LABEL: &str = "UNTITLED";
/// UUID reported for partitions that let the writer pick one.
pub const DEFAULT_UUID: &str = "random";
