// SPDX-License-Identifier: MIT

use core::str::FromStr;

use crate::document::LayoutDocument;
use crate::error::*;
use crate::number::{parse_human_number, produce_human_number};
use crate::partition::*;

pub const SIZE_OF_PARTITION_ENTRY_ARRAY_BYTES: u64 = 16 * 1024;
/// GPT header size in sectors.
pub const SIZE_OF_GPT_HEADER: u64 = 1;
/// Largest sector size any target may use.
pub const MAX_SECTOR_SIZE: u64 = 8 * 1024;
/// First byte usable by partitions when the primary GPT lives on the disk.
pub const START_SECTOR: u64 = 4 * MAX_SECTOR_SIZE;
/// Footprint of the backup GPT at the end of the disk.
pub const SECONDARY_GPT_BYTES: u64 =
    SIZE_OF_PARTITION_ENTRY_ARRAY_BYTES + SIZE_OF_GPT_HEADER * MAX_SECTOR_SIZE;
/// Extra room given to a resized rootfs for its verity hash tree, in percent.
pub const ROOTFS_HEADROOM_PERCENT: u64 = 15;

#[inline]
pub(crate) fn align_up(value: u64, unit: u64) -> u64 {
    if unit == 0 {
        return value;
    }
    value.div_ceil(unit).saturating_mul(unit)
}

#[inline]
fn align_down(value: u64, unit: u64) -> u64 {
    if unit == 0 { value } else { value - value % unit }
}

/// Space a partition really occupies on the device.
///
/// Block devices store exactly `bytes`. On raw flash the partition is padded
/// to whole erase blocks, UBI adds its per-block headers plus a fixed volume
/// reserve, and reserved erase blocks come on top.
pub fn full_partition_size(partition: &Partition, device: &DeviceInfo) -> u64 {
    let Some(erase_block_size) = device.erase_block_size.filter(|size| *size != 0) else {
        return partition.bytes;
    };

    let mut size = partition.bytes;
    if partition.is_ubi() {
        if let Some(usable) = device.ubi_block_size() {
            let page_size = device.page_size.unwrap_or(0);
            let overhead = size.div_ceil(usable).saturating_mul(2 * page_size);
            size = size.saturating_add(overhead);
        }
    }
    size = align_up(size, erase_block_size);
    if partition.is_ubi() {
        size = size.saturating_add(4 * erase_block_size);
    }
    size.saturating_add(
        partition
            .reserved_erase_blocks
            .unwrap_or(0)
            .saturating_mul(erase_block_size),
    )
}

/// Byte offset where the first partition may start.
pub fn start_byte_offset(doc: &LayoutDocument) -> u64 {
    if doc.device.external_gpt {
        0
    } else {
        START_SECTOR + doc.metadata.primary_entry_array_padding_bytes
    }
}

/// Alignment unit a partition's start is rounded to when written.
fn alignment_unit(partition: &Partition, doc: &LayoutDocument) -> u64 {
    if partition.kind.holds_filesystem() && partition.bytes > 1 {
        doc.metadata.fs_align
    } else {
        doc.metadata.fs_block_size
    }
}

/// Aggregate sizes of one layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableTotals {
    pub expand_count: usize,
    /// Declared size of the expand partition, its lower bound.
    pub expand_min: u64,
    pub last_partition_count: usize,
    /// Fixed partitions plus the primary and secondary GPT.
    pub byte_count: u64,
    /// Worst-case slack from aligning every partition start.
    pub fs_block_align_losses: u64,
    pub min_disk_size: u64,
}

pub fn table_totals(doc: &LayoutDocument) -> LayoutResult<TableTotals> {
    let mut totals = TableTotals {
        byte_count: start_byte_offset(doc),
        ..TableTotals::default()
    };

    for partition in &doc.partitions {
        if partition.is_expand() {
            totals.expand_count += 1;
            totals.expand_min = totals.expand_min.saturating_add(partition.bytes);
        } else {
            totals.byte_count = totals.byte_count.saturating_add(partition.bytes);
        }
        if partition.is_last_partition() {
            totals.last_partition_count += 1;
        }
        totals.fs_block_align_losses += alignment_unit(partition, doc);
    }
    totals.byte_count = totals.byte_count.saturating_add(SECONDARY_GPT_BYTES);

    if totals.expand_count > 1 {
        return Err(LayoutError::InvalidLayout(format!(
            "layout {}: only one partition can have the expand feature, found {}",
            doc.name, totals.expand_count
        )));
    }
    if totals.last_partition_count > 1 {
        return Err(LayoutError::InvalidLayout(format!(
            "layout {}: only one partition can have the last_partition feature, found {}",
            doc.name, totals.last_partition_count
        )));
    }

    totals.min_disk_size = totals
        .byte_count
        .saturating_add(totals.expand_min)
        .saturating_add(totals.fs_block_align_losses);
    Ok(totals)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustOp {
    Grow,
    Shrink,
    Set,
}

impl AdjustOp {
    fn symbol(&self) -> char {
        match self {
            AdjustOp::Grow => '+',
            AdjustOp::Shrink => '-',
            AdjustOp::Set => '=',
        }
    }
}

/// A `label:<op><size>` resize request, e.g. `ROOT-A:+100MiB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub label: String,
    pub op: AdjustOp,
    pub amount: i64,
}

impl Adjustment {
    /// Parses a whitespace separated list of adjustments.
    pub fn parse_list(text: &str) -> LayoutResult<Vec<Adjustment>> {
        text.split_whitespace().map(str::parse).collect()
    }
}

impl FromStr for Adjustment {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            LayoutError::InvalidAdjustment(format!(
                "adjustment {s:?} is not of the form <label>:<+|-|=><size>"
            ))
        };
        let (label, operation) = s.split_once(':').ok_or_else(invalid)?;
        if label.is_empty() {
            return Err(invalid());
        }
        let mut chars = operation.chars();
        let op = match chars.next() {
            Some('+') => AdjustOp::Grow,
            Some('-') => AdjustOp::Shrink,
            Some('=') => AdjustOp::Set,
            _ => return Err(invalid()),
        };
        Ok(Adjustment {
            label: label.to_string(),
            op,
            amount: parse_human_number(chars.as_str())?,
        })
    }
}

impl core::fmt::Display for Adjustment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}:{}{}",
            self.label,
            self.op.symbol(),
            produce_human_number(self.amount)
        )
    }
}

/// Resizes the partition named by `adjustment`.
///
/// A resized rootfs gets a filesystem filling the requested size and a
/// partition 15% larger for its verity hash tree.
pub fn apply_partition_adjustment(
    doc: &mut LayoutDocument,
    adjustment: &Adjustment,
) -> LayoutResult<()> {
    let fs_block_size = doc.metadata.fs_block_size;
    let partition = doc.partition_by_label_mut(&adjustment.label)?;

    let current = i128::from(partition.bytes);
    let amount = i128::from(adjustment.amount);
    let resized = match adjustment.op {
        AdjustOp::Grow => current + amount,
        AdjustOp::Shrink => current - amount,
        AdjustOp::Set => amount,
    };
    // Sizes stay within what a layout document can express.
    let resized = i64::try_from(resized)
        .ok()
        .and_then(|bytes| u64::try_from(bytes).ok())
        .ok_or_else(|| {
            LayoutError::InvalidAdjustment(format!(
                "{adjustment} takes {} to {resized} bytes",
                adjustment.label
            ))
        })?;
    let bytes = if partition.kind == PartitionType::Rootfs {
        let with_headroom = u128::from(resized) * u128::from(100 + ROOTFS_HEADROOM_PERCENT) / 100;
        i64::try_from(with_headroom)
            .ok()
            .and_then(|bytes| u64::try_from(bytes).ok())
            .ok_or_else(|| {
                LayoutError::InvalidAdjustment(format!(
                    "{adjustment} overflows with verity headroom"
                ))
            })?
    } else {
        resized
    };
    log::debug!(
        "adjusting {} from {} to {} bytes",
        adjustment.label,
        partition.bytes,
        bytes
    );
    if partition.kind == PartitionType::Rootfs {
        partition.fs_bytes = Some(resized);
        partition.fs_blocks = Some(resized / fs_block_size);
    }
    partition.bytes = bytes;
    Ok(())
}

/// Placement of one partition on a concrete disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionExtent {
    pub num: PartitionNum,
    pub label: Option<String>,
    pub start: u64,
    pub bytes: u64,
}

impl PartitionExtent {
    pub fn end(&self) -> u64 {
        self.start + self.bytes
    }
}

/// Lays the partitions out on a disk of `disk_size` bytes.
///
/// Extents are returned in disk order, which differs from layout order only
/// for the `last_partition`.
pub fn partition_extents(doc: &LayoutDocument, disk_size: u64) -> LayoutResult<Vec<PartitionExtent>> {
    let totals = table_totals(doc)?;
    if disk_size < totals.min_disk_size {
        return Err(LayoutError::InvalidSize(format!(
            "layout {} needs at least {} bytes, disk has {disk_size}",
            doc.name, totals.min_disk_size
        )));
    }
    let usable_end = disk_size - SECONDARY_GPT_BYTES;

    let ordered: Vec<&Partition> = doc
        .partitions
        .iter()
        .filter(|p| !p.is_last_partition())
        .chain(doc.partitions.iter().filter(|p| p.is_last_partition()))
        .collect();

    let mut extents = Vec::with_capacity(ordered.len());
    let mut cursor = start_byte_offset(doc);
    for (idx, partition) in ordered.iter().enumerate() {
        let unit = alignment_unit(partition, doc);
        let start = align_up(cursor, unit);
        let bytes = if partition.is_expand() {
            let tail: u64 = ordered[idx + 1..]
                .iter()
                .map(|p| {
                    let unit = alignment_unit(p, doc);
                    align_up(p.bytes, unit) + unit
                })
                .sum();
            let room = usable_end.saturating_sub(start).saturating_sub(tail);
            align_down(room, unit).max(partition.bytes)
        } else {
            partition.bytes
        };

        let end = start.saturating_add(bytes);
        if end > usable_end {
            return Err(LayoutError::InvalidSize(format!(
                "partition {} ends at {end}, past the usable end {usable_end} of the disk",
                partition.label_or_default()
            )));
        }
        extents.push(PartitionExtent {
            num: partition.num,
            label: partition.label.clone(),
            start,
            bytes,
        });
        cursor = end;
    }
    Ok(extents)
}
