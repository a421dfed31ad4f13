// SPDX-License-Identifier: MIT

use crate::document::LayoutDocument;
use crate::error::*;
use crate::geometry::{full_partition_size, table_totals};
use crate::partition::*;

/// Highest accepted chance that bad blocks exhaust a partition's reserve.
pub const MAX_FAILURE_PROBABILITY: f64 = 1e-5;

/// Runs every layout check, stopping at the first failure.
pub fn validate(doc: &LayoutDocument) -> LayoutResult<()> {
    table_totals(doc)?;
    check_rootfs_partitions_match(doc)?;
    check_total_size(doc)?;
    check_simple_nand_properties(doc)?;
    check_reserved_erase_blocks(doc)
}

/// A/B root filesystems must be interchangeable.
pub fn check_rootfs_partitions_match(doc: &LayoutDocument) -> LayoutResult<()> {
    let mut rootfs = doc
        .partitions
        .iter()
        .filter(|p| p.kind == PartitionType::Rootfs);
    let Some(first) = rootfs.next() else {
        return Ok(());
    };

    for other in rootfs {
        let (a, b) = (
            first.format.as_deref().unwrap_or(""),
            other.format.as_deref().unwrap_or(""),
        );
        if a != b {
            return Err(LayoutError::MismatchedRootfsFormat(format!(
                "rootfs partitions {} and {} have different formats: {a:?} vs {b:?}",
                first.label_or_default(),
                other.label_or_default()
            )));
        }
        let (a, b) = (
            first.reserved_erase_blocks.unwrap_or(0),
            other.reserved_erase_blocks.unwrap_or(0),
        );
        if a != b {
            return Err(LayoutError::MismatchedRootfsBlocks(format!(
                "rootfs partitions {} and {} reserve different erase blocks: {a} vs {b}",
                first.label_or_default(),
                other.label_or_default()
            )));
        }
    }
    Ok(())
}

pub fn check_total_size(doc: &LayoutDocument) -> LayoutResult<()> {
    let Some(capacity) = doc.device.bytes else {
        return Ok(());
    };
    let total = doc
        .partitions
        .iter()
        .map(|p| u128::from(full_partition_size(p, &doc.device)))
        .sum::<u128>();
    if total > u128::from(capacity) {
        return Err(LayoutError::ExcessPartitionSize(format!(
            "layout {}: partitions need {total} bytes, the device holds {capacity}",
            doc.name
        )));
    }
    Ok(())
}

/// Raw NAND partitions cover whole erase blocks and cannot grow.
pub fn check_simple_nand_properties(doc: &LayoutDocument) -> LayoutResult<()> {
    if doc.device.max_bad_erase_blocks.is_none() {
        return Ok(());
    }
    let erase_block_size = doc
        .device
        .erase_block_size
        .filter(|size| *size != 0)
        .ok_or_else(|| {
            LayoutError::MissingEraseBlockField(format!(
                "layout {}: max_bad_erase_blocks is set but erase_block_size is not",
                doc.name
            ))
        })?;

    for partition in &doc.partitions {
        if partition.bytes % erase_block_size != 0 {
            return Err(LayoutError::UnalignedPartition(format!(
                "partition {} ({} bytes) is not a multiple of the erase block size {erase_block_size}",
                partition.label_or_default(),
                partition.bytes
            )));
        }
        if partition.is_expand() {
            return Err(LayoutError::ExpandNandImpossible(format!(
                "partition {} cannot expand on raw NAND",
                partition.label_or_default()
            )));
        }
    }
    Ok(())
}

/// Bounds the chance of bad blocks exceeding each partition's reserve.
pub fn check_reserved_erase_blocks(doc: &LayoutDocument) -> LayoutResult<()> {
    let device = &doc.device;
    for partition in &doc.partitions {
        let wants_reserve = partition.reserved_erase_blocks.is_some()
            || matches!(partition.format.as_deref(), Some("ubi" | "nand"));
        if !wants_reserve || partition.bytes == 0 {
            continue;
        }

        let label = partition.label_or_default();
        let missing = |field: &str| {
            LayoutError::MissingEraseBlockField(format!(
                "partition {label} reserves erase blocks but {field} is not set"
            ))
        };
        let max_bad = device
            .max_bad_erase_blocks
            .ok_or_else(|| missing("max_bad_erase_blocks"))?;
        let device_bytes = device.bytes.ok_or_else(|| missing("the device size"))?;
        let erase_block_size = device
            .erase_block_size
            .filter(|size| *size != 0)
            .ok_or_else(|| missing("erase_block_size"))?;
        device.page_size.ok_or_else(|| missing("page_size"))?;
        let reserved = partition
            .reserved_erase_blocks
            .ok_or_else(|| missing("reserved_erase_blocks"))?;

        let probability = failure_probability(
            device_bytes / erase_block_size,
            max_bad,
            partition.bytes / erase_block_size,
            reserved,
        );
        log::debug!("partition {label}: reserve exhaustion probability {probability:e}");
        if probability > MAX_FAILURE_PROBABILITY {
            return Err(LayoutError::ExcessFailureProbability(format!(
                "partition {label}: {reserved} reserved erase blocks give a {probability:e} \
                 chance of running out, above {MAX_FAILURE_PROBABILITY:e}"
            )));
        }
    }
    Ok(())
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Exact binomial coefficient `n` choose `k`.
///
/// Impossible selections (`k < 0` or `k > n`) count as zero ways. Returns
/// `None` when the result does not fit in a `u128`.
pub fn combinations(n: i64, k: i64) -> Option<u128> {
    if k < 0 || k > n {
        return Some(0);
    }
    let k = k.min(n - k) as u128;
    let n = n as u128;

    let mut result: u128 = 1;
    for i in 1..=k {
        // result * (n - k + i) is divisible by i; divide before multiplying.
        let g = gcd(result, i);
        let factor = (n - k + i) / (i / g);
        result = (result / g).checked_mul(factor)?;
    }
    Some(result)
}

/// ln C(n, k) for `0 <= k <= n`.
fn ln_combinations(n: u64, k: u64) -> f64 {
    let k = k.min(n - k);
    (1..=k)
        .map(|i| ((n - k + i) as f64).ln() - (i as f64).ln())
        .sum()
}

fn ln_add(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Chance that more than `reserved` of `bad_blocks` randomly placed bad
/// blocks land in a partition of `partition_blocks` on a device of
/// `device_blocks` erase blocks.
///
/// Terms of the sum are walked in the log domain, each derived from the
/// previous one by its ratio, so device sized factorials never materialize.
pub fn failure_probability(
    device_blocks: u64,
    bad_blocks: u64,
    partition_blocks: u64,
    reserved: u64,
) -> f64 {
    if device_blocks < bad_blocks {
        return 1.0;
    }
    let partition_blocks = partition_blocks.min(device_blocks);
    let outside = device_blocks - partition_blocks;

    // j bad blocks inside the partition needs bad_blocks - j of them outside.
    let first = (reserved + 1).max(bad_blocks.saturating_sub(outside));
    let last = bad_blocks.min(partition_blocks);
    if first > last {
        return 0.0;
    }

    let mut term = ln_combinations(partition_blocks, first)
        + ln_combinations(outside, bad_blocks - first);
    let mut ways = term;
    for j in first..last {
        // C(p, j+1) / C(p, j) * C(o, b-j-1) / C(o, b-j)
        term += ((partition_blocks - j) as f64).ln() - ((j + 1) as f64).ln()
            + ((bad_blocks - j) as f64).ln()
            - ((outside + j + 1 - bad_blocks) as f64).ln();
        ways = ln_add(ways, term);
    }

    (ways - ln_combinations(device_blocks, bad_blocks))
        .exp()
        .min(1.0)
}
