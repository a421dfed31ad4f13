// SPDX-License-Identifier: MIT

use std::collections::BTreeSet;

use crate::config::RawPartition;
use crate::error::*;
use crate::partition::PartitionNum;

fn numbers(layout: &[RawPartition]) -> BTreeSet<PartitionNum> {
    layout
        .iter()
        .map(|part| part.num)
        .filter(|num| !num.is_gap())
        .collect()
}

fn order_of(layout: &[RawPartition], common: &BTreeSet<PartitionNum>) -> Vec<PartitionNum> {
    layout
        .iter()
        .map(|part| part.num)
        .filter(|num| common.contains(num))
        .collect()
}

fn render(nums: impl IntoIterator<Item = PartitionNum>) -> String {
    let nums: Vec<String> = nums.into_iter().map(|n| n.to_string()).collect();
    format!("[{}]", nums.join(", "))
}

/// Applies the rows of `layout` on top of `to_override`.
///
/// Partitions present in both keep their relative order and get their fields
/// merged; partitions only in `layout` are inserted where their neighbours put
/// them; partitions only in `to_override` are left alone. Gap rows facing each
/// other are merged in place.
pub fn apply_layout_overrides(
    to_override: &mut Vec<RawPartition>,
    layout: &[RawPartition],
) -> LayoutResult<()> {
    let common: BTreeSet<PartitionNum> = numbers(to_override)
        .intersection(&numbers(layout))
        .copied()
        .collect();

    let override_order = order_of(to_override, &common);
    let layout_order = order_of(layout, &common);
    if override_order != layout_order {
        return Err(LayoutError::ConflictingPartitionOrder(format!(
            "layouts share partitions {} but in a different order: {} vs {}",
            render(common.iter().copied()),
            render(to_override.iter().map(|p| p.num)),
            render(layout.iter().map(|p| p.num)),
        )));
    }

    let mut cursor = 0;
    for part in layout {
        if cursor == to_override.len() {
            log::trace!("append {}", part.describe());
            to_override.push(part.clone());
        } else if to_override[cursor].num.is_gap() && part.num.is_gap() {
            to_override[cursor].overlay(part);
        } else if common.contains(&part.num) {
            let offset = to_override[cursor..]
                .iter()
                .position(|p| p.num == part.num)
                .ok_or_else(|| {
                    LayoutError::ConflictingPartitionOrder(format!(
                        "partition {} appears more than once",
                        part.num
                    ))
                })?;
            cursor += offset;
            to_override[cursor].overlay(part);
        } else {
            log::trace!("insert {} at {cursor}", part.describe());
            to_override.insert(cursor, part.clone());
        }
        cursor += 1;
    }

    Ok(())
}
