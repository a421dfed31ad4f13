// SPDX-License-Identifier: MIT

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::config::*;
use crate::document::{LayoutDocument, LayoutMetadata};
use crate::error::*;
use crate::number::{SizeSpec, produce_human_number};
use crate::partition::*;

/// Parses a size that must not be negative.
fn unsigned(spec: &SizeSpec, what: &str) -> LayoutResult<u64> {
    let value = spec.bytes()?;
    u64::try_from(value)
        .map_err(|_| LayoutError::InvalidSize(format!("{what} \"{spec}\" must not be negative")))
}

/// Parses `size`, raised to `size_min` when that is larger.
fn floored(size: &SizeSpec, min: Option<&SizeSpec>) -> LayoutResult<i64> {
    let value = size.bytes()?;
    match min {
        Some(min) => Ok(value.max(min.bytes()?)),
        None => Ok(value),
    }
}

pub fn normalize_metadata(raw: &RawMetadata) -> LayoutResult<LayoutMetadata> {
    let fs_block_size = raw
        .fs_block_size
        .as_ref()
        .ok_or_else(|| LayoutError::InvalidLayout("metadata is missing fs_block_size".into()))?;
    let fs_block_size = unsigned(fs_block_size, "fs_block_size")?;
    if fs_block_size == 0 {
        return Err(LayoutError::InvalidLayout(
            "fs_block_size must be positive".into(),
        ));
    }

    let fs_align = match &raw.fs_align {
        Some(spec) => unsigned(spec, "fs_align")?,
        None => fs_block_size,
    };
    if fs_align < fs_block_size || fs_align % fs_block_size != 0 {
        return Err(LayoutError::InvalidLayout(format!(
            "fs_align ({fs_align}) must be a multiple of fs_block_size ({fs_block_size})"
        )));
    }

    Ok(LayoutMetadata {
        block_size: raw
            .block_size
            .as_ref()
            .map(|s| unsigned(s, "block_size"))
            .transpose()?,
        fs_block_size,
        fs_align,
        primary_entry_array_padding_bytes: raw
            .primary_entry_array_padding_bytes
            .as_ref()
            .map(|s| unsigned(s, "primary_entry_array_padding_bytes"))
            .transpose()?
            .unwrap_or(0),
    })
}

/// Normalizes every image variant of a resolved document.
pub fn normalize_config(config: &LayoutConfig) -> LayoutResult<BTreeMap<String, LayoutDocument>> {
    let metadata = normalize_metadata(&config.metadata)?;

    if config.layouts.is_empty() {
        return Err(LayoutError::InvalidLayout(
            "missing \"layouts\" entries".into(),
        ));
    }
    if !config.layouts.contains_key(BASE_LAYOUT) {
        return Err(LayoutError::InvalidLayout(format!(
            "missing \"{BASE_LAYOUT}\" config in \"layouts\""
        )));
    }

    config
        .layouts
        .iter()
        .filter(|(name, _)| name.as_str() != COMMON_LAYOUT)
        .map(|(name, rows)| Ok((name.clone(), normalize_layout(name, &metadata, rows)?)))
        .collect()
}

/// Normalizes the rows of one image variant.
pub fn normalize_layout(
    name: &str,
    metadata: &LayoutMetadata,
    rows: &[RawPartition],
) -> LayoutResult<LayoutDocument> {
    let device = device_info(name, rows)?;

    let mut seen = BTreeSet::new();
    let mut partitions = Vec::with_capacity(rows.len());
    for row in rows.iter().filter(|row| !row.num.is_metadata()) {
        if let Some(num) = row.num.number()
            && !seen.insert(num)
        {
            return Err(LayoutError::InvalidLayout(format!(
                "layout {name} defines partition {num} twice"
            )));
        }
        partitions.push(normalize_partition(name, metadata, &device, row)?);
    }

    Ok(LayoutDocument {
        name: name.to_string(),
        metadata: metadata.clone(),
        device,
        partitions,
    })
}

/// Lifts the metadata pseudo-partition out of a layout.
fn device_info(name: &str, rows: &[RawPartition]) -> LayoutResult<DeviceInfo> {
    let mut meta_rows = rows.iter().filter(|row| row.num.is_metadata());
    let Some(row) = meta_rows.next() else {
        return Ok(DeviceInfo::default());
    };
    if meta_rows.next().is_some() {
        return Err(LayoutError::InvalidLayout(format!(
            "layout {name} has more than one metadata partition"
        )));
    }

    let kind = row.kind.as_deref().unwrap_or("blank");
    if kind != "blank" && row.label.is_none() {
        return Err(LayoutError::InvalidLayout(format!(
            "layout {name}: metadata partition of type {kind} is missing \"label\""
        )));
    }
    parse_features(name, row)?;

    let bytes = match &row.size {
        Some(size) => Some(u64::try_from(floored(size, row.size_min.as_ref())?).map_err(|_| {
            LayoutError::InvalidSize(format!("layout {name}: device size \"{size}\" is negative"))
        })?),
        None => row.bytes,
    };

    Ok(DeviceInfo {
        bytes,
        erase_block_size: row
            .erase_block_size
            .as_ref()
            .map(|s| unsigned(s, "erase_block_size"))
            .transpose()?,
        page_size: row
            .page_size
            .as_ref()
            .map(|s| unsigned(s, "page_size"))
            .transpose()?,
        max_bad_erase_blocks: row.max_bad_erase_blocks,
        hybrid_mbr: row.hybrid_mbr.unwrap_or(false),
        external_gpt: row.external_gpt.unwrap_or(false),
    })
}

fn normalize_partition(
    name: &str,
    metadata: &LayoutMetadata,
    device: &DeviceInfo,
    row: &RawPartition,
) -> LayoutResult<Partition> {
    // Every non-metadata row names its type, blank gaps included.
    let kind = row.kind.as_deref().ok_or_else(|| {
        LayoutError::InvalidLayout(format!(
            "layout {name}: partition {} is missing \"type\"",
            row.describe()
        ))
    })?;
    let kind = PartitionType::parse(kind);

    if kind != PartitionType::Blank {
        if row.num.is_gap() {
            return Err(LayoutError::InvalidLayout(format!(
                "layout \"{name}\" missing \"num\" on a {kind} partition"
            )));
        }
        if row.label.is_none() {
            return Err(LayoutError::InvalidLayout(format!(
                "layout \"{name}\" missing \"label\" on partition {}",
                row.num
            )));
        }
    }
    let label = row.label.as_deref().unwrap_or(crate::DEFAULT_LABEL);

    let bytes = match &row.size {
        Some(size) => u64::try_from(floored(size, row.size_min.as_ref())?).map_err(|_| {
            LayoutError::InvalidSize(format!("layout {name}: size \"{size}\" of {label} is negative"))
        })?,
        None => row.bytes.unwrap_or(1),
    };

    let mut fs_bytes = None;
    if let Some(fs_size) = &row.fs_size {
        let size = floored(fs_size, row.fs_size_min.as_ref())?;
        if size <= 0 {
            return Err(LayoutError::InvalidSize(format!(
                "file system size \"{fs_size}\" must be positive"
            )));
        }
        let size = size as u64;
        if size > bytes {
            return Err(LayoutError::InvalidSize(format!(
                "filesystem may not be larger than partition: {name} {label}: {size} > {bytes}"
            )));
        }
        if size % metadata.fs_align != 0 {
            return Err(LayoutError::InvalidSize(format!(
                "file system size \"{fs_size}\" ({size} bytes) is not an even multiple of fs_align: {}",
                metadata.fs_align
            )));
        }
        if row.format.as_deref() == Some("ubi") {
            check_ubi_fs_size(device, fs_size, size)?;
        }
        fs_bytes = Some(size);
    }

    let mut fs_blocks = None;
    if let Some(spec) = &row.fs_blocks {
        let max_fs_blocks = (bytes / metadata.fs_block_size) as i64;
        let blocks = u64::try_from(spec.relative_to(max_fs_blocks)?).map_err(|_| {
            LayoutError::InvalidSize(format!("fs_blocks \"{spec}\" of {label} is negative"))
        })?;
        let size = blocks.checked_mul(metadata.fs_block_size).ok_or_else(|| {
            LayoutError::InvalidSize(format!("fs_blocks \"{spec}\" of {label} overflows"))
        })?;
        if size % metadata.fs_align != 0 {
            return Err(LayoutError::InvalidSize(format!(
                "file system size {blocks} blocks ({size} bytes) is not an even multiple of fs_align: {}",
                metadata.fs_align
            )));
        }
        if size > bytes {
            return Err(LayoutError::InvalidLayout(format!(
                "filesystem may not be larger than partition: {name} {label}: {size} > {bytes}"
            )));
        }
        fs_blocks = Some(blocks);
        fs_bytes = Some(size);
    }

    if let Some(spec) = &row.erase_block_size {
        unsigned(spec, "erase_block_size")?;
    }
    if let Some(spec) = &row.page_size {
        unsigned(spec, "page_size")?;
    }

    let features = parse_features(name, row)?;
    let fs_options = collapse_fs_options(label, row)?;

    if let Some(uuid) = &row.uuid
        && uuid != crate::DEFAULT_UUID
        && uuid::Uuid::parse_str(uuid).is_err()
    {
        return Err(LayoutError::InvalidLayout(format!(
            "{label}: uuid {uuid:?} is neither \"{}\" nor a valid UUID",
            crate::DEFAULT_UUID
        )));
    }

    Ok(Partition {
        num: row.num,
        label: row.label.clone(),
        kind,
        bytes,
        fs_bytes,
        fs_blocks,
        format: row.format.clone(),
        fs_format: row.fs_format.clone(),
        fs_options,
        uuid: row.uuid.clone(),
        features,
        reserved_erase_blocks: row.reserved_erase_blocks,
    })
}

/// UBI volumes only use whole logical erase blocks.
fn check_ubi_fs_size(device: &DeviceInfo, fs_size: &SizeSpec, size: u64) -> LayoutResult<()> {
    let ubi_block_size = device.ubi_block_size().ok_or_else(|| {
        LayoutError::InvalidLayout(
            "ubi partitions need erase_block_size and page_size on the metadata partition".into(),
        )
    })?;
    if size % ubi_block_size != 0 {
        let trimmed = size - size % ubi_block_size;
        return Err(LayoutError::InvalidSize(format!(
            "file system size \"{fs_size}\" ({size} bytes) is not a multiple of UBI erase block \
             size ({ubi_block_size}). Please set \"fs_size\" to \"{}\" in the \"common\" layout instead.",
            produce_human_number(trimmed as i64)
        )));
    }
    Ok(())
}

fn parse_features(name: &str, row: &RawPartition) -> LayoutResult<Features> {
    let mut features = Features::empty();
    let mut unknown = Vec::new();
    for feature in row.features.iter().flatten() {
        match Features::from_feature_name(feature) {
            Some(flag) => features |= flag,
            None => unknown.push(feature.as_str()),
        }
    }
    if !unknown.is_empty() {
        unknown.sort_unstable();
        return Err(LayoutError::InvalidLayout(format!(
            "layout {name}: {}: unknown features: {}",
            row.describe(),
            unknown.join(", ")
        )));
    }
    Ok(features)
}

/// Picks the options string for the partition's filesystem format.
fn collapse_fs_options(label: &str, row: &RawPartition) -> LayoutResult<String> {
    let options = match &row.fs_options {
        None => String::new(),
        Some(FsOptions::Fixed(options)) => options.clone(),
        Some(FsOptions::PerFormat(map)) => {
            match map.get(row.fs_format.as_deref().unwrap_or_default()) {
                None => String::new(),
                Some(Value::String(options)) => options.clone(),
                Some(other) => {
                    return Err(LayoutError::InvalidLayout(format!(
                        "{label}: fs_options must be a string, got {other}"
                    )));
                }
            }
        }
    };
    if options.contains(['\'', '"']) {
        return Err(LayoutError::InvalidLayout(format!(
            "{label}: fs_options cannot contain quotes: {options}"
        )));
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(fs_block_size: u64, fs_align: u64) -> LayoutMetadata {
        LayoutMetadata {
            block_size: Some(512),
            fs_block_size,
            fs_align,
            primary_entry_array_padding_bytes: 0,
        }
    }

    fn rows(value: serde_json::Value) -> Vec<RawPartition> {
        serde_json::from_value(value).unwrap()
    }

    fn one(value: serde_json::Value) -> LayoutResult<Partition> {
        let doc = normalize_layout("base", &meta(4096, 4096), &rows(json!([value])))?;
        Ok(doc.partitions.into_iter().next().unwrap())
    }

    #[test]
    fn metadata_defaults_and_alignment() {
        let raw: RawMetadata = serde_json::from_value(json!({ "fs_block_size": "4KiB" })).unwrap();
        let m = normalize_metadata(&raw).unwrap();
        assert_eq!((m.fs_block_size, m.fs_align), (4096, 4096));
        assert_eq!(m.primary_entry_array_padding_bytes, 0);

        let raw: RawMetadata =
            serde_json::from_value(json!({ "fs_block_size": 4096, "fs_align": "2MiB" })).unwrap();
        assert_eq!(normalize_metadata(&raw).unwrap().fs_align, 2 << 20);

        for bad in [json!({ "fs_block_size": 4096, "fs_align": 6144 }),
                    json!({ "fs_block_size": 4096, "fs_align": 2048 }),
                    json!({ "fs_block_size": 0 }),
                    json!({ "block_size": 512 })] {
            let raw: RawMetadata = serde_json::from_value(bad).unwrap();
            assert!(matches!(normalize_metadata(&raw), Err(LayoutError::InvalidLayout(_))));
        }
    }

    #[test]
    fn sizes_and_floors() {
        let p = one(json!({ "num": 1, "label": "A", "type": "data", "size": "1MiB", "size_min": "2MiB" }))
            .unwrap();
        assert_eq!(p.bytes, 2 << 20);
        let p = one(json!({ "num": 1, "label": "A", "type": "data" })).unwrap();
        assert_eq!(p.bytes, 1);
        let p = one(json!({ "num": 1, "label": "A", "type": "data", "size": "8MiB",
                            "fs_size": "1MiB", "fs_size_min": "4MiB" })).unwrap();
        assert_eq!(p.fs_bytes, Some(4 << 20));
    }

    #[test]
    fn required_fields() {
        let no_label = one(json!({ "num": 1, "type": "data" }));
        assert!(matches!(no_label, Err(LayoutError::InvalidLayout(_))));
        let no_num = one(json!({ "label": "A", "type": "data" }));
        assert!(matches!(no_num, Err(LayoutError::InvalidLayout(_))));
        let gap = one(json!({ "type": "blank", "size": "1MiB" })).unwrap();
        assert_eq!(gap.label_or_default(), "UNTITLED");
    }

    #[test]
    fn type_required_even_on_gaps() {
        let no_type = one(json!({ "num": 1, "label": "A" }));
        assert!(matches!(no_type, Err(LayoutError::InvalidLayout(_))));
        let untyped_gap = one(json!({ "size": "1MiB" }));
        assert!(matches!(untyped_gap, Err(LayoutError::InvalidLayout(_))));
    }

    #[test]
    fn fs_size_violations_are_size_errors() {
        for bad in [
            json!({ "num": 1, "label": "A", "type": "data", "size": "4MiB", "fs_size": "0" }),
            json!({ "num": 1, "label": "A", "type": "data", "size": "4MiB", "fs_size": "8MiB" }),
            json!({ "num": 1, "label": "A", "type": "data", "size": "4MiB", "fs_size": "1000" }),
            json!({ "num": 1, "label": "A", "type": "data", "size": "-4MiB" }),
        ] {
            assert!(matches!(one(bad), Err(LayoutError::InvalidSize(_))));
        }
    }

    #[test]
    fn fs_blocks_are_relative_to_partition() {
        let p = one(json!({ "num": 1, "label": "A", "type": "data", "size": "4MiB", "fs_blocks": "-256" }))
            .unwrap();
        assert_eq!(p.fs_blocks, Some(768));
        assert_eq!(p.fs_bytes, Some(3 << 20));
        let p = one(json!({ "num": 1, "label": "A", "type": "data", "size": "4MiB", "fs_blocks": "50%" }))
            .unwrap();
        assert_eq!(p.fs_bytes, Some(2 << 20));

        let too_big =
            one(json!({ "num": 1, "label": "A", "type": "data", "size": "4MiB", "fs_blocks": 2048 }));
        assert!(matches!(too_big, Err(LayoutError::InvalidLayout(_))));

        let doc = normalize_layout(
            "base",
            &meta(4096, 8192),
            &rows(json!([{ "num": 1, "label": "A", "type": "data", "size": "4MiB", "fs_blocks": 3 }])),
        );
        assert!(matches!(doc, Err(LayoutError::InvalidSize(_))));
    }

    #[test]
    fn ubi_fs_size_must_fill_whole_blocks() {
        let layout = |fs_size: &str| {
            rows(json!([
                { "num": "metadata", "erase_block_size": "128KiB", "page_size": "2KiB" },
                { "num": 1, "label": "ROOT-A", "type": "rootfs", "format": "ubi",
                  "size": "64MiB", "fs_size": fs_size }
            ]))
        };
        // 124KiB usable per erase block.
        assert!(normalize_layout("base", &meta(4096, 4096), &layout("496KiB")).is_ok());
        let err = normalize_layout("base", &meta(4096, 4096), &layout("32MiB")).unwrap_err();
        match err {
            LayoutError::InvalidSize(msg) => assert!(msg.contains("32736KiB"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn features_are_closed() {
        let p = one(json!({ "num": 1, "label": "A", "type": "data", "features": ["expand"] })).unwrap();
        assert!(p.is_expand());
        let err = one(json!({ "num": 1, "label": "A", "type": "data", "features": ["grow", "expand"] }))
            .unwrap_err();
        match err {
            LayoutError::InvalidLayout(msg) => assert!(msg.contains("grow") && !msg.contains("expand,")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fs_options_collapse_per_format() {
        let p = one(json!({ "num": 1, "label": "A", "type": "data", "fs_format": "ext4",
                            "fs_options": { "ext4": "-i 65536", "btrfs": "-m single" } })).unwrap();
        assert_eq!(p.fs_options, "-i 65536");
        let p = one(json!({ "num": 1, "label": "A", "type": "data",
                            "fs_options": { "ext4": "-i 65536" } })).unwrap();
        assert_eq!(p.fs_options, "");
        let quoted = one(json!({ "num": 1, "label": "A", "type": "data", "fs_options": "-L 'x'" }));
        assert!(matches!(quoted, Err(LayoutError::InvalidLayout(_))));
        let not_string = one(json!({ "num": 1, "label": "A", "type": "data", "fs_format": "ext4",
                                     "fs_options": { "ext4": 3 } }));
        assert!(matches!(not_string, Err(LayoutError::InvalidLayout(_))));
    }

    #[test]
    fn uuid_must_be_random_or_well_formed() {
        let ok = one(json!({ "num": 1, "label": "A", "type": "data",
                             "uuid": "0fc63daf-8483-4772-8e79-3d69d8477de4" }));
        assert!(ok.is_ok());
        let bad = one(json!({ "num": 1, "label": "A", "type": "data", "uuid": "fresh" }));
        assert!(matches!(bad, Err(LayoutError::InvalidLayout(_))));
    }

    #[test]
    fn metadata_row_becomes_device_info() {
        let doc = normalize_layout(
            "base",
            &meta(4096, 4096),
            &rows(json!([
                { "num": "metadata", "size": "1GiB", "erase_block_size": "128KiB",
                  "page_size": 2048, "max_bad_erase_blocks": 40, "external_gpt": true },
                { "num": 1, "label": "A", "type": "data" }
            ])),
        )
        .unwrap();
        assert_eq!(doc.partitions.len(), 1);
        assert_eq!(doc.device.bytes, Some(1 << 30));
        assert_eq!(doc.device.erase_block_size, Some(128 << 10));
        assert_eq!(doc.device.max_bad_erase_blocks, Some(40));
        assert!(doc.device.external_gpt && !doc.device.hybrid_mbr);

        let twice = normalize_layout(
            "base",
            &meta(4096, 4096),
            &rows(json!([{ "num": "metadata" }, { "num": "metadata" }])),
        );
        assert!(matches!(twice, Err(LayoutError::InvalidLayout(_))));
    }

    #[test]
    fn duplicate_numbers_are_rejected() {
        let doc = normalize_layout(
            "base",
            &meta(4096, 4096),
            &rows(json!([
                { "num": 1, "label": "A", "type": "data" },
                { "num": 1, "label": "B", "type": "data" }
            ])),
        );
        assert!(matches!(doc, Err(LayoutError::InvalidLayout(_))));
    }

    #[test]
    fn config_needs_base_layout() {
        let config = LayoutConfig::from_value(json!({
            "metadata": { "fs_block_size": 4096 },
            "layouts": { "common": [], "test": [] }
        }))
        .unwrap();
        assert!(matches!(normalize_config(&config), Err(LayoutError::InvalidLayout(_))));

        let empty = LayoutConfig::from_value(json!({ "metadata": { "fs_block_size": 4096 } })).unwrap();
        assert!(matches!(normalize_config(&empty), Err(LayoutError::InvalidLayout(_))));
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let once = normalize_layout(
            "base",
            &meta(4096, 4096),
            &rows(json!([
                { "num": 1, "label": "STATE", "type": "data", "size": "1GiB",
                  "fs_blocks": "90%", "features": ["expand"], "fs_format": "ext4",
                  "fs_options": { "ext4": "-i 8192" } },
                { "type": "blank", "size": "2MiB" },
                { "num": 3, "label": "ROOT-A", "type": "rootfs", "size": "2GiB",
                  "fs_size": "1GiB", "uuid": "random", "reserved_erase_blocks": 2 }
            ])),
        )
        .unwrap();
        let raw: Vec<RawPartition> = once.partitions.iter().map(Partition::to_raw).collect();
        let twice = normalize_layout("base", &once.metadata, &raw).unwrap();
        assert_eq!(once, twice);
    }
}
