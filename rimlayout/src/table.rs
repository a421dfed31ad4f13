// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::config::LayoutConfig;
use crate::document::{LayoutDocument, LayoutDump, LayoutMetadata};
use crate::error::*;
use crate::geometry::*;
use crate::normalize::{normalize_config, normalize_metadata};
use crate::partition::*;
use crate::resolve::{load_stacked_config, resolve_config};
use crate::source::{ConfigSource, FsSource, MemorySource};
use crate::validate;

/// Every image variant of a layout document, resolved, normalized and
/// adjusted up front.
///
/// Each variant owns its partitions; adjusting one never affects another.
#[derive(Debug, Clone)]
pub struct PartitionTable {
    metadata: LayoutMetadata,
    variants: BTreeMap<String, LayoutDocument>,
}

impl PartitionTable {
    pub fn from_file(path: impl AsRef<Path>, adjustments: &[Adjustment]) -> LayoutResult<Self> {
        let path = path.as_ref();
        Self::from_source(&FsSource::new(), &path.to_string_lossy(), adjustments)
    }

    pub fn from_source<S: ConfigSource + ?Sized>(
        source: &S,
        name: &str,
        adjustments: &[Adjustment],
    ) -> LayoutResult<Self> {
        Self::build(load_stacked_config(source, name)?, adjustments)
    }

    /// Builds from an already parsed document; parents come from `source`.
    pub fn from_config<S: ConfigSource + ?Sized>(
        source: &S,
        config: LayoutConfig,
        adjustments: &[Adjustment],
    ) -> LayoutResult<Self> {
        Self::build(resolve_config(source, config, None)?, adjustments)
    }

    /// Builds from a parsed document tree. It cannot name parents.
    pub fn from_value(value: Value, adjustments: &[Adjustment]) -> LayoutResult<Self> {
        Self::from_config(
            &MemorySource::new(),
            LayoutConfig::from_value(value)?,
            adjustments,
        )
    }

    fn build(config: LayoutConfig, adjustments: &[Adjustment]) -> LayoutResult<Self> {
        let metadata = normalize_metadata(&config.metadata)?;
        let mut variants = normalize_config(&config)?;
        for doc in variants.values_mut() {
            for adjustment in adjustments {
                log::debug!("layout {}: applying {adjustment}", doc.name);
                apply_partition_adjustment(doc, adjustment)?;
            }
        }
        Ok(Self { metadata, variants })
    }

    pub fn image_types(&self) -> Vec<&str> {
        self.variants.keys().map(String::as_str).collect()
    }

    pub fn layout(&self, variant: &str) -> LayoutResult<&LayoutDocument> {
        self.variants.get(variant).ok_or_else(|| {
            LayoutError::InvalidLayout(format!(
                "unknown layout {variant:?}, expected one of: {}",
                self.image_types().join(", ")
            ))
        })
    }

    fn partition(&self, variant: &str, num: u32) -> LayoutResult<&Partition> {
        self.layout(variant)?.partition(num)
    }

    pub fn block_size(&self) -> Option<u64> {
        self.metadata.block_size
    }

    pub fn fs_block_size(&self) -> u64 {
        self.metadata.fs_block_size
    }

    pub fn partition_numbers(&self, variant: &str) -> LayoutResult<Vec<u32>> {
        Ok(self.layout(variant)?.numbers())
    }

    pub fn partition_size(&self, variant: &str, num: u32) -> LayoutResult<u64> {
        Ok(self.partition(variant, num)?.bytes)
    }

    /// Filesystem size, the whole partition unless set explicitly.
    pub fn filesystem_size(&self, variant: &str, num: u32) -> LayoutResult<u64> {
        let partition = self.partition(variant, num)?;
        Ok(partition.fs_bytes.unwrap_or(partition.bytes))
    }

    pub fn label(&self, variant: &str, num: u32) -> LayoutResult<&str> {
        Ok(self.partition(variant, num)?.label_or_default())
    }

    pub fn number(&self, variant: &str, label: &str) -> LayoutResult<u32> {
        self.layout(variant)?
            .partition_by_label(label)?
            .num
            .number()
            .ok_or_else(|| {
                LayoutError::PartitionNotFound(format!("label {label} has no partition number"))
            })
    }

    pub fn partition_type(&self, variant: &str, num: u32) -> LayoutResult<&PartitionType> {
        Ok(&self.partition(variant, num)?.kind)
    }

    pub fn format(&self, variant: &str, num: u32) -> LayoutResult<&str> {
        Ok(self.partition(variant, num)?.format.as_deref().unwrap_or(""))
    }

    pub fn filesystem_format(&self, variant: &str, num: u32) -> LayoutResult<&str> {
        Ok(self
            .partition(variant, num)?
            .fs_format
            .as_deref()
            .unwrap_or(""))
    }

    pub fn filesystem_options(&self, variant: &str, num: u32) -> LayoutResult<&str> {
        Ok(&self.partition(variant, num)?.fs_options)
    }

    pub fn uuid(&self, variant: &str, num: u32) -> LayoutResult<&str> {
        Ok(self
            .partition(variant, num)?
            .uuid
            .as_deref()
            .unwrap_or(crate::DEFAULT_UUID))
    }

    pub fn reserved_erase_blocks(&self, variant: &str, num: u32) -> LayoutResult<u64> {
        Ok(self
            .partition(variant, num)?
            .reserved_erase_blocks
            .unwrap_or(0))
    }

    pub fn table_totals(&self, variant: &str) -> LayoutResult<TableTotals> {
        table_totals(self.layout(variant)?)
    }

    pub fn full_partition_size(&self, variant: &str, num: u32) -> LayoutResult<u64> {
        let doc = self.layout(variant)?;
        Ok(full_partition_size(doc.partition(num)?, &doc.device))
    }

    pub fn validate(&self, variant: &str) -> LayoutResult<()> {
        validate::validate(self.layout(variant)?)
    }

    pub fn partition_extents(
        &self,
        variant: &str,
        disk_size: u64,
    ) -> LayoutResult<Vec<PartitionExtent>> {
        partition_extents(self.layout(variant)?, disk_size)
    }

    pub fn dump(&self, variant: &str) -> LayoutResult<LayoutDump<'_>> {
        Ok(self.layout(variant)?.dump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "metadata": { "block_size": 512, "fs_block_size": 4096, "fs_align": "2MiB" },
            "layouts": {
                "common": [
                    { "type": "blank", "size": "2MiB" },
                    { "num": 1, "label": "STATE", "type": "data", "fs_format": "ext4",
                      "size": "1GiB", "features": ["expand"],
                      "fs_options": { "ext4": "-i 65536", "btrfs": "" } },
                    { "num": 2, "label": "KERN-A", "type": "kernel", "size": "16MiB" },
                    { "num": 3, "label": "ROOT-A", "type": "rootfs", "size": "2GiB",
                      "fs_size": "1GiB", "fs_format": "ext2" }
                ],
                "base": [],
                "usb": [ { "num": 1, "size": "4GiB" } ]
            }
        })
    }

    #[test]
    fn queries() {
        let table = PartitionTable::from_value(document(), &[]).unwrap();
        assert_eq!(table.image_types(), vec!["base", "usb"]);
        assert_eq!(table.block_size(), Some(512));
        assert_eq!(table.fs_block_size(), 4096);
        assert_eq!(table.partition_numbers("base").unwrap(), vec![1, 2, 3]);
        assert_eq!(table.partition_size("usb", 1).unwrap(), 4 << 30);
        assert_eq!(table.filesystem_size("base", 3).unwrap(), 1 << 30);
        assert_eq!(table.filesystem_size("base", 2).unwrap(), 16 << 20);
        assert_eq!(table.label("base", 2).unwrap(), "KERN-A");
        assert_eq!(table.number("base", "ROOT-A").unwrap(), 3);
        assert_eq!(table.partition_type("base", 3).unwrap(), &PartitionType::Rootfs);
        assert_eq!(table.format("base", 3).unwrap(), "");
        assert_eq!(table.filesystem_format("base", 3).unwrap(), "ext2");
        assert_eq!(table.filesystem_options("base", 1).unwrap(), "-i 65536");
        assert_eq!(table.uuid("base", 1).unwrap(), "random");
        assert_eq!(table.reserved_erase_blocks("base", 1).unwrap(), 0);
        assert_eq!(table.full_partition_size("base", 3).unwrap(), 2 << 30);
        assert!(table.validate("base").is_ok());
        assert!(table.dump("usb").unwrap().to_string().contains("STATE"));
    }

    #[test]
    fn not_found_kinds() {
        let table = PartitionTable::from_value(document(), &[]).unwrap();
        assert!(matches!(table.layout("recovery"), Err(LayoutError::InvalidLayout(_))));
        assert!(matches!(
            table.partition_size("base", 9),
            Err(LayoutError::PartitionNotFound(_))
        ));
        assert!(matches!(
            table.number("base", "OEM"),
            Err(LayoutError::PartitionNotFound(_))
        ));
    }

    #[test]
    fn adjustments_apply_to_every_variant() {
        let adjustments = Adjustment::parse_list("ROOT-A:+100MiB").unwrap();
        let table = PartitionTable::from_value(document(), &adjustments).unwrap();
        for variant in ["base", "usb"] {
            assert_eq!(table.partition_size(variant, 3).unwrap(), 2_590_192_435);
            assert_eq!(table.filesystem_size(variant, 3).unwrap(), 2_252_341_248);
        }

        let missing = Adjustment::parse_list("OEM:+1MiB").unwrap();
        assert!(matches!(
            PartitionTable::from_value(document(), &missing),
            Err(LayoutError::PartitionNotFound(_))
        ));
    }

    #[test]
    fn totals_and_extents() {
        let table = PartitionTable::from_value(document(), &[]).unwrap();
        let totals = table.table_totals("base").unwrap();
        assert_eq!(totals.expand_count, 1);
        assert_eq!(totals.expand_min, 1 << 30);

        let extents = table.partition_extents("base", 8 << 30).unwrap();
        assert_eq!(extents.len(), 4);
        assert_eq!(extents[1].start % (2 << 20), 0);
        assert!(extents[1].bytes >= 1 << 30);
    }

    #[test]
    fn nand_partition_spanning_the_device() {
        // 8173 of 8192 erase blocks, so only 19 lie outside for 20 bad ones.
        let doc = json!({
            "metadata": { "fs_block_size": 4096 },
            "layouts": {
                "common": [
                    { "num": "metadata", "size": "1GiB", "erase_block_size": "128KiB",
                      "page_size": "2KiB", "max_bad_erase_blocks": 20 },
                    { "num": 1, "label": "STATE", "type": "data", "format": "nand",
                      "size": 1_071_251_456, "reserved_erase_blocks": 19 }
                ],
                "base": []
            }
        });
        let table = PartitionTable::from_value(doc, &[]).unwrap();
        assert_eq!(table.full_partition_size("base", 1).unwrap(), 1 << 30);
        assert!(matches!(
            table.validate("base"),
            Err(LayoutError::ExcessFailureProbability(_))
        ));
    }

    #[test]
    fn value_documents_cannot_name_parents() {
        let mut doc = document();
        doc["parent"] = json!("board.json");
        assert!(matches!(
            PartitionTable::from_value(doc, &[]),
            Err(LayoutError::ConfigNotFound(_))
        ));
    }
}
